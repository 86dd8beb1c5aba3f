use crate::cosmos::{Difficulty, Fact, InvalidQuestion, QuizQuestion};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("chat backend error: {0}")]
    Chat(#[from] chatgpt::err::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} answered {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("malformed answer: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid quiz question: {0}")]
    InvalidQuestion(#[from] InvalidQuestion),
    #[error("asked for {expected} quiz questions, got {got}")]
    QuizSize { expected: usize, got: usize },
    #[error("no image was generated")]
    NoImage,
    #[error("image generation is turned off")]
    ImagesDisabled,
}

/// What the provider hands back for one fact, before any picture exists.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactDraft {
    pub fact: String,
    pub explanation: String,
    pub image_prompt: String,
}

impl FactDraft {
    pub fn into_fact(self, image: Option<Vec<u8>>) -> Fact {
        Fact {
            topic: self.fact,
            explanation: self.explanation,
            image_prompt: self.image_prompt,
            image,
        }
    }
}

#[async_trait::async_trait]
pub trait ContentProvider: Send + Sync {
    /// `position` is the 1-based fact number within the level. `known_facts`
    /// lists earlier topics so the provider can avoid repeating them.
    async fn generate_fact(
        &self,
        position: usize,
        known_facts: &[String],
        difficulty: Difficulty,
    ) -> Result<FactDraft, ProviderError>;

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError>;

    /// One question per fact.
    async fn generate_quiz(
        &self,
        facts: &[String],
        difficulty: Difficulty,
    ) -> Result<Vec<QuizQuestion>, ProviderError>;
}

/// Draws the picture for a fact. A failed picture leaves the fact without one.
pub async fn illustrate(provider: &dyn ContentProvider, draft: FactDraft) -> Fact {
    match provider.generate_image(&draft.image_prompt).await {
        Ok(image) => draft.into_fact(Some(image)),
        Err(ProviderError::ImagesDisabled) => draft.into_fact(None),
        Err(err) => {
            log::warn!("No illustration for {:?}: {}", draft.fact, err);
            draft.into_fact(None)
        }
    }
}

/// Generates a fact and its picture.
pub async fn fetch_fact(
    provider: &dyn ContentProvider,
    position: usize,
    known_facts: &[String],
    difficulty: Difficulty,
) -> Result<Fact, ProviderError> {
    let draft = provider
        .generate_fact(position, known_facts, difficulty)
        .await?;
    Ok(illustrate(provider, draft).await)
}

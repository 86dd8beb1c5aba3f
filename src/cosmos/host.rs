use chatgpt::client::ChatGPT;
use chatgpt::types::{ChatMessage, CompletionResponse, Role};

use crate::cosmos::images::ImageStudio;
use crate::cosmos::provider::{ContentProvider, FactDraft, ProviderError};
use crate::cosmos::{Difficulty, QuizQuestion};

/// The AI host: writes facts and quizzes in character and hands picture
/// requests to the image studio.
pub struct CosmicHost {
    personality: Personality,
    chat_gpt: ChatGPT,
    studio: ImageStudio,
}

impl CosmicHost {
    pub fn new(chat_gpt: ChatGPT, personality: Personality, studio: ImageStudio) -> Self {
        Self {
            personality,
            chat_gpt,
            studio,
        }
    }

    async fn ask(&self, system: String, prompt: String) -> Result<String, ProviderError> {
        let history = vec![
            ChatMessage {
                role: Role::System,
                content: system,
            },
            ChatMessage {
                role: Role::User,
                content: prompt,
            },
        ];
        let response: CompletionResponse = self.chat_gpt.send_history(&history).await?;
        let content = response.message().clone().content;

        log::debug!("Completion: {:?}", content);

        Ok(content)
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
    question: String,
    options: Vec<String>,
    correct_answer: String,
}

/// Models wrap JSON in markdown fences more often than not.
fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

pub fn parse_fact(text: &str) -> Result<FactDraft, ProviderError> {
    Ok(serde_json::from_str(strip_fences(text))?)
}

pub fn parse_quiz(
    text: &str,
    expected: usize,
) -> Result<Vec<QuizQuestion>, ProviderError> {
    let raw: Vec<RawQuestion> = serde_json::from_str(strip_fences(text))?;
    if raw.len() != expected {
        return Err(ProviderError::QuizSize {
            expected,
            got: raw.len(),
        });
    }
    raw.into_iter()
        .map(|q| {
            let options = q.options.into_iter().map(|o| o.trim().to_string()).collect();
            Ok(QuizQuestion::new(q.question, options, q.correct_answer.trim().to_string())?.shuffled())
        })
        .collect()
}

#[async_trait::async_trait]
impl ContentProvider for CosmicHost {
    async fn generate_fact(
        &self,
        position: usize,
        known_facts: &[String],
        difficulty: Difficulty,
    ) -> Result<FactDraft, ProviderError> {
        log::info!("Generating fact #{} ({})", position, difficulty.label());
        let prompt = format!(
            "Your current fact level is {position}. The difficulty should scale with this number (1 is very common knowledge, 10 is advanced).
            The audience is {audience}. The mission focus is \"{focus}\": {description}
            Please generate a new, unique fact about the cosmos that is not in this list of previous facts: [{previous}].
            Provide an engaging and detailed explanation for the fact.
            Then, based on the fact and explanation, create a concise, descriptive prompt for an AI image generator to create a technically accurate visual illustration.
            Answer with JSON only, shaped as {{\"fact\": string, \"explanation\": string, \"imagePrompt\": string}}.",
            audience = difficulty.audience(),
            focus = difficulty.label(),
            description = difficulty.description(),
            previous = known_facts.join(", "),
        );

        let content = self.ask(self.personality.fact_instruction(), prompt).await?;
        parse_fact(&content)
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        self.studio.render(prompt).await
    }

    async fn generate_quiz(
        &self,
        facts: &[String],
        difficulty: Difficulty,
    ) -> Result<Vec<QuizQuestion>, ProviderError> {
        log::info!("Generating a {}-question quiz ({})", facts.len(), difficulty.label());
        let numbered = facts
            .iter()
            .enumerate()
            .map(|(index, fact)| format!("{}. {}", index + 1, fact))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Based on the following {count} facts, create a multiple-choice quiz with one question for each fact. Each question should test understanding of the core concept in the fact. Each question must have four options: one correct answer and three plausible but incorrect distractors. Pitch the questions at {audience}.
            Answer with a JSON array only, each item shaped as {{\"question\": string, \"options\": [4 strings], \"correctAnswer\": string}}, where correctAnswer exactly matches one of the options.

            Facts:
            {numbered}",
            count = facts.len(),
            audience = difficulty.audience(),
        );

        let content = self.ask(self.personality.quiz_instruction(), prompt).await?;
        parse_quiz(&content, facts.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Personality {
    DrSagan,
    CommanderSagan,
}

impl Personality {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "doctor" | "dr" | "dr-sagan" => Some(Personality::DrSagan),
            "commander" | "commander-sagan" => Some(Personality::CommanderSagan),
            _ => None,
        }
    }

    pub fn get_personality(&self) -> String {
        match self {
            Personality::DrSagan => "Dr. Aime Sagan",
            Personality::CommanderSagan => "Commander Sagan",
        }
        .to_string()
    }

    fn fact_instruction(&self) -> String {
        format!(
            "You are a PhD Astrophysicist named {}, hosting an educational and interactive game about the cosmos. Your tone is enthusiastic, knowledgeable, and engaging.",
            self.get_personality()
        )
    }

    fn quiz_instruction(&self) -> String {
        format!(
            "You are {}, a PhD Astrophysicist creating a quiz for your space game.",
            self.get_personality()
        )
    }
}

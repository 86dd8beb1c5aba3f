use crate::cosmos::{Fact, QuizQuestion};

pub type SurfaceError = Box<dyn std::error::Error + Send + Sync>;

/// A message the host posts into the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Say {
        text: String,
        buttons: Vec<String>,
    },
    Fact {
        number: usize,
        total: usize,
        fact: Fact,
        buttons: Vec<String>,
    },
    Question {
        number: usize,
        total: usize,
        question: QuizQuestion,
        buttons: Vec<String>,
    },
    /// Transient placeholder shown while the provider works.
    Loading { text: String },
}

impl Outgoing {
    pub fn say(text: impl Into<String>, buttons: Vec<String>) -> Self {
        Outgoing::Say {
            text: text.into(),
            buttons,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posted(pub i32);

/// Where the conversation is rendered.
#[async_trait::async_trait]
pub trait ChatSurface: Send + Sync {
    async fn post(&self, message: Outgoing) -> Result<Posted, SurfaceError>;

    /// Rewrites a posted message as plain text.
    async fn replace(&self, posted: Posted, text: String) -> Result<(), SurfaceError>;

    async fn remove(&self, posted: Posted) -> Result<(), SurfaceError>;
}

/// A loading placeholder that is either dismissed or turned into an error.
pub struct LoadingBubble<'a> {
    surface: &'a dyn ChatSurface,
    posted: Posted,
}

impl<'a> LoadingBubble<'a> {
    pub async fn open(surface: &'a dyn ChatSurface, text: &str) -> Result<LoadingBubble<'a>, SurfaceError> {
        let posted = surface
            .post(Outgoing::Loading {
                text: text.to_string(),
            })
            .await?;
        Ok(Self { surface, posted })
    }

    pub async fn dismiss(self) -> Result<(), SurfaceError> {
        self.surface.remove(self.posted).await
    }

    pub async fn fail(self, text: &str) -> Result<(), SurfaceError> {
        self.surface.replace(self.posted, text.to_string()).await
    }
}

pub mod chat;
pub mod host;
pub mod images;
pub mod preloader;
pub mod provider;
pub mod quiz;
pub mod sequencer;
pub mod session;
pub mod voyage;

use rand::seq::SliceRandom;

pub const QUIZ_INTERVAL: usize = 5;
pub const FACTS_PER_LEVEL: usize = 15;
pub const OPTIONS_PER_QUESTION: usize = 4;

/// Typing this at any point ends the session.
pub const TERMINATION_PHRASE: &str = "Houston, we have a problem.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Difficulty {
    Foundations,
    StellarSystems,
    CosmicFrontiers,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [
        Difficulty::Foundations,
        Difficulty::StellarSystems,
        Difficulty::CosmicFrontiers,
    ];

    pub fn tier(&self) -> u8 {
        match self {
            Difficulty::Foundations => 1,
            Difficulty::StellarSystems => 2,
            Difficulty::CosmicFrontiers => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Foundations => "Foundations",
            Difficulty::StellarSystems => "Stellar Systems",
            Difficulty::CosmicFrontiers => "Cosmic Frontiers",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Difficulty::Foundations => "Explore the fundamental principles of astronomy, from celestial mechanics to the properties of light.",
            Difficulty::StellarSystems => "Journey through star systems, examining stellar evolution, planetary formation, and the search for exoplanets.",
            Difficulty::CosmicFrontiers => "Delve into the universe's greatest mysteries, including black holes, dark energy, and the fabric of spacetime.",
        }
    }

    /// Audience profile handed to the content provider. It only shapes the prompts.
    pub fn audience(&self) -> &'static str {
        match self {
            Difficulty::Foundations => {
                "a curious beginner; keep to common knowledge and explain every term"
            }
            Difficulty::StellarSystems => {
                "an enthusiast who knows the basics; cover stars, planets and exoplanets in some depth"
            }
            Difficulty::CosmicFrontiers => {
                "an advanced student; cover black holes, cosmology and open research questions"
            }
        }
    }

    /// Matches a menu button, either by its label or by the tier number.
    pub fn from_choice(text: &str) -> Option<Difficulty> {
        let text = text.trim();
        Difficulty::ALL.into_iter().find(|d| {
            text.eq_ignore_ascii_case(d.label())
                || text == d.tier().to_string()
                || text.eq_ignore_ascii_case(&d.menu_label())
        })
    }

    pub fn menu_label(&self) -> String {
        format!("{}. {}", self.tier(), self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LevelConfig {
    pub facts_per_level: usize,
    pub quiz_interval: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LevelConfigError {
    #[error("quiz interval must be at least 1")]
    ZeroInterval,
    #[error("a level needs at least {interval} facts to reach its first quiz, got {facts}")]
    TooFewFacts { facts: usize, interval: usize },
}

impl LevelConfig {
    pub fn new(facts_per_level: usize, quiz_interval: usize) -> Result<Self, LevelConfigError> {
        if quiz_interval == 0 {
            return Err(LevelConfigError::ZeroInterval);
        }
        if facts_per_level < quiz_interval {
            return Err(LevelConfigError::TooFewFacts {
                facts: facts_per_level,
                interval: quiz_interval,
            });
        }
        Ok(Self {
            facts_per_level,
            quiz_interval,
        })
    }

    pub fn rounds(&self) -> usize {
        self.facts_per_level / self.quiz_interval
    }

    pub fn block_count(&self) -> usize {
        self.facts_per_level + self.rounds()
    }
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            facts_per_level: FACTS_PER_LEVEL,
            quiz_interval: QUIZ_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
    pub topic: String,
    pub explanation: String,
    pub image_prompt: String,
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuizQuestion {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidQuestion {
    #[error("expected {expected} options, got {got}")]
    OptionCount { expected: usize, got: usize },
    #[error("correct answer {0:?} is not one of the options")]
    AnswerNotAnOption(String),
    #[error("options must be distinct")]
    DuplicateOptions,
}

impl QuizQuestion {
    pub fn new(
        prompt: String,
        options: Vec<String>,
        correct_answer: String,
    ) -> Result<Self, InvalidQuestion> {
        if options.len() != OPTIONS_PER_QUESTION {
            return Err(InvalidQuestion::OptionCount {
                expected: OPTIONS_PER_QUESTION,
                got: options.len(),
            });
        }
        if !options.contains(&correct_answer) {
            return Err(InvalidQuestion::AnswerNotAnOption(correct_answer));
        }
        let mut distinct = options.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != options.len() {
            return Err(InvalidQuestion::DuplicateOptions);
        }
        Ok(Self {
            prompt,
            options,
            correct_answer,
        })
    }

    /// Models like to put the right answer first.
    pub fn shuffled(mut self) -> Self {
        self.options.shuffle(&mut rand::thread_rng());
        self
    }

    pub fn is_correct(&self, option: &str) -> bool {
        self.correct_answer == option
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Fact(Fact),
    Quiz(Vec<QuizQuestion>),
}

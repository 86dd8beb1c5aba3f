use crate::cosmos::quiz::{QuizAttempt, QuizError, QuizScore};
use crate::cosmos::sequencer::{Advance, BlockSlot, Sequencer};
use crate::cosmos::{Difficulty, LevelConfig, QuizQuestion};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GamePhase {
    Welcome,
    Playing,
    Quiz(QuizAttempt),
    QuizDone,
    LevelComplete,
    SessionOver,
    /// The whole level could not be prepared; only a return to the menu helps.
    Stranded,
}

impl GamePhase {
    pub fn name(&self) -> &'static str {
        match self {
            GamePhase::Welcome => "welcome",
            GamePhase::Playing => "playing",
            GamePhase::Quiz(_) => "quiz",
            GamePhase::QuizDone => "quiz_done",
            GamePhase::LevelComplete => "level_complete",
            GamePhase::SessionOver => "session_over",
            GamePhase::Stranded => "stranded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GamePhase::LevelComplete | GamePhase::SessionOver | GamePhase::Stranded
        )
    }
}

/// Buttons offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    StartLesson,
    NextTopic,
    TakeQuiz,
    ContinueLesson,
    EndSession,
    ReturnToMenu,
}

impl Control {
    pub const ALL: [Control; 6] = [
        Control::StartLesson,
        Control::NextTopic,
        Control::TakeQuiz,
        Control::ContinueLesson,
        Control::EndSession,
        Control::ReturnToMenu,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Control::StartLesson => "Start Lesson",
            Control::NextTopic => "Next Topic",
            Control::TakeQuiz => "Take Quiz",
            Control::ContinueLesson => "Continue Lesson",
            Control::EndSession => "End Session",
            Control::ReturnToMenu => "Return to Menu",
        }
    }

    pub fn from_label(text: &str) -> Option<Control> {
        let text = text.trim();
        Control::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(text))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} while in {phase}")]
    NotAllowed {
        action: &'static str,
        phase: &'static str,
    },
    #[error("the next block is {expected:?}, not {got:?}")]
    WrongBlock { expected: BlockSlot, got: BlockSlot },
    #[error("a quiz needs {expected} questions, got {got}")]
    QuizSize { expected: usize, got: usize },
    #[error(transparent)]
    Quiz(#[from] QuizError),
}

/// One player's run through a level.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    /// Tells this voyage apart from a later one in the same chat.
    #[serde(default)]
    id: u64,
    pub difficulty: Difficulty,
    sequencer: Sequencer,
    shown: Vec<String>,
    phase: GamePhase,
}

impl Session {
    pub fn new(difficulty: Difficulty, level: LevelConfig) -> Self {
        Self {
            id: rand::random(),
            difficulty,
            sequencer: Sequencer::new(level),
            shown: Vec::new(),
            phase: GamePhase::Welcome,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> &GamePhase {
        &self.phase
    }

    pub fn level(&self) -> &LevelConfig {
        self.sequencer.level()
    }

    pub fn facts_shown(&self) -> usize {
        self.sequencer.facts_shown()
    }

    /// Topics of every fact shown so far, in order.
    pub fn shown_topics(&self) -> &[String] {
        &self.shown
    }

    pub fn progress_label(&self) -> String {
        format!(
            "Topic {} / {}",
            self.facts_shown(),
            self.level().facts_per_level
        )
    }

    pub fn controls(&self) -> Vec<Control> {
        match &self.phase {
            GamePhase::Welcome => vec![Control::StartLesson, Control::EndSession],
            GamePhase::Playing => match self.sequencer.peek() {
                Some(BlockSlot::Quiz { .. }) => vec![Control::TakeQuiz, Control::EndSession],
                Some(BlockSlot::Fact { .. }) => vec![Control::NextTopic, Control::EndSession],
                None => vec![Control::EndSession],
            },
            GamePhase::Quiz(_) => vec![Control::EndSession],
            GamePhase::QuizDone => vec![Control::ContinueLesson, Control::EndSession],
            GamePhase::LevelComplete | GamePhase::SessionOver | GamePhase::Stranded => {
                vec![Control::ReturnToMenu]
            }
        }
    }

    fn not_allowed(&self, action: &'static str) -> TransitionError {
        TransitionError::NotAllowed {
            action,
            phase: self.phase.name(),
        }
    }

    /// The block the next advance will deliver, without moving.
    ///
    /// Reaching the end of the plan completes the level right away.
    pub fn pending_block(&mut self) -> Result<Advance, TransitionError> {
        match self.phase {
            GamePhase::Welcome | GamePhase::Playing | GamePhase::QuizDone => {}
            _ => return Err(self.not_allowed("advance")),
        }
        match self.sequencer.peek() {
            Some(slot) => Ok(Advance::Block(slot)),
            None => {
                self.phase = GamePhase::LevelComplete;
                Ok(Advance::EndOfLevel)
            }
        }
    }

    fn consume(&mut self, slot: BlockSlot) -> Result<(), TransitionError> {
        let expected = self
            .sequencer
            .peek()
            .ok_or_else(|| self.not_allowed("advance past the level"))?;
        if expected != slot {
            return Err(TransitionError::WrongBlock {
                expected,
                got: slot,
            });
        }
        self.sequencer.advance();
        Ok(())
    }

    /// Records a fetched fact as displayed. A fact that closes the plan
    /// (leftover facts after the last quiz) completes the level.
    pub fn present_fact(&mut self, slot: BlockSlot, topic: &str) -> Result<(), TransitionError> {
        self.pending_block()?;
        self.consume(slot)?;
        self.shown.push(topic.to_string());
        self.phase = if self.sequencer.is_finished() {
            GamePhase::LevelComplete
        } else {
            GamePhase::Playing
        };
        Ok(())
    }

    pub fn open_quiz(
        &mut self,
        slot: BlockSlot,
        questions: Vec<QuizQuestion>,
    ) -> Result<(), TransitionError> {
        self.pending_block()?;
        let expected = self.level().quiz_interval;
        if questions.len() != expected {
            return Err(TransitionError::QuizSize {
                expected,
                got: questions.len(),
            });
        }
        self.consume(slot)?;
        self.phase = GamePhase::Quiz(QuizAttempt::new(questions));
        Ok(())
    }

    pub fn quiz(&self) -> Option<&QuizAttempt> {
        match &self.phase {
            GamePhase::Quiz(attempt) => Some(attempt),
            _ => None,
        }
    }

    pub fn answer(&mut self, option: &str) -> Result<bool, TransitionError> {
        if let GamePhase::Quiz(attempt) = &mut self.phase {
            return Ok(attempt.answer_current(option)?);
        }
        Err(self.not_allowed("answer a quiz"))
    }

    /// Scores the quiz and moves on to `QuizDone`, or straight to
    /// `LevelComplete` when that quiz closed the final round.
    pub fn submit_quiz(&mut self) -> Result<QuizScore, TransitionError> {
        let score = match &self.phase {
            GamePhase::Quiz(attempt) => attempt.submit()?,
            _ => return Err(self.not_allowed("submit a quiz")),
        };
        self.phase = GamePhase::QuizDone;
        if self.after_quiz() == GamePhase::LevelComplete {
            self.phase = GamePhase::LevelComplete;
        }
        Ok(score)
    }

    /// Where `QuizDone` leads.
    pub fn after_quiz(&self) -> GamePhase {
        if self.facts_shown() == self.level().facts_per_level {
            GamePhase::LevelComplete
        } else {
            GamePhase::Playing
        }
    }

    pub fn end(&mut self) {
        self.phase = GamePhase::SessionOver;
    }

    pub fn strand(&mut self) -> Result<(), TransitionError> {
        match self.phase {
            GamePhase::Welcome => {
                self.phase = GamePhase::Stranded;
                Ok(())
            }
            _ => Err(self.not_allowed("abandon preparation")),
        }
    }
}

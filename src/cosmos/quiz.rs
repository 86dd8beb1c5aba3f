use std::fmt;

use crate::cosmos::QuizQuestion;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuizAttempt {
    pub questions: Vec<QuizQuestion>,
    answers: Vec<Option<String>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuizError {
    #[error("there is no question #{0}")]
    NoSuchQuestion(usize),
    #[error("{0:?} is not one of the options")]
    UnknownOption(String),
    #[error("{remaining} question(s) still need an answer")]
    Unanswered { remaining: usize },
}

impl QuizAttempt {
    pub fn new(questions: Vec<QuizQuestion>) -> Self {
        let answers = vec![None; questions.len()];
        Self { questions, answers }
    }

    /// First question without an answer, with its index.
    pub fn current(&self) -> Option<(usize, &QuizQuestion)> {
        self.answers
            .iter()
            .position(Option::is_none)
            .map(|index| (index, &self.questions[index]))
    }

    pub fn answer(&mut self, index: usize, option: &str) -> Result<(), QuizError> {
        let question = self
            .questions
            .get(index)
            .ok_or(QuizError::NoSuchQuestion(index))?;
        if !question.options.iter().any(|o| o == option) {
            return Err(QuizError::UnknownOption(option.to_string()));
        }
        self.answers[index] = Some(option.to_string());
        Ok(())
    }

    /// Answers the current question. Returns whether the choice was right.
    pub fn answer_current(&mut self, option: &str) -> Result<bool, QuizError> {
        let (index, question) = self.current().ok_or(QuizError::NoSuchQuestion(self.questions.len()))?;
        let correct = question.is_correct(option);
        self.answer(index, option)?;
        Ok(correct)
    }

    pub fn remaining(&self) -> usize {
        self.answers.iter().filter(|a| a.is_none()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    pub fn submit(&self) -> Result<QuizScore, QuizError> {
        let remaining = self.remaining();
        if remaining > 0 {
            return Err(QuizError::Unanswered { remaining });
        }

        let missed = self
            .questions
            .iter()
            .zip(&self.answers)
            .enumerate()
            .filter(|(_, (question, answer))| answer.as_deref() != Some(question.correct_answer.as_str()))
            .map(|(index, (question, answer))| Miss {
                number: index + 1,
                chosen: answer.clone().unwrap_or_default(),
                correct: question.correct_answer.clone(),
            })
            .collect::<Vec<_>>();

        Ok(QuizScore {
            correct: self.questions.len() - missed.len(),
            total: self.questions.len(),
            missed,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Miss {
    pub number: usize,
    pub chosen: String,
    pub correct: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizScore {
    pub correct: usize,
    pub total: usize,
    pub missed: Vec<Miss>,
}

impl QuizScore {
    pub fn is_perfect(&self) -> bool {
        self.correct == self.total
    }
}

impl fmt::Display for QuizScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} out of {}", self.correct, self.total)
    }
}

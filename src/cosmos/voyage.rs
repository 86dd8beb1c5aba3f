use std::sync::Arc;

use crate::cosmos::chat::{ChatSurface, LoadingBubble, Outgoing, SurfaceError};
use crate::cosmos::host::Personality;
use crate::cosmos::preloader::{PreloadPolicy, PreloadStatus, Preloader};
use crate::cosmos::quiz::{QuizError, QuizScore};
use crate::cosmos::sequencer::{Advance, BlockSlot};
use crate::cosmos::session::{Control, GamePhase, Session, TransitionError};
use crate::cosmos::{ContentBlock, Fact, QuizQuestion, TERMINATION_PHRASE};

const LOADING_FACT: &str = "🔭 Consulting the observatory...";
const LOADING_QUIZ: &str = "📝 Preparing your quiz...";
const APOLOGY: &str = "Apologies, we seem to have hit some cosmic interference. My connection to the deep space network was interrupted. Press the button again and I'll retry.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Control(Control),
    Answer(String),
    Unknown(String),
}

impl Action {
    pub fn parse(text: &str, session: &Session) -> Action {
        let text = text.trim();
        if text.eq_ignore_ascii_case(TERMINATION_PHRASE) {
            return Action::Control(Control::EndSession);
        }
        if let Some(control) = Control::from_label(text) {
            return Action::Control(control);
        }
        match session.phase() {
            GamePhase::Quiz(_) => Action::Answer(text.to_string()),
            _ => Action::Unknown(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue(Session),
    /// The player ended the session; go back to the menu after a pause
    /// unless the chat has moved on by then.
    SessionEnded(Session),
    BackToMenu,
}

fn hint(session: &Session) -> String {
    format!(
        "Use the buttons below to steer our voyage. ({})",
        session.progress_label()
    )
}

fn labels(controls: Vec<Control>) -> Vec<String> {
    controls.into_iter().map(|c| c.label().to_string()).collect()
}

/// Drives one player's session: every action posts to the chat surface and
/// pulls content through the preloader.
pub struct Voyage<'a> {
    surface: &'a dyn ChatSurface,
    preloader: &'a Arc<Preloader>,
    host: Personality,
}

impl<'a> Voyage<'a> {
    pub fn new(surface: &'a dyn ChatSurface, preloader: &'a Arc<Preloader>, host: Personality) -> Self {
        Self {
            surface,
            preloader,
            host,
        }
    }

    async fn say(&self, text: impl Into<String>, session: &Session) -> Result<(), SurfaceError> {
        self.surface
            .post(Outgoing::say(text, labels(session.controls())))
            .await?;
        Ok(())
    }

    /// Greets the player right after a difficulty was chosen.
    pub async fn welcome(&self, session: &Session) -> Result<(), SurfaceError> {
        let level = session.level();
        let mut text = format!(
            "Greetings, future stargazer! I'm {}, your guide on this cosmic voyage. Our mission focus is {}: {}\n\nI'll share {} fascinating facts about our universe, and after every {} of them we'll have a little quiz to see what you've learned.",
            self.host.get_personality(),
            session.difficulty.label(),
            session.difficulty.description(),
            level.facts_per_level,
            level.quiz_interval,
        );
        if self.preloader.policy() == PreloadPolicy::WholeLevel {
            text.push_str(" I am preparing the mission materials now.");
        }
        text.push_str(&format!(
            " Press \"{}\" when you are ready, or type \"{}\" to leave at any time.",
            Control::StartLesson.label(),
            TERMINATION_PHRASE
        ));
        self.say(text, session).await
    }

    pub async fn handle(&self, session: Session, action: Action) -> Result<Outcome, SurfaceError> {
        log::debug!("{:?} in phase {}", action, session.phase().name());
        match action {
            Action::Control(Control::EndSession) => self.end(session).await,
            Action::Control(Control::ReturnToMenu) if session.phase().is_terminal() => {
                Ok(Outcome::BackToMenu)
            }
            Action::Control(control) if session.controls().contains(&control) => {
                self.advance(session).await
            }
            Action::Answer(option) => self.answer(session, option).await,
            Action::Control(_) | Action::Unknown(_) => {
                self.say(hint(&session), &session).await?;
                Ok(Outcome::Continue(session))
            }
        }
    }

    async fn end(&self, mut session: Session) -> Result<Outcome, SurfaceError> {
        session.end();
        self.say(
            format!(
                "Mission control, I understand. It's been an honor exploring the cosmos with you. Come back any time for another voyage. {} signing off.",
                self.host.get_personality()
            ),
            &session,
        )
        .await?;
        Ok(Outcome::SessionEnded(session))
    }

    /// Whole-level play may only start once everything is prepared.
    async fn level_ready(&self, session: &mut Session) -> Result<bool, SurfaceError> {
        if self.preloader.policy() != PreloadPolicy::WholeLevel
            || session.phase() != &GamePhase::Welcome
        {
            return Ok(true);
        }
        match self.preloader.status() {
            PreloadStatus::Ready => Ok(true),
            PreloadStatus::Loading(progress) => {
                self.say(format!("Still preparing the mission: {progress}"), session)
                    .await?;
                Ok(false)
            }
            PreloadStatus::Idle => {
                self.preloader.start_level_preload();
                self.say("Preparing the mission materials, one moment...", session)
                    .await?;
                Ok(false)
            }
            PreloadStatus::Failed(reason) => {
                log::warn!("Stranding a {} session: {}", session.difficulty.label(), reason);
                if let Err(err) = session.strand() {
                    log::error!("{}", err);
                }
                self.say(
                    "I'm afraid the mission materials could not be prepared; the deep space network is silent. Return to the menu and we'll try again.",
                    session,
                )
                .await?;
                Ok(false)
            }
        }
    }

    async fn advance(&self, mut session: Session) -> Result<Outcome, SurfaceError> {
        if !self.level_ready(&mut session).await? {
            return Ok(Outcome::Continue(session));
        }

        let slot = match session.pending_block() {
            Ok(Advance::Block(slot)) => slot,
            Ok(Advance::EndOfLevel) => {
                self.complete_level(&session).await?;
                return Ok(Outcome::Continue(session));
            }
            Err(err) => {
                log::debug!("{}", err);
                self.say(hint(&session), &session).await?;
                return Ok(Outcome::Continue(session));
            }
        };

        let loading = if slot.is_quiz() { LOADING_QUIZ } else { LOADING_FACT };
        let bubble = LoadingBubble::open(self.surface, loading).await?;
        let block = match self.preloader.block(slot, session.shown_topics()).await {
            Ok(block) => block,
            Err(err) => {
                log::warn!("{:?} failed: {}", slot, err);
                bubble.fail(APOLOGY).await?;
                return Ok(Outcome::Continue(session));
            }
        };
        bubble.dismiss().await?;

        match block {
            ContentBlock::Fact(fact) => self.show_fact(&mut session, slot, fact).await?,
            ContentBlock::Quiz(questions) => self.start_quiz(&mut session, slot, questions).await?,
        }
        Ok(Outcome::Continue(session))
    }

    async fn show_fact(&self, session: &mut Session, slot: BlockSlot, fact: Fact) -> Result<(), SurfaceError> {
        if let Err(err) = session.present_fact(slot, &fact.topic) {
            log::error!("{:?} could not be shown: {}", slot, err);
            return self.say(APOLOGY, session).await;
        }
        self.surface
            .post(Outgoing::Fact {
                number: session.facts_shown(),
                total: session.level().facts_per_level,
                fact,
                buttons: labels(session.controls()),
            })
            .await?;
        if session.phase() == &GamePhase::LevelComplete {
            return self.complete_level(session).await;
        }
        self.preloader
            .schedule(slot, session.shown_topics().to_vec());
        Ok(())
    }

    async fn start_quiz(
        &self,
        session: &mut Session,
        slot: BlockSlot,
        questions: Vec<QuizQuestion>,
    ) -> Result<(), SurfaceError> {
        let count = questions.len();
        if let Err(err) = session.open_quiz(slot, questions) {
            log::error!("{:?} could not be opened: {}", slot, err);
            return self.say(APOLOGY, session).await;
        }
        self.surface
            .post(Outgoing::say(
                format!(
                    "Pop Quiz, Space Explorer! {count} questions about the last {count} topics. Pick an answer for each one."
                ),
                Vec::new(),
            ))
            .await?;
        self.post_question(session).await?;
        self.preloader
            .schedule(slot, session.shown_topics().to_vec());
        Ok(())
    }

    async fn post_question(&self, session: &Session) -> Result<(), SurfaceError> {
        let Some(attempt) = session.quiz() else {
            return Ok(());
        };
        let Some((index, question)) = attempt.current() else {
            return Ok(());
        };
        let mut buttons = question.options.clone();
        buttons.extend(labels(session.controls()));
        self.surface
            .post(Outgoing::Question {
                number: index + 1,
                total: attempt.questions.len(),
                question: question.clone(),
                buttons,
            })
            .await?;
        Ok(())
    }

    async fn answer(&self, mut session: Session, option: String) -> Result<Outcome, SurfaceError> {
        match session.answer(&option) {
            Ok(_) => {}
            Err(TransitionError::Quiz(QuizError::UnknownOption(_))) => {
                self.say("Pick one of the options below.", &session).await?;
                self.post_question(&session).await?;
                return Ok(Outcome::Continue(session));
            }
            Err(err) => {
                log::debug!("{}", err);
                self.say(hint(&session), &session).await?;
                return Ok(Outcome::Continue(session));
            }
        }

        if session.quiz().map_or(false, |attempt| !attempt.is_complete()) {
            self.post_question(&session).await?;
            return Ok(Outcome::Continue(session));
        }

        match session.submit_quiz() {
            Ok(score) => {
                self.say(quiz_report(&score), &session).await?;
                if session.phase() == &GamePhase::LevelComplete {
                    self.complete_level(&session).await?;
                }
            }
            Err(err) => log::error!("Quiz could not be scored: {}", err),
        }
        Ok(Outcome::Continue(session))
    }

    async fn complete_level(&self, session: &Session) -> Result<(), SurfaceError> {
        self.say(
            format!(
                "Mission accomplished! You have explored all {} topics of {}. Return to the menu to choose your next mission.",
                session.facts_shown(),
                session.difficulty.label()
            ),
            session,
        )
        .await
    }
}

pub fn quiz_report(score: &QuizScore) -> String {
    let mut report = format!("Quiz Complete! You scored {score}.");
    if score.is_perfect() {
        report.push_str(" A flawless orbit!");
    }
    for miss in &score.missed {
        report.push_str(&format!(
            "\n{}. You chose \"{}\"; the answer was \"{}\".",
            miss.number, miss.chosen, miss.correct
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cosmos::chat::transcript::Transcript;
    use crate::cosmos::provider::scripted::{topic, ScriptedProvider};
    use crate::cosmos::{Difficulty, LevelConfig};

    struct Harness {
        provider: Arc<ScriptedProvider>,
        preloader: Arc<Preloader>,
        transcript: Transcript,
    }

    impl Harness {
        fn new(provider: ScriptedProvider, policy: PreloadPolicy, level: LevelConfig) -> Self {
            let provider = Arc::new(provider);
            let preloader = Arc::new(Preloader::new(
                provider.clone(),
                policy,
                Difficulty::Foundations,
                level,
            ));
            Self {
                provider,
                preloader,
                transcript: Transcript::default(),
            }
        }

        fn voyage(&self) -> Voyage<'_> {
            Voyage::new(&self.transcript, &self.preloader, Personality::DrSagan)
        }

        async fn send(&self, session: Session, text: &str) -> Outcome {
            let action = Action::parse(text, &session);
            self.voyage().handle(session, action).await.unwrap()
        }

        async fn press(&self, session: Session, control: Control) -> Session {
            match self.send(session, control.label()).await {
                Outcome::Continue(session) => session,
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    fn new_session(level: LevelConfig) -> Session {
        Session::new(Difficulty::Foundations, level)
    }

    #[tokio::test]
    async fn first_fact_after_start() {
        let harness = Harness::new(
            ScriptedProvider::default(),
            PreloadPolicy::OnDemand,
            LevelConfig::default(),
        );
        let session = new_session(LevelConfig::default());
        harness.voyage().welcome(&session).await.unwrap();
        assert!(harness.transcript.texts()[0].contains("Dr. Aime Sagan"));
        assert_eq!(harness.transcript.last_buttons(), vec!["Start Lesson", "End Session"]);

        let session = harness.press(session, Control::StartLesson).await;
        assert_eq!(session.phase(), &GamePhase::Playing);
        assert_eq!(session.facts_shown(), 1);
        match harness.transcript.last() {
            Some(Outgoing::Fact {
                number,
                total,
                fact,
                buttons,
            }) => {
                assert_eq!((number, total), (1, 15));
                assert_eq!(fact.topic, topic(1));
                assert_eq!(buttons, vec!["Next Topic", "End Session"]);
            }
            other => panic!("expected a fact, got {other:?}"),
        }
        assert!(!harness
            .transcript
            .texts()
            .iter()
            .any(|t| t == LOADING_FACT));
    }

    #[tokio::test]
    async fn provider_failure_leaves_one_error_and_no_placeholder() {
        let harness = Harness::new(
            ScriptedProvider::failing_fact(1),
            PreloadPolicy::OnDemand,
            LevelConfig::default(),
        );
        let session = new_session(LevelConfig::default());

        let session = harness.press(session, Control::StartLesson).await;
        assert_eq!(harness.transcript.texts(), vec![APOLOGY]);
        assert_eq!(session.phase(), &GamePhase::Welcome);
        assert_eq!(session.facts_shown(), 0);

        harness.provider.heal();
        let session = harness.press(session, Control::StartLesson).await;
        assert_eq!(session.facts_shown(), 1);
        assert_eq!(harness.transcript.texts(), vec![APOLOGY.to_string(), topic(1)]);
    }

    #[tokio::test]
    async fn quiz_failure_leaves_one_error_and_retries() {
        let level = LevelConfig::new(2, 2).unwrap();
        let harness = Harness::new(ScriptedProvider::failing_quizzes(), PreloadPolicy::OnDemand, level);
        let mut session = new_session(level);
        session = harness.press(session, Control::StartLesson).await;
        session = harness.press(session, Control::NextTopic).await;

        session = harness.press(session, Control::TakeQuiz).await;
        assert_eq!(
            harness.transcript.texts(),
            vec![topic(1), topic(2), APOLOGY.to_string()]
        );
        assert!(!harness.transcript.texts().iter().any(|t| t == LOADING_QUIZ));
        assert_eq!(session.phase(), &GamePhase::Playing);
        assert_eq!(session.controls(), vec![Control::TakeQuiz, Control::EndSession]);

        harness.provider.heal();
        let session = harness.press(session, Control::TakeQuiz).await;
        assert!(matches!(session.phase(), GamePhase::Quiz(_)));
        assert_eq!(harness.provider.quizzes_requested(), 2);
        assert!(!harness.transcript.texts().iter().any(|t| t == LOADING_QUIZ));
    }

    #[tokio::test]
    async fn full_round_with_quiz() {
        let level = LevelConfig::new(4, 2).unwrap();
        let harness = Harness::new(ScriptedProvider::default(), PreloadPolicy::Lookahead, level);
        let mut session = new_session(level);

        session = harness.press(session, Control::StartLesson).await;
        session = harness.press(session, Control::NextTopic).await;
        assert_eq!(harness.transcript.last_buttons(), vec!["Take Quiz", "End Session"]);

        // Only the quiz is offered now, so "Next Topic" is refused.
        session = harness.press(session, Control::NextTopic).await;
        assert_eq!(session.facts_shown(), 2);

        session = harness.press(session, Control::TakeQuiz).await;
        let Some(Outgoing::Question { number, total, buttons, .. }) = harness.transcript.last() else {
            panic!("expected a question");
        };
        assert_eq!((number, total), (1, 2));
        assert_eq!(buttons.len(), 5);
        assert!(buttons.contains(&"right".to_string()));

        let session = match harness.send(session, "not an option").await {
            Outcome::Continue(session) => session,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(session.quiz().unwrap().remaining(), 2);

        let session = match harness.send(session, "right").await {
            Outcome::Continue(session) => session,
            other => panic!("unexpected {other:?}"),
        };
        let session = match harness.send(session, "wrong 1").await {
            Outcome::Continue(session) => session,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(session.phase(), &GamePhase::QuizDone);
        let texts = harness.transcript.texts();
        let report = texts.last().unwrap();
        assert!(report.starts_with("Quiz Complete! You scored 1 out of 2."));
        assert!(report.contains("the answer was \"right\""));
        assert_eq!(harness.transcript.last_buttons(), vec!["Continue Lesson", "End Session"]);

        let session = harness.press(session, Control::ContinueLesson).await;
        assert_eq!(session.facts_shown(), 3);
        assert_eq!(session.phase(), &GamePhase::Playing);
    }

    #[tokio::test]
    async fn final_quiz_completes_the_level() {
        let level = LevelConfig::new(2, 2).unwrap();
        let harness = Harness::new(ScriptedProvider::default(), PreloadPolicy::OnDemand, level);
        let mut session = new_session(level);
        session = harness.press(session, Control::StartLesson).await;
        session = harness.press(session, Control::NextTopic).await;
        session = harness.press(session, Control::TakeQuiz).await;
        for _ in 0..2 {
            session = match harness.send(session, "right").await {
                Outcome::Continue(session) => session,
                other => panic!("unexpected {other:?}"),
            };
        }
        assert_eq!(session.phase(), &GamePhase::LevelComplete);
        assert!(harness.transcript.texts().last().unwrap().starts_with("Mission accomplished!"));
        assert_eq!(harness.transcript.last_buttons(), vec!["Return to Menu"]);
        assert_eq!(harness.send(session, "Return to Menu").await, Outcome::BackToMenu);
    }

    #[tokio::test]
    async fn termination_phrase_ends_the_session() {
        let harness = Harness::new(
            ScriptedProvider::default(),
            PreloadPolicy::OnDemand,
            LevelConfig::default(),
        );
        let session = new_session(LevelConfig::default());
        let id = session.id();
        let Outcome::SessionEnded(session) = harness.send(session, "houston, we have a problem.").await else {
            panic!("expected the session to end");
        };
        assert_eq!(session.id(), id);
        assert_eq!(session.phase(), &GamePhase::SessionOver);
        assert!(harness.transcript.texts()[0].ends_with("Dr. Aime Sagan signing off."));
        assert_eq!(harness.transcript.last_buttons(), vec!["Return to Menu"]);
        assert_eq!(harness.provider.facts_requested(), 0);

        // Leaving before the automatic reset goes straight back to the menu.
        assert_eq!(harness.send(session, "Return to Menu").await, Outcome::BackToMenu);
    }

    #[tokio::test]
    async fn return_to_menu_needs_a_finished_session() {
        let harness = Harness::new(
            ScriptedProvider::default(),
            PreloadPolicy::OnDemand,
            LevelConfig::default(),
        );
        let session = new_session(LevelConfig::default());
        let session = harness.press(session, Control::ReturnToMenu).await;
        assert_eq!(session.phase(), &GamePhase::Welcome);
        assert_eq!(harness.provider.facts_requested(), 0);
    }

    #[tokio::test]
    async fn whole_level_waits_until_ready() {
        let harness = Harness::new(
            ScriptedProvider {
                delay: Some(Duration::from_millis(1)),
                ..Default::default()
            },
            PreloadPolicy::WholeLevel,
            LevelConfig::default(),
        );
        let session = new_session(LevelConfig::default());

        let session = harness.press(session, Control::StartLesson).await;
        assert_eq!(session.phase(), &GamePhase::Welcome);
        assert!(harness.transcript.texts()[0].starts_with("Preparing the mission materials"));

        let mut status = harness.preloader.subscribe();
        while harness.preloader.status() != PreloadStatus::Ready {
            status.changed().await.unwrap();
        }
        let requested = harness.provider.facts_requested();

        let session = harness.press(session, Control::StartLesson).await;
        assert_eq!(session.facts_shown(), 1);
        assert_eq!(harness.provider.facts_requested(), requested);
    }

    #[tokio::test]
    async fn failed_level_preload_strands_the_session() {
        let harness = Harness::new(
            ScriptedProvider::failing_fact(3),
            PreloadPolicy::WholeLevel,
            LevelConfig::default(),
        );
        assert!(harness.preloader.preload_level().await.is_err());

        let session = new_session(LevelConfig::default());
        let session = harness.press(session, Control::StartLesson).await;
        assert_eq!(session.phase(), &GamePhase::Stranded);
        assert_eq!(harness.transcript.last_buttons(), vec!["Return to Menu"]);
        assert_eq!(harness.send(session, "Return to Menu").await, Outcome::BackToMenu);
    }

    #[test]
    fn perfect_report() {
        let score = QuizScore {
            correct: 5,
            total: 5,
            missed: Vec::new(),
        };
        assert_eq!(quiz_report(&score), "Quiz Complete! You scored 5 out of 5. A flawless orbit!");
    }
}

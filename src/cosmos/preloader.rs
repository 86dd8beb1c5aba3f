use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};

use crate::cosmos::provider::{fetch_fact, ContentProvider, FactDraft, ProviderError};
use crate::cosmos::sequencer::{level_plan, round_facts, BlockSlot};
use crate::cosmos::session::Session;
use crate::cosmos::{ContentBlock, Difficulty, Fact, LevelConfig, QuizQuestion};

pub const DEFAULT_BATCH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadPolicy {
    /// Fetch when the user asks.
    OnDemand,
    /// Fetch the next block while the current one is on screen.
    Lookahead,
    /// Fetch the next `n` blocks once nothing is cached ahead.
    Batch(usize),
    /// Fetch the entire level before play starts.
    WholeLevel,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown preload policy {0:?}; expected on-demand, lookahead, batch[:n] or level")]
pub struct UnknownPolicy(pub String);

impl FromStr for PreloadPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "on-demand" | "none" => return Ok(PreloadPolicy::OnDemand),
            "lookahead" | "next" => return Ok(PreloadPolicy::Lookahead),
            "batch" => return Ok(PreloadPolicy::Batch(DEFAULT_BATCH)),
            "level" | "whole-level" => return Ok(PreloadPolicy::WholeLevel),
            _ => {}
        }
        match s.split_once(':') {
            Some(("batch", size)) => match size.parse::<usize>() {
                Ok(size) if size > 0 => Ok(PreloadPolicy::Batch(size)),
                _ => Err(UnknownPolicy(s.clone())),
            },
            _ => Err(UnknownPolicy(s.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Facts,
    Illustrations,
    Quizzes,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Facts => "Charting cosmic facts",
            Stage::Illustrations => "Rendering illustrations",
            Stage::Quizzes => "Composing quizzes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub stage: Stage,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}... {}/{}", self.stage.label(), self.completed, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadStatus {
    Idle,
    Loading(Progress),
    Ready,
    Failed(String),
}

#[derive(Default)]
struct ContentCache {
    facts: BTreeMap<usize, Fact>,
    quizzes: BTreeMap<usize, Vec<QuizQuestion>>,
    /// Topics of facts already handed out, by number.
    delivered: BTreeMap<usize, String>,
    served_rounds: usize,
}

impl ContentCache {
    fn topic_of(&self, shown: &[String], number: usize) -> Option<String> {
        shown
            .get(number - 1)
            .or_else(|| self.delivered.get(&number))
            .cloned()
            .or_else(|| self.facts.get(&number).map(|f| f.topic.clone()))
    }

    fn known_before(&self, shown: &[String], number: usize) -> Vec<String> {
        (1..number)
            .filter_map(|n| self.topic_of(shown, n))
            .collect()
    }

    fn served_facts(&self, shown: &[String]) -> usize {
        let delivered = self.delivered.keys().next_back().copied().unwrap_or(0);
        delivered.max(shown.len())
    }

    fn clear(&mut self) {
        self.facts.clear();
        self.quizzes.clear();
    }

    fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.quizzes.is_empty()
    }
}

/// Resets the "is preloading" flag however the preload ends.
struct PreloadingFlag<'a>(&'a AtomicBool);

impl Drop for PreloadingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Speculative content for one player's level.
pub struct Preloader {
    provider: Arc<dyn ContentProvider>,
    policy: PreloadPolicy,
    difficulty: Difficulty,
    level: LevelConfig,
    cache: Mutex<ContentCache>,
    preloading: AtomicBool,
    cancelled: AtomicBool,
    status: watch::Sender<PreloadStatus>,
    tasks: std::sync::Mutex<Vec<AbortHandle>>,
}

impl Preloader {
    pub fn new(
        provider: Arc<dyn ContentProvider>,
        policy: PreloadPolicy,
        difficulty: Difficulty,
        level: LevelConfig,
    ) -> Self {
        let (status, _) = watch::channel(PreloadStatus::Idle);
        Self {
            provider,
            policy,
            difficulty,
            level,
            cache: Mutex::new(ContentCache::default()),
            preloading: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            status,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> PreloadPolicy {
        self.policy
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn status(&self) -> PreloadStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PreloadStatus> {
        self.status.subscribe()
    }

    pub fn is_preloading(&self) -> bool {
        self.preloading.load(Ordering::SeqCst)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stops every background fetch. Anything still in flight is dropped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    fn track(&self, handle: &JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle.abort_handle());
    }

    fn publish(&self, status: PreloadStatus) {
        if !self.is_cancelled() {
            self.status.send_replace(status);
        }
    }

    pub async fn block(&self, slot: BlockSlot, shown: &[String]) -> Result<ContentBlock, ProviderError> {
        match slot {
            BlockSlot::Fact { number } => self.fact(number, shown).await.map(ContentBlock::Fact),
            BlockSlot::Quiz { round } => self.quiz(round, shown).await.map(ContentBlock::Quiz),
        }
    }

    /// Fact `number`, from the cache or fetched now.
    pub async fn fact(&self, number: usize, shown: &[String]) -> Result<Fact, ProviderError> {
        let mut cache = self.cache.lock().await;
        let fact = match cache.facts.remove(&number) {
            Some(fact) => {
                log::debug!("Fact #{} served from the preload cache", number);
                fact
            }
            None => {
                let known = cache.known_before(shown, number);
                fetch_fact(self.provider.as_ref(), number, &known, self.difficulty).await?
            }
        };
        cache.facts.retain(|n, _| *n > number);
        cache.delivered.insert(number, fact.topic.clone());
        Ok(fact)
    }

    /// Quiz for `round`, from the cache or generated now from the round's facts.
    pub async fn quiz(
        &self,
        round: usize,
        shown: &[String],
    ) -> Result<Vec<QuizQuestion>, ProviderError> {
        let mut cache = self.cache.lock().await;
        let quiz = match cache.quizzes.remove(&round) {
            Some(quiz) => {
                log::debug!("Quiz round {} served from the preload cache", round);
                quiz
            }
            None => self.generate_quiz(&cache, round, shown).await?,
        };
        cache.served_rounds = cache.served_rounds.max(round);
        Ok(quiz)
    }

    async fn generate_quiz(
        &self,
        cache: &ContentCache,
        round: usize,
        shown: &[String],
    ) -> Result<Vec<QuizQuestion>, ProviderError> {
        let expected = self.level.quiz_interval;
        let topics = round_facts(&self.level, round)
            .filter_map(|n| cache.topic_of(shown, n))
            .collect::<Vec<_>>();
        if topics.len() != expected {
            return Err(ProviderError::QuizSize {
                expected,
                got: topics.len(),
            });
        }
        let quiz = self.provider.generate_quiz(&topics, self.difficulty).await?;
        if quiz.len() != expected {
            return Err(ProviderError::QuizSize {
                expected,
                got: quiz.len(),
            });
        }
        Ok(quiz)
    }

    /// Starts fetching what follows `consumed`, as the policy asks.
    pub fn schedule(self: &Arc<Self>, consumed: BlockSlot, shown: Vec<String>) -> Option<JoinHandle<()>> {
        let ahead = match self.policy {
            PreloadPolicy::OnDemand | PreloadPolicy::WholeLevel => return None,
            PreloadPolicy::Lookahead => 1,
            PreloadPolicy::Batch(size) => size,
        };
        let plan = level_plan(&self.level);
        let next = plan.iter().position(|slot| *slot == consumed)? + 1;
        let targets = plan.into_iter().skip(next).take(ahead).collect::<Vec<_>>();
        if targets.is_empty() || self.is_cancelled() {
            return None;
        }
        if self.preloading.swap(true, Ordering::SeqCst) {
            log::debug!("Prefetch already running, not starting another");
            return None;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _flag = PreloadingFlag(&this.preloading);
            this.prefetch(targets, shown).await;
        });
        self.track(&handle);
        Some(handle)
    }

    async fn prefetch(&self, targets: Vec<BlockSlot>, shown: Vec<String>) {
        let mut cache = self.cache.lock().await;
        if matches!(self.policy, PreloadPolicy::Batch(_)) && !cache.is_empty() {
            return;
        }

        for slot in targets {
            if self.is_cancelled() {
                return;
            }
            let result = match slot {
                BlockSlot::Fact { number } => {
                    if number <= cache.served_facts(&shown) || cache.facts.contains_key(&number) {
                        continue;
                    }
                    let known = cache.known_before(&shown, number);
                    fetch_fact(self.provider.as_ref(), number, &known, self.difficulty)
                        .await
                        .map(|fact| {
                            cache.facts.insert(number, fact);
                        })
                }
                BlockSlot::Quiz { round } => {
                    if round <= cache.served_rounds || cache.quizzes.contains_key(&round) {
                        continue;
                    }
                    self.generate_quiz(&cache, round, &shown)
                        .await
                        .map(|quiz| {
                            cache.quizzes.insert(round, quiz);
                        })
                }
            };
            if let Err(err) = result {
                log::warn!("Prefetch of {:?} abandoned, clearing the cache: {}", slot, err);
                cache.clear();
                return;
            }
            log::debug!("Prefetched {:?}", slot);
        }
    }

    /// Runs [`Preloader::preload_level`] in the background.
    pub fn start_level_preload(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.policy != PreloadPolicy::WholeLevel
            || self.is_preloading()
            || self.is_cancelled()
            || self.status() != PreloadStatus::Idle
        {
            return None;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(err) = this.preload_level().await {
                log::error!("Level preload for {} failed: {}", this.difficulty.label(), err);
            }
        });
        self.track(&handle);
        Some(handle)
    }

    /// Fetches every fact, then every picture in parallel, then every quiz.
    pub async fn preload_level(&self) -> Result<(), ProviderError> {
        if self.preloading.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _flag = PreloadingFlag(&self.preloading);

        let mut cache = self.cache.lock().await;
        match self.fill_level(&mut cache).await {
            Ok(()) => {
                if !self.is_cancelled() {
                    self.publish(PreloadStatus::Ready);
                }
                Ok(())
            }
            Err(err) => {
                cache.clear();
                self.publish(PreloadStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn fill_level(&self, cache: &mut ContentCache) -> Result<(), ProviderError> {
        let facts = self.level.facts_per_level;
        let rounds = self.level.rounds();
        let total = facts * 2 + rounds;
        let mut completed = 0;
        let report = |stage: Stage, completed: usize| {
            self.publish(PreloadStatus::Loading(Progress {
                completed,
                total,
                stage,
            }));
        };
        report(Stage::Facts, completed);

        let mut drafts: Vec<FactDraft> = Vec::with_capacity(facts);
        for number in 1..=facts {
            let known = drafts.iter().map(|d| d.fact.clone()).collect::<Vec<_>>();
            let draft = self
                .provider
                .generate_fact(number, &known, self.difficulty)
                .await?;
            if self.is_cancelled() {
                return Ok(());
            }
            drafts.push(draft);
            completed += 1;
            report(Stage::Facts, completed);
        }

        report(Stage::Illustrations, completed);
        let mut images: Vec<Option<Vec<u8>>> = vec![None; facts];
        let mut pending = drafts
            .iter()
            .enumerate()
            .map(|(index, draft)| async move {
                (index, self.provider.generate_image(&draft.image_prompt).await)
            })
            .collect::<FuturesUnordered<_>>();
        while let Some((index, image)) = pending.next().await {
            match image {
                Ok(bytes) => images[index] = Some(bytes),
                Err(ProviderError::ImagesDisabled) => {}
                Err(err) => log::warn!("No illustration for fact #{}: {}", index + 1, err),
            }
            completed += 1;
            report(Stage::Illustrations, completed);
        }
        drop(pending);
        if self.is_cancelled() {
            return Ok(());
        }

        let topics = drafts.iter().map(|d| d.fact.clone()).collect::<Vec<_>>();
        report(Stage::Quizzes, completed);
        let mut quizzes = BTreeMap::new();
        for round in 1..=rounds {
            let quiz = self.generate_quiz(cache, round, &topics).await?;
            if self.is_cancelled() {
                return Ok(());
            }
            quizzes.insert(round, quiz);
            completed += 1;
            report(Stage::Quizzes, completed);
        }

        cache.facts = drafts
            .into_iter()
            .zip(images)
            .enumerate()
            .map(|(index, (draft, image))| (index + 1, draft.into_fact(image)))
            .collect();
        cache.quizzes = quizzes;
        Ok(())
    }
}

/// One preloader per chat. Installing a new one cancels the old one, so a
/// level prepared for an abandoned difficulty never leaks into the new one.
#[derive(Clone, Default)]
pub struct PreloadRegistry {
    preloaders: Arc<std::sync::Mutex<HashMap<i64, Arc<Preloader>>>>,
}

impl PreloadRegistry {
    pub fn install(&self, chat: i64, preloader: Preloader) -> Arc<Preloader> {
        let preloader = Arc::new(preloader);
        let previous = self
            .preloaders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chat, Arc::clone(&preloader));
        if let Some(previous) = previous {
            log::debug!(
                "Cancelling the {} preloader of chat {}",
                previous.difficulty().label(),
                chat
            );
            previous.cancel();
        }
        preloader
    }

    pub fn get(&self, chat: i64) -> Option<Arc<Preloader>> {
        self.preloaders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat)
            .cloned()
    }

    /// The chat's preloader, or a fresh one when the bot restarted mid-session.
    pub fn get_or_install(&self, chat: i64, make: impl FnOnce() -> Preloader) -> Arc<Preloader> {
        match self.get(chat) {
            Some(preloader) => preloader,
            None => self.install(chat, make()),
        }
    }

    /// Drops the chat's preloader once its session has nothing left to fetch.
    pub fn retire(&self, chat: i64, session: &Session) -> bool {
        if !session.phase().is_terminal() {
            return false;
        }
        log::debug!("Retiring the preloader of chat {}", chat);
        self.remove(chat);
        true
    }

    pub fn remove(&self, chat: i64) {
        let removed = self
            .preloaders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&chat);
        if let Some(preloader) = removed {
            preloader.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cosmos::provider::scripted::{topic, ScriptedProvider};

    fn preloader(provider: &Arc<ScriptedProvider>, policy: PreloadPolicy) -> Arc<Preloader> {
        Arc::new(Preloader::new(
            provider.clone(),
            policy,
            Difficulty::Foundations,
            LevelConfig::default(),
        ))
    }

    fn topics(upto: usize) -> Vec<String> {
        (1..=upto).map(topic).collect()
    }

    #[test]
    fn policies_parse() {
        assert_eq!("on-demand".parse(), Ok(PreloadPolicy::OnDemand));
        assert_eq!("Lookahead".parse(), Ok(PreloadPolicy::Lookahead));
        assert_eq!("batch".parse(), Ok(PreloadPolicy::Batch(5)));
        assert_eq!("batch:3".parse(), Ok(PreloadPolicy::Batch(3)));
        assert_eq!("level".parse(), Ok(PreloadPolicy::WholeLevel));
        assert!("batch:0".parse::<PreloadPolicy>().is_err());
        assert!("warp".parse::<PreloadPolicy>().is_err());
    }

    #[tokio::test]
    async fn on_demand_sends_known_facts() {
        let provider = Arc::new(ScriptedProvider::default());
        let preloader = preloader(&provider, PreloadPolicy::OnDemand);

        let fact = preloader.fact(3, &topics(2)).await.unwrap();
        assert_eq!(fact.topic, topic(3));
        assert_eq!(fact.image, Some(b"Picture 3".to_vec()));
        assert_eq!(provider.seen_known.lock().unwrap()[0], topics(2));
        assert!(preloader.schedule(BlockSlot::Fact { number: 3 }, topics(3)).is_none());
    }

    #[tokio::test]
    async fn image_failure_keeps_the_fact() {
        let provider = Arc::new(ScriptedProvider {
            failing_images: true,
            ..Default::default()
        });
        let preloader = preloader(&provider, PreloadPolicy::OnDemand);
        let fact = preloader.fact(1, &[]).await.unwrap();
        assert_eq!(fact.topic, topic(1));
        assert_eq!(fact.image, None);
    }

    #[tokio::test]
    async fn lookahead_prefetches_the_next_fact() {
        let provider = Arc::new(ScriptedProvider::default());
        let preloader = preloader(&provider, PreloadPolicy::Lookahead);

        preloader.fact(1, &[]).await.unwrap();
        let handle = preloader
            .schedule(BlockSlot::Fact { number: 1 }, topics(1))
            .unwrap();
        handle.await.unwrap();
        assert_eq!(provider.facts_requested(), 2);
        assert_eq!(provider.seen_known.lock().unwrap()[1], topics(1));

        let fact = preloader.fact(2, &topics(1)).await.unwrap();
        assert_eq!(fact.topic, topic(2));
        assert_eq!(provider.facts_requested(), 2);
    }

    #[tokio::test]
    async fn lookahead_prefetches_the_quiz_after_the_fifth_fact() {
        let provider = Arc::new(ScriptedProvider::default());
        let preloader = preloader(&provider, PreloadPolicy::Lookahead);

        preloader
            .schedule(BlockSlot::Fact { number: 5 }, topics(5))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(provider.quizzes_requested(), 1);
        let quiz = preloader.quiz(1, &topics(5)).await.unwrap();
        assert_eq!(quiz.len(), 5);
        assert_eq!(quiz[0].prompt, format!("What is true of {}?", topic(1)));
        assert_eq!(provider.quizzes_requested(), 1);
    }

    #[tokio::test]
    async fn failed_prefetch_falls_back_to_on_demand() {
        let provider = Arc::new(ScriptedProvider::failing_fact(2));
        let preloader = preloader(&provider, PreloadPolicy::Lookahead);

        preloader
            .schedule(BlockSlot::Fact { number: 1 }, topics(1))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(provider.facts_requested(), 1);
        assert!(!preloader.is_preloading());

        provider.heal();
        let fact = preloader.fact(2, &topics(1)).await.unwrap();
        assert_eq!(fact.topic, topic(2));
        assert_eq!(provider.facts_requested(), 2);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped_whole() {
        let provider = Arc::new(ScriptedProvider::failing_fact(3));
        let preloader = preloader(&provider, PreloadPolicy::Batch(3));

        preloader.fact(1, &[]).await.unwrap();
        preloader
            .schedule(BlockSlot::Fact { number: 1 }, topics(1))
            .unwrap()
            .await
            .unwrap();
        // Fact 2 arrived before fact 3 failed, and went with the rest.
        assert_eq!(provider.facts_requested(), 3);
        assert!(!preloader.is_preloading());

        provider.heal();
        let fact = preloader.fact(2, &topics(1)).await.unwrap();
        assert_eq!(fact.topic, topic(2));
        assert_eq!(provider.facts_requested(), 4);
    }

    #[tokio::test]
    async fn failed_quiz_prefetch_falls_back_to_on_demand() {
        let provider = Arc::new(ScriptedProvider::failing_quizzes());
        let preloader = preloader(&provider, PreloadPolicy::Lookahead);

        preloader
            .schedule(BlockSlot::Fact { number: 5 }, topics(5))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(provider.quizzes_requested(), 1);

        provider.heal();
        let quiz = preloader.quiz(1, &topics(5)).await.unwrap();
        assert_eq!(quiz.len(), 5);
        assert_eq!(provider.quizzes_requested(), 2);
    }

    #[tokio::test]
    async fn batch_fills_up_only_when_exhausted() {
        let provider = Arc::new(ScriptedProvider::default());
        let preloader = preloader(&provider, PreloadPolicy::Batch(3));

        preloader.fact(1, &[]).await.unwrap();
        preloader
            .schedule(BlockSlot::Fact { number: 1 }, topics(1))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(provider.facts_requested(), 4);

        preloader.fact(2, &topics(1)).await.unwrap();
        preloader
            .schedule(BlockSlot::Fact { number: 2 }, topics(2))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(provider.facts_requested(), 4);

        preloader.fact(3, &topics(2)).await.unwrap();
        preloader.fact(4, &topics(3)).await.unwrap();
        assert_eq!(provider.facts_requested(), 4);

        // Facts 5 and 6 with the round-one quiz between them.
        preloader
            .schedule(BlockSlot::Fact { number: 4 }, topics(4))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(provider.facts_requested(), 6);
        assert_eq!(provider.quizzes_requested(), 1);
        assert_eq!(provider.seen_known.lock().unwrap()[5], topics(5));
    }

    #[tokio::test]
    async fn one_prefetch_at_a_time() {
        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let preloader = preloader(&provider, PreloadPolicy::Lookahead);

        let first = preloader
            .schedule(BlockSlot::Fact { number: 1 }, topics(1))
            .unwrap();
        assert!(preloader.is_preloading());
        assert!(preloader
            .schedule(BlockSlot::Fact { number: 1 }, topics(1))
            .is_none());
        first.await.unwrap();
        assert!(!preloader.is_preloading());
    }

    #[tokio::test]
    async fn demand_waits_for_the_prefetch_in_flight() {
        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        let preloader = preloader(&provider, PreloadPolicy::Lookahead);

        let prefetch = preloader
            .schedule(BlockSlot::Fact { number: 1 }, topics(1))
            .unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fact = preloader.fact(2, &topics(1)).await.unwrap();
        prefetch.await.unwrap();

        assert_eq!(fact.topic, topic(2));
        assert_eq!(provider.facts_requested(), 1);
    }

    #[tokio::test]
    async fn whole_level_reports_every_stage() {
        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_millis(1)),
            ..Default::default()
        });
        let preloader = preloader(&provider, PreloadPolicy::WholeLevel);
        let mut status = preloader.subscribe();

        let handle = preloader.start_level_preload().unwrap();
        let mut stages = Vec::new();
        while status.changed().await.is_ok() {
            let current = status.borrow().clone();
            match current {
                PreloadStatus::Loading(progress) => {
                    assert_eq!(progress.total, 33);
                    if stages.last() != Some(&progress.stage) {
                        stages.push(progress.stage);
                    }
                }
                PreloadStatus::Ready => break,
                other => panic!("unexpected status {other:?}"),
            }
        }
        handle.await.unwrap();

        assert_eq!(stages, vec![Stage::Facts, Stage::Illustrations, Stage::Quizzes]);
        assert_eq!(preloader.status(), PreloadStatus::Ready);
        assert_eq!(provider.facts_requested(), 15);
        assert_eq!(provider.quizzes_requested(), 3);
        assert_eq!(provider.seen_known.lock().unwrap()[14], topics(14));

        for number in 1..=15 {
            let shown = topics(number - 1);
            assert_eq!(preloader.fact(number, &shown).await.unwrap().topic, topic(number));
        }
        assert_eq!(preloader.quiz(2, &topics(10)).await.unwrap().len(), 5);
        assert_eq!(provider.facts_requested(), 15);
        assert_eq!(provider.quizzes_requested(), 3);
        assert!(preloader.start_level_preload().is_none());
    }

    #[tokio::test]
    async fn whole_level_failure_is_terminal() {
        let provider = Arc::new(ScriptedProvider::failing_fact(7));
        let preloader = preloader(&provider, PreloadPolicy::WholeLevel);

        assert!(preloader.preload_level().await.is_err());
        assert!(matches!(preloader.status(), PreloadStatus::Failed(_)));
        assert_eq!(provider.image_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn replaced_preloader_drops_its_results() {
        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let registry = PreloadRegistry::default();
        let first = registry.install(
            42,
            Preloader::new(
                provider.clone(),
                PreloadPolicy::WholeLevel,
                Difficulty::Foundations,
                LevelConfig::default(),
            ),
        );
        first.start_level_preload().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = registry.install(
            42,
            Preloader::new(
                provider.clone(),
                PreloadPolicy::OnDemand,
                Difficulty::CosmicFrontiers,
                LevelConfig::default(),
            ),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(first.status(), PreloadStatus::Loading(_)));
        let current = registry.get(42).unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert_eq!(current.difficulty(), Difficulty::CosmicFrontiers);

        registry.remove(42);
        assert!(registry.get(42).is_none());
    }

    #[test]
    fn finished_sessions_release_their_preloader() {
        let provider = Arc::new(ScriptedProvider::default());
        let registry = PreloadRegistry::default();
        let install = |chat| {
            registry.install(
                chat,
                Preloader::new(
                    provider.clone(),
                    PreloadPolicy::WholeLevel,
                    Difficulty::Foundations,
                    LevelConfig::default(),
                ),
            )
        };

        let playing = Session::new(Difficulty::Foundations, LevelConfig::default());
        install(1);
        assert!(!registry.retire(1, &playing));
        assert!(registry.get(1).is_some());

        let mut stranded = playing.clone();
        stranded.strand().unwrap();
        let preloader = install(2);
        assert!(registry.retire(2, &stranded));
        assert!(registry.get(2).is_none());
        assert!(preloader.start_level_preload().is_none());
    }
}

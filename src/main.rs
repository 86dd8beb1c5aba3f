mod config;
mod cosmos;
mod telegram;

use std::sync::Arc;

use chatgpt::{client::ChatGPT, config::ChatGPTEngine};
use config::Config;
use cosmos::{
    host::CosmicHost,
    images::ImageStudio,
    preloader::{PreloadPolicy, PreloadRegistry, PreloadStatus, Preloader},
    provider::ContentProvider,
    session::{GamePhase, Session},
    voyage::{Action, Outcome, Voyage},
    Difficulty,
};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, InMemStorage, SqliteStorage, Storage},
    prelude::*,
};
use telegram::{difficulty_menu, TelegramSurface};
use tokio::sync::watch;

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type DialogueStorage = std::sync::Arc<ErasedStorage<State>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveDifficulty,
    Voyage {
        session: Session,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let config = Arc::new(Config::from_env()?);
    log::info!("Starting CosmoQuest with {:?} preloading...", config.preload);

    let bot = Bot::from_env();

    let storage: DialogueStorage = match &config.storage {
        Some(path) => {
            log::info!("Opening dialogue storage at {}", path.display());
            SqliteStorage::open(&path.to_string_lossy(), Json)
                .await?
                .erase()
        }
        None => InMemStorage::new().erase(),
    };

    let gpt = {
        let mut gpt = ChatGPT::new(config.api_key.clone())?;

        gpt.config.engine = ChatGPTEngine::Gpt35Turbo;
        gpt.config.timeout = config.timeout;

        gpt
    };

    let studio = if config.images {
        ImageStudio::new(
            config.api_key.clone(),
            config.image_model.clone(),
            config.base_url.clone(),
            config.timeout,
        )?
    } else {
        log::info!("Illustrations are turned off");
        ImageStudio::disabled()
    };

    let provider: Arc<dyn ContentProvider> = Arc::new(CosmicHost::new(gpt, config.host, studio));
    let registry = PreloadRegistry::default();

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveDifficulty].endpoint(receive_difficulty))
            .branch(dptree::case![State::Voyage { session }].endpoint(voyage)),
    )
    .dependencies(dptree::deps![storage, provider, config, registry])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

    Ok(())
}

const GREETING_TEXT: &str = "Welcome to CosmoQuest! 🚀 I'm your guide to the wonders of the universe. Every mission brings a series of astronomy facts with a quiz after each few of them.";
const MENU_TEXT: &str = "Choose your mission difficulty:";

async fn show_menu(bot: &Bot, chat_id: ChatId) -> HandlerResult {
    let mut text = String::from(MENU_TEXT);
    for difficulty in Difficulty::ALL {
        text.push_str(&format!(
            "\n{} ({})",
            difficulty.menu_label(),
            difficulty.description()
        ));
    }
    bot.send_message(chat_id, text)
        .reply_markup(difficulty_menu())
        .await?;
    Ok(())
}

async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT).await?;
    show_menu(&bot, msg.chat.id).await?;

    dialogue.update(State::ReceiveDifficulty).await?;
    Ok(())
}

async fn receive_difficulty(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    provider: Arc<dyn ContentProvider>,
    config: Arc<Config>,
    registry: PreloadRegistry,
) -> HandlerResult {
    let Some(difficulty) = msg.text().and_then(Difficulty::from_choice) else {
        bot.send_message(msg.chat.id, "Please pick one of the missions below.")
            .reply_markup(difficulty_menu())
            .await?;
        return Ok(());
    };
    log::info!("Chat {} chose {}", msg.chat.id, difficulty.label());

    let preloader = registry.install(
        msg.chat.id.0,
        Preloader::new(provider, config.preload, difficulty, config.level),
    );
    let session = Session::new(difficulty, config.level);

    let surface = TelegramSurface::new(bot.clone(), msg.chat.id);
    Voyage::new(&surface, &preloader, config.host)
        .welcome(&session)
        .await?;

    if preloader.policy() == PreloadPolicy::WholeLevel {
        preloader.start_level_preload();
        report_progress(bot, msg.chat.id, preloader.subscribe());
    }

    dialogue.update(State::Voyage { session }).await?;
    Ok(())
}

/// Keeps one chat message in sync with the whole-level preload.
fn report_progress(bot: Bot, chat_id: ChatId, mut status: watch::Receiver<PreloadStatus>) {
    tokio::spawn(async move {
        let posted = match bot
            .send_message(chat_id, "Preparing the mission materials...")
            .await
        {
            Ok(message) => message.id,
            Err(err) => {
                log::warn!("Could not post preload progress: {}", err);
                return;
            }
        };

        loop {
            let current = status.borrow_and_update().clone();
            let (text, finished) = match current {
                PreloadStatus::Idle => (None, false),
                PreloadStatus::Loading(progress) => {
                    (Some(format!("Preparing the mission materials: {progress}")), false)
                }
                PreloadStatus::Ready => (
                    Some("Mission materials ready. Press \"Start Lesson\" to begin.".to_string()),
                    true,
                ),
                PreloadStatus::Failed(_) => (
                    Some("The mission materials could not be prepared.".to_string()),
                    true,
                ),
            };
            if let Some(text) = text {
                if let Err(err) = bot.edit_message_text(chat_id, posted, text).await {
                    log::debug!("Progress edit skipped: {}", err);
                }
            }
            if finished || status.changed().await.is_err() {
                break;
            }
        }
    });
}

/// Sends an ended voyage back to the difficulty menu. Does nothing when the
/// chat has already left that voyage; returns whether the reset happened.
async fn expire_session(
    storage: DialogueStorage,
    chat_id: ChatId,
    voyage: u64,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    match storage.clone().get_dialogue(chat_id).await? {
        Some(State::Voyage { session })
            if session.id() == voyage && session.phase() == &GamePhase::SessionOver =>
        {
            storage
                .update_dialogue(chat_id, State::ReceiveDifficulty)
                .await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[allow(clippy::too_many_arguments)]
async fn voyage(
    bot: Bot,
    dialogue: QuizDialogue,
    session: Session,
    msg: Message,
    provider: Arc<dyn ContentProvider>,
    config: Arc<Config>,
    registry: PreloadRegistry,
    storage: DialogueStorage,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text() else {
        bot.send_message(chat_id, "Use the buttons below to steer our voyage.")
            .await?;
        return Ok(());
    };

    let preloader = registry.get_or_install(chat_id.0, || {
        Preloader::new(provider, config.preload, session.difficulty, *session.level())
    });
    let surface = TelegramSurface::new(bot.clone(), chat_id);
    let action = Action::parse(text, &session);

    match Voyage::new(&surface, &preloader, config.host)
        .handle(session, action)
        .await?
    {
        Outcome::Continue(session) => {
            registry.retire(chat_id.0, &session);
            dialogue.update(State::Voyage { session }).await?
        }
        Outcome::SessionEnded(session) => {
            registry.remove(chat_id.0);
            let voyage = session.id();
            dialogue.update(State::Voyage { session }).await?;

            let delay = config.reset_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match expire_session(storage, chat_id, voyage).await {
                    Ok(true) => {
                        if let Err(err) = show_menu(&bot, chat_id).await {
                            log::warn!("Could not show the menu again: {}", err);
                        }
                    }
                    Ok(false) => log::debug!("Chat {} already left its ended voyage", chat_id),
                    Err(err) => log::warn!("Could not reset chat {}: {}", chat_id, err),
                }
            });
        }
        Outcome::BackToMenu => {
            registry.remove(chat_id.0);
            show_menu(&bot, chat_id).await?;
            dialogue.update(State::ReceiveDifficulty).await?;
        }
    }
    Ok(())
}

use teloxide::{
    prelude::*,
    types::{
        ChatAction, InputFile, KeyboardButton, KeyboardMarkup, KeyboardRemove, MessageId,
        ParseMode, ReplyMarkup,
    },
    utils::html,
};

use crate::cosmos::chat::{ChatSurface, Outgoing, Posted, SurfaceError};
use crate::cosmos::Difficulty;

/// Reply keyboard with one button per row.
pub fn keyboard(buttons: &[String]) -> ReplyMarkup {
    if buttons.is_empty() {
        return KeyboardRemove::new().into();
    }
    KeyboardMarkup::new(
        buttons
            .iter()
            .map(|b| vec![KeyboardButton::new(b.clone())])
            .collect::<Vec<_>>(),
    )
    .resize_keyboard(true)
    .into()
}

pub fn difficulty_menu() -> ReplyMarkup {
    let labels: Vec<String> = Difficulty::ALL.iter().map(|d| d.menu_label()).collect();
    keyboard(&labels)
}

/// A Telegram chat rendered through the bot.
pub struct TelegramSurface {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramSurface {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait::async_trait]
impl ChatSurface for TelegramSurface {
    async fn post(&self, message: Outgoing) -> Result<Posted, SurfaceError> {
        let sent = match message {
            Outgoing::Say { text, buttons } => {
                self.bot
                    .send_message(self.chat_id, text)
                    .reply_markup(keyboard(&buttons))
                    .await?
            }
            Outgoing::Fact {
                number,
                total,
                fact,
                buttons,
            } => {
                if let Some(image) = fact.image {
                    self.bot
                        .send_photo(self.chat_id, InputFile::memory(image).file_name("cosmos.png"))
                        .await?;
                }
                let text = format!(
                    "<b>Fact #{}: {}</b>\n\n{}\n\n<i>Topic {} / {}</i>",
                    number,
                    html::escape(&fact.topic),
                    html::escape(&fact.explanation),
                    number,
                    total
                );
                self.bot
                    .send_message(self.chat_id, text)
                    .parse_mode(ParseMode::Html)
                    .reply_markup(keyboard(&buttons))
                    .await?
            }
            Outgoing::Question {
                number,
                total,
                question,
                buttons,
            } => {
                let text = format!(
                    "<b>Question {} of {}</b>\n{}",
                    number,
                    total,
                    html::escape(&question.prompt)
                );
                self.bot
                    .send_message(self.chat_id, text)
                    .parse_mode(ParseMode::Html)
                    .reply_markup(keyboard(&buttons))
                    .await?
            }
            Outgoing::Loading { text } => {
                // The typing indicator is a nicety; the placeholder is what matters.
                let _ = self
                    .bot
                    .send_chat_action(self.chat_id, ChatAction::Typing)
                    .await;
                self.bot.send_message(self.chat_id, text).await?
            }
        };
        Ok(Posted(sent.id.0))
    }

    async fn replace(&self, posted: Posted, text: String) -> Result<(), SurfaceError> {
        self.bot
            .edit_message_text(self.chat_id, MessageId(posted.0), text)
            .await?;
        Ok(())
    }

    async fn remove(&self, posted: Posted) -> Result<(), SurfaceError> {
        self.bot
            .delete_message(self.chat_id, MessageId(posted.0))
            .await?;
        Ok(())
    }
}

use std::sync::Arc;

use base64::prelude::{Engine, BASE64_URL_SAFE_NO_PAD};
use log::warn;
use sha2::{Digest, Sha256};
use teloxide::adaptors::{throttle::Throttle, CacheMe};
use teloxide::payloads::{
    EditMessageTextSetters, PinChatMessageSetters, SendDocumentSetters, SendMessageSetters,
    UnpinChatMessageSetters,
};
use teloxide::prelude::{
    dptree, CallbackQuery, ChatId, Dispatcher, Message, Requester, Update, UserId,
};
use teloxide::types::{InputFile, LinkPreviewOptions, MessageId, ParseMode, ReplyMarkup};
use teloxide::{dispatching::UpdateFilterExt, ApiError, Bot, RequestError};

use crate::bot_commands::{MessageCommand, TgCommand};
use crate::state::ScoutState;
use crate::utils::store::PersistentCachedStore;

pub type TgBot = CacheMe<Throttle<Bot>>;

/// Use this as callback data if you're 100% sure that the callback data will never be used
pub const DONT_CARE: &str = "dontcare";

const MAX_MESSAGE_LENGTH: usize = 4096;

pub struct BotData {
    bot: TgBot,
    bot_id: UserId,
    username: String,
    state: Arc<ScoutState>,
    callback_data_cache: PersistentCachedStore<String, String>,
    dm_message_commands: PersistentCachedStore<UserId, MessageCommand>,
}

fn link_preview_disabled() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Splits `/cmd@bot_name args` into `("cmd", "args")`. Commands addressed to another
/// bot are ignored.
pub fn split_command<'a>(text: &'a str, bot_username: &str) -> Option<(&'a str, &'a str)> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, args) = rest
        .split_once(char::is_whitespace)
        .map(|(head, args)| (head, args.trim()))
        .unwrap_or((rest, ""));
    let command = match head.split_once('@') {
        Some((command, mention)) => {
            if !mention.eq_ignore_ascii_case(bot_username) {
                return None;
            }
            command
        }
        None => head,
    };
    if command.is_empty() {
        return None;
    }
    Some((command, args))
}

/// Payload of a `/start` addressed to this bot, empty when there is none.
pub fn start_payload<'a>(text: &'a str, bot_username: &str) -> Option<&'a str> {
    match split_command(text, bot_username)? {
        ("start", payload) => Some(payload),
        _ => None,
    }
}

impl BotData {
    pub async fn new(bot: TgBot, state: Arc<ScoutState>) -> Result<Self, anyhow::Error> {
        let me = bot.get_me().await?;
        let bot_id = me.id;
        let username = me.username.clone().unwrap_or_default();
        let data_dir = state.data_dir().to_path_buf();

        Ok(Self {
            bot,
            bot_id,
            username,
            state,
            callback_data_cache: PersistentCachedStore::new(
                &data_dir,
                &format!("bot{bot_id}_callback_data_cache"),
            )
            .await?,
            dm_message_commands: PersistentCachedStore::new(
                &data_dir,
                &format!("bot{bot_id}_message_commands_dm"),
            )
            .await?,
        })
    }

    pub async fn start_polling(&self) -> Result<(), anyhow::Error> {
        let bot = self.bot.clone();
        let (msg_sender, mut msg_receiver) = tokio::sync::mpsc::channel(1000);
        let (callback_query_sender, mut callback_query_receiver) = tokio::sync::mpsc::channel(1000);

        tokio::spawn(async move {
            let handler = dptree::entry()
                .branch(Update::filter_message().endpoint(move |msg: Message| {
                    let msg_sender = msg_sender.clone();
                    async move {
                        if let Err(err) = msg_sender.send(msg).await {
                            warn!("Message receiver is gone: {err:?}");
                        }
                        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                    }
                }))
                .branch(Update::filter_callback_query().endpoint(
                    move |callback_query: CallbackQuery| {
                        let callback_query_sender = callback_query_sender.clone();
                        async move {
                            if let Err(err) = callback_query_sender.send(callback_query).await {
                                warn!("Callback query receiver is gone: {err:?}");
                            }
                            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                        }
                    },
                ));
            Dispatcher::builder(bot, handler).build().dispatch().await;
        });

        let me = self.id();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(msg) = msg_receiver.recv().await {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let text = msg.text().or(msg.caption()).unwrap_or_default();
                    let from_id = msg.from.as_ref().map(|u| u.id);
                    for module in state.bot_modules().await.iter() {
                        let Some(bot) = state.bot(&me) else {
                            return;
                        };
                        let command = if let Some(data) = start_payload(text, bot.username()) {
                            let data = data.to_string();
                            log::debug!("Start command: {data}");
                            MessageCommand::Start(data)
                        } else if let Some(from_id) = from_id.filter(|_| msg.chat.id.is_user()) {
                            bot.get_dm_message_command(&from_id)
                                .await
                                .unwrap_or(MessageCommand::None)
                        } else {
                            MessageCommand::None
                        };
                        log::debug!(
                            "chat={:?} (command {command:?}): {text}, module: {}",
                            msg.chat.id,
                            module.name()
                        );
                        if let Err(err) = module
                            .handle_message(&bot, from_id, msg.chat.id, command, text, &msg)
                            .await
                        {
                            warn!(
                                "Error handling message {} in module {}: {:?}",
                                text,
                                module.name(),
                                err
                            );
                        }
                    }
                });
            }
        });
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(callback_query) = callback_query_receiver.recv().await {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let (Some(data), Some(message)) =
                        (callback_query.data, callback_query.message)
                    {
                        for module in state.bot_modules().await.iter() {
                            let Some(bot) = state.bot(&me) else {
                                return;
                            };
                            let context = TgCallbackContext::new(
                                bot.value(),
                                callback_query.from.id,
                                message.chat().id,
                                Some(message.id()),
                                &data,
                            );
                            log::debug!("Callback data: {data}, module: {}", module.name());
                            let mut query = Some(MustAnswerCallbackQuery {
                                bot_id: me,
                                callback_query: callback_query.id.clone(),
                                callback_query_answered: false,
                            });
                            if let Err(err) = module.handle_callback(context, &mut query).await {
                                warn!(
                                    "Error handling callback data {} in module {}: {:?}",
                                    data,
                                    module.name(),
                                    err
                                );
                            }
                            if let Some(query) = query {
                                query.answer_callback_query(&state).await;
                            }
                        }
                    }
                });
            }
        });
        Ok(())
    }

    pub fn bot(&self) -> &TgBot {
        &self.bot
    }

    pub fn id(&self) -> UserId {
        self.bot_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> &Arc<ScoutState> {
        &self.state
    }

    pub async fn send_text_message(
        &self,
        chat_id: ChatId,
        message: String,
        reply_markup: impl Into<ReplyMarkup>,
    ) -> Result<Message, anyhow::Error> {
        self.send(chat_id, message, reply_markup).await
    }

    pub async fn send_text_message_without_reply_markup(
        &self,
        chat_id: ChatId,
        message: String,
    ) -> Result<(), anyhow::Error> {
        self.bot
            .send_message(chat_id, &message)
            .parse_mode(ParseMode::MarkdownV2)
            .link_preview_options(link_preview_disabled())
            .await
            .inspect_err(log_parse_error(message))?;
        Ok(())
    }

    /// Sends MarkdownV2 text, falling back to a .txt document when it's too long.
    pub async fn send(
        &self,
        chat_id: ChatId,
        text: impl Into<String>,
        reply_markup: impl Into<ReplyMarkup>,
    ) -> Result<Message, anyhow::Error> {
        let text = text.into();
        if text.len() < MAX_MESSAGE_LENGTH {
            return Ok(self
                .bot
                .send_message(chat_id, text.clone())
                .parse_mode(ParseMode::MarkdownV2)
                .reply_markup(reply_markup)
                .link_preview_options(link_preview_disabled())
                .await
                .inspect_err(log_parse_error(text))?);
        }
        Ok(self
            .bot
            .send_document(
                chat_id,
                InputFile::memory(unescape_markdown(&text)).file_name("message.txt"),
            )
            .caption("The response was too long, so it was sent as a file\\.")
            .parse_mode(ParseMode::MarkdownV2)
            .reply_markup(reply_markup)
            .await?)
    }

    /// Edits a text message. "Message is not modified" is not an error.
    pub async fn edit_text_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
        reply_markup: teloxide::types::InlineKeyboardMarkup,
    ) -> Result<(), anyhow::Error> {
        let edit_result = self
            .bot
            .edit_message_text(chat_id, message_id, text.clone())
            .parse_mode(ParseMode::MarkdownV2)
            .link_preview_options(link_preview_disabled())
            .reply_markup(reply_markup)
            .await;
        match edit_result {
            Ok(_) => Ok(()),
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(err) => {
                log_parse_error(text)(&err);
                Err(anyhow::anyhow!("Error editing message: {:?}", err))
            }
        }
    }

    pub async fn pin_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), anyhow::Error> {
        self.bot
            .pin_chat_message(chat_id, message_id)
            .disable_notification(true)
            .await?;
        Ok(())
    }

    pub async fn unpin_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), anyhow::Error> {
        self.bot
            .unpin_chat_message(chat_id)
            .message_id(message_id)
            .await?;
        Ok(())
    }

    pub async fn create_hash_reference(&self, data: String) -> Result<String, anyhow::Error> {
        let digest = Sha256::digest(data.as_bytes());
        // 24 bytes -> 32 characters, well under the 64 byte callback data limit
        let reference = BASE64_URL_SAFE_NO_PAD.encode(&digest[..24]);
        self.callback_data_cache
            .insert_if_not_exists(reference.clone(), data)
            .await?;
        Ok(reference)
    }

    pub async fn to_callback_data(&self, data: &TgCommand) -> Result<String, anyhow::Error> {
        let data = serde_json::to_string(data)?;
        self.create_hash_reference(data).await
    }

    pub async fn get_hash_reference(&self, reference: &str) -> Option<String> {
        self.callback_data_cache.get(&reference.to_string()).await
    }

    pub async fn parse_callback_data(&self, reference: &str) -> Result<TgCommand, anyhow::Error> {
        let data = self
            .get_hash_reference(reference)
            .await
            .ok_or_else(|| anyhow::anyhow!("Callback data cannot be restored"))?;
        Ok(serde_json::from_str(&data)?)
    }

    pub async fn get_dm_message_command(&self, user_id: &UserId) -> Option<MessageCommand> {
        self.dm_message_commands.get(user_id).await
    }

    pub async fn set_dm_message_command(
        &self,
        user_id: UserId,
        command: MessageCommand,
    ) -> Result<(), anyhow::Error> {
        self.dm_message_commands
            .insert_or_update(user_id, command)
            .await?;
        Ok(())
    }

    pub async fn remove_dm_message_command(&self, user_id: &UserId) -> Result<(), anyhow::Error> {
        self.dm_message_commands.remove(user_id).await?;
        Ok(())
    }
}

fn unescape_markdown(text: &str) -> String {
    const CHARS: [char; 19] = [
        '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.',
        '!',
    ];

    let mut text = text.to_string();
    for c in CHARS {
        text = text.replace(&format!("\\{c}"), &c.to_string());
    }
    text
}

pub struct TgCallbackContext<'a> {
    bot: &'a BotData,
    user_id: UserId,
    chat_id: ChatId,
    last_message: Option<MessageId>,
    data: &'a str,
}

impl<'a> TgCallbackContext<'a> {
    pub fn new(
        bot: &'a BotData,
        user_id: UserId,
        chat_id: ChatId,
        last_message: Option<MessageId>,
        data: &'a str,
    ) -> Self {
        Self {
            bot,
            user_id,
            chat_id,
            last_message,
            data,
        }
    }

    pub fn bot(&self) -> &BotData {
        self.bot
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.last_message
    }

    pub async fn parse_command(&self) -> Result<TgCommand, anyhow::Error> {
        if self.data == DONT_CARE {
            return Err(anyhow::anyhow!("Tried to parse DONT_CARE callback data"));
        }
        self.bot.parse_callback_data(self.data).await
    }

    pub async fn edit_or_send(
        &mut self,
        text: impl Into<String>,
        reply_markup: teloxide::types::InlineKeyboardMarkup,
    ) -> Result<(), anyhow::Error> {
        let text = text.into();
        match self.last_message {
            Some(message_id) if text.len() < MAX_MESSAGE_LENGTH => {
                self.bot
                    .edit_text_message(self.chat_id, message_id, text, reply_markup)
                    .await
            }
            _ => self.send_and_set(text, reply_markup).await,
        }
    }

    pub async fn send(
        &self,
        text: impl Into<String>,
        reply_markup: impl Into<ReplyMarkup>,
    ) -> Result<Message, anyhow::Error> {
        self.bot.send(self.chat_id, text, reply_markup).await
    }

    pub async fn send_and_set(
        &mut self,
        text: impl Into<String>,
        reply_markup: impl Into<ReplyMarkup>,
    ) -> Result<(), anyhow::Error> {
        let message = self.send(text, reply_markup).await?;
        self.last_message = Some(message.id);
        Ok(())
    }

    pub async fn delete_last_message(&self) -> Result<(), anyhow::Error> {
        if let Some(message_id) = self.last_message {
            self.bot
                .bot()
                .delete_message(self.chat_id, message_id)
                .await?;
        }
        Ok(())
    }
}

pub struct MustAnswerCallbackQuery {
    bot_id: UserId,
    callback_query: String,
    callback_query_answered: bool,
}

impl MustAnswerCallbackQuery {
    pub async fn answer_callback_query(mut self, state: &ScoutState) {
        self.callback_query_answered = true;
        let Some(bot) = state.bot(&self.bot_id) else {
            warn!("Bot not found while answering callback query {}", self.callback_query);
            return;
        };
        if let Err(err) = bot.bot().answer_callback_query(&self.callback_query).await {
            warn!(
                "Error answering callback query {}: {:?}",
                self.callback_query, err
            );
        }
    }
}

impl Drop for MustAnswerCallbackQuery {
    fn drop(&mut self) {
        if !self.callback_query_answered {
            warn!("Callback query {} was not answered", self.callback_query);
        }
    }
}

fn log_parse_error(text: impl Into<String>) -> impl FnOnce(&RequestError) {
    let text = text.into();
    move |err| {
        if let RequestError::Api(ApiError::CantParseEntities(s)) = err {
            log::warn!("Can't parse entities in message: {s}\n{text:?}");
        }
    }
}

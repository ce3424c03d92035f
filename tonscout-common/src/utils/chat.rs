use cached::{proc_macro::cached, TimedSizedCache};
use teloxide::{
    prelude::{ChatId, Requester, UserId},
    types::ChatMemberKind,
};

use crate::tgbot::{BotData, TgBot};

pub const DM_CHAT: &str = "you in DM";

#[cached(
    result = true,
    convert = "{ chat_id.0 }",
    ty = "TimedSizedCache<i64, Option<String>>",
    create = "{ TimedSizedCache::with_size_and_lifespan(100, 300) }"
)]
pub async fn get_chat_title_cached_5m(
    bot: &TgBot,
    chat_id: ChatId,
) -> Result<Option<String>, anyhow::Error> {
    let chat = bot.get_chat(chat_id).await?;
    Ok(chat.title().map(|s| s.to_owned()))
}

/// Anyone can manage their own DM, groups need an owner or an administrator.
pub async fn check_admin_permission_in_chat(
    bot: &BotData,
    chat_id: ChatId,
    user_id: UserId,
) -> bool {
    if chat_id.as_user() == Some(user_id) {
        return true;
    }
    let Ok(member) = bot.bot().get_chat_member(chat_id, user_id).await else {
        return false;
    };
    let is_allowed = member.is_owner() || matches!(member.kind, ChatMemberKind::Administrator(_));
    if !is_allowed {
        bot.send_text_message_without_reply_markup(
            chat_id,
            "Only chat administrators can change listing settings here\\.".to_string(),
        )
        .await
        .ok();
    }
    is_allowed
}

//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! Wrappers around sends, edits and deletes that retry on transient network
//! failures using exponential backoff with jitter. Every text is sent as HTML.
//!
//! # Usage
//!
//! ```ignore
//! use ktp_npwp_bot::bot::resilient::{send_html, edit_html_safe};
//!
//! let msg = send_html(&bot, chat_id, "🧠 Memproses...", None).await?;
//! let ok = edit_html_safe(&bot, chat_id, msg.id, "✅ Selesai", None).await;
//! ```

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardMarkup, Message, MessageId, ParseMode};
use tracing::{debug, warn};

/// Maximum message length for Telegram with safety margin.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

const ERROR_NOT_MODIFIED: &str = "message is not modified";
const ERROR_NOT_FOUND: &str = "message to edit not found";
const ERROR_DELETE_NOT_FOUND: &str = "message to delete not found";

/// Truncates HTML text above the Telegram limit and marks it as cut.
///
/// The cut never lands inside a tag or an entity, and tags left open by the
/// cut are closed again.
#[must_use]
pub fn fit_message(text: &str) -> String {
    if text.chars().count() <= TELEGRAM_MESSAGE_LIMIT {
        return text.to_string();
    }
    let mut truncated = crate::utils::truncate_str(text, TELEGRAM_MESSAGE_LIMIT);
    if let Some(open) = truncated.rfind('<') {
        if !truncated[open..].contains('>') {
            truncated.truncate(open);
        }
    }
    if let Some(amp) = truncated.rfind('&') {
        if !truncated[amp..].contains(';') {
            truncated.truncate(amp);
        }
    }
    let closing: String = open_tags(&truncated)
        .iter()
        .rev()
        .map(|tag| format!("</{tag}>"))
        .collect();
    format!("{truncated}{closing}...\n\n<i>(pesan dipotong)</i>")
}

/// Names of tags opened in `html` and not closed, outermost first
fn open_tags(html: &str) -> Vec<String> {
    let mut stack: Vec<String> = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        let tag = &rest[start + 1..start + len];
        if let Some(name) = tag.strip_prefix('/') {
            let name = name.trim();
            if let Some(pos) = stack.iter().rposition(|open| open == name) {
                stack.truncate(pos);
            }
        } else if let Some(name) = tag.split_whitespace().next() {
            stack.push(name.to_string());
        }
        rest = &rest[start + len + 1..];
    }
    stack
}

/// Send an HTML message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_html(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<Message> {
    let text = fit_message(&text.into());
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot
            .send_message(chat_id, text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = keyboard.clone() {
            req = req.reply_markup(markup);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit an HTML message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn edit_html(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<Message> {
    let text = fit_message(&text.into());
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot
            .edit_message_text(chat_id, msg_id, text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = keyboard.clone() {
            req = req.reply_markup(markup);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await
}

/// Edit with graceful degradation.
///
/// "Not modified" and "not found" are expected when a user double-taps a
/// button or the message was deleted, and are only logged at debug level.
///
/// # Returns
///
/// - `true` if the message was edited
/// - `false` if the edit was skipped or failed after retries
pub async fn edit_html_safe(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> bool {
    match edit_html(bot, chat_id, msg_id, text, keyboard).await {
        Ok(_) => true,
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains(ERROR_NOT_MODIFIED) || err_msg.contains(ERROR_NOT_FOUND) {
                debug!("Message update skipped: {err_msg}");
            } else {
                warn!("Failed to edit message after retries: {e}");
            }
            false
        }
    }
}

/// Deletes a message, ignoring failures
pub async fn delete_message_safe(bot: &Bot, chat_id: ChatId, msg_id: MessageId) {
    if let Err(e) = bot.delete_message(chat_id, msg_id).await {
        let err_msg = e.to_string();
        if err_msg.contains(ERROR_DELETE_NOT_FOUND) {
            debug!("Message already deleted: {err_msg}");
        } else {
            warn!("Failed to delete message {}: {e}", msg_id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_message_keeps_short_text() {
        assert_eq!(fit_message("✅ Berhasil"), "✅ Berhasil");
    }

    #[test]
    fn test_fit_message_truncates_long_text() {
        let long = "x".repeat(TELEGRAM_MESSAGE_LIMIT + 50);
        let fitted = fit_message(&long);
        assert!(fitted.starts_with(&"x".repeat(TELEGRAM_MESSAGE_LIMIT)));
        assert!(fitted.ends_with("<i>(pesan dipotong)</i>"));
        assert!(!fitted.contains(&"x".repeat(TELEGRAM_MESSAGE_LIMIT + 1)));
    }

    #[test]
    fn test_fit_message_does_not_split_markup() {
        let pad = "x".repeat(TELEGRAM_MESSAGE_LIMIT - 2);
        let in_tag = format!("{pad}<b>Nama</b>");
        let fitted = fit_message(&in_tag);
        assert!(fitted.starts_with(&format!("{pad}...")));
        assert!(!fitted.contains("<b"));

        let in_entity = format!("{pad}a&amp;b");
        let fitted = fit_message(&in_entity);
        assert!(fitted.starts_with(&format!("{pad}a...")));
        assert!(!fitted.contains('&'));
    }

    #[test]
    fn test_fit_message_closes_open_tags() {
        let body = "y".repeat(TELEGRAM_MESSAGE_LIMIT);
        let text = format!("<b>Data</b>\n<code><i>{body}</i></code>");
        let fitted = fit_message(&text);
        assert!(fitted.contains("</i></code>..."));
        assert!(fitted.starts_with("<b>Data</b>\n<code><i>y"));
    }

    #[test]
    fn test_open_tags() {
        assert!(open_tags("<b>a</b> <i>b</i>").is_empty());
        assert_eq!(open_tags("<b>a <a href=\"x\">link"), ["b", "a"]);
        assert_eq!(open_tags("<code><i>x</i>"), ["code"]);
    }
}

//! Telegram file downloads
//!
//! Uploads are kept on Telegram's side until they are needed: the session
//! stores only the file id, and the bytes are fetched for AI extraction and
//! again when archiving.

use anyhow::Result;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::debug;

/// Downloads a file by id, retrying transient failures.
///
/// # Errors
///
/// Returns an error if `get_file` or the download fails on every attempt.
pub async fn download_file(bot: &Bot, file_id: &str) -> Result<Vec<u8>> {
    let buffer = crate::utils::retry_telegram_operation(|| async {
        let file = bot.get_file(FileId(file_id.to_string())).await?;
        let mut buf = Vec::new();
        bot.download_file(&file.path, &mut buf).await?;
        Ok(buf)
    })
    .await?;

    debug!(size = buffer.len(), "Downloaded Telegram file");
    Ok(buffer)
}

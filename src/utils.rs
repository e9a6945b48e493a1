//! Utility functions for text truncation, formatting, file names and
//! Telegram retries.
//!
//! Regexes are declared with the `lazy-regex` crate so patterns are validated
//! at compile time and built on first use.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use anyhow::Result;
use lazy_regex::lazy_regex;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Characters not allowed in Drive file names
static RE_INVALID_FILENAME_CHARS: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r#"[<>:"/\\|?*]"#);

/// ASCII and C1 control characters
static RE_CONTROL_CHARS: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"[\x00-\x1f\x7f-\x{9f}]");

/// Maximum file name length accepted by the archive
pub const MAX_FILENAME_LEN: usize = 255;

/// Safely truncates a string to a maximum character length (not bytes).
///
/// # Examples
///
/// ```
/// use ktp_npwp_bot::utils::truncate_str;
/// assert_eq!(truncate_str("Jl. Merdeka", 3), "Jl.");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Truncates to `max_len` graphemes including a trailing `...`.
#[must_use]
pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> String {
    const SUFFIX: &str = "...";
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    if graphemes.len() <= max_len {
        return text.to_string();
    }
    let keep = max_len.saturating_sub(SUFFIX.len());
    let mut out: String = graphemes[..keep].concat();
    out.push_str(SUFFIX);
    out
}

/// Human readable size, e.g. `1.5 MB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_file_size(size_bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if size_bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// Human readable duration in Indonesian (`5 menit 3 detik`).
#[must_use]
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        return format!("{seconds} detik");
    }
    if seconds < 3600 {
        let (m, s) = (seconds / 60, seconds % 60);
        return if s > 0 {
            format!("{m} menit {s} detik")
        } else {
            format!("{m} menit")
        };
    }
    let (h, m) = (seconds / 3600, (seconds % 3600) / 60);
    if m > 0 {
        format!("{h} jam {m} menit")
    } else {
        format!("{h} jam")
    }
}

/// Masks the middle of an identifier for logs (`3201********0001`).
#[must_use]
pub fn mask_sensitive(data: &str, visible_start: usize, visible_end: usize) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= visible_start + visible_end {
        return "*".repeat(chars.len());
    }
    let start: String = chars[..visible_start].iter().collect();
    let end: String = chars[chars.len() - visible_end..].iter().collect();
    format!(
        "{start}{}{end}",
        "*".repeat(chars.len() - visible_start - visible_end)
    )
}

/// Keeps ASCII digits only.
#[must_use]
pub fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Makes a name safe for Drive: invalid characters become `_`, control
/// characters are dropped and long names are cut keeping the extension.
///
/// # Examples
///
/// ```
/// use ktp_npwp_bot::utils::sanitize_filename;
/// assert_eq!(sanitize_filename("PT A/B: Jaya?.jpg"), "PT A_B_ Jaya_.jpg");
/// ```
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let replaced = RE_INVALID_FILENAME_CHARS.replace_all(filename, "_");
    let cleaned = RE_CONTROL_CHARS.replace_all(&replaced, "");
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c == ' ');
    if trimmed.is_empty() {
        return "untitled".to_string();
    }

    if trimmed.chars().count() <= MAX_FILENAME_LEN {
        return trimmed.to_string();
    }

    let (stem, ext) = split_extension(trimmed);
    let keep = MAX_FILENAME_LEN.saturating_sub(ext.chars().count());
    format!("{}{ext}", truncate_str(stem, keep))
}

/// Splits `name.ext` into (`name`, `.ext`); the extension is empty if absent.
#[must_use]
pub fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    }
}

/// Retry a Telegram API operation with exponential backoff.
///
/// Meant for file operations (`get_file` + `download_file`) and message
/// sends that may fail on transient network errors. Backoff starts at
/// 500ms, is capped at 4s and adds jitter.
///
/// # Errors
///
/// Returns the last error if every attempt fails.
///
/// # Examples
///
/// ```no_run
/// use ktp_npwp_bot::utils::retry_telegram_operation;
/// use anyhow::Result;
///
/// async fn download_file() -> Result<Vec<u8>> {
///     Ok(vec![])
/// }
///
/// # async fn example() -> Result<()> {
/// let buffer = retry_telegram_operation(|| async {
///     download_file().await
/// }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Kecamatan Ciputat Timur";
        assert_eq!(truncate_str(s, 9), "Kecamatan");
        assert_eq!(truncate_str("Jalan é", 50), "Jalan é");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512.0 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42 detik");
        assert_eq!(format_duration(300), "5 menit");
        assert_eq!(format_duration(303), "5 menit 3 detik");
        assert_eq!(format_duration(3660), "1 jam 1 menit");
    }

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("3201234567890001", 4, 4), "3201********0001");
        assert_eq!(mask_sensitive("123", 2, 2), "***");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("BUDI <SANTOSO> - KTP.jpg"), "BUDI _SANTOSO_ - KTP.jpg");
        assert_eq!(sanitize_filename("  ..  "), "untitled");
        assert_eq!(sanitize_filename("a\u{0007}b.pdf"), "ab.pdf");

        let long = format!("{}.pdf", "x".repeat(300));
        let cleaned = sanitize_filename(&long);
        assert_eq!(cleaned.chars().count(), MAX_FILENAME_LEN);
        assert!(cleaned.ends_with(".pdf"));
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("laporan.final.pdf"), ("laporan.final", ".pdf"));
        assert_eq!(split_extension("noext"), ("noext", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let calls = AtomicUsize::new(0);
        let result = retry_telegram_operation(|| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(anyhow::anyhow!("connection reset"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

//! Command and message handlers
//!
//! Commands reset or report the session; photos and PDFs start a new
//! session; plain text feeds the step that expects typed input.

use crate::bot::flow::{self, EditStep, PdfNameStep};
use crate::bot::media::download_file;
use crate::bot::resilient::{delete_message_safe, send_html};
use crate::bot::views::{self, branch_keyboard, confirmation_keyboard};
use crate::config::Settings;
use crate::google::ArchiveService;
use crate::session::{SessionLookup, SessionState, SessionStore, UserSession, WorkflowType};
use crate::utils::format_file_size;
use crate::validators::{validate_file_size, ValidationError};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use teloxide::{prelude::*, types::MessageId, utils::command::BotCommands};
use tracing::{error, info, warn};

const PDF_MIME: &str = "application/pdf";
const DEFAULT_PDF_NAME: &str = "document.pdf";

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case", description = "Perintah yang tersedia:")]
pub enum Command {
    /// Start the bot and show the guide
    #[command(description = "Memulai bot dan melihat panduan.")]
    Start,
    /// Show help
    #[command(description = "Menampilkan bantuan.")]
    Help,
    /// Show bot and session status
    #[command(description = "Cek status sistem.")]
    Status,
    /// Cancel the running operation
    #[command(description = "Membatalkan operasi yang sedang berjalan.")]
    Cancel,
    /// Usage statistics for admins
    #[command(description = "Statistik admin.")]
    AdminStats,
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

fn get_user_name(msg: &Message) -> String {
    if let Some(ref user) = msg.from {
        if !user.first_name.is_empty() {
            return user.first_name.clone();
        }
        if let Some(ref username) = user.username {
            return username.clone();
        }
    }
    "Pengguna".to_string()
}

/// Structured audit line for a user action
pub fn audit(settings: &Settings, user_id: i64, action: &str, details: &str) {
    if settings.enable_audit_log {
        info!(target: "audit", user_id, action, details, "User action");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// `/start`: drops any session and sends the guide
///
/// # Errors
///
/// Returns an error if the welcome message cannot be sent.
pub async fn start(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let user_name = get_user_name(&msg);

    info!("User {user_id} ({user_name}) initiated /start command.");
    flow::reset(&sessions, user_id).await;
    audit(&settings, user_id, "start_command", "");

    send_html(&bot, msg.chat.id, views::welcome_message(&user_name), None).await?;
    Ok(())
}

/// `/help`
///
/// # Errors
///
/// Returns an error if the message cannot be sent.
pub async fn help(bot: Bot, msg: Message, settings: Arc<Settings>) -> Result<()> {
    audit(&settings, get_user_id_safe(&msg), "help_command", "");
    send_html(&bot, msg.chat.id, views::help_message(&settings), None).await?;
    Ok(())
}

/// `/status`: configuration and the caller's session
///
/// # Errors
///
/// Returns an error if the message cannot be sent.
pub async fn status(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let now = Utc::now();
    audit(&settings, user_id, "status_command", "");

    let session = match sessions.lookup(user_id, now).await {
        SessionLookup::Active(session) => Some(session),
        SessionLookup::Expired | SessionLookup::Missing => None,
    };
    let text = views::status_message(&settings, session.as_deref(), now);
    send_html(&bot, msg.chat.id, text, None).await?;
    Ok(())
}

/// `/cancel`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn cancel(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    audit(&settings, user_id, "cancel_command", "");

    let SessionLookup::Active(session) = sessions.lookup(user_id, Utc::now()).await else {
        send_html(&bot, msg.chat.id, views::NOTHING_TO_CANCEL, None).await?;
        return Ok(());
    };

    flow::reset(&sessions, user_id).await;
    info!(user_id, state = %session.state, "Session cancelled by user");
    send_html(
        &bot,
        msg.chat.id,
        views::cancelled_message(session.workflow, session.state),
        None,
    )
    .await?;
    Ok(())
}

/// `/admin_stats`, admins only: sessions plus each branch's folder and sheet
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn admin_stats(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
    archive: Arc<ArchiveService>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    if !settings.admin_users().contains(&user_id) {
        warn!(user_id, "Non-admin requested /admin_stats");
        send_html(&bot, msg.chat.id, views::NOT_ADMIN, None).await?;
        return Ok(());
    }
    audit(&settings, user_id, "admin_stats_command", "");

    let stats = sessions.stats(Utc::now()).await;
    let mut text = views::admin_stats_message(&settings, &stats);
    text.push_str("\n\n🗄️ <b>Storage</b>");
    for branch in settings.branches() {
        let folder = archive
            .folder_info(&branch)
            .await
            .inspect_err(|e| warn!(branch = %branch, "Folder info failed: {e}"))
            .ok();
        let sheet = archive
            .sheet_info(&branch)
            .await
            .inspect_err(|e| warn!(branch = %branch, "Sheet info failed: {e}"))
            .ok();
        let line = views::branch_storage_line(
            &branch,
            folder.as_ref().map(|(parent, subs)| (parent, subs.as_slice())),
            sheet.as_ref(),
        );
        text.push('\n');
        text.push_str(&line);
    }
    send_html(&bot, msg.chat.id, text, None).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Uploads
// ─────────────────────────────────────────────────────────────────────────────

fn size_error_text(err: &ValidationError, limit_mb: u64) -> String {
    match err {
        ValidationError::FileTooLarge { .. } => views::file_too_large(limit_mb),
        other => views::invalid_value(other),
    }
}

/// Starts a new session and replies with the branch keyboard; the reply id
/// is kept so a later edit can clean it up.
async fn open_session(
    bot: &Bot,
    chat_id: ChatId,
    sessions: &SessionStore,
    settings: &Settings,
    session: UserSession,
    reply: String,
) -> Result<()> {
    let user_id = session.user_id;
    flow::begin_upload(sessions, session, Utc::now()).await?;

    let sent = send_html(bot, chat_id, reply, Some(branch_keyboard(&settings.branches()))).await?;
    flow::remember_message(sessions, user_id, sent.id.0, Utc::now()).await;
    Ok(())
}

/// Photo upload: starts a photo session; the caption becomes the store name
///
/// # Errors
///
/// Returns an error if Telegram calls fail.
pub async fn handle_photo(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
) -> Result<()> {
    let Some(photo) = msg.photo().and_then(|p| p.last()) else {
        return Ok(());
    };
    let user_id = get_user_id_safe(&msg);
    let size = u64::from(photo.file.size);

    if let Err(e) = validate_file_size(size, settings.max_image_size_mb) {
        send_html(&bot, msg.chat.id, size_error_text(&e, settings.max_image_size_mb), None).await?;
        return Ok(());
    }

    let caption = msg
        .caption()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ToString::to_string);
    audit(
        &settings,
        user_id,
        "photo_received",
        &format!("size={size} caption={}", caption.is_some()),
    );

    let mut session = UserSession::new(user_id, Utc::now());
    session.workflow = Some(WorkflowType::Photo);
    session.file_id = Some(photo.file.id.0.clone());
    session.file_size = Some(size);
    session.nama_toko.clone_from(&caption);

    open_session(
        &bot,
        msg.chat.id,
        &sessions,
        &settings,
        session,
        views::photo_received(caption.as_deref()),
    )
    .await
}

/// Document upload: PDFs start a PDF session, everything else is rejected
///
/// # Errors
///
/// Returns an error if Telegram calls fail.
pub async fn handle_document(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
) -> Result<()> {
    let Some(doc) = msg.document() else {
        return Ok(());
    };
    let user_id = get_user_id_safe(&msg);

    let is_pdf = doc
        .mime_type
        .as_ref()
        .is_some_and(|m| m.essence_str() == PDF_MIME);
    if !is_pdf {
        send_html(&bot, msg.chat.id, views::INVALID_FILE_TYPE, None).await?;
        return Ok(());
    }

    let size = u64::from(doc.file.size);
    if let Err(e) = validate_file_size(size, settings.max_pdf_size_mb) {
        send_html(&bot, msg.chat.id, size_error_text(&e, settings.max_pdf_size_mb), None).await?;
        return Ok(());
    }

    let file_name = doc
        .file_name
        .clone()
        .unwrap_or_else(|| DEFAULT_PDF_NAME.to_string());
    audit(&settings, user_id, "pdf_received", &format!("size={size}"));

    let mut session = UserSession::new(user_id, Utc::now());
    session.workflow = Some(WorkflowType::Pdf);
    session.file_id = Some(doc.file.id.0.clone());
    session.file_size = Some(size);
    session.original_filename = Some(file_name.clone());

    let reply = views::pdf_received(&file_name, &format_file_size(size));
    open_session(&bot, msg.chat.id, &sessions, &settings, session, reply).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Text
// ─────────────────────────────────────────────────────────────────────────────

/// Plain text: PDF name, edited field value, or guidance
///
/// # Errors
///
/// Returns an error if Telegram calls fail.
pub async fn handle_text(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
    archive: Arc<ArchiveService>,
) -> Result<()> {
    let Some(text) = msg.text().map(str::trim) else {
        return Ok(());
    };
    let user_id = get_user_id_safe(&msg);

    let session = match sessions.lookup(user_id, Utc::now()).await {
        SessionLookup::Active(session) => session,
        SessionLookup::Expired => {
            send_html(&bot, msg.chat.id, views::SESSION_EXPIRED, None).await?;
            return Ok(());
        }
        SessionLookup::Missing => {
            send_html(&bot, msg.chat.id, views::NO_SESSION_GUIDANCE, None).await?;
            return Ok(());
        }
    };

    match session.state {
        SessionState::AwaitingPdfName => {
            handle_pdf_name(&bot, &msg, text, &session, &sessions, &archive).await
        }
        SessionState::AwaitingEditInput => {
            handle_edit_input(&bot, &msg, text, &session, &sessions, &settings).await
        }
        state => {
            if let Err(e) = sessions.update(user_id, Utc::now(), |_| ()).await {
                warn!(user_id, "Could not record activity: {e}");
            }
            send_html(
                &bot,
                msg.chat.id,
                views::not_understood(session.workflow, state),
                None,
            )
            .await?;
            Ok(())
        }
    }
}

async fn handle_pdf_name(
    bot: &Bot,
    msg: &Message,
    name: &str,
    session: &UserSession,
    sessions: &SessionStore,
    archive: &ArchiveService,
) -> Result<()> {
    let user_id = session.user_id;
    let chat_id = msg.chat.id;

    let session = match flow::name_pdf(sessions, user_id, name, Utc::now()).await {
        Ok(Some(PdfNameStep::TooShort)) => {
            send_html(bot, chat_id, views::PDF_NAME_TOO_SHORT, None).await?;
            return Ok(());
        }
        Ok(Some(PdfNameStep::TooLong)) => {
            send_html(bot, chat_id, views::PDF_NAME_TOO_LONG, None).await?;
            return Ok(());
        }
        Ok(Some(PdfNameStep::Accepted(session))) => session,
        Ok(None) => {
            send_html(bot, chat_id, views::not_understood(session.workflow, session.state), None)
                .await?;
            return Ok(());
        }
        Err(e) => {
            info!(user_id, "Session gone before PDF name: {e}");
            send_html(bot, chat_id, views::session_error_text(&e), None).await?;
            return Ok(());
        }
    };
    send_html(bot, chat_id, views::PDF_NAME_ACCEPTED, None).await?;

    let Some(file_id) = session.file_id.as_deref() else {
        sessions.clear(user_id).await;
        send_html(bot, chat_id, views::PREVIEW_ERROR, None).await?;
        return Ok(());
    };

    let result = match download_file(bot, file_id).await {
        Ok(content) => flow::finish_pdf(sessions, archive, &session, DEFAULT_PDF_NAME, content).await,
        Err(e) => {
            sessions.clear(user_id).await;
            Err(e)
        }
    };

    match result {
        Ok(file_name) => {
            let branch = session.branch.as_deref().unwrap_or_default();
            info!(user_id, branch, "PDF archived");
            send_html(bot, chat_id, views::pdf_saved(branch, &file_name), None).await?;
        }
        Err(e) => {
            error!(user_id, "Error saving PDF: {e:#}");
            send_html(bot, chat_id, views::pdf_save_failed(&views::user_error_message(&e)), None)
                .await?;
        }
    }
    Ok(())
}

async fn handle_edit_input(
    bot: &Bot,
    msg: &Message,
    value: &str,
    session: &UserSession,
    sessions: &SessionStore,
    settings: &Settings,
) -> Result<()> {
    let user_id = session.user_id;
    let chat_id = msg.chat.id;

    let updated = match flow::apply_edit(sessions, session, value, Utc::now()).await {
        Ok(Some(EditStep::Applied(updated))) => updated,
        Ok(Some(EditStep::NoField)) => {
            send_html(bot, chat_id, views::NO_EDIT_FIELD, None).await?;
            return Ok(());
        }
        Ok(Some(EditStep::Invalid(e))) => {
            send_html(bot, chat_id, views::invalid_value(&e), None).await?;
            return Ok(());
        }
        Ok(None) => {
            send_html(bot, chat_id, views::not_understood(session.workflow, session.state), None)
                .await?;
            return Ok(());
        }
        Err(e) => {
            info!(user_id, "Session gone before edit: {e}");
            send_html(bot, chat_id, views::session_error_text(&e), None).await?;
            return Ok(());
        }
    };
    if let Some(field) = session.edit_field {
        audit(settings, user_id, "field_edited", field.key());
    }

    if let Some(prompt_id) = session.last_bot_message_id {
        delete_message_safe(bot, chat_id, MessageId(prompt_id)).await;
    }
    delete_message_safe(bot, chat_id, msg.id).await;

    let Some(preview) = views::session_preview(&updated) else {
        sessions.clear(user_id).await;
        send_html(bot, chat_id, views::PREVIEW_ERROR, None).await?;
        return Ok(());
    };
    let sent = send_html(bot, chat_id, preview, Some(confirmation_keyboard())).await?;
    flow::remember_message(sessions, user_id, sent.id.0, Utc::now()).await;
    Ok(())
}

/// Anything that is not a command, photo, document or text
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_unsupported(bot: Bot, msg: Message) -> Result<()> {
    info!(user_id = get_user_id_safe(&msg), "Unsupported message type");
    send_html(&bot, msg.chat.id, views::UNSUPPORTED_MESSAGE, None).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        let cmd = Command::parse("/admin_stats", "ktp_bot").expect("admin_stats parses");
        assert!(matches!(cmd, Command::AdminStats));
        assert!(matches!(
            Command::parse("/start", "ktp_bot").expect("start parses"),
            Command::Start
        ));
        assert!(Command::parse("/unknown", "ktp_bot").is_err());
    }

    #[test]
    fn test_command_descriptions_list_every_command() {
        let text = Command::descriptions().to_string();
        for name in ["/start", "/help", "/status", "/cancel", "/admin_stats"] {
            assert!(text.contains(name), "missing {name}");
        }
    }

    #[test]
    fn test_size_error_text() {
        let too_large = ValidationError::FileTooLarge {
            size_mb: "25.0".to_string(),
            max_mb: 20,
        };
        assert_eq!(size_error_text(&too_large, 20), "❌ File terlalu besar. Maksimal 20MB.");
        assert!(size_error_text(&ValidationError::FileEmpty, 20).starts_with("❌ "));
    }
}

//! Inline keyboard callbacks
//!
//! Every callback edits the message that carried the keyboard, so the chat
//! shows one evolving message per document.

use crate::bot::flow::{self, BranchStep, ExtractionStep, SaveStep, Step};
use crate::bot::handlers::audit;
use crate::bot::media::download_file;
use crate::bot::resilient::{edit_html_safe, send_html};
use crate::bot::views::{
    self, branch_keyboard, confirmation_keyboard, duplicate_keyboard, edit_keyboard,
    npwp_type_keyboard, CB_BRANCH_PREFIX, CB_CANCEL_EDIT, CB_CANCEL_OP, CB_CONFIRM_EDIT,
    CB_CONFIRM_SAVE, CB_EDIT_LOCATION, CB_EDIT_PREFIX, CB_FORCE_SAVE, CB_NPWP_TYPE_PREFIX,
};
use crate::config::Settings;
use crate::document::{EditableField, NpwpType};
use crate::google::{ArchiveService, SaveOutcome};
use crate::llm::AiClient;
use crate::session::{SessionLookup, SessionState, SessionStore, UserSession};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, InlineKeyboardMarkup, MessageId};
use tracing::{error, info, warn};

/// Parsed callback data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// `branch_<code>`
    Branch(String),
    /// `npwptype_<company|personal>`
    NpwpType(NpwpType),
    /// `confirm_save`
    ConfirmSave,
    /// `force_save`
    ForceSave,
    /// `confirm_edit`
    ConfirmEdit,
    /// `edit_<field>`
    EditField(EditableField),
    /// `edit_location`
    EditLocation,
    /// `cancel_edit`
    CancelEdit,
    /// `cancel_op`
    CancelOp,
    /// Anything else
    Unknown,
}

impl CallbackAction {
    /// Parses callback data; exact names win over prefixes
    #[must_use]
    pub fn parse(data: &str) -> Self {
        match data {
            CB_CONFIRM_SAVE => return Self::ConfirmSave,
            CB_FORCE_SAVE => return Self::ForceSave,
            CB_CONFIRM_EDIT => return Self::ConfirmEdit,
            CB_EDIT_LOCATION => return Self::EditLocation,
            CB_CANCEL_EDIT => return Self::CancelEdit,
            CB_CANCEL_OP => return Self::CancelOp,
            _ => {}
        }

        if let Some(code) = data.strip_prefix(CB_BRANCH_PREFIX) {
            return Self::Branch(code.to_string());
        }
        if let Some(kind) = data.strip_prefix(CB_NPWP_TYPE_PREFIX).and_then(NpwpType::parse) {
            return Self::NpwpType(kind);
        }
        if let Some(field) = data.strip_prefix(CB_EDIT_PREFIX).and_then(EditableField::from_key) {
            return Self::EditField(field);
        }
        Self::Unknown
    }
}

/// Shared services and the message being edited
struct CallbackContext {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
    user_id: i64,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
    ai: Arc<AiClient>,
    archive: Arc<ArchiveService>,
}

impl CallbackContext {
    async fn edit(&self, text: &str, keyboard: Option<InlineKeyboardMarkup>) {
        edit_html_safe(&self.bot, self.chat_id, self.message_id, text, keyboard).await;
    }

    /// Unwraps a session step. A stale button gets a notice; a session that
    /// was reset or expired meanwhile replaces the message with that news.
    async fn settle<T>(&self, step: Step<T>) -> Result<Option<T>> {
        match step {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                send_html(&self.bot, self.chat_id, views::STALE_BUTTON, None).await?;
                Ok(None)
            }
            Err(e) => {
                info!(user_id = self.user_id, "Session gone during callback: {e}");
                self.edit(views::session_error_text(&e), None).await;
                Ok(None)
            }
        }
    }

    async fn finish(&self, text: &str) {
        self.sessions.clear(self.user_id).await;
        self.edit(text, None).await;
    }

    async fn fail(&self, err: &anyhow::Error) {
        error!(user_id = self.user_id, "Callback error: {err:#}");
        self.finish(&views::user_error_message(err)).await;
    }

    async fn show_preview(&self, session: &UserSession) {
        match views::session_preview(session) {
            Some(preview) => self.edit(&preview, Some(confirmation_keyboard())).await,
            None => self.finish(views::PREVIEW_ERROR).await,
        }
    }
}

/// Entry point for all inline keyboard presses
///
/// # Errors
///
/// Returns an error if the callback has no message or a reply cannot be sent.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
    ai: Arc<AiClient>,
    archive: Arc<ArchiveService>,
) -> Result<()> {
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };

    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!("Failed to answer callback query: {e}");
    }

    let (chat_id, message_id) = q
        .message
        .as_ref()
        .map(|msg| (msg.chat().id, msg.id()))
        .ok_or_else(|| anyhow::anyhow!("Callback message missing chat id"))?;

    let ctx = CallbackContext {
        bot,
        chat_id,
        message_id,
        user_id: q.from.id.0.cast_signed(),
        sessions,
        settings,
        ai,
        archive,
    };

    let session = match ctx.sessions.lookup(ctx.user_id, Utc::now()).await {
        SessionLookup::Active(session) => session,
        SessionLookup::Expired | SessionLookup::Missing => {
            ctx.edit(views::SESSION_EXPIRED, None).await;
            return Ok(());
        }
    };

    audit(&ctx.settings, ctx.user_id, "callback", data);

    match CallbackAction::parse(data) {
        CallbackAction::Branch(code) => on_branch(&ctx, &session, &code).await,
        CallbackAction::NpwpType(kind) => on_npwp_type(&ctx, kind).await,
        CallbackAction::ConfirmSave => on_save(&ctx, &session, false).await,
        CallbackAction::ForceSave => on_save(&ctx, &session, true).await,
        CallbackAction::ConfirmEdit => on_confirm_edit(&ctx, &session).await,
        CallbackAction::EditField(field) => on_edit_field(&ctx, field).await,
        CallbackAction::EditLocation => on_edit_location(&ctx).await,
        CallbackAction::CancelEdit => on_cancel_edit(&ctx).await,
        CallbackAction::CancelOp => {
            info!(user_id = ctx.user_id, "Operation cancelled from keyboard");
            ctx.finish(views::OPERATION_CANCELLED).await;
            Ok(())
        }
        CallbackAction::Unknown => {
            info!(user_id = ctx.user_id, data, "Unknown callback data");
            ctx.finish(views::UNKNOWN_ACTION).await;
            Ok(())
        }
    }
}

async fn on_branch(ctx: &CallbackContext, session: &UserSession, code: &str) -> Result<()> {
    let step = flow::select_branch(&ctx.sessions, &ctx.settings, session, code, Utc::now()).await;
    let Some(step) = ctx.settle(step).await? else {
        return Ok(());
    };

    match step {
        BranchStep::Invalid => {
            ctx.edit(views::INVALID_BRANCH, Some(branch_keyboard(&ctx.settings.branches())))
                .await;
            Ok(())
        }
        BranchStep::Relocated(updated) => {
            ctx.show_preview(&updated).await;
            Ok(())
        }
        BranchStep::Extract(updated) => {
            ctx.edit(views::PROCESSING_AI, None).await;
            run_extraction(ctx, &updated).await
        }
        BranchStep::AskPdfName => {
            ctx.edit(views::ASK_PDF_NAME, None).await;
            Ok(())
        }
        BranchStep::UnknownWorkflow => {
            ctx.edit(views::UNKNOWN_WORKFLOW, None).await;
            Ok(())
        }
    }
}

async fn run_extraction(ctx: &CallbackContext, session: &UserSession) -> Result<()> {
    let Some(file_id) = session.file_id.as_deref() else {
        ctx.finish(views::PREVIEW_ERROR).await;
        return Ok(());
    };

    let extracted = match download_file(&ctx.bot, file_id).await {
        Ok(bytes) => ctx
            .ai
            .extract_document(&bytes)
            .await
            .map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    let document = match extracted {
        Ok(document) => document,
        Err(e) => {
            ctx.fail(&e).await;
            return Ok(());
        }
    };

    info!(
        user_id = ctx.user_id,
        doc_type = %document.document_type,
        "AI extraction finished"
    );

    let step = flow::store_extraction(&ctx.sessions, ctx.user_id, document, Utc::now()).await;
    match ctx.settle(step).await? {
        Some(ExtractionStep::AskNpwpType) => {
            ctx.edit(views::ASK_NPWP_TYPE, Some(npwp_type_keyboard())).await;
        }
        Some(ExtractionStep::Preview(updated)) => ctx.show_preview(&updated).await,
        None => {}
    }
    Ok(())
}

async fn on_npwp_type(ctx: &CallbackContext, kind: NpwpType) -> Result<()> {
    let step = flow::choose_npwp_type(&ctx.sessions, ctx.user_id, kind, Utc::now()).await;
    if let Some(updated) = ctx.settle(step).await? {
        ctx.show_preview(&updated).await;
    }
    Ok(())
}

async fn on_save(ctx: &CallbackContext, session: &UserSession, bypass_duplicates: bool) -> Result<()> {
    let step = flow::begin_save(&ctx.sessions, session, Utc::now()).await;
    let session = match ctx.settle(step).await? {
        None => return Ok(()),
        Some(SaveStep::MissingFields(missing)) => {
            let preview = views::session_preview(session).unwrap_or_default();
            ctx.edit(
                &views::missing_fields_message(&missing, &preview),
                Some(confirmation_keyboard()),
            )
            .await;
            return Ok(());
        }
        Some(SaveStep::Saving(session)) => session,
    };

    let saving = if bypass_duplicates {
        views::SAVING_FORCED
    } else {
        views::SAVING
    };
    ctx.edit(saving, None).await;

    let (Some(document), Some(branch), Some(file_id)) = (
        session.document.as_ref(),
        session.branch.as_deref(),
        session.file_id.as_deref(),
    ) else {
        ctx.finish(views::PREVIEW_ERROR).await;
        return Ok(());
    };

    let outcome = match download_file(&ctx.bot, file_id).await {
        Ok(image) => {
            flow::finish_save(
                &ctx.sessions,
                &ctx.archive,
                &session,
                image,
                bypass_duplicates,
                Utc::now(),
            )
            .await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(SaveOutcome::Saved { sheet, file_name }) => {
            info!(user_id = ctx.user_id, %sheet, %file_name, "Document saved");
            audit(&ctx.settings, ctx.user_id, "document_saved", branch);
            ctx.edit(&views::save_success(document, branch), None).await;
        }
        Ok(SaveOutcome::Duplicate) => {
            ctx.edit(views::DUPLICATE_WARNING, Some(duplicate_keyboard())).await;
        }
        Err(e) => ctx.fail(&e).await,
    }
    Ok(())
}

async fn on_confirm_edit(ctx: &CallbackContext, session: &UserSession) -> Result<()> {
    let Some(document) = session.document.as_ref() else {
        ctx.finish(views::PREVIEW_ERROR).await;
        return Ok(());
    };
    let step = flow::advance(
        &ctx.sessions,
        ctx.user_id,
        Utc::now(),
        SessionState::SelectingEditField,
        |_| (),
    )
    .await;
    if ctx.settle(step).await?.is_some() {
        ctx.edit(views::EDIT_MENU, Some(edit_keyboard(document))).await;
    }
    Ok(())
}

async fn on_edit_field(ctx: &CallbackContext, field: EditableField) -> Result<()> {
    let step = flow::pick_field(
        &ctx.sessions,
        ctx.user_id,
        field,
        ctx.message_id.0,
        Utc::now(),
    )
    .await;
    if ctx.settle(step).await?.is_some() {
        ctx.edit(&views::edit_prompt(field), None).await;
    }
    Ok(())
}

async fn on_edit_location(ctx: &CallbackContext) -> Result<()> {
    let step = flow::advance(
        &ctx.sessions,
        ctx.user_id,
        Utc::now(),
        SessionState::AwaitingBranchEdit,
        |_| (),
    )
    .await;
    if ctx.settle(step).await?.is_some() {
        ctx.edit(
            views::ASK_NEW_LOCATION,
            Some(branch_keyboard(&ctx.settings.branches())),
        )
        .await;
    }
    Ok(())
}

async fn on_cancel_edit(ctx: &CallbackContext) -> Result<()> {
    let step = flow::advance(
        &ctx.sessions,
        ctx.user_id,
        Utc::now(),
        SessionState::AwaitingConfirmation,
        |_| (),
    )
    .await;
    if let Some(updated) = ctx.settle(step).await? {
        ctx.show_preview(&updated).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exact_actions() {
        assert_eq!(CallbackAction::parse("confirm_save"), CallbackAction::ConfirmSave);
        assert_eq!(CallbackAction::parse("force_save"), CallbackAction::ForceSave);
        assert_eq!(CallbackAction::parse("confirm_edit"), CallbackAction::ConfirmEdit);
        assert_eq!(CallbackAction::parse("cancel_edit"), CallbackAction::CancelEdit);
        assert_eq!(CallbackAction::parse("cancel_op"), CallbackAction::CancelOp);
    }

    #[test]
    fn test_edit_location_is_not_a_field() {
        assert_eq!(CallbackAction::parse("edit_location"), CallbackAction::EditLocation);
        assert_eq!(
            CallbackAction::parse("edit_npwp_15"),
            CallbackAction::EditField(EditableField::Npwp15)
        );
        assert_eq!(
            CallbackAction::parse("edit_document_type"),
            CallbackAction::EditField(EditableField::DocumentType)
        );
        assert_eq!(CallbackAction::parse("edit_umur"), CallbackAction::Unknown);
    }

    #[test]
    fn test_parse_prefixed_actions() {
        assert_eq!(
            CallbackAction::parse("branch_SMD-BPN"),
            CallbackAction::Branch("SMD-BPN".to_string())
        );
        assert_eq!(
            CallbackAction::parse("npwptype_company"),
            CallbackAction::NpwpType(NpwpType::Company)
        );
        assert_eq!(CallbackAction::parse("npwptype_other"), CallbackAction::Unknown);
        assert_eq!(CallbackAction::parse(""), CallbackAction::Unknown);
    }

    #[test]
    fn test_every_keyboard_callback_parses() {
        for field in EditableField::ALL {
            let data = format!("{CB_EDIT_PREFIX}{}", field.key());
            assert_eq!(CallbackAction::parse(&data), CallbackAction::EditField(field));
        }
    }
}

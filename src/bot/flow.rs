//! Conversation steps over the session store and the archive.
//!
//! Handlers and callbacks render what these functions return and make the
//! Telegram calls. A step that asks for a state the session cannot reach
//! (a button or message from an earlier step) yields `Ok(None)` and leaves
//! the session untouched.

use crate::config::Settings;
use crate::document::{DocumentData, DocumentType, EditableField, NpwpType};
use crate::google::{ArchiveService, SaveOutcome};
use crate::session::{SessionError, SessionState, SessionStore, UserSession, WorkflowType};
use crate::validators::{validate_edit_value, ValidationError};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// PDF names accepted from the user, in characters
pub const PDF_NAME_MIN_CHARS: usize = 2;
/// Upper bound for typed PDF names
pub const PDF_NAME_MAX_CHARS: usize = 100;

/// Outcome of a session step; `Ok(None)` when the step is stale
pub type Step<T> = Result<Option<T>, SessionError>;

fn stale_as_none(user_id: i64, result: Result<UserSession, SessionError>) -> Step<UserSession> {
    match result {
        Ok(session) => Ok(Some(session)),
        Err(SessionError::InvalidTransition { from, to }) => {
            debug!(user_id, %from, %to, "Ignoring stale step");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Moves the session to `next` after applying `f`
///
/// # Errors
///
/// Returns `NotFound` or `Expired` when the session is gone.
pub async fn advance<F>(
    sessions: &SessionStore,
    user_id: i64,
    now: DateTime<Utc>,
    next: SessionState,
    f: F,
) -> Step<UserSession>
where
    F: FnOnce(&mut UserSession),
{
    stale_as_none(user_id, sessions.advance(user_id, now, next, f).await)
}

/// Drops whatever the user was doing; true if a session existed
pub async fn reset(sessions: &SessionStore, user_id: i64) -> bool {
    let existed = sessions.clear(user_id).await;
    if existed {
        debug!(user_id, "Session reset");
    }
    existed
}

/// Registers a fresh upload session that waits for its branch
///
/// # Errors
///
/// Returns `InvalidTransition` if `session` is not idle.
pub async fn begin_upload(
    sessions: &SessionStore,
    mut session: UserSession,
    now: DateTime<Utc>,
) -> Result<(), SessionError> {
    session.touch(now);
    session.transition(SessionState::AwaitingBranch)?;
    sessions.start(session, now).await;
    Ok(())
}

/// Records the bot message to clean up later
pub async fn remember_message(
    sessions: &SessionStore,
    user_id: i64,
    message_id: i32,
    now: DateTime<Utc>,
) {
    if let Err(e) = sessions
        .update(user_id, now, |s| s.last_bot_message_id = Some(message_id))
        .await
    {
        warn!(user_id, "Could not record bot message {message_id}: {e}");
    }
}

/// Result of a branch button
#[derive(Debug)]
pub enum BranchStep {
    /// Code not configured
    Invalid,
    /// Save location changed from the edit menu
    Relocated(UserSession),
    /// Photo ready for extraction
    Extract(UserSession),
    /// PDF waiting for its name
    AskPdfName,
    /// Session had no workflow and was dropped
    UnknownWorkflow,
}

/// Applies a branch choice to `session`
///
/// # Errors
///
/// Returns `NotFound` or `Expired` when the session is gone.
pub async fn select_branch(
    sessions: &SessionStore,
    settings: &Settings,
    session: &UserSession,
    code: &str,
    now: DateTime<Utc>,
) -> Step<BranchStep> {
    let user_id = session.user_id;
    let sheet = settings
        .branch_sheet(code)
        .filter(|_| settings.is_valid_branch(code))
        .map(ToString::to_string);
    let Some(sheet) = sheet else {
        return Ok(Some(BranchStep::Invalid));
    };
    let set_branch = |s: &mut UserSession| {
        s.branch = Some(code.to_string());
        s.sheet_name = Some(sheet);
    };

    if session.state == SessionState::AwaitingBranchEdit {
        let updated = advance(sessions, user_id, now, SessionState::AwaitingConfirmation, set_branch)
            .await?;
        if updated.is_some() {
            info!(user_id, branch = code, "Save location changed");
        }
        return Ok(updated.map(BranchStep::Relocated));
    }

    match session.workflow {
        Some(WorkflowType::Photo) => Ok(advance(
            sessions,
            user_id,
            now,
            SessionState::ProcessingAi,
            set_branch,
        )
        .await?
        .map(BranchStep::Extract)),
        Some(WorkflowType::Pdf) => Ok(advance(
            sessions,
            user_id,
            now,
            SessionState::AwaitingPdfName,
            set_branch,
        )
        .await?
        .map(|_| BranchStep::AskPdfName)),
        None => {
            sessions.clear(user_id).await;
            Ok(Some(BranchStep::UnknownWorkflow))
        }
    }
}

/// What follows a finished extraction
#[derive(Debug)]
pub enum ExtractionStep {
    /// NPWP needs its company/personal type
    AskNpwpType,
    /// Ready for review
    Preview(UserSession),
}

/// Stores the extracted document
///
/// # Errors
///
/// Returns `NotFound` if the session was reset during extraction, or `Expired`.
pub async fn store_extraction(
    sessions: &SessionStore,
    user_id: i64,
    document: DocumentData,
    now: DateTime<Utc>,
) -> Step<ExtractionStep> {
    if document.document_type == DocumentType::Npwp {
        let updated = advance(sessions, user_id, now, SessionState::AwaitingNpwpType, |s| {
            s.document = Some(document);
        })
        .await?;
        Ok(updated.map(|_| ExtractionStep::AskNpwpType))
    } else {
        let updated = advance(sessions, user_id, now, SessionState::AwaitingConfirmation, |s| {
            s.document = Some(document);
        })
        .await?;
        Ok(updated.map(ExtractionStep::Preview))
    }
}

/// Records the NPWP type and returns to the preview
///
/// # Errors
///
/// Returns `NotFound` or `Expired` when the session is gone.
pub async fn choose_npwp_type(
    sessions: &SessionStore,
    user_id: i64,
    kind: NpwpType,
    now: DateTime<Utc>,
) -> Step<UserSession> {
    advance(sessions, user_id, now, SessionState::AwaitingConfirmation, |s| {
        if let Some(doc) = s.document.as_mut() {
            doc.npwp_type = Some(kind);
        }
    })
    .await
}

/// Result of a save button
#[derive(Debug)]
pub enum SaveStep {
    /// Required fields are empty; the session stays on the preview
    MissingFields(Vec<&'static str>),
    /// Session moved to `SavingData`
    Saving(UserSession),
}

/// Checks the document and moves to `SavingData`
///
/// # Errors
///
/// Returns `NotFound` or `Expired` when the session is gone.
pub async fn begin_save(
    sessions: &SessionStore,
    session: &UserSession,
    now: DateTime<Utc>,
) -> Step<SaveStep> {
    if !session.can_transition_to(SessionState::SavingData) {
        debug!(user_id = session.user_id, state = %session.state, "Ignoring stale save");
        return Ok(None);
    }
    if let Some(document) = &session.document {
        let missing = document.missing_required_fields();
        if !missing.is_empty() {
            info!(user_id = session.user_id, ?missing, "Save refused, fields missing");
            return Ok(Some(SaveStep::MissingFields(missing)));
        }
    }
    let updated = advance(sessions, session.user_id, now, SessionState::SavingData, |_| ()).await?;
    Ok(updated.map(SaveStep::Saving))
}

/// Archives the document of a session in `SavingData`.
///
/// A saved document or a failure ends the session; a duplicate waits for
/// the user's confirmation.
///
/// # Errors
///
/// Returns the archive error, or a session error if the session vanished
/// while the duplicate check ran.
pub async fn finish_save(
    sessions: &SessionStore,
    archive: &ArchiveService,
    session: &UserSession,
    image: Vec<u8>,
    bypass_duplicates: bool,
    now: DateTime<Utc>,
) -> Result<SaveOutcome> {
    let user_id = session.user_id;
    let (Some(document), Some(branch)) = (session.document.as_ref(), session.branch.as_deref())
    else {
        sessions.clear(user_id).await;
        return Err(anyhow!("session {user_id} has no document or branch"));
    };
    let nama_toko = session.nama_toko.as_deref().unwrap_or_default();

    match archive
        .save_document(branch, document, nama_toko, image, bypass_duplicates)
        .await
    {
        Ok(SaveOutcome::Duplicate) => {
            sessions
                .advance(user_id, now, SessionState::AwaitingDuplicateConfirmation, |_| ())
                .await?;
            Ok(SaveOutcome::Duplicate)
        }
        Ok(saved) => {
            sessions.clear(user_id).await;
            Ok(saved)
        }
        Err(e) => {
            sessions.clear(user_id).await;
            Err(e.into())
        }
    }
}

/// Opens the field prompt; `prompt_id` is the message to delete afterwards
///
/// # Errors
///
/// Returns `NotFound` or `Expired` when the session is gone.
pub async fn pick_field(
    sessions: &SessionStore,
    user_id: i64,
    field: EditableField,
    prompt_id: i32,
    now: DateTime<Utc>,
) -> Step<UserSession> {
    advance(sessions, user_id, now, SessionState::AwaitingEditInput, |s| {
        s.edit_field = Some(field);
        s.last_bot_message_id = Some(prompt_id);
    })
    .await
}

/// Result of a typed field value
#[derive(Debug)]
pub enum EditStep {
    /// No field was selected; the session was dropped
    NoField,
    /// Value rejected, the field stays open
    Invalid(ValidationError),
    /// Value stored, back on the preview
    Applied(UserSession),
}

/// Validates and stores a typed value for the selected field
///
/// # Errors
///
/// Returns `NotFound` or `Expired` when the session is gone.
pub async fn apply_edit(
    sessions: &SessionStore,
    session: &UserSession,
    value: &str,
    now: DateTime<Utc>,
) -> Step<EditStep> {
    let user_id = session.user_id;
    let Some(field) = session.edit_field else {
        sessions.clear(user_id).await;
        return Ok(Some(EditStep::NoField));
    };

    if let Err(e) = validate_edit_value(field, value) {
        sessions
            .update(user_id, now, |s| {
                s.error_count = s.error_count.saturating_add(1);
            })
            .await?;
        return Ok(Some(EditStep::Invalid(e)));
    }

    let updated = advance(sessions, user_id, now, SessionState::AwaitingConfirmation, |s| {
        if let Some(doc) = s.document.as_mut() {
            doc.set_field(field, value);
        }
        s.edit_field = None;
    })
    .await?;
    Ok(updated.map(EditStep::Applied))
}

/// Result of a typed PDF name
#[derive(Debug)]
pub enum PdfNameStep {
    /// Under the minimum length
    TooShort,
    /// Over the maximum length
    TooLong,
    /// Name stored, session in `SavingData`
    Accepted(UserSession),
}

/// Validates the PDF name and moves to `SavingData`
///
/// # Errors
///
/// Returns `NotFound` or `Expired` when the session is gone.
pub async fn name_pdf(
    sessions: &SessionStore,
    user_id: i64,
    name: &str,
    now: DateTime<Utc>,
) -> Step<PdfNameStep> {
    let len = name.chars().count();
    if len < PDF_NAME_MIN_CHARS {
        return Ok(Some(PdfNameStep::TooShort));
    }
    if len > PDF_NAME_MAX_CHARS {
        return Ok(Some(PdfNameStep::TooLong));
    }
    let updated = advance(sessions, user_id, now, SessionState::SavingData, |s| {
        s.custom_filename = Some(name.to_string());
    })
    .await?;
    Ok(updated.map(PdfNameStep::Accepted))
}

/// Uploads the PDF of a session in `SavingData` and ends the session
///
/// # Errors
///
/// Returns the archive error, or an error if the session lacks a branch.
pub async fn finish_pdf(
    sessions: &SessionStore,
    archive: &ArchiveService,
    session: &UserSession,
    default_name: &str,
    content: Vec<u8>,
) -> Result<String> {
    let user_id = session.user_id;
    let result = match session.branch.as_deref() {
        Some(branch) => archive
            .save_pdf(
                branch,
                session.custom_filename.as_deref(),
                session.original_filename.as_deref().unwrap_or(default_name),
                content,
            )
            .await
            .map_err(anyhow::Error::from),
        None => Err(anyhow!("session {user_id} has no branch")),
    };
    sessions.clear(user_id).await;
    result
}

//! Per-user conversation sessions
//!
//! Sessions live in process memory only and expire after a period of
//! inactivity. Expired sessions are dropped on lookup and by a periodic sweep.

use crate::document::{DocumentData, EditableField};
use crate::utils::format_duration;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What the user sent to start the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowType {
    /// KTP/NPWP photo that goes through AI extraction
    Photo,
    /// PDF archived as is
    Pdf,
}

impl WorkflowType {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Pdf => "pdf",
        }
    }
}

/// Conversation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// Nothing in progress
    #[default]
    Idle,
    /// Waiting for a branch button
    AwaitingBranch,
    /// AI extraction running
    ProcessingAi,
    /// Waiting for company/personal choice
    AwaitingNpwpType,
    /// Preview shown, waiting for save/edit/cancel
    AwaitingConfirmation,
    /// Edit keyboard shown
    SelectingEditField,
    /// Waiting for a typed field value
    AwaitingEditInput,
    /// Waiting for a new branch from the edit menu
    AwaitingBranchEdit,
    /// Waiting for the PDF file name
    AwaitingPdfName,
    /// Duplicate warning shown
    AwaitingDuplicateConfirmation,
    /// Sheet/Drive write running
    SavingData,
}

impl SessionState {
    /// Every state, used for statistics
    pub const ALL: [Self; 11] = [
        Self::Idle,
        Self::AwaitingBranch,
        Self::ProcessingAi,
        Self::AwaitingNpwpType,
        Self::AwaitingConfirmation,
        Self::SelectingEditField,
        Self::AwaitingEditInput,
        Self::AwaitingBranchEdit,
        Self::AwaitingPdfName,
        Self::AwaitingDuplicateConfirmation,
        Self::SavingData,
    ];

    /// `snake_case` name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingBranch => "awaiting_branch",
            Self::ProcessingAi => "processing_ai",
            Self::AwaitingNpwpType => "awaiting_npwp_type",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::SelectingEditField => "selecting_edit_field",
            Self::AwaitingEditInput => "awaiting_edit_input",
            Self::AwaitingBranchEdit => "awaiting_branch_edit",
            Self::AwaitingPdfName => "awaiting_pdf_name",
            Self::AwaitingDuplicateConfirmation => "awaiting_duplicate_confirmation",
            Self::SavingData => "saving_data",
        }
    }

    /// Legal next states (besides `Idle`, which is always allowed)
    const fn successors(self) -> &'static [Self] {
        match self {
            Self::Idle => &[Self::AwaitingBranch],
            Self::AwaitingBranch => &[
                Self::AwaitingNpwpType,
                Self::AwaitingConfirmation,
                Self::AwaitingPdfName,
                Self::ProcessingAi,
            ],
            Self::ProcessingAi => &[Self::AwaitingNpwpType, Self::AwaitingConfirmation],
            Self::AwaitingNpwpType | Self::AwaitingEditInput | Self::AwaitingBranchEdit => {
                &[Self::AwaitingConfirmation]
            }
            Self::AwaitingConfirmation => &[
                Self::SelectingEditField,
                Self::AwaitingDuplicateConfirmation,
                Self::SavingData,
            ],
            Self::SelectingEditField => &[
                Self::AwaitingEditInput,
                Self::AwaitingBranchEdit,
                Self::AwaitingConfirmation,
            ],
            Self::AwaitingPdfName | Self::AwaitingDuplicateConfirmation => &[Self::SavingData],
            Self::SavingData => &[Self::AwaitingDuplicateConfirmation],
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No session for the user
    #[error("no active session")]
    NotFound,
    /// Session existed but timed out
    #[error("session expired")]
    Expired,
    /// Step not reachable from the current one (stale button)
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: SessionState,
        /// Requested state
        to: SessionState,
    },
}

/// State of one user's document workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    /// Telegram user id
    pub user_id: i64,
    /// Current step
    pub state: SessionState,
    /// Photo or PDF
    pub workflow: Option<WorkflowType>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last user interaction
    pub last_activity: DateTime<Utc>,
    /// Telegram file id of the upload
    pub file_id: Option<String>,
    /// Upload size in bytes
    pub file_size: Option<u64>,
    /// File name as sent (PDF)
    pub original_filename: Option<String>,
    /// Name typed by the user (PDF)
    pub custom_filename: Option<String>,
    /// Selected branch code
    pub branch: Option<String>,
    /// Sheet tab of the branch
    pub sheet_name: Option<String>,
    /// Store name from the photo caption
    pub nama_toko: Option<String>,
    /// Extracted data
    pub document: Option<DocumentData>,
    /// Field awaiting a typed value
    pub edit_field: Option<EditableField>,
    /// Last prompt sent by the bot, deleted after an edit
    pub last_bot_message_id: Option<i32>,
    /// Number of updates handled
    pub total_interactions: u32,
    /// Number of failures shown to the user
    pub error_count: u32,
}

impl UserSession {
    /// Empty idle session
    #[must_use]
    pub fn new(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            state: SessionState::Idle,
            workflow: None,
            created_at: now,
            last_activity: now,
            file_id: None,
            file_size: None,
            original_filename: None,
            custom_filename: None,
            branch: None,
            sheet_name: None,
            nama_toko: None,
            document: None,
            edit_field: None,
            last_bot_message_id: None,
            total_interactions: 0,
            error_count: 0,
        }
    }

    /// Records activity
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.total_interactions = self.total_interactions.saturating_add(1);
    }

    /// True once the session has been idle longer than `timeout`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_activity > timeout
    }

    /// Time since creation
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Time since last activity
    #[must_use]
    pub fn idle(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }

    /// Whether `next` is reachable from the current state
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        next == SessionState::Idle || self.state.successors().contains(&next)
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` otherwise; the state is left unchanged.
    pub fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(user_id = self.user_id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Multi-line summary for `/status`
    #[must_use]
    pub fn status_summary(&self, now: DateTime<Utc>) -> String {
        let mut lines = vec![
            format!("📊 State: {}", self.state),
            format!("⏰ Umur sesi: {}", format_duration(self.age(now).num_seconds())),
            format!("💤 Idle: {}", format_duration(self.idle(now).num_seconds())),
        ];
        if let Some(workflow) = self.workflow {
            lines.push(format!("🔄 Workflow: {}", workflow.as_str()));
        }
        if let Some(branch) = &self.branch {
            lines.push(format!("🏢 Cabang: {branch}"));
        }
        lines.push(format!("🔁 Interaksi: {}", self.total_interactions));
        lines
            .iter()
            .map(|l| html_escape::encode_text(l).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of [`SessionStore::lookup`]
#[derive(Debug, Clone)]
pub enum SessionLookup {
    /// Live session (snapshot)
    Active(Box<UserSession>),
    /// Session timed out and was removed
    Expired,
    /// No session
    Missing,
}

/// Aggregated numbers for `/admin_stats`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions held, expired included
    pub total: usize,
    /// Sessions not yet expired
    pub active: usize,
    /// Active sessions per state name
    pub by_state: BTreeMap<&'static str, usize>,
    /// Active sessions per workflow
    pub by_workflow: BTreeMap<&'static str, usize>,
    /// Errors across active sessions
    pub total_errors: u32,
}

/// In-memory session map keyed by Telegram user id
pub struct SessionStore {
    sessions: RwLock<HashMap<i64, UserSession>>,
    timeout: Duration,
    max_sessions: usize,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new(timeout: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Inactivity timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stores a new session for its user, replacing any previous one.
    ///
    /// When the store is full, expired sessions are swept first and then the
    /// least recently active session is evicted.
    pub async fn start(&self, session: UserSession, now: DateTime<Utc>) {
        let mut sessions = self.sessions.write().await;

        if !sessions.contains_key(&session.user_id) && sessions.len() >= self.max_sessions {
            sessions.retain(|_, s| !s.is_expired(now, self.timeout));
            if sessions.len() >= self.max_sessions {
                let oldest = sessions
                    .values()
                    .min_by_key(|s| s.last_activity)
                    .map(|s| s.user_id);
                if let Some(user_id) = oldest {
                    info!(user_id, "Session store full, evicting least recent session");
                    sessions.remove(&user_id);
                }
            }
        }

        sessions.insert(session.user_id, session);
    }

    /// Snapshot of the user's session; an expired one is removed and
    /// reported as [`SessionLookup::Expired`].
    pub async fn lookup(&self, user_id: i64, now: DateTime<Utc>) -> SessionLookup {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(&user_id) {
                None => return SessionLookup::Missing,
                Some(s) if !s.is_expired(now, self.timeout) => {
                    return SessionLookup::Active(Box::new(s.clone()))
                }
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write().await;
        match sessions.get(&user_id) {
            Some(s) if s.is_expired(now, self.timeout) => {
                sessions.remove(&user_id);
                info!(user_id, "Session expired");
                SessionLookup::Expired
            }
            Some(s) => SessionLookup::Active(Box::new(s.clone())),
            None => SessionLookup::Missing,
        }
    }

    /// Applies `f` to the live session and records the activity.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Expired` if there is no live session.
    pub async fn update<F, R>(&self, user_id: i64, now: DateTime<Utc>, f: F) -> Result<R, SessionError>
    where
        F: FnOnce(&mut UserSession) -> R,
    {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&user_id) else {
            return Err(SessionError::NotFound);
        };
        if session.is_expired(now, self.timeout) {
            sessions.remove(&user_id);
            return Err(SessionError::Expired);
        }
        session.touch(now);
        Ok(f(session))
    }

    /// Applies a fallible step and then moves to `next`, all under one lock.
    /// Nothing changes if the transition is illegal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Expired` or `InvalidTransition`.
    pub async fn advance<F>(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
        next: SessionState,
        f: F,
    ) -> Result<UserSession, SessionError>
    where
        F: FnOnce(&mut UserSession),
    {
        self.update(user_id, now, |session| {
            if !session.can_transition_to(next) {
                return Err(SessionError::InvalidTransition {
                    from: session.state,
                    to: next,
                });
            }
            f(session);
            session.transition(next)?;
            Ok(session.clone())
        })
        .await?
    }

    /// Drops the user's session, returning whether one existed
    pub async fn clear(&self, user_id: i64) -> bool {
        self.sessions.write().await.remove(&user_id).is_some()
    }

    /// Removes every expired session, returning how many were dropped
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, self.timeout));
        before - sessions.len()
    }

    /// Session statistics
    pub async fn stats(&self, now: DateTime<Utc>) -> SessionStats {
        let sessions = self.sessions.read().await;
        let mut stats = SessionStats {
            total: sessions.len(),
            ..SessionStats::default()
        };

        for session in sessions.values().filter(|s| !s.is_expired(now, self.timeout)) {
            stats.active += 1;
            *stats.by_state.entry(session.state.as_str()).or_default() += 1;
            if let Some(workflow) = session.workflow {
                *stats.by_workflow.entry(workflow.as_str()).or_default() += 1;
            }
            stats.total_errors = stats.total_errors.saturating_add(session.error_count);
        }
        stats
    }

    /// Spawns the periodic expired-session sweep
    pub fn spawn_cleanup_task(
        self: Arc<Self>,
        interval: std::time::Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.cleanup_expired(Utc::now()).await;
                        if removed > 0 {
                            info!(removed, "Cleaned up expired sessions");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-15T08:00:00Z")
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_default()
    }

    fn store() -> SessionStore {
        SessionStore::new(Duration::minutes(30), 100)
    }

    fn photo_session(user_id: i64, now: DateTime<Utc>) -> UserSession {
        let mut session = UserSession::new(user_id, now);
        session.workflow = Some(WorkflowType::Photo);
        session.file_id = Some("file-1".to_string());
        session.state = SessionState::AwaitingBranch;
        session
    }

    #[test]
    fn test_transition_table() {
        let mut session = UserSession::new(1, t0());
        assert!(session.transition(SessionState::AwaitingBranch).is_ok());
        assert!(session.transition(SessionState::ProcessingAi).is_ok());
        assert!(session.transition(SessionState::AwaitingNpwpType).is_ok());
        assert!(session.transition(SessionState::AwaitingConfirmation).is_ok());
        assert!(session.transition(SessionState::SavingData).is_ok());
        assert!(session
            .transition(SessionState::AwaitingDuplicateConfirmation)
            .is_ok());
        assert!(session.transition(SessionState::SavingData).is_ok());

        assert_eq!(
            session.transition(SessionState::AwaitingEditInput),
            Err(SessionError::InvalidTransition {
                from: SessionState::SavingData,
                to: SessionState::AwaitingEditInput,
            })
        );
        assert_eq!(session.state, SessionState::SavingData);
    }

    #[test]
    fn test_idle_always_reachable() {
        for state in SessionState::ALL {
            let mut session = UserSession::new(1, t0());
            session.state = state;
            assert!(session.can_transition_to(SessionState::Idle), "{state}");
        }
    }

    #[test]
    fn test_expiry_uses_last_activity() {
        let mut session = UserSession::new(1, t0());
        let timeout = Duration::minutes(30);

        assert!(!session.is_expired(t0() + Duration::minutes(30), timeout));
        assert!(session.is_expired(t0() + Duration::minutes(31), timeout));

        session.touch(t0() + Duration::minutes(20));
        assert!(!session.is_expired(t0() + Duration::minutes(45), timeout));
        assert_eq!(session.age(t0() + Duration::minutes(45)).num_minutes(), 45);
        assert_eq!(session.idle(t0() + Duration::minutes(45)).num_minutes(), 25);
    }

    #[tokio::test]
    async fn test_lookup_removes_expired_session() {
        let store = store();
        store.start(photo_session(7, t0()), t0()).await;

        assert!(matches!(
            store.lookup(7, t0() + Duration::minutes(10)).await,
            SessionLookup::Active(_)
        ));
        assert!(matches!(
            store.lookup(7, t0() + Duration::minutes(31)).await,
            SessionLookup::Expired
        ));
        assert!(matches!(
            store.lookup(7, t0() + Duration::minutes(32)).await,
            SessionLookup::Missing
        ));
    }

    #[tokio::test]
    async fn test_update_touches_session() {
        let store = store();
        store.start(photo_session(7, t0()), t0()).await;

        let branch = store
            .update(7, t0() + Duration::minutes(25), |s| {
                s.branch = Some("BJ".to_string());
                s.branch.clone()
            })
            .await;
        assert_eq!(branch, Ok(Some("BJ".to_string())));

        // still alive 50 minutes after start because activity moved forward
        assert!(matches!(
            store.lookup(7, t0() + Duration::minutes(50)).await,
            SessionLookup::Active(_)
        ));
        assert_eq!(
            store.update(8, t0(), |_| ()).await,
            Err(SessionError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_advance_rejects_stale_step() {
        let store = store();
        store.start(photo_session(7, t0()), t0()).await;

        let result = store
            .advance(7, t0(), SessionState::SavingData, |s| {
                s.branch = Some("SBY".to_string());
            })
            .await;
        assert!(matches!(
            result,
            Err(SessionError::InvalidTransition { .. })
        ));

        let SessionLookup::Active(session) = store.lookup(7, t0()).await else {
            panic!("session should still exist");
        };
        assert_eq!(session.branch, None);
        assert_eq!(session.state, SessionState::AwaitingBranch);

        let advanced = store
            .advance(7, t0(), SessionState::ProcessingAi, |s| {
                s.branch = Some("SBY".to_string());
            })
            .await;
        assert_eq!(advanced.map(|s| s.state), Ok(SessionState::ProcessingAi));
    }

    #[tokio::test]
    async fn test_advance_after_clear_is_not_found() {
        let store = store();
        store.start(photo_session(7, t0()), t0()).await;
        store
            .advance(7, t0(), SessionState::ProcessingAi, |_| ())
            .await
            .expect("branch chosen");

        assert!(store.clear(7).await);
        let late = store
            .advance(7, t0(), SessionState::AwaitingConfirmation, |_| ())
            .await;
        assert_eq!(late.map(|s| s.state), Err(SessionError::NotFound));
        assert!(matches!(store.lookup(7, t0()).await, SessionLookup::Missing));
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let store = SessionStore::new(Duration::minutes(30), 2);
        store.start(photo_session(1, t0()), t0()).await;
        store
            .start(photo_session(2, t0() + Duration::minutes(1)), t0())
            .await;
        store
            .start(photo_session(3, t0() + Duration::minutes(2)), t0())
            .await;

        let now = t0() + Duration::minutes(3);
        assert!(matches!(store.lookup(1, now).await, SessionLookup::Missing));
        assert!(matches!(store.lookup(2, now).await, SessionLookup::Active(_)));
        assert!(matches!(store.lookup(3, now).await, SessionLookup::Active(_)));
    }

    #[tokio::test]
    async fn test_cleanup_and_stats() {
        let store = store();
        store.start(photo_session(1, t0()), t0()).await;
        let mut pdf = UserSession::new(2, t0() + Duration::minutes(20));
        pdf.workflow = Some(WorkflowType::Pdf);
        pdf.state = SessionState::AwaitingPdfName;
        store.start(pdf, t0()).await;

        let now = t0() + Duration::minutes(40);
        let stats = store.stats(now).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.by_state.get("awaiting_pdf_name"), Some(&1));
        assert_eq!(stats.by_workflow.get("pdf"), Some(&1));

        assert_eq!(store.cleanup_expired(now).await, 1);
        assert!(store.clear(2).await);
        assert!(!store.clear(2).await);
    }

    #[test]
    fn test_status_summary() {
        let mut session = photo_session(1, t0());
        session.branch = Some("SMD-BPN".to_string());
        let summary = session.status_summary(t0() + Duration::minutes(5));

        assert!(summary.contains("awaiting_branch"));
        assert!(summary.contains("Umur sesi: 5 menit"));
        assert!(summary.contains("Workflow: photo"));
        assert!(summary.contains("Cabang: SMD-BPN"));
    }
}

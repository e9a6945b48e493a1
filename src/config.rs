//! Configuration and settings management
//!
//! Loads settings from environment variables (and optional `config/*` files)
//! and defines the branch directory and runtime constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Built-in Drive parent folder per branch code
pub const DEFAULT_FOLDER_MAP: &[(&str, &str)] = &[
    ("BJ", "1B8-vxVXYjcG5m7aqnqFHjuShphvfjMo4"),
    ("BJM", "15rLbNaQ-_DvExm86HBlevGqcTLJYkT0v"),
    ("SBY", "15pjmJNcr2bdxDKBwm6DZmGm4FebQfZ0W"),
    ("SMD-BPN", "1-DJINheeXhZT-ugOCAI0v8VnQOT4Zqo3"),
    ("SMG", "1-BbhmDkHanpCBgLyl46NeBXa-B_ByYBh"),
];

/// Built-in sheet tab name per branch code
pub const DEFAULT_SHEET_MAP: &[(&str, &str)] = &[
    ("BJ", "NPWPKTP BJ (NEW)"),
    ("BJM", "NPWPKTP BBN SBY-BJM (NEW)"),
    ("SBY", "NPWPKTP BBN SBY-BJM (NEW)"),
    ("SMD-BPN", "NPWPKTP BBN SMD-BPP (NEW)"),
    ("SMG", "NPWPKTP BBN SMG (NEW)"),
];

/// Drive subfolder for archived document photos
pub const PHOTO_SUBFOLDER: &str = "Sudah diinput";
/// Drive subfolder for archived PDFs
pub const PDF_SUBFOLDER: &str = "PDF";

/// OAuth scopes required by the bot
pub const GOOGLE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/spreadsheets",
];

// Telegram API retry configuration
/// Initial backoff for Telegram file operations
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for a single backoff step
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Retries after the first attempt
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

// AI extraction retry configuration
/// Total extraction attempts per document
pub const AI_MAX_ATTEMPTS: usize = 3;
/// Scale of the extraction backoff; delays are `2^n` times this (2s, 4s, ...)
pub const AI_BACKOFF_FACTOR_MS: u64 = 1000;
/// Upper bound for a single extraction backoff step
pub const AI_MAX_BACKOFF_MS: u64 = 20_000;
/// Maximum tokens requested from the vision model
pub const AI_MAX_TOKENS: u32 = 1000;
/// Sampling temperature for extraction
pub const AI_TEMPERATURE: f32 = 0.1;

// Session housekeeping
/// Interval between expired-session sweeps
pub const SESSION_CLEANUP_INTERVAL_SECS: u64 = 300;

// Google Drive folder cache
/// Time-to-live of cached folder ids
pub const FOLDER_CACHE_TTL_SECS: u64 = 3600;
/// Maximum cached folder ids
pub const FOLDER_CACHE_MAX_SIZE: u64 = 1000;

/// Supported AI vision backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiService {
    /// `OpenAI` chat completions with image input
    OpenAi,
    /// `DeepSeek` chat completions
    DeepSeek,
}

impl AiService {
    /// Parses the `ACTIVE_AI_SERVICE` value (case-insensitive)
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "deepseek" => Some(Self::DeepSeek),
            _ => None,
        }
    }

    /// Lowercase service name as used in configuration and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
        }
    }
}

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    #[serde(default)]
    pub telegram_bot_token: String,
    /// Target spreadsheet id
    #[serde(default)]
    pub google_sheet_id: String,

    /// Active AI backend (`openai` or `deepseek`)
    #[serde(default = "default_ai_service")]
    pub active_ai_service: String,
    /// `OpenAI` API key
    pub openai_api_key: Option<String>,
    /// `OpenAI` vision model
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// `DeepSeek` API key
    pub deepseek_api_key: Option<String>,
    /// `DeepSeek` vision model
    #[serde(default = "default_deepseek_model")]
    pub deepseek_model: String,
    /// HTTP timeout for AI calls
    #[serde(default = "default_ai_timeout")]
    pub ai_timeout_secs: u64,

    /// HTTP timeout for Google API calls
    #[serde(default = "default_google_timeout")]
    pub google_api_timeout_secs: u64,
    /// OAuth client file (`installed` or `web` section)
    #[serde(default = "default_credentials_file")]
    pub google_credentials_file: String,
    /// Authorized-user token file
    #[serde(default = "default_token_file")]
    pub google_token_file: String,

    /// Photo size limit in megabytes
    #[serde(default = "default_max_image_mb")]
    pub max_image_size_mb: u64,
    /// PDF size limit in megabytes
    #[serde(default = "default_max_pdf_mb")]
    pub max_pdf_size_mb: u64,
    /// Inactivity period after which a session expires
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: i64,
    /// Upper bound of simultaneously tracked sessions
    #[serde(default = "default_max_sessions")]
    pub max_concurrent_sessions: usize,

    /// Check columns F/G/H for existing ids before appending
    #[serde(default = "default_true")]
    pub enable_duplicate_check: bool,
    /// Run field validators on AI output and edits
    #[serde(default = "default_true")]
    pub enable_data_validation: bool,
    /// Emit structured user-action log lines
    #[serde(default = "default_true")]
    pub enable_audit_log: bool,

    /// Separated list of admin Telegram ids
    #[serde(rename = "admin_user_ids")]
    pub admin_user_ids_str: Option<String>,
    /// Deployment environment label
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Drive parent folder per branch code
    #[serde(skip)]
    pub folder_map: BTreeMap<String, String>,
    /// Sheet tab name per branch code
    #[serde(skip)]
    pub sheet_map: BTreeMap<String, String>,
}

fn default_ai_service() -> String {
    "openai".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_deepseek_model() -> String {
    "deepseek-vision".to_string()
}

const fn default_ai_timeout() -> u64 {
    60
}

const fn default_google_timeout() -> u64 {
    30
}

fn default_credentials_file() -> String {
    "credentials/credentials.json".to_string()
}

fn default_token_file() -> String {
    "credentials/token.json".to_string()
}

const fn default_max_image_mb() -> u64 {
    20
}

const fn default_max_pdf_mb() -> u64 {
    50
}

const fn default_session_timeout() -> i64 {
    30
}

const fn default_max_sessions() -> usize {
    100
}

const fn default_true() -> bool {
    true
}

fn default_environment() -> String {
    "development".to_string()
}

/// Environment variable suffix for a branch code (`SMD-BPN` -> `SMD_BPN`)
fn branch_env_suffix(code: &str) -> String {
    code.replace('-', "_").to_uppercase()
}

/// Builds the folder and sheet maps from the defaults, letting `lookup`
/// override individual entries (`FOLDER_<CODE>`, `SHEET_<CODE>`).
pub fn branch_maps_with<F>(lookup: F) -> (BTreeMap<String, String>, BTreeMap<String, String>)
where
    F: Fn(&str) -> Option<String>,
{
    let resolve = |defaults: &[(&str, &str)], prefix: &str| {
        defaults
            .iter()
            .map(|(code, value)| {
                let key = format!("{prefix}_{}", branch_env_suffix(code));
                let value = lookup(&key)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| (*value).to_string());
                ((*code).to_string(), value)
            })
            .collect::<BTreeMap<_, _>>()
    };

    (
        resolve(DEFAULT_FOLDER_MAP, "FOLDER"),
        resolve(DEFAULT_SHEET_MAP, "SHEET"),
    )
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ktp_npwp_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Environment::default() maps UPPER_SNAKE_CASE to snake_case keys;
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        let (folder_map, sheet_map) = branch_maps_with(|key| std::env::var(key).ok());
        settings.folder_map = folder_map;
        settings.sheet_map = sheet_map;

        Ok(settings)
    }

    /// Checks the loaded settings and reports every problem at once
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` listing all invalid or missing values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.telegram_bot_token.trim().is_empty() {
            errors.push("TELEGRAM_BOT_TOKEN is required".to_string());
        }
        if self.google_sheet_id.trim().is_empty() {
            errors.push("GOOGLE_SHEET_ID is required".to_string());
        }

        match self.ai_service() {
            Some(AiService::OpenAi) if is_blank(self.openai_api_key.as_deref()) => {
                errors.push("OPENAI_API_KEY is required when ACTIVE_AI_SERVICE=openai".to_string());
            }
            Some(AiService::DeepSeek) if is_blank(self.deepseek_api_key.as_deref()) => {
                errors.push(
                    "DEEPSEEK_API_KEY is required when ACTIVE_AI_SERVICE=deepseek".to_string(),
                );
            }
            Some(_) => {}
            None => errors.push(format!(
                "ACTIVE_AI_SERVICE must be 'openai' or 'deepseek', got '{}'",
                self.active_ai_service
            )),
        }

        if !(1..=100).contains(&self.max_image_size_mb) {
            errors.push("MAX_IMAGE_SIZE_MB must be between 1 and 100".to_string());
        }
        if self.max_pdf_size_mb == 0 {
            errors.push("MAX_PDF_SIZE_MB must be positive".to_string());
        }
        if self.session_timeout_minutes <= 0 {
            errors.push("SESSION_TIMEOUT_MINUTES must be positive".to_string());
        }
        if self.max_concurrent_sessions == 0 {
            errors.push("MAX_CONCURRENT_SESSIONS must be positive".to_string());
        }

        for code in self.folder_map.keys() {
            if !self.sheet_map.contains_key(code) {
                errors.push(format!("Branch {code} has a folder but no sheet mapping"));
            }
        }
        for code in self.sheet_map.keys() {
            if !self.folder_map.contains_key(code) {
                errors.push(format!("Branch {code} has a sheet but no folder mapping"));
            }
        }

        for path in [&self.google_credentials_file, &self.google_token_file] {
            if !Path::new(path).exists() {
                errors.push(format!("Google credentials file not found: {path}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Message(errors.join("; ")))
        }
    }

    /// Parsed AI backend, `None` if the configured name is unknown
    #[must_use]
    pub fn ai_service(&self) -> Option<AiService> {
        AiService::parse(&self.active_ai_service)
    }

    /// Returns the set of Telegram IDs allowed to run admin commands
    #[must_use]
    pub fn admin_users(&self) -> HashSet<i64> {
        self.admin_user_ids_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sorted list of configured branch codes
    #[must_use]
    pub fn branches(&self) -> Vec<String> {
        self.folder_map
            .keys()
            .filter(|code| self.sheet_map.contains_key(*code))
            .cloned()
            .collect()
    }

    /// True if the branch has both a folder and a sheet
    #[must_use]
    pub fn is_valid_branch(&self, code: &str) -> bool {
        self.folder_map.contains_key(code) && self.sheet_map.contains_key(code)
    }

    /// Drive parent folder of a branch
    #[must_use]
    pub fn branch_folder(&self, code: &str) -> Option<&str> {
        self.folder_map.get(code).map(String::as_str)
    }

    /// Sheet tab name of a branch
    #[must_use]
    pub fn branch_sheet(&self, code: &str) -> Option<&str> {
        self.sheet_map.get(code).map(String::as_str)
    }

    /// Session inactivity timeout
    #[must_use]
    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_timeout_minutes)
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    let (folder_map, sheet_map) = branch_maps_with(|_| None);
    Settings {
        telegram_bot_token: "123456789:dummy".to_string(),
        google_sheet_id: "sheet-id".to_string(),
        active_ai_service: "openai".to_string(),
        openai_api_key: Some("sk-test".to_string()),
        openai_model: default_openai_model(),
        deepseek_api_key: None,
        deepseek_model: default_deepseek_model(),
        ai_timeout_secs: 60,
        google_api_timeout_secs: 30,
        google_credentials_file: default_credentials_file(),
        google_token_file: default_token_file(),
        max_image_size_mb: 20,
        max_pdf_size_mb: 50,
        session_timeout_minutes: 30,
        max_concurrent_sessions: 100,
        enable_duplicate_check: true,
        enable_data_validation: true,
        enable_audit_log: true,
        admin_user_ids_str: None,
        environment: "test".to_string(),
        folder_map,
        sheet_map,
    }
}

use dotenvy::dotenv;
use ktp_npwp_bot::bot::{self, get_user_id_safe, Command};
use ktp_npwp_bot::config::{Settings, SESSION_CLEANUP_INTERVAL_SECS};
use ktp_npwp_bot::google::{
    self, ArchiveService, DriveClient, GoogleAuth, SheetsClient, TokenSource,
};
use ktp_npwp_bot::llm::AiClient;
use ktp_npwp_bot::session::SessionStore;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    api_key: Regex,
    access_token: Regex,
    refresh_json: Regex,
    refresh_form: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            api_key: Regex::new(r"sk-[A-Za-z0-9_-]{16,}")?,
            access_token: Regex::new(r"ya29\.[A-Za-z0-9._-]+")?,
            refresh_json: Regex::new(r#"("refresh_token"\s*:\s*")[^"]*(")"#)?,
            refresh_form: Regex::new(r"(refresh_token=)[^\s&]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token1
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token2
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self.api_key.replace_all(&output, "sk-[MASKED]").to_string();
        output = self
            .access_token
            .replace_all(&output, "ya29.[MASKED]")
            .to_string();
        output = self
            .refresh_json
            .replace_all(&output, "${1}[MASKED]${2}")
            .to_string();
        output = self
            .refresh_form
            .replace_all(&output, "${1}[MASKED]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed even though the redacted text
        // may be shorter or longer.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    // Initialize redaction patterns early (before logging)
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(patterns);

    info!("Starting KTP/NPWP intake bot...");

    let settings = init_settings();
    let archive = init_archive(&settings).await;
    let ai_client = init_ai_client(&settings).await;
    let sessions = init_sessions(&settings);

    let cancel = CancellationToken::new();
    let cleanup = sessions.clone().spawn_cleanup_task(
        Duration::from_secs(SESSION_CLEANUP_INTERVAL_SECS),
        cancel.clone(),
    );

    let bot = Bot::new(settings.telegram_bot_token.clone());
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![settings, sessions, ai_client, archive])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    cancel.cancel();
    if let Err(e) = cleanup.await {
        warn!("Session cleanup task ended abnormally: {e}");
    }
    info!("Bot stopped.");

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!(
        "Configuration loaded successfully ({} environment, {} branches).",
        settings.environment,
        settings.branches().len()
    );
    Arc::new(settings)
}

async fn init_archive(settings: &Arc<Settings>) -> Arc<ArchiveService> {
    let http = google::create_http_client(Duration::from_secs(settings.google_api_timeout_secs));

    let auth = match GoogleAuth::load(
        &settings.google_credentials_file,
        &settings.google_token_file,
    )
    .await
    {
        Ok(auth) => auth,
        Err(e) => {
            error!("Failed to initialize Google credentials: {}", e);
            std::process::exit(1);
        }
    };
    let tokens: Arc<dyn TokenSource> = Arc::new(auth);

    let sheets = Arc::new(SheetsClient::new(
        http.clone(),
        tokens.clone(),
        settings.google_sheet_id.clone(),
    ));
    let drive = Arc::new(DriveClient::new(http, tokens.clone()));
    let archive = ArchiveService::new(settings.clone(), sheets, drive, tokens);

    let health = archive.health().await;
    if health.is_healthy() {
        info!("Google services initialized.\n{}", health.summary());
    } else {
        error!("Google services check reported problems:\n{}", health.summary());
    }

    Arc::new(archive)
}

async fn init_ai_client(settings: &Settings) -> Arc<AiClient> {
    let client = match AiClient::new(settings) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize AI client: {}", e);
            std::process::exit(1);
        }
    };

    match client.health().await {
        Ok(status) => info!("AI service {}: {status}", client.service().as_str()),
        Err(e) => error!("AI service {} health check failed: {e}", client.service().as_str()),
    }
    Arc::new(client)
}

fn init_sessions(settings: &Settings) -> Arc<SessionStore> {
    info!(
        "Initializing SessionStore (timeout: {} min, max: {})",
        settings.session_timeout_minutes, settings.max_concurrent_sessions
    );
    Arc::new(SessionStore::new(
        settings.session_timeout(),
        settings.max_concurrent_sessions,
    ))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback_query))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(handle_photo))
                .branch(
                    dptree::filter(|msg: Message| msg.document().is_some())
                        .endpoint(handle_document),
                )
                .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
                .branch(dptree::endpoint(handle_unsupported)),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
    archive: Arc<ArchiveService>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => bot::handlers::start(bot, msg, sessions, settings).await,
        Command::Help => bot::handlers::help(bot, msg, settings).await,
        Command::Status => bot::handlers::status(bot, msg, sessions, settings).await,
        Command::Cancel => bot::handlers::cancel(bot, msg, sessions, settings).await,
        Command::AdminStats => {
            bot::handlers::admin_stats(bot, msg, sessions, settings, archive).await
        }
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_photo(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    if let Err(e) = bot::handlers::handle_photo(bot, msg, sessions, settings).await {
        error!("Photo handler error for {}: {}", user_id, e);
    }
    respond(())
}

async fn handle_document(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    if let Err(e) = bot::handlers::handle_document(bot, msg, sessions, settings).await {
        error!("Document handler error for {}: {}", user_id, e);
    }
    respond(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
    archive: Arc<ArchiveService>,
) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    if let Err(e) =
        Box::pin(bot::handlers::handle_text(bot, msg, sessions, settings, archive)).await
    {
        error!("Text handler error for {}: {}", user_id, e);
    }
    respond(())
}

async fn handle_unsupported(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_unsupported(bot, msg).await {
        error!("Unsupported message handler error: {}", e);
    }
    respond(())
}

async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    sessions: Arc<SessionStore>,
    settings: Arc<Settings>,
    ai: Arc<AiClient>,
    archive: Arc<ArchiveService>,
) -> Result<(), teloxide::RequestError> {
    let user_id = q.from.id.0;
    if let Err(e) =
        Box::pin(bot::handle_callback(bot, q, sessions, settings, ai, archive)).await
    {
        error!("Callback handler error for {}: {}", user_id, e);
    }
    respond(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> RedactionPatterns {
        RedactionPatterns::new().expect("patterns compile")
    }

    #[test]
    fn test_redacts_telegram_token_in_url() {
        let line = "POST https://api.telegram.org/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw/getUpdates failed";
        let out = patterns().redact(line);
        assert!(out.contains("/bot[TELEGRAM_TOKEN]/"));
        assert!(!out.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw"));
    }

    #[test]
    fn test_redacts_ai_and_google_secrets() {
        let out = patterns().redact(
            r#"key sk-proj-abcdefghijklmnop1234 token ya29.a0AfB_byC-xyz refresh_token=1//0gabc&x=1 {"refresh_token": "1//0gsecret"}"#,
        );
        assert!(out.contains("sk-[MASKED]"));
        assert!(out.contains("ya29.[MASKED]"));
        assert!(out.contains("refresh_token=[MASKED]&x=1"));
        assert!(out.contains(r#""refresh_token": "[MASKED]""#));
        assert!(!out.contains("1//0gsecret"));
        assert!(!out.contains("abcdefghijklmnop1234"));
    }
}

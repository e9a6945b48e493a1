use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use ktp_npwp_bot::config::Settings;
use ktp_npwp_bot::google::{
    self, ArchiveService, DriveClient, GoogleAuth, SheetsClient, TokenSource,
};
use ktp_npwp_bot::llm::AiClient;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::test]
#[ignore = "Requires real credentials"]
async fn test_google_services_reachable() -> Result<()> {
    load_dotenv();
    init_tracing();

    let settings = Arc::new(load_settings()?);
    let http = google::create_http_client(Duration::from_secs(settings.google_api_timeout_secs));
    let tokens: Arc<dyn TokenSource> = Arc::new(
        GoogleAuth::load(
            &settings.google_credentials_file,
            &settings.google_token_file,
        )
        .await?,
    );

    let sheets = Arc::new(SheetsClient::new(
        http.clone(),
        tokens.clone(),
        settings.google_sheet_id.clone(),
    ));
    let drive = Arc::new(DriveClient::new(http, tokens.clone()));
    let archive = ArchiveService::new(settings, sheets, drive, tokens);

    let health = archive.health().await;
    info!("Google health:\n{}", health.summary());
    if !health.is_healthy() {
        return Err(anyhow!("Google services unhealthy:\n{}", health.summary()));
    }
    Ok(())
}

#[tokio::test]
#[ignore = "Requires real credentials"]
async fn test_ai_service_reachable() -> Result<()> {
    load_dotenv();
    init_tracing();

    let settings = load_settings()?;
    let client = AiClient::new(&settings)?;
    let status = client.health().await?;
    info!("AI service {}: {status}", client.service().as_str());
    Ok(())
}

#[test]
#[ignore = "Requires real credentials"]
fn test_telegram_token_format() -> Result<()> {
    load_dotenv();
    let settings = load_settings()?;
    let (id, secret) = settings
        .telegram_bot_token
        .split_once(':')
        .ok_or_else(|| anyhow!("TELEGRAM_BOT_TOKEN has no ':' separator"))?;
    assert!(id.chars().all(|c| c.is_ascii_digit()), "bot id must be numeric");
    assert!(secret.len() >= 30, "bot secret looks truncated");
    Ok(())
}

fn load_dotenv() {
    let env_path = Path::new("../.env");
    if env_path.exists() {
        let _ = dotenvy::from_path(env_path);
    } else {
        dotenv().ok();
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn load_settings() -> Result<Settings> {
    let settings = Settings::new()?;
    settings.validate()?;
    info!(
        "Loaded settings for {} branches ({} service)",
        settings.branches().len(),
        settings.active_ai_service
    );
    Ok(settings)
}

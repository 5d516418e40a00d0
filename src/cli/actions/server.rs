use crate::{
    api,
    verifier::{LogNotifier, Notifier, VerifierConfig, WebhookNotifier},
};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub db_max_connections: u32,
    pub code_ttl_seconds: u64,
    pub code_length: usize,
    pub sweep_interval_seconds: u64,
    pub notify_url: Option<String>,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("dsn", &redact_dsn(self.dsn.expose_secret()))
            .field("db_max_connections", &self.db_max_connections)
            .field("code_ttl_seconds", &self.code_ttl_seconds)
            .field("code_length", &self.code_length)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field("notify_url", &self.notify_url)
            .finish()
    }
}

/// Strip the password from a connection string before it is logged.
fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("***")).is_err() {
                return "***".to_string();
            }
            url.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the notifier cannot be built, the database is unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    info!(
        "Starting {} on port {} with database {}",
        env!("CARGO_PKG_NAME"),
        args.port,
        redact_dsn(args.dsn.expose_secret())
    );

    let config = VerifierConfig::new()
        .with_code_ttl_seconds(args.code_ttl_seconds)
        .with_code_length(args.code_length)
        .with_sweep_interval_seconds(args.sweep_interval_seconds);

    let notifier: Arc<dyn Notifier> = if let Some(url) = args.notify_url {
        Arc::new(WebhookNotifier::new(url)?)
    } else {
        warn!("No notify URL configured, verification codes will only be logged");
        Arc::new(LogNotifier)
    };

    api::new(
        args.port,
        &args.dsn,
        args.db_max_connections,
        config,
        notifier,
    )
    .await
}

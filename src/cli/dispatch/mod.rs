//! Map validated CLI arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::registration;
use anyhow::{Context, Result};
use secrecy::SecretString;
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or the notify URL is invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let db_max_connections = matches
        .get_one::<u32>("db-max-connections")
        .copied()
        .unwrap_or(5);

    let options = registration::Options::parse(matches);

    if let Some(url) = &options.notify_url {
        let parsed = Url::parse(url).with_context(|| format!("invalid VOUCH_NOTIFY_URL: {url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("VOUCH_NOTIFY_URL must use http or https: {url}");
        }
    }

    Ok(Action::Server(Args {
        port,
        dsn: SecretString::from(dsn),
        db_max_connections,
        code_ttl_seconds: options.code_ttl_seconds,
        code_length: options.code_length,
        sweep_interval_seconds: options.sweep_interval_seconds,
        notify_url: options.notify_url,
    }))
}

//! Verification notifications.
//!
//! The workflow hands each freshly issued code to a `Notifier`. Delivery is
//! best effort: a failed send is logged by the caller and never undoes the
//! pending-record write, the user can always ask for a resend.
//!
//! The default notifier for local dev is `LogNotifier`, which logs and returns
//! `Ok(())`. `WebhookNotifier` posts the message as JSON to a mail relay.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{Instrument, info, info_span};

pub const VERIFY_TEMPLATE: &str = "verify_registration";

#[derive(Clone, Debug, Serialize)]
pub struct VerificationMessage {
    pub to_email: String,
    pub username: String,
    pub code: String,
    /// Human-readable lifetime, e.g. "3 minutes".
    pub expires_in: String,
    pub expires_at: DateTime<Utc>,
}

impl VerificationMessage {
    #[must_use]
    pub fn expiry_statement(&self) -> String {
        format!("This code expires in {}.", self.expires_in)
    }

    #[must_use]
    pub fn body(&self) -> String {
        format!(
            "Hi {}, your verification code is {}. {}",
            self.username,
            self.code,
            self.expiry_statement()
        )
    }
}

/// Delivery abstraction for verification codes.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &VerificationMessage) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &VerificationMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = VERIFY_TEMPLATE,
            expires_at = %message.expires_at,
            body = %message.body(),
            "verification notification stub"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    to_email: &'a str,
    template: &'a str,
    subject: &'a str,
    text: String,
    payload: &'a VerificationMessage,
}

/// Posts messages to an HTTP mail relay.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build webhook client")?;
        Ok(Self { url, client })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &VerificationMessage) -> Result<()> {
        let payload = WebhookPayload {
            to_email: &message.to_email,
            template: VERIFY_TEMPLATE,
            subject: "Verify your email address",
            text: message.body(),
            payload: message,
        };
        let span = info_span!("notify.webhook", http.url = %self.url);
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .instrument(span)
            .await
            .context("failed to reach notification relay")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "notification relay returned {} for {}",
                response.status(),
                self.url
            ));
        }
        Ok(())
    }
}

/// Render a lifetime the way it reads in an email: "3 minutes", "90 seconds".
#[must_use]
pub fn humanize_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let (value, unit) = if seconds >= 3600 && seconds % 3600 == 0 {
        (seconds / 3600, "hour")
    } else if seconds >= 60 && seconds % 60 == 0 {
        (seconds / 60, "minute")
    } else {
        (seconds, "second")
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

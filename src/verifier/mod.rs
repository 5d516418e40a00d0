//! Pending registration workflow.
//!
//! State machine per email:
//!
//! ```text
//! register ──► Pending(live) ──verify(code)──► Verified (row deleted, user created)
//!                  │    ▲
//!                  │    └── resend / re-register (new code + expiry)
//!                  ▼
//!           Pending(expired) ──sweep──► removed (no user)
//! ```
//!
//! Only the most recently issued code is ever valid, and every operation
//! re-checks `expires_at` against the injected clock rather than trusting
//! that the sweep already ran.

pub mod clock;
pub mod error;
pub mod notify;
pub mod password;
pub mod schedule;
pub mod store;
mod utils;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::error::VerifyError;
pub use self::notify::{LogNotifier, Notifier, VerificationMessage, WebhookNotifier};
pub use self::schedule::RecurringTask;
pub use self::store::{
    MemoryRegistrationStore, PendingRegistration, PgRegistrationStore, PromoteOutcome,
    RegistrationStore, User,
};

use self::utils::{
    generate_verification_code, hash_verification_code, normalize_email, valid_code, valid_email,
    valid_password, valid_username,
};

pub const DEFAULT_CODE_TTL_SECONDS: u64 = 3 * 60;
pub const DEFAULT_CODE_LENGTH: usize = 6;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifierConfig {
    code_ttl: Duration,
    code_length: usize,
    sweep_interval: Duration,
}

impl VerifierConfig {
    /// Defaults: 3 minute codes, 6 digits, sweep every 60 seconds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECONDS),
            code_length: DEFAULT_CODE_LENGTH,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: u64) -> Self {
        self.code_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_code_length(mut self, length: usize) -> Self {
        self.code_length = length;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let code_ttl = if self.code_ttl.is_zero() {
            Duration::from_secs(1)
        } else {
            self.code_ttl
        };
        let sweep_interval = if self.sweep_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.sweep_interval
        };
        Self {
            code_ttl,
            code_length: self.code_length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH),
            sweep_interval,
        }
    }

    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    #[must_use]
    pub fn code_length(&self) -> usize {
        self.code_length
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What the caller learns after a code was issued. The code itself only goes
/// to the notifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTicket {
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

pub struct Verifier {
    config: VerifierConfig,
    store: Arc<dyn RegistrationStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Verifier {
    pub fn new(
        config: VerifierConfig,
        store: Arc<dyn RegistrationStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: config.normalize(),
            store,
            notifier,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn RegistrationStore {
        self.store.as_ref()
    }

    /// Start a registration (or restart one) for `email`.
    ///
    /// # Errors
    /// `InvalidInput` for malformed fields, `AlreadyRegistered` if a user with
    /// this email exists, `Internal` on store or hashing failures.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<PendingTicket, VerifyError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(VerifyError::invalid_input("invalid email"));
        }
        let username = username.trim();
        if !valid_username(username) {
            return Err(VerifyError::invalid_input(
                "username must be 3-32 characters of letters, digits, '.', '_' or '-'",
            ));
        }
        if !valid_password(password.expose_secret()) {
            return Err(VerifyError::invalid_input(
                "password must be 8-128 characters",
            ));
        }

        if self.store.user_exists(&email).await? {
            return Err(VerifyError::AlreadyRegistered);
        }

        let password_hash = password::hash_password_blocking(password.clone()).await?;
        let code = generate_verification_code(self.config.code_length());
        let now = self.clock.now();
        let pending = PendingRegistration {
            email: email.clone(),
            username: username.to_string(),
            password_hash,
            code_hash: hash_verification_code(&code),
            created_at: now,
            expires_at: self.expiry_from(now),
        };

        // Upsert: any previous pending record and its code are replaced.
        self.store.upsert_pending(&pending).await?;
        info!("pending registration stored");

        self.dispatch(&pending, code).await;

        Ok(PendingTicket {
            email,
            expires_at: pending.expires_at,
        })
    }

    /// Issue a fresh code for a live pending registration.
    ///
    /// # Errors
    /// `NotFound` when there is no pending record or it has expired,
    /// `AlreadyRegistered` if a user with this email exists.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn resend_verification(&self, email: &str) -> Result<PendingTicket, VerifyError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(VerifyError::invalid_input("invalid email"));
        }
        // Codes only go to addresses without an account.
        if self.store.user_exists(&email).await? {
            return Err(VerifyError::AlreadyRegistered);
        }

        let code = generate_verification_code(self.config.code_length());
        let now = self.clock.now();
        let refreshed = self
            .store
            .refresh_pending(&email, &hash_verification_code(&code), self.expiry_from(now), now)
            .await?;

        let Some(pending) = refreshed else {
            debug!("no live pending registration to refresh");
            return Err(VerifyError::NotFound);
        };
        info!("verification code reissued");

        self.dispatch(&pending, code).await;

        Ok(PendingTicket {
            email,
            expires_at: pending.expires_at,
        })
    }

    /// Promote the pending registration if `code` is the latest issued one and
    /// it has not expired.
    ///
    /// # Errors
    /// `NotFound` if nothing is pending (including after a successful verify),
    /// `ExpiredCode` if the record is past `expires_at` but not yet swept,
    /// `InvalidCode` on mismatch, `AlreadyRegistered` if a user appeared meanwhile.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn verify(&self, email: &str, code: &str) -> Result<User, VerifyError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(VerifyError::invalid_input("invalid email"));
        }

        let now = self.clock.now();
        let Some(pending) = self.store.find_pending(&email).await? else {
            return Err(VerifyError::NotFound);
        };
        if !pending.is_live(now) {
            return Err(VerifyError::ExpiredCode);
        }

        // A malformed code is just another mismatch.
        let code = code.trim();
        let code_hash = hash_verification_code(code);
        if !valid_code(code) || pending.code_hash != code_hash {
            warn!("verification code mismatch");
            return Err(VerifyError::InvalidCode);
        }

        // The read above is advisory; the guarded promote is what decides.
        match self.store.promote(&email, &code_hash, now).await? {
            PromoteOutcome::Promoted(user) => {
                info!(user_id = %user.id, "pending registration promoted");
                Ok(user)
            }
            PromoteOutcome::Missing => {
                debug!("pending registration vanished before promotion");
                Err(VerifyError::NotFound)
            }
            PromoteOutcome::Conflict => Err(VerifyError::AlreadyRegistered),
        }
    }

    /// Remove every pending record whose expiry has passed.
    ///
    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn sweep_expired(&self) -> Result<u64, VerifyError> {
        let removed = self.store.delete_expired(self.clock.now()).await?;
        if removed > 0 {
            info!(removed, "expired pending registrations swept");
        }
        Ok(removed)
    }

    /// Store connectivity for health checks.
    ///
    /// # Errors
    /// Returns the store's error if it is unreachable.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.store.ping().await
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.config.code_ttl())
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    async fn dispatch(&self, pending: &PendingRegistration, code: String) {
        let message = VerificationMessage {
            to_email: pending.email.clone(),
            username: pending.username.clone(),
            code,
            expires_in: notify::humanize_duration(self.config.code_ttl()),
            expires_at: pending.expires_at,
        };
        // Delivery failures never undo the pending write; the user can resend.
        if let Err(err) = self.notifier.send(&message).await {
            error!("failed to send verification notification: {err:#}");
        }
    }
}

/// Wire the expiry sweep onto a recurring task.
pub fn spawn_sweeper(verifier: Arc<Verifier>) -> RecurringTask {
    let period = verifier.config().sweep_interval();
    RecurringTask::spawn("pending-registration-sweep", period, move || {
        let verifier = verifier.clone();
        async move {
            if let Err(err) = verifier.sweep_expired().await {
                error!("pending registration sweep failed: {err:#}");
            }
        }
    })
}

//! Persistence seam for pending registrations and permanent users.
//!
//! Every method is a single atomic step against the backing store. The
//! promotion in particular must delete the pending row and create the user
//! together, and only if the row still carries the expected code hash and has
//! not expired.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

mod memory;
mod postgres;

pub use self::memory::MemoryRegistrationStore;
pub use self::postgres::PgRegistrationStore;

/// An unconfirmed signup awaiting its verification code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRegistration {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub code_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingRegistration {
    /// A record is live strictly before its expiry instant.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A permanent account, only ever created by promotion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Result of the guarded delete-then-create.
#[derive(Debug)]
pub enum PromoteOutcome {
    Promoted(User),
    /// No live row with that code hash; nothing was changed.
    Missing,
    /// A user with this email already exists; the pending row was kept.
    Conflict,
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Cheap connectivity probe used by the health endpoint.
    async fn ping(&self) -> Result<()>;

    async fn user_exists(&self, email: &str) -> Result<bool>;

    async fn find_user(&self, email: &str) -> Result<Option<User>>;

    /// Insert or replace the pending record for `pending.email`.
    async fn upsert_pending(&self, pending: &PendingRegistration) -> Result<()>;

    async fn find_pending(&self, email: &str) -> Result<Option<PendingRegistration>>;

    /// Swap in a new code and expiry, but only on a record still live at `now`.
    /// Returns the updated record, or `None` when there was nothing live to refresh.
    async fn refresh_pending(
        &self,
        email: &str,
        code_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingRegistration>>;

    async fn promote(
        &self,
        email: &str,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PromoteOutcome>;

    /// Delete every pending record with `expires_at <= now`; returns rows removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::PendingRegistration;
    use chrono::{TimeDelta, Utc};

    #[test]
    fn pending_is_live_until_expiry() {
        let now = Utc::now();
        let pending = PendingRegistration {
            email: "a@x.com".to_string(),
            username: "alice".to_string(),
            password_hash: "hash".to_string(),
            code_hash: vec![1, 2, 3],
            created_at: now,
            expires_at: now + TimeDelta::seconds(180),
        };
        assert!(pending.is_live(now));
        assert!(pending.is_live(now + TimeDelta::seconds(179)));
        assert!(!pending.is_live(now + TimeDelta::seconds(180)));
        assert!(!pending.is_live(now + TimeDelta::seconds(181)));
    }
}

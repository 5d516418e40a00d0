//! In-process store backed by a single mutex.
//!
//! Holding one lock across each method gives the same all-or-nothing
//! behaviour the Postgres store gets from transactions. Used by tests and
//! local runs without a database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PendingRegistration, PromoteOutcome, RegistrationStore, User};

#[derive(Debug, Default)]
struct State {
    pending: HashMap<String, PendingRegistration>,
    users: HashMap<String, User>,
}

#[derive(Debug, Default)]
pub struct MemoryRegistrationStore {
    state: Mutex<State>,
}

impl MemoryRegistrationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending records, live or not.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }
}

#[async_trait]
impl RegistrationStore for MemoryRegistrationStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn user_exists(&self, email: &str) -> Result<bool> {
        Ok(self.state.lock().await.users.contains_key(email))
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(email).cloned())
    }

    async fn upsert_pending(&self, pending: &PendingRegistration) -> Result<()> {
        self.state
            .lock()
            .await
            .pending
            .insert(pending.email.clone(), pending.clone());
        Ok(())
    }

    async fn find_pending(&self, email: &str) -> Result<Option<PendingRegistration>> {
        Ok(self.state.lock().await.pending.get(email).cloned())
    }

    async fn refresh_pending(
        &self,
        email: &str,
        code_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingRegistration>> {
        let mut state = self.state.lock().await;
        let Some(pending) = state.pending.get_mut(email) else {
            return Ok(None);
        };
        if !pending.is_live(now) {
            return Ok(None);
        }
        pending.code_hash = code_hash.to_vec();
        pending.expires_at = expires_at;
        Ok(Some(pending.clone()))
    }

    async fn promote(
        &self,
        email: &str,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PromoteOutcome> {
        let mut state = self.state.lock().await;

        let matches = state
            .pending
            .get(email)
            .is_some_and(|pending| pending.code_hash == code_hash && pending.is_live(now));
        if !matches {
            return Ok(PromoteOutcome::Missing);
        }
        if state.users.contains_key(email) {
            return Ok(PromoteOutcome::Conflict);
        }

        let Some(pending) = state.pending.remove(email) else {
            return Ok(PromoteOutcome::Missing);
        };
        let user = User {
            id: Uuid::now_v7(),
            email: pending.email,
            username: pending.username,
            password_hash: pending.password_hash,
            created_at: now,
        };
        state.users.insert(user.email.clone(), user.clone());

        Ok(PromoteOutcome::Promoted(user))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.retain(|_, pending| pending.is_live(now));
        Ok(u64::try_from(before - state.pending.len()).unwrap_or(u64::MAX))
    }
}

//! Postgres-backed registration store.
//!
//! Timestamps are bound from the caller's clock instead of `NOW()` so expiry
//! decisions stay consistent with the rest of the workflow.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{PendingRegistration, PromoteOutcome, RegistrationStore, User};

pub const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/01_vouch.sql"
));

#[derive(Clone, Debug)]
pub struct PgRegistrationStore {
    pool: PgPool,
}

impl PgRegistrationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DDL",
            db.statement = "01_vouch.sql"
        );
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to apply schema")?;
        Ok(())
    }
}

fn pending_from_row(row: &PgRow) -> PendingRegistration {
    PendingRegistration {
        email: row.get("email"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        code_hash: row.get("code_hash"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl RegistrationStore for PgRegistrationStore {
    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")?;
        Ok(())
    }

    async fn user_exists(&self, email: &str) -> Result<bool> {
        let query = "SELECT 1 FROM users WHERE email = $1 LIMIT 1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user")?;
        Ok(row.is_some())
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>> {
        let query = r"
            SELECT id, email, username, password_hash, created_at
            FROM users
            WHERE email = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch user")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn upsert_pending(&self, pending: &PendingRegistration) -> Result<()> {
        // Last writer wins: a newer registration replaces the code and expiry.
        let query = r"
            INSERT INTO pending_registrations
                (email, username, password_hash, code_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO UPDATE
            SET username = EXCLUDED.username,
                password_hash = EXCLUDED.password_hash,
                code_hash = EXCLUDED.code_hash,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&pending.email)
            .bind(&pending.username)
            .bind(&pending.password_hash)
            .bind(&pending.code_hash)
            .bind(pending.created_at)
            .bind(pending.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert pending registration")?;
        Ok(())
    }

    async fn find_pending(&self, email: &str) -> Result<Option<PendingRegistration>> {
        let query = r"
            SELECT email, username, password_hash, code_hash, created_at, expires_at
            FROM pending_registrations
            WHERE email = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch pending registration")?;
        Ok(row.as_ref().map(pending_from_row))
    }

    async fn refresh_pending(
        &self,
        email: &str,
        code_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingRegistration>> {
        let query = r"
            UPDATE pending_registrations
            SET code_hash = $2,
                expires_at = $3
            WHERE email = $1
              AND expires_at > $4
            RETURNING email, username, password_hash, code_hash, created_at, expires_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .bind(code_hash)
            .bind(expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to refresh pending registration")?;
        Ok(row.as_ref().map(pending_from_row))
    }

    async fn promote(
        &self,
        email: &str,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PromoteOutcome> {
        // The conditional delete is the guard: if a sweep, a re-registration or a
        // concurrent verify got there first, nothing is deleted and no user is created.
        let mut tx = self.pool.begin().await.context("begin promote transaction")?;

        let query = r"
            DELETE FROM pending_registrations
            WHERE email = $1
              AND code_hash = $2
              AND expires_at > $3
            RETURNING email, username, password_hash
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .bind(code_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to claim pending registration")?;

        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Ok(PromoteOutcome::Missing);
        };

        let user = User {
            id: Uuid::now_v7(),
            email: row.get("email"),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            created_at: now,
        };

        let query = r"
            INSERT INTO users (id, email, username, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let inserted = sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(user.created_at)
            .execute(&mut *tx)
            .instrument(span)
            .await;

        if let Err(err) = inserted {
            let _ = tx.rollback().await;
            if is_unique_violation(&err) {
                return Ok(PromoteOutcome::Conflict);
            }
            return Err(err).context("failed to insert user");
        }

        tx.commit().await.context("commit promote transaction")?;

        Ok(PromoteOutcome::Promoted(user))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM pending_registrations WHERE expires_at <= $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete expired pending registrations")?;
        Ok(result.rows_affected())
    }
}

//! # Vouch (pending registration verification)
//!
//! `vouch` holds unconfirmed signups in a temporary area keyed by email and
//! only promotes them to permanent users once the owner of the address proves
//! control of it with a short-lived numeric code.
//!
//! ## Lifecycle
//!
//! - **Register:** the password is hashed (Argon2id), a numeric code is issued and
//!   the pending record is upserted. Registering the same email again replaces the
//!   previous record and invalidates its code.
//! - **Resend:** a live pending record gets a fresh code and expiry. Expired records
//!   are treated as absent.
//! - **Verify:** the latest code, presented before expiry, promotes the record to a
//!   user. The delete of the pending row and the insert of the user happen in one
//!   guarded step, so a record is promoted at most once.
//! - **Sweep:** a recurring task removes expired pending records.
//!
//! Codes are only stored as SHA-256 digests; the raw value leaves the process
//! exclusively through the notifier.

pub mod api;
pub mod cli;
pub mod verifier;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

//! Small helpers for input validation and verification code handling.

use rand::{Rng, RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

use super::{MAX_CODE_LENGTH, MIN_CODE_LENGTH};

pub(crate) const USERNAME_MIN_LENGTH: usize = 3;
pub(crate) const USERNAME_MAX_LENGTH: usize = 32;
pub(crate) const PASSWORD_MIN_LENGTH: usize = 8;
pub(crate) const PASSWORD_MAX_LENGTH: usize = 128;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

pub(crate) fn valid_username(username: &str) -> bool {
    let length = username.chars().count();
    (USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&length)
        && Regex::new(r"^[A-Za-z0-9_.-]+$").is_ok_and(|regex| regex.is_match(username))
}

/// Length bounds only; Argon2 handles any byte content.
pub(crate) fn valid_password(password: &str) -> bool {
    let length = password.chars().count();
    (PASSWORD_MIN_LENGTH..=PASSWORD_MAX_LENGTH).contains(&length)
}

/// Digits only, within the lengths any configuration can issue.
pub(crate) fn valid_code(code: &str) -> bool {
    (MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code.len())
        && code.bytes().all(|b| b.is_ascii_digit())
}

/// Create a new numeric verification code of `length` digits.
///
/// Leading zeroes are kept; the code is a string, never a number.
pub(crate) fn generate_verification_code(length: usize) -> String {
    let mut rng = OsRng;
    generate_code_with_rng(&mut rng, length)
}

fn generate_code_with_rng<R: RngCore>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Hash a verification code so we never store the raw code in the database.
pub(crate) fn hash_verification_code(code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@x.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
        assert!(!valid_email("spaces in@example.com"));
    }

    #[test]
    fn valid_username_bounds_and_charset() {
        assert!(valid_username("bob"));
        assert!(valid_username("alice.smith_01"));
        assert!(!valid_username("ab"));
        assert!(!valid_username(&"a".repeat(USERNAME_MAX_LENGTH + 1)));
        assert!(!valid_username("white space"));
        assert!(!valid_username("semi;colon"));
    }

    #[test]
    fn valid_password_bounds() {
        assert!(valid_password("correct horse"));
        assert!(!valid_password("short"));
        assert!(!valid_password(&"x".repeat(PASSWORD_MAX_LENGTH + 1)));
    }

    #[test]
    fn valid_code_requires_digits_in_range() {
        assert!(valid_code("012345"));
        assert!(valid_code("0123"));
        assert!(valid_code("0123456789"));
        assert!(!valid_code("123"));
        assert!(!valid_code("01234567890"));
        assert!(!valid_code("12345a"));
        assert!(!valid_code(" 12345"));
    }

    #[test]
    fn generated_codes_have_requested_length() {
        for length in [4, 6, 10] {
            let code = generate_verification_code(length);
            assert_eq!(code.len(), length);
            assert!(valid_code(&code), "unexpected code {code}");
        }
    }

    #[test]
    fn seeded_codes_are_deterministic() {
        let mut first = StdRng::seed_from_u64(7);
        let mut second = StdRng::seed_from_u64(7);
        assert_eq!(
            generate_code_with_rng(&mut first, 6),
            generate_code_with_rng(&mut second, 6)
        );
    }

    #[test]
    fn hash_verification_code_stable() {
        let first = hash_verification_code("123456");
        let second = hash_verification_code("123456");
        let different = hash_verification_code("654321");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }
}

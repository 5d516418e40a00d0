use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use secrecy::SecretString;
use std::sync::{Arc, Mutex};
use vouch::verifier::{
    Clock, ManualClock, MemoryRegistrationStore, Notifier, PendingRegistration, PromoteOutcome,
    RegistrationStore, User, VerificationMessage, Verifier, VerifierConfig, VerifyError,
    password,
};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<VerificationMessage>>,
}

impl RecordingNotifier {
    fn last_code(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|message| message.to_email == email)
            .map(|message| message.code.clone())
    }

    fn count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or_default()
    }

    fn last(&self) -> Option<VerificationMessage> {
        self.sent.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &VerificationMessage) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _message: &VerificationMessage) -> Result<()> {
        Err(anyhow!("mail relay down"))
    }
}

struct Harness {
    verifier: Arc<Verifier>,
    store: Arc<MemoryRegistrationStore>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn harness() -> Harness {
    let store = Arc::new(MemoryRegistrationStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(start()));
    let verifier = Arc::new(Verifier::new(
        VerifierConfig::new(),
        store.clone(),
        notifier.clone(),
        clock.clone(),
    ));
    Harness {
        verifier,
        store,
        notifier,
        clock,
    }
}

fn secret() -> SecretString {
    SecretString::from("correct horse battery")
}

fn wrong_code(issued: &str) -> String {
    if issued == "000000" {
        "000001".to_string()
    } else {
        "000000".to_string()
    }
}

async fn register(h: &Harness, email: &str) -> Result<String> {
    h.verifier.register(email, "alice", &secret()).await?;
    h.notifier
        .last_code(email)
        .ok_or_else(|| anyhow!("no code sent to {email}"))
}

#[tokio::test]
async fn wrong_code_then_correct_code_creates_user() -> Result<()> {
    let h = harness();
    let code = register(&h, "a@x.com").await?;

    let result = h.verifier.verify("a@x.com", &wrong_code(&code)).await;
    assert!(matches!(result, Err(VerifyError::InvalidCode)));

    let user = h.verifier.verify("a@x.com", &code).await?;
    assert_eq!(user.email, "a@x.com");
    assert_eq!(user.username, "alice");
    assert_eq!(user.created_at, start());
    assert!(password::verify_password(&secret(), &user.password_hash)?);

    assert_eq!(h.store.pending_count().await, 0);
    assert_eq!(h.store.user_count().await, 1);
    let stored = h.verifier.store().find_user("a@x.com").await?;
    assert_eq!(stored, Some(user));
    Ok(())
}

#[tokio::test]
async fn code_past_expiry_is_rejected() -> Result<()> {
    let h = harness();
    let code = register(&h, "b@x.com").await?;

    h.clock.advance(TimeDelta::minutes(3) + TimeDelta::seconds(1));

    let result = h.verifier.verify("b@x.com", &code).await;
    assert!(matches!(result, Err(VerifyError::ExpiredCode)));
    assert_eq!(h.store.user_count().await, 0);

    // Once swept the record is simply gone.
    assert_eq!(h.verifier.sweep_expired().await?, 1);
    let result = h.verifier.verify("b@x.com", &code).await;
    assert!(matches!(result, Err(VerifyError::NotFound)));
    Ok(())
}

#[tokio::test]
async fn code_is_dead_exactly_at_expiry() -> Result<()> {
    let h = harness();
    let code = register(&h, "edge@x.com").await?;

    h.clock.advance(TimeDelta::minutes(3) - TimeDelta::seconds(1));
    assert!(h.verifier.verify("edge@x.com", &wrong_code(&code)).await.is_err());

    h.clock.advance(TimeDelta::seconds(1));
    let result = h.verifier.verify("edge@x.com", &code).await;
    assert!(matches!(result, Err(VerifyError::ExpiredCode)));
    Ok(())
}

#[tokio::test]
async fn only_last_resent_code_is_accepted() -> Result<()> {
    let h = harness();
    let original = register(&h, "c@x.com").await?;

    h.verifier.resend_verification("c@x.com").await?;
    let first = h
        .notifier
        .last_code("c@x.com")
        .ok_or_else(|| anyhow!("missing first resend"))?;
    h.verifier.resend_verification("c@x.com").await?;
    let second = h
        .notifier
        .last_code("c@x.com")
        .ok_or_else(|| anyhow!("missing second resend"))?;
    assert_eq!(h.notifier.count(), 3);

    for stale in [&original, &first] {
        if *stale != second {
            let result = h.verifier.verify("c@x.com", stale).await;
            assert!(matches!(result, Err(VerifyError::InvalidCode)));
        }
    }

    let user = h.verifier.verify("c@x.com", &second).await?;
    assert_eq!(user.email, "c@x.com");
    Ok(())
}

#[tokio::test]
async fn resend_extends_expiry() -> Result<()> {
    let h = harness();
    register(&h, "late@x.com").await?;

    h.clock.advance(TimeDelta::minutes(2));
    let ticket = h.verifier.resend_verification("late@x.com").await?;
    assert_eq!(ticket.expires_at, h.clock.now() + TimeDelta::minutes(3));
    let code = h
        .notifier
        .last_code("late@x.com")
        .ok_or_else(|| anyhow!("missing code"))?;

    // Past the original window, inside the new one.
    h.clock.advance(TimeDelta::minutes(2));
    h.verifier.verify("late@x.com", &code).await?;
    Ok(())
}

#[tokio::test]
async fn resend_requires_live_pending_record() -> Result<()> {
    let h = harness();

    let result = h.verifier.resend_verification("ghost@x.com").await;
    assert!(matches!(result, Err(VerifyError::NotFound)));

    register(&h, "stale@x.com").await?;
    h.clock.advance(TimeDelta::minutes(5));
    let result = h.verifier.resend_verification("stale@x.com").await;
    assert!(matches!(result, Err(VerifyError::NotFound)));
    Ok(())
}

#[tokio::test]
async fn register_twice_keeps_one_record_and_second_code() -> Result<()> {
    let h = harness();
    let first = register(&h, "twice@x.com").await?;
    let second = register(&h, "twice@x.com").await?;
    assert_eq!(h.store.pending_count().await, 1);

    if first != second {
        let result = h.verifier.verify("twice@x.com", &first).await;
        assert!(matches!(result, Err(VerifyError::InvalidCode)));
    }
    h.verifier.verify("twice@x.com", &second).await?;
    Ok(())
}

#[tokio::test]
async fn replayed_verify_is_not_found() -> Result<()> {
    let h = harness();
    let code = register(&h, "replay@x.com").await?;

    h.verifier.verify("replay@x.com", &code).await?;
    let result = h.verifier.verify("replay@x.com", &code).await;
    assert!(matches!(result, Err(VerifyError::NotFound)));
    assert_eq!(h.store.user_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_verify_creates_one_user() -> Result<()> {
    let h = harness();
    let code = register(&h, "race@x.com").await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let verifier = h.verifier.clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            verifier.verify("race@x.com", &code).await
        }));
    }

    let mut promoted = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => promoted += 1,
            Err(VerifyError::NotFound) => {}
            Err(err) => return Err(anyhow!("unexpected error: {err}")),
        }
    }
    assert_eq!(promoted, 1);
    assert_eq!(h.store.user_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn registered_email_cannot_register_again() -> Result<()> {
    let h = harness();
    let code = register(&h, "taken@x.com").await?;
    h.verifier.verify("taken@x.com", &code).await?;

    let result = h
        .verifier
        .register("Taken@X.com", "mallory", &secret())
        .await;
    assert!(matches!(result, Err(VerifyError::AlreadyRegistered)));
    Ok(())
}

#[tokio::test]
async fn email_is_normalized_across_operations() -> Result<()> {
    let h = harness();
    let ticket = h
        .verifier
        .register("  Mixed@Case.COM ", "mixed", &secret())
        .await?;
    assert_eq!(ticket.email, "mixed@case.com");
    let code = h
        .notifier
        .last_code("mixed@case.com")
        .ok_or_else(|| anyhow!("missing code"))?;

    let user = h.verifier.verify("MIXED@case.com", &code).await?;
    assert_eq!(user.email, "mixed@case.com");
    Ok(())
}

#[tokio::test]
async fn sweep_removes_only_expired_records() -> Result<()> {
    let h = harness();
    register(&h, "old1@x.com").await?;
    register(&h, "old2@x.com").await?;

    h.clock.advance(TimeDelta::minutes(2));
    register(&h, "fresh@x.com").await?;

    h.clock.advance(TimeDelta::minutes(1) + TimeDelta::seconds(30));
    assert_eq!(h.verifier.sweep_expired().await?, 2);
    assert_eq!(h.store.pending_count().await, 1);
    assert_eq!(h.verifier.sweep_expired().await?, 0);

    let code = h
        .notifier
        .last_code("fresh@x.com")
        .ok_or_else(|| anyhow!("missing code"))?;
    h.verifier.verify("fresh@x.com", &code).await?;
    Ok(())
}

#[tokio::test]
async fn notification_carries_expiry_statement() -> Result<()> {
    let h = harness();
    register(&h, "notice@x.com").await?;

    let message = h
        .notifier
        .last()
        .ok_or_else(|| anyhow!("no message recorded"))?;
    assert_eq!(message.code.len(), 6);
    assert!(message.code.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(message.expiry_statement(), "This code expires in 3 minutes.");
    assert_eq!(message.expires_at, start() + TimeDelta::minutes(3));
    Ok(())
}

#[tokio::test]
async fn failed_notification_keeps_pending_record() -> Result<()> {
    let store = Arc::new(MemoryRegistrationStore::new());
    let verifier = Verifier::new(
        VerifierConfig::new(),
        store.clone(),
        Arc::new(FailingNotifier),
        Arc::new(ManualClock::new(start())),
    );

    verifier.register("down@x.com", "alice", &secret()).await?;
    assert_eq!(store.pending_count().await, 1);
    verifier.resend_verification("down@x.com").await?;
    Ok(())
}

#[tokio::test]
async fn invalid_input_is_rejected_before_storage() -> Result<()> {
    let h = harness();

    let cases = [
        ("not-an-email", "alice", "long enough password"),
        ("ok@x.com", "a", "long enough password"),
        ("ok@x.com", "bad name!", "long enough password"),
        ("ok@x.com", "alice", "short"),
    ];
    for (email, username, secret) in cases {
        let result = h
            .verifier
            .register(email, username, &SecretString::from(secret))
            .await;
        assert!(
            matches!(result, Err(VerifyError::InvalidInput(_))),
            "{email}/{username} should be rejected"
        );
    }
    assert_eq!(h.store.pending_count().await, 0);
    assert_eq!(h.notifier.count(), 0);

    // Nothing is pending, so the code's shape is never looked at.
    let result = h.verifier.verify("ok@x.com", "12ab56").await;
    assert!(matches!(result, Err(VerifyError::NotFound)));
    Ok(())
}

#[tokio::test]
async fn malformed_code_is_checked_after_the_pending_record() -> Result<()> {
    let h = harness();

    let result = h.verifier.verify("nobody@x.com", "12").await;
    assert!(matches!(result, Err(VerifyError::NotFound)));

    register(&h, "shape@x.com").await?;
    for malformed in ["12", "12ab56", "12345678901"] {
        let result = h.verifier.verify("shape@x.com", malformed).await;
        assert!(
            matches!(result, Err(VerifyError::InvalidCode)),
            "{malformed} should be a mismatch"
        );
    }

    h.clock.advance(TimeDelta::minutes(3));
    let result = h.verifier.verify("shape@x.com", "12").await;
    assert!(matches!(result, Err(VerifyError::ExpiredCode)));

    let code = register(&h, "shape@x.com").await?;
    h.verifier.verify("shape@x.com", &code).await?;
    let result = h.verifier.verify("shape@x.com", "12").await;
    assert!(matches!(result, Err(VerifyError::NotFound)));
    Ok(())
}

#[tokio::test]
async fn code_issued_before_length_change_still_verifies() -> Result<()> {
    let store = Arc::new(MemoryRegistrationStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(start()));
    let before = Verifier::new(
        VerifierConfig::new().with_code_length(8),
        store.clone(),
        notifier.clone(),
        clock.clone(),
    );
    before.register("restart@x.com", "alice", &secret()).await?;
    let code = notifier
        .last_code("restart@x.com")
        .ok_or_else(|| anyhow!("missing code"))?;

    let after = Verifier::new(VerifierConfig::new(), store.clone(), notifier, clock);
    let user = after.verify("restart@x.com", &code).await?;
    assert_eq!(user.email, "restart@x.com");
    Ok(())
}

/// Memory store that loses the pending row right after handing it out, the
/// way a sweep landing between the read and the promotion would.
struct SweptAfterRead {
    inner: MemoryRegistrationStore,
}

#[async_trait]
impl RegistrationStore for SweptAfterRead {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn user_exists(&self, email: &str) -> Result<bool> {
        self.inner.user_exists(email).await
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>> {
        self.inner.find_user(email).await
    }

    async fn upsert_pending(&self, pending: &PendingRegistration) -> Result<()> {
        self.inner.upsert_pending(pending).await
    }

    async fn find_pending(&self, email: &str) -> Result<Option<PendingRegistration>> {
        let found = self.inner.find_pending(email).await?;
        if let Some(pending) = &found {
            self.inner.delete_expired(pending.expires_at).await?;
        }
        Ok(found)
    }

    async fn refresh_pending(
        &self,
        email: &str,
        code_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingRegistration>> {
        self.inner
            .refresh_pending(email, code_hash, expires_at, now)
            .await
    }

    async fn promote(
        &self,
        email: &str,
        code_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PromoteOutcome> {
        self.inner.promote(email, code_hash, now).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.inner.delete_expired(now).await
    }
}

#[tokio::test]
async fn sweep_between_read_and_promote_creates_no_user() -> Result<()> {
    let store = Arc::new(SweptAfterRead {
        inner: MemoryRegistrationStore::new(),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let verifier = Verifier::new(
        VerifierConfig::new(),
        store.clone(),
        notifier.clone(),
        Arc::new(ManualClock::new(start())),
    );

    verifier.register("swept@x.com", "alice", &secret()).await?;
    let code = notifier
        .last_code("swept@x.com")
        .ok_or_else(|| anyhow!("missing code"))?;

    let result = verifier.verify("swept@x.com", &code).await;
    assert!(matches!(result, Err(VerifyError::NotFound)));
    assert_eq!(store.inner.pending_count().await, 0);
    assert_eq!(store.inner.user_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn resend_refuses_an_already_registered_email() -> Result<()> {
    let h = harness();
    let code = register(&h, "owned@x.com").await?;
    h.verifier.verify("owned@x.com", &code).await?;

    // A pending row that outlived a conflicting promotion.
    let now = h.clock.now();
    h.store
        .upsert_pending(&PendingRegistration {
            email: "owned@x.com".to_string(),
            username: "mallory".to_string(),
            password_hash: "$argon2id$v=19$stub".to_string(),
            code_hash: b"leftover".to_vec(),
            created_at: now,
            expires_at: now + TimeDelta::minutes(3),
        })
        .await?;
    let sent = h.notifier.count();

    let result = h.verifier.resend_verification("owned@x.com").await;
    assert!(matches!(result, Err(VerifyError::AlreadyRegistered)));
    assert_eq!(h.notifier.count(), sent);
    Ok(())
}

#[tokio::test]
async fn configured_code_length_is_used() -> Result<()> {
    let notifier = Arc::new(RecordingNotifier::default());
    let verifier = Verifier::new(
        VerifierConfig::new().with_code_length(8),
        Arc::new(MemoryRegistrationStore::new()),
        notifier.clone(),
        Arc::new(ManualClock::new(start())),
    );

    verifier.register("eight@x.com", "alice", &secret()).await?;
    let code = notifier
        .last_code("eight@x.com")
        .ok_or_else(|| anyhow!("missing code"))?;
    assert_eq!(code.len(), 8);

    let result = verifier.verify("eight@x.com", &code[..6]).await;
    assert!(matches!(result, Err(VerifyError::InvalidCode)));
    verifier.verify("eight@x.com", &code).await?;
    Ok(())
}

//! Credential verification (§4.8): password, external-identity, and
//! WebAuthn paths that all converge on opening a session.

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::audit::{AccessLogger, DecisionEvent};
use crate::error::{AuthFailureKind, Error, Result};
use crate::role::{find_system_role, RoleAssignment};
use crate::store::{ChallengeConsumeOutcome, PasskeyChallengeStore, UserStore};
use crate::user::{IdentityLink, User, UserId};

/// Policy knobs for password lockout (§4.8).
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    /// Consecutive failures before a lockout is applied.
    pub failure_threshold: u32,
    /// How long a lockout lasts once applied.
    pub lockout_duration: Duration,
}

/// The outcome of successfully verifying a credential: the (possibly
/// newly-created) user ready for [`crate::token::TokenService::open_session`].
#[derive(Debug, Clone)]
pub struct CredentialValidationResult {
    /// The verified user.
    pub user: User,
    /// Whether this verification created a brand-new user record, i.e. a
    /// first-time external-identity login.
    pub user_was_created: bool,
}

/// Verifies a password against `user`'s stored credential under the given
/// lockout policy. The caller is responsible for persisting the user record
/// afterward, since this only mutates the in-memory value.
///
/// `verify_fn` performs the actual hash comparison; password hashing
/// algorithms are an external collaborator this crate does not implement.
pub fn verify_password(
    user: &mut User,
    presented_password: &str,
    verify_fn: impl FnOnce(&str, &str) -> bool,
    policy: LockoutPolicy,
    now: DateTime<Utc>,
    logger: &dyn AccessLogger,
) -> Result<()> {
    let principal = Some(user.id().to_string());
    let result = verify_password_inner(user, presented_password, verify_fn, policy, now);
    logger.log(&DecisionEvent::CredentialVerified {
        principal,
        method: "password",
        succeeded: result.is_ok(),
    });
    result
}

fn verify_password_inner(
    user: &mut User,
    presented_password: &str,
    verify_fn: impl FnOnce(&str, &str) -> bool,
    policy: LockoutPolicy,
    now: DateTime<Utc>,
) -> Result<()> {
    if user.is_locked_out(now) {
        return Err(Error::AuthenticationFailed(AuthFailureKind::BadCredential));
    }

    let Some(credential) = user.password_credential() else {
        return Err(Error::AuthenticationFailed(AuthFailureKind::BadCredential));
    };

    if verify_fn(presented_password, credential.hash()) {
        user.record_successful_login(now);
        Ok(())
    } else {
        user.record_failed_login(now, policy.failure_threshold, policy.lockout_duration);
        Err(Error::AuthenticationFailed(AuthFailureKind::BadCredential))
    }
}

/// Resolves an external identity assertion to a user, registering a new one
/// on first sight (§4.8's external path). A newly created user is assigned
/// the `user` system role, parameterized with its own id.
pub async fn resolve_external_identity(
    provider: &str,
    subject: &str,
    email: Option<String>,
    display_name: Option<String>,
    users: &impl UserStore,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
    logger: &dyn AccessLogger,
) -> Result<CredentialValidationResult> {
    let result = resolve_external_identity_inner(provider, subject, email, display_name, users, now, cancel).await;
    logger.log(&DecisionEvent::CredentialVerified {
        principal: result.as_ref().ok().map(|r| r.user.id().to_string()),
        method: "external",
        succeeded: result.is_ok(),
    });
    result
}

async fn resolve_external_identity_inner(
    provider: &str,
    subject: &str,
    email: Option<String>,
    display_name: Option<String>,
    users: &impl UserStore,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<CredentialValidationResult> {
    if let Some(existing) = users.get_by_identity_link(provider, subject, cancel).await.map_err(Error::from)? {
        return Ok(CredentialValidationResult {
            user: existing,
            user_was_created: false,
        });
    }

    let mut user = User::anonymous(UserId::parse(uuid::Uuid::new_v4().to_string())?, now);
    user.add_identity_link(
        IdentityLink {
            provider: provider.to_string(),
            subject: subject.to_string(),
            email,
            display_name,
            linked_at: now,
        },
        now,
    )?;

    if let Some(default_role) = find_system_role("user") {
        let assignment = RoleAssignment::new(
            user.id().clone(),
            &default_role,
            std::collections::BTreeMap::from([("userId".to_string(), user.id().to_string())]),
        )?;
        user.assign_role(assignment);
    }

    crate::store::retry_on_conflict(|| users.save(&user, cancel))
        .await
        .map_err(Error::from)?;

    Ok(CredentialValidationResult {
        user,
        user_was_created: true,
    })
}

/// Consumes a one-shot WebAuthn challenge and maps its terminal states to
/// the matching authentication failure (§4.8, §4.9).
pub async fn consume_passkey_challenge(
    challenge_id: crate::store::PasskeyChallengeId,
    challenges: &impl PasskeyChallengeStore,
    cancel: &CancellationToken,
    logger: &dyn AccessLogger,
) -> Result<crate::store::PasskeyChallenge> {
    let result = consume_passkey_challenge_inner(challenge_id, challenges, cancel).await;
    logger.log(&DecisionEvent::CredentialVerified {
        principal: result.as_ref().ok().map(|c| c.user_id.to_string()),
        method: "passkey",
        succeeded: result.is_ok(),
    });
    result
}

async fn consume_passkey_challenge_inner(
    challenge_id: crate::store::PasskeyChallengeId,
    challenges: &impl PasskeyChallengeStore,
    cancel: &CancellationToken,
) -> Result<crate::store::PasskeyChallenge> {
    match challenges.consume(challenge_id, cancel).await.map_err(Error::from)? {
        ChallengeConsumeOutcome::Consumed(challenge) => Ok(challenge),
        ChallengeConsumeOutcome::NotFound => Err(Error::NotFound {
            what: "passkey challenge".to_string(),
        }),
        ChallengeConsumeOutcome::Expired => Err(Error::AuthenticationFailed(AuthFailureKind::Expired)),
        ChallengeConsumeOutcome::AlreadyConsumed => Err(Error::ChallengeAlreadyConsumed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoopAccessLogger;

    fn policy() -> LockoutPolicy {
        LockoutPolicy {
            failure_threshold: 3,
            lockout_duration: Duration::minutes(15),
        }
    }

    #[test]
    fn password_verification_succeeds_and_resets_failures() {
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        user.set_password_credential(crate::user::PasswordCredential::from_hash("correct-hash"), now);
        user.record_failed_login(now, 3, Duration::minutes(15));

        let result = verify_password(&mut user, "secret", |_pw, hash| hash == "correct-hash", policy(), now, &NoopAccessLogger);
        assert!(result.is_ok());
        assert_eq!(user.access_failed_count(), 0);
    }

    #[test]
    fn password_verification_fails_without_credential() {
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        let result = verify_password(&mut user, "secret", |_, _| true, policy(), now, &NoopAccessLogger);
        assert!(matches!(result, Err(Error::AuthenticationFailed(AuthFailureKind::BadCredential))));
    }

    #[test]
    fn locked_out_user_is_rejected_before_verification() {
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        user.set_password_credential(crate::user::PasswordCredential::from_hash("hash"), now);
        user.record_failed_login(now, 1, Duration::minutes(15));
        assert!(user.is_locked_out(now));

        let result = verify_password(&mut user, "secret", |_, _| true, policy(), now, &NoopAccessLogger);
        assert!(matches!(result, Err(Error::AuthenticationFailed(AuthFailureKind::BadCredential))));
    }

    #[test]
    fn failed_verification_increments_counter() {
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        user.set_password_credential(crate::user::PasswordCredential::from_hash("hash"), now);
        let _ = verify_password(&mut user, "wrong", |_, _| false, policy(), now, &NoopAccessLogger);
        assert_eq!(user.access_failed_count(), 1);
    }

    #[derive(Default)]
    struct CountingLogger {
        count: std::sync::atomic::AtomicUsize,
    }

    impl AccessLogger for CountingLogger {
        fn log(&self, _event: &DecisionEvent) {
            self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn resolve_external_identity_logs_its_outcome() {
        let store = crate::mem::MemUserStore::default();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        let logger = CountingLogger::default();

        let result = resolve_external_identity("github", "alice", None, None, &store, now, &cancel, &logger)
            .await
            .unwrap();
        assert!(result.user_was_created);
        assert_eq!(logger.count.load(std::sync::atomic::Ordering::SeqCst), 1);

        let result = resolve_external_identity("github", "alice", None, None, &store, now, &cancel, &logger)
            .await
            .unwrap();
        assert!(!result.user_was_created);
        assert_eq!(logger.count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn consume_passkey_challenge_logs_its_outcome() {
        let store = crate::mem::MemPasskeyChallengeStore::default();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        let logger = CountingLogger::default();

        let challenge = crate::store::PasskeyChallenge {
            id: crate::store::PasskeyChallengeId(uuid::Uuid::new_v4()),
            user_id: UserId::parse("U-1").unwrap(),
            challenge: "opaque".to_string(),
            expires_at: now + Duration::minutes(5),
            is_consumed: false,
        };
        store.save(&challenge, &cancel).await.unwrap();

        let consumed = consume_passkey_challenge(challenge.id, &store, &cancel, &logger).await;
        assert!(consumed.is_ok());

        let second = consume_passkey_challenge(challenge.id, &store, &cancel, &logger).await;
        assert!(second.is_err());

        assert_eq!(logger.count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}

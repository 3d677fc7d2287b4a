//! Store interface: the persistence boundary this crate consumes but never
//! implements outside of [`crate::mem`]'s test-only reference adapters.
//!
//! Every method is a native `async fn` in a trait (no `async_trait`), takes a
//! [`tokio_util::sync::CancellationToken`] last, and returns [`StoreError`]'s
//! crisp kinds rather than a catch-all failure.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::role::{Role, RoleId};
use crate::session::Session;
use crate::user::User;
use crate::user::UserId;

/// Crisp failure kinds a store adapter may report. [`crate::error::Error`]
/// wraps each into the crate-wide taxonomy via `From<StoreError>`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// No record matched the lookup.
    #[error("not found: {what}")]
    NotFound {
        /// Description of what was being looked up.
        what: String,
    },
    /// A save collided with an existing unique key.
    #[error("duplicate key: {what}")]
    DuplicateKey {
        /// Description of the entity and key that collided.
        what: String,
    },
    /// A write lost a race with a concurrent writer. Retriable.
    #[error("concurrency conflict")]
    ConcurrencyConflict,
    /// The underlying storage engine failed.
    #[error("io failed: {reason}")]
    IoFailed {
        /// Description of the underlying failure.
        reason: String,
    },
    /// The operation was cancelled before completing.
    #[error("cancelled")]
    Cancelled,
}

/// Retries a store write up to 3 total attempts when it reports
/// [`StoreError::ConcurrencyConflict`], per the crate's bounded-retry
/// propagation policy for transient write conflicts. Every other error kind
/// propagates on the first attempt.
pub async fn retry_on_conflict<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(StoreError::ConcurrencyConflict) if attempt < 2 => {
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Identifier for an [`ApiKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiKeyId(pub Uuid);

/// A long-lived API key record. This crate never implements key issuance or
/// verification (the specification never describes it); it only carries
/// enough shape for [`ApiKeyStore`]'s retention sweep.
#[derive(Debug, Clone)]
pub struct ApiKey {
    /// The key's id.
    pub id: ApiKeyId,
    /// The owning user.
    pub user_id: UserId,
    /// Hash of the key material, opaque to this crate.
    pub secret_hash: String,
    /// When the key stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Whether the key has been explicitly revoked.
    pub is_revoked: bool,
}

/// Identifier for a [`PasskeyChallenge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PasskeyChallengeId(pub Uuid);

/// A one-shot WebAuthn challenge issued to a client and consumed at most
/// once during assertion verification.
#[derive(Debug, Clone)]
pub struct PasskeyChallenge {
    /// The challenge's id.
    pub id: PasskeyChallengeId,
    /// The user this challenge was issued for.
    pub user_id: UserId,
    /// Opaque challenge bytes, base64-encoded.
    pub challenge: String,
    /// When the challenge stops being acceptable.
    pub expires_at: DateTime<Utc>,
    /// Whether this challenge has already been consumed.
    pub is_consumed: bool,
}

/// Outcome of [`PasskeyChallengeStore::consume`].
#[derive(Debug, Clone)]
pub enum ChallengeConsumeOutcome {
    /// The challenge existed, was unconsumed, and unexpired; now consumed.
    Consumed(PasskeyChallenge),
    /// No challenge with that id exists.
    NotFound,
    /// The challenge exists but its deadline has passed.
    Expired,
    /// The challenge exists but was already consumed once before.
    AlreadyConsumed,
}

/// Persistence boundary for [`User`] records.
pub trait UserStore {
    /// Looks up a user by id.
    async fn get_by_id(&self, id: &UserId, cancel: &CancellationToken) -> Result<Option<User>, StoreError>;

    /// Looks up a user by unique username.
    async fn get_by_username(&self, username: &str, cancel: &CancellationToken) -> Result<Option<User>, StoreError>;

    /// Looks up a user by an external identity's `(provider, subject)` pair.
    async fn get_by_identity_link(
        &self,
        provider: &str,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<User>, StoreError>;

    /// Inserts or replaces a user record.
    async fn save(&self, user: &User, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Removes a user record outright.
    async fn delete(&self, id: &UserId, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Removes every anonymous user created before `cutoff`, returning the
    /// count removed.
    async fn delete_abandoned_anonymous(&self, cutoff: DateTime<Utc>, cancel: &CancellationToken) -> Result<u64, StoreError>;
}

/// Persistence boundary for [`Role`] records.
pub trait RoleStore {
    /// Looks up a role by id.
    async fn get_by_id(&self, id: RoleId, cancel: &CancellationToken) -> Result<Option<Role>, StoreError>;

    /// Looks up a role by its unique, case-insensitive code.
    async fn get_by_code(&self, code: &str, cancel: &CancellationToken) -> Result<Option<Role>, StoreError>;

    /// Looks up every role whose id is in `ids`, skipping ids with no match.
    async fn get_by_ids(&self, ids: &[RoleId], cancel: &CancellationToken) -> Result<Vec<Role>, StoreError>;

    /// Lists every role, ordered by code (byte-wise).
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Role>, StoreError>;

    /// Inserts or replaces a role record.
    async fn save(&self, role: &Role, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Removes a role record outright.
    async fn delete(&self, id: RoleId, cancel: &CancellationToken) -> Result<(), StoreError>;
}

/// Persistence boundary for [`Session`] records.
pub trait SessionStore {
    /// Looks up a session by id, regardless of its revoked/expired state.
    async fn get_by_id(&self, id: crate::session::SessionId, cancel: &CancellationToken) -> Result<Option<Session>, StoreError>;

    /// Lists every currently active (unrevoked, unexpired) session for a user.
    async fn get_active_by_user_id(&self, user_id: &UserId, cancel: &CancellationToken) -> Result<Vec<Session>, StoreError>;

    /// Inserts or replaces a session record.
    async fn save(&self, session: &Session, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Marks a single session revoked.
    async fn revoke(&self, id: crate::session::SessionId, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Marks every session belonging to a user revoked, returning the count.
    async fn revoke_all_for_user(&self, user_id: &UserId, cancel: &CancellationToken) -> Result<u64, StoreError>;

    /// Removes every session expired before `cutoff`, returning the count.
    async fn delete_expired(&self, cutoff: DateTime<Utc>, cancel: &CancellationToken) -> Result<u64, StoreError>;
}

/// Persistence boundary for [`ApiKey`] records. This crate does not
/// implement key issuance or verification; the store exists so the
/// retention sweep in §11 has somewhere to act.
pub trait ApiKeyStore {
    /// Looks up an API key by id.
    async fn get_by_id(&self, id: ApiKeyId, cancel: &CancellationToken) -> Result<Option<ApiKey>, StoreError>;

    /// Inserts or replaces an API key record.
    async fn save(&self, key: &ApiKey, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Removes a single key outright.
    async fn delete(&self, id: ApiKeyId, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Removes keys expired before `expired_before` or revoked before
    /// `revoked_before`, returning the count removed.
    async fn delete_expired_or_revoked(
        &self,
        expired_before: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>;
}

/// Persistence boundary for one-shot [`PasskeyChallenge`] records.
pub trait PasskeyChallengeStore {
    /// Stores a freshly issued challenge.
    async fn save(&self, challenge: &PasskeyChallenge, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Atomically consumes a challenge: it must exist, be unexpired, and be
    /// unconsumed, or the corresponding non-`Consumed` outcome is returned.
    async fn consume(&self, id: PasskeyChallengeId, cancel: &CancellationToken) -> Result<ChallengeConsumeOutcome, StoreError>;
}

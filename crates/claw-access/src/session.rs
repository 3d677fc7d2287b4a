//! Session model: the server-side record backing a refresh token, carrying
//! its own revocation state independent of the bearer access token's `exp`.

use std::fmt;

use blake3::Hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::UserId;

/// Stable identifier for a [`Session`], carried as the JWT `sid` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied context about the device/client that opened a session,
/// carried for display and audit purposes only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// Free-form user agent string, if supplied.
    pub user_agent: Option<String>,
    /// The client's network address at session-open time, if known.
    pub ip_address: Option<String>,
}

/// A server-side session record, one per issued refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    user_id: UserId,
    refresh_token_hash: String,
    device: DeviceMetadata,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_revoked: bool,
    revoked_at: Option<DateTime<Utc>>,
}

/// Hashes a raw refresh token with BLAKE3 for at-rest storage, following the
/// same non-reversible-digest approach as password credentials.
#[must_use]
pub fn hash_refresh_token(raw: &str) -> String {
    let hash: Hash = blake3::hash(raw.as_bytes());
    hash.to_hex().to_string()
}

impl Session {
    /// Opens a new, unrevoked session.
    #[must_use]
    pub fn open(user_id: UserId, refresh_token_hash: String, device: DeviceMetadata, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            refresh_token_hash,
            device,
            created_at: now,
            expires_at: now + ttl,
            is_revoked: false,
            revoked_at: None,
        }
    }

    /// This session's id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The user this session belongs to.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The stored hash of the current refresh token.
    #[must_use]
    pub fn refresh_token_hash(&self) -> &str {
        &self.refresh_token_hash
    }

    /// Whether this session has been explicitly revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.is_revoked
    }

    /// Whether `now` is past this session's expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this session currently backs a valid access-token mint or
    /// refresh: not revoked and not expired.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired(now)
    }

    /// Revokes this session. Idempotent.
    pub fn revoke(&mut self, now: DateTime<Utc>) {
        if !self.is_revoked {
            self.is_revoked = true;
            self.revoked_at = Some(now);
        }
    }

    /// Rotates the refresh token: replaces the stored hash and extends
    /// expiry, without changing the session's identity. Fails to make sense
    /// to call on a revoked or expired session; callers check
    /// [`Session::is_active`] first.
    pub fn rotate_refresh_token(&mut self, new_hash: String, now: DateTime<Utc>, ttl: chrono::Duration) {
        self.refresh_token_hash = new_hash;
        self.expires_at = now + ttl;
    }

    /// Whether this session is eligible for the expired/revoked-session
    /// retention sweep (§10.4/§11): revoked or expired for longer than
    /// `retention`.
    #[must_use]
    pub fn is_eligible_for_retention_sweep(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        match self.revoked_at {
            Some(revoked_at) => now >= revoked_at + retention,
            None => self.is_expired(now) && now >= self.expires_at + retention,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_id() -> UserId {
        UserId::parse("U-1").unwrap()
    }

    #[test]
    fn session_is_active_until_expiry() {
        let now = Utc::now();
        let session = Session::open(user_id(), hash_refresh_token("rt"), DeviceMetadata::default(), now, chrono::Duration::days(30));
        assert!(session.is_active(now));
        assert!(!session.is_active(now + chrono::Duration::days(31)));
    }

    #[test]
    fn revocation_is_idempotent_and_sticky() {
        let now = Utc::now();
        let mut session = Session::open(user_id(), hash_refresh_token("rt"), DeviceMetadata::default(), now, chrono::Duration::days(30));
        session.revoke(now);
        session.revoke(now + chrono::Duration::seconds(1));
        assert!(!session.is_active(now));
        assert!(session.is_revoked());
    }

    #[test]
    fn rotation_extends_expiry_and_replaces_hash() {
        let now = Utc::now();
        let mut session = Session::open(user_id(), hash_refresh_token("rt-1"), DeviceMetadata::default(), now, chrono::Duration::days(1));
        let later = now + chrono::Duration::hours(12);
        session.rotate_refresh_token(hash_refresh_token("rt-2"), later, chrono::Duration::days(1));
        assert_eq!(session.refresh_token_hash(), hash_refresh_token("rt-2"));
        assert!(session.is_active(later));
        assert!(!session.is_active(now + chrono::Duration::days(2)));
    }

    #[test]
    fn retention_sweep_eligibility_requires_grace_period() {
        let now = Utc::now();
        let mut session = Session::open(user_id(), hash_refresh_token("rt"), DeviceMetadata::default(), now, chrono::Duration::days(1));
        session.revoke(now);
        assert!(!session.is_eligible_for_retention_sweep(now, chrono::Duration::days(7)));
        assert!(session.is_eligible_for_retention_sweep(now + chrono::Duration::days(8), chrono::Duration::days(7)));
    }

    #[test]
    fn refresh_token_hash_is_deterministic_and_non_reversible_looking() {
        let a = hash_refresh_token("same-input");
        let b = hash_refresh_token("same-input");
        assert_eq!(a, b);
        assert_ne!(a, "same-input");
    }
}

//! User identity: the principal a session, role assignment, or direct grant
//! is attached to, plus its state machine (`Anonymous -> Activated ->
//! Deleted`) and credential/identity-link bookkeeping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::directive::Directive;
use crate::error::{Error, Result};
use crate::role::RoleAssignment;

const MAX_USER_ID_LENGTH: usize = 128;

/// A user identifier, opaque to this crate beyond uniqueness and a length
/// bound. Typically assigned by the owning store (e.g. a UUID or a
/// tenant-prefixed string).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parses and validates a raw user id string.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::FormatError {
                reason: "user id is empty".to_string(),
            });
        }
        if raw.len() > MAX_USER_ID_LENGTH {
            return Err(Error::FormatError {
                reason: format!("user id exceeds {MAX_USER_ID_LENGTH} characters"),
            });
        }
        Ok(Self(raw))
    }

    /// The id's string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// A password credential, held zeroized in memory. Hashing itself is an
/// external collaborator (§1); this stores only the resulting hash.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PasswordCredential {
    #[serde(rename = "hash")]
    hash: String,
}

impl PasswordCredential {
    /// Wraps an already-computed password hash.
    #[must_use]
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// The stored hash, to be checked by an external password verifier.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredential").field("hash", &"[REDACTED]").finish()
    }
}

/// A link to an external identity provider's subject, e.g. an OAuth
/// `(provider, subject)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLink {
    /// The external provider's name, e.g. `"google"`.
    pub provider: String,
    /// The provider's stable subject identifier for this user.
    pub subject: String,
    /// Email reported by the provider, if any.
    pub email: Option<String>,
    /// Display name reported by the provider, if any.
    pub display_name: Option<String>,
    /// When this link was established.
    pub linked_at: DateTime<Utc>,
}

/// A direct, user-specific permission grant, always an Allow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGrant {
    /// The normalized permission path.
    pub path: String,
    /// Optional parameter bindings.
    pub parameters: std::collections::BTreeMap<String, String>,
}

impl UserGrant {
    /// Converts this grant into its equivalent Allow directive.
    #[must_use]
    pub fn as_directive(&self) -> Directive {
        Directive::new(
            crate::directive::DirectiveKind::Allow,
            self.path.clone(),
            self.parameters.clone(),
        )
    }
}

/// A user's activation state (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserState {
    /// No credential or identity link has ever been attached.
    Anonymous,
    /// At least one credential or identity link is attached.
    Activated,
    /// Terminal; removed by an admin or an abandoned-anonymous sweep.
    Deleted,
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    username: Option<String>,
    email: Option<String>,
    password_credential: Option<PasswordCredential>,
    state: UserState,
    role_assignments: Vec<RoleAssignment>,
    direct_grants: Vec<UserGrant>,
    identity_links: Vec<IdentityLink>,
    lockout_end: Option<DateTime<Utc>>,
    access_failed_count: u32,
    created_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl User {
    /// Creates a new anonymous user with the given id.
    #[must_use]
    pub fn anonymous(id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            username: None,
            email: None,
            password_credential: None,
            state: UserState::Anonymous,
            role_assignments: Vec::new(),
            direct_grants: Vec::new(),
            identity_links: Vec::new(),
            lockout_end: None,
            access_failed_count: 0,
            created_at: now,
            last_login_at: None,
        }
    }

    /// This user's id.
    #[must_use]
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// This user's activation state.
    #[must_use]
    pub fn state(&self) -> UserState {
        self.state
    }

    /// Optional chosen username.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// This user's role assignments.
    #[must_use]
    pub fn role_assignments(&self) -> &[RoleAssignment] {
        &self.role_assignments
    }

    /// This user's direct permission grants.
    #[must_use]
    pub fn direct_grants(&self) -> &[UserGrant] {
        &self.direct_grants
    }

    /// This user's linked external identities.
    #[must_use]
    pub fn identity_links(&self) -> &[IdentityLink] {
        &self.identity_links
    }

    /// Whether the user is currently locked out of password authentication.
    #[must_use]
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.lockout_end.is_some_and(|end| now < end)
    }

    /// The current consecutive failed-login count.
    #[must_use]
    pub fn access_failed_count(&self) -> u32 {
        self.access_failed_count
    }

    fn activate(&mut self, now: DateTime<Utc>) {
        if self.state == UserState::Anonymous {
            self.state = UserState::Activated;
        }
        let _ = now;
    }

    /// Attaches a password credential, activating the user if anonymous.
    /// At most one password credential may be attached; this replaces any
    /// existing one.
    pub fn set_password_credential(&mut self, credential: PasswordCredential, now: DateTime<Utc>) {
        self.password_credential = Some(credential);
        self.activate(now);
    }

    /// This user's password credential, if any.
    #[must_use]
    pub fn password_credential(&self) -> Option<&PasswordCredential> {
        self.password_credential.as_ref()
    }

    /// Sets this user's chosen username, activating the user if anonymous.
    /// Uniqueness is the owning [`crate::store::UserStore`]'s responsibility,
    /// not checked here.
    pub fn set_username(&mut self, username: impl Into<String>, now: DateTime<Utc>) {
        self.username = Some(username.into());
        self.activate(now);
    }

    /// Adds an identity link. Fails with [`Error::DuplicateEntity`] if
    /// `(provider, subject)` is already linked to this user.
    pub fn add_identity_link(&mut self, link: IdentityLink, now: DateTime<Utc>) -> Result<()> {
        if self
            .identity_links
            .iter()
            .any(|l| l.provider == link.provider && l.subject == link.subject)
        {
            return Err(Error::DuplicateEntity {
                what: format!("identity link {}:{}", link.provider, link.subject),
            });
        }
        self.identity_links.push(link);
        self.activate(now);
        Ok(())
    }

    /// Assigns a role to this user.
    pub fn assign_role(&mut self, assignment: RoleAssignment) {
        self.role_assignments.push(assignment);
    }

    /// Removes a role assignment by role id.
    pub fn unassign_role(&mut self, role_id: crate::role::RoleId) {
        self.role_assignments.retain(|a| a.role_id != role_id);
    }

    /// Grants a direct permission.
    pub fn add_direct_grant(&mut self, grant: UserGrant) {
        self.direct_grants.push(grant);
    }

    /// Revokes a direct permission grant by path.
    pub fn revoke_direct_grant(&mut self, path: &str) {
        self.direct_grants.retain(|g| g.path != path);
    }

    /// Records a successful password authentication: resets the failure
    /// counter and stamps the login time.
    pub fn record_successful_login(&mut self, now: DateTime<Utc>) {
        self.access_failed_count = 0;
        self.lockout_end = None;
        self.last_login_at = Some(now);
    }

    /// Records a failed password authentication attempt, applying a
    /// lockout once `threshold` consecutive failures accrue.
    pub fn record_failed_login(&mut self, now: DateTime<Utc>, threshold: u32, lockout_duration: chrono::Duration) {
        self.access_failed_count += 1;
        if self.access_failed_count >= threshold {
            self.lockout_end = Some(now + lockout_duration);
        }
    }

    /// Marks this user deleted. Terminal.
    pub fn mark_deleted(&mut self) {
        self.state = UserState::Deleted;
    }

    /// Whether this user is eligible for the abandoned-anonymous sweep:
    /// still anonymous and created before `cutoff`.
    #[must_use]
    pub fn is_abandoned_anonymous(&self, cutoff: DateTime<Utc>) -> bool {
        self.state == UserState::Anonymous && self.created_at < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use test_case::test_case;

    #[test_case(""; "empty")]
    #[test_case("   "; "whitespace only")]
    fn rejects_invalid_user_ids(raw: &str) {
        assert!(UserId::parse(raw).is_err());
    }

    #[test]
    fn rejects_overlong_user_ids() {
        let long = "x".repeat(MAX_USER_ID_LENGTH + 1);
        assert!(UserId::parse(long).is_err());
    }

    #[test]
    fn anonymous_user_activates_on_credential() {
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        assert_eq!(user.state(), UserState::Anonymous);
        user.set_password_credential(PasswordCredential::from_hash("hash"), now);
        assert_eq!(user.state(), UserState::Activated);
    }

    #[test]
    fn set_username_activates_anonymous_user() {
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        assert_eq!(user.username(), None);
        user.set_username("alice", now);
        assert_eq!(user.username(), Some("alice"));
        assert_eq!(user.state(), UserState::Activated);
    }

    #[test]
    fn identity_link_uniqueness_per_user() {
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        let link = IdentityLink {
            provider: "google".into(),
            subject: "sub-1".into(),
            email: None,
            display_name: None,
            linked_at: now,
        };
        assert!(user.add_identity_link(link.clone(), now).is_ok());
        assert!(matches!(
            user.add_identity_link(link, now),
            Err(Error::DuplicateEntity { .. })
        ));
    }

    #[test]
    fn lockout_applies_after_threshold_failures() {
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        for _ in 0..3 {
            user.record_failed_login(now, 3, chrono::Duration::minutes(15));
        }
        assert!(user.is_locked_out(now));
        assert!(!user.is_locked_out(now + chrono::Duration::minutes(16)));
    }

    #[test]
    fn successful_login_clears_lockout_state() {
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        user.record_failed_login(now, 1, chrono::Duration::minutes(15));
        assert!(user.is_locked_out(now));
        user.record_successful_login(now);
        assert!(!user.is_locked_out(now));
        assert_eq!(user.access_failed_count(), 0);
    }

    #[test]
    fn direct_grant_converts_to_allow_directive() {
        let grant = UserGrant {
            path: "api:user:profile".into(),
            parameters: BTreeMap::from([("userId".to_string(), "U-1".to_string())]),
        };
        let directive = grant.as_directive();
        assert_eq!(directive.kind, crate::directive::DirectiveKind::Allow);
    }

    #[test]
    fn abandoned_anonymous_detection_respects_cutoff() {
        let now = Utc::now();
        let user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        assert!(user.is_abandoned_anonymous(now + chrono::Duration::days(1)));
        assert!(!user.is_abandoned_anonymous(now - chrono::Duration::days(1)));
    }
}

//! # Claw Access
#![forbid(unsafe_code)]
//!
//! Identity and role-based access control for a multi-tenant API platform.
//!
//! This crate provides:
//!
//! - **A hierarchical permission catalogue**: an arena-backed tree of every
//!   guarded operation, built once at process start, with implicit
//!   `_read`/`_write` leaves on every internal node.
//! - **A scope-directive grammar**: `allow|deny;path[;k=v]*`, parsed and
//!   re-encoded canonically.
//! - **A closed-world evaluator**: deny-always-wins decisions over an
//!   ordered scope and a concrete request.
//! - **Roles and scope templates**: named bundles of `{placeholder}`
//!   directives, bound to concrete values by a role assignment.
//! - **Users, sessions, and bearer tokens**: credential verification,
//!   JWT issuance/validation/mutation, and the session lifecycle
//!   underneath refresh tokens.
//! - **Decision audit logging** and **typed configuration** for the host
//!   process.
//!
//! ## Quick Start
//!
//! ```rust
//! use claw_access::catalogue::{NodeSpec, PermissionCatalogue};
//! use claw_access::directive::directive_parse;
//! use claw_access::evaluator::{evaluate, Decision, Request};
//! use std::collections::BTreeMap;
//!
//! let catalogue = PermissionCatalogue::build(vec![NodeSpec::group(
//!     "api",
//!     "api root",
//!     vec![NodeSpec::group(
//!         "user",
//!         "user ops",
//!         vec![NodeSpec::read("profile", "profile read").with_parameters(vec!["userId".into()])],
//!     )
//!     .with_parameters(vec!["userId".into()])],
//! )])
//! .expect("catalogue builds");
//!
//! let scope = vec![directive_parse("allow;_read;userId=U-1").unwrap()];
//! let request = Request::new(
//!     "api:user:profile",
//!     BTreeMap::from([("userId".to_string(), "U-1".to_string())]),
//! );
//!
//! let decision = evaluate(&catalogue, &scope, &request).expect("path resolves");
//! assert_eq!(decision, Decision::Granted);
//! ```
//!
//! ## Roles, sessions, and tokens
//!
//! ```rust
//! use claw_access::role::{system_roles, RoleAssignment};
//! use claw_access::scope::resolve_effective_scope;
//! use claw_access::user::{User, UserId};
//! use chrono::Utc;
//! use std::collections::BTreeMap;
//!
//! let now = Utc::now();
//! let user_role = system_roles().into_iter().find(|r| r.code() == "user").unwrap();
//! let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
//! let assignment = RoleAssignment::new(
//!     user.id().clone(),
//!     &user_role,
//!     BTreeMap::from([("userId".to_string(), "U-1".to_string())]),
//! )
//! .expect("assignment covers required placeholders");
//! user.assign_role(assignment);
//!
//! let scope = resolve_effective_scope(&user, &[user_role]).expect("templates expand");
//! assert_eq!(scope.len(), 1);
//! ```
//!
//! ## Security considerations
//!
//! - Refresh tokens are stored hashed (BLAKE3) and compared in constant time
//! - Password credentials are zeroized on drop
//! - JWT secrets and password hashes are redacted from `Debug` output
//! - A denied decision never reveals the principal's scope, only the
//!   requested path

pub mod audit;
pub mod catalogue;
pub mod config;
pub mod credential;
pub mod directive;
pub mod error;
pub mod evaluator;
pub mod identifier;
#[cfg(test)]
pub mod mem;
pub mod role;
pub mod scope;
pub mod session;
pub mod store;
pub mod token;
pub mod user;

pub use error::{Error, Result};

pub use audit::{AccessLogger, DecisionEvent, NoopAccessLogger, Severity, TracingAccessLogger};
pub use catalogue::{AccessCategory, NodeId, NodeKind, NodeSpec, PermissionCatalogue, PermissionNode};
pub use config::{AuthConfig, JwtSettings, RetentionSettings};
pub use credential::{verify_password, CredentialValidationResult, LockoutPolicy};
pub use directive::{directive_encode, directive_parse, Directive, DirectiveKind, Scope};
pub use evaluator::{evaluate, evaluate_and_log, Decision, Request};
pub use role::{
    create_role, delete_role, find_system_role, replace_role_scope_templates, system_roles,
    update_role_metadata, Role, RoleAssignment, RoleId, ScopeTemplate,
};
pub use scope::resolve_effective_scope;
pub use session::{DeviceMetadata, Session, SessionId};
pub use store::{
    ApiKey, ApiKeyId, ApiKeyStore, ChallengeConsumeOutcome, PasskeyChallenge, PasskeyChallengeId,
    PasskeyChallengeStore, RoleStore, SessionStore, StoreError, UserStore,
};
pub use token::{
    sweep_abandoned_anonymous_users, sweep_expired_or_revoked_api_keys, sweep_expired_sessions,
    JwtClaims, OpenedSession, Principal, TokenConfig, TokenService,
};
pub use user::{IdentityLink, PasswordCredential, User, UserGrant, UserId, UserState};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoopAccessLogger;
    use crate::mem::MemSessionStore;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;

    fn catalogue() -> PermissionCatalogue {
        PermissionCatalogue::build(vec![NodeSpec::group(
            "api",
            "api root",
            vec![NodeSpec::group(
                "portfolio",
                "portfolio ops",
                vec![NodeSpec::read("positions", "positions read").with_parameters(vec!["portfolioId".into()])],
            )],
        )])
        .unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    // Scenario 4: role expansion end-to-end.
    #[test]
    fn scenario_4_role_expansion() {
        let cat = catalogue();
        let role = Role::new(
            "portfolio_reader",
            "Portfolio Reader",
            "reads one portfolio's positions",
            vec![ScopeTemplate::new(
                DirectiveKind::Allow,
                "api:portfolio:positions:read",
                BTreeMap::from([("portfolioId".to_string(), "{portfolioId}".to_string())]),
            )],
        )
        .unwrap();

        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        let assignment = RoleAssignment::new(
            user.id().clone(),
            &role,
            BTreeMap::from([("portfolioId".to_string(), "P-123".to_string())]),
        )
        .unwrap();
        user.assign_role(assignment);

        let scope = resolve_effective_scope(&user, std::slice::from_ref(&role)).unwrap();
        assert!(scope
            .iter()
            .any(|d| directive_encode(d) == "allow;api:portfolio:positions:read;portfolioId=P-123"));

        let granted = evaluate(
            &cat,
            &scope,
            &Request::new("api:portfolio:positions:read", params(&[("portfolioId", "P-123")])),
        )
        .unwrap();
        assert_eq!(granted, Decision::Granted);

        let denied = evaluate(
            &cat,
            &scope,
            &Request::new("api:portfolio:positions:read", params(&[("portfolioId", "P-999")])),
        )
        .unwrap();
        assert_eq!(denied, Decision::Denied);
    }

    // Scenario 5: stale-schema rejection end-to-end.
    #[tokio::test]
    async fn scenario_5_stale_schema_rejection() {
        let store = MemSessionStore::default();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        let user_id = UserId::parse("U-1").unwrap();

        let original = TokenService::new(TokenConfig::new(vec![9u8; 32], "iss", "aud", 3600, 60, "1"));
        let token = original
            .generate(&user_id, None, &["user".to_string()], &Vec::new(), None, None, now)
            .unwrap();

        let bumped = TokenService::new(TokenConfig::new(vec![9u8; 32], "iss", "aud", 3600, 60, "2"));
        let result = bumped
            .validate(&token, &store, now, Duration::seconds(5), &cancel, &NoopAccessLogger)
            .await;
        assert!(matches!(result, Err(Error::AuthenticationFailed(error::AuthFailureKind::StaleSchema))));
    }

    // Scenario 6: session revocation end-to-end.
    #[tokio::test]
    async fn scenario_6_session_revocation() {
        let store = MemSessionStore::default();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        let user_id = UserId::parse("U-1").unwrap();

        let service = TokenService::new(TokenConfig::new(vec![9u8; 32], "iss", "aud", 3600, 60, "1"));
        let opened = service
            .open_session(
                &user_id,
                None,
                &["user".to_string()],
                &Vec::new(),
                DeviceMetadata::default(),
                Duration::days(30),
                &store,
                now,
                &cancel,
                &NoopAccessLogger,
            )
            .await
            .unwrap();

        assert!(service
            .validate(&opened.access_token, &store, now, Duration::seconds(5), &cancel, &NoopAccessLogger)
            .await
            .is_ok());

        service.revoke(opened.session_id, &store, &cancel, &NoopAccessLogger).await.unwrap();

        let result = service
            .validate(&opened.access_token, &store, now, Duration::seconds(5), &cancel, &NoopAccessLogger)
            .await;
        assert!(matches!(result, Err(Error::AuthenticationFailed(error::AuthFailureKind::SessionRevoked))));
    }

    #[tokio::test]
    async fn credential_verification_feeds_session_opening() {
        let store = MemSessionStore::default();
        let cancel = CancellationToken::new();
        let now = Utc::now();

        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        user.set_password_credential(PasswordCredential::from_hash("correct-hash"), now);

        verify_password(
            &mut user,
            "secret",
            |_, hash| hash == "correct-hash",
            LockoutPolicy {
                failure_threshold: 5,
                lockout_duration: Duration::minutes(15),
            },
            now,
            &NoopAccessLogger,
        )
        .unwrap();

        let admin_role = system_roles().into_iter().find(|r| r.code() == "admin").unwrap();
        let assignment = RoleAssignment::new(user.id().clone(), &admin_role, BTreeMap::new()).unwrap();
        user.assign_role(assignment);
        let scope = resolve_effective_scope(&user, std::slice::from_ref(&admin_role)).unwrap();

        let service = TokenService::new(TokenConfig::new(vec![9u8; 32], "iss", "aud", 3600, 60, "1"));
        let opened = service
            .open_session(
                user.id(),
                user.username(),
                &["admin".to_string()],
                &scope,
                DeviceMetadata::default(),
                Duration::days(30),
                &store,
                now,
                &cancel,
                &NoopAccessLogger,
            )
            .await
            .unwrap();

        let principal = service
            .validate(&opened.access_token, &store, now, Duration::seconds(5), &cancel, &NoopAccessLogger)
            .await
            .unwrap();
        assert_eq!(principal.user_id, *user.id());
        assert!(!principal.scope_directives.is_empty());
    }
}

//! Token service: JWT issuance, validation, and mutation, plus the session
//! lifecycle operations that sit underneath refresh tokens (§4.7).

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;

use crate::audit::{AccessLogger, DecisionEvent};
use crate::directive::{directive_encode, directive_parse, Scope};
use crate::error::{AuthFailureKind, Error, Result};
use crate::session::{hash_refresh_token, DeviceMetadata, Session, SessionId};
use crate::store::{ApiKeyStore, SessionStore, UserStore};
use crate::user::UserId;

/// JWT claims carried by every token this service issues (§4.7.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Subject: the user id.
    pub sub: String,
    /// The backing session's id, if this token is session-bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Role claim values, `"<CODE>[;key=value]*"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Space-joined directive encodings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    /// The RBAC schema version this token was minted against.
    pub rbac_version: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Display name, if supplied at issuance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl JwtClaims {
    /// The scope directives encoded on this token, parsed back per §4.3.
    pub fn parsed_scope(&self) -> Result<Scope> {
        self.scope.iter().map(|s| directive_parse(s)).collect()
    }

    fn exp_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Per-environment JWT configuration (§6.4's `jwt.*` options).
#[derive(Clone)]
pub struct TokenConfig {
    secret: Vec<u8>,
    issuer: String,
    audience: String,
    default_expiration: Duration,
    clock_skew: Duration,
    rbac_version: String,
}

impl TokenConfig {
    /// Builds a token configuration. `default_expiration_seconds` and
    /// `clock_skew_seconds` are clamped to `>= 0` per §6.4.
    #[must_use]
    pub fn new(
        secret: Vec<u8>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        default_expiration_seconds: i64,
        clock_skew_seconds: i64,
        rbac_version: impl Into<String>,
    ) -> Self {
        Self {
            secret,
            issuer: issuer.into(),
            audience: audience.into(),
            default_expiration: Duration::seconds(default_expiration_seconds.max(0)),
            clock_skew: Duration::seconds(clock_skew_seconds.max(0)),
            rbac_version: rbac_version.into(),
        }
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.secret)
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.secret)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);
        validation.leeway = self.clock_skew.num_seconds().max(0) as u64;
        validation
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("default_expiration", &self.default_expiration)
            .field("clock_skew", &self.clock_skew)
            .field("rbac_version", &self.rbac_version)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// The resolved identity and grants carried by a validated token (§4.7.3
/// step 6).
#[derive(Debug, Clone)]
pub struct Principal {
    /// The authenticated user's id.
    pub user_id: UserId,
    /// Display name, if the token carried one.
    pub name: Option<String>,
    /// Role claim values as issued, unparsed.
    pub roles: Vec<String>,
    /// The principal's scope directives.
    pub scope_directives: Scope,
}

/// A freshly opened session's issued material (§4.7.5's `OpenSession`
/// return shape).
pub struct OpenedSession {
    /// The signed access token.
    pub access_token: String,
    /// The raw refresh token. Only the caller sees the raw value; the store
    /// retains only its hash.
    pub refresh_token: String,
    /// The backing session's id.
    pub session_id: SessionId,
    /// Access-token lifetime in seconds, for client-side scheduling.
    pub expires_in_seconds: i64,
}

fn random_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds, validates, and mutates JWTs, and drives the session lifecycle
/// operations layered on top of refresh tokens.
pub struct TokenService {
    config: TokenConfig,
}

impl TokenService {
    /// Constructs a token service over the given configuration.
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    /// Assembles and signs a token (§4.7.2). `directives` are normalized via
    /// their canonical encoding and de-duplicated; a caller-supplied
    /// `expiry` overrides the configured default lifetime.
    pub fn generate(
        &self,
        user_id: &UserId,
        username: Option<&str>,
        roles: &[String],
        directives: &Scope,
        session_id: Option<SessionId>,
        expiry: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let lifetime = expiry.unwrap_or(self.config.default_expiration).max(Duration::zero());
        let mut scope_encodings: Vec<String> = directives.iter().map(directive_encode).collect();
        scope_encodings.sort();
        scope_encodings.dedup();

        let claims = JwtClaims {
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            sub: user_id.to_string(),
            sid: session_id.map(|s| s.to_string()),
            roles: roles.to_vec(),
            scope: scope_encodings,
            rbac_version: self.config.rbac_version.clone(),
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            name: username.map(str::to_string),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.config.encoding_key()).map_err(|_| {
            Error::AuthenticationFailed(AuthFailureKind::Malformed)
        })
    }

    /// Decodes and signature-verifies `token` without applying the
    /// environment/session/schema checks in [`TokenService::validate`].
    /// Used internally and by [`TokenService::mutate`]'s refresh path.
    fn decode(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.config.decoding_key(), &self.config.validation())
            .map(|data| data.claims)
            .map_err(|e| {
                let kind = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthFailureKind::Expired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthFailureKind::BadSignature,
                    _ => AuthFailureKind::Malformed,
                };
                Error::AuthenticationFailed(kind)
            })
    }

    /// Validates a token per §4.7.3's six steps, consulting `sessions` for
    /// step 5 if the token carries a `sid`. `deadline` bounds the session
    /// lookup: if it elapses before the store answers, validation fails
    /// with [`AuthFailureKind::Timeout`] rather than hanging. The outcome is
    /// logged to `logger` as a [`DecisionEvent::TokenValidated`] (§10.2's
    /// token-validation emission point) regardless of success or failure.
    pub async fn validate(
        &self,
        token: &str,
        sessions: &impl SessionStore,
        now: DateTime<Utc>,
        deadline: Duration,
        cancel: &CancellationToken,
        logger: &dyn AccessLogger,
    ) -> Result<Principal> {
        let result = self.validate_inner(token, sessions, now, deadline, cancel).await;
        logger.log(&match &result {
            Ok(principal) => DecisionEvent::TokenValidated {
                principal: Some(principal.user_id.to_string()),
                succeeded: true,
                failure_reason: None,
            },
            Err(Error::AuthenticationFailed(kind)) => DecisionEvent::TokenValidated {
                principal: None,
                succeeded: false,
                failure_reason: Some(kind.to_string()),
            },
            Err(_) => DecisionEvent::TokenValidated {
                principal: None,
                succeeded: false,
                failure_reason: None,
            },
        });
        result
    }

    async fn validate_inner(
        &self,
        token: &str,
        sessions: &impl SessionStore,
        now: DateTime<Utc>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Principal> {
        let claims = self.decode(token)?;

        if claims.rbac_version != self.config.rbac_version {
            return Err(Error::AuthenticationFailed(AuthFailureKind::StaleSchema));
        }

        if let Some(exp) = claims.exp_datetime() {
            if now - self.config.clock_skew > exp {
                return Err(Error::AuthenticationFailed(AuthFailureKind::Expired));
            }
        }

        if let Some(sid_str) = &claims.sid {
            let sid = parse_session_id(sid_str)?;
            let std_deadline = deadline.to_std().unwrap_or(std::time::Duration::ZERO);
            let session = tokio::time::timeout(std_deadline, sessions.get_by_id(sid, cancel))
                .await
                .map_err(|_| Error::AuthenticationFailed(AuthFailureKind::Timeout))?
                .map_err(Error::from)?
                .ok_or(Error::AuthenticationFailed(AuthFailureKind::SessionRevoked))?;
            if !session.is_active(now) {
                return Err(Error::AuthenticationFailed(AuthFailureKind::SessionRevoked));
            }
        }

        let user_id = UserId::parse(&claims.sub).map_err(|_| Error::AuthenticationFailed(AuthFailureKind::Malformed))?;
        let scope_directives = claims
            .parsed_scope()
            .map_err(|_| Error::AuthenticationFailed(AuthFailureKind::Malformed))?;

        Ok(Principal {
            user_id,
            name: claims.name.clone(),
            roles: claims.roles.clone(),
            scope_directives,
        })
    }

    /// Mutates an already-issued token's scope/claims and re-signs it
    /// (§4.7.4). Unlike [`TokenService::validate`], a tolerably expired
    /// token is accepted when `tolerate_expired` is set, to support refresh
    /// flows that mutate a token whose access lifetime just lapsed.
    #[allow(clippy::too_many_arguments)]
    pub fn mutate(
        &self,
        token: &str,
        add_scopes: &Scope,
        remove_scopes: &Scope,
        expiry: Option<Duration>,
        tolerate_expired: bool,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(Error::AuthenticationFailed(AuthFailureKind::Expired)) if tolerate_expired => {
                decode::<JwtClaims>(token, &self.config.decoding_key(), &{
                    let mut v = self.config.validation();
                    v.validate_exp = false;
                    v
                })
                .map(|d| d.claims)
                .map_err(|_| Error::AuthenticationFailed(AuthFailureKind::Malformed))?
            }
            Err(e) => return Err(e),
        };

        let removed: Vec<String> = remove_scopes.iter().map(directive_encode).collect();
        let mut scope: std::collections::BTreeSet<String> =
            claims.scope.into_iter().filter(|s| !removed.contains(s)).collect();
        scope.extend(add_scopes.iter().map(directive_encode));

        let lifetime = expiry.unwrap_or(self.config.default_expiration).max(Duration::zero());
        let new_claims = JwtClaims {
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            scope: scope.into_iter().collect(),
            rbac_version: self.config.rbac_version.clone(),
            ..claims
        };

        encode(&Header::new(Algorithm::HS256), &new_claims, &self.config.encoding_key())
            .map_err(|_| Error::AuthenticationFailed(AuthFailureKind::Malformed))
    }

    /// Opens a new session for `user_id` (§4.7.5's `OpenSession`): mints a
    /// session record, its refresh token, and a bound access token. Logs a
    /// [`DecisionEvent::SessionOpened`] to `logger` on success (§10.2).
    #[allow(clippy::too_many_arguments)]
    pub async fn open_session(
        &self,
        user_id: &UserId,
        username: Option<&str>,
        roles: &[String],
        directives: &Scope,
        device: DeviceMetadata,
        refresh_ttl: Duration,
        sessions: &impl SessionStore,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        logger: &dyn AccessLogger,
    ) -> Result<OpenedSession> {
        let refresh_token = random_refresh_token();
        let session = Session::open(user_id.clone(), hash_refresh_token(&refresh_token), device, now, refresh_ttl);
        let session_id = session.id();
        sessions.save(&session, cancel).await.map_err(Error::from)?;

        let access_token = self.generate(user_id, username, roles, directives, Some(session_id), None, now)?;

        logger.log(&DecisionEvent::SessionOpened {
            principal: user_id.to_string(),
            session_id: session_id.to_string(),
        });

        Ok(OpenedSession {
            access_token,
            refresh_token,
            session_id,
            expires_in_seconds: self.config.default_expiration.num_seconds(),
        })
    }

    /// Verifies `refresh_token` against its session's stored hash in
    /// constant time, rotates it, and mints a fresh access token
    /// (§4.7.5's `Refresh`). Logs a [`DecisionEvent::SessionRefreshed`] to
    /// `logger` on success (§10.2).
    #[allow(clippy::too_many_arguments)]
    pub async fn refresh(
        &self,
        session_id: SessionId,
        refresh_token: &str,
        username: Option<&str>,
        roles: &[String],
        directives: &Scope,
        refresh_ttl: Duration,
        sessions: &impl SessionStore,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        logger: &dyn AccessLogger,
    ) -> Result<OpenedSession> {
        let mut session = sessions
            .get_by_id(session_id, cancel)
            .await
            .map_err(Error::from)?
            .ok_or(Error::AuthenticationFailed(AuthFailureKind::SessionRevoked))?;

        if !session.is_active(now) {
            return Err(Error::AuthenticationFailed(AuthFailureKind::SessionRevoked));
        }

        let presented_hash = hash_refresh_token(refresh_token);
        let matches: bool = presented_hash
            .as_bytes()
            .ct_eq(session.refresh_token_hash().as_bytes())
            .into();
        if !matches {
            return Err(Error::AuthenticationFailed(AuthFailureKind::BadCredential));
        }

        let new_refresh_token = random_refresh_token();
        session.rotate_refresh_token(hash_refresh_token(&new_refresh_token), now, refresh_ttl);
        crate::store::retry_on_conflict(|| sessions.save(&session, cancel))
            .await
            .map_err(Error::from)?;

        let access_token = self.generate(
            session.user_id(),
            username,
            roles,
            directives,
            Some(session.id()),
            None,
            now,
        )?;

        logger.log(&DecisionEvent::SessionRefreshed {
            principal: session.user_id().to_string(),
            session_id: session.id().to_string(),
        });

        Ok(OpenedSession {
            access_token,
            refresh_token: new_refresh_token,
            session_id: session.id(),
            expires_in_seconds: self.config.default_expiration.num_seconds(),
        })
    }

    /// Revokes a single session (§4.7.5's `Revoke`). Logs a
    /// [`DecisionEvent::SessionRevoked`] to `logger` on success (§10.2); the
    /// session's owner is looked up first purely to give the logged event a
    /// principal, and is never required for the revoke itself to succeed.
    pub async fn revoke(
        &self,
        session_id: SessionId,
        sessions: &impl SessionStore,
        cancel: &CancellationToken,
        logger: &dyn AccessLogger,
    ) -> Result<()> {
        let principal = sessions
            .get_by_id(session_id, cancel)
            .await
            .ok()
            .flatten()
            .map(|s| s.user_id().to_string())
            .unwrap_or_default();
        sessions.revoke(session_id, cancel).await.map_err(Error::from)?;
        logger.log(&DecisionEvent::SessionRevoked {
            principal,
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Revokes every active session for a user (§4.7.5's `RevokeAllForUser`).
    /// Logs a single [`DecisionEvent::SessionRevoked`] to `logger` summarizing
    /// the count revoked (§10.2).
    pub async fn revoke_all_for_user(
        &self,
        user_id: &UserId,
        sessions: &impl SessionStore,
        cancel: &CancellationToken,
        logger: &dyn AccessLogger,
    ) -> Result<u64> {
        let count = sessions.revoke_all_for_user(user_id, cancel).await.map_err(Error::from)?;
        logger.log(&DecisionEvent::SessionRevoked {
            principal: user_id.to_string(),
            session_id: format!("*(all, {count} revoked)"),
        });
        Ok(count)
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId> {
    uuid::Uuid::parse_str(raw)
        .map(SessionId)
        .map_err(|_| Error::AuthenticationFailed(AuthFailureKind::Malformed))
}

/// Background sweep removing sessions expired beyond `retention` (§4.7.5,
/// §10.5): a plain function invoked on whatever schedule the host process
/// sets up, not self-scheduling.
pub async fn sweep_expired_sessions(sessions: &impl SessionStore, retention: Duration, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<u64> {
    let cutoff = now - retention;
    sessions.delete_expired(cutoff, cancel).await.map_err(Error::from)
}

/// Background sweep removing API keys expired or revoked beyond their
/// respective retention windows (§4.7.5, §10.5, §11's carried-over
/// `apikey.*_retention_days` settings): a plain function invoked on whatever
/// schedule the host process sets up, not self-scheduling.
pub async fn sweep_expired_or_revoked_api_keys(
    keys: &impl ApiKeyStore,
    expired_retention: Duration,
    revoked_retention: Duration,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let expired_before = now - expired_retention;
    let revoked_before = now - revoked_retention;
    keys.delete_expired_or_revoked(expired_before, revoked_before, cancel).await.map_err(Error::from)
}

/// Background sweep removing anonymous users abandoned beyond `retention`
/// (§4.9, §10.5): a plain function invoked on whatever schedule the host
/// process sets up, not self-scheduling.
pub async fn sweep_abandoned_anonymous_users(
    users: &impl UserStore,
    retention: Duration,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let cutoff = now - retention;
    users.delete_abandoned_anonymous(cutoff, cancel).await.map_err(Error::from)
}

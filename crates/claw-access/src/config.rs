//! Typed configuration (§6.4): the recognized options a host process loads
//! and hands to the token service and background sweeps.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// JWT issuance/validation configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    /// HMAC signing key. Required.
    pub secret: Vec<u8>,
    /// Token issuer claim and validation target. Required.
    pub issuer: String,
    /// Token audience claim and validation target. Required.
    pub audience: String,
    /// Default access-token lifetime, in seconds. Clamped to `>= 0`.
    pub default_expiration_seconds: i64,
    /// Allowed clock skew when checking `exp`, in seconds. Clamped to `>= 0`.
    pub clock_skew_seconds: i64,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("default_expiration_seconds", &self.default_expiration_seconds)
            .field("clock_skew_seconds", &self.clock_skew_seconds)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Retention windows for the background sweeps (§4.7.5, §11).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Days a revoked/expired session record lingers before deletion.
    pub session_refresh_retention_days: i64,
    /// Days an expired API key record lingers before deletion.
    pub apikey_expired_retention_days: i64,
    /// Days a revoked API key record lingers before deletion.
    pub apikey_revoked_retention_days: i64,
    /// Days an abandoned anonymous user lingers before deletion.
    pub anonymous_retention_days: i64,
}

impl RetentionSettings {
    /// [`session_refresh_retention_days`](Self::session_refresh_retention_days)
    /// as a [`chrono::Duration`], for [`crate::token::sweep_expired_sessions`].
    #[must_use]
    pub fn session_refresh_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.session_refresh_retention_days)
    }

    /// [`apikey_expired_retention_days`](Self::apikey_expired_retention_days)
    /// as a [`chrono::Duration`], for
    /// [`crate::token::sweep_expired_or_revoked_api_keys`].
    #[must_use]
    pub fn apikey_expired_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.apikey_expired_retention_days)
    }

    /// [`apikey_revoked_retention_days`](Self::apikey_revoked_retention_days)
    /// as a [`chrono::Duration`], for
    /// [`crate::token::sweep_expired_or_revoked_api_keys`].
    #[must_use]
    pub fn apikey_revoked_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.apikey_revoked_retention_days)
    }

    /// [`anonymous_retention_days`](Self::anonymous_retention_days) as a
    /// [`chrono::Duration`], for
    /// [`crate::token::sweep_abandoned_anonymous_users`].
    #[must_use]
    pub fn anonymous_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.anonymous_retention_days)
    }
}

/// The full configuration this crate consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JWT settings.
    pub jwt: JwtSettings,
    /// Current RBAC schema version. Required; bumping it invalidates every
    /// outstanding token.
    pub rbac_version: String,
    /// Retention windows.
    pub retention: RetentionSettings,
}

impl AuthConfig {
    /// Builds a configuration from already-typed parts, applying the
    /// clamps and requiredness checks in §6.4.
    pub fn new(jwt: JwtSettings, rbac_version: impl Into<String>, retention: RetentionSettings) -> Result<Self> {
        let rbac_version = rbac_version.into();
        if jwt.secret.is_empty() {
            return Err(Error::FormatError {
                reason: "jwt.secret is required".to_string(),
            });
        }
        if jwt.issuer.trim().is_empty() {
            return Err(Error::FormatError {
                reason: "jwt.issuer is required".to_string(),
            });
        }
        if jwt.audience.trim().is_empty() {
            return Err(Error::FormatError {
                reason: "jwt.audience is required".to_string(),
            });
        }
        if rbac_version.trim().is_empty() {
            return Err(Error::FormatError {
                reason: "rbac.version is required".to_string(),
            });
        }
        for (name, value) in [
            ("session.refresh_retention_days", retention.session_refresh_retention_days),
            ("apikey.expired_retention_days", retention.apikey_expired_retention_days),
            ("apikey.revoked_retention_days", retention.apikey_revoked_retention_days),
            ("anonymous.retention_days", retention.anonymous_retention_days),
        ] {
            if value < 1 {
                return Err(Error::FormatError {
                    reason: format!("{name} must be >= 1, got {value}"),
                });
            }
        }

        Ok(Self {
            jwt: JwtSettings {
                default_expiration_seconds: jwt.default_expiration_seconds.max(0),
                clock_skew_seconds: jwt.clock_skew_seconds.max(0),
                ..jwt
            },
            rbac_version,
            retention,
        })
    }

    /// Builds a [`crate::token::TokenConfig`] from this configuration's JWT
    /// settings and RBAC version.
    #[must_use]
    pub fn token_config(&self) -> crate::token::TokenConfig {
        crate::token::TokenConfig::new(
            self.jwt.secret.clone(),
            self.jwt.issuer.clone(),
            self.jwt.audience.clone(),
            self.jwt.default_expiration_seconds,
            self.jwt.clock_skew_seconds,
            self.rbac_version.clone(),
        )
    }

    /// Parses a configuration from JSON, re-running the same requiredness
    /// checks and clamps as [`AuthConfig::new`] (deserializing does not
    /// bypass them).
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Self = serde_json::from_str(json).map_err(|e| Error::FormatError { reason: e.to_string() })?;
        Self::new(raw.jwt, raw.rbac_version, raw.retention)
    }

    /// Serializes this configuration to JSON, secret included. Callers
    /// persisting this output are responsible for protecting it as they
    /// would the secret itself.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::FormatError { reason: e.to_string() })
    }
}

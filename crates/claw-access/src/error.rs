//! Error taxonomy for the access-control core.
//!
//! Every public operation returns [`Result`]. The evaluator and parser are
//! total except for the input-shape failures named here; the token service
//! and store adapters surface an exact kind rather than a generic failure,
//! and a denied decision never carries more than the permission path.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::store::StoreError;

/// The fixed set of reasons a bearer token or credential can fail to
/// authenticate a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailureKind {
    /// A password, external identity, or passkey assertion did not verify.
    #[error("bad credential")]
    BadCredential,
    /// The token's signature does not match its claimed payload.
    #[error("bad signature")]
    BadSignature,
    /// The token's `exp` claim, with clock skew applied, has passed.
    #[error("expired")]
    Expired,
    /// The token's `rbac_version` does not match the running system's version.
    #[error("stale schema")]
    StaleSchema,
    /// The token's `sid` session is missing, revoked, or expired.
    #[error("session revoked")]
    SessionRevoked,
    /// The token is not a well-formed JWT.
    #[error("malformed token")]
    Malformed,
    /// The validation deadline elapsed before a decision was reached.
    #[error("timed out")]
    Timeout,
}

/// The crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Authentication of a credential or bearer token failed. Maps to 401.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[from] AuthFailureKind),

    /// The evaluator denied the request. Maps to 403. Never carries the
    /// principal's scope or the reason beyond "denied".
    #[error("permission denied for {path}")]
    PermissionDenied {
        /// The permission path that was requested.
        path: String,
        /// The request parameters, retained only for caller-side logging.
        parameters: BTreeMap<String, String>,
    },

    /// An identifier or directive failed to parse. Maps to 400 on ingress,
    /// 500 if the malformed value originated inside the system.
    #[error("format error: {reason}")]
    FormatError {
        /// Human-readable description of what failed to parse.
        reason: String,
    },

    /// The evaluator was asked to decide a path absent from the catalogue.
    /// Maps to 500: a caller should never construct such a request.
    #[error("unknown permission: {path}")]
    UnknownPermission {
        /// The path that has no catalogue entry.
        path: String,
    },

    /// A create operation collided with an existing unique key. Maps to 409.
    #[error("duplicate entity: {what}")]
    DuplicateEntity {
        /// Description of the entity and key that collided.
        what: String,
    },

    /// A lookup by id/code found nothing. Maps to 404.
    #[error("not found: {what}")]
    NotFound {
        /// Description of what was being looked up.
        what: String,
    },

    /// A role code collided with a system role's reserved code. Maps to 409.
    #[error("reserved name: {code}")]
    ReservedName {
        /// The reserved code.
        code: String,
    },

    /// A mutation was attempted against a system role. Maps to 409.
    #[error("system role is immutable: {code}")]
    SystemRoleImmutable {
        /// The system role's code.
        code: String,
    },

    /// A role assignment did not supply a placeholder its role's templates
    /// require. Maps to 400.
    #[error("missing role parameter: {placeholder}")]
    MissingRoleParameter {
        /// The unsatisfied placeholder name.
        placeholder: String,
    },

    /// A one-shot passkey challenge was presented a second time, or is
    /// unknown, or has expired.
    #[error("passkey challenge already consumed")]
    ChallengeAlreadyConsumed,

    /// A store write collided with a concurrent writer. Caller may retry.
    #[error("concurrency conflict")]
    ConcurrencyConflict,

    /// A store operation failed for reasons outside this crate's control.
    #[error("io failed: {reason}")]
    IoFailed {
        /// Description of the underlying failure.
        reason: String,
    },

    /// A store-touching operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { what } => Error::NotFound { what },
            StoreError::DuplicateKey { what } => Error::DuplicateEntity { what },
            StoreError::ConcurrencyConflict => Error::ConcurrencyConflict,
            StoreError::IoFailed { reason } => Error::IoFailed { reason },
            StoreError::Cancelled => Error::Cancelled,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

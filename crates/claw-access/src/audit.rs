//! Decision audit logging: one event per evaluator decision, token
//! validation outcome, session lifecycle transition, and credential
//! verification outcome (§1's "no retention policy beyond emitting an
//! event per decision" — retention and storage are the host's job, not
//! this crate's).

use std::fmt;

use crate::evaluator::Decision;

/// How serious an audit event is, ordered `Info < Notice < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine, expected outcome.
    Info,
    /// Worth surfacing but not actionable on its own.
    Notice,
    /// A denied or failed outcome a human may want to investigate.
    Warning,
    /// A security-relevant outcome: signature mismatch, stale schema, replay.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A single audit-worthy occurrence.
#[derive(Debug, Clone)]
pub enum DecisionEvent {
    /// The evaluator reached a decision for a concrete request.
    ScopeDecision {
        /// The principal the request was evaluated for.
        principal: String,
        /// The permission path requested.
        permission_path: String,
        /// The evaluator's decision.
        decision: Decision,
    },
    /// A bearer token was validated, successfully or not.
    TokenValidated {
        /// The principal, if validation got far enough to identify one.
        principal: Option<String>,
        /// Whether validation succeeded.
        succeeded: bool,
        /// The failure kind's display text, if validation failed.
        failure_reason: Option<String>,
    },
    /// A session was opened.
    SessionOpened {
        /// The session's owner.
        principal: String,
        /// The session's id.
        session_id: String,
    },
    /// A session's refresh token was rotated.
    SessionRefreshed {
        /// The session's owner.
        principal: String,
        /// The session's id.
        session_id: String,
    },
    /// A session was revoked.
    SessionRevoked {
        /// The session's owner.
        principal: String,
        /// The session's id.
        session_id: String,
    },
    /// A credential verification attempt concluded.
    CredentialVerified {
        /// The principal presenting the credential, if known.
        principal: Option<String>,
        /// Which credential kind was verified: `"password"`, `"external"`,
        /// or `"passkey"`.
        method: &'static str,
        /// Whether verification succeeded.
        succeeded: bool,
    },
}

impl DecisionEvent {
    /// This event's severity, used by [`AccessLogger::log_if_severe`].
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            DecisionEvent::ScopeDecision { decision, .. } => match decision {
                Decision::Granted => Severity::Info,
                Decision::Denied => Severity::Notice,
            },
            DecisionEvent::TokenValidated { succeeded, failure_reason, .. } => {
                if *succeeded {
                    Severity::Info
                } else if matches!(failure_reason.as_deref(), Some("bad signature") | Some("stale schema")) {
                    Severity::Critical
                } else {
                    Severity::Warning
                }
            }
            DecisionEvent::SessionOpened { .. } => Severity::Info,
            DecisionEvent::SessionRefreshed { .. } => Severity::Info,
            DecisionEvent::SessionRevoked { .. } => Severity::Notice,
            DecisionEvent::CredentialVerified { succeeded, .. } => {
                if *succeeded {
                    Severity::Info
                } else {
                    Severity::Warning
                }
            }
        }
    }

    /// A short event-type label for structured logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            DecisionEvent::ScopeDecision { .. } => "scope_decision",
            DecisionEvent::TokenValidated { .. } => "token_validated",
            DecisionEvent::SessionOpened { .. } => "session_opened",
            DecisionEvent::SessionRefreshed { .. } => "session_refreshed",
            DecisionEvent::SessionRevoked { .. } => "session_revoked",
            DecisionEvent::CredentialVerified { .. } => "credential_verified",
        }
    }
}

/// Pluggable sink for [`DecisionEvent`]s.
pub trait AccessLogger: Send + Sync {
    /// Logs an event unconditionally.
    fn log(&self, event: &DecisionEvent);

    /// Logs an event only if its severity is at or above `min_severity`.
    fn log_if_severe(&self, event: &DecisionEvent, min_severity: Severity) {
        if event.severity() >= min_severity {
            self.log(event);
        }
    }
}

/// Routes events through `tracing`, at a level matching severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLogger;

impl AccessLogger for TracingAccessLogger {
    fn log(&self, event: &DecisionEvent) {
        let event_type = event.event_type();
        let severity = event.severity();
        match event {
            DecisionEvent::ScopeDecision { principal, permission_path, decision } => {
                let decision_str = match decision {
                    Decision::Granted => "granted",
                    Decision::Denied => "denied",
                };
                log_at(severity, event_type, principal, decision_str, permission_path);
            }
            DecisionEvent::TokenValidated { principal, succeeded, .. } => {
                let principal = principal.as_deref().unwrap_or("unknown");
                log_at(severity, event_type, principal, if *succeeded { "granted" } else { "denied" }, "");
            }
            DecisionEvent::SessionOpened { principal, session_id }
            | DecisionEvent::SessionRefreshed { principal, session_id }
            | DecisionEvent::SessionRevoked { principal, session_id } => {
                log_at(severity, event_type, principal, "", session_id);
            }
            DecisionEvent::CredentialVerified { principal, succeeded, .. } => {
                let principal = principal.as_deref().unwrap_or("unknown");
                log_at(severity, event_type, principal, if *succeeded { "granted" } else { "denied" }, "");
            }
        }
    }
}

fn log_at(severity: Severity, event: &str, principal: &str, decision: &str, permission_path: &str) {
    match severity {
        Severity::Info => tracing::info!(target: "claw_access", %event, %principal, %decision, %permission_path),
        Severity::Notice => tracing::info!(target: "claw_access", %event, %principal, %decision, %permission_path, notice = true),
        Severity::Warning => tracing::warn!(target: "claw_access", %event, %principal, %decision, %permission_path),
        Severity::Critical => tracing::error!(target: "claw_access", %event, %principal, %decision, %permission_path),
    }
}

/// Discards every event. Used for tests and deployments with logging
/// disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAccessLogger;

impl AccessLogger for NoopAccessLogger {
    fn log(&self, _event: &DecisionEvent) {}
}

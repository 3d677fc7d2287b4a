//! Scope evaluator — the policy core.
//!
//! Decides, given an ordered scope and a concrete permission-plus-parameters
//! request, whether the request is granted. Pure and total except for the
//! two input-shape failures named in its contract: it never suspends, never
//! mutates, and never raises beyond [`Error::UnknownPermission`] (a bad
//! request path) — a malformed directive is rejected earlier, at parse time,
//! by [`crate::directive::directive_parse`].
//!
//! Directive parameter-name legality against a path's parameter hierarchy
//! (§4.4.3's "scope-parameter vs permission-parameter" rule) is enforced at
//! directive construction time (see [`crate::directive::Directive`] callers
//! in `role.rs`/`scope.rs`), not here: the evaluator's contract lists no
//! failure mode for it, so by the time a directive reaches `evaluate`, its
//! parameter names are assumed legal and are matched by plain equality.

use std::collections::BTreeMap;

use crate::audit::{AccessLogger, DecisionEvent};
use crate::catalogue::{AccessCategory, PermissionCatalogue, PermissionNode};
use crate::directive::{Directive, DirectiveKind, Scope};
use crate::error::Result;

/// A concrete request: the permission path being exercised plus the
/// parameter bindings carried with it.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// The requested permission path. Must be a concrete leaf (a real leaf
    /// or an implicit `_read`/`_write`).
    pub path: String,
    /// Parameter bindings carried by the caller.
    pub parameters: BTreeMap<String, String>,
}

impl Request {
    /// Convenience constructor.
    #[must_use]
    pub fn new(path: impl Into<String>, parameters: BTreeMap<String, String>) -> Self {
        Self {
            path: path.into(),
            parameters,
        }
    }
}

/// The evaluator's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// An explicit Allow covered the request and no Deny overrode it.
    Granted,
    /// No Allow covered the request, or a Deny did.
    Denied,
}

impl Decision {
    /// Converts this decision into a `Result`, surfacing a denial as
    /// [`crate::error::Error::PermissionDenied`] carrying only the
    /// requested path and parameters — never the principal's scope, never
    /// a reason beyond "denied" (§7's propagation policy).
    pub fn into_result(self, request: &Request) -> Result<()> {
        match self {
            Decision::Granted => Ok(()),
            Decision::Denied => Err(crate::error::Error::PermissionDenied {
                path: request.path.clone(),
                parameters: request.parameters.clone(),
            }),
        }
    }
}

/// Whether `directive_path` qualifies for the root-level `_read`/`_write`
/// open-parameter exception in §4.4.3: the path must equal exactly `_read`
/// or `_write`, with no ancestor segments.
#[must_use]
pub fn is_root_scope_path(directive_path: &str) -> bool {
    directive_path == "_read" || directive_path == "_write"
}

fn read_write_ancestor(directive_path: &str) -> Option<(AccessCategory, &str)> {
    if directive_path == "_read" {
        return Some((AccessCategory::Read, ""));
    }
    if directive_path == "_write" {
        return Some((AccessCategory::Write, ""));
    }
    if let Some(ancestor) = directive_path.strip_suffix(":_read") {
        return Some((AccessCategory::Read, ancestor));
    }
    if let Some(ancestor) = directive_path.strip_suffix(":_write") {
        return Some((AccessCategory::Write, ancestor));
    }
    None
}

/// Implements §4.4.2: whether a directive's path covers the request's path.
fn path_covers(
    catalogue: &PermissionCatalogue,
    directive_path: &str,
    request_path: &str,
    request_node: &PermissionNode,
) -> bool {
    if directive_path == request_path {
        return true;
    }
    if let Some((category, ancestor)) = read_write_ancestor(directive_path) {
        if request_node.access() != category {
            return false;
        }
        return ancestor.is_empty() || catalogue.is_descendant_leaf(request_node, ancestor);
    }
    false
}

/// Implements §4.4.3: whether a directive's parameter bindings match the
/// request's parameters.
fn parameters_match(directive: &Directive, request_parameters: &BTreeMap<String, String>) -> bool {
    directive
        .parameters
        .iter()
        .all(|(name, value)| request_parameters.get(name) == Some(value))
}

fn directive_applies(
    catalogue: &PermissionCatalogue,
    directive: &Directive,
    request: &Request,
    request_node: &PermissionNode,
) -> bool {
    path_covers(catalogue, &directive.path, &request.path, request_node)
        && parameters_match(directive, &request.parameters)
}

/// Evaluates `scope` against `request` under `catalogue`, per §4.4.4:
/// a covering, matching Deny always wins; otherwise a covering, matching
/// Allow grants; otherwise the request is denied. Empty scope denies all.
pub fn evaluate(catalogue: &PermissionCatalogue, scope: &Scope, request: &Request) -> Result<Decision> {
    let request_node = catalogue.lookup(&request.path)?;

    let denied = scope
        .iter()
        .filter(|d| d.kind == DirectiveKind::Deny)
        .any(|d| directive_applies(catalogue, d, request, request_node));
    if denied {
        return Ok(Decision::Denied);
    }

    let granted = scope
        .iter()
        .filter(|d| d.kind == DirectiveKind::Allow)
        .any(|d| directive_applies(catalogue, d, request, request_node));

    Ok(if granted { Decision::Granted } else { Decision::Denied })
}

/// Evaluates `scope` against `request`, then logs the resulting decision to
/// `logger` as a [`DecisionEvent::ScopeDecision`] (§10.2's evaluator-decision
/// emission point). [`evaluate`] itself stays pure and total per its own
/// contract; this is the thin logging wrapper callers use when they want the
/// decision audited.
pub fn evaluate_and_log(
    catalogue: &PermissionCatalogue,
    scope: &Scope,
    request: &Request,
    principal: &str,
    logger: &dyn AccessLogger,
) -> Result<Decision> {
    let decision = evaluate(catalogue, scope, request)?;
    logger.log(&DecisionEvent::ScopeDecision {
        principal: principal.to_string(),
        permission_path: request.path.clone(),
        decision,
    });
    Ok(decision)
}

//! Scope directive model: `(Allow|Deny, permission_path, parameter_bindings)`,
//! encoded textually as `allow|deny;path[;k=v]*`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalogue::PermissionCatalogue;
use crate::error::{Error, Result};
use crate::identifier;

/// Whether a directive grants or denies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveKind {
    /// Grants the covered requests, unless overridden by a Deny.
    Allow,
    /// Denies the covered requests unconditionally.
    Deny,
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveKind::Allow => write!(f, "allow"),
            DirectiveKind::Deny => write!(f, "deny"),
        }
    }
}

/// The ordered set of directives attached to a principal.
pub type Scope = Vec<Directive>;

/// A single scope directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    /// Allow or deny.
    pub kind: DirectiveKind,
    /// Canonical permission path.
    pub path: String,
    /// Parameter bindings, sorted by name.
    pub parameters: BTreeMap<String, String>,
}

impl Directive {
    /// Constructs a directive from already-canonical parts.
    #[must_use]
    pub fn new(kind: DirectiveKind, path: impl Into<String>, parameters: BTreeMap<String, String>) -> Self {
        Self {
            kind,
            path: path.into(),
            parameters,
        }
    }

    /// Validates this directive against the catalogue per §3's invariant:
    /// the path must resolve, and each parameter name must either be
    /// defined on some ancestor of the path, or the directive must be one
    /// of the two root-level `_read`/`_write` leaves, which accept any
    /// parameter name.
    ///
    /// This is a construction-time check used by role-template and direct
    /// grant creation. The evaluator itself does not call it: its contract
    /// (§4.4.5) names no failure mode for an already-admitted directive's
    /// parameter names, so by the time a directive reaches `evaluate` it is
    /// assumed to have passed this check.
    pub fn validate_against_catalogue(&self, catalogue: &PermissionCatalogue) -> Result<()> {
        let node = catalogue.lookup(&self.path)?;
        if crate::evaluator::is_root_scope_path(&self.path) {
            return Ok(());
        }
        let hierarchy = catalogue.parameter_hierarchy(node.id());
        for name in self.parameters.keys() {
            if !hierarchy.contains(name) {
                return Err(Error::FormatError {
                    reason: format!(
                        "parameter '{name}' is not defined on any ancestor of '{}'",
                        self.path
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Parses `"allow|deny;path[;k=v]*"` into a [`Directive`].
///
/// Parsing is strict: the first segment must be the literal `allow` or
/// `deny`; the second must be a valid canonical path; remaining segments
/// are `key=value` with unique names.
pub fn directive_parse(raw: &str) -> Result<Directive> {
    let mut parts = raw.splitn(2, ';');
    let kind_str = parts.next().unwrap_or_default();
    let kind = match kind_str {
        "allow" => DirectiveKind::Allow,
        "deny" => DirectiveKind::Deny,
        other => {
            return Err(Error::FormatError {
                reason: format!("directive kind must be 'allow' or 'deny', got '{other}'"),
            })
        }
    };

    let rest = parts.next().ok_or_else(|| Error::FormatError {
        reason: "directive is missing a path".to_string(),
    })?;

    let parsed = identifier::parse(rest)?;

    Ok(Directive {
        kind,
        path: parsed.canonical_path,
        parameters: parsed.parameters,
    })
}

/// Encodes a directive back into `"allow|deny;path[;k=v]*"`, with
/// parameters sorted by name.
#[must_use]
pub fn directive_encode(directive: &Directive) -> String {
    let mut out = format!("{};{}", directive.kind, directive.path);
    for (name, value) in &directive.parameters {
        out.push(';');
        out.push_str(name);
        out.push('=');
        out.push_str(value);
    }
    out
}

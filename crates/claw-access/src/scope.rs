//! Effective-scope resolver: merges a user's direct grants and role
//! assignments' expanded templates into the single ordered [`Scope`] the
//! evaluator consumes.

use std::collections::HashSet;

use crate::directive::{directive_encode, Scope};
use crate::error::Result;
use crate::role::Role;
use crate::user::User;

/// Resolves `user`'s effective scope: every direct grant, followed by every
/// role assignment's templates expanded with that assignment's parameter
/// values. `roles` must contain the `Role` referenced by each of the user's
/// assignments; a missing role is simply skipped (its assignment contributes
/// nothing), since role deletion does not retroactively fail resolution.
///
/// Directives are deduplicated by their canonical encoding, first occurrence
/// wins — so a direct grant takes precedence in ordering over an equivalent
/// role-derived directive, though since Deny always dominates in the
/// evaluator (§4.4.4), ordering among directives of the same kind has no
/// semantic effect on the decision.
pub fn resolve_effective_scope(user: &User, roles: &[Role]) -> Result<Scope> {
    let mut scope = Scope::new();
    let mut seen = HashSet::new();

    for grant in user.direct_grants() {
        let directive = grant.as_directive();
        let key = directive_encode(&directive);
        if seen.insert(key) {
            scope.push(directive);
        }
    }

    for assignment in user.role_assignments() {
        let Some(role) = roles.iter().find(|r| r.id() == assignment.role_id) else {
            continue;
        };
        for template in role.templates() {
            let directive = template.expand(&assignment.parameter_values)?;
            let key = directive_encode(&directive);
            if seen.insert(key) {
                scope.push(directive);
            }
        }
    }

    Ok(scope)
}

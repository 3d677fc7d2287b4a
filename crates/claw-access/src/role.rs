//! Role & scope-template model: roles carry directive templates whose
//! parameter values may contain a single `{placeholder}`; a role assignment
//! binds those placeholders to concrete values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::directive::{Directive, DirectiveKind};
use crate::error::{Error, Result};
use crate::store::RoleStore;
use crate::user::UserId;

/// Stable identifier for a [`Role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleId(pub Uuid);

impl RoleId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directive whose parameter values may contain `{placeholder}` tokens,
/// to be bound by a role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTemplate {
    /// Allow or deny.
    pub kind: DirectiveKind,
    /// Canonical permission path.
    pub path: String,
    /// Parameter templates: literal values or a bare `{placeholder}`.
    pub parameter_templates: BTreeMap<String, String>,
}

fn placeholder_name(value: &str) -> Option<&str> {
    let inner = value.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains('{') || inner.contains('}') {
        return None;
    }
    Some(inner)
}

impl ScopeTemplate {
    /// Constructs a template.
    #[must_use]
    pub fn new(kind: DirectiveKind, path: impl Into<String>, parameter_templates: BTreeMap<String, String>) -> Self {
        Self {
            kind,
            path: path.into(),
            parameter_templates,
        }
    }

    /// The set of placeholders this template requires, extracted by
    /// scanning parameter values for a bare `{name}` token.
    #[must_use]
    pub fn required_parameters(&self) -> BTreeSet<String> {
        self.parameter_templates
            .values()
            .filter_map(|v| placeholder_name(v))
            .map(str::to_string)
            .collect()
    }

    /// Expands this template with an assignment's parameter values into a
    /// concrete [`Directive`]. Fails with [`Error::MissingRoleParameter`] if
    /// a required placeholder has no bound value. Parameter values the
    /// assignment supplies but no template references are ignored.
    pub fn expand(&self, assignment_parameters: &BTreeMap<String, String>) -> Result<Directive> {
        let mut resolved = BTreeMap::new();
        for (name, template_value) in &self.parameter_templates {
            let value = match placeholder_name(template_value) {
                Some(placeholder) => assignment_parameters
                    .get(placeholder)
                    .cloned()
                    .ok_or_else(|| Error::MissingRoleParameter {
                        placeholder: placeholder.to_string(),
                    })?,
                None => template_value.clone(),
            };
            resolved.insert(name.clone(), value);
        }
        Ok(Directive::new(self.kind, self.path.clone(), resolved))
    }
}

/// A role: a named bundle of scope templates, optionally a built-in system
/// role whose id, code, and templates cannot be changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    id: RoleId,
    code: String,
    name: String,
    description: String,
    is_system: bool,
    templates: Vec<ScopeTemplate>,
}

impl Role {
    /// Builds a caller-defined (non-system) role descriptor, validated for
    /// a sane, lowercase-leading code that does not collide with a system
    /// role's reserved code.
    pub fn new(code: impl Into<String>, name: impl Into<String>, description: impl Into<String>, templates: Vec<ScopeTemplate>) -> Result<Self> {
        let code = code.into();
        validate_code(&code)?;
        if find_system_role(&code).is_some() {
            return Err(Error::ReservedName { code });
        }
        Ok(Self {
            id: RoleId::new(),
            code,
            name: name.into(),
            description: description.into(),
            is_system: false,
            templates,
        })
    }

    /// Constructs a system role. Only called at catalogue-seeding time, not
    /// reachable from caller-facing role-creation operations.
    #[must_use]
    pub fn system(code: impl Into<String>, name: impl Into<String>, description: impl Into<String>, templates: Vec<ScopeTemplate>) -> Self {
        Self {
            id: RoleId::new(),
            code: code.into(),
            name: name.into(),
            description: description.into(),
            is_system: true,
            templates,
        }
    }

    /// This role's stable id.
    #[must_use]
    pub fn id(&self) -> RoleId {
        self.id
    }

    /// This role's unique, case-insensitive code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Whether this is an immutable system role.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.is_system
    }

    /// This role's scope templates.
    #[must_use]
    pub fn templates(&self) -> &[ScopeTemplate] {
        &self.templates
    }

    /// The union of placeholders required across all of this role's
    /// templates.
    #[must_use]
    pub fn required_parameters(&self) -> BTreeSet<String> {
        self.templates
            .iter()
            .flat_map(ScopeTemplate::required_parameters)
            .collect()
    }

    /// Validates that an assignment's parameter values cover every
    /// placeholder this role's templates require.
    pub fn validate_assignment_parameters(&self, values: &BTreeMap<String, String>) -> Result<()> {
        for placeholder in self.required_parameters() {
            if !values.contains_key(&placeholder) {
                return Err(Error::MissingRoleParameter { placeholder });
            }
        }
        Ok(())
    }

    /// Updates this role's mutable metadata. Fails for a system role.
    pub fn update_metadata(&mut self, name: impl Into<String>, description: impl Into<String>) -> Result<()> {
        self.guard_mutable()?;
        self.name = name.into();
        self.description = description.into();
        Ok(())
    }

    /// Replaces this role's scope templates atomically. Fails for a system
    /// role.
    pub fn replace_scope_templates(&mut self, templates: Vec<ScopeTemplate>) -> Result<()> {
        self.guard_mutable()?;
        self.templates = templates;
        Ok(())
    }

    fn guard_mutable(&self) -> Result<()> {
        if self.is_system {
            return Err(Error::SystemRoleImmutable {
                code: self.code.clone(),
            });
        }
        Ok(())
    }
}

fn validate_code(code: &str) -> Result<()> {
    let mut chars = code.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => {
            return Err(Error::FormatError {
                reason: format!("role code '{code}' must start with a lowercase letter"),
            })
        }
    }
    if !code.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(Error::FormatError {
            reason: format!("role code '{code}' may only contain lowercase letters, digits, and underscores"),
        });
    }
    Ok(())
}

/// A (user, role, parameter-values) triple, created when a user is assigned
/// a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// The assigned user.
    pub user_id: UserId,
    /// The assigned role.
    pub role_id: RoleId,
    /// Parameter values bound at assignment time. Must cover every
    /// placeholder required by the referenced role's templates.
    pub parameter_values: BTreeMap<String, String>,
}

impl RoleAssignment {
    /// Constructs an assignment, validating coverage of `role`'s required
    /// placeholders.
    pub fn new(user_id: UserId, role: &Role, parameter_values: BTreeMap<String, String>) -> Result<Self> {
        role.validate_assignment_parameters(&parameter_values)?;
        Ok(Self {
            user_id,
            role_id: role.id(),
            parameter_values,
        })
    }
}

/// Returns the built-in system roles seeded at process start: `admin`
/// (root write grant) and `user` (a self-scoped read grant, parameterized
/// by the assignee's own id).
#[must_use]
pub fn system_roles() -> Vec<Role> {
    vec![
        Role::system(
            "admin",
            "Administrator",
            "Full read and write access to every resource.",
            vec![ScopeTemplate::new(DirectiveKind::Allow, "_write", BTreeMap::new())],
        ),
        Role::system(
            "user",
            "User",
            "Read access scoped to the assignee's own resources.",
            vec![ScopeTemplate::new(
                DirectiveKind::Allow,
                "_read",
                BTreeMap::from([("userId".to_string(), "{userId}".to_string())]),
            )],
        ),
    ]
}

/// Looks up a system role by code, case-insensitively.
#[must_use]
pub fn find_system_role(code: &str) -> Option<Role> {
    system_roles().into_iter().find(|r| r.code().eq_ignore_ascii_case(code))
}

/// Creates and persists a caller-defined role (§4.5's `create_role`). Fails
/// with `ReservedName` if `code` collides with a system role ([`Role::new`]'s
/// own check), or `DuplicateEntity` if a stored role already claims `code`.
/// The system flag is never settable here — only [`Role::system`], called at
/// catalogue-seeding time, can produce one.
pub async fn create_role(
    code: impl Into<String>,
    name: impl Into<String>,
    description: impl Into<String>,
    templates: Vec<ScopeTemplate>,
    roles: &impl RoleStore,
    cancel: &CancellationToken,
) -> Result<Role> {
    let role = Role::new(code, name, description, templates)?;
    if roles.get_by_code(role.code(), cancel).await.map_err(Error::from)?.is_some() {
        return Err(Error::DuplicateEntity {
            what: format!("role {}", role.code()),
        });
    }
    roles.save(&role, cancel).await.map_err(Error::from)?;
    Ok(role)
}

async fn load_role(id: RoleId, roles: &impl RoleStore, cancel: &CancellationToken) -> Result<Role> {
    roles
        .get_by_id(id, cancel)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| Error::NotFound { what: format!("role {id}") })
}

/// Updates a stored role's name/description (§4.5's `update_metadata`).
/// Fails `NotFound` if `id` has no stored role, `SystemRoleImmutable` if it
/// names a system role.
pub async fn update_role_metadata(
    id: RoleId,
    name: impl Into<String>,
    description: impl Into<String>,
    roles: &impl RoleStore,
    cancel: &CancellationToken,
) -> Result<Role> {
    let mut role = load_role(id, roles, cancel).await?;
    role.update_metadata(name, description)?;
    roles.save(&role, cancel).await.map_err(Error::from)?;
    Ok(role)
}

/// Atomically replaces a stored role's scope templates (§4.5's
/// `replace_scope_templates`). Fails `NotFound` if `id` has no stored role,
/// `SystemRoleImmutable` if it names a system role.
pub async fn replace_role_scope_templates(
    id: RoleId,
    templates: Vec<ScopeTemplate>,
    roles: &impl RoleStore,
    cancel: &CancellationToken,
) -> Result<Role> {
    let mut role = load_role(id, roles, cancel).await?;
    role.replace_scope_templates(templates)?;
    roles.save(&role, cancel).await.map_err(Error::from)?;
    Ok(role)
}

/// Deletes a stored role (§4.5's `delete`). Fails `NotFound` if `id` has no
/// stored role, `SystemRoleImmutable` if it names a system role — system
/// roles are never persisted, so this also guards against a caller who
/// somehow obtained a system role's id.
pub async fn delete_role(id: RoleId, roles: &impl RoleStore, cancel: &CancellationToken) -> Result<()> {
    let role = load_role(id, roles, cancel).await?;
    if role.is_system() {
        return Err(Error::SystemRoleImmutable {
            code: role.code().to_string(),
        });
    }
    roles.delete(id, cancel).await.map_err(Error::from)
}

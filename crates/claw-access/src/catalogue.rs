//! Permission catalogue: an immutable, arena-backed tree of every guarded
//! operation, built once at process start.
//!
//! The tree is a value graph with exclusive ownership rooted at
//! [`PermissionCatalogue`]; a child's parent pointer is realized as an index
//! into the arena rather than an owning reference, per the catalogue's
//! "built once, immutable, process-lifetime" contract.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Index of a node within a [`PermissionCatalogue`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A leaf's access category. Internal nodes carry `None`; every internal
/// node implicitly exposes a `_read` (Read) and `_write` (Write) leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCategory {
    /// The leaf is read-only.
    Read,
    /// The leaf mutates state.
    Write,
    /// Not a leaf; this node has children.
    None,
}

/// A single node in the permission tree: either an internal node with
/// children, or a leaf with an access category.
#[derive(Debug, Clone)]
pub struct PermissionNode {
    id: NodeId,
    identifier: String,
    description: String,
    local_parameters: Vec<String>,
    access: AccessCategory,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl PermissionNode {
    /// This node's arena index.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's own segment name (not the full path).
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Human-readable description, carried for documentation/UI purposes.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parameter names declared directly on this node (not inherited).
    #[must_use]
    pub fn local_parameters(&self) -> &[String] {
        &self.local_parameters
    }

    /// This node's access category. `None` for internal nodes.
    #[must_use]
    pub fn access(&self) -> AccessCategory {
        self.access
    }

    /// Whether this node is a leaf (has an access category other than
    /// `None`).
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        !matches!(self.access, AccessCategory::None)
    }

    /// This node's implicit or explicit full canonical path, computed by the
    /// catalogue at build time and cached via [`PermissionCatalogue::path_of`].
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

/// A declarative specification of one node, used to build a
/// [`PermissionCatalogue`]. Internal nodes declare children; leaves declare
/// an access category.
pub struct NodeSpec {
    /// The node's own segment name.
    pub identifier: String,
    /// Human-readable description.
    pub description: String,
    /// Parameter names declared directly on this node.
    pub parameters: Vec<String>,
    /// Leaf access category, or children for an internal node.
    pub kind: NodeKind,
}

/// Distinguishes an internal node (children) from a leaf (access category).
pub enum NodeKind {
    /// A leaf with the given access category. Must not be `None`.
    Leaf(AccessCategory),
    /// An internal node with the given children.
    Internal(Vec<NodeSpec>),
}

impl NodeSpec {
    /// Convenience constructor for a Read leaf.
    #[must_use]
    pub fn read(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            description: description.into(),
            parameters: Vec::new(),
            kind: NodeKind::Leaf(AccessCategory::Read),
        }
    }

    /// Convenience constructor for a Write leaf.
    #[must_use]
    pub fn write(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            description: description.into(),
            parameters: Vec::new(),
            kind: NodeKind::Leaf(AccessCategory::Write),
        }
    }

    /// Convenience constructor for an internal node.
    #[must_use]
    pub fn group(
        identifier: impl Into<String>,
        description: impl Into<String>,
        children: Vec<NodeSpec>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            description: description.into(),
            parameters: Vec::new(),
            kind: NodeKind::Internal(children),
        }
    }

    /// Attaches local parameter names to this node.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<String>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// An immutable tree of every guarded operation. Built once via
/// [`PermissionCatalogue::build`]; safe for unsynchronized concurrent read
/// thereafter.
#[derive(Debug)]
pub struct PermissionCatalogue {
    nodes: Vec<PermissionNode>,
    paths: Vec<String>,
    path_index: HashMap<String, NodeId>,
}

impl PermissionCatalogue {
    /// Builds a catalogue from a declarative root-node specification.
    ///
    /// Every internal node is given two implicit leaves, `_read` and
    /// `_write`, in addition to its declared children. Parent back-references
    /// are set exactly once, during this build.
    pub fn build(roots: Vec<NodeSpec>) -> Result<Self> {
        let mut catalogue = PermissionCatalogue {
            nodes: Vec::new(),
            paths: Vec::new(),
            path_index: HashMap::new(),
        };
        for root in roots {
            catalogue.insert(root, None, "")?;
        }
        Ok(catalogue)
    }

    fn insert(&mut self, spec: NodeSpec, parent: Option<NodeId>, parent_path: &str) -> Result<NodeId> {
        let path = if parent_path.is_empty() {
            spec.identifier.clone()
        } else {
            format!("{parent_path}:{}", spec.identifier)
        };

        if self.path_index.contains_key(&path) {
            return Err(Error::FormatError {
                reason: format!("duplicate permission path '{path}'"),
            });
        }

        let is_internal = matches!(spec.kind, NodeKind::Internal(_));
        let id = NodeId(self.nodes.len());
        self.nodes.push(PermissionNode {
            id,
            identifier: spec.identifier,
            description: spec.description,
            local_parameters: spec.parameters,
            access: if is_internal { AccessCategory::None } else { leaf_access(&spec.kind) },
            parent,
            children: Vec::new(),
        });
        self.paths.push(path.clone());
        self.path_index.insert(path.clone(), id);

        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }

        if let NodeKind::Internal(children) = spec.kind {
            for child in children {
                self.insert(child, Some(id), &path)?;
            }
            self.insert_implicit_leaf(id, &path, "_read", AccessCategory::Read)?;
            self.insert_implicit_leaf(id, &path, "_write", AccessCategory::Write)?;
        }

        Ok(id)
    }

    fn insert_implicit_leaf(
        &mut self,
        parent: NodeId,
        parent_path: &str,
        identifier: &str,
        access: AccessCategory,
    ) -> Result<()> {
        let path = format!("{parent_path}:{identifier}");
        let id = NodeId(self.nodes.len());
        self.nodes.push(PermissionNode {
            id,
            identifier: identifier.to_string(),
            description: format!("implicit {identifier} scope"),
            local_parameters: Vec::new(),
            access,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.paths.push(path.clone());
        self.path_index.insert(path, id);
        self.nodes[parent.0].children.push(id);
        Ok(())
    }

    /// Looks up a node by its canonical path.
    pub fn lookup(&self, canonical_path: &str) -> Result<&PermissionNode> {
        self.path_index
            .get(canonical_path)
            .map(|id| &self.nodes[id.0])
            .ok_or_else(|| Error::UnknownPermission {
                path: canonical_path.to_string(),
            })
    }

    /// Returns the canonical path of a node by its arena id.
    #[must_use]
    pub fn path_of(&self, id: NodeId) -> &str {
        &self.paths[id.0]
    }

    /// The node's parameter hierarchy: local parameters of every ancestor
    /// from the root down to and including the node itself, with
    /// order-preserving de-duplication (first occurrence wins).
    #[must_use]
    pub fn parameter_hierarchy(&self, id: NodeId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            chain.push(current);
            cursor = self.nodes[current.0].parent;
        }
        chain.reverse();

        let mut seen = std::collections::HashSet::new();
        let mut hierarchy = Vec::new();
        for node_id in chain {
            for param in &self.nodes[node_id.0].local_parameters {
                if seen.insert(param.clone()) {
                    hierarchy.push(param.clone());
                }
            }
        }
        hierarchy
    }

    /// Iterates over every node in the catalogue, including implicit
    /// `_read`/`_write` leaves, in build order.
    pub fn traverse(&self) -> impl Iterator<Item = &PermissionNode> {
        self.nodes.iter()
    }

    /// Whether `path` names a node whose ancestor chain root is `ancestor`
    /// and whose own identifier is `leaf_name` — used by the evaluator's
    /// `_read`/`_write` subtree-coverage rule.
    #[must_use]
    pub fn is_descendant_leaf(&self, node: &PermissionNode, ancestor_path: &str) -> bool {
        let mut cursor = node.parent;
        while let Some(id) = cursor {
            if self.path_of(id) == ancestor_path {
                return true;
            }
            cursor = self.nodes[id.0].parent;
        }
        false
    }

    /// Whether `path` is a root-level node, i.e. has no ancestor segments.
    #[must_use]
    pub fn is_root_path(&self, path: &str) -> bool {
        self.path_index
            .get(path)
            .map(|id| self.nodes[id.0].parent.is_none())
            .unwrap_or(false)
    }
}

fn leaf_access(kind: &NodeKind) -> AccessCategory {
    match kind {
        NodeKind::Leaf(access) => *access,
        NodeKind::Internal(_) => AccessCategory::None,
    }
}

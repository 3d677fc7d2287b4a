//! Permission identifier grammar: `path[:segment]*[;key=value]*`.
//!
//! Canonicalizes a raw identifier string into a path plus a parameter map,
//! the shared currency the catalogue, directive model, and evaluator all
//! operate on.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A parsed identifier: a canonical colon-joined path plus its parameter
/// bindings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedIdentifier {
    /// Colon-joined, trimmed path segments, e.g. `api:user:profile:read`.
    pub canonical_path: String,
    /// Parameter bindings, keyed by name. A `BTreeMap` gives the stable,
    /// name-sorted iteration order the grammar's encoding requires.
    pub parameters: BTreeMap<String, String>,
}

fn format_error(reason: impl Into<String>) -> Error {
    Error::FormatError {
        reason: reason.into(),
    }
}

/// Parses `path (';' param '=' value)*` into a [`ParsedIdentifier`].
///
/// Empty paths, empty segments, empty parameter names, and empty parameter
/// values each fail with [`Error::FormatError`]. Duplicate parameter names
/// overwrite; the last occurrence wins. Whitespace inside segments is
/// preserved; whitespace around `;` and `=` is stripped.
pub fn parse(identifier: &str) -> Result<ParsedIdentifier> {
    let mut parts = identifier.split(';');
    let path = parts
        .next()
        .ok_or_else(|| format_error("identifier is empty"))?;

    let canonical_path = parse_path(path)?;

    let mut parameters = BTreeMap::new();
    for clause in parts {
        let clause = clause.trim();
        let (name, value) = clause
            .split_once('=')
            .ok_or_else(|| format_error(format!("parameter clause '{clause}' missing '='")))?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(format_error("parameter name is empty"));
        }
        if value.is_empty() {
            return Err(format_error(format!("parameter '{name}' has empty value")));
        }
        parameters.insert(name.to_string(), value.to_string());
    }

    Ok(ParsedIdentifier {
        canonical_path,
        parameters,
    })
}

fn parse_path(path: &str) -> Result<String> {
    if path.trim().is_empty() {
        return Err(format_error("path is empty"));
    }
    let segments: Vec<&str> = path.split(':').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(format_error(format!("path '{path}' has an empty segment")));
    }
    Ok(segments.join(":"))
}

/// Returns only the canonical path portion of `identifier`.
pub fn normalize(identifier: &str) -> Result<String> {
    Ok(parse(identifier)?.canonical_path)
}

/// Encodes a parsed identifier back into `path[;key=value]*` form, with
/// parameters sorted by name (guaranteed by `BTreeMap`'s iteration order).
pub fn encode(identifier: &ParsedIdentifier) -> String {
    let mut out = identifier.canonical_path.clone();
    for (name, value) in &identifier.parameters {
        out.push(';');
        out.push_str(name);
        out.push('=');
        out.push_str(value);
    }
    out
}

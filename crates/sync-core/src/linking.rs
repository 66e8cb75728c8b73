//! Resolves linked-record ids to names (A→B) and names back to ids (B→A).
//!
//! The actual fetch of the linked table lives in `sync-clients`; this
//! module only owns the resolution algorithm and the run-scoped cache. The
//! cache is built once per {base, table} the first time a field links to
//! it and is dropped with the run — callers must not reuse an instance
//! across sync runs.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LinkResolutionError {
    #[error("{count} linked name(s) could not be resolved in table {table_key}: {names:?}")]
    Unresolved {
        table_key: String,
        names: Vec<String>,
        count: usize,
    },
}

/// How an unmatched B→A link name is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedLinkPolicy {
    /// Fail the record with `LinkResolutionError::Unresolved`.
    Strict,
    /// Create a bounded number of new linked records and log it. The cap is
    /// enforced by the caller (the B→A executor), which owns the client
    /// that would perform the create; this module only reports which names
    /// need creating.
    LenientWithCreate,
    /// Drop the name from the array, recording a warning.
    Dropped,
}

/// One target table's primary-field index, scoped to a single sync run.
#[derive(Debug, Default)]
pub struct LinkedTableIndex {
    id_to_name: HashMap<String, String>,
    name_to_id: HashMap<String, String>,
    duplicate_names: HashSet<String>,
}

impl LinkedTableIndex {
    /// Build an index from a target table's records, keyed by primary
    /// field value. The first record wins a duplicate primary-field value;
    /// later ones are recorded as duplicates so resolution can warn.
    pub fn build(records: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut name_to_id = HashMap::new();
        let mut id_to_name = HashMap::new();
        let mut duplicate_names = HashSet::new();
        for (id, name) in records {
            id_to_name.insert(id.clone(), name.clone());
            if name_to_id.contains_key(&name) {
                duplicate_names.insert(name.clone());
            } else {
                name_to_id.insert(name, id);
            }
        }
        Self {
            id_to_name,
            name_to_id,
            duplicate_names,
        }
    }

    pub fn is_duplicate(&self, name: &str) -> bool {
        self.duplicate_names.contains(name)
    }
}

/// Run-scoped cache over every linked table touched so far in this run.
#[derive(Debug, Default)]
pub struct LinkCache {
    tables: HashMap<String, LinkedTableIndex>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table_key: impl Into<String>, index: LinkedTableIndex) {
        self.tables.insert(table_key.into(), index);
    }

    pub fn get(&self, table_key: &str) -> Option<&LinkedTableIndex> {
        self.tables.get(table_key)
    }
}

#[derive(Debug, Default)]
pub struct ResolutionOutcome {
    pub values: Vec<String>,
    pub warnings: Vec<String>,
    /// Names that need creating upstream, only populated under
    /// `UnresolvedLinkPolicy::LenientWithCreate`.
    pub needs_create: Vec<String>,
}

/// A→B: replace linked record ids with their resolved primary-field names.
/// Cardinality is preserved: every input id produces exactly one output
/// entry (a placeholder id string when unresolved), never silently dropped.
pub fn resolve_ids_to_names(ids: &[String], index: &LinkedTableIndex) -> ResolutionOutcome {
    let mut out = ResolutionOutcome::default();
    for id in ids {
        match index.id_to_name.get(id) {
            Some(name) => out.values.push(name.clone()),
            None => {
                out.warnings.push(format!("linked record {id} not found; id retained as-is"));
                out.values.push(id.clone());
            }
        }
    }
    out
}

/// B→A: resolve names back to ids against the target table's index.
pub fn resolve_names_to_ids(
    table_key: &str,
    names: &[String],
    index: &LinkedTableIndex,
    policy: UnresolvedLinkPolicy,
) -> Result<ResolutionOutcome, LinkResolutionError> {
    let mut out = ResolutionOutcome::default();
    let mut unresolved = Vec::new();

    for name in names {
        if index.is_duplicate(name) {
            out.warnings
                .push(format!("name '{name}' is ambiguous in {table_key}; using first match"));
        }
        match index.name_to_id.get(name) {
            Some(id) => out.values.push(id.clone()),
            None => unresolved.push(name.clone()),
        }
    }

    if unresolved.is_empty() {
        return Ok(out);
    }

    match policy {
        UnresolvedLinkPolicy::Strict => Err(LinkResolutionError::Unresolved {
            table_key: table_key.to_string(),
            count: unresolved.len(),
            names: unresolved,
        }),
        UnresolvedLinkPolicy::LenientWithCreate => {
            out.needs_create = unresolved;
            Ok(out)
        }
        UnresolvedLinkPolicy::Dropped => {
            for name in unresolved {
                out.warnings.push(format!("dropped unresolved link name '{name}' in {table_key}"));
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> LinkedTableIndex {
        LinkedTableIndex::build(vec![
            ("rec1".to_string(), "Alice".to_string()),
            ("rec2".to_string(), "Bob".to_string()),
            ("rec3".to_string(), "Bob".to_string()),
        ])
    }

    #[test]
    fn ids_to_names_preserves_cardinality() {
        let idx = sample_index();
        let out = resolve_ids_to_names(
            &["rec1".into(), "missing".into(), "rec2".into()],
            &idx,
        );
        assert_eq!(out.values, vec!["Alice", "missing", "Bob"]);
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn duplicate_name_resolves_to_first_match_with_warning() {
        let idx = sample_index();
        let out = resolve_names_to_ids("tbl", &["Bob".into()], &idx, UnresolvedLinkPolicy::Strict)
            .unwrap();
        assert_eq!(out.values, vec!["rec2"]);
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn strict_unresolved_fails() {
        let idx = sample_index();
        let err = resolve_names_to_ids(
            "tbl",
            &["Carol".into()],
            &idx,
            UnresolvedLinkPolicy::Strict,
        );
        assert!(matches!(err, Err(LinkResolutionError::Unresolved { .. })));
    }

    #[test]
    fn dropped_policy_warns_and_omits() {
        let idx = sample_index();
        let out = resolve_names_to_ids(
            "tbl",
            &["Carol".into(), "Alice".into()],
            &idx,
            UnresolvedLinkPolicy::Dropped,
        )
        .unwrap();
        assert_eq!(out.values, vec!["rec1"]);
        assert!(out.warnings.iter().any(|w| w.contains("Carol")));
    }

    #[test]
    fn lenient_with_create_reports_needed_creates() {
        let idx = sample_index();
        let out = resolve_names_to_ids(
            "tbl",
            &["Carol".into()],
            &idx,
            UnresolvedLinkPolicy::LenientWithCreate,
        )
        .unwrap();
        assert_eq!(out.needs_create, vec!["Carol"]);
    }
}

//! Change detection and conflict resolution.
//!
//! Hashing and classification are pure functions over in-memory record
//! sets; nothing here talks to a checkpoint store (that's `sync-storage`)
//! or an HTTP client.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::field::FieldValue;
use crate::model::{Checkpoint, ConflictPolicy};

/// Deterministic content hash of a record's field values. Keys are sorted
/// and values normalized first (see `FieldValue::normalized`) so that
/// field-order and insignificant-value differences (whitespace, float
/// noise, array order) don't change the hash.
pub fn hash_record(fields: &BTreeMap<String, FieldValue>) -> String {
    let mut concat = String::new();
    for (key, value) in fields.iter() {
        let normalized = value.normalized();
        if normalized.is_absent() {
            continue;
        }
        concat.push_str(key);
        concat.push('=');
        concat.push_str(&serde_json::to_string(&normalized).unwrap_or_default());
        concat.push(';');
    }
    let mut hasher = Sha256::new();
    hasher.update(concat.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    BothModified,
    DeletedInSheets,
    DeletedInAirtable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub record_id: String,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    UseA,
    UseB,
    Delete,
    Skip,
}

#[derive(Debug, Default, Clone)]
pub struct Classification {
    pub no_changes: Vec<String>,
    pub airtable_only_changes: Vec<String>,
    pub sheets_only_changes: Vec<String>,
    pub new_in_a: Vec<String>,
    pub new_in_b: Vec<String>,
    pub conflicts: Vec<ConflictInfo>,
    /// Deletions where the surviving side's hash still matches the
    /// checkpoint — not a conflict (§4.5: a deletion conflict requires
    /// "the other changed since checkpoint"), just a clean delete to
    /// propagate onto the side that didn't act.
    pub clean_deletes: Vec<ConflictInfo>,
}

/// Classify every record id present on either side against the checkpoint.
///
/// `a_hashes`/`b_hashes` map record id to the *current* content hash on
/// that side (computed by the caller with `hash_record`, the Source-B side
/// excluding the id column). A record id present on one side only and
/// absent from the checkpoint is "new"; present on one side only but *in*
/// the checkpoint means it was deleted on the other side — a genuine
/// `conflicts` entry only if the surviving side also changed since the
/// checkpoint, otherwise a `clean_deletes` entry.
pub fn classify(
    checkpoint: &Checkpoint,
    a_hashes: &HashMap<String, String>,
    b_hashes: &HashMap<String, String>,
) -> Classification {
    let mut result = Classification::default();
    let mut seen = std::collections::HashSet::new();

    for (id, a_hash) in a_hashes {
        seen.insert(id.clone());
        let checkpointed = checkpoint.get(id);
        match (checkpointed, b_hashes.get(id)) {
            (None, None) => result.new_in_a.push(id.clone()),
            (None, Some(_)) => {
                // Present on both sides but never checkpointed (e.g. a
                // checkpoint reset): treat as new rather than guessing
                // which side originated it.
                result.new_in_a.push(id.clone());
            }
            (Some(entry), None) => {
                let info = ConflictInfo {
                    record_id: id.clone(),
                    kind: ConflictKind::DeletedInSheets,
                };
                if &entry.content_hash != a_hash {
                    result.conflicts.push(info);
                } else {
                    result.clean_deletes.push(info);
                }
            }
            (Some(entry), Some(b_hash)) => {
                let a_changed = &entry.content_hash != a_hash;
                let b_changed = &entry.content_hash != b_hash;
                match (a_changed, b_changed) {
                    (false, false) => result.no_changes.push(id.clone()),
                    (true, false) => result.airtable_only_changes.push(id.clone()),
                    (false, true) => result.sheets_only_changes.push(id.clone()),
                    (true, true) => result.conflicts.push(ConflictInfo {
                        record_id: id.clone(),
                        kind: ConflictKind::BothModified,
                    }),
                }
            }
        }
    }

    for (id, b_hash) in b_hashes {
        if seen.contains(id) {
            continue;
        }
        match checkpoint.get(id) {
            None => result.new_in_b.push(id.clone()),
            Some(entry) => {
                let info = ConflictInfo {
                    record_id: id.clone(),
                    kind: ConflictKind::DeletedInAirtable,
                };
                if &entry.content_hash != b_hash {
                    result.conflicts.push(info);
                } else {
                    result.clean_deletes.push(info);
                }
            }
        }
    }

    result
}

/// Turn a classified conflict into an apply decision given the config's
/// strategy. `NEWEST_WINS` has no reliable cross-platform mutation
/// timestamp to compare, so `BOTH_MODIFIED` falls back to `A_WINS`, and a
/// deletion is treated as the most recent mutation (the delete always
/// wins) — see `DESIGN.md` for the rationale this resolves an explicit
/// open question from the source spec.
pub fn resolve(policy: ConflictPolicy, conflict: &ConflictInfo) -> Decision {
    match (policy, conflict.kind) {
        (ConflictPolicy::AWins, ConflictKind::BothModified) => Decision::UseA,
        (ConflictPolicy::BWins, ConflictKind::BothModified) => Decision::UseB,
        (ConflictPolicy::NewestWins, ConflictKind::BothModified) => Decision::UseA,

        (ConflictPolicy::AWins, ConflictKind::DeletedInSheets) => Decision::UseA, // restore into sheets
        (ConflictPolicy::BWins, ConflictKind::DeletedInSheets) => Decision::Delete, // delete from airtable too
        (ConflictPolicy::NewestWins, ConflictKind::DeletedInSheets) => Decision::Delete,

        (ConflictPolicy::AWins, ConflictKind::DeletedInAirtable) => Decision::Delete,
        (ConflictPolicy::BWins, ConflictKind::DeletedInAirtable) => Decision::UseB, // restore into airtable
        (ConflictPolicy::NewestWins, ConflictKind::DeletedInAirtable) => Decision::Delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CheckpointEntry;

    fn fields(pairs: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn hash_is_stable_under_key_order_and_whitespace() {
        let a = fields(&[
            ("name", FieldValue::Text("Alice ".into())),
            ("age", FieldValue::Number(30.0)),
        ]);
        let b = fields(&[
            ("age", FieldValue::Number(30.0000001)),
            ("name", FieldValue::Text(" Alice".into())),
        ]);
        assert_eq!(hash_record(&a), hash_record(&b));
    }

    #[test]
    fn hash_changes_on_real_value_change() {
        let a = fields(&[("name", FieldValue::Text("Alice".into()))]);
        let b = fields(&[("name", FieldValue::Text("Bob".into()))]);
        assert_ne!(hash_record(&a), hash_record(&b));
    }

    #[test]
    fn no_checkpoint_everything_is_new() {
        let checkpoint = Checkpoint::empty();
        let a = HashMap::from([("r1".to_string(), "h1".to_string())]);
        let b = HashMap::from([("r2".to_string(), "h2".to_string())]);
        let result = classify(&checkpoint, &a, &b);
        assert_eq!(result.new_in_a, vec!["r1"]);
        assert_eq!(result.new_in_b, vec!["r2"]);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn checkpoint_monotonicity_no_changes_reclassifies_as_no_changes() {
        let mut checkpoint = Checkpoint::empty();
        checkpoint.set("r1".into(), "h1".into(), chrono::Utc::now());
        let a = HashMap::from([("r1".to_string(), "h1".to_string())]);
        let b = HashMap::from([("r1".to_string(), "h1".to_string())]);
        let result = classify(&checkpoint, &a, &b);
        assert_eq!(result.no_changes, vec!["r1"]);
    }

    #[test]
    fn clean_deletion_is_not_a_conflict() {
        let mut checkpoint = Checkpoint::empty();
        checkpoint.set("r1".into(), "h0".into(), chrono::Utc::now());
        let a = HashMap::from([("r1".to_string(), "h0".to_string())]);
        let b = HashMap::new();
        let result = classify(&checkpoint, &a, &b);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.clean_deletes.len(), 1);
        assert_eq!(result.clean_deletes[0].kind, ConflictKind::DeletedInSheets);
    }

    #[test]
    fn deletion_with_a_change_on_survivor_is_a_conflict() {
        let mut checkpoint = Checkpoint::empty();
        checkpoint.set("r1".into(), "h0".into(), chrono::Utc::now());
        let a = HashMap::from([("r1".to_string(), "h1".to_string())]);
        let b = HashMap::new();
        let result = classify(&checkpoint, &a, &b);
        assert!(result.clean_deletes.is_empty());
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::DeletedInSheets);
    }

    #[test]
    fn both_modified_is_a_conflict() {
        let mut checkpoint = Checkpoint::empty();
        checkpoint.set("r1".into(), "h0".into(), chrono::Utc::now());
        let a = HashMap::from([("r1".to_string(), "h1".to_string())]);
        let b = HashMap::from([("r1".to_string(), "h2".to_string())]);
        let result = classify(&checkpoint, &a, &b);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::BothModified);
    }

    #[test]
    fn a_wins_resolves_both_modified_to_use_a() {
        let conflict = ConflictInfo {
            record_id: "r1".into(),
            kind: ConflictKind::BothModified,
        };
        assert_eq!(resolve(ConflictPolicy::AWins, &conflict), Decision::UseA);
    }

    #[test]
    fn newest_wins_falls_back_to_a_wins_for_both_modified() {
        let conflict = ConflictInfo {
            record_id: "r1".into(),
            kind: ConflictKind::BothModified,
        };
        assert_eq!(
            resolve(ConflictPolicy::NewestWins, &conflict),
            Decision::UseA
        );
    }

    #[test]
    fn checkpoint_entry_roundtrip() {
        let mut checkpoint = Checkpoint::empty();
        let now = chrono::Utc::now();
        checkpoint.set("r1".into(), "h1".into(), now);
        let entry: &CheckpointEntry = checkpoint.get("r1").unwrap();
        assert_eq!(entry.content_hash, "h1");
    }
}

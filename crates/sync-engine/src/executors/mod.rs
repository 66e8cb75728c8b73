//! Shared plumbing for the three directional executors (§4.6): schema and
//! ordering selection, linked-record cache construction, the field⟷row
//! translation built on `sync-core`'s mapper, and dropdown installation.
//! The three `run_*` entry points each compose these in the phase order
//! §4.6.1–4.6.3 specify.

pub mod a_to_b;
pub mod b_to_a;
pub mod bidirectional;

use std::collections::BTreeMap;

use sync_clients::{
    AirtableClient, AirtableFieldSchema, AirtableRecord, AirtableTableSchema, DataValidationRule,
    ListRecordsOptions,
};
use sync_core::field::{FieldType, FieldValue};
use sync_core::linking::{resolve_ids_to_names, LinkCache, LinkedTableIndex};
use sync_core::mapping::{to_sheet_value, SheetValue};
use sync_core::model::{
    Checkpoint, ConflictPolicy, FieldMapping, SyncConfig, SyncConfigOutcome, SyncDirection, SyncLog, SyncLogOutcome,
    SyncTrigger,
};

use crate::context::RunContext;
use crate::error::Result;

#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
    pub total: u32,
    pub airtable_wins: u32,
    pub sheets_wins: u32,
    pub deletes: u32,
    pub skipped: u32,
}

/// Result of one run, shaped after §6's `Manual trigger` return value.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub outcome: SyncLogOutcome,
    pub direction: SyncDirection,
    pub added: u32,
    pub updated: u32,
    pub deleted: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub conflicts: Option<ConflictSummary>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl RunOutcome {
    pub fn new(direction: SyncDirection, started_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            outcome: SyncLogOutcome::Success,
            direction,
            added: 0,
            updated: 0,
            deleted: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            conflicts: None,
            started_at,
            completed_at: started_at,
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        if self.errors.len() < sync_core::model::SyncLog::MAX_ERRORS {
            self.errors.push(message.into());
        }
        self.outcome = SyncLogOutcome::Partial;
    }

    pub fn finish(mut self) -> Self {
        self.completed_at = chrono::Utc::now();
        if self.added == 0 && self.updated == 0 && self.deleted == 0 && !self.errors.is_empty() {
            self.outcome = SyncLogOutcome::Failed;
        }
        self
    }

    pub fn config_outcome(&self) -> SyncConfigOutcome {
        match self.outcome {
            SyncLogOutcome::Success => SyncConfigOutcome::Success,
            SyncLogOutcome::Partial => SyncConfigOutcome::Partial,
            SyncLogOutcome::Failed => SyncConfigOutcome::Failed,
        }
    }
}

/// Fields present in the mapping, sorted by their target spreadsheet
/// column (ascending) rather than by field id, since writes and header
/// placement both need column order.
pub fn fields_in_column_order<'a>(
    schema: &'a AirtableTableSchema,
    mapping: &FieldMapping,
) -> Vec<(&'a AirtableFieldSchema, usize)> {
    let mut fields: Vec<(&AirtableFieldSchema, usize)> = mapping
        .iter()
        .filter_map(|(field_id, &column)| schema.field_by_id(field_id).map(|f| (f, column)))
        .collect();
    fields.sort_by_key(|(_, column)| *column);
    fields
}

/// §4.6 "Row ordering": view order takes priority, then primary-field
/// ascending order, then whatever the upstream default is (with a warning).
pub fn list_options_for<'a>(
    view_id: Option<&'a str>,
    schema: &'a AirtableTableSchema,
) -> (ListRecordsOptions<'a>, Option<String>) {
    if let Some(view) = view_id {
        return (
            ListRecordsOptions {
                view: Some(view),
                sort_field_id: None,
            },
            None,
        );
    }
    match schema.primary_field() {
        Some(primary) => (
            ListRecordsOptions {
                view: None,
                sort_field_id: Some(primary.id.as_str()),
            },
            None,
        ),
        None => (
            ListRecordsOptions::default(),
            Some("table has no primary field; record order is upstream-default and not guaranteed stable".to_string()),
        ),
    }
}

/// Builds the run-scoped link cache (§4.4) for every `LinkedRecord` field
/// the mapping touches, fetching each distinct target table exactly once.
pub async fn build_link_cache(
    airtable: &AirtableClient,
    token: &str,
    base_id: &str,
    base_schema: &[AirtableTableSchema],
    mapping_fields: &[(&AirtableFieldSchema, usize)],
) -> Result<(LinkCache, Vec<String>)> {
    let mut cache = LinkCache::new();
    let mut warnings = Vec::new();
    let mut seen_tables = std::collections::HashSet::new();

    for (field, _) in mapping_fields {
        if field.field_type != FieldType::LinkedRecord {
            continue;
        }
        let Some(target_table_id) = field.linked_table_id() else {
            warnings.push(format!("linked field {} has no declared target table; ids kept as-is", field.name));
            continue;
        };
        if !seen_tables.insert(target_table_id.clone()) {
            continue;
        }
        let Some(target_schema) = base_schema.iter().find(|t| t.id == target_table_id) else {
            warnings.push(format!("linked field {} targets unknown table {target_table_id}", field.name));
            continue;
        };
        let Some(primary) = target_schema.primary_field() else {
            warnings.push(format!("target table {target_table_id} has no primary field"));
            continue;
        };

        let records = airtable
            .list_records(token, base_id, &target_table_id, target_schema, ListRecordsOptions::default())
            .await?;

        let pairs = records.into_iter().map(|record| {
            let value = record.fields.get(&primary.id).cloned().unwrap_or(FieldValue::Absent);
            let name = to_sheet_value(primary.field_type, &value).as_string();
            (record.id, name)
        });

        cache.insert(format!("{base_id}:{target_table_id}"), LinkedTableIndex::build(pairs));
    }

    Ok((cache, warnings))
}

/// A→B per-record resolution: replaces `LinkedIds` with resolved names and
/// restricts the field set to exactly the mapped fields, which both
/// produces the row contents and (per DESIGN.md's resolution of the
/// unmapped-field hashing open question) the basis for the content hash.
pub fn resolve_mapped_fields(
    record: &AirtableRecord,
    mapping_fields: &[(&AirtableFieldSchema, usize)],
    link_cache: &LinkCache,
    base_id: &str,
) -> (BTreeMap<String, FieldValue>, Vec<String>) {
    let mut resolved = BTreeMap::new();
    let mut warnings = Vec::new();

    for (field, _column) in mapping_fields {
        let raw = record.fields.get(&field.id).cloned().unwrap_or(FieldValue::Absent);
        let value = match (&raw, field.field_type, field.linked_table_id()) {
            (FieldValue::LinkedIds(ids), FieldType::LinkedRecord, Some(target_table_id)) => {
                let table_key = format!("{base_id}:{target_table_id}");
                match link_cache.get(&table_key) {
                    Some(index) => {
                        let outcome = resolve_ids_to_names(ids, index);
                        warnings.extend(outcome.warnings);
                        FieldValue::SelectMany(outcome.values)
                    }
                    None => FieldValue::SelectMany(ids.clone()),
                }
            }
            _ => raw,
        };
        resolved.insert(field.id.clone(), value);
    }

    (resolved, warnings)
}

pub fn resolved_to_row(
    resolved: &BTreeMap<String, FieldValue>,
    mapping_fields: &[(&AirtableFieldSchema, usize)],
) -> BTreeMap<usize, SheetValue> {
    mapping_fields
        .iter()
        .map(|(field, column)| {
            let value = resolved.get(&field.id).cloned().unwrap_or(FieldValue::Absent);
            (*column, to_sheet_value(field.field_type, &value))
        })
        .collect()
}

/// §4.6.1 step 7: dropdown data validation for select fields with a
/// declared, non-empty choice list.
pub fn dropdown_rules(
    mapping_fields: &[(&AirtableFieldSchema, usize)],
    row_start: i64,
    row_end: i64,
) -> Vec<DataValidationRule> {
    mapping_fields
        .iter()
        .filter_map(|(field, column)| {
            let choices = field.choices();
            if choices.is_empty() {
                return None;
            }
            match field.field_type {
                FieldType::SingleSelect => Some(DataValidationRule {
                    column_index: *column as i64,
                    row_start,
                    row_end,
                    allowed_values: choices,
                    strict: true,
                    show_dropdown: true,
                }),
                FieldType::MultiSelect => Some(DataValidationRule {
                    column_index: *column as i64,
                    row_start,
                    row_end,
                    allowed_values: choices,
                    strict: false,
                    show_dropdown: true,
                }),
                _ => None,
            }
        })
        .collect()
}

/// Shared tail of every executor: persists the checkpoint and SyncLog
/// (unless this is a dry run), records the outcome on the SyncConfig, and
/// announces completion. Centralized here so the three executors can't
/// drift on what "finishing a run" means.
pub async fn persist_run(
    ctx: &RunContext,
    config: &SyncConfig,
    trigger: SyncTrigger,
    new_checkpoint: Checkpoint,
    outcome: RunOutcome,
    dry_run: bool,
) -> Result<RunOutcome> {
    let outcome = outcome.finish();

    if !dry_run {
        ctx.storage.checkpoints.replace(config.id, new_checkpoint).await?;

        let log = SyncLog {
            id: uuid::Uuid::new_v4(),
            sync_config_id: config.id,
            outcome: outcome.outcome,
            direction: outcome.direction,
            trigger,
            records_synced: outcome.added + outcome.updated + outcome.deleted,
            records_failed: outcome.errors.len() as u32,
            errors: outcome.errors.clone(),
            warnings: outcome.warnings.clone(),
            started_at: outcome.started_at,
            completed_at: outcome.completed_at,
        };
        ctx.storage.sync_logs.append(log).await?;

        let error_message = outcome.errors.first().cloned();
        ctx.storage
            .sync_configs
            .record_run_outcome(config.id, outcome.config_outcome(), error_message)
            .await?;

        let total_records = (outcome.added + outcome.updated + outcome.deleted) as u64;
        if total_records > 0 {
            let year_month = outcome.completed_at.format("%Y-%m").to_string();
            ctx.storage
                .usage_stats
                .add_records_synced(config.owner_user_id, year_month, total_records)
                .await?;
        }
    }

    ctx.progress.report_sync_complete(config.id, &outcome).await;
    Ok(outcome)
}

/// Resolution outcome for a single bidirectional conflict, used to tally
/// `ConflictSummary`.
pub fn resolve_conflicts(
    policy: ConflictPolicy,
    conflicts: &[sync_core::conflict::ConflictInfo],
) -> (Vec<(String, sync_core::conflict::Decision)>, ConflictSummary) {
    let mut decisions = Vec::with_capacity(conflicts.len());
    let mut summary = ConflictSummary {
        total: conflicts.len() as u32,
        ..Default::default()
    };
    for conflict in conflicts {
        let decision = sync_core::conflict::resolve(policy, conflict);
        match decision {
            sync_core::conflict::Decision::UseA => summary.airtable_wins += 1,
            sync_core::conflict::Decision::UseB => summary.sheets_wins += 1,
            sync_core::conflict::Decision::Delete => summary.deletes += 1,
            sync_core::conflict::Decision::Skip => summary.skipped += 1,
        }
        decisions.push((conflict.record_id.clone(), decision));
    }
    (decisions, summary)
}

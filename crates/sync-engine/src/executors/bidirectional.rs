//! Bidirectional executor (§4.6.3): fetches both sides, classifies every
//! record against the checkpoint, resolves conflicts per the config's
//! policy, applies each direction's winning changes, then refetches to
//! establish the new baseline.

use std::collections::{BTreeMap, HashMap, HashSet};

use sync_clients::ListRecordsOptions;
use sync_core::conflict::{self, hash_record, ConflictKind, Decision};
use sync_core::field::{FieldType, FieldValue};
use sync_core::linking::{resolve_names_to_ids, UnresolvedLinkPolicy};
use sync_core::mapping::{from_sheet_value, MappingMode, SheetValue};
use sync_core::model::{Checkpoint, CredentialService, SyncConfig, SyncTrigger};

use crate::context::RunContext;
use crate::error::Result;
use crate::id_column::{column_letter, data_row, index_existing_ids};
use crate::progress::SyncPhase;

use super::{build_link_cache, fields_in_column_order, persist_run, resolve_conflicts, resolve_mapped_fields, resolved_to_row, RunOutcome};

pub async fn run(ctx: &RunContext, config: &SyncConfig, trigger: SyncTrigger, dry_run: bool) -> Result<RunOutcome> {
    let started_at = chrono::Utc::now();
    let mut outcome = RunOutcome::new(config.direction, started_at);
    ctx.progress.report_sync_start(config.id).await;

    let airtable_token = ctx
        .credentials
        .get_valid_token(config.owner_user_id, CredentialService::Airtable)
        .await?;
    let sheets_token = ctx
        .credentials
        .get_valid_token(config.owner_user_id, CredentialService::Sheets)
        .await?;

    ctx.progress
        .report_progress(config.id, SyncPhase::FetchSchema, "fetching table schema".into())
        .await;
    let base_schema = ctx.airtable.get_base_schema(&airtable_token, &config.airtable_base_id).await?;
    let schema = base_schema
        .iter()
        .find(|t| t.id == config.airtable_table_id)
        .ok_or_else(|| crate::error::EngineError::Internal(format!("table {} not in base schema", config.airtable_table_id)))?;
    let mapping_fields = fields_in_column_order(schema, &config.field_mapping);
    let id_column = ctx.config.id_column_index;

    ctx.progress
        .report_progress(config.id, SyncPhase::FetchRecords, "fetching both sides".into())
        .await;
    let (list_options, ordering_warning) = super::list_options_for(config.airtable_view_id.as_deref(), schema);
    outcome.warnings.extend(ordering_warning);
    let a_records = ctx
        .airtable
        .list_records(&airtable_token, &config.airtable_base_id, &config.airtable_table_id, schema, list_options)
        .await?;
    let all_rows = ctx
        .sheets
        .get_sheet_values(&sheets_token, &config.sheets_spreadsheet_id, &config.sheets_sheet_name)
        .await?;
    let data_rows: Vec<Vec<SheetValue>> = if all_rows.len() > 1 { all_rows[1..].to_vec() } else { Vec::new() };

    ctx.progress
        .report_progress(config.id, SyncPhase::ResolveLinks, "resolving linked records".into())
        .await;
    let (link_cache, link_warnings) =
        build_link_cache(&ctx.airtable, &airtable_token, &config.airtable_base_id, &base_schema, &mapping_fields).await?;
    outcome.warnings.extend(link_warnings);

    // Resolve every A record's mapped fields once; reused for hashing and
    // for writing into the spreadsheet in the Apply A→B step.
    let mut a_resolved: HashMap<String, BTreeMap<String, FieldValue>> = HashMap::new();
    let mut a_hashes: HashMap<String, String> = HashMap::new();
    for record in &a_records {
        let (resolved, warnings) = resolve_mapped_fields(record, &mapping_fields, &link_cache, &config.airtable_base_id);
        outcome.warnings.extend(warnings);
        a_hashes.insert(record.id.clone(), hash_record(&resolved));
        a_resolved.insert(record.id.clone(), resolved);
    }

    let existing_row_ids = index_existing_ids(&data_rows, id_column);
    let mut b_hashes: HashMap<String, String> = HashMap::new();
    let mut b_resolved_by_id: HashMap<String, BTreeMap<String, FieldValue>> = HashMap::new();
    let mut new_in_b_rows: Vec<usize> = Vec::new();

    for (row_index, row) in data_rows.iter().enumerate() {
        let id_cell = row.get(id_column).and_then(|v| match v {
            SheetValue::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        });
        let resolved = row_to_mapped_fields(row, &mapping_fields);
        match id_cell {
            Some(id) => {
                b_hashes.insert(id.clone(), hash_record(&resolved));
                b_resolved_by_id.insert(id, resolved);
            }
            None => new_in_b_rows.push(row_index),
        }
    }

    ctx.progress
        .report_progress(config.id, SyncPhase::DetectChanges, "classifying changes".into())
        .await;
    let checkpoint = ctx.storage.checkpoints.load(config.id)?;
    let classification = conflict::classify(&checkpoint, &a_hashes, &b_hashes);
    let (decisions, conflict_summary) = resolve_conflicts(config.conflict_policy, &classification.conflicts);
    outcome.conflicts = Some(conflict_summary);

    let mut use_a: HashSet<String> = classification.airtable_only_changes.iter().cloned().collect();
    use_a.extend(classification.new_in_a.iter().cloned());
    let mut use_b: HashSet<String> = classification.sheets_only_changes.iter().cloned().collect();
    let mut delete_from_a: HashSet<String> = HashSet::new();
    let mut delete_from_b: HashSet<String> = HashSet::new();

    for (id, decision) in &decisions {
        let kind = classification
            .conflicts
            .iter()
            .find(|c| &c.record_id == id)
            .map(|c| c.kind);
        match (decision, kind) {
            (Decision::UseA, _) => {
                use_a.insert(id.clone());
            }
            (Decision::UseB, _) => {
                use_b.insert(id.clone());
            }
            (Decision::Delete, Some(ConflictKind::DeletedInSheets)) => {
                delete_from_a.insert(id.clone());
            }
            (Decision::Delete, Some(ConflictKind::DeletedInAirtable)) => {
                delete_from_b.insert(id.clone());
            }
            _ => {}
        }
    }

    // Clean deletes aren't conflicts — there's no competing claim to
    // resolve, just a deletion to propagate onto the side that didn't act.
    for info in &classification.clean_deletes {
        match info.kind {
            ConflictKind::DeletedInSheets => {
                delete_from_a.insert(info.record_id.clone());
            }
            ConflictKind::DeletedInAirtable => {
                delete_from_b.insert(info.record_id.clone());
            }
            ConflictKind::BothModified => {}
        }
    }

    ctx.progress
        .report_progress(config.id, SyncPhase::Write, "applying Airtable -> spreadsheet changes".into())
        .await;
    let mut next_row_index = data_rows.len();
    let mut a_to_b_added = 0u32;
    let mut a_to_b_updated = 0u32;

    if !dry_run && (!use_a.is_empty() || !delete_from_b.is_empty()) {
        let last_column = column_letter(id_column);
        let metadata = ctx
            .sheets
            .get_spreadsheet_metadata(&sheets_token, &config.sheets_spreadsheet_id)
            .await?;
        let sheet = metadata
            .sheets
            .iter()
            .find(|s| s.sheet_id == config.sheets_sheet_id)
            .ok_or_else(|| crate::error::EngineError::Internal(format!("sheet {} not found", config.sheets_sheet_id)))?;
        let width = id_column + 1;

        for id in &use_a {
            let Some(resolved) = a_resolved.get(id) else { continue };
            let row_values = resolved_to_row(resolved, &mapping_fields);
            let mut row = data_row(&row_values, width);
            row[id_column] = SheetValue::String(id.clone());

            let row_number = if let Some(existing_row) = existing_row_ids.get(id) {
                a_to_b_updated += 1;
                existing_row + 2
            } else {
                a_to_b_added += 1;
                next_row_index += 1;
                next_row_index + 1
            };
            let range = format!("{}!A{}:{}{}", config.sheets_sheet_name, row_number, last_column, row_number);
            ctx.sheets.update_range(&sheets_token, &config.sheets_spreadsheet_id, &range, &[row]).await?;
        }

        for id in &delete_from_b {
            if let Some(&row_index) = existing_row_ids.get(id) {
                ctx.sheets
                    .delete_rows(&sheets_token, &config.sheets_spreadsheet_id, sheet.sheet_id, (row_index + 1) as i64, 1)
                    .await?;
            }
        }
    } else {
        for id in &use_a {
            if existing_row_ids.contains_key(id) {
                a_to_b_updated += 1;
            } else {
                a_to_b_added += 1;
            }
        }
    }

    ctx.progress
        .report_progress(config.id, SyncPhase::Write, "applying spreadsheet -> Airtable changes".into())
        .await;
    let mut b_to_a_creates: Vec<BTreeMap<String, FieldValue>> = Vec::new();
    let mut b_to_a_updates: Vec<(String, BTreeMap<String, FieldValue>)> = Vec::new();

    for id in &use_b {
        if let Some(resolved) = b_resolved_by_id.get(id) {
            b_to_a_updates.push((id.clone(), resolved.clone()));
        }
    }
    for &row_index in &new_in_b_rows {
        let row = &data_rows[row_index];
        let fields = row_to_airtable_fields(row, &mapping_fields, &link_cache, &config.airtable_base_id, &mut outcome.warnings);
        match fields {
            Some(fields) => b_to_a_creates.push(fields),
            None => outcome.push_error(format!("row {}: unresolved link name, skipped", row_index + 2)),
        }
    }

    let mut created_ids = Vec::new();
    if !dry_run {
        if !b_to_a_creates.is_empty() {
            created_ids = ctx
                .airtable
                .batch_create_records(&airtable_token, &config.airtable_base_id, &config.airtable_table_id, schema, b_to_a_creates.clone())
                .await?;
        }
        if !b_to_a_updates.is_empty() {
            ctx.airtable
                .batch_update_records(&airtable_token, &config.airtable_base_id, &config.airtable_table_id, schema, b_to_a_updates.clone())
                .await?;
        }
        if !delete_from_a.is_empty() {
            ctx.airtable
                .batch_delete_records(&airtable_token, &config.airtable_base_id, &config.airtable_table_id, delete_from_a.iter().cloned().collect())
                .await?;
        }
    }

    outcome.added = a_to_b_added + created_ids.len() as u32;
    outcome.updated = a_to_b_updated + b_to_a_updates.len() as u32;
    outcome.deleted = delete_from_a.len() as u32 + delete_from_b.len() as u32;

    ctx.progress
        .report_progress(config.id, SyncPhase::UpdateCheckpoint, "refetching and updating checkpoint".into())
        .await;
    let mut new_checkpoint = Checkpoint::empty();
    if !dry_run {
        let refreshed = ctx
            .airtable
            .list_records(&airtable_token, &config.airtable_base_id, &config.airtable_table_id, schema, ListRecordsOptions::default())
            .await?;
        for record in &refreshed {
            let (resolved, _) = resolve_mapped_fields(record, &mapping_fields, &link_cache, &config.airtable_base_id);
            new_checkpoint.set(record.id.clone(), hash_record(&resolved), started_at);
        }
    } else {
        new_checkpoint = checkpoint;
        for (id, hash) in &a_hashes {
            new_checkpoint.set(id.clone(), hash.clone(), started_at);
        }
    }
    persist_run(ctx, config, trigger, new_checkpoint, outcome, dry_run).await
}

fn row_to_mapped_fields(
    row: &[SheetValue],
    mapping_fields: &[(&sync_clients::AirtableFieldSchema, usize)],
) -> BTreeMap<String, FieldValue> {
    let mut resolved = BTreeMap::new();
    for (field, column) in mapping_fields {
        let cell = row.get(*column).cloned().unwrap_or(SheetValue::Empty);
        let value = from_sheet_value(&field.id, field.field_type, &cell, MappingMode::Lenient).unwrap_or(FieldValue::Absent);
        resolved.insert(field.id.clone(), value);
    }
    resolved
}

fn row_to_airtable_fields(
    row: &[SheetValue],
    mapping_fields: &[(&sync_clients::AirtableFieldSchema, usize)],
    link_cache: &sync_core::linking::LinkCache,
    base_id: &str,
    warnings: &mut Vec<String>,
) -> Option<BTreeMap<String, FieldValue>> {
    let mut fields = BTreeMap::new();
    for (field, column) in mapping_fields {
        if field.field_type.is_read_only() {
            continue;
        }
        let cell = row.get(*column).cloned().unwrap_or(SheetValue::Empty);

        if field.field_type == FieldType::LinkedRecord {
            let Some(target_table_id) = field.linked_table_id() else {
                continue;
            };
            let names: Vec<String> = cell
                .as_string()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if names.is_empty() {
                fields.insert(field.id.clone(), FieldValue::Absent);
                continue;
            }
            let table_key = format!("{base_id}:{target_table_id}");
            let index = link_cache.get(&table_key)?;
            match resolve_names_to_ids(&table_key, &names, index, UnresolvedLinkPolicy::Strict) {
                Ok(resolved) => {
                    warnings.extend(resolved.warnings);
                    fields.insert(field.id.clone(), FieldValue::LinkedIds(resolved.values));
                }
                Err(_) => return None,
            }
            continue;
        }

        let value = from_sheet_value(&field.id, field.field_type, &cell, MappingMode::Lenient).unwrap_or(FieldValue::Absent);
        fields.insert(field.id.clone(), value);
    }
    Some(fields)
}

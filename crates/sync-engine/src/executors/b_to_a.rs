//! B→A executor (§4.6.2). Source A is treated as a set here — row order
//! in the spreadsheet carries no meaning for this direction, only row
//! *identity* via the id column or, failing that, the primary field.

use std::collections::{BTreeMap, HashMap, HashSet};

use sync_clients::ListRecordsOptions;
use sync_core::conflict::hash_record;
use sync_core::field::{FieldType, FieldValue};
use sync_core::linking::{resolve_names_to_ids, UnresolvedLinkPolicy};
use sync_core::mapping::{from_sheet_value, to_sheet_value, MappingMode, SheetValue};
use sync_core::model::{Checkpoint, CredentialService, SyncConfig, SyncTrigger};

use crate::context::RunContext;
use crate::error::Result;
use crate::id_column::column_letter;
use crate::progress::SyncPhase;

use super::{build_link_cache, fields_in_column_order, persist_run, RunOutcome};

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

    ctx.progress
        .report_progress(config.id, SyncPhase::FetchRecords, "fetching spreadsheet rows and existing records".into())
        .await;
    let all_rows = ctx
        .sheets
        .get_sheet_values(&sheets_token, &config.sheets_spreadsheet_id, &config.sheets_sheet_name)
        .await?;
    let data_rows: &[Vec<SheetValue>] = if all_rows.len() > 1 { &all_rows[1..] } else { &[] };

    let existing_records = ctx
        .airtable
        .list_records(
            &airtable_token,
            &config.airtable_base_id,
            &config.airtable_table_id,
            schema,
            ListRecordsOptions::default(),
        )
        .await?;
    let existing_ids: HashSet<String> = existing_records.iter().map(|r| r.id.clone()).collect();

    let primary_field = schema.primary_field();
    let primary_column = primary_field.and_then(|p| config.field_mapping.get(&p.id).copied());
    let mut primary_index: HashMap<String, String> = HashMap::new();
    if let Some(primary) = primary_field {
        for record in &existing_records {
            if let Some(value) = record.fields.get(&primary.id) {
                let text = to_sheet_value(primary.field_type, value).as_string();
                primary_index.insert(text.trim().to_ascii_lowercase(), record.id.clone());
            }
        }
    }

    ctx.progress
        .report_progress(config.id, SyncPhase::ResolveLinks, "preloading linked record caches".into())
        .await;
    let (link_cache, link_warnings) =
        build_link_cache(&ctx.airtable, &airtable_token, &config.airtable_base_id, &base_schema, &mapping_fields).await?;
    outcome.warnings.extend(link_warnings);

    ctx.progress
        .report_progress(config.id, SyncPhase::MapFields, "mapping rows to records".into())
        .await;

    struct PendingCreate {
        row_index: usize,
        fields: BTreeMap<String, FieldValue>,
    }
    struct PendingUpdate {
        id: String,
        fields: BTreeMap<String, FieldValue>,
    }

    let id_column = ctx.config.id_column_index;
    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut matched_ids = HashSet::new();

    for (row_index, row) in data_rows.iter().enumerate() {
        let row_number = row_index + 2;
        let existing_id = row
            .get(id_column)
            .and_then(|v| match v {
                SheetValue::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
            .filter(|id| existing_ids.contains(id));

        let target_id = existing_id.or_else(|| {
            let column = primary_column?;
            let cell = row.get(column)?;
            let key = cell.as_string().trim().to_ascii_lowercase();
            if key.is_empty() {
                return None;
            }
            primary_index.get(&key).cloned()
        });

        let mut fields = BTreeMap::new();
        let mut row_failed = false;

        for (field, column) in &mapping_fields {
            if field.field_type.is_read_only() {
                continue;
            }
            let cell = row.get(*column).cloned().unwrap_or(SheetValue::Empty);

            if field.field_type == FieldType::LinkedRecord {
                let Some(target_table_id) = field.linked_table_id() else {
                    continue;
                };
                let names = match &cell {
                    SheetValue::Empty => Vec::new(),
                    other => other
                        .as_string()
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                };
                if names.is_empty() {
                    fields.insert(field.id.clone(), FieldValue::Absent);
                    continue;
                }
                let table_key = format!("{}:{target_table_id}", config.airtable_base_id);
                let Some(index) = link_cache.get(&table_key) else {
                    outcome.warnings.push(format!("row {row_number}: no link cache for {target_table_id}, dropping value"));
                    continue;
                };
                match resolve_names_to_ids(&table_key, &names, index, UnresolvedLinkPolicy::Strict) {
                    Ok(resolved) => {
                        outcome.warnings.extend(resolved.warnings);
                        fields.insert(field.id.clone(), FieldValue::LinkedIds(resolved.values));
                    }
                    Err(err) => {
                        outcome.push_error(format!("row {row_number}: {err}"));
                        row_failed = true;
                        break;
                    }
                }
                continue;
            }

            match from_sheet_value(&field.id, field.field_type, &cell, MappingMode::Lenient) {
                Ok(value) => {
                    fields.insert(field.id.clone(), value);
                }
                Err(err) => {
                    outcome.warnings.push(format!("row {row_number}: {err}"));
                    fields.insert(field.id.clone(), FieldValue::Absent);
                }
            }
        }

        if row_failed {
            continue;
        }

        match target_id {
            Some(id) => {
                matched_ids.insert(id.clone());
                updates.push(PendingUpdate { id, fields });
            }
            None => creates.push(PendingCreate { row_index, fields }),
        }
    }

    ctx.progress
        .report_progress(config.id, SyncPhase::Write, "writing to Airtable".into())
        .await;

    let mut created_row_ids: Vec<(usize, String)> = Vec::new();
    if !dry_run {
        if !creates.is_empty() {
            let records: Vec<BTreeMap<String, FieldValue>> = creates.iter().map(|c| c.fields.clone()).collect();
            let ids = ctx
                .airtable
                .batch_create_records(&airtable_token, &config.airtable_base_id, &config.airtable_table_id, schema, records)
                .await?;
            for (pending, id) in creates.iter().zip(ids.into_iter()) {
                matched_ids.insert(id.clone());
                created_row_ids.push((pending.row_index, id));
            }
        }
        if !updates.is_empty() {
            let pairs: Vec<(String, BTreeMap<String, FieldValue>)> =
                updates.iter().map(|u| (u.id.clone(), u.fields.clone())).collect();
            ctx.airtable
                .batch_update_records(&airtable_token, &config.airtable_base_id, &config.airtable_table_id, schema, pairs)
                .await?;
        }

        if !created_row_ids.is_empty() {
            let last_column = column_letter(id_column);
            for (row_index, id) in &created_row_ids {
                let row_number = row_index + 2;
                let range = format!("{}!{}{}:{}{}", config.sheets_sheet_name, last_column, row_number, last_column, row_number);
                ctx.sheets
                    .update_range(&sheets_token, &config.sheets_spreadsheet_id, &range, &[vec![SheetValue::String(id.clone())]])
                    .await?;
            }

            let metadata = ctx
                .sheets
                .get_spreadsheet_metadata(&sheets_token, &config.sheets_spreadsheet_id)
                .await?;
            if let Some(sheet) = metadata.sheets.iter().find(|s| s.sheet_id == config.sheets_sheet_id) {
                ctx.sheets
                    .hide_column(&sheets_token, &config.sheets_spreadsheet_id, sheet.sheet_id, id_column as i64)
                    .await?;
            }
        }
    } else {
        for pending in &creates {
            created_row_ids.push((pending.row_index, format!("dry-run-{}", pending.row_index)));
        }
    }

    outcome.added = creates.len() as u32;
    outcome.updated = updates.len() as u32;

    let deleted_ids: Vec<String> = if config.delete_extra_records {
        existing_ids.iter().filter(|id| !matched_ids.contains(*id)).cloned().collect()
    } else {
        Vec::new()
    };
    outcome.deleted = deleted_ids.len() as u32;
    if !dry_run && !deleted_ids.is_empty() {
        ctx.airtable
            .batch_delete_records(&airtable_token, &config.airtable_base_id, &config.airtable_table_id, deleted_ids.clone())
            .await?;
    }

    ctx.progress
        .report_progress(config.id, SyncPhase::UpdateCheckpoint, "updating checkpoint".into())
        .await;
    let mut new_checkpoint = Checkpoint::empty();
    for update in &updates {
        new_checkpoint.set(update.id.clone(), hash_record(&update.fields), started_at);
    }
    for (pending, (_, id)) in creates.iter().zip(created_row_ids.iter()) {
        new_checkpoint.set(id.clone(), hash_record(&pending.fields), started_at);
    }

    persist_run(ctx, config, trigger, new_checkpoint, outcome, dry_run).await
}

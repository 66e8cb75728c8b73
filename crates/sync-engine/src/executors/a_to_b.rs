//! A→B executor (§4.6.1). The spreadsheet's data region is fully
//! overwritten in Source-A's order on every run — the only way to keep
//! the spreadsheet in view order, since a grid has no independent sort
//! key of its own.

use std::collections::{BTreeMap, HashSet};

use sync_clients::ListRecordsOptions;
use sync_core::mapping::SheetValue;
use sync_core::model::{Checkpoint, CredentialService, SyncConfig, SyncTrigger};

use crate::context::RunContext;
use crate::error::{EngineError, Result};
use crate::id_column::{column_letter, data_row, header_row, index_existing_ids};
use crate::progress::SyncPhase;

use super::{
    build_link_cache, dropdown_rules, fields_in_column_order, list_options_for, persist_run, resolve_mapped_fields,
    resolved_to_row, RunOutcome,
};

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
        .ok_or_else(|| EngineError::Internal(format!("table {} not in base schema", config.airtable_table_id)))?;

    let mapping_fields = fields_in_column_order(schema, &config.field_mapping);
    let (list_options, ordering_warning): (ListRecordsOptions<'_>, Option<String>) =
        list_options_for(config.airtable_view_id.as_deref(), schema);
    outcome.warnings.extend(ordering_warning);

    ctx.progress
        .report_progress(config.id, SyncPhase::FetchRecords, "fetching Airtable records".into())
        .await;
    let records = ctx
        .airtable
        .list_records(&airtable_token, &config.airtable_base_id, &config.airtable_table_id, schema, list_options)
        .await?;

    ctx.progress
        .report_progress(config.id, SyncPhase::ResolveLinks, "resolving linked records".into())
        .await;
    let (link_cache, link_warnings) =
        build_link_cache(&ctx.airtable, &airtable_token, &config.airtable_base_id, &base_schema, &mapping_fields).await?;
    outcome.warnings.extend(link_warnings);

    ctx.progress
        .report_progress(config.id, SyncPhase::MapFields, "mapping fields".into())
        .await;
    let id_column = ctx.config.id_column_index;
    let width = id_column + 1;

    let mut field_names = BTreeMap::new();
    for (field, column) in &mapping_fields {
        field_names.insert(*column, field.name.clone());
    }
    let header = header_row(&field_names, id_column);

    let mut new_checkpoint = Checkpoint::empty();
    let mut ordered_ids = Vec::with_capacity(records.len());
    let mut rows_without_id = Vec::with_capacity(records.len());

    for record in &records {
        let (resolved, warnings) = resolve_mapped_fields(record, &mapping_fields, &link_cache, &config.airtable_base_id);
        outcome.warnings.extend(warnings);
        let row_values = resolved_to_row(&resolved, &mapping_fields);
        rows_without_id.push(data_row(&row_values, width));

        let hash = sync_core::conflict::hash_record(&resolved);
        new_checkpoint.set(record.id.clone(), hash, started_at);
        ordered_ids.push(record.id.clone());
    }

    ctx.progress
        .report_progress(config.id, SyncPhase::DetectChanges, "indexing existing rows".into())
        .await;
    let existing_rows = ctx
        .sheets
        .get_sheet_values(&sheets_token, &config.sheets_spreadsheet_id, &config.sheets_sheet_name)
        .await?;
    let existing_data_rows: &[Vec<SheetValue>] = if existing_rows.len() > 1 { &existing_rows[1..] } else { &[] };
    let existing_ids = index_existing_ids(existing_data_rows, id_column);
    let new_id_set: HashSet<&String> = ordered_ids.iter().collect();

    let mut added = 0u32;
    let mut updated = 0u32;
    for id in &ordered_ids {
        if existing_ids.contains_key(id) {
            updated += 1;
        } else {
            added += 1;
        }
    }
    let stale_ids: Vec<&String> = existing_ids.keys().filter(|id| !new_id_set.contains(id)).collect();
    let deleted = if config.delete_extra_rows { stale_ids.len() as u32 } else { 0 };

    outcome.added = added;
    outcome.updated = updated;
    outcome.deleted = deleted;

    if !dry_run {
        ctx.progress
            .report_progress(config.id, SyncPhase::Write, "writing spreadsheet rows".into())
            .await;

        let last_column = column_letter(id_column);
        let metadata = ctx
            .sheets
            .get_spreadsheet_metadata(&sheets_token, &config.sheets_spreadsheet_id)
            .await?;
        let sheet = metadata
            .sheets
            .iter()
            .find(|s| s.sheet_id == config.sheets_sheet_id)
            .ok_or_else(|| EngineError::Internal(format!("sheet {} not found", config.sheets_sheet_id)))?;

        ctx.sheets
            .ensure_column_count(&sheets_token, &config.sheets_spreadsheet_id, sheet.sheet_id, width as i64)
            .await?;

        if config.delete_extra_rows && !stale_ids.is_empty() {
            let keep_len = rows_without_id.len() + 1;
            if existing_rows.len() > keep_len {
                ctx.sheets
                    .delete_rows(
                        &sheets_token,
                        &config.sheets_spreadsheet_id,
                        sheet.sheet_id,
                        keep_len as i64,
                        (existing_rows.len() - keep_len) as i64,
                    )
                    .await?;
            }
        }

        let mut grid = Vec::with_capacity(rows_without_id.len() + 1);
        grid.push(header);
        grid.extend(rows_without_id);
        let range = format!(
            "{}!A1:{}{}",
            config.sheets_sheet_name,
            last_column,
            grid.len()
        );
        ctx.sheets
            .update_range(&sheets_token, &config.sheets_spreadsheet_id, &range, &grid)
            .await?;

        let rules = dropdown_rules(&mapping_fields, 1, (rows_without_id.len() + 1) as i64);
        if !rules.is_empty() {
            ctx.sheets
                .batch_set_data_validation(&sheets_token, &config.sheets_spreadsheet_id, sheet.sheet_id, &rules)
                .await?;
        }

        ctx.progress
            .report_progress(config.id, SyncPhase::Write, "writing id column".into())
            .await;
        if !ordered_ids.is_empty() {
            let id_range = format!(
                "{}!{}2:{}{}",
                config.sheets_sheet_name,
                last_column,
                last_column,
                ordered_ids.len() + 1
            );
            let id_rows: Vec<Vec<SheetValue>> =
                ordered_ids.iter().map(|id| vec![SheetValue::String(id.clone())]).collect();
            ctx.sheets
                .update_range(&sheets_token, &config.sheets_spreadsheet_id, &id_range, &id_rows)
                .await?;
        }
        // Hidden regardless of whether there are any data rows yet (S1:
        // an empty A→B run still writes the `Record ID` header at AA and
        // must hide it).
        ctx.sheets
            .hide_column(&sheets_token, &config.sheets_spreadsheet_id, sheet.sheet_id, id_column as i64)
            .await?;
    }

    ctx.progress
        .report_progress(config.id, SyncPhase::UpdateCheckpoint, "updating checkpoint".into())
        .await;
    persist_run(ctx, config, trigger, new_checkpoint, outcome, dry_run).await
}

//! Diesel table definitions for the engine's persisted state (§3, §6).
//! Checked in by hand, as the teacher's `storage-sqlite` crate does,
//! rather than generated at build time.

diesel::table! {
    credentials (user_id, service) {
        user_id -> Text,
        service -> Text,
        encrypted_access_token -> Text,
        encrypted_refresh_token -> Text,
        expires_at -> Text,
        last_refresh_attempt_at -> Nullable<Text>,
        last_refresh_error -> Nullable<Text>,
        needs_reauth -> Bool,
        account_identifier -> Nullable<Text>,
    }
}

diesel::table! {
    sync_configs (id) {
        id -> Text,
        owner_user_id -> Text,
        airtable_base_id -> Text,
        airtable_table_id -> Text,
        airtable_view_id -> Nullable<Text>,
        sheets_spreadsheet_id -> Text,
        sheets_sheet_id -> BigInt,
        sheets_sheet_name -> Text,
        field_mapping_json -> Text,
        direction -> Text,
        conflict_policy -> Text,
        delete_extra_records -> Bool,
        delete_extra_rows -> Bool,
        active -> Bool,
        last_sync_at -> Nullable<Text>,
        last_sync_outcome -> Nullable<Text>,
        last_error_at -> Nullable<Text>,
        last_error_message -> Nullable<Text>,
    }
}

diesel::table! {
    sync_logs (id) {
        id -> Text,
        sync_config_id -> Text,
        outcome -> Text,
        direction -> Text,
        trigger_source -> Text,
        records_synced -> Integer,
        records_failed -> Integer,
        errors_json -> Text,
        warnings_json -> Text,
        started_at -> Text,
        completed_at -> Text,
    }
}

diesel::table! {
    checkpoint_entries (sync_config_id, record_id) {
        sync_config_id -> Text,
        record_id -> Text,
        content_hash -> Text,
        captured_at -> Text,
    }
}

diesel::table! {
    usage_stats (user_id, year_month) {
        user_id -> Text,
        year_month -> Text,
        records_synced -> BigInt,
        sync_configs_created -> Integer,
    }
}

diesel::table! {
    sync_run_locks (sync_config_id) {
        sync_config_id -> Text,
        lock_version -> BigInt,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    credentials,
    sync_configs,
    sync_logs,
    checkpoint_entries,
    usage_stats,
    sync_run_locks,
);

//! Outbound REST clients for Source A and Source B (§4.2), plus the
//! shared rate-limiting and retry machinery both clients are built on.

pub mod airtable;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod sheets;

#[cfg(test)]
mod test_support;

pub use airtable::{
    AirtableBase, AirtableClient, AirtableFieldSchema, AirtableRecord, AirtableTableSchema, ListRecordsOptions,
    BATCH_SIZE,
};
pub use error::{ClientError, Result, RetryClass};
pub use rate_limit::RateLimit;
pub use sheets::{DataValidationRule, SheetMetadata, SheetsClient, SpreadsheetMetadata, SpreadsheetSummary};

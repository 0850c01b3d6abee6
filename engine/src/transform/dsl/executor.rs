//! Batch executor.
//!
//! Maps a batch of raw records through a schema, collecting produced objects
//! as JSON alongside per-row errors and skipped rows.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::MappingError;
use crate::mapping::context::Mapped;
use crate::mapping::schema::MappingSchema;
use crate::value::RawRecord;

/// Result of executing a schema over a batch
#[derive(Debug, Default, Serialize)]
pub struct ExecutionResult {
    /// Produced objects, as JSON
    pub records: Vec<serde_json::Value>,
    /// Rows that failed to map
    pub errors: Vec<RowError>,
    /// Rows the schema chose to skip
    pub skipped: Vec<SkippedRow>,
}

/// A row that failed to map
#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    pub row: usize,
    /// Source key being mapped when the error occurred
    pub header: Option<String>,
    pub message: String,
}

/// A row that was skipped
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

impl ExecutionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if execution completed without errors
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of rows seen
    pub fn total(&self) -> usize {
        self.records.len() + self.errors.len() + self.skipped.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Mapped: {} records, {} errors, {} skipped",
            self.records.len(),
            self.errors.len(),
            self.skipped.len()
        )
    }
}

/// Map every row, recording failures and carrying on.
pub fn execute(rows: Vec<RawRecord>, schema: &MappingSchema) -> ExecutionResult {
    let mut result = ExecutionResult::new();
    for (row, raw) in rows.into_iter().enumerate() {
        if let Err(e) = execute_row(&mut result, row, raw, schema) {
            warn!(row, error = %e, "row failed to map");
            result.errors.push(RowError {
                row,
                header: error_header(&e).map(str::to_string),
                message: e.to_string(),
            });
        }
    }
    debug!(schema = schema.name(), "{}", result.summary());
    result
}

/// Map every row, stopping at the first failure.
pub fn execute_strict(rows: Vec<RawRecord>, schema: &MappingSchema) -> Result<ExecutionResult, MappingError> {
    let mut result = ExecutionResult::new();
    for (row, raw) in rows.into_iter().enumerate() {
        execute_row(&mut result, row, raw, schema)?;
    }
    Ok(result)
}

fn execute_row(
    result: &mut ExecutionResult,
    row: usize,
    raw: RawRecord,
    schema: &MappingSchema,
) -> Result<(), MappingError> {
    match schema.map_record(raw)? {
        Mapped::Produced(item) => result.records.push(item.to_json()),
        Mapped::Skipped => result.skipped.push(SkippedRow {
            row,
            reason: format!("{} skipped the record", schema.name()),
        }),
    }
    Ok(())
}

/// Source key named by a mapping error, looking through nested failures.
fn error_header(err: &MappingError) -> Option<&str> {
    match err {
        MappingError::Traversal { header, .. }
        | MappingError::Conversion { header, .. }
        | MappingError::NoTarget { header, .. } => Some(header),
        _ => None,
    }
}

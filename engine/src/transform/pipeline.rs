//! High-level pipeline: schema document + input file → mapped JSON records.
//!
//! # Example
//!
//! ```rust,ignore
//! use datamapping::{transform_file, TransformOptions};
//! use std::path::Path;
//!
//! let options = TransformOptions {
//!     schema_path: Some("schema.json".into()),
//!     ..Default::default()
//! };
//! let result = transform_file(Path::new("catalog.csv"), &options)?;
//! println!("{}", result.summary());
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::parser::{parse_bytes, parse_file, InputFormat, ParsedInput};
use crate::transform::dsl::{execute, execute_strict, CompiledDocument, RowError, SchemaDocument, SkippedRow};
use crate::value::RawRecord;

/// Environment variable naming the default schema document.
pub const SCHEMA_ENV: &str = "DATAMAP_SCHEMA";
/// Environment variable naming the default root schema.
pub const ROOT_ENV: &str = "DATAMAP_ROOT";

/// Options for the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Schema document to compile
    pub schema_path: Option<PathBuf>,

    /// Entry schema, overriding the document's root
    pub root: Option<String>,

    /// Input format
    pub format: InputFormat,

    /// Pretty-print JSON output
    pub pretty: bool,

    /// Stop at the first row that fails to map
    pub fail_fast: bool,
}

impl TransformOptions {
    /// Defaults filled from `DATAMAP_SCHEMA` / `DATAMAP_ROOT`.
    pub fn from_env() -> Self {
        Self {
            schema_path: std::env::var_os(SCHEMA_ENV).map(PathBuf::from),
            root: std::env::var(ROOT_ENV).ok().filter(|r| !r.is_empty()),
            ..Default::default()
        }
    }
}

/// Result of a complete pipeline run
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    /// Schema that produced the records
    pub schema: String,

    /// Produced objects
    pub records: Vec<serde_json::Value>,

    pub errors: Vec<RowError>,

    pub skipped: Vec<SkippedRow>,

    pub input: InputInfo,
}

/// Input file information
#[derive(Debug, Clone, Serialize)]
pub struct InputInfo {
    pub format: InputFormat,
    pub delimiter: Option<char>,
    pub headings: Vec<String>,
    pub row_count: usize,
}

impl PipelineResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} records, {} errors, {} skipped (from {} rows)",
            self.schema,
            self.records.len(),
            self.errors.len(),
            self.skipped.len(),
            self.input.row_count
        )
    }

    /// Produced records as a JSON array.
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(&self.records)
        } else {
            serde_json::to_string(&self.records)
        }
    }
}

/// Load and compile the schema document named by `options`.
pub fn load_document(options: &TransformOptions) -> Result<CompiledDocument, PipelineError> {
    let path = options.schema_path.as_ref().ok_or(PipelineError::NoSchema)?;
    info!("Loading schema document {}", path.display());
    let compiled = SchemaDocument::from_path(path)?.compile()?;
    match &options.root {
        Some(root) => Ok(compiled.with_root(root)?),
        None => Ok(compiled),
    }
}

/// Map an input file through the schema document named by `options`.
pub fn transform_file(path: &Path, options: &TransformOptions) -> Result<PipelineResult, PipelineError> {
    let compiled = load_document(options)?;
    info!("Reading {}", path.display());
    let parsed = parse_file(path, options.format)?;
    transform_parsed(parsed, &compiled, options)
}

/// Same as [`transform_file`] but from bytes already in memory.
pub fn transform_bytes(bytes: &[u8], options: &TransformOptions) -> Result<PipelineResult, PipelineError> {
    let compiled = load_document(options)?;
    let parsed = parse_bytes(bytes, options.format)?;
    transform_parsed(parsed, &compiled, options)
}

/// Map records that are already parsed, with an already compiled document.
pub fn transform_records(
    records: Vec<RawRecord>,
    compiled: &CompiledDocument,
    options: &TransformOptions,
) -> Result<PipelineResult, PipelineError> {
    let parsed = ParsedInput {
        format: InputFormat::Json,
        delimiter: None,
        headings: Vec::new(),
        records,
    };
    transform_parsed(parsed, compiled, options)
}

fn transform_parsed(
    parsed: ParsedInput,
    compiled: &CompiledDocument,
    options: &TransformOptions,
) -> Result<PipelineResult, PipelineError> {
    if parsed.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    if let Some(delimiter) = parsed.delimiter {
        info!("Detected separator: '{}'", format_delimiter(delimiter));
    }
    if !parsed.headings.is_empty() {
        info!("Input has {} columns: {}", parsed.headings.len(), parsed.headings.join(", "));
    }
    info!("Read {} rows", parsed.len());

    let input = InputInfo {
        format: parsed.format,
        delimiter: parsed.delimiter,
        headings: parsed.headings,
        row_count: parsed.records.len(),
    };

    let schema = compiled.root();
    info!("Mapping with {}", schema.name());
    let result = if options.fail_fast {
        execute_strict(parsed.records, schema)?
    } else {
        execute(parsed.records, schema)
    };

    if result.is_ok() {
        info!("{}", result.summary());
    } else {
        warn!("{}", result.summary());
        for err in result.errors.iter().take(3) {
            warn!("Row {}: {}", err.row, err.message);
        }
    }

    Ok(PipelineResult {
        schema: schema.name().to_string(),
        records: result.records,
        errors: result.errors,
        skipped: result.skipped,
        input,
    })
}

/// Format delimiter for display
fn format_delimiter(d: char) -> &'static str {
    match d {
        ';' => ";",
        ',' => ",",
        '\t' => "TAB",
        '|' => "|",
        _ => "?",
    }
}

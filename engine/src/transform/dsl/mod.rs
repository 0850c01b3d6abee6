//! Schema documents and batch execution.
//!
//! This module provides:
//! - `document`: JSON schema documents compiled into mapping schemas
//! - `operations`: Built-in value operations used as converters
//! - `executor`: Map a batch of records through a schema
//!
//! ## Usage Flow
//!
//! ```text
//! Schema JSON → SchemaDocument::compile → MappingSchema → executor::execute → JSON records
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use datamapping::{SchemaDocument, execute, parse_csv_bytes};
//!
//! let doc = SchemaDocument::from_path("schema.json")?;
//! let compiled = doc.compile()?;
//! let input = parse_csv_bytes(&std::fs::read("input.csv")?)?;
//!
//! let result = execute(input.records, compiled.root());
//! println!("{}", result.summary());
//! ```

pub mod document;
pub mod executor;
pub mod operations;

pub use document::{
    example_schema, CompiledDocument, ParamSpec, RuleSpec, SchemaDocument, SchemaSpec, TargetSpec,
    TypeSpec,
};
pub use executor::{execute, execute_strict, ExecutionResult, RowError, SkippedRow};
pub use operations::{chain, operations_description, Operation};

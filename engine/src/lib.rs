//! # Datamapping - Declarative field mapping for nested records
//!
//! Datamapping turns nested source records (mappings, lists and raw CSV rows)
//! into typed target objects through declarative schemas: a set of field
//! rules, each mapping one source path onto one target write.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  CSV / JSON │────▶│   Parser    │────▶│   Mapping   │────▶│   Objects   │
//! │   (bytes)   │     │ (raw rows)  │     │  (schemas)  │     │   (JSON)    │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use datamapping::{FieldRule, MappingSchema, ObjectType};
//!
//! let root = ObjectType::new("RootData", ["id", "verb_id"]);
//! let schema = MappingSchema::builder("BasicMapping")
//!     .target(&root)
//!     .rule("verb_id", FieldRule::map_to())
//!     .rule("special_case", FieldRule::new(root.field("id")).path("special_case.an_id"))
//!     .build()?;
//!
//! let item = schema.map_item(serde_json::json!({
//!     "verb_id": "TestRow",
//!     "special_case": {"an_id": "MyImportantID"}
//! }))?;
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`value`] - Dynamic values and raw records
//! - [`models`] - Target types and live objects
//! - [`mapping`] - Field rules, schemas, contexts, registry
//! - [`parser`] - CSV/JSON input parsing
//! - [`transform`] - Schema documents, operations, executor, pipeline

// Core modules
pub mod error;
pub mod models;
pub mod value;

// Mapping engine
pub mod mapping;

// Parsing
pub mod parser;

// Transformation
pub mod transform;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, ConvertError, CsvError, DocumentError, MappingError, PersistError,
    PipelineError, RegistryError,
};

// =============================================================================
// Re-exports - Values and models
// =============================================================================

pub use models::{Object, ObjectRef, ObjectType, TypeParam};
pub use value::{RawRecord, Record, TypeKey, Value, ValueKind};

// =============================================================================
// Re-exports - Mapping engine
// =============================================================================

pub use mapping::{
    each, map_to, AnnotatedValue, Completion, Converter, FieldRule, Mapped, MappedItems,
    MappingContext, MappingSchema, Persistable, RuleKind, SchemaBuilder, SchemaRegistry, Target,
};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{
    detect_delimiter, parse_bytes, parse_csv_bytes, parse_csv_with, parse_file, parse_json,
    InputFormat, ParsedInput,
};

// =============================================================================
// Re-exports - DSL
// =============================================================================

pub use transform::dsl::{
    chain, example_schema, execute, execute_strict, operations_description, CompiledDocument,
    ExecutionResult, Operation, RowError, RuleSpec, SchemaDocument, SchemaSpec, SkippedRow,
    TargetSpec, TypeSpec,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::pipeline::{
    load_document, transform_bytes, transform_file, transform_records, InputInfo,
    PipelineResult, TransformOptions,
};

//! Error types for the mapping engine and its outer layers.
//!
//! - [`ConfigError`] - Schema definition errors (fatal, raised at build time)
//! - [`ConvertError`] - Failures raised by value converters
//! - [`MappingError`] - Runtime errors surfaced by `map_item`
//! - [`RegistryError`] - Schema lookup errors
//! - [`PersistError`] - Persistence collaborator errors
//! - [`DocumentError`] - Schema document loading errors
//! - [`CsvError`] - CSV input errors
//! - [`PipelineError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors detected while a schema (or a schema document) is being defined.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The rule's target cannot be turned into a write operation.
    #[error("'{path}' could not be mapped. {target} is not a writable target. {hint}")]
    UnresolvedTarget {
        path: String,
        target: String,
        hint: String,
    },

    /// An owner-qualified field that its owner type does not declare.
    #[error("'{path}' could not be mapped. {owner}.{field} is not declared. Check and make sure {owner} declares '{field}'")]
    UndeclaredField {
        path: String,
        owner: String,
        field: String,
    },

    /// A rule ended up with an empty source path.
    #[error("Rule declared under '{0}' has an empty path")]
    EmptyPath(String),

    /// A schema without a target collection was used outside a parent mapping.
    #[error("Schema '{0}' has no target collection and can only be used embedded in another mapping")]
    EmbeddedWithoutParent(String),

    /// A rule kind that needs a converter was declared without one.
    #[error("Rule '{0}' needs a converter")]
    MissingConverter(String),

    /// Reference to a type that was never declared.
    #[error("Unknown type '{0}'")]
    UnknownType(String),

    /// Reference to a schema that was never declared.
    #[error("Unknown schema '{0}'")]
    UnknownSchema(String),

    /// A type or schema that (transitively) refers to itself.
    #[error("'{0}' refers to itself")]
    Cycle(String),

    /// Wrong number of type arguments for a parameterized type.
    #[error("Type '{ty}' expects {expected} type argument(s), got {got}")]
    Arity {
        ty: String,
        expected: usize,
        got: usize,
    },

    /// Invalid operation declaration (bad regex, bad format...).
    #[error("Invalid operation in rule '{rule}': {message}")]
    InvalidOperation { rule: String, message: String },
}

// =============================================================================
// Converter Errors
// =============================================================================

/// Errors raised by value converters.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Free-form converter failure.
    #[error("{0}")]
    Message(String),

    /// The converter received a value of an unsupported kind.
    #[error("expected {expected}, got {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },

    /// A nested schema failed while mapping the value.
    #[error("nested mapping failed: {0}")]
    Nested(#[source] Box<MappingError>),
}

impl ConvertError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

// =============================================================================
// Mapping Errors
// =============================================================================

/// Errors raised while mapping a record.
#[derive(Debug, Error)]
pub enum MappingError {
    /// Configuration problem discovered at run time.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A path token was applied to a value that cannot be indexed by it.
    #[error("Node '{token}' can not index into {found} while mapping '{header}'")]
    Traversal {
        header: String,
        token: String,
        found: &'static str,
    },

    /// A converter failed.
    #[error("Error while converting '{header}' to the mappable value using {converter}.\n{value}")]
    Conversion {
        header: String,
        value: String,
        converter: String,
        #[source]
        source: ConvertError,
    },

    /// A write operation failed.
    #[error("Error when calling '{target}' on '{item}' with '{value}': {message}")]
    Write {
        target: String,
        item: String,
        value: String,
        message: String,
    },

    /// The rule's context marker does not resolve to any live object.
    #[error("No object of type '{ty}' in scope while mapping '{header}'")]
    NoTarget { header: String, ty: String },

    /// The raw input is not a record.
    #[error("Expected a mapping record, got {0}")]
    InvalidRecord(&'static str),

    /// The target object factory failed.
    #[error("{schema} failed to create item: {message}")]
    Create { schema: String, message: String },

    /// The finalization hook rejected the item.
    #[error("Mapping '{schema}' could not be completed: {message}")]
    Hook { schema: String, message: String },

    /// The finalization hook asked to skip a record that must produce an item.
    #[error("Mapping '{0}' skipped the record")]
    Skipped(String),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the schema registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No schema registered for the type or any of its ancestors.
    #[error("Mapping for {0} not found")]
    NotFound(String),
}

// =============================================================================
// Persistence Errors
// =============================================================================

/// Errors from the persistence collaborator.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The item has no save capability.
    #[error("{0} has no save capability")]
    Unsupported(String),

    /// The save hook failed.
    #[error("Failed to save {item}: {message}")]
    Save { item: String, message: String },
}

// =============================================================================
// Document Errors
// =============================================================================

/// Errors while loading or compiling a schema document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The document could not be read.
    #[error("Failed to read schema document: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid JSON for the expected shape.
    #[error("Invalid schema document: {0}")]
    Json(#[from] serde_json::Error),

    /// The document declares something that can not be compiled.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The document declares no schema.
    #[error("Schema document declares no schemas")]
    Empty,
}

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors during CSV parsing.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid CSV format.
    #[error("Invalid CSV format at line {line}: {message}")]
    Parse { line: u64, message: String },

    /// Empty file.
    #[error("CSV file is empty")]
    EmptyFile,

    /// No headers found.
    #[error("No headers found in CSV")]
    NoHeaders,
}

impl From<csv::Error> for CsvError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        CsvError::Parse {
            line,
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the main error type returned by [`crate::transform::pipeline::transform_file`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Schema document is invalid.
    #[error("Schema error: {0}")]
    Config(#[from] ConfigError),

    /// Record mapping failed.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Schema document could not be loaded.
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// Schema lookup failed.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// CSV parsing error.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No records to transform.
    #[error("No records to transform")]
    EmptyInput,

    /// No schema document was given.
    #[error("No schema document given (use --schema or DATAMAP_SCHEMA)")]
    NoSchema,
}

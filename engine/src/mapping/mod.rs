//! Declarative mapping engine.
//!
//! - [`field`] - Field rules, converters and write targets
//! - [`schema`] - Immutable rule index and the `map_item` entry points
//! - [`context`] - Per-invocation context tree
//! - [`annotate`] - Provenance overlay
//! - [`registry`] - Type → schema lookup
//! - [`persist`] - Persisting produced items

pub mod annotate;
pub mod context;
pub mod field;
pub mod persist;
pub mod registry;
pub mod schema;

pub use annotate::{AnnotatedValue, ANNOTATION_MARKER};
pub use context::{Mapped, MappingContext};
pub use field::{map_to, Converter, FieldRule, RuleKind, Target};
pub use persist::{each, Persistable};
pub use registry::SchemaRegistry;
pub use schema::{Completion, MappedItems, MappingSchema, SchemaBuilder};

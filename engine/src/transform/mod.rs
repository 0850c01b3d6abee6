//! Transformation module.
//!
//! - DSL: Schema documents, operations and batch execution
//! - Pipeline: Schema document + input file → JSON records

pub mod dsl;
pub mod pipeline;

pub use dsl::*;
pub use pipeline::*;

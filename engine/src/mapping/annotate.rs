//! Provenance overlay for scalar values.

use crate::value::{Record, Value};

/// Marker prepended to every metadata attribute.
pub const ANNOTATION_MARKER: char = '@';

/// A scalar wrapped with provenance metadata.
///
/// Every attribute other than `value` is stored under a `@`-prefixed key so it
/// can never collide with the wrapped value.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedValue {
    value: Value,
    attrs: Record,
}

impl AnnotatedValue {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            attrs: Record::new(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn attrs(&self) -> &Record {
        &self.attrs
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        if key == "value" {
            self.value = value.into();
        } else {
            self.attrs.insert(marked(key), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if key == "value" {
            Some(&self.value)
        } else {
            self.attrs.get(&marked(key))
        }
    }
}

fn marked(key: &str) -> String {
    format!("{}{}", ANNOTATION_MARKER, key.trim_start_matches(ANNOTATION_MARKER))
}

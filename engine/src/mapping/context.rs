//! Mapping contexts: one frame per `map_item` invocation.
//!
//! A root run opens a context holding the fresh target object. Every nested
//! schema converter opens a child context whose `parent` is the frame that
//! invoked it, so the tree depth is the embedded-mapping depth. Contexts keep
//! an object cache (the latest value per runtime type) used to route writes to
//! objects other than the current one.

use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{ConfigError, ConvertError, MappingError};
use crate::mapping::annotate::AnnotatedValue;
use crate::mapping::field::{Converter, FieldRule, RuleKind};
use crate::mapping::schema::{Completion, MappingSchema};
use crate::models::{ObjectRef, ObjectType};
use crate::value::{RawRecord, TypeKey, Value};

/// Outcome of mapping one record.
#[derive(Debug, Clone)]
pub enum Mapped {
    Produced(ObjectRef),
    Skipped,
}

impl Mapped {
    pub fn produced(self) -> Option<ObjectRef> {
        match self {
            Mapped::Produced(item) => Some(item),
            Mapped::Skipped => None,
        }
    }
}

/// Runtime frame of a mapping invocation.
pub struct MappingContext<'a> {
    schema: &'a MappingSchema,
    parent: Option<&'a MappingContext<'a>>,
    root: String,
    item: ObjectRef,
    cache: RefCell<Vec<(TypeKey, Value)>>,
    annotate: bool,
}

impl<'a> MappingContext<'a> {
    /// Open a frame: pick the target object and register it with the parent.
    pub fn open(
        schema: &'a MappingSchema,
        parent: Option<&'a MappingContext<'a>>,
        root: impl Into<String>,
        raw: &RawRecord,
    ) -> Result<Self, MappingError> {
        let item = match (schema.target_collection(), parent) {
            (Some(_), _) => schema.create_data_item(raw).inspect_err(|e| {
                error!(schema = schema.name(), error = %e, "failed to create item");
            })?,
            (None, Some(parent)) => parent.item.clone(),
            (None, None) => {
                let err = ConfigError::EmbeddedWithoutParent(schema.name().to_string());
                error!(schema = schema.name(), error = %err, "failed to create item");
                return Err(err.into());
            }
        };
        if let Some(parent) = parent {
            parent.remember(Value::Object(item.clone()));
        }
        Ok(Self {
            schema,
            parent,
            root: root.into(),
            item,
            cache: RefCell::new(Vec::new()),
            annotate: parent.map_or(schema.should_annotate(), |p| p.annotate),
        })
    }

    pub fn schema(&self) -> &MappingSchema {
        self.schema
    }

    pub fn parent(&self) -> Option<&MappingContext<'a>> {
        self.parent
    }

    /// The live object populated by this frame.
    pub fn item(&self) -> &ObjectRef {
        &self.item
    }

    /// Annotation mode, inherited from the root frame.
    pub fn annotate(&self) -> bool {
        self.annotate
    }

    /// Fully-qualified dotted prefix of this frame.
    pub fn path(&self) -> String {
        match self.parent {
            Some(parent) => join_path(&parent.path(), &self.root),
            None => self.root.clone(),
        }
    }

    /// Number of frames from the root to this one, inclusive.
    pub fn depth(&self) -> usize {
        1 + self.parent.map_or(0, MappingContext::depth)
    }

    /// Cache `value` as the latest of its runtime type.
    pub fn remember(&self, value: Value) {
        let key = value.type_key();
        let mut cache = self.cache.borrow_mut();
        match cache.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => cache.push((key, value)),
        }
    }

    /// Latest cached value of a runtime type.
    pub fn cached(&self, key: &TypeKey) -> Option<Value> {
        self.cache
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Resolve which live object a write should target.
    ///
    /// No marker, or a marker matching the current object, resolves to the
    /// current object. Otherwise the cache is searched, then the parent
    /// (strictly, then loosely). `None` means no such object is in scope.
    pub fn get_item(&self, marker: Option<&ObjectType>, strict: bool) -> Option<ObjectRef> {
        let Some(ty) = marker else {
            return Some(self.item.clone());
        };
        if self.item.matches(ty, strict) {
            return Some(self.item.clone());
        }
        let cached = self.cache.borrow().iter().find_map(|(_, value)| match value {
            Value::Object(object) if object.matches(ty, strict) => Some(object.clone()),
            _ => None,
        });
        if cached.is_some() {
            return cached;
        }
        self.parent.and_then(|parent| {
            parent
                .get_item(marker, true)
                .or_else(|| parent.get_item(marker, false))
        })
    }

    /// Resolve, convert and write one rule for one source value.
    pub fn map_field(&self, rule: &FieldRule, value: Value, header: &str) -> Result<(), MappingError> {
        let mut value = value;
        for token in rule.tokenized_path().iter().skip(1) {
            value = traverse(value, token, header)?;
        }
        debug!(header, rule = rule.name(), path = rule.get_path(), "mapping field");

        match rule.get_converter() {
            Some(Converter::Nested(child)) if child.is_list() => {
                let elements = match value {
                    Value::List(items) => items,
                    other => {
                        warn!(
                            schema = child.name(),
                            found = other.kind_name(),
                            "List mapping provided but the value provided is not a list"
                        );
                        vec![other]
                    }
                };
                for element in elements {
                    let mapped = self.map_nested(child, element, header)?;
                    if let Mapped::Produced(object) = mapped {
                        self.emit(rule, Value::Object(object), header)?;
                    }
                }
                Ok(())
            }
            Some(Converter::Nested(child)) => match self.map_nested(child, value, header)? {
                Mapped::Produced(object) => self.emit(rule, Value::Object(object), header),
                Mapped::Skipped => Ok(()),
            },
            converter => {
                let snapshot = value.snapshot();
                let converted = rule.convert(value).map_err(|source| MappingError::Conversion {
                    header: header.to_string(),
                    value: snapshot,
                    converter: converter.map_or("<identity>", Converter::name).to_string(),
                    source,
                })?;
                self.emit(rule, converted, header)
            }
        }
    }

    fn map_nested(
        &self,
        child: &Arc<MappingSchema>,
        value: Value,
        header: &str,
    ) -> Result<Mapped, MappingError> {
        let snapshot = value.snapshot();
        RawRecord::from_value(value)
            .and_then(|raw| map_in_context(child, Some(self), header, raw))
            .map_err(|e| MappingError::Conversion {
                header: header.to_string(),
                value: snapshot,
                converter: child.name().to_string(),
                source: ConvertError::Nested(Box::new(e)),
            })
    }

    /// Cache a produced value, find its destination and write it.
    fn emit(&self, rule: &FieldRule, value: Value, header: &str) -> Result<(), MappingError> {
        self.remember(value.clone());
        if rule.kind() == RuleKind::Ignore {
            return Ok(());
        }
        let marker = rule.get_context();
        let item = self
            .get_item(marker, true)
            .ok_or_else(|| MappingError::NoTarget {
                header: header.to_string(),
                ty: marker.map(ObjectType::name).unwrap_or_default().to_string(),
            })?;
        let value = self.annotated(value, rule);
        let described = value.to_string();
        rule.update_item(&item, value)
            .map_err(|message| MappingError::Write {
                target: rule.name().to_string(),
                item: item.type_name(),
                value: described,
                message,
            })
    }

    /// Wrap scalars with provenance when annotation is on.
    fn annotated(&self, value: Value, rule: &FieldRule) -> Value {
        if !self.annotate || !value.is_scalar() {
            return value;
        }
        let mut annotated = AnnotatedValue::new(value);
        annotated.set("path", join_path(&self.path(), rule.get_path()));
        if let Some(converter) = rule.get_converter().filter(|c| c.as_schema().is_none()) {
            annotated.set("MethodExecuted", converter.name());
            let doc_lines = converter
                .doc()
                .unwrap_or_default()
                .trim()
                .split('\n')
                .map(|line| Value::from(line.trim()))
                .collect::<Vec<_>>();
            annotated.set("MethodDocstring", Value::List(doc_lines));
        }
        Value::Annotated(Box::new(annotated))
    }
}

/// Map `raw` through `schema` inside a new frame under `parent`.
pub(crate) fn map_in_context(
    schema: &MappingSchema,
    parent: Option<&MappingContext<'_>>,
    root: &str,
    raw: RawRecord,
) -> Result<Mapped, MappingError> {
    let ctx = MappingContext::open(schema, parent, root, &raw)?;
    debug!(schema = schema.name(), path = %ctx.path(), depth = ctx.depth(), "mapping item");

    let mut unmapped = Vec::new();
    for (header, value) in raw.into_pairs() {
        let value = value.normalize();
        let rules = schema.get_mappings(&header);
        if rules.is_empty() {
            unmapped.push((header, value));
            continue;
        }
        for rule in rules {
            ctx.map_field(rule, value.clone(), &header)?;
        }
    }

    if schema.store_unmapped() && !unmapped.is_empty() {
        let mut item = ctx.item.try_borrow_mut().map_err(|_| MappingError::Write {
            target: "<unmapped>".to_string(),
            item: ctx.item.type_name(),
            value: String::new(),
            message: "target object is already being written".to_string(),
        })?;
        for (header, value) in unmapped {
            item.set(header, value);
        }
    }

    match schema.mapping_complete(&ctx.item)? {
        Completion::Keep => Ok(Mapped::Produced(ctx.item)),
        Completion::Skip => Ok(Mapped::Skipped),
    }
}

/// One traversal step into a nested value.
fn traverse(value: Value, token: &str, header: &str) -> Result<Value, MappingError> {
    match value {
        Value::Map(mut record) => match record.remove(token) {
            Some(inner) => Ok(inner),
            None => {
                let found: Vec<&str> = record.keys().collect();
                warn!(
                    "Node '{}' not found on {}. Nodes found: {}",
                    token,
                    header,
                    found.join(",")
                );
                Ok(Value::Map(record))
            }
        },
        Value::List(mut items) => match token.parse::<usize>() {
            Ok(idx) if idx < items.len() => Ok(items.swap_remove(idx)),
            Ok(idx) => {
                warn!(
                    "Node '{}' not found on {}. List has {} entries",
                    idx,
                    header,
                    items.len()
                );
                Ok(Value::List(items))
            }
            Err(_) => {
                debug!("list on '{}' can not be sliced by {}", header, token);
                Err(MappingError::Traversal {
                    header: header.to_string(),
                    token: token.to_string(),
                    found: "list",
                })
            }
        },
        other => {
            debug!("{} on '{}' can not be sliced by {}", other.kind_name(), header, token);
            Err(MappingError::Traversal {
                header: header.to_string(),
                token: token.to_string(),
                found: other.kind_name(),
            })
        }
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    match (prefix.is_empty(), segment.is_empty()) {
        (true, _) => segment.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{}.{}", prefix, segment),
    }
}

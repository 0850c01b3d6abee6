//! Mapping schemas: the immutable, definition-time index of field rules.
//!
//! A schema is declared once through [`SchemaBuilder`] and shared (behind an
//! `Arc`) across any number of mapping runs.
//!
//! ```rust,ignore
//! let root = ObjectType::new("RootData", ["id", "verb_id"]);
//! let schema = MappingSchema::builder("BasicMapping")
//!     .target(&root)
//!     .rule("verb_id", FieldRule::map_to())
//!     .rule("special_case", FieldRule::new(root.field("id")).path("special_case.an_id"))
//!     .build()?;
//!
//! let item = schema.map_item(record)?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ConfigError, MappingError, PersistError};
use crate::mapping::context::{self, Mapped};
use crate::mapping::field::FieldRule;
use crate::mapping::persist;
use crate::models::{Object, ObjectRef, ObjectType};
use crate::value::{RawRecord, Value};

/// Target object factory hook.
pub type CreateFn = Arc<dyn Fn(&ObjectType, &RawRecord) -> Result<Object, String> + Send + Sync>;
/// Finalization hook.
pub type CompleteFn = Arc<dyn Fn(&ObjectRef) -> Result<Completion, String> + Send + Sync>;

/// What the finalization hook decided about a mapped item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    #[default]
    Keep,
    /// Drop the item. List-mapping schemas continue with the next element.
    Skip,
}

// =============================================================================
// Schema
// =============================================================================

/// Immutable set of field rules for one object shape.
pub struct MappingSchema {
    name: String,
    target: Option<ObjectType>,
    index: BTreeMap<String, Vec<FieldRule>>,
    store_unmapped: bool,
    annotate: bool,
    list: bool,
    create: Option<CreateFn>,
    complete: Option<CompleteFn>,
}

impl MappingSchema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            target: None,
            declared: Vec::new(),
            store_unmapped: true,
            annotate: false,
            list: false,
            create: None,
            complete: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type of the top-level objects; `None` for embedded schemas.
    pub fn target_collection(&self) -> Option<&ObjectType> {
        self.target.as_ref()
    }

    pub fn store_unmapped(&self) -> bool {
        self.store_unmapped
    }

    pub fn should_annotate(&self) -> bool {
        self.annotate
    }

    /// Whether this schema maps a list of records into several objects.
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// Rules for a header: exact match, then lowercase, else none.
    pub fn get_mappings(&self, header: &str) -> &[FieldRule] {
        self.index
            .get(header)
            .or_else(|| self.index.get(&header.to_lowercase()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Dispatch keys in sorted order.
    pub fn headings(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Key → rules pairs in sorted key order.
    pub fn field_index(&self) -> impl Iterator<Item = (&str, &[FieldRule])> {
        self.index.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn rule_count(&self) -> usize {
        self.index.values().map(Vec::len).sum()
    }

    /// Build the target object for a root-level run.
    pub fn create_data_item(&self, raw: &RawRecord) -> Result<ObjectRef, MappingError> {
        let ty = self
            .target
            .as_ref()
            .ok_or_else(|| ConfigError::EmbeddedWithoutParent(self.name.clone()))?;
        let object = match &self.create {
            Some(create) => create(ty, raw).map_err(|message| MappingError::Create {
                schema: self.name.clone(),
                message,
            })?,
            None => ty.instantiate(),
        };
        Ok(ObjectRef::new(object))
    }

    /// Run the finalization hook.
    pub fn mapping_complete(&self, item: &ObjectRef) -> Result<Completion, MappingError> {
        match &self.complete {
            Some(complete) => complete(item).map_err(|message| MappingError::Hook {
                schema: self.name.clone(),
                message,
            }),
            None => Ok(Completion::Keep),
        }
    }

    /// Map one record into a fresh target object.
    pub fn map_item(&self, raw: impl Into<RawRecord>) -> Result<ObjectRef, MappingError> {
        match self.map_record(raw.into())? {
            Mapped::Produced(item) => Ok(item),
            Mapped::Skipped => Err(MappingError::Skipped(self.name.clone())),
        }
    }

    /// Map a row of values paired with parallel headings.
    pub fn map_row(&self, headings: &[String], values: Vec<Value>) -> Result<ObjectRef, MappingError> {
        self.map_item(RawRecord::row(headings.to_vec(), values))
    }

    /// Map one record, reporting skips instead of failing on them.
    pub fn map_record(&self, raw: RawRecord) -> Result<Mapped, MappingError> {
        context::map_in_context(self, None, "", raw)
    }

    /// Lazily map every element of a list; one object per element.
    ///
    /// A non-list input is mapped as a single element.
    pub fn map_items(&self, items: Value) -> MappedItems<'_> {
        let items = match items {
            Value::List(items) => items,
            other => {
                warn!(
                    schema = %self.name,
                    found = other.kind_name(),
                    "List mapping provided but the value provided is not a list"
                );
                vec![other]
            }
        };
        MappedItems {
            schema: self,
            items: items.into_iter(),
        }
    }

    /// Map a value standalone: one object, or a list of objects for list schemas.
    pub fn map_value(&self, value: Value) -> Result<Value, MappingError> {
        if self.list {
            let objects = self
                .map_items(value)
                .map(|item| item.map(Value::Object))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(objects))
        } else {
            self.map_item(RawRecord::from_value(value)?).map(Value::Object)
        }
    }

    /// Persist a produced item through its save capability.
    pub fn each(&self, item: &ObjectRef) -> Result<(), PersistError> {
        persist::each(item)
    }
}

impl fmt::Debug for MappingSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingSchema")
            .field("name", &self.name)
            .field("target", &self.target.as_ref().map(ObjectType::name))
            .field("index", &self.index)
            .field("store_unmapped", &self.store_unmapped)
            .field("annotate", &self.annotate)
            .field("list", &self.list)
            .finish()
    }
}

/// Lazy sequence of mapped items, one per input element.
///
/// Skipped elements are left out.
pub struct MappedItems<'s> {
    schema: &'s MappingSchema,
    items: std::vec::IntoIter<Value>,
}

impl Iterator for MappedItems<'_> {
    type Item = Result<ObjectRef, MappingError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let element = self.items.next()?;
            let mapped = RawRecord::from_value(element)
                .and_then(|raw| self.schema.map_record(raw));
            match mapped {
                Ok(Mapped::Produced(item)) => return Some(Ok(item)),
                Ok(Mapped::Skipped) => {
                    debug!(schema = %self.schema.name, "element skipped");
                    continue;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.items.len()))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Declares a [`MappingSchema`].
pub struct SchemaBuilder {
    name: String,
    target: Option<ObjectType>,
    declared: Vec<(String, FieldRule)>,
    store_unmapped: bool,
    annotate: bool,
    list: bool,
    create: Option<CreateFn>,
    complete: Option<CompleteFn>,
}

impl SchemaBuilder {
    /// Make this a root schema producing instances of `ty`.
    pub fn target(mut self, ty: &ObjectType) -> Self {
        self.target = Some(ty.clone());
        self
    }

    /// Declare a rule under `key`. The key is the rule's default path.
    pub fn rule(mut self, key: impl Into<String>, rule: FieldRule) -> Self {
        self.declared.push((key.into(), rule));
        self
    }

    /// Declare several rules under one key.
    pub fn rules<I>(mut self, key: impl Into<String>, rules: I) -> Self
    where
        I: IntoIterator<Item = FieldRule>,
    {
        let key = key.into();
        for rule in rules {
            self.declared.push((key.clone(), rule));
        }
        self
    }

    pub fn store_unmapped(mut self, store: bool) -> Self {
        self.store_unmapped = store;
        self
    }

    pub fn annotate(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    /// Map lists of records, one object per element.
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    pub fn create_with<F>(mut self, create: F) -> Self
    where
        F: Fn(&ObjectType, &RawRecord) -> Result<Object, String> + Send + Sync + 'static,
    {
        self.create = Some(Arc::new(create));
        self
    }

    pub fn on_complete<F>(mut self, complete: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<Completion, String> + Send + Sync + 'static,
    {
        self.complete = Some(Arc::new(complete));
        self
    }

    /// Bind every rule to its key and bucket it by first path segment.
    pub fn build(self) -> Result<Arc<MappingSchema>, ConfigError> {
        let mut index: BTreeMap<String, Vec<FieldRule>> = BTreeMap::new();
        for (key, mut rule) in self.declared {
            rule.bind(&key)?;
            let heading = rule.tokenized_path()[0].clone();
            index.entry(heading).or_default().push(rule);
        }
        debug!(schema = %self.name, keys = index.len(), "schema index built");
        Ok(Arc::new(MappingSchema {
            name: self.name,
            target: self.target,
            index,
            store_unmapped: self.store_unmapped,
            annotate: self.annotate,
            list: self.list,
            create: self.create,
            complete: self.complete,
        }))
    }
}

//! Schema documents: JSON declarations of types and mapping schemas.
//!
//! A document is compiled into live [`ObjectType`]s and [`MappingSchema`]s.
//! Names are resolved at compile time; nested schemas are compiled before the
//! schemas that embed them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::operations::{chain, Operation};
use crate::error::{ConfigError, DocumentError};
use crate::mapping::field::{Converter, FieldRule, RuleKind, Target};
use crate::mapping::registry::SchemaRegistry;
use crate::mapping::schema::MappingSchema;
use crate::models::ObjectType;

// =============================================================================
// Document model
// =============================================================================

/// A complete schema document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Version of the document format
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Target types
    #[serde(default)]
    pub types: Vec<TypeSpec>,

    /// Mapping schemas, root and embedded
    pub schemas: Vec<SchemaSpec>,

    /// Entry schema; defaults to the first schema with a target
    #[serde(default)]
    pub root: Option<String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

/// A declared target type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSpec {
    pub name: String,

    #[serde(default)]
    pub fields: Vec<String>,

    /// Supertype name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamSpec>,
}

/// A type parameter with an optional bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<String>,
}

/// A declared mapping schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub name: String,

    /// Target type; absent for schemas only used embedded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default = "default_true")]
    pub store_unmapped: bool,

    #[serde(default)]
    pub annotate: bool,

    /// Map lists, one object per element
    #[serde(default)]
    pub list: bool,

    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// One field rule, declared under a source key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub key: String,

    #[serde(default)]
    pub kind: RuleKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSpec>,

    /// Dotted source path; defaults to the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Type of the object to write into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,

    /// Nested schema used as the converter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

/// Where a rule writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetSpec {
    /// Plain attribute
    Attribute(String),

    /// Declared field of a type
    Field {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
    },

    /// Append onto a list field
    Append {
        append: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
    },
}

impl TypeSpec {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            extends: None,
            params: Vec::new(),
        }
    }
}

impl SchemaSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            store_unmapped: true,
            annotate: false,
            list: false,
            rules: Vec::new(),
        }
    }

    pub fn target(mut self, ty: impl Into<String>) -> Self {
        self.target = Some(ty.into());
        self
    }

    pub fn rule(mut self, rule: RuleSpec) -> Self {
        self.rules.push(rule);
        self
    }
}

impl RuleSpec {
    pub fn new(key: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            key: key.into(),
            kind,
            target: None,
            path: None,
            context: None,
            operations: Vec::new(),
            schema: None,
        }
    }

    pub fn to(mut self, target: TargetSpec) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    /// Use a nested schema as the converter.
    pub fn via(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

impl TargetSpec {
    pub fn field(field: impl Into<String>, owner: impl Into<String>) -> Self {
        TargetSpec::Field {
            field: field.into(),
            owner: Some(owner.into()),
        }
    }
}

impl SchemaDocument {
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Source keys referenced by a schema's rules.
    pub fn source_keys(&self, schema: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .schemas
            .iter()
            .filter(|s| s.name == schema)
            .flat_map(|s| s.rules.iter().map(|r| r.key.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Resolve every name and build the schemas.
    pub fn compile(&self) -> Result<CompiledDocument, DocumentError> {
        if self.schemas.is_empty() {
            return Err(DocumentError::Empty);
        }
        let mut compiler = Compiler {
            doc: self,
            types: HashMap::new(),
            schemas: HashMap::new(),
            visiting: HashSet::new(),
        };
        for spec in &self.types {
            compiler.object_type(&spec.name)?;
        }
        for spec in &self.schemas {
            compiler.schema(&spec.name)?;
        }

        let root_name = match &self.root {
            Some(name) => name.clone(),
            None => self
                .schemas
                .iter()
                .find(|s| s.target.is_some())
                .map(|s| s.name.clone())
                .ok_or_else(|| ConfigError::UnknownSchema("<root>".to_string()))?,
        };
        let root = compiler
            .schemas
            .get(&root_name)
            .cloned()
            .ok_or(ConfigError::UnknownSchema(root_name))?;

        let registry = SchemaRegistry::new();
        for spec in &self.schemas {
            let Some(schema) = compiler.schemas.get(&spec.name) else {
                continue;
            };
            match schema.target_collection() {
                Some(ty) => registry.maps(ty, schema.clone()),
                None => registry.register(schema.clone()),
            }
        }
        debug!(
            types = compiler.types.len(),
            schemas = compiler.schemas.len(),
            root = root.name(),
            "schema document compiled"
        );

        Ok(CompiledDocument {
            types: compiler.types,
            schemas: compiler.schemas,
            registry,
            root,
        })
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// Result of compiling a [`SchemaDocument`].
#[derive(Debug)]
pub struct CompiledDocument {
    types: HashMap<String, ObjectType>,
    schemas: HashMap<String, Arc<MappingSchema>>,
    registry: SchemaRegistry,
    root: Arc<MappingSchema>,
}

impl CompiledDocument {
    pub fn root(&self) -> &Arc<MappingSchema> {
        &self.root
    }

    pub fn schema(&self, name: &str) -> Option<&Arc<MappingSchema>> {
        self.schemas.get(name)
    }

    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.types.get(name)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Switch the entry schema.
    pub fn with_root(mut self, name: &str) -> Result<Self, ConfigError> {
        self.root = self
            .schemas
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSchema(name.to_string()))?;
        Ok(self)
    }
}

struct Compiler<'d> {
    doc: &'d SchemaDocument,
    types: HashMap<String, ObjectType>,
    schemas: HashMap<String, Arc<MappingSchema>>,
    visiting: HashSet<String>,
}

impl Compiler<'_> {
    fn object_type(&mut self, name: &str) -> Result<ObjectType, ConfigError> {
        if let Some(ty) = self.types.get(name) {
            return Ok(ty.clone());
        }
        let doc = self.doc;
        let spec = doc
            .types
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ConfigError::UnknownType(name.to_string()))?;
        if !self.visiting.insert(format!("type:{}", name)) {
            return Err(ConfigError::Cycle(name.to_string()));
        }

        let mut builder = ObjectType::builder(name).fields(spec.fields.iter().cloned());
        if let Some(parent) = &spec.extends {
            builder = builder.extends(&self.object_type(parent)?);
        }
        for param in &spec.params {
            let bound = param
                .bound
                .as_deref()
                .map(|b| self.object_type(b))
                .transpose()?;
            builder = builder.param(param.name.clone(), bound.as_ref());
        }
        let ty = builder.build();

        self.visiting.remove(&format!("type:{}", name));
        self.types.insert(name.to_string(), ty.clone());
        Ok(ty)
    }

    fn schema(&mut self, name: &str) -> Result<Arc<MappingSchema>, ConfigError> {
        if let Some(schema) = self.schemas.get(name) {
            return Ok(schema.clone());
        }
        let doc = self.doc;
        let spec = doc
            .schemas
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownSchema(name.to_string()))?;
        if !self.visiting.insert(format!("schema:{}", name)) {
            return Err(ConfigError::Cycle(name.to_string()));
        }

        let mut builder = MappingSchema::builder(name)
            .store_unmapped(spec.store_unmapped)
            .annotate(spec.annotate);
        if let Some(target) = &spec.target {
            builder = builder.target(&self.object_type(target)?);
        }
        if spec.list {
            builder = builder.list();
        }
        for rule in &spec.rules {
            let compiled = self.rule(rule)?;
            builder = builder.rule(rule.key.clone(), compiled);
        }
        let schema = builder.build()?;

        self.visiting.remove(&format!("schema:{}", name));
        self.schemas.insert(name.to_string(), schema.clone());
        Ok(schema)
    }

    fn rule(&mut self, spec: &RuleSpec) -> Result<FieldRule, ConfigError> {
        let target = match &spec.target {
            None => Target::Deferred,
            Some(TargetSpec::Attribute(name)) => Target::Attribute(name.clone()),
            Some(TargetSpec::Field { field, owner: Some(owner) }) => self.object_type(owner)?.field(field.clone()),
            Some(TargetSpec::Field { field, owner: None }) => Target::Attribute(field.clone()),
            Some(TargetSpec::Append { append, owner: Some(owner) }) => {
                self.object_type(owner)?.append(append.clone())
            }
            Some(TargetSpec::Append { append, owner: None }) => Target::append(append.clone()),
        };

        let mut rule = FieldRule::with_kind(spec.kind, target);
        if let Some(path) = &spec.path {
            rule = rule.path(path.clone());
        }
        if let Some(context) = &spec.context {
            rule = rule.context(&self.object_type(context)?);
        }

        match (&spec.schema, spec.operations.is_empty()) {
            (Some(_), false) => {
                return Err(ConfigError::InvalidOperation {
                    rule: spec.key.clone(),
                    message: "a rule can use operations or a nested schema, not both".to_string(),
                })
            }
            (Some(schema), true) => rule = rule.converter(Converter::Nested(self.schema(schema)?)),
            (None, false) => {
                for op in &spec.operations {
                    op.validate().map_err(|message| ConfigError::InvalidOperation {
                        rule: spec.key.clone(),
                        message,
                    })?;
                }
                rule = rule.converter(chain(spec.operations.clone()));
            }
            (None, true) => {}
        }
        Ok(rule)
    }
}

// =============================================================================
// Example
// =============================================================================

/// A small document showing every rule shape: a nested schema that appends
/// into the parent and writes a parent field through its context.
pub fn example_schema() -> SchemaDocument {
    let deeper = SchemaSpec::new("EmbeddedMapping")
        .target("Deeper")
        .rule(RuleSpec::new("a_string", RuleKind::MapTo).to(TargetSpec::field("info", "Deeper")))
        .rule(RuleSpec::new("a_phrase", RuleKind::Ignore))
        .rule(RuleSpec::new("an_id", RuleKind::MapTo).to(TargetSpec::field("id", "RootData")));

    let basic = SchemaSpec::new("BasicMapping")
        .target("RootData")
        .rule(RuleSpec::new("verb_id", RuleKind::Tbd).with_operation(Operation::Trim))
        .rule(
            RuleSpec::new("special_case", RuleKind::Map)
                .to(TargetSpec::Append {
                    append: "somethings_deep".to_string(),
                    owner: Some("RootData".to_string()),
                })
                .via("EmbeddedMapping"),
        );

    SchemaDocument {
        version: default_version(),
        description: "RootData with one embedded Deeper per record".to_string(),
        types: vec![
            TypeSpec::new("RootData", ["id", "verb_id", "somethings_deep"]),
            TypeSpec::new("Deeper", ["info"]),
        ],
        schemas: vec![deeper, basic],
        root: Some("BasicMapping".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_document_serialization() {
        let doc = example_schema();
        let json = doc.to_json().unwrap();
        let parsed = SchemaDocument::from_json(&json).unwrap();
        assert_eq!(parsed.version, doc.version);
        assert_eq!(parsed.schemas.len(), 2);
        assert_eq!(parsed.source_keys("BasicMapping"), ["special_case", "verb_id"]);
    }

    #[test]
    fn test_example_compiles_and_maps() {
        let compiled = example_schema().compile().unwrap();
        assert_eq!(compiled.root().name(), "BasicMapping");

        let record = serde_json::json!({
            "verb_id": " TestRow ",
            "special_case": {"a_string": "MyString", "a_phrase": "x", "an_id": "MyImportantID"}
        });
        let item = compiled.root().map_item(record).unwrap();
        assert_eq!(item.get("id"), Some(Value::from("MyImportantID")));
        assert_eq!(item.get("verb_id"), Some(Value::from("TestRow")));

        let deep = item.get("somethings_deep").unwrap();
        let deeper = deep.as_list().unwrap()[0].as_object().unwrap().clone();
        assert_eq!(deeper.get("info"), Some(Value::from("MyString")));
        assert!(!deeper.has("id"));
    }

    #[test]
    fn test_registry_is_populated() {
        let compiled = example_schema().compile().unwrap();
        let deeper = compiled.object_type("Deeper").unwrap();
        assert_eq!(compiled.registry().locate(deeper).unwrap().name(), "EmbeddedMapping");
    }

    #[test]
    fn test_unknown_names_are_config_errors() {
        let doc = SchemaDocument::from_json(
            r#"{"schemas": [{"name": "S", "target": "Missing", "rules": []}]}"#,
        )
        .unwrap();
        let err = doc.compile().unwrap_err();
        assert!(matches!(err, DocumentError::Config(ConfigError::UnknownType(ref t)) if t == "Missing"));
    }

    #[test]
    fn test_schema_cycles_are_rejected() {
        let doc = SchemaDocument::from_json(
            r#"{
                "types": [{"name": "T", "fields": ["a"]}],
                "schemas": [
                    {"name": "A", "target": "T", "rules": [{"key": "x", "target": "a", "schema": "B"}]},
                    {"name": "B", "rules": [{"key": "y", "target": "a", "schema": "A"}]}
                ]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            doc.compile().unwrap_err(),
            DocumentError::Config(ConfigError::Cycle(_))
        ));
    }

    #[test]
    fn test_invalid_operation_is_rejected() {
        let doc = SchemaDocument::from_json(
            r#"{
                "types": [{"name": "T", "fields": ["a"]}],
                "schemas": [{"name": "S", "target": "T", "rules": [
                    {"key": "a", "kind": "preserve", "operations": [{"type": "replace", "pattern": "("}]}
                ]}]
            }"#,
        )
        .unwrap();
        let err = doc.compile().unwrap_err();
        assert!(err.to_string().contains("Invalid operation in rule 'a'"));
    }

    #[test]
    fn test_with_root_switches_entry_schema() {
        let compiled = example_schema().compile().unwrap();
        let switched = compiled.with_root("EmbeddedMapping").unwrap();
        assert_eq!(switched.root().name(), "EmbeddedMapping");
        assert!(switched.with_root("Nope").is_err());
    }
}

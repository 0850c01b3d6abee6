//! Field rules: one source path mapped onto one target write.
//!
//! A [`FieldRule`] combines a [`Target`] (where the value goes), an optional
//! [`Converter`] (how the value is transformed) and a dotted `path` (where the
//! value comes from). The first path segment is the dispatch key used by the
//! schema index; the remaining segments are traversal steps.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigError, ConvertError};
use crate::mapping::schema::MappingSchema;
use crate::models::{Object, ObjectRef, ObjectType};
use crate::value::Value;

/// Converter taking no input.
pub type ProduceFn = Arc<dyn Fn() -> Result<Value, ConvertError> + Send + Sync>;
/// Converter taking the value.
pub type ValueFn = Arc<dyn Fn(Value) -> Result<Value, ConvertError> + Send + Sync>;
/// Converter taking the value and the rule's path.
pub type KeyedFn = Arc<dyn Fn(Value, &str) -> Result<Value, ConvertError> + Send + Sync>;
/// Write operation taking the target object and the value.
pub type SetterFn = Arc<dyn Fn(&mut Object, Value) -> Result<(), String> + Send + Sync>;
/// Write operation taking only the value.
pub type SinkFn = Arc<dyn Fn(Value) -> Result<(), String> + Send + Sync>;

// =============================================================================
// Converters
// =============================================================================

/// How a rule transforms its source value. The calling convention is part of
/// the variant.
#[derive(Clone)]
pub enum Converter {
    NoArg {
        name: String,
        doc: Option<String>,
        call: ProduceFn,
    },
    ValueOnly {
        name: String,
        doc: Option<String>,
        call: ValueFn,
    },
    ValueAndKey {
        name: String,
        doc: Option<String>,
        call: KeyedFn,
    },
    /// An embedded schema, rooted at the rule's header on every run.
    Nested(Arc<MappingSchema>),
}

impl Converter {
    pub fn no_arg<F>(name: impl Into<String>, call: F) -> Self
    where
        F: Fn() -> Result<Value, ConvertError> + Send + Sync + 'static,
    {
        Converter::NoArg {
            name: name.into(),
            doc: None,
            call: Arc::new(call),
        }
    }

    pub fn value<F>(name: impl Into<String>, call: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ConvertError> + Send + Sync + 'static,
    {
        Converter::ValueOnly {
            name: name.into(),
            doc: None,
            call: Arc::new(call),
        }
    }

    pub fn keyed<F>(name: impl Into<String>, call: F) -> Self
    where
        F: Fn(Value, &str) -> Result<Value, ConvertError> + Send + Sync + 'static,
    {
        Converter::ValueAndKey {
            name: name.into(),
            doc: None,
            call: Arc::new(call),
        }
    }

    pub fn nested(schema: Arc<MappingSchema>) -> Self {
        Converter::Nested(schema)
    }

    /// Attach a doc string, reported by the annotation overlay.
    pub fn with_doc(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Converter::NoArg { doc, .. }
            | Converter::ValueOnly { doc, .. }
            | Converter::ValueAndKey { doc, .. } => *doc = Some(text.into()),
            Converter::Nested(_) => {}
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Converter::NoArg { name, .. }
            | Converter::ValueOnly { name, .. }
            | Converter::ValueAndKey { name, .. } => name,
            Converter::Nested(schema) => schema.name(),
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            Converter::NoArg { doc, .. }
            | Converter::ValueOnly { doc, .. }
            | Converter::ValueAndKey { doc, .. } => doc.as_deref(),
            Converter::Nested(_) => None,
        }
    }

    pub fn as_schema(&self) -> Option<&Arc<MappingSchema>> {
        match self {
            Converter::Nested(schema) => Some(schema),
            _ => None,
        }
    }

    /// Invoke with the shape the variant declares.
    ///
    /// Nested schemas are mapped standalone here; the engine maps them inside
    /// the current context instead.
    pub fn call(&self, value: Value, key: &str) -> Result<Value, ConvertError> {
        match self {
            Converter::NoArg { call, .. } => call(),
            Converter::ValueOnly { call, .. } => call(value),
            Converter::ValueAndKey { call, .. } => call(value, key),
            Converter::Nested(schema) => schema
                .map_value(value)
                .map_err(|e| ConvertError::Nested(Box::new(e))),
        }
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Converter::NoArg { name, .. } => write!(f, "NoArg({})", name),
            Converter::ValueOnly { name, .. } => write!(f, "ValueOnly({})", name),
            Converter::ValueAndKey { name, .. } => write!(f, "ValueAndKey({})", name),
            Converter::Nested(schema) => write!(f, "Nested({})", schema.name()),
        }
    }
}

impl From<Arc<MappingSchema>> for Converter {
    fn from(schema: Arc<MappingSchema>) -> Self {
        Converter::Nested(schema)
    }
}

// =============================================================================
// Targets
// =============================================================================

/// Where a rule writes its value.
#[derive(Clone)]
pub enum Target {
    /// Resolved from the rule's declared key when the schema is built.
    Deferred,
    /// Plain attribute on the resolved object.
    Attribute(String),
    /// Declared field of `owner`; the owner doubles as the rule's context.
    Field { owner: ObjectType, name: String },
    /// Append onto a list attribute.
    Append {
        owner: Option<ObjectType>,
        name: String,
    },
    /// Two-argument write operation.
    Setter { name: String, call: SetterFn },
    /// Single-argument write operation; the target object is not passed.
    Sink { name: String, call: SinkFn },
    /// Consumes the value.
    Discard,
}

impl Target {
    pub fn setter<F>(name: impl Into<String>, call: F) -> Self
    where
        F: Fn(&mut Object, Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Target::Setter {
            name: name.into(),
            call: Arc::new(call),
        }
    }

    pub fn sink<F>(name: impl Into<String>, call: F) -> Self
    where
        F: Fn(Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Target::Sink {
            name: name.into(),
            call: Arc::new(call),
        }
    }

    pub fn append(name: impl Into<String>) -> Self {
        Target::Append {
            owner: None,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Target::Deferred => "<deferred>",
            Target::Attribute(name)
            | Target::Field { name, .. }
            | Target::Append { name, .. }
            | Target::Setter { name, .. }
            | Target::Sink { name, .. } => name,
            Target::Discard => "<discard>",
        }
    }

    /// Type that owns this target, if any.
    pub fn owner(&self) -> Option<&ObjectType> {
        match self {
            Target::Field { owner, .. } => Some(owner),
            Target::Append { owner, .. } => owner.as_ref(),
            _ => None,
        }
    }

    fn validate(&self, path: &str) -> Result<(), ConfigError> {
        match self {
            Target::Deferred => Err(ConfigError::UnresolvedTarget {
                path: path.to_string(),
                target: "<none>".to_string(),
                hint: "Declare a target or use a preserving rule".to_string(),
            }),
            Target::Attribute(name) | Target::Append { name, .. } if name.is_empty() => {
                Err(ConfigError::UnresolvedTarget {
                    path: path.to_string(),
                    target: "''".to_string(),
                    hint: "Attribute names can not be empty".to_string(),
                })
            }
            _ => match self.owner() {
                Some(owner) if !owner.declares(self.name()) => Err(ConfigError::UndeclaredField {
                    path: path.to_string(),
                    owner: owner.name().to_string(),
                    field: self.name().to_string(),
                }),
                _ => Ok(()),
            },
        }
    }

    /// Run the write against `item`.
    pub fn write(&self, item: &ObjectRef, value: Value) -> Result<(), String> {
        match self {
            Target::Attribute(name) | Target::Field { name, .. } => {
                borrow_target(item)?.set(name.clone(), value);
                Ok(())
            }
            Target::Append { name, .. } => borrow_target(item)?.push(name, value),
            Target::Setter { call, .. } => call(&mut *borrow_target(item)?, value),
            Target::Sink { call, .. } => call(value),
            Target::Discard => Ok(()),
            Target::Deferred => Err("target was never resolved".to_string()),
        }
    }
}

fn borrow_target(item: &ObjectRef) -> Result<std::cell::RefMut<'_, Object>, String> {
    item.try_borrow_mut()
        .map_err(|_| format!("{} is already being written", item.type_name()))
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner() {
            Some(owner) => write!(f, "Target({}.{})", owner.name(), self.name()),
            None => write!(f, "Target({})", self.name()),
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Attribute(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Attribute(name)
    }
}

impl ObjectType {
    /// Owner-qualified reference to a declared field.
    pub fn field(&self, name: impl Into<String>) -> Target {
        Target::Field {
            owner: self.clone(),
            name: name.into(),
        }
    }

    /// Owner-qualified list-append onto a declared field.
    pub fn append(&self, name: impl Into<String>) -> Target {
        Target::Append {
            owner: Some(self.clone()),
            name: name.into(),
        }
    }
}

// =============================================================================
// Field Rules
// =============================================================================

/// Flavour of a rule.
///
/// `MapTo`, `Tbd` and `Unknown` behave exactly like `Preserve`; they only
/// document the schema author's intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    Map,
    Preserve,
    MapTo,
    Tbd,
    Unknown,
    #[serde(alias = "pass")]
    Ignore,
    EmbeddedValues,
}

impl RuleKind {
    pub fn is_preserve(&self) -> bool {
        matches!(
            self,
            RuleKind::Preserve | RuleKind::MapTo | RuleKind::Tbd | RuleKind::Unknown
        )
    }
}

/// A declarative mapping from one source path to one target write.
#[derive(Clone)]
pub struct FieldRule {
    kind: RuleKind,
    target: Target,
    converter: Option<Converter>,
    path: Option<String>,
    context: Option<ObjectType>,
    tokens: OnceCell<Vec<String>>,
}

impl FieldRule {
    /// Rule of an explicit kind. Ignore and embedded-value rules never write,
    /// so their target is always discarded.
    pub fn with_kind(kind: RuleKind, target: impl Into<Target>) -> Self {
        let target = match kind {
            RuleKind::Ignore | RuleKind::EmbeddedValues => Target::Discard,
            _ => target.into(),
        };
        Self {
            kind,
            target,
            converter: None,
            path: None,
            context: None,
            tokens: OnceCell::new(),
        }
    }

    /// Plain rule writing to `target`.
    pub fn new(target: impl Into<Target>) -> Self {
        Self::with_kind(RuleKind::Map, target)
    }

    /// Keeps the source value under the declared key.
    pub fn preserve() -> Self {
        Self::with_kind(RuleKind::Preserve, Target::Deferred)
    }

    pub fn map_to() -> Self {
        Self::with_kind(RuleKind::MapTo, Target::Deferred)
    }

    /// Known field whose destination is still to be decided.
    pub fn tbd() -> Self {
        Self::with_kind(RuleKind::Tbd, Target::Deferred)
    }

    pub fn unknown() -> Self {
        Self::with_kind(RuleKind::Unknown, Target::Deferred)
    }

    /// Consumes the source key without writing anything.
    pub fn ignore() -> Self {
        Self::with_kind(RuleKind::Ignore, Target::Discard)
    }

    pub fn pass() -> Self {
        Self::ignore()
    }

    /// Runs `converter` for its side effects and discards the result.
    pub fn embedded_values(converter: impl Into<Converter>) -> Self {
        Self::with_kind(RuleKind::EmbeddedValues, Target::Discard).converter(converter)
    }

    pub fn to(mut self, target: impl Into<Target>) -> Self {
        self.target = target.into();
        self
    }

    pub fn converter(mut self, converter: impl Into<Converter>) -> Self {
        self.converter = Some(converter.into());
        self
    }

    pub fn via(self, schema: &Arc<MappingSchema>) -> Self {
        self.converter(Converter::Nested(schema.clone()))
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.set_path(path);
        self
    }

    pub fn context(mut self, ty: &ObjectType) -> Self {
        self.context = Some(ty.clone());
        self
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn get_converter(&self) -> Option<&Converter> {
        self.converter.as_ref()
    }

    pub fn get_path(&self) -> &str {
        self.path.as_deref().unwrap_or_default()
    }

    /// Context marker: the target's owner wins over an explicit context.
    pub fn get_context(&self) -> Option<&ObjectType> {
        self.target.owner().or(self.context.as_ref())
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &str {
        self.target.name()
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = Some(path.into());
        self.tokens = OnceCell::new();
    }

    /// Path split on dots, computed once per path.
    pub fn tokenized_path(&self) -> &[String] {
        match &self.path {
            Some(path) => self
                .tokens
                .get_or_init(|| path.split('.').map(str::to_string).collect()),
            None => &[],
        }
    }

    /// Attach the rule to its declared key: default the path, resolve deferred
    /// targets and validate the write operation.
    pub(crate) fn bind(&mut self, key: &str) -> Result<(), ConfigError> {
        if self.path.is_none() {
            self.set_path(key);
        }
        if self.get_path().is_empty() {
            return Err(ConfigError::EmptyPath(key.to_string()));
        }
        if matches!(self.target, Target::Deferred) && self.kind.is_preserve() {
            self.target = Target::Attribute(key.to_string());
        }
        if self.kind == RuleKind::EmbeddedValues && self.converter.is_none() {
            return Err(ConfigError::MissingConverter(key.to_string()));
        }
        self.target.validate(self.get_path())
    }

    /// Apply the converter; identity when there is none.
    pub fn convert(&self, value: Value) -> Result<Value, ConvertError> {
        match &self.converter {
            Some(converter) => converter.call(value, self.get_path()),
            None => Ok(value),
        }
    }

    /// Write `value` into `item`. Ignore rules never write.
    pub fn update_item(&self, item: &ObjectRef, value: Value) -> Result<(), String> {
        if self.kind == RuleKind::Ignore {
            return Ok(());
        }
        self.target.write(item, value)
    }
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRule")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("converter", &self.converter)
            .field("path", &self.path)
            .field("context", &self.get_context().map(ObjectType::name))
            .finish()
    }
}

/// Shorthand for a plain rule with a converter.
pub fn map_to(target: impl Into<Target>, converter: impl Into<Converter>) -> FieldRule {
    FieldRule::new(target).converter(converter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_data() -> ObjectType {
        ObjectType::new("RootData", ["id", "verb_id", "somethings_deep"])
    }

    #[test]
    fn test_tokenized_path_follows_path_changes() {
        let mut rule = FieldRule::new("id").path("special_case.an_id");
        assert_eq!(rule.tokenized_path(), ["special_case", "an_id"]);

        rule.set_path("other.deeper.id");
        assert_eq!(rule.tokenized_path().len(), 3);
        assert_eq!(rule.tokenized_path()[0], "other");
    }

    #[test]
    fn test_bind_defaults_path_to_key() {
        let mut rule = FieldRule::map_to();
        rule.bind("verb_id").unwrap();
        assert_eq!(rule.get_path(), "verb_id");
        assert_eq!(rule.name(), "verb_id");
    }

    #[test]
    fn test_owner_becomes_context() {
        let root = root_data();
        let other = ObjectType::new("Other", Vec::<String>::new());
        let rule = FieldRule::new(root.field("id")).context(&other);
        assert_eq!(rule.get_context(), Some(&root));
    }

    #[test]
    fn test_undeclared_owner_field_is_a_config_error() {
        let mut rule = FieldRule::new(root_data().field("uid"));
        let err = rule.bind("special_case").unwrap_err();
        assert!(matches!(err, ConfigError::UndeclaredField { .. }));
    }

    #[test]
    fn test_plain_rule_without_target_fails() {
        let mut rule = FieldRule::new(Target::Deferred);
        let err = rule.bind("f").unwrap_err();
        assert!(err.to_string().contains("'f' could not be mapped"));
    }

    #[test]
    fn test_converter_shapes() {
        let upper = Converter::value("upper", |v: Value| {
            Ok(Value::from(v.as_str().unwrap_or_default().to_uppercase()))
        });
        let keyed = Converter::keyed("keyed", |_v, key| Ok(Value::from(key)));
        let constant = Converter::no_arg("constant", || Ok(Value::from(7)));

        assert_eq!(
            FieldRule::new("a").converter(upper).convert("x".into()).unwrap(),
            Value::from("X")
        );
        assert_eq!(
            FieldRule::new("a").path("a.b").converter(keyed).convert("x".into()).unwrap(),
            Value::from("a.b")
        );
        assert_eq!(
            FieldRule::new("a").converter(constant).convert("x".into()).unwrap(),
            Value::from(7)
        );
        assert_eq!(FieldRule::new("a").convert("x".into()).unwrap(), Value::from("x"));
    }

    #[test]
    fn test_update_item_shapes() {
        let root = root_data();
        let item = ObjectRef::new(root.instantiate());

        FieldRule::new("id").update_item(&item, "X".into()).unwrap();
        FieldRule::new(root.append("somethings_deep"))
            .update_item(&item, "deep".into())
            .unwrap();
        FieldRule::new(Target::setter("verb", |obj: &mut Object, v| {
            obj.set("verb_id", v);
            Ok(())
        }))
        .update_item(&item, "run".into())
        .unwrap();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let sink_seen = seen.clone();
        FieldRule::new(Target::sink("collect", move |v| {
            sink_seen.lock().map_err(|e| e.to_string())?.push(v.to_string());
            Ok(())
        }))
        .update_item(&item, "side".into())
        .unwrap();
        FieldRule::ignore().update_item(&item, "nope".into()).unwrap();

        assert_eq!(item.get("id"), Some(Value::from("X")));
        assert_eq!(item.get("verb_id"), Some(Value::from("run")));
        assert_eq!(
            item.get("somethings_deep"),
            Some(Value::List(vec![Value::from("deep")]))
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(!item.has("nope"));
    }

    #[test]
    fn test_setter_receives_the_object() {
        let target = Target::setter("add_something", |obj, value| {
            obj.push("somethings_deep", value)
        });
        let item = ObjectRef::new(root_data().instantiate());
        target.write(&item, Value::from("a")).unwrap();
        target.write(&item, Value::from("b")).unwrap();
        assert_eq!(
            item.get("somethings_deep"),
            Some(Value::List(vec![Value::from("a"), Value::from("b")]))
        );
    }
}

//! Target object model.
//!
//! - [`ObjectType`] - A declared target type ("mappable" type): fields,
//!   optional supertype, type parameters with bounds
//! - [`Object`] - An instance of a type with an open attribute record
//! - [`ObjectRef`] - Shared handle to a live object while it is being mapped
//!
//! Types are immutable and cheap to clone. Objects are single-threaded: a
//! mapping run shares them between the context tree and the values written
//! into other objects.

use std::cell::{BorrowError, BorrowMutError, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{ConfigError, PersistError};
use crate::value::{Record, Value};

/// Persistence hook attached to a type.
pub type SaveFn = Arc<dyn Fn(&Object) -> Result<(), String> + Send + Sync>;

// =============================================================================
// Object Types
// =============================================================================

/// A type parameter of a generic type, with an optional upper bound.
#[derive(Debug, Clone)]
pub struct TypeParam {
    pub name: String,
    pub bound: Option<ObjectType>,
}

/// A declared target type.
///
/// Two types are equal when they carry the same name.
#[derive(Clone)]
pub struct ObjectType(Arc<TypeInner>);

struct TypeInner {
    name: String,
    fields: Vec<String>,
    parent: Option<ObjectType>,
    params: Vec<TypeParam>,
    save: Option<SaveFn>,
}

impl ObjectType {
    /// Declare a type with the given fields.
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder(name).fields(fields).build()
    }

    pub fn builder(name: impl Into<String>) -> ObjectTypeBuilder {
        ObjectTypeBuilder {
            name: name.into(),
            fields: Vec::new(),
            parent: None,
            params: Vec::new(),
            save: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Fields declared directly on this type.
    pub fn own_fields(&self) -> &[String] {
        &self.0.fields
    }

    /// All declared fields, supertype fields first.
    pub fn fields(&self) -> Vec<String> {
        let mut chain: Vec<&ObjectType> = self.ancestors().collect();
        chain.reverse();
        let mut fields: Vec<String> = Vec::new();
        for ty in chain {
            for field in ty.own_fields() {
                if !fields.contains(field) {
                    fields.push(field.clone());
                }
            }
        }
        fields
    }

    pub fn declares(&self, field: &str) -> bool {
        self.ancestors().any(|ty| ty.own_fields().iter().any(|f| f == field))
    }

    pub fn parent(&self) -> Option<&ObjectType> {
        self.0.parent.as_ref()
    }

    pub fn params(&self) -> &[TypeParam] {
        &self.0.params
    }

    pub fn is_generic(&self) -> bool {
        !self.0.params.is_empty()
    }

    /// This type followed by its supertypes, most derived first.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    pub fn is_subtype_of(&self, other: &ObjectType) -> bool {
        self.ancestors().any(|ty| ty == other)
    }

    /// A fresh instance with every declared field set to null.
    pub fn instantiate(&self) -> Object {
        let attrs = self.fields().into_iter().map(|f| (f, Value::Null)).collect();
        Object {
            ty: self.clone(),
            args: Vec::new(),
            attrs,
        }
    }

    /// A fresh instance of a generic type with concrete type arguments.
    pub fn instantiate_with(&self, args: Vec<ObjectType>) -> Result<Object, ConfigError> {
        if args.len() != self.params().len() {
            return Err(ConfigError::Arity {
                ty: self.name().to_string(),
                expected: self.params().len(),
                got: args.len(),
            });
        }
        let mut object = self.instantiate();
        object.args = args;
        Ok(object)
    }

    pub(crate) fn save_hook(&self) -> Option<&SaveFn> {
        self.0.save.as_ref()
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for ObjectType {}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectType")
            .field("name", &self.0.name)
            .field("fields", &self.0.fields)
            .field("parent", &self.parent().map(ObjectType::name))
            .field("params", &self.0.params.len())
            .finish()
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Iterator over a type and its supertypes.
pub struct Ancestors<'a> {
    next: Option<&'a ObjectType>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ObjectType;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

/// Builder for [`ObjectType`].
pub struct ObjectTypeBuilder {
    name: String,
    fields: Vec<String>,
    parent: Option<ObjectType>,
    params: Vec<TypeParam>,
    save: Option<SaveFn>,
}

impl ObjectTypeBuilder {
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn extends(mut self, parent: &ObjectType) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn param(mut self, name: impl Into<String>, bound: Option<&ObjectType>) -> Self {
        self.params.push(TypeParam {
            name: name.into(),
            bound: bound.cloned(),
        });
        self
    }

    pub fn on_save<F>(mut self, save: F) -> Self
    where
        F: Fn(&Object) -> Result<(), String> + Send + Sync + 'static,
    {
        self.save = Some(Arc::new(save));
        self
    }

    pub fn build(self) -> ObjectType {
        ObjectType(Arc::new(TypeInner {
            name: self.name,
            fields: self.fields,
            parent: self.parent,
            params: self.params,
            save: self.save,
        }))
    }
}

// =============================================================================
// Objects
// =============================================================================

/// An instance of an [`ObjectType`].
///
/// Attributes are open: undeclared names can be set as plain attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    ty: ObjectType,
    args: Vec<ObjectType>,
    attrs: Record,
}

impl Object {
    pub fn object_type(&self) -> &ObjectType {
        &self.ty
    }

    pub fn type_args(&self) -> &[ObjectType] {
        &self.args
    }

    pub fn attrs(&self) -> &Record {
        &self.attrs
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(name, value);
    }

    /// Append to a list attribute, creating the list when unset.
    pub fn push(&mut self, name: &str, value: Value) -> Result<(), String> {
        match self.attrs.get_mut(name) {
            Some(Value::List(items)) => {
                items.push(value);
                Ok(())
            }
            Some(Value::Null) | None => {
                self.attrs.insert(name, Value::List(vec![value]));
                Ok(())
            }
            Some(other) => Err(format!(
                "attribute '{}' on {} is {}, not a list",
                name,
                self.ty.name(),
                other.kind_name()
            )),
        }
    }

    pub fn is_exactly(&self, ty: &ObjectType) -> bool {
        &self.ty == ty
    }

    /// Instance-of test, including bound checks for generic types.
    pub fn is_instance_of(&self, ty: &ObjectType) -> bool {
        if !self.ty.is_subtype_of(ty) {
            return false;
        }
        ty.params()
            .iter()
            .zip(self.args.iter())
            .all(|(param, arg)| match &param.bound {
                Some(bound) => arg.is_subtype_of(bound),
                None => true,
            })
    }
}

/// Shared handle to a live object.
///
/// Equality is identity.
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<Object>>);

impl ObjectRef {
    pub fn new(object: Object) -> Self {
        ObjectRef(Rc::new(RefCell::new(object)))
    }

    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Object> {
        self.0.borrow_mut()
    }

    pub fn try_borrow(&self) -> Result<Ref<'_, Object>, BorrowError> {
        self.0.try_borrow()
    }

    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, Object>, BorrowMutError> {
        self.0.try_borrow_mut()
    }

    pub fn object_type(&self) -> Option<ObjectType> {
        self.try_borrow().ok().map(|o| o.ty.clone())
    }

    pub fn type_name(&self) -> String {
        self.try_borrow()
            .map(|o| o.ty.name().to_string())
            .unwrap_or_else(|_| "<busy>".to_string())
    }

    /// Clone of an attribute value.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.borrow().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.borrow().has(name)
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.borrow_mut().set(name, value);
    }

    /// Exact type match when `strict`, instance-of otherwise.
    pub fn matches(&self, ty: &ObjectType, strict: bool) -> bool {
        self.try_borrow()
            .map(|o| if strict { o.is_exactly(ty) } else { o.is_instance_of(ty) })
            .unwrap_or(false)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.clone()).to_json()
    }

    pub(crate) fn save(&self) -> Result<(), PersistError> {
        let object = self.borrow();
        let hook = object
            .ty
            .save_hook()
            .ok_or_else(|| PersistError::Unsupported(object.ty.name().to_string()))?;
        hook(&object).map_err(|message| PersistError::Save {
            item: object.ty.name().to_string(),
            message,
        })
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_borrow() {
            Ok(object) => write!(f, "{}{}", object.ty.name(), object.attrs.to_json()),
            Err(_) => f.write_str("ObjectRef(<busy>)"),
        }
    }
}

impl From<Object> for ObjectRef {
    fn from(object: Object) -> Self {
        ObjectRef::new(object)
    }
}

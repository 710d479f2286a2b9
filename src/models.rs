// src/models.rs

use crate::{
    config::ConfigHandle,
    core::{
        class_resolver::{Invoke, InvokeCast, cast_invoke},
        factory::ObjectFactory,
    },
};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::{
    any::{Any, type_name},
    fmt,
    path::PathBuf,
    rc::Rc,
};

// --- VALUES ---

/// A dynamic value flowing between configuration, directives and constructors.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Path(PathBuf),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    /// An object built by a factory, a module or a method call.
    Object(Instance),
    /// A configuration handle, injected as `config`.
    Config(ConfigHandle),
    /// A factory handle, injected as `config_factory`.
    Factory(ObjectFactory),
}

impl Value {
    /// A short label of the variant, used in type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Path(_) => "path",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Object(_) => "object",
            Value::Config(_) => "config",
            Value::Factory(_) => "factory",
        }
    }

    /// Truthiness as used by `if` expressions of conditional nodes.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Path(p) => !p.as_os_str().is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Object(_) | Value::Config(_) | Value::Factory(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Instance> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The plain text of a scalar, as substituted by interpolation.
    /// Containers and handles have no scalar text.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Value::None => Some("None".to_string()),
            Value::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(format!("{:?}", f)),
            Value::Str(s) => Some(s.clone()),
            Value::Path(p) => Some(p.display().to_string()),
            _ => None,
        }
    }

    /// Renders the value as a Python-style literal: `{'a': [1, 'x'], 'b': None}`.
    pub fn to_literal(&self) -> String {
        let mut out = String::new();
        write_literal(self, &mut out);
        out
    }
}

fn write_literal(value: &Value, out: &mut String) {
    match value {
        Value::Str(s) => write_quoted(s, out),
        Value::Path(p) => write_quoted(&format!("path: {}", p.display()), out),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_literal(item, out);
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_quoted(key, out);
                out.push_str(": ");
                write_literal(item, out);
            }
            out.push('}');
        }
        Value::Object(inst) => {
            out.push('<');
            out.push_str(inst.type_name());
            out.push('>');
        }
        Value::Config(_) => out.push_str("<config>"),
        Value::Factory(_) => out.push_str("<factory>"),
        scalar => out.push_str(&scalar.scalar_text().unwrap_or_default()),
    }
}

fn write_quoted(s: &str, out: &mut String) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Path(p) => write!(f, "{}", p.display()),
            other => f.write_str(&other.to_literal()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Config(a), Value::Config(b)) => Rc::ptr_eq(a, b),
            (Value::Factory(a), Value::Factory(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Path(p) => serializer.serialize_str(&p.display().to_string()),
            Value::List(l) => l.serialize(serializer),
            Value::Map(m) => m.serialize(serializer),
            Value::Object(inst) => match inst.downcast_ref::<Settings>() {
                Some(settings) => settings.serialize(serializer),
                None => serializer.serialize_str(&format!("<{}>", inst.type_name())),
            },
            Value::Config(_) => serializer.serialize_str("<config>"),
            Value::Factory(_) => serializer.serialize_str("<factory>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Value::Path(p)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<Instance> for Value {
    fn from(i: Instance) -> Self {
        Value::Object(i)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map_or(Value::None, Into::into)
    }
}

// --- CONVERSIONS OUT OF VALUES ---

/// Conversion of a dynamic value into a constructor parameter type.
/// On a type mismatch the value is handed back for the error message.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, Value>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Value> {
        Ok(value)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Str(s) => Ok(s),
            Value::Path(p) => Ok(p.display().to_string()),
            other => Err(other),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(other),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Float(f) => Ok(f),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Ok(i as f64),
            other => Err(other),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(other),
        }
    }
}

impl FromValue for PathBuf {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Path(p) => Ok(p),
            Value::Str(s) => Ok(PathBuf::from(s)),
            other => Err(other),
        }
    }
}

impl FromValue for Vec<Value> {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::List(l) => Ok(l),
            other => Err(other),
        }
    }
}

impl FromValue for IndexMap<String, Value> {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Map(m) => Ok(m),
            other => Err(other),
        }
    }
}

impl FromValue for Instance {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Object(i) => Ok(i),
            other => Err(other),
        }
    }
}

impl FromValue for ConfigHandle {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Config(c) => Ok(c),
            other => Err(other),
        }
    }
}

impl FromValue for ObjectFactory {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Factory(f) => Ok(f),
            other => Err(other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::None => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

// --- INSTANCES ---

/// A shared handle to a constructed object.
///
/// Clones point to the same object; identity is compared with [`Instance::ptr_eq`].
#[derive(Clone)]
pub struct Instance {
    object: Rc<dyn Any>,
    type_name: &'static str,
    class_name: Option<Rc<str>>,
    invoker: Option<InvokeCast>,
}

impl Instance {
    /// Wraps a plain object, e.g. the result of a method call.
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            object: Rc::new(value),
            type_name: type_name::<T>(),
            class_name: None,
            invoker: None,
        }
    }

    /// Wraps an object that can be the target of `call` directives.
    pub fn invokable<T: Invoke>(value: T) -> Self {
        Self {
            invoker: Some(cast_invoke::<T>),
            ..Self::new(value)
        }
    }

    pub(crate) fn from_parts(
        object: Rc<dyn Any>,
        type_name: &'static str,
        class_name: &str,
        invoker: Option<InvokeCast>,
    ) -> Self {
        Self {
            object,
            type_name,
            class_name: Some(Rc::from(class_name)),
            invoker,
        }
    }

    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.object).downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.object.is::<T>()
    }

    pub(crate) fn as_any(&self) -> &dyn Any {
        self.object.as_ref()
    }

    /// True when both handles point to the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.object, &other.object)
    }

    /// The unqualified Rust type name of the object.
    pub fn type_name(&self) -> &'static str {
        let base = self.type_name.split('<').next().unwrap_or(self.type_name);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// The configured class name, when built from a class definition.
    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// The object's method-call surface, if its class registered one.
    pub fn as_invoke(&self) -> Option<&dyn Invoke> {
        self.invoker.and_then(|cast| cast(self.object.as_ref()))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_name())
            .field("class_name", &self.class_name)
            .field("invokable", &self.invoker.is_some())
            .finish()
    }
}

// --- SETTINGS ---

/// The generic holder built for sections without a `class_name`.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Settings {
    values: IndexMap<String, Value>,
}

impl Settings {
    pub fn new(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> IndexMap<String, Value> {
        self.values
    }
}

impl Invoke for Settings {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }
}

// --- CALL PARAMETERS ---

/// Positional arguments and keyword overrides for an instance request.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub(crate) args: Vec<Value>,
    pub(crate) kwargs: IndexMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Sets a keyword override.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

impl From<IndexMap<String, Value>> for Params {
    fn from(kwargs: IndexMap<String, Value>) -> Self {
        Self {
            args: Vec::new(),
            kwargs,
        }
    }
}

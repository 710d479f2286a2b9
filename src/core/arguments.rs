// src/core/arguments.rs

use crate::models::{FromValue, Value};
use indexmap::IndexMap;
use std::{
    any::{Any, type_name},
    rc::Rc,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArgumentError {
    #[error("'{object}' is missing required argument '{name}'")]
    Missing { object: String, name: String },

    #[error("Argument '{name}' of '{object}' expects {expected} but got {found}: {value}")]
    Type {
        object: String,
        name: String,
        expected: &'static str,
        found: &'static str,
        value: String,
    },
}

/// Keyword arguments handed to a class constructor.
///
/// Constructors take what they need; factory bookkeeping (unknown keywords,
/// positional binding, injection) has already happened when they run.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    name: String,
    values: IndexMap<String, Value>,
}

impl Arguments {
    /// `name` is the object (section) being built, used in error messages.
    pub fn new(name: impl Into<String>, values: IndexMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn peek(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Removes and returns the raw value of `key`.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Removes `key` and converts it; missing keys are an error.
    pub fn required<T: FromValue>(&mut self, key: &str) -> Result<T, ArgumentError> {
        let value = self.take(key).ok_or_else(|| ArgumentError::Missing {
            object: self.name.clone(),
            name: key.to_string(),
        })?;
        self.convert(key, value)
    }

    /// Like [`Arguments::required`], but a missing key or `None` yields `None`.
    pub fn optional<T: FromValue>(&mut self, key: &str) -> Result<Option<T>, ArgumentError> {
        match self.take(key) {
            None | Some(Value::None) => Ok(None),
            Some(value) => self.convert(key, value).map(Some),
        }
    }

    pub fn get_or<T: FromValue>(&mut self, key: &str, default: T) -> Result<T, ArgumentError> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    /// Removes `key` and downcasts the object it holds.
    pub fn object<T: Any>(&mut self, key: &str) -> Result<Rc<T>, ArgumentError> {
        let value = self.take(key).ok_or_else(|| ArgumentError::Missing {
            object: self.name.clone(),
            name: key.to_string(),
        })?;
        match &value {
            Value::Object(inst) => inst.downcast::<T>().ok_or_else(|| ArgumentError::Type {
                object: self.name.clone(),
                name: key.to_string(),
                expected: type_name::<T>(),
                found: inst.type_name(),
                value: value.to_literal(),
            }),
            other => Err(ArgumentError::Type {
                object: self.name.clone(),
                name: key.to_string(),
                expected: type_name::<T>(),
                found: other.kind(),
                value: other.to_literal(),
            }),
        }
    }

    /// Everything not taken yet.
    pub fn into_map(self) -> IndexMap<String, Value> {
        self.values
    }

    pub fn drain(&mut self) -> IndexMap<String, Value> {
        std::mem::take(&mut self.values)
    }

    fn convert<T: FromValue>(&self, key: &str, value: Value) -> Result<T, ArgumentError> {
        T::from_value(value).map_err(|value| ArgumentError::Type {
            object: self.name.clone(),
            name: key.to_string(),
            expected: type_name::<T>(),
            found: value.kind(),
            value: value.to_literal(),
        })
    }
}

// MARK: --- UNIT TESTS ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Instance;

    fn args() -> Arguments {
        let mut values = IndexMap::new();
        values.insert("count".to_string(), Value::Int(3));
        values.insert("label".to_string(), Value::from("x"));
        values.insert("nothing".to_string(), Value::None);
        values.insert("part".to_string(), Value::Object(Instance::new(7_u8)));
        Arguments::new("widget", values)
    }

    #[test]
    fn test_typed_access_consumes_keys() {
        // --- Setup ---
        let mut args = args();

        // --- Execute ---
        let count: i64 = args.required("count").unwrap();
        let label: Option<String> = args.optional("label").unwrap();
        let nothing: Option<String> = args.optional("nothing").unwrap();
        let fallback: String = args.get_or("absent", "dflt".to_string()).unwrap();
        let part = args.object::<u8>("part").unwrap();

        // --- Assert ---
        assert_eq!(count, 3);
        assert_eq!(label.as_deref(), Some("x"));
        assert_eq!(nothing, None);
        assert_eq!(fallback, "dflt");
        assert_eq!(*part, 7);
        assert!(args.is_empty());
    }

    #[test]
    fn test_errors_name_object_and_argument() {
        let mut args = args();
        let missing = args.required::<String>("engine").unwrap_err();
        assert_eq!(
            missing.to_string(),
            "'widget' is missing required argument 'engine'"
        );
        let wrong = args.required::<String>("count").unwrap_err();
        assert!(wrong.to_string().contains("expects alloc::string::String but got int: 3"));
        let not_obj = args.object::<u8>("label").unwrap_err();
        assert!(matches!(not_obj, ArgumentError::Type { found: "str", .. }));
    }
}

// src/core/directive.rs

use crate::{
    constants::{DIRECTIVE_KEYS, DIRECTIVE_PARAM, DIRECTIVE_RELOAD, DIRECTIVE_SHARE},
    core::{
        literal::{LiteralError, parse_literal},
        serializer::{coerce, coerce_nested},
    },
    models::Value,
};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::{collections::HashSet, fmt};
use thiserror::Error;

lazy_static! {
    static ref DIRECTIVE_RE: Regex =
        Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)(?:\((.*)\))?:\s*(.+)$").unwrap();
}

#[derive(Error, Debug)]
pub enum DirectiveParseError {
    #[error("Malformed parameters of directive '{directive}': {source}")]
    Literal {
        directive: String,
        #[source]
        source: LiteralError,
    },

    #[error("Bad value in the 'param' of directive '{directive}': {source}")]
    Coerce {
        directive: String,
        #[source]
        source: LiteralError,
    },

    #[error("Parameters of directive '{directive}' must be a mapping but got {found}")]
    NotAMapping {
        directive: String,
        found: &'static str,
    },

    #[error("Unknown directive parameter(s) of '{directive}': {}", .keys.join(", "))]
    UnknownKeys { directive: String, keys: Vec<String> },

    #[error("Directive parameter '{key}' of '{directive}' expects {expected} but got {found}")]
    InvalidValue {
        directive: String,
        key: &'static str,
        expected: &'static str,
        found: String,
    },
}

/// How a referenced instance interacts with the shared cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Share {
    /// Reuse and populate the cache.
    #[default]
    Default,
    /// Build a fresh instance without touching the cache.
    Evict,
    /// Build a fresh instance and fresh dependencies throughout.
    Deep,
}

impl Share {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Share::Default),
            "evict" => Some(Share::Evict),
            "deep" => Some(Share::Deep),
            _ => None,
        }
    }
}

/// A parsed `name(params): reference` configuration value.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// The module that resolves this directive.
    pub name: String,
    /// The parenthesized mapping: `param`, `reload` and `share`.
    pub params: IndexMap<String, Value>,
    /// The text after the colon, e.g. a section name.
    pub reference: String,
}

impl Directive {
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: IndexMap::new(),
            reference: reference.into(),
        }
    }

    pub fn with_params(mut self, params: IndexMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// The `param` mapping: constructor overrides or call arguments. Its
    /// strings are already coerced, so `'7'` arrives as `7`.
    pub fn param(&self) -> IndexMap<String, Value> {
        match self.params.get(DIRECTIVE_PARAM) {
            Some(Value::Map(m)) => m.clone(),
            _ => IndexMap::new(),
        }
    }

    pub fn reload(&self) -> bool {
        matches!(self.params.get(DIRECTIVE_RELOAD), Some(Value::Bool(true)))
    }

    pub fn share(&self) -> Share {
        self.params
            .get(DIRECTIVE_SHARE)
            .and_then(Value::as_str)
            .and_then(Share::parse)
            .unwrap_or_default()
    }
}

/// Prefixes strings that would coerce to something else with `str:`, so a
/// rendered `param` parses back to the same values.
fn keep_strings(value: Value) -> Value {
    match value {
        Value::Str(s) => match coerce(&s) {
            Ok(Value::Str(ref same)) if *same == s => Value::Str(s),
            _ => Value::Str(format!("str: {}", s)),
        },
        Value::List(items) => Value::List(items.into_iter().map(keep_strings).collect()),
        Value::Map(map) => Value::Map(map.into_iter().map(|(k, v)| (k, keep_strings(v))).collect()),
        other => other,
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}: {}", self.name, self.reference)
        } else {
            let mut params = self.params.clone();
            if let Some(param) = params.get_mut(DIRECTIVE_PARAM) {
                *param = keep_strings(std::mem::take(param));
            }
            let params = Value::Map(params);
            write!(f, "{}({}): {}", self.name, params.to_literal(), self.reference)
        }
    }
}

/// Recognizes directives for a fixed set of module names.
#[derive(Debug, Clone, Default)]
pub struct DirectiveParser {
    names: HashSet<String>,
}

impl DirectiveParser {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_directive_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Parses `value` as a directive.
    ///
    /// Returns `Ok(None)` when the leading identifier is not a known module
    /// name, so ordinary values like `http://host` are left to coercion.
    pub fn parse(&self, value: &str) -> Result<Option<Directive>, DirectiveParseError> {
        let Some(caps) = DIRECTIVE_RE.captures(value.trim()) else {
            return Ok(None);
        };
        let name = caps.get(1).map_or("", |m| m.as_str());
        if !self.is_directive_name(name) {
            return Ok(None);
        }
        let reference = caps.get(3).map_or("", |m| m.as_str()).trim().to_string();
        let params = match caps.get(2) {
            Some(m) => parse_params(name, m.as_str())?,
            None => IndexMap::new(),
        };
        log::trace!("parsed directive {}: {}", name, reference);
        Ok(Some(Directive {
            name: name.to_string(),
            params,
            reference,
        }))
    }
}

fn parse_params(directive: &str, source: &str) -> Result<IndexMap<String, Value>, DirectiveParseError> {
    let value = parse_literal(source.trim()).map_err(|source| DirectiveParseError::Literal {
        directive: directive.to_string(),
        source,
    })?;
    let mut params = match value {
        Value::Map(params) => params,
        other => {
            return Err(DirectiveParseError::NotAMapping {
                directive: directive.to_string(),
                found: other.kind(),
            });
        }
    };

    let unknown: Vec<String> = params
        .keys()
        .filter(|k| !DIRECTIVE_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(DirectiveParseError::UnknownKeys {
            directive: directive.to_string(),
            keys: unknown,
        });
    }

    let invalid = |key: &'static str, expected: &'static str, found: &Value| {
        DirectiveParseError::InvalidValue {
            directive: directive.to_string(),
            key,
            expected,
            found: found.to_literal(),
        }
    };
    if let Some(v) = params.get_mut(DIRECTIVE_PARAM) {
        if !matches!(v, Value::Map(_)) {
            return Err(invalid(DIRECTIVE_PARAM, "a mapping", v));
        }
        *v = coerce_nested(std::mem::take(v)).map_err(|source| DirectiveParseError::Coerce {
            directive: directive.to_string(),
            source,
        })?;
    }
    if let Some(v) = params.get(DIRECTIVE_RELOAD) {
        if !matches!(v, Value::Bool(_)) {
            return Err(invalid(DIRECTIVE_RELOAD, "True or False", v));
        }
    }
    if let Some(v) = params.get(DIRECTIVE_SHARE) {
        if v.as_str().and_then(Share::parse).is_none() {
            return Err(invalid(DIRECTIVE_SHARE, "'default', 'evict' or 'deep'", v));
        }
    }
    Ok(params)
}

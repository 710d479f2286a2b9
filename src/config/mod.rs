// src/config/mod.rs

//! Configuration sources read by the object factory.

pub mod condition;
pub mod dictionary;
pub mod interpolator;
pub mod loader;

pub use condition::{ConditionalConfig, ConditionalConfigError};
pub use dictionary::DictionaryConfig;

use crate::{
    core::{literal::LiteralError, serializer::coerce},
    models::{Settings, Value},
};
use indexmap::IndexMap;
use std::{fmt, path::Path, rc::Rc};
use thiserror::Error;

/// The ordered options of one section.
pub type Options = IndexMap<String, Value>;

/// A shared, read-only configuration.
pub type ConfigHandle = Rc<dyn Configurable>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No section: '{section}'")]
    NoSection { section: String },

    #[error("Entry '{section}' is not a section (found {found})")]
    NotASection {
        section: String,
        found: &'static str,
    },

    #[error("No option '{option}' in section '{section}'")]
    NoOption { section: String, option: String },

    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse JSON in '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse TOML in '{path}': {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to parse INI in '{path}' at line {line}: {message}")]
    Ini {
        path: String,
        line: usize,
        message: String,
    },

    #[error("The top level of '{path}' must be a mapping, found {found}")]
    NotAMapping { path: String, found: &'static str },

    #[error("Unsupported configuration format for '{path}'")]
    UnsupportedFormat { path: String },

    #[error("Invalid option string entry: '{entry}'")]
    OptionString { entry: String },

    #[error("Cannot interpolate '${{{expression}}}' in section '{section}': {reason}")]
    Interpolation {
        expression: String,
        section: String,
        reason: String,
    },

    #[error(
        "Maximum recursion depth ({depth}) exceeded while interpolating '${{{expression}}}'. Check for indirect cycles."
    )]
    MaxRecursionDepth { depth: usize, expression: String },

    #[error("Circular interpolation reference detected: {cycle_path}")]
    CircularReference { cycle_path: String },

    #[error("Invalid value for option '{option}' in section '{section}': {source}")]
    Literal {
        section: String,
        option: String,
        #[source]
        source: LiteralError,
    },

    #[error(transparent)]
    Condition(#[from] ConditionalConfigError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// A hierarchical, read-only source of sections and options.
pub trait Configurable: fmt::Debug {
    /// Top-level section names, in source order.
    fn sections(&self) -> Vec<String>;

    fn has_section(&self, section: &str) -> bool {
        self.sections().iter().any(|s| s == section)
    }

    /// The raw options of `section`; strings are not coerced.
    fn get_options(&self, section: &str) -> ConfigResult<Options>;

    fn get_option(&self, option: &str, section: &str) -> ConfigResult<Value> {
        self.get_options(section)?
            .shift_remove(option)
            .ok_or_else(|| ConfigError::NoOption {
                section: section.to_string(),
                option: option.to_string(),
            })
    }

    /// The sub-tree at a dotted `path`, or `None` when there is none.
    fn get_tree(&self, path: &str) -> ConfigResult<Option<Value>> {
        match self.get_options(path) {
            Ok(options) => Ok(Some(Value::Map(options))),
            Err(ConfigError::NoSection { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The options of `section` with every string coerced to a typed value.
    fn populate(&self, section: &str) -> ConfigResult<Settings> {
        let mut settings = Settings::default();
        for (option, value) in self.get_options(section)? {
            let value = match value {
                Value::Str(raw) => coerce(&raw).map_err(|source| ConfigError::Literal {
                    section: section.to_string(),
                    option: option.clone(),
                    source,
                })?,
                other => other,
            };
            settings.insert(option, value);
        }
        Ok(settings)
    }

    /// The file this configuration was read from, if any.
    fn config_file(&self) -> Option<&Path> {
        None
    }

    /// Drops derived views so the next read recomputes them.
    fn invalidate(&self) {}
}

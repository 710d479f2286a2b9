// src/config/loader.rs

//! Readers that turn INI, YAML, JSON, TOML and option strings into
//! [`DictionaryConfig`]s. Every reader expands `${...}` references.

use crate::{
    config::{ConfigError, ConfigResult, DictionaryConfig, interpolator::interpolate},
    constants::DEFAULT_SECTION,
    models::Value,
};
use indexmap::IndexMap;
use ini::{Ini, ParseOption};
use lazy_static::lazy_static;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
};

lazy_static! {
    static ref OPTION_ENTRY_RE: Regex = Regex::new(r"(?s)^(?:([^.=]+?)\.)?([^=]+?)=(.*)$").unwrap();
}

const STRING_ORIGIN: &str = "<string>";
const INI_DEFAULTS: &str = "DEFAULT";

/// Stands in for the line breaks of a folded multi-line INI value.
const CONTINUATION: char = '\u{1f}';

/// Reads a configuration file, choosing the format by extension.
pub fn load_path(path: impl AsRef<Path>) -> ConfigResult<DictionaryConfig> {
    let raw = path.as_ref().to_string_lossy();
    let path = PathBuf::from(shellexpand::tilde(&raw).as_ref());
    let origin = path.display().to_string();
    log::debug!("loading configuration from {}", origin);

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: origin.clone(),
        source,
    })?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let root = match extension.as_str() {
        "ini" | "conf" | "cfg" => parse_ini(&content, &origin)?,
        "yml" | "yaml" => parse_yaml(&content, &origin)?,
        "json" => parse_json(&content, &origin)?,
        "toml" => parse_toml(&content, &origin)?,
        _ => return Err(ConfigError::UnsupportedFormat { path: origin }),
    };
    Ok(DictionaryConfig::new(interpolate(root)?).with_config_file(path))
}

pub fn from_ini_str(content: &str) -> ConfigResult<DictionaryConfig> {
    Ok(DictionaryConfig::new(interpolate(parse_ini(content, STRING_ORIGIN)?)?))
}

pub fn from_yaml_str(content: &str) -> ConfigResult<DictionaryConfig> {
    Ok(DictionaryConfig::new(interpolate(parse_yaml(content, STRING_ORIGIN)?)?))
}

pub fn from_json_str(content: &str) -> ConfigResult<DictionaryConfig> {
    Ok(DictionaryConfig::new(interpolate(parse_json(content, STRING_ORIGIN)?)?))
}

pub fn from_toml_str(content: &str) -> ConfigResult<DictionaryConfig> {
    Ok(DictionaryConfig::new(interpolate(parse_toml(content, STRING_ORIGIN)?)?))
}

/// Parses `section.option=value` entries separated by commas, e.g.
/// `app.level=3,app.name=demo,debug=True`. Entries without a section go to
/// `default_section`.
pub fn from_option_string(options: &str, default_section: Option<&str>) -> ConfigResult<DictionaryConfig> {
    let default_section = default_section.unwrap_or(DEFAULT_SECTION);
    let mut config = DictionaryConfig::default();
    for entry in options.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let caps = OPTION_ENTRY_RE
            .captures(entry)
            .ok_or_else(|| ConfigError::OptionString {
                entry: entry.to_string(),
            })?;
        let section = caps.get(1).map_or(default_section, |m| m.as_str().trim());
        let option = caps.get(2).map_or("", |m| m.as_str().trim());
        let value = caps.get(3).map_or("", |m| m.as_str().trim());
        config.set_option(section, option, value);
    }
    let root = interpolate(config.into_root())?;
    Ok(DictionaryConfig::new(root))
}

// --- FORMAT PARSERS ---

/// Joins indented continuation lines onto their option with [`CONTINUATION`],
/// which [`Ini`] does not support itself. Replaced lines stay as blank lines
/// so parse errors keep their line numbers. Comment lines are blanked too.
fn fold_continuations(content: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut option_line: Option<usize> = None;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            lines.push(String::new());
            continue;
        }
        if trimmed.is_empty() {
            option_line = None;
            lines.push(String::new());
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let Some(target) = option_line.and_then(|i| lines.get_mut(i)) {
                target.push(CONTINUATION);
                target.push_str(trimmed);
                lines.push(String::new());
                continue;
            }
        }
        option_line = (!trimmed.starts_with('[')).then_some(lines.len());
        lines.push(trimmed.to_string());
    }
    lines.join("\n")
}

/// The 1-based number of the first line of `content` that starts with `text`.
fn line_of(content: &str, text: &str) -> usize {
    content
        .lines()
        .position(|line| line.trim().starts_with(text))
        .map_or(0, |i| i + 1)
}

fn parse_ini(content: &str, origin: &str) -> ConfigResult<IndexMap<String, Value>> {
    let ini_error = |line: usize, message: String| ConfigError::Ini {
        path: origin.to_string(),
        line,
        message,
    };
    let options = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(&fold_continuations(content), options)
        .map_err(|e| ini_error(e.line, e.msg.to_string()))?;

    let mut sections: IndexMap<String, IndexMap<String, String>> = IndexMap::new();
    for (name, properties) in &ini {
        let first_line = |key: &str| key.lines().next().unwrap_or_default().trim().to_string();
        let Some(name) = name else {
            if let Some((key, _)) = properties.iter().next() {
                let key = first_line(key);
                return Err(ini_error(line_of(content, &key), "option outside of a section".to_string()));
            }
            continue;
        };
        // A line without a separator runs into the next key.
        if let Some((key, _)) = properties.iter().find(|(key, _)| key.contains('\n')) {
            let stray = first_line(key);
            return Err(ini_error(
                line_of(content, &stray),
                format!("expected a section header or an option, found '{}'", stray),
            ));
        }
        let section = sections.entry(name.to_string()).or_default();
        for (key, value) in properties.iter() {
            let value = value.replace(CONTINUATION, "\n");
            section.insert(key.to_string(), value.trim().to_string());
        }
    }

    let defaults = sections.shift_remove(INI_DEFAULTS).unwrap_or_default();
    Ok(sections
        .into_iter()
        .map(|(name, options)| {
            let mut merged: IndexMap<String, Value> = defaults
                .iter()
                .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
                .collect();
            merged.extend(options.into_iter().map(|(k, v)| (k, Value::Str(v))));
            (name, Value::Map(merged))
        })
        .collect())
}

fn top_level(value: Value, origin: &str) -> ConfigResult<IndexMap<String, Value>> {
    match value {
        Value::Map(map) => Ok(map),
        Value::None => Ok(IndexMap::new()),
        other => Err(ConfigError::NotAMapping {
            path: origin.to_string(),
            found: other.kind(),
        }),
    }
}

fn parse_yaml(content: &str, origin: &str) -> ConfigResult<IndexMap<String, Value>> {
    if content.trim().is_empty() {
        return Ok(IndexMap::new());
    }
    let doc: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: origin.to_string(),
            source,
        })?;
    top_level(from_yaml(doc), origin)
}

fn parse_json(content: &str, origin: &str) -> ConfigResult<IndexMap<String, Value>> {
    let doc: serde_json::Value =
        serde_json::from_str(content).map_err(|source| ConfigError::Json {
            path: origin.to_string(),
            source,
        })?;
    top_level(from_json(doc), origin)
}

fn parse_toml(content: &str, origin: &str) -> ConfigResult<IndexMap<String, Value>> {
    let table: toml::Table = toml::from_str(content).map_err(|source| ConfigError::Toml {
        path: origin.to_string(),
        source,
    })?;
    top_level(from_toml(toml::Value::Table(table)), origin)
}

fn from_yaml(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::None,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map_or_else(|| Value::Str(n.to_string()), Value::Float),
        },
        serde_yaml::Value::String(s) => Value::Str(s),
        serde_yaml::Value::Sequence(items) => Value::List(items.into_iter().map(from_yaml).collect()),
        serde_yaml::Value::Mapping(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| {
                    let key = match from_yaml(k) {
                        Value::Str(s) => s,
                        other => other.scalar_text().unwrap_or_else(|| other.to_literal()),
                    };
                    (key, from_yaml(v))
                })
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => from_yaml(tagged.value),
    }
}

pub(crate) fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map_or_else(|| Value::Str(n.to_string()), Value::Float),
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            Value::Map(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

fn from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::Str(s),
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(d) => Value::Str(d.to_string()),
        toml::Value::Array(items) => Value::List(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(table) => {
            Value::Map(table.into_iter().map(|(k, v)| (k, from_toml(v))).collect())
        }
    }
}

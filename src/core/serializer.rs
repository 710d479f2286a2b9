// src/core/serializer.rs

//! Coercion of raw configuration strings into typed values.

use crate::{
    config::loader::from_json,
    core::literal::{LiteralError, LiteralResult, parse_literal},
    models::Value,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::PathBuf;

lazy_static! {
    static ref FLOAT_RE: Regex = Regex::new(r"^[-+]?\d*\.\d+$").unwrap();
    static ref SCI_FLOAT_RE: Regex = Regex::new(r"^[-+]?(?:\d+\.?\d*|\.\d+)[eE][-+]?\d+$").unwrap();
    static ref INT_RE: Regex = Regex::new(r"^[-+]?[0-9]+$").unwrap();
    static ref BOOL_RE: Regex = Regex::new(r"^(?:True|False)$").unwrap();
    static ref PATH_RE: Regex = Regex::new(r"^path:\s*(.+)$").unwrap();
    static ref STR_RE: Regex = Regex::new(r"(?s)^str:\s*(.+)$").unwrap();
    static ref LIST_RE: Regex = Regex::new(r"(?s)^(?:list|set|tuple)(?:\((.+)\))?:\s*(.*)$").unwrap();
    static ref EVAL_RE: Regex = Regex::new(r"(?s)^(?:eval|dict)(?:\((.+)\))?:\s*(.+)$").unwrap();
    static ref JSON_RE: Regex = Regex::new(r"(?s)^json:\s*(.+)$").unwrap();
}

/// Keys accepted by the `list(...)` / `set(...)` / `tuple(...)` parameters.
const LIST_KEYS: &[&str] = &["type"];

/// Keys accepted by the `eval(...)` / `dict(...)` parameters.
const EVAL_KEYS: &[&str] = &["import", "resolve"];

/// Coerces a raw string, trying each rule in priority order:
///
/// 1. `None`
/// 2. decimal floats, then scientific floats
/// 3. integers
/// 4. `True` / `False`
/// 5. `str:` (the rest, leading blanks removed), `path:` (home-expanded path)
/// 6. `list:` / `set:` / `tuple:` (comma separated strings); with a
///    `({'type': 'int'})` parameter every element is converted
/// 7. `eval:` / `dict:` (restricted literal)
/// 8. `json:` (a JSON document)
///
/// Anything else is returned as a string, as are `json:` and typed sequences
/// that do not decode. Only the `eval:` / `dict:` forms can fail.
pub fn coerce(raw: &str) -> LiteralResult<Value> {
    if raw == "None" {
        return Ok(Value::None);
    }
    if FLOAT_RE.is_match(raw) || SCI_FLOAT_RE.is_match(raw) {
        if let Ok(f) = raw.parse::<f64>() {
            return Ok(Value::Float(f));
        }
    }
    if INT_RE.is_match(raw) {
        // Out of range integers stay strings.
        if let Ok(i) = raw.parse::<i64>() {
            return Ok(Value::Int(i));
        }
        return Ok(Value::Str(raw.to_string()));
    }
    if BOOL_RE.is_match(raw) {
        return Ok(Value::Bool(raw == "True"));
    }
    if let Some(caps) = STR_RE.captures(raw) {
        return Ok(Value::Str(caps.get(1).map_or("", |m| m.as_str()).to_string()));
    }
    if let Some(caps) = PATH_RE.captures(raw) {
        let path = caps.get(1).map_or("", |m| m.as_str()).trim();
        return Ok(Value::Path(expand_path(path)));
    }
    if let Some(caps) = LIST_RE.captures(raw) {
        let body = caps.get(2).map_or("", |m| m.as_str()).trim();
        let items = match caps.get(1) {
            Some(m) => typed_items(m.as_str(), body),
            None => Ok(plain_items(body)),
        };
        return Ok(items.map_or_else(
            |e| {
                log::debug!("keeping '{}' as a string: {}", raw, e);
                Value::Str(raw.to_string())
            },
            Value::List,
        ));
    }
    if let Some(caps) = EVAL_RE.captures(raw) {
        if let Some(m) = caps.get(1) {
            check_eval_params(m.as_str())?;
        }
        let expr = caps.get(2).map_or("", |m| m.as_str());
        log::trace!("evaluating literal: {}", expr);
        return parse_literal(expr.trim());
    }
    if let Some(caps) = JSON_RE.captures(raw) {
        let doc = caps.get(1).map_or("", |m| m.as_str());
        return Ok(match serde_json::from_str(doc) {
            Ok(json) => from_json(json),
            Err(e) => {
                log::debug!("keeping '{}' as a string: invalid JSON: {}", raw, e);
                Value::Str(raw.to_string())
            }
        });
    }
    Ok(Value::Str(raw.to_string()))
}

fn split_items(body: &str) -> Vec<&str> {
    if body.is_empty() {
        return Vec::new();
    }
    body.split(',').map(str::trim).collect()
}

fn plain_items(body: &str) -> Vec<Value> {
    split_items(body)
        .into_iter()
        .map(|item| Value::Str(item.to_string()))
        .collect()
}

/// Splits `body` and converts every element to the type named in `params`.
fn typed_items(params: &str, body: &str) -> LiteralResult<Vec<Value>> {
    match list_type(params)? {
        None => Ok(plain_items(body)),
        Some(tpe) => split_items(body)
            .into_iter()
            .map(|item| convert_item(item, &tpe))
            .collect(),
    }
}

/// Parses a parameter mapping and rejects keys outside `allowed`.
fn prefix_params(source: &str, allowed: &[&str]) -> LiteralResult<indexmap::IndexMap<String, Value>> {
    let params = match parse_literal(source.trim())? {
        Value::Map(params) => params,
        other => {
            return Err(LiteralError::whole(
                source,
                format!("parameters must be a mapping but got {}", other.kind()),
            ));
        }
    };
    let unknown: Vec<&str> = params
        .keys()
        .map(String::as_str)
        .filter(|k| !allowed.contains(k))
        .collect();
    if !unknown.is_empty() {
        return Err(LiteralError::whole(
            source,
            format!("unknown parameter(s): {}", unknown.join(", ")),
        ));
    }
    Ok(params)
}

/// The element type named by a sequence prefix's parameters.
fn list_type(source: &str) -> LiteralResult<Option<String>> {
    match prefix_params(source, LIST_KEYS)?.shift_remove("type") {
        None => Ok(None),
        Some(Value::Str(tpe)) => Ok(Some(tpe)),
        Some(other) => Err(LiteralError::whole(
            source,
            format!("'type' must be a type name but got {}", other.kind()),
        )),
    }
}

/// Converts one sequence element to `tpe`; `object` applies [`coerce`].
fn convert_item(item: &str, tpe: &str) -> LiteralResult<Value> {
    let mismatch = || LiteralError::whole(item, format!("not a valid {}", tpe));
    match tpe {
        "str" => Ok(Value::Str(item.to_string())),
        "object" => coerce(item),
        "int" => item.parse::<i64>().map(Value::Int).map_err(|_| mismatch()),
        "float" => item
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float)
            .ok_or_else(mismatch),
        "bool" => match item {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        other => Err(LiteralError::whole(
            item,
            format!("unknown element type '{}'", other),
        )),
    }
}

/// Validates `eval(...)` parameters. Imports and name bindings have nothing to
/// act on in a literal, so they are accepted and ignored.
fn check_eval_params(source: &str) -> LiteralResult<()> {
    let params = prefix_params(source, EVAL_KEYS)?;
    if !params.is_empty() {
        log::debug!(
            "ignoring evaluation parameters: {}",
            params.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

/// Expands `~` and environment variables, keeping the text as is when expansion fails.
fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            log::debug!("could not expand path '{}': {}", raw, e);
            PathBuf::from(shellexpand::tilde(raw).as_ref())
        }
    }
}

/// Applies [`coerce`] to every string nested in `value`, leaving other values untouched.
pub fn coerce_nested(value: Value) -> LiteralResult<Value> {
    match value {
        Value::Str(s) => coerce(&s),
        Value::List(items) => items
            .into_iter()
            .map(coerce_nested)
            .collect::<LiteralResult<Vec<_>>>()
            .map(Value::List),
        Value::Map(map) => map
            .into_iter()
            .map(|(k, v)| coerce_nested(v).map(|v| (k, v)))
            .collect::<LiteralResult<_>>()
            .map(Value::Map),
        other => Ok(other),
    }
}

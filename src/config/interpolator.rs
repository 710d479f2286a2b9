// src/config/interpolator.rs

use crate::{
    config::{ConfigError, ConfigResult, dictionary::lookup_path},
    constants::MAX_RECURSION_DEPTH,
    models::Value,
};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"\$(?:\$|\{([^}]+)\})").unwrap();
}

/// Expands every `${...}` reference in a freshly loaded configuration tree.
pub fn interpolate(root: IndexMap<String, Value>) -> ConfigResult<IndexMap<String, Value>> {
    let mut expanded = IndexMap::with_capacity(root.len());
    for (key, value) in &root {
        let value = expand_value(&root, key, value)?;
        expanded.insert(key.clone(), value);
    }
    Ok(expanded)
}

fn expand_value(root: &IndexMap<String, Value>, section: &str, value: &Value) -> ConfigResult<Value> {
    Ok(match value {
        Value::Str(s) => Value::Str(Interpolator::new(root).expand_string(s, section)?),
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| expand_value(root, section, item))
                .collect::<ConfigResult<_>>()?,
        ),
        Value::Map(map) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (key, item) in map {
                // Options of a nested section resolve relative to that section.
                let child = if matches!(item, Value::Map(_)) {
                    format!("{}.{}", section, key)
                } else {
                    section.to_string()
                };
                out.insert(key.clone(), expand_value(root, &child, item)?);
            }
            Value::Map(out)
        }
        other => other.clone(),
    })
}

/// Expands `${section:option}`, `${option}` and `${dotted.path}` references.
///
/// `${option}` looks in the current section first and then treats the text
/// as a path from the root. `$$` produces a literal dollar.
#[derive(Debug, Clone)]
pub struct Interpolator<'a> {
    root: &'a IndexMap<String, Value>,
    // For direct cycle detection (a -> b -> a)
    recursion_stack: Vec<String>,
    // For runaway recursion protection (a -> b -> c -> ...)
    recursion_depth: usize,
}

impl<'a> Interpolator<'a> {
    pub fn new(root: &'a IndexMap<String, Value>) -> Self {
        Self {
            root,
            recursion_stack: Vec::new(),
            recursion_depth: 0,
        }
    }

    /// Creates a new interpolator for a deeper recursion level.
    fn new_for_recursion(&self, key: String) -> Self {
        let mut recursion_stack = self.recursion_stack.clone();
        recursion_stack.push(key);
        Self {
            root: self.root,
            recursion_stack,
            recursion_depth: self.recursion_depth + 1,
        }
    }

    /// Expands all references in `template`, read in the context of `section`.
    pub fn expand_string(&self, template: &str, section: &str) -> ConfigResult<String> {
        if !template.contains('$') {
            return Ok(template.to_string());
        }
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in TOKEN_RE.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(template.get(last..whole.start()).unwrap_or_default());
            match caps.get(1) {
                Some(expr) => out.push_str(&self.expand_token(expr.as_str().trim(), section)?),
                None => out.push('$'),
            }
            last = whole.end();
        }
        out.push_str(template.get(last..).unwrap_or_default());
        Ok(out)
    }

    fn expand_token(&self, expression: &str, section: &str) -> ConfigResult<String> {
        if self.recursion_depth >= MAX_RECURSION_DEPTH {
            return Err(ConfigError::MaxRecursionDepth {
                depth: MAX_RECURSION_DEPTH,
                expression: expression.to_string(),
            });
        }

        let (target_section, key, value) = self.find(expression, section).ok_or_else(|| {
            ConfigError::Interpolation {
                expression: expression.to_string(),
                section: section.to_string(),
                reason: "no such option".to_string(),
            }
        })?;

        if self.recursion_stack.contains(&key) {
            let mut cycle: Vec<&str> = self.recursion_stack.iter().map(String::as_str).collect();
            cycle.push(&key);
            return Err(ConfigError::CircularReference {
                cycle_path: cycle.join(" -> "),
            });
        }

        match value {
            Value::Str(s) => self
                .new_for_recursion(key)
                .expand_string(s, &target_section),
            other => other.scalar_text().ok_or_else(|| ConfigError::Interpolation {
                expression: expression.to_string(),
                section: section.to_string(),
                reason: format!("refers to a {}, not a scalar", other.kind()),
            }),
        }
    }

    /// Returns the section the value lives in, a canonical key for cycle
    /// detection, and the value.
    fn find(&self, expression: &str, section: &str) -> Option<(String, String, &'a Value)> {
        if let Some((sec, option)) = expression.split_once(':') {
            let value = lookup_path(self.root, sec)?.as_map()?.get(option)?;
            return Some((sec.to_string(), format!("{}:{}", sec, option), value));
        }
        if let Some(value) = lookup_path(self.root, section)
            .and_then(Value::as_map)
            .and_then(|options| options.get(expression))
        {
            return Some((section.to_string(), format!("{}:{}", section, expression), value));
        }
        let value = lookup_path(self.root, expression)?;
        let parent = expression.rsplit_once('.').map_or("", |(p, _)| p);
        Some((parent.to_string(), expression.to_string(), value))
    }
}

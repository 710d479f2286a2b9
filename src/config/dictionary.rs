// src/config/dictionary.rs

use crate::{
    config::{ConfigError, ConfigResult, Configurable, Options},
    models::Value,
};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// An in-memory configuration tree.
///
/// Top-level mapping entries are sections. Nested sections are addressed
/// with dotted paths (`data.person`); a top-level key containing dots wins
/// over a nested path of the same spelling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DictionaryConfig {
    root: IndexMap<String, Value>,
    config_file: Option<PathBuf>,
}

impl DictionaryConfig {
    pub fn new(root: IndexMap<String, Value>) -> Self {
        Self {
            root,
            config_file: None,
        }
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Copies every section of another configuration.
    pub fn from_config(config: &dyn Configurable) -> ConfigResult<Self> {
        let mut root = IndexMap::new();
        for section in config.sections() {
            let options = config.get_options(&section)?;
            root.insert(section, Value::Map(options));
        }
        Ok(Self {
            root,
            config_file: config.config_file().map(Path::to_path_buf),
        })
    }

    pub fn root(&self) -> &IndexMap<String, Value> {
        &self.root
    }

    pub fn into_root(self) -> IndexMap<String, Value> {
        self.root
    }

    /// Value at a dotted path.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.root, path)
    }

    /// Sets an option of a top-level section, creating the section when needed.
    pub fn set_option(&mut self, section: &str, option: &str, value: impl Into<Value>) {
        let entry = self
            .root
            .entry(section.to_string())
            .or_insert_with(|| Value::Map(IndexMap::new()));
        if !matches!(entry, Value::Map(_)) {
            *entry = Value::Map(IndexMap::new());
        }
        if let Value::Map(options) = entry {
            options.insert(option.to_string(), value.into());
        }
    }

    /// Deep-merges `other` into this configuration; `other` wins on conflicts.
    pub fn merge(&mut self, other: DictionaryConfig) {
        merge_maps(&mut self.root, other.root);
        if self.config_file.is_none() {
            self.config_file = other.config_file;
        }
    }
}

pub(crate) fn lookup_path<'a>(root: &'a IndexMap<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = root.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut node = root.get(parts.next()?)?;
    for part in parts {
        node = node.as_map()?.get(part)?;
    }
    Some(node)
}

fn merge_maps(target: &mut IndexMap<String, Value>, source: IndexMap<String, Value>) {
    for (key, value) in source {
        let incoming = match value {
            Value::Map(incoming) => incoming,
            scalar => {
                target.insert(key, scalar);
                continue;
            }
        };
        if let Some(Value::Map(existing)) = target.get_mut(&key) {
            merge_maps(existing, incoming);
            continue;
        }
        target.insert(key, Value::Map(incoming));
    }
}

pub(crate) fn options_at(root: &IndexMap<String, Value>, section: &str) -> ConfigResult<Options> {
    match lookup_path(root, section) {
        Some(Value::Map(options)) => Ok(options.clone()),
        Some(other) => Err(ConfigError::NotASection {
            section: section.to_string(),
            found: other.kind(),
        }),
        None => Err(ConfigError::NoSection {
            section: section.to_string(),
        }),
    }
}

impl Configurable for DictionaryConfig {
    fn sections(&self) -> Vec<String> {
        self.root
            .iter()
            .filter(|(_, v)| matches!(v, Value::Map(_)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn has_section(&self, section: &str) -> bool {
        matches!(self.lookup(section), Some(Value::Map(_)))
    }

    fn get_options(&self, section: &str) -> ConfigResult<Options> {
        options_at(&self.root, section)
    }

    fn get_tree(&self, path: &str) -> ConfigResult<Option<Value>> {
        Ok(self.lookup(path).cloned())
    }

    fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }
}

// MARK: --- UNIT TESTS ---
#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DictionaryConfig {
        let mut config = DictionaryConfig::default();
        config.set_option("car", "class_name", "Car");
        config.set_option("car", "engine", "instance: engine");
        config.set_option("engine", "hp", "300");
        let mut person = IndexMap::new();
        person.insert("name".to_string(), Value::from("Paul"));
        person.insert("age".to_string(), Value::Int(23));
        let mut data = IndexMap::new();
        data.insert("person".to_string(), Value::Map(person));
        config.root.insert("data".to_string(), Value::Map(data));
        config.root.insert("version".to_string(), Value::from("1.0"));
        config
    }

    #[test]
    fn test_sections_and_options() {
        // --- Setup ---
        let config = sample();

        // --- Assert ---
        assert_eq!(config.sections(), vec!["car", "engine", "data"]);
        let options = config.get_options("car").unwrap();
        assert_eq!(options.keys().collect::<Vec<_>>(), vec!["class_name", "engine"]);
        assert_eq!(config.get_option("hp", "engine").unwrap(), Value::from("300"));
        assert!(matches!(
            config.get_option("torque", "engine"),
            Err(ConfigError::NoOption { .. })
        ));
    }

    #[test]
    fn test_dotted_paths_reach_nested_sections() {
        let config = sample();
        assert!(config.has_section("data.person"));
        assert_eq!(
            config.get_option("age", "data.person").unwrap(),
            Value::Int(23)
        );
        assert!(matches!(
            config.get_options("data.person.name"),
            Err(ConfigError::NotASection { found: "str", .. })
        ));
        assert!(matches!(
            config.get_options("data.robot"),
            Err(ConfigError::NoSection { .. })
        ));
        assert_eq!(config.get_tree("data.robot").unwrap(), None);
        assert!(config.get_tree("data").unwrap().unwrap().as_map().is_some());
    }

    #[test]
    fn test_populate_coerces_strings() {
        let settings = sample().populate("engine").unwrap();
        assert_eq!(settings.get("hp"), Some(&Value::Int(300)));
    }

    #[test]
    fn test_merge_is_deep_and_copy_is_equal() {
        // --- Setup ---
        let mut config = sample();
        let mut other = DictionaryConfig::default();
        other.set_option("engine", "hp", "420");
        other.set_option("engine", "cylinders", "8");

        // --- Execute ---
        let copy = DictionaryConfig::from_config(&config).unwrap();
        config.merge(other);

        // --- Assert ---
        let engine = config.get_options("engine").unwrap();
        assert_eq!(engine.get("hp"), Some(&Value::from("420")));
        assert_eq!(engine.get("cylinders"), Some(&Value::from("8")));
        assert_eq!(copy.get_options("car").unwrap(), sample().get_options("car").unwrap());
        assert!(copy.lookup("version").is_none());
    }
}

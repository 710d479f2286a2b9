// src/core/failure.rs

//! Context attached to factory errors.

use crate::{
    config::Configurable,
    constants::{ARGS_REPR_LIMIT, SHORTEN_PLACEHOLDER},
    models::Value,
};
use indexmap::IndexMap;
use std::{fmt, path::PathBuf};

/// The configuration file an error originated from; renders as
/// `, in file: <absolute path>` or as nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InFile(pub Option<PathBuf>);

impl InFile {
    pub fn of(config: &dyn Configurable) -> Self {
        Self(
            config
                .config_file()
                .map(|path| dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())),
        )
    }
}

impl fmt::Display for InFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(path) => write!(f, ", in file: {}", path.display()),
            None => Ok(()),
        }
    }
}

/// Renders constructor arguments for an error message.
///
/// Long renderings collapse to the list of keys, and the result never
/// exceeds [`ARGS_REPR_LIMIT`] characters.
pub fn describe_arguments(kwargs: &IndexMap<String, Value>) -> String {
    let mut text = Value::Map(kwargs.clone()).to_literal();
    if text.chars().count() > ARGS_REPR_LIMIT {
        let keys: Vec<&str> = kwargs.keys().map(String::as_str).collect();
        text = format!("keys: {}", keys.join(", "));
    }
    shorten(&text, ARGS_REPR_LIMIT)
}

/// Collapses whitespace and truncates at a word boundary so that the result,
/// placeholder included, fits in `width` characters.
pub fn shorten(text: &str, width: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let budget = width.saturating_sub(SHORTEN_PLACEHOLDER.chars().count());
    let mut out = String::new();
    for word in words {
        let extra = if out.is_empty() { 0 } else { 1 } + word.chars().count();
        if out.chars().count() + extra > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        return SHORTEN_PLACEHOLDER.trim_start().to_string();
    }
    out.push_str(SHORTEN_PLACEHOLDER);
    out
}

// MARK: --- UNIT TESTS ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DictionaryConfig;
    use tempfile::tempdir;

    #[test]
    fn test_in_file_renders_absolute_path() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.yml");
        std::fs::write(&path, "a: {}").unwrap();
        let config = DictionaryConfig::default().with_config_file(path.clone());

        // --- Execute ---
        let rendered = InFile::of(&config).to_string();

        // --- Assert ---
        let expected = dunce::canonicalize(&path).unwrap();
        assert_eq!(rendered, format!(", in file: {}", expected.display()));
        assert_eq!(InFile::of(&DictionaryConfig::default()).to_string(), "");
    }

    #[test]
    fn test_short_arguments_render_as_literal() {
        let mut kwargs = IndexMap::new();
        kwargs.insert("param1".to_string(), Value::Float(3.14));
        kwargs.insert("name".to_string(), Value::from("w"));
        assert_eq!(describe_arguments(&kwargs), "{'param1': 3.14, 'name': 'w'}");
    }

    #[test]
    fn test_long_arguments_collapse_to_keys() {
        let mut kwargs = IndexMap::new();
        kwargs.insert("text".to_string(), Value::from("x".repeat(500)));
        kwargs.insert("count".to_string(), Value::Int(1));
        assert_eq!(describe_arguments(&kwargs), "keys: text, count");
    }

    #[test]
    fn test_shorten_fits_width() {
        let text = "alpha   beta\ngamma delta epsilon";
        assert_eq!(shorten(text, 100), "alpha beta gamma delta epsilon");
        let short = shorten(text, 20);
        assert_eq!(short, "alpha beta [...]");
        assert!(short.chars().count() <= 20);
        assert_eq!(shorten("supercalifragilistic", 8), "[...]");

        let many: Vec<String> = (0..100).map(|i| format!("key{}", i)).collect();
        let long = shorten(&format!("keys: {}", many.join(", ")), ARGS_REPR_LIMIT);
        assert!(long.chars().count() <= ARGS_REPR_LIMIT);
        assert!(long.ends_with(" [...]"));
    }
}

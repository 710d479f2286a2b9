// src/cli/handlers/commons.rs

// Shared helpers for the command handlers.

use anyhow::{Context, Result};
use serde::Serialize;
use std::rc::Rc;

use crate::config::{ConditionalConfig, ConfigHandle, loader};

/// Loads `file`, applies `section.option=value` overrides and wraps the result
/// so that condition nodes are evaluated on read.
pub fn load_config(file: &str, overrides: &[String]) -> Result<ConfigHandle> {
    let mut config =
        loader::load_path(file).with_context(|| format!("Failed to load configuration '{}'", file))?;
    if !overrides.is_empty() {
        let extra = loader::from_option_string(&overrides.join(","), None)
            .context("Failed to parse --set overrides")?;
        log::debug!("applying {} override(s)", overrides.len());
        config.merge(extra);
    }
    let config = ConditionalConfig::new(config)
        .with_context(|| format!("Invalid condition in '{}'", file))?;
    Ok(Rc::new(config))
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{}", json);
    Ok(())
}

// MARK: --- UNIT TESTS ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Configurable, models::Value};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_applies_overrides_and_conditions() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.yml");
        fs::write(
            &path,
            "db:\n  port: 5432\napp:\n  condition:\n    if: True\n    then:\n      mode: {level: fast}\n    else:\n      mode: {level: slow}\n",
        )
        .unwrap();

        // --- Execute ---
        let config = load_config(path.to_str().unwrap(), &["db.port=5433".to_string()]).unwrap();

        // --- Assert ---
        assert_eq!(config.get_option("port", "db").unwrap(), Value::from("5433"));
        assert_eq!(
            config.get_option("level", "app.mode").unwrap(),
            Value::from("fast")
        );
        assert!(config.config_file().is_some());
    }

    #[test]
    fn test_load_config_reports_missing_files() {
        let err = load_config("/nonexistent/app.ini", &[]).unwrap_err();
        assert!(err.to_string().contains("Failed to load configuration"));
    }
}

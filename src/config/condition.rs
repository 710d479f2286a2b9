// src/config/condition.rs

use crate::{
    config::{
        ConfigResult, Configurable, DictionaryConfig, Options,
        dictionary::{lookup_path, options_at},
    },
    constants::{CONDITION_ELSE, CONDITION_IF, CONDITION_THEN},
    core::{literal::LiteralError, serializer::coerce},
    models::Value,
};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    path::Path,
    rc::Rc,
};
use thiserror::Error;

lazy_static! {
    static ref CONDITION_RE: Regex = Regex::new(r"^(?:[a-zA-Z0-9\-_.]+)?condition$").unwrap();
}

#[derive(Error, Debug)]
pub enum ConditionalConfigError {
    #[error("Missing 'if' in condition at '{path}': {node}")]
    MissingIf { path: String, node: String },

    #[error("Condition at '{path}' needs a 'then' or an 'else' branch: {node}")]
    MissingBranches { path: String, node: String },

    #[error("Branch '{branch}' of condition at '{path}' must have exactly one child, found {count}")]
    ChildCount {
        path: String,
        branch: &'static str,
        count: usize,
    },

    #[error("Branch '{branch}' of condition at '{path}' must be a mapping, found {found}")]
    BranchNotAMapping {
        path: String,
        branch: &'static str,
        found: &'static str,
    },

    #[error("Branches of condition at '{path}' have different roots: '{then_root}' and '{else_root}'")]
    MismatchedRoots {
        path: String,
        then_root: String,
        else_root: String,
    },

    #[error("Duplicate condition '{name}' under '{path}'")]
    Duplicate { path: String, name: String },

    #[error("Invalid 'if' expression of condition at '{path}': {source}")]
    Predicate {
        path: String,
        #[source]
        source: LiteralError,
    },
}

type ConditionResult<T> = Result<T, ConditionalConfigError>;

/// A compiled `condition` node: the name of the child it produces and the
/// content of the selected branch (`None` when that branch is absent).
#[derive(Debug)]
struct Condition {
    name: String,
    selected: Option<Value>,
    alternative: Option<Value>,
}

impl Condition {
    fn compile(path: &str, node: &IndexMap<String, Value>) -> ConditionResult<Self> {
        let predicate = node.get(CONDITION_IF).ok_or_else(|| ConditionalConfigError::MissingIf {
            path: path.to_string(),
            node: Value::Map(node.clone()).to_literal(),
        })?;
        let then_branch = Self::branch(path, CONDITION_THEN, node.get(CONDITION_THEN))?;
        let else_branch = Self::branch(path, CONDITION_ELSE, node.get(CONDITION_ELSE))?;

        let name = match (&then_branch, &else_branch) {
            (None, None) => {
                return Err(ConditionalConfigError::MissingBranches {
                    path: path.to_string(),
                    node: Value::Map(node.clone()).to_literal(),
                });
            }
            (Some((t, _)), Some((e, _))) if t != e => {
                return Err(ConditionalConfigError::MismatchedRoots {
                    path: path.to_string(),
                    then_root: t.clone(),
                    else_root: e.clone(),
                });
            }
            (Some((name, _)), _) | (None, Some((name, _))) => name.clone(),
        };

        let truth = match predicate {
            Value::Str(raw) => coerce(raw)
                .map_err(|source| ConditionalConfigError::Predicate {
                    path: path.to_string(),
                    source,
                })?
                .is_truthy(),
            other => other.is_truthy(),
        };
        log::trace!("condition at '{}' is {}", path, truth);

        let then_child = then_branch.map(|(_, child)| child);
        let else_child = else_branch.map(|(_, child)| child);
        let (selected, alternative) = if truth {
            (then_child, else_child)
        } else {
            (else_child, then_child)
        };
        Ok(Self {
            name,
            selected,
            alternative,
        })
    }

    /// Returns the single `(name, child)` of a branch, if the branch is present.
    fn branch(
        path: &str,
        branch: &'static str,
        value: Option<&Value>,
    ) -> ConditionResult<Option<(String, Value)>> {
        match value {
            None | Some(Value::None) => Ok(None),
            Some(Value::Map(children)) => {
                if children.len() != 1 {
                    return Err(ConditionalConfigError::ChildCount {
                        path: path.to_string(),
                        branch,
                        count: children.len(),
                    });
                }
                Ok(children.first().map(|(k, v)| (k.clone(), v.clone())))
            }
            Some(other) => Err(ConditionalConfigError::BranchNotAMapping {
                path: path.to_string(),
                branch,
                found: other.kind(),
            }),
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn is_condition(key: &str, value: &Value) -> bool {
    matches!(value, Value::Map(_)) && CONDITION_RE.is_match(key)
}

/// Checks every condition of a tree, including those inside branches.
fn validate(path: &str, map: &IndexMap<String, Value>) -> ConditionResult<()> {
    let mut names = HashSet::new();
    for (key, value) in map {
        let Value::Map(node) = value else { continue };
        if is_condition(key, value) {
            let cond = Condition::compile(&join(path, key), node)?;
            if !names.insert(cond.name.clone()) {
                return Err(ConditionalConfigError::Duplicate {
                    path: path.to_string(),
                    name: cond.name,
                });
            }
            let child_path = join(path, &cond.name);
            for child in [&cond.selected, &cond.alternative].into_iter().flatten() {
                if let Value::Map(child) = child {
                    validate(&child_path, child)?;
                }
            }
        } else {
            validate(&join(path, key), node)?;
        }
    }
    Ok(())
}

/// Replaces condition nodes by their selected child. With `deep`, nested maps
/// (and selected children) are evaluated too.
fn evaluate(path: &str, map: &IndexMap<String, Value>, deep: bool) -> ConditionResult<IndexMap<String, Value>> {
    let mut out = IndexMap::with_capacity(map.len());
    let mut replacements = Vec::new();
    for (key, value) in map {
        match value {
            Value::Map(node) if is_condition(key, value) => {
                let cond = Condition::compile(&join(path, key), node)?;
                replacements.push((cond.name, cond.selected));
            }
            Value::Map(node) if deep => {
                out.insert(key.clone(), Value::Map(evaluate(&join(path, key), node, deep)?));
            }
            other => {
                out.insert(key.clone(), other.clone());
            }
        }
    }
    for (name, selected) in replacements {
        match selected {
            Some(Value::Map(child)) if deep => {
                let child = evaluate(&join(path, &name), &child, deep)?;
                out.insert(name, Value::Map(child));
            }
            Some(child) => {
                out.insert(name, child);
            }
            None => log::trace!("condition under '{}' selected no '{}'", path, name),
        }
    }
    Ok(out)
}

/// A configuration whose `condition` nodes are replaced by one of their
/// branches when read.
///
/// ```yaml
/// app:
///   condition:
///     if: ${default:testvar}
///     then:
///       engine: {class_name: Fast}
///     else:
///       engine: {class_name: Slow}
/// ```
///
/// Conditions are validated up front. Sections are evaluated on first read
/// and cached until [`Configurable::invalidate`].
#[derive(Debug)]
pub struct ConditionalConfig {
    source: DictionaryConfig,
    top_level: RefCell<Option<Rc<IndexMap<String, Value>>>>,
    sections: RefCell<HashMap<String, Option<Value>>>,
    evaluations: Cell<usize>,
}

impl ConditionalConfig {
    pub fn new(source: DictionaryConfig) -> Result<Self, ConditionalConfigError> {
        validate("", source.root())?;
        Ok(Self {
            source,
            top_level: RefCell::new(None),
            sections: RefCell::new(HashMap::new()),
            evaluations: Cell::new(0),
        })
    }

    pub fn source(&self) -> &DictionaryConfig {
        &self.source
    }

    /// How many section evaluations have run since creation.
    pub fn evaluations(&self) -> usize {
        self.evaluations.get()
    }

    /// The root with top-level conditions replaced; sections are not evaluated.
    fn top_level(&self) -> ConfigResult<Rc<IndexMap<String, Value>>> {
        if let Some(top) = self.top_level.borrow().as_ref() {
            return Ok(Rc::clone(top));
        }
        let top = Rc::new(evaluate("", self.source.root(), false)?);
        *self.top_level.borrow_mut() = Some(Rc::clone(&top));
        Ok(top)
    }

    /// A fully evaluated top-level entry.
    fn section_tree(&self, key: &str) -> ConfigResult<Option<Value>> {
        if let Some(tree) = self.sections.borrow().get(key) {
            return Ok(tree.clone());
        }
        let top = self.top_level()?;
        let tree = match top.get(key) {
            Some(Value::Map(node)) => Some(Value::Map(evaluate(key, node, true)?)),
            other => other.cloned(),
        };
        self.evaluations.set(self.evaluations.get() + 1);
        log::debug!("evaluated conditional section '{}'", key);
        self.sections.borrow_mut().insert(key.to_string(), tree.clone());
        Ok(tree)
    }

    fn evaluated(&self, path: &str) -> ConfigResult<Option<Value>> {
        let top = self.top_level()?;
        if top.contains_key(path) {
            return self.section_tree(path);
        }
        let (head, rest) = path.split_once('.').unwrap_or((path, ""));
        let Some(Value::Map(tree)) = self.section_tree(head)? else {
            return Ok(None);
        };
        if rest.is_empty() {
            return Ok(Some(Value::Map(tree)));
        }
        Ok(lookup_path(&tree, rest).cloned())
    }
}

impl Configurable for ConditionalConfig {
    fn sections(&self) -> Vec<String> {
        match self.top_level() {
            Ok(top) => top
                .iter()
                .filter(|(_, v)| matches!(v, Value::Map(_)))
                .map(|(k, _)| k.clone())
                .collect(),
            Err(e) => {
                log::error!("could not evaluate conditional sections: {}", e);
                Vec::new()
            }
        }
    }

    fn has_section(&self, section: &str) -> bool {
        matches!(self.evaluated(section), Ok(Some(Value::Map(_))))
    }

    fn get_options(&self, section: &str) -> ConfigResult<Options> {
        let mut root = IndexMap::new();
        if let Some(tree) = self.evaluated(section)? {
            root.insert(section.to_string(), tree);
        }
        options_at(&root, section)
    }

    fn get_tree(&self, path: &str) -> ConfigResult<Option<Value>> {
        self.evaluated(path)
    }

    fn config_file(&self) -> Option<&Path> {
        self.source.config_file()
    }

    fn invalidate(&self) {
        log::debug!("invalidating conditional evaluations");
        self.top_level.borrow_mut().take();
        self.sections.borrow_mut().clear();
    }
}

// MARK: --- UNIT TESTS ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, loader::from_yaml_str};

    const CONDITIONAL_YAML: &str = r#"
default:
  testvar: True
  offvar: False
top:
  condition:
    if: ${default:testvar}
    then:
      engine:
        class_name: FastEngine
        hp: 420
    else:
      engine:
        class_name: SlowEngine
        hp: 90
  wheels: 4
lower:
  condition:
    if: ${default:offvar}
    then:
      turbo:
        boost: 2
  kept: yes
"#;

    fn config() -> ConditionalConfig {
        ConditionalConfig::new(from_yaml_str(CONDITIONAL_YAML).unwrap()).unwrap()
    }

    #[test]
    fn test_true_condition_selects_then_branch() {
        // --- Setup ---
        let config = config();

        // --- Execute ---
        let engine = config.get_options("top.engine").unwrap();
        let top = config.get_options("top").unwrap();

        // --- Assert ---
        assert_eq!(engine.get("class_name"), Some(&Value::from("FastEngine")));
        assert_eq!(top.keys().collect::<Vec<_>>(), vec!["wheels", "engine"]);
        assert!(!top.contains_key("condition"));
    }

    #[test]
    fn test_false_condition_without_else_removes_child() {
        let config = config();
        let lower = config.get_options("lower").unwrap();
        assert!(!lower.contains_key("turbo"));
        assert!(!lower.contains_key("condition"));
        assert!(matches!(
            config.get_options("lower.turbo"),
            Err(ConfigError::NoSection { .. })
        ));
    }

    #[test]
    fn test_evaluations_are_cached_until_invalidated() {
        // --- Setup ---
        let config = config();

        // --- Execute ---
        config.get_options("top").unwrap();
        config.get_options("top.engine").unwrap();
        config.get_tree("top").unwrap();
        let after_reads = config.evaluations();
        config.invalidate();
        config.get_options("top").unwrap();

        // --- Assert ---
        assert_eq!(after_reads, 1);
        assert_eq!(config.evaluations(), 2);
    }

    #[test]
    fn test_top_level_condition_produces_section() {
        let yaml = r#"
condition:
  if: False
  then:
    app: {mode: dev}
  else:
    app: {mode: prod}
"#;
        let config = ConditionalConfig::new(from_yaml_str(yaml).unwrap()).unwrap();
        assert_eq!(config.sections(), vec!["app"]);
        assert_eq!(config.get_option("mode", "app").unwrap(), Value::from("prod"));
    }

    #[test]
    fn test_nested_conditions_inside_branches() {
        let yaml = r#"
root:
  condition:
    if: True
    then:
      inner:
        a_condition:
          if: 0
          else:
            leaf: {v: 1}
"#;
        let config = ConditionalConfig::new(from_yaml_str(yaml).unwrap()).unwrap();
        assert_eq!(config.get_option("v", "root.inner.leaf").unwrap(), Value::Int(1));
    }

    fn invalid(yaml: &str) -> ConditionalConfigError {
        ConditionalConfig::new(from_yaml_str(yaml).unwrap()).unwrap_err()
    }

    #[test]
    fn test_malformed_conditions_are_rejected() {
        assert!(matches!(
            invalid("s:\n  condition:\n    then:\n      a: 1\n"),
            ConditionalConfigError::MissingIf { .. }
        ));
        assert!(matches!(
            invalid("s:\n  condition:\n    if: True\n"),
            ConditionalConfigError::MissingBranches { .. }
        ));
        assert!(matches!(
            invalid("s:\n  condition:\n    if: True\n    then:\n      a: 1\n      b: 2\n"),
            ConditionalConfigError::ChildCount { count: 2, .. }
        ));
        assert!(matches!(
            invalid("s:\n  condition:\n    if: True\n    then:\n      a: 1\n    else:\n      b: 2\n"),
            ConditionalConfigError::MismatchedRoots { .. }
        ));
        assert!(matches!(
            invalid(
                "s:\n  x_condition:\n    if: True\n    then:\n      a: 1\n  y_condition:\n    if: False\n    else:\n      a: 2\n"
            ),
            ConditionalConfigError::Duplicate { .. }
        ));
        assert!(matches!(
            invalid("s:\n  condition:\n    if: 'eval: [1,'\n    then:\n      a: 1\n"),
            ConditionalConfigError::Predicate { .. }
        ));
    }

    #[test]
    fn test_scalar_named_condition_is_an_ordinary_option() {
        let config =
            ConditionalConfig::new(from_yaml_str("s:\n  condition: plain\n").unwrap()).unwrap();
        assert_eq!(
            config.get_option("condition", "s").unwrap(),
            Value::from("plain")
        );
    }
}

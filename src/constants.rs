// src/constants.rs

/// The option that names the class a section instantiates.
pub const CLASS_NAME: &str = "class_name";

/// Injected with the object's (section) name when the class declares it.
pub const NAME_ATTRIBUTE: &str = "name";

/// Injected with the active configuration when the class declares it.
pub const CONFIG_ATTRIBUTE: &str = "config";

/// Injected with the creating factory when the class declares it.
pub const CONFIG_FACTORY_ATTRIBUTE: &str = "config_factory";

/// The section-name pattern used when none is given; `{name}` is the object name.
pub const DEFAULT_PATTERN: &str = "{name}";

/// The object name used when `instance` is called without one.
pub const DEFAULT_NAME: &str = "default";

/// The section used by option strings that do not name one.
pub const DEFAULT_SECTION: &str = "default";

/// The name the built-in settings class is registered under.
pub const SETTINGS_CLASS: &str = "Settings";

/// The module the built-in settings class lives in for module-path resolution.
pub const SETTINGS_MODULE: &str = "confactory";

/// Maximum nesting of `${...}` expansion.
pub const MAX_RECURSION_DEPTH: usize = 32;

/// Default maximum nesting of object construction. Cycles are caught before
/// this, so it only stops runaway acyclic graphs.
pub const MAX_CONSTRUCTION_DEPTH: usize = 256;

/// Rendered constructor arguments longer than this are summarized in errors.
pub const ARGS_REPR_LIMIT: usize = 200;

/// Placeholder appended to shortened text.
pub const SHORTEN_PLACEHOLDER: &str = " [...]";

// --- Directive parameter keys ---

pub const DIRECTIVE_PARAM: &str = "param";
pub const DIRECTIVE_RELOAD: &str = "reload";
pub const DIRECTIVE_SHARE: &str = "share";

/// Every key a directive's parameter mapping may carry.
pub const DIRECTIVE_KEYS: &[&str] = &[DIRECTIVE_PARAM, DIRECTIVE_RELOAD, DIRECTIVE_SHARE];

// --- Conditional nodes ---

pub const CONDITION_IF: &str = "if";
pub const CONDITION_THEN: &str = "then";
pub const CONDITION_ELSE: &str = "else";

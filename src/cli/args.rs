// src/cli/args.rs

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Lists the sections of a configuration file.")]
pub struct SectionsArgs {
    /// The configuration file (.ini, .conf, .cfg, .yml, .yaml, .json or .toml).
    pub file: String,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Prints the raw options of a section.")]
pub struct OptionsArgs {
    pub file: String,

    /// The section, possibly a dotted path into a tree.
    pub section: String,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Prints the condition-evaluated configuration tree as JSON.")]
pub struct TreeArgs {
    pub file: String,

    /// A dotted path selecting a sub-tree.
    pub path: Option<String>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Builds a section and prints the result as JSON.")]
pub struct ShowArgs {
    pub file: String,

    /// The object to build. Defaults to 'default'.
    pub section: Option<String>,

    /// Override options before building (e.g., "db.port=5433").
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub set: Vec<String>,

    /// Report missing sections as configuration errors.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, about = "Parses a configuration value as a directive.")]
pub struct DirectiveArgs {
    /// The raw value, e.g. "instance({'share': 'evict'}): engine".
    pub value: String,
}

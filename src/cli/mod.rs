// src/cli/mod.rs

use clap::Parser;

pub mod args;
pub mod handlers;

/// confactory: inspect configuration files and build the objects they describe.
///
/// Commands:
///   sections <file>                         List the sections of a file.
///   options <file> <section>                Print the raw options of a section.
///   tree <file> [path]                      Print the evaluated tree as JSON.
///   show <file> [section] [--set s.o=v,..]  Build a section and print it as JSON.
///   directive <value>                       Parse a value as a directive.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
#[command(trailing_var_arg = true)]
pub struct Cli {
    /// The command to run.
    pub command: Option<String>,

    /// Arguments handed to the command's own parser.
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

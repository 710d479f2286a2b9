// src/bin/confactory.rs

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};
use colored::*;
use confactory::cli::{Cli, handlers};

// --- Command Definition and Registry ---

/// A command, its aliases and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>) -> Result<()>,
}

/// The single source of truth for all commands.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "sections",
        aliases: &["ls"],
        handler: handlers::sections::handle,
    },
    CommandDefinition {
        name: "options",
        aliases: &["opts"],
        handler: handlers::options::handle,
    },
    CommandDefinition {
        name: "tree",
        aliases: &[],
        handler: handlers::tree::handle,
    },
    CommandDefinition {
        name: "show",
        aliases: &["build"],
        handler: handlers::show::handle,
    },
    CommandDefinition {
        name: "directive",
        aliases: &["parse"],
        handler: handlers::directive::handle,
    },
];

/// Finds a command definition in the registry by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };
    let definition = find_command(&command).ok_or_else(|| {
        let known: Vec<&str> = COMMAND_REGISTRY.iter().map(|c| c.name).collect();
        anyhow!("Unknown command '{}'. Available: {}", command, known.join(", "))
    })?;
    (definition.handler)(cli.args)
}

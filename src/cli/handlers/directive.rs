// src/cli/handlers/directive.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::{
    cli::args::DirectiveArgs,
    core::{modules::ModuleRegistry, serializer::coerce},
    models::Value,
};

pub fn handle(args: Vec<String>) -> Result<()> {
    let directive_args = DirectiveArgs::try_parse_from(&args)?;
    let registry = ModuleRegistry::default();

    match registry.parser().parse(&directive_args.value)? {
        Some(directive) => {
            println!("  {:<10} {}", "module".blue(), directive.name.cyan());
            println!("  {:<10} {}", "reference".blue(), directive.reference);
            println!("  {:<10} {:?}", "share".blue(), directive.share());
            println!("  {:<10} {}", "reload".blue(), directive.reload());
            println!(
                "  {:<10} {}",
                "param".blue(),
                Value::Map(directive.param()).to_literal()
            );
        }
        None => {
            let value = coerce(&directive_args.value)?;
            println!(
                "{} coerces to {}: {}",
                "Not a directive;".dimmed(),
                value.kind(),
                value.to_literal()
            );
        }
    }
    Ok(())
}

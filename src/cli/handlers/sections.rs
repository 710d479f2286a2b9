// src/cli/handlers/sections.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::{
    cli::{args::SectionsArgs, handlers::commons},
    config::Configurable,
};

pub fn handle(args: Vec<String>) -> Result<()> {
    let sections_args = SectionsArgs::try_parse_from(&args)?;
    let config = commons::load_config(&sections_args.file, &[])?;

    let sections = config.sections();
    if sections.is_empty() {
        println!("{}", "No sections found.".dimmed());
        return Ok(());
    }
    for section in sections {
        println!("{}", section.cyan());
    }
    Ok(())
}

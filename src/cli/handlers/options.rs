// src/cli/handlers/options.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::{
    cli::{args::OptionsArgs, handlers::commons},
    config::Configurable,
    models::Value,
};

pub fn handle(args: Vec<String>) -> Result<()> {
    let options_args = OptionsArgs::try_parse_from(&args)?;
    let config = commons::load_config(&options_args.file, &[])?;
    let options = config.get_options(&options_args.section)?;

    println!("\n--- [{}] ---", options_args.section.yellow());
    let width = options.keys().map(String::len).max().unwrap_or(0);
    for (option, value) in &options {
        let rendered = match value {
            Value::Map(_) => "<section>".dimmed().to_string(),
            other => other.to_string(),
        };
        println!("  {:<width$}  {}", option.blue(), rendered, width = width);
    }
    Ok(())
}

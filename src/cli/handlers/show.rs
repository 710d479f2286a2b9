// src/cli/handlers/show.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::{
    cli::{args::ShowArgs, handlers::commons},
    core::{class_resolver::ImportClassResolver, factory::ObjectFactory},
    models::Value,
};

/// Builds one object with the built-in classes and prints it.
pub fn handle(args: Vec<String>) -> Result<()> {
    let show_args = ShowArgs::try_parse_from(&args)?;
    let config = commons::load_config(&show_args.file, &show_args.set)?;
    let factory = ObjectFactory::builder(config)
        .resolver(ImportClassResolver::new())
        .strict(show_args.strict)
        .build();

    let name = show_args
        .section
        .as_deref()
        .unwrap_or(factory.default_name())
        .to_string();
    let instance = factory.instance(Some(&name))?;
    log::debug!("built '{}' as {}", name, instance.type_name());

    eprintln!("{} {}", "Built".green().bold(), name.cyan());
    commons::print_json(&Value::Object(instance))
}

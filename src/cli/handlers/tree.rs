// src/cli/handlers/tree.rs

use anyhow::{Result, bail};
use clap::Parser;
use indexmap::IndexMap;

use crate::{
    cli::{args::TreeArgs, handlers::commons},
    config::Configurable,
};

pub fn handle(args: Vec<String>) -> Result<()> {
    let tree_args = TreeArgs::try_parse_from(&args)?;
    let config = commons::load_config(&tree_args.file, &[])?;

    match tree_args.path {
        Some(path) => match config.get_tree(&path)? {
            Some(tree) => commons::print_json(&tree),
            None => bail!("No such path: '{}'", path),
        },
        None => {
            let mut root = IndexMap::new();
            for section in config.sections() {
                if let Some(tree) = config.get_tree(&section)? {
                    root.insert(section, tree);
                }
            }
            commons::print_json(&root)
        }
    }
}

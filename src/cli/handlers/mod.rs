// src/cli/handlers/mod.rs

pub mod commons;
pub mod directive;
pub mod options;
pub mod sections;
pub mod show;
pub mod tree;

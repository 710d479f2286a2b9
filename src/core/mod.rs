// src/core/mod.rs

pub mod arguments;
pub mod class_resolver;
pub mod directive;
pub mod factory;
pub mod failure;
pub mod literal;
pub mod modules;
pub mod serializer;
pub mod tree_module;

#[cfg(test)]
pub(crate) mod testing;

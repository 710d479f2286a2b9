pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod models;

pub use crate::config::{ConfigError, ConfigHandle, Configurable, ConditionalConfig, DictionaryConfig};
pub use crate::core::{
    arguments::{ArgumentError, Arguments},
    class_resolver::{
        ClassDef, ClassResolutionError, ClassResolver, DictionaryClassResolver, FactoryState,
        FactoryStateObserver, ImportClassResolver, Invoke, Parameters,
    },
    directive::{Directive, DirectiveParser, Share},
    factory::{FactoryContext, FactoryError, FactoryResult, ObjectFactory, ObjectFactoryBuilder},
    modules::{ModuleRegistry, ReferenceModule},
};
pub use crate::models::{Instance, Params, Settings, Value};

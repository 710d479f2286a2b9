// src/core/tree_module.rs

use crate::{
    config::{ConfigHandle, DictionaryConfig},
    constants::NAME_ATTRIBUTE,
    core::{
        directive::Directive,
        factory::{FactoryContext, FactoryResult},
        modules::ReferenceModule,
    },
    models::{Params, Value},
};
use indexmap::IndexMap;
use std::rc::Rc;

/// Builds an object from a nested sub-tree of a tree-shaped configuration.
///
/// ```yaml
/// people:
///   paul: "tree({'param': {'name': 'data.person', 'age': 25}}): data"
/// ```
///
/// The reference names the sub-tree; `param.name` is the dotted path of the
/// section to build inside it and the other params are overrides. The object
/// is built against a configuration that holds only that sub-tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeModule;

impl ReferenceModule for TreeModule {
    fn name(&self) -> &str {
        "tree"
    }

    fn resolve(&self, directive: &Directive, context: &FactoryContext) -> FactoryResult<Value> {
        let reference = directive.reference.as_str();
        let fail = |reason: String| context.module_error(self.name(), reference, reason);

        let mut params = directive.param();
        let name = match params.shift_remove(NAME_ATTRIBUTE) {
            Some(Value::Str(name)) => name,
            Some(other) => return Err(fail(format!("'name' must be a string, got {}", other.kind()))),
            None => return Err(fail("missing the 'name' parameter".to_string())),
        };

        let tree = context
            .config()
            .get_tree(reference)
            .map_err(|e| fail(e.to_string()))?
            .ok_or_else(|| fail(format!("No section to treeify: '{}'", reference)))?;

        let mut root = IndexMap::with_capacity(1);
        root.insert(reference.to_string(), tree);
        let mut derived = DictionaryConfig::new(root);
        if let Some(path) = context.config().config_file() {
            derived = derived.with_config_file(path);
        }
        log::debug!("building '{}' from tree '{}'", name, reference);

        let scoped = context.with_config(Rc::new(derived) as ConfigHandle);
        scoped
            .share(directive.share(), &name, Params::from(params))
            .map(Value::Object)
    }
}

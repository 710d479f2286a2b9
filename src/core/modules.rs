// src/core/modules.rs

//! Reference modules: the handlers behind `name(params): reference` values.

use crate::{
    core::{
        arguments::Arguments,
        directive::{Directive, DirectiveParseError, DirectiveParser},
        factory::{FactoryContext, FactoryError, FactoryResult},
        serializer::coerce,
        tree_module::TreeModule,
    },
    models::{Params, Settings, Value},
};
use indexmap::IndexMap;
use std::{fmt, rc::Rc};

/// Resolves one kind of directive into a value.
pub trait ReferenceModule: fmt::Debug {
    /// The directive name this module answers to.
    fn name(&self) -> &str;

    fn resolve(&self, directive: &Directive, context: &FactoryContext) -> FactoryResult<Value>;
}

/// The reference modules known to a factory, and the parser that recognizes
/// their directives.
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: IndexMap<String, Rc<dyn ReferenceModule>>,
    parser: DirectiveParser,
}

impl Default for ModuleRegistry {
    /// The built-in modules: instance, call, tree, alias, object and asdict.
    fn default() -> Self {
        Self::empty()
            .with(InstanceModule)
            .with(CallModule)
            .with(TreeModule)
            .with(AliasModule)
            .with(ObjectModule)
            .with(AsDictModule)
    }
}

impl ModuleRegistry {
    pub fn empty() -> Self {
        Self {
            modules: IndexMap::new(),
            parser: DirectiveParser::default(),
        }
    }

    /// Adds `module`, replacing any module of the same name.
    pub fn register(&mut self, module: impl ReferenceModule + 'static) -> &mut Self {
        let name = module.name().to_string();
        log::trace!("registering reference module '{}'", name);
        self.modules.insert(name, Rc::new(module));
        self.parser = DirectiveParser::new(self.modules.keys().cloned());
        self
    }

    pub fn with(mut self, module: impl ReferenceModule + 'static) -> Self {
        self.register(module);
        self
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn ReferenceModule>> {
        self.modules.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn parser(&self) -> &DirectiveParser {
        &self.parser
    }

    /// Parses `value` and pairs the directive with its module.
    pub(crate) fn parse(
        &self,
        value: &str,
    ) -> Result<Option<(Directive, Rc<dyn ReferenceModule>)>, DirectiveParseError> {
        Ok(self
            .parser
            .parse(value)?
            .and_then(|directive| self.get(&directive.name).map(|module| (directive, module))))
    }
}

/// Section names from an instance reference; a scalar stays the raw text.
enum Targets {
    One(String),
    List(Vec<String>),
    Map(IndexMap<String, String>),
}

fn targets(directive: &Directive, context: &FactoryContext) -> FactoryResult<Targets> {
    let reference = &directive.reference;
    let coerced = coerce(reference)
        .map_err(|e| context.module_error(&directive.name, reference, e.to_string()))?;
    let name_of = |value: Value| match value {
        Value::Str(s) => Ok(s),
        other => other.scalar_text().ok_or_else(|| {
            context.module_error(
                &directive.name,
                reference,
                format!("expected a section name but got {}", other.kind()),
            )
        }),
    };
    Ok(match coerced {
        Value::List(items) => Targets::List(items.into_iter().map(name_of).collect::<Result<_, _>>()?),
        Value::Map(entries) => {
            let mut names = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                names.insert(key, name_of(value)?);
            }
            Targets::Map(names)
        }
        Value::Str(name) => Targets::One(name),
        _ => Targets::One(reference.clone()),
    })
}

// --- BUILT-IN MODULES ---

/// `instance: name`, `instance: list: a, b` or `instance: dict: {'k': 'a'}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceModule;

impl ReferenceModule for InstanceModule {
    fn name(&self) -> &str {
        "instance"
    }

    fn resolve(&self, directive: &Directive, context: &FactoryContext) -> FactoryResult<Value> {
        let share = directive.share();
        let params = directive.param();
        let one = |name: &str| {
            context
                .share(share, name, Params::from(params.clone()))
                .map(Value::Object)
        };
        Ok(match targets(directive, context)? {
            Targets::One(name) => one(&name)?,
            Targets::List(names) => Value::List(
                names
                    .iter()
                    .map(|name| one(name))
                    .collect::<FactoryResult<_>>()?,
            ),
            Targets::Map(names) => {
                let mut objects = IndexMap::with_capacity(names.len());
                for (key, name) in names {
                    objects.insert(key, one(&name)?);
                }
                Value::Map(objects)
            }
        })
    }
}

/// Calls a method, reads an attribute, or calls the referenced instance.
///
/// ```ini
/// engine = call({'param': {'method': 'create', 'part_name': 'engine'}}): factory
/// maker = call({'param': {'attribute': 'company_name'}}): factory
/// transmission = call: factory
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CallModule;

impl CallModule {
    const METHOD: &'static str = "method";
    const ATTRIBUTE: &'static str = "attribute";
}

impl ReferenceModule for CallModule {
    fn name(&self) -> &str {
        "call"
    }

    fn resolve(&self, directive: &Directive, context: &FactoryContext) -> FactoryResult<Value> {
        let reference = directive.reference.as_str();
        let fail = |reason: String| context.module_error(self.name(), reference, reason);
        let inst = context.share(directive.share(), reference, Params::default())?;
        let invoker = inst
            .as_invoke()
            .ok_or_else(|| fail(format!("'{}' exposes no members", inst.type_name())))?;

        let mut params = directive.param();
        let method = params.shift_remove(Self::METHOD);
        let attribute = params.shift_remove(Self::ATTRIBUTE);
        let invoke_error = |member: &str, source: anyhow::Error| FactoryError::Invoke {
            reference: reference.to_string(),
            member: member.to_string(),
            file: context.in_file(),
            source,
        };

        match (method, attribute) {
            (Some(method), _) => {
                let method = match method {
                    Value::Str(s) => s,
                    other => return Err(fail(format!("method name must be a string, got {}", other.kind()))),
                };
                log::debug!("calling {}.{}()", reference, method);
                let mut args = Arguments::new(reference, params);
                match invoker.invoke(&method, &mut args) {
                    Some(Ok(value)) => Ok(value),
                    Some(Err(source)) => Err(invoke_error(&method, source)),
                    None => Err(fail(format!("'{}' has no method '{}'", inst.type_name(), method))),
                }
            }
            (None, Some(attribute)) => {
                let attribute = match attribute {
                    Value::Str(s) => s,
                    other => return Err(fail(format!("attribute name must be a string, got {}", other.kind()))),
                };
                invoker.attribute(&attribute).ok_or_else(|| {
                    fail(format!("'{}' has no attribute '{}'", inst.type_name(), attribute))
                })
            }
            (None, None) => {
                let mut args = Arguments::new(reference, params);
                match invoker.call(&mut args) {
                    Some(Ok(value)) => Ok(value),
                    Some(Err(source)) => Err(invoke_error("()", source)),
                    None => Err(fail(format!("'{}' is not callable", inst.type_name()))),
                }
            }
        }
    }
}

/// `alias: section:option` instantiates the section named by an option.
#[derive(Debug, Clone, Copy, Default)]
pub struct AliasModule;

impl ReferenceModule for AliasModule {
    fn name(&self) -> &str {
        "alias"
    }

    fn resolve(&self, directive: &Directive, context: &FactoryContext) -> FactoryResult<Value> {
        let reference = directive.reference.as_str();
        let fail = |reason: String| context.module_error(self.name(), reference, reason);
        let (section, option) = reference
            .split_once(':')
            .ok_or_else(|| fail("expected <section>:<option>".to_string()))?;
        let target = match context.config().get_option(option.trim(), section.trim()) {
            Ok(Value::Str(name)) => name,
            Ok(other) => return Err(fail(format!("aliased option holds {}, not a section name", other.kind()))),
            Err(e) => return Err(fail(e.to_string())),
        };
        log::trace!("alias {} -> {}", reference, target);
        context
            .share(directive.share(), target.trim(), Params::from(directive.param()))
            .map(Value::Object)
    }
}

/// `object({'param': {...}}): module.Class` builds a class directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectModule;

impl ReferenceModule for ObjectModule {
    fn name(&self) -> &str {
        "object"
    }

    fn resolve(&self, directive: &Directive, context: &FactoryContext) -> FactoryResult<Value> {
        context
            .create_object(&directive.reference, Params::from(directive.param()))
            .map(Value::Object)
    }
}

/// Like `instance`, but yields the options of a settings section as a map.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsDictModule;

impl ReferenceModule for AsDictModule {
    fn name(&self) -> &str {
        "asdict"
    }

    fn resolve(&self, directive: &Directive, context: &FactoryContext) -> FactoryResult<Value> {
        let reference = directive.reference.as_str();
        let inst = context.share(directive.share(), reference, Params::from(directive.param()))?;
        match inst.downcast_ref::<Settings>() {
            Some(settings) => Ok(Value::Map(settings.as_map().clone())),
            None => Err(context.module_error(
                self.name(),
                reference,
                format!("'{}' is a {}, not settings", reference, inst.type_name()),
            )),
        }
    }
}

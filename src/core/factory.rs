// src/core/factory.rs

use crate::{
    config::{ConfigError, ConfigHandle, Configurable, Options},
    constants::{
        CLASS_NAME, CONFIG_ATTRIBUTE, CONFIG_FACTORY_ATTRIBUTE, DEFAULT_NAME, DEFAULT_PATTERN,
        MAX_CONSTRUCTION_DEPTH, NAME_ATTRIBUTE,
    },
    core::{
        arguments::Arguments,
        class_resolver::{
            ClassDef, ClassResolutionError, ClassResolver, DictionaryClassResolver, FactoryState,
            Parameters,
        },
        directive::{DirectiveParseError, Share},
        failure::{InFile, describe_arguments},
        literal::LiteralError,
        modules::ModuleRegistry,
        serializer::coerce,
    },
    models::{Instance, Params, Value},
};
use anyhow::anyhow;
use indexmap::IndexMap;
use regex::Regex;
use scopeguard::ScopeGuard;
use std::{
    any::{Any, type_name},
    cell::RefCell,
    fmt,
    rc::Rc,
    time::Instant,
};
use thiserror::Error;

/// Failures of object creation. Each carries the configuration file, if any.
#[derive(Error, Debug)]
pub enum FactoryError {
    /// No section, or an empty one without a class, exists for the name.
    #[error("No such entry: '{name}'{file}")]
    NoSuchEntry { name: String, file: InFile },

    /// The section's options could not be read.
    #[error("Can not populate from section {section}: {source}{file}")]
    Populate {
        section: String,
        file: InFile,
        #[source]
        source: ConfigError,
    },

    /// The class named by `class_name` could not be resolved.
    #[error("Can not find class '{class_name}' for section '{section}': {source}{file}")]
    Class {
        section: String,
        class_name: String,
        file: InFile,
        #[source]
        source: ClassResolutionError,
    },

    /// An option holds a malformed directive.
    #[error("Bad directive in option '{option}' of section '{section}': {source}{file}")]
    Directive {
        section: String,
        option: String,
        file: InFile,
        #[source]
        source: DirectiveParseError,
    },

    /// An option holds a value that fails coercion.
    #[error("Bad value in option '{option}' of section '{section}': {source}{file}")]
    Literal {
        section: String,
        option: String,
        file: InFile,
        #[source]
        source: LiteralError,
    },

    /// A directive in an option failed; `source` holds the inner failure.
    #[error("Could not resolve option '{option}' of section '{section}' ({directive}): {source}")]
    Reference {
        section: String,
        option: String,
        directive: String,
        file: InFile,
        #[source]
        source: Box<FactoryError>,
    },

    /// The constructor rejected its arguments or failed.
    #[error("Can not create '{section}' for class {class_name}({args}): {source}{file}")]
    Construct {
        section: String,
        class_name: String,
        args: String,
        file: InFile,
        #[source]
        source: anyhow::Error,
    },

    /// A method or call on a referenced instance failed.
    #[error("Call of '{member}' on '{reference}' failed: {source}{file}")]
    Invoke {
        reference: String,
        member: String,
        file: InFile,
        #[source]
        source: anyhow::Error,
    },

    /// A reference module could not resolve its reference.
    #[error("Directive '{module}' can not resolve '{reference}': {reason}{file}")]
    Module {
        module: String,
        reference: String,
        reason: String,
        file: InFile,
    },

    /// A typed lookup found an instance of another type.
    #[error("Instance '{name}' is a {found}, not a {expected}{file}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: &'static str,
        file: InFile,
    },

    /// A section depends on itself, directly or through others.
    #[error("Circular dependency detected while creating '{name}': {cycle_path}{file}")]
    CircularDependency {
        name: String,
        cycle_path: String,
        file: InFile,
    },

    /// Construction nested deeper than the factory's limit.
    #[error("Maximum recursion depth ({depth}) exceeded while creating '{name}'{file}")]
    MaxRecursionDepth {
        depth: usize,
        name: String,
        file: InFile,
    },
}

impl FactoryError {
    /// The configuration file the failure is attributed to.
    pub fn file(&self) -> &InFile {
        match self {
            FactoryError::NoSuchEntry { file, .. }
            | FactoryError::Populate { file, .. }
            | FactoryError::Class { file, .. }
            | FactoryError::Directive { file, .. }
            | FactoryError::Literal { file, .. }
            | FactoryError::Reference { file, .. }
            | FactoryError::Construct { file, .. }
            | FactoryError::Invoke { file, .. }
            | FactoryError::Module { file, .. }
            | FactoryError::WrongType { file, .. }
            | FactoryError::CircularDependency { file, .. }
            | FactoryError::MaxRecursionDepth { file, .. } => file,
        }
    }

    /// The section (or object name, or reference) the failure is about.
    pub fn section(&self) -> &str {
        match self {
            FactoryError::NoSuchEntry { name, .. }
            | FactoryError::WrongType { name, .. }
            | FactoryError::CircularDependency { name, .. }
            | FactoryError::MaxRecursionDepth { name, .. } => name,
            FactoryError::Populate { section, .. }
            | FactoryError::Class { section, .. }
            | FactoryError::Directive { section, .. }
            | FactoryError::Literal { section, .. }
            | FactoryError::Reference { section, .. }
            | FactoryError::Construct { section, .. } => section,
            FactoryError::Invoke { reference, .. } | FactoryError::Module { reference, .. } => {
                reference
            }
        }
    }

    /// The innermost factory error of a chain of option resolutions.
    pub fn root_cause(&self) -> &FactoryError {
        match self {
            FactoryError::Reference { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// The result of factory operations.
pub type FactoryResult<T> = Result<T, FactoryError>;

// --- FACTORY ---

type Frame<'a> = ScopeGuard<&'a RefCell<Vec<String>>, fn(&RefCell<Vec<String>>)>;

fn pop_frame(stack: &RefCell<Vec<String>>) {
    stack.borrow_mut().pop();
}

struct FactoryInner {
    config: ConfigHandle,
    pattern: String,
    default_name: String,
    resolver: Rc<dyn ClassResolver>,
    modules: Rc<ModuleRegistry>,
    settings: Rc<ClassDef>,
    shared: bool,
    reload: bool,
    reload_pattern: Option<Regex>,
    strict: bool,
    max_depth: usize,
    cache: RefCell<IndexMap<String, Instance>>,
    stack: RefCell<Vec<String>>,
}

/// Creates objects from configuration sections.
///
/// A section names its class with `class_name`; every other option becomes a
/// constructor keyword. String options are either directives, which the
/// registered reference modules resolve (often recursively through this
/// factory), or literals, which are coerced.
///
/// ```ini
/// [car]
/// class_name = vehicles.Car
/// engine = instance: engine
/// maker = call({'param': {'attribute': 'company_name'}}): factory
/// ```
///
/// Handles are cheap to clone and share one instance cache.
#[derive(Clone)]
pub struct ObjectFactory {
    inner: Rc<FactoryInner>,
}

/// Configures an [`ObjectFactory`].
pub struct ObjectFactoryBuilder {
    config: ConfigHandle,
    pattern: String,
    default_name: String,
    resolver: Option<Rc<dyn ClassResolver>>,
    modules: Option<Rc<ModuleRegistry>>,
    shared: bool,
    reload: bool,
    reload_pattern: Option<Regex>,
    strict: bool,
    max_depth: usize,
}

impl ObjectFactoryBuilder {
    /// Maps object names to section names; `{name}` is replaced by the object name.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// The object name used when none is given.
    pub fn default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    /// Resolves class names; defaults to a resolver that knows only `Settings`.
    pub fn resolver(mut self, resolver: impl ClassResolver + 'static) -> Self {
        self.resolver = Some(Rc::new(resolver));
        self
    }

    /// Like [`resolver`](Self::resolver), for a resolver shared with other factories.
    pub fn shared_resolver(mut self, resolver: Rc<dyn ClassResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The reference modules directives resolve through; the built-ins by default.
    pub fn modules(mut self, modules: Rc<ModuleRegistry>) -> Self {
        self.modules = Some(modules);
        self
    }

    /// Whether built instances are cached; on by default.
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Ask the class resolver to reload every class it resolves.
    pub fn reload(mut self, reload: bool) -> Self {
        self.reload = reload;
        self
    }

    /// Ask for a reload of classes whose names match `pattern`.
    pub fn reload_pattern(mut self, pattern: Regex) -> Self {
        self.reload_pattern = Some(pattern);
        self
    }

    /// Report missing sections as configuration errors instead of "no such entry".
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Deepest allowed nesting of object construction.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Creates the factory with an empty cache.
    pub fn build(self) -> ObjectFactory {
        ObjectFactory {
            inner: Rc::new(FactoryInner {
                config: self.config,
                pattern: self.pattern,
                default_name: self.default_name,
                resolver: self
                    .resolver
                    .unwrap_or_else(|| Rc::new(DictionaryClassResolver::new())),
                modules: self.modules.unwrap_or_default(),
                settings: Rc::new(ClassDef::settings()),
                shared: self.shared,
                reload: self.reload,
                reload_pattern: self.reload_pattern,
                strict: self.strict,
                max_depth: self.max_depth,
                cache: RefCell::new(IndexMap::new()),
                stack: RefCell::new(Vec::new()),
            }),
        }
    }
}

impl fmt::Debug for ObjectFactoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFactoryBuilder")
            .field("pattern", &self.pattern)
            .field("default_name", &self.default_name)
            .field("shared", &self.shared)
            .field("strict", &self.strict)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl ObjectFactory {
    pub fn builder(config: ConfigHandle) -> ObjectFactoryBuilder {
        ObjectFactoryBuilder {
            config,
            pattern: DEFAULT_PATTERN.to_string(),
            default_name: DEFAULT_NAME.to_string(),
            resolver: None,
            modules: None,
            shared: true,
            reload: false,
            reload_pattern: None,
            strict: false,
            max_depth: MAX_CONSTRUCTION_DEPTH,
        }
    }

    /// A factory over `config` resolving classes with `resolver`.
    pub fn new(config: impl Configurable + 'static, resolver: impl ClassResolver + 'static) -> Self {
        Self::builder(Rc::new(config)).resolver(resolver).build()
    }

    pub fn config(&self) -> ConfigHandle {
        Rc::clone(&self.inner.config)
    }

    pub fn pattern(&self) -> &str {
        &self.inner.pattern
    }

    pub fn default_name(&self) -> &str {
        &self.inner.default_name
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.inner.modules
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// A factory with the same configuration and registries but an empty cache.
    pub fn fresh(&self) -> Self {
        let inner = &self.inner;
        Self {
            inner: Rc::new(FactoryInner {
                config: Rc::clone(&inner.config),
                pattern: inner.pattern.clone(),
                default_name: inner.default_name.clone(),
                resolver: Rc::clone(&inner.resolver),
                modules: Rc::clone(&inner.modules),
                settings: Rc::clone(&inner.settings),
                shared: inner.shared,
                reload: inner.reload,
                reload_pattern: inner.reload_pattern.clone(),
                strict: inner.strict,
                max_depth: inner.max_depth,
                cache: RefCell::new(IndexMap::new()),
                stack: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The resolution context over the factory's own configuration.
    pub fn context(&self) -> FactoryContext {
        FactoryContext {
            factory: self.clone(),
            config: self.config(),
            sharing: Sharing::Shared,
            reload: false,
        }
    }

    // --- PUBLIC API ---

    /// Returns the shared instance for `name` (default name when `None`),
    /// building and caching it on first use.
    pub fn instance(&self, name: Option<&str>) -> FactoryResult<Instance> {
        self.instance_with(name, Params::default())
    }

    /// Like [`ObjectFactory::instance`]; `params` only apply when the
    /// instance is not cached yet.
    pub fn instance_with(&self, name: Option<&str>, params: Params) -> FactoryResult<Instance> {
        self.context().instance(self.name_or_default(name), params)
    }

    /// Builds `name` and downcasts it.
    pub fn instance_of<T: Any>(&self, name: &str) -> FactoryResult<Rc<T>> {
        let inst = self.instance(Some(name))?;
        inst.downcast::<T>().ok_or_else(|| FactoryError::WrongType {
            name: name.to_string(),
            expected: type_name::<T>(),
            found: inst.type_name(),
            file: InFile::of(self.inner.config.as_ref()),
        })
    }

    /// Builds a new instance without reading or writing the cache entry for
    /// `name`; dependencies are still shared.
    pub fn new_instance(&self, name: Option<&str>) -> FactoryResult<Instance> {
        self.new_instance_with(name, Params::default())
    }

    pub fn new_instance_with(&self, name: Option<&str>, params: Params) -> FactoryResult<Instance> {
        self.context().new_instance(self.name_or_default(name), params)
    }

    /// Builds a new instance whose whole dependency graph is built fresh.
    pub fn new_deep_instance(&self, name: Option<&str>) -> FactoryResult<Instance> {
        self.new_deep_instance_with(name, Params::default())
    }

    pub fn new_deep_instance_with(&self, name: Option<&str>, params: Params) -> FactoryResult<Instance> {
        self.context().new_deep_instance(self.name_or_default(name), params)
    }

    /// Removes `name` from the cache, returning the evicted instance.
    pub fn clear_instance(&self, name: &str) -> Option<Instance> {
        let evicted = self.inner.cache.borrow_mut().shift_remove(name);
        if evicted.is_some() {
            log::debug!("evicted instance '{}'", name);
        }
        evicted
    }

    /// Empties the cache.
    pub fn clear(&self) {
        self.inner.cache.borrow_mut().clear();
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.inner.cache.borrow().contains_key(name)
    }

    pub fn cached_names(&self) -> Vec<String> {
        self.inner.cache.borrow().keys().cloned().collect()
    }

    /// Resolves the class `name` would be built with, without building it.
    pub fn get_class(&self, name: Option<&str>) -> FactoryResult<Rc<ClassDef>> {
        let ctx = self.context();
        let name = self.name_or_default(name);
        let section = self.section_name(name);
        let (class_name, options) = ctx.section_options(&section)?;
        match class_name {
            Some(class_name) => ctx.find_class(&section, &class_name),
            None if options.is_empty() => Err(ctx.no_such_entry(name)),
            None => Ok(Rc::clone(&self.inner.settings)),
        }
    }

    /// Resolves a single directive string; other strings are returned unchanged.
    pub fn from_config_string(&self, value: &str) -> FactoryResult<Value> {
        let ctx = self.context();
        match self.inner.modules.parse(value) {
            Ok(Some((directive, module))) => {
                module.resolve(&directive, &ctx.with_reload(directive.reload()))
            }
            Ok(None) => Ok(Value::Str(value.to_string())),
            Err(source) => Err(FactoryError::Directive {
                section: String::new(),
                option: value.to_string(),
                file: ctx.in_file(),
                source,
            }),
        }
    }

    // --- INTERNALS ---

    fn name_or_default<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        name.unwrap_or(&self.inner.default_name)
    }

    fn section_name(&self, name: &str) -> String {
        self.inner.pattern.replace("{name}", name)
    }

    fn cached(&self, name: &str) -> Option<Instance> {
        if !self.inner.shared {
            return None;
        }
        self.inner.cache.borrow().get(name).cloned()
    }

    fn store(&self, name: &str, inst: &Instance) {
        if self.inner.shared {
            self.inner
                .cache
                .borrow_mut()
                .insert(name.to_string(), inst.clone());
        }
    }

    /// Pushes `name` on the construction stack; the frame pops when dropped.
    fn enter(&self, name: &str, file: &InFile) -> FactoryResult<Frame<'_>> {
        let mut stack = self.inner.stack.borrow_mut();
        if stack.iter().any(|n| n == name) {
            let mut cycle = stack.clone();
            cycle.push(name.to_string());
            return Err(FactoryError::CircularDependency {
                name: name.to_string(),
                cycle_path: cycle.join(" -> "),
                file: file.clone(),
            });
        }
        if stack.len() >= self.inner.max_depth {
            return Err(FactoryError::MaxRecursionDepth {
                depth: self.inner.max_depth,
                name: name.to_string(),
                file: file.clone(),
            });
        }
        stack.push(name.to_string());
        drop(stack);
        Ok(scopeguard::guard(
            &self.inner.stack,
            pop_frame as fn(&RefCell<Vec<String>>),
        ))
    }
}

impl fmt::Debug for ObjectFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFactory")
            .field("pattern", &self.inner.pattern)
            .field("default_name", &self.inner.default_name)
            .field("resolver", &self.inner.resolver)
            .field("shared", &self.inner.shared)
            .field("cached", &self.cached_names())
            .finish()
    }
}

// --- RESOLUTION CONTEXT ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sharing {
    Shared,
    /// Nothing in this construction reads or writes the cache.
    Deep,
}

/// The state a reference module resolves against: the factory, the
/// configuration currently in scope and the sharing mode.
///
/// Tree directives resolve against a derived configuration by creating a
/// child context; the factory itself is never modified.
#[derive(Debug, Clone)]
pub struct FactoryContext {
    factory: ObjectFactory,
    config: ConfigHandle,
    sharing: Sharing,
    reload: bool,
}

impl FactoryContext {
    pub fn factory(&self) -> &ObjectFactory {
        &self.factory
    }

    /// The configuration in scope.
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// A child context reading from `config`.
    pub fn with_config(&self, config: ConfigHandle) -> Self {
        Self {
            config,
            ..self.clone()
        }
    }

    /// A child context that requests class reloads when `reload` is set.
    pub fn with_reload(&self, reload: bool) -> Self {
        Self {
            reload: self.reload || reload,
            ..self.clone()
        }
    }

    pub fn in_file(&self) -> InFile {
        InFile::of(self.config.as_ref())
    }

    pub fn module_error(&self, module: &str, reference: &str, reason: impl Into<String>) -> FactoryError {
        FactoryError::Module {
            module: module.to_string(),
            reference: reference.to_string(),
            reason: reason.into(),
            file: self.in_file(),
        }
    }

    pub fn instance(&self, name: &str, params: Params) -> FactoryResult<Instance> {
        if self.sharing == Sharing::Shared {
            if let Some(inst) = self.factory.cached(name) {
                log::trace!("using cached instance '{}'", name);
                return Ok(inst);
            }
        }
        let inst = self.create(name, params)?;
        if self.sharing == Sharing::Shared {
            self.factory.store(name, &inst);
        }
        Ok(inst)
    }

    pub fn new_instance(&self, name: &str, params: Params) -> FactoryResult<Instance> {
        self.create(name, params)
    }

    pub fn new_deep_instance(&self, name: &str, params: Params) -> FactoryResult<Instance> {
        Self {
            sharing: Sharing::Deep,
            ..self.clone()
        }
        .create(name, params)
    }

    /// Dispatches on a directive's `share` setting.
    pub fn share(&self, share: Share, name: &str, params: Params) -> FactoryResult<Instance> {
        match share {
            Share::Default => self.instance(name, params),
            Share::Evict => self.new_instance(name, params),
            Share::Deep => self.new_deep_instance(name, params),
        }
    }

    /// Builds a class directly from keyword arguments, without any section,
    /// injection or caching.
    pub fn create_object(&self, class_name: &str, params: Params) -> FactoryResult<Instance> {
        let class = self.find_class(class_name, class_name)?;
        let Params { args, kwargs } = params;
        self.construct(class_name, &class, args, kwargs, false)
    }

    // --- INSTANTIATION STEPS ---

    fn create(&self, name: &str, params: Params) -> FactoryResult<Instance> {
        let file = self.in_file();
        let _frame = self.factory.enter(name, &file)?;
        let start = Instant::now();
        let section = self.factory.section_name(name);
        let Params { args, mut kwargs } = params;

        let (section_class, options) = self.section_options(&section)?;
        let class_name = match kwargs.shift_remove(CLASS_NAME) {
            Some(Value::Str(s)) => Some(s),
            Some(other) => Some(other.to_string()),
            None => section_class,
        };
        let class = match &class_name {
            Some(class_name) => self.find_class(&section, class_name)?,
            None if options.is_empty() => return Err(self.no_such_entry(name)),
            None => Rc::clone(&self.factory.inner.settings),
        };

        let mut resolved = self.resolve_options(&section, options)?;
        resolved.extend(kwargs);
        let inst = self.construct(name, &class, args, resolved, true)?;
        log::debug!(
            "created {} instance of {} in {:.2?}",
            name,
            class.name(),
            start.elapsed()
        );
        Ok(inst)
    }

    fn no_such_entry(&self, name: &str) -> FactoryError {
        FactoryError::NoSuchEntry {
            name: name.to_string(),
            file: self.in_file(),
        }
    }

    /// The section's `class_name` and its remaining raw options. A missing
    /// section reads as empty unless the factory is strict.
    fn section_options(&self, section: &str) -> FactoryResult<(Option<String>, Options)> {
        let mut options = match self.config.get_options(section) {
            Ok(options) => options,
            Err(ConfigError::NoSection { .. }) if !self.factory.inner.strict => IndexMap::new(),
            Err(source) => {
                return Err(FactoryError::Populate {
                    section: section.to_string(),
                    file: self.in_file(),
                    source,
                });
            }
        };
        let class_name = options.shift_remove(CLASS_NAME).map(|v| match v {
            Value::Str(s) => s,
            other => other.to_string(),
        });
        Ok((class_name, options))
    }

    fn find_class(&self, section: &str, class_name: &str) -> FactoryResult<Rc<ClassDef>> {
        let inner = &self.factory.inner;
        let reload = self.reload
            || inner.reload
            || inner
                .reload_pattern
                .as_ref()
                .is_some_and(|re| re.is_match(class_name));
        if reload {
            log::info!("reloading class {}", class_name);
        }
        inner
            .resolver
            .find_class(class_name, reload)
            .map_err(|source| FactoryError::Class {
                section: section.to_string(),
                class_name: class_name.to_string(),
                file: self.in_file(),
                source,
            })
    }

    fn resolve_options(&self, section: &str, options: Options) -> FactoryResult<IndexMap<String, Value>> {
        let mut resolved = IndexMap::with_capacity(options.len());
        for (option, value) in options {
            let value = match value {
                Value::Str(raw) => self.resolve_string(section, &option, &raw)?,
                other => other,
            };
            resolved.insert(option, value);
        }
        Ok(resolved)
    }

    /// Resolves a directive, or coerces a literal.
    fn resolve_string(&self, section: &str, option: &str, raw: &str) -> FactoryResult<Value> {
        let parsed = self
            .factory
            .inner
            .modules
            .parse(raw)
            .map_err(|source| FactoryError::Directive {
                section: section.to_string(),
                option: option.to_string(),
                file: self.in_file(),
                source,
            })?;
        match parsed {
            Some((directive, module)) => {
                log::trace!("resolving {}:{} = {}", section, option, directive);
                module
                    .resolve(&directive, &self.with_reload(directive.reload()))
                    .map_err(|source| FactoryError::Reference {
                        section: section.to_string(),
                        option: option.to_string(),
                        directive: directive.to_string(),
                        file: self.in_file(),
                        source: Box::new(source),
                    })
            }
            None => coerce(raw).map_err(|source| FactoryError::Literal {
                section: section.to_string(),
                option: option.to_string(),
                file: self.in_file(),
                source,
            }),
        }
    }

    /// Binds positional arguments, injects framework parameters, checks
    /// keywords and runs the constructor.
    fn construct(
        &self,
        name: &str,
        class: &ClassDef,
        args: Vec<Value>,
        mut kwargs: IndexMap<String, Value>,
        inject: bool,
    ) -> FactoryResult<Instance> {
        let fail = |source: anyhow::Error, kwargs: &IndexMap<String, Value>| FactoryError::Construct {
            section: name.to_string(),
            class_name: class.name().to_string(),
            args: describe_arguments(kwargs),
            file: self.in_file(),
            source,
        };

        if !args.is_empty() {
            let Parameters::Named(names) = class.parameters() else {
                return Err(fail(anyhow!("takes no positional arguments"), &kwargs));
            };
            if args.len() > names.len() {
                return Err(fail(
                    anyhow!(
                        "takes {} positional arguments but {} were given",
                        names.len(),
                        args.len()
                    ),
                    &kwargs,
                ));
            }
            for (param, value) in names.iter().zip(args) {
                if kwargs.contains_key(param) {
                    return Err(fail(
                        anyhow!("got multiple values for argument '{}'", param),
                        &kwargs,
                    ));
                }
                kwargs.insert(param.clone(), value);
            }
        }

        if inject {
            if class.declares(NAME_ATTRIBUTE) && !kwargs.contains_key(NAME_ATTRIBUTE) {
                kwargs.insert(NAME_ATTRIBUTE.to_string(), Value::Str(name.to_string()));
            }
            if class.declares(CONFIG_ATTRIBUTE) && !kwargs.contains_key(CONFIG_ATTRIBUTE) {
                kwargs.insert(CONFIG_ATTRIBUTE.to_string(), Value::Config(self.config.clone()));
            }
            if class.declares(CONFIG_FACTORY_ATTRIBUTE) && !kwargs.contains_key(CONFIG_FACTORY_ATTRIBUTE) {
                kwargs.insert(
                    CONFIG_FACTORY_ATTRIBUTE.to_string(),
                    Value::Factory(self.factory.clone()),
                );
            }
        }

        if let Some(unknown) = kwargs.keys().find(|k| !class.accepts(k)) {
            return Err(fail(
                anyhow!("got an unexpected keyword argument '{}'", unknown),
                &kwargs,
            ));
        }

        let args_repr = describe_arguments(&kwargs);
        let mut arguments = Arguments::new(name, kwargs);
        let inst = class
            .construct(&mut arguments)
            .map_err(|source| FactoryError::Construct {
                section: name.to_string(),
                class_name: class.name().to_string(),
                args: args_repr,
                file: self.in_file(),
                source,
            })?;
        class.notify(&inst, FactoryState::Created);
        Ok(inst)
    }
}

// MARK: --- UNIT TESTS ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::loader,
        core::{class_resolver::ImportClassResolver, testing::*},
        models::Settings,
    };
    use std::fs;
    use tempfile::tempdir;

    const GARAGE: &str = r#"
[factory]
class_name = garage.PartFactory

[car]
class_name = garage.Car
engine = call({'param': {'method': 'create', 'part_name': 'engine'}}): factory
transmission = call: factory
maker = call({'param': {'attribute': 'company_name'}}): factory

[bob]
class_name = garage.Person
first = Bob
age = 42

[bob_co]
class_name = garage.Company
boss = instance: bob

[db]
host = localhost
port = 5432

[empty]
"#;

    fn bag(inst: &Instance) -> &IndexMap<String, Value> {
        &inst.downcast_ref::<Bag>().unwrap().values
    }

    fn object(value: Option<&Value>) -> &Instance {
        value.and_then(Value::as_object).unwrap()
    }

    #[test]
    fn test_call_directives_build_car() {
        // --- Setup ---
        let factory = ini_factory(GARAGE);

        // --- Execute ---
        let car = factory.instance_of::<Car>("car").unwrap();

        // --- Assert ---
        assert_eq!(car.engine.kind, "v8");
        assert_eq!(car.transmission.gears, 6);
        assert_eq!(car.maker, "fix or repair daily");
        assert!(factory.is_cached("factory"));
        assert!(factory.is_cached("car"));
    }

    #[test]
    fn test_separate_constructions_share_dependencies() {
        // --- Setup ---
        let factory = ini_factory(GARAGE);

        // --- Execute ---
        let a = factory.new_instance(Some("bob_co")).unwrap();
        let b = factory.new_instance(Some("bob_co")).unwrap();

        // --- Assert ---
        assert!(!a.ptr_eq(&b));
        let (a, b) = (a.downcast::<Company>().unwrap(), b.downcast::<Company>().unwrap());
        assert!(Rc::ptr_eq(&a.boss, &b.boss));
        assert_eq!(a.boss.first, "Bob");
        assert_eq!(a.boss.age, 42);
        assert_eq!(a.boss.name, "bob");
        assert!(!factory.is_cached("bob_co"));
        assert!(factory.is_cached("bob"));
    }

    #[test]
    fn test_section_without_class_builds_settings() {
        let factory = ini_factory(GARAGE);
        let db = factory.instance(Some("db")).unwrap();
        let settings = db.downcast_ref::<Settings>().unwrap();
        assert_eq!(settings.get("host"), Some(&Value::from("localhost")));
        assert_eq!(settings.get("port"), Some(&Value::Int(5432)));
        let invoker = db.as_invoke().unwrap();
        assert_eq!(invoker.attribute("port"), Some(Value::Int(5432)));
    }

    #[test]
    fn test_missing_or_empty_entry_is_no_such_entry() {
        // --- Setup ---
        let factory = ini_factory(GARAGE);

        // --- Execute & Assert ---
        for name in ["nothing", "empty"] {
            let err = factory.instance(Some(name)).unwrap_err();
            assert!(matches!(err, FactoryError::NoSuchEntry { .. }));
            assert_eq!(err.to_string(), format!("No such entry: '{}'", name));
        }
        assert!(matches!(
            factory.instance(None).unwrap_err(),
            FactoryError::NoSuchEntry { ref name, .. } if name == "default"
        ));
    }

    #[test]
    fn test_strict_factory_reports_missing_sections() {
        let config = loader::from_ini_str(GARAGE).unwrap();
        let factory = ObjectFactory::builder(Rc::new(config))
            .resolver(resolver())
            .strict(true)
            .build();
        let err = factory.instance(Some("nothing")).unwrap_err();
        assert!(matches!(
            err,
            FactoryError::Populate {
                source: ConfigError::NoSection { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_cache_hit_is_identical_regardless_of_overrides() {
        // --- Setup ---
        let factory = ini_factory(GARAGE);

        // --- Execute ---
        let first = factory.instance(Some("bob")).unwrap();
        let second = factory
            .instance_with(Some("bob"), Params::new().kwarg("age", 7))
            .unwrap();

        // --- Assert ---
        assert!(first.ptr_eq(&second));
        assert_eq!(second.downcast_ref::<Person>().unwrap().age, 42);
        assert_eq!(factory.cached_names(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_new_instance_is_fresh_and_uncached() {
        let factory = ini_factory(GARAGE);
        let fresh = factory
            .new_instance_with(Some("bob"), Params::new().kwarg("age", 7))
            .unwrap();
        assert_eq!(fresh.downcast_ref::<Person>().unwrap().age, 7);
        assert!(!factory.is_cached("bob"));

        let shared = factory.instance(Some("bob")).unwrap();
        assert!(!shared.ptr_eq(&fresh));
        assert!(!factory.new_instance(Some("bob")).unwrap().ptr_eq(&shared));
        assert!(factory.instance(Some("bob")).unwrap().ptr_eq(&shared));
    }

    #[test]
    fn test_deep_instance_rebuilds_dependencies() {
        // --- Setup ---
        let factory = ini_factory(GARAGE);
        let bob = factory.instance_of::<Person>("bob").unwrap();

        // --- Execute ---
        let deep = factory.new_deep_instance(Some("bob_co")).unwrap();

        // --- Assert ---
        let company = deep.downcast::<Company>().unwrap();
        assert!(!Rc::ptr_eq(&company.boss, &bob));
        assert_eq!(factory.cached_names(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_share_modes_in_directives() {
        // --- Setup ---
        let content = format!(
            "{}\n[team]\nclass_name = garage.Bag\nshared = instance: bob\nevicted = instance({{'share': 'evict'}}): bob\ndeep = instance({{'share': 'deep'}}): bob_co\n",
            GARAGE
        );
        let factory = ini_factory(&content);
        let bob = factory.instance(Some("bob")).unwrap();

        // --- Execute ---
        let team = factory.instance(Some("team")).unwrap();

        // --- Assert ---
        let values = bag(&team);
        assert!(object(values.get("shared")).ptr_eq(&bob));
        assert!(!object(values.get("evicted")).ptr_eq(&bob));
        let deep = object(values.get("deep")).downcast::<Company>().unwrap();
        assert!(!Rc::ptr_eq(&deep.boss, &bob.downcast::<Person>().unwrap()));
        assert!(!factory.is_cached("bob_co"));
    }

    #[test]
    fn test_directive_param_strings_are_coerced() {
        // --- Setup ---
        let content = format!(
            "{}\n[holder]\nclass_name = garage.Bag\nyoung = instance({{'share': 'evict', 'param': {{'age': '7'}}}}): bob\n",
            GARAGE
        );
        let factory = ini_factory(&content);

        // --- Execute ---
        let holder = factory.instance(Some("holder")).unwrap();

        // --- Assert ---
        let young = object(bag(&holder).get("young")).downcast::<Person>().unwrap();
        assert_eq!(young.age, 7);
        assert_eq!(young.first, "Bob");
    }

    #[test]
    fn test_instance_lists_and_maps() {
        let content = format!(
            "{}\n[crew]\nclass_name = garage.Bag\nmembers = instance: list: bob, db\nby_role = instance: dict: {{'boss': 'bob'}}\n",
            GARAGE
        );
        let factory = ini_factory(&content);
        let crew = factory.instance(Some("crew")).unwrap();
        let values = bag(&crew);

        let members = values.get("members").and_then(Value::as_list).unwrap();
        assert_eq!(members.len(), 2);
        assert!(object(members.first()).is::<Person>());
        assert!(object(members.get(1)).is::<Settings>());

        let by_role = values.get("by_role").and_then(Value::as_map).unwrap();
        let bob = factory.instance(Some("bob")).unwrap();
        assert!(object(by_role.get("boss")).ptr_eq(&bob));
    }

    #[test]
    fn test_alias_object_and_asdict_modules() {
        // --- Setup ---
        let content = format!(
            "{}\n[choice]\nvehicle = car\n\n[slot]\nclass_name = garage.Bag\nparked = alias: choice:vehicle\npart = object({{'param': {{'company_name': 'acme'}}}}): garage.PartFactory\ndb = asdict: db\n",
            GARAGE
        );
        let factory = ini_factory(&content);

        // --- Execute ---
        let slot = factory.instance(Some("slot")).unwrap();

        // --- Assert ---
        let values = bag(&slot);
        assert!(object(values.get("parked")).ptr_eq(&factory.instance(Some("car")).unwrap()));
        let part = object(values.get("part")).downcast::<PartFactory>().unwrap();
        assert_eq!(part.company_name, "acme");
        assert!(!factory.cached_names().iter().any(|n| n.contains("PartFactory")));
        let db = values.get("db").and_then(Value::as_map).unwrap();
        assert_eq!(db.get("port"), Some(&Value::Int(5432)));
    }

    #[test]
    fn test_asdict_rejects_classed_sections() {
        let content = format!("{}\n[holder]\nclass_name = garage.Bag\nperson = asdict: bob\n", GARAGE);
        let factory = ini_factory(&content);
        let err = factory.instance(Some("holder")).unwrap_err();
        assert!(matches!(err.root_cause(), FactoryError::Module { module, .. } if module == "asdict"));
    }

    #[test]
    fn test_call_failures_are_reported() {
        let content = format!(
            "{}\n[broken]\nclass_name = garage.Bag\na = call({{'param': {{'method': 'create', 'part_name': 'wheel'}}}}): factory\n\n[missing]\nclass_name = garage.Bag\nb = call({{'param': {{'method': 'destroy'}}}}): factory\n\n[plain]\nclass_name = garage.Bag\nc = call: bob\n",
            GARAGE
        );
        let factory = ini_factory(&content);

        let err = factory.instance(Some("broken")).unwrap_err();
        assert!(matches!(err, FactoryError::Reference { ref option, .. } if option == "a"));
        assert!(matches!(err.root_cause(), FactoryError::Invoke { member, .. } if member == "create"));
        assert!(err.to_string().contains("no such part: wheel"));

        let err = factory.instance(Some("missing")).unwrap_err();
        assert!(err.to_string().contains("has no method 'destroy'"));

        let err = factory.instance(Some("plain")).unwrap_err();
        assert!(err.to_string().contains("exposes no members"));
    }

    #[test]
    fn test_positional_arguments_and_injection() {
        // --- Setup ---
        let config = loader::from_ini_str("[gadget_widget]\nclass_name = garage.Widget\n").unwrap();
        let factory = ObjectFactory::builder(Rc::new(config))
            .resolver(resolver())
            .pattern("{name}_widget")
            .build();

        // --- Execute ---
        let inst = factory
            .instance_with(Some("gadget"), Params::new().arg(1).arg("two"))
            .unwrap();

        // --- Assert ---
        let widget = inst.downcast_ref::<Widget>().unwrap();
        assert_eq!(widget.param1, Value::Int(1));
        assert_eq!(widget.param2, Value::from("two"));
        assert_eq!(widget.name, "gadget");
        assert!(
            widget
                .config
                .as_ref()
                .is_some_and(|c| Rc::ptr_eq(c, &factory.config()))
        );
        assert!(widget.factory.as_ref().is_some_and(|f| f.ptr_eq(&factory)));
        factory.clear();
    }

    #[test]
    fn test_explicit_values_win_over_injection() {
        let factory = ini_factory("[w]\nclass_name = garage.Widget\nname = custom\n");
        let inst = factory.new_instance(Some("w")).unwrap();
        assert_eq!(inst.downcast_ref::<Widget>().unwrap().name, "custom");
    }

    #[test]
    fn test_bad_arguments_are_construct_errors() {
        let factory = ini_factory("[w]\nclass_name = garage.Widget\ncolour = red\n\n[p]\nclass_name = garage.Person\n");

        let err = factory.instance(Some("w")).unwrap_err();
        assert!(matches!(err, FactoryError::Construct { .. }));
        assert!(err.to_string().contains("unexpected keyword argument 'colour'"));

        let err = factory
            .instance_with(Some("p"), Params::new().arg(1).arg(2).arg(3).arg(4))
            .unwrap_err();
        assert!(err.to_string().contains("takes 3 positional arguments but 4 were given"));

        let err = factory
            .instance_with(Some("p"), Params::new().arg("Ann").kwarg("first", "Bo"))
            .unwrap_err();
        assert!(err.to_string().contains("multiple values for argument 'first'"));
    }

    #[test]
    fn test_construct_error_carries_section_class_and_file() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("fuses.conf");
        fs::write(&path, "[fuse]\nclass_name = garage.Fuse\namps = 30\n").unwrap();
        let factory = ObjectFactory::new(loader::load_path(&path).unwrap(), resolver());

        // --- Execute ---
        let err = factory.instance(Some("fuse")).unwrap_err();

        // --- Assert ---
        let canonical = dunce::canonicalize(&path).unwrap();
        assert_eq!(err.section(), "fuse");
        assert_eq!(err.file(), &InFile(Some(canonical.clone())));
        assert_eq!(
            err.to_string(),
            format!(
                "Can not create 'fuse' for class garage.Fuse({{'amps': 30}}): blown at 30 amps, in file: {}",
                canonical.display()
            )
        );
        assert!(!factory.is_cached("fuse"));
    }

    #[test]
    fn test_class_resolution_errors_name_the_section() {
        let factory = ini_factory("[ghost]\nclass_name = garage.Ghost\n");
        let err = factory.instance(Some("ghost")).unwrap_err();
        assert!(matches!(
            err,
            FactoryError::Class {
                source: ClassResolutionError::NotInModule { .. },
                ..
            }
        ));
        assert_eq!(err.section(), "ghost");
    }

    #[test]
    fn test_directive_and_literal_errors_name_the_option() {
        let factory = ini_factory(&format!(
            "{}\n[bad]\nclass_name = garage.Bag\nx = instance({{'cache': 1}}): bob\n\n[worse]\nclass_name = garage.Bag\ny = eval: [1,\n",
            GARAGE
        ));
        let err = factory.instance(Some("bad")).unwrap_err();
        assert!(
            matches!(err, FactoryError::Directive { ref section, ref option, .. } if section == "bad" && option == "x")
        );
        let err = factory.instance(Some("worse")).unwrap_err();
        assert!(matches!(err, FactoryError::Literal { ref option, .. } if option == "y"));
    }

    #[test]
    fn test_circular_references_are_detected() {
        // --- Setup ---
        let factory = ini_factory(
            "[a]\nclass_name = garage.Bag\npeer = instance: b\n\n[b]\nclass_name = garage.Bag\npeer = instance: a\n\n[c]\nclass_name = garage.Bag\n",
        );

        // --- Execute ---
        let err = factory.instance(Some("a")).unwrap_err();

        // --- Assert ---
        match err.root_cause() {
            FactoryError::CircularDependency { cycle_path, .. } => assert_eq!(cycle_path, "a -> b -> a"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(factory.cached_names().is_empty());
        assert!(factory.instance(Some("c")).is_ok());
    }

    fn chain(length: usize) -> String {
        let mut content = String::new();
        for i in 0..length {
            content.push_str(&format!("[s{}]\nclass_name = garage.Bag\nnext = instance: s{}\n\n", i, i + 1));
        }
        content.push_str(&format!("[s{}]\nclass_name = garage.Bag\n", length));
        content
    }

    #[test]
    fn test_deep_acyclic_chains_are_built() {
        // --- Setup ---
        let factory = ini_factory(&chain(40));

        // --- Execute ---
        let head = factory.instance(Some("s0")).unwrap();

        // --- Assert ---
        assert!(head.downcast_ref::<Bag>().unwrap().values.contains_key("next"));
        assert!(factory.is_cached("s40"));
    }

    #[test]
    fn test_runaway_nesting_hits_the_depth_limit() {
        let config = loader::from_ini_str(&chain(12)).unwrap();
        let factory = ObjectFactory::builder(Rc::new(config))
            .resolver(resolver())
            .max_depth(8)
            .build();
        let err = factory.instance(Some("s0")).unwrap_err();
        assert!(matches!(
            err.root_cause(),
            FactoryError::MaxRecursionDepth { depth: 8, .. }
        ));
        assert!(factory.instance(Some("s5")).is_ok());
    }

    #[test]
    fn test_observers_are_notified_once_per_construction() {
        let factory = ini_factory("[tracker]\nclass_name = garage.Tracker\n");
        let tracker = factory.instance_of::<Tracker>("tracker").unwrap();
        assert_eq!(tracker.created.get(), 1);
        let again = factory.instance_of::<Tracker>("tracker").unwrap();
        assert_eq!(again.created.get(), 1);
        let fresh = factory.new_instance(Some("tracker")).unwrap();
        assert_eq!(fresh.downcast_ref::<Tracker>().unwrap().created.get(), 1);
    }

    #[test]
    fn test_tree_directive_builds_nested_sections() {
        // --- Setup ---
        let factory = yaml_factory(
            r#"
data:
  person:
    class_name: garage.Person
    first: Paul
    age: 20
people:
  class_name: garage.Bag
  paul: "tree({'param': {'name': 'data.person', 'age': 25}}): data"
"#,
        );
        let before = factory.config();
        let sections = before.sections();

        // --- Execute ---
        let people = factory.instance(Some("people")).unwrap();

        // --- Assert ---
        let paul = object(bag(&people).get("paul")).downcast::<Person>().unwrap();
        assert_eq!(paul.first, "Paul");
        assert_eq!(paul.age, 25);
        assert_eq!(paul.name, "data.person");
        assert!(Rc::ptr_eq(&before, &factory.config()));
        assert_eq!(factory.config().sections(), sections);
        assert!(factory.is_cached("data.person"));
    }

    #[test]
    fn test_failed_tree_directive_leaves_config_untouched() {
        let factory = yaml_factory(
            r#"
people:
  class_name: garage.Bag
  nobody: "tree({'param': {'name': 'nowhere.person'}}): nowhere"
"#,
        );
        let before = factory.config();
        let err = factory.instance(Some("people")).unwrap_err();
        assert!(err.to_string().contains("No section to treeify: 'nowhere'"));
        assert!(Rc::ptr_eq(&before, &factory.config()));
        assert_eq!(factory.config().sections(), vec!["people".to_string()]);
    }

    #[test]
    fn test_get_class_and_from_config_string() {
        let factory = ini_factory(GARAGE);
        assert_eq!(factory.get_class(Some("car")).unwrap().name(), "garage.Car");
        assert_eq!(factory.get_class(Some("db")).unwrap().name(), "Settings");
        assert!(matches!(
            factory.get_class(Some("nothing")),
            Err(FactoryError::NoSuchEntry { .. })
        ));
        assert!(factory.cached_names().is_empty());

        let bob = factory.from_config_string("instance: bob").unwrap();
        assert!(bob.as_object().unwrap().ptr_eq(&factory.instance(Some("bob")).unwrap()));
        assert_eq!(factory.from_config_string("plain").unwrap(), Value::from("plain"));
    }

    #[test]
    fn test_clear_instance_and_fresh() {
        let factory = ini_factory(GARAGE);
        let bob = factory.instance(Some("bob")).unwrap();
        assert!(factory.clear_instance("bob").unwrap().ptr_eq(&bob));
        assert!(factory.clear_instance("bob").is_none());
        assert!(!factory.instance(Some("bob")).unwrap().ptr_eq(&bob));

        let fresh = factory.fresh();
        assert!(!fresh.ptr_eq(&factory));
        assert!(fresh.cached_names().is_empty());
        assert!(Rc::ptr_eq(&fresh.config(), &factory.config()));
    }

    #[test]
    fn test_unshared_factory_never_caches() {
        let config = loader::from_ini_str(GARAGE).unwrap();
        let factory = ObjectFactory::builder(Rc::new(config))
            .resolver(resolver())
            .shared(false)
            .build();
        let a = factory.instance(Some("bob")).unwrap();
        let b = factory.instance(Some("bob")).unwrap();
        assert!(!a.ptr_eq(&b));
        assert!(factory.cached_names().is_empty());
    }

    #[test]
    fn test_reload_requests_reach_the_resolver() {
        // --- Setup ---
        let content = format!(
            "{}\n[reloader]\nclass_name = garage.Bag\nfresh = instance({{'reload': True, 'share': 'evict'}}): bob\n",
            GARAGE
        );
        let resolver = Rc::new(resolver());
        let factory = ObjectFactory::builder(Rc::new(loader::from_ini_str(&content).unwrap()))
            .shared_resolver(resolver.clone())
            .build();

        // --- Execute ---
        factory.instance(Some("db")).unwrap();
        factory.instance(Some("reloader")).unwrap();

        // --- Assert ---
        assert_eq!(resolver.load_count("garage"), 2);

        let patterned = ObjectFactory::builder(factory.config())
            .shared_resolver(resolver.clone())
            .reload_pattern(Regex::new(r"\.Person$").unwrap())
            .build();
        patterned.instance(Some("bob")).unwrap();
        patterned.instance(Some("bob_co")).unwrap();
        assert_eq!(resolver.load_count("garage"), 3);
    }

    #[test]
    fn test_dictionary_resolver_factory() {
        let resolver = garage_classes()
            .into_iter()
            .fold(DictionaryClassResolver::new(), |r, class| r.with(class));
        let factory = ObjectFactory::new(loader::from_ini_str("[bob]\nclass_name = Person\n").unwrap(), resolver);
        assert_eq!(factory.instance_of::<Person>("bob").unwrap().name, "bob");
        assert!(matches!(
            factory.instance_of::<Car>("bob"),
            Err(FactoryError::WrongType { found: "Person", .. })
        ));
    }

    #[test]
    fn test_import_resolver_needs_qualified_names() {
        let factory = ObjectFactory::new(
            loader::from_ini_str("[bob]\nclass_name = Person\n").unwrap(),
            ImportClassResolver::new(),
        );
        assert!(matches!(
            factory.instance(Some("bob")),
            Err(FactoryError::Class {
                source: ClassResolutionError::Unqualified { .. },
                ..
            })
        ));
    }
}

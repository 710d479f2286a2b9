// src/core/class_resolver.rs

use crate::{
    constants::{SETTINGS_CLASS, SETTINGS_MODULE},
    core::arguments::Arguments,
    models::{Instance, Settings, Value},
};
use indexmap::IndexMap;
use std::{
    any::{Any, type_name},
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::Rc,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassResolutionError {
    #[error("Class name '{class_name}' is not qualified with a module path")]
    Unqualified { class_name: String },

    #[error("No module '{module}' found for class '{class_name}'")]
    ModuleNotFound { module: String, class_name: String },

    #[error("No class '{class}' in module '{module}'")]
    NotInModule { module: String, class: String },

    #[error("No class registered as '{class_name}'")]
    NotRegistered { class_name: String },
}

pub type ClassResult<T> = Result<T, ClassResolutionError>;

// --- CAPABILITIES ---

/// The method-call surface used by `call` directives.
///
/// Each hook returns `None` when the object has no such member, and
/// `Some(Err(..))` when the member exists but fails.
pub trait Invoke: Any {
    fn invoke(&self, _method: &str, _args: &mut Arguments) -> Option<anyhow::Result<Value>> {
        None
    }

    fn attribute(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Calls the object itself.
    fn call(&self, _args: &mut Arguments) -> Option<anyhow::Result<Value>> {
        None
    }
}

/// Life-cycle states reported to observing instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryState {
    Created,
}

/// Implemented by objects that want to know when the factory built them.
pub trait FactoryStateObserver: Any {
    fn notify_state(&self, state: FactoryState);
}

pub type InvokeCast = fn(&dyn Any) -> Option<&dyn Invoke>;
pub type ObserverCast = fn(&dyn Any) -> Option<&dyn FactoryStateObserver>;

pub(crate) fn cast_invoke<T: Invoke>(object: &dyn Any) -> Option<&dyn Invoke> {
    object.downcast_ref::<T>().map(|t| t as &dyn Invoke)
}

fn cast_observer<T: FactoryStateObserver>(object: &dyn Any) -> Option<&dyn FactoryStateObserver> {
    object
        .downcast_ref::<T>()
        .map(|t| t as &dyn FactoryStateObserver)
}

// --- CLASS DEFINITIONS ---

/// The keyword parameters a class constructor declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameters {
    /// Exactly these names, in positional order.
    Named(Vec<String>),
    /// Any keyword; positional arguments are not accepted.
    Any,
}

type Constructor = Box<dyn Fn(&mut Arguments) -> anyhow::Result<Rc<dyn Any>>>;

/// A class the factory can instantiate.
pub struct ClassDef {
    name: String,
    parameters: Parameters,
    constructor: Constructor,
    type_name: &'static str,
    invoker: Option<InvokeCast>,
    observer: Option<ObserverCast>,
}

impl ClassDef {
    /// Defines a class whose constructor builds a `T` from keyword arguments.
    /// The class declares no parameters until [`ClassDef::params`] is called.
    pub fn new<T, F>(name: impl Into<String>, constructor: F) -> Self
    where
        T: Any,
        F: Fn(&mut Arguments) -> anyhow::Result<T> + 'static,
    {
        Self {
            name: name.into(),
            parameters: Parameters::Named(Vec::new()),
            constructor: Box::new(move |args| {
                constructor(args).map(|object| Rc::new(object) as Rc<dyn Any>)
            }),
            type_name: type_name::<T>(),
            invoker: None,
            observer: None,
        }
    }

    /// Declares the constructor's parameters, in positional order.
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = Parameters::Named(params.into_iter().map(Into::into).collect());
        self
    }

    /// Accepts arbitrary keywords.
    pub fn any_params(mut self) -> Self {
        self.parameters = Parameters::Any;
        self
    }

    /// Exposes `T`'s [`Invoke`] surface on built instances.
    pub fn invokable<T: Invoke>(mut self) -> Self {
        self.invoker = Some(cast_invoke::<T>);
        self
    }

    /// Notifies `T`'s [`FactoryStateObserver`] after construction.
    pub fn observed<T: FactoryStateObserver>(mut self) -> Self {
        self.observer = Some(cast_observer::<T>);
        self
    }

    /// The built-in settings class used for sections without `class_name`.
    pub fn settings() -> Self {
        Self::new(SETTINGS_CLASS, |args: &mut Arguments| {
            Ok(Settings::new(args.drain()))
        })
        .any_params()
        .invokable::<Settings>()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name without its module path.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// True when `param` is an explicitly declared parameter.
    pub fn declares(&self, param: &str) -> bool {
        matches!(&self.parameters, Parameters::Named(names) if names.iter().any(|n| n == param))
    }

    pub fn accepts(&self, param: &str) -> bool {
        matches!(self.parameters, Parameters::Any) || self.declares(param)
    }

    pub(crate) fn construct(&self, args: &mut Arguments) -> anyhow::Result<Instance> {
        let object = (self.constructor)(args)?;
        Ok(Instance::from_parts(
            object,
            self.type_name,
            &self.name,
            self.invoker,
        ))
    }

    pub(crate) fn notify(&self, instance: &Instance, state: FactoryState) {
        if let Some(observer) = self.observer.and_then(|cast| cast(instance.as_any())) {
            log::trace!("notifying {} of state {:?}", self.name, state);
            observer.notify_state(state);
        }
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("type", &self.type_name)
            .field("invokable", &self.invoker.is_some())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

// --- RESOLUTION STRATEGIES ---

/// Maps a configured `class_name` to a class definition.
pub trait ClassResolver: fmt::Debug {
    /// `reload` asks the resolver to refresh its definitions before the lookup.
    fn find_class(&self, class_name: &str, reload: bool) -> ClassResult<Rc<ClassDef>>;
}

/// A closed table of classes, looked up by unqualified name.
#[derive(Debug)]
pub struct DictionaryClassResolver {
    classes: IndexMap<String, Rc<ClassDef>>,
}

impl Default for DictionaryClassResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DictionaryClassResolver {
    /// A resolver holding only the built-in settings class.
    pub fn new() -> Self {
        let mut resolver = Self {
            classes: IndexMap::new(),
        };
        resolver.register(ClassDef::settings());
        resolver
    }

    pub fn register(&mut self, class: ClassDef) -> &mut Self {
        let key = class.simple_name().to_string();
        log::trace!("registering class {} as '{}'", class.name(), key);
        self.classes.insert(key, Rc::new(class));
        self
    }

    pub fn with(mut self, class: ClassDef) -> Self {
        self.register(class);
        self
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

impl ClassResolver for DictionaryClassResolver {
    fn find_class(&self, class_name: &str, reload: bool) -> ClassResult<Rc<ClassDef>> {
        if reload {
            log::debug!("reload of '{}' ignored: registered classes are static", class_name);
        }
        let simple = class_name.rsplit('.').next().unwrap_or(class_name);
        self.classes
            .get(simple)
            .cloned()
            .ok_or_else(|| ClassResolutionError::NotRegistered {
                class_name: class_name.to_string(),
            })
    }
}

type ModuleLoader = Box<dyn Fn() -> Vec<ClassDef>>;
type ClassTable = Rc<IndexMap<String, Rc<ClassDef>>>;

/// Resolves `module.path.Class` names against registered modules.
///
/// A module's loader runs the first time one of its classes is requested and
/// again whenever a reload is requested.
pub struct ImportClassResolver {
    modules: IndexMap<String, ModuleLoader>,
    loaded: RefCell<HashMap<String, ClassTable>>,
    load_counts: RefCell<HashMap<String, usize>>,
}

impl Default for ImportClassResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportClassResolver {
    /// A resolver that knows the built-in `confactory.Settings`.
    pub fn new() -> Self {
        let mut resolver = Self {
            modules: IndexMap::new(),
            loaded: RefCell::new(HashMap::new()),
            load_counts: RefCell::new(HashMap::new()),
        };
        resolver.register_module(SETTINGS_MODULE, || vec![ClassDef::settings()]);
        resolver
    }

    pub fn register_module<F>(&mut self, module: impl Into<String>, loader: F) -> &mut Self
    where
        F: Fn() -> Vec<ClassDef> + 'static,
    {
        let module = module.into();
        self.loaded.borrow_mut().remove(&module);
        self.modules.insert(module, Box::new(loader));
        self
    }

    pub fn module<F>(mut self, module: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Vec<ClassDef> + 'static,
    {
        self.register_module(module, loader);
        self
    }

    /// How many times a module's loader has run.
    pub fn load_count(&self, module: &str) -> usize {
        self.load_counts.borrow().get(module).copied().unwrap_or(0)
    }

    fn load(&self, module: &str, loader: &ModuleLoader, reload: bool) -> ClassTable {
        if !reload {
            if let Some(table) = self.loaded.borrow().get(module) {
                return Rc::clone(table);
            }
        }
        log::debug!("{} module '{}'", if reload { "reloading" } else { "loading" }, module);
        let table: ClassTable = Rc::new(
            loader()
                .into_iter()
                .map(|class| (class.simple_name().to_string(), Rc::new(class)))
                .collect(),
        );
        self.loaded
            .borrow_mut()
            .insert(module.to_string(), Rc::clone(&table));
        *self
            .load_counts
            .borrow_mut()
            .entry(module.to_string())
            .or_insert(0) += 1;
        table
    }
}

impl ClassResolver for ImportClassResolver {
    fn find_class(&self, class_name: &str, reload: bool) -> ClassResult<Rc<ClassDef>> {
        let (module, class) =
            class_name
                .rsplit_once('.')
                .ok_or_else(|| ClassResolutionError::Unqualified {
                    class_name: class_name.to_string(),
                })?;
        let loader = self
            .modules
            .get(module)
            .ok_or_else(|| ClassResolutionError::ModuleNotFound {
                module: module.to_string(),
                class_name: class_name.to_string(),
            })?;
        self.load(module, loader, reload)
            .get(class)
            .cloned()
            .ok_or_else(|| ClassResolutionError::NotInModule {
                module: module.to_string(),
                class: class.to_string(),
            })
    }
}

impl fmt::Debug for ImportClassResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportClassResolver")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("loaded", &self.loaded.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

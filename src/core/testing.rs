// src/core/testing.rs

//! Classes and factories shared by the factory and module tests.

use crate::{
    config::{ConfigHandle, loader},
    core::{
        arguments::Arguments,
        class_resolver::{ClassDef, FactoryState, FactoryStateObserver, ImportClassResolver, Invoke},
        factory::ObjectFactory,
    },
    models::{Instance, Value},
};
use anyhow::bail;
use indexmap::IndexMap;
use std::{cell::Cell, rc::Rc};

#[derive(Debug)]
pub(crate) struct Engine {
    pub(crate) kind: String,
}

#[derive(Debug)]
pub(crate) struct Transmission {
    pub(crate) gears: i64,
}

#[derive(Debug)]
pub(crate) struct PartFactory {
    pub(crate) company_name: String,
}

impl PartFactory {
    fn create(&self, args: &mut Arguments) -> anyhow::Result<Value> {
        let part: String = args.required("part_name")?;
        match part.as_str() {
            "engine" => Ok(Value::Object(Instance::new(Engine { kind: "v8".to_string() }))),
            other => bail!("no such part: {}", other),
        }
    }
}

impl Invoke for PartFactory {
    fn invoke(&self, method: &str, args: &mut Arguments) -> Option<anyhow::Result<Value>> {
        match method {
            "create" => Some(self.create(args)),
            _ => None,
        }
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        (name == "company_name").then(|| Value::from(self.company_name.as_str()))
    }

    fn call(&self, _args: &mut Arguments) -> Option<anyhow::Result<Value>> {
        Some(Ok(Value::Object(Instance::new(Transmission { gears: 6 }))))
    }
}

#[derive(Debug)]
pub(crate) struct Car {
    pub(crate) engine: Rc<Engine>,
    pub(crate) transmission: Rc<Transmission>,
    pub(crate) maker: String,
}

#[derive(Debug)]
pub(crate) struct Person {
    pub(crate) name: String,
    pub(crate) first: String,
    pub(crate) age: i64,
}

#[derive(Debug)]
pub(crate) struct Company {
    pub(crate) boss: Rc<Person>,
}

pub(crate) struct Widget {
    pub(crate) param1: Value,
    pub(crate) param2: Value,
    pub(crate) name: String,
    pub(crate) config: Option<ConfigHandle>,
    pub(crate) factory: Option<ObjectFactory>,
}

#[derive(Debug, Default)]
pub(crate) struct Tracker {
    pub(crate) created: Cell<u32>,
}

impl FactoryStateObserver for Tracker {
    fn notify_state(&self, state: FactoryState) {
        if state == FactoryState::Created {
            self.created.set(self.created.get() + 1);
        }
    }
}

#[derive(Debug)]
pub(crate) struct Bag {
    pub(crate) values: IndexMap<String, Value>,
}

pub(crate) fn garage_classes() -> Vec<ClassDef> {
    vec![
        ClassDef::new("garage.PartFactory", |args: &mut Arguments| {
            Ok(PartFactory {
                company_name: args.get_or("company_name", "fix or repair daily".to_string())?,
            })
        })
        .params(["company_name"])
        .invokable::<PartFactory>(),
        ClassDef::new("garage.Car", |args: &mut Arguments| {
            Ok(Car {
                engine: args.object("engine")?,
                transmission: args.object("transmission")?,
                maker: args.required("maker")?,
            })
        })
        .params(["engine", "transmission", "maker"]),
        ClassDef::new("garage.Person", |args: &mut Arguments| {
            Ok(Person {
                name: args.required("name")?,
                first: args.get_or("first", String::new())?,
                age: args.get_or("age", 0)?,
            })
        })
        .params(["first", "age", "name"]),
        ClassDef::new("garage.Company", |args: &mut Arguments| {
            Ok(Company {
                boss: args.object("boss")?,
            })
        })
        .params(["boss"]),
        ClassDef::new("garage.Widget", |args: &mut Arguments| {
            Ok(Widget {
                param1: args.take("param1").unwrap_or_default(),
                param2: args.take("param2").unwrap_or_default(),
                name: args.required("name")?,
                config: args.optional("config")?,
                factory: args.optional("config_factory")?,
            })
        })
        .params(["param1", "param2", "name", "config", "config_factory"]),
        ClassDef::new("garage.Tracker", |_: &mut Arguments| Ok(Tracker::default()))
            .observed::<Tracker>(),
        ClassDef::new("garage.Bag", |args: &mut Arguments| {
            Ok(Bag { values: args.drain() })
        })
        .any_params(),
        ClassDef::new("garage.Fuse", |args: &mut Arguments| -> anyhow::Result<Bag> {
            let amps: i64 = args.required("amps")?;
            bail!("blown at {} amps", amps)
        })
        .params(["amps"]),
    ]
}

pub(crate) fn resolver() -> ImportClassResolver {
    ImportClassResolver::new().module("garage", garage_classes)
}

pub(crate) fn ini_factory(content: &str) -> ObjectFactory {
    ObjectFactory::new(loader::from_ini_str(content).unwrap(), resolver())
}

pub(crate) fn yaml_factory(content: &str) -> ObjectFactory {
    ObjectFactory::new(loader::from_yaml_str(content).unwrap(), resolver())
}

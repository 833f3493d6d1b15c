//! Script-visible type descriptors and their materialized method tables

use std::collections::HashMap;

use grimoire_events::{Environment, ObjectGuid};
use mlua::{Function, Lua, MultiValue, Table, Value, Variadic};
use tracing::error;

use crate::marshal::Args;

/// Name of the type every other type inherits from
pub const BASE_TYPE_NAME: &str = "BaseObject";

/// Native function callable from scripts
pub type NativeFn = fn(&Lua, Args<'_>) -> mlua::Result<MultiValue>;

/// One entry of a function or method table
#[derive(Clone, Copy)]
pub struct Method {
    pub name: &'static str,
    pub env: Environment,
    /// `None` removes the name, including an inherited one
    pub func: Option<NativeFn>,
}

impl Method {
    pub const fn new(name: &'static str, env: Environment, func: NativeFn) -> Self {
        Self {
            name,
            env,
            func: Some(func),
        }
    }

    pub const fn removed(name: &'static str, env: Environment) -> Self {
        Self {
            name,
            env,
            func: None,
        }
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("env", &self.env)
            .field("removed", &self.func.is_none())
            .finish()
    }
}

/// A native type that can be handed to scripts
pub trait ScriptType: 'static {
    const TYPE_NAME: &'static str;

    /// Whether a handle created through the default path destroys the object
    const OWNS_MEMORY: bool = false;

    const PARENT: Option<&'static str> = Some(BASE_TYPE_NAME);

    const METHODS: &'static [Method];

    /// Identity used to key per-object timed events
    fn guid(&self) -> Option<ObjectGuid> {
        None
    }
}

/// Metadata registered once per session for each script-visible type
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor {
    pub type_name: &'static str,
    pub owns_memory: bool,
    pub parent: Option<&'static str>,
    pub methods: &'static [Method],
}

impl TypeDescriptor {
    pub fn of<T: ScriptType>() -> Self {
        Self {
            type_name: T::TYPE_NAME,
            owns_memory: T::OWNS_MEMORY,
            parent: T::PARENT,
            methods: T::METHODS,
        }
    }

    /// A type with no instances of its own, only methods for its children
    pub const fn abstract_type(
        type_name: &'static str,
        parent: Option<&'static str>,
        methods: &'static [Method],
    ) -> Self {
        Self {
            type_name,
            owns_memory: false,
            parent,
            methods,
        }
    }
}

#[derive(Debug)]
enum Resolution {
    Pending,
    InProgress,
    Resolved(Table),
}

#[derive(Debug)]
struct TypeEntry {
    descriptor: TypeDescriptor,
    resolution: Resolution,
}

/// Types registered in one session
///
/// Registration and materialization are separate phases: every descriptor is
/// registered first, then [`TypeRegistry::materialize_all`] builds one flattened
/// method table per type, parents before children.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: HashMap<&'static str, TypeEntry>,
    order: Vec<&'static str>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type
    ///
    /// # Panics
    /// Panics if a type with the same name is already registered.
    pub fn register(&mut self, descriptor: TypeDescriptor) {
        if self.entries.contains_key(descriptor.type_name) {
            panic!("type {} registered twice", descriptor.type_name);
        }

        self.order.push(descriptor.type_name);
        self.entries.insert(
            descriptor.type_name,
            TypeEntry {
                descriptor,
                resolution: Resolution::Pending,
            },
        );
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn descriptor(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.entries.get(type_name).map(|e| &e.descriptor)
    }

    /// Materialized method table of a type
    pub fn method_table(&self, type_name: &str) -> Option<Table> {
        match &self.entries.get(type_name)?.resolution {
            Resolution::Resolved(table) => Some(table.clone()),
            _ => None,
        }
    }

    /// Materialize every registered type, in registration order
    pub fn materialize_all(&mut self, lua: &Lua, env: Environment) -> mlua::Result<()> {
        let names = self.order.clone();
        for name in names {
            self.materialize(lua, name, env)?;
        }
        Ok(())
    }

    /// Build the method table for `type_name` and its ancestors. Idempotent.
    pub fn materialize(
        &mut self,
        lua: &Lua,
        type_name: &str,
        env: Environment,
    ) -> mlua::Result<Option<Table>> {
        let Some(entry) = self.entries.get_mut(type_name) else {
            return Ok(None);
        };

        if let Resolution::Resolved(table) = &entry.resolution {
            return Ok(Some(table.clone()));
        }
        if matches!(entry.resolution, Resolution::InProgress) {
            error!(target: "scripting", "Inheritance cycle through type {}", type_name);
            return Ok(None);
        }
        entry.resolution = Resolution::InProgress;

        let descriptor = entry.descriptor;
        let table = lua.create_table()?;

        if let Some(parent) = descriptor.parent {
            if !self.entries.contains_key(parent) {
                error!(
                    target: "scripting",
                    "Type {} inherits from unregistered type {}, inherited methods are unavailable",
                    descriptor.type_name,
                    parent
                );
            } else if let Some(parent_table) = self.materialize(lua, parent, env)? {
                for pair in parent_table.pairs::<Value, Value>() {
                    let (name, func) = pair?;
                    table.raw_set(name, func)?;
                }
            }
        }

        for method in descriptor.methods {
            if !method.env.allows(env) {
                continue;
            }
            match method.func {
                Some(func) => table.raw_set(method.name, native_function(lua, method.name, func)?)?,
                None => table.raw_set(method.name, Value::Nil)?,
            }
        }

        if let Some(entry) = self.entries.get_mut(descriptor.type_name) {
            entry.resolution = Resolution::Resolved(table.clone());
        }

        Ok(Some(table))
    }

    /// Release every method table
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Wrap a native function so it can be called from scripts
pub fn native_function(lua: &Lua, name: &'static str, func: NativeFn) -> mlua::Result<Function> {
    lua.create_function(move |lua, args: Variadic<Value>| func(lua, Args::new(name, &args)))
}

/// Install `functions` as globals, honoring their environments
pub fn install_globals(lua: &Lua, functions: &[Method], env: Environment) -> mlua::Result<()> {
    let globals = lua.globals();
    for function in functions {
        if !function.env.allows(env) {
            continue;
        }
        match function.func {
            Some(func) => globals.set(function.name, native_function(lua, function.name, func)?)?,
            None => globals.set(function.name, Value::Nil)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::IntoLuaMulti;

    fn answer(lua: &Lua, _args: Args<'_>) -> mlua::Result<MultiValue> {
        42.into_lua_multi(lua)
    }

    fn name_of(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
        args.name().into_lua_multi(lua)
    }

    const PARENT_METHODS: &[Method] = &[
        Method::new("Answer", Environment::BOTH, answer),
        Method::new("Hidden", Environment::BOTH, answer),
        Method::new("MapOnly", Environment::MAP, answer),
    ];

    const CHILD_METHODS: &[Method] = &[
        Method::new("Name", Environment::BOTH, name_of),
        Method::removed("Hidden", Environment::BOTH),
    ];

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        // Child first: materialization must still resolve the parent before it
        registry.register(TypeDescriptor::abstract_type("Child", Some("Parent"), CHILD_METHODS));
        registry.register(TypeDescriptor::abstract_type("Parent", None, PARENT_METHODS));
        registry
    }

    #[test]
    fn test_inherited_methods_are_flattened() {
        let lua = Lua::new();
        let mut registry = registry();
        registry.materialize_all(&lua, Environment::WORLD).unwrap();

        let child = registry.method_table("Child").unwrap();
        let answer: Function = child.get("Answer").unwrap();
        assert_eq!(answer.call::<i64>(()).unwrap(), 42);

        let name: Function = child.get("Name").unwrap();
        assert_eq!(name.call::<String>(()).unwrap(), "Name");

        // Removed in the child, still present in the parent
        assert!(child.get::<Option<Function>>("Hidden").unwrap().is_none());
        let parent = registry.method_table("Parent").unwrap();
        assert!(parent.get::<Option<Function>>("Hidden").unwrap().is_some());
    }

    #[test]
    fn test_environment_filters_methods() {
        let lua = Lua::new();
        let mut registry = registry();
        registry.materialize_all(&lua, Environment::WORLD).unwrap();
        let parent = registry.method_table("Parent").unwrap();
        assert!(parent.get::<Option<Function>>("MapOnly").unwrap().is_none());

        let lua = Lua::new();
        let mut registry = self::registry();
        registry.materialize_all(&lua, Environment::MAP).unwrap();
        let parent = registry.method_table("Parent").unwrap();
        assert!(parent.get::<Option<Function>>("MapOnly").unwrap().is_some());
    }

    #[test]
    fn test_missing_parent_is_not_fatal() {
        let lua = Lua::new();
        let mut registry = TypeRegistry::new();
        registry.register(TypeDescriptor::abstract_type("Orphan", Some("Nowhere"), CHILD_METHODS));
        registry.materialize_all(&lua, Environment::WORLD).unwrap();

        let orphan = registry.method_table("Orphan").unwrap();
        assert!(orphan.get::<Option<Function>>("Name").unwrap().is_some());
        assert!(orphan.get::<Option<Function>>("Answer").unwrap().is_none());
    }

    #[test]
    fn test_inheritance_cycle_is_broken() {
        let lua = Lua::new();
        let mut registry = TypeRegistry::new();
        registry.register(TypeDescriptor::abstract_type("A", Some("B"), PARENT_METHODS));
        registry.register(TypeDescriptor::abstract_type("B", Some("A"), CHILD_METHODS));
        registry.materialize_all(&lua, Environment::WORLD).unwrap();

        assert!(registry.method_table("A").is_some());
        assert!(registry.method_table("B").is_some());
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let lua = Lua::new();
        let mut registry = registry();
        let first = registry.materialize(&lua, "Child", Environment::WORLD).unwrap().unwrap();
        let second = registry.materialize(&lua, "Child", Environment::WORLD).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut registry = registry();
        registry.register(TypeDescriptor::abstract_type("Parent", None, PARENT_METHODS));
    }
}

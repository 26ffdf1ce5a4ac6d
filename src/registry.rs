//! Constructor, destructor and method callbacks, first by name, then by id.
//!
//! A [`Registry`] is filled during startup, before any collective traffic:
//! each rank registers the same classes and methods under the same names.
//! Association then moves one entry at a time out of the name-keyed tables
//! and appends it to the id-indexed tables. Because every rank processes the
//! Associate commands in broadcast order, position `n` of the id-indexed
//! tables holds the same callback on every rank.

use crate::error::PmiError;
use crate::types::{ClassId, MethodId};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Display};

/// An opaque, type-erased object instance.
pub type Handle = Box<dyn Any>;

type Constructor = Box<dyn Fn() -> Handle>;
type Destructor = Box<dyn Fn(Handle) -> Result<(), PmiError>>;
type MethodCaller = Box<dyn Fn(&mut dyn Any) -> Result<(), PmiError>>;

pub struct ClassEntry {
    name: String,
    type_id: TypeId,
    constructor: Constructor,
    destructor: Destructor,
}

impl ClassEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn construct(&self) -> Handle {
        (self.constructor)()
    }

    pub fn destruct(&self, handle: Handle) -> Result<(), PmiError> {
        (self.destructor)(handle)
    }
}

pub struct MethodEntry {
    name: String,
    class: TypeId,
    caller: MethodCaller,
}

impl MethodEntry {
    /// The qualified `Class::method` name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type the method is defined on.
    pub fn class(&self) -> TypeId {
        self.class
    }

    pub fn call(&self, object: &mut dyn Any) -> Result<(), PmiError> {
        (self.caller)(object)
    }
}

/// The qualified name under which a method is registered and associated.
pub fn method_key(class: &str, method: &str) -> String {
    format!("{}::{}", class, method)
}

fn check_name(kind: &str, name: &str) -> Result<(), PmiError> {
    if name.is_empty() {
        Err(PmiError::User(format!("cannot register a {} with an empty name", kind)))
    } else if name.contains('\0') {
        Err(PmiError::User(format!(
            "cannot register {} \"{}\": names may not contain NUL",
            kind,
            name.escape_default()
        )))
    } else {
        Ok(())
    }
}

#[derive(Default)]
pub struct Registry {
    classes_by_name: HashMap<String, ClassEntry>,
    methods_by_name: HashMap<String, MethodEntry>,
    class_names: HashMap<TypeId, String>,
    classes: Vec<ClassEntry>,
    methods: Vec<MethodEntry>,
    class_ids: HashMap<String, ClassId>,
    method_ids: HashMap<String, MethodId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `name`, constructed with `T::default()`.
    pub fn register_class<T: Any + Default>(&mut self, name: &str) -> Result<&mut Self, PmiError> {
        self.register_class_with(name, T::default)
    }

    /// Registers `T` under `name`, constructed by `constructor`.
    pub fn register_class_with<T, F>(&mut self, name: &str, constructor: F) -> Result<&mut Self, PmiError>
    where
        T: Any,
        F: Fn() -> T + 'static,
    {
        check_name("class", name)?;
        if self.classes_by_name.contains_key(name) || self.class_ids.contains_key(name) {
            return Err(PmiError::User(format!("class \"{}\" is already registered", name)));
        }
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.class_names.get(&type_id) {
            return Err(PmiError::User(format!(
                "type of class \"{}\" is already registered as \"{}\"",
                name, existing
            )));
        }
        let class = name.to_string();
        let entry = ClassEntry {
            name: name.to_string(),
            type_id,
            constructor: Box::new(move || Box::new(constructor()) as Handle),
            destructor: Box::new(move |handle: Handle| {
                handle.downcast::<T>().map(drop).map_err(|_| {
                    PmiError::Internal(format!("object to destroy is not a \"{}\"", class))
                })
            }),
        };
        self.class_names.insert(type_id, name.to_string());
        self.classes_by_name.insert(name.to_string(), entry);
        Ok(self)
    }

    /// Registers `method` as `Class::name` on the already registered class
    /// `T`.
    pub fn register_method<T, F>(&mut self, name: &str, method: F) -> Result<&mut Self, PmiError>
    where
        T: Any,
        F: Fn(&mut T) + 'static,
    {
        self.register_fallible_method::<T, _, std::convert::Infallible>(name, move |object| {
            method(object);
            Ok(())
        })
    }

    /// Registers a method whose `Err` is reported as a user error.
    pub fn register_fallible_method<T, F, E>(&mut self, name: &str, method: F) -> Result<&mut Self, PmiError>
    where
        T: Any,
        F: Fn(&mut T) -> Result<(), E> + 'static,
        E: Display,
    {
        check_name("method", name)?;
        let class = self.class_name_of::<T>().ok_or_else(|| {
            PmiError::User(format!(
                "cannot register method \"{}\" on a type that is not a registered class",
                name
            ))
        })?;
        let key = method_key(class, name);
        if self.methods_by_name.contains_key(&key) || self.method_ids.contains_key(&key) {
            return Err(PmiError::User(format!("method \"{}\" is already registered", key)));
        }
        let expected = class.to_string();
        let qualified = key.clone();
        let entry = MethodEntry {
            name: key.clone(),
            class: TypeId::of::<T>(),
            caller: Box::new(move |object: &mut dyn Any| {
                let object = object.downcast_mut::<T>().ok_or_else(|| {
                    PmiError::Internal(format!(
                        "method \"{}\" was invoked on an object that is not a \"{}\"",
                        qualified, expected
                    ))
                })?;
                method(object).map_err(|e| PmiError::User(e.to_string()))
            }),
        };
        self.methods_by_name.insert(key, entry);
        Ok(self)
    }

    /// The name `T` was registered under.
    pub fn class_name_of<T: Any>(&self) -> Option<&str> {
        self.class_names.get(&TypeId::of::<T>()).map(String::as_str)
    }

    pub fn is_class_registered(&self, name: &str) -> bool {
        self.classes_by_name.contains_key(name) || self.class_ids.contains_key(name)
    }

    pub fn is_method_registered(&self, key: &str) -> bool {
        self.methods_by_name.contains_key(key) || self.method_ids.contains_key(key)
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.class_ids.get(name).copied()
    }

    pub fn method_id(&self, key: &str) -> Option<MethodId> {
        self.method_ids.get(key).copied()
    }

    /// Moves the class registered under `name` to position `id` of the
    /// id-indexed table. `id` must be the current length of that table.
    pub fn associate_class(&mut self, name: &str, id: ClassId) -> Result<(), PmiError> {
        if !self.classes_by_name.contains_key(name) {
            return Err(PmiError::User(format!(
                "has not registered class \"{}\" (constructor undefined)",
                name
            )));
        }
        if self.classes.len() != id.index() {
            return Err(PmiError::Internal(format!(
                "has {} associated classes, but received id {} as the next id",
                self.classes.len(),
                id
            )));
        }
        if let Some(entry) = self.classes_by_name.remove(name) {
            self.classes.push(entry);
            self.class_ids.insert(name.to_string(), id);
        }
        Ok(())
    }

    /// Moves the method registered under `key` to position `id` of the
    /// id-indexed table. `id` must be the current length of that table.
    pub fn associate_method(&mut self, key: &str, id: MethodId) -> Result<(), PmiError> {
        if !self.methods_by_name.contains_key(key) {
            return Err(PmiError::User(format!(
                "has not registered method \"{}\" (method caller undefined)",
                key
            )));
        }
        if self.methods.len() != id.index() {
            return Err(PmiError::Internal(format!(
                "has {} associated methods, but received id {} as the next id",
                self.methods.len(),
                id
            )));
        }
        if let Some(entry) = self.methods_by_name.remove(key) {
            self.methods.push(entry);
            self.method_ids.insert(key.to_string(), id);
        }
        Ok(())
    }

    pub fn class(&self, id: ClassId) -> Result<&ClassEntry, PmiError> {
        self.classes.get(id.index()).ok_or_else(|| {
            PmiError::Internal(format!("does not have a constructor for class id {}", id))
        })
    }

    pub fn method(&self, id: MethodId) -> Result<&MethodEntry, PmiError> {
        self.methods.get(id.index()).ok_or_else(|| {
            PmiError::Internal(format!("does not have a method caller for method id {}", id))
        })
    }

    /// Number of associated classes.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of associated methods.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending_classes: Vec<_> = self.classes_by_name.keys().collect();
        let mut pending_methods: Vec<_> = self.methods_by_name.keys().collect();
        pending_classes.sort();
        pending_methods.sort();
        f.debug_struct("Registry")
            .field("classes", &self.classes.iter().map(ClassEntry::name).collect::<Vec<_>>())
            .field("methods", &self.methods.iter().map(MethodEntry::name).collect::<Vec<_>>())
            .field("pending_classes", &pending_classes)
            .field("pending_methods", &pending_methods)
            .finish()
    }
}

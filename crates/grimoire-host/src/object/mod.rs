//! Native object handles
//!
//! A handle is the script-side proxy of one native object. The registry keeps a
//! weak side-table from object address to handle so that wrapping the same object
//! twice yields the same handle. Each Lua state caches the userdata of every live
//! handle in a weak-valued table, so scripts see one value per object (`rawequal`,
//! usable as a table key).
//!
//! Handles of non-owning types are invalidated in bulk when the outermost dispatch
//! returns, or individually through [`HandleRegistry::notify_destroyed`]. Handles of
//! owning types destroy their object when the last script reference is collected.

pub mod types;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use grimoire_events::ObjectGuid;
use mlua::{AnyUserData, Lua, MetaMethod, Table, UserData, UserDataMethods, Value};
use tracing::{debug, warn};

use crate::marshal::{type_name_of, Args};
pub use types::{
    install_globals, native_function, Method, NativeFn, ScriptType, TypeDescriptor, TypeRegistry,
    BASE_TYPE_NAME,
};

type HandleKey = (usize, &'static str);

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Registry slot of the per-state userdata cache
const USERDATA_CACHE: &str = "grimoire.handles";
type HandleTable = RefCell<HashMap<HandleKey, Weak<HandleInner>>>;

struct HandleInner {
    id: u64,
    ptr: NonNull<()>,
    type_name: &'static str,
    owns_memory: bool,
    valid: Cell<bool>,
    /// Set when the host destroyed an owned object behind our back
    released: Cell<bool>,
    destroy: unsafe fn(NonNull<()>),
    guid: unsafe fn(NonNull<()>) -> Option<ObjectGuid>,
    table: Weak<HandleTable>,
}

impl HandleInner {
    fn key(&self) -> HandleKey {
        (self.ptr.as_ptr() as usize, self.type_name)
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.owns_memory && !self.released.get() {
            debug!(target: "scripting", "Destroying owned {} at {:p}", self.type_name, self.ptr);
            // SAFETY: owned handles are only created from `Box::into_raw` of the
            // matching type, and `released` guards against a second free.
            unsafe { (self.destroy)(self.ptr) };
        }

        if let Some(table) = self.table.upgrade() {
            if let Ok(mut map) = table.try_borrow_mut() {
                let key = self.key();
                // A newer handle may already occupy the slot
                if map.get(&key).is_some_and(|w| w.strong_count() == 0) {
                    map.remove(&key);
                }
            }
        }
    }
}

unsafe fn destroy_boxed<T>(ptr: NonNull<()>) {
    drop(Box::from_raw(ptr.as_ptr() as *mut T));
}

unsafe fn guid_of<T: ScriptType>(ptr: NonNull<()>) -> Option<ObjectGuid> {
    (*(ptr.as_ptr() as *const T)).guid()
}

/// Shared handle to one native object
#[derive(Clone)]
pub struct ObjectHandle(Rc<HandleInner>);

impl ObjectHandle {
    pub fn type_name(&self) -> &'static str {
        self.0.type_name
    }

    pub fn is_valid(&self) -> bool {
        self.0.valid.get()
    }

    pub fn owns_memory(&self) -> bool {
        self.0.owns_memory
    }

    /// Address of the wrapped object
    pub fn addr(&self) -> *const () {
        self.0.ptr.as_ptr()
    }

    /// Whether both handles refer to the same native object
    pub fn ptr_eq(&self, other: &ObjectHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Guid of the wrapped object, if it is still valid and has a non-empty one
    pub fn guid(&self) -> Option<ObjectGuid> {
        if !self.is_valid() {
            return None;
        }
        // SAFETY: the object is alive while the handle is valid.
        unsafe { (self.0.guid)(self.0.ptr) }.filter(|guid| !guid.is_empty())
    }

    /// Typed access to the object, if the handle is valid and of type `T`
    pub fn downcast<T: ScriptType>(&self) -> Option<ObjectRef<T>> {
        if self.type_name() == T::TYPE_NAME && self.is_valid() {
            Some(ObjectRef {
                handle: self.clone(),
                _marker: PhantomData,
            })
        } else {
            None
        }
    }
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("type_name", &self.type_name())
            .field("addr", &self.addr())
            .field("valid", &self.is_valid())
            .field("owns_memory", &self.owns_memory())
            .finish()
    }
}

/// Checked reference to a native object of type `T`
pub struct ObjectRef<T> {
    handle: ObjectHandle,
    _marker: PhantomData<*const T>,
}

impl<T> ObjectRef<T> {
    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }
}

impl<T> std::fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRef")
            .field("handle", &self.handle)
            .finish()
    }
}

impl<T: ScriptType> Deref for ObjectRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: constructed only from a valid handle of type `T`; the host keeps
        // the object alive until the handle is invalidated.
        unsafe { &*(self.handle.0.ptr.as_ptr() as *const T) }
    }
}

/// Address -> handle side-table of one session
pub struct HandleRegistry {
    table: Rc<HandleTable>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            table: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Wrap a native pointer
    ///
    /// Returns `None` for a null pointer. If a live handle already exists for the
    /// pointer it is marked valid again and returned.
    ///
    /// # Safety
    /// `ptr` must point to a live `T`. When `owns_memory` is true it must come from
    /// `Box::into_raw` and ownership passes to the handle. Otherwise the object must
    /// stay alive until the outermost dispatch returns or
    /// [`HandleRegistry::notify_destroyed`] is called for it.
    pub unsafe fn wrap_ptr<T: ScriptType>(
        &self,
        ptr: *mut T,
        owns_memory: bool,
    ) -> Option<ObjectHandle> {
        let ptr = NonNull::new(ptr as *mut ())?;
        let key = (ptr.as_ptr() as usize, T::TYPE_NAME);

        let existing = self.table.borrow().get(&key).and_then(Weak::upgrade);
        if let Some(inner) = existing {
            if inner.owns_memory == owns_memory {
                inner.valid.set(true);
                return Some(ObjectHandle(inner));
            }

            // The old object is gone and a new one took its address
            debug!(
                target: "scripting",
                "Replacing stale {} handle at {:p}",
                inner.type_name,
                inner.ptr
            );
            if !inner.owns_memory {
                inner.valid.set(false);
            }
            self.table.borrow_mut().remove(&key);
        }

        let inner = Rc::new(HandleInner {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            ptr,
            type_name: T::TYPE_NAME,
            owns_memory,
            valid: Cell::new(true),
            released: Cell::new(false),
            destroy: destroy_boxed::<T>,
            guid: guid_of::<T>,
            table: Rc::downgrade(&self.table),
        });
        self.table.borrow_mut().insert(key, Rc::downgrade(&inner));

        Some(ObjectHandle(inner))
    }

    /// Wrap a host-owned object
    ///
    /// # Safety
    /// See [`HandleRegistry::wrap_ptr`] with `owns_memory == false`.
    pub unsafe fn wrap<T: ScriptType>(&self, obj: &T) -> ObjectHandle {
        let handle = self.wrap_ptr(obj as *const T as *mut T, false);
        // A reference is never null
        handle.unwrap_or_else(|| unreachable!())
    }

    /// Hand an object over to scripts; it is dropped when scripts release it
    pub fn wrap_owned<T: ScriptType>(&self, obj: Box<T>) -> ObjectHandle {
        // SAFETY: the pointer comes from `Box::into_raw` and ownership moves into the handle.
        let handle = unsafe { self.wrap_ptr(Box::into_raw(obj), true) };
        handle.unwrap_or_else(|| unreachable!())
    }

    fn live_handles(&self) -> Vec<Rc<HandleInner>> {
        let mut map = self.table.borrow_mut();
        map.retain(|_, w| w.strong_count() > 0);
        map.values().filter_map(Weak::upgrade).collect()
    }

    /// Invalidate every live non-owning handle
    pub fn invalidate_all(&self) {
        let live = self.live_handles();
        for inner in &live {
            if !inner.owns_memory {
                inner.valid.set(false);
            }
        }
    }

    /// The host is about to free the object at `addr`
    ///
    /// Every handle for that address is invalidated and detached, so a new object
    /// allocated at the same address gets a fresh handle. Returns whether any
    /// handle was affected.
    pub fn notify_destroyed(&self, addr: *const ()) -> bool {
        let addr = addr as usize;
        let detached: Vec<Rc<HandleInner>> = {
            let mut map = self.table.borrow_mut();
            let keys: Vec<HandleKey> = map.keys().filter(|k| k.0 == addr).copied().collect();
            keys.into_iter()
                .filter_map(|k| map.remove(&k))
                .filter_map(|w| w.upgrade())
                .collect()
        };

        for inner in &detached {
            inner.valid.set(false);
            if inner.owns_memory {
                warn!(
                    target: "scripting",
                    "Owned {} at {:p} destroyed by the host while scripts hold it",
                    inner.type_name,
                    inner.ptr
                );
                inner.released.set(true);
            }
        }

        !detached.is_empty()
    }

    /// Number of handles scripts still reference
    pub fn live_count(&self) -> usize {
        self.table
            .borrow()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Userdata representing a handle inside the script runtime
pub struct ScriptObject {
    handle: ObjectHandle,
    methods: Table,
}

impl ScriptObject {
    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }
}

impl UserData for ScriptObject {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |_lua, this, key: Value| {
            this.methods.raw_get::<Value>(key)
        });

        methods.add_meta_method(MetaMethod::Eq, |_lua, this, other: AnyUserData| {
            Ok(other
                .borrow::<ScriptObject>()
                .map(|o| o.handle.ptr_eq(&this.handle))
                .unwrap_or(false))
        });

        methods.add_meta_method(MetaMethod::ToString, |_lua, this, ()| {
            Ok(format!("{}: {:p}", this.handle.type_name(), this.handle.addr()))
        });
    }
}

fn userdata_cache(lua: &Lua) -> mlua::Result<Table> {
    if let Value::Table(cache) = lua.named_registry_value::<Value>(USERDATA_CACHE)? {
        return Ok(cache);
    }

    let cache = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__mode", "v")?;
    cache.set_metatable(Some(meta))?;
    lua.set_named_registry_value(USERDATA_CACHE, &cache)?;
    Ok(cache)
}

/// Script value for `handle`
///
/// The userdata of a handle is reused while scripts still reference it, so the
/// same native object always maps to the same Lua value.
pub fn handle_to_value(lua: &Lua, types: &TypeRegistry, handle: ObjectHandle) -> mlua::Result<Value> {
    let cache = userdata_cache(lua)?;
    let id = handle.0.id;
    if let Value::UserData(ud) = cache.raw_get::<Value>(id)? {
        return Ok(Value::UserData(ud));
    }

    let methods = types.method_table(handle.type_name()).ok_or_else(|| {
        mlua::Error::runtime(format!("type {} is not registered", handle.type_name()))
    })?;

    let ud = lua.create_userdata(ScriptObject { handle, methods })?;
    cache.raw_set(id, ud.clone())?;
    Ok(Value::UserData(ud))
}

/// Extract the handle behind a script value, whatever its type or validity
pub fn value_to_handle(value: Option<&Value>) -> Option<ObjectHandle> {
    match value {
        Some(Value::UserData(ud)) => ud
            .borrow::<ScriptObject>()
            .ok()
            .map(|obj| obj.handle.clone()),
        _ => None,
    }
}

impl<'a> Args<'a> {
    /// Handle at `narg` without any type or validity check
    pub fn handle(&self, narg: usize) -> mlua::Result<ObjectHandle> {
        value_to_handle(self.get(narg)).ok_or_else(|| {
            self.error(
                narg,
                format!("object expected, got {}", type_name_of(self.get(narg))),
            )
        })
    }

    /// Object of exactly type `T` at `narg`
    pub fn object<T: ScriptType>(&self, narg: usize) -> mlua::Result<ObjectRef<T>> {
        self.check_object::<T>(narg, true)
            .and_then(|obj| obj.ok_or_else(|| self.error(narg, format!("{} expected", T::TYPE_NAME))))
    }

    /// Object of exactly type `T` at `narg`, or `None` without raising
    pub fn try_object<T: ScriptType>(&self, narg: usize) -> Option<ObjectRef<T>> {
        self.check_object::<T>(narg, false).ok().flatten()
    }

    /// Unwrap argument `narg` as a `T`
    ///
    /// With `raise` set, a missing, foreign or invalidated object is an argument
    /// error; otherwise it yields `Ok(None)`.
    pub fn check_object<T: ScriptType>(
        &self,
        narg: usize,
        raise: bool,
    ) -> mlua::Result<Option<ObjectRef<T>>> {
        let value = self.get(narg);
        let fail = |detail: String| {
            if raise {
                Err(self.error(narg, detail))
            } else {
                Ok(None)
            }
        };

        let Some(handle) = value_to_handle(value) else {
            return fail(format!(
                "{} expected, got {}",
                T::TYPE_NAME,
                type_name_of(value)
            ));
        };

        if handle.type_name() != T::TYPE_NAME {
            return fail(format!(
                "{} expected, got {}",
                T::TYPE_NAME,
                handle.type_name()
            ));
        }

        if !handle.is_valid() {
            return fail(format!(
                "{} expected, got pointer to nonexisting (invalidated) object ({}). Check your code.",
                T::TYPE_NAME,
                handle.type_name()
            ));
        }

        Ok(handle.downcast::<T>())
    }
}

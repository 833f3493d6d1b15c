//! One script execution context
//!
//! A [`Session`] owns a Lua state together with everything scripts registered
//! into it: binding stores, timed events, the handle registry and the
//! materialized type tables. The world session has [`Environment::WORLD`], map
//! sessions have [`Environment::MAP`].

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use grimoire_events::hooks::{ENGINE_EVENT_ON_STATE_CLOSE, ENGINE_EVENT_ON_STATE_OPEN};
use grimoire_events::{
    BindingType, EntryKey, Environment, EventKey, GuidKey, HookCatalog, MapId, ObjectGuid,
};
use mlua::{FromLua, Function, IntoLua, IntoLuaMulti, Lua, MultiValue, Value};
use tracing::{debug, error, info};

use crate::api::{BASE_TYPE, GLOBAL_FUNCTIONS};
use crate::binding::BindingStore;
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::loader::{self, ScriptSet};
use crate::marshal::push_u64;
use crate::object::{
    handle_to_value, install_globals, HandleRegistry, Method, ObjectHandle, ScriptType,
    TypeDescriptor, TypeRegistry,
};
use crate::thread_guard::{ActiveSession, SessionId};
use crate::timed::TimedEventManager;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to set up script runtime: {0}")]
    Runtime(#[from] mlua::Error),
}

/// Everything native functions need, reachable from the Lua state's app data
pub struct SessionState {
    pub(crate) id: SessionId,
    pub(crate) env: Environment,
    pub(crate) map_id: Option<MapId>,
    pub(crate) catalog: Arc<HookCatalog>,
    pub(crate) handles: HandleRegistry,
    pub(crate) types: RefCell<TypeRegistry>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) server_bindings: RefCell<BindingStore<EventKey, Function>>,
    pub(crate) entry_bindings: RefCell<BindingStore<EntryKey, Function>>,
    pub(crate) guid_bindings: RefCell<BindingStore<GuidKey, Function>>,
    pub(crate) timed: RefCell<TimedEventManager<Function>>,
}

impl SessionState {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn env(&self) -> Environment {
        self.env
    }

    pub fn map_id(&self) -> Option<MapId> {
        self.map_id
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    /// Script value for `handle`
    pub fn push_handle(&self, lua: &Lua, handle: ObjectHandle) -> mlua::Result<Value> {
        handle_to_value(lua, &self.types.borrow(), handle)
    }

    /// Wrap an object the host keeps ownership of
    ///
    /// # Safety
    /// `obj` must stay alive until the outermost dispatch returns or
    /// [`Session::notify_destroyed`] is called for it.
    pub unsafe fn push_object<T: ScriptType>(&self, lua: &Lua, obj: &T) -> mlua::Result<Value> {
        self.push_handle(lua, self.handles.wrap(obj))
    }

    /// Like [`SessionState::push_object`] with null mapping to nil
    ///
    /// # Safety
    /// A non-null `ptr` must satisfy the requirements of [`SessionState::push_object`].
    pub unsafe fn push_object_ptr<T: ScriptType>(
        &self,
        lua: &Lua,
        ptr: *const T,
    ) -> mlua::Result<Value> {
        match self.handles.wrap_ptr(ptr as *mut T, false) {
            Some(handle) => self.push_handle(lua, handle),
            None => Ok(Value::Nil),
        }
    }

    /// Hand an object over to scripts
    pub fn push_owned<T: ScriptType>(&self, lua: &Lua, obj: Box<T>) -> mlua::Result<Value> {
        self.push_handle(lua, self.handles.wrap_owned(obj))
    }

    fn clear_bindings(&self) {
        self.server_bindings.borrow_mut().clear();
        self.entry_bindings.borrow_mut().clear();
        self.guid_bindings.borrow_mut().clear();
        self.timed.borrow_mut().clear();
    }
}

/// Shared state of the session the calling native function runs in
pub fn session_state(lua: &Lua) -> mlua::Result<Rc<SessionState>> {
    lua.app_data_ref::<Rc<SessionState>>()
        .map(|state| Rc::clone(&state))
        .ok_or_else(|| mlua::Error::runtime("script session is closed"))
}

/// Arguments of one event, built only when someone listens
pub struct EventArgs<'s> {
    lua: &'s Lua,
    state: &'s SessionState,
    values: Vec<Value>,
}

impl<'s> EventArgs<'s> {
    fn new(lua: &'s Lua, state: &'s SessionState) -> Self {
        Self {
            lua,
            state,
            values: Vec::new(),
        }
    }

    pub fn lua(&self) -> &'s Lua {
        self.lua
    }

    pub fn push<V: IntoLua>(&mut self, value: V) -> mlua::Result<&mut Self> {
        self.values.push(value.into_lua(self.lua)?);
        Ok(self)
    }

    pub fn push_nil(&mut self) -> &mut Self {
        self.values.push(Value::Nil);
        self
    }

    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.values.push(push_u64(value));
        self
    }

    pub fn push_guid(&mut self, guid: ObjectGuid) -> &mut Self {
        self.push_u64(guid.0)
    }

    /// # Safety
    /// See [`SessionState::push_object`].
    pub unsafe fn push_object<T: ScriptType>(&mut self, obj: &T) -> mlua::Result<&mut Self> {
        let value = self.state.push_object(self.lua, obj)?;
        self.values.push(value);
        Ok(self)
    }

    /// # Safety
    /// See [`SessionState::push_object_ptr`].
    pub unsafe fn push_object_ptr<T: ScriptType>(
        &mut self,
        ptr: *const T,
    ) -> mlua::Result<&mut Self> {
        let value = self.state.push_object_ptr(self.lua, ptr)?;
        self.values.push(value);
        Ok(self)
    }

    pub fn push_owned<T: ScriptType>(&mut self, obj: Box<T>) -> mlua::Result<&mut Self> {
        let value = self.state.push_owned(self.lua, obj)?;
        self.values.push(value);
        Ok(self)
    }

    pub fn push_handle(&mut self, handle: ObjectHandle) -> mlua::Result<&mut Self> {
        let value = self.state.push_handle(self.lua, handle)?;
        self.values.push(value);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn into_multi(self) -> MultiValue {
        self.values.into_iter().collect()
    }
}

/// Everything a session is opened with
#[derive(Clone)]
pub struct SessionOptions<'a> {
    pub config: Arc<EngineConfig>,
    pub catalog: Arc<HookCatalog>,
    pub scripts: &'a ScriptSet,
    pub types: &'a [TypeDescriptor],
    pub globals: &'a [Method],
    pub map_id: Option<MapId>,
    pub active: Option<ActiveSession>,
}

struct SessionInner {
    // Declared first so callback references are released before the state closes
    state: Rc<SessionState>,
    lua: Lua,
}

pub struct Session {
    id: SessionId,
    env: Environment,
    map_id: Option<MapId>,
    inner: Option<SessionInner>,
}

impl Session {
    /// Create the Lua state, install the API and run every script
    ///
    /// With scripting disabled the session has no Lua state and every call on it
    /// is a no-op.
    pub fn open(options: SessionOptions<'_>) -> Result<Self, SessionError> {
        let id = SessionId::next();
        let env = match options.map_id {
            Some(_) => Environment::MAP,
            None => Environment::WORLD,
        };

        if !options.config.enabled {
            debug!(target: "scripting", "Scripting disabled, session {} has no runtime", id);
            return Ok(Self::detached(options.map_id));
        }

        let lua = Lua::new();
        let state = Rc::new(SessionState {
            id,
            env,
            map_id: options.map_id,
            catalog: options.catalog,
            handles: HandleRegistry::new(),
            types: RefCell::new(TypeRegistry::new()),
            dispatcher: Dispatcher::new(id, options.config.traceback, options.active),
            server_bindings: RefCell::new(BindingStore::new()),
            entry_bindings: RefCell::new(BindingStore::new()),
            guid_bindings: RefCell::new(BindingStore::new()),
            timed: RefCell::new(TimedEventManager::new()),
        });
        lua.set_app_data(Rc::clone(&state));

        install_globals(&lua, GLOBAL_FUNCTIONS, env)?;
        install_globals(&lua, options.globals, env)?;

        {
            let mut types = state.types.borrow_mut();
            types.register(BASE_TYPE);
            for descriptor in options.types {
                types.register(*descriptor);
            }
            types.materialize_all(&lua, env)?;
        }

        loader::configure_package(&lua, options.scripts)?;
        let loaded = loader::run_scripts(&lua, &state.dispatcher, &state.handles, options.scripts)?;

        let session = Self {
            id,
            env,
            map_id: options.map_id,
            inner: Some(SessionInner { state, lua }),
        };

        info!(
            target: "scripting",
            "Opened session {} ({}), loaded {}/{} scripts",
            id,
            session.describe(),
            loaded,
            options.scripts.len()
        );

        session.fire_event(ENGINE_EVENT_ON_STATE_OPEN, |_| Ok(()));
        Ok(session)
    }

    /// A session without a runtime
    pub(crate) fn detached(map_id: Option<MapId>) -> Self {
        Self {
            id: SessionId::next(),
            env: match map_id {
                Some(_) => Environment::MAP,
                None => Environment::WORLD,
            },
            map_id,
            inner: None,
        }
    }

    fn describe(&self) -> String {
        match self.map_id {
            Some(map_id) => format!("map {map_id}"),
            None => "world".to_string(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn env(&self) -> Environment {
        self.env
    }

    pub fn map_id(&self) -> Option<MapId> {
        self.map_id
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// The Lua state, if scripting is enabled
    pub fn lua(&self) -> Option<&Lua> {
        self.inner.as_ref().map(|inner| &inner.lua)
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.inner.as_ref().map(|inner| &*inner.state)
    }

    /// Current dispatch nesting depth
    pub fn event_level(&self) -> u32 {
        self.state().map_or(0, |s| s.dispatcher.event_level())
    }

    /// Deliver a server event to every handler
    ///
    /// `build` pushes the event arguments after the event name. It only runs when
    /// at least one handler is bound. Returns whether any handler was called.
    pub fn fire_event<F>(&self, event: &'static str, build: F) -> bool
    where
        F: FnOnce(&mut EventArgs<'_>) -> mlua::Result<()>,
    {
        let Some(inner) = &self.inner else {
            return false;
        };

        let key = EventKey::new(event);
        if !inner.state.server_bindings.borrow().has_bindings_for(&key) {
            return false;
        }

        let take = || inner.state.server_bindings.borrow_mut().push_refs_for(&key);
        inner.call_all(event, take, build, false).0
    }

    /// Deliver a server event whose handlers may override the host's behavior
    ///
    /// The first handler returning a non-nil value wins; the remaining handlers
    /// are not called.
    pub fn fire_event_with_result<T, F>(&self, event: &'static str, build: F) -> Option<T>
    where
        T: FromLua,
        F: FnOnce(&mut EventArgs<'_>) -> mlua::Result<()>,
    {
        let inner = self.inner.as_ref()?;

        let key = EventKey::new(event);
        if !inner.state.server_bindings.borrow().has_bindings_for(&key) {
            return None;
        }

        let take = || inner.state.server_bindings.borrow_mut().push_refs_for(&key);
        let value = inner.call_all(event, take, build, true).1?;

        match T::from_lua(value, &inner.lua) {
            Ok(result) => Some(result),
            Err(err) => {
                error!(target: "scripting", "Invalid return value from {} handler: {}", event, err);
                None
            }
        }
    }

    /// Deliver an event scoped to one object
    ///
    /// Handlers bound to the object's guid run first, then those bound to its
    /// entry.
    pub fn fire_type_event<F>(
        &self,
        event: &'static str,
        binding_type: BindingType,
        entry: u32,
        guid: ObjectGuid,
        build: F,
    ) -> bool
    where
        F: FnOnce(&mut EventArgs<'_>) -> mlua::Result<()>,
    {
        let Some(inner) = &self.inner else {
            return false;
        };
        let state = &inner.state;

        let guid_key = GuidKey::new(event, binding_type, guid);
        let entry_key = EntryKey::new(event, binding_type, entry);

        let has_guid = state.guid_bindings.borrow().has_bindings_for(&guid_key);
        let has_entry = state.entry_bindings.borrow().has_bindings_for(&entry_key);
        if !has_guid && !has_entry {
            return false;
        }

        let take = || {
            let mut refs = Vec::new();
            if has_guid {
                refs.extend(state.guid_bindings.borrow_mut().push_refs_for(&guid_key));
            }
            if has_entry {
                refs.extend(state.entry_bindings.borrow_mut().push_refs_for(&entry_key));
            }
            refs
        };
        inner.call_all(event, take, build, false).0
    }

    /// Whether any event of `binding_type` is bound to `entry` or `guid`
    pub fn has_type_scoped_bindings(
        &self,
        binding_type: BindingType,
        entry: u32,
        guid: ObjectGuid,
    ) -> bool {
        let Some(state) = self.state() else {
            return false;
        };

        let entries = state.entry_bindings.borrow();
        let guids = state.guid_bindings.borrow();
        state.catalog.type_events(binding_type).any(|event| {
            entries.has_bindings_for(&EntryKey::new(event, binding_type, entry))
                || guids.has_bindings_for(&GuidKey::new(event, binding_type, guid))
        })
    }

    /// Advance the global timed events by `diff` ms
    pub fn update(&self, diff: u64) {
        if let Some(inner) = &self.inner {
            inner.run_timed(None, diff, Value::Nil);
        }
    }

    /// Advance the timed events of `obj` by `diff` ms
    ///
    /// # Safety
    /// See [`SessionState::push_object`].
    pub unsafe fn update_object<T: ScriptType>(&self, obj: &T, diff: u64) {
        let Some(inner) = &self.inner else {
            return;
        };
        let Some(guid) = obj.guid().filter(|guid| !guid.is_empty()) else {
            return;
        };
        if inner.state.timed.borrow().processor(Some(guid)).is_none() {
            return;
        }

        let _level = inner.state.dispatcher.enter(&inner.state.handles);
        let owner = match inner.state.push_object(&inner.lua, obj) {
            Ok(value) => value,
            Err(err) => {
                error!(target: "scripting", "Failed to wrap timed event owner {}: {}", guid, err);
                return;
            }
        };
        inner.run_timed(Some(guid), diff, owner);
    }

    /// The object left the world: drop its timed events and instance bindings
    pub fn remove_object(&self, guid: ObjectGuid) {
        let Some(state) = self.state() else {
            return;
        };

        state.timed.borrow_mut().remove_owner(guid);
        state.guid_bindings.borrow_mut().clear_where(|key| key.guid == guid);
    }

    /// The host is about to free `obj`; outstanding handles stop resolving to it
    pub fn notify_destroyed<T>(&self, obj: &T) -> bool {
        match self.state() {
            Some(state) => state.handles.notify_destroyed(obj as *const T as *const ()),
            None => false,
        }
    }

    /// Fire the close event and tear everything down
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.inner.is_none() {
            return;
        }
        self.fire_event(ENGINE_EVENT_ON_STATE_CLOSE, |_| Ok(()));

        let Some(inner) = self.inner.take() else {
            return;
        };
        inner.state.clear_bindings();
        inner.state.types.borrow_mut().clear();
        inner.lua.remove_app_data::<Rc<SessionState>>();

        debug!(target: "scripting", "Closed session {} ({})", self.id, self.describe());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SessionInner {
    /// Build the arguments once with `build`, then invoke the handlers `take` hands out
    ///
    /// `take` consumes shots, so it only runs once the arguments exist. Returns
    /// whether any handler was called and, with `first_value` set, the first
    /// non-nil result (later handlers are skipped).
    fn call_all<T, F>(
        &self,
        event: &'static str,
        take: T,
        build: F,
        first_value: bool,
    ) -> (bool, Option<Value>)
    where
        T: FnOnce() -> Vec<Function>,
        F: FnOnce(&mut EventArgs<'_>) -> mlua::Result<()>,
    {
        let state = &*self.state;
        let _level = state.dispatcher.enter(&state.handles);

        let mut args = EventArgs::new(&self.lua, state);
        let built = match args.push(event) {
            Ok(_) => build(&mut args),
            Err(err) => Err(err),
        };
        if let Err(err) = built {
            error!(target: "scripting", "Failed to build arguments for {}: {}", event, err);
            return (false, None);
        }
        let args = args.into_multi();

        let refs = take();
        let called = !refs.is_empty();
        let expected = usize::from(first_value);
        for func in refs {
            let results =
                state
                    .dispatcher
                    .invoke_or_nil(&self.lua, &state.handles, &func, args.clone(), expected);

            if first_value {
                if let Some(value) = results.into_iter().next().filter(|v| !v.is_nil()) {
                    return (called, Some(value));
                }
            }
        }

        (called, None)
    }

    /// Sweep one processor, passing `owner` to every callback
    fn run_timed(&self, owner_guid: Option<ObjectGuid>, diff: u64, owner: Value) {
        let state = &*self.state;
        if !state.timed.borrow_mut().advance(owner_guid, diff) {
            return;
        }

        let _level = state.dispatcher.enter(&state.handles);
        loop {
            let due = state.timed.borrow_mut().pop_due(owner_guid);
            let Some(due) = due else {
                break;
            };

            let args = match (due.id.0 as i64, due.delay as i64, due.calls, owner.clone())
                .into_lua_multi(&self.lua)
            {
                Ok(args) => args,
                Err(err) => {
                    error!(target: "scripting", "Failed to build timed event arguments: {}", err);
                    continue;
                }
            };

            state
                .dispatcher
                .invoke_or_nil(&self.lua, &state.handles, &due.callback, args, 0);
        }

        if let Some(guid) = owner_guid {
            state.timed.borrow_mut().prune(guid);
        }
    }
}

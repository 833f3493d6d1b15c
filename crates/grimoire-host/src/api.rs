//! Script-facing registration and timed event functions
//!
//! ```lua
//! local cancel = RegisterServerEvent("PLAYER_EVENT_ON_LOGIN", function(event, player)
//!     print(player:GetName() .. " logged in")
//! end)
//! cancel() -- stop listening
//!
//! RegisterCreatureEvent(1234, "CREATURE_EVENT_ON_SPAWN", on_spawn, 1)
//! local id = CreateLuaEvent(function(id, delay, calls) end, 1000, 0)
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use grimoire_events::{
    BindingKey, BindingType, EntryKey, Environment, EventKey, GuidKey, ObjectGuid,
};
use mlua::{Function, IntoLuaMulti, Lua, MultiValue};

use crate::binding::BindingStore;
use crate::marshal::Args;
use crate::object::{Method, TypeDescriptor, BASE_TYPE_NAME};
use crate::session::{session_state, SessionState};
use crate::timed::TimedEventId;

type StoreAccessor<K> = fn(&SessionState) -> &RefCell<BindingStore<K, Function>>;

const CREATURE: u8 = BindingType::Creature as u8;
const GAMEOBJECT: u8 = BindingType::GameObject as u8;
const ITEM: u8 = BindingType::Item as u8;
const MAP: u8 = BindingType::Map as u8;
const PLAYER_GOSSIP: u8 = BindingType::PlayerGossip as u8;

pub const GLOBAL_FUNCTIONS: &[Method] = &[
    // Registration
    Method::new("RegisterServerEvent", Environment::BOTH, register_server_event),
    Method::new("RegisterCreatureEvent", Environment::BOTH, register_entry_event::<CREATURE>),
    Method::new("RegisterGameObjectEvent", Environment::BOTH, register_entry_event::<GAMEOBJECT>),
    Method::new("RegisterItemEvent", Environment::BOTH, register_entry_event::<ITEM>),
    Method::new("RegisterMapEvent", Environment::BOTH, register_entry_event::<MAP>),
    Method::new("RegisterPlayerGossipEvent", Environment::BOTH, register_entry_event::<PLAYER_GOSSIP>),
    Method::new("RegisterUniqueCreatureEvent", Environment::BOTH, register_guid_event::<CREATURE>),
    Method::new("RegisterUniqueGameObjectEvent", Environment::BOTH, register_guid_event::<GAMEOBJECT>),
    Method::new("RegisterUniqueItemEvent", Environment::BOTH, register_guid_event::<ITEM>),
    // Clearing
    Method::new("ClearServerEvents", Environment::BOTH, clear_server_events),
    Method::new("ClearCreatureEvents", Environment::BOTH, clear_entry_events::<CREATURE>),
    Method::new("ClearGameObjectEvents", Environment::BOTH, clear_entry_events::<GAMEOBJECT>),
    Method::new("ClearItemEvents", Environment::BOTH, clear_entry_events::<ITEM>),
    Method::new("ClearMapEvents", Environment::BOTH, clear_entry_events::<MAP>),
    Method::new("ClearPlayerGossipEvents", Environment::BOTH, clear_entry_events::<PLAYER_GOSSIP>),
    Method::new("ClearUniqueCreatureEvents", Environment::BOTH, clear_guid_events::<CREATURE>),
    Method::new("ClearUniqueGameObjectEvents", Environment::BOTH, clear_guid_events::<GAMEOBJECT>),
    Method::new("ClearUniqueItemEvents", Environment::BOTH, clear_guid_events::<ITEM>),
    // Timed events
    Method::new("CreateLuaEvent", Environment::BOTH, create_lua_event),
    Method::new("RemoveEventById", Environment::BOTH, remove_event_by_id),
    Method::new("RemoveEvents", Environment::BOTH, remove_events),
    // State
    Method::new("GetStateMapId", Environment::BOTH, get_state_map_id),
];

const BASE_METHODS: &[Method] = &[
    Method::new("GetObjectType", Environment::BOTH, get_object_type),
    Method::new("IsValid", Environment::BOTH, is_valid),
    Method::new("RegisterEvent", Environment::BOTH, register_event),
    Method::new("RemoveEventById", Environment::BOTH, remove_object_event_by_id),
    Method::new("RemoveEvents", Environment::BOTH, remove_object_events),
];

/// Root of every type hierarchy
pub const BASE_TYPE: TypeDescriptor =
    TypeDescriptor::abstract_type(BASE_TYPE_NAME, None, BASE_METHODS);

fn binding_type<const T: u8>() -> BindingType {
    BindingType::from_u8(T).unwrap_or(BindingType::Creature)
}

fn resolve_server_event(state: &SessionState, args: &Args<'_>, narg: usize) -> mlua::Result<&'static str> {
    let name: String = args.check(narg)?;
    let hook = state
        .catalog
        .server_event(&name)
        .ok_or_else(|| args.error(narg, format!("unknown event '{name}'")))?;

    if !hook.env.allows(state.env) {
        return Err(args.error(
            narg,
            format!("event '{name}' cannot be registered in this state"),
        ));
    }

    Ok(hook.name)
}

fn resolve_type_event(
    state: &SessionState,
    args: &Args<'_>,
    narg: usize,
    binding_type: BindingType,
) -> mlua::Result<&'static str> {
    let name: String = args.check(narg)?;
    let hook = state
        .catalog
        .type_event(binding_type, &name)
        .ok_or_else(|| args.error(narg, format!("unknown {binding_type} event '{name}'")))?;

    if !hook.env.allows(state.env) {
        return Err(args.error(
            narg,
            format!("event '{name}' cannot be registered in this state"),
        ));
    }

    Ok(hook.name)
}

/// Insert a binding and build the cancel function handed back to the script
fn bind<K>(
    lua: &Lua,
    state: &SessionState,
    store: StoreAccessor<K>,
    key: K,
    func: Function,
    shots: u32,
) -> mlua::Result<MultiValue>
where
    K: BindingKey + 'static,
{
    let id = store(state).borrow_mut().insert(key, func, shots);

    let cancel = lua.create_function(move |lua, ()| {
        if let Some(state) = lua.app_data_ref::<Rc<SessionState>>() {
            store(&state).borrow_mut().remove(id);
        }
        Ok(())
    })?;

    cancel.into_lua_multi(lua)
}

fn register_server_event(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let event = resolve_server_event(&state, &args, 1)?;
    let func = args.function(2)?;
    let shots: u32 = args.opt(3, 0)?;

    bind(lua, &state, |s| &s.server_bindings, EventKey::new(event), func, shots)
}

fn register_entry_event<const T: u8>(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let binding_type = binding_type::<T>();
    let entry: u32 = args.check(1)?;
    let event = resolve_type_event(&state, &args, 2, binding_type)?;
    let func = args.function(3)?;
    let shots: u32 = args.opt(4, 0)?;

    let key = EntryKey::new(event, binding_type, entry);
    bind(lua, &state, |s| &s.entry_bindings, key, func, shots)
}

fn register_guid_event<const T: u8>(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let binding_type = binding_type::<T>();
    let guid: ObjectGuid = args.check(1)?;
    let event = resolve_type_event(&state, &args, 2, binding_type)?;
    let func = args.function(3)?;
    let shots: u32 = args.opt(4, 0)?;

    let key = GuidKey::new(event, binding_type, guid);
    bind(lua, &state, |s| &s.guid_bindings, key, func, shots)
}

fn clear_server_events(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    if args.is_none_or_nil(1) {
        state.server_bindings.borrow_mut().clear();
    } else {
        let event = resolve_server_event(&state, &args, 1)?;
        state.server_bindings.borrow_mut().clear_key(&EventKey::new(event));
    }
    Ok(MultiValue::new())
}

fn clear_entry_events<const T: u8>(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let binding_type = binding_type::<T>();
    let entry: u32 = args.check(1)?;
    let event = if args.is_none_or_nil(2) {
        None
    } else {
        Some(resolve_type_event(&state, &args, 2, binding_type)?)
    };

    state.entry_bindings.borrow_mut().clear_where(|k| {
        k.binding_type == binding_type && k.entry == entry && event.map_or(true, |e| k.event() == e)
    });
    Ok(MultiValue::new())
}

fn clear_guid_events<const T: u8>(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let binding_type = binding_type::<T>();
    let guid: ObjectGuid = args.check(1)?;
    let event = if args.is_none_or_nil(2) {
        None
    } else {
        Some(resolve_type_event(&state, &args, 2, binding_type)?)
    };

    state.guid_bindings.borrow_mut().clear_where(|k| {
        k.binding_type == binding_type && k.guid == guid && event.map_or(true, |e| k.event() == e)
    });
    Ok(MultiValue::new())
}

fn timed_event_args(args: &Args<'_>, first: usize) -> mlua::Result<(Function, u64, u32)> {
    let func = args.function(first)?;
    let delay: u32 = args.check(first + 1)?;
    let repeats: u32 = args.opt(first + 2, 1)?;
    Ok((func, u64::from(delay), repeats))
}

fn create_lua_event(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let (func, delay, repeats) = timed_event_args(&args, 1)?;
    let id = state.timed.borrow_mut().add(None, func, delay, repeats);
    (id.0 as i64).into_lua_multi(lua)
}

fn remove_event_by_id(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let id = TimedEventId(args.check::<u64>(1)?);
    let everywhere: bool = args.check(2)?;

    let mut timed = state.timed.borrow_mut();
    let removed = if everywhere {
        timed.cancel_everywhere(id)
    } else {
        timed.cancel(None, id)
    };
    drop(timed);

    removed.into_lua_multi(lua)
}

fn remove_events(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let everywhere: bool = args.check(1)?;

    let mut timed = state.timed.borrow_mut();
    if everywhere {
        timed.cancel_everything();
    } else {
        timed.cancel_all(None);
    }
    Ok(MultiValue::new())
}

fn get_state_map_id(lua: &Lua, _args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    state.map_id.map(|id| id.0).into_lua_multi(lua)
}

// ============================================================================
// BaseObject methods
// ============================================================================

fn get_object_type(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    args.handle(1)?.type_name().into_lua_multi(lua)
}

fn is_valid(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    args.handle(1)?.is_valid().into_lua_multi(lua)
}

fn object_guid(args: &Args<'_>) -> mlua::Result<ObjectGuid> {
    let handle = args.handle(1)?;
    if !handle.is_valid() {
        return Err(args.error(
            1,
            format!(
                "{} expected, got pointer to nonexisting (invalidated) object ({}). Check your code.",
                handle.type_name(),
                handle.type_name()
            ),
        ));
    }
    handle
        .guid()
        .ok_or_else(|| args.error(1, format!("{} has no guid", handle.type_name())))
}

fn register_event(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let guid = object_guid(&args)?;
    let (func, delay, repeats) = timed_event_args(&args, 2)?;
    let id = state.timed.borrow_mut().add(Some(guid), func, delay, repeats);
    (id.0 as i64).into_lua_multi(lua)
}

fn remove_object_event_by_id(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let guid = object_guid(&args)?;
    let id = TimedEventId(args.check::<u64>(2)?);
    let removed = state.timed.borrow_mut().cancel(Some(guid), id);
    removed.into_lua_multi(lua)
}

fn remove_object_events(lua: &Lua, args: Args<'_>) -> mlua::Result<MultiValue> {
    let state = session_state(lua)?;
    let guid = object_guid(&args)?;
    state.timed.borrow_mut().cancel_all(Some(guid));
    Ok(MultiValue::new())
}

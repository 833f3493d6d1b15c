//! Test world shared by the integration tests
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use grimoire_host::events::{Environment, ObjectGuid};
use grimoire_host::mlua::{FromLuaMulti, IntoLuaMulti, Lua, MultiValue};
use grimoire_host::{
    push_u64, Args, EngineConfig, EngineHost, Method, ScriptSet, ScriptType, Session,
    TypeDescriptor, BASE_TYPE_NAME,
};

// ============================================================================
// Player
// ============================================================================

pub struct Player {
    pub guid: ObjectGuid,
    pub name: String,
    pub level: Cell<u8>,
}

impl Player {
    pub fn new(guid: u64, name: &str) -> Self {
        Self {
            guid: ObjectGuid(guid),
            name: name.to_string(),
            level: Cell::new(1),
        }
    }
}

impl ScriptType for Player {
    const TYPE_NAME: &'static str = "Player";
    const PARENT: Option<&'static str> = Some("Unit");
    const METHODS: &'static [Method] = &[
        Method::new("GetName", Environment::BOTH, player_get_name),
        Method::new("GetGUID", Environment::BOTH, player_get_guid),
        Method::new("SetLevel", Environment::BOTH, player_set_level),
    ];

    fn guid(&self) -> Option<ObjectGuid> {
        Some(self.guid)
    }
}

fn player_get_name(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let player = args.object::<Player>(1)?;
    player.name.as_str().into_lua_multi(lua)
}

fn player_get_guid(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let player = args.object::<Player>(1)?;
    Ok(MultiValue::from_iter([push_u64(player.guid.0)]))
}

fn player_set_level(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let player = args.object::<Player>(1)?;
    let level: u8 = args.check(2)?;
    player.level.set(level);
    Ok(MultiValue::new())
}

/// Abstract parent of [`Player`]
pub const UNIT: TypeDescriptor = TypeDescriptor::abstract_type(
    "Unit",
    Some(BASE_TYPE_NAME),
    &[Method::new("GetLevel", Environment::BOTH, unit_get_level)],
);

fn unit_get_level(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    if let Some(player) = args.try_object::<Player>(1) {
        return player.level.get().into_lua_multi(lua);
    }
    Err(args.error(1, "Unit expected"))
}

// ============================================================================
// Packet (owned by scripts)
// ============================================================================

pub struct Packet {
    pub opcode: u16,
    pub drops: Rc<Cell<usize>>,
}

impl Drop for Packet {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

impl ScriptType for Packet {
    const TYPE_NAME: &'static str = "WorldPacket";
    const OWNS_MEMORY: bool = true;
    const METHODS: &'static [Method] = &[Method::new(
        "GetOpcode",
        Environment::BOTH,
        packet_get_opcode,
    )];
}

fn packet_get_opcode(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let packet = args.object::<Packet>(1)?;
    packet.opcode.into_lua_multi(lua)
}

// ============================================================================
// Record() global
// ============================================================================

thread_local! {
    static RECORDS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn record(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let text: String = args.check(1)?;
    RECORDS.with(|r| r.borrow_mut().push(text));
    Ok(MultiValue::new())
}

pub const TEST_GLOBALS: &[Method] = &[Method::new("Record", Environment::BOTH, record)];

/// Everything scripts passed to `Record` on this thread, draining the log
pub fn take_records() -> Vec<String> {
    RECORDS.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

// ============================================================================
// Helpers
// ============================================================================

pub fn builder() -> grimoire_host::EngineHostBuilder {
    EngineHost::builder()
        .with_type_descriptor(UNIT)
        .with_type::<Player>()
        .with_type::<Packet>()
        .with_globals(TEST_GLOBALS)
}

/// Host whose sessions run `script`
pub fn host_with(script: &str) -> EngineHost {
    builder()
        .with_scripts(ScriptSet::from_sources([("test", script)]))
        .build()
        .expect("host should build")
}

pub fn host_with_config(config: EngineConfig) -> EngineHost {
    builder()
        .with_config(config)
        .build()
        .expect("host should build")
}

/// Evaluate `code` in the session's Lua state
pub fn eval<T: FromLuaMulti>(session: &Session, code: &str) -> T {
    session
        .lua()
        .expect("scripting is enabled")
        .load(code)
        .eval()
        .expect("code should evaluate")
}

//! A small simulated world that exercises every script entry point
//!
//! The world owns its objects in boxes so their addresses stay put while
//! scripts hold handles to them. Everything happens on a fixed schedule driven
//! by [`World::tick`], which keeps runs reproducible.

use std::cell::{Cell, RefCell};

use grimoire_events::hooks::{
    CREATURE_EVENT_ON_DESPAWN, CREATURE_EVENT_ON_DIED, CREATURE_EVENT_ON_SPAWN,
    MAP_EVENT_ON_CREATE, MAP_EVENT_ON_DESTROY, MAP_EVENT_ON_PLAYER_ENTER, MAP_EVENT_ON_UPDATE,
    PLAYER_EVENT_ON_CHAT, PLAYER_EVENT_ON_GIVE_XP, PLAYER_EVENT_ON_KILL_CREATURE,
    PLAYER_EVENT_ON_LOGIN, PLAYER_EVENT_ON_LOGOUT, WORLD_EVENT_ON_CONFIG_LOAD,
    WORLD_EVENT_ON_SHUTDOWN, WORLD_EVENT_ON_STARTUP, WORLD_EVENT_ON_UPDATE,
};
use grimoire_events::{BindingType, Environment, MapId, ObjectGuid};
use grimoire_host::mlua::{IntoLuaMulti, Lua, MultiValue};
use grimoire_host::{
    push_u64, session_state, Args, EngineHost, EngineHostBuilder, HostError, Method, ScriptType,
    Session, TypeDescriptor, BASE_TYPE_NAME,
};
use tracing::{debug, info};

use crate::app_config::WorldConfig;

/// Ticks between creature spawns
const SPAWN_EVERY: u64 = 10;
/// Ticks between player chat lines
const CHAT_EVERY: u64 = 15;
/// Ticks between kills
const KILL_EVERY: u64 = 25;

const CREATURE_ENTRIES: [u32; 3] = [1001, 1002, 1003];
const BASE_XP: u32 = 50;

// ============================================================================
// Object types
// ============================================================================

pub struct Map {
    pub id: MapId,
    pub name: String,
}

impl ScriptType for Map {
    const TYPE_NAME: &'static str = "Map";
    const METHODS: &'static [Method] = &[
        Method::new("GetMapId", Environment::BOTH, map_get_id),
        Method::new("GetName", Environment::BOTH, map_get_name),
    ];
}

fn map_get_id(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    args.object::<Map>(1)?.id.0.into_lua_multi(lua)
}

fn map_get_name(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    args.object::<Map>(1)?.name.as_str().into_lua_multi(lua)
}

/// Abstract parent of [`Player`] and [`Creature`]
pub const UNIT: TypeDescriptor = TypeDescriptor::abstract_type(
    "Unit",
    Some(BASE_TYPE_NAME),
    &[
        Method::new("GetName", Environment::BOTH, unit_get_name),
        Method::new("GetGUID", Environment::BOTH, unit_get_guid),
        Method::new("GetMapId", Environment::BOTH, unit_get_map_id),
    ],
);

// Most derived type first
fn unit_get_name(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    if let Some(player) = args.try_object::<Player>(1) {
        return player.name.as_str().into_lua_multi(lua);
    }
    let creature = args.object::<Creature>(1)?;
    creature.name.as_str().into_lua_multi(lua)
}

fn unit_get_guid(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let guid = match args.try_object::<Player>(1) {
        Some(player) => player.guid,
        None => args.object::<Creature>(1)?.guid,
    };
    Ok(MultiValue::from_iter([push_u64(guid.0)]))
}

fn unit_get_map_id(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let map = match args.try_object::<Player>(1) {
        Some(player) => player.map,
        None => args.object::<Creature>(1)?.map,
    };
    map.map(|id| id.0).into_lua_multi(lua)
}

pub struct Player {
    pub guid: ObjectGuid,
    pub name: String,
    pub map: Option<MapId>,
    pub level: Cell<u8>,
    pub xp: Cell<u32>,
}

impl ScriptType for Player {
    const TYPE_NAME: &'static str = "Player";
    const PARENT: Option<&'static str> = Some("Unit");
    const METHODS: &'static [Method] = &[
        Method::new("GetLevel", Environment::BOTH, player_get_level),
        Method::new("SetLevel", Environment::BOTH, player_set_level),
        Method::new("GetXP", Environment::BOTH, player_get_xp),
        Method::new(
            "SendBroadcastMessage",
            Environment::BOTH,
            player_send_broadcast_message,
        ),
        Method::new("SendPacket", Environment::BOTH, player_send_packet),
    ];

    fn guid(&self) -> Option<ObjectGuid> {
        Some(self.guid)
    }
}

fn player_get_level(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    args.object::<Player>(1)?.level.get().into_lua_multi(lua)
}

fn player_set_level(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let player = args.object::<Player>(1)?;
    let level: u8 = args.check(2)?;
    player.level.set(level);
    Ok(MultiValue::new())
}

fn player_get_xp(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    args.object::<Player>(1)?.xp.get().into_lua_multi(lua)
}

fn player_send_broadcast_message(
    _lua: &Lua,
    args: Args<'_>,
) -> grimoire_host::mlua::Result<MultiValue> {
    let player = args.object::<Player>(1)?;
    let message: String = args.check(2)?;
    info!(target: "world", "[{}] {}", player.name, message);
    Ok(MultiValue::new())
}

fn player_send_packet(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let player = args.object::<Player>(1)?;
    let packet = args.object::<WorldPacket>(2)?;
    info!(
        target: "world",
        "{} <- packet 0x{:04X} ({} bytes)",
        player.name,
        packet.opcode,
        packet.data.borrow().len()
    );
    Ok(MultiValue::new())
}

pub struct Creature {
    pub guid: ObjectGuid,
    pub entry: u32,
    pub name: String,
    pub map: Option<MapId>,
    pub health: Cell<u32>,
}

impl ScriptType for Creature {
    const TYPE_NAME: &'static str = "Creature";
    const PARENT: Option<&'static str> = Some("Unit");
    const METHODS: &'static [Method] = &[
        Method::new("GetEntry", Environment::BOTH, creature_get_entry),
        Method::new("GetHealth", Environment::BOTH, creature_get_health),
        Method::new("SetHealth", Environment::MAP, creature_set_health),
    ];

    fn guid(&self) -> Option<ObjectGuid> {
        Some(self.guid)
    }
}

fn creature_get_entry(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    args.object::<Creature>(1)?.entry.into_lua_multi(lua)
}

fn creature_get_health(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    args.object::<Creature>(1)?.health.get().into_lua_multi(lua)
}

fn creature_set_health(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let creature = args.object::<Creature>(1)?;
    creature.health.set(args.check(2)?);
    Ok(MultiValue::new())
}

/// Outgoing packet built by scripts; the script state owns it
pub struct WorldPacket {
    pub opcode: u16,
    pub data: RefCell<Vec<u8>>,
}

impl ScriptType for WorldPacket {
    const TYPE_NAME: &'static str = "WorldPacket";
    const OWNS_MEMORY: bool = true;
    const METHODS: &'static [Method] = &[
        Method::new("GetOpcode", Environment::BOTH, packet_get_opcode),
        Method::new("GetSize", Environment::BOTH, packet_get_size),
        Method::new("WriteUByte", Environment::BOTH, packet_write_ubyte),
        Method::new("WriteULong", Environment::BOTH, packet_write_ulong),
    ];
}

fn packet_get_opcode(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    args.object::<WorldPacket>(1)?.opcode.into_lua_multi(lua)
}

fn packet_get_size(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let size = args.object::<WorldPacket>(1)?.data.borrow().len();
    (size as u32).into_lua_multi(lua)
}

fn packet_write_ubyte(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let packet = args.object::<WorldPacket>(1)?;
    let value: u8 = args.check(2)?;
    packet.data.borrow_mut().push(value);
    Ok(MultiValue::new())
}

fn packet_write_ulong(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let packet = args.object::<WorldPacket>(1)?;
    let value: u32 = args.check(2)?;
    packet.data.borrow_mut().extend_from_slice(&value.to_le_bytes());
    Ok(MultiValue::new())
}

// ============================================================================
// Global functions
// ============================================================================

pub const WORLD_GLOBALS: &[Method] = &[
    Method::new("CreatePacket", Environment::BOTH, create_packet),
    Method::new("SendWorldMessage", Environment::WORLD, send_world_message),
];

fn create_packet(lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let opcode: u16 = args.check(1)?;
    let state = session_state(lua)?;
    let packet = state.push_owned(
        lua,
        Box::new(WorldPacket {
            opcode,
            data: RefCell::new(Vec::new()),
        }),
    )?;
    Ok(MultiValue::from_iter([packet]))
}

fn send_world_message(_lua: &Lua, args: Args<'_>) -> grimoire_host::mlua::Result<MultiValue> {
    let message: String = args.check(1)?;
    info!(target: "world", "[World] {}", message);
    Ok(MultiValue::new())
}

/// Host builder with every world type and global registered
pub fn host_builder() -> EngineHostBuilder {
    EngineHost::builder()
        .with_type::<Map>()
        .with_type_descriptor(UNIT)
        .with_type::<Player>()
        .with_type::<Creature>()
        .with_type::<WorldPacket>()
        .with_globals(WORLD_GLOBALS)
}

// ============================================================================
// World
// ============================================================================

/// Counters for what happened during a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorldStats {
    pub ticks: u64,
    pub spawned: u64,
    pub killed: u64,
    pub chat_lines: u64,
    pub chat_suppressed: u64,
    pub reloads: u64,
}

pub struct World {
    // Dropped before the objects scripts may still point at
    host: EngineHost,
    maps: Vec<Box<Map>>,
    players: Vec<Box<Player>>,
    creatures: Vec<Box<Creature>>,
    next_guid: u64,
    stats: WorldStats,
}

impl World {
    pub fn new(host: EngineHost, config: &WorldConfig) -> Self {
        let maps = config
            .maps
            .iter()
            .map(|&id| {
                Box::new(Map {
                    id: MapId(id),
                    name: format!("Map {}", id),
                })
            })
            .collect();

        Self {
            host,
            maps,
            players: Vec::new(),
            creatures: Vec::new(),
            next_guid: 1,
            stats: WorldStats::default(),
        }
    }

    pub fn host(&self) -> &EngineHost {
        &self.host
    }

    pub fn stats(&self) -> &WorldStats {
        &self.stats
    }

    pub fn players(&self) -> &[Box<Player>] {
        &self.players
    }

    pub fn creatures(&self) -> &[Box<Creature>] {
        &self.creatures
    }

    fn next_guid(&mut self) -> ObjectGuid {
        let guid = ObjectGuid(self.next_guid);
        self.next_guid += 1;
        guid
    }

    fn session_for(&self, map: Option<MapId>) -> &Session {
        self.host.session_for(map)
    }

    /// Open map sessions and announce startup
    pub fn start(&mut self, player_names: &[String]) -> Result<(), HostError> {
        self.open_maps()?;

        self.host.world().fire_event(WORLD_EVENT_ON_STARTUP, |_| Ok(()));

        for name in player_names {
            self.login(name);
        }
        Ok(())
    }

    fn open_maps(&mut self) -> Result<(), HostError> {
        for map in &self.maps {
            self.host.create_map_session(map.id)?;
        }
        for map in &self.maps {
            self.session_for(Some(map.id))
                .fire_event(MAP_EVENT_ON_CREATE, |args| {
                    unsafe { args.push_object(&**map) }?;
                    Ok(())
                });
        }
        Ok(())
    }

    fn login(&mut self, name: &str) {
        let guid = self.next_guid();
        let map = self.maps.get(self.players.len() % self.maps.len().max(1)).map(|m| m.id);

        let player = Box::new(Player {
            guid,
            name: name.to_string(),
            map,
            level: Cell::new(1),
            xp: Cell::new(0),
        });

        info!(target: "world", "{} logged in ({})", player.name, guid);
        let session = self.session_for(map);
        session.fire_event(PLAYER_EVENT_ON_LOGIN, |args| {
            unsafe { args.push_object(&*player) }?;
            Ok(())
        });
        if let Some(map) = map.and_then(|id| self.maps.iter().find(|m| m.id == id)) {
            session.fire_event(MAP_EVENT_ON_PLAYER_ENTER, |args| {
                unsafe { args.push_object(&**map)?.push_object(&*player) }?;
                Ok(())
            });
        }

        self.players.push(player);
    }

    /// Advance the world by `diff` ms
    pub fn tick(&mut self, diff: u64) {
        self.stats.ticks += 1;
        let tick = self.stats.ticks;

        self.host.world().fire_event(WORLD_EVENT_ON_UPDATE, |args| {
            args.push(diff)?;
            Ok(())
        });
        self.host.update(diff);

        for map in &self.maps {
            self.session_for(Some(map.id))
                .fire_event(MAP_EVENT_ON_UPDATE, |args| {
                    unsafe { args.push_object(&**map) }?.push(diff)?;
                    Ok(())
                });
        }

        for player in &self.players {
            unsafe { self.session_for(player.map).update_object(&**player, diff) };
        }
        for creature in &self.creatures {
            unsafe { self.session_for(creature.map).update_object(&**creature, diff) };
        }

        if tick % SPAWN_EVERY == 0 {
            self.spawn_creature();
        }
        if tick % CHAT_EVERY == 0 {
            self.chat(format!("tick {}", tick));
        }
        if tick % KILL_EVERY == 0 {
            self.kill_oldest_creature();
        }
    }

    fn spawn_creature(&mut self) {
        let guid = self.next_guid();
        let index = self.stats.spawned as usize;
        let entry = CREATURE_ENTRIES[index % CREATURE_ENTRIES.len()];
        let map = self.maps.get(index % self.maps.len().max(1)).map(|m| m.id);

        let creature = Box::new(Creature {
            guid,
            entry,
            name: format!("Creature {}", entry),
            map,
            health: Cell::new(100),
        });

        debug!(target: "world", "Spawned {} ({})", creature.name, guid);
        self.session_for(map).fire_type_event(
            CREATURE_EVENT_ON_SPAWN,
            BindingType::Creature,
            entry,
            guid,
            |args| {
                unsafe { args.push_object(&*creature) }?;
                Ok(())
            },
        );

        self.creatures.push(creature);
        self.stats.spawned += 1;
    }

    fn chat(&mut self, message: String) {
        for player in &self.players {
            self.stats.chat_lines += 1;
            let allowed = self
                .session_for(player.map)
                .fire_event_with_result::<bool, _>(PLAYER_EVENT_ON_CHAT, |args| {
                    unsafe { args.push_object(&**player) }?.push(message.as_str())?;
                    Ok(())
                });

            if allowed == Some(false) {
                self.stats.chat_suppressed += 1;
                debug!(target: "world", "Chat from {} suppressed", player.name);
            } else {
                info!(target: "world", "{}: {}", player.name, message);
            }
        }
    }

    fn kill_oldest_creature(&mut self) {
        if self.creatures.is_empty() {
            return;
        }
        let creature = self.creatures.remove(0);

        if let Some(killer) = self.players.first() {
            let session = self.session_for(killer.map);
            session.fire_event(PLAYER_EVENT_ON_KILL_CREATURE, |args| {
                unsafe { args.push_object(&**killer)?.push_object(&*creature) }?;
                Ok(())
            });
            self.session_for(creature.map).fire_type_event(
                CREATURE_EVENT_ON_DIED,
                BindingType::Creature,
                creature.entry,
                creature.guid,
                |args| {
                    unsafe { args.push_object(&*creature)?.push_object(&**killer) }?;
                    Ok(())
                },
            );

            let xp = session
                .fire_event_with_result::<u32, _>(PLAYER_EVENT_ON_GIVE_XP, |args| {
                    unsafe { args.push_object(&**killer) }?.push(BASE_XP)?;
                    Ok(())
                })
                .unwrap_or(BASE_XP);
            killer.xp.set(killer.xp.get() + xp);
        }

        self.despawn(creature);
        self.stats.killed += 1;
    }

    fn despawn(&self, creature: Box<Creature>) {
        self.session_for(creature.map).fire_type_event(
            CREATURE_EVENT_ON_DESPAWN,
            BindingType::Creature,
            creature.entry,
            creature.guid,
            |args| {
                unsafe { args.push_object(&*creature) }?;
                Ok(())
            },
        );

        self.host.notify_destroyed(&*creature);
        self.host.remove_object(creature.guid);
        debug!(target: "world", "Despawned {} ({})", creature.name, creature.guid);
    }

    /// Rescan scripts and replay the events a fresh state needs
    pub fn reload(&mut self) -> Result<(), HostError> {
        self.host.reload()?;
        self.stats.reloads += 1;

        self.host.world().fire_event(WORLD_EVENT_ON_CONFIG_LOAD, |args| {
            args.push(true)?;
            Ok(())
        });
        for map in &self.maps {
            self.session_for(Some(map.id))
                .fire_event(MAP_EVENT_ON_CREATE, |args| {
                    unsafe { args.push_object(&**map) }?;
                    Ok(())
                });
        }
        Ok(())
    }

    /// Log everyone out, close the maps and tear down the host
    pub fn shutdown(mut self) -> WorldStats {
        for creature in std::mem::take(&mut self.creatures) {
            self.despawn(creature);
        }

        for player in std::mem::take(&mut self.players) {
            self.session_for(player.map)
                .fire_event(PLAYER_EVENT_ON_LOGOUT, |args| {
                    unsafe { args.push_object(&*player) }?;
                    Ok(())
                });
            self.host.notify_destroyed(&*player);
            self.host.remove_object(player.guid);
        }

        self.host.world().fire_event(WORLD_EVENT_ON_SHUTDOWN, |_| Ok(()));

        for map in &self.maps {
            self.session_for(Some(map.id))
                .fire_event(MAP_EVENT_ON_DESTROY, |args| {
                    unsafe { args.push_object(&**map) }?;
                    Ok(())
                });
            self.host.notify_destroyed(&**map);
        }
        for map in &self.maps {
            self.host.destroy_map_session(map.id);
        }

        let stats = std::mem::take(&mut self.stats);
        info!(
            target: "world",
            "World stopped after {} ticks: {} spawned, {} killed, {} reloads",
            stats.ticks,
            stats.spawned,
            stats.killed,
            stats.reloads
        );
        stats
    }
}

//! Hook catalog
//!
//! Every event a script may register for is listed here together with the
//! environments it can be registered in. Registration of a name that is not in
//! the catalog is rejected by the host.

use std::collections::HashMap;

use crate::{BindingType, Environment};

/// Fired after every script of a session has been loaded
pub const ENGINE_EVENT_ON_STATE_OPEN: &str = "ENGINE_EVENT_ON_STATE_OPEN";
/// Fired right before a session is torn down (shutdown or reload)
pub const ENGINE_EVENT_ON_STATE_CLOSE: &str = "ENGINE_EVENT_ON_STATE_CLOSE";

pub const WORLD_EVENT_ON_STARTUP: &str = "WORLD_EVENT_ON_STARTUP";
pub const WORLD_EVENT_ON_SHUTDOWN: &str = "WORLD_EVENT_ON_SHUTDOWN";
pub const WORLD_EVENT_ON_UPDATE: &str = "WORLD_EVENT_ON_UPDATE";
pub const WORLD_EVENT_ON_CONFIG_LOAD: &str = "WORLD_EVENT_ON_CONFIG_LOAD";
pub const MAP_EVENT_ON_CREATE: &str = "MAP_EVENT_ON_CREATE";
pub const MAP_EVENT_ON_DESTROY: &str = "MAP_EVENT_ON_DESTROY";
pub const MAP_EVENT_ON_UPDATE: &str = "MAP_EVENT_ON_UPDATE";
pub const MAP_EVENT_ON_PLAYER_ENTER: &str = "MAP_EVENT_ON_PLAYER_ENTER";
pub const MAP_EVENT_ON_PLAYER_LEAVE: &str = "MAP_EVENT_ON_PLAYER_LEAVE";
pub const PLAYER_EVENT_ON_LOGIN: &str = "PLAYER_EVENT_ON_LOGIN";
pub const PLAYER_EVENT_ON_LOGOUT: &str = "PLAYER_EVENT_ON_LOGOUT";
pub const PLAYER_EVENT_ON_CHAT: &str = "PLAYER_EVENT_ON_CHAT";
pub const PLAYER_EVENT_ON_GIVE_XP: &str = "PLAYER_EVENT_ON_GIVE_XP";
pub const PLAYER_EVENT_ON_KILL_PLAYER: &str = "PLAYER_EVENT_ON_KILL_PLAYER";
pub const PLAYER_EVENT_ON_KILL_CREATURE: &str = "PLAYER_EVENT_ON_KILL_CREATURE";
pub const PLAYER_EVENT_ON_COMMAND: &str = "PLAYER_EVENT_ON_COMMAND";

pub const CREATURE_EVENT_ON_SPAWN: &str = "CREATURE_EVENT_ON_SPAWN";
pub const CREATURE_EVENT_ON_DESPAWN: &str = "CREATURE_EVENT_ON_DESPAWN";
pub const CREATURE_EVENT_ON_ENTER_COMBAT: &str = "CREATURE_EVENT_ON_ENTER_COMBAT";
pub const CREATURE_EVENT_ON_DIED: &str = "CREATURE_EVENT_ON_DIED";
pub const CREATURE_EVENT_ON_AIUPDATE: &str = "CREATURE_EVENT_ON_AIUPDATE";
pub const GAMEOBJECT_EVENT_ON_SPAWN: &str = "GAMEOBJECT_EVENT_ON_SPAWN";
pub const GAMEOBJECT_EVENT_ON_USE: &str = "GAMEOBJECT_EVENT_ON_USE";
pub const GAMEOBJECT_EVENT_ON_AIUPDATE: &str = "GAMEOBJECT_EVENT_ON_AIUPDATE";
pub const ITEM_EVENT_ON_USE: &str = "ITEM_EVENT_ON_USE";
pub const ITEM_EVENT_ON_EQUIP: &str = "ITEM_EVENT_ON_EQUIP";
pub const ITEM_EVENT_ON_EXPIRE: &str = "ITEM_EVENT_ON_EXPIRE";
pub const INSTANCE_EVENT_ON_INITIALIZE: &str = "INSTANCE_EVENT_ON_INITIALIZE";
pub const INSTANCE_EVENT_ON_UPDATE: &str = "INSTANCE_EVENT_ON_UPDATE";
pub const INSTANCE_EVENT_ON_PLAYER_ENTER: &str = "INSTANCE_EVENT_ON_PLAYER_ENTER";
pub const GOSSIP_EVENT_ON_HELLO: &str = "GOSSIP_EVENT_ON_HELLO";
pub const GOSSIP_EVENT_ON_SELECT: &str = "GOSSIP_EVENT_ON_SELECT";

/// One catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookInfo {
    pub name: &'static str,
    /// Environments the hook may be registered in; empty means any
    pub env: Environment,
}

const fn hook(name: &'static str, env: Environment) -> HookInfo {
    HookInfo { name, env }
}

const ANY: Environment = Environment::empty();

pub const SERVER_EVENTS: &[HookInfo] = &[
    hook(ENGINE_EVENT_ON_STATE_OPEN, ANY),      // (event)
    hook(ENGINE_EVENT_ON_STATE_CLOSE, ANY),     // (event)
    hook(WORLD_EVENT_ON_STARTUP, Environment::WORLD), // (event)
    hook(WORLD_EVENT_ON_SHUTDOWN, Environment::WORLD), // (event)
    hook(WORLD_EVENT_ON_UPDATE, Environment::WORLD), // (event, diff)
    hook(WORLD_EVENT_ON_CONFIG_LOAD, Environment::WORLD), // (event, reload)
    hook(MAP_EVENT_ON_CREATE, ANY),             // (event, map)
    hook(MAP_EVENT_ON_DESTROY, ANY),            // (event, map)
    hook(MAP_EVENT_ON_UPDATE, Environment::MAP), // (event, map, diff)
    hook(MAP_EVENT_ON_PLAYER_ENTER, ANY),       // (event, map, player)
    hook(MAP_EVENT_ON_PLAYER_LEAVE, ANY),       // (event, map, player)
    hook(PLAYER_EVENT_ON_LOGIN, ANY),           // (event, player)
    hook(PLAYER_EVENT_ON_LOGOUT, ANY),          // (event, player)
    hook(PLAYER_EVENT_ON_CHAT, ANY),            // (event, player, msg) - can return false
    hook(PLAYER_EVENT_ON_GIVE_XP, ANY),         // (event, player, amount) - can return new amount
    hook(PLAYER_EVENT_ON_KILL_PLAYER, Environment::MAP), // (event, killer, killed)
    hook(PLAYER_EVENT_ON_KILL_CREATURE, ANY),   // (event, killer, killed)
    hook(PLAYER_EVENT_ON_COMMAND, Environment::WORLD), // (event, player, command) - can return false
];

pub const CREATURE_EVENTS: &[HookInfo] = &[
    hook(CREATURE_EVENT_ON_SPAWN, ANY),         // (event, creature)
    hook(CREATURE_EVENT_ON_DESPAWN, ANY),       // (event, creature)
    hook(CREATURE_EVENT_ON_ENTER_COMBAT, Environment::MAP), // (event, creature, target)
    hook(CREATURE_EVENT_ON_DIED, Environment::MAP), // (event, creature, killer)
    hook(CREATURE_EVENT_ON_AIUPDATE, Environment::MAP), // (event, creature, diff)
];

pub const GAMEOBJECT_EVENTS: &[HookInfo] = &[
    hook(GAMEOBJECT_EVENT_ON_SPAWN, ANY),       // (event, gameobject)
    hook(GAMEOBJECT_EVENT_ON_USE, Environment::MAP), // (event, gameobject, player) - can return true
    hook(GAMEOBJECT_EVENT_ON_AIUPDATE, Environment::MAP), // (event, gameobject, diff)
];

pub const ITEM_EVENTS: &[HookInfo] = &[
    hook(ITEM_EVENT_ON_USE, ANY),               // (event, player, item) - can return false
    hook(ITEM_EVENT_ON_EQUIP, ANY),             // (event, player, item)
    hook(ITEM_EVENT_ON_EXPIRE, ANY),            // (event, player, itemEntry)
];

pub const MAP_EVENTS: &[HookInfo] = &[
    hook(INSTANCE_EVENT_ON_INITIALIZE, Environment::MAP), // (event, map)
    hook(INSTANCE_EVENT_ON_UPDATE, Environment::MAP), // (event, map, diff)
    hook(INSTANCE_EVENT_ON_PLAYER_ENTER, Environment::MAP), // (event, map, player)
];

pub const PLAYER_GOSSIP_EVENTS: &[HookInfo] = &[
    hook(GOSSIP_EVENT_ON_HELLO, ANY),           // (event, player, object)
    hook(GOSSIP_EVENT_ON_SELECT, ANY),          // (event, player, object, sender, action)
];

/// Lookup tables for every known hook
#[derive(Debug, Clone)]
pub struct HookCatalog {
    server: HashMap<&'static str, HookInfo>,
    typed: [HashMap<&'static str, HookInfo>; BindingType::COUNT],
}

impl HookCatalog {
    /// Build a catalog from explicit tables
    pub fn from_tables(server: &[HookInfo], typed: &[(BindingType, &[HookInfo])]) -> Self {
        let mut catalog = Self {
            server: server.iter().map(|h| (h.name, *h)).collect(),
            typed: std::array::from_fn(|_| HashMap::new()),
        };

        for (binding_type, hooks) in typed {
            catalog.typed[binding_type.index()].extend(hooks.iter().map(|h| (h.name, *h)));
        }

        catalog
    }

    /// Catalog of the events the world host fires
    pub fn builtin() -> Self {
        Self::from_tables(
            SERVER_EVENTS,
            &[
                (BindingType::Creature, CREATURE_EVENTS),
                (BindingType::GameObject, GAMEOBJECT_EVENTS),
                (BindingType::Item, ITEM_EVENTS),
                (BindingType::Map, MAP_EVENTS),
                (BindingType::PlayerGossip, PLAYER_GOSSIP_EVENTS),
            ],
        )
    }

    pub fn server_event(&self, name: &str) -> Option<HookInfo> {
        self.server.get(name).copied()
    }

    pub fn type_event(&self, binding_type: BindingType, name: &str) -> Option<HookInfo> {
        self.typed[binding_type.index()].get(name).copied()
    }

    /// Every event name registered for `binding_type`
    pub fn type_events(&self, binding_type: BindingType) -> impl Iterator<Item = &'static str> + '_ {
        self.typed[binding_type.index()].keys().copied()
    }

    pub fn server_event_count(&self) -> usize {
        self.server.len()
    }
}

impl Default for HookCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let catalog = HookCatalog::builtin();

        let hook = catalog.server_event("PLAYER_EVENT_ON_KILL_PLAYER").unwrap();
        assert_eq!(hook.env, Environment::MAP);
        assert!(catalog.server_event("NOT_AN_EVENT").is_none());

        assert!(catalog
            .type_event(BindingType::Creature, CREATURE_EVENT_ON_SPAWN)
            .is_some());
        // Type events are not visible through the server table
        assert!(catalog.server_event(CREATURE_EVENT_ON_SPAWN).is_none());
        assert!(catalog
            .type_event(BindingType::Item, CREATURE_EVENT_ON_SPAWN)
            .is_none());
    }

    #[test]
    fn test_lookup_returns_static_name() {
        let catalog = HookCatalog::builtin();
        let requested = String::from(WORLD_EVENT_ON_UPDATE);
        let hook = catalog.server_event(&requested).unwrap();
        assert_eq!(hook.name, WORLD_EVENT_ON_UPDATE);
    }

    #[test]
    fn test_type_events_lists_all_entries() {
        let catalog = HookCatalog::builtin();
        let mut names: Vec<_> = catalog.type_events(BindingType::PlayerGossip).collect();
        names.sort();
        assert_eq!(names, vec![GOSSIP_EVENT_ON_HELLO, GOSSIP_EVENT_ON_SELECT]);
    }

    #[test]
    fn test_custom_tables() {
        let catalog = HookCatalog::from_tables(
            &[HookInfo {
                name: "CUSTOM",
                env: Environment::WORLD,
            }],
            &[],
        );
        assert_eq!(catalog.server_event_count(), 1);
        assert_eq!(catalog.type_events(BindingType::Creature).count(), 0);
    }
}

//! Event keys and catalog types shared between the scripting host and the world
//!
//! This crate has no dependency on the script runtime so that world code can name
//! events, objects and binding scopes without pulling in Lua.
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod environment;
pub mod hooks;

pub use environment::Environment;
pub use hooks::{HookCatalog, HookInfo};

// ============================================================================
// Identifiers
// ============================================================================

/// Globally unique identifier of a world object instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectGuid(pub u64);

impl ObjectGuid {
    pub const EMPTY: ObjectGuid = ObjectGuid(0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Identifier of a map (one world subdivision with its own script session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(pub u32);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of object a type-scoped or instance-scoped binding refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BindingType {
    Creature = 0,
    GameObject = 1,
    Item = 2,
    Map = 3,
    PlayerGossip = 4,
}

impl BindingType {
    pub const ALL: [BindingType; 5] = [
        BindingType::Creature,
        BindingType::GameObject,
        BindingType::Item,
        BindingType::Map,
        BindingType::PlayerGossip,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn name(self) -> &'static str {
        match self {
            BindingType::Creature => "Creature",
            BindingType::GameObject => "GameObject",
            BindingType::Item => "Item",
            BindingType::Map => "Map",
            BindingType::PlayerGossip => "PlayerGossip",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

impl fmt::Display for BindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Binding keys
// ============================================================================

/// Common interface of every binding key shape
pub trait BindingKey: Clone + Eq + std::hash::Hash + fmt::Debug {
    /// Name of the event this key belongs to
    fn event(&self) -> &'static str;
}

/// Key for events that are not scoped to any object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub event: &'static str,
}

impl EventKey {
    pub fn new(event: &'static str) -> Self {
        Self { event }
    }
}

/// Key for events scoped to every object of one entry (template id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub event: &'static str,
    pub binding_type: BindingType,
    pub entry: u32,
}

impl EntryKey {
    pub fn new(event: &'static str, binding_type: BindingType, entry: u32) -> Self {
        Self {
            event,
            binding_type,
            entry,
        }
    }
}

/// Key for events scoped to exactly one object instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuidKey {
    pub event: &'static str,
    pub binding_type: BindingType,
    pub guid: ObjectGuid,
}

impl GuidKey {
    pub fn new(event: &'static str, binding_type: BindingType, guid: ObjectGuid) -> Self {
        Self {
            event,
            binding_type,
            guid,
        }
    }
}

impl BindingKey for EventKey {
    fn event(&self) -> &'static str {
        self.event
    }
}

impl BindingKey for EntryKey {
    fn event(&self) -> &'static str {
        self.event
    }
}

impl BindingKey for GuidKey {
    fn event(&self) -> &'static str {
        self.event
    }
}

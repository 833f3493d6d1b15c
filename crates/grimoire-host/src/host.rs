//! Session lifecycle for a whole world
//!
//! An [`EngineHost`] owns the world session plus one session per map. All of
//! them run the same scanned [`ScriptSet`] and share the read-only configuration
//! and hook catalog.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use grimoire_events::{HookCatalog, MapId, ObjectGuid};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::loader::{LoadError, ScriptSet};
use crate::object::{Method, ScriptType, TypeDescriptor, BASE_TYPE_NAME};
use crate::session::{Session, SessionError, SessionOptions};
use crate::thread_guard::{ActiveSession, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Type {0} is registered more than once")]
    DuplicateType(&'static str),
    #[error("Failed to load scripts: {0}")]
    Load(#[from] LoadError),
    #[error("Failed to open session: {0}")]
    Session(#[from] SessionError),
}

enum ScriptSource {
    Directory(PathBuf),
    Fixed(ScriptSet),
}

/// Builder for [`EngineHost`]
///
/// ```no_run
/// # use grimoire_host::{EngineConfig, EngineHost};
/// let host = EngineHost::builder()
///     .with_config(EngineConfig::default())
///     .build()
///     .expect("scripts should load");
/// host.world().update(100);
/// ```
pub struct EngineHostBuilder {
    config: EngineConfig,
    catalog: Option<HookCatalog>,
    types: Vec<TypeDescriptor>,
    globals: Vec<Method>,
    scripts: Option<ScriptSet>,
}

impl EngineHostBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            catalog: None,
            types: Vec::new(),
            globals: Vec::new(),
            scripts: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the built-in hook catalog
    pub fn with_catalog(mut self, catalog: HookCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Make `T` available to scripts
    pub fn with_type<T: ScriptType>(mut self) -> Self {
        self.types.push(TypeDescriptor::of::<T>());
        self
    }

    /// Register a descriptor directly, e.g. an abstract parent type
    pub fn with_type_descriptor(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    /// Extra global functions installed next to the built-in ones
    pub fn with_globals(mut self, globals: &[Method]) -> Self {
        self.globals.extend_from_slice(globals);
        self
    }

    /// Use these scripts instead of scanning the script directory
    pub fn with_scripts(mut self, scripts: ScriptSet) -> Self {
        self.scripts = Some(scripts);
        self
    }

    /// Validate the type list, scan scripts and open the world session
    pub fn build(self) -> Result<EngineHost, HostError> {
        let mut seen = std::collections::HashSet::from([BASE_TYPE_NAME]);
        for descriptor in &self.types {
            if !seen.insert(descriptor.type_name) {
                return Err(HostError::DuplicateType(descriptor.type_name));
            }
        }

        let source = match self.scripts {
            Some(scripts) => ScriptSource::Fixed(scripts),
            None => ScriptSource::Directory(self.config.script_dir()),
        };

        let mut host = EngineHost {
            config: Arc::new(self.config),
            catalog: Arc::new(self.catalog.unwrap_or_default()),
            types: self.types,
            globals: self.globals,
            source,
            scripts: ScriptSet::empty(),
            active: ActiveSession::new(),
            world: Session::detached(None),
            maps: BTreeMap::new(),
        };

        host.scripts = host.scan()?;
        host.world = host.open_session(None)?;
        Ok(host)
    }
}

impl Default for EngineHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EngineHost {
    config: Arc<EngineConfig>,
    catalog: Arc<HookCatalog>,
    types: Vec<TypeDescriptor>,
    globals: Vec<Method>,
    source: ScriptSource,
    scripts: ScriptSet,
    active: ActiveSession,
    // Dropped before the world session
    maps: BTreeMap<MapId, Session>,
    world: Session,
}

impl EngineHost {
    pub fn builder() -> EngineHostBuilder {
        EngineHostBuilder::new()
    }

    fn scan(&self) -> Result<ScriptSet, HostError> {
        if !self.config.enabled {
            return Ok(ScriptSet::empty());
        }
        match &self.source {
            ScriptSource::Fixed(scripts) => Ok(scripts.clone()),
            ScriptSource::Directory(dir) => Ok(ScriptSet::scan(dir)?),
        }
    }

    fn open_session(&self, map_id: Option<MapId>) -> Result<Session, HostError> {
        let session = Session::open(SessionOptions {
            config: Arc::clone(&self.config),
            catalog: Arc::clone(&self.catalog),
            scripts: &self.scripts,
            types: &self.types,
            globals: &self.globals,
            map_id,
            active: Some(self.active.clone()),
        })?;
        Ok(session)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &HookCatalog {
        &self.catalog
    }

    pub fn scripts(&self) -> &ScriptSet {
        &self.scripts
    }

    pub fn world(&self) -> &Session {
        &self.world
    }

    /// Open the session of a newly created map
    ///
    /// Returns `None` when map sessions are disabled. An already open session is
    /// returned as is.
    pub fn create_map_session(&mut self, map_id: MapId) -> Result<Option<&Session>, HostError> {
        if !self.config.map_sessions {
            return Ok(None);
        }

        if !self.maps.contains_key(&map_id) {
            let session = self.open_session(Some(map_id))?;
            self.maps.insert(map_id, session);
        }
        Ok(self.maps.get(&map_id))
    }

    /// Close the session of a map that is being unloaded
    pub fn destroy_map_session(&mut self, map_id: MapId) -> bool {
        match self.maps.remove(&map_id) {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    pub fn map_session(&self, map_id: MapId) -> Option<&Session> {
        self.maps.get(&map_id)
    }

    /// Session for objects on `map_id`, falling back to the world session
    pub fn session_for(&self, map_id: Option<MapId>) -> &Session {
        map_id
            .and_then(|id| self.maps.get(&id))
            .unwrap_or(&self.world)
    }

    /// World session first, then every map session by id
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        std::iter::once(&self.world).chain(self.maps.values())
    }

    pub fn map_ids(&self) -> Vec<MapId> {
        self.maps.keys().copied().collect()
    }

    /// Session currently dispatching an event, if any
    pub fn active_session(&self) -> Option<SessionId> {
        self.active.current()
    }

    /// Drive the global timed events of every session
    pub fn update(&self, diff: u64) {
        for session in self.sessions() {
            session.update(diff);
        }
    }

    /// Forward [`Session::notify_destroyed`] to every session
    pub fn notify_destroyed<T>(&self, obj: &T) -> bool {
        let mut any = false;
        for session in self.sessions() {
            any |= session.notify_destroyed(obj);
        }
        any
    }

    /// Forward [`Session::remove_object`] to every session
    pub fn remove_object(&self, guid: ObjectGuid) {
        for session in self.sessions() {
            session.remove_object(guid);
        }
    }

    /// Rescan the scripts and reopen every session
    ///
    /// The new world session is opened first. If the scan or that open fails the
    /// running sessions are left untouched. Otherwise the old sessions close (maps
    /// first) and every map is reopened; a map whose session fails to open keeps a
    /// detached session so the next reload retries it.
    pub fn reload(&mut self) -> Result<(), HostError> {
        let scripts = self.scan()?;
        let map_ids = self.map_ids();

        info!(
            target: "scripting",
            "Reloading {} sessions with {} scripts",
            map_ids.len() + 1,
            scripts.len()
        );

        let previous = std::mem::replace(&mut self.scripts, scripts);
        let world = match self.open_session(None) {
            Ok(world) => world,
            Err(err) => {
                self.scripts = previous;
                return Err(err);
            }
        };

        for session in std::mem::take(&mut self.maps).into_values() {
            session.close();
        }
        std::mem::replace(&mut self.world, world).close();

        for map_id in map_ids {
            let session = self.open_session(Some(map_id)).unwrap_or_else(|err| {
                warn!(target: "scripting", "Failed to reopen map {}: {}", map_id, err);
                Session::detached(Some(map_id))
            });
            self.maps.insert(map_id, session);
        }

        Ok(())
    }

    /// Close every session, maps first
    pub fn shutdown(mut self) {
        for session in std::mem::take(&mut self.maps).into_values() {
            session.close();
        }
        std::mem::replace(&mut self.world, Session::detached(None)).close();
    }
}

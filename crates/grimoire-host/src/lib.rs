//! Host runtime for Lua scripts driving a live world
//!
//! World code exposes its objects through [`ScriptType`] implementations, builds
//! an [`EngineHost`] and fires events into its sessions. Scripts register for
//! those events and receive handles to the objects involved.

pub mod api;
pub mod binding;
pub mod config;
pub mod dispatch;
pub mod host;
pub mod loader;
pub mod marshal;
pub mod object;
pub mod reload;
pub mod scanner;
pub mod session;
pub mod thread_guard;
pub mod timed;

pub use grimoire_events as events;

pub use binding::{BindingId, BindingStore};
pub use config::{ConfigError, EngineConfig, ProjectPaths};
pub use dispatch::{DispatchError, Dispatcher};
pub use host::{EngineHost, EngineHostBuilder, HostError};
pub use loader::{LoadError, ScriptFile, ScriptKind, ScriptSet};
pub use marshal::{bad_argument, push_u64, Args, CheckValue};
pub use object::{
    HandleRegistry, Method, NativeFn, ObjectHandle, ObjectRef, ScriptObject, ScriptType,
    TypeDescriptor, TypeRegistry, BASE_TYPE_NAME,
};
pub use reload::{setup_reload_signal, ReloadGeneration, ReloadTrigger};
pub use scanner::{ScanResult, ScriptScanner};
pub use session::{session_state, EventArgs, Session, SessionError, SessionOptions, SessionState};
pub use thread_guard::{ActiveSession, SessionId};
pub use timed::{TimedEventId, TimedEventManager};

/// Re-exported so hosts can implement native functions without a direct dependency
pub use mlua;

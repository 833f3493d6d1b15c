//! Thread ownership checks
//!
//! A session must only ever be driven from the thread that created it. Sessions
//! are not `Send`, so this mostly guards the one piece of state that is shared
//! across threads: the [`ActiveSession`] slot worker threads read for diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tracing::error;

/// Process-unique identifier of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Remembers the creating thread and reports use from any other thread
#[derive(Debug, Clone, Copy)]
pub struct ThreadGuard {
    owner: ThreadId,
}

impl ThreadGuard {
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
        }
    }

    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Fatal in debug builds, logged in release builds
    pub fn check(&self, what: &str) {
        if !self.is_owner() {
            error!(
                target: "scripting",
                "{} used from thread {:?}, owned by {:?}",
                what,
                thread::current().id(),
                self.owner
            );
            debug_assert!(false, "{what} used from a thread that does not own it");
        }
    }
}

impl Default for ThreadGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ActiveInner {
    guard: ThreadGuard,
    current: AtomicU64,
}

/// Slot naming the session that is currently dispatching, 0 meaning none
#[derive(Debug, Clone)]
pub struct ActiveSession(Arc<ActiveInner>);

impl ActiveSession {
    pub fn new() -> Self {
        Self(Arc::new(ActiveInner {
            guard: ThreadGuard::new(),
            current: AtomicU64::new(0),
        }))
    }

    /// Replace the active session, returning the previous one
    pub fn swap(&self, session: Option<SessionId>) -> Option<SessionId> {
        self.0.guard.check("active session");
        let raw = session.map(|s| s.0).unwrap_or(0);
        match self.0.current.swap(raw, Ordering::AcqRel) {
            0 => None,
            id => Some(SessionId(id)),
        }
    }

    /// Session currently dispatching
    ///
    /// Only meaningful on the owning thread; reading it from elsewhere is reported
    /// as a usage bug.
    pub fn current(&self) -> Option<SessionId> {
        self.0.guard.check("active session");
        match self.0.current.load(Ordering::Acquire) {
            0 => None,
            id => Some(SessionId(id)),
        }
    }

    pub fn is_owner_thread(&self) -> bool {
        self.0.guard.is_owner()
    }
}

impl Default for ActiveSession {
    fn default() -> Self {
        Self::new()
    }
}

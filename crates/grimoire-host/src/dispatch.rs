//! Protected invocation of script callbacks
//!
//! Every call from the host into a script goes through [`Dispatcher::invoke`].
//! Script errors are logged and turned into [`DispatchError`]; they never unwind
//! into host code. The dispatcher also tracks how deeply dispatches are nested so
//! that non-owning handles are invalidated exactly once, when the outermost
//! dispatch returns.

use std::cell::Cell;

use mlua::{Function, Lua, MultiValue, Value};
use tracing::{debug, error};

use crate::object::HandleRegistry;
use crate::thread_guard::{ActiveSession, SessionId, ThreadGuard};

const TRACEBACK_MARKER: &str = "\nstack traceback:";

/// An error raised inside a script callback
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DispatchError {
    pub message: String,
}

pub struct Dispatcher {
    session: SessionId,
    event_level: Cell<u32>,
    traceback: bool,
    thread: ThreadGuard,
    active: Option<ActiveSession>,
    previous_active: Cell<Option<SessionId>>,
}

/// Keeps the nesting level raised while alive
pub struct LevelGuard<'a> {
    dispatcher: &'a Dispatcher,
    handles: &'a HandleRegistry,
}

impl Drop for LevelGuard<'_> {
    fn drop(&mut self) {
        let level = self.dispatcher.event_level.get();
        assert!(level > 0, "dispatch nesting level underflow");
        self.dispatcher.event_level.set(level - 1);

        if level == 1 {
            self.handles.invalidate_all();
            if let Some(active) = &self.dispatcher.active {
                active.swap(self.dispatcher.previous_active.take());
            }
        }
    }
}

impl Dispatcher {
    pub fn new(session: SessionId, traceback: bool, active: Option<ActiveSession>) -> Self {
        Self {
            session,
            event_level: Cell::new(0),
            traceback,
            thread: ThreadGuard::new(),
            active,
            previous_active: Cell::new(None),
        }
    }

    /// Current dispatch nesting depth
    pub fn event_level(&self) -> u32 {
        self.event_level.get()
    }

    /// Raise the nesting level until the guard is dropped
    pub fn enter<'a>(&'a self, handles: &'a HandleRegistry) -> LevelGuard<'a> {
        self.thread.check("dispatch");

        let level = self.event_level.get();
        if level == 0 {
            if let Some(active) = &self.active {
                self.previous_active.set(active.swap(Some(self.session)));
            }
        }
        self.event_level.set(level + 1);

        LevelGuard {
            dispatcher: self,
            handles,
        }
    }

    /// Call `func` with `args` and collect exactly `expected` results
    ///
    /// Missing results are padded with nil and extra ones dropped. On error the
    /// message is logged, a full collection is forced and the error returned.
    pub fn invoke(
        &self,
        lua: &Lua,
        handles: &HandleRegistry,
        func: &Function,
        args: MultiValue,
        expected: usize,
    ) -> Result<Vec<Value>, DispatchError> {
        let _level = self.enter(handles);

        match func.call::<MultiValue>(args) {
            Ok(results) => {
                let mut values: Vec<Value> = results.into_iter().collect();
                if values.len() > expected {
                    debug!(
                        target: "scripting",
                        "Callback returned {} values, expected {}",
                        values.len(),
                        expected
                    );
                }
                values.resize(expected, Value::Nil);
                Ok(values)
            }
            Err(err) => {
                let message = self.format_error(&err);
                error!(target: "scripting", "{}", message);
                if let Err(gc_err) = lua.gc_collect() {
                    error!(target: "scripting", "Garbage collection after script error failed: {}", gc_err);
                }
                Err(DispatchError { message })
            }
        }
    }

    /// Like [`Dispatcher::invoke`], substituting nil results on error
    pub fn invoke_or_nil(
        &self,
        lua: &Lua,
        handles: &HandleRegistry,
        func: &Function,
        args: MultiValue,
        expected: usize,
    ) -> Vec<Value> {
        self.invoke(lua, handles, func, args, expected)
            .unwrap_or_else(|_| vec![Value::Nil; expected])
    }

    fn format_error(&self, err: &mlua::Error) -> String {
        let message = err.to_string();
        if self.traceback {
            return message;
        }
        match message.find(TRACEBACK_MARKER) {
            Some(pos) => message[..pos].to_string(),
            None => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(traceback: bool) -> Dispatcher {
        Dispatcher::new(SessionId(1), traceback, None)
    }

    #[test]
    fn test_results_are_padded_and_truncated() {
        let lua = Lua::new();
        let handles = HandleRegistry::new();
        let d = dispatcher(false);

        let one: Function = lua.load("return function() return 1 end").eval().unwrap();
        let three: Function = lua.load("return function() return 1, 2, 3 end").eval().unwrap();

        let values = d.invoke(&lua, &handles, &one, MultiValue::new(), 2).unwrap();
        assert_eq!(values, vec![Value::Integer(1), Value::Nil]);

        let values = d.invoke(&lua, &handles, &three, MultiValue::new(), 1).unwrap();
        assert_eq!(values, vec![Value::Integer(1)]);
    }

    #[test]
    fn test_errors_do_not_propagate() {
        let lua = Lua::new();
        let handles = HandleRegistry::new();
        let d = dispatcher(false);

        let failing: Function = lua
            .load("return function() error('boom') end")
            .eval()
            .unwrap();

        let err = d
            .invoke(&lua, &handles, &failing, MultiValue::new(), 1)
            .unwrap_err();
        assert!(err.message.contains("boom"));
        assert!(!err.message.contains("stack traceback"));
        assert_eq!(d.event_level(), 0);

        let values = d.invoke_or_nil(&lua, &handles, &failing, MultiValue::new(), 2);
        assert_eq!(values, vec![Value::Nil, Value::Nil]);
    }

    #[test]
    fn test_nesting_level_tracks_reentry() {
        let lua = Lua::new();
        let handles = HandleRegistry::new();
        let d = dispatcher(false);

        {
            let _outer = d.enter(&handles);
            assert_eq!(d.event_level(), 1);
            {
                let _inner = d.enter(&handles);
                assert_eq!(d.event_level(), 2);
            }
            assert_eq!(d.event_level(), 1);

            let noop: Function = lua.load("return function() end").eval().unwrap();
            d.invoke(&lua, &handles, &noop, MultiValue::new(), 0).unwrap();
            assert_eq!(d.event_level(), 1);
        }
        assert_eq!(d.event_level(), 0);
    }
}

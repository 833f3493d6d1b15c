//! Script discovery and loading
//!
//! The script directory is scanned once per reload. Every session then runs the
//! same [`ScriptSet`], so map sessions created later see exactly the scripts the
//! world session saw.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use mlua::{Function, Lua, Table, Value};
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::object::HandleRegistry;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read script directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read script {path}: {source}")]
    ReadScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScriptKind {
    /// `.ext` files, run before any plain script
    Extension,
    Lua,
}

impl ScriptKind {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|s| s.to_str()) {
            Some("ext") => Some(Self::Extension),
            Some("lua") => Some(Self::Lua),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptFile {
    /// File stem, also the module name under `package.loaded`
    pub name: String,
    pub path: PathBuf,
    pub kind: ScriptKind,
    pub source: String,
}

/// Scripts discovered in one scan, in execution order
#[derive(Debug, Clone, Default)]
pub struct ScriptSet {
    scripts: Vec<ScriptFile>,
    search_paths: Vec<PathBuf>,
}

impl ScriptSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Walk `root` recursively and read every script
    ///
    /// A missing directory yields an empty set.
    pub fn scan(root: &Path) -> Result<Self, LoadError> {
        if !root.exists() {
            warn!(target: "scripting", "Script directory {} does not exist", root.display());
            return Ok(Self::empty());
        }

        let mut found = Vec::new();
        let mut search_paths = Vec::new();
        collect(root, &mut found, &mut search_paths)?;

        found.sort();

        let mut seen = HashSet::new();
        let mut scripts = Vec::with_capacity(found.len());
        for (kind, path) in found {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if !seen.insert(name.clone()) {
                error!(
                    target: "scripting",
                    "Found a script with duplicate name {}, skipping {}",
                    name,
                    path.display()
                );
                continue;
            }

            let source = std::fs::read_to_string(&path).map_err(|source| LoadError::ReadScript {
                path: path.clone(),
                source,
            })?;
            scripts.push(ScriptFile {
                name,
                path,
                kind,
                source,
            });
        }

        info!(target: "scripting", "Found {} scripts in {}", scripts.len(), root.display());
        Ok(Self {
            scripts,
            search_paths,
        })
    }

    /// Build a set from in-memory sources, run in the given order
    pub fn from_sources<I, N, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let scripts = sources
            .into_iter()
            .map(|(name, source)| {
                let name = name.into();
                ScriptFile {
                    path: PathBuf::from(format!("{name}.lua")),
                    name,
                    kind: ScriptKind::Lua,
                    source: source.into(),
                }
            })
            .collect();

        Self {
            scripts,
            search_paths: Vec::new(),
        }
    }

    pub fn scripts(&self) -> &[ScriptFile] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Value for `package.path`
    pub fn package_path(&self) -> String {
        self.search_paths
            .iter()
            .map(|dir| format!("{}/?.lua", dir.display()))
            .collect::<Vec<_>>()
            .join(";")
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.starts_with('.'))
}

fn collect(
    dir: &Path,
    found: &mut Vec<(ScriptKind, PathBuf)>,
    search_paths: &mut Vec<PathBuf>,
) -> Result<(), LoadError> {
    search_paths.push(dir.to_path_buf());

    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }

        if path.is_dir() {
            collect(&path, found, search_paths)?;
        } else if let Some(kind) = ScriptKind::from_path(&path) {
            found.push((kind, path));
        }
    }

    Ok(())
}

/// Point `require` at the scanned directories only
pub(crate) fn configure_package(lua: &Lua, scripts: &ScriptSet) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    package.set("path", scripts.package_path())?;
    package.set("cpath", "")?;
    Ok(())
}

/// Run every script through the protected call boundary
///
/// Returns how many scripts ran without error.
pub(crate) fn run_scripts(
    lua: &Lua,
    dispatcher: &Dispatcher,
    handles: &HandleRegistry,
    scripts: &ScriptSet,
) -> mlua::Result<usize> {
    let package: Table = lua.globals().get("package")?;
    let loaded: Table = package.get("loaded")?;

    let mut ok = 0;
    for script in scripts.scripts() {
        // Already pulled in through `require`
        if !loaded.get::<Value>(script.name.as_str())?.is_nil() {
            debug!(target: "scripting", "Skipping {}, already loaded", script.name);
            continue;
        }

        let chunk: Function = match lua
            .load(script.source.as_str())
            .set_name(format!("@{}", script.path.display()))
            .into_function()
        {
            Ok(chunk) => chunk,
            Err(err) => {
                error!(target: "scripting", "Failed to compile {}: {}", script.path.display(), err);
                continue;
            }
        };

        let Ok(mut results) = dispatcher.invoke(lua, handles, &chunk, mlua::MultiValue::new(), 1)
        else {
            continue;
        };

        let result = results.pop().unwrap_or(Value::Nil);
        let stored = match result {
            Value::Nil | Value::Boolean(false) => Value::Boolean(true),
            other => other,
        };
        loaded.set(script.name.as_str(), stored)?;

        debug!(target: "scripting", "Loaded {}", script.path.display());
        ok += 1;
    }

    Ok(ok)
}

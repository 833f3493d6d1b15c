use std::path::{Path, PathBuf};

#[derive(Clone, Copy)]
enum DirKind {
    Config,
    Data,
}

impl DirKind {
    #[cfg(not(target_os = "windows"))]
    fn xdg_var(self) -> &'static str {
        match self {
            DirKind::Config => "XDG_CONFIG_HOME",
            DirKind::Data => "XDG_DATA_HOME",
        }
    }

    #[cfg(not(target_os = "windows"))]
    fn home_relative(self) -> &'static [&'static str] {
        match self {
            DirKind::Config => &[".config"],
            DirKind::Data => &[".local", "share"],
        }
    }

    #[cfg(target_os = "windows")]
    fn windows_var(self) -> &'static str {
        match self {
            DirKind::Config => "APPDATA",
            DirKind::Data => "LOCALAPPDATA",
        }
    }

    fn base(self) -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            non_empty_var(self.windows_var()).unwrap_or_else(|| PathBuf::from("."))
        }

        #[cfg(not(target_os = "windows"))]
        {
            non_empty_var(self.xdg_var()).unwrap_or_else(|| {
                self.home_relative()
                    .iter()
                    .fold(home_dir().unwrap_or_default(), |dir, part| dir.join(part))
            })
        }
    }
}

/// Per-application directories.
///
/// Unix-like systems use `$XDG_CONFIG_HOME/<app>` and `$XDG_DATA_HOME/<app>`,
/// falling back to `~/.config/<app>` and `~/.local/share/<app>`. Windows uses
/// `%APPDATA%` and `%LOCALAPPDATA%`.
pub struct ProjectPaths {
    app: String,
}

impl ProjectPaths {
    /// `None` without a home directory.
    pub fn new(app: &str) -> Option<Self> {
        home_dir().map(|_| Self {
            app: app.to_owned(),
        })
    }

    pub fn config_dir(&self) -> PathBuf {
        DirKind::Config.base().join(&self.app)
    }

    pub fn data_dir(&self) -> PathBuf {
        DirKind::Data.base().join(&self.app)
    }
}

/// `$HOME`, or `%USERPROFILE%` where that is unset.
pub fn home_dir() -> Option<PathBuf> {
    non_empty_var("HOME").or_else(|| non_empty_var("USERPROFILE"))
}

/// Replace a leading `~` component with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    path.strip_prefix("~")
        .ok()
        .and_then(|rest| home_dir().map(|home| home.join(rest)))
        .unwrap_or_else(|| path.to_path_buf())
}

fn non_empty_var(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

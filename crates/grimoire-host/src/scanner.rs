//! Modification-time polling of the script directory for hot reload

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, warn};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

/// Differences between two scans
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub changed: Vec<PathBuf>,
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ScanResult {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.added.is_empty() || !self.removed.is_empty()
    }
}

pub struct ScriptScanner {
    root: PathBuf,
    interval: Duration,
    last_scan: Option<Instant>,
    snapshot: HashMap<PathBuf, SystemTime>,
}

impl ScriptScanner {
    pub fn new(root: PathBuf) -> Self {
        Self::with_interval(root, DEFAULT_SCAN_INTERVAL)
    }

    /// The current directory contents are the baseline, not reported as added
    pub fn with_interval(root: PathBuf, interval: Duration) -> Self {
        let snapshot = snapshot(&root);
        Self {
            root,
            interval,
            last_scan: None,
            snapshot,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn should_scan(&self) -> bool {
        match self.last_scan {
            Some(last) => last.elapsed() >= self.interval,
            None => true,
        }
    }

    /// Compare the directory against the previous scan
    pub fn scan_changes(&mut self) -> ScanResult {
        self.last_scan = Some(Instant::now());

        let current = snapshot(&self.root);
        let mut result = ScanResult::default();

        for (path, modified) in &current {
            match self.snapshot.get(path) {
                Some(previous) if previous != modified => result.changed.push(path.clone()),
                Some(_) => {}
                None => result.added.push(path.clone()),
            }
        }
        result.removed = self
            .snapshot
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        if result.has_changes() {
            debug!(
                target: "scripting",
                "Script changes in {}: {} changed, {} added, {} removed",
                self.root.display(),
                result.changed.len(),
                result.added.len(),
                result.removed.len()
            );
        }

        self.snapshot = current;
        result
    }

    /// Scan if the interval elapsed and report whether anything changed
    pub fn poll(&mut self) -> bool {
        self.should_scan() && self.scan_changes().has_changes()
    }
}

fn is_script(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("lua") | Some("ext")
    )
}

fn snapshot(root: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut files = HashMap::new();
    if root.exists() {
        walk(root, &mut files);
    }
    files
}

fn walk(dir: &Path, files: &mut HashMap<PathBuf, SystemTime>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(target: "scripting", "Failed to read script directory {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path
            .file_name()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.starts_with('.'))
        {
            continue;
        }

        if path.is_dir() {
            walk(&path, files);
            continue;
        }
        if !is_script(&path) {
            continue;
        }

        match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => {
                files.insert(path, modified);
            }
            Err(e) => {
                warn!(
                    target: "scripting",
                    "Failed to get modification time for {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_existing_files_are_baseline() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.lua"), "").unwrap();

        let mut scanner = ScriptScanner::new(temp_dir.path().to_path_buf());
        assert!(scanner.should_scan());
        assert!(!scanner.scan_changes().has_changes());
        assert!(!scanner.should_scan());
    }

    #[test]
    fn test_detects_added_and_removed_scripts() {
        let temp_dir = TempDir::new().unwrap();
        let mut scanner = ScriptScanner::new(temp_dir.path().to_path_buf());

        fs::create_dir(temp_dir.path().join("sub")).unwrap();
        let added = temp_dir.path().join("sub").join("b.ext");
        fs::write(&added, "").unwrap();
        fs::write(temp_dir.path().join("readme.md"), "").unwrap();

        let result = scanner.scan_changes();
        assert_eq!(result.added, vec![added.clone()]);

        fs::remove_file(&added).unwrap();
        let result = scanner.scan_changes();
        assert_eq!(result.removed, vec![added]);
        assert!(result.added.is_empty());
    }

    #[test]
    fn test_detects_modified_script() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.lua");
        fs::write(&path, "-- one").unwrap();

        let mut scanner = ScriptScanner::with_interval(temp_dir.path().to_path_buf(), Duration::ZERO);

        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();

        assert!(scanner.poll());
        assert!(!scanner.poll());
    }
}

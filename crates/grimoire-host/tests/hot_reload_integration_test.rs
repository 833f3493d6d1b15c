//! Reloading scripts from a directory on disk

mod common;

use std::fs;
use std::path::Path;
use std::time::Duration;

use common::{eval, host_with_config, take_records};
use grimoire_host::events::hooks::WORLD_EVENT_ON_UPDATE;
use grimoire_host::events::MapId;
use grimoire_host::{EngineConfig, EngineHost, ScriptScanner};

fn config_for(dir: &Path) -> EngineConfig {
    EngineConfig {
        script_dir: Some(dir.to_path_buf()),
        ..EngineConfig::default()
    }
}

fn fire_update(host: &EngineHost) -> bool {
    host.world().fire_event(WORLD_EVENT_ON_UPDATE, |args| {
        args.push(1)?;
        Ok(())
    })
}

#[test]
fn test_reload_picks_up_changed_scripts() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("greeter.lua");
    fs::write(
        &script,
        r#"
        version = 1
        RegisterServerEvent("WORLD_EVENT_ON_UPDATE", function() Record("v1") end)
        "#,
    )
    .unwrap();

    let mut host = host_with_config(config_for(dir.path()));
    host.create_map_session(MapId(1)).unwrap();
    assert_eq!(host.scripts().len(), 1);

    assert!(fire_update(&host));
    assert_eq!(take_records(), vec!["v1"]);

    fs::write(&script, "version = 2").unwrap();
    host.reload().unwrap();

    // The old registration went away with the old state
    assert!(!fire_update(&host));
    assert!(take_records().is_empty());

    assert_eq!(eval::<i64>(host.world(), "return version"), 2);
    let map = host.map_session(MapId(1)).expect("map session reopened");
    assert_eq!(eval::<i64>(map, "return version"), 2);
}

/// Storing this script's result in `package.loaded` fails, which aborts opening a session
const SEAL_LOADED: &str = r#"
if SEAL_MAPS_ONLY == nil or GetStateMapId() then
    setmetatable(package.loaded, { __newindex = function() error("package.loaded is sealed") end })
end
"#;

#[test]
fn test_failed_reload_keeps_running_sessions() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a_version.lua"), "version = 1").unwrap();

    let mut host = host_with_config(config_for(dir.path()));
    host.create_map_session(MapId(1)).unwrap();

    fs::write(dir.path().join("a_version.lua"), "version = 2").unwrap();
    fs::write(dir.path().join("b_seal.lua"), SEAL_LOADED).unwrap();
    assert!(host.reload().is_err());

    // Nothing was torn down
    assert_eq!(host.scripts().len(), 1);
    assert_eq!(eval::<i64>(host.world(), "return version"), 1);
    let map = host.map_session(MapId(1)).expect("map session kept");
    assert_eq!(eval::<i64>(map, "return version"), 1);
}

#[test]
fn test_failed_map_reopen_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a_version.lua"), "SEAL_MAPS_ONLY = true version = 1").unwrap();

    let mut host = host_with_config(config_for(dir.path()));
    host.create_map_session(MapId(1)).unwrap();

    fs::write(dir.path().join("b_seal.lua"), SEAL_LOADED).unwrap();
    host.reload().unwrap();
    assert!(host.world().is_enabled());
    let map = host.map_session(MapId(1)).expect("map id kept");
    assert!(!map.is_enabled());

    fs::remove_file(dir.path().join("b_seal.lua")).unwrap();
    fs::write(dir.path().join("a_version.lua"), "version = 3").unwrap();
    host.reload().unwrap();
    let map = host.map_session(MapId(1)).expect("map session reopened");
    assert!(map.is_enabled());
    assert_eq!(eval::<i64>(map, "return version"), 3);
}

#[test]
fn test_scripts_can_require_each_other() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("lib")).unwrap();
    fs::write(dir.path().join("lib").join("shared.lua"), "return { answer = 42 }").unwrap();
    fs::write(
        dir.path().join("main.lua"),
        "answer = require('shared').answer",
    )
    .unwrap();

    let host = host_with_config(config_for(dir.path()));
    assert_eq!(host.scripts().len(), 2);
    assert_eq!(eval::<i64>(host.world(), "return answer"), 42);
}

#[test]
fn test_broken_script_does_not_stop_others() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a_broken.lua"), "this is not lua").unwrap();
    fs::write(dir.path().join("b_failing.lua"), "error('boom')").unwrap();
    fs::write(dir.path().join("c_fine.lua"), "fine = true").unwrap();

    let host = host_with_config(config_for(dir.path()));
    assert_eq!(host.scripts().len(), 3);
    assert!(eval::<bool>(host.world(), "return fine"));
    assert_eq!(host.world().event_level(), 0);
}

#[test]
fn test_missing_script_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let host = host_with_config(config_for(&dir.path().join("missing")));

    assert!(host.scripts().is_empty());
    assert!(host.world().is_enabled());
    assert!(!fire_update(&host));
}

#[test]
fn test_disabled_scripting() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.lua"), "error('never runs')").unwrap();

    let mut host = host_with_config(EngineConfig {
        enabled: false,
        ..config_for(dir.path())
    });

    assert!(!host.world().is_enabled());
    assert!(host.world().lua().is_none());
    assert!(!fire_update(&host));
    host.update(100);
    host.reload().unwrap();
    assert!(host.scripts().is_empty());
}

#[test]
fn test_scanner_detects_new_scripts() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.lua"), "").unwrap();

    let mut scanner = ScriptScanner::with_interval(dir.path().to_path_buf(), Duration::ZERO);
    assert!(!scanner.poll());

    fs::write(dir.path().join("b.lua"), "").unwrap();
    fs::write(dir.path().join("notes.txt"), "").unwrap();
    let result = scanner.scan_changes();
    assert_eq!(result.added, vec![dir.path().join("b.lua")]);
    assert!(result.changed.is_empty());

    fs::remove_file(dir.path().join("a.lua")).unwrap();
    assert!(scanner.poll());
}

//! Runs the bundled demo scripts against the simulated world

use std::path::PathBuf;

use grimoire_cli::{host_builder, World, WorldConfig};
use grimoire_events::MapId;
use grimoire_host::mlua::FromLuaMulti;
use grimoire_host::{EngineConfig, Session};

fn demo_scripts() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("lua_scripts")
}

fn eval<T: FromLuaMulti>(session: &Session, code: &str) -> T {
    session.lua().unwrap().load(code).eval().unwrap()
}

fn demo_world(maps: Vec<u32>) -> World {
    let host = host_builder()
        .with_config(EngineConfig {
            script_dir: Some(demo_scripts()),
            ..EngineConfig::default()
        })
        .build()
        .unwrap();
    assert_eq!(host.scripts().len(), 3);

    let config = WorldConfig {
        maps,
        ..WorldConfig::default()
    };
    let mut world = World::new(host, &config);
    world.start(&config.players).unwrap();
    world
}

#[test]
fn test_demo_scripts_in_map_session() {
    let mut world = demo_world(vec![0]);
    for _ in 0..30 {
        world.tick(100);
    }

    let map = world.host().map_session(MapId(0)).unwrap();
    assert_eq!(eval::<String>(map, "return map_name"), "Map 0");
    assert_eq!(eval::<i64>(map, "return spawned_rats"), 1);
    assert_eq!(eval::<i64>(map, "return kills"), 1);
    assert_eq!(eval::<i64>(world.host().world(), "return kills"), 0);

    assert_eq!(world.players()[0].xp.get(), 60);
    assert_eq!(world.stats().chat_suppressed, 1);

    let stats = world.shutdown();
    assert_eq!(stats.ticks, 30);
    assert_eq!(stats.killed, 1);
}

#[test]
fn test_demo_scripts_without_maps() {
    let mut world = demo_world(vec![]);
    for _ in 0..25 {
        world.tick(100);
    }

    let lua_world = world.host().world();
    assert_eq!(eval::<i64>(lua_world, "return kills"), 1);
    assert_eq!(eval::<i64>(lua_world, "return spawned_rats"), 1);
    assert!(eval::<Option<String>>(lua_world, "return map_name").is_none());
}

mod common;

use common::{host_with, take_records, Player};
use grimoire_host::events::hooks::PLAYER_EVENT_ON_LOGIN;

fn login(host: &grimoire_host::EngineHost, player: &Player) {
    host.world().fire_event(PLAYER_EVENT_ON_LOGIN, |args| {
        unsafe { args.push_object(player) }?;
        Ok(())
    });
}

#[test]
fn test_global_event_repeats_and_expires() {
    let host = host_with(
        r#"
        CreateLuaEvent(function(id, delay, calls)
            Record(delay .. " " .. calls)
        end, 100, 2)
        "#,
    );

    host.update(250);
    assert_eq!(take_records(), vec!["100 2", "100 1"]);

    host.update(1000);
    assert!(take_records().is_empty());
}

#[test]
fn test_event_cancels_itself() {
    let host = host_with(
        r#"
        CreateLuaEvent(function(id)
            Record("tick")
            RemoveEventById(id)
        end, 10, 0)
        "#,
    );

    host.update(50);
    host.update(50);
    assert_eq!(take_records(), vec!["tick"]);
}

#[test]
fn test_remove_events() {
    let host = host_with(
        r#"
        CreateLuaEvent(function() Record("a") end, 10, 0)
        CreateLuaEvent(function() Record("b") end, 20, 0)
        RemoveEvents()
        "#,
    );

    host.update(100);
    assert!(take_records().is_empty());
}

#[test]
fn test_object_events_receive_owner() {
    let host = host_with(
        r#"
        RegisterServerEvent("PLAYER_EVENT_ON_LOGIN", function(event, player)
            player:RegisterEvent(function(id, delay, calls, owner)
                Record(owner:GetName() .. " " .. calls)
            end, 50, 0)
        end)
        "#,
    );
    let player = Player::new(3, "Bob");
    login(&host, &player);

    // The global clock does not drive object events
    host.update(500);
    assert!(take_records().is_empty());

    unsafe { host.world().update_object(&player, 120) };
    assert_eq!(take_records(), vec!["Bob 0", "Bob 0"]);

    host.world().remove_object(player.guid);
    unsafe { host.world().update_object(&player, 500) };
    assert!(take_records().is_empty());
}

#[test]
fn test_object_events_removed_by_script() {
    let host = host_with(
        r#"
        RegisterServerEvent("PLAYER_EVENT_ON_LOGIN", function(event, player)
            local id = player:RegisterEvent(function() Record("first") end, 10, 0)
            player:RegisterEvent(function() Record("second") end, 10, 1)
            removed = player:RemoveEventById(id)
        end)
        "#,
    );
    let player = Player::new(4, "Cid");
    login(&host, &player);

    unsafe { host.world().update_object(&player, 100) };
    assert_eq!(take_records(), vec!["second"]);
}

#[test]
fn test_remove_events_everywhere() {
    let host = host_with(
        r#"
        RegisterServerEvent("PLAYER_EVENT_ON_LOGIN", function(event, player)
            player:RegisterEvent(function() Record("object") end, 10, 0)
            CreateLuaEvent(function() Record("global") end, 10, 0)
            RemoveEvents(true)
        end)
        "#,
    );
    let player = Player::new(5, "Dee");
    login(&host, &player);

    host.update(100);
    unsafe { host.world().update_object(&player, 100) };
    assert!(take_records().is_empty());
}

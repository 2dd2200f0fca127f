//! A failed bootstrap leaves no shared names behind.

use std::os::fd::IntoRawFd;

use relay_config::RelayConfig;
use relay_core::channel::pipe;
use relay_core::{StateStore, Vec2};
use relay_engine::{EngineError, Relay, StartupArgs};
use relay_telemetry::LogSinks;

fn relay_end(read_side: bool) -> (i32, std::os::fd::OwnedFd) {
    let (read, write) = pipe().unwrap();
    if read_side {
        (read.into_raw_fd(), write)
    } else {
        (write.into_raw_fd(), read)
    }
}

#[test]
fn missing_render_program_releases_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let pid = std::process::id();

    let mut config = RelayConfig::default();
    config.ipc.segment_name = format!("/relay_bootfail_{pid}");
    config.ipc.mutex_name = format!("/relay_bootfail_sem_{pid}");
    config.render.command = vec![dir.path().join("no-such-window").display().to_string()];

    let mut peers = Vec::new();
    let mut end = |read_side| {
        let (fd, peer) = relay_end(read_side);
        peers.push(peer);
        fd
    };
    let args = StartupArgs {
        drone_map_out: end(false),
        drone_key_out: end(false),
        key_in: end(true),
        obstacle_map_out: end(false),
        obstacle_position_in: end(true),
        target_map_out: end(false),
        target_position_in: end(true),
        position: Vec2::ZERO,
        velocity: Vec2::ZERO,
        force: Vec2::ZERO,
    };

    let sinks = LogSinks::open(dir.path().join("debug.log"), dir.path().join("errors.log")).unwrap();
    let err = Relay::bootstrap(&config, args, sinks).err().unwrap();

    assert!(matches!(err, EngineError::Spawn { .. }));
    assert!(StateStore::attach(&config.ipc.segment_name, &config.ipc.mutex_name).is_err());
}

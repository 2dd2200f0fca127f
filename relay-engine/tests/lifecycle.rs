//! Full bootstrap, routing and watchdog shutdown in-process.
//!
//! One test only: it installs the process-wide signal handlers.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, IntoRawFd};
use std::thread;
use std::time::{Duration, Instant};

use relay_config::RelayConfig;
use relay_core::channel::{pipe, set_nonblocking};
use relay_core::{StateStore, Vec2};
use relay_engine::{Outcome, Relay, StartupArgs};
use relay_telemetry::LogSinks;

/// Relay-side read end, test-side write end.
fn input() -> (i32, File) {
    let (read, write) = pipe().unwrap();
    (read.into_raw_fd(), File::from(write))
}

/// Relay-side write end, test-side nonblocking read end.
fn output() -> (i32, File) {
    let (read, write) = pipe().unwrap();
    set_nonblocking(read.as_fd(), true).unwrap();
    (write.into_raw_fd(), File::from(read))
}

fn read_exactly(file: &mut File, len: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    while out.len() < len {
        assert!(Instant::now() < deadline, "timed out with {out:?}");
        match file.read(&mut buf) {
            Ok(0) => panic!("pipe closed with {out:?}"),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10))
            }
            Err(e) => panic!("read failed: {e}"),
        }
    }
    out
}

#[test]
fn relay_routes_until_the_watchdog_shuts_it_down() {
    let dir = tempfile::tempdir().unwrap();
    let pid = std::process::id();

    let mut config = RelayConfig::default();
    config.ipc.segment_name = format!("/relay_lifecycle_{pid}");
    config.ipc.mutex_name = format!("/relay_lifecycle_sem_{pid}");
    config.router.tick_interval_ms = 50;
    config.render.command = vec![
        "sh".into(),
        "-c".into(),
        "printf '40,30\\n' > /dev/fd/$1; sleep 5".into(),
        "map_window".into(),
    ];

    let (drone_map_out, mut drone_map) = output();
    let (drone_key_out, mut drone_key) = output();
    let (key_in, mut key) = input();
    let (obstacle_map_out, mut obstacle_map) = output();
    let (obstacle_position_in, mut obstacle_position) = input();
    let (target_map_out, mut target_map) = output();
    let (target_position_in, _target_position) = input();

    let args = StartupArgs {
        drone_map_out,
        drone_key_out,
        key_in,
        obstacle_map_out,
        obstacle_position_in,
        target_map_out,
        target_position_in,
        position: Vec2::new(10.0, 20.0),
        velocity: Vec2::new(0.5, 0.0),
        force: Vec2::ZERO,
    };

    let sinks = LogSinks::open(dir.path().join("debug.log"), dir.path().join("errors.log")).unwrap();
    let relay = Relay::bootstrap(&config, args, sinks).unwrap();
    assert!(relay.child_pid().0 > 0);

    let view = StateStore::attach(&config.ipc.segment_name, &config.ipc.mutex_name).unwrap();
    let state = view.snapshot().unwrap();
    assert_eq!(state.position, Vec2::new(10.0, 20.0));
    assert_eq!(state.velocity, Vec2::new(0.5, 0.0));
    assert_eq!(state.force, Vec2::ZERO);
    drop(view);

    let running = thread::spawn(move || relay.run());

    // The map window reports its size through the relay to every map reader.
    for reader in [&mut drone_map, &mut obstacle_map, &mut target_map] {
        assert_eq!(read_exactly(reader, 6), b"40,30\n");
    }

    key.write_all(b"w").unwrap();
    assert_eq!(read_exactly(&mut drone_key, 1), b"w");

    obstacle_position.write_all(b"3,4|5,6").unwrap();
    let errors = dir.path().join("errors.log");
    let deadline = Instant::now() + Duration::from_secs(10);
    while !std::fs::read_to_string(&errors).unwrap().contains("3,4|5,6\n") {
        assert!(Instant::now() < deadline, "position report never logged");
        thread::sleep(Duration::from_millis(10));
    }

    // SAFETY: the handlers were installed by bootstrap.
    assert_eq!(unsafe { libc::kill(libc::getpid(), libc::SIGUSR2) }, 0);

    let outcome = running.join().unwrap().unwrap();
    assert_eq!(outcome, Outcome::Shutdown);

    // Teardown closed the relay's write ends and removed the shared names.
    let mut buf = [0u8; 1];
    assert_eq!(drone_key.read(&mut buf).unwrap(), 0);
    assert!(StateStore::attach(&config.ipc.segment_name, &config.ipc.mutex_name).is_err());
}

//! Pipe harness shared by the router integration tests.

#![allow(dead_code)]

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, OwnedFd};
use std::time::Duration;

use relay_core::channel::{pipe, set_nonblocking, wake_pipe, ChannelEndpoint, ChannelRole};
use relay_core::router::ChannelSet;
use relay_core::supervision::{Pid, Signal, SignalSender, SignalSlot};
use relay_core::{RelayContext, Router};
use relay_telemetry::{RelayMetrics, SinkFile};

pub const CHILD: Pid = Pid(4242);

/// Records signals instead of delivering them.
#[derive(Debug, Default)]
pub struct Recorder {
    pub sent: Vec<(Pid, Signal)>,
}

impl SignalSender for Recorder {
    fn send(&mut self, pid: Pid, signal: Signal) -> io::Result<()> {
        self.sent.push((pid, signal));
        Ok(())
    }
}

/// The far ends of every router pipe.
pub struct Peers {
    pub map_size: File,
    pub key: File,
    pub obstacle_position: File,
    pub target_position: File,
    pub drone_map: File,
    pub obstacle_map: File,
    pub target_map: File,
    pub drone_key: File,
    pub wake: OwnedFd,
}

impl Peers {
    pub fn map_outputs(&mut self) -> [&mut File; 3] {
        [&mut self.drone_map, &mut self.obstacle_map, &mut self.target_map]
    }
}

pub struct Harness {
    pub router: Router,
    pub ctx: RelayContext<Recorder>,
    pub peers: Peers,
    pub dir: tempfile::TempDir,
}

fn input(role: ChannelRole) -> (ChannelEndpoint, File) {
    let (read, write) = pipe().expect("pipe");
    (ChannelEndpoint::new(role, read), File::from(write))
}

fn output(role: ChannelRole) -> (ChannelEndpoint, File) {
    let (read, write) = pipe().expect("pipe");
    set_nonblocking(read.as_fd(), true).expect("nonblocking");
    (ChannelEndpoint::new(role, write), File::from(read))
}

impl Harness {
    pub fn new(tick: Duration) -> Self {
        Self::with_slot(tick, Box::leak(Box::new(SignalSlot::new())))
    }

    pub fn with_slot(tick: Duration, slot: &'static SignalSlot) -> Self {
        let (map_size_in, map_size) = input(ChannelRole::MapSizeIn);
        let (key_in, key) = input(ChannelRole::KeyIn);
        let (obstacle_position_in, obstacle_position) = input(ChannelRole::ObstaclePositionIn);
        let (target_position_in, target_position) = input(ChannelRole::TargetPositionIn);
        let (drone_map_out, drone_map) = output(ChannelRole::DroneMapOut);
        let (obstacle_map_out, obstacle_map) = output(ChannelRole::ObstacleMapOut);
        let (target_map_out, target_map) = output(ChannelRole::TargetMapOut);
        let (drone_key_out, drone_key) = output(ChannelRole::DroneKeyOut);
        let (wake_rx, wake_tx) = wake_pipe().expect("wake pipe");

        let channels = ChannelSet {
            map_size_in,
            key_in,
            obstacle_position_in,
            target_position_in,
            drone_map_out,
            obstacle_map_out,
            target_map_out,
            drone_key_out,
        };

        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = RelayContext::with_sender(
            Recorder::default(),
            slot,
            Some(CHILD),
            SinkFile::open_append(dir.path().join("errors.log")).expect("sink"),
            RelayMetrics::new(),
        );

        Self {
            router: Router::new(channels, wake_rx, tick),
            ctx,
            peers: Peers {
                map_size,
                key,
                obstacle_position,
                target_position,
                drone_map,
                obstacle_map,
                target_map,
                drone_key,
                wake: wake_tx,
            },
            dir,
        }
    }

    /// One router iteration; returns as soon as anything written beforehand is ready.
    pub fn step(&mut self) {
        self.router.poll_once(&mut self.ctx).expect("poll");
    }

    pub fn diagnostics(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("errors.log")).unwrap_or_default()
    }
}

/// Reads whatever is buffered in a nonblocking pipe.
pub fn read_available(file: &mut File) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    out
}

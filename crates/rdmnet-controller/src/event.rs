// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Events delivered to the manager task.
//!
//! Everything that can change a device record arrives here: connection
//! completions, bytes read, timer expiries and public commands. Session
//! scoped events carry the generation of the session that produced them so
//! late arrivals for a torn-down session can be recognised and ignored.

use crate::manager::{DeviceState, ManagerStats, RemoveOutcome};
use crate::transport::Connection;
use std::io;
use std::net::SocketAddr;
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum ManagerEvent {
    /// A connection attempt finished.
    ConnectCompleted {
        endpoint: SocketAddr,
        attempt: u64,
        result: io::Result<Connection>,
    },

    /// Bytes read from a session.
    SessionData {
        endpoint: SocketAddr,
        generation: u64,
        bytes: Vec<u8>,
    },

    /// A session hit EOF or an I/O error.
    SessionClosed { endpoint: SocketAddr, generation: u64 },

    /// No heartbeat arrived before the deadline.
    HeartbeatTimeout { endpoint: SocketAddr, generation: u64 },

    /// A connected session never received a frame.
    DesignationTimeout { endpoint: SocketAddr, generation: u64 },

    Command(Command),
}

/// Requests from [`DeviceManagerHandle`](crate::service::DeviceManagerHandle).
#[derive(Debug)]
pub enum Command {
    AddDevice {
        endpoint: SocketAddr,
        reply: oneshot::Sender<bool>,
    },
    RemoveDevice {
        endpoint: SocketAddr,
        only_if_disconnected: bool,
        reply: oneshot::Sender<RemoveOutcome>,
    },
    ListManagedDevices {
        reply: oneshot::Sender<Vec<SocketAddr>>,
    },
    DeviceState {
        endpoint: SocketAddr,
        reply: oneshot::Sender<Option<DeviceState>>,
    },
    Stats {
        reply: oneshot::Sender<ManagerStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl ManagerEvent {
    /// Endpoint the event concerns, for logging.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        match self {
            Self::ConnectCompleted { endpoint, .. }
            | Self::SessionData { endpoint, .. }
            | Self::SessionClosed { endpoint, .. }
            | Self::HeartbeatTimeout { endpoint, .. }
            | Self::DesignationTimeout { endpoint, .. } => Some(*endpoint),
            Self::Command(Command::AddDevice { endpoint, .. })
            | Self::Command(Command::RemoveDevice { endpoint, .. })
            | Self::Command(Command::DeviceState { endpoint, .. }) => Some(*endpoint),
            Self::Command(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectCompleted { .. } => "connect-completed",
            Self::SessionData { .. } => "session-data",
            Self::SessionClosed { .. } => "session-closed",
            Self::HeartbeatTimeout { .. } => "heartbeat-timeout",
            Self::DesignationTimeout { .. } => "designation-timeout",
            Self::Command(_) => "command",
        }
    }
}

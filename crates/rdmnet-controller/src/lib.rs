// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RDMNet / E1.33 Controller Device Manager
//!
//! Keeps one TCP session open to every managed device, works out whether
//! this controller is the designated controller for it, and health-checks
//! the sessions it wins.
//!
//! # Features
//!
//! - **Reconnect with backoff**: failed or closed sessions retry on a
//!   growing delay between a floor and a ceiling
//! - **Designated controller election**: the first frame a device sends on
//!   a session makes us its controller
//! - **Heartbeats**: designated sessions exchange heartbeats and are torn
//!   down when the device goes quiet
//! - **Layered dispatch**: root, E1.33 and RDM PDUs decoded through a fixed
//!   route table, requests acknowledged on the session's outgoing queue
//!
//! # Quick Start
//!
//! ```bash
//! # Manage two devices on the default E1.33 port
//! rdmnet-controller --device 10.0.0.5 --device 10.0.0.6
//!
//! # Using config file
//! rdmnet-controller --config controller.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! devices = ["10.0.0.5", "10.0.0.6:5569"]
//! retry_floor_ms = 5000
//! retry_ceiling_ms = 30000
//! heartbeat_interval_ms = 5000
//! source_name = "front-of-house"
//! ```

pub mod backoff;
pub mod config;
pub mod connector;
pub mod dispatch;
pub mod event;
pub mod health;
pub mod manager;
pub mod pdu;
pub mod queue;
pub mod registry;
pub mod service;
pub mod session;
pub mod stream;
pub mod transport;

pub use backoff::{BackoffPolicy, BackoffState};
pub use config::{ConfigError, ControllerConfig, E133_PORT};
pub use manager::{DeviceManager, DeviceState, ManagerCallbacks, ManagerStats, RemoveOutcome};
pub use pdu::{DecodeError, E133Header, EncodeError, FrameBuilder, TransportHeader, TransportKind};
pub use service::{spawn, DeviceManagerHandle, ManagerError};
pub use transport::{Connection, MemoryListener, MemoryTransport, TcpTransport, Transport};

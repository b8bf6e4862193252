// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device registry: one lifecycle record per registered endpoint.

use crate::health::HealthMonitor;
use crate::queue::OutgoingQueue;
use crate::session::Session;
use crate::stream::StreamDecoder;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Externally visible lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No session; the connector is dialing or waiting to retry.
    Connecting,
    /// Session open, no frame received yet.
    Unconfirmed,
    /// We are the designated controller for this device.
    Designated,
}

/// Lifecycle record for one endpoint.
///
/// The queue, monitor and decoder only ever exist alongside a session, and
/// `designated` is only true while one does. [`DeviceRecord::teardown`]
/// releases them together.
#[derive(Default)]
pub struct DeviceRecord {
    pub(crate) session: Option<Session>,
    pub(crate) queue: Option<OutgoingQueue>,
    pub(crate) health: Option<HealthMonitor>,
    pub(crate) decoder: Option<StreamDecoder>,
    pub(crate) designated: bool,
    pub(crate) designation_timer: Option<JoinHandle<()>>,
}

impl DeviceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DeviceState {
        match (&self.session, self.designated) {
            (None, _) => DeviceState::Connecting,
            (Some(_), false) => DeviceState::Unconfirmed,
            (Some(_), true) => DeviceState::Designated,
        }
    }

    /// Generation of the live session, if any.
    pub fn generation(&self) -> Option<u64> {
        self.session.as_ref().map(Session::generation)
    }

    /// True if `generation` names the live session.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == Some(generation)
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_designated(&self) -> bool {
        self.designated
    }

    pub(crate) fn cancel_designation_timer(&mut self) {
        if let Some(timer) = self.designation_timer.take() {
            timer.abort();
        }
    }

    /// Release everything bound to the session. Timers and the reader stop
    /// before the session itself is dropped. Returns whether the record was
    /// designated.
    pub(crate) fn teardown(&mut self) -> bool {
        let was_designated = std::mem::take(&mut self.designated);

        self.health = None;
        self.queue = None;
        self.decoder = None;
        self.cancel_designation_timer();
        if let Some(session) = self.session.as_mut() {
            session.unwatch();
        }
        self.session = None;

        was_designated
    }
}

/// Endpoint address to lifecycle record.
#[derive(Default)]
pub struct DeviceRegistry {
    records: HashMap<SocketAddr, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record. Returns false if `endpoint` is already present.
    pub fn insert(&mut self, endpoint: SocketAddr) -> bool {
        if self.records.contains_key(&endpoint) {
            return false;
        }
        self.records.insert(endpoint, DeviceRecord::new());
        true
    }

    pub fn remove(&mut self, endpoint: &SocketAddr) -> Option<DeviceRecord> {
        self.records.remove(endpoint)
    }

    pub fn get(&self, endpoint: &SocketAddr) -> Option<&DeviceRecord> {
        self.records.get(endpoint)
    }

    pub fn get_mut(&mut self, endpoint: &SocketAddr) -> Option<&mut DeviceRecord> {
        self.records.get_mut(endpoint)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SocketAddr, &mut DeviceRecord)> {
        self.records.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Endpoints in the designated state.
    pub fn designated(&self) -> Vec<SocketAddr> {
        self.records
            .iter()
            .filter(|(_, record)| record.is_designated())
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Number of records holding a session.
    pub fn connected(&self) -> usize {
        self.records.values().filter(|r| r.has_session()).count()
    }
}

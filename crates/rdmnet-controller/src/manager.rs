// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device manager.
//!
//! Owns the registry and drives every device through its lifecycle:
//!
//! ```text
//!              add_device
//!                  |
//!                  v
//!   +--------> Connecting --connect ok--> Unconfirmed --first frame--> Designated
//!   |                                         |                            |
//!   |              lost election (no backoff  |          released          |
//!   +-------------------- reset) -------------+----------------------------+
//! ```
//!
//! The first frame received on a session makes us the designated controller
//! for that device. From then on every inbound frame counts as a heartbeat.
//! A session that closes before any frame arrives means another controller
//! won the election; the endpoint stays registered and keeps retrying on the
//! backoff schedule.
//!
//! All methods run on the single task that owns the manager; see
//! [`crate::service`].

use crate::config::ControllerConfig;
use crate::connector::{ConnectMatch, Connector, DisconnectReason};
use crate::dispatch::{ApplicationRequest, Dispatched, Dispatcher};
use crate::event::{Command, ManagerEvent};
use crate::health::HealthMonitor;
use crate::pdu::{E133Header, FrameBuilder, TransportHeader, TransportKind, SC_E133_ACK};
use crate::queue::OutgoingQueue;
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::session::Session;
use crate::stream::StreamDecoder;
use crate::transport::{Connection, Transport};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub use crate::registry::DeviceState;

/// Inbound application message handler. Returns true to acknowledge.
pub type MessageHandler = Box<dyn FnMut(&TransportHeader, &E133Header, &[u8]) -> bool + Send>;

/// Called with the device address when designation is gained or lost.
pub type DeviceHandler = Box<dyn FnMut(SocketAddr) + Send>;

/// Consumer callbacks, fixed at construction. Setting one twice keeps the
/// last.
#[derive(Default)]
pub struct ManagerCallbacks {
    on_message: Option<MessageHandler>,
    on_acquire: Option<DeviceHandler>,
    on_release: Option<DeviceHandler>,
}

impl ManagerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&TransportHeader, &E133Header, &[u8]) -> bool + Send + 'static,
    {
        self.on_message = Some(Box::new(handler));
        self
    }

    pub fn on_acquire<F>(mut self, handler: F) -> Self
    where
        F: FnMut(SocketAddr) + Send + 'static,
    {
        self.on_acquire = Some(Box::new(handler));
        self
    }

    pub fn on_release<F>(mut self, handler: F) -> Self
    where
        F: FnMut(SocketAddr) + Send + 'static,
    {
        self.on_release = Some(Box::new(handler));
        self
    }

    fn acquired(&mut self, endpoint: SocketAddr) {
        if let Some(cb) = self.on_acquire.as_mut() {
            cb(endpoint);
        }
    }

    fn released(&mut self, endpoint: SocketAddr) {
        if let Some(cb) = self.on_release.as_mut() {
            cb(endpoint);
        }
    }
}

/// Result of a remove request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotRegistered,
    /// Refused: the device has a live session.
    Connected,
}

/// Manager statistics snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    /// Registered endpoints.
    pub registered: usize,
    /// Endpoints with a live session.
    pub connected: usize,
    /// Endpoints we are designated controller for.
    pub designated: usize,
    pub promotions: u64,
    pub releases: u64,
    pub lost_elections: u64,
    pub heartbeat_timeouts: u64,
    pub designation_timeouts: u64,
    pub malformed_streams: u64,
    /// Root-layer blocks dispatched.
    pub frames_dispatched: u64,
    /// PDUs dropped for an unknown vector or endpoint.
    pub frames_dropped: u64,
    pub requests_acknowledged: u64,
    /// Acknowledgements that could not be queued.
    pub acks_dropped: u64,
    pub connect_attempts: u64,
    pub connection_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    promotions: u64,
    releases: u64,
    lost_elections: u64,
    heartbeat_timeouts: u64,
    designation_timeouts: u64,
    malformed_streams: u64,
    frames_dispatched: u64,
    requests_acknowledged: u64,
    acks_dropped: u64,
}

pub struct DeviceManager {
    config: ControllerConfig,
    registry: DeviceRegistry,
    connector: Connector,
    dispatcher: Dispatcher,
    builder: FrameBuilder,
    callbacks: ManagerCallbacks,
    events: mpsc::Sender<ManagerEvent>,
    next_generation: u64,
    counters: Counters,
    #[cfg(test)]
    fail_health_setup: bool,
}

impl DeviceManager {
    /// Create a manager. Asynchronous completions are posted to `events`,
    /// whose receiver must feed [`DeviceManager::handle_event`].
    pub fn new(
        config: ControllerConfig,
        transport: Arc<dyn Transport>,
        callbacks: ManagerCallbacks,
        events: mpsc::Sender<ManagerEvent>,
    ) -> Self {
        let connector = Connector::new(
            transport,
            config.backoff_policy(),
            config.connect_timeout(),
            events.clone(),
        );
        let builder = FrameBuilder::new(config.cid(), config.source_name.clone());

        Self {
            config,
            registry: DeviceRegistry::new(),
            connector,
            dispatcher: Dispatcher::new(),
            builder,
            callbacks,
            events,
            next_generation: 0,
            counters: Counters::default(),
            #[cfg(test)]
            fail_health_setup: false,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn record(&self, endpoint: &SocketAddr) -> Option<&DeviceRecord> {
        self.registry.get(endpoint)
    }

    pub fn device_state(&self, endpoint: &SocketAddr) -> Option<DeviceState> {
        self.registry.get(endpoint).map(DeviceRecord::state)
    }

    /// Start managing `endpoint`. Returns false if it already is.
    pub fn add_device(&mut self, endpoint: SocketAddr) -> bool {
        if !self.registry.insert(endpoint) {
            debug!("Device {} already managed", endpoint);
            return false;
        }
        self.connector.add_endpoint(endpoint);
        info!("Managing device {}", endpoint);
        true
    }

    /// Stop managing `endpoint`, closing any session.
    pub fn remove_device(&mut self, endpoint: SocketAddr) -> RemoveOutcome {
        let Some(mut record) = self.registry.remove(&endpoint) else {
            return RemoveOutcome::NotRegistered;
        };

        self.connector.remove_endpoint(&endpoint);
        if record.teardown() {
            self.counters.releases += 1;
            info!("Released {}", endpoint);
            self.callbacks.released(endpoint);
        }

        info!("Stopped managing device {}", endpoint);
        RemoveOutcome::Removed
    }

    /// Like [`DeviceManager::remove_device`], but leaves a connected device
    /// alone.
    pub fn remove_device_if_not_connected(&mut self, endpoint: SocketAddr) -> RemoveOutcome {
        match self.registry.get(&endpoint) {
            None => RemoveOutcome::NotRegistered,
            Some(record) if record.has_session() => {
                debug!("Not removing {}: session is live", endpoint);
                RemoveOutcome::Connected
            }
            Some(_) => self.remove_device(endpoint),
        }
    }

    /// Devices we are the designated controller for.
    pub fn list_managed_devices(&self) -> Vec<SocketAddr> {
        self.registry.designated()
    }

    pub fn stats(&self) -> ManagerStats {
        let connector = self.connector.stats();
        ManagerStats {
            registered: self.registry.len(),
            connected: self.registry.connected(),
            designated: self.registry.designated().len(),
            promotions: self.counters.promotions,
            releases: self.counters.releases,
            lost_elections: self.counters.lost_elections,
            heartbeat_timeouts: self.counters.heartbeat_timeouts,
            designation_timeouts: self.counters.designation_timeouts,
            malformed_streams: self.counters.malformed_streams,
            frames_dispatched: self.counters.frames_dispatched,
            frames_dropped: self.dispatcher.stats().dropped,
            requests_acknowledged: self.counters.requests_acknowledged,
            acks_dropped: self.counters.acks_dropped,
            connect_attempts: connector.attempts,
            connection_failures: connector.failures,
        }
    }

    /// Process one event. Returns false once the manager has shut down.
    pub fn handle_event(&mut self, event: ManagerEvent) -> bool {
        match event {
            ManagerEvent::ConnectCompleted {
                endpoint,
                attempt,
                result,
            } => self.on_connect_completed(endpoint, attempt, result),
            ManagerEvent::SessionData {
                endpoint,
                generation,
                bytes,
            } => self.on_session_data(endpoint, generation, &bytes),
            ManagerEvent::SessionClosed {
                endpoint,
                generation,
            } => self.on_session_closed(endpoint, generation),
            ManagerEvent::HeartbeatTimeout {
                endpoint,
                generation,
            } => self.on_heartbeat_timeout(endpoint, generation),
            ManagerEvent::DesignationTimeout {
                endpoint,
                generation,
            } => self.on_designation_timeout(endpoint, generation),
            ManagerEvent::Command(command) => return self.handle_command(command),
        }
        true
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::AddDevice { endpoint, reply } => {
                let _ = reply.send(self.add_device(endpoint));
            }
            Command::RemoveDevice {
                endpoint,
                only_if_disconnected,
                reply,
            } => {
                let outcome = if only_if_disconnected {
                    self.remove_device_if_not_connected(endpoint)
                } else {
                    self.remove_device(endpoint)
                };
                let _ = reply.send(outcome);
            }
            Command::ListManagedDevices { reply } => {
                let _ = reply.send(self.list_managed_devices());
            }
            Command::DeviceState { endpoint, reply } => {
                let _ = reply.send(self.device_state(&endpoint));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    pub fn on_connect_completed(
        &mut self,
        endpoint: SocketAddr,
        attempt: u64,
        result: io::Result<Connection>,
    ) {
        match result {
            Ok(connection) => match self.connector.on_connected(endpoint, attempt) {
                ConnectMatch::Accepted => self.on_connection_established(endpoint, connection),
                ConnectMatch::Stale => {
                    debug!("Dropping stale connection to {}", endpoint);
                }
                ConnectMatch::Unknown => {
                    debug!("Dropping connection to unmanaged {}", endpoint);
                }
            },
            Err(e) => {
                self.connector.on_connect_failed(endpoint, attempt, &e);
            }
        }
    }

    /// Bind a new connection to its record. The record becomes Unconfirmed.
    pub fn on_connection_established(&mut self, endpoint: SocketAddr, connection: Connection) {
        let Some(record) = self.registry.get_mut(&endpoint) else {
            error!(
                "Connection to {} (peer {}) has no device record",
                endpoint, connection.peer
            );
            return;
        };
        if record.has_session() {
            warn!("Already connected to {}, dropping new connection", endpoint);
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;

        let mut session = Session::new(connection, endpoint, generation);
        session.watch(self.events.clone());
        info!("Connected to {} (peer {})", endpoint, session.peer());

        record.decoder = Some(StreamDecoder::new(self.config.max_block_size));
        record.session = Some(session);

        if let Some(timeout) = self.config.designation_timeout() {
            let events = self.events.clone();
            record.designation_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let expired = ManagerEvent::DesignationTimeout {
                    endpoint,
                    generation,
                };
                if let Err(e) = events.send(expired).await {
                    debug!("Designation timeout for {} not delivered: {}", endpoint, e);
                }
            }));
        }
    }

    pub fn on_session_data(&mut self, endpoint: SocketAddr, generation: u64, bytes: &[u8]) {
        let Some(record) = self.registry.get_mut(&endpoint) else {
            debug!("Data from unmanaged {}", endpoint);
            return;
        };
        if !record.is_current(generation) {
            debug!("Ignoring data from stale session to {}", endpoint);
            return;
        }
        let Some(decoder) = record.decoder.as_mut() else {
            return;
        };

        let blocks = match decoder.push(bytes) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("Malformed stream from {}: {}", endpoint, e);
                self.counters.malformed_streams += 1;
                self.close_session(endpoint);
                return;
            }
        };

        let transport = TransportHeader::new(endpoint, TransportKind::Tcp);
        for block in blocks {
            // Promotion failure closes the session mid-stream.
            if !self.is_current(endpoint, generation) {
                return;
            }
            let dispatched = match self.dispatcher.dispatch(transport, &block) {
                Ok(dispatched) => dispatched,
                Err(e) => {
                    warn!("Malformed frame from {}: {}", endpoint, e);
                    self.counters.malformed_streams += 1;
                    self.close_session(endpoint);
                    return;
                }
            };
            self.counters.frames_dispatched += 1;

            for item in dispatched {
                if !self.is_current(endpoint, generation) {
                    return;
                }
                match item {
                    Dispatched::RootFrame(header) => self.on_inbound_frame(header),
                    Dispatched::Request(request) => self.on_application_request(request),
                }
            }
        }
    }

    /// A root-layer frame arrived: promote an unconfirmed record, or count a
    /// heartbeat on a designated one.
    pub fn on_inbound_frame(&mut self, header: TransportHeader) {
        if header.transport() != TransportKind::Tcp {
            return;
        }

        let endpoint = header.source();
        let Some(record) = self.registry.get_mut(&endpoint) else {
            error!("Frame from {} has no device record", endpoint);
            return;
        };
        if !record.has_session() {
            debug!("Frame from {} with no session", endpoint);
            return;
        }

        if record.is_designated() {
            if let Some(health) = record.health.as_mut() {
                health.heartbeat_received();
            }
            return;
        }

        self.promote(endpoint);
    }

    fn promote(&mut self, endpoint: SocketAddr) {
        let Some(record) = self.registry.get_mut(&endpoint) else {
            return;
        };
        let Some(session) = record.session.as_mut() else {
            return;
        };
        let generation = session.generation();
        let Some(writer) = session.take_writer() else {
            error!("Session to {} has no writer", endpoint);
            return;
        };

        record.cancel_designation_timer();
        record.designated = true;
        self.counters.promotions += 1;
        info!("Designated controller for {}", endpoint);
        self.callbacks.acquired(endpoint);

        let queue = OutgoingQueue::new(
            endpoint,
            generation,
            writer,
            self.config.queue_capacity,
            self.events.clone(),
        );
        if record.health.is_some() {
            warn!("Replacing existing health monitor for {}", endpoint);
        }
        let health_queue = queue.sender();
        #[cfg(test)]
        let health_queue = if self.fail_health_setup {
            closed_queue()
        } else {
            health_queue
        };
        let mut health = HealthMonitor::new(
            endpoint,
            generation,
            self.config.heartbeat_timing(),
            self.builder.heartbeat(),
            health_queue,
            self.events.clone(),
        );
        let armed = health.setup();
        record.queue = Some(queue);
        record.health = Some(health);

        match armed {
            Ok(()) => self.connector.reset_backoff(&endpoint),
            Err(e) => {
                warn!("Failed to set up health check for {}: {}", endpoint, e);
                self.close_session(endpoint);
            }
        }
    }

    /// Pass a request to the message handler and acknowledge it if asked to.
    pub fn on_application_request(&mut self, request: ApplicationRequest) {
        let Some(handler) = self.callbacks.on_message.as_mut() else {
            return;
        };
        if !handler(&request.transport, &request.header, &request.payload) {
            return;
        }

        let endpoint = request.transport.source();
        let Some(queue) = self.registry.get(&endpoint).and_then(|r| r.queue.as_ref()) else {
            warn!("No outgoing queue for {}, dropping acknowledgement", endpoint);
            self.counters.acks_dropped += 1;
            return;
        };

        let ack = match self.builder.status_ack(
            request.header.sequence(),
            request.header.endpoint(),
            SC_E133_ACK,
            "OK",
        ) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Cannot encode acknowledgement to {}: {}", endpoint, e);
                self.counters.acks_dropped += 1;
                return;
            }
        };
        match queue.send(ack) {
            Ok(()) => self.counters.requests_acknowledged += 1,
            Err(e) => {
                warn!("Acknowledgement to {} dropped: {}", endpoint, e);
                self.counters.acks_dropped += 1;
            }
        }
    }

    pub fn on_heartbeat_timeout(&mut self, endpoint: SocketAddr, generation: u64) {
        let Some(record) = self.registry.get_mut(&endpoint) else {
            return;
        };
        if !record.is_current(generation) {
            return;
        }
        let expired = record
            .health
            .as_mut()
            .map(HealthMonitor::deadline_expired)
            .unwrap_or(false);
        if !expired {
            return;
        }

        warn!("{} missed its heartbeat deadline", endpoint);
        self.counters.heartbeat_timeouts += 1;
        self.close_session(endpoint);
    }

    pub fn on_designation_timeout(&mut self, endpoint: SocketAddr, generation: u64) {
        let Some(record) = self.registry.get_mut(&endpoint) else {
            return;
        };
        if !record.is_current(generation) || record.is_designated() {
            return;
        }

        info!("No data from {} before the designation timeout", endpoint);
        self.counters.designation_timeouts += 1;
        self.close_session(endpoint);
    }

    pub fn on_session_closed(&mut self, endpoint: SocketAddr, generation: u64) {
        match self.registry.get(&endpoint) {
            Some(record) if record.is_current(generation) => self.close_session(endpoint),
            Some(_) => debug!("Ignoring close of stale session to {}", endpoint),
            None => debug!("Ignoring close for unmanaged {}", endpoint),
        }
    }

    /// Single teardown path for closes, heartbeat failures and timeouts.
    fn close_session(&mut self, endpoint: SocketAddr) {
        let Some(record) = self.registry.get_mut(&endpoint) else {
            error!("Closing session to {} with no device record", endpoint);
            return;
        };
        if !record.has_session() {
            return;
        }

        if record.teardown() {
            self.counters.releases += 1;
            info!("Released {}", endpoint);
            self.callbacks.released(endpoint);
            self.connector.disconnect(endpoint, DisconnectReason::Released);
        } else {
            self.counters.lost_elections += 1;
            self.connector
                .disconnect(endpoint, DisconnectReason::LostElection);
        }
    }

    /// Close every session and cancel all pending work.
    pub fn shutdown(&mut self) {
        self.connector.shutdown();
        for (endpoint, record) in self.registry.iter_mut() {
            if record.teardown() {
                self.counters.releases += 1;
                self.callbacks.released(*endpoint);
            }
        }
        info!(
            "Device manager stopped ({} devices registered)",
            self.registry.len()
        );
    }

    fn is_current(&self, endpoint: SocketAddr, generation: u64) -> bool {
        self.registry
            .get(&endpoint)
            .map(|r| r.is_current(generation))
            .unwrap_or(false)
    }
}

/// A queue sender whose writer is already gone.
#[cfg(test)]
fn closed_queue() -> crate::queue::QueueSender {
    let (tx, _) = mpsc::channel(1);
    crate::queue::QueueSender::new(tx)
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking connector with per-endpoint retry scheduling.
//!
//! Each endpoint has at most one outstanding attempt. An attempt is a spawned
//! task that waits out its delay, dials through the [`Transport`] and posts
//! [`ManagerEvent::ConnectCompleted`] back to the manager. The first attempt
//! after [`Connector::add_endpoint`] is immediate; every later attempt is
//! delayed according to the [`BackoffPolicy`].

use crate::backoff::{BackoffPolicy, BackoffState};
use crate::event::ManagerEvent;
use crate::transport::Transport;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Why a session to an endpoint went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We were the designated controller and the session closed or went
    /// unhealthy.
    Released,
    /// The session closed before any data arrived: another controller won.
    LostElection,
}

/// Result of matching a completed connection against the pending attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMatch {
    Accepted,
    /// The attempt was superseded or cancelled.
    Stale,
    /// The endpoint is no longer known.
    Unknown,
}

/// Where an endpoint is in its connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// An attempt is waiting out `delay` or dialing.
    Pending { delay: Duration },
    Connected,
}

struct EndpointState {
    backoff: BackoffState,
    status: ConnectStatus,
    attempt: u64,
    task: Option<JoinHandle<()>>,
}

impl EndpointState {
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Connector statistics.
#[derive(Debug, Default, Clone)]
pub struct ConnectorStats {
    pub attempts: u64,
    pub failures: u64,
    pub connections: u64,
}

pub struct Connector {
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
    connect_timeout: Duration,
    events: mpsc::Sender<ManagerEvent>,
    endpoints: HashMap<SocketAddr, EndpointState>,
    next_attempt: u64,
    stats: ConnectorStats,
}

impl Connector {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: BackoffPolicy,
        connect_timeout: Duration,
        events: mpsc::Sender<ManagerEvent>,
    ) -> Self {
        Self {
            transport,
            policy,
            connect_timeout,
            events,
            endpoints: HashMap::new(),
            next_attempt: 0,
            stats: ConnectorStats::default(),
        }
    }

    pub fn stats(&self) -> &ConnectorStats {
        &self.stats
    }

    /// Start connecting to `addr`. Returns false if it is already known.
    pub fn add_endpoint(&mut self, addr: SocketAddr) -> bool {
        if self.endpoints.contains_key(&addr) {
            return false;
        }
        self.endpoints.insert(
            addr,
            EndpointState {
                backoff: BackoffState::new(),
                status: ConnectStatus::Pending {
                    delay: Duration::ZERO,
                },
                attempt: 0,
                task: None,
            },
        );
        self.schedule(addr, Duration::ZERO);
        true
    }

    /// Forget `addr`, cancelling any pending attempt.
    pub fn remove_endpoint(&mut self, addr: &SocketAddr) -> bool {
        match self.endpoints.remove(addr) {
            Some(mut state) => {
                state.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.endpoints.contains_key(addr)
    }

    pub fn status(&self, addr: &SocketAddr) -> Option<ConnectStatus> {
        self.endpoints.get(addr).map(|s| s.status)
    }

    pub fn backoff(&self, addr: &SocketAddr) -> Option<&BackoffState> {
        self.endpoints.get(addr).map(|s| &s.backoff)
    }

    /// Match a successful connection against the pending attempt.
    pub fn on_connected(&mut self, addr: SocketAddr, attempt: u64) -> ConnectMatch {
        let Some(state) = self.endpoints.get_mut(&addr) else {
            return ConnectMatch::Unknown;
        };
        if state.attempt != attempt || state.status == ConnectStatus::Connected {
            return ConnectMatch::Stale;
        }

        state.task = None;
        state.status = ConnectStatus::Connected;
        self.stats.connections += 1;
        ConnectMatch::Accepted
    }

    /// A pending attempt failed; schedule the next one. Returns the retry
    /// delay, or `None` if the failure was stale.
    pub fn on_connect_failed(
        &mut self,
        addr: SocketAddr,
        attempt: u64,
        error: &io::Error,
    ) -> Option<Duration> {
        let state = self.endpoints.get_mut(&addr)?;
        if state.attempt != attempt || state.status == ConnectStatus::Connected {
            return None;
        }

        state.task = None;
        let delay = state.backoff.advance(&self.policy);
        self.stats.failures += 1;
        debug!(
            "Connect to {} failed ({}), retrying in {:?}",
            addr, error, delay
        );
        self.schedule(addr, delay);
        Some(delay)
    }

    /// The session to `addr` ended; go back to connecting after the backoff
    /// delay. Returns the delay.
    pub fn disconnect(&mut self, addr: SocketAddr, reason: DisconnectReason) -> Option<Duration> {
        let state = self.endpoints.get_mut(&addr)?;
        let delay = state.backoff.advance(&self.policy);

        match reason {
            DisconnectReason::Released => {
                info!("Reconnecting to {} in {:?}", addr, delay);
            }
            DisconnectReason::LostElection => {
                info!(
                    "Lost the election for {}, next attempt in {:?}",
                    addr, delay
                );
            }
        }

        self.schedule(addr, delay);
        Some(delay)
    }

    /// A session was confirmed; the next outage starts from the floor.
    pub fn reset_backoff(&mut self, addr: &SocketAddr) {
        if let Some(state) = self.endpoints.get_mut(addr) {
            state.backoff.reset();
        }
    }

    /// Cancel every pending attempt.
    pub fn shutdown(&mut self) {
        for state in self.endpoints.values_mut() {
            state.cancel();
        }
        self.endpoints.clear();
    }

    fn schedule(&mut self, addr: SocketAddr, delay: Duration) {
        let Some(state) = self.endpoints.get_mut(&addr) else {
            return;
        };
        state.cancel();

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        state.attempt = attempt;
        state.status = ConnectStatus::Pending { delay };
        self.stats.attempts += 1;

        let transport = self.transport.clone();
        let events = self.events.clone();
        let timeout = self.connect_timeout;

        state.task = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = transport.connect(addr, timeout).await;
            let completed = ManagerEvent::ConnectCompleted {
                endpoint: addr,
                attempt,
                result,
            };
            if events.send(completed).await.is_err() {
                debug!("Connect result for {} not delivered, manager gone", addr);
            }
        }));
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        for state in self.endpoints.values_mut() {
            state.cancel();
        }
    }
}

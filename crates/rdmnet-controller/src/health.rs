// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Health-checked connection.
//!
//! Once we are the designated controller for a device, heartbeats are sent
//! on the outgoing queue every `interval` and the device is expected to
//! show signs of life within `timeout`. Any inbound frame counts, not only
//! heartbeat replies.
//!
//! ```text
//! Uninitialized --setup()--> Armed --heartbeat_received()--> Healthy
//!                              |                               |  ^
//!                              |                               +--+ heartbeat_received()
//!                              +-----------deadline-------------+--> Unhealthy (terminal)
//! ```
//!
//! The timer task reports an expired deadline once as
//! [`ManagerEvent::HeartbeatTimeout`] and then exits. The owner has the last
//! word: traffic it handled after the timer fired but before the timeout
//! event re-arms the deadline instead of failing the connection.

use crate::event::ManagerEvent;
use crate::queue::QueueSender;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Uninitialized,
    Armed,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("Outgoing queue unavailable")]
    QueueUnavailable,

    #[error("Health monitor already set up")]
    AlreadySetUp,
}

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTiming {
    /// Time between outbound heartbeats.
    pub interval: Duration,
    /// Silence tolerated before the connection is declared unhealthy.
    pub timeout: Duration,
}

pub struct HealthMonitor {
    endpoint: SocketAddr,
    generation: u64,
    timing: HeartbeatTiming,
    heartbeat: Vec<u8>,
    queue: QueueSender,
    events: mpsc::Sender<ManagerEvent>,
    state: HealthState,
    beats: Arc<Notify>,
    task: Option<JoinHandle<()>>,
    heartbeats_received: u64,
    last_heartbeat: Instant,
}

impl HealthMonitor {
    pub fn new(
        endpoint: SocketAddr,
        generation: u64,
        timing: HeartbeatTiming,
        heartbeat: Vec<u8>,
        queue: QueueSender,
        events: mpsc::Sender<ManagerEvent>,
    ) -> Self {
        Self {
            endpoint,
            generation,
            timing,
            heartbeat,
            queue,
            events,
            state: HealthState::Uninitialized,
            beats: Arc::new(Notify::new()),
            task: None,
            heartbeats_received: 0,
            last_heartbeat: Instant::now(),
        }
    }

    /// Start the heartbeat and deadline timers.
    pub fn setup(&mut self) -> Result<(), HealthError> {
        if self.state != HealthState::Uninitialized {
            return Err(HealthError::AlreadySetUp);
        }
        if self.queue.is_closed() {
            return Err(HealthError::QueueUnavailable);
        }

        self.last_heartbeat = Instant::now();
        self.start_timers(self.last_heartbeat + self.timing.timeout);
        self.state = HealthState::Armed;
        Ok(())
    }

    /// Push the deadline out. Ignored before setup and once unhealthy.
    pub fn heartbeat_received(&mut self) {
        match self.state {
            HealthState::Armed | HealthState::Healthy => {
                self.state = HealthState::Healthy;
                self.heartbeats_received += 1;
                self.last_heartbeat = Instant::now();
                self.beats.notify_one();
            }
            HealthState::Uninitialized | HealthState::Unhealthy => {}
        }
    }

    /// Record that the deadline passed. Returns true the first time only;
    /// the caller runs the unhealthy path exactly when this returns true.
    ///
    /// A heartbeat received less than `timeout` ago means the timer raced
    /// with traffic still in flight: the deadline is re-armed from that
    /// heartbeat and false is returned.
    pub fn deadline_expired(&mut self) -> bool {
        match self.state {
            HealthState::Armed | HealthState::Healthy => {
                let deadline = self.last_heartbeat + self.timing.timeout;
                if Instant::now() < deadline {
                    debug!(
                        "Heartbeat deadline for {} moved, traffic arrived after the timer fired",
                        self.endpoint
                    );
                    self.start_timers(deadline);
                    return false;
                }
                self.state = HealthState::Unhealthy;
                self.stop();
                true
            }
            HealthState::Uninitialized | HealthState::Unhealthy => false,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn heartbeats_received(&self) -> u64 {
        self.heartbeats_received
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    fn start_timers(&mut self, deadline: Instant) {
        self.stop();
        self.task = Some(tokio::spawn(run_timers(
            self.endpoint,
            self.generation,
            self.timing,
            deadline,
            self.heartbeat.clone(),
            self.queue.clone(),
            self.beats.clone(),
            self.events.clone(),
        )));
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_timers(
    endpoint: SocketAddr,
    generation: u64,
    timing: HeartbeatTiming,
    deadline: Instant,
    heartbeat: Vec<u8>,
    queue: QueueSender,
    beats: Arc<Notify>,
    events: mpsc::Sender<ManagerEvent>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + timing.interval, timing.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let deadline = tokio::time::sleep_until(deadline);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                let timeout = ManagerEvent::HeartbeatTimeout { endpoint, generation };
                if let Err(e) = events.send(timeout).await {
                    debug!("Heartbeat timeout for {} not delivered: {}", endpoint, e);
                }
                return;
            }
            _ = beats.notified() => {
                deadline.as_mut().reset(Instant::now() + timing.timeout);
            }
            _ = ticker.tick() => {
                if let Err(e) = queue.send(heartbeat.clone()) {
                    debug!("Heartbeat to {} not queued: {}", endpoint, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "10.0.0.5:5569".parse().unwrap()
    }

    fn timing() -> HeartbeatTiming {
        HeartbeatTiming {
            interval: Duration::from_secs(5),
            timeout: Duration::from_millis(12_500),
        }
    }

    struct Fixture {
        monitor: HealthMonitor,
        frames: mpsc::Receiver<Vec<u8>>,
        events: mpsc::Receiver<ManagerEvent>,
    }

    fn fixture() -> Fixture {
        let (frame_tx, frames) = mpsc::channel(64);
        let (event_tx, events) = mpsc::channel(8);
        let monitor = HealthMonitor::new(
            addr(),
            1,
            timing(),
            b"HB".to_vec(),
            QueueSender::new(frame_tx),
            event_tx,
        );
        Fixture {
            monitor,
            frames,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_arms_and_sends_heartbeats() {
        let mut f = fixture();
        assert_eq!(f.monitor.state(), HealthState::Uninitialized);
        f.monitor.setup().unwrap();
        assert_eq!(f.monitor.state(), HealthState::Armed);
        assert_eq!(f.monitor.setup(), Err(HealthError::AlreadySetUp));

        let start = Instant::now();
        assert_eq!(f.frames.recv().await.unwrap(), b"HB");
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(f.frames.recv().await.unwrap(), b"HB");
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out_once() {
        let mut f = fixture();
        f.monitor.setup().unwrap();

        let start = Instant::now();
        match f.events.recv().await.unwrap() {
            ManagerEvent::HeartbeatTimeout {
                endpoint,
                generation,
            } => {
                assert_eq!(endpoint, addr());
                assert_eq!(generation, 1);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_millis(12_500));

        assert!(f.monitor.deadline_expired());
        assert!(!f.monitor.deadline_expired());
        assert_eq!(f.monitor.state(), HealthState::Unhealthy);

        // Terminal: nothing more is scheduled.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_connection_healthy() {
        let mut f = fixture();
        f.monitor.setup().unwrap();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            f.monitor.heartbeat_received();
        }
        assert_eq!(f.monitor.state(), HealthState::Healthy);
        assert_eq!(f.monitor.heartbeats_received(), 10);
        assert!(f.events.try_recv().is_err());

        // Stop feeding it and the deadline fires.
        let start = Instant::now();
        assert!(matches!(
            f.events.recv().await.unwrap(),
            ManagerEvent::HeartbeatTimeout { .. }
        ));
        assert!(start.elapsed() <= Duration::from_millis(12_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_heartbeat_rearms_deadline() {
        let mut f = fixture();
        f.monitor.setup().unwrap();

        assert!(matches!(
            f.events.recv().await.unwrap(),
            ManagerEvent::HeartbeatTimeout { .. }
        ));

        // Traffic handled before the timeout event wins.
        f.monitor.heartbeat_received();
        let handled = Instant::now();
        assert_eq!(f.monitor.last_heartbeat(), handled);
        assert!(!f.monitor.deadline_expired());
        assert_eq!(f.monitor.state(), HealthState::Healthy);

        assert!(matches!(
            f.events.recv().await.unwrap(),
            ManagerEvent::HeartbeatTimeout { .. }
        ));
        assert_eq!(handled.elapsed(), Duration::from_millis(12_500));
        assert!(f.monitor.deadline_expired());
        assert_eq!(f.monitor.state(), HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_setup_fails_without_queue() {
        let mut f = fixture();
        drop(f.frames);
        assert_eq!(f.monitor.setup(), Err(HealthError::QueueUnavailable));
        assert_eq!(f.monitor.state(), HealthState::Uninitialized);
    }

    #[tokio::test]
    async fn test_heartbeat_before_setup_is_ignored() {
        let mut f = fixture();
        f.monitor.heartbeat_received();
        assert_eq!(f.monitor.state(), HealthState::Uninitialized);
        assert_eq!(f.monitor.heartbeats_received(), 0);
    }
}

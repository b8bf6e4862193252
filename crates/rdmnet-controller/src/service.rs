// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Manager task and its handle.
//!
//! The [`DeviceManager`] lives on one spawned task that drains the event
//! channel; nothing else touches it. [`DeviceManagerHandle`] posts commands
//! to that task and waits for the reply.

use crate::config::{ConfigError, ControllerConfig};
use crate::event::{Command, ManagerEvent};
use crate::manager::{DeviceManager, DeviceState, ManagerCallbacks, ManagerStats, RemoveOutcome};
use crate::transport::Transport;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, trace};

/// Handle errors.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Device manager not running")]
    NotRunning,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Handle to control a running device manager.
#[derive(Clone)]
pub struct DeviceManagerHandle {
    events: mpsc::Sender<ManagerEvent>,
}

impl DeviceManagerHandle {
    /// Check if the manager task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    /// Start managing `endpoint`. Returns false if it already was.
    pub async fn add_device(&self, endpoint: SocketAddr) -> Result<bool, ManagerError> {
        self.request(|reply| Command::AddDevice { endpoint, reply })
            .await
    }

    pub async fn remove_device(&self, endpoint: SocketAddr) -> Result<RemoveOutcome, ManagerError> {
        self.request(|reply| Command::RemoveDevice {
            endpoint,
            only_if_disconnected: false,
            reply,
        })
        .await
    }

    pub async fn remove_device_if_not_connected(
        &self,
        endpoint: SocketAddr,
    ) -> Result<RemoveOutcome, ManagerError> {
        self.request(|reply| Command::RemoveDevice {
            endpoint,
            only_if_disconnected: true,
            reply,
        })
        .await
    }

    /// Devices we are currently the designated controller for.
    pub async fn list_managed_devices(&self) -> Result<Vec<SocketAddr>, ManagerError> {
        self.request(|reply| Command::ListManagedDevices { reply })
            .await
    }

    pub async fn device_state(
        &self,
        endpoint: SocketAddr,
    ) -> Result<Option<DeviceState>, ManagerError> {
        self.request(|reply| Command::DeviceState { endpoint, reply })
            .await
    }

    pub async fn stats(&self) -> Result<ManagerStats, ManagerError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Close all sessions and stop the manager task.
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ManagerError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(ManagerEvent::Command(command(tx)))
            .await
            .map_err(|_| ManagerError::NotRunning)?;
        rx.await.map_err(|_| ManagerError::NotRunning)
    }
}

/// Validate `config`, spawn the manager task and register the configured
/// devices.
pub fn spawn(
    config: ControllerConfig,
    transport: Arc<dyn Transport>,
    callbacks: ManagerCallbacks,
) -> Result<(DeviceManagerHandle, JoinHandle<()>), ManagerError> {
    config.validate()?;
    let devices = config.device_endpoints()?;

    let (tx, rx) = mpsc::channel(config.event_capacity);
    let mut manager = DeviceManager::new(config, transport, callbacks, tx.clone());
    for endpoint in devices {
        manager.add_device(endpoint);
    }

    let task = tokio::spawn(run(manager, rx));
    Ok((DeviceManagerHandle { events: tx }, task))
}

async fn run(mut manager: DeviceManager, mut events: mpsc::Receiver<ManagerEvent>) {
    info!("Device manager started");

    // The manager holds a sender itself, so the channel never drains to
    // None while it is alive; only a shutdown command ends the loop.
    while let Some(event) = events.recv().await {
        trace!("{} event for {:?}", event.kind(), event.endpoint());
        if !manager.handle_event(event) {
            break;
        }
    }

    events.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 5569))
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_round_trip() {
        let mut config = ControllerConfig::default();
        config.add_device("10.0.0.5");
        let (handle, task) = spawn(
            config,
            Arc::new(MemoryTransport::new()),
            ManagerCallbacks::new(),
        )
        .unwrap();

        assert!(handle.is_running());
        assert!(!handle.add_device(addr(5)).await.unwrap());
        assert!(handle.add_device(addr(6)).await.unwrap());
        assert_eq!(
            handle.device_state(addr(6)).await.unwrap(),
            Some(DeviceState::Connecting)
        );
        assert_eq!(handle.stats().await.unwrap().registered, 2);
        assert!(handle.list_managed_devices().await.unwrap().is_empty());
        assert_eq!(
            handle.remove_device(addr(6)).await.unwrap(),
            RemoveOutcome::Removed
        );
        assert_eq!(
            handle.remove_device_if_not_connected(addr(6)).await.unwrap(),
            RemoveOutcome::NotRegistered
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(!handle.is_running());
        assert!(matches!(
            handle.stats().await,
            Err(ManagerError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = ControllerConfig {
            queue_capacity: 0,
            ..ControllerConfig::default()
        };
        let result = spawn(
            config,
            Arc::new(MemoryTransport::new()),
            ManagerCallbacks::new(),
        );
        assert!(matches!(result, Err(ManagerError::Config(_))));
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outgoing message queue.
//!
//! Producers submit complete frames without waiting for the socket. A writer
//! task owns the write half of the session and drains the queue in FIFO
//! order, coalescing whatever is already queued into one write.

use crate::event::ManagerEvent;
use crate::transport::BoxedStream;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on bytes coalesced into a single write.
const MAX_BATCH_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Outgoing queue full")]
    Full,

    #[error("Outgoing queue closed")]
    Closed,
}

/// Cloneable submission side of an [`OutgoingQueue`].
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl QueueSender {
    pub(crate) fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Queue a frame. Never waits: a full queue rejects the frame.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), QueueError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Queue bound to one session. Dropping it stops the writer; frames not yet
/// written are discarded.
pub struct OutgoingQueue {
    sender: QueueSender,
    writer: JoinHandle<()>,
}

impl OutgoingQueue {
    /// Spawn the writer task for `writer`. A write failure is reported as
    /// [`ManagerEvent::SessionClosed`] for `generation`.
    pub fn new(
        endpoint: SocketAddr,
        generation: u64,
        writer: WriteHalf<BoxedStream>,
        capacity: usize,
        events: mpsc::Sender<ManagerEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = tokio::spawn(write_loop(endpoint, generation, writer, rx, events));
        Self {
            sender: QueueSender::new(tx),
            writer,
        }
    }

    pub fn send(&self, frame: Vec<u8>) -> Result<(), QueueError> {
        self.sender.send(frame)
    }

    pub fn sender(&self) -> QueueSender {
        self.sender.clone()
    }
}

impl Drop for OutgoingQueue {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

async fn write_loop(
    endpoint: SocketAddr,
    generation: u64,
    mut writer: WriteHalf<BoxedStream>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<ManagerEvent>,
) {
    let mut batch = Vec::with_capacity(4096);

    while let Some(frame) = rx.recv().await {
        batch.clear();
        batch.extend_from_slice(&frame);
        while batch.len() < MAX_BATCH_BYTES {
            match rx.try_recv() {
                Ok(frame) => batch.extend_from_slice(&frame),
                Err(_) => break,
            }
        }

        let result = match writer.write_all(&batch).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Write to {} failed: {}", endpoint, e);
            let closed = ManagerEvent::SessionClosed {
                endpoint,
                generation,
            };
            if events.send(closed).await.is_err() {
                debug!("Close of {} not delivered, manager gone", endpoint);
            }
            return;
        }
    }
}

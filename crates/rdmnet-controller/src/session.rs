// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A live connection to one device.

use crate::event::ManagerEvent;
use crate::transport::{BoxedStream, Connection};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const READ_BUFFER_SIZE: usize = 8192;

/// Owns both halves of the stream until they are handed to the reader task
/// ([`Session::watch`]) and the outgoing queue ([`Session::take_writer`]).
/// Dropping the session stops the reader and closes the stream.
pub struct Session {
    endpoint: SocketAddr,
    peer: SocketAddr,
    generation: u64,
    reader: Option<ReadHalf<BoxedStream>>,
    writer: Option<WriteHalf<BoxedStream>>,
    read_task: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(connection: Connection, endpoint: SocketAddr, generation: u64) -> Self {
        let (reader, writer) = tokio::io::split(connection.stream);
        Self {
            endpoint,
            peer: connection.peer,
            generation,
            reader: Some(reader),
            writer: Some(writer),
            read_task: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start delivering received bytes as [`ManagerEvent::SessionData`],
    /// followed by one [`ManagerEvent::SessionClosed`] on EOF or error.
    pub fn watch(&mut self, events: mpsc::Sender<ManagerEvent>) -> bool {
        let Some(reader) = self.reader.take() else {
            return false;
        };
        self.read_task = Some(tokio::spawn(read_loop(
            self.endpoint,
            self.generation,
            reader,
            events,
        )));
        true
    }

    /// Stop reading. No further events are produced for this session once
    /// the reader task has been cancelled.
    pub fn unwatch(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }

    pub fn take_writer(&mut self) -> Option<WriteHalf<BoxedStream>> {
        self.writer.take()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unwatch();
    }
}

async fn read_loop(
    endpoint: SocketAddr,
    generation: u64,
    mut reader: ReadHalf<BoxedStream>,
    events: mpsc::Sender<ManagerEvent>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = ManagerEvent::SessionData {
                    endpoint,
                    generation,
                    bytes: buf[..n].to_vec(),
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("Read error from {}: {}", endpoint, e);
                break;
            }
        }
    }

    let closed = ManagerEvent::SessionClosed {
        endpoint,
        generation,
    };
    if events.send(closed).await.is_err() {
        debug!("Close of {} not delivered, manager gone", endpoint);
    }
}

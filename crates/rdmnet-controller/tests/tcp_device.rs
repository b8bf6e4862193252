// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Controller against a device listening on a real TCP socket.

use rdmnet_controller::pdu::{self, Pdus, VECTOR_FRAMING_STATUS, VECTOR_ROOT_NULL};
use rdmnet_controller::stream::StreamDecoder;
use rdmnet_controller::{ControllerConfig, FrameBuilder, ManagerCallbacks, TcpTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn next_block(stream: &mut TcpStream, decoder: &mut StreamDecoder) -> Vec<Vec<u8>> {
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "controller closed the connection");
        let blocks = decoder.push(&buf[..n]).unwrap();
        if !blocks.is_empty() {
            return blocks;
        }
    }
}

fn root_vector(block: &[u8]) -> u32 {
    pdu::parse_root(Pdus::new(block).next().unwrap().unwrap())
        .unwrap()
        .vector
}

#[tokio::test]
async fn test_tcp_designation_ack_and_heartbeat() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let device_addr = listener.local_addr().unwrap();

    let config = ControllerConfig {
        heartbeat_interval_ms: 100,
        heartbeat_timeout_ms: 1_000,
        ..ControllerConfig::default()
    };
    let (handle, task) = rdmnet_controller::spawn(
        config,
        Arc::new(TcpTransport),
        ManagerCallbacks::new().on_message(|_, header, payload| {
            header.endpoint() == 0 && payload == b"\x20\x00"
        }),
    )
    .unwrap();

    assert!(handle.add_device(device_addr).await.unwrap());
    let (mut stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    let device = FrameBuilder::new([9u8; 16], "tcp-device");
    stream
        .write_all(&device.rdm_request(77, 0, b"\x20\x00").unwrap())
        .await
        .unwrap();

    let mut decoder = StreamDecoder::new(64 * 1024);
    let mut blocks = timeout(WAIT, next_block(&mut stream, &mut decoder))
        .await
        .unwrap();
    let ack = blocks.remove(0);
    let root = pdu::parse_root(Pdus::new(&ack).next().unwrap().unwrap()).unwrap();
    let e133 = pdu::parse_e133(Pdus::new(root.data).next().unwrap().unwrap()).unwrap();
    assert_eq!(e133.vector, VECTOR_FRAMING_STATUS);
    assert_eq!(e133.header.sequence(), 77);
    assert_eq!(e133.header.source_name(), "rdmnet-controller");

    assert_eq!(
        handle.list_managed_devices().await.unwrap(),
        vec![device_addr]
    );

    // Heartbeats follow on the same stream.
    let heartbeat = loop {
        if let Some(block) = blocks.pop() {
            break block;
        }
        blocks = timeout(WAIT, next_block(&mut stream, &mut decoder))
            .await
            .unwrap();
    };
    assert_eq!(root_vector(&heartbeat), VECTOR_ROOT_NULL);

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    // Shutdown closes the socket.
    let mut rest = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_tcp_refused_device_keeps_retrying() {
    // Grab a free port, then close it so connects are refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let device_addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ControllerConfig {
        retry_floor_ms: 50,
        retry_ceiling_ms: 100,
        ..ControllerConfig::default()
    };
    let (handle, task) =
        rdmnet_controller::spawn(config, Arc::new(TcpTransport), ManagerCallbacks::new())
            .unwrap();
    handle.add_device(device_addr).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = handle.stats().await.unwrap();
    assert!(stats.connection_failures >= 2, "{:?}", stats);
    assert_eq!(stats.registered, 1);
    assert!(handle.list_managed_devices().await.unwrap().is_empty());

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Layered inbound frame dispatch.
//!
//! A block is decoded through a fixed chain of stages:
//!
//! ```text
//! Root (transport envelope) -> E1.33 (sequence, endpoint) -> RDM (request)
//! ```
//!
//! Each stage looks up the PDU vector in its route table and either hands
//! the PDU data to the next stage, consumes it, or delivers a request.
//! Anything not in a table is dropped with a debug log. One dispatcher is
//! shared by every session; the per-session [`StreamDecoder`] feeds it.
//!
//! [`StreamDecoder`]: crate::stream::StreamDecoder

use crate::pdu::{
    self, DecodeError, E133Header, Pdus, TransportHeader, ROOT_E133_ENDPOINT,
    VECTOR_FRAMING_RDMNET, VECTOR_FRAMING_STATUS, VECTOR_RDMNET_DATA, VECTOR_ROOT_E133,
    VECTOR_ROOT_NULL,
};
use std::collections::HashSet;
use tracing::debug;

/// A request body delivered by the innermost stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRequest {
    pub transport: TransportHeader,
    pub header: E133Header,
    pub payload: Vec<u8>,
}

/// Output of dispatching one block, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// A root-layer PDU was received (heartbeats included).
    RootFrame(TransportHeader),
    /// A request for an endpoint with a registered handler.
    Request(ApplicationRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Root,
    E133,
    Rdm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Decode the PDU data with the given stage.
    Next(Stage),
    /// Recognised vector with nothing further to decode.
    Consumed,
    /// Terminal: deliver the PDU data as a request.
    Deliver,
}

const ROOT_ROUTES: &[(u32, Route)] = &[
    (VECTOR_ROOT_E133, Route::Next(Stage::E133)),
    (VECTOR_ROOT_NULL, Route::Consumed),
];

const E133_ROUTES: &[(u32, Route)] = &[
    (VECTOR_FRAMING_RDMNET, Route::Next(Stage::Rdm)),
    // Devices don't send us status; recognised but ignored.
    (VECTOR_FRAMING_STATUS, Route::Consumed),
];

const RDM_ROUTES: &[(u32, Route)] = &[(VECTOR_RDMNET_DATA as u32, Route::Deliver)];

fn route(stage: Stage, vector: u32) -> Option<Route> {
    let table = match stage {
        Stage::Root => ROOT_ROUTES,
        Stage::E133 => E133_ROUTES,
        Stage::Rdm => RDM_ROUTES,
    };
    table
        .iter()
        .find(|(v, _)| *v == vector)
        .map(|(_, route)| *route)
}

/// Dispatch statistics.
#[derive(Debug, Default, Clone)]
pub struct DispatchStats {
    /// Root PDUs seen.
    pub root_frames: u64,
    /// Requests delivered.
    pub requests: u64,
    /// PDUs dropped for an unknown vector or endpoint.
    pub dropped: u64,
}

/// The shared decode chain.
#[derive(Debug)]
pub struct Dispatcher {
    endpoints: HashSet<u16>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher delivering requests for the root endpoint.
    pub fn new() -> Self {
        let mut endpoints = HashSet::new();
        endpoints.insert(ROOT_E133_ENDPOINT);
        Self {
            endpoints,
            stats: DispatchStats::default(),
        }
    }

    /// Deliver requests addressed to `endpoint` as well.
    pub fn add_endpoint(&mut self, endpoint: u16) {
        self.endpoints.insert(endpoint);
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Decode one root-layer block received with `transport` metadata.
    pub fn dispatch(
        &mut self,
        transport: TransportHeader,
        block: &[u8],
    ) -> Result<Vec<Dispatched>, DecodeError> {
        let mut out = Vec::new();

        for body in Pdus::new(block) {
            let root = pdu::parse_root(body?)?;
            self.stats.root_frames += 1;
            out.push(Dispatched::RootFrame(transport));

            match route(Stage::Root, root.vector) {
                Some(Route::Next(Stage::E133)) => self.dispatch_e133(transport, root.data, &mut out)?,
                Some(Route::Consumed) => {}
                _ => self.drop_pdu(Stage::Root, root.vector),
            }
        }

        Ok(out)
    }

    fn dispatch_e133(
        &mut self,
        transport: TransportHeader,
        data: &[u8],
        out: &mut Vec<Dispatched>,
    ) -> Result<(), DecodeError> {
        for body in Pdus::new(data) {
            let e133 = pdu::parse_e133(body?)?;
            match route(Stage::E133, e133.vector) {
                Some(Route::Next(Stage::Rdm)) => {
                    self.dispatch_rdm(transport, &e133.header, e133.data, out)?
                }
                Some(Route::Consumed) => {}
                _ => self.drop_pdu(Stage::E133, e133.vector),
            }
        }
        Ok(())
    }

    fn dispatch_rdm(
        &mut self,
        transport: TransportHeader,
        header: &E133Header,
        data: &[u8],
        out: &mut Vec<Dispatched>,
    ) -> Result<(), DecodeError> {
        for body in Pdus::new(data) {
            let rdm = pdu::parse_rdm(body?)?;
            if route(Stage::Rdm, u32::from(rdm.vector)) != Some(Route::Deliver) {
                self.drop_pdu(Stage::Rdm, u32::from(rdm.vector));
                continue;
            }

            if !self.endpoints.contains(&header.endpoint()) {
                debug!(
                    "No handler for endpoint {} from {}",
                    header.endpoint(),
                    transport.source()
                );
                self.stats.dropped += 1;
                continue;
            }

            self.stats.requests += 1;
            out.push(Dispatched::Request(ApplicationRequest {
                transport,
                header: header.clone(),
                payload: rdm.data.to_vec(),
            }));
        }
        Ok(())
    }

    fn drop_pdu(&mut self, stage: Stage, vector: u32) {
        debug!("Dropping {:?} PDU with unknown vector 0x{:x}", stage, vector);
        self.stats.dropped += 1;
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{frame_block, wrap_pdu, FrameBuilder, TransportKind, PREAMBLE_SIZE};

    fn header() -> TransportHeader {
        TransportHeader::new("10.0.0.5:5569".parse().unwrap(), TransportKind::Tcp)
    }

    fn builder() -> FrameBuilder {
        FrameBuilder::new([9u8; 16], "device")
    }

    fn block(frame: &[u8]) -> &[u8] {
        &frame[PREAMBLE_SIZE..]
    }

    #[test]
    fn test_heartbeat_only_reports_root_frame() {
        let mut dispatcher = Dispatcher::new();
        let frame = builder().heartbeat();
        let out = dispatcher.dispatch(header(), block(&frame)).unwrap();
        assert_eq!(out, vec![Dispatched::RootFrame(header())]);
        assert_eq!(dispatcher.stats().requests, 0);
    }

    #[test]
    fn test_root_endpoint_request_is_delivered() {
        let mut dispatcher = Dispatcher::new();
        let frame = builder().rdm_request(17, ROOT_E133_ENDPOINT, &[0x10, 0x20]).unwrap();
        let out = dispatcher.dispatch(header(), block(&frame)).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Dispatched::RootFrame(header()));
        match &out[1] {
            Dispatched::Request(req) => {
                assert_eq!(req.header.sequence(), 17);
                assert_eq!(req.header.endpoint(), ROOT_E133_ENDPOINT);
                assert_eq!(req.header.source_name(), "device");
                assert_eq!(req.payload, vec![0x10, 0x20]);
                assert_eq!(req.transport, header());
            }
            other => panic!("Wrong dispatch result: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_endpoint_is_dropped() {
        let mut dispatcher = Dispatcher::new();
        let frame = builder().rdm_request(1, 4, &[0x10]).unwrap();
        let out = dispatcher.dispatch(header(), block(&frame)).unwrap();
        assert_eq!(out, vec![Dispatched::RootFrame(header())]);
        assert_eq!(dispatcher.stats().dropped, 1);

        dispatcher.add_endpoint(4);
        let out = dispatcher.dispatch(header(), block(&frame)).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_status_frames_are_consumed() {
        let mut dispatcher = Dispatcher::new();
        let frame = builder().status_ack(5, 0, 0, "OK").unwrap();
        let out = dispatcher.dispatch(header(), block(&frame)).unwrap();
        assert_eq!(out, vec![Dispatched::RootFrame(header())]);
        assert_eq!(dispatcher.stats().dropped, 0);
    }

    #[test]
    fn test_unknown_root_vector_is_dropped() {
        let mut dispatcher = Dispatcher::new();
        let mut root = 0x1234_u32.to_be_bytes().to_vec();
        root.extend_from_slice(&[0u8; 16]);
        let frame = frame_block(&wrap_pdu(&root).unwrap()).unwrap();

        let out = dispatcher.dispatch(header(), block(&frame)).unwrap();
        assert_eq!(out, vec![Dispatched::RootFrame(header())]);
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[test]
    fn test_truncated_root_pdu_is_an_error() {
        let mut dispatcher = Dispatcher::new();
        let frame = builder().heartbeat();
        let truncated = &block(&frame)[..10];
        assert!(dispatcher.dispatch(header(), truncated).is_err());
    }
}

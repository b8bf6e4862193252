// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! E1.33 PDU encoding for the TCP transport.
//!
//! ACN-style layering, one PDU nested inside the data of the previous one:
//!
//! ```text
//! +--------------------------+-----------------+
//! | "ASC-E1.17\0\0\0" (12B)  | Block len (4B)  |   stream preamble
//! +--------------------------+-----------------+
//! | F/L (3B) | Vector (4B) | CID (16B) | data  |   root PDU
//! +----------+-------------+-----------+-------+
//!     | F/L (3B) | Vector (4B) | Name (64B) | Seq (4B) | Endpoint (2B) | Rsvd (1B) | data |
//!         | F/L (3B) | Vector (1B) | RDM request |                               RDM PDU
//!         | F/L (3B) | Status (2B) | description |                               status PDU
//! ```
//!
//! F/L is the flags+length field: flags in the high nibble of the first byte
//! and a 20-bit length covering the whole PDU.

use std::net::SocketAddr;
use thiserror::Error;

/// ACN packet identifier that opens every TCP block.
pub const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";

/// Packet identifier plus the 4-byte block length.
pub const PREAMBLE_SIZE: usize = 16;

/// Component identifier size.
pub const CID_SIZE: usize = 16;

/// Fixed size of the E1.33 source name field (NUL padded).
pub const SOURCE_NAME_SIZE: usize = 64;

/// Root vector carrying E1.33 data.
pub const VECTOR_ROOT_E133: u32 = 0x0000_0005;
/// Root vector with no payload, used as the TCP heartbeat.
pub const VECTOR_ROOT_NULL: u32 = 0x0000_0006;

/// E1.33 framing vector for RDM traffic.
pub const VECTOR_FRAMING_RDMNET: u32 = 0x0000_0001;
/// E1.33 framing vector for status messages.
pub const VECTOR_FRAMING_STATUS: u32 = 0x0000_0002;

/// RDM layer vector.
pub const VECTOR_RDMNET_DATA: u8 = 0xCC;

/// Endpoint id of the device itself.
pub const ROOT_E133_ENDPOINT: u16 = 0;

/// Status code acknowledging a request.
pub const SC_E133_ACK: u16 = 0x0000;

const FLAGS: u8 = 0xF0;
const FLAGS_LENGTH_SIZE: usize = 3;
const MAX_PDU_LENGTH: usize = 0x000F_FFFF;

const ROOT_HEADER_SIZE: usize = 4 + CID_SIZE;
const E133_HEADER_SIZE: usize = 4 + SOURCE_NAME_SIZE + 4 + 2 + 1;

/// Component identifier (a UUID in network byte order).
pub type Cid = [u8; CID_SIZE];

/// PDU decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Bad ACN packet identifier")]
    BadPacketIdentifier,

    #[error("Block of {size} bytes exceeds limit of {max}")]
    BlockTooLarge { size: usize, max: usize },

    #[error("Truncated PDU: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid PDU flags 0x{0:02x}")]
    BadFlags(u8),

    #[error("Invalid PDU length {0}")]
    BadLength(usize),
}

/// PDU encoding errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("PDU of {size} bytes exceeds limit of {max}")]
    PduTooLarge { size: usize, max: usize },

    #[error("Block of {0} bytes does not fit the preamble length")]
    BlockTooLarge(usize),
}

/// How a frame reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Tcp,
    Udp,
}

/// Routing metadata extracted by the outer layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    source: SocketAddr,
    transport: TransportKind,
}

impl TransportHeader {
    pub fn new(source: SocketAddr, transport: TransportKind) -> Self {
        Self { source, transport }
    }

    /// Address of the remote end that sent the frame.
    pub fn source(&self) -> SocketAddr {
        self.source
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }
}

/// Header of an E1.33 PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E133Header {
    source_name: String,
    sequence: u32,
    endpoint: u16,
}

impl E133Header {
    pub fn new(source_name: impl Into<String>, sequence: u32, endpoint: u16) -> Self {
        Self {
            source_name: source_name.into(),
            sequence,
            endpoint,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn endpoint(&self) -> u16 {
        self.endpoint
    }
}

/// Decoded root-layer PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPdu<'a> {
    pub vector: u32,
    pub cid: Cid,
    pub data: &'a [u8],
}

/// Decoded E1.33-layer PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E133Pdu<'a> {
    pub vector: u32,
    pub header: E133Header,
    pub data: &'a [u8],
}

/// Decoded RDM-layer PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmPdu<'a> {
    pub vector: u8,
    pub data: &'a [u8],
}

/// Decoded status PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPdu {
    pub code: u16,
    pub description: String,
}

/// Iterates over consecutive PDUs in a buffer, yielding each PDU body
/// (everything after the flags+length field).
pub struct Pdus<'a> {
    remaining: &'a [u8],
}

impl<'a> Pdus<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { remaining: buf }
    }
}

impl<'a> Iterator for Pdus<'a> {
    type Item = Result<&'a [u8], DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        match split_pdu(self.remaining) {
            Ok((body, rest)) => {
                self.remaining = rest;
                Some(Ok(body))
            }
            Err(e) => {
                self.remaining = &[];
                Some(Err(e))
            }
        }
    }
}

/// Split the first PDU off `buf`, returning its body and the remainder.
pub fn split_pdu(buf: &[u8]) -> Result<(&[u8], &[u8]), DecodeError> {
    if buf.len() < FLAGS_LENGTH_SIZE {
        return Err(DecodeError::Truncated {
            needed: FLAGS_LENGTH_SIZE,
            available: buf.len(),
        });
    }
    if buf[0] & 0xF0 != FLAGS {
        return Err(DecodeError::BadFlags(buf[0] & 0xF0));
    }

    let length =
        (usize::from(buf[0] & 0x0F) << 16) | (usize::from(buf[1]) << 8) | usize::from(buf[2]);
    if length < FLAGS_LENGTH_SIZE {
        return Err(DecodeError::BadLength(length));
    }
    if length > buf.len() {
        return Err(DecodeError::Truncated {
            needed: length,
            available: buf.len(),
        });
    }

    Ok((&buf[FLAGS_LENGTH_SIZE..length], &buf[length..]))
}

pub fn parse_root(body: &[u8]) -> Result<RootPdu<'_>, DecodeError> {
    require(body, ROOT_HEADER_SIZE)?;
    let mut cid = [0u8; CID_SIZE];
    cid.copy_from_slice(&body[4..ROOT_HEADER_SIZE]);
    Ok(RootPdu {
        vector: read_u32(body, 0),
        cid,
        data: &body[ROOT_HEADER_SIZE..],
    })
}

pub fn parse_e133(body: &[u8]) -> Result<E133Pdu<'_>, DecodeError> {
    require(body, E133_HEADER_SIZE)?;
    let name = &body[4..4 + SOURCE_NAME_SIZE];
    let name_len = name.iter().position(|b| *b == 0).unwrap_or(name.len());
    let offset = 4 + SOURCE_NAME_SIZE;

    Ok(E133Pdu {
        vector: read_u32(body, 0),
        header: E133Header {
            source_name: String::from_utf8_lossy(&name[..name_len]).into_owned(),
            sequence: read_u32(body, offset),
            endpoint: read_u16(body, offset + 4),
        },
        data: &body[E133_HEADER_SIZE..],
    })
}

pub fn parse_rdm(body: &[u8]) -> Result<RdmPdu<'_>, DecodeError> {
    require(body, 1)?;
    Ok(RdmPdu {
        vector: body[0],
        data: &body[1..],
    })
}

pub fn parse_status(body: &[u8]) -> Result<StatusPdu, DecodeError> {
    require(body, 2)?;
    Ok(StatusPdu {
        code: read_u16(body, 0),
        description: String::from_utf8_lossy(&body[2..]).into_owned(),
    })
}

/// Read the block length from a complete stream preamble.
pub fn parse_preamble(preamble: &[u8]) -> Result<usize, DecodeError> {
    require(preamble, PREAMBLE_SIZE)?;
    if preamble[..ACN_PACKET_IDENTIFIER.len()] != ACN_PACKET_IDENTIFIER {
        return Err(DecodeError::BadPacketIdentifier);
    }
    Ok(read_u32(preamble, ACN_PACKET_IDENTIFIER.len()) as usize)
}

/// Builds outbound frames stamped with this controller's identity.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    cid: Cid,
    source_name: String,
}

impl FrameBuilder {
    pub fn new(cid: Cid, source_name: impl Into<String>) -> Self {
        Self {
            cid,
            source_name: source_name.into(),
        }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// Root NULL PDU, sent periodically to keep the connection alive.
    pub fn heartbeat(&self) -> Vec<u8> {
        // Fixed size, always within limits.
        encode_block(&encode_pdu(&self.root_body(VECTOR_ROOT_NULL, &[])))
    }

    /// Status acknowledgement echoing the request's sequence and endpoint.
    pub fn status_ack(
        &self,
        sequence: u32,
        endpoint: u16,
        code: u16,
        description: &str,
    ) -> Result<Vec<u8>, EncodeError> {
        let mut status = Vec::with_capacity(2 + description.len());
        status.extend_from_slice(&code.to_be_bytes());
        status.extend_from_slice(description.as_bytes());

        self.root_e133(
            VECTOR_FRAMING_STATUS,
            sequence,
            endpoint,
            &wrap_pdu(&status)?,
        )
    }

    /// RDM request addressed to `endpoint`.
    pub fn rdm_request(
        &self,
        sequence: u32,
        endpoint: u16,
        request: &[u8],
    ) -> Result<Vec<u8>, EncodeError> {
        let mut rdm = Vec::with_capacity(1 + request.len());
        rdm.push(VECTOR_RDMNET_DATA);
        rdm.extend_from_slice(request);

        self.root_e133(VECTOR_FRAMING_RDMNET, sequence, endpoint, &wrap_pdu(&rdm)?)
    }

    fn root_e133(
        &self,
        vector: u32,
        sequence: u32,
        endpoint: u16,
        data: &[u8],
    ) -> Result<Vec<u8>, EncodeError> {
        let mut e133 = Vec::with_capacity(E133_HEADER_SIZE + data.len());
        e133.extend_from_slice(&vector.to_be_bytes());

        let mut name = [0u8; SOURCE_NAME_SIZE];
        // Keep at least one NUL terminator.
        let len = self.source_name.len().min(SOURCE_NAME_SIZE - 1);
        name[..len].copy_from_slice(&self.source_name.as_bytes()[..len]);
        e133.extend_from_slice(&name);

        e133.extend_from_slice(&sequence.to_be_bytes());
        e133.extend_from_slice(&endpoint.to_be_bytes());
        e133.push(0);
        e133.extend_from_slice(data);

        let root = self.root_body(VECTOR_ROOT_E133, &wrap_pdu(&e133)?);
        frame_block(&wrap_pdu(&root)?)
    }

    fn root_body(&self, vector: u32, data: &[u8]) -> Vec<u8> {
        let mut root = Vec::with_capacity(ROOT_HEADER_SIZE + data.len());
        root.extend_from_slice(&vector.to_be_bytes());
        root.extend_from_slice(&self.cid);
        root.extend_from_slice(data);
        root
    }
}

/// Prefix a PDU body with its flags+length field.
pub fn wrap_pdu(body: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let size = body.len() + FLAGS_LENGTH_SIZE;
    if size > MAX_PDU_LENGTH {
        return Err(EncodeError::PduTooLarge {
            size,
            max: MAX_PDU_LENGTH,
        });
    }
    Ok(encode_pdu(body))
}

/// Prefix a root-layer block with the stream preamble.
pub fn frame_block(block: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if u32::try_from(block.len()).is_err() {
        return Err(EncodeError::BlockTooLarge(block.len()));
    }
    Ok(encode_block(block))
}

fn encode_pdu(body: &[u8]) -> Vec<u8> {
    let length = body.len() + FLAGS_LENGTH_SIZE;
    debug_assert!(length <= MAX_PDU_LENGTH);
    let mut pdu = Vec::with_capacity(length);
    pdu.push(FLAGS | ((length >> 16) as u8 & 0x0F));
    pdu.push((length >> 8) as u8);
    pdu.push(length as u8);
    pdu.extend_from_slice(body);
    pdu
}

fn encode_block(block: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(PREAMBLE_SIZE + block.len());
    frame.extend_from_slice(&ACN_PACKET_IDENTIFIER);
    frame.extend_from_slice(&(block.len() as u32).to_be_bytes());
    frame.extend_from_slice(block);
    frame
}

fn require(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
    if buf.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

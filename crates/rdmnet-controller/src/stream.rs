// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incoming TCP byte stream to root-layer blocks.

use crate::pdu::{self, DecodeError, PREAMBLE_SIZE};

/// Per-session decoder. Buffers partial input until a full block is available.
#[derive(Debug)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    max_block_size: usize,
    blocks_decoded: u64,
}

impl StreamDecoder {
    pub fn new(max_block_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_block_size,
            blocks_decoded: 0,
        }
    }

    /// Feed received bytes, returning every block completed by them.
    ///
    /// An error means the stream can no longer be framed and the session
    /// should be closed.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, DecodeError> {
        self.buffer.extend_from_slice(bytes);

        let mut blocks = Vec::new();
        loop {
            if self.buffer.len() < PREAMBLE_SIZE {
                break;
            }

            let size = pdu::parse_preamble(&self.buffer[..PREAMBLE_SIZE])?;
            if size > self.max_block_size {
                return Err(DecodeError::BlockTooLarge {
                    size,
                    max: self.max_block_size,
                });
            }

            let total = PREAMBLE_SIZE + size;
            if self.buffer.len() < total {
                break;
            }

            blocks.push(self.buffer[PREAMBLE_SIZE..total].to_vec());
            self.buffer.drain(..total);
            self.blocks_decoded += 1;
        }

        Ok(blocks)
    }

    /// Bytes waiting for the rest of their block.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn blocks_decoded(&self) -> u64 {
        self.blocks_decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::FrameBuilder;

    fn heartbeat() -> Vec<u8> {
        FrameBuilder::new([1u8; 16], "ctl").heartbeat()
    }

    #[test]
    fn test_single_block() {
        let mut decoder = StreamDecoder::new(1024);
        let frame = heartbeat();
        let blocks = decoder.push(&frame).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], frame[PREAMBLE_SIZE..]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_split_across_reads() {
        let mut decoder = StreamDecoder::new(1024);
        let frame = heartbeat();

        // Byte-at-a-time delivery only yields the block on the last byte.
        for byte in &frame[..frame.len() - 1] {
            assert!(decoder.push(&[*byte]).unwrap().is_empty());
        }
        assert_eq!(decoder.push(&frame[frame.len() - 1..]).unwrap().len(), 1);
        assert_eq!(decoder.blocks_decoded(), 1);
    }

    #[test]
    fn test_multiple_blocks_in_one_read() {
        let mut decoder = StreamDecoder::new(1024);
        let mut bytes = heartbeat();
        bytes.extend(heartbeat());
        bytes.extend(&heartbeat()[..5]);

        assert_eq!(decoder.push(&bytes).unwrap().len(), 2);
        assert_eq!(decoder.buffered(), 5);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let mut decoder = StreamDecoder::new(1024);
        let err = decoder.push(b"GET / HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(err, DecodeError::BadPacketIdentifier);
    }

    #[test]
    fn test_oversize_block_is_rejected() {
        let mut decoder = StreamDecoder::new(8);
        let err = decoder.push(&heartbeat()).unwrap_err();
        assert!(matches!(err, DecodeError::BlockTooLarge { max: 8, .. }));
    }
}

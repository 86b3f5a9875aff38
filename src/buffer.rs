//! Accumulation buffer for the frame parser

use crate::constants::{HEADER_TERMINATOR, MAX_BUFFER_SIZE};
use crate::error::FramingError;
use bytes::{Bytes, BytesMut};

/// Byte buffer that remembers how far it has already been scanned for a header terminator.
#[derive(Debug, Default)]
pub(crate) struct EslBuffer {
    data: BytesMut,
    scanned: usize,
}

impl EslBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the socket.
    pub(crate) fn extend(&mut self, chunk: &[u8]) -> Result<(), FramingError> {
        if self.data.len() + chunk.len() > MAX_BUFFER_SIZE {
            return Err(FramingError::BufferOverflow {
                limit: MAX_BUFFER_SIZE,
            });
        }
        self.data
            .extend_from_slice(chunk);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.data
            .len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }

    /// Drop newlines left between frames.
    pub(crate) fn skip_leading_newlines(&mut self) {
        let count = self
            .data
            .iter()
            .take_while(|b| **b == b'\n' || **b == b'\r')
            .count();
        if count > 0 {
            let _ = self
                .data
                .split_to(count);
            self.scanned = self
                .scanned
                .saturating_sub(count);
        }
    }

    /// Remove and return everything before the next `\n\n`, consuming the terminator.
    pub(crate) fn take_header_block(&mut self) -> Option<Bytes> {
        let start = self
            .scanned
            .saturating_sub(HEADER_TERMINATOR.len() - 1);
        let found = self.data[start..]
            .windows(HEADER_TERMINATOR.len())
            .position(|w| w == HEADER_TERMINATOR);
        match found {
            Some(offset) => {
                let end = start + offset;
                let block = self
                    .data
                    .split_to(end)
                    .freeze();
                let _ = self
                    .data
                    .split_to(HEADER_TERMINATOR.len());
                self.scanned = 0;
                Some(block)
            }
            None => {
                self.scanned = self.data.len();
                None
            }
        }
    }

    /// Remove exactly `len` bytes, or nothing if fewer are buffered.
    pub(crate) fn take_bytes(&mut self, len: usize) -> Option<Bytes> {
        if self.data.len() < len {
            return None;
        }
        self.scanned = 0;
        Some(
            self.data
                .split_to(len)
                .freeze(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_block_found_across_extends() {
        let mut buf = EslBuffer::new();
        buf.extend(b"Content-Type: api/response\n")
            .unwrap();
        assert!(buf
            .take_header_block()
            .is_none());
        buf.extend(b"\nrest")
            .unwrap();
        let block = buf
            .take_header_block()
            .unwrap();
        assert_eq!(&block[..], b"Content-Type: api/response");
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn take_bytes_waits_for_enough_data() {
        let mut buf = EslBuffer::new();
        buf.extend(b"abc")
            .unwrap();
        assert!(buf
            .take_bytes(5)
            .is_none());
        buf.extend(b"de")
            .unwrap();
        assert_eq!(&buf.take_bytes(5).unwrap()[..], b"abcde");
        assert!(buf.is_empty());
    }

    #[test]
    fn leading_newlines_are_skipped() {
        let mut buf = EslBuffer::new();
        buf.extend(b"\n\nA: b\n\n")
            .unwrap();
        buf.skip_leading_newlines();
        assert_eq!(&buf.take_header_block().unwrap()[..], b"A: b");
    }
}

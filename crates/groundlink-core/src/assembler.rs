//! Frame reassembly for the receive path.
//!
//! A stream read may end in the middle of a frame or start partway into
//! one. Bytes are accumulated until a full `FRAME_SIZE` is available at a
//! GUID boundary; anything before the next GUID is skipped.

use bytes::{Buf, BytesMut};

use crate::wire::{Frame, FrameError, FRAME_GUID, FRAME_SIZE};

const FRAME_GUID_LEN: usize = std::mem::size_of::<u16>();

/// Accumulates stream bytes and yields complete frames.
pub struct FrameAssembler {
    buffer: BytesMut,
    skipped: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(FRAME_SIZE * 4),
            skipped: 0,
        }
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame, if one is buffered.
    ///
    /// A frame that fails its integrity check is returned as an error and
    /// only its GUID is consumed. The next call hunts for a GUID inside the
    /// rejected bytes, so a truncated frame never swallows the one after it.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        self.resync();
        if self.buffer.len() < FRAME_SIZE {
            return None;
        }

        let result = Frame::decode(&self.buffer[..FRAME_SIZE]).and_then(|frame| {
            frame
                .check_integrity()
                .map(|()| frame)
                .map_err(FrameError::Integrity)
        });
        match result {
            Ok(_) => self.buffer.advance(FRAME_SIZE),
            Err(_) => self.buffer.advance(FRAME_GUID_LEN),
        }
        Some(result)
    }

    /// Bytes dropped while hunting for a GUID since creation.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard buffered bytes, e.g. after a reconnect.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Drop leading bytes until the buffer starts with the GUID. A lone
    /// trailing byte that could be the first half of a GUID is kept.
    fn resync(&mut self) {
        let guid = FRAME_GUID.to_ne_bytes();
        let start = self
            .buffer
            .windows(FRAME_GUID_LEN)
            .position(|w| w == guid)
            .unwrap_or_else(|| {
                if self.buffer.last() == Some(&guid[0]) {
                    self.buffer.len() - 1
                } else {
                    self.buffer.len()
                }
            });
        if start > 0 {
            self.skipped += start as u64;
            self.buffer.advance(start);
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

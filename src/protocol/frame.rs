//! Sentinel-Delimited Framing
//!
//! Pipes and Unix sockets are byte streams: one write on the caller's side
//! may arrive as several reads here, and several writes may arrive as one.
//! Every message on the wire is therefore terminated by a fixed sentinel.
//!
//! ## Wire Format
//!
//! ```text
//! READY<END>
//! x = 5; x * 2<END>
//! x = 510<END>
//! ```
//!
//! ## How Decoding Works
//!
//! `FrameCodec` keeps an accumulation buffer for the lifetime of a session.
//! Incoming chunks are appended and scanned for the sentinel:
//!
//! 1. Only bytes that arrived since the last scan are examined, together with
//!    the `SENTINEL.len() - 1` bytes in front of them (a sentinel can be split
//!    across two reads). Per-chunk cost stays proportional to the chunk.
//! 2. When a sentinel is found the payload before it is split off as one
//!    frame. Anything after it stays buffered for the next frame.
//! 3. A timed-out decode keeps the partial frame, so a later decode can
//!    finish it.
//!
//! ## Limitation
//!
//! A payload that itself contains `<END>` is cut short at that point. The
//! sentinel format is kept for compatibility with existing callers.

use crate::transport::{Duplex, TransportError, POLL_INTERVAL};
use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

/// Marks the end of every frame on the wire.
pub const SENTINEL: &[u8] = b"<END>";

/// Largest payload accepted before a sentinel must have been seen (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Initial accumulation buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The sentinel did not arrive within the decode budget
    #[error("timed out waiting for a complete frame")]
    TimedOut,

    /// Too many bytes buffered without a sentinel
    #[error("frame too large: {size} bytes without a sentinel (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The underlying transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Encodes a payload as a frame: `payload + SENTINEL`.
///
/// # Example
///
/// ```
/// use evalpipe::protocol::frame::encode;
///
/// assert_eq!(&encode(b"GO_AHEAD")[..], b"GO_AHEAD<END>");
/// ```
pub fn encode(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + SENTINEL.len());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(SENTINEL);
    buf.freeze()
}

/// Returns true if `payload` could not survive framing intact.
pub fn contains_sentinel(payload: &[u8]) -> bool {
    find_sentinel(payload).is_some()
}

/// Incremental decoder for sentinel-delimited frames.
#[derive(Debug)]
pub struct FrameCodec {
    /// Bytes received but not yet returned as a frame
    buffer: BytesMut,

    /// Prefix of `buffer` already known to hold no sentinel start
    scanned: usize,

    /// Upper bound on an unterminated frame
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Creates a codec with the default frame size limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a codec that rejects frames larger than `max_frame_size`.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            scanned: 0,
            max_frame_size,
        }
    }

    /// Appends a freshly received chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pops the first complete frame, if one is buffered.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(payload))` - A frame was complete, sentinel stripped
    /// - `Ok(None)` - No sentinel yet, need more data
    /// - `Err(FrameTooLarge)` - The unterminated frame exceeds the limit
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        // Rescan the seam in case the sentinel straddles two chunks
        let start = self.scanned.saturating_sub(SENTINEL.len() - 1);

        match find_sentinel(&self.buffer[start..]) {
            Some(pos) => {
                let frame = self.buffer.split_to(start + pos).freeze();
                self.buffer.advance(SENTINEL.len());
                self.scanned = 0;
                trace!(
                    bytes = frame.len(),
                    remaining = self.buffer.len(),
                    "Decoded frame"
                );
                Ok(Some(frame))
            }
            None => {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_frame_size {
                    return Err(FrameError::FrameTooLarge {
                        size: self.buffer.len(),
                        max: self.max_frame_size,
                    });
                }
                Ok(None)
            }
        }
    }

    /// Bytes buffered that do not yet form a complete frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Removes and returns everything buffered.
    pub fn take_pending(&mut self) -> Bytes {
        self.scanned = 0;
        self.buffer.split().freeze()
    }

    /// Discards everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Reads until a complete frame is available, with no time limit.
    ///
    /// A short read just means nothing more is available right now; the
    /// loop keeps reading until the sentinel shows up or the peer fails.
    pub async fn decode_blocking<D: Duplex>(&mut self, duplex: &D) -> Result<Bytes, FrameError> {
        loop {
            if let Some(frame) = self.next_frame()? {
                return Ok(frame);
            }

            let chunk = duplex.read().await?;
            trace!(bytes = chunk.len(), buffered = self.buffer.len(), "Read chunk");
            self.push(&chunk);
        }
    }

    /// Reads until a complete frame is available or `budget` runs out.
    ///
    /// The budget covers the whole decode, not each read.
    pub async fn decode_timed<D: Duplex>(
        &mut self,
        duplex: &D,
        budget: Duration,
    ) -> Result<Bytes, FrameError> {
        let deadline = Instant::now() + budget;

        loop {
            if let Some(frame) = self.next_frame()? {
                return Ok(frame);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FrameError::TimedOut);
            }

            match duplex.read_timed(remaining).await {
                Ok(chunk) => {
                    trace!(bytes = chunk.len(), buffered = self.buffer.len(), "Read chunk");
                    self.push(&chunk);
                }
                Err(TransportError::TimedOut) => return Err(FrameError::TimedOut),
                Err(e) if e.is_transient() => {
                    trace!(error = %e, "Transient read failure, polling again");
                    tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Finds the first occurrence of the sentinel in `buf`.
#[inline]
fn find_sentinel(buf: &[u8]) -> Option<usize> {
    buf.windows(SENTINEL.len()).position(|window| window == SENTINEL)
}

//! Session Handshake
//!
//! Before any instruction is processed, the caller must announce itself:
//!
//! ```text
//!            ┌───────────────┐  READY       ┌──────────────┐
//!  accept ──>│ AwaitingReady │─────────────>│ Acknowledged │──> instruction loop
//!            └───────┬───────┘ (GO_AHEAD    └──────────────┘
//!                    │          sent back)
//!                    │ 3 attempts without READY
//!                    ▼
//!               ┌────────┐
//!               │ Failed │──> connection torn down
//!               └────────┘
//! ```
//!
//! Each attempt reads one frame with a one-second limit. Anything other
//! than `READY` (a different frame, a timeout, a read error) uses up one
//! attempt. This is the only place where failures are retried; after the
//! handshake every I/O failure ends the session.
//!
//! Older callers send `READY` with no sentinel. If an attempt times out with
//! exactly `READY` pending, that counts as the token too. A framed `READY`
//! split across reads is never mistaken for the unframed one.

use crate::protocol::frame::{self, FrameCodec, FrameError};
use crate::transport::{Duplex, TransportError};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Handshake request sent by the caller.
pub const READY: &str = "READY";

/// Handshake acknowledgment sent by the server.
pub const GO_AHEAD: &str = "GO_AHEAD";

/// Attempts before the handshake fails.
pub const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 3;

/// Time allowed for each attempt.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingReady,
    Acknowledged,
    Failed,
}

/// Errors that end a handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Every attempt passed without a READY
    #[error("no READY received after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// READY arrived but GO_AHEAD could not be sent
    #[error("failed to acknowledge handshake: {0}")]
    Acknowledge(#[source] TransportError),
}

/// Handshake state machine for one connection.
#[derive(Debug)]
pub struct Handshake {
    max_attempts: u32,
    attempt_timeout: Duration,
    attempts_used: u32,
    state: HandshakeState,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_ATTEMPTS, DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl Handshake {
    /// Creates a handshake allowing `max_attempts` reads of `attempt_timeout` each.
    pub fn new(max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts,
            attempt_timeout,
            attempts_used: 0,
            state: HandshakeState::AwaitingReady,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    /// Runs the handshake to completion.
    ///
    /// The codec is shared with the instruction loop that follows, so bytes
    /// arriving right behind `READY` are not lost.
    pub async fn perform<D: Duplex>(
        &mut self,
        duplex: &D,
        codec: &mut FrameCodec,
    ) -> Result<(), HandshakeError> {
        while self.attempts_used < self.max_attempts {
            self.attempts_used += 1;
            let attempt = self.attempts_used;

            match read_token(duplex, codec, self.attempt_timeout).await {
                Ok(token) if token == READY.as_bytes() => {
                    debug!(attempt = attempt, "Received handshake request");

                    if let Err(e) = duplex.write(&frame::encode(GO_AHEAD.as_bytes())).await {
                        self.state = HandshakeState::Failed;
                        return Err(HandshakeError::Acknowledge(e));
                    }

                    self.state = HandshakeState::Acknowledged;
                    debug!(attempt = attempt, "Sent handshake acknowledgment");
                    return Ok(());
                }
                Ok(token) => {
                    debug!(
                        attempt = attempt,
                        token = %String::from_utf8_lossy(&token),
                        "Unexpected handshake token"
                    );
                }
                Err(e) => {
                    debug!(attempt = attempt, error = %e, "Handshake attempt failed");
                }
            }
        }

        self.state = HandshakeState::Failed;
        Err(HandshakeError::Exhausted {
            attempts: self.attempts_used,
        })
    }
}

/// Reads one handshake token within `timeout`.
async fn read_token<D: Duplex>(
    duplex: &D,
    codec: &mut FrameCodec,
    timeout: Duration,
) -> Result<Bytes, FrameError> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(token) = codec.next_frame()? {
            return Ok(token);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return unframed_ready(codec);
        }

        match duplex.read_timed(remaining).await {
            Ok(chunk) => codec.push(&chunk),
            Err(TransportError::TimedOut) => return unframed_ready(codec),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Ends a timed-out attempt: an unframed `READY` from older callers is the
/// token, anything else is a timeout.
fn unframed_ready(codec: &mut FrameCodec) -> Result<Bytes, FrameError> {
    if codec.pending() == READY.as_bytes() {
        Ok(codec.take_pending())
    } else {
        Err(FrameError::TimedOut)
    }
}

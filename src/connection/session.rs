//! Session Module
//!
//! One accepted connection, from handshake to disconnect.
//!
//! ## Session Lifecycle
//!
//! ```text
//! 1. Acceptor hands over the connected endpoint
//!        │
//!        ▼
//! 2. Handshake (READY -> GO_AHEAD, up to 3 attempts)
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Instruction Loop        │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Decode one frame        │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Evaluate instruction    │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Aggregate outcomes      │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send framed response    │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Disconnect, timeout, I/O error or stop flag
//!        │
//!        ▼
//! 5. Session task ends; the acceptor recreates the endpoint
//! ```
//!
//! Requests and responses strictly alternate: the next instruction is not
//! read until the previous response has been written.

use crate::connection::handshake::{Handshake, HandshakeError};
use crate::evaluator::Evaluator;
use crate::protocol::frame::{self, FrameCodec, FrameError, SENTINEL};
use crate::protocol::outcome::aggregate;
use crate::transport::{Duplex, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, trace, warn};

/// Default time allowed for one instruction frame to arrive.
pub const DEFAULT_INSTRUCTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Server-wide counters, shared by the acceptor and every session.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Total number of sessions accepted
    pub sessions_accepted: AtomicU64,
    /// Sessions currently running (0 or 1)
    pub active_sessions: AtomicU64,
    /// Sessions dropped because no READY arrived
    pub handshakes_failed: AtomicU64,
    /// Total instructions evaluated
    pub instructions_processed: AtomicU64,
    /// Total instruction bytes read, sentinels included
    pub bytes_read: AtomicU64,
    /// Total response bytes written, sentinels included
    pub bytes_written: AtomicU64,
    /// Times the endpoint was torn down and opened again
    pub endpoint_recreations: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instruction_processed(&self) {
        self.instructions_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn endpoint_recreated(&self) {
        self.endpoint_recreations.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-session limits and timeouts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handshake attempts before giving up (default: 3)
    pub handshake_attempts: u32,

    /// Read limit for each handshake attempt (default: 1s)
    pub handshake_timeout: Duration,

    /// Budget for receiving one instruction frame (default: 1s)
    pub instruction_timeout: Duration,

    /// Largest unterminated frame accepted (default: 16 MB)
    pub max_frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_attempts: crate::connection::handshake::DEFAULT_HANDSHAKE_ATTEMPTS,
            handshake_timeout: crate::connection::handshake::DEFAULT_HANDSHAKE_TIMEOUT,
            instruction_timeout: DEFAULT_INSTRUCTION_TIMEOUT,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The caller never completed the handshake
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// No complete instruction could be read
    #[error("failed to read instruction: {0}")]
    Decode(#[from] FrameError),

    /// The response could not be written
    #[error("failed to send response: {0}")]
    Send(#[source] TransportError),
}

impl SessionError {
    /// Returns true if the session ended because the caller went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Decode(FrameError::Transport(e)) | SessionError::Send(e) => {
                e.is_disconnect()
            }
            _ => false,
        }
    }
}

/// Serves a single connected caller.
pub struct Session<D, E> {
    /// Session number (for logging)
    id: u64,

    /// The connected endpoint
    duplex: Arc<D>,

    /// The evaluator (shared across sessions, never called concurrently)
    evaluator: Arc<Mutex<E>>,

    /// Frame decoder, kept for the whole session
    codec: FrameCodec,

    config: SessionConfig,

    /// Server statistics (shared)
    stats: Arc<ServerStats>,

    /// Stop flag, checked before each instruction
    shutdown: watch::Receiver<bool>,
}

impl<D, E> Session<D, E>
where
    D: Duplex + Send + Sync,
    E: Evaluator,
{
    pub fn new(
        id: u64,
        duplex: Arc<D>,
        evaluator: Arc<Mutex<E>>,
        config: SessionConfig,
        stats: Arc<ServerStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            duplex,
            evaluator,
            codec: FrameCodec::with_max_frame_size(config.max_frame_size),
            config,
            stats,
            shutdown,
        }
    }

    /// Runs the session to completion.
    ///
    /// Performs the handshake, then serves instructions until the caller
    /// disconnects, an instruction fails to arrive in time, or the stop flag
    /// is raised.
    pub async fn run(mut self) -> Result<(), SessionError> {
        info!(session = self.id, "Session started");

        let result = self.serve().await;

        match &result {
            Ok(()) => info!(session = self.id, "Session stopped"),
            Err(SessionError::Handshake(e)) => {
                self.stats.handshake_failed();
                warn!(session = self.id, error = %e, "Handshake failed");
            }
            Err(e) if e.is_disconnect() => {
                info!(session = self.id, "Caller disconnected")
            }
            Err(SessionError::Decode(FrameError::TimedOut)) => {
                debug!(session = self.id, "No instruction within timeout, ending session")
            }
            Err(e) => warn!(session = self.id, error = %e, "Session error"),
        }

        result
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        let mut handshake =
            Handshake::new(self.config.handshake_attempts, self.config.handshake_timeout);
        handshake.perform(&*self.duplex, &mut self.codec).await?;
        debug!(
            session = self.id,
            attempts = handshake.attempts_used(),
            "Handshake complete"
        );

        self.instruction_loop().await
    }

    /// The decode-evaluate-respond loop.
    async fn instruction_loop(&mut self) -> Result<(), SessionError> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let frame = self
                .codec
                .decode_timed(&*self.duplex, self.config.instruction_timeout)
                .await?;
            self.stats.bytes_read(frame.len() + SENTINEL.len());

            let instruction = String::from_utf8_lossy(&frame);
            trace!(session = self.id, instruction = %instruction, "Received instruction");

            let response = self.dispatch(&instruction).await;
            self.stats.instruction_processed();

            self.send_response(&response).await?;
        }
    }

    /// Evaluates one instruction and aggregates its outcomes.
    async fn dispatch(&self, instruction: &str) -> String {
        let mut evaluator = self.evaluator.lock().await;

        match evaluator.evaluate(instruction) {
            Ok(outcomes) if outcomes.is_empty() => {
                debug!(session = self.id, "No output, sending empty response");
                String::new()
            }
            Ok(outcomes) => aggregate(&outcomes),
            Err(e) => {
                warn!(session = self.id, error = %e, "Evaluator unavailable, sending empty response");
                String::new()
            }
        }
    }

    async fn send_response(&self, response: &str) -> Result<(), SessionError> {
        if frame::contains_sentinel(response.as_bytes()) {
            warn!(
                session = self.id,
                "Response contains the frame sentinel and will be truncated by the caller"
            );
        }

        let bytes = frame::encode(response.as_bytes());
        self.duplex
            .write(&bytes)
            .await
            .map_err(SessionError::Send)?;
        self.stats.bytes_written(bytes.len());
        trace!(session = self.id, bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

//! Transport Module
//!
//! This module owns the OS-level channel the server listens on:
//!
//! - Unix: a Unix domain socket at `<temp dir>/<name>.sock`
//! - Windows: a named pipe at `\\.\pipe\<name>`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Transport                          │
//! │                                                          │
//! │   Unbound ──open()──> Listening ──accept()──> Connected  │
//! │      ▲                    │                      │       │
//! │      │                    │ accept error         │ I/O   │
//! │      │                    ▼                      ▼ error │
//! │      └─────close()───── Broken <─────────────────┘       │
//! │                                                          │
//! │   read() / read_timed() / write() behind one Mutex       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Only one connection exists at a time. Once a peer is accepted the
//! listening side is released, so a second caller cannot connect until the
//! endpoint is opened again.
//!
//! The frame codec and the session code talk to the [`Duplex`] trait rather
//! than to [`Transport`] itself.

pub mod endpoint;
pub mod pipe;

pub use endpoint::{EndpointState, Transport};
pub use pipe::endpoint_address;

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Interval between availability checks in timed reads.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A connected byte stream with whole-payload writes.
///
/// Implementations serialize their operations so that two callers never
/// interleave bytes on the wire.
pub trait Duplex {
    /// Waits for data with no time limit and returns what was read.
    fn read(&self) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    /// Waits at most `max_wait` for data.
    ///
    /// Returns `TransportError::TimedOut` if nothing arrived in time.
    fn read_timed(
        &self,
        max_wait: Duration,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    /// Writes the whole payload and flushes it.
    fn write(&self, bytes: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Errors raised by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be created (name in use, permission denied, ...)
    #[error("failed to create endpoint {address}: {source}")]
    EndpointCreation {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Accepting a connection failed; the endpoint is no longer usable
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Accepting a connection failed for a transient reason
    #[error("endpoint busy: {0}")]
    AcceptBusy(#[source] io::Error),

    /// No data arrived within the allowed time
    #[error("timed out waiting for data")]
    TimedOut,

    /// The peer closed its end
    #[error("peer disconnected")]
    Disconnected,

    /// `accept()` was called without an open endpoint
    #[error("endpoint is not listening")]
    NotListening,

    /// A read or write was attempted with no peer connected
    #[error("endpoint is not connected")]
    NotConnected,

    /// I/O error on the connected stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Returns true for failures worth retrying on the same connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Io(e) if e.kind() == io::ErrorKind::Interrupted)
    }

    /// Returns true if the peer is gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Disconnected => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory [`Duplex`] for driving the codec and session state
    //! machines without a real endpoint.

    use super::{Duplex, TransportError, POLL_INTERVAL};
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Unique endpoint name for tests that bind real endpoints.
    pub(crate) fn unique_channel_name(tag: &str) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!(
            "evalpipe-{}-{}-{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Replays scripted chunks and records everything written.
    ///
    /// Once the script runs dry, reads report `Disconnected`, unless the
    /// duplex was built with `stay_open()`, in which case timed reads time
    /// out and blocking reads wait for `feed()`.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedDuplex {
        incoming: Mutex<VecDeque<Bytes>>,
        written: Mutex<Vec<u8>>,
        open: bool,
    }

    impl ScriptedDuplex {
        pub(crate) fn new<I, C>(chunks: I) -> Self
        where
            I: IntoIterator<Item = C>,
            C: Into<Bytes>,
        {
            Self {
                incoming: Mutex::new(chunks.into_iter().map(Into::into).collect()),
                written: Mutex::new(Vec::new()),
                open: false,
            }
        }

        pub(crate) fn stay_open(mut self) -> Self {
            self.open = true;
            self
        }

        pub(crate) fn feed(&self, chunk: impl Into<Bytes>) {
            self.incoming.lock().unwrap().push_back(chunk.into());
        }

        pub(crate) fn written(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }

        fn pop(&self) -> Option<Bytes> {
            self.incoming.lock().unwrap().pop_front()
        }
    }

    impl Duplex for ScriptedDuplex {
        async fn read(&self) -> Result<Bytes, TransportError> {
            loop {
                if let Some(chunk) = self.pop() {
                    return Ok(chunk);
                }
                if !self.open {
                    return Err(TransportError::Disconnected);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        async fn read_timed(&self, _max_wait: Duration) -> Result<Bytes, TransportError> {
            match self.pop() {
                Some(chunk) => Ok(chunk),
                None if self.open => Err(TransportError::TimedOut),
                None => Err(TransportError::Disconnected),
            }
        }

        async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
            self.written.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }
    }
}

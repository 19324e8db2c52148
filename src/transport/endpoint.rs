//! Endpoint Ownership
//!
//! [`Transport`] owns the one endpoint a server listens on and every byte
//! that crosses it. All operations take the same exclusive lock, so a read
//! and a write (or two reads) on one connection never interleave. The
//! protocol is strictly one request at a time, so the lock is uncontended
//! in normal operation.
//!
//! ## Timed Reads
//!
//! `read_timed` checks for available data every [`POLL_INTERVAL`] and
//! returns as soon as anything arrives. It never waits past its limit.
//!
//! ## Failure Handling
//!
//! Any hard I/O error, or a zero-byte read (the peer hung up), moves the
//! endpoint to `Broken`. Nothing is retried in here; the acceptor decides
//! when to tear down and open again.

use crate::transport::pipe::{self, Listener, Stream};
use crate::transport::{Duplex, TransportError, POLL_INTERVAL};
use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Internal endpoint state, holding the OS resources.
#[derive(Debug)]
enum Endpoint {
    Unbound,
    Listening(Listener),
    Connected(Stream),
    Broken,
}

/// Observable endpoint state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Nothing is bound
    Unbound,
    /// Bound to the name, waiting for a peer
    Listening,
    /// A peer is connected
    Connected,
    /// A failure left the endpoint unusable until it is reopened
    Broken,
}

impl Endpoint {
    fn state(&self) -> EndpointState {
        match self {
            Endpoint::Unbound => EndpointState::Unbound,
            Endpoint::Listening(_) => EndpointState::Listening,
            Endpoint::Connected(_) => EndpointState::Connected,
            Endpoint::Broken => EndpointState::Broken,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut Stream, TransportError> {
        match self {
            Endpoint::Connected(stream) => Ok(stream),
            _ => Err(TransportError::NotConnected),
        }
    }
}

/// The server's single duplex endpoint.
#[derive(Debug)]
pub struct Transport {
    /// Well-known endpoint name
    name: String,

    /// Maximum bytes returned by one read
    buffer_size: usize,

    /// Endpoint state, behind the exclusive operation lock
    endpoint: Mutex<Endpoint>,
}

impl Transport {
    /// Creates a transport for `name`. Nothing is bound until `open()`.
    ///
    /// # Arguments
    ///
    /// * `name` - The endpoint name (see [`pipe::endpoint_address`])
    /// * `buffer_size` - Maximum bytes returned by one read
    pub fn new(name: impl Into<String>, buffer_size: usize) -> Self {
        Self {
            name: name.into(),
            buffer_size: buffer_size.max(1),
            endpoint: Mutex::new(Endpoint::Unbound),
        }
    }

    /// The endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The platform address derived from the name.
    pub fn address(&self) -> String {
        pipe::endpoint_address(&self.name)
    }

    /// Maximum bytes returned by one read.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Current endpoint state.
    pub async fn state(&self) -> EndpointState {
        self.endpoint.lock().await.state()
    }

    /// Creates (or recreates) the endpoint in the listening state.
    ///
    /// Whatever was there before is torn down first.
    pub async fn open(&self) -> Result<(), TransportError> {
        let mut endpoint = self.endpoint.lock().await;
        teardown(&mut endpoint).await;

        match Listener::bind(&self.name, self.buffer_size) {
            Ok(listener) => {
                *endpoint = Endpoint::Listening(listener);
                debug!(address = %self.address(), "Endpoint listening");
                Ok(())
            }
            Err(source) => Err(TransportError::EndpointCreation {
                address: self.address(),
                source,
            }),
        }
    }

    /// Waits until a peer connects.
    ///
    /// An endpoint that is already connected counts as success. On a busy
    /// error the endpoint keeps listening; on any other error it is marked
    /// broken.
    pub async fn accept(&self) -> Result<(), TransportError> {
        let mut endpoint = self.endpoint.lock().await;

        let listener = match &mut *endpoint {
            Endpoint::Listening(listener) => listener,
            Endpoint::Connected(_) => return Ok(()),
            Endpoint::Unbound | Endpoint::Broken => return Err(TransportError::NotListening),
        };

        match listener.accept().await {
            Ok(stream) => {
                // Dropping the listener releases the name until the next open()
                *endpoint = Endpoint::Connected(stream);
                debug!(address = %self.address(), "Peer connected");
                Ok(())
            }
            Err(e) if pipe::is_busy(&e) => {
                trace!(error = %pipe::describe(&e), "Accept interrupted");
                Err(TransportError::AcceptBusy(e))
            }
            Err(e) => {
                *endpoint = Endpoint::Broken;
                Err(TransportError::Accept(e))
            }
        }
    }

    /// Disconnects and releases the endpoint. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut endpoint = self.endpoint.lock().await;
        teardown(&mut endpoint).await;
    }

    /// Maps a raw read result, marking the endpoint broken on failure.
    fn finish_read(
        &self,
        endpoint: &mut Endpoint,
        result: io::Result<usize>,
        mut buf: Vec<u8>,
    ) -> Result<Bytes, TransportError> {
        match result {
            Ok(0) => {
                *endpoint = Endpoint::Broken;
                Err(TransportError::Disconnected)
            }
            Ok(n) => {
                buf.truncate(n);
                trace!(bytes = n, "Read data");
                Ok(Bytes::from(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(TransportError::Io(e)),
            Err(e) => {
                *endpoint = Endpoint::Broken;
                Err(TransportError::Io(e))
            }
        }
    }
}

impl Duplex for Transport {
    async fn read(&self) -> Result<Bytes, TransportError> {
        let mut endpoint = self.endpoint.lock().await;
        let mut buf = vec![0u8; self.buffer_size];

        let result = endpoint.stream_mut()?.read(&mut buf).await;
        self.finish_read(&mut endpoint, result, buf)
    }

    async fn read_timed(&self, max_wait: Duration) -> Result<Bytes, TransportError> {
        let deadline = Instant::now() + max_wait;
        let mut endpoint = self.endpoint.lock().await;
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let result = endpoint.stream_mut()?.try_read(&mut buf);
            match result {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                result => return self.finish_read(&mut endpoint, result, buf),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::TimedOut);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut endpoint = self.endpoint.lock().await;
        let stream = endpoint.stream_mut()?;

        let result = match stream.write_all(bytes).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                trace!(bytes = bytes.len(), "Wrote data");
                Ok(())
            }
            Err(e) => {
                *endpoint = Endpoint::Broken;
                Err(TransportError::Io(e))
            }
        }
    }
}

/// Releases whatever the endpoint holds and leaves it unbound.
async fn teardown(endpoint: &mut Endpoint) {
    if let Endpoint::Connected(stream) = endpoint {
        pipe::disconnect(stream).await;
    }
    *endpoint = Endpoint::Unbound;
}

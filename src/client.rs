//! Caller-side connection.
//!
//! [`PipeClient`] speaks the same protocol as the server from the other end:
//!
//! 1. Connect to the endpoint, retrying while it is absent or busy (the
//!    server only listens between sessions)
//! 2. Send `READY` and wait for `GO_AHEAD`
//! 3. Send framed instructions and read framed responses, one at a time
//!
//! # Example
//!
//! ```ignore
//! use evalpipe::client::{ClientOptions, PipeClient};
//!
//! let mut client = PipeClient::connect("evalpipe", ClientOptions::default()).await?;
//! client.handshake().await?;
//! let response = client.request("x = 5; x * 2").await?;
//! assert_eq!(response, "x = 510");
//! ```

use crate::connection::handshake::{GO_AHEAD, READY};
use crate::protocol::frame::{self, FrameCodec, FrameError};
use crate::transport::pipe::{self, ClientStream};
use bytes::Bytes;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

/// Connection and timing options for a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How many times to try opening the endpoint (default: 20)
    pub connect_attempts: u32,

    /// Pause between connect attempts (default: 100ms)
    pub retry_delay: Duration,

    /// Longest wait for one framed reply (default: 5s)
    pub response_timeout: Duration,

    /// Read chunk size (default: 32 KB)
    pub buffer_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_attempts: 20,
            retry_delay: Duration::from_millis(100),
            response_timeout: Duration::from_secs(5),
            buffer_size: 32 * 1024,
        }
    }
}

/// Errors raised on the caller side.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint could not be opened
    #[error("could not open {address} after {attempts} attempts: {source}")]
    Unavailable {
        address: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// The server answered the handshake with something other than GO_AHEAD
    #[error("handshake rejected: expected GO_AHEAD, received {0:?}")]
    HandshakeRejected(String),

    /// No complete reply arrived in time
    #[error("timed out waiting for a response")]
    TimedOut,

    /// The server closed the connection
    #[error("server closed the connection")]
    Disconnected,

    /// Reply framing error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O error on the connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A connection to an evaluation server.
#[derive(Debug)]
pub struct PipeClient {
    stream: ClientStream,
    codec: FrameCodec,
    options: ClientOptions,
}

impl PipeClient {
    /// Opens a connection to the endpoint called `name`.
    ///
    /// Retries up to `options.connect_attempts` times while the endpoint is
    /// missing or busy.
    pub async fn connect(name: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let attempts = options.connect_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match pipe::connect(name).await {
                Ok(stream) => {
                    debug!(endpoint = name, attempt = attempt, "Connected");
                    return Ok(Self {
                        stream,
                        codec: FrameCodec::new(),
                        options,
                    });
                }
                Err(e) if pipe::is_not_ready(&e) && attempt < attempts => {
                    trace!(endpoint = name, attempt = attempt, "Endpoint not ready, retrying");
                    tokio::time::sleep(options.retry_delay).await;
                }
                Err(source) => {
                    return Err(ClientError::Unavailable {
                        address: pipe::endpoint_address(name),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    /// Performs the READY / GO_AHEAD exchange.
    pub async fn handshake(&mut self) -> Result<(), ClientError> {
        self.send_raw(&frame::encode(READY.as_bytes())).await?;

        let reply = self.read_frame().await?;
        if reply != GO_AHEAD.as_bytes() {
            return Err(ClientError::HandshakeRejected(
                String::from_utf8_lossy(&reply).into_owned(),
            ));
        }

        Ok(())
    }

    /// Sends one instruction and waits for its aggregated response.
    pub async fn request(&mut self, instruction: &str) -> Result<String, ClientError> {
        self.send_raw(&frame::encode(instruction.as_bytes()))
            .await?;

        let reply = self.read_frame().await?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// Writes bytes exactly as given, with no framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads the next framed reply, waiting at most `response_timeout`.
    pub async fn read_frame(&mut self) -> Result<Bytes, ClientError> {
        let timeout = self.options.response_timeout;

        tokio::time::timeout(timeout, self.read_until_frame())
            .await
            .map_err(|_| ClientError::TimedOut)?
    }

    async fn read_until_frame(&mut self) -> Result<Bytes, ClientError> {
        let mut buf = vec![0u8; self.options.buffer_size.max(1)];

        loop {
            if let Some(frame) = self.codec.next_frame()? {
                return Ok(frame);
            }

            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ClientError::Disconnected);
            }
            self.codec.push(&buf[..n]);
        }
    }
}

/// Connects, performs the handshake, sends one instruction and returns the
/// response. The connection is closed afterwards.
pub async fn query(name: &str, instruction: &str) -> Result<String, ClientError> {
    let mut client = PipeClient::connect(name, ClientOptions::default()).await?;
    client.handshake().await?;
    client.request(instruction).await
}

//! Server configuration.

use crate::connection::handshake::{DEFAULT_HANDSHAKE_ATTEMPTS, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::connection::session::{SessionConfig, DEFAULT_INSTRUCTION_TIMEOUT};
use crate::protocol::frame::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Configuration for the evaluation server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Well-known endpoint name (default: "evalpipe")
    pub channel_name: String,

    /// Read chunk size and pipe buffer size (default: 65535)
    pub buffer_size: usize,

    /// Handshake attempts before a caller is dropped (default: 3)
    pub handshake_attempts: u32,

    /// Read limit for each handshake attempt (default: 1s)
    pub handshake_timeout: Duration,

    /// Budget for receiving one instruction (default: 1s)
    pub instruction_timeout: Duration,

    /// Largest unterminated frame accepted (default: 16 MB)
    pub max_frame_size: usize,

    /// Pause after a busy accept before retrying (default: 100ms)
    pub accept_backoff: Duration,

    /// Pause after a failed endpoint creation (default: 500ms)
    pub reopen_backoff: Duration,

    /// Consecutive endpoint creation failures before the server gives up (default: 5)
    pub max_open_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            channel_name: crate::DEFAULT_CHANNEL_NAME.to_string(),
            buffer_size: crate::DEFAULT_BUFFER_SIZE,
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            instruction_timeout: DEFAULT_INSTRUCTION_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            accept_backoff: Duration::from_millis(100),
            reopen_backoff: Duration::from_millis(500),
            max_open_attempts: 5,
        }
    }
}

impl ServerConfig {
    /// Default configuration listening on `channel_name`.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            ..Self::default()
        }
    }

    /// The per-session part of the configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            handshake_attempts: self.handshake_attempts,
            handshake_timeout: self.handshake_timeout,
            instruction_timeout: self.instruction_timeout,
            max_frame_size: self.max_frame_size,
        }
    }
}

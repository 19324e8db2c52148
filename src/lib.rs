//! # evalpipe - A Single-Session Evaluation Server over Local IPC
//!
//! evalpipe listens on a named pipe (Windows) or a Unix domain socket and
//! forwards text instructions from one local caller at a time to an
//! evaluator, returning the aggregated result of each instruction.
//!
//! ## Features
//!
//! - **Sentinel Framing**: Every message ends with `<END>`, so partial and
//!   coalesced reads are handled transparently
//! - **Handshake**: A caller sends `READY` and waits for `GO_AHEAD`
//! - **One Caller at a Time**: The endpoint is released while a session runs
//!   and recreated once it ends
//! - **Self-Healing**: Any I/O failure tears the endpoint down and the server
//!   starts listening again
//! - **Async I/O**: Built on Tokio
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              evalpipe                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Acceptor   │───>│  Session    │───>│  Evaluator  │                  │
//! │  │  (server)   │    │ (handshake, │    │  (trait)    │                  │
//! │  └──────┬──────┘    │  loop)      │    └──────┬──────┘                  │
//! │         │           └──────┬──────┘           │                         │
//! │         │                  │                  ▼                         │
//! │         │                  │           ┌─────────────┐                  │
//! │         │                  │           │  Aggregate  │                  │
//! │         │                  │           │  outcomes   │                  │
//! │         │                  │           └──────┬──────┘                  │
//! │         ▼                  ▼                  ▼                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │             FrameCodec  <──>  Transport (one endpoint)           │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use evalpipe::evaluator::ArithmeticEvaluator;
//! use evalpipe::server::{Server, ServerConfig};
//! use evalpipe::client::query;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let handle = Server::new(ServerConfig::default(), ArithmeticEvaluator::new()).spawn();
//!
//!     let response = query("evalpipe", "x = 5; x * 2").await?;
//!     assert_eq!(response, "x = 510");
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! ```text
//! caller                                server
//!   │  READY<END>                         │
//!   │────────────────────────────────────>│
//!   │                       GO_AHEAD<END> │
//!   │<────────────────────────────────────│
//!   │  x = 5; x * 2<END>                  │
//!   │────────────────────────────────────>│
//!   │                        x = 510<END> │
//!   │<────────────────────────────────────│
//! ```
//!
//! ## Module Overview
//!
//! - [`transport`]: Endpoint ownership and raw duplex I/O
//! - [`protocol`]: Frame codec and response aggregation
//! - [`connection`]: Handshake and per-session instruction loop
//! - [`evaluator`]: Evaluator trait and the arithmetic evaluator
//! - [`server`]: Configuration and the accept loop
//! - [`client`]: Caller side of the protocol

pub mod client;
pub mod connection;
pub mod evaluator;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-export commonly used types for convenience
pub use client::{query, ClientError, ClientOptions, PipeClient};
pub use connection::{ServerStats, Session, SessionConfig};
pub use evaluator::{ArithmeticEvaluator, Evaluator, EvaluatorError};
pub use protocol::{aggregate, EvaluationOutcome, FrameCodec, FrameError};
pub use server::{Server, ServerConfig, ServerError, ServerHandle};
pub use transport::{Duplex, Transport, TransportError};

/// The default endpoint name
pub const DEFAULT_CHANNEL_NAME: &str = "evalpipe";

/// The default read chunk and pipe buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 65535;

/// Version of evalpipe
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

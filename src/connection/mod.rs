//! Connection Module
//!
//! Everything that happens on one accepted connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ConnectionAcceptor                         │
//! │                  (server::acceptor)                         │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept() one caller
//!                        ▼
//!           ┌────────────────────────┐
//!           │   spawn session task   │
//!           └────────────┬───────────┘
//!                        │
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Session                               │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Handshake   │───>│ Decode      │───>│ Evaluate    │      │
//! │  │ READY       │    │ instruction │    │ + aggregate │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                            ▲                  │             │
//! │                            │                  ▼             │
//! │                            │           ┌─────────────┐      │
//! │                            └───────────│ Send resp   │      │
//! │                                        └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Handshake**: `READY` / `GO_AHEAD` with a bounded number of attempts
//! - **Strict alternation**: one response per instruction, in order
//! - **Statistics**: sessions, instructions and bytes are counted in
//!   [`ServerStats`]

pub mod handshake;
pub mod session;

// Re-export commonly used types
pub use handshake::{Handshake, HandshakeError, HandshakeState, GO_AHEAD, READY};
pub use session::{ServerStats, Session, SessionConfig, SessionError};

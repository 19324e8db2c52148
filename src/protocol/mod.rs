//! Wire Protocol
//!
//! This module holds everything that defines what travels over the pipe,
//! independent of how the pipe is opened or who is on the other end.
//!
//! ## Overview
//!
//! ```text
//! Client                                   Server
//!   │  READY<END>                            │
//!   │ ─────────────────────────────────────> │  handshake
//!   │                          GO_AHEAD<END> │
//!   │ <───────────────────────────────────── │
//!   │  x = 5; x * 2<END>                     │
//!   │ ─────────────────────────────────────> │  instruction
//!   │                           x = 510<END> │
//!   │ <───────────────────────────────────── │  aggregated response
//! ```
//!
//! ## Modules
//!
//! - `frame`: Sentinel framing over a raw byte stream
//! - `outcome`: Per-statement outcomes and the response aggregation

pub mod frame;
pub mod outcome;

// Re-export commonly used types for convenience
pub use frame::{encode, FrameCodec, FrameError, SENTINEL};
pub use outcome::{aggregate, EvaluationOutcome};

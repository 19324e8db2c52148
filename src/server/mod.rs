//! Server Module
//!
//! Ties the pieces together: a [`Server`] owns the endpoint, the evaluator
//! and the statistics, and runs the accept loop described in [`acceptor`].
//!
//! ## Example
//!
//! ```ignore
//! use evalpipe::evaluator::ArithmeticEvaluator;
//! use evalpipe::server::{Server, ServerConfig};
//!
//! let handle = Server::new(ServerConfig::new("evalpipe"), ArithmeticEvaluator::new()).spawn();
//!
//! // Serve until asked to stop...
//! handle.shutdown().await?;
//! ```

pub mod acceptor;
pub mod config;

pub use acceptor::{Server, ServerError, ServerHandle};
pub use config::ServerConfig;

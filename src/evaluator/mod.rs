//! Evaluator Module
//!
//! The server does not interpret instructions itself. It hands each one to an
//! [`Evaluator`] and turns the returned outcomes into a response.
//!
//! ## Contract
//!
//! - One call per instruction, never two at once (the server keeps the
//!   evaluator behind a mutex)
//! - Outcomes come back in statement order, one per statement
//! - State may carry over from one instruction to the next, and across
//!   sessions
//! - `EvaluatorError::Unavailable` means no evaluation happened; the caller
//!   gets an empty response and the connection stays open
//!
//! Any `FnMut(&str) -> Result<Vec<EvaluationOutcome>, EvaluatorError>`
//! closure is an evaluator, which keeps tests short.
//!
//! ## Provided Evaluators
//!
//! - [`calc::ArithmeticEvaluator`]: integer arithmetic with variables
//! - [`cache::HandleCache`]: memoizes parsed forms for an evaluator

pub mod cache;
pub mod calc;

pub use cache::{CacheStats, HandleCache};
pub use calc::{ArithmeticEvaluator, CalcError};

use crate::protocol::outcome::EvaluationOutcome;
use thiserror::Error;

/// Executes instructions on behalf of the server.
pub trait Evaluator: Send {
    /// Evaluates every statement in `instruction`, in order.
    fn evaluate(&mut self, instruction: &str) -> Result<Vec<EvaluationOutcome>, EvaluatorError>;
}

impl<F> Evaluator for F
where
    F: FnMut(&str) -> Result<Vec<EvaluationOutcome>, EvaluatorError> + Send,
{
    fn evaluate(&mut self, instruction: &str) -> Result<Vec<EvaluationOutcome>, EvaluatorError> {
        self(instruction)
    }
}

/// Errors reported by an evaluator as a whole.
///
/// Problems with a single statement are not errors here; they are
/// `EvaluationOutcome::Failure` entries.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// No live evaluation session exists
    #[error("evaluator unavailable: {0}")]
    Unavailable(String),
}

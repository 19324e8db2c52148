//! Evaluation Outcomes and Response Aggregation
//!
//! An instruction may hold several statements. The evaluator reports one
//! outcome per statement, in statement order, and the server folds them into
//! a single response string:
//!
//! | Outcome            | Effect on the response              |
//! |--------------------|-------------------------------------|
//! | `Value(text)`      | append `text`, continue             |
//! | `Statement(text)`  | append `text`, continue             |
//! | `Failure(message)` | append `message`, stop              |
//!
//! Once a statement has failed, the results of the statements after it are
//! unreliable, so they are never appended. A bare statement does not stop
//! the batch: its side effects matter to the statements that follow.

/// The result of evaluating one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// The statement produced a value, rendered as text.
    Value(String),

    /// The statement raised an error; holds the error's description.
    Failure(String),

    /// The statement ran without producing a value; holds the echoed form.
    Statement(String),
}

impl EvaluationOutcome {
    /// Creates a value outcome.
    pub fn value(text: impl Into<String>) -> Self {
        EvaluationOutcome::Value(text.into())
    }

    /// Creates a failure outcome.
    pub fn failure(message: impl Into<String>) -> Self {
        EvaluationOutcome::Failure(message.into())
    }

    /// Creates a bare statement outcome.
    pub fn statement(text: impl Into<String>) -> Self {
        EvaluationOutcome::Statement(text.into())
    }

    /// Returns true for `Failure`.
    pub fn is_failure(&self) -> bool {
        matches!(self, EvaluationOutcome::Failure(_))
    }

    /// The text this outcome contributes to a response.
    pub fn text(&self) -> &str {
        match self {
            EvaluationOutcome::Value(text)
            | EvaluationOutcome::Failure(text)
            | EvaluationOutcome::Statement(text) => text,
        }
    }
}

/// Folds an ordered sequence of outcomes into one response string.
///
/// Returns an empty string when there are no outcomes; the caller still
/// sends it as a (empty) frame.
///
/// # Example
///
/// ```
/// use evalpipe::protocol::{aggregate, EvaluationOutcome};
///
/// let outcomes = [
///     EvaluationOutcome::value("1"),
///     EvaluationOutcome::failure("boom"),
///     EvaluationOutcome::value("3"),
/// ];
/// assert_eq!(aggregate(&outcomes), "1boom");
/// ```
pub fn aggregate<'a, I>(outcomes: I) -> String
where
    I: IntoIterator<Item = &'a EvaluationOutcome>,
{
    let mut response = String::new();

    for outcome in outcomes {
        match outcome {
            EvaluationOutcome::Value(text) => response.push_str(text),
            EvaluationOutcome::Failure(message) => {
                response.push_str(message);
                break;
            }
            EvaluationOutcome::Statement(text) => response.push_str(text),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use EvaluationOutcome::{Failure, Statement, Value};

    fn s(text: &str) -> String {
        text.to_string()
    }

    #[test]
    fn test_all_values() {
        let outcomes = vec![Value(s("1")), Value(s("2"))];
        assert_eq!(aggregate(&outcomes), "12");
    }

    #[test]
    fn test_stops_at_first_failure() {
        let outcomes = vec![Value(s("1")), Failure(s("boom")), Value(s("3"))];
        assert_eq!(aggregate(&outcomes), "1boom");
    }

    #[test]
    fn test_statement_fallback_continues() {
        let outcomes = vec![Statement(s("x=5")), Value(s("10"))];
        assert_eq!(aggregate(&outcomes), "x=510");
    }

    #[test]
    fn test_empty() {
        assert_eq!(aggregate(&[]), "");
    }

    #[test]
    fn test_failure_first() {
        let outcomes = vec![
            Failure(s("cannot find symbol: y")),
            Statement(s("x=1")),
            Value(s("2")),
        ];
        assert_eq!(aggregate(&outcomes), "cannot find symbol: y");
    }

    #[test]
    fn test_only_later_failure_counts() {
        let outcomes = vec![
            Statement(s("int a = 1;")),
            Statement(s("int b = 2;")),
            Failure(s("division by zero")),
            Failure(s("never seen")),
        ];
        assert_eq!(aggregate(&outcomes), "int a = 1;int b = 2;division by zero");
    }

    #[test]
    fn test_empty_texts() {
        let outcomes = vec![Value(s("")), Statement(s("")), Failure(s(""))];
        assert_eq!(aggregate(&outcomes), "");
    }

    #[test]
    fn test_accessors() {
        assert!(EvaluationOutcome::failure("x").is_failure());
        assert!(!EvaluationOutcome::value("x").is_failure());
        assert_eq!(EvaluationOutcome::statement("x=5").text(), "x=5");
    }
}

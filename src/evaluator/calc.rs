//! Integer Arithmetic Evaluator
//!
//! A small live evaluation session: statements separated by `;`, variables
//! that persist for the lifetime of the evaluator.
//!
//! ## Grammar
//!
//! ```text
//! statement := IDENT '=' expr | expr
//! expr      := term (('+' | '-') term)*
//! term      := unary (('*' | '/' | '%') unary)*
//! unary     := '-' unary | primary
//! primary   := NUMBER | IDENT | '(' expr ')'
//! ```
//!
//! ## Outcomes
//!
//! | Statement       | Outcome                                  |
//! |-----------------|------------------------------------------|
//! | `x = 5`         | `Statement("x = 5")`, `x` is now 5       |
//! | `x * 2`         | `Value("10")`                            |
//! | `y + 1`         | `Failure("cannot find symbol: y")`       |
//!
//! Evaluation stops at the first failing statement; later statements in the
//! same instruction are not run.
//!
//! Values are `i64`. Overflow and division by zero are failures, never
//! wrapping or panics.
//!
//! Operator chains like `1 + 2 - 3` parse into one flat node and evaluate in
//! a loop, so only parentheses and unary minus add nesting. Chain length is
//! bounded by the frame size alone.

use crate::evaluator::cache::HandleCache;
use crate::evaluator::{Evaluator, EvaluatorError};
use crate::protocol::outcome::EvaluationOutcome;
use std::collections::HashMap;
use thiserror::Error;
use tracing::trace;

/// Deepest nesting of parentheses and unary minus accepted.
const MAX_DEPTH: usize = 128;

/// Errors raised by a single statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalcError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("cannot find symbol: {0}")]
    UnknownVariable(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Assign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Number(i64),
    Var(String),
    Neg(Box<Expr>),
    /// `first op rest[0].1 op rest[1].1 ...`, folded left to right
    Chain {
        first: Box<Expr>,
        rest: Vec<(BinaryOp, Expr)>,
    },
}

impl Expr {
    fn chain(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
        if rest.is_empty() {
            first
        } else {
            Expr::Chain {
                first: Box::new(first),
                rest,
            }
        }
    }
}

/// A parsed statement, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    Assign { name: String, expr: Expr },
    Expr(Expr),
}

/// Evaluates `;`-separated integer statements against persistent variables.
#[derive(Debug, Default)]
pub struct ArithmeticEvaluator {
    variables: HashMap<String, i64>,
    parsed: HandleCache<String, Statement>,
}

impl ArithmeticEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `name`, if it has been assigned.
    pub fn variable(&self, name: &str) -> Option<i64> {
        self.variables.get(name).copied()
    }

    /// Forgets all variables. Parsed statements stay cached.
    pub fn reset(&mut self) {
        self.variables.clear();
    }

    /// Parse cache statistics.
    pub fn cache_stats(&self) -> crate::evaluator::CacheStats {
        self.parsed.stats()
    }

    /// Runs a single statement.
    fn run_statement(&mut self, source: &str) -> Result<EvaluationOutcome, CalcError> {
        let statement = self
            .parsed
            .get_or_try_insert_with(source.to_string(), |source| parse_statement(source))?;

        match statement {
            Statement::Assign { name, expr } => {
                let value = eval(expr, &self.variables)?;
                self.variables.insert(name.clone(), value);
                trace!(variable = %name, value = value, "Assigned");
                Ok(EvaluationOutcome::statement(source))
            }
            Statement::Expr(expr) => {
                let value = eval(expr, &self.variables)?;
                Ok(EvaluationOutcome::value(value.to_string()))
            }
        }
    }
}

impl Evaluator for ArithmeticEvaluator {
    fn evaluate(&mut self, instruction: &str) -> Result<Vec<EvaluationOutcome>, EvaluatorError> {
        let mut outcomes = Vec::new();

        for source in instruction.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match self.run_statement(source) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    outcomes.push(EvaluationOutcome::failure(e.to_string()));
                    break;
                }
            }
        }

        Ok(outcomes)
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

fn tokenize(source: &str) -> Result<Vec<Token>, CalcError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                let number = source[start..end]
                    .parse::<i64>()
                    .map_err(|_| CalcError::Overflow)?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if !(d.is_alphanumeric() || d == '_') {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Ident(source[start..end].to_string()));
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '=' => Token::Assign,
                    other => {
                        return Err(CalcError::Syntax(format!("unexpected character '{}'", other)))
                    }
                };
                tokens.push(token);
                chars.next();
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

fn parse_statement(source: &str) -> Result<Statement, CalcError> {
    let tokens = tokenize(source)?;

    if let [Token::Ident(name), Token::Assign, rest @ ..] = tokens.as_slice() {
        let expr = Parser::new(rest).parse_all()?;
        return Ok(Statement::Assign {
            name: name.clone(),
            expr,
        });
    }

    Parser::new(&tokens).parse_all().map(Statement::Expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn parse_all(mut self) -> Result<Expr, CalcError> {
        let expr = self.expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(CalcError::Syntax(format!("unexpected {}", describe(token)))),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<Expr, CalcError> {
        let first = self.term()?;
        let mut rest = Vec::new();

        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(Expr::chain(first, rest)),
            };
            self.advance();
            rest.push((op, self.term()?));
        }
    }

    fn term(&mut self) -> Result<Expr, CalcError> {
        let first = self.unary()?;
        let mut rest = Vec::new();

        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(Expr::chain(first, rest)),
            };
            self.advance();
            rest.push((op, self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Expr, CalcError> {
        if let Some(Token::Minus) = self.peek() {
            self.advance();
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, CalcError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(*n)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name.clone())),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(token) => Err(CalcError::Syntax(format!(
                        "expected ')', found {}",
                        describe(token)
                    ))),
                    None => Err(CalcError::Syntax("expected ')'".to_string())),
                }
            }
            Some(token) => Err(CalcError::Syntax(format!("unexpected {}", describe(token)))),
            None => Err(CalcError::Syntax("expected an expression".to_string())),
        }
    }

    fn descend(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::Syntax("expression nested too deeply".to_string()));
        }
        Ok(())
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {}", n),
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::Plus => "'+'".to_string(),
        Token::Minus => "'-'".to_string(),
        Token::Star => "'*'".to_string(),
        Token::Slash => "'/'".to_string(),
        Token::Percent => "'%'".to_string(),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::Assign => "'='".to_string(),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn eval(expr: &Expr, variables: &HashMap<String, i64>) -> Result<i64, CalcError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Var(name) => variables
            .get(name)
            .copied()
            .ok_or_else(|| CalcError::UnknownVariable(name.clone())),
        Expr::Neg(inner) => eval(inner, variables)?
            .checked_neg()
            .ok_or(CalcError::Overflow),
        Expr::Chain { first, rest } => {
            let mut acc = eval(first, variables)?;
            for (op, operand) in rest {
                acc = apply(*op, acc, eval(operand, variables)?)?;
            }
            Ok(acc)
        }
    }
}

fn apply(op: BinaryOp, lhs: i64, rhs: i64) -> Result<i64, CalcError> {
    let result = match op {
        BinaryOp::Add => lhs.checked_add(rhs),
        BinaryOp::Sub => lhs.checked_sub(rhs),
        BinaryOp::Mul => lhs.checked_mul(rhs),
        BinaryOp::Div | BinaryOp::Rem if rhs == 0 => return Err(CalcError::DivisionByZero),
        BinaryOp::Div => lhs.checked_div(rhs),
        BinaryOp::Rem => lhs.checked_rem(rhs),
    };
    result.ok_or(CalcError::Overflow)
}

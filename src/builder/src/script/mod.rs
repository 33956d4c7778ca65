//! Build-script front end.
//!
//! Parses a build script into a statement list the dispatcher walks.
//! Scripts are line-oriented: each statement is a verb name followed by
//! comma-separated arguments and an optional `do ... end` block. Arguments
//! are string literals (double-quoted strings interpolate `#{expr}`),
//! integers, arrays, function calls, and trailing `key: value` /
//! `"key" => value` pairs which collect into a single map argument.

mod lexer;
mod parser;

use box_core::error::Result;

/// A single expression in argument position.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// String literal; literal and interpolated segments in order
    Str(Vec<Segment>),
    /// Integer literal
    Int(i64),
    /// Function call
    Call {
        name: String,
        args: Vec<Expr>,
        line: usize,
    },
    /// `[ ... ]`
    Array(Vec<Expr>),
    /// Trailing `key: value` pairs, in script order
    Map(Vec<(String, Expr)>),
}

/// One segment of a string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Lit(String),
    Interp(Expr),
}

/// A statement: a verb or function invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub name: String,
    pub args: Vec<Expr>,
    pub block: Option<Vec<Stmt>>,
    pub line: usize,
}

/// Parsed build script: a list of statements in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub stmts: Vec<Stmt>,
}

impl Script {
    /// Parse a build script from its text content.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = lexer::tokenize(source)?;
        let stmts = parser::parse(tokens)?;
        Ok(Script { stmts })
    }
}

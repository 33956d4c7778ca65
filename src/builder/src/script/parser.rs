//! Recursive-descent parser over the token stream.

use box_core::error::{BoxError, Result};

use super::lexer::{tokenize, StrPart, Token};
use super::{Expr, Segment, Stmt};

/// Parse a token stream into a statement list.
pub(crate) fn parse(tokens: Vec<(Token, usize)>) -> Result<Vec<Stmt>> {
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_stmts(false)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, l)| *l)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Token::Newline)) {
            self.pos += 1;
        }
    }

    /// Parse statements until end of input, or until `end` when inside a
    /// block.
    fn parse_stmts(&mut self, in_block: bool) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                None => {
                    if in_block {
                        return Err(BoxError::script(self.line(), "expected `end`"));
                    }
                    return Ok(stmts);
                }
                Some(Token::End) => {
                    if in_block {
                        self.pos += 1;
                        return Ok(stmts);
                    }
                    return Err(BoxError::script(self.line(), "`end` without a block"));
                }
                Some(Token::Ident(_)) => stmts.push(self.parse_stmt()?),
                Some(other) => {
                    let message = format!("expected a verb, found {}", describe(other));
                    return Err(BoxError::script(self.line(), message));
                }
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let Some((Token::Ident(name), line)) = self.advance() else {
            return Err(BoxError::script(self.line(), "expected a verb"));
        };

        let args = match self.peek() {
            None | Some(Token::Newline) | Some(Token::Do) | Some(Token::End) => Vec::new(),
            Some(Token::LParen) => {
                self.pos += 1;
                if matches!(self.peek(), Some(Token::RParen)) {
                    self.pos += 1;
                    Vec::new()
                } else {
                    let args = self.parse_args()?;
                    match self.advance() {
                        Some((Token::RParen, _)) => args,
                        _ => return Err(BoxError::script(self.line(), "expected `)`")),
                    }
                }
            }
            _ => self.parse_args()?,
        };

        let block = if matches!(self.peek(), Some(Token::Do)) {
            self.pos += 1;
            Some(self.parse_stmts(true)?)
        } else {
            None
        };

        match self.peek() {
            None | Some(Token::Newline) | Some(Token::End) => {}
            Some(other) => {
                let message = format!("expected end of statement, found {}", describe(other));
                return Err(BoxError::script(self.line(), message));
            }
        }

        Ok(Stmt {
            name,
            args,
            block,
            line,
        })
    }

    /// Parse comma-separated arguments. Trailing `key: value` and
    /// `"key" => value` pairs collect into a single map argument; positional
    /// arguments may not follow them.
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        let mut pairs: Vec<(String, Expr)> = Vec::new();

        loop {
            if let Some(key) = self.try_parse_pair_key()? {
                pairs.push((key, self.parse_expr()?));
            } else {
                if !pairs.is_empty() {
                    return Err(BoxError::script(
                        self.line(),
                        "positional argument after key/value pair",
                    ));
                }
                args.push(self.parse_expr()?);
            }

            if matches!(self.peek(), Some(Token::Comma)) {
                self.pos += 1;
            } else {
                break;
            }
        }

        if !pairs.is_empty() {
            args.push(Expr::Map(pairs));
        }
        Ok(args)
    }

    /// Consume and return a pair key if one starts here: `ident:` or
    /// `"string" =>`.
    fn try_parse_pair_key(&mut self) -> Result<Option<String>> {
        match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(key)), Some(Token::Colon)) => {
                let key = key.clone();
                self.pos += 2;
                Ok(Some(key))
            }
            (Some(Token::Str(parts)), Some(Token::Arrow)) => {
                let key = match parts.as_slice() {
                    [StrPart::Lit(key)] => key.clone(),
                    _ => {
                        return Err(BoxError::script(
                            self.line(),
                            "map keys must be literal strings",
                        ))
                    }
                };
                self.pos += 2;
                Ok(Some(key))
            }
            (Some(Token::RawStr(key)), Some(Token::Arrow)) => {
                let key = key.clone();
                self.pos += 2;
                Ok(Some(key))
            }
            _ => Ok(None),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.advance() {
            Some((Token::Str(parts), line)) => {
                let mut segments = Vec::new();
                for part in parts {
                    match part {
                        StrPart::Lit(text) => segments.push(Segment::Lit(text)),
                        StrPart::Interp(source) => {
                            segments.push(Segment::Interp(parse_interp(&source, line)?))
                        }
                    }
                }
                Ok(Expr::Str(segments))
            }
            Some((Token::RawStr(text), _)) => Ok(Expr::Str(vec![Segment::Lit(text)])),
            Some((Token::Int(value), _)) => Ok(Expr::Int(value)),
            Some((Token::LBracket, _)) => {
                let mut items = Vec::new();
                if matches!(self.peek(), Some(Token::RBracket)) {
                    self.pos += 1;
                    return Ok(Expr::Array(items));
                }
                loop {
                    items.push(self.parse_expr()?);
                    match self.advance() {
                        Some((Token::Comma, _)) => {}
                        Some((Token::RBracket, _)) => break,
                        _ => return Err(BoxError::script(self.line(), "expected `,` or `]`")),
                    }
                }
                Ok(Expr::Array(items))
            }
            Some((Token::Ident(name), line)) => {
                if !matches!(self.peek(), Some(Token::LParen)) {
                    return Err(BoxError::script(
                        line,
                        format!("unexpected bare word {name:?}; strings must be quoted"),
                    ));
                }
                self.pos += 1;
                let mut call_args = Vec::new();
                if matches!(self.peek(), Some(Token::RParen)) {
                    self.pos += 1;
                } else {
                    loop {
                        call_args.push(self.parse_expr()?);
                        match self.advance() {
                            Some((Token::Comma, _)) => {}
                            Some((Token::RParen, _)) => break,
                            _ => {
                                return Err(BoxError::script(self.line(), "expected `,` or `)`"))
                            }
                        }
                    }
                }
                Ok(Expr::Call {
                    name,
                    args: call_args,
                    line,
                })
            }
            Some((other, line)) => Err(BoxError::script(
                line,
                format!("expected an argument, found {}", describe(&other)),
            )),
            None => Err(BoxError::script(line, "expected an argument")),
        }
    }
}

/// Parse an interpolation's raw source as a single expression. Errors and
/// nested expressions report the enclosing string's line.
fn parse_interp(source: &str, line: usize) -> Result<Expr> {
    let tokens: Vec<(Token, usize)> = tokenize(source)
        .map_err(|e| BoxError::script(line, format!("in interpolation: {e}")))?
        .into_iter()
        .map(|(t, _)| (t, line))
        .collect();

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.peek().is_some() {
        return Err(BoxError::script(
            line,
            "interpolation must be a single expression",
        ));
    }
    Ok(expr)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("{name:?}"),
        Token::Str(_) | Token::RawStr(_) => "a string".to_string(),
        Token::Int(value) => format!("{value}"),
        Token::Comma => "`,`".to_string(),
        Token::Colon => "`:`".to_string(),
        Token::Arrow => "`=>`".to_string(),
        Token::LBracket => "`[`".to_string(),
        Token::RBracket => "`]`".to_string(),
        Token::LParen => "`(`".to_string(),
        Token::RParen => "`)`".to_string(),
        Token::Do => "`do`".to_string(),
        Token::End => "`end`".to_string(),
        Token::Newline => "end of line".to_string(),
    }
}

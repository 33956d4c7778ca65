//! Build-script tokenizer.

use box_core::error::{BoxError, Result};

/// One token, paired with its 1-based source line by the tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    /// Double-quoted string: literal and interpolated parts
    Str(Vec<StrPart>),
    /// Single-quoted string: no interpolation, no escapes beyond \' and \\
    RawStr(String),
    Int(i64),
    Comma,
    Colon,
    /// `=>`
    Arrow,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Do,
    End,
    Newline,
}

/// A piece of a double-quoted string. Interpolations carry their raw
/// expression source; the parser lexes them recursively.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Lit(String),
    Interp(String),
}

/// Tokenize a build script. Comments run from `#` to end of line; `#{`
/// inside a double-quoted string starts an interpolation instead.
pub fn tokenize(source: &str) -> Result<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1usize;

    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' | '\r' => {}
            '\n' => {
                tokens.push((Token::Newline, line));
                line += 1;
            }
            '#' => {
                // comment to end of line
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' => tokens.push((Token::Str(scan_string(&mut chars, line)?), line)),
            '\'' => tokens.push((Token::RawStr(scan_raw_string(&mut chars, line)?), line)),
            ',' => tokens.push((Token::Comma, line)),
            ':' => tokens.push((Token::Colon, line)),
            '[' => tokens.push((Token::LBracket, line)),
            ']' => tokens.push((Token::RBracket, line)),
            '(' => tokens.push((Token::LParen, line)),
            ')' => tokens.push((Token::RParen, line)),
            '=' => match chars.next() {
                Some('>') => tokens.push((Token::Arrow, line)),
                _ => return Err(BoxError::script(line, "expected `=>`")),
            },
            _ if ch.is_ascii_digit() => {
                let mut number = String::from(ch);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() {
                        number.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = number
                    .parse()
                    .map_err(|_| BoxError::script(line, format!("bad integer {number:?}")))?;
                tokens.push((Token::Int(value), line));
            }
            _ if ch.is_ascii_alphabetic() || ch == '_' => {
                let mut word = String::from(ch);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match word.as_str() {
                    "do" => Token::Do,
                    "end" => Token::End,
                    _ => Token::Ident(word),
                };
                tokens.push((token, line));
            }
            _ => {
                return Err(BoxError::script(
                    line,
                    format!("unexpected character {ch:?}"),
                ))
            }
        }
    }

    Ok(tokens)
}

/// Scan a double-quoted string after the opening quote. `#{` opens an
/// interpolation; its raw source is captured up to the balancing `}`,
/// skipping over braces inside nested string literals.
fn scan_string(chars: &mut std::iter::Peekable<std::str::Chars>, line: usize) -> Result<Vec<StrPart>> {
    let mut parts = Vec::new();
    let mut current = String::new();

    loop {
        match chars.next() {
            Some('"') => break,
            Some('\\') => current.push(escape(chars.next(), line)?),
            Some('#') if chars.peek() == Some(&'{') => {
                chars.next();
                if !current.is_empty() {
                    parts.push(StrPart::Lit(std::mem::take(&mut current)));
                }
                parts.push(StrPart::Interp(scan_interpolation(chars, line)?));
            }
            Some('\n') | None => return Err(BoxError::script(line, "unterminated string")),
            Some(ch) => current.push(ch),
        }
    }

    if !current.is_empty() || parts.is_empty() {
        parts.push(StrPart::Lit(current));
    }
    Ok(parts)
}

/// Scan a single-quoted string after the opening quote.
fn scan_raw_string(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    line: usize,
) -> Result<String> {
    let mut out = String::new();
    loop {
        match chars.next() {
            Some('\'') => return Ok(out),
            Some('\\') => match chars.next() {
                Some('\'') => out.push('\''),
                Some('\\') => out.push('\\'),
                Some(ch) => {
                    out.push('\\');
                    out.push(ch);
                }
                None => return Err(BoxError::script(line, "unterminated string")),
            },
            Some('\n') | None => return Err(BoxError::script(line, "unterminated string")),
            Some(ch) => out.push(ch),
        }
    }
}

/// Capture interpolation source up to the balancing `}`.
fn scan_interpolation(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    line: usize,
) -> Result<String> {
    let mut source = String::new();
    let mut depth = 1usize;

    loop {
        match chars.next() {
            Some('}') => {
                depth -= 1;
                if depth == 0 {
                    return Ok(source);
                }
                source.push('}');
            }
            Some('{') => {
                depth += 1;
                source.push('{');
            }
            Some(quote @ ('"' | '\'')) => {
                // pass nested string literals through verbatim
                source.push(quote);
                loop {
                    match chars.next() {
                        Some('\\') => {
                            source.push('\\');
                            match chars.next() {
                                Some(ch) => source.push(ch),
                                None => {
                                    return Err(BoxError::script(line, "unterminated interpolation"))
                                }
                            }
                        }
                        Some(ch) => {
                            source.push(ch);
                            if ch == quote {
                                break;
                            }
                        }
                        None => return Err(BoxError::script(line, "unterminated interpolation")),
                    }
                }
            }
            Some('\n') | None => return Err(BoxError::script(line, "unterminated interpolation")),
            Some(ch) => source.push(ch),
        }
    }
}

fn escape(ch: Option<char>, line: usize) -> Result<char> {
    match ch {
        Some('n') => Ok('\n'),
        Some('t') => Ok('\t'),
        Some('r') => Ok('\r'),
        Some(ch) => Ok(ch),
        None => Err(BoxError::script(line, "unterminated string")),
    }
}

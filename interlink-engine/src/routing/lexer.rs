//! Tokeniser for the routing condition language.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::error::EngineError;

/// Comparison operators. Comparison is over strings, as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// String predicate functions. Matching is case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrFunc {
    Contains,
    StartsWith,
    EndsWith,
}

/// A lexed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    Comma,
    /// A field reference, e.g. `{MSH-9.1}` (braces stripped).
    Field(String),
    /// A double-quoted string literal (quotes stripped, escapes resolved).
    Str(String),
    /// A numeric literal, kept as its literal text.
    Num(String),
    Op(CmpOp),
    And,
    Or,
    Not,
    In,
    Func(StrFunc),
}

/// Tokenise a condition expression.
///
/// Keywords (`AND`, `OR`, `NOT`, `IN`, and the function names) are
/// recognised case-insensitively; string *values* keep their exact case.
pub fn tokenize(input: &str) -> Result<Vec<Token>, EngineError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0usize;

    let err = |what: &str| EngineError::Validation {
        reason: format!("condition syntax error: {what} in '{input}'"),
    };

    while pos < bytes.len() {
        let c = bytes[pos];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => pos += 1,
            b'(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            b',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            b'{' => {
                let end = input[pos..]
                    .find('}')
                    .map(|i| pos + i)
                    .ok_or_else(|| err("unterminated field reference"))?;
                tokens.push(Token::Field(input[pos + 1..end].to_string()));
                pos = end + 1;
            }
            b'"' => {
                let mut value = String::new();
                let mut chars = input[pos + 1..].char_indices();
                let mut end = None;
                while let Some((i, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        '"' => {
                            end = Some(i + 1);
                            break;
                        }
                        other => value.push(other),
                    }
                }
                let Some(end) = end else {
                    return Err(err("unterminated string literal"));
                };
                tokens.push(Token::Str(value));
                pos = pos + 1 + end;
            }
            b'!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    pos += 2;
                } else {
                    return Err(err("expected '=' after '!'"));
                }
            }
            b'<' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    pos += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    pos += 1;
                }
            }
            b'>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    pos += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    pos += 1;
                }
            }
            b'=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                pos += 1;
            }
            b'0'..=b'9' => {
                let start = pos;
                while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                    pos += 1;
                }
                tokens.push(Token::Num(input[start..pos].to_string()));
            }
            c if c.is_ascii_alphabetic() => {
                let start = pos;
                while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
                    pos += 1;
                }
                let word = &input[start..pos];
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IN" => Token::In,
                    "CONTAINS" => Token::Func(StrFunc::Contains),
                    "STARTSWITH" => Token::Func(StrFunc::StartsWith),
                    "ENDSWITH" => Token::Func(StrFunc::EndsWith),
                    _ => return Err(err(&format!("unknown word '{word}'"))),
                };
                tokens.push(token);
            }
            other => return Err(err(&format!("unexpected character '{}'", other as char))),
        }
    }

    Ok(tokens)
}

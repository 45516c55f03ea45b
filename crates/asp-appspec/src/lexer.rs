//! Lexical analysis of application specification sources.
//!
//! The language is line oriented: `#` comments run to end of line, a
//! trailing backslash continues a statement, and a newline ends one.
//! Numbers may carry a sign when it directly precedes the digits; the
//! literal `-2147483648` is representable through a negated-minimum marker
//! on the unsigned token.

use crate::error::GeneratorError;

/// Position of a token in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Integer {
        value: i32,
        /// Set when the unsigned digits spell 2147483648, which is only
        /// valid under a leading minus.
        negated_min: bool,
    },
    Float(f64),
    String(Vec<u8>),
    Include,
    Lib,
    Assign,
    Comma,
    LeftParen,
    RightParen,
    Asterisk,
    DoubleAsterisk,
    StatementEnd,
    EndOfFile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

pub struct Lexer<'a> {
    bytes: &'a [u8],
    position: usize,
    file_name: &'a str,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, file_name: &'a str) -> Self {
        Self {
            bytes: source.as_bytes(),
            position: 0,
            file_name,
            line: 1,
            column: 1,
        }
    }

    fn error(&self, location: SourceLocation, message: impl Into<String>) -> GeneratorError {
        GeneratorError::new(self.file_name, location, message)
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.position + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.bytes.get(self.position).copied()?;
        self.position += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.column,
        }
    }

    /// Produces the next token.
    pub fn next_token(&mut self) -> Result<Token, GeneratorError> {
        loop {
            let location = self.location();
            let Some(byte) = self.peek(0) else {
                return Ok(Token {
                    kind: TokenKind::EndOfFile,
                    location,
                });
            };

            match byte {
                b'#' => {
                    while let Some(byte) = self.peek(0) {
                        if byte == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                b'\\' if self.peek(1) == Some(b'\n') => {
                    self.bump();
                    self.bump();
                }
                b'\n' => {
                    self.bump();
                    return Ok(Token {
                        kind: TokenKind::StatementEnd,
                        location,
                    });
                }
                b' ' | b'\t' | b'\r' => {
                    self.bump();
                }
                b'=' => {
                    self.bump();
                    return Ok(Token {
                        kind: TokenKind::Assign,
                        location,
                    });
                }
                b',' => {
                    self.bump();
                    return Ok(Token {
                        kind: TokenKind::Comma,
                        location,
                    });
                }
                b'(' => {
                    self.bump();
                    return Ok(Token {
                        kind: TokenKind::LeftParen,
                        location,
                    });
                }
                b')' => {
                    self.bump();
                    return Ok(Token {
                        kind: TokenKind::RightParen,
                        location,
                    });
                }
                b'*' => {
                    self.bump();
                    if self.peek(0) == Some(b'*') {
                        self.bump();
                        return Ok(Token {
                            kind: TokenKind::DoubleAsterisk,
                            location,
                        });
                    }
                    return Ok(Token {
                        kind: TokenKind::Asterisk,
                        location,
                    });
                }
                b'\'' | b'"' => return self.string(location),
                b'+' | b'-' if self.digits_follow_sign() => {
                    self.bump();
                    return self.number(location, byte == b'-');
                }
                _ if byte.is_ascii_digit() || (byte == b'.' && self.peek(1).is_some_and(|b| b.is_ascii_digit())) => {
                    return self.number(location, false);
                }
                _ if byte.is_ascii_alphabetic() || byte == b'_' => return Ok(self.name(location)),
                _ => {
                    self.bump();
                    return Err(self.error(location, format!("unexpected character '{}'", byte as char)));
                }
            }
        }
    }

    fn digits_follow_sign(&self) -> bool {
        match self.peek(1) {
            Some(byte) if byte.is_ascii_digit() => true,
            Some(b'.') => self.peek(2).is_some_and(|byte| byte.is_ascii_digit()),
            _ => false,
        }
    }

    fn name(&mut self, location: SourceLocation) -> Token {
        let start = self.position;
        while let Some(byte) = self.peek(0) {
            if byte.is_ascii_alphanumeric() || byte == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.position])
            .expect("name bytes are ASCII")
            .to_string();
        let kind = match text.as_str() {
            "include" => TokenKind::Include,
            "lib" => TokenKind::Lib,
            _ => TokenKind::Name(text),
        };
        Token { kind, location }
    }

    fn number(&mut self, location: SourceLocation, negative: bool) -> Result<Token, GeneratorError> {
        let start = self.position;
        let mut is_float = false;

        if self.peek(0) == Some(b'0') && matches!(self.peek(1), Some(b'x' | b'X')) {
            self.bump();
            self.bump();
            let digits_start = self.position;
            while self.peek(0).is_some_and(|byte| byte.is_ascii_hexdigit()) {
                self.bump();
            }
            let digits = std::str::from_utf8(&self.bytes[digits_start..self.position]).expect("hex digits");
            if digits.is_empty() {
                return Err(self.error(location, "malformed hexadecimal literal"));
            }
            let value =
                u32::from_str_radix(digits, 16).map_err(|_| self.error(location, "hexadecimal literal out of range"))?;
            let value = value as i32;
            return Ok(Token {
                kind: TokenKind::Integer {
                    value: if negative { value.wrapping_neg() } else { value },
                    negated_min: false,
                },
                location,
            });
        }

        while let Some(byte) = self.peek(0) {
            match byte {
                b'0'..=b'9' => {
                    self.bump();
                }
                b'.' if !is_float => {
                    is_float = true;
                    self.bump();
                }
                b'e' | b'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(0), Some(b'+' | b'-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.position]).expect("number bytes are ASCII");

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(location, format!("malformed float literal '{text}'")))?;
            return Ok(Token {
                kind: TokenKind::Float(if negative { -value } else { value }),
                location,
            });
        }

        let magnitude: u64 = text
            .parse()
            .map_err(|_| self.error(location, format!("malformed integer literal '{text}'")))?;
        let kind = match (magnitude, negative) {
            (0..=0x7FFF_FFFF, false) => TokenKind::Integer {
                value: magnitude as i32,
                negated_min: false,
            },
            (0..=0x7FFF_FFFF, true) => TokenKind::Integer {
                value: -(magnitude as i32),
                negated_min: false,
            },
            (0x8000_0000, true) => TokenKind::Integer {
                value: i32::MIN,
                negated_min: false,
            },
            (0x8000_0000, false) => TokenKind::Integer {
                value: i32::MIN,
                negated_min: true,
            },
            _ => return Err(self.error(location, format!("integer literal '{text}' out of range"))),
        };
        Ok(Token { kind, location })
    }

    fn string(&mut self, location: SourceLocation) -> Result<Token, GeneratorError> {
        let quote = self.bump().expect("quote peeked");
        let mut bytes = Vec::new();
        loop {
            let Some(byte) = self.bump() else {
                return Err(self.error(location, "unterminated string literal"));
            };
            match byte {
                b'\n' => return Err(self.error(location, "unterminated string literal")),
                byte if byte == quote => break,
                b'\\' => {
                    let Some(escape) = self.bump() else {
                        return Err(self.error(location, "unterminated string literal"));
                    };
                    match escape {
                        b'0' => bytes.push(0),
                        b'a' => bytes.push(0x07),
                        b'b' => bytes.push(0x08),
                        b'f' => bytes.push(0x0C),
                        b'n' => bytes.push(b'\n'),
                        b'r' => bytes.push(b'\r'),
                        b't' => bytes.push(b'\t'),
                        b'v' => bytes.push(0x0B),
                        b'\\' => bytes.push(b'\\'),
                        b'\'' => bytes.push(b'\''),
                        b'"' => bytes.push(b'"'),
                        b'x' => {
                            let high = self.bump();
                            let low = self.bump();
                            let (Some(high), Some(low)) = (high, low) else {
                                return Err(self.error(location, "truncated \\x escape"));
                            };
                            let hex = [high, low];
                            let hex = std::str::from_utf8(&hex).map_err(|_| self.error(location, "malformed \\x escape"))?;
                            let value =
                                u8::from_str_radix(hex, 16).map_err(|_| self.error(location, "malformed \\x escape"))?;
                            bytes.push(value);
                        }
                        _ => return Err(self.error(location, format!("unknown escape '\\{}'", escape as char))),
                    }
                }
                byte => bytes.push(byte),
            }
        }
        Ok(Token {
            kind: TokenKind::String(bytes),
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source, "test.asps");
        let mut kinds = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            let done = token.kind == TokenKind::EndOfFile;
            kinds.push(token.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[test]
    fn names_and_punctuation() {
        assert_eq!(
            kinds("f(a, b=2, *rest, **kw)"),
            vec![
                TokenKind::Name("f".into()),
                TokenKind::LeftParen,
                TokenKind::Name("a".into()),
                TokenKind::Comma,
                TokenKind::Name("b".into()),
                TokenKind::Assign,
                TokenKind::Integer {
                    value: 2,
                    negated_min: false
                },
                TokenKind::Comma,
                TokenKind::Asterisk,
                TokenKind::Name("rest".into()),
                TokenKind::Comma,
                TokenKind::DoubleAsterisk,
                TokenKind::Name("kw".into()),
                TokenKind::RightParen,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn negated_minimum_integer() {
        assert_eq!(
            kinds("x = -2147483648"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Assign,
                TokenKind::Integer {
                    value: i32::MIN,
                    negated_min: false
                },
                TokenKind::EndOfFile,
            ]
        );
        let mut lexer = Lexer::new("x = 2147483648", "test.asps");
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::Integer {
                value: i32::MIN,
                negated_min: true
            }
        );
    }

    #[test]
    fn comments_and_continuations() {
        assert_eq!(
            kinds("a # trailing\nb \\\nc"),
            vec![
                TokenKind::Name("a".into()),
                TokenKind::StatementEnd,
                TokenKind::Name("b".into()),
                TokenKind::Name("c".into()),
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r"s = 'a\n\x41'"),
            vec![
                TokenKind::Name("s".into()),
                TokenKind::Assign,
                TokenKind::String(b"a\nA".to_vec()),
                TokenKind::EndOfFile,
            ]
        );
    }
}

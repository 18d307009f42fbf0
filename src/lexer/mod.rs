//! Lexer: cooking pass over the low-level token stream.
//!
//! `raw` turns bytes into flagged tokens; this module re-slices the source
//! with the raw lengths, decodes literal values, recognises keywords, tracks
//! line/column positions, and converts in-band error flags into `LexError`
//! records. The raw stage never diagnoses anything; everything user-visible
//! about a malformed literal is synthesised here.

pub mod cursor;
pub mod raw;
pub mod token;
pub mod unescape;

pub use token::{Keyword, Span, Token, TokenKind};

use raw::{Base, LiteralKind, RawStrError};
use unescape::{MixedUnit, Mode};

/// Lexer error synthesised from a raw token flag.
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub span: Span,
    pub line: u32,
}

/// Cooking lexer over the raw token stream.
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: u32,
    col: u32,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            col: 1,
            errors: Vec::new(),
        }
    }

    /// Tokenize an entire source into a vector. Strips a leading shebang.
    pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexError>) {
        let mut lexer = Lexer::new(source);
        if let Some(shebang_len) = raw::strip_shebang(source) {
            lexer.advance_bytes(shebang_len);
        }

        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token();
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }

        (tokens, lexer.errors)
    }

    fn remaining(&self) -> &'a str {
        &self.source[self.pos..]
    }

    /// Advance over `len` bytes, updating line/column bookkeeping.
    fn advance_bytes(&mut self, len: usize) {
        for c in self.source[self.pos..self.pos + len].chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += len;
    }

    /// Get the next cooked token.
    fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let line = self.line;
        let col = self.col;

        if self.pos >= self.source.len() {
            let span = Span::new(self.pos as u32, self.pos as u32);
            return Token::new(TokenKind::Eof, span, line, col);
        }

        let start = self.pos;
        let raw_tok = raw::first_token(self.remaining());
        let text = &self.remaining()[..raw_tok.len as usize];
        self.advance_bytes(raw_tok.len as usize);
        let span = Span::new(start as u32, self.pos as u32);

        let kind = self.convert_token(raw_tok.kind, text, span, line);
        Token::new(kind, span, line, col)
    }

    /// Skip whitespace and comments, flagging unterminated block comments.
    fn skip_trivia(&mut self) {
        while self.pos < self.source.len() {
            let tok = raw::first_token(self.remaining());
            match tok.kind {
                raw::TokenKind::Whitespace | raw::TokenKind::LineComment { .. } => {
                    self.advance_bytes(tok.len as usize);
                }
                raw::TokenKind::BlockComment { terminated, .. } => {
                    if !terminated {
                        let span =
                            Span::new(self.pos as u32, (self.pos + tok.len as usize) as u32);
                        let line = self.line;
                        self.error("unterminated block comment", span, line);
                    }
                    self.advance_bytes(tok.len as usize);
                }
                _ => break,
            }
        }
    }

    fn error(&mut self, message: impl Into<String>, span: Span, line: u32) {
        self.errors.push(LexError {
            message: message.into(),
            span,
            line,
        });
    }

    /// Convert a raw token into a cooked one.
    fn convert_token(
        &mut self,
        kind: raw::TokenKind,
        text: &str,
        span: Span,
        line: u32,
    ) -> TokenKind {
        use raw::TokenKind as RK;

        match kind {
            RK::Ident => {
                if let Some(kw) = Keyword::from_str(text) {
                    TokenKind::Keyword(kw)
                } else if text == "_" {
                    TokenKind::Underscore
                } else {
                    TokenKind::Ident(text.to_string())
                }
            }
            // r#ident: strip the r# prefix. Raw keywords are plain
            // identifiers.
            RK::RawIdent => TokenKind::Ident(text[2..].to_string()),
            RK::InvalidIdent => {
                self.error("identifier contains invalid characters", span, line);
                TokenKind::Ident(text.to_string())
            }
            RK::UnknownPrefix => {
                self.error("unknown literal prefix", span, line);
                TokenKind::Ident(text.to_string())
            }

            RK::Literal { kind, suffix_start } => {
                self.cook_literal(kind, text, suffix_start as usize, span, line)
            }

            RK::Lifetime { starts_with_number } => {
                if starts_with_number {
                    self.error("lifetime cannot start with a number", span, line);
                }
                // 'lifetime: strip the leading quote.
                TokenKind::Lifetime(text[1..].to_string())
            }
            // 'r#lt: strip the quote and the r# prefix.
            RK::RawLifetime => TokenKind::Lifetime(text[3..].to_string()),
            RK::UnknownPrefixLifetime => {
                self.error("unknown lifetime prefix", span, line);
                TokenKind::Lifetime(text[1..].to_string())
            }

            RK::GuardedStrPrefix => {
                self.error("guarded string literals are reserved syntax", span, line);
                TokenKind::Pound
            }

            RK::Semi => TokenKind::Semi,
            RK::Comma => TokenKind::Comma,
            RK::Dot => TokenKind::Dot,
            RK::OpenParen => TokenKind::LParen,
            RK::CloseParen => TokenKind::RParen,
            RK::OpenBrace => TokenKind::LBrace,
            RK::CloseBrace => TokenKind::RBrace,
            RK::OpenBracket => TokenKind::LBracket,
            RK::CloseBracket => TokenKind::RBracket,
            RK::At => TokenKind::At,
            RK::Pound => TokenKind::Pound,
            RK::Tilde => TokenKind::Tilde,
            RK::Question => TokenKind::Question,
            RK::Colon => TokenKind::Colon,
            RK::Dollar => TokenKind::Dollar,
            RK::Eq => TokenKind::Eq,
            RK::Bang => TokenKind::Not,
            RK::Lt => TokenKind::Lt,
            RK::Gt => TokenKind::Gt,
            RK::Minus => TokenKind::Minus,
            RK::And => TokenKind::And,
            RK::Or => TokenKind::Or,
            RK::Plus => TokenKind::Plus,
            RK::Star => TokenKind::Star,
            RK::Slash => TokenKind::Slash,
            RK::Caret => TokenKind::Caret,
            RK::Percent => TokenKind::Percent,

            // skip_trivia consumed these already.
            RK::Whitespace | RK::LineComment { .. } | RK::BlockComment { .. } => {
                unreachable!("trivia survived skip_trivia")
            }

            // No diagnostic here: unexpected characters are the parser's
            // error to report.
            RK::Unknown => TokenKind::Unknown(text.chars().next().unwrap_or('?')),

            RK::Eof => TokenKind::Eof,
        }
    }

    /// Decode a literal token's value, flagging malformed forms.
    fn cook_literal(
        &mut self,
        kind: LiteralKind,
        text: &str,
        suffix_start: usize,
        span: Span,
        line: u32,
    ) -> TokenKind {
        let body = &text[..suffix_start];

        match kind {
            LiteralKind::Int { base, empty_int } => {
                if empty_int {
                    self.error("no valid digits found for number", span, line);
                    return TokenKind::Int(0);
                }
                self.cook_int(body, base, span, line)
            }

            LiteralKind::Float {
                base,
                empty_exponent,
            } => {
                if empty_exponent {
                    self.error("expected at least one digit in exponent", span, line);
                }
                match base {
                    Base::Decimal => {}
                    Base::Binary => self.error("binary float literal is not supported", span, line),
                    Base::Octal => self.error("octal float literal is not supported", span, line),
                    Base::Hexadecimal => {
                        self.error("hexadecimal float literal is not supported", span, line)
                    }
                }
                self.cook_float(body, span, line)
            }

            LiteralKind::Char { terminated } => {
                if !terminated {
                    self.error("unterminated character literal", span, line);
                    return TokenKind::Char('\0');
                }
                let inner = &body[1..body.len() - 1];
                match unescape::unescape_char(inner) {
                    Ok(c) => TokenKind::Char(c),
                    Err(e) => {
                        self.error(e.to_string(), span, line);
                        TokenKind::Char('\0')
                    }
                }
            }

            LiteralKind::Byte { terminated } => {
                if !terminated {
                    self.error("unterminated byte literal", span, line);
                    return TokenKind::Byte(0);
                }
                let inner = &body[2..body.len() - 1];
                match unescape::unescape_byte(inner) {
                    Ok(b) => TokenKind::Byte(b),
                    Err(e) => {
                        self.error(e.to_string(), span, line);
                        TokenKind::Byte(0)
                    }
                }
            }

            LiteralKind::Str { terminated } => {
                if !terminated {
                    self.error("unterminated double quote string", span, line);
                    return TokenKind::Str(String::new());
                }
                let inner = &body[1..body.len() - 1];
                TokenKind::Str(self.cook_unicode_str(inner, Mode::Str, span, line))
            }

            LiteralKind::ByteStr { terminated } => {
                if !terminated {
                    self.error("unterminated double quote byte string", span, line);
                    return TokenKind::ByteStr(Vec::new());
                }
                let inner = &body[2..body.len() - 1];
                TokenKind::ByteStr(self.cook_byte_str(inner, Mode::ByteStr, span, line))
            }

            LiteralKind::CStr { terminated } => {
                if !terminated {
                    self.error("unterminated C string", span, line);
                    return TokenKind::CStr(Vec::new());
                }
                let inner = &body[2..body.len() - 1];
                TokenKind::CStr(self.cook_c_str(inner, Mode::CStr, span, line))
            }

            LiteralKind::RawStr { n_hashes } => match n_hashes {
                Some(n) => {
                    let inner = raw_str_contents(body, 1, n);
                    TokenKind::RawStr(self.cook_unicode_str(inner, Mode::RawStr, span, line))
                }
                None => {
                    self.raw_str_error(text, 1, span, line);
                    TokenKind::RawStr(String::new())
                }
            },

            LiteralKind::RawByteStr { n_hashes } => match n_hashes {
                Some(n) => {
                    let inner = raw_str_contents(body, 2, n);
                    TokenKind::ByteStr(self.cook_byte_str(inner, Mode::RawByteStr, span, line))
                }
                None => {
                    self.raw_str_error(text, 2, span, line);
                    TokenKind::ByteStr(Vec::new())
                }
            },

            LiteralKind::RawCStr { n_hashes } => match n_hashes {
                Some(n) => {
                    let inner = raw_str_contents(body, 2, n);
                    TokenKind::CStr(self.cook_c_str(inner, Mode::RawCStr, span, line))
                }
                None => {
                    self.raw_str_error(text, 2, span, line);
                    TokenKind::CStr(Vec::new())
                }
            },
        }
    }

    fn cook_int(&mut self, body: &str, base: Base, span: Span, line: u32) -> TokenKind {
        // Underscores are digit separators.
        let clean: String = body.chars().filter(|&c| c != '_').collect();

        let (digits, radix) = match base {
            Base::Binary => (&clean[2..], 2),
            Base::Octal => (&clean[2..], 8),
            Base::Hexadecimal => (&clean[2..], 16),
            Base::Decimal => (clean.as_str(), 10),
        };

        match i64::from_str_radix(digits, radix) {
            Ok(n) => TokenKind::Int(n),
            Err(_) => {
                self.error(
                    format!("integer literal out of range: {}", body),
                    span,
                    line,
                );
                TokenKind::Int(0)
            }
        }
    }

    fn cook_float(&mut self, body: &str, span: Span, line: u32) -> TokenKind {
        let clean: String = body.chars().filter(|&c| c != '_').collect();
        match clean.parse::<f64>() {
            Ok(n) => TokenKind::Float(n),
            Err(_) => {
                self.error(format!("invalid float literal: {}", body), span, line);
                TokenKind::Float(0.0)
            }
        }
    }

    /// Unescape a unicode-mode string body, flagging each fatal error once.
    fn cook_unicode_str(&mut self, inner: &str, mode: Mode, span: Span, line: u32) -> String {
        let mut result = String::with_capacity(inner.len());
        let mut errors = Vec::new();
        unescape::unescape_unicode(inner, mode, &mut |_, res| match res {
            Ok(c) => result.push(c),
            Err(e) => {
                if e.is_fatal() {
                    errors.push(e);
                }
            }
        });
        for e in errors {
            self.error(e.to_string(), span, line);
        }
        result
    }

    /// Byte-string modes guarantee every unit is below 0x100: plain chars
    /// are ASCII-checked and `\xNN` escapes arrive as latin-1 chars. Casting
    /// keeps `b"\xFF"` a single 0xFF byte rather than two UTF-8 bytes.
    fn cook_byte_str(&mut self, inner: &str, mode: Mode, span: Span, line: u32) -> Vec<u8> {
        let mut result = Vec::with_capacity(inner.len());
        let mut errors = Vec::new();
        unescape::unescape_unicode(inner, mode, &mut |_, res| match res {
            Ok(c) => result.push(c as u8),
            Err(e) => {
                if e.is_fatal() {
                    errors.push(e);
                }
            }
        });
        for e in errors {
            self.error(e.to_string(), span, line);
        }
        result
    }

    fn cook_c_str(&mut self, inner: &str, mode: Mode, span: Span, line: u32) -> Vec<u8> {
        let mut result = Vec::with_capacity(inner.len());
        let mut errors = Vec::new();
        unescape::unescape_mixed(inner, mode, &mut |_, res| match res {
            Ok(MixedUnit::Char(c)) => {
                let mut buf = [0u8; 4];
                result.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            Ok(MixedUnit::HighByte(b)) => result.push(b),
            Err(e) => {
                if e.is_fatal() {
                    errors.push(e);
                }
            }
        });
        for e in errors {
            self.error(e.to_string(), span, line);
        }
        result
    }

    /// Recover the specific raw-string failure for a `n_hashes: None` token.
    fn raw_str_error(&mut self, text: &str, prefix_len: u32, span: Span, line: u32) {
        let message = match raw::validate_raw_str(text, prefix_len) {
            Err(RawStrError::InvalidStarter { bad_char }) => format!(
                "found invalid character; only `#` is allowed in raw string delimitation: {}",
                bad_char
            ),
            Err(RawStrError::NoTerminator {
                expected, found, ..
            }) => format!(
                "unterminated raw string (expected {} `#` symbols, found {})",
                expected, found
            ),
            Err(RawStrError::TooManyDelimiters { found }) => format!(
                "too many `#` symbols: raw strings may be delimited by up to 255, found {}",
                found
            ),
            Ok(()) => "invalid raw string literal".to_string(),
        };
        self.error(message, span, line);
    }

    /// Get all errors recorded so far.
    pub fn errors(&self) -> &[LexError] {
        &self.errors
    }
}

/// Slice the contents of a raw string literal body: past the prefix, the
/// opening hashes and quote, and before the closing quote and hashes.
fn raw_str_contents(body: &str, prefix_len: usize, n_hashes: u8) -> &str {
    let n = n_hashes as usize;
    let start = prefix_len + n + 1;
    let end = body.len() - n - 1;
    &body[start..end]
}

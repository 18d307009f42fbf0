//! Low-level lexer.
//!
//! This stage is deliberately error-encoding rather than error-reporting:
//! it operates directly on `&str`, produces tokens that are a pair of
//! type-tag and byte length, and stores problems as flags on the token
//! (`terminated = false`, `empty_int = true`, `n_hashes: None`) instead of
//! emitting diagnostics. Turning flags into messages is the cooking stage's
//! job (see [`crate::lexer::Lexer`]).
//!
//! Tokens out of this module are not yet ready for parsing: they still
//! include whitespace and comments, identifiers are not split into keywords,
//! and literal values are undecoded.

use crate::lexer::cursor::{Cursor, EOF_CHAR};
use unicode_properties::UnicodeEmoji;
use unicode_xid::UnicodeXID;

/// Parsed token. It holds no text, only the kind and the byte length; the
/// consumer re-slices the source with cumulative lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub len: u32,
}

impl Token {
    fn new(kind: TokenKind, len: u32) -> Token {
        Token { kind, len }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStyle {
    Outer,
    Inner,
}

/// Common lexeme types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `// comment`, `/// doc`, `//! inner doc`
    LineComment { doc_style: Option<DocStyle> },
    /// `/* comment */`. Block comments nest, so `/* /* */` is unterminated.
    BlockComment {
        doc_style: Option<DocStyle>,
        terminated: bool,
    },
    /// Any run of whitespace characters.
    Whitespace,
    /// An identifier or keyword, e.g. `ident` or `continue`.
    Ident,
    /// An identifier containing emoji or other invalid characters.
    InvalidIdent,
    /// A raw identifier, e.g. `r#loop`.
    RawIdent,
    /// An unknown literal prefix, like `foo#`, `foo'`, `foo"`. Only the
    /// prefix is part of the token, never the separator.
    UnknownPrefix,
    /// An unknown prefix in a lifetime, like `'foo#`.
    UnknownPrefixLifetime,
    /// A raw lifetime, e.g. `'r#foo`.
    RawLifetime,
    /// Reserved guarded-string prefix: `#"` or `##`.
    GuardedStrPrefix,
    /// Literals, e.g. `12u8`, `1.0e-40`, `b"123"`. The suffix is not part of
    /// the kind; `1f32` is an `Int` here.
    Literal { kind: LiteralKind, suffix_start: u32 },
    /// A lifetime, e.g. `'a`. Numeric starts are accepted here and rejected
    /// downstream.
    Lifetime { starts_with_number: bool },

    /// `;`
    Semi,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `(`
    OpenParen,
    /// `)`
    CloseParen,
    /// `{`
    OpenBrace,
    /// `}`
    CloseBrace,
    /// `[`
    OpenBracket,
    /// `]`
    CloseBracket,
    /// `@`
    At,
    /// `#`
    Pound,
    /// `~`
    Tilde,
    /// `?`
    Question,
    /// `:`
    Colon,
    /// `$`
    Dollar,
    /// `=`
    Eq,
    /// `!`
    Bang,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `-`
    Minus,
    /// `&`
    And,
    /// `|`
    Or,
    /// `+`
    Plus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `^`
    Caret,
    /// `%`
    Percent,

    /// Unknown token, not expected by the lexer, e.g. `№`.
    Unknown,
    /// End of input. Emitted exactly once, with length 0.
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    /// `12_u8`, `0o100`, `0b120i99`, `1f32`
    Int { base: Base, empty_int: bool },
    /// `12.34f32`, `1e3`, but not `1f32`
    Float { base: Base, empty_exponent: bool },
    /// `'a'`, `'\\'`, `'''`, `';`
    Char { terminated: bool },
    /// `b'a'`, `b'\\'`, `b'''`, `b';`
    Byte { terminated: bool },
    /// `"abc"`, `"abc`
    Str { terminated: bool },
    /// `b"abc"`, `b"abc`
    ByteStr { terminated: bool },
    /// `c"abc"`, `c"abc`
    CStr { terminated: bool },
    /// `r"abc"`, `r#"abc"#`, `r####"ab"###"c"####`, `r#"a`. `None` indicates
    /// an invalid literal.
    RawStr { n_hashes: Option<u8> },
    /// `br"abc"`, `br#"abc"#`, `br#"a`. `None` indicates an invalid literal.
    RawByteStr { n_hashes: Option<u8> },
    /// `cr"abc"`, `cr#"abc"#`, `cr#"a`. `None` indicates an invalid literal.
    RawCStr { n_hashes: Option<u8> },
}

/// The base of a numeric literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    /// Literal starts with `0b`.
    Binary = 2,
    /// Literal starts with `0o`.
    Octal = 8,
    /// Literal doesn't contain a prefix.
    Decimal = 10,
    /// Literal starts with `0x`.
    Hexadecimal = 16,
}

/// Error produced validating a raw string. The lexer only stores
/// `n_hashes: None` on the token; call [`validate_raw_str`] to recover the
/// specific failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStrError {
    /// Non-`#` characters between `r` and `"`, e.g. `r##~"abcde"##`.
    InvalidStarter { bad_char: char },
    /// The string was never terminated, e.g. `r###"abcde"##`.
    /// `possible_terminator_offset` points at the closest run of closing
    /// hashes, to improve diagnostics.
    NoTerminator {
        expected: u32,
        found: u32,
        possible_terminator_offset: Option<u32>,
    },
    /// More than 255 `#`s exist.
    TooManyDelimiters { found: u32 },
}

/// `rustc`-style shebang handling: a file may start with `#!/usr/bin/env …`,
/// which is not part of the language syntax. A line starting with `#!` is a
/// shebang unless the first meaningful token after it is `[`, in which case
/// it begins an inner attribute. Returns the number of bytes to skip
/// (excluding the newline, which lexes as whitespace).
pub fn strip_shebang(input: &str) -> Option<usize> {
    let input_tail = input.strip_prefix("#!")?;
    let next_non_whitespace_token = tokenize(input_tail).map(|tok| tok.kind).find(|tok| {
        !matches!(
            tok,
            TokenKind::Whitespace
                | TokenKind::LineComment { doc_style: None }
                | TokenKind::BlockComment {
                    doc_style: None,
                    ..
                }
        )
    });
    if next_non_whitespace_token != Some(TokenKind::OpenBracket) {
        // No inner attribute follows, so the first line really is a shebang.
        Some(2 + input_tail.lines().next().unwrap_or_default().len())
    } else {
        None
    }
}

/// Validates a raw string literal. Used for getting more information about a
/// problem with a `RawStr`/`RawByteStr` that has `n_hashes: None`.
pub fn validate_raw_str(input: &str, prefix_len: u32) -> Result<(), RawStrError> {
    debug_assert!(!input.is_empty());
    let mut cursor = Cursor::new(input);
    // Move past the leading `r`, `br`, or `cr`.
    for _ in 0..prefix_len {
        cursor.bump();
    }
    cursor.raw_double_quoted_string(prefix_len).map(|_| ())
}

/// Lexes the first token of `input`.
pub fn first_token(input: &str) -> Token {
    Cursor::new(input).advance_token()
}

/// Creates an iterator that produces tokens from the input string. The
/// iterator is lazy, terminates after yielding `Eof` once, and is not
/// restartable.
pub fn tokenize(input: &str) -> impl Iterator<Item = Token> + '_ {
    let mut cursor = Cursor::new(input);
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let token = cursor.advance_token();
        if token.kind == TokenKind::Eof {
            done = true;
        }
        Some(token)
    })
}

/// True if `c` is whitespace. This is the stable Pattern_White_Space subset;
/// the set is small enough that hard-coding beats a table lookup.
pub fn is_whitespace(c: char) -> bool {
    matches!(
        c,
        '\u{0009}'   // \t
        | '\u{000A}' // \n
        | '\u{000B}' // vertical tab
        | '\u{000C}' // form feed
        | '\u{000D}' // \r
        | '\u{0020}' // space
        | '\u{0085}' // NEXT LINE from latin1
        | '\u{200E}' // LEFT-TO-RIGHT MARK
        | '\u{200F}' // RIGHT-TO-LEFT MARK
        | '\u{2028}' // LINE SEPARATOR
        | '\u{2029}' // PARAGRAPH SEPARATOR
    )
}

/// True if `c` may start an identifier.
pub fn is_id_start(c: char) -> bool {
    c == '_' || c.is_xid_start()
}

/// True if `c` may continue an identifier.
pub fn is_id_continue(c: char) -> bool {
    c.is_xid_continue()
}

/// True if `string` is a lexically valid identifier.
pub fn is_ident(string: &str) -> bool {
    let mut chars = string.chars();
    if let Some(start) = chars.next() {
        is_id_start(start) && chars.all(is_id_continue)
    } else {
        false
    }
}

impl Cursor<'_> {
    /// Parses a token from the input string.
    pub(crate) fn advance_token(&mut self) -> Token {
        let first_char = match self.bump() {
            Some(c) => c,
            None => return Token::new(TokenKind::Eof, 0),
        };
        let token_kind = match first_char {
            // Slash, comment or block comment.
            '/' => match self.first() {
                '/' => self.line_comment(),
                '*' => self.block_comment(),
                _ => TokenKind::Slash,
            },

            c if is_whitespace(c) => self.whitespace(),

            // Raw identifier, raw string literal or identifier.
            'r' => match (self.first(), self.second()) {
                ('#', c1) if is_id_start(c1) => self.raw_ident(),
                ('#', _) | ('"', _) => {
                    let res = self.raw_double_quoted_string(1);
                    let suffix_start = self.pos_within_token();
                    if res.is_ok() {
                        self.eat_literal_suffix();
                    }
                    let kind = LiteralKind::RawStr { n_hashes: res.ok() };
                    TokenKind::Literal { kind, suffix_start }
                }
                _ => self.ident_or_unknown_prefix(),
            },

            // Byte literal, byte string literal, raw byte string literal or
            // identifier.
            'b' => self.c_or_byte_string(
                |terminated| LiteralKind::ByteStr { terminated },
                |n_hashes| LiteralKind::RawByteStr { n_hashes },
                Some(|terminated| LiteralKind::Byte { terminated }),
            ),

            // C string literal, raw C string literal or identifier.
            'c' => self.c_or_byte_string(
                |terminated| LiteralKind::CStr { terminated },
                |n_hashes| LiteralKind::RawCStr { n_hashes },
                None,
            ),

            // Identifier starting with an identifier-start character.
            c if is_id_start(c) => self.ident_or_unknown_prefix(),

            // Numeric literal.
            c @ '0'..='9' => {
                let literal_kind = self.number(c);
                let suffix_start = self.pos_within_token();
                self.eat_literal_suffix();
                TokenKind::Literal {
                    kind: literal_kind,
                    suffix_start,
                }
            }

            // Guarded string literal prefix: `#"` or `##`. Reserved syntax;
            // the contained string lexes as its own token.
            '#' if matches!((self.first(), self.second()), ('"', _) | ('#', '"')) => {
                self.bump();
                TokenKind::GuardedStrPrefix
            }

            // One-symbol tokens.
            ';' => TokenKind::Semi,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '(' => TokenKind::OpenParen,
            ')' => TokenKind::CloseParen,
            '{' => TokenKind::OpenBrace,
            '}' => TokenKind::CloseBrace,
            '[' => TokenKind::OpenBracket,
            ']' => TokenKind::CloseBracket,
            '@' => TokenKind::At,
            '#' => TokenKind::Pound,
            '~' => TokenKind::Tilde,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            '$' => TokenKind::Dollar,
            '=' => TokenKind::Eq,
            '!' => TokenKind::Bang,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '-' => TokenKind::Minus,
            '&' => TokenKind::And,
            '|' => TokenKind::Or,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '^' => TokenKind::Caret,
            '%' => TokenKind::Percent,

            // Lifetime or character literal.
            '\'' => self.lifetime_or_char(),

            // String literal.
            '"' => {
                let terminated = self.double_quoted_string();
                let suffix_start = self.pos_within_token();
                if terminated {
                    self.eat_literal_suffix();
                }
                let kind = LiteralKind::Str { terminated };
                TokenKind::Literal { kind, suffix_start }
            }

            // Identifier starting with an emoji. Only lexed for better
            // error recovery.
            c if !c.is_ascii() && c.is_emoji_char() => self.fake_ident_or_unknown_prefix(),

            _ => TokenKind::Unknown,
        };
        let res = Token::new(token_kind, self.pos_within_token());
        self.reset_pos_within_token();
        res
    }

    fn line_comment(&mut self) -> TokenKind {
        debug_assert!(self.prev() == '/' && self.first() == '/');
        self.bump();

        let doc_style = match self.first() {
            // `//!` is an inner line doc comment.
            '!' => Some(DocStyle::Inner),
            // `////` (more than 3 slashes) is not a doc comment.
            '/' if self.second() != '/' => Some(DocStyle::Outer),
            _ => None,
        };

        self.eat_while(|c| c != '\n');
        TokenKind::LineComment { doc_style }
    }

    fn block_comment(&mut self) -> TokenKind {
        debug_assert!(self.prev() == '/' && self.first() == '*');
        self.bump();

        let doc_style = match self.first() {
            // `/*!` is an inner block doc comment.
            '!' => Some(DocStyle::Inner),
            // `/***` (more than 2 stars) is not a doc comment.
            // `/**/` is not a doc comment.
            '*' if !matches!(self.second(), '*' | '/') => Some(DocStyle::Outer),
            _ => None,
        };

        let mut depth = 1usize;
        while let Some(c) = self.bump() {
            match c {
                '/' if self.first() == '*' => {
                    self.bump();
                    depth += 1;
                }
                '*' if self.first() == '/' => {
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        // Closed; in `/* a */ */` the trailing `*/` lexes as
                        // separate tokens.
                        break;
                    }
                }
                _ => (),
            }
        }

        TokenKind::BlockComment {
            doc_style,
            terminated: depth == 0,
        }
    }

    fn whitespace(&mut self) -> TokenKind {
        debug_assert!(is_whitespace(self.prev()));
        self.eat_while(is_whitespace);
        TokenKind::Whitespace
    }

    fn raw_ident(&mut self) -> TokenKind {
        debug_assert!(self.prev() == 'r' && self.first() == '#' && is_id_start(self.second()));
        // Eat `#`.
        self.bump();
        self.eat_identifier();
        TokenKind::RawIdent
    }

    fn ident_or_unknown_prefix(&mut self) -> TokenKind {
        debug_assert!(is_id_start(self.prev()));
        self.eat_while(is_id_continue);
        // Known prefixes must have been handled earlier. So if we see a
        // prefix here, it is definitely an unknown prefix.
        match self.first() {
            '#' | '"' | '\'' => TokenKind::UnknownPrefix,
            c if !c.is_ascii() && c.is_emoji_char() => self.fake_ident_or_unknown_prefix(),
            _ => TokenKind::Ident,
        }
    }

    fn fake_ident_or_unknown_prefix(&mut self) -> TokenKind {
        // Accept emoji and ZWJ so a whole emoji sequence lands in one token.
        self.eat_while(|c| {
            is_id_continue(c) || (!c.is_ascii() && c.is_emoji_char()) || c == '\u{200d}'
        });
        match self.first() {
            '#' | '"' | '\'' => TokenKind::UnknownPrefix,
            _ => TokenKind::InvalidIdent,
        }
    }

    fn c_or_byte_string(
        &mut self,
        mk_kind: fn(bool) -> LiteralKind,
        mk_kind_raw: fn(Option<u8>) -> LiteralKind,
        single_quoted: Option<fn(bool) -> LiteralKind>,
    ) -> TokenKind {
        match (self.first(), self.second(), single_quoted) {
            ('\'', _, Some(single_quoted)) => {
                self.bump();
                let terminated = self.single_quoted_string();
                let suffix_start = self.pos_within_token();
                if terminated {
                    self.eat_literal_suffix();
                }
                let kind = single_quoted(terminated);
                TokenKind::Literal { kind, suffix_start }
            }
            ('"', _, _) => {
                self.bump();
                let terminated = self.double_quoted_string();
                let suffix_start = self.pos_within_token();
                if terminated {
                    self.eat_literal_suffix();
                }
                let kind = mk_kind(terminated);
                TokenKind::Literal { kind, suffix_start }
            }
            ('r', '"', _) | ('r', '#', _) => {
                self.bump();
                let res = self.raw_double_quoted_string(2);
                let suffix_start = self.pos_within_token();
                if res.is_ok() {
                    self.eat_literal_suffix();
                }
                let kind = mk_kind_raw(res.ok());
                TokenKind::Literal { kind, suffix_start }
            }
            _ => self.ident_or_unknown_prefix(),
        }
    }

    fn number(&mut self, first_digit: char) -> LiteralKind {
        debug_assert!('0' <= self.prev() && self.prev() <= '9');
        let mut base = Base::Decimal;
        if first_digit == '0' {
            // Attempt to parse encoding base.
            match self.first() {
                'b' => {
                    base = Base::Binary;
                    self.bump();
                    if !self.eat_decimal_digits() {
                        return LiteralKind::Int {
                            base,
                            empty_int: true,
                        };
                    }
                }
                'o' => {
                    base = Base::Octal;
                    self.bump();
                    if !self.eat_decimal_digits() {
                        return LiteralKind::Int {
                            base,
                            empty_int: true,
                        };
                    }
                }
                'x' => {
                    base = Base::Hexadecimal;
                    self.bump();
                    if !self.eat_hexadecimal_digits() {
                        return LiteralKind::Int {
                            base,
                            empty_int: true,
                        };
                    }
                }
                // Not a base prefix; consume additional digits.
                '0'..='9' | '_' => {
                    self.eat_decimal_digits();
                }

                // Also not a base prefix; nothing more to do here.
                '.' | 'e' | 'E' => {}

                // Just a 0.
                _ => {
                    return LiteralKind::Int {
                        base,
                        empty_int: false,
                    }
                }
            }
        } else {
            // No base prefix, parse number in the usual way.
            self.eat_decimal_digits();
        }

        match self.first() {
            // Don't be greedy if this is actually an integer literal followed
            // by field/method access or a range pattern (`0.foo`, `0..2`).
            '.' if self.second() != '.' && !is_id_start(self.second()) => {
                // Might have stuff after the `.`, and if it does, it needs to
                // start with a number.
                self.bump();
                let mut empty_exponent = false;
                if self.first().is_ascii_digit() {
                    self.eat_decimal_digits();
                    match self.first() {
                        'e' | 'E' => {
                            self.bump();
                            empty_exponent = !self.eat_float_exponent();
                        }
                        _ => (),
                    }
                }
                LiteralKind::Float {
                    base,
                    empty_exponent,
                }
            }
            'e' | 'E' => {
                self.bump();
                let empty_exponent = !self.eat_float_exponent();
                LiteralKind::Float {
                    base,
                    empty_exponent,
                }
            }
            _ => LiteralKind::Int {
                base,
                empty_int: false,
            },
        }
    }

    fn lifetime_or_char(&mut self) -> TokenKind {
        debug_assert!(self.prev() == '\'');

        let can_be_a_lifetime = if self.second() == '\'' {
            // It's surely not a lifetime.
            false
        } else {
            // If the first symbol is valid for a lifetime, it can be one.
            is_id_start(self.first()) || self.first().is_ascii_digit()
        };

        if !can_be_a_lifetime {
            let terminated = self.single_quoted_string();
            let suffix_start = self.pos_within_token();
            if terminated {
                self.eat_literal_suffix();
            }
            let kind = LiteralKind::Char { terminated };
            return TokenKind::Literal { kind, suffix_start };
        }

        if self.first() == 'r' && self.second() == '#' && is_id_start(self.third()) {
            // Raw lifetime: eat `r#` and the identifier body.
            self.bump();
            self.bump();
            self.eat_while(is_id_continue);
            return TokenKind::RawLifetime;
        }

        // Either a lifetime or a character literal with length greater
        // than 1.
        let starts_with_number = self.first().is_ascii_digit();
        self.bump();
        self.eat_while(is_id_continue);

        match self.first() {
            // Check if after the lifetime there is a quote, e.g. `'a'`:
            // then it is a character literal.
            '\'' => {
                self.bump();
                let kind = LiteralKind::Char { terminated: true };
                TokenKind::Literal {
                    kind,
                    suffix_start: self.pos_within_token(),
                }
            }
            '#' if !starts_with_number => TokenKind::UnknownPrefixLifetime,
            _ => TokenKind::Lifetime { starts_with_number },
        }
    }

    fn single_quoted_string(&mut self) -> bool {
        debug_assert!(self.prev() == '\'');
        // Check if it's a one-symbol literal.
        if self.second() == '\'' && self.first() != '\\' {
            self.bump();
            self.bump();
            return true;
        }

        // Longer than one symbol: scan for the closing quote, giving up at
        // anything that looks like the literal already ended.
        loop {
            match self.first() {
                '\'' => {
                    self.bump();
                    return true;
                }
                // A comment start; leave it out of the broken literal.
                '/' => break,
                // Newline without a following `'` means an unclosed quote.
                '\n' if self.second() != '\'' => break,
                EOF_CHAR if self.is_eof() => break,
                // An escape counts as one unit.
                '\\' => {
                    self.bump();
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
        }
        false
    }

    /// Eats a double-quoted string and returns true if it is terminated.
    fn double_quoted_string(&mut self) -> bool {
        debug_assert!(self.prev() == '"');
        while let Some(c) = self.bump() {
            match c {
                '"' => return true,
                '\\' if self.first() == '\\' || self.first() == '"' => {
                    // Bump again to skip the escaped character.
                    self.bump();
                }
                _ => (),
            }
        }
        // End of file reached.
        false
    }

    /// Eats the raw string and returns `n_hashes` or an error. The whole
    /// literal is consumed even when the hash count is over the limit, so
    /// the token still covers it.
    fn raw_double_quoted_string(&mut self, prefix_len: u32) -> Result<u8, RawStrError> {
        let n_hashes = self.raw_string_unvalidated(prefix_len)?;
        // Delimitation by at most 255 `#`s.
        match u8::try_from(n_hashes) {
            Ok(num) => Ok(num),
            Err(_) => Err(RawStrError::TooManyDelimiters { found: n_hashes }),
        }
    }

    fn raw_string_unvalidated(&mut self, prefix_len: u32) -> Result<u32, RawStrError> {
        debug_assert!(self.prev() == 'r');
        let start_pos = self.pos_within_token();
        let mut possible_terminator_offset = None;
        let mut max_hashes = 0;

        // Count opening `#` symbols.
        let mut eaten = 0;
        while self.first() == '#' {
            eaten += 1;
            self.bump();
        }
        let n_start_hashes = eaten;

        // Check that string is started.
        match self.bump() {
            Some('"') => (),
            c => {
                let c = c.unwrap_or(EOF_CHAR);
                return Err(RawStrError::InvalidStarter { bad_char: c });
            }
        }

        // Skip the string contents and on each `#` character met, check if
        // this is the end of the raw string.
        loop {
            self.eat_while(|c| c != '"');

            if self.is_eof() {
                return Err(RawStrError::NoTerminator {
                    expected: n_start_hashes,
                    found: max_hashes,
                    possible_terminator_offset,
                });
            }

            // Eat closing double quote.
            self.bump();

            // Count closing hashes, capped at the opening count; a longer
            // run just belongs to the literal body.
            let mut n_end_hashes = 0;
            while self.first() == '#' && n_end_hashes < n_start_hashes {
                n_end_hashes += 1;
                self.bump();
            }

            if n_end_hashes == n_start_hashes {
                return Ok(n_start_hashes);
            } else if n_end_hashes > max_hashes {
                // Keep track of the runner-up so the diagnostic can point at
                // the closest near-terminator.
                possible_terminator_offset =
                    Some(self.pos_within_token() - start_pos - n_end_hashes + prefix_len);
                max_hashes = n_end_hashes;
            }
        }
    }

    fn eat_decimal_digits(&mut self) -> bool {
        let mut has_digits = false;
        loop {
            match self.first() {
                '_' => {
                    self.bump();
                }
                '0'..='9' => {
                    has_digits = true;
                    self.bump();
                }
                _ => break,
            }
        }
        has_digits
    }

    fn eat_hexadecimal_digits(&mut self) -> bool {
        let mut has_digits = false;
        loop {
            match self.first() {
                '_' => {
                    self.bump();
                }
                '0'..='9' | 'a'..='f' | 'A'..='F' => {
                    has_digits = true;
                    self.bump();
                }
                _ => break,
            }
        }
        has_digits
    }

    /// Eats the float exponent. Returns true if at least one digit was met,
    /// and returns false otherwise.
    fn eat_float_exponent(&mut self) -> bool {
        debug_assert!(self.prev() == 'e' || self.prev() == 'E');
        if self.first() == '-' || self.first() == '+' {
            self.bump();
        }
        self.eat_decimal_digits()
    }

    // Eats the suffix of the literal, e.g. "u8".
    fn eat_literal_suffix(&mut self) {
        self.eat_identifier();
    }

    // Eats the identifier. Note: succeeds on `_`, which isn't a valid
    // identifier on its own.
    fn eat_identifier(&mut self) {
        if !is_id_start(self.first()) {
            return;
        }
        self.bump();
        self.eat_while(is_id_continue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        tokenize(input).collect()
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex(input).into_iter().map(|t| t.kind).collect()
    }

    /// The first token's kind and length.
    fn first(input: &str) -> (TokenKind, u32) {
        let tok = first_token(input);
        (tok.kind, tok.len)
    }

    #[test]
    fn token_lengths_cover_the_input() {
        for src in [
            "let x = 42;",
            "r###\"raw\"### b'x' 'a' '\\n' \"str\" /* /* nested */ */ 0x_1f",
            "emoji 🦀 and № and unterminated \"str",
            "",
            "\u{2028}\u{200E} \t\r\n",
        ] {
            let tokens = lex(src);
            let total: u32 = tokens.iter().map(|t| t.len).sum();
            assert_eq!(total as usize, src.len(), "length mismatch for {:?}", src);
            assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
            assert_eq!(
                tokens.iter().filter(|t| t.kind == TokenKind::Eof).count(),
                1
            );
            assert!(tokens
                .iter()
                .all(|t| t.len >= 1 || t.kind == TokenKind::Eof));
        }
    }

    #[test]
    fn tokenize_is_deterministic() {
        let src = "let mut x = 0b10; // comment\n'a' r#\"raw\"#";
        assert_eq!(lex(src), lex(src));
    }

    #[test]
    fn smoke_punctuation() {
        assert_eq!(
            kinds("; , . ( ) { } [ ] @ # ~ ? : $ = ! < > - & | + * / ^ %")
                .into_iter()
                .filter(|k| *k != TokenKind::Whitespace && *k != TokenKind::Eof)
                .collect::<Vec<_>>(),
            vec![
                TokenKind::Semi,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::OpenParen,
                TokenKind::CloseParen,
                TokenKind::OpenBrace,
                TokenKind::CloseBrace,
                TokenKind::OpenBracket,
                TokenKind::CloseBracket,
                TokenKind::At,
                TokenKind::Pound,
                TokenKind::Tilde,
                TokenKind::Question,
                TokenKind::Colon,
                TokenKind::Dollar,
                TokenKind::Eq,
                TokenKind::Bang,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Minus,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Plus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Caret,
                TokenKind::Percent,
            ]
        );
    }

    #[test]
    fn line_comments_and_doc_styles() {
        assert_eq!(
            first("// plain"),
            (TokenKind::LineComment { doc_style: None }, 8)
        );
        assert_eq!(
            first("/// outer doc").0,
            TokenKind::LineComment {
                doc_style: Some(DocStyle::Outer)
            }
        );
        assert_eq!(
            first("//! inner doc").0,
            TokenKind::LineComment {
                doc_style: Some(DocStyle::Inner)
            }
        );
        // Four or more slashes is not a doc comment.
        assert_eq!(
            first("//// nope").0,
            TokenKind::LineComment { doc_style: None }
        );
        // The newline is not part of the comment.
        assert_eq!(first("//x\ny").1, 3);
    }

    #[test]
    fn block_comments_nest() {
        assert_eq!(
            first("/* a /* b */ c */").0,
            TokenKind::BlockComment {
                doc_style: None,
                terminated: true
            }
        );
        assert_eq!(
            first("/* open /* still open */").0,
            TokenKind::BlockComment {
                doc_style: None,
                terminated: false
            }
        );
        assert_eq!(
            first("/** doc */").0,
            TokenKind::BlockComment {
                doc_style: Some(DocStyle::Outer),
                terminated: true
            }
        );
        assert_eq!(
            first("/*! inner */").0,
            TokenKind::BlockComment {
                doc_style: Some(DocStyle::Inner),
                terminated: true
            }
        );
        // `/**/` is an ordinary empty comment, not a doc comment.
        assert_eq!(
            first("/**/").0,
            TokenKind::BlockComment {
                doc_style: None,
                terminated: true
            }
        );
    }

    #[test]
    fn numeric_base_flags() {
        for (src, base) in [
            ("0b", Base::Binary),
            ("0o", Base::Octal),
            ("0x", Base::Hexadecimal),
        ] {
            assert_eq!(
                first(src).0,
                TokenKind::Literal {
                    kind: LiteralKind::Int {
                        base,
                        empty_int: true
                    },
                    suffix_start: 2
                },
                "for {:?}",
                src
            );
        }
        for (src, base) in [
            ("0b1010", Base::Binary),
            ("0o77", Base::Octal),
            ("0xFF", Base::Hexadecimal),
            ("1_000", Base::Decimal),
        ] {
            match first(src).0 {
                TokenKind::Literal {
                    kind: LiteralKind::Int {
                        base: b,
                        empty_int,
                    },
                    ..
                } => {
                    assert_eq!(b, base);
                    assert!(!empty_int);
                }
                other => panic!("expected int for {:?}, got {:?}", src, other),
            }
        }
    }

    #[test]
    fn floats_and_near_floats() {
        assert_eq!(
            first("3.14").0,
            TokenKind::Literal {
                kind: LiteralKind::Float {
                    base: Base::Decimal,
                    empty_exponent: false
                },
                suffix_start: 4
            }
        );
        assert!(matches!(
            first("1e10").0,
            TokenKind::Literal {
                kind: LiteralKind::Float {
                    empty_exponent: false,
                    ..
                },
                ..
            }
        ));
        assert!(matches!(
            first("2.5e-3").0,
            TokenKind::Literal {
                kind: LiteralKind::Float {
                    empty_exponent: false,
                    ..
                },
                ..
            }
        ));
        assert!(matches!(
            first("5e").0,
            TokenKind::Literal {
                kind: LiteralKind::Float {
                    empty_exponent: true,
                    ..
                },
                ..
            }
        ));
        // Method call and range patterns must not be eaten as floats.
        assert_eq!(
            kinds("1.foo")[..2],
            [
                TokenKind::Literal {
                    kind: LiteralKind::Int {
                        base: Base::Decimal,
                        empty_int: false
                    },
                    suffix_start: 1
                },
                TokenKind::Dot,
            ]
        );
        assert_eq!(
            kinds("0..2")[..2],
            [
                TokenKind::Literal {
                    kind: LiteralKind::Int {
                        base: Base::Decimal,
                        empty_int: false
                    },
                    suffix_start: 1
                },
                TokenKind::Dot,
            ]
        );
    }

    #[test]
    fn literal_suffixes() {
        match first("42u8").0 {
            TokenKind::Literal { suffix_start, .. } => assert_eq!(suffix_start, 2),
            other => panic!("unexpected {:?}", other),
        }
        match first("1.0f64").0 {
            TokenKind::Literal { suffix_start, .. } => assert_eq!(suffix_start, 3),
            other => panic!("unexpected {:?}", other),
        }
        // Suffix is part of the token.
        assert_eq!(first("42u8").1, 4);
    }

    #[test]
    fn strings_terminated_and_not() {
        assert_eq!(
            first("\"hi\"").0,
            TokenKind::Literal {
                kind: LiteralKind::Str { terminated: true },
                suffix_start: 4
            }
        );
        assert!(matches!(
            first("\"escaped \\\" quote\"").0,
            TokenKind::Literal {
                kind: LiteralKind::Str { terminated: true },
                ..
            }
        ));
        assert!(matches!(
            first("\"runs off the end").0,
            TokenKind::Literal {
                kind: LiteralKind::Str { terminated: false },
                ..
            }
        ));
        // An escaped backslash does not hide a closing quote.
        assert!(matches!(
            first(r#""a\\""#).0,
            TokenKind::Literal {
                kind: LiteralKind::Str { terminated: true },
                ..
            }
        ));
    }

    #[test]
    fn raw_strings_round_trip_hashes() {
        for n in [0usize, 1, 3, 255] {
            let hashes = "#".repeat(n);
            let src = format!("r{h}\"body\"{h}", h = hashes);
            match first(&src).0 {
                TokenKind::Literal {
                    kind: LiteralKind::RawStr { n_hashes },
                    ..
                } => assert_eq!(n_hashes, Some(n as u8), "for n = {}", n),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn raw_string_error_cases() {
        // No quote after the hashes.
        assert_eq!(
            validate_raw_str("r##~\"x\"##", 1),
            Err(RawStrError::InvalidStarter { bad_char: '~' })
        );
        // Fewer closing hashes than opening ones.
        assert_eq!(
            validate_raw_str("r###\"abc\"##", 1),
            Err(RawStrError::NoTerminator {
                expected: 3,
                found: 2,
                possible_terminator_offset: Some(9),
            })
        );
        // More than 255 hashes.
        let too_many = format!("r{}\"x\"{}", "#".repeat(256), "#".repeat(256));
        assert!(matches!(
            validate_raw_str(&too_many, 1),
            Err(RawStrError::TooManyDelimiters { found: 256 })
        ));
        // The flagged token still covers the whole input.
        match first(&too_many).0 {
            TokenKind::Literal {
                kind: LiteralKind::RawStr { n_hashes: None },
                ..
            } => (),
            other => panic!("unexpected {:?}", other),
        }
        assert!(validate_raw_str("r#\"fine\"#", 1).is_ok());
    }

    #[test]
    fn byte_and_c_string_prefixes() {
        assert!(matches!(
            first("b'a'").0,
            TokenKind::Literal {
                kind: LiteralKind::Byte { terminated: true },
                ..
            }
        ));
        assert!(matches!(
            first("b\"bytes\"").0,
            TokenKind::Literal {
                kind: LiteralKind::ByteStr { terminated: true },
                ..
            }
        ));
        assert!(matches!(
            first("br#\"raw bytes\"#").0,
            TokenKind::Literal {
                kind: LiteralKind::RawByteStr {
                    n_hashes: Some(1)
                },
                ..
            }
        ));
        assert!(matches!(
            first("c\"cstr\"").0,
            TokenKind::Literal {
                kind: LiteralKind::CStr { terminated: true },
                ..
            }
        ));
        assert!(matches!(
            first("cr\"raw c\"").0,
            TokenKind::Literal {
                kind: LiteralKind::RawCStr {
                    n_hashes: Some(0)
                },
                ..
            }
        ));
        // `c'x'` is not a char prefix; it lexes as an identifier-ish prefix.
        assert_eq!(first("c'x'").0, TokenKind::UnknownPrefix);
        // A bare `b` or `c` is an ordinary identifier.
        assert_eq!(first("b ").0, TokenKind::Ident);
        assert_eq!(first("c ").0, TokenKind::Ident);
    }

    #[test]
    fn lifetimes_and_chars() {
        assert_eq!(
            first("'a'").0,
            TokenKind::Literal {
                kind: LiteralKind::Char { terminated: true },
                suffix_start: 3
            }
        );
        assert_eq!(
            first("'a ").0,
            TokenKind::Lifetime {
                starts_with_number: false
            }
        );
        assert_eq!(
            first("'static ").0,
            TokenKind::Lifetime {
                starts_with_number: false
            }
        );
        assert_eq!(
            first("'1 ").0,
            TokenKind::Lifetime {
                starts_with_number: true
            }
        );
        assert_eq!(first("'r#foo ").0, TokenKind::RawLifetime);
        assert_eq!(first("'foo# ").0, TokenKind::UnknownPrefixLifetime);
        assert!(matches!(
            first("'\\n'").0,
            TokenKind::Literal {
                kind: LiteralKind::Char { terminated: true },
                ..
            }
        ));
        assert!(matches!(
            first("'unterminated").0,
            TokenKind::Lifetime { .. }
        ));
        assert!(matches!(
            first("' ").0,
            TokenKind::Literal {
                kind: LiteralKind::Char { terminated: false },
                ..
            }
        ));
    }

    #[test]
    fn identifiers_and_prefixes() {
        assert_eq!(first("plain_ident ").0, TokenKind::Ident);
        assert_eq!(first("_ ").0, TokenKind::Ident);
        assert_eq!(first("r#loop ").0, TokenKind::RawIdent);
        // Identifier glued to a quote or hash reserves a future prefix.
        assert_eq!(first("foo\"bar\"").0, TokenKind::UnknownPrefix);
        assert_eq!(first("foo#bar").0, TokenKind::UnknownPrefix);
        // Emoji are invalid identifiers, not Unknown.
        assert_eq!(first("🦀 ").0, TokenKind::InvalidIdent);
        assert_eq!(first("f🦀o ").0, TokenKind::InvalidIdent);
        assert_eq!(first("№").0, TokenKind::Unknown);
    }

    #[test]
    fn guarded_string_prefix_is_reserved() {
        assert_eq!(first("#\"guarded\"").0, TokenKind::GuardedStrPrefix);
        assert_eq!(first("#\"guarded\"").1, 2);
        assert_eq!(first("##\"guarded\"##").0, TokenKind::GuardedStrPrefix);
        // A lone `#` is still a Pound.
        assert_eq!(first("# ").0, TokenKind::Pound);
        assert_eq!(first("#!").0, TokenKind::Pound);
    }

    #[test]
    fn shebang_gating() {
        assert_eq!(strip_shebang("#!/bin/x\nlet y = 1;"), Some(8));
        // No trailing newline.
        assert_eq!(strip_shebang("#!/bin/x"), Some(8));
        // An inner attribute is not a shebang.
        assert_eq!(strip_shebang("#![allow(dead_code)]\nfoo"), None);
        // Comments and whitespace between `#!` and `[` don't break the
        // attribute reading.
        assert_eq!(strip_shebang("#!  /* hm */ [allow]"), None);
        // But a doc comment does.
        assert!(strip_shebang("#! //! doc\n[allow]").is_some());
        assert_eq!(strip_shebang("plain text"), None);
    }

    #[test]
    fn whitespace_set_is_exact() {
        for c in ['\t', '\n', '\u{000B}', '\u{000C}', '\r', ' ', '\u{0085}', '\u{200E}',
            '\u{200F}', '\u{2028}', '\u{2029}']
        {
            assert!(is_whitespace(c), "{:?} should be whitespace", c);
        }
        assert!(!is_whitespace('\u{00A0}')); // NBSP is not in the set
    }

    #[test]
    fn totality_on_arbitrary_bytes() {
        // Every char sequence must lex to a finite Eof-terminated stream.
        let nasty = "\u{0}\u{1}\\\\''\"r#br#cr#'r#1..e0x#!#\"##\u{200d}🦀№";
        let tokens = lex(nasty);
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
        let total: u32 = tokens.iter().map(|t| t.len).sum();
        assert_eq!(total as usize, nasty.len());
    }
}

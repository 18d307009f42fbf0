//! Binary AST persistence.
//!
//! A little-endian codec over in-memory buffers. Strings are written as a
//! `u64` length, the raw bytes, and a trailing sentinel byte `0xC1`, a value
//! that cannot occur in any valid UTF-8 sequence. A missing sentinel
//! reliably signals a desynchronised decode without re-validating the
//! string.
//!
//! Encoding is infallible (the buffer is in memory); decoding returns typed
//! errors. None of this is on the compile critical path.

use thiserror::Error;

use crate::borrowck::BorrowKind;
use crate::lexer::Span;
use crate::parser::ast::{BinOp, BorrowAnnotation, Expr, ExprArena, ExprId, ExprKind};
use crate::parser::ParsedProgram;

/// A byte that cannot occur in UTF-8. Marks the end of an encoded string.
pub const STR_SENTINEL: u8 = 0xC1;

/// Magic prefix of an encoded program.
const MAGIC: &[u8; 4] = b"EMB0";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),
    #[error("missing string sentinel at byte {0}")]
    MissingSentinel(usize),
    #[error("invalid UTF-8 in string at byte {0}")]
    InvalidUtf8(usize),
    #[error("not an encoded program (bad magic)")]
    BadMagic,
    #[error("unknown tag {tag} at byte {pos}")]
    UnknownTag { tag: u8, pos: usize },
    #[error("node index {0} out of range")]
    BadIndex(u32),
}

/// Little-endian encoder into a growable buffer.
#[derive(Debug, Default)]
pub struct MemEncoder {
    data: Vec<u8>,
}

impl MemEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.data.len()
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }

    pub fn emit_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn emit_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_usize(&mut self, v: usize) {
        self.emit_u64(v as u64);
    }

    pub fn emit_i64(&mut self, v: i64) {
        self.emit_u64(v as u64);
    }

    pub fn emit_bool(&mut self, v: bool) {
        self.emit_u8(v as u8);
    }

    pub fn emit_raw_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn emit_str(&mut self, s: &str) {
        self.emit_u64(s.len() as u64);
        self.emit_raw_bytes(s.as_bytes());
        self.emit_u8(STR_SENTINEL);
    }
}

/// Little-endian decoder over a borrowed buffer.
#[derive(Debug)]
pub struct MemDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MemDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_usize(&mut self) -> Result<usize, DecodeError> {
        Ok(self.read_u64()? as usize)
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_raw_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(len)
    }

    pub fn read_str(&mut self) -> Result<&'a str, DecodeError> {
        let len = self.read_usize()?;
        let start = self.pos;
        let bytes = self.take(len + 1)?;
        if bytes[len] != STR_SENTINEL {
            return Err(DecodeError::MissingSentinel(start + len));
        }
        std::str::from_utf8(&bytes[..len]).map_err(|_| DecodeError::InvalidUtf8(start))
    }
}

// Node tags.
const TAG_INT: u8 = 0;
const TAG_VAR: u8 = 1;
const TAG_LET: u8 = 2;
const TAG_BINARY: u8 = 3;
const TAG_CALL: u8 = 4;
const TAG_BLOCK: u8 = 5;

/// Encode a parsed program: arena nodes in allocation order, then the
/// top-level expression ids. Children always precede parents in the arena,
/// so decoding can validate every child index against what it has built.
pub fn encode_program(program: &ParsedProgram) -> Vec<u8> {
    let mut e = MemEncoder::new();
    e.emit_raw_bytes(MAGIC);
    e.emit_usize(program.arena.len());
    for (_, expr) in program.arena.iter() {
        encode_expr(&mut e, expr);
    }
    e.emit_usize(program.exprs.len());
    for id in &program.exprs {
        e.emit_u32(id.raw());
    }
    e.finish()
}

fn encode_expr(e: &mut MemEncoder, expr: &Expr) {
    match &expr.kind {
        ExprKind::Int(value) => {
            e.emit_u8(TAG_INT);
            e.emit_i64(*value);
        }
        ExprKind::Var(name) => {
            e.emit_u8(TAG_VAR);
            e.emit_str(name);
        }
        ExprKind::Let { name, is_mut, init } => {
            e.emit_u8(TAG_LET);
            e.emit_str(name);
            e.emit_bool(*is_mut);
            e.emit_u32(init.raw());
        }
        ExprKind::Binary { op, lhs, rhs } => {
            e.emit_u8(TAG_BINARY);
            e.emit_u8(*op as u8);
            e.emit_u32(lhs.raw());
            e.emit_u32(rhs.raw());
        }
        ExprKind::Call { callee, args } => {
            e.emit_u8(TAG_CALL);
            e.emit_u32(callee.raw());
            e.emit_usize(args.len());
            for arg in args {
                e.emit_u32(arg.raw());
            }
        }
        ExprKind::Block(exprs) => {
            e.emit_u8(TAG_BLOCK);
            e.emit_usize(exprs.len());
            for expr in exprs {
                e.emit_u32(expr.raw());
            }
        }
    }

    e.emit_u32(expr.span.start);
    e.emit_u32(expr.span.end);
    e.emit_u32(expr.line);
    e.emit_u32(expr.col);

    match expr.borrow {
        None => e.emit_bool(false),
        Some(annotation) => {
            e.emit_bool(true);
            e.emit_u8(annotation.kind as u8);
            e.emit_u32(annotation.scope_id);
        }
    }
}

/// Decode a program encoded with [`encode_program`].
pub fn decode_program(data: &[u8]) -> Result<ParsedProgram, DecodeError> {
    let mut d = MemDecoder::new(data);
    if d.read_raw_bytes(4)? != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let node_count = d.read_usize()?;
    let mut arena = ExprArena::new();
    for _ in 0..node_count {
        let expr = decode_expr(&mut d, &arena)?;
        arena.alloc(expr);
    }

    let root_count = d.read_usize()?;
    let mut exprs = Vec::with_capacity(root_count);
    for _ in 0..root_count {
        exprs.push(read_id(&mut d, &arena)?);
    }
    let root = *exprs.last().ok_or(DecodeError::UnexpectedEof(d.position()))?;

    Ok(ParsedProgram { arena, exprs, root })
}

fn read_id(d: &mut MemDecoder<'_>, arena: &ExprArena) -> Result<ExprId, DecodeError> {
    let raw = d.read_u32()?;
    arena.id_from_raw(raw).ok_or(DecodeError::BadIndex(raw))
}

fn decode_expr(d: &mut MemDecoder<'_>, arena: &ExprArena) -> Result<Expr, DecodeError> {
    let pos = d.position();
    let tag = d.read_u8()?;
    let kind = match tag {
        TAG_INT => ExprKind::Int(d.read_i64()?),
        TAG_VAR => ExprKind::Var(d.read_str()?.to_string()),
        TAG_LET => {
            let name = d.read_str()?.to_string();
            let is_mut = d.read_bool()?;
            let init = read_id(d, arena)?;
            ExprKind::Let { name, is_mut, init }
        }
        TAG_BINARY => {
            let op = decode_bin_op(d)?;
            let lhs = read_id(d, arena)?;
            let rhs = read_id(d, arena)?;
            ExprKind::Binary { op, lhs, rhs }
        }
        TAG_CALL => {
            let callee = read_id(d, arena)?;
            let count = d.read_usize()?;
            let mut args = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                args.push(read_id(d, arena)?);
            }
            ExprKind::Call { callee, args }
        }
        TAG_BLOCK => {
            let count = d.read_usize()?;
            let mut exprs = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                exprs.push(read_id(d, arena)?);
            }
            ExprKind::Block(exprs)
        }
        tag => return Err(DecodeError::UnknownTag { tag, pos }),
    };

    let start = d.read_u32()?;
    let end = d.read_u32()?;
    let line = d.read_u32()?;
    let col = d.read_u32()?;

    let mut expr = Expr::new(kind, Span::new(start, end), line, col);
    if d.read_bool()? {
        let kind = decode_borrow_kind(d)?;
        let scope_id = d.read_u32()?;
        expr.borrow = Some(BorrowAnnotation { kind, scope_id });
    }
    Ok(expr)
}

fn decode_bin_op(d: &mut MemDecoder<'_>) -> Result<BinOp, DecodeError> {
    let pos = d.position();
    match d.read_u8()? {
        0 => Ok(BinOp::Add),
        1 => Ok(BinOp::Sub),
        2 => Ok(BinOp::Mul),
        3 => Ok(BinOp::Div),
        tag => Err(DecodeError::UnknownTag { tag, pos }),
    }
}

fn decode_borrow_kind(d: &mut MemDecoder<'_>) -> Result<BorrowKind, DecodeError> {
    let pos = d.position();
    match d.read_u8()? {
        0 => Ok(BorrowKind::Shared),
        1 => Ok(BorrowKind::Mutable),
        2 => Ok(BorrowKind::Move),
        tag => Err(DecodeError::UnknownTag { tag, pos }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::{ast, Parser};

    fn parse(source: &str) -> ParsedProgram {
        let (tokens, errors) = Lexer::tokenize(source);
        assert!(errors.is_empty());
        Parser::new(tokens).parse().expect("parse failed")
    }

    #[test]
    fn primitives_round_trip_little_endian() {
        let mut e = MemEncoder::new();
        e.emit_u8(0xAB);
        e.emit_u16(0x1234);
        e.emit_u32(0xDEADBEEF);
        e.emit_u64(0x0102030405060708);
        e.emit_i64(-42);
        e.emit_bool(true);
        let data = e.finish();

        // u16 is little-endian on the wire.
        assert_eq!(&data[1..3], &[0x34, 0x12]);

        let mut d = MemDecoder::new(&data);
        assert_eq!(d.read_u8().unwrap(), 0xAB);
        assert_eq!(d.read_u16().unwrap(), 0x1234);
        assert_eq!(d.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(d.read_u64().unwrap(), 0x0102030405060708);
        assert_eq!(d.read_i64().unwrap(), -42);
        assert!(d.read_bool().unwrap());
        assert_eq!(d.position(), data.len());
    }

    #[test]
    fn strings_carry_the_sentinel() {
        let mut e = MemEncoder::new();
        e.emit_str("héllo");
        let data = e.finish();
        assert_eq!(*data.last().unwrap(), STR_SENTINEL);

        let mut d = MemDecoder::new(&data);
        assert_eq!(d.read_str().unwrap(), "héllo");
    }

    #[test]
    fn corrupted_sentinel_is_detected() {
        let mut e = MemEncoder::new();
        e.emit_str("abc");
        let mut data = e.finish();
        let last = data.len() - 1;
        data[last] = b'x';

        let mut d = MemDecoder::new(&data);
        assert!(matches!(
            d.read_str(),
            Err(DecodeError::MissingSentinel(_))
        ));
    }

    #[test]
    fn truncated_input_is_detected() {
        let mut d = MemDecoder::new(&[0x01, 0x02]);
        assert_eq!(d.read_u64(), Err(DecodeError::UnexpectedEof(0)));
    }

    #[test]
    fn programs_round_trip() {
        for source in [
            "let x = 42;",
            "let x = 40; let y = 2; x + y",
            "let mut v = 1; push(&mut v, len(v))",
            "let a = 1; { let b = &a; b }; a",
            "let a = 1; let b = a;",
        ] {
            let program = parse(source);
            let encoded = encode_program(&program);
            let decoded = decode_program(&encoded).expect("decode failed");
            assert_eq!(
                ast::dump(&program.arena, program.root),
                ast::dump(&decoded.arena, decoded.root),
                "round trip mismatch for {:?}",
                source
            );
            assert_eq!(program.exprs.len(), decoded.exprs.len());
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(decode_program(b"nope"), Err(DecodeError::BadMagic)));
    }

    #[test]
    fn forward_child_references_are_rejected() {
        // A single Let node whose init points at itself (index 0) is
        // invalid: children must precede parents.
        let mut e = MemEncoder::new();
        e.emit_raw_bytes(MAGIC);
        e.emit_usize(1);
        e.emit_u8(2); // let
        e.emit_str("x");
        e.emit_bool(false);
        e.emit_u32(0); // init index: not yet allocated
        let data = e.finish();
        assert!(matches!(
            decode_program(&data),
            Err(DecodeError::BadIndex(0))
        ));
    }
}

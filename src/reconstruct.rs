//! Object reconstruction from pickle byte streams
//!
//! `/deserialize` delegates here through [`ObjectReconstructor`] so the decoding
//! policy can be swapped without touching the router.

use serde_pickle::{DeOptions, HashableValue, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use crate::config::DeserializeMode;

/// Most container-building opcodes accepted in one stream.
///
/// Nesting depth of the decoded value never exceeds this count, which keeps
/// decoding, `repr` and drop within a worker thread's stack.
pub const MAX_CONTAINERS: usize = 128;

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("deserialization failed: {0}")]
    Decode(#[from] serde_pickle::Error),

    #[error("deserialization failed: more than {0} nested containers")]
    TooManyContainers(usize),
}

/// Rebuilds an in-memory value from serialized bytes
pub trait ObjectReconstructor: Send + Sync {
    fn reconstruct(&self, bytes: &[u8]) -> Result<Value, ReconstructError>;
}

/// Accepts any pickle stream; class and function references that cannot be
/// resolved are replaced with `None` instead of being refused
#[derive(Debug, Default, Clone, Copy)]
pub struct UnrestrictedPickle;

impl ObjectReconstructor for UnrestrictedPickle {
    fn reconstruct(&self, bytes: &[u8]) -> Result<Value, ReconstructError> {
        let opts = DeOptions::new()
            .decode_strings()
            .replace_unresolved_globals()
            .replace_recursive_structures();
        check_containers(bytes)?;
        Ok(serde_pickle::value_from_slice(bytes, opts)?)
    }
}

/// Rejects streams that reference globals
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictPickle;

impl ObjectReconstructor for StrictPickle {
    fn reconstruct(&self, bytes: &[u8]) -> Result<Value, ReconstructError> {
        check_containers(bytes)?;
        Ok(serde_pickle::value_from_slice(bytes, DeOptions::new())?)
    }
}

/// Walk the opcode stream and refuse it once it builds more than
/// [`MAX_CONTAINERS`] containers.
///
/// Malformed streams pass; the decoder reports them.
fn check_containers(bytes: &[u8]) -> Result<(), ReconstructError> {
    let mut containers = 0usize;
    let mut rest = bytes;
    while let Some((&op, tail)) = rest.split_first() {
        if creates_container(op) {
            containers += 1;
            if containers > MAX_CONTAINERS {
                return Err(ReconstructError::TooManyContainers(MAX_CONTAINERS));
            }
        }
        // STOP, unknown opcode or truncated argument
        let Some(next) = skip_argument(op, tail) else {
            return Ok(());
        };
        rest = next;
    }
    Ok(())
}

const fn creates_container(op: u8) -> bool {
    matches!(
        op,
        b']' | b'}' | b')' | b'l' | b't' | b'd' | b'R' | b'o' | b'i' | 0x81 | 0x85..=0x87 | 0x8f | 0x91 | 0x92
    )
}

/// Input following the argument of `op`
fn skip_argument(op: u8, tail: &[u8]) -> Option<&[u8]> {
    match op {
        b'(' | b'0' | b'1' | b'2' | b'N' | b'Q' | b'R' | b'a' | b'b' | b'd' | b'}' | b'e'
        | b'l' | b']' | b'o' | b's' | b't' | b')' | b'u' | 0x81 | 0x85..=0x89 | 0x8f..=0x94
        | 0x97 | 0x98 => Some(tail),
        b'F' | b'I' | b'L' | b'P' | b'S' | b'V' | b'g' | b'p' => skip_lines(tail, 1),
        b'c' | b'i' => skip_lines(tail, 2),
        b'K' | b'h' | b'q' | 0x80 | 0x82 => tail.get(1..),
        b'M' | 0x83 => tail.get(2..),
        b'J' | b'j' | b'r' | 0x84 => tail.get(4..),
        b'G' | 0x95 => tail.get(8..),
        b'U' | b'C' | 0x8a | 0x8c => skip_prefixed(tail, 1),
        b'T' | b'X' | b'B' | 0x8b => skip_prefixed(tail, 4),
        0x8d | 0x8e | 0x96 => skip_prefixed(tail, 8),
        _ => None,
    }
}

fn skip_lines(mut tail: &[u8], lines: usize) -> Option<&[u8]> {
    for _ in 0..lines {
        let end = tail.iter().position(|&b| b == b'\n')?;
        tail = &tail[end + 1..];
    }
    Some(tail)
}

/// Skip a little-endian length prefix of `width` bytes and the data it counts
fn skip_prefixed(tail: &[u8], width: usize) -> Option<&[u8]> {
    if tail.len() < width {
        return None;
    }
    let (prefix, data) = tail.split_at(width);
    let mut len = [0u8; 8];
    len[..width].copy_from_slice(prefix);
    let len = usize::try_from(u64::from_le_bytes(len)).ok()?;
    data.get(len..)
}

pub fn from_mode(mode: DeserializeMode) -> Arc<dyn ObjectReconstructor> {
    match mode {
        DeserializeMode::Unrestricted => Arc::new(UnrestrictedPickle),
        DeserializeMode::Strict => Arc::new(StrictPickle),
    }
}

/// Python-style `repr` of a reconstructed value
pub fn repr(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(b) => out.push_str(if *b { "True" } else { "False" }),
        Value::I64(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Value::F64(f) => write_float(out, *f),
        Value::Bytes(b) => write_bytes(out, b),
        Value::String(s) => write_str(out, s),
        Value::List(items) => write_seq(out, "[", "]", items.iter(), write_value),
        Value::Tuple(items) => write_tuple(out, items.len(), items.iter(), write_value),
        Value::Set(items) => write_set(out, "", items.iter()),
        Value::FrozenSet(items) => write_set(out, "frozenset", items.iter()),
        Value::Dict(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_hashable(out, k);
                out.push_str(": ");
                write_value(out, v);
            }
            out.push('}');
        }
    }
}

fn write_hashable(out: &mut String, value: &HashableValue) {
    match value {
        HashableValue::None => out.push_str("None"),
        HashableValue::Bool(b) => out.push_str(if *b { "True" } else { "False" }),
        HashableValue::I64(n) => {
            let _ = write!(out, "{n}");
        }
        HashableValue::Int(n) => {
            let _ = write!(out, "{n}");
        }
        HashableValue::F64(f) => write_float(out, *f),
        HashableValue::Bytes(b) => write_bytes(out, b),
        HashableValue::String(s) => write_str(out, s),
        HashableValue::Tuple(items) => write_tuple(out, items.len(), items.iter(), write_hashable),
        HashableValue::FrozenSet(items) => write_set(out, "frozenset", items.iter()),
    }
}

fn write_seq<'a, T: 'a>(
    out: &mut String,
    open: &str,
    close: &str,
    items: impl Iterator<Item = &'a T>,
    write_item: fn(&mut String, &T),
) {
    out.push_str(open);
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_item(out, item);
    }
    out.push_str(close);
}

fn write_tuple<'a, T: 'a>(
    out: &mut String,
    len: usize,
    items: impl Iterator<Item = &'a T>,
    write_item: fn(&mut String, &T),
) {
    // one-element tuples keep their trailing comma
    let close = if len == 1 { ",)" } else { ")" };
    write_seq(out, "(", close, items, write_item);
}

fn write_set<'a>(out: &mut String, name: &str, items: impl ExactSizeIterator<Item = &'a HashableValue>) {
    if items.len() == 0 {
        let _ = write!(out, "{}()", if name.is_empty() { "set" } else { name });
        return;
    }
    out.push_str(name);
    if !name.is_empty() {
        out.push('(');
    }
    write_seq(out, "{", "}", items, write_hashable);
    if !name.is_empty() {
        out.push(')');
    }
}

fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("nan");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "inf" } else { "-inf" });
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        let _ = write!(out, "{f:.1}");
    } else {
        let _ = write!(out, "{f}");
    }
}

fn write_str(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

fn write_bytes(out: &mut String, bytes: &[u8]) {
    out.push_str("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(char::from(b)),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('\'');
}

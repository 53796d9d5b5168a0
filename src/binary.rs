//! Binary serialization of a finished compilation (`.dxb`).
//!
//! Layout, all little-endian:
//!
//! - Magic `"DNX"`, a version byte, and a flags byte
//!   (`bit0` compressed, `bit1` shuffle, `bit2` internal translation file).
//! - `u32` payload size, then the payload (zlib-compressed iff `bit0`).
//! - Payload fields in order: scene table, function table, definition
//!   table, instruction stream, internal string table, internal
//!   translation table.
//!
//! Scene/function entries are a `u32` symbol string id, a `u32` count and
//! that many `u32` instruction indices (`-1` encodes as `0xFFFFFFFF`).
//! Definition entries are symbol id, value (high bit set means the low
//! bits are a string id, otherwise the value is the immediate translation
//! index) and a body entry index. Jump arguments are already relative, so
//! instructions serialize exactly as carried.

use std::io::Write as _;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::context::{CompileContext, DefinitionValue};
use crate::instruction::{Arg, Instruction};

/// Current format version.
pub const VERSION: u8 = 0;

const FLAG_COMPRESSED: u8 = 1 << 0;
const FLAG_INTERNAL_TRANSLATION: u8 = 1 << 2;

/// A growable little-endian byte sink.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        BinaryWriter::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// NUL-terminated UTF-8 string.
    pub fn write_cstr(&mut self, value: &str) {
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    /// `u32` length-prefixed UTF-8 string.
    pub fn write_len_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }
}

/// Serialization failure (compression is the only fallible step).
#[derive(Debug)]
pub struct BinaryError {
    pub message: String,
}

impl std::fmt::Display for BinaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BinaryError {}

fn write_instruction(w: &mut BinaryWriter, instr: &Instruction) {
    w.write_u8(instr.opcode as u8);
    match &instr.arg {
        Arg::None => {}
        Arg::Int(a) => w.write_i32(*a),
        Arg::Two(a, b) => {
            w.write_i32(*a);
            w.write_i32(*b);
        }
        Arg::Double(d) => w.write_f64(*d),
        Arg::Call {
            arg_count,
            candidates,
        } => {
            w.write_u32(*arg_count);
            w.write_u32(candidates.len() as u32);
            for candidate in candidates {
                w.write_len_str(candidate);
            }
        }
    }
}

/// Serializes the whole program. Interns symbol names into the string
/// table on the way, which is why the context is mutable.
pub fn write_program(ctx: &mut CompileContext) -> Result<Vec<u8>, BinaryError> {
    let compressed = ctx.project.options.compression;
    let internal_translation = !ctx.project.options.translation_public;

    let mut payload = BinaryWriter::new();

    // Scene and function tables, in registration order. Symbol names are
    // interned here, so the tables are snapshotted first.
    let scenes: Vec<(String, Vec<i32>)> = ctx
        .scene_bytecode
        .iter()
        .map(|(symbol, indices)| (symbol.clone(), indices.clone()))
        .collect();
    payload.write_u32(scenes.len() as u32);
    for (symbol, indices) in scenes {
        payload.write_u32(ctx.intern(&symbol) as u32);
        payload.write_u32(indices.len() as u32);
        for index in indices {
            payload.write_u32(index as u32);
        }
    }

    let functions: Vec<(String, Vec<i32>)> = ctx
        .function_bytecode
        .iter()
        .map(|(symbol, indices)| (symbol.clone(), indices.clone()))
        .collect();
    payload.write_u32(functions.len() as u32);
    for (symbol, indices) in functions {
        payload.write_u32(ctx.intern(&symbol) as u32);
        payload.write_u32(indices.len() as u32);
        for index in indices {
            payload.write_u32(index as u32);
        }
    }

    let definitions: Vec<(String, (DefinitionValue, i32))> = ctx
        .definition_bytecode
        .iter()
        .map(|(symbol, entry)| (symbol.clone(), entry.clone()))
        .collect();
    payload.write_u32(definitions.len() as u32);
    for (symbol, (value, body_entry)) in definitions {
        payload.write_u32(ctx.intern(&symbol) as u32);
        match value {
            DefinitionValue::Translated(index) => payload.write_u32(index as u32),
            DefinitionValue::Raw(text) => {
                payload.write_u32(ctx.intern(&text) as u32 | (1 << 31));
            }
        }
        payload.write_u32(body_entry as u32);
    }

    // Instruction stream.
    payload.write_u32(ctx.bytecode.len() as u32);
    for instr in &ctx.bytecode {
        write_instruction(&mut payload, instr);
    }

    // Internal string table.
    payload.write_u32(ctx.internal_strings().len() as u32);
    for s in ctx.internal_strings() {
        payload.write_cstr(s);
    }

    // Internal translation table: carried only when no public translation
    // file is emitted alongside the binary.
    if internal_translation {
        let texts: Vec<&str> = ctx
            .translation_info
            .iter()
            .filter(|t| !t.is_comment)
            .map(|t| t.text.as_str())
            .collect();
        payload.write_u32(texts.len() as u32);
        for text in texts {
            payload.write_cstr(text);
        }
    } else {
        payload.write_u32(0);
    }

    // Header + payload.
    let mut out = BinaryWriter::new();
    out.write_bytes(b"DNX");
    out.write_u8(VERSION);
    let mut flags = 0u8;
    if compressed {
        flags |= FLAG_COMPRESSED;
    }
    if internal_translation {
        flags |= FLAG_INTERNAL_TRANSLATION;
    }
    out.write_u8(flags);

    let payload = payload.into_bytes();
    let payload = if compressed {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).map_err(|e| BinaryError {
            message: format!("Failed to compress with zlib: {}", e),
        })?;
        encoder.finish().map_err(|e| BinaryError {
            message: format!("Failed to compress with zlib: {}", e),
        })?
    } else {
        payload
    };

    out.write_u32(payload.len() as u32);
    out.write_bytes(&payload);
    Ok(out.into_bytes())
}

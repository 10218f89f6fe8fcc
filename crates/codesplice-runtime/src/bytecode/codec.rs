//! Instruction codec
//!
//! Every unit is two bytes: opcode, then operand. Operands above 255 are
//! carried by an `EXTENDED_ARG` unit holding the high byte, placed directly in
//! front of the instruction it widens. Only one level of extension exists, so
//! the largest encodable operand is 65535.

use super::Opcode;
use crate::error::{RewriteError, RewriteResult};

/// Width of one instruction unit in bytes
pub const UNIT: usize = 2;

/// Largest operand a (single-prefixed) instruction can carry
pub const MAX_OPERAND: u32 = 0xFFFF;

/// A decoded instruction
///
/// `offset` is where the instruction starts, which is its `EXTENDED_ARG`
/// prefix when it has one. Jump targets always address such starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset of the first unit (prefix included)
    pub offset: usize,
    /// The opcode of the real unit
    pub opcode: Opcode,
    /// Effective operand
    pub operand: u32,
    /// Encoded size in bytes (2, or 4 with a prefix)
    pub size: usize,
}

impl Instruction {
    /// Offset just past this instruction
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Jump destination, for jump instructions
    ///
    /// Relative displacements are measured from the end of the instruction.
    pub fn jump_target(&self) -> Option<usize> {
        if self.opcode.is_absolute_jump() {
            Some(self.operand as usize)
        } else if self.opcode.is_relative_jump() {
            Some(self.end() + self.operand as usize)
        } else {
            None
        }
    }
}

/// Returns true when `operand` needs an `EXTENDED_ARG` prefix
pub fn needs_extended(operand: u32) -> bool {
    operand > 0xFF
}

/// Encoded size of an instruction carrying `operand`
pub fn encoded_size(operand: u32) -> usize {
    if needs_extended(operand) {
        2 * UNIT
    } else {
        UNIT
    }
}

/// Decode the unit at `position`, folding in a preceding `EXTENDED_ARG`
///
/// Looks back exactly one unit. `position` must be unit-aligned and inside
/// the stream.
pub fn unpack(stream: &[u8], position: usize) -> RewriteResult<(Opcode, u32)> {
    if position % UNIT != 0 || position + UNIT > stream.len() {
        return Err(RewriteError::InvalidPosition {
            position,
            len: stream.len(),
        });
    }

    let opcode = Opcode::try_from(stream[position]).map_err(|byte| RewriteError::UnknownOpcode {
        byte,
        offset: position,
    })?;

    let mut operand = stream[position + 1] as u32;
    if position >= UNIT && stream[position - UNIT] == Opcode::ExtendedArg as u8 {
        operand |= (stream[position - 1] as u32) << 8;
    }

    Ok((opcode, operand))
}

/// Encode one instruction, appending its unit(s) to `buffer`
///
/// Returns the number of bytes written.
pub fn pack_into(buffer: &mut Vec<u8>, opcode: Opcode, operand: i64) -> RewriteResult<usize> {
    if !(0..=MAX_OPERAND as i64).contains(&operand) {
        return Err(RewriteError::OperandOutOfRange(operand));
    }
    let operand = operand as u32;

    if needs_extended(operand) {
        buffer.push(Opcode::ExtendedArg as u8);
        buffer.push((operand >> 8) as u8);
    }
    buffer.push(opcode as u8);
    buffer.push((operand & 0xFF) as u8);

    Ok(encoded_size(operand))
}

/// Encode one instruction into a fresh buffer
pub fn pack(opcode: Opcode, operand: i64) -> RewriteResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(2 * UNIT);
    pack_into(&mut buffer, opcode, operand)?;
    Ok(buffer)
}

/// Decode the instruction starting at `start`, reading forward
pub fn read_at(stream: &[u8], start: usize) -> RewriteResult<Instruction> {
    if start % UNIT != 0 || start + UNIT > stream.len() {
        return Err(RewriteError::InvalidPosition {
            position: start,
            len: stream.len(),
        });
    }

    if stream[start] != Opcode::ExtendedArg as u8 {
        let (opcode, _) = unpack(stream, start)?;
        return Ok(Instruction {
            offset: start,
            opcode,
            operand: stream[start + 1] as u32,
            size: UNIT,
        });
    }

    let unit = start + UNIT;
    let (opcode, operand) = unpack(stream, unit)?;
    if opcode == Opcode::ExtendedArg {
        return Err(RewriteError::UnsupportedExtension { offset: unit });
    }
    Ok(Instruction {
        offset: start,
        opcode,
        operand,
        size: 2 * UNIT,
    })
}

/// Decode a whole instruction stream
///
/// Prefix units are folded into the instruction they extend and never appear
/// in the result. Rejects odd-length streams, a trailing prefix with nothing
/// to extend, and prefixes that extend another prefix.
pub fn decode_all(stream: &[u8]) -> RewriteResult<Vec<Instruction>> {
    if stream.len() % UNIT != 0 {
        return Err(RewriteError::InvalidPosition {
            position: stream.len() - 1,
            len: stream.len(),
        });
    }

    let mut decoded = Vec::with_capacity(stream.len() / UNIT);
    let mut prefix: Option<usize> = None;
    let mut position = 0;

    while position < stream.len() {
        let (opcode, operand) = unpack(stream, position)?;

        if opcode == Opcode::ExtendedArg {
            if prefix.is_some() {
                return Err(RewriteError::UnsupportedExtension { offset: position });
            }
            prefix = Some(position);
        } else {
            let offset = prefix.take().unwrap_or(position);
            decoded.push(Instruction {
                offset,
                opcode,
                operand,
                size: position + UNIT - offset,
            });
        }

        position += UNIT;
    }

    if let Some(position) = prefix {
        return Err(RewriteError::InvalidPosition {
            position,
            len: stream.len(),
        });
    }

    Ok(decoded)
}

//! OP_RETURN script framing.
//!
//! Format: OP_RETURN <push opcode> [length] <payload>

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, PushBytesBuf, ScriptBuf};

use crate::Error;

pub const OP_RETURN: u8 = 0x6a;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;

/// Build an OP_RETURN script carrying `payload` with the minimal push encoding.
pub fn build_op_return_script(payload: &[u8]) -> Result<ScriptBuf, Error> {
    let push_bytes = PushBytesBuf::try_from(payload.to_vec()).map_err(|_| Error::SizeExceeded {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    Ok(Builder::new()
        .push_opcode(opcodes::all::OP_RETURN)
        .push_slice(push_bytes)
        .into_script())
}

/// Extract the pushed payload from an OP_RETURN script.
///
/// Returns `None` for non-OP_RETURN scripts, non-push opcodes and truncated pushes.
/// Bytes after the first push are ignored.
pub fn parse_op_return_script(script: &[u8]) -> Option<&[u8]> {
    let (&first, rest) = script.split_first()?;
    if first != OP_RETURN {
        return None;
    }

    let (&opcode, rest) = rest.split_first()?;
    let (len, rest) = match opcode {
        0..=0x4b => (opcode as usize, rest),
        OP_PUSHDATA1 => {
            let (&len, rest) = rest.split_first()?;
            (len as usize, rest)
        }
        OP_PUSHDATA2 => {
            let bytes = rest.get(..2)?;
            (u16::from_le_bytes([bytes[0], bytes[1]]) as usize, &rest[2..])
        }
        OP_PUSHDATA4 => {
            let bytes = rest.get(..4)?;
            let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (usize::try_from(len).ok()?, &rest[4..])
        }
        _ => return None,
    };

    rest.get(..len)
}

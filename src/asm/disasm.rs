//! ROM disassembler.
//!
//! Walks a byte buffer instruction by instruction, printing one line per
//! instruction: the byte offset, the mnemonic, and the raw operand bytes.
//! Rejects unknown opcode bytes and a buffer that ends mid-instruction, the
//! same conditions the VM treats as fatal.

use std::fmt::Write;

use crate::errors::VmError;
use crate::isa::Opcode;

/// Renders a ROM as a readable listing.
pub fn disassemble(rom: &[u8]) -> Result<String, VmError> {
    let mut out = String::new();
    let mut ip = 0usize;

    while ip < rom.len() {
        let opcode = Opcode::try_from(rom[ip]).map_err(|_| VmError::UnknownOpcode {
            opcode: rom[ip],
            offset: ip,
        })?;

        let width = opcode.width();
        if ip + width > rom.len() {
            return Err(VmError::UnexpectedEndOfRom { offset: ip });
        }

        let _ = write!(out, "{ip:04x}  {}", opcode.mnemonic());
        for byte in &rom[ip + 1..ip + width] {
            let _ = write!(out, " {byte:02x}");
        }
        out.push('\n');

        ip += width;
    }

    Ok(out)
}

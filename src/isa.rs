//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode table (variant, discriminant, mnemonic, encoded width) and invokes a
//! callback macro for code generation, so the enum, the `TryFrom<u8>` decoder
//! and the mnemonic/width lookups can never drift apart.
//!
//! This module generates:
//! - The [`Opcode`] enum
//! - `TryFrom<u8>` for decoding opcode bytes
//! - [`Opcode::mnemonic`], [`Opcode::width`] and [`Opcode::from_mnemonic`]
//!
//! It also hosts the per-family binary encoders used by the code generator.
//!
//! # Bytecode format
//!
//! Instructions are variable-length (1-7 bytes), one opcode byte followed by
//! operand bytes. 16-bit fields (addresses) are big-endian. There is no file
//! header: a program is the flat concatenation of encoded instructions and
//! every address is an absolute byte offset into that same buffer.

use crate::errors::VmError;
use crate::operand::{AddressOperand, AddressTag, Offset, Operand, Register};

/// Invokes a callback macro with the complete opcode table.
///
/// Each row is `Variant = opcode, "mnemonic", width` where `width` is the
/// total encoded size in bytes including the opcode byte.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            /// halt ; move ip past the end of the rom, ending execution
            Halt = 0x00, "halt", 1,
            /// set r v ; r = v
            Set = 0x01, "set", 4,
            /// peek addr[±off] ; a = memory[addr ± off]
            Peek = 0x02, "peek", 7,
            /// poke addr[±off] ; memory[addr ± off] = a
            Poke = 0x03, "poke", 7,
            /// + r v ; a = r + v
            Add = 0x04, "+", 4,
            /// - r v ; a = r - v
            Subtract = 0x05, "-", 4,
            /// * r v ; a = r * v
            Multiply = 0x06, "*", 4,
            /// / r v ; a = r / v, truncating (v must be nonzero)
            Divide = 0x07, "/", 4,
            /// << r v ; a = r << v
            ShiftLeft = 0x08, "<<", 4,
            /// >> r v ; a = r >> v
            ShiftRight = 0x09, ">>", 4,
            /// == r v ; a = 1 if r == v else 0
            EqualTo = 0x0A, "==", 4,
            /// != r v ; a = 1 if r != v else 0
            NotEqualTo = 0x0B, "!=", 4,
            /// & r v ; a = r & v
            And = 0x0C, "&", 4,
            /// | r v ; a = r | v
            Or = 0x0D, "|", 4,
            /// ~ r v ; a = bitwise complement of r (v is carried but ignored)
            Not = 0x0E, "~", 4,
            /// jump addr ; ip = addr
            Jump = 0x0F, "jump", 3,
            /// jump==0 addr ; ip = addr when a == 0
            JumpIfZero = 0x10, "jump==0", 3,
            /// jump!=0 addr ; ip = addr when a != 0
            JumpIfNotZero = 0x11, "jump!=0", 3,
            /// call addr ; save return state on the stack, fp = sp, ip = addr
            Call = 0x12, "call", 3,
            /// return ; restore ip and fp from the stack
            Return = 0x13, "return", 1,
            /// push v ; memory[sp] = v, sp -= 1
            Push = 0x14, "push", 3,
            /// pop r ; sp += 1, r = memory[sp] (r defaults to a)
            Pop = 0x15, "pop", 2,
            /// syscall code ; forward code to the host's syscall listeners
            SysCall = 0x16, "syscall", 2,
        }
    };
}

macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal, $width:expr
        ),* $(,)?
    ) => {
        /// Instruction kinds, one per opcode byte.
        #[repr(u8)]
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VmError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Opcode::$name), )*
                    _ => Err(VmError::UnknownOpcode {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl Opcode {
            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the total encoded width in bytes, opcode byte included.
            pub const fn width(&self) -> usize {
                match self {
                    $( Opcode::$name => $width, )*
                }
            }

            /// Looks up an opcode by its assembly mnemonic.
            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                match name {
                    $( $mnemonic => Some(Opcode::$name), )*
                    _ => None,
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

impl Opcode {
    /// True for the register-plus-operand family that writes its result to
    /// register `a`.
    pub const fn is_arithmetic_logic(&self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::ShiftLeft
                | Opcode::ShiftRight
                | Opcode::EqualTo
                | Opcode::NotEqualTo
                | Opcode::And
                | Opcode::Or
                | Opcode::Not
        )
    }

    /// True for `jump`, `jump==0`, `jump!=0` and `call`.
    pub const fn is_branching(&self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::JumpIfZero | Opcode::JumpIfNotZero | Opcode::Call
        )
    }
}

/// Encodes `set destination, source`.
pub fn encode_set(destination: Register, source: Operand) -> [u8; 4] {
    let (tag, value) = source.encode();
    [Opcode::Set as u8, destination as u8, tag, value]
}

/// Encodes an arithmetic/logic instruction.
///
/// The left operand is always a register; the right operand is a literal byte
/// or a register. `~` carries a right operand for uniform width even though
/// the VM ignores it.
pub fn encode_arithmetic_logic(opcode: Opcode, left: Register, right: Operand) -> [u8; 4] {
    debug_assert!(opcode.is_arithmetic_logic());
    let (tag, value) = right.encode();
    [opcode as u8, left as u8, tag, value]
}

/// Encodes `peek` or `poke`.
///
/// A register address encodes its two address bytes as `[register, 0]`; a
/// literal address encodes big-endian.
pub fn encode_memory_access(opcode: Opcode, address: AddressOperand, offset: Offset) -> [u8; 7] {
    debug_assert!(matches!(opcode, Opcode::Peek | Opcode::Poke));
    let [off_type, off_sign, off_value] = offset.encode();
    let (tag, hi, lo) = match address {
        AddressOperand::Register(r) => (AddressTag::Register as u8, r as u8, 0),
        AddressOperand::Literal(addr) => {
            let [hi, lo] = addr.to_be_bytes();
            (AddressTag::Literal as u8, hi, lo)
        }
    };
    [opcode as u8, tag, hi, lo, off_type, off_sign, off_value]
}

/// Encodes a branching instruction with an absolute big-endian target.
pub fn encode_branching(opcode: Opcode, address: u16) -> [u8; 3] {
    debug_assert!(opcode.is_branching());
    let [hi, lo] = address.to_be_bytes();
    [opcode as u8, hi, lo]
}

/// Encodes `push source`.
pub fn encode_push(source: Operand) -> [u8; 3] {
    let (tag, value) = source.encode();
    [Opcode::Push as u8, tag, value]
}

/// Encodes `pop destination`.
pub fn encode_pop(destination: Register) -> [u8; 2] {
    [Opcode::Pop as u8, destination as u8]
}

/// Encodes `syscall code`.
pub fn encode_syscall(code: u8) -> [u8; 2] {
    [Opcode::SysCall as u8, code]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::{OffsetKind, OffsetSign};

    #[test]
    fn opcode_try_from_roundtrip() {
        for value in 0x00..=0x16u8 {
            let opcode = Opcode::try_from(value).unwrap();
            assert_eq!(opcode as u8, value);
        }
    }

    #[test]
    fn opcode_try_from_invalid() {
        for value in 0x17..=0xFFu8 {
            assert!(matches!(
                Opcode::try_from(value),
                Err(VmError::UnknownOpcode { opcode, .. }) if opcode == value
            ));
        }
    }

    #[test]
    fn mnemonic_lookup_roundtrip() {
        for value in 0x00..=0x16u8 {
            let opcode = Opcode::try_from(value).unwrap();
            assert_eq!(Opcode::from_mnemonic(opcode.mnemonic()), Some(opcode));
        }
        assert_eq!(Opcode::from_mnemonic("nope"), None);
        assert_eq!(Opcode::from_mnemonic("HALT"), None);
    }

    #[test]
    fn widths() {
        assert_eq!(Opcode::Halt.width(), 1);
        assert_eq!(Opcode::Return.width(), 1);
        assert_eq!(Opcode::Set.width(), 4);
        assert_eq!(Opcode::Peek.width(), 7);
        assert_eq!(Opcode::Poke.width(), 7);
        assert_eq!(Opcode::Jump.width(), 3);
        assert_eq!(Opcode::Call.width(), 3);
        assert_eq!(Opcode::Push.width(), 3);
        assert_eq!(Opcode::Pop.width(), 2);
        assert_eq!(Opcode::SysCall.width(), 2);
        for op in [
            Opcode::Add,
            Opcode::Subtract,
            Opcode::Multiply,
            Opcode::Divide,
            Opcode::ShiftLeft,
            Opcode::ShiftRight,
            Opcode::EqualTo,
            Opcode::NotEqualTo,
            Opcode::And,
            Opcode::Or,
            Opcode::Not,
        ] {
            assert_eq!(op.width(), 4);
            assert!(op.is_arithmetic_logic());
        }
    }

    #[test]
    fn encode_set_literal_and_register() {
        assert_eq!(encode_set(Register::A, Operand::Literal(123)), [0x01, 0, 0, 123]);
        assert_eq!(
            encode_set(Register::A, Operand::Register(Register::X)),
            [0x01, 0, 1, 1]
        );
    }

    #[test]
    fn encode_arithmetic_logic_layout() {
        assert_eq!(
            encode_arithmetic_logic(Opcode::Add, Register::A, Operand::Register(Register::X)),
            [Opcode::Add as u8, 0, 1, 1]
        );
        assert_eq!(
            encode_arithmetic_logic(Opcode::Not, Register::Y, Operand::Literal(0)),
            [Opcode::Not as u8, 2, 0, 0]
        );
    }

    #[test]
    fn encode_memory_access_literal_address() {
        let bytes = encode_memory_access(
            Opcode::Peek,
            AddressOperand::Literal(0xabcd),
            Offset {
                kind: OffsetKind::Register(Register::A),
                sign: OffsetSign::Minus,
            },
        );
        assert_eq!(bytes, [Opcode::Peek as u8, 0, 0xab, 0xcd, 1, 1, 0]);
    }

    #[test]
    fn encode_memory_access_register_address() {
        let bytes = encode_memory_access(
            Opcode::Poke,
            AddressOperand::Register(Register::Xy),
            Offset::empty(),
        );
        assert_eq!(bytes, [Opcode::Poke as u8, 1, 3, 0, 0, 0, 0]);
    }

    #[test]
    fn encode_branching_big_endian() {
        assert_eq!(encode_branching(Opcode::Jump, 0x1234), [Opcode::Jump as u8, 0x12, 0x34]);
        assert_eq!(encode_branching(Opcode::Call, 0), [Opcode::Call as u8, 0, 0]);
    }

    #[test]
    fn encode_stack_and_syscall() {
        assert_eq!(encode_push(Operand::Literal(123)), [Opcode::Push as u8, 0, 123]);
        assert_eq!(
            encode_push(Operand::Register(Register::Sp)),
            [Opcode::Push as u8, 1, 5]
        );
        assert_eq!(encode_pop(Register::A), [Opcode::Pop as u8, 0]);
        assert_eq!(encode_syscall(2), [Opcode::SysCall as u8, 2]);
    }
}

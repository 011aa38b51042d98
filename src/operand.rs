//! Registers and operand encoding tags.
//!
//! Every multi-byte instruction encodes its operands behind single-byte tags
//! (operand type, address type, offset type, offset sign). The assembler picks
//! the tags while encoding; the VM decodes them with `TryFrom<u8>` so an
//! out-of-range byte is a hard decode error rather than a silent skip.

use crate::errors::VmError;

/// Register file layout.
///
/// `A`, `X` and `Y` are 8-bit. `Ip`, `Sp` and `Fp` are 16-bit addresses.
/// `Xy` is the 16-bit composite `(X << 8) | Y`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Register {
    A = 0,
    X = 1,
    Y = 2,
    Xy = 3,
    Ip = 4,
    Sp = 5,
    Fp = 6,
}

impl Register {
    /// Looks up a register by its assembly name (`a`, `x`, `y`, `xy`, `ip`,
    /// `sp`, `fp`). Names are case-sensitive.
    pub fn from_name(name: &str) -> Option<Register> {
        match name {
            "a" => Some(Register::A),
            "x" => Some(Register::X),
            "y" => Some(Register::Y),
            "xy" => Some(Register::Xy),
            "ip" => Some(Register::Ip),
            "sp" => Some(Register::Sp),
            "fp" => Some(Register::Fp),
            _ => None,
        }
    }

    /// Returns the assembly name of this register.
    pub const fn name(&self) -> &'static str {
        match self {
            Register::A => "a",
            Register::X => "x",
            Register::Y => "y",
            Register::Xy => "xy",
            Register::Ip => "ip",
            Register::Sp => "sp",
            Register::Fp => "fp",
        }
    }
}

impl TryFrom<u8> for Register {
    type Error = VmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Register::A),
            1 => Ok(Register::X),
            2 => Ok(Register::Y),
            3 => Ok(Register::Xy),
            4 => Ok(Register::Ip),
            5 => Ok(Register::Sp),
            6 => Ok(Register::Fp),
            _ => Err(VmError::InvalidRegister { value, offset: 0 }),
        }
    }
}

/// Source operand for `set`, `push` and the arithmetic/logic family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operand {
    /// Immediate byte value.
    Literal(u8),
    /// Register holding the value.
    Register(Register),
}

impl Operand {
    /// Returns the `(tag, payload)` byte pair for this operand.
    pub const fn encode(self) -> (u8, u8) {
        match self {
            Operand::Literal(v) => (OperandTag::Literal as u8, v),
            Operand::Register(r) => (OperandTag::Register as u8, r as u8),
        }
    }
}

/// Address operand for `peek` and `poke`.
///
/// Either an immediate 16-bit address or a register containing the address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressOperand {
    /// Immediate 16-bit address.
    Literal(u16),
    /// Register containing the address.
    Register(Register),
}

/// Tag byte distinguishing literal from register source operands.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperandTag {
    Literal = 0,
    Register = 1,
}

impl TryFrom<u8> for OperandTag {
    type Error = VmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OperandTag::Literal),
            1 => Ok(OperandTag::Register),
            _ => Err(VmError::InvalidTag { tag: value, offset: 0 }),
        }
    }
}

/// Tag byte distinguishing literal from register addresses.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressTag {
    Literal = 0,
    Register = 1,
}

impl TryFrom<u8> for AddressTag {
    type Error = VmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AddressTag::Literal),
            1 => Ok(AddressTag::Register),
            _ => Err(VmError::InvalidTag { tag: value, offset: 0 }),
        }
    }
}

/// Tag byte distinguishing literal from register displacements.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OffsetTag {
    Literal = 0,
    Register = 1,
}

impl TryFrom<u8> for OffsetTag {
    type Error = VmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OffsetTag::Literal),
            1 => Ok(OffsetTag::Register),
            _ => Err(VmError::InvalidTag { tag: value, offset: 0 }),
        }
    }
}

/// Sign byte for address displacements.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OffsetSign {
    Plus = 0,
    Minus = 1,
}

impl TryFrom<u8> for OffsetSign {
    type Error = VmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OffsetSign::Plus),
            1 => Ok(OffsetSign::Minus),
            _ => Err(VmError::InvalidTag { tag: value, offset: 0 }),
        }
    }
}

/// Signed displacement attached to an address operand.
///
/// `peek`/`poke` always encode one; an absent source-level offset becomes
/// [`Offset::empty`] (literal zero, plus).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Offset {
    pub kind: OffsetKind,
    pub sign: OffsetSign,
}

/// The displacement itself: an immediate byte or a register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OffsetKind {
    Literal(u8),
    Register(Register),
}

impl Offset {
    /// The default displacement: `+0`.
    pub const fn empty() -> Offset {
        Offset {
            kind: OffsetKind::Literal(0),
            sign: OffsetSign::Plus,
        }
    }

    /// Returns the `[type, sign, value]` byte triple for this offset.
    pub const fn encode(self) -> [u8; 3] {
        match self.kind {
            OffsetKind::Literal(v) => [OffsetTag::Literal as u8, self.sign as u8, v],
            OffsetKind::Register(r) => [OffsetTag::Register as u8, self.sign as u8, r as u8],
        }
    }
}

impl Default for Offset {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_from_name() {
        assert_eq!(Register::from_name("a"), Some(Register::A));
        assert_eq!(Register::from_name("xy"), Some(Register::Xy));
        assert_eq!(Register::from_name("fp"), Some(Register::Fp));
        assert_eq!(Register::from_name("A"), None);
        assert_eq!(Register::from_name("r0"), None);
    }

    #[test]
    fn register_name_roundtrip() {
        for value in 0..=6u8 {
            let reg = Register::try_from(value).unwrap();
            assert_eq!(Register::from_name(reg.name()), Some(reg));
            assert_eq!(reg as u8, value);
        }
    }

    #[test]
    fn register_try_from_invalid() {
        for value in 7..=255u8 {
            assert!(matches!(
                Register::try_from(value),
                Err(VmError::InvalidRegister { value: v, .. }) if v == value
            ));
        }
    }

    #[test]
    fn operand_encode() {
        assert_eq!(Operand::Literal(123).encode(), (0, 123));
        assert_eq!(Operand::Register(Register::X).encode(), (1, 1));
    }

    #[test]
    fn offset_empty_encoding() {
        assert_eq!(Offset::empty().encode(), [0, 0, 0]);
    }

    #[test]
    fn offset_encoding() {
        let off = Offset {
            kind: OffsetKind::Register(Register::A),
            sign: OffsetSign::Minus,
        };
        assert_eq!(off.encode(), [1, 1, 0]);

        let off = Offset {
            kind: OffsetKind::Literal(7),
            sign: OffsetSign::Plus,
        };
        assert_eq!(off.encode(), [0, 0, 7]);
    }

    #[test]
    fn tag_try_from_invalid() {
        assert!(OperandTag::try_from(2).is_err());
        assert!(AddressTag::try_from(2).is_err());
        assert!(OffsetTag::try_from(2).is_err());
        assert!(OffsetSign::try_from(2).is_err());
    }
}

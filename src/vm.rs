//! Byte-code virtual machine.
//!
//! # Architecture
//!
//! - **Registers**: `a`, `x`, `y` (8-bit) and `ip`, `sp`, `fp` (16-bit), with
//!   wraparound enforced centrally in the register write path
//! - **Memory**: one 65536-byte linear array shared by data and the stack;
//!   the ROM is a separate read-only buffer
//! - **Stack**: grows downward from the top of memory; `push` stores at `sp`
//!   then decrements, `pop` increments then loads
//! - **Execution model**: cooperative single steps; the machine advances only
//!   when the driver calls [`Vm::tick`] or [`Vm::run`], and signals the end of
//!   the program by `ip` reaching the ROM length rather than by itself
//! - **Host I/O**: the `syscall` instruction forwards a one-byte code to
//!   registered listeners, the sole extension point to the outside world
//!
//! # Calling convention
//!
//! [`Machine::call`] pushes, in order: return-address low byte, return-address
//! high byte, previous-`fp` low byte, previous-`fp` high byte, `y`, `x` - six
//! bytes - then sets `fp` to the `sp` captured before pushing and jumps.
//! `return` pops in exact reverse order. Hand-written subroutines rely on this
//! byte-for-bit layout for `fp`-relative argument access, so it must never be
//! reordered.

mod registers;

use crate::debug;
use crate::errors::VmError;
use crate::isa::Opcode;
use crate::operand::{AddressTag, OffsetSign, OffsetTag, OperandTag, Register};

use registers::Registers;

/// Size of the linear memory array in bytes.
pub const MEM_SIZE: usize = 65536;

/// Longest loadable ROM. Jump targets are 16-bit absolute offsets, so bytes
/// past this limit could never be addressed.
pub const MAX_ROM_LEN: usize = u16::MAX as usize;

/// Execution core: ROM, memory and registers.
///
/// This is the surface syscall listeners receive, so host handlers can read
/// and write memory but can never touch the listener registry that invoked
/// them. Multiple machines may coexist; each owns its own memory and
/// registers.
pub struct Machine {
    rom: Vec<u8>,
    memory: Vec<u8>,
    regs: Registers,
}

impl Machine {
    fn new() -> Self {
        Self {
            rom: Vec::new(),
            memory: vec![0; MEM_SIZE],
            regs: Registers::new(),
        }
    }

    /// Replaces the loaded ROM. ROMs longer than [`MAX_ROM_LEN`] are
    /// rejected.
    pub fn load(&mut self, rom: Vec<u8>) -> Result<(), VmError> {
        if rom.len() > MAX_ROM_LEN {
            return Err(VmError::RomTooLarge { len: rom.len() });
        }
        self.rom = rom;
        Ok(())
    }

    /// The loaded ROM.
    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    /// True once `ip` has moved past the end of the ROM. The machine never
    /// halts by itself; drivers poll this.
    pub fn finished(&self) -> bool {
        self.regs.get(Register::Ip) as usize >= self.rom.len()
    }

    /// Reads a register, zero-extended to 16 bits.
    pub fn register(&self, register: Register) -> u16 {
        self.regs.get(register)
    }

    /// Writes a register, wrapping modulo its width.
    pub fn set_register(&mut self, register: Register, value: i64) {
        self.regs.set(register, value);
    }

    /// Copies `memory[start..end]` (end exclusive, clamped to memory size).
    /// This is a copy, not a live view.
    pub fn read_memory_range(&self, start: usize, end: usize) -> Vec<u8> {
        let start = start.min(MEM_SIZE);
        let end = end.min(MEM_SIZE);
        if start >= end {
            return Vec::new();
        }
        self.memory[start..end].to_vec()
    }

    /// Reads one memory byte.
    pub fn memory_byte(&self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    /// Writes one memory byte.
    pub fn write_memory_byte(&mut self, address: u16, value: u8) {
        self.memory[address as usize] = value;
    }

    fn push(&mut self, value: u8) {
        let sp = self.regs.get(Register::Sp);
        debug!("vm: push {value}, sp={sp}");
        self.memory[sp as usize] = value;
        self.regs.set(Register::Sp, sp as i64 - 1);
    }

    fn pop(&mut self) -> u8 {
        let sp = self.regs.get(Register::Sp) as i64 + 1;
        self.regs.set(Register::Sp, sp);
        let value = self.memory[self.regs.get(Register::Sp) as usize];
        debug!("vm: pop {value}, sp={}", self.regs.get(Register::Sp));
        value
    }

    /// Transfers control to `address` with the full calling convention: saves
    /// the return address, the previous frame pointer and the `y`/`x`
    /// registers on the stack, then points `fp` at the pre-call `sp` so the
    /// callee reaches its arguments as `fp[n]`.
    pub fn call(&mut self, address: u16) {
        let return_address = self.regs.get(Register::Ip);
        let previous_fp = self.regs.get(Register::Fp);
        let frame = self.regs.get(Register::Sp);

        let [ret_hi, ret_lo] = return_address.to_be_bytes();
        let [fp_hi, fp_lo] = previous_fp.to_be_bytes();
        let y = (self.regs.get(Register::Y) & 0xff) as u8;
        let x = (self.regs.get(Register::X) & 0xff) as u8;

        self.push(ret_lo);
        self.push(ret_hi);
        self.push(fp_lo);
        self.push(fp_hi);
        self.push(y);
        self.push(x);

        debug!("vm: call {address}, return address {return_address}, fp {frame}");

        self.regs.set(Register::Fp, frame as i64);
        self.regs.set(Register::Ip, address as i64);
    }

    fn op_return(&mut self) {
        let x = self.pop();
        let y = self.pop();
        let fp_hi = self.pop();
        let fp_lo = self.pop();
        let ret_hi = self.pop();
        let ret_lo = self.pop();

        let fp = u16::from_be_bytes([fp_hi, fp_lo]);
        let return_address = u16::from_be_bytes([ret_hi, ret_lo]);
        debug!("vm: return to {return_address}, fp restored to {fp}");

        self.regs.set(Register::X, x as i64);
        self.regs.set(Register::Y, y as i64);
        self.regs.set(Register::Fp, fp as i64);
        self.regs.set(Register::Ip, return_address as i64);
    }

    /// Fetches the next ROM byte and advances `ip`. A ROM that runs out
    /// mid-instruction is a fatal decode error.
    fn fetch(&mut self) -> Result<u8, VmError> {
        let ip = self.regs.get(Register::Ip) as usize;
        let Some(&byte) = self.rom.get(ip) else {
            return Err(VmError::UnexpectedEndOfRom { offset: ip });
        };
        self.regs.set(Register::Ip, ip as i64 + 1);
        Ok(byte)
    }

    /// Fetches a big-endian 16-bit value.
    fn fetch16(&mut self) -> Result<u16, VmError> {
        let hi = self.fetch()?;
        let lo = self.fetch()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn fetch_register(&mut self) -> Result<Register, VmError> {
        let offset = self.regs.get(Register::Ip) as usize;
        let byte = self.fetch()?;
        Register::try_from(byte).map_err(|_| VmError::InvalidRegister {
            value: byte,
            offset,
        })
    }

    /// Fetches a `[tag, value]` operand pair and resolves it: a literal is
    /// the value itself, a register operand reads the register.
    fn fetch_operand(&mut self) -> Result<u16, VmError> {
        let tag_offset = self.regs.get(Register::Ip) as usize;
        let tag_byte = self.fetch()?;
        let tag = OperandTag::try_from(tag_byte).map_err(|_| VmError::InvalidTag {
            tag: tag_byte,
            offset: tag_offset,
        })?;

        let value_offset = self.regs.get(Register::Ip) as usize;
        let raw = self.fetch()?;
        match tag {
            OperandTag::Literal => Ok(raw as u16),
            OperandTag::Register => {
                let register = Register::try_from(raw).map_err(|_| VmError::InvalidRegister {
                    value: raw,
                    offset: value_offset,
                })?;
                Ok(self.regs.get(register))
            }
        }
    }

    /// Decodes the five address bytes of `peek`/`poke` into an effective
    /// address: base (literal or register) plus or minus the displacement
    /// (literal or register), wrapped modulo the address space.
    fn fetch_effective_address(&mut self) -> Result<u16, VmError> {
        let tag_offset = self.regs.get(Register::Ip) as usize;
        let tag_byte = self.fetch()?;
        let tag = AddressTag::try_from(tag_byte).map_err(|_| VmError::InvalidTag {
            tag: tag_byte,
            offset: tag_offset,
        })?;

        let base_offset = self.regs.get(Register::Ip) as usize;
        let operand_a = self.fetch()?;
        let operand_b = self.fetch()?;
        let base = match tag {
            AddressTag::Literal => u16::from_be_bytes([operand_a, operand_b]),
            AddressTag::Register => {
                let register =
                    Register::try_from(operand_a).map_err(|_| VmError::InvalidRegister {
                        value: operand_a,
                        offset: base_offset,
                    })?;
                self.regs.get(register)
            }
        };

        let off_tag_offset = self.regs.get(Register::Ip) as usize;
        let off_tag_byte = self.fetch()?;
        let off_tag = OffsetTag::try_from(off_tag_byte).map_err(|_| VmError::InvalidTag {
            tag: off_tag_byte,
            offset: off_tag_offset,
        })?;

        let sign_offset = self.regs.get(Register::Ip) as usize;
        let sign_byte = self.fetch()?;
        let sign = OffsetSign::try_from(sign_byte).map_err(|_| VmError::InvalidTag {
            tag: sign_byte,
            offset: sign_offset,
        })?;

        let raw_offset = self.regs.get(Register::Ip) as usize;
        let raw = self.fetch()?;
        let displacement = match off_tag {
            OffsetTag::Literal => raw as i64,
            OffsetTag::Register => {
                let register = Register::try_from(raw).map_err(|_| VmError::InvalidRegister {
                    value: raw,
                    offset: raw_offset,
                })?;
                self.regs.get(register) as i64
            }
        };

        let address = match sign {
            OffsetSign::Plus => base as i64 + displacement,
            OffsetSign::Minus => base as i64 - displacement,
        };
        Ok((address & 0xffff) as u16)
    }

    /// Fetches and executes one instruction. Returns the syscall code when
    /// the instruction was `syscall`, so the owning [`Vm`] can notify its
    /// listeners.
    pub(crate) fn step(&mut self) -> Result<Option<u8>, VmError> {
        let offset = self.regs.get(Register::Ip) as usize;
        let opcode_byte = self.fetch()?;
        let opcode = Opcode::try_from(opcode_byte).map_err(|_| VmError::UnknownOpcode {
            opcode: opcode_byte,
            offset,
        })?;

        debug!("vm: executing {}", opcode.mnemonic());

        match opcode {
            Opcode::Halt => {
                let end = self.rom.len();
                self.regs.set(Register::Ip, end as i64);
            }
            Opcode::Set => {
                let destination = self.fetch_register()?;
                let value = self.fetch_operand()?;
                self.regs.set(destination, value as i64);
            }
            Opcode::Peek => {
                let address = self.fetch_effective_address()?;
                let value = self.memory[address as usize];
                self.regs.set(Register::A, value as i64);
                debug!("vm: peek a = {value} from {address}");
            }
            Opcode::Poke => {
                let address = self.fetch_effective_address()?;
                let value = (self.regs.get(Register::A) & 0xff) as u8;
                self.memory[address as usize] = value;
                debug!("vm: poke {address} = {value}");
            }
            Opcode::Add => self.op_arithmetic_logic(|l, r| l + r)?,
            Opcode::Subtract => self.op_arithmetic_logic(|l, r| l - r)?,
            Opcode::Multiply => self.op_arithmetic_logic(|l, r| l * r)?,
            Opcode::Divide => self.op_divide(offset)?,
            Opcode::ShiftLeft => self.op_arithmetic_logic(|l, r| l << (r & 0x1f))?,
            Opcode::ShiftRight => self.op_arithmetic_logic(|l, r| l >> (r & 0x1f))?,
            Opcode::EqualTo => self.op_arithmetic_logic(|l, r| (l == r) as i64)?,
            Opcode::NotEqualTo => self.op_arithmetic_logic(|l, r| (l != r) as i64)?,
            Opcode::And => self.op_arithmetic_logic(|l, r| l & r)?,
            Opcode::Or => self.op_arithmetic_logic(|l, r| l | r)?,
            Opcode::Not => self.op_arithmetic_logic(|l, _| !l)?,
            Opcode::Jump => {
                let address = self.fetch16()?;
                self.regs.set(Register::Ip, address as i64);
            }
            Opcode::JumpIfZero => {
                let address = self.fetch16()?;
                if self.regs.get(Register::A) == 0 {
                    self.regs.set(Register::Ip, address as i64);
                }
            }
            Opcode::JumpIfNotZero => {
                let address = self.fetch16()?;
                if self.regs.get(Register::A) != 0 {
                    self.regs.set(Register::Ip, address as i64);
                }
            }
            Opcode::Call => {
                let address = self.fetch16()?;
                self.call(address);
            }
            Opcode::Return => self.op_return(),
            Opcode::Push => {
                let value = self.fetch_operand()?;
                self.push((value & 0xff) as u8);
            }
            Opcode::Pop => {
                let destination = self.fetch_register()?;
                let value = self.pop();
                self.regs.set(destination, value as i64);
            }
            Opcode::SysCall => {
                let code = self.fetch()?;
                return Ok(Some(code));
            }
        }

        Ok(None)
    }

    /// Shared body of the arithmetic/logic family: fetch the register/operand
    /// pair, apply the operation, write the result to `a`. The accumulator
    /// destination is the convention, independent of the left register.
    fn op_arithmetic_logic(&mut self, op: impl Fn(i64, i64) -> i64) -> Result<(), VmError> {
        let (left, right) = self.fetch_arithmetic_operands()?;
        self.regs.set(Register::A, op(left, right));
        Ok(())
    }

    /// Truncating division; a zero divisor is a fatal error.
    fn op_divide(&mut self, offset: usize) -> Result<(), VmError> {
        let (left, right) = self.fetch_arithmetic_operands()?;
        if right == 0 {
            return Err(VmError::DivisionByZero { offset });
        }
        self.regs.set(Register::A, left / right);
        Ok(())
    }

    fn fetch_arithmetic_operands(&mut self) -> Result<(i64, i64), VmError> {
        let left_register = self.fetch_register()?;
        let right = self.fetch_operand()? as i64;
        let left = self.regs.get(left_register) as i64;
        Ok((left, right))
    }
}

/// Identifier handed out by [`Vm::add_syscall_listener`], used to remove the
/// listener again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ListenerId(u64);

/// Host-side syscall handler. Receives the syscall code and the machine, so
/// it can read and write memory directly.
pub type SyscallListener = Box<dyn FnMut(u8, &mut Machine)>;

struct Listener {
    id: ListenerId,
    callback: SyscallListener,
}

/// A [`Machine`] plus its syscall listener registry.
///
/// The split keeps the registry out of reach of the handlers themselves:
/// listeners get `&mut Machine` and nothing else, which makes dispatch a
/// plain ordered loop with no reentrancy concerns.
pub struct Vm {
    machine: Machine,
    listeners: Vec<Listener>,
    next_listener_id: u64,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            machine: Machine::new(),
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    /// Loads a ROM into the machine.
    pub fn load(&mut self, rom: Vec<u8>) -> Result<(), VmError> {
        self.machine.load(rom)
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// Executes one instruction if the program has not finished, dispatching
    /// any syscall to the listeners in registration order. A finished machine
    /// makes this a no-op; drivers detect termination via
    /// [`Machine::finished`].
    pub fn tick(&mut self) -> Result<(), VmError> {
        if self.machine.finished() {
            return Ok(());
        }
        if let Some(code) = self.machine.step()? {
            for listener in &mut self.listeners {
                (listener.callback)(code, &mut self.machine);
            }
        }
        Ok(())
    }

    /// Runs until the program finishes or an instruction fails.
    pub fn run(&mut self) -> Result<(), VmError> {
        while !self.machine.finished() {
            self.tick()?;
        }
        Ok(())
    }

    /// Cooperative interrupt: performs a normal [`Machine::call`] to the
    /// host-agreed address. Because it is an ordinary call, it takes effect
    /// at the next tick boundary and the interrupted code resumes when the
    /// routine returns.
    pub fn interrupt(&mut self, address: u16) {
        self.machine.call(address);
    }

    /// Registers a syscall listener; listeners run synchronously in
    /// registration order.
    pub fn add_syscall_listener(
        &mut self,
        callback: impl FnMut(u8, &mut Machine) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push(Listener {
            id,
            callback: Box::new(callback),
        });
        id
    }

    /// Removes a listener. Returns false when the id is unknown.
    pub fn remove_syscall_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.id != id);
        self.listeners.len() != before
    }

    /// See [`Machine::read_memory_range`].
    pub fn read_memory_range(&self, start: usize, end: usize) -> Vec<u8> {
        self.machine.read_memory_range(start, end)
    }

    /// See [`Machine::write_memory_byte`].
    pub fn write_memory_byte(&mut self, address: u16, value: u8) {
        self.machine.write_memory_byte(address, value);
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

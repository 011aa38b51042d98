//! Two-pass code generation.
//!
//! Pass 1 walks the (already import-flattened) IR accumulating instruction
//! widths to bind every label to its byte address and every constant to its
//! bound operand, before a single byte is emitted. That ordering is what makes
//! forward references legal. Pass 2 re-walks the IR, resolves each operand
//! (constants by substitution, labels to addresses) and emits bytes through
//! the encoders in [`crate::isa`].
//!
//! Constant resolution carries the *reference site's* offset annotation over
//! the definition's own, including replacing it with no offset at all.

use std::collections::HashMap;

use crate::errors::ParseError;
use crate::isa::{
    Opcode, encode_arithmetic_logic, encode_branching, encode_memory_access, encode_pop,
    encode_push, encode_set, encode_syscall,
};
use crate::operand::{AddressOperand, Offset, Operand, Register};

use super::ir::{IrInstruction, IrNode, IrOperand, IrOperandKind};
use super::lexer::Token;

/// Generates the final byte buffer from import-flattened IR.
pub fn generate(ir: &[IrNode]) -> Result<Vec<u8>, ParseError> {
    CodeGenerator::new().run(ir)
}

/// Operand after constant substitution: only literals, registers and label
/// references remain.
struct ResolvedOperand {
    kind: ResolvedOperandKind,
    offset: Option<Offset>,
    token: Token,
}

enum ResolvedOperandKind {
    Integer(u16),
    Register(Register),
    Label(String),
}

/// Symbol tables and pass-2 encoding logic.
pub struct CodeGenerator {
    labels: HashMap<String, u16>,
    consts: HashMap<String, IrOperand>,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self {
            labels: HashMap::new(),
            consts: HashMap::new(),
        }
    }

    pub fn run(mut self, ir: &[IrNode]) -> Result<Vec<u8>, ParseError> {
        self.register_labels_and_consts(ir)?;

        let mut program = Vec::new();
        for node in ir {
            match node {
                IrNode::Instruction(instr) => self.generate_instruction(instr, &mut program)?,
                // symbols were bound in pass 1, imports were flattened by the driver
                IrNode::LabelDefinition { .. }
                | IrNode::ConstDefinition { .. }
                | IrNode::Import { .. } => {}
            }
        }

        Ok(program)
    }

    /// Pass 1: bind labels to byte addresses and constants to their operands.
    ///
    /// A label binds to the running offset, i.e. the address of the next
    /// instruction. A name defined twice keeps its last definition.
    fn register_labels_and_consts(&mut self, ir: &[IrNode]) -> Result<(), ParseError> {
        let mut offset = 0usize;

        for node in ir {
            match node {
                IrNode::Instruction(instr) => offset += instr.opcode.width(),
                IrNode::LabelDefinition { name, token } => {
                    if offset > u16::MAX as usize {
                        return Err(type_error(token, "label address out of range".to_string()));
                    }
                    self.labels.insert(name.clone(), offset as u16);
                }
                IrNode::ConstDefinition { name, value, .. } => {
                    self.consts.insert(name.clone(), value.clone());
                }
                IrNode::Import { .. } => {}
            }
        }

        Ok(())
    }

    fn generate_instruction(
        &self,
        instr: &IrInstruction,
        out: &mut Vec<u8>,
    ) -> Result<(), ParseError> {
        match instr.opcode {
            Opcode::Halt | Opcode::Return => {
                self.expect_operands(instr, 0, 0)?;
                out.push(instr.opcode as u8);
            }
            Opcode::Set => {
                self.expect_operands(instr, 2, 2)?;
                out.extend_from_slice(&self.generate_set(instr)?);
            }
            Opcode::Peek | Opcode::Poke => {
                self.expect_operands(instr, 1, 1)?;
                out.extend_from_slice(&self.generate_memory_access(instr)?);
            }
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
            | Opcode::Not => {
                self.expect_operands(instr, 2, 2)?;
                out.extend_from_slice(&self.generate_arithmetic_logic(instr)?);
            }
            Opcode::Jump | Opcode::JumpIfZero | Opcode::JumpIfNotZero | Opcode::Call => {
                self.expect_operands(instr, 1, 1)?;
                out.extend_from_slice(&self.generate_branching(instr)?);
            }
            Opcode::Push => {
                self.expect_operands(instr, 1, 1)?;
                out.extend_from_slice(&self.generate_push(instr)?);
            }
            Opcode::Pop => {
                self.expect_operands(instr, 0, 1)?;
                out.extend_from_slice(&self.generate_pop(instr)?);
            }
            Opcode::SysCall => {
                self.expect_operands(instr, 1, 1)?;
                out.extend_from_slice(&self.generate_syscall(instr)?);
            }
        }

        Ok(())
    }

    fn generate_set(&self, instr: &IrInstruction) -> Result<[u8; 4], ParseError> {
        let destination = &instr.operands[0];
        let IrOperandKind::Register(dest) = &destination.kind else {
            return Err(type_error(
                &destination.token,
                format!("'{}' is not a valid destination for 'set'", destination.describe()),
            ));
        };

        let source = self.resolve_const(&instr.operands[1])?;
        let source = match source.kind {
            ResolvedOperandKind::Integer(v) => Operand::Literal((v & 0xff) as u8),
            ResolvedOperandKind::Register(r) => Operand::Register(r),
            ResolvedOperandKind::Label(name) => {
                return Err(type_error(
                    &source.token,
                    format!("'#{name}' is not a valid operand for 'set'"),
                ));
            }
        };

        Ok(encode_set(*dest, source))
    }

    fn generate_arithmetic_logic(&self, instr: &IrInstruction) -> Result<[u8; 4], ParseError> {
        let left = &instr.operands[0];
        let IrOperandKind::Register(left_reg) = &left.kind else {
            return Err(type_error(
                &left.token,
                format!(
                    "'{}' is not a valid left operand for '{}'",
                    left.describe(),
                    instr.opcode.mnemonic()
                ),
            ));
        };

        let right = self.resolve_const(&instr.operands[1])?;
        let right = match right.kind {
            ResolvedOperandKind::Integer(v) => Operand::Literal((v & 0xff) as u8),
            ResolvedOperandKind::Register(r) => Operand::Register(r),
            ResolvedOperandKind::Label(name) => {
                return Err(type_error(
                    &right.token,
                    format!(
                        "'#{name}' is not a valid operand for '{}'",
                        instr.opcode.mnemonic()
                    ),
                ));
            }
        };

        Ok(encode_arithmetic_logic(instr.opcode, *left_reg, right))
    }

    fn generate_memory_access(&self, instr: &IrInstruction) -> Result<[u8; 7], ParseError> {
        let resolved = self.resolve_const(&instr.operands[0])?;
        let offset = resolved.offset.unwrap_or_default();

        let address = match resolved.kind {
            ResolvedOperandKind::Register(r) => AddressOperand::Register(r),
            ResolvedOperandKind::Integer(v) => AddressOperand::Literal(v),
            ResolvedOperandKind::Label(ref name) => {
                AddressOperand::Literal(self.resolve_label(name, &resolved.token)?)
            }
        };

        Ok(encode_memory_access(instr.opcode, address, offset))
    }

    /// Branch targets must resolve to a literal address; registers are legal
    /// in the IR but never in the final encoding.
    fn generate_branching(&self, instr: &IrInstruction) -> Result<[u8; 3], ParseError> {
        let resolved = self.resolve_const(&instr.operands[0])?;

        let address = match resolved.kind {
            ResolvedOperandKind::Integer(v) => v,
            ResolvedOperandKind::Label(ref name) => self.resolve_label(name, &resolved.token)?,
            ResolvedOperandKind::Register(r) => {
                return Err(type_error(
                    &resolved.token,
                    format!("'{}' can't be used as an address", r.name()),
                ));
            }
        };

        Ok(encode_branching(instr.opcode, address))
    }

    fn generate_push(&self, instr: &IrInstruction) -> Result<[u8; 3], ParseError> {
        let resolved = self.resolve_const(&instr.operands[0])?;

        let source = match resolved.kind {
            ResolvedOperandKind::Integer(v) => Operand::Literal((v & 0xff) as u8),
            ResolvedOperandKind::Register(r) => Operand::Register(r),
            ResolvedOperandKind::Label(name) => {
                return Err(type_error(
                    &resolved.token,
                    format!("'#{name}' is not a valid operand for 'push'"),
                ));
            }
        };

        Ok(encode_push(source))
    }

    /// `pop` without an operand targets register `a`.
    fn generate_pop(&self, instr: &IrInstruction) -> Result<[u8; 2], ParseError> {
        let Some(operand) = instr.operands.first() else {
            return Ok(encode_pop(Register::A));
        };

        let IrOperandKind::Register(dest) = &operand.kind else {
            return Err(type_error(
                &operand.token,
                format!("'{}' is not a valid operand for 'pop'", operand.describe()),
            ));
        };

        Ok(encode_pop(*dest))
    }

    fn generate_syscall(&self, instr: &IrInstruction) -> Result<[u8; 2], ParseError> {
        let resolved = self.resolve_const(&instr.operands[0])?;

        let code = match &resolved.kind {
            ResolvedOperandKind::Integer(code) => *code,
            ResolvedOperandKind::Register(_) | ResolvedOperandKind::Label(_) => {
                return Err(type_error(
                    &resolved.token,
                    format!(
                        "'{}' is not a valid operand for syscall",
                        describe_resolved(&resolved)
                    ),
                ));
            }
        };

        Ok(encode_syscall((code & 0xff) as u8))
    }

    /// Substitutes a constant reference with its bound operand. The reference
    /// site's offset annotation replaces the definition's. Non-const operands
    /// pass through unchanged.
    fn resolve_const(&self, operand: &IrOperand) -> Result<ResolvedOperand, ParseError> {
        let make = |kind, offset, token: &Token| ResolvedOperand {
            kind,
            offset,
            token: token.clone(),
        };

        match &operand.kind {
            IrOperandKind::Integer(v) => Ok(make(
                ResolvedOperandKind::Integer(*v),
                operand.offset,
                &operand.token,
            )),
            IrOperandKind::Register(r) => Ok(make(
                ResolvedOperandKind::Register(*r),
                operand.offset,
                &operand.token,
            )),
            IrOperandKind::Label(name) => Ok(make(
                ResolvedOperandKind::Label(name.clone()),
                operand.offset,
                &operand.token,
            )),
            IrOperandKind::Const(name) => {
                let bound = self.consts.get(name).ok_or_else(|| ParseError::Reference {
                    token: operand.token.clone(),
                })?;

                let kind = match &bound.kind {
                    IrOperandKind::Integer(v) => ResolvedOperandKind::Integer(*v),
                    IrOperandKind::Register(r) => ResolvedOperandKind::Register(*r),
                    IrOperandKind::Label(name) => ResolvedOperandKind::Label(name.clone()),
                    // the IR generator rejects const-valued const definitions,
                    // so a stored binding can never itself be a reference
                    IrOperandKind::Const(_) => {
                        return Err(ParseError::Reference {
                            token: bound.token.clone(),
                        });
                    }
                };

                Ok(make(kind, operand.offset, &bound.token))
            }
        }
    }

    fn resolve_label(&self, name: &str, token: &Token) -> Result<u16, ParseError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| ParseError::Reference {
                token: token.clone(),
            })
    }

    fn expect_operands(
        &self,
        instr: &IrInstruction,
        min: usize,
        max: usize,
    ) -> Result<(), ParseError> {
        if instr.operands.len() < min {
            return Err(type_error(
                &instr.token,
                format!("expected operand for '{}'", instr.opcode.mnemonic()),
            ));
        }
        if instr.operands.len() > max {
            let extra = &instr.operands[max];
            return Err(type_error(
                &extra.token,
                format!("unexpected operand for '{}'", instr.opcode.mnemonic()),
            ));
        }
        Ok(())
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn describe_resolved(operand: &ResolvedOperand) -> String {
    match &operand.kind {
        ResolvedOperandKind::Integer(v) => v.to_string(),
        ResolvedOperandKind::Register(r) => r.name().to_string(),
        ResolvedOperandKind::Label(name) => format!("#{name}"),
    }
}

fn type_error(token: &Token, message: String) -> ParseError {
    ParseError::Type {
        token: token.clone(),
        message,
    }
}

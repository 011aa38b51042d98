//! Intermediate representation of an assembly file.
//!
//! The IR generator consumes the token stream in a single left-to-right pass
//! with one token of lookahead and no backtracking, producing a source-order
//! sequence of [`IrNode`]s. Label and constant references stay symbolic here;
//! the code generator resolves them. Every node and operand retains its
//! originating token so later stages can report precise locations.

use crate::errors::ParseError;
use crate::isa::Opcode;
use crate::operand::{Offset, OffsetKind, OffsetSign, Register};

use super::lexer::{Token, TokenKind};

/// Parses an integer literal (`0x…` hex, `0b…` binary, or decimal), wrapping
/// modulo the 16-bit address space. The lexer has already validated the
/// spelling.
pub fn parse_integer(text: &str) -> u16 {
    let (digits, radix) = if let Some(hex) = text.strip_prefix("0x") {
        (hex, 16u32)
    } else if let Some(bin) = text.strip_prefix("0b") {
        (bin, 2)
    } else {
        (text, 10)
    };

    let mut value = 0u32;
    for c in digits.chars() {
        let digit = c.to_digit(radix).unwrap_or(0);
        value = (value.wrapping_mul(radix).wrapping_add(digit)) & 0xffff;
    }
    value as u16
}

/// Operand payload before symbol resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IrOperandKind {
    Integer(u16),
    Register(Register),
    /// Symbolic `#name` reference, resolved to an address by the code
    /// generator.
    Label(String),
    /// Symbolic `$name` reference, substituted by the code generator.
    Const(String),
}

/// One instruction operand, with an optional bracketed displacement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IrOperand {
    pub kind: IrOperandKind,
    pub offset: Option<Offset>,
    pub token: Token,
}

impl IrOperand {
    /// Human-readable rendering for error messages.
    pub fn describe(&self) -> String {
        match &self.kind {
            IrOperandKind::Integer(v) => v.to_string(),
            IrOperandKind::Register(r) => r.name().to_string(),
            IrOperandKind::Label(name) => format!("#{name}"),
            IrOperandKind::Const(name) => format!("${name}"),
        }
    }
}

/// One parsed instruction with its operands still symbolic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IrInstruction {
    pub opcode: Opcode,
    pub operands: Vec<IrOperand>,
    pub token: Token,
}

/// One IR node in source order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IrNode {
    Instruction(IrInstruction),
    LabelDefinition { name: String, token: Token },
    ConstDefinition { name: String, value: IrOperand, token: Token },
    Import { filename: String, token: Token },
}

/// Generates IR from a lexed token stream.
pub fn generate(tokens: Vec<Token>) -> Result<Vec<IrNode>, ParseError> {
    IrGenerator::new(tokens).run()
}

struct IrGenerator {
    tokens: Vec<Token>,
    index: usize,
}

impl IrGenerator {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    fn run(mut self) -> Result<Vec<IrNode>, ParseError> {
        if self.tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut ir = Vec::new();

        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Instruction => ir.push(self.parse_instruction()?),
                TokenKind::Keyword if token.value == "const" => {
                    ir.push(self.parse_const_definition()?)
                }
                TokenKind::Keyword => ir.push(self.parse_import()?),
                TokenKind::LabelDefinition => {
                    self.index += 1;
                    ir.push(IrNode::LabelDefinition {
                        name: token.value.clone(),
                        token,
                    });
                }
                TokenKind::Comment | TokenKind::Newline | TokenKind::Whitespace => {
                    self.index += 1;
                }
                _ => return Err(unexpected(token)),
            }
        }

        Ok(ir)
    }

    /// `const <identifier> = <operand>`; the operand must not itself be a
    /// constant reference, constants only bind literals, registers or labels.
    fn parse_const_definition(&mut self) -> Result<IrNode, ParseError> {
        let keyword = self.expect(TokenKind::Keyword)?;
        self.skip_whitespace();
        let name = self.expect(TokenKind::Identifier)?;
        self.skip_whitespace();
        self.expect(TokenKind::Equals)?;
        self.skip_whitespace();
        let value = self.parse_operand()?;

        if matches!(value.kind, IrOperandKind::Const(_)) {
            return Err(ParseError::Type {
                token: value.token,
                message: "can't use const value in const definition".to_string(),
            });
        }

        Ok(IrNode::ConstDefinition {
            name: name.value,
            value,
            token: keyword,
        })
    }

    /// `import "<filename>"`. The node carries the filename token, so import
    /// errors point at the name rather than the keyword.
    fn parse_import(&mut self) -> Result<IrNode, ParseError> {
        self.expect(TokenKind::Keyword)?;
        self.skip_whitespace();
        let filename = self.expect(TokenKind::Str)?;

        Ok(IrNode::Import {
            filename: filename.value.clone(),
            token: filename,
        })
    }

    /// An instruction mnemonic followed by operands up to the end of the
    /// line. `=` is accepted as an operand separator so `set a=123` and
    /// `set a 123` parse the same.
    fn parse_instruction(&mut self) -> Result<IrNode, ParseError> {
        let token = self.expect(TokenKind::Instruction)?;
        let opcode = match Opcode::from_mnemonic(&token.value) {
            Some(opcode) => opcode,
            None => return Err(unexpected(token)),
        };

        let mut operands = Vec::new();
        loop {
            self.skip_operand_separators();
            // a comment runs to the end of the line, so it ends the operand
            // list just like the newline that follows it
            if matches!(
                self.peek().kind,
                TokenKind::Newline | TokenKind::Eof | TokenKind::Comment
            ) {
                break;
            }
            operands.push(self.parse_operand()?);
        }

        Ok(IrNode::Instruction(IrInstruction {
            opcode,
            operands,
            token,
        }))
    }

    /// One operand: integer, register, label reference or constant
    /// reference, optionally followed immediately by a bracketed offset.
    fn parse_operand(&mut self) -> Result<IrOperand, ParseError> {
        let token = self.peek().clone();

        let kind = match token.kind {
            TokenKind::IntegerLiteral => {
                self.index += 1;
                IrOperandKind::Integer(parse_integer(&token.value))
            }
            TokenKind::RegisterLiteral => {
                self.index += 1;
                match Register::from_name(&token.value) {
                    Some(register) => IrOperandKind::Register(register),
                    None => return Err(unexpected(token)),
                }
            }
            TokenKind::Label => {
                self.index += 1;
                IrOperandKind::Label(token.value.clone())
            }
            TokenKind::Const => {
                self.index += 1;
                IrOperandKind::Const(token.value.clone())
            }
            _ => return Err(unexpected(token)),
        };

        let offset = if self.peek().kind == TokenKind::LeftBracket {
            Some(self.parse_offset()?)
        } else {
            None
        };

        Ok(IrOperand { kind, offset, token })
    }

    /// `[ (+|-)? (integer|register) ]`.
    fn parse_offset(&mut self) -> Result<Offset, ParseError> {
        self.expect(TokenKind::LeftBracket)?;

        let sign = match self.peek().kind {
            TokenKind::Plus => {
                self.index += 1;
                OffsetSign::Plus
            }
            TokenKind::Minus => {
                self.index += 1;
                OffsetSign::Minus
            }
            _ => OffsetSign::Plus,
        };

        let token = self.peek().clone();
        let kind = match token.kind {
            TokenKind::IntegerLiteral => {
                self.index += 1;
                OffsetKind::Literal((parse_integer(&token.value) & 0xff) as u8)
            }
            TokenKind::RegisterLiteral => {
                self.index += 1;
                match Register::from_name(&token.value) {
                    Some(register) => OffsetKind::Register(register),
                    None => return Err(unexpected(token)),
                }
            }
            _ => return Err(unexpected(token)),
        };

        self.expect(TokenKind::RightBracket)?;
        Ok(Offset { kind, sign })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.index).unwrap_or_else(|| self.eof())
    }

    /// The lexer always terminates the stream with an Eof token.
    fn eof(&self) -> &Token {
        self.tokens.last().expect("token stream has an eof token")
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        let token = self.peek().clone();
        if token.kind != kind {
            return Err(unexpected(token));
        }
        self.index += 1;
        Ok(token)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().kind == TokenKind::Whitespace {
            self.index += 1;
        }
    }

    fn skip_operand_separators(&mut self) {
        while matches!(self.peek().kind, TokenKind::Whitespace | TokenKind::Equals) {
            self.index += 1;
        }
    }
}

fn unexpected(token: Token) -> ParseError {
    ParseError::Syntax { token }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::tokenize;

    fn ir(source: &str) -> Vec<IrNode> {
        generate(tokenize("test.basm", source).unwrap()).unwrap()
    }

    fn ir_err(source: &str) -> ParseError {
        generate(tokenize("test.basm", source).unwrap()).unwrap_err()
    }

    fn single_instruction(source: &str) -> IrInstruction {
        let mut nodes = ir(source);
        assert_eq!(nodes.len(), 1, "expected one node for {source:?}");
        match nodes.remove(0) {
            IrNode::Instruction(instr) => instr,
            other => panic!("expected instruction, got {other:?}"),
        }
    }

    #[test]
    fn parse_integer_forms() {
        for (text, expected) in [
            ("0", 0),
            ("1", 1),
            ("123", 123),
            ("0x0", 0),
            ("0x1", 1),
            ("0x123", 291),
            ("0b0", 0),
            ("0b1", 1),
            ("0b101", 5),
        ] {
            assert_eq!(parse_integer(text), expected, "integer {text}");
        }
    }

    #[test]
    fn parse_integer_wraps_mod_address_space() {
        assert_eq!(parse_integer("65536"), 0);
        assert_eq!(parse_integer("0x1ffff"), 0xffff);
    }

    #[test]
    fn push_literal() {
        let instr = single_instruction("push 123");
        assert_eq!(instr.opcode, Opcode::Push);
        assert_eq!(instr.operands.len(), 1);
        assert_eq!(instr.operands[0].kind, IrOperandKind::Integer(123));
        assert_eq!(instr.operands[0].offset, None);
    }

    #[test]
    fn set_with_space_and_equals_forms() {
        for source in ["set a 123", "set a=123", "set a = 123"] {
            let instr = single_instruction(source);
            assert_eq!(instr.opcode, Opcode::Set, "{source}");
            assert_eq!(instr.operands.len(), 2, "{source}");
            assert_eq!(instr.operands[0].kind, IrOperandKind::Register(Register::A));
            assert_eq!(instr.operands[1].kind, IrOperandKind::Integer(123));
        }
    }

    #[test]
    fn jump_to_label() {
        let instr = single_instruction("jump #test");
        assert_eq!(instr.opcode, Opcode::Jump);
        assert_eq!(instr.operands[0].kind, IrOperandKind::Label("test".to_string()));
    }

    #[test]
    fn jump_to_label_with_offset() {
        let instr = single_instruction("jump #test[0]");
        assert_eq!(
            instr.operands[0].offset,
            Some(Offset {
                kind: OffsetKind::Literal(0),
                sign: OffsetSign::Plus,
            })
        );
    }

    #[test]
    fn peek_literal_with_register_offset() {
        let nodes = ir("#label:\npeek 0xabcd[-a]");
        assert_eq!(nodes.len(), 2);
        assert!(matches!(&nodes[0], IrNode::LabelDefinition { name, .. } if name == "label"));
        let IrNode::Instruction(instr) = &nodes[1] else {
            panic!("expected instruction");
        };
        assert_eq!(instr.opcode, Opcode::Peek);
        assert_eq!(instr.operands[0].kind, IrOperandKind::Integer(0xabcd));
        assert_eq!(
            instr.operands[0].offset,
            Some(Offset {
                kind: OffsetKind::Register(Register::A),
                sign: OffsetSign::Minus,
            })
        );
    }

    #[test]
    fn offset_sign_defaults_to_plus() {
        let instr = single_instruction("peek fp[1]");
        assert_eq!(
            instr.operands[0].offset,
            Some(Offset {
                kind: OffsetKind::Literal(1),
                sign: OffsetSign::Plus,
            })
        );
    }

    #[test]
    fn const_definition_integer() {
        let nodes = ir("const test = 0xbb00");
        assert_eq!(nodes.len(), 1);
        let IrNode::ConstDefinition { name, value, .. } = &nodes[0] else {
            panic!("expected const definition");
        };
        assert_eq!(name, "test");
        assert_eq!(value.kind, IrOperandKind::Integer(0xbb00));
    }

    #[test]
    fn const_definition_register() {
        let nodes = ir("const test = x");
        let IrNode::ConstDefinition { value, .. } = &nodes[0] else {
            panic!("expected const definition");
        };
        assert_eq!(value.kind, IrOperandKind::Register(Register::X));
    }

    #[test]
    fn const_definition_rejects_const_value() {
        let err = ir_err("const a = $b");
        assert!(matches!(
            err,
            ParseError::Type { ref message, .. }
                if message == "can't use const value in const definition"
        ));
    }

    #[test]
    fn label_definition() {
        let nodes = ir("#test:");
        assert!(matches!(&nodes[0], IrNode::LabelDefinition { name, .. } if name == "test"));
    }

    #[test]
    fn import_directive() {
        let nodes = ir("import \"lib.basm\"");
        assert!(matches!(&nodes[0], IrNode::Import { filename, .. } if filename == "lib.basm"));
    }

    #[test]
    fn subroutine_using_consts() {
        let nodes = ir("const test_addr = 123\nconst test_code = 234\n\n#print_a:\n  poke $test_addr[0]\n  syscall $test_code\n  return\n");
        assert_eq!(nodes.len(), 6);
        assert!(matches!(nodes[0], IrNode::ConstDefinition { .. }));
        assert!(matches!(nodes[1], IrNode::ConstDefinition { .. }));
        assert!(matches!(nodes[2], IrNode::LabelDefinition { .. }));

        let IrNode::Instruction(poke) = &nodes[3] else {
            panic!("expected poke");
        };
        assert_eq!(poke.opcode, Opcode::Poke);
        assert_eq!(poke.operands[0].kind, IrOperandKind::Const("test_addr".to_string()));
        assert_eq!(
            poke.operands[0].offset,
            Some(Offset {
                kind: OffsetKind::Literal(0),
                sign: OffsetSign::Plus,
            })
        );

        let IrNode::Instruction(syscall) = &nodes[4] else {
            panic!("expected syscall");
        };
        assert_eq!(syscall.operands[0].kind, IrOperandKind::Const("test_code".to_string()));
        assert_eq!(syscall.operands[0].offset, None);

        let IrNode::Instruction(ret) = &nodes[5] else {
            panic!("expected return");
        };
        assert_eq!(ret.opcode, Opcode::Return);
        assert!(ret.operands.is_empty());
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let nodes = ir("// leading comment\n\nhalt // trailing\n");
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn trailing_comment_ends_the_operand_list() {
        let instr = single_instruction("push 123 // the answer minus 19");
        assert_eq!(instr.operands.len(), 1);
        assert_eq!(instr.operands[0].kind, IrOperandKind::Integer(123));
    }

    #[test]
    fn instructions_keep_their_tokens() {
        let nodes = ir("\n  call #test");
        let IrNode::Instruction(call) = &nodes[0] else {
            panic!("expected call");
        };
        assert_eq!(call.token.value, "call");
        assert_eq!((call.token.line, call.token.col), (2, 3));
        assert_eq!(call.operands[0].token.value, "test");
    }

    #[test]
    fn stray_token_is_a_syntax_error() {
        assert!(matches!(ir_err("bogus"), ParseError::Syntax { .. }));
        assert!(matches!(ir_err("push ]"), ParseError::Syntax { .. }));
        assert!(matches!(ir_err("const = 1"), ParseError::Syntax { .. }));
        assert!(matches!(ir_err("import lib"), ParseError::Syntax { .. }));
    }
}

//! Assembly lexer.
//!
//! Converts raw source text into a flat token stream ending in an explicit
//! [`TokenKind::Eof`] token. The scanner has two states: the main state, and a
//! restricted state between `[` and `]` where only offset syntax (signs,
//! registers, integers) is legal, so ordinary identifiers inside brackets are
//! never mistaken for instructions.
//!
//! Every token carries its filename, 1-based line and 1-based column for
//! diagnostics. Lexing fails fast: the first character that fits no rule
//! aborts with a syntax error naming the offending token.

use crate::errors::ParseError;
use crate::isa::Opcode;
use crate::operand::Register;

/// Token kinds produced by the lexer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    Whitespace,
    Comment,
    Newline,
    LeftBracket,
    RightBracket,
    Plus,
    Minus,
    Equals,
    /// `const` or `import`.
    Keyword,
    /// Double-quoted string literal; `value` holds the unescaped content.
    Str,
    /// `#name:`; `value` holds the bare name.
    LabelDefinition,
    /// `#name`; `value` holds the bare name.
    Label,
    /// `$name`; `value` holds the bare name.
    Const,
    RegisterLiteral,
    IntegerLiteral,
    /// An instruction mnemonic, symbolic (`+`, `<<`, …) or named (`push`, …).
    Instruction,
    Identifier,
    /// A character sequence that fits no rule. Never part of a returned
    /// stream; it only ever rides inside the syntax error that aborts lexing.
    Error,
    Eof,
}

/// One lexed token with its source position.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Normalized lexeme: sigils stripped from labels/consts, escapes applied
    /// to strings, raw text otherwise.
    pub value: String,
    pub filename: String,
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub col: u32,
}

impl Token {
    /// `filename:line:col`, the way diagnostics print locations.
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.filename, self.line, self.col)
    }

    /// The token value up to its first newline, for single-line messages.
    pub fn preview(&self) -> &str {
        self.value.split('\n').next().unwrap_or("")
    }
}

/// Symbolic mnemonics that are not word-shaped, longest first so `<<` never
/// lexes as two tokens.
const SYMBOL_MNEMONICS: [&str; 11] = ["<<", ">>", "==", "!=", "+", "-", "*", "/", "&", "|", "~"];

/// Tokenizes one source file.
pub fn tokenize(filename: &str, source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(filename, source).run()
}

struct Lexer<'a> {
    filename: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    in_brackets: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(filename: &'a str, source: &'a str) -> Self {
        Self {
            filename,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            in_brackets: false,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(c) = self.peek() {
            let (line, col) = (self.line, self.col);
            match c {
                '\n' => {
                    self.advance();
                    self.push(TokenKind::Newline, "\n", line, col);
                }
                ' ' | '\t' => {
                    let text = self.take_while(|c| c == ' ' || c == '\t');
                    self.push(TokenKind::Whitespace, &text, line, col);
                }
                '/' if self.peek_at(1) == Some('/') => {
                    let text = self.take_while(|c| c != '\n');
                    self.push(TokenKind::Comment, &text, line, col);
                }
                '[' => {
                    self.advance();
                    self.in_brackets = true;
                    self.push(TokenKind::LeftBracket, "[", line, col);
                }
                ']' => {
                    self.advance();
                    self.in_brackets = false;
                    self.push(TokenKind::RightBracket, "]", line, col);
                }
                _ if self.in_brackets => self.scan_bracketed(c, line, col)?,
                _ => self.scan_main(c, line, col)?,
            }
        }

        let (line, col) = (self.line, self.col);
        self.push(TokenKind::Eof, "", line, col);
        Ok(self.tokens)
    }

    /// Main-state scanning: mnemonics, sigils, strings, words.
    fn scan_main(&mut self, c: char, line: u32, col: u32) -> Result<(), ParseError> {
        match c {
            '"' => return self.scan_string(line, col),
            '#' => {
                self.advance();
                let name = self.take_while(is_word_char);
                if name.is_empty() {
                    return Err(self.error_token("#", line, col));
                }
                if self.peek() == Some(':') {
                    self.advance();
                    self.push(TokenKind::LabelDefinition, &name, line, col);
                } else {
                    self.push(TokenKind::Label, &name, line, col);
                }
                return Ok(());
            }
            '$' => {
                self.advance();
                let name = self.take_while(is_word_char);
                if name.is_empty() {
                    return Err(self.error_token("$", line, col));
                }
                self.push(TokenKind::Const, &name, line, col);
                return Ok(());
            }
            '=' if self.peek_at(1) != Some('=') => {
                self.advance();
                self.push(TokenKind::Equals, "=", line, col);
                return Ok(());
            }
            _ => {}
        }

        for mnemonic in SYMBOL_MNEMONICS {
            if self.matches(mnemonic) {
                self.advance_by(mnemonic.chars().count());
                self.push(TokenKind::Instruction, mnemonic, line, col);
                return Ok(());
            }
        }

        if is_word_char(c) {
            let word = self.take_while(is_word_char);

            // `jump==0` / `jump!=0` are single mnemonics; fuse the trailing
            // condition onto the word before classifying.
            if word == "jump" {
                for suffix in ["==0", "!=0"] {
                    if self.matches(suffix) {
                        self.advance_by(suffix.chars().count());
                        self.push(TokenKind::Instruction, &format!("jump{suffix}"), line, col);
                        return Ok(());
                    }
                }
            }

            let kind = classify_word(&word);
            if kind == TokenKind::Error {
                return Err(self.error_token(&word, line, col));
            }
            self.push(kind, &word, line, col);
            return Ok(());
        }

        Err(self.error_token(&c.to_string(), line, col))
    }

    /// Bracket-state scanning: signs, registers and integers only.
    fn scan_bracketed(&mut self, c: char, line: u32, col: u32) -> Result<(), ParseError> {
        match c {
            '+' => {
                self.advance();
                self.push(TokenKind::Plus, "+", line, col);
                Ok(())
            }
            '-' => {
                self.advance();
                self.push(TokenKind::Minus, "-", line, col);
                Ok(())
            }
            _ if is_word_char(c) => {
                let word = self.take_while(is_word_char);
                if Register::from_name(&word).is_some() {
                    self.push(TokenKind::RegisterLiteral, &word, line, col);
                } else if is_valid_integer(&word) {
                    self.push(TokenKind::IntegerLiteral, &word, line, col);
                } else {
                    return Err(self.error_token(&word, line, col));
                }
                Ok(())
            }
            _ => Err(self.error_token(&c.to_string(), line, col)),
        }
    }

    /// Scans a double-quoted string literal; `\"` and `\\` are the only
    /// escapes. Unterminated literals (newline or end of input before the
    /// closing quote) fail.
    fn scan_string(&mut self, line: u32, col: u32) -> Result<(), ParseError> {
        self.advance(); // opening quote
        let mut value = String::new();

        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error_token(&format!("\"{value}"), line, col)),
                Some('"') => {
                    self.advance();
                    self.push(TokenKind::Str, &value, line, col);
                    return Ok(());
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some(escaped @ ('"' | '\\')) => {
                            value.push(escaped);
                            self.advance();
                        }
                        Some(other) => {
                            return Err(self.error_token(&format!("\\{other}"), line, col));
                        }
                        None => return Err(self.error_token(&format!("\"{value}"), line, col)),
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    /// True when the upcoming characters spell `text` exactly.
    fn matches(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn advance_by(&mut self, count: usize) {
        for _ in 0..count {
            self.advance();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.advance();
        }
        out
    }

    fn push(&mut self, kind: TokenKind, value: &str, line: u32, col: u32) {
        self.tokens.push(Token {
            kind,
            value: value.to_string(),
            filename: self.filename.to_string(),
            line,
            col,
        });
    }

    /// Builds the syntax error that aborts lexing, carrying a dedicated
    /// error token for the offending text.
    fn error_token(&self, value: &str, line: u32, col: u32) -> ParseError {
        ParseError::Syntax {
            token: Token {
                kind: TokenKind::Error,
                value: value.to_string(),
                filename: self.filename.to_string(),
                line,
                col,
            },
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Validates the three integer spellings: `0x…` hex, `0b…` binary, decimal.
fn is_valid_integer(s: &str) -> bool {
    if let Some(hex) = s.strip_prefix("0x") {
        !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
    } else if let Some(bin) = s.strip_prefix("0b") {
        !bin.is_empty() && bin.chars().all(|c| c == '0' || c == '1')
    } else {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
    }
}

/// Classifies a main-state word: keyword, register, mnemonic, integer or
/// identifier. Words that start with a digit but are not valid integers map
/// to [`TokenKind::Error`].
fn classify_word(word: &str) -> TokenKind {
    if word == "const" || word == "import" {
        return TokenKind::Keyword;
    }
    if Register::from_name(word).is_some() {
        return TokenKind::RegisterLiteral;
    }
    if Opcode::from_mnemonic(word).is_some() {
        return TokenKind::Instruction;
    }
    if word.starts_with(|c: char| c.is_ascii_digit()) {
        if is_valid_integer(word) {
            return TokenKind::IntegerLiteral;
        }
        return TokenKind::Error;
    }
    TokenKind::Identifier
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        tokenize("test.basm", source).unwrap()
    }

    /// Tokens with whitespace/comments/newlines stripped, as (kind, value).
    fn significant(source: &str) -> Vec<(TokenKind, String)> {
        lex(source)
            .into_iter()
            .filter(|t| {
                !matches!(
                    t.kind,
                    TokenKind::Whitespace | TokenKind::Comment | TokenKind::Newline | TokenKind::Eof
                )
            })
            .map(|t| (t.kind, t.value))
            .collect()
    }

    #[test]
    fn empty_source_yields_eof() {
        let tokens = lex("");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn register_literals() {
        for name in ["a", "x", "y", "xy", "ip", "sp", "fp"] {
            let tokens = lex(name);
            assert_eq!(tokens.len(), 2, "register {name}");
            assert_eq!(tokens[0].kind, TokenKind::RegisterLiteral);
            assert_eq!(tokens[0].value, name);
            assert_eq!(tokens[1].kind, TokenKind::Eof);
        }
    }

    #[test]
    fn integer_literals() {
        for text in ["0", "1", "123", "0x0", "0x1", "0xabCD", "0b0", "0b1", "0b101"] {
            let tokens = lex(text);
            assert_eq!(tokens[0].kind, TokenKind::IntegerLiteral, "integer {text}");
            assert_eq!(tokens[0].value, text);
        }
    }

    #[test]
    fn malformed_integers_fail() {
        for text in ["0x", "0b", "0b12", "0xg1", "12ab"] {
            let err = tokenize("test.basm", text).unwrap_err();
            assert!(matches!(err, ParseError::Syntax { .. }), "integer {text}");
        }
    }

    #[test]
    fn named_mnemonics() {
        for name in ["halt", "set", "peek", "poke", "jump", "call", "return", "push", "pop", "syscall"] {
            let tokens = lex(name);
            assert_eq!(tokens[0].kind, TokenKind::Instruction, "mnemonic {name}");
            assert_eq!(tokens[0].value, name);
        }
    }

    #[test]
    fn symbolic_mnemonics() {
        for name in ["+", "-", "*", "/", "<<", ">>", "==", "!=", "&", "|", "~"] {
            let tokens = lex(name);
            assert_eq!(tokens[0].kind, TokenKind::Instruction, "mnemonic {name}");
            assert_eq!(tokens[0].value, name);
        }
    }

    #[test]
    fn conditional_jump_mnemonics_fuse() {
        assert_eq!(
            significant("jump==0 #end"),
            vec![
                (TokenKind::Instruction, "jump==0".to_string()),
                (TokenKind::Label, "end".to_string()),
            ]
        );
        assert_eq!(
            significant("jump!=0 123")[0],
            (TokenKind::Instruction, "jump!=0".to_string())
        );
        // plain jump stays a bare mnemonic
        assert_eq!(
            significant("jump 123")[0],
            (TokenKind::Instruction, "jump".to_string())
        );
    }

    #[test]
    fn labels_and_consts() {
        assert_eq!(
            significant("#start: jump #start"),
            vec![
                (TokenKind::LabelDefinition, "start".to_string()),
                (TokenKind::Instruction, "jump".to_string()),
                (TokenKind::Label, "start".to_string()),
            ]
        );
        assert_eq!(
            significant("syscall $print"),
            vec![
                (TokenKind::Instruction, "syscall".to_string()),
                (TokenKind::Const, "print".to_string()),
            ]
        );
    }

    #[test]
    fn bare_sigils_fail() {
        assert!(tokenize("test.basm", "# ").is_err());
        assert!(tokenize("test.basm", "$ ").is_err());
    }

    #[test]
    fn set_with_equals() {
        assert_eq!(
            significant("set a=123"),
            vec![
                (TokenKind::Instruction, "set".to_string()),
                (TokenKind::RegisterLiteral, "a".to_string()),
                (TokenKind::Equals, "=".to_string()),
                (TokenKind::IntegerLiteral, "123".to_string()),
            ]
        );
    }

    #[test]
    fn equals_vs_equal_to_mnemonic() {
        assert_eq!(
            significant("== a x"),
            vec![
                (TokenKind::Instruction, "==".to_string()),
                (TokenKind::RegisterLiteral, "a".to_string()),
                (TokenKind::RegisterLiteral, "x".to_string()),
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let tokens = lex("halt // the end\nhalt");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Instruction,
                TokenKind::Whitespace,
                TokenKind::Comment,
                TokenKind::Newline,
                TokenKind::Instruction,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[2].value, "// the end");
    }

    #[test]
    fn bracket_state_restricts_grammar() {
        assert_eq!(
            significant("peek 0xabcd[-a]"),
            vec![
                (TokenKind::Instruction, "peek".to_string()),
                (TokenKind::IntegerLiteral, "0xabcd".to_string()),
                (TokenKind::LeftBracket, "[".to_string()),
                (TokenKind::Minus, "-".to_string()),
                (TokenKind::RegisterLiteral, "a".to_string()),
                (TokenKind::RightBracket, "]".to_string()),
            ]
        );
        // identifiers in brackets are not instructions, they are errors
        assert!(tokenize("test.basm", "peek 1[halt]").is_err());
        assert!(tokenize("test.basm", "peek 1[$c]").is_err());
    }

    #[test]
    fn bracket_signs_only_inside_brackets() {
        // outside brackets `-` is the subtract mnemonic
        assert_eq!(
            significant("- a 1")[0],
            (TokenKind::Instruction, "-".to_string())
        );
        assert_eq!(
            significant("peek fp[+2]"),
            vec![
                (TokenKind::Instruction, "peek".to_string()),
                (TokenKind::RegisterLiteral, "fp".to_string()),
                (TokenKind::LeftBracket, "[".to_string()),
                (TokenKind::Plus, "+".to_string()),
                (TokenKind::IntegerLiteral, "2".to_string()),
                (TokenKind::RightBracket, "]".to_string()),
            ]
        );
    }

    #[test]
    fn keywords_and_strings() {
        assert_eq!(
            significant("import \"lib.basm\""),
            vec![
                (TokenKind::Keyword, "import".to_string()),
                (TokenKind::Str, "lib.basm".to_string()),
            ]
        );
        assert_eq!(
            significant("const addr = 0xbb00"),
            vec![
                (TokenKind::Keyword, "const".to_string()),
                (TokenKind::Identifier, "addr".to_string()),
                (TokenKind::Equals, "=".to_string()),
                (TokenKind::IntegerLiteral, "0xbb00".to_string()),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            significant(r#"import "a\"b\\c""#),
            vec![
                (TokenKind::Keyword, "import".to_string()),
                (TokenKind::Str, "a\"b\\c".to_string()),
            ]
        );
    }

    #[test]
    fn unterminated_string_fails() {
        assert!(tokenize("test.basm", "import \"lib").is_err());
        assert!(tokenize("test.basm", "import \"lib\nhalt").is_err());
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let tokens = lex("halt\n  push 123");
        let halt = &tokens[0];
        assert_eq!((halt.line, halt.col), (1, 1));
        let push = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Instruction && t.value == "push")
            .unwrap();
        assert_eq!((push.line, push.col), (2, 3));
        let int = tokens
            .iter()
            .find(|t| t.kind == TokenKind::IntegerLiteral)
            .unwrap();
        assert_eq!((int.line, int.col), (2, 8));
        assert_eq!(int.filename, "test.basm");
    }

    #[test]
    fn invalid_character_reports_position() {
        let err = tokenize("test.basm", "halt\n  ?").unwrap_err();
        let ParseError::Syntax { token } = err else {
            panic!("expected syntax error");
        };
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.value, "?");
        assert_eq!((token.line, token.col), (2, 3));
    }
}

//! Import-resolving assembler driver.
//!
//! Drives the lexer, IR generator and code generator across a file graph.
//! File access goes through the injected [`FileResolver`] collaborator, so
//! the pipeline itself has no file-system dependency: the CLI plugs in
//! [`FsResolver`], tests plug in an in-memory map.
//!
//! Each file is lexed and IR-generated exactly once, memoized by the filename
//! the `import` directive spelled. Import cycles are rejected with a
//! dedicated error rather than recursing forever. Flattening inlines a file's
//! IR at its *first* encountered import and drops later imports of the same
//! file, so every file contributes its code exactly once, in import-then-body
//! order.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::io;
use std::path::PathBuf;

use crate::errors::ParseError;

use super::codegen;
use super::ir::{self, IrNode};
use super::lexer::{self, Token};

/// File-reading collaborator injected into the [`Assembler`].
pub trait FileResolver {
    fn read_file(&self, filename: &str) -> io::Result<String>;
}

/// Reads files relative to a root directory.
#[derive(Clone, Debug)]
pub struct FsResolver {
    root: PathBuf,
}

impl FsResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileResolver for FsResolver {
    fn read_file(&self, filename: &str) -> io::Result<String> {
        std::fs::read_to_string(self.root.join(filename))
    }
}

/// Assembles an entry file and its transitive imports into one byte buffer.
pub struct Assembler<R: FileResolver> {
    resolver: R,
    /// Lexed + IR-generated files, keyed by the imported filename.
    imports: HashMap<String, Vec<IrNode>>,
    /// Raw sources, kept for diagnostics.
    sources: HashMap<String, String>,
    /// Files whose import walk is still on the stack, for cycle detection.
    in_progress: HashSet<String>,
}

impl<R: FileResolver> Assembler<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            imports: HashMap::new(),
            sources: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Resolves `entry` and every transitive import, flattens the combined IR
    /// in import-then-body order, and generates the final byte buffer.
    pub fn assemble(&mut self, entry: &str) -> Result<Vec<u8>, ParseError> {
        self.resolve_imports(entry, None)?;

        let mut combined = Vec::new();
        let mut included = HashSet::new();
        self.combine_ir(entry, &mut combined, &mut included);

        codegen::generate(&combined)
    }

    /// The raw source of a resolved file, for diagnostic rendering.
    pub fn source(&self, filename: &str) -> Option<&str> {
        self.sources.get(filename).map(String::as_str)
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Depth-first import resolution, memoized per filename.
    ///
    /// `import_token` is the directive that requested this file, `None` for
    /// the entry file. A file that is revisited while its own walk is still
    /// in progress closes a cycle and is rejected.
    fn resolve_imports(
        &mut self,
        filename: &str,
        import_token: Option<&Token>,
    ) -> Result<(), ParseError> {
        if self.imports.contains_key(filename) {
            return Ok(());
        }
        // a cycle always closes over an import directive, so the entry file
        // (no token) can never trip this
        if let Some(token) = import_token {
            if self.in_progress.contains(filename) {
                return Err(ParseError::CircularImport {
                    token: token.clone(),
                });
            }
        }
        self.in_progress.insert(filename.to_string());

        let source = self
            .resolver
            .read_file(filename)
            .map_err(|e| ParseError::Io {
                filename: filename.to_string(),
                reason: e.to_string(),
            })?;
        let tokens = lexer::tokenize(filename, &source)?;
        let nodes = ir::generate(tokens)?;
        self.sources.insert(filename.to_string(), source);

        let imports: Vec<(String, Token)> = nodes
            .iter()
            .filter_map(|node| match node {
                IrNode::Import { filename, token } => Some((filename.clone(), token.clone())),
                _ => None,
            })
            .collect();
        for (imported, token) in &imports {
            self.resolve_imports(imported, Some(token))?;
        }

        self.in_progress.remove(filename);
        self.imports.insert(filename.to_string(), nodes);
        Ok(())
    }

    /// Flattens the import graph into one linear IR sequence. Each file is
    /// inlined at its first encountered import; later imports of it vanish.
    fn combine_ir(&self, filename: &str, out: &mut Vec<IrNode>, included: &mut HashSet<String>) {
        if !included.insert(filename.to_string()) {
            return;
        }

        let Some(nodes) = self.imports.get(filename) else {
            return;
        };
        for node in nodes {
            match node {
                IrNode::Import {
                    filename: imported, ..
                } => self.combine_ir(imported, out, included),
                other => out.push(other.clone()),
            }
        }
    }
}

/// Formats a compiler-style report for an assembly failure: the message, the
/// source location, and the offending line with a caret under the column.
///
/// `source` is the text of the file the error points into; pass `None` when
/// it is unavailable and only the message line is emitted.
pub fn render_diagnostic(source: Option<&str>, error: &ParseError) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {error}");

    let Some(token) = error.token() else {
        return diag;
    };
    let _ = writeln!(diag, " --> {}", token.location());

    let Some(raw_line) = source.and_then(|s| s.lines().nth(token.line.saturating_sub(1) as usize))
    else {
        return diag;
    };
    let line_text = raw_line.trim_end_matches('\r');
    let underline = " ".repeat(token.col.saturating_sub(1) as usize);
    let _ = writeln!(diag, "  |");
    let _ = writeln!(diag, "{:>4} | {}", token.line, line_text);
    let _ = writeln!(diag, "  | {underline}^");

    diag
}

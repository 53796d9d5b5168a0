//! The compilation driver: queue → lex → parse → generate.
//!
//! Files are pulled off the context's FIFO queue and lexed one at a time;
//! `#include` directives push more paths onto the tail, and a file is
//! processed at most once. Each phase then runs over every file before the
//! next begins, accumulating diagnostics: a compilation reports as many
//! problems as possible per run, and a non-empty error list in any phase
//! suppresses the phases after it.
//!
//! When id generation is enabled, [`write_string_ids`] rewrites the source
//! files afterwards, inserting `&XXXXXXXX` suffixes at the recorded
//! positions (after taking a `.backup` copy of each touched file).

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::codegen;
use crate::context::CompileContext;
use crate::error::{BytecodeError, ParseError};
use crate::lexer;
use crate::parser;
use crate::project::ProjectFormat;

/// Accumulated diagnostics from the phase that stopped the compilation.
#[derive(Debug)]
pub enum CompileErrors {
    /// Source files that could not be read.
    Read(Vec<(String, String)>),
    /// Parse errors, grouped by file.
    Parse(Vec<(String, Vec<ParseError>)>),
    /// Bytecode-generation errors, grouped by file.
    Generate(Vec<(String, Vec<BytecodeError>)>),
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileErrors::Read(files) => {
                for (file, message) in files {
                    writeln!(f, "Failed to read file '{}': {}", file, message)?;
                }
            }
            CompileErrors::Parse(files) => {
                for (file, errors) in files {
                    for error in errors {
                        if error.line == 0 && error.column == 0 {
                            writeln!(f, "[{}:?:?] {}", file, error)?;
                        } else {
                            writeln!(f, "[{}:{}:{}] {}", file, error.line, error.column, error)?;
                        }
                    }
                }
            }
            CompileErrors::Generate(files) => {
                for (file, errors) in files {
                    for error in errors {
                        if error.line == 0 && error.column == 0 {
                            writeln!(f, "[{}:?:?] {}", file, error)?;
                        } else {
                            writeln!(f, "[{}:{}:{}] {}", file, error.line, error.column, error)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

/// Compiles a project rooted at `base_dir`. On success the returned context
/// carries the finished instruction stream, string table, symbol tables and
/// translation records, ready for serialization.
pub fn compile(project: ProjectFormat, base_dir: &Path) -> Result<CompileContext, CompileErrors> {
    let mut ctx = CompileContext::new(project);
    for file in &ctx.project.options.files {
        ctx.queue.push_back(PathBuf::from(file));
    }

    // Lex every queued file, breadth-first; includes join the tail.
    let mut read_errors = Vec::new();
    while let Some(file) = ctx.queue.pop_front() {
        let path = if file.is_absolute() {
            file
        } else {
            base_dir.join(file)
        };
        let key = fs::canonicalize(&path)
            .unwrap_or_else(|_| path.clone())
            .to_string_lossy()
            .into_owned();
        if ctx.files.contains(&key) {
            continue;
        }
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                read_errors.push((path.to_string_lossy().into_owned(), e.to_string()));
                continue;
            }
        };
        ctx.current_file = key.clone();
        let mut tokens = Vec::new();
        lexer::lex(&source, &mut ctx, &mut tokens);
        ctx.token_list.push((key.clone(), tokens));
        ctx.files.insert(key);
    }
    if !read_errors.is_empty() {
        return Err(CompileErrors::Read(read_errors));
    }

    run_parse_and_generate(ctx)
}

/// Compiles a single in-memory source, bypassing file I/O. Includes are
/// ignored. Used by tests and tooling.
pub fn compile_source(
    name: &str,
    source: &str,
    project: ProjectFormat,
) -> Result<CompileContext, CompileErrors> {
    let mut ctx = CompileContext::new(project);
    ctx.current_file = name.to_string();
    let mut tokens = Vec::new();
    lexer::lex(source, &mut ctx, &mut tokens);
    ctx.queue.clear();
    ctx.token_list.push((name.to_string(), tokens));
    ctx.files.insert(name.to_string());
    run_parse_and_generate(ctx)
}

fn run_parse_and_generate(mut ctx: CompileContext) -> Result<CompileContext, CompileErrors> {
    // Parse each token stream.
    let token_list = std::mem::take(&mut ctx.token_list);
    let mut parse_errors = Vec::new();
    for (file, tokens) in &token_list {
        ctx.current_file = file.clone();
        let result = parser::parse(tokens, &ctx.project.options);
        if result.errors.is_empty() {
            ctx.parse_list.push((file.clone(), result));
        } else {
            parse_errors.push((file.clone(), result.errors));
        }
    }
    ctx.token_list = token_list;
    if !parse_errors.is_empty() {
        return Err(CompileErrors::Parse(parse_errors));
    }

    // Generate bytecode for each parsed file.
    let parse_list = std::mem::take(&mut ctx.parse_list);
    let mut generate_errors = Vec::new();
    for (file, parsed) in &parse_list {
        ctx.current_file = file.clone();
        if ctx.project.options.add_string_ids {
            ctx.string_id_positions.entry(file.clone()).or_default();
        }
        let result = codegen::generate(parsed, &mut ctx);
        if !result.errors.is_empty() {
            generate_errors.push((file.clone(), result.errors));
        }
    }
    ctx.parse_list = parse_list;
    if !generate_errors.is_empty() {
        return Err(CompileErrors::Generate(generate_errors));
    }

    Ok(ctx)
}

/// Writes freshly assigned localization ids back into the source files.
/// Every touched file first gets a `.backup` copy next to it.
pub fn write_string_ids(ctx: &CompileContext) -> io::Result<()> {
    for (file, positions) in &ctx.string_id_positions {
        if positions.is_empty() {
            continue;
        }
        fs::copy(file, format!("{}.backup", file))?;

        let mut data = fs::read(file)?;
        let mut displacement = 0usize;
        for &(offset, id) in positions {
            let suffix = format!("&{:08x}", id);
            let at = offset as usize + displacement;
            data.splice(at..at, suffix.bytes());
            displacement += suffix.len();
        }
        fs::write(file, data)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_source_produces_bytecode() {
        let ctx =
            compile_source("test.dx", "scene s { \"hi\" }", ProjectFormat::default()).unwrap();
        assert!(!ctx.bytecode.is_empty());
        assert!(ctx.scene_bytecode.contains_key("s"));
    }

    #[test]
    fn parse_errors_suppress_generation() {
        let err = compile_source("test.dx", "scene s { ) }", ProjectFormat::default())
            .unwrap_err();
        match err {
            CompileErrors::Parse(files) => {
                assert_eq!(files.len(), 1);
                assert!(!files[0].1.is_empty());
            }
            other => panic!("expected parse errors, got {:?}", other),
        }
    }

    #[test]
    fn generation_errors_are_grouped_by_file() {
        let err = compile_source(
            "test.dx",
            "scene s { continue }",
            ProjectFormat::default(),
        )
        .unwrap_err();
        match err {
            CompileErrors::Generate(files) => {
                assert_eq!(files[0].0, "test.dx");
                assert!(!files[0].1.is_empty());
            }
            other => panic!("expected generation errors, got {:?}", other),
        }
    }
}

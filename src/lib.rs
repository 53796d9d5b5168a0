//! # diannex
//!
//! Compiler for the diannex dialogue scripting language: it transforms one
//! or more human-authored source files into a single compact binary program
//! (`.dxb`) plus optional translation side-files (`.dxt`) with stable
//! identifiers for translators.
//!
//! ## Pipeline
//!
//! ```text
//! Source files (.dx)
//!       │
//!       ▼
//! ┌───────────────────┐
//! │  Lexer            │ Tokens + preprocessor (#include, #ifdef)
//! └─────────┬─────────┘
//!           ▼
//! ┌───────────────────┐
//! │  Parser           │ Syntax tree, recoverable errors
//! └─────────┬─────────┘
//!           ▼
//! ┌───────────────────┐
//! │  Bytecode         │ Flat instruction stream, string interning,
//! │  generator        │ symbol tables, translation records
//! └─────────┬─────────┘
//!           ▼
//! ┌───────────────────┐
//! │  Serialization    │ .dxb binary, .dxt translation files
//! └───────────────────┘
//! ```
//!
//! The [`context::CompileContext`] threads shared state through every
//! phase: the file queue, the interned string table, the instruction
//! buffer, scene/function/definition tables and the translation record.
//!
//! ## Example
//!
//! ```
//! use diannex::compile::compile_source;
//! use diannex::project::ProjectFormat;
//!
//! let ctx = compile_source(
//!     "demo.dx",
//!     "namespace n { scene s { \"hello\" } }",
//!     ProjectFormat::default(),
//! )
//! .unwrap();
//! assert!(ctx.scene_bytecode.contains_key("n.s"));
//! ```

pub mod ast;
pub mod binary;
pub mod cli;
pub mod codegen;
pub mod compile;
pub mod context;
pub mod error;
pub mod instruction;
pub mod lexer;
pub mod parser;
pub mod project;
pub mod style;
pub mod token;
pub mod translation;

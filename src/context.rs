//! Shared compilation state threaded through every phase.
//!
//! The [`CompileContext`] owns the file queue, the per-file token and parse
//! lists, the instruction buffer, the interned string table, the symbol
//! tables for scenes/functions/definitions, and the translation record. The
//! bytecode generator mutates it through small, pure state transitions:
//! `intern`, the `emit_*` family (each advances the running byte offset by
//! the instruction's on-wire size), jump patching, and the local-frame and
//! loop-context stacks.
//!
//! ## Jump patching
//!
//! Forward jumps are emitted with a zero argument via
//! [`CompileContext::emit_placeholder_jump`], which returns the instruction's
//! index. [`CompileContext::patch`] later fills the argument with the signed
//! distance from the byte following the jump to the current offset (or to a
//! target instruction's offset with [`CompileContext::patch_to`]).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::ast::ParseResult;
use crate::instruction::{Arg, Instruction, Opcode};
use crate::project::ProjectFormat;
use crate::token::Token;

/// One translation-stream entry: a localizable string or a translator hint.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationInfo {
    /// Fully qualified symbol the string belongs to; empty when the private
    /// translation file is disabled.
    pub key: String,
    /// Marked comments become `#` hint lines in the private file.
    pub is_comment: bool,
    pub text: String,
    /// Stable id parsed from the source, if any.
    pub localized_string_id: Option<u32>,
}

/// Patch bookkeeping for one enclosing loop (or switch) construct.
#[derive(Debug, Default)]
pub struct LoopContext {
    /// Indices of placeholder jumps to the continue target.
    pub continue_patches: Vec<usize>,
    /// Indices of placeholder jumps past the end of the loop.
    pub end_patches: Vec<usize>,
    /// Opcodes replayed before a `return` escapes this construct (a switch
    /// installs `pop` here to drop its selector).
    pub return_cleanup: Vec<Opcode>,
    /// Depth of `local_count_stack` at entry; locals above it are freed
    /// when a `continue`/`break` leaves the construct.
    pub local_frame_depth: usize,
}

/// The value a definition resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionValue {
    /// Index into the translation stream.
    Translated(i32),
    /// Raw text, interned at serialization time (excluded from translation).
    Raw(String),
}

/// The shared mutable state of one compilation run.
#[derive(Debug)]
pub struct CompileContext {
    pub project: ProjectFormat,
    /// Macro lookup for `#ifdef`/`#ifndef`, derived from the project once.
    pub macros: HashMap<String, String>,

    /// Source files waiting to be lexed; `#include` appends to the tail.
    pub queue: VecDeque<PathBuf>,
    pub current_file: String,
    /// Files already lexed, for include deduplication.
    pub files: HashSet<String>,

    pub token_list: Vec<(String, Vec<Token>)>,
    pub parse_list: Vec<(String, ParseResult)>,

    /// Scene symbol → entry-point instruction indices (body first, then the
    /// two entries per flag); in registration order.
    pub scene_bytecode: IndexMap<String, Vec<i32>>,
    /// Function symbol → entry-point instruction indices, as for scenes.
    pub function_bytecode: IndexMap<String, Vec<i32>>,
    /// Definition symbol → (value, body entry index or -1).
    pub definition_bytecode: IndexMap<String, (DefinitionValue, i32)>,

    pub bytecode: Vec<Instruction>,
    /// Running byte offset of the next instruction.
    pub offset: u32,

    internal_strings: Vec<String>,
    string_index: HashMap<String, i32>,

    /// Enclosing namespace/scene/function names, joined with `.` to form
    /// fully qualified symbols.
    pub symbol_stack: Vec<String>,
    /// Names of currently live locals; position is the slot id.
    pub local_stack: Vec<String>,
    /// Locals declared per open frame; popping a frame frees that many.
    pub local_count_stack: Vec<usize>,
    pub loop_stack: Vec<LoopContext>,

    /// Next index in the translation stream (non-comment entries only).
    pub translation_string_index: i32,
    pub translation_info: Vec<TranslationInfo>,

    /// Per-file `(byte offset, id)` insertions, kept sorted by offset.
    pub string_id_positions: HashMap<String, Vec<(u32, u32)>>,
    pub max_string_id: u32,

    /// Whether a function (rather than a scene) body is being generated.
    pub generating_function: bool,
}

impl CompileContext {
    pub fn new(project: ProjectFormat) -> Self {
        let macros = project.options.macro_table();
        CompileContext {
            project,
            macros,
            queue: VecDeque::new(),
            current_file: String::new(),
            files: HashSet::new(),
            token_list: Vec::new(),
            parse_list: Vec::new(),
            scene_bytecode: IndexMap::new(),
            function_bytecode: IndexMap::new(),
            definition_bytecode: IndexMap::new(),
            bytecode: Vec::new(),
            offset: 0,
            internal_strings: Vec::new(),
            string_index: HashMap::new(),
            symbol_stack: Vec::new(),
            local_stack: Vec::new(),
            local_count_stack: Vec::new(),
            loop_stack: Vec::new(),
            translation_string_index: 0,
            translation_info: Vec::new(),
            string_id_positions: HashMap::new(),
            max_string_id: 0,
            generating_function: false,
        }
    }

    /// Interns a string into the internal table, returning its index.
    /// The same string always maps to the same index.
    pub fn intern(&mut self, s: &str) -> i32 {
        if let Some(&id) = self.string_index.get(s) {
            return id;
        }
        let id = self.internal_strings.len() as i32;
        self.internal_strings.push(s.to_string());
        self.string_index.insert(s.to_string(), id);
        id
    }

    /// The interned string table, in index order.
    pub fn internal_strings(&self) -> &[String] {
        &self.internal_strings
    }

    fn push_instruction(&mut self, opcode: Opcode, arg: Arg) {
        let instr = Instruction {
            opcode,
            offset: self.offset,
            arg,
        };
        self.offset += instr.wire_size();
        self.bytecode.push(instr);
    }

    pub fn emit(&mut self, opcode: Opcode) {
        self.push_instruction(opcode, Arg::None);
    }

    pub fn emit_int(&mut self, opcode: Opcode, arg: i32) {
        self.push_instruction(opcode, Arg::Int(arg));
    }

    pub fn emit_int2(&mut self, opcode: Opcode, a: i32, b: i32) {
        self.push_instruction(opcode, Arg::Two(a, b));
    }

    pub fn emit_double(&mut self, opcode: Opcode, arg: f64) {
        self.push_instruction(opcode, Arg::Double(arg));
    }

    pub fn emit_call(&mut self, arg_count: u32, candidates: Vec<String>) {
        self.push_instruction(
            Opcode::PatchCall,
            Arg::Call {
                arg_count,
                candidates,
            },
        );
    }

    /// Emits a jump-family instruction with a zero argument and returns its
    /// index for later patching.
    pub fn emit_placeholder_jump(&mut self, opcode: Opcode) -> usize {
        self.push_instruction(opcode, Arg::Int(0));
        self.bytecode.len() - 1
    }

    /// Patches the jump at `index` to land on the current offset.
    pub fn patch(&mut self, index: usize) {
        let offset = self.offset;
        let instr = &mut self.bytecode[index];
        instr.arg = Arg::Int(offset as i32 - (instr.offset as i32 + 5));
    }

    /// Patches the jump at `index` to land on the instruction at `target`
    /// (or on the current offset when `target` is one past the end).
    pub fn patch_to(&mut self, index: usize, target: usize) {
        if target == self.bytecode.len() {
            self.patch(index);
            return;
        }
        let target_offset = self.bytecode[target].offset;
        let instr = &mut self.bytecode[index];
        instr.arg = Arg::Int(target_offset as i32 - (instr.offset as i32 + 5));
    }

    /// The argument a backwards jump emitted right now needs in order to
    /// land on `target_offset`.
    pub fn back_jump_arg(&self, target_offset: u32) -> i32 {
        target_offset as i32 - (self.offset as i32 + 5)
    }

    /// Opens a local-variable frame.
    pub fn push_local_frame(&mut self) {
        self.local_count_stack.push(0);
    }

    /// Closes the innermost frame, emitting a `freeloc` for each local it
    /// declared (innermost slots first).
    pub fn pop_local_frame(&mut self) {
        let count = self.local_count_stack.pop().unwrap_or(0);
        for _ in 0..count {
            self.local_stack.pop();
            self.emit_int(Opcode::FreeLocal, self.local_stack.len() as i32);
        }
    }

    /// Emits `freeloc`s for every local declared in frames above
    /// `frame_depth`, without popping any frame or name. Used by
    /// `continue`/`break`, which jump out of scopes whose frames stay open
    /// in the generator.
    pub fn free_locals_down_to(&mut self, frame_depth: usize) {
        let mut slot = self.local_stack.len() as i32 - 1;
        for frame in (frame_depth..self.local_count_stack.len()).rev() {
            for _ in 0..self.local_count_stack[frame] {
                self.emit_int(Opcode::FreeLocal, slot);
                slot -= 1;
            }
        }
    }

    /// Resolves a variable name to a live local slot.
    pub fn find_local(&self, name: &str) -> Option<i32> {
        self.local_stack
            .iter()
            .position(|n| n == name)
            .map(|i| i as i32)
    }

    /// Opens a loop context with the given return-cleanup opcodes.
    pub fn push_loop(&mut self, return_cleanup: Vec<Opcode>) {
        let depth = self.local_count_stack.len().saturating_sub(1);
        self.loop_stack.push(LoopContext {
            continue_patches: Vec::new(),
            end_patches: Vec::new(),
            return_cleanup,
            local_frame_depth: depth,
        });
    }

    /// Closes the innermost loop context, returning its patch lists to the
    /// caller (which decides where continues and breaks land).
    pub fn pop_loop(&mut self) -> LoopContext {
        self.loop_stack.pop().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectFormat;

    fn context() -> CompileContext {
        CompileContext::new(ProjectFormat::default())
    }

    #[test]
    fn intern_deduplicates() {
        let mut ctx = context();
        let a = ctx.intern("hello");
        let b = ctx.intern("world");
        let c = ctx.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(ctx.internal_strings(), &["hello", "world"]);
    }

    #[test]
    fn offset_advances_by_wire_size() {
        let mut ctx = context();
        ctx.emit(Opcode::Pop); // 1
        ctx.emit_int(Opcode::PushInt, 3); // 5
        ctx.emit_double(Opcode::PushDouble, 0.5); // 9
        ctx.emit_int2(Opcode::PushInterpString, 0, 2); // 9
        assert_eq!(ctx.offset, 24);
        assert_eq!(ctx.bytecode[0].offset, 0);
        assert_eq!(ctx.bytecode[1].offset, 1);
        assert_eq!(ctx.bytecode[2].offset, 6);
        assert_eq!(ctx.bytecode[3].offset, 15);
    }

    #[test]
    fn patch_is_relative_to_end_of_jump() {
        let mut ctx = context();
        let jump = ctx.emit_placeholder_jump(Opcode::JumpFalsey);
        ctx.emit(Opcode::Pop);
        ctx.emit(Opcode::Pop);
        ctx.patch(jump);
        // jump occupies bytes 0..5; the target is byte 7, so the argument
        // is 7 - 5 = 2.
        assert_eq!(ctx.bytecode[jump].arg, Arg::Int(2));
    }

    #[test]
    fn patch_to_targets_instruction_offset() {
        let mut ctx = context();
        ctx.emit(Opcode::Pop);
        let jump = ctx.emit_placeholder_jump(Opcode::Jump);
        ctx.emit(Opcode::Pop);
        ctx.patch_to(jump, 0);
        // jump occupies bytes 1..6; target offset 0 gives 0 - 6 = -6.
        assert_eq!(ctx.bytecode[jump].arg, Arg::Int(-6));
    }

    #[test]
    fn pop_local_frame_frees_in_reverse() {
        let mut ctx = context();
        ctx.push_local_frame();
        *ctx.local_count_stack.last_mut().unwrap() = 2;
        ctx.local_stack.push("a".to_string());
        ctx.local_stack.push("b".to_string());
        ctx.pop_local_frame();
        assert!(ctx.local_stack.is_empty());
        let slots: Vec<_> = ctx
            .bytecode
            .iter()
            .map(|i| match i.arg {
                Arg::Int(v) => v,
                _ => panic!("expected int arg"),
            })
            .collect();
        assert_eq!(slots, vec![1, 0]);
    }

    #[test]
    fn free_locals_down_to_keeps_stacks_intact() {
        let mut ctx = context();
        ctx.push_local_frame();
        *ctx.local_count_stack.last_mut().unwrap() = 1;
        ctx.local_stack.push("outer".to_string());
        ctx.push_local_frame();
        *ctx.local_count_stack.last_mut().unwrap() = 1;
        ctx.local_stack.push("inner".to_string());

        ctx.free_locals_down_to(1);
        assert_eq!(ctx.local_stack.len(), 2);
        assert_eq!(ctx.local_count_stack.len(), 2);
        assert_eq!(ctx.bytecode.len(), 1);
        assert_eq!(ctx.bytecode[0].arg, Arg::Int(1));
    }

    #[test]
    fn find_local_returns_slot() {
        let mut ctx = context();
        ctx.local_stack.push("x".to_string());
        ctx.local_stack.push("y".to_string());
        assert_eq!(ctx.find_local("x"), Some(0));
        assert_eq!(ctx.find_local("y"), Some(1));
        assert_eq!(ctx.find_local("z"), None);
    }
}

//! Bytecode generation: lowering parsed trees into the instruction stream.
//!
//! The generator walks one file's tree, appending instructions to the
//! context's flat buffer, interning strings, registering scene, function and
//! definition entry points, and recording translation strings. Errors are
//! collected into a [`BytecodeResult`], never thrown; a file with errors
//! simply produces no output.
//!
//! The walk is split across three modules the way the pipeline splits the
//! language: this module handles the program level (namespaces, scenes,
//! functions, definition groups, flags), [`stmt`] lowers scene statements
//! and their control flow, and [`expr`] lowers expressions.
//!
//! ## Symbols and calls
//!
//! The symbol stack holds the enclosing namespace and scene/function names;
//! joining it with `.` yields the fully qualified symbol used for table
//! registration and translation keys. Calls compile to a `call` patch
//! instruction carrying every qualification of the callee name visible from
//! the call site; resolution happens at load time, not here.

mod expr;
mod stmt;

pub(crate) use expr::generate_expression;
pub(crate) use stmt::generate_scene_block;

use crate::ast::{Flag, Node, ParseResult};
use crate::context::{CompileContext, DefinitionValue, TranslationInfo};
use crate::error::{BytecodeError, BytecodeErrorKind};
use crate::instruction::Opcode;
use crate::token::StringData;

/// Errors collected while generating one file.
#[derive(Debug, Default)]
pub struct BytecodeResult {
    pub errors: Vec<BytecodeError>,
}

/// Lowers one parsed file into the context's instruction stream.
pub fn generate(parsed: &ParseResult, ctx: &mut CompileContext) -> BytecodeResult {
    let mut res = BytecodeResult::default();
    if let Node::Block { children } = &parsed.root {
        generate_block(children, ctx, &mut res);
    }
    res
}

/// The current fully qualified symbol, optionally trimmed of its innermost
/// `trim` components.
pub(crate) fn expand_symbol(ctx: &CompileContext, trim: usize) -> String {
    let end = ctx.symbol_stack.len().saturating_sub(trim);
    ctx.symbol_stack[..end].join(".")
}

/// Enters a string (or translator comment) into the translation stream and
/// returns the index the emitted instruction must carry.
///
/// Only non-comment entries advance the index. When id generation is
/// enabled and the literal carries no id yet, a fresh one is recorded under
/// the current file, keyed by the literal's source insertion point.
pub(crate) fn record_translation(
    ctx: &mut CompileContext,
    text: &str,
    string_data: Option<&StringData>,
    is_comment: bool,
) -> i32 {
    let index = ctx.translation_string_index;
    let id = string_data.and_then(|d| d.localized_string_id);
    let private_enabled = ctx.project.options.translation_private
        && !ctx.project.options.translation_private_out_dir.is_empty();

    if private_enabled {
        let key = expand_symbol(ctx, 0);
        if is_comment {
            ctx.translation_info.push(TranslationInfo {
                key,
                is_comment: true,
                text: text.to_string(),
                localized_string_id: None,
            });
        } else {
            ctx.translation_info.push(TranslationInfo {
                key,
                is_comment: false,
                text: text.to_string(),
                localized_string_id: id,
            });
            ctx.translation_string_index += 1;
        }
    } else if !is_comment {
        ctx.translation_info.push(TranslationInfo {
            key: String::new(),
            is_comment: false,
            text: text.to_string(),
            localized_string_id: id,
        });
        ctx.translation_string_index += 1;
    }

    if !is_comment && ctx.project.options.add_string_ids {
        if let Some(data) = string_data {
            if data.localized_string_id.is_none() {
                ctx.max_string_id += 1;
                let entry = (data.end_of_string_pos, ctx.max_string_id);
                let file = ctx.current_file.clone();
                let positions = ctx.string_id_positions.entry(file).or_default();
                let at = positions.partition_point(|&(offset, _)| offset <= entry.0);
                positions.insert(at, entry);
            }
        }
    }

    index
}

/// Emits a deferred call: the bare name plus every enclosing qualification,
/// shortest first. The innermost (scene/function) frame never qualifies.
pub(crate) fn emit_patch_call(ctx: &mut CompileContext, arg_count: u32, name: &str) {
    let size = ctx.symbol_stack.len();
    let mut candidates = Vec::with_capacity(size.max(1));
    candidates.push(name.to_string());
    for k in 1..size {
        candidates.push(format!("{}.{}", ctx.symbol_stack[..k].join("."), name));
    }
    ctx.emit_call(arg_count, candidates);
}

fn generate_block(children: &[Node], ctx: &mut CompileContext, res: &mut BytecodeResult) {
    for node in children {
        match node {
            Node::MarkedComment { text } => {
                record_translation(ctx, text, None, true);
            }
            Node::Namespace { name, children } => {
                ctx.symbol_stack.push(name.clone());
                generate_block(children, ctx, res);
                ctx.symbol_stack.pop();
            }
            Node::Scene {
                name,
                token,
                flags,
                body,
            } => {
                ctx.symbol_stack.push(name.clone());
                let symbol = expand_symbol(ctx, 0);
                let duplicate = ctx.scene_bytecode.contains_key(&symbol);
                if duplicate {
                    res.errors.push(BytecodeError::new(
                        BytecodeErrorKind::SceneAlreadyExists(symbol.clone()),
                        token.line,
                        token.column,
                    ));
                }

                ctx.generating_function = false;
                let indices = generate_callable(flags, &[], body, &symbol, ctx, res);

                if !duplicate {
                    ctx.scene_bytecode.insert(symbol, indices);
                }
                ctx.symbol_stack.pop();
            }
            Node::Function {
                name,
                token,
                args,
                flags,
                body,
            } => {
                ctx.symbol_stack.push(name.clone());
                let symbol = expand_symbol(ctx, 0);
                let duplicate = ctx.function_bytecode.contains_key(&symbol);
                if duplicate {
                    res.errors.push(BytecodeError::new(
                        BytecodeErrorKind::FunctionAlreadyExists(symbol.clone()),
                        token.line,
                        token.column,
                    ));
                }

                ctx.generating_function = true;
                let indices = generate_callable(flags, args, body, &symbol, ctx, res);

                if !duplicate {
                    ctx.function_bytecode.insert(symbol, indices);
                }
                ctx.symbol_stack.pop();
            }
            Node::Definitions {
                name,
                token,
                children,
            } => {
                ctx.symbol_stack.push(name.clone());
                let symbol = expand_symbol(ctx, 0);
                for child in children {
                    match child {
                        Node::MarkedComment { text } => {
                            record_translation(ctx, text, None, true);
                        }
                        Node::Definition {
                            key,
                            value,
                            exclude_value_translation,
                            string_data,
                            exprs,
                        } => {
                            let pos = ctx.bytecode.len();
                            for e in exprs.iter().rev() {
                                generate_expression(e, ctx, res);
                            }
                            let body_entry = if pos != ctx.bytecode.len() {
                                ctx.emit(Opcode::Exit);
                                pos as i32
                            } else {
                                -1
                            };

                            let full_name = format!("{}.{}", symbol, key);
                            let stored = if *exclude_value_translation {
                                DefinitionValue::Raw(value.clone())
                            } else {
                                DefinitionValue::Translated(record_translation(
                                    ctx,
                                    value,
                                    string_data.as_ref(),
                                    false,
                                ))
                            };
                            if ctx.definition_bytecode.contains_key(&full_name) {
                                res.errors.push(BytecodeError::new(
                                    BytecodeErrorKind::DefinitionAlreadyExists(full_name),
                                    token.line,
                                    token.column,
                                ));
                            } else {
                                ctx.definition_bytecode
                                    .insert(full_name, (stored, body_entry));
                            }
                        }
                        _ => {}
                    }
                }
                ctx.symbol_stack.pop();
            }
            _ => {}
        }
    }
}

/// Generates a scene or function body plus its flag entry points, returning
/// the entry-index list to register: the body entry (or -1 when empty)
/// followed by two entries per flag.
fn generate_callable(
    flags: &[Flag],
    args: &[String],
    body: &[Node],
    symbol: &str,
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) -> Vec<i32> {
    let pos = ctx.bytecode.len();

    // Flags (then arguments) occupy the first local slots of the body.
    ctx.push_local_frame();
    if let Some(count) = ctx.local_count_stack.last_mut() {
        *count = flags.len() + args.len();
    }
    for flag in flags {
        ctx.local_stack.push(flag.name.clone());
    }
    for arg in args {
        ctx.local_stack.push(arg.clone());
    }

    generate_scene_block(body, ctx, res);
    ctx.pop_local_frame();

    let mut indices = Vec::new();
    if pos == ctx.bytecode.len() {
        indices.push(-1);
    } else {
        ctx.emit(Opcode::Exit);
        indices.push(pos as i32);
    }

    // Flag guard and storage-key entry points follow the body.
    for flag in flags {
        indices.push(ctx.bytecode.len() as i32);
        generate_expression(&flag.value, ctx, res);
        ctx.emit(Opcode::Exit);

        indices.push(ctx.bytecode.len() as i32);
        match &flag.key {
            Some(key) => {
                generate_expression(key, ctx, res);
                ctx.emit(Opcode::Exit);
            }
            None => {
                let id = ctx.intern(&format!("{}_{}", symbol, flag.name));
                ctx.emit_int(Opcode::PushBinaryString, id);
                ctx.emit(Opcode::Exit);
            }
        }
    }

    indices
}

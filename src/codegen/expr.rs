//! Expression lowering.
//!
//! Expressions evaluate onto the value stack. Logical `&&`/`||` lower to
//! short-circuit jump chains that leave a canonical `0`/`1` when the chain
//! decides early; every other binary operator maps directly onto one
//! opcode. Pre/post increment and decrement on array-subscripted targets
//! use the save register to preserve the expression's value across the
//! element write-back.

use crate::ast::Node;
use crate::context::CompileContext;
use crate::error::{BytecodeError, BytecodeErrorKind};
use crate::instruction::Opcode;
use crate::token::TokenKind;

use super::{emit_patch_call, record_translation, BytecodeResult};

/// Maps a binary operator token onto its opcode. `&&`/`||` are handled by
/// the short-circuit path and are absent here.
fn binary_opcode(kind: TokenKind) -> Option<Opcode> {
    match kind {
        TokenKind::CompareEq => Some(Opcode::CmpEq),
        TokenKind::CompareGt => Some(Opcode::CmpGt),
        TokenKind::CompareGte => Some(Opcode::CmpGte),
        TokenKind::CompareLt => Some(Opcode::CmpLt),
        TokenKind::CompareLte => Some(Opcode::CmpLte),
        TokenKind::CompareNeq => Some(Opcode::CmpNeq),
        TokenKind::BitwiseOr => Some(Opcode::BitOr),
        TokenKind::BitwiseAnd => Some(Opcode::BitAnd),
        TokenKind::BitwiseXor => Some(Opcode::BitXor),
        TokenKind::BitwiseLShift => Some(Opcode::BitLeftShift),
        TokenKind::BitwiseRShift => Some(Opcode::BitRightShift),
        TokenKind::Plus => Some(Opcode::Add),
        TokenKind::Minus => Some(Opcode::Sub),
        TokenKind::Multiply => Some(Opcode::Mul),
        TokenKind::Divide => Some(Opcode::Div),
        TokenKind::Mod => Some(Opcode::Mod),
        TokenKind::Power => Some(Opcode::Pow),
        _ => None,
    }
}

/// Pushes a string literal: raw (interned) or translated, with or without
/// interpolation expressions. Shared with statement lowering for text runs,
/// choice texts and shorthand character names.
pub(super) fn push_string(
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
    text: &str,
    exclude_translation: bool,
    string_data: Option<&crate::token::StringData>,
    exprs: &[Node],
) {
    if exclude_translation {
        if exprs.is_empty() {
            let id = ctx.intern(text);
            ctx.emit_int(Opcode::PushBinaryString, id);
        } else {
            for e in exprs.iter().rev() {
                generate_expression(e, ctx, res);
            }
            let id = ctx.intern(text);
            ctx.emit_int2(Opcode::PushBinaryInterpString, id, exprs.len() as i32);
        }
    } else if exprs.is_empty() {
        let index = record_translation(ctx, text, string_data, false);
        ctx.emit_int(Opcode::PushString, index);
    } else {
        for e in exprs.iter().rev() {
            generate_expression(e, ctx, res);
        }
        let index = record_translation(ctx, text, string_data, false);
        ctx.emit_int2(Opcode::PushInterpString, index, exprs.len() as i32);
    }
}

fn push_number(ctx: &mut CompileContext, content: &str) {
    if content.contains('.') {
        ctx.emit_double(Opcode::PushDouble, content.parse().unwrap_or(0.0));
    } else {
        match content.parse::<i32>() {
            Ok(v) => ctx.emit_int(Opcode::PushInt, v),
            Err(_) => ctx.emit_double(Opcode::PushDouble, content.parse().unwrap_or(0.0)),
        }
    }
}

/// Loads a variable (local slot or global by name) without subscripts.
fn push_variable(ctx: &mut CompileContext, name: &str) -> Option<i32> {
    match ctx.find_local(name) {
        Some(slot) => {
            ctx.emit_int(Opcode::PushVarLocal, slot);
            Some(slot)
        }
        None => {
            let id = ctx.intern(name);
            ctx.emit_int(Opcode::PushVarGlobal, id);
            None
        }
    }
}

fn set_variable(ctx: &mut CompileContext, name: &str, slot: Option<i32>) {
    match slot {
        Some(slot) => ctx.emit_int(Opcode::SetVarLocal, slot),
        None => {
            let id = ctx.intern(name);
            ctx.emit_int(Opcode::SetVarGlobal, id);
        }
    }
}

pub(crate) fn generate_expression(
    expr: &Node,
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) {
    match expr {
        Node::ExprTernary {
            condition,
            then_value,
            else_value,
        } => {
            generate_expression(condition, ctx, res);
            let skip_then = ctx.emit_placeholder_jump(Opcode::JumpFalsey);
            generate_expression(then_value, ctx, res);
            let skip_else = ctx.emit_placeholder_jump(Opcode::Jump);
            ctx.patch(skip_then);
            generate_expression(else_value, ctx, res);
            ctx.patch(skip_else);
        }
        Node::ExprBinary { op, left, right } => {
            generate_expression(left, ctx, res);
            match op.kind {
                TokenKind::LogicalAnd | TokenKind::LogicalOr => {
                    let is_and = op.kind == TokenKind::LogicalAnd;
                    let short = ctx.emit_placeholder_jump(if is_and {
                        Opcode::JumpFalsey
                    } else {
                        Opcode::JumpTruthy
                    });
                    generate_expression(right, ctx, res);
                    let end = ctx.emit_placeholder_jump(Opcode::Jump);
                    ctx.patch(short);
                    ctx.emit_int(Opcode::PushInt, if is_and { 0 } else { 1 });
                    ctx.patch(end);
                }
                kind => match binary_opcode(kind) {
                    Some(opcode) => {
                        generate_expression(right, ctx, res);
                        ctx.emit(opcode);
                    }
                    None => res.errors.push(BytecodeError::new(
                        BytecodeErrorKind::UnexpectedError,
                        op.line,
                        op.column,
                    )),
                },
            }
        }
        Node::ExprConstant { token, exprs } => match token.kind {
            TokenKind::Number => push_number(ctx, &token.content),
            TokenKind::Percentage => {
                let value: f64 = token.content.parse().unwrap_or(0.0);
                ctx.emit_double(Opcode::PushDouble, value / 100.0);
            }
            TokenKind::String | TokenKind::ExcludeString => {
                push_string(ctx, res, &token.content, true, None, exprs);
            }
            TokenKind::MarkedString => {
                push_string(
                    ctx,
                    res,
                    &token.content,
                    false,
                    token.string_data.as_ref(),
                    exprs,
                );
            }
            TokenKind::Undefined => ctx.emit(Opcode::PushUndefined),
            _ => {}
        },
        Node::ExprNot(operand) => {
            generate_expression(operand, ctx, res);
            ctx.emit(Opcode::Inv);
        }
        Node::ExprNegate(operand) => {
            generate_expression(operand, ctx, res);
            ctx.emit(Opcode::Neg);
        }
        Node::ExprBitwiseNegate(operand) => {
            generate_expression(operand, ctx, res);
            ctx.emit(Opcode::BitNeg);
        }
        Node::ExprArray { items } => {
            for item in items {
                generate_expression(item, ctx, res);
            }
            ctx.emit_int(Opcode::MakeArray, items.len() as i32);
        }
        Node::Variable { name, indexes } => {
            push_variable(ctx, name);
            for index in indexes {
                generate_expression(index, ctx, res);
                ctx.emit(Opcode::PushArrayIndex);
            }
        }
        Node::ExprPreIncrement { target } | Node::ExprPreDecrement { target } => {
            let increment = matches!(expr, Node::ExprPreIncrement { .. });
            let Node::Variable { name, indexes } = &**target else {
                res.errors
                    .push(BytecodeError::new(BytecodeErrorKind::UnexpectedError, 0, 0));
                return;
            };
            let slot = push_variable(ctx, name);
            for index in indexes {
                generate_expression(index, ctx, res);
                ctx.emit(Opcode::Dup2);
                ctx.emit(Opcode::PushArrayIndex);
            }
            ctx.emit_int(Opcode::PushInt, 1);
            ctx.emit(if increment { Opcode::Add } else { Opcode::Sub });
            if indexes.is_empty() {
                ctx.emit(Opcode::Dup);
            } else {
                ctx.emit(Opcode::Save);
            }
            for _ in indexes {
                ctx.emit(Opcode::SetArrayIndex);
            }
            set_variable(ctx, name, slot);
            if !indexes.is_empty() {
                ctx.emit(Opcode::Load);
            }
        }
        Node::ExprPostIncrement { target } | Node::ExprPostDecrement { target } => {
            let increment = matches!(expr, Node::ExprPostIncrement { .. });
            let Node::Variable { name, indexes } = &**target else {
                res.errors
                    .push(BytecodeError::new(BytecodeErrorKind::UnexpectedError, 0, 0));
                return;
            };
            let slot = push_variable(ctx, name);
            for index in indexes {
                generate_expression(index, ctx, res);
                ctx.emit(Opcode::Dup2);
                ctx.emit(Opcode::PushArrayIndex);
            }
            if indexes.is_empty() {
                ctx.emit(Opcode::Dup);
            } else {
                ctx.emit(Opcode::Save);
            }
            ctx.emit_int(Opcode::PushInt, 1);
            ctx.emit(if increment { Opcode::Add } else { Opcode::Sub });
            for _ in indexes {
                ctx.emit(Opcode::SetArrayIndex);
            }
            set_variable(ctx, name, slot);
            if !indexes.is_empty() {
                ctx.emit(Opcode::Load);
            }
        }
        Node::ExprAccessArray { base, indexes } => {
            generate_expression(base, ctx, res);
            for index in indexes {
                generate_expression(index, ctx, res);
                ctx.emit(Opcode::PushArrayIndex);
            }
        }
        Node::SceneFunction { name, args } => {
            for arg in args.iter().rev() {
                generate_expression(arg, ctx, res);
            }
            emit_patch_call(ctx, args.len() as u32, name);
        }
        _ => {}
    }
}

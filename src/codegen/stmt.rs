//! Scene-statement lowering.
//!
//! Statements leave the value stack balanced. Loop constructs open a loop
//! context whose patch lists collect `continue`/`break` jumps; constructs
//! that keep a live value on the stack across their body (`repeat`'s
//! counter, a switch or sequence selector) install `pop` as their
//! return-cleanup so escaping `return` statements drop it.
//!
//! A switch nested in a loop needs special care for `continue`: its
//! selector must be popped before control reaches the enclosing loop's
//! continue target. The switch therefore emits a fix-up island after its
//! bodies (a `pop`, then `freeloc`s for locals declared since the loop
//! began, then a jump registered on the enclosing loop's continue list)
//! that only the switch's own continue jumps enter.

use crate::ast::{ChoiceEntry, ChooseEntry, Node};
use crate::context::CompileContext;
use crate::error::{BytecodeError, BytecodeErrorKind};
use crate::instruction::Opcode;
use crate::token::{KeywordKind, Token, TokenKind};

use super::expr::{generate_expression, push_string};
use super::{emit_patch_call, record_translation, BytecodeResult};

/// Generates a brace-delimited statement list in its own local frame.
pub(crate) fn generate_scene_block(
    children: &[Node],
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) {
    ctx.push_local_frame();
    for child in children {
        generate_statement(child, ctx, res);
    }
    ctx.pop_local_frame();
}

fn compound_opcode(kind: TokenKind) -> Option<Opcode> {
    match kind {
        TokenKind::PlusEquals => Some(Opcode::Add),
        TokenKind::MinusEquals => Some(Opcode::Sub),
        TokenKind::MultiplyEquals => Some(Opcode::Mul),
        TokenKind::DivideEquals => Some(Opcode::Div),
        TokenKind::ModEquals => Some(Opcode::Mod),
        TokenKind::BitwiseAndEquals => Some(Opcode::BitAnd),
        TokenKind::BitwiseOrEquals => Some(Opcode::BitOr),
        TokenKind::BitwiseXorEquals => Some(Opcode::BitXor),
        _ => None,
    }
}

/// Stores the value on top of the stack into a variable, writing through
/// any subscripts. Used where the value was computed elsewhere (sequence
/// stepping).
pub(super) fn generate_basic_assign(
    var: &Node,
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) {
    let Node::Variable { name, indexes } = var else {
        res.errors
            .push(BytecodeError::new(BytecodeErrorKind::UnexpectedError, 0, 0));
        return;
    };
    let slot = ctx.find_local(name);

    if !indexes.is_empty() {
        ctx.emit(Opcode::Save);
        ctx.emit(Opcode::Pop);

        push_var(ctx, name, slot);
        for (i, index) in indexes.iter().enumerate() {
            generate_expression(index, ctx, res);
            if i + 1 < indexes.len() {
                ctx.emit(Opcode::Dup2);
                ctx.emit(Opcode::PushArrayIndex);
            }
        }
        ctx.emit(Opcode::Load);
        for _ in indexes {
            ctx.emit(Opcode::SetArrayIndex);
        }
    }

    set_var(ctx, name, slot);
}

fn push_var(ctx: &mut CompileContext, name: &str, slot: Option<i32>) {
    match slot {
        Some(slot) => ctx.emit_int(Opcode::PushVarLocal, slot),
        None => {
            let id = ctx.intern(name);
            ctx.emit_int(Opcode::PushVarGlobal, id);
        }
    }
}

fn set_var(ctx: &mut CompileContext, name: &str, slot: Option<i32>) {
    match slot {
        Some(slot) => ctx.emit_int(Opcode::SetVarLocal, slot),
        None => {
            let id = ctx.intern(name);
            ctx.emit_int(Opcode::SetVarGlobal, id);
        }
    }
}

pub(crate) fn generate_statement(
    statement: &Node,
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) {
    match statement {
        Node::SceneBlock { children } => generate_scene_block(children, ctx, res),
        Node::None => {}
        Node::MarkedComment { text } => {
            record_translation(ctx, text, None, true);
        }

        Node::Increment { target } | Node::Decrement { target } => {
            let increment = matches!(statement, Node::Increment { .. });
            let Node::Variable { name, indexes } = &**target else {
                res.errors
                    .push(BytecodeError::new(BytecodeErrorKind::UnexpectedError, 0, 0));
                return;
            };
            let slot = ctx.find_local(name);
            push_var(ctx, name, slot);
            for index in indexes {
                generate_expression(index, ctx, res);
                ctx.emit(Opcode::Dup2);
                ctx.emit(Opcode::PushArrayIndex);
            }
            ctx.emit_int(Opcode::PushInt, 1);
            ctx.emit(if increment { Opcode::Add } else { Opcode::Sub });
            for _ in indexes {
                ctx.emit(Opcode::SetArrayIndex);
            }
            set_var(ctx, name, slot);
        }

        Node::Assign {
            op,
            modifier,
            target,
            value,
        } => generate_assign(op, *modifier, target, value.as_deref(), ctx, res),

        Node::ShorthandChar { token, exprs, stmt } => {
            match token.kind {
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
                _ => {
                    push_string(ctx, res, &token.content, true, None, exprs);
                }
            }
            emit_patch_call(ctx, 1, "char");
            ctx.emit(Opcode::Pop);

            ctx.push_local_frame();
            generate_statement(stmt, ctx, res);
            ctx.pop_local_frame();
        }

        Node::SceneFunction { name, args } => {
            for arg in args.iter().rev() {
                generate_expression(arg, ctx, res);
            }
            emit_patch_call(ctx, args.len() as u32, name);
            ctx.emit(Opcode::Pop);
        }

        Node::TextRun {
            text,
            exclude_translation,
            string_data,
            exprs,
        } => {
            push_string(ctx, res, text, *exclude_translation, string_data.as_ref(), exprs);
            ctx.emit(Opcode::TextRun);
        }
        Node::ChoiceText {
            text,
            exclude_translation,
            string_data,
            exprs,
        } => {
            push_string(ctx, res, text, *exclude_translation, string_data.as_ref(), exprs);
        }

        Node::Choice { pre, entries } => generate_choice(pre, entries, ctx, res),
        Node::Choose { entries } => generate_choose(entries, ctx, res),

        Node::If {
            condition,
            then_branch,
            else_branch,
        } => {
            generate_expression(condition, ctx, res);
            let skip_then = ctx.emit_placeholder_jump(Opcode::JumpFalsey);
            ctx.push_local_frame();
            generate_statement(then_branch, ctx, res);
            ctx.pop_local_frame();
            match else_branch {
                Some(else_branch) => {
                    let skip_else = ctx.emit_placeholder_jump(Opcode::Jump);
                    ctx.patch(skip_then);
                    ctx.push_local_frame();
                    generate_statement(else_branch, ctx, res);
                    ctx.pop_local_frame();
                    ctx.patch(skip_else);
                }
                None => ctx.patch(skip_then),
            }
        }

        Node::While { condition, body } => {
            ctx.push_local_frame();
            let cond_index = ctx.bytecode.len();
            let cond_offset = ctx.offset;
            generate_expression(condition, ctx, res);
            let fail = ctx.emit_placeholder_jump(Opcode::JumpFalsey);
            ctx.push_loop(Vec::new());
            generate_statement(body, ctx, res);
            let back = ctx.back_jump_arg(cond_offset);
            ctx.emit_int(Opcode::Jump, back);
            let lp = ctx.pop_loop();
            for p in lp.continue_patches {
                ctx.patch_to(p, cond_index);
            }
            for p in lp.end_patches {
                ctx.patch(p);
            }
            ctx.patch(fail);
            ctx.pop_local_frame();
        }

        Node::For {
            init,
            condition,
            step,
            body,
        } => {
            ctx.push_local_frame();
            generate_statement(init, ctx, res);
            let cond_offset = ctx.offset;
            generate_expression(condition, ctx, res);
            let fail = ctx.emit_placeholder_jump(Opcode::JumpFalsey);
            ctx.push_loop(Vec::new());
            generate_statement(body, ctx, res);
            let step_index = ctx.bytecode.len();
            generate_statement(step, ctx, res);
            let back = ctx.back_jump_arg(cond_offset);
            ctx.emit_int(Opcode::Jump, back);
            ctx.patch(fail);
            let lp = ctx.pop_loop();
            for p in lp.continue_patches {
                ctx.patch_to(p, step_index);
            }
            for p in lp.end_patches {
                ctx.patch(p);
            }
            ctx.pop_local_frame();
        }

        Node::Do { body, condition } => {
            ctx.push_local_frame();
            let top_offset = ctx.offset;
            ctx.push_loop(Vec::new());
            generate_statement(body, ctx, res);
            let cond_index = ctx.bytecode.len();
            generate_expression(condition, ctx, res);
            let back = ctx.back_jump_arg(top_offset);
            ctx.emit_int(Opcode::JumpTruthy, back);
            let lp = ctx.pop_loop();
            for p in lp.continue_patches {
                ctx.patch_to(p, cond_index);
            }
            for p in lp.end_patches {
                ctx.patch(p);
            }
            ctx.pop_local_frame();
        }

        Node::Repeat { count, body } => {
            generate_expression(count, ctx, res);
            let top_offset = ctx.offset;
            ctx.emit(Opcode::Dup);
            ctx.emit_int(Opcode::PushInt, 0);
            ctx.emit(Opcode::CmpGt);
            let fail = ctx.emit_placeholder_jump(Opcode::JumpFalsey);
            ctx.push_local_frame();
            // The counter stays on the stack across the body.
            ctx.push_loop(vec![Opcode::Pop]);
            generate_statement(body, ctx, res);
            let cont_index = ctx.bytecode.len();
            ctx.emit_int(Opcode::PushInt, 1);
            ctx.emit(Opcode::Sub);
            let back = ctx.back_jump_arg(top_offset);
            ctx.emit_int(Opcode::Jump, back);
            ctx.patch(fail);
            let lp = ctx.pop_loop();
            for p in lp.continue_patches {
                ctx.patch_to(p, cont_index);
            }
            for p in lp.end_patches {
                ctx.patch(p);
            }
            ctx.emit(Opcode::Pop);
            ctx.pop_local_frame();
        }

        Node::Switch {
            token,
            selector,
            children,
        } => generate_switch(token, selector, children, ctx, res),

        Node::SwitchSimple { selector, arms } => {
            generate_switch_simple(selector, arms, ctx, res)
        }

        Node::Sequence { var, pairs } => generate_sequence(var, pairs, ctx, res),

        Node::Continue { token } => {
            if ctx.loop_stack.is_empty() {
                res.errors.push(BytecodeError::new(
                    BytecodeErrorKind::ContinueOutsideOfLoop,
                    token.line,
                    token.column,
                ));
                return;
            }
            let depth = ctx.loop_stack.last().map(|l| l.local_frame_depth).unwrap_or(0);
            ctx.free_locals_down_to(depth);
            let jump = ctx.emit_placeholder_jump(Opcode::Jump);
            if let Some(lp) = ctx.loop_stack.last_mut() {
                lp.continue_patches.push(jump);
            }
        }

        Node::Break { token } => {
            if ctx.loop_stack.is_empty() {
                res.errors.push(BytecodeError::new(
                    BytecodeErrorKind::BreakOutsideOfLoop,
                    token.line,
                    token.column,
                ));
                return;
            }
            let depth = ctx.loop_stack.last().map(|l| l.local_frame_depth).unwrap_or(0);
            ctx.free_locals_down_to(depth);
            let jump = ctx.emit_placeholder_jump(Opcode::Jump);
            if let Some(lp) = ctx.loop_stack.last_mut() {
                lp.end_patches.push(jump);
            }
        }

        Node::Return { value } => generate_return(value.as_deref(), ctx, res),

        // Expressions in statement position only occur on error paths.
        _ => {}
    }
}

fn generate_assign(
    op: &Token,
    modifier: Option<KeywordKind>,
    target: &Node,
    value: Option<&Node>,
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) {
    let Node::Variable { name, indexes } = target else {
        res.errors
            .push(BytecodeError::new(BytecodeErrorKind::UnexpectedError, 0, 0));
        return;
    };

    let slot = if modifier == Some(KeywordKind::Local) {
        if let Some(count) = ctx.local_count_stack.last_mut() {
            *count += 1;
        }
        if ctx.find_local(name).is_some() {
            res.errors.push(BytecodeError::new(
                BytecodeErrorKind::LocalVariableAlreadyExists(name.clone()),
                op.line,
                op.column,
            ));
        }
        let slot = ctx.local_stack.len() as i32;
        ctx.local_stack.push(name.clone());
        Some(slot)
    } else {
        ctx.find_local(name)
    };

    // A declaration without a value only registers the local.
    let Some(value) = value else { return };

    let subscripted = !indexes.is_empty();
    let compound = op.kind != TokenKind::Equals;
    if subscripted || compound {
        push_var(ctx, name, slot);
        for (i, index) in indexes.iter().enumerate() {
            generate_expression(index, ctx, res);
            if i + 1 < indexes.len() || compound {
                ctx.emit(Opcode::Dup2);
                ctx.emit(Opcode::PushArrayIndex);
            }
        }
    }

    generate_expression(value, ctx, res);

    if compound {
        match compound_opcode(op.kind) {
            Some(opcode) => ctx.emit(opcode),
            None => res.errors.push(BytecodeError::new(
                BytecodeErrorKind::UnexpectedError,
                op.line,
                op.column,
            )),
        }
    }

    for _ in indexes {
        ctx.emit(Opcode::SetArrayIndex);
    }
    set_var(ctx, name, slot);
}

fn generate_choice(
    pre: &Node,
    entries: &[ChoiceEntry],
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) {
    ctx.emit(Opcode::ChoiceBegin);

    ctx.push_local_frame();
    generate_statement(pre, ctx, res);
    ctx.pop_local_frame();

    let mut adds = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.text.is_none() {
            ctx.emit(Opcode::PushUndefined);
        } else {
            generate_statement(&entry.text, ctx, res);
        }
        generate_expression(&entry.chance, ctx, res);
        match &entry.require {
            None => adds.push(ctx.emit_placeholder_jump(Opcode::ChoiceAdd)),
            Some(require) => {
                generate_expression(require, ctx, res);
                adds.push(ctx.emit_placeholder_jump(Opcode::ChoiceAddTruthy));
            }
        }
    }

    ctx.emit(Opcode::ChoiceSelect);

    let mut ends = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        ctx.patch(adds[i]);
        ctx.push_local_frame();
        generate_statement(&entry.body, ctx, res);
        ctx.pop_local_frame();
        if i + 1 < entries.len() {
            ends.push(ctx.emit_placeholder_jump(Opcode::Jump));
        }
    }
    for end in ends {
        ctx.patch(end);
    }
}

fn generate_choose(entries: &[ChooseEntry], ctx: &mut CompileContext, res: &mut BytecodeResult) {
    let mut adds = Vec::with_capacity(entries.len());
    for entry in entries {
        generate_expression(&entry.chance, ctx, res);
        match &entry.require {
            None => adds.push(ctx.emit_placeholder_jump(Opcode::ChooseAdd)),
            Some(require) => {
                generate_expression(require, ctx, res);
                adds.push(ctx.emit_placeholder_jump(Opcode::ChooseAddTruthy));
            }
        }
    }

    ctx.emit(Opcode::ChooseSelect);

    let mut ends = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        ctx.patch(adds[i]);
        ctx.push_local_frame();
        generate_statement(&entry.body, ctx, res);
        ctx.pop_local_frame();
        if i + 1 < entries.len() {
            ends.push(ctx.emit_placeholder_jump(Opcode::Jump));
        }
    }
    for end in ends {
        ctx.patch(end);
    }
}

fn generate_switch(
    token: &Token,
    selector: &Node,
    children: &[Node],
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) {
    let in_loop = !ctx.loop_stack.is_empty();

    generate_expression(selector, ctx, res);
    ctx.push_local_frame();
    // The selector stays on the stack for the duration of the switch.
    ctx.push_loop(vec![Opcode::Pop]);

    // Matchers first: each case compares against a copy of the selector.
    let mut cases: Vec<(usize, usize)> = Vec::new();
    let mut default: Option<(usize, usize)> = None;
    let mut found_case = false;
    for (i, child) in children.iter().enumerate() {
        match child {
            Node::SwitchCase { value } => {
                found_case = true;
                ctx.emit(Opcode::Dup);
                generate_expression(value, ctx, res);
                ctx.emit(Opcode::CmpEq);
                cases.push((ctx.emit_placeholder_jump(Opcode::JumpTruthy), i));
            }
            Node::SwitchDefault => {
                found_case = true;
                default = Some((i, cases.len()));
            }
            _ => {
                if !found_case {
                    res.errors.push(BytecodeError::new(
                        BytecodeErrorKind::StatementsBeforeSwitchCase,
                        token.line,
                        token.column,
                    ));
                }
            }
        }
    }

    let all_fail = match default {
        Some((child_index, insert_at)) => {
            let jump = ctx.emit_placeholder_jump(Opcode::Jump);
            cases.insert(insert_at, (jump, child_index));
            None
        }
        None => Some(ctx.emit_placeholder_jump(Opcode::Jump)),
    };

    // Bodies, generated consecutively: cases fall through until a break.
    for (k, &(patch_index, child_index)) in cases.iter().enumerate() {
        let end = cases
            .get(k + 1)
            .map(|&(_, idx)| idx)
            .unwrap_or(children.len());
        ctx.patch(patch_index);
        for child in &children[child_index + 1..end] {
            generate_statement(child, ctx, res);
        }
    }

    finish_selector_construct(in_loop, ctx, res);

    if let Some(all_fail) = all_fail {
        ctx.patch(all_fail);
    }
    ctx.emit(Opcode::Pop);
    ctx.pop_local_frame();
}

fn generate_switch_simple(
    selector: &Node,
    arms: &[(Node, Node)],
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) {
    let in_loop = !ctx.loop_stack.is_empty();

    generate_expression(selector, ctx, res);
    ctx.push_local_frame();
    ctx.push_loop(vec![Opcode::Pop]);

    let mut jumps = Vec::new();
    let mut default_stmt: Option<&Node> = None;
    for (label, stmt) in arms {
        match label {
            Node::SwitchDefault => default_stmt = Some(stmt),
            Node::ExprRange { low, high } => {
                ctx.emit(Opcode::Dup);
                generate_expression(low, ctx, res);
                ctx.emit(Opcode::CmpGte);
                let below = ctx.emit_placeholder_jump(Opcode::JumpFalsey);
                ctx.emit(Opcode::Dup);
                generate_expression(high, ctx, res);
                ctx.emit(Opcode::CmpLte);
                jumps.push(ctx.emit_placeholder_jump(Opcode::JumpTruthy));
                ctx.patch(below);
            }
            value => {
                ctx.emit(Opcode::Dup);
                generate_expression(value, ctx, res);
                ctx.emit(Opcode::CmpEq);
                jumps.push(ctx.emit_placeholder_jump(Opcode::JumpTruthy));
            }
        }
    }

    // Fall-through path runs the default body (if any), then leaves.
    if let Some(stmt) = default_stmt {
        generate_statement(stmt, ctx, res);
    }
    let mut to_end = vec![ctx.emit_placeholder_jump(Opcode::Jump)];

    let mut counter = 0;
    for (label, stmt) in arms {
        if matches!(label, Node::SwitchDefault) {
            continue;
        }
        ctx.patch(jumps[counter]);
        generate_statement(stmt, ctx, res);
        to_end.push(ctx.emit_placeholder_jump(Opcode::Jump));
        counter += 1;
    }

    finish_selector_construct(in_loop, ctx, res);

    for end in to_end {
        ctx.patch(end);
    }
    ctx.emit(Opcode::Pop);
    ctx.pop_local_frame();
}

/// Closes a switch's loop context. When the switch sits inside a loop and
/// recorded `continue`s, a fix-up island is emitted: the continues land on
/// a `pop` of the selector, locals declared since the enclosing loop began
/// are freed, and a fresh jump joins the enclosing loop's continue list.
/// Breaks and fall-through bypass the island.
fn finish_selector_construct(in_loop: bool, ctx: &mut CompileContext, res: &mut BytecodeResult) {
    let has_continues = ctx
        .loop_stack
        .last()
        .map_or(false, |l| !l.continue_patches.is_empty());

    if in_loop && has_continues {
        let skip_island = ctx.emit_placeholder_jump(Opcode::Jump);
        let lp = ctx.pop_loop();
        for p in &lp.continue_patches {
            ctx.patch(*p);
        }
        ctx.emit(Opcode::Pop);
        let depth = ctx
            .loop_stack
            .last()
            .map(|l| l.local_frame_depth)
            .unwrap_or(0);
        ctx.free_locals_down_to(depth);
        let to_enclosing = ctx.emit_placeholder_jump(Opcode::Jump);
        if let Some(enclosing) = ctx.loop_stack.last_mut() {
            enclosing.continue_patches.push(to_enclosing);
        }
        for p in lp.end_patches {
            ctx.patch(p);
        }
        ctx.patch(skip_island);
    } else {
        let lp = ctx.pop_loop();
        if !lp.continue_patches.is_empty() {
            res.errors.push(BytecodeError::new(
                BytecodeErrorKind::ContinueOutsideOfLoop,
                0,
                0,
            ));
        }
        for p in lp.end_patches {
            ctx.patch(p);
        }
    }
}

fn generate_sequence(
    var: &Node,
    pairs: &[(Node, Node)],
    ctx: &mut CompileContext,
    res: &mut BytecodeResult,
) {
    let top_offset = ctx.offset;
    generate_expression(var, ctx, res);
    ctx.push_local_frame();
    ctx.push_loop(vec![Opcode::Pop]);

    // Matchers: one per (case, statement) pair, in order. A range in final
    // position also records an early jump taken when the selector already
    // sits at the range's upper bound.
    let mut jumps: Vec<(usize, Option<usize>)> = Vec::with_capacity(pairs.len());
    for (k, (case, _)) in pairs.iter().enumerate() {
        ctx.emit(Opcode::Dup);
        if let Node::ExprRange { low, high } = case {
            let at_upper = if k + 1 == pairs.len() {
                generate_expression(high, ctx, res);
                ctx.emit(Opcode::CmpEq);
                let jump = ctx.emit_placeholder_jump(Opcode::JumpTruthy);
                ctx.emit(Opcode::Dup);
                Some(jump)
            } else {
                None
            };
            generate_expression(low, ctx, res);
            ctx.emit(Opcode::CmpGte);
            let below = ctx.emit_placeholder_jump(Opcode::JumpFalsey);
            ctx.emit(Opcode::Dup);
            generate_expression(high, ctx, res);
            ctx.emit(Opcode::CmpLte);
            jumps.push((ctx.emit_placeholder_jump(Opcode::JumpTruthy), at_upper));
            ctx.patch(below);
        } else {
            generate_expression(case, ctx, res);
            ctx.emit(Opcode::CmpEq);
            jumps.push((ctx.emit_placeholder_jump(Opcode::JumpTruthy), None));
        }
    }

    let mut to_end = vec![ctx.emit_placeholder_jump(Opcode::Jump)];

    // Bodies, each preceded by the step that advances the selector
    // variable to the next entry (or through the current range).
    for (k, (case, stmt)) in pairs.iter().enumerate() {
        let (jump, at_upper) = jumps[k];
        ctx.patch(jump);

        if k + 1 < pairs.len() {
            let next_value = match &pairs[k + 1].0 {
                Node::ExprRange { low, .. } => &**low,
                value => value,
            };
            if let Node::ExprRange { high, .. } = case {
                // At the range's upper bound step to the next entry,
                // otherwise increment within the range.
                ctx.emit(Opcode::Dup);
                generate_expression(high, ctx, res);
                ctx.emit(Opcode::CmpEq);
                let not_at_upper = ctx.emit_placeholder_jump(Opcode::JumpFalsey);
                generate_expression(next_value, ctx, res);
                let stored = ctx.emit_placeholder_jump(Opcode::Jump);
                ctx.patch(not_at_upper);
                ctx.emit(Opcode::Dup);
                ctx.emit_int(Opcode::PushInt, 1);
                ctx.emit(Opcode::Add);
                ctx.patch(stored);
                generate_basic_assign(var, ctx, res);
            } else {
                generate_expression(next_value, ctx, res);
                generate_basic_assign(var, ctx, res);
            }
        } else if matches!(case, Node::ExprRange { .. }) {
            // Final range: keep stepping until the upper bound, where the
            // early jump from the matcher lands past the increment.
            ctx.emit(Opcode::Dup);
            ctx.emit_int(Opcode::PushInt, 1);
            ctx.emit(Opcode::Add);
            generate_basic_assign(var, ctx, res);
            if let Some(at_upper) = at_upper {
                ctx.patch(at_upper);
            }
        }

        generate_statement(stmt, ctx, res);
        to_end.push(ctx.emit_placeholder_jump(Opcode::Jump));
    }

    // `continue` restarts at the selector load, dropping the stale copy.
    let has_continues = ctx
        .loop_stack
        .last()
        .map_or(false, |l| !l.continue_patches.is_empty());
    if has_continues {
        ctx.emit(Opcode::Pop);
        let pop_index = ctx.bytecode.len() - 1;
        let back = ctx.back_jump_arg(top_offset);
        ctx.emit_int(Opcode::Jump, back);
        let lp = ctx.pop_loop();
        for p in lp.continue_patches {
            ctx.patch_to(p, pop_index);
        }
        for p in lp.end_patches {
            ctx.patch(p);
        }
    } else {
        let lp = ctx.pop_loop();
        for p in lp.end_patches {
            ctx.patch(p);
        }
    }

    for end in to_end {
        ctx.patch(end);
    }
    ctx.emit(Opcode::Pop);
    ctx.pop_local_frame();
}

fn generate_return(value: Option<&Node>, ctx: &mut CompileContext, res: &mut BytecodeResult) {
    // Escaping every enclosing construct: innermost cleanup first, then a
    // freeloc for every live local.
    let mut cleanup: Vec<(Opcode, Option<i32>)> = Vec::new();
    for lp in ctx.loop_stack.iter().rev() {
        for &op in &lp.return_cleanup {
            cleanup.push((op, None));
        }
    }
    for slot in (0..ctx.local_stack.len()).rev() {
        cleanup.push((Opcode::FreeLocal, Some(slot as i32)));
    }
    let has_cleanup = !cleanup.is_empty();

    match value {
        Some(value) => {
            generate_expression(value, ctx, res);
            if has_cleanup {
                ctx.emit(Opcode::Save);
                ctx.emit(Opcode::Pop);
            }
            for (op, arg) in cleanup {
                match arg {
                    Some(arg) => ctx.emit_int(op, arg),
                    None => ctx.emit(op),
                }
            }
            if has_cleanup {
                ctx.emit(Opcode::Load);
            }
            ctx.emit(Opcode::Ret);
        }
        None => {
            for (op, arg) in cleanup {
                match arg {
                    Some(arg) => ctx.emit_int(op, arg),
                    None => ctx.emit(op),
                }
            }
            ctx.emit(Opcode::Exit);
        }
    }
}

//! End-to-end compilation scenarios: source text in, instruction stream,
//! symbol tables and translation records out.

use diannex::compile::compile_source;
use diannex::context::{CompileContext, DefinitionValue};
use diannex::instruction::{Arg, Instruction, Opcode};
use diannex::project::ProjectFormat;

fn compile(source: &str) -> CompileContext {
    compile_source("test.dx", source, ProjectFormat::default())
        .expect("compilation should succeed")
}

fn compile_private(source: &str) -> CompileContext {
    let mut project = ProjectFormat::default();
    project.options.translation_private = true;
    compile_source("test.dx", source, project).expect("compilation should succeed")
}

fn opcodes(ctx: &CompileContext) -> Vec<Opcode> {
    ctx.bytecode.iter().map(|i| i.opcode).collect()
}

fn int_arg(instr: &Instruction) -> i32 {
    match instr.arg {
        Arg::Int(v) => v,
        _ => panic!("expected int argument on {}", instr),
    }
}

/// The byte offset a jump instruction lands on.
fn jump_target(instr: &Instruction) -> i64 {
    instr.offset as i64 + 5 + int_arg(instr) as i64
}

#[test]
fn hello_scene_registers_symbol_and_translation() {
    let ctx = compile_private("namespace n { scene s { \"hello\" } }");

    assert_eq!(ctx.scene_bytecode.get("n.s"), Some(&vec![0]));
    assert_eq!(
        opcodes(&ctx),
        vec![Opcode::PushString, Opcode::TextRun, Opcode::Exit]
    );
    assert_eq!(int_arg(&ctx.bytecode[0]), 0);

    assert_eq!(ctx.translation_info.len(), 1);
    assert_eq!(ctx.translation_info[0].key, "n.s");
    assert_eq!(ctx.translation_info[0].text, "hello");
    assert!(!ctx.translation_info[0].is_comment);
}

#[test]
fn definition_stores_translation_index_without_body() {
    let ctx = compile("def d { greeting = \"hi\" }");

    let (value, body) = ctx.definition_bytecode.get("d.greeting").unwrap();
    assert_eq!(*value, DefinitionValue::Translated(0));
    assert_eq!(*body, -1);
    assert!(ctx.bytecode.is_empty());
    assert_eq!(ctx.translation_info[0].text, "hi");
}

#[test]
fn excluded_definition_stores_raw_value() {
    let ctx = compile("def d { raw = !\"bytes\" }");
    let (value, _) = ctx.definition_bytecode.get("d.raw").unwrap();
    assert_eq!(*value, DefinitionValue::Raw("bytes".to_string()));
    assert!(ctx.translation_info.is_empty());
}

#[test]
fn if_else_lowering_matches_reference_shape() {
    let ctx = compile("scene s { $x = 1; if ($x == 1) { \"a\" } else { \"b\" } }");

    assert_eq!(
        opcodes(&ctx),
        vec![
            Opcode::PushInt,
            Opcode::SetVarGlobal,
            Opcode::PushVarGlobal,
            Opcode::PushInt,
            Opcode::CmpEq,
            Opcode::JumpFalsey,
            Opcode::PushString,
            Opcode::TextRun,
            Opcode::Jump,
            Opcode::PushString,
            Opcode::TextRun,
            Opcode::Exit,
        ]
    );

    // jf lands on the else branch, j lands on the exit.
    assert_eq!(jump_target(&ctx.bytecode[5]), ctx.bytecode[9].offset as i64);
    assert_eq!(jump_target(&ctx.bytecode[8]), ctx.bytecode[11].offset as i64);

    // Both text runs are translation records 0 and 1.
    assert_eq!(int_arg(&ctx.bytecode[6]), 0);
    assert_eq!(int_arg(&ctx.bytecode[9]), 1);
}

#[test]
fn if_without_else_emits_exactly_one_forward_jump() {
    let ctx = compile("scene s { if $x { \"a\" } }");
    let jumps: Vec<_> = ctx
        .bytecode
        .iter()
        .filter(|i| {
            matches!(
                i.opcode,
                Opcode::Jump | Opcode::JumpTruthy | Opcode::JumpFalsey
            )
        })
        .collect();
    assert_eq!(jumps.len(), 1);
    assert_eq!(jumps[0].opcode, Opcode::JumpFalsey);
}

#[test]
fn repeat_lowering_counts_down_and_pops() {
    let ctx = compile("scene s { repeat (3) { \"x\" } }");

    assert_eq!(
        opcodes(&ctx),
        vec![
            Opcode::PushInt,     // 3
            Opcode::Dup,
            Opcode::PushInt,     // 0
            Opcode::CmpGt,
            Opcode::JumpFalsey,  // -> pop
            Opcode::PushString,
            Opcode::TextRun,
            Opcode::PushInt,     // 1
            Opcode::Sub,
            Opcode::Jump,        // -> dup
            Opcode::Pop,
            Opcode::Exit,
        ]
    );
    assert_eq!(int_arg(&ctx.bytecode[0]), 3);
    // The back edge returns to the dup at the loop head.
    assert_eq!(jump_target(&ctx.bytecode[9]), ctx.bytecode[1].offset as i64);
    // The guard exits to the pop.
    assert_eq!(jump_target(&ctx.bytecode[4]), ctx.bytecode[10].offset as i64);
}

#[test]
fn while_break_patches_past_the_back_edge() {
    let ctx = compile("scene s { while (1) { break } }");

    assert_eq!(
        opcodes(&ctx),
        vec![
            Opcode::PushInt,
            Opcode::JumpFalsey,
            Opcode::Jump, // break
            Opcode::Jump, // back edge
            Opcode::Exit,
        ]
    );
    let exit_offset = ctx.bytecode[4].offset as i64;
    assert_eq!(jump_target(&ctx.bytecode[1]), exit_offset);
    assert_eq!(jump_target(&ctx.bytecode[2]), exit_offset);
    assert_eq!(jump_target(&ctx.bytecode[3]), ctx.bytecode[0].offset as i64);
}

#[test]
fn empty_scene_registers_negative_entry() {
    let ctx = compile("scene x {}");
    assert_eq!(ctx.scene_bytecode.get("x"), Some(&vec![-1]));
    assert!(ctx.bytecode.is_empty());
}

#[test]
fn switch_with_only_default_jumps_unconditionally() {
    let ctx = compile("scene s { switch ($x) { default: \"d\" } }");
    // Selector, unconditional jump into the body, body, selector pop.
    assert_eq!(
        opcodes(&ctx),
        vec![
            Opcode::PushVarGlobal,
            Opcode::Jump,
            Opcode::PushString,
            Opcode::TextRun,
            Opcode::Pop,
            Opcode::Exit,
        ]
    );
    assert_eq!(jump_target(&ctx.bytecode[1]), ctx.bytecode[2].offset as i64);
}

#[test]
fn classic_switch_falls_through_between_cases() {
    let ctx = compile(
        "scene s { switch ($x) {\ncase 1:\n\"one\"\ncase 2:\n\"two\"\nbreak\ndefault:\n\"other\"\n} }",
    );
    // Two matchers (dup/value/cmpeq/jt), then the default jump, then the
    // bodies with no jumps between case one and case two.
    let kinds = opcodes(&ctx);
    let matchers = kinds
        .iter()
        .filter(|&&k| k == Opcode::JumpTruthy)
        .count();
    assert_eq!(matchers, 2);
    // One unconditional jump for default, one for break.
    let jumps = kinds.iter().filter(|&&k| k == Opcode::Jump).count();
    assert_eq!(jumps, 2);
    // Exactly one pop drops the selector at the end.
    assert_eq!(kinds.iter().filter(|&&k| k == Opcode::Pop).count(), 1);
}

#[test]
fn simple_switch_ranges_compare_both_bounds() {
    let ctx = compile("scene s { switch ($x) {\n1..5: \"low\"\n9: \"nine\"\n} }");
    let kinds = opcodes(&ctx);
    assert!(kinds.contains(&Opcode::CmpGte));
    assert!(kinds.contains(&Opcode::CmpLte));
    assert!(kinds.contains(&Opcode::CmpEq));
    // Selector pop at the end.
    assert_eq!(kinds.iter().filter(|&&k| k == Opcode::Pop).count(), 1);
}

#[test]
fn choose_emits_adds_then_select_then_bodies() {
    let ctx = compile("scene s { choose {\nchance 1: \"a\"\n\"b\"\n} }");
    let kinds = opcodes(&ctx);
    let select_at = kinds
        .iter()
        .position(|&k| k == Opcode::ChooseSelect)
        .unwrap();
    let adds: Vec<_> = kinds
        .iter()
        .enumerate()
        .filter(|(_, &k)| k == Opcode::ChooseAdd)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(adds.len(), 2);
    assert!(adds.iter().all(|&i| i < select_at));
    // Each add's jump target is a body after the select.
    for &i in &adds {
        let target = jump_target(&ctx.bytecode[i]);
        assert!(target > ctx.bytecode[select_at].offset as i64);
    }
}

#[test]
fn choice_emits_begin_texts_and_select() {
    let ctx = compile(
        "scene s { choice {\n\"Pick:\"\n\"Yes\": { \"yes\" }\n\"No\" require $ok: { \"no\" }\n} }",
    );
    let kinds = opcodes(&ctx);
    assert_eq!(kinds[0], Opcode::ChoiceBegin);
    assert!(kinds.contains(&Opcode::ChoiceAdd));
    assert!(kinds.contains(&Opcode::ChoiceAddTruthy));
    assert!(kinds.contains(&Opcode::ChoiceSelect));
    // Pre-statement text, two option texts, two bodies: five strings.
    assert_eq!(
        kinds.iter().filter(|&&k| k == Opcode::PushString).count(),
        5
    );
}

#[test]
fn sequence_steps_selector_between_entries() {
    let ctx = compile("scene s { sequence $step {\n0: \"first\"\n1: \"second\"\n} }");
    let kinds = opcodes(&ctx);
    // The first entry stores the next case value into the variable.
    assert!(kinds.contains(&Opcode::SetVarGlobal));
    // Selector load, matchers, bodies, final pop.
    assert_eq!(kinds.last(), Some(&Opcode::Exit));
    assert_eq!(kinds[kinds.len() - 2], Opcode::Pop);
}

#[test]
fn scene_function_call_records_candidates() {
    let ctx = compile_private("namespace n { scene s { greet(1, 2) } }");
    let call = ctx
        .bytecode
        .iter()
        .find(|i| i.opcode == Opcode::PatchCall)
        .expect("call instruction");
    match &call.arg {
        Arg::Call {
            arg_count,
            candidates,
        } => {
            assert_eq!(*arg_count, 2);
            assert_eq!(candidates, &vec!["greet".to_string(), "n.greet".to_string()]);
        }
        other => panic!("expected call argument, got {:?}", other),
    }
}

#[test]
fn function_flags_and_args_become_locals() {
    let ctx = compile("func f(a) [seen = 0] { return $a }");
    let entries = ctx.function_bytecode.get("f").unwrap();
    // Body entry plus two entries for the flag.
    assert_eq!(entries.len(), 3);
    // `$a` resolves to local slot 1 (after the flag at slot 0).
    let push_local = ctx
        .bytecode
        .iter()
        .find(|i| i.opcode == Opcode::PushVarLocal)
        .unwrap();
    match push_local.arg {
        Arg::Int(slot) => assert_eq!(slot, 1),
        _ => panic!(),
    }
    // The flag's default storage key is derived from the symbol.
    assert!(ctx.internal_strings().iter().any(|s| s == "f_seen"));
}

#[test]
fn locals_are_freed_per_declaration() {
    let ctx = compile("scene s {\nlocal $a = 1\n{ local $b = 2 }\n}");
    let freed = ctx
        .bytecode
        .iter()
        .filter(|i| i.opcode == Opcode::FreeLocal)
        .count();
    assert_eq!(freed, 2);
}

#[test]
fn short_circuit_and_lowering() {
    let ctx = compile("scene s { $x = $a && $b }");
    let kinds = opcodes(&ctx);
    assert!(kinds.contains(&Opcode::JumpFalsey));
    // The short-circuit arm pushes the canonical 0.
    let jf = ctx
        .bytecode
        .iter()
        .find(|i| i.opcode == Opcode::JumpFalsey)
        .unwrap();
    let target = jump_target(jf);
    let landed = ctx
        .bytecode
        .iter()
        .find(|i| i.offset as i64 == target)
        .unwrap();
    assert_eq!(landed.opcode, Opcode::PushInt);
    match landed.arg {
        Arg::Int(v) => assert_eq!(v, 0),
        _ => panic!(),
    }
}

#[test]
fn subscripted_compound_assignment_uses_dup2() {
    let ctx = compile("scene s { $a[0][1] += 2 }");
    let kinds = opcodes(&ctx);
    assert_eq!(kinds.iter().filter(|&&k| k == Opcode::Dup2).count(), 2);
    assert_eq!(
        kinds.iter().filter(|&&k| k == Opcode::SetArrayIndex).count(),
        2
    );
    assert!(kinds.contains(&Opcode::Add));
    assert_eq!(kinds.iter().filter(|&&k| k == Opcode::SetVarGlobal).count(), 1);
}

#[test]
fn percentage_literal_divides_by_hundred() {
    let ctx = compile("scene s { $x = 50% }");
    let push = ctx
        .bytecode
        .iter()
        .find(|i| i.opcode == Opcode::PushDouble)
        .unwrap();
    match push.arg {
        Arg::Double(v) => assert!((v - 0.5).abs() < 1e-9),
        _ => panic!(),
    }
}

#[test]
fn duplicate_strings_intern_once() {
    let ctx = compile("scene s { !\"same\" !\"same\" }");
    let count = ctx
        .internal_strings()
        .iter()
        .filter(|s| s.as_str() == "same")
        .count();
    assert_eq!(count, 1);
}

#[test]
fn marked_comments_enter_private_translation_stream() {
    let ctx = compile_private("scene s {\n//! translator hint\n\"line\"\n}");
    assert_eq!(ctx.translation_info.len(), 2);
    assert!(ctx.translation_info[0].is_comment);
    assert_eq!(ctx.translation_info[0].text, " translator hint");
    assert!(!ctx.translation_info[1].is_comment);
}

// ----- Stream invariants over a construct-heavy program -----

const KITCHEN_SINK: &str = r#"
namespace game {
    //! hints for everyone
    def names { hero = "Alice" }

    scene intro {
        local $count = 3
        repeat ($count) { "again" }
        while ($count > 0) {
            switch ($count) {
                case 1:
                    continue
                case 2:
                    break
                default:
                    "other"
            }
            $count--
        }
        sequence $line {
            0: "one"
            1..2: "two or three"
        }
        choose {
            chance 50%: "heads"
            "tails"
        }
        choice {
            "Pick one"
            "A": { "chose a" }
            "B" chance 0.5: { "chose b" }
        }
        if $count == 0 { "done" } else { "not done" }
    }

    func helper(x) {
        return $x * 2
    }
}
"#;

#[test]
fn offsets_accumulate_wire_sizes() {
    let ctx = compile(KITCHEN_SINK);
    let mut expected = 0u32;
    for instr in &ctx.bytecode {
        assert_eq!(instr.offset, expected, "at {}", instr);
        expected += instr.wire_size();
    }
    assert_eq!(ctx.offset, expected);
}

#[test]
fn every_jump_lands_on_an_instruction_or_stream_end() {
    let ctx = compile(KITCHEN_SINK);
    let offsets: std::collections::HashSet<i64> =
        ctx.bytecode.iter().map(|i| i.offset as i64).collect();
    let total = ctx.offset as i64;
    for instr in &ctx.bytecode {
        let is_jump = matches!(
            instr.opcode,
            Opcode::Jump
                | Opcode::JumpTruthy
                | Opcode::JumpFalsey
                | Opcode::ChoiceAdd
                | Opcode::ChoiceAddTruthy
                | Opcode::ChooseAdd
                | Opcode::ChooseAddTruthy
        );
        if is_jump {
            let target = jump_target(instr);
            assert!(
                target == total || offsets.contains(&target),
                "jump at offset {} targets {} which is not an instruction",
                instr.offset,
                target
            );
        }
    }
}

#[test]
fn translation_indices_are_dense_and_unique() {
    let ctx = compile_private(KITCHEN_SINK);
    let non_comment = ctx
        .translation_info
        .iter()
        .filter(|t| !t.is_comment)
        .count() as i32;

    // Translation indices come from pushs/pushints instructions and from
    // definition values; together they cover 0..count exactly once.
    let mut seen: Vec<i32> = ctx
        .bytecode
        .iter()
        .filter(|i| matches!(i.opcode, Opcode::PushString | Opcode::PushInterpString))
        .map(|i| match i.arg {
            Arg::Int(v) => v,
            Arg::Two(v, _) => v,
            _ => panic!("unexpected argument on {}", i),
        })
        .collect();
    for (value, _) in ctx.definition_bytecode.values() {
        if let DefinitionValue::Translated(index) = value {
            seen.push(*index);
        }
    }
    seen.sort_unstable();
    let expected: Vec<i32> = (0..non_comment).collect();
    assert_eq!(seen, expected);
}

#[test]
fn symbols_register_in_source_order() {
    let ctx = compile(KITCHEN_SINK);
    let scenes: Vec<_> = ctx.scene_bytecode.keys().cloned().collect();
    assert_eq!(scenes, vec!["game.intro".to_string()]);
    let functions: Vec<_> = ctx.function_bytecode.keys().cloned().collect();
    assert_eq!(functions, vec!["game.helper".to_string()]);
    assert!(ctx.definition_bytecode.contains_key("game.names.hero"));
}

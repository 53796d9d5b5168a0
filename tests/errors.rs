//! Error accumulation and phase suppression across the pipeline.

use diannex::compile::{compile_source, CompileErrors};
use diannex::error::{BytecodeErrorKind, ParseErrorKind};
use diannex::project::ProjectFormat;

fn generate_errors(source: &str) -> Vec<BytecodeErrorKind> {
    match compile_source("test.dx", source, ProjectFormat::default()) {
        Err(CompileErrors::Generate(files)) => files
            .into_iter()
            .flat_map(|(_, errors)| errors)
            .map(|e| e.kind)
            .collect(),
        Ok(_) => panic!("expected generation errors"),
        Err(other) => panic!("expected generation errors, got {:?}", other),
    }
}

fn parse_errors(source: &str) -> Vec<ParseErrorKind> {
    match compile_source("test.dx", source, ProjectFormat::default()) {
        Err(CompileErrors::Parse(files)) => files
            .into_iter()
            .flat_map(|(_, errors)| errors)
            .map(|e| e.kind)
            .collect(),
        Ok(_) => panic!("expected parse errors"),
        Err(other) => panic!("expected parse errors, got {:?}", other),
    }
}

#[test]
fn duplicate_scene_is_reported_and_first_registration_kept() {
    let errors = generate_errors("scene s { \"a\" }\nscene s { \"b\" }");
    assert!(errors
        .iter()
        .any(|e| matches!(e, BytecodeErrorKind::SceneAlreadyExists(name) if name == "s")));
}

#[test]
fn duplicate_definition_is_reported() {
    let errors = generate_errors("def d { a = \"x\"\na = \"y\" }");
    assert!(errors
        .iter()
        .any(|e| matches!(e, BytecodeErrorKind::DefinitionAlreadyExists(name) if name == "d.a")));
}

#[test]
fn duplicate_function_is_reported() {
    let errors = generate_errors("func f() { }\nfunc f() { }");
    assert!(errors
        .iter()
        .any(|e| matches!(e, BytecodeErrorKind::FunctionAlreadyExists(name) if name == "f")));
}

#[test]
fn continue_outside_loop_is_reported() {
    let errors = generate_errors("scene s { continue }");
    assert!(errors.contains(&BytecodeErrorKind::ContinueOutsideOfLoop));
}

#[test]
fn break_outside_loop_is_reported() {
    let errors = generate_errors("scene s { break }");
    assert!(errors.contains(&BytecodeErrorKind::BreakOutsideOfLoop));
}

#[test]
fn continue_in_switch_outside_loop_is_reported() {
    let errors = generate_errors("scene s { switch ($x) { case 1: continue } }");
    assert!(errors.contains(&BytecodeErrorKind::ContinueOutsideOfLoop));
}

#[test]
fn continue_in_switch_inside_loop_is_fine() {
    let ctx = compile_source(
        "test.dx",
        "scene s { while (1) { switch ($x) { case 1: continue\ncase 2: break } } }",
        ProjectFormat::default(),
    )
    .unwrap();
    assert!(!ctx.bytecode.is_empty());
}

#[test]
fn local_redeclaration_is_reported() {
    let errors = generate_errors("scene s { local $x = 1\nlocal $x = 2 }");
    assert!(errors
        .iter()
        .any(|e| matches!(e, BytecodeErrorKind::LocalVariableAlreadyExists(name) if name == "x")));
}

#[test]
fn statements_before_switch_case_are_reported() {
    let errors = generate_errors("scene s { switch ($x) { \"stray\"\ncase 1: \"ok\" } }");
    assert!(errors.contains(&BytecodeErrorKind::StatementsBeforeSwitchCase));
}

#[test]
fn parse_errors_suppress_code_generation() {
    // A duplicate scene would be a generation error, but the parse error
    // on the first scene stops the pipeline first.
    let errors = parse_errors("scene s { ] }\nscene s { }");
    assert!(!errors.is_empty());
}

#[test]
fn multiple_errors_accumulate_in_one_run() {
    let errors = generate_errors("scene s { continue\nbreak }");
    assert_eq!(errors.len(), 2);
}

#[test]
fn trailing_endif_reaches_diagnostics() {
    let errors = parse_errors("#endif\nscene s { }");
    assert!(errors.iter().any(
        |e| matches!(e, ParseErrorKind::ErrorToken { message } if message.contains("Trailing"))
    ));
}

#[test]
fn unknown_directive_reaches_diagnostics() {
    let errors = parse_errors("#pragma once\nscene s { }");
    assert!(errors.iter().any(
        |e| matches!(e, ParseErrorKind::ErrorToken { message } if message.contains("pragma"))
    ));
}

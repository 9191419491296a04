// jot-vm - Compile-time rejection tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;

use common::*;
use jot_ast::builders::*;
use jot_ast::{
    ClassMethod, Declarator, FunctionDeclaration, Pattern, Stmt, UpdateOp, VariableDeclaration,
};
use jot_vm::CompileError;

#[test]
fn break_outside_a_loop() {
    assert_eq!(
        compile_error(program(vec![brk()])),
        CompileError::BreakOutsideLoop
    );
}

#[test]
fn continue_outside_a_loop() {
    assert_eq!(
        compile_error(program(vec![cont()])),
        CompileError::ContinueOutsideLoop
    );
}

#[test]
fn return_at_script_top_level() {
    assert_eq!(
        compile_error(program(vec![ret(Some(num(1.0)))])),
        CompileError::ReturnOutsideFunction
    );
}

#[test]
fn return_with_a_value_in_a_constructor() {
    let error = compile_error(program(vec![class_decl(
        "C",
        vec![method("constructor", &[], vec![ret(Some(num(1.0)))])],
    )]));
    assert_eq!(error, CompileError::ReturnValueInConstructor);
}

#[test]
fn bare_return_in_a_constructor_is_fine() {
    let value = run_value(program(vec![
        class_decl("C", vec![method("constructor", &[], vec![ret(None)])]),
        let_decl("c", new_expr(ident("C"), vec![])),
        expr_stmt(binary(jot_ast::BinaryOp::Eq, ident("c"), ident("c"))),
    ]));
    assert!(as_bool(&value));
}

#[test]
fn computed_update_target_is_rejected() {
    let error = compile_error(program(vec![
        let_decl("o", object(vec![])),
        expr_stmt(update(
            UpdateOp::Increment,
            false,
            index(ident("o"), string("k")),
        )),
    ]));
    assert_eq!(error, CompileError::ComputedUpdateTarget);
}

#[test]
fn duplicate_declaration_in_one_scope() {
    let error = compile_error(program(vec![block(vec![
        let_decl("x", num(1.0)),
        let_decl("x", num(2.0)),
    ])]));
    assert_eq!(error, CompileError::DuplicateDeclaration("x".to_string()));
}

#[test]
fn duplicate_parameter_and_local() {
    let error = compile_error(program(vec![func_decl(
        "f",
        &["a"],
        vec![let_decl("a", num(1.0))],
    )]));
    assert_eq!(error, CompileError::DuplicateDeclaration("a".to_string()));
}

#[test]
fn await_outside_an_async_function() {
    let error = compile_error(program(vec![func_decl(
        "f",
        &[],
        vec![expr_stmt(await_expr(num(1.0)))],
    )]));
    assert_eq!(error, CompileError::AwaitOutsideAsync);

    let error = compile_error(program(vec![expr_stmt(await_expr(num(1.0)))]));
    assert_eq!(error, CompileError::AwaitOutsideAsync);
}

#[test]
fn yield_outside_a_generator() {
    let error = compile_error(program(vec![func_decl(
        "f",
        &[],
        vec![expr_stmt(yield_expr(None))],
    )]));
    assert_eq!(error, CompileError::YieldOutsideGenerator);
}

#[test]
fn async_generators_are_rejected() {
    let mut f = function(&[], vec![]);
    f.is_async = true;
    f.is_generator = true;
    let error = compile_error(program(vec![Stmt::FunctionDeclaration(
        FunctionDeclaration {
            name: "bad".to_string(),
            function: f,
        },
    )]));
    assert_eq!(error, CompileError::AsyncGenerator);
}

#[test]
fn async_class_methods_are_allowed_but_async_generator_methods_are_not() {
    let mut f = function(&[], vec![]);
    f.is_async = true;
    f.is_generator = true;
    let error = compile_error(program(vec![class_decl(
        "C",
        vec![ClassMethod {
            name: "m".to_string(),
            function: f,
        }],
    )]));
    assert_eq!(error, CompileError::AsyncGenerator);
}

#[test]
fn assignment_to_a_literal_is_rejected() {
    let error = compile_error(program(vec![expr_stmt(assign(num(1.0), num(2.0)))]));
    assert_eq!(error, CompileError::InvalidAssignmentTarget);
}

#[test]
fn destructuring_declarations_compile_in_both_scopes() {
    // A smoke check that the two lowering strategies both pass the
    // compiler; behaviour is covered in objects_test.
    let program_ok = program(vec![
        let_array_pattern(&["a", "b"], array(vec![num(1.0), num(2.0)])),
        func_decl(
            "f",
            &[],
            vec![
                Stmt::VariableDeclaration(VariableDeclaration {
                    declarations: vec![Declarator {
                        id: Pattern::ObjectPattern(vec!["x".to_string()]),
                        init: Some(object(vec![("x", num(1.0))])),
                    }],
                }),
                ret(Some(ident("x"))),
            ],
        ),
        expr_stmt(call(ident("f"), vec![])),
    ]);
    let value = run_value(program_ok);
    assert_eq!(as_number(&value), 1.0);
}

// jot-vm - Exception handling and error path tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;

use common::*;
use jot_ast::builders::*;
use jot_ast::BinaryOp;
use jot_vm::InterpretOutcome;

#[test]
fn exception_propagates_through_the_call_chain() {
    // function a(){ throw "e"; } function b(){ a(); }
    // try { b(); } catch (e) { console.log(e); }
    let logs = run_logs(program(vec![
        func_decl("a", &[], vec![throw_stmt(string("e"))]),
        func_decl("b", &[], vec![expr_stmt(call(ident("a"), vec![]))]),
        try_catch(
            vec![expr_stmt(call(ident("b"), vec![]))],
            Some("e"),
            vec![expr_stmt(call_method(
                ident("console"),
                "log",
                vec![ident("e")],
            ))],
        ),
    ]));
    assert_eq!(logs, vec!["e"]);
}

#[test]
fn catch_receives_the_thrown_value_and_skips_the_rest_of_try() {
    let value = run_value(program(vec![
        let_decl("r", null()),
        try_catch(
            vec![
                throw_stmt(string("boom")),
                expr_stmt(assign(ident("r"), string("not reached"))),
            ],
            Some("err"),
            vec![expr_stmt(assign(ident("r"), ident("err")))],
        ),
        expr_stmt(ident("r")),
    ]));
    assert_eq!(as_str(&value), "boom");
}

#[test]
fn runtime_errors_are_catchable_as_message_strings() {
    let value = run_value(program(vec![
        let_decl("r", null()),
        try_catch(
            vec![expr_stmt(binary(BinaryOp::Div, num(1.0), num(0.0)))],
            Some("e"),
            vec![expr_stmt(assign(ident("r"), ident("e")))],
        ),
        expr_stmt(ident("r")),
    ]));
    assert_eq!(as_str(&value), "Division by zero");
}

#[test]
fn uncaught_throw_fails_the_interpretation() {
    let outcome = run_outcome(program(vec![throw_stmt(string("x"))]));
    assert_eq!(outcome, InterpretOutcome::RuntimeError);
}

#[test]
fn catch_without_a_parameter_discards_the_value() {
    let value = run_value(program(vec![
        let_decl("r", null()),
        try_catch(
            vec![throw_stmt(num(1.0))],
            None,
            vec![expr_stmt(assign(ident("r"), string("caught")))],
        ),
        expr_stmt(ident("r")),
    ]));
    assert_eq!(as_str(&value), "caught");
}

#[test]
fn rethrow_from_catch_reaches_the_outer_handler() {
    let value = run_value(program(vec![
        let_decl("r", null()),
        try_catch(
            vec![try_catch(
                vec![throw_stmt(string("inner"))],
                Some("e"),
                vec![throw_stmt(binary(BinaryOp::Add, ident("e"), string("!")))],
            )],
            Some("e2"),
            vec![expr_stmt(assign(ident("r"), ident("e2")))],
        ),
        expr_stmt(ident("r")),
    ]));
    assert_eq!(as_str(&value), "inner!");
}

#[test]
fn execution_continues_after_a_handled_exception() {
    let value = run_value(program(vec![
        let_decl("total", num(0.0)),
        try_catch(
            vec![throw_stmt(num(1.0))],
            None,
            vec![expr_stmt(assign(ident("total"), num(1.0)))],
        ),
        expr_stmt(assign(
            ident("total"),
            binary(BinaryOp::Add, ident("total"), num(10.0)),
        )),
        expr_stmt(ident("total")),
    ]));
    assert_eq!(as_number(&value), 11.0);
}

#[test]
fn returning_from_inside_try_keeps_the_handler_stack_balanced() {
    let value = run_value(program(vec![
        func_decl(
            "f",
            &[],
            vec![try_catch(
                vec![ret(Some(num(1.0)))],
                None,
                vec![ret(Some(num(2.0)))],
            )],
        ),
        expr_stmt(call(ident("f"), vec![])),
        expr_stmt(call(ident("f"), vec![])),
        // A later uncaught throw must not find a stale handler.
        expr_stmt(call(ident("f"), vec![])),
    ]));
    assert_eq!(as_number(&value), 1.0);

    let outcome = run_outcome(program(vec![
        func_decl(
            "f",
            &[],
            vec![try_catch(vec![ret(Some(num(1.0)))], None, vec![])],
        ),
        expr_stmt(call(ident("f"), vec![])),
        throw_stmt(string("unhandled")),
    ]));
    assert_eq!(outcome, InterpretOutcome::RuntimeError);
}

#[test]
fn break_out_of_a_try_inside_a_loop_keeps_the_handler_stack_balanced() {
    let outcome = run_outcome(program(vec![
        while_stmt(
            boolean(true),
            vec![try_catch(vec![brk()], None, vec![])],
        ),
        // With a stale handler this throw would be silently "caught".
        throw_stmt(string("unhandled")),
    ]));
    assert_eq!(outcome, InterpretOutcome::RuntimeError);
}

#[test]
fn try_block_locals_are_discarded_when_an_exception_unwinds() {
    let value = run_value(program(vec![
        let_decl("r", null()),
        try_catch(
            vec![
                let_decl("tmp", num(99.0)),
                throw_stmt(string("gone")),
            ],
            Some("e"),
            vec![expr_stmt(assign(ident("r"), ident("e")))],
        ),
        expr_stmt(ident("r")),
    ]));
    assert_eq!(as_str(&value), "gone");
}

#[test]
fn thrown_objects_arrive_unchanged() {
    let value = run_value(program(vec![
        let_decl("code", null()),
        try_catch(
            vec![throw_stmt(object(vec![("code", num(404.0))]))],
            Some("e"),
            vec![expr_stmt(assign(ident("code"), member(ident("e"), "code")))],
        ),
        expr_stmt(ident("code")),
    ]));
    assert_eq!(as_number(&value), 404.0);
}

#[test]
fn calling_a_non_callable_is_a_runtime_error() {
    let outcome = run_outcome(program(vec![
        let_decl("x", num(5.0)),
        expr_stmt(call(ident("x"), vec![])),
    ]));
    assert_eq!(outcome, InterpretOutcome::RuntimeError);
}

#[test]
fn runtime_error_deep_in_a_call_chain_is_caught_at_the_top() {
    let value = run_value(program(vec![
        func_decl(
            "inner",
            &[],
            vec![expr_stmt(binary(BinaryOp::Mod, num(1.0), num(0.0)))],
        ),
        func_decl("middle", &[], vec![expr_stmt(call(ident("inner"), vec![]))]),
        let_decl("r", null()),
        try_catch(
            vec![expr_stmt(call(ident("middle"), vec![]))],
            Some("e"),
            vec![expr_stmt(assign(ident("r"), ident("e")))],
        ),
        expr_stmt(ident("r")),
    ]));
    assert_eq!(as_str(&value), "Division by zero");
}

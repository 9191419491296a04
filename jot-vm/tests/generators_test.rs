// jot-vm - Generator and coroutine tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;

use common::*;
use jot_ast::builders::*;
use jot_ast::BinaryOp;
use jot_vm::Value;

#[test]
fn generators_yield_in_order() {
    // function* g(){ yield 1; yield 2; yield 3; }
    // [next().value, next().value, next().value, next().done]
    let value = run_value(program(vec![
        generator_decl(
            "g",
            &[],
            vec![
                expr_stmt(yield_expr(Some(num(1.0)))),
                expr_stmt(yield_expr(Some(num(2.0)))),
                expr_stmt(yield_expr(Some(num(3.0)))),
            ],
        ),
        let_decl("it", call(ident("g"), vec![])),
        expr_stmt(array(vec![
            member(call_method(ident("it"), "next", vec![]), "value"),
            member(call_method(ident("it"), "next", vec![]), "value"),
            member(call_method(ident("it"), "next", vec![]), "value"),
            member(call_method(ident("it"), "next", vec![]), "done"),
        ])),
    ]));
    match &value {
        Value::Array(elements) => {
            let elements = elements.borrow();
            assert_eq!(as_number(&elements[0]), 1.0);
            assert_eq!(as_number(&elements[1]), 2.0);
            assert_eq!(as_number(&elements[2]), 3.0);
            assert!(as_bool(&elements[3]));
        }
        other => panic!("expected array, got {}", other),
    }
}

#[test]
fn exhausted_generator_keeps_reporting_done() {
    let value = run_value(program(vec![
        generator_decl("g", &[], vec![expr_stmt(yield_expr(Some(num(1.0))))]),
        let_decl("it", call(ident("g"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        let_decl("after", call_method(ident("it"), "next", vec![])),
        expr_stmt(array(vec![
            member(ident("after"), "done"),
            binary(BinaryOp::Eq, member(ident("after"), "value"), null()),
        ])),
    ]));
    match &value {
        Value::Array(elements) => {
            let elements = elements.borrow();
            assert!(as_bool(&elements[0]));
            assert!(as_bool(&elements[1]));
        }
        other => panic!("expected array, got {}", other),
    }
}

#[test]
fn next_arguments_become_yield_results() {
    // function* echo(){ let got = yield "first"; yield got; }
    let value = run_value(program(vec![
        generator_decl(
            "echo",
            &[],
            vec![
                let_decl("got", yield_expr(Some(string("first")))),
                expr_stmt(yield_expr(Some(ident("got")))),
            ],
        ),
        let_decl("it", call(ident("echo"), vec![])),
        let_decl(
            "a",
            member(call_method(ident("it"), "next", vec![]), "value"),
        ),
        let_decl(
            "b",
            member(
                call_method(ident("it"), "next", vec![string("hello")]),
                "value",
            ),
        ),
        expr_stmt(binary(
            BinaryOp::Add,
            binary(BinaryOp::Add, ident("a"), string(" ")),
            ident("b"),
        )),
    ]));
    assert_eq!(as_str(&value), "first hello");
}

#[test]
fn generator_locals_persist_across_suspensions() {
    // function* nat(){ let n = 0; while (true) { yield n; n = n + 1; } }
    let value = run_value(program(vec![
        generator_decl(
            "nat",
            &[],
            vec![
                let_decl("n", num(0.0)),
                while_stmt(
                    boolean(true),
                    vec![
                        expr_stmt(yield_expr(Some(ident("n")))),
                        expr_stmt(assign(
                            ident("n"),
                            binary(BinaryOp::Add, ident("n"), num(1.0)),
                        )),
                    ],
                ),
            ],
        ),
        let_decl("it", call(ident("nat"), vec![])),
        expr_stmt(array(vec![
            member(call_method(ident("it"), "next", vec![]), "value"),
            member(call_method(ident("it"), "next", vec![]), "value"),
            member(call_method(ident("it"), "next", vec![]), "value"),
        ])),
    ]));
    assert_eq!(as_numbers(&value), vec![0.0, 1.0, 2.0]);
}

#[test]
fn generator_parameters_are_available_in_the_body() {
    let value = run_value(program(vec![
        generator_decl(
            "range",
            &["start"],
            vec![
                expr_stmt(yield_expr(Some(ident("start")))),
                expr_stmt(yield_expr(Some(binary(
                    BinaryOp::Add,
                    ident("start"),
                    num(1.0),
                )))),
            ],
        ),
        let_decl("it", call(ident("range"), vec![num(5.0)])),
        expr_stmt(array(vec![
            member(call_method(ident("it"), "next", vec![]), "value"),
            member(call_method(ident("it"), "next", vec![]), "value"),
        ])),
    ]));
    assert_eq!(as_numbers(&value), vec![5.0, 6.0]);
}

#[test]
fn generator_return_finishes_without_resuming() {
    let value = run_value(program(vec![
        generator_decl(
            "g",
            &[],
            vec![
                expr_stmt(yield_expr(Some(num(1.0)))),
                expr_stmt(yield_expr(Some(num(2.0)))),
            ],
        ),
        let_decl("it", call(ident("g"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        let_decl("r", call_method(ident("it"), "return", vec![num(99.0)])),
        expr_stmt(array(vec![
            member(ident("r"), "value"),
            member(ident("r"), "done"),
            member(call_method(ident("it"), "next", vec![]), "done"),
        ])),
    ]));
    match &value {
        Value::Array(elements) => {
            let elements = elements.borrow();
            assert_eq!(as_number(&elements[0]), 99.0);
            assert!(as_bool(&elements[1]));
            assert!(as_bool(&elements[2]));
        }
        other => panic!("expected array, got {}", other),
    }
}

#[test]
fn generator_throw_is_catchable_inside_the_body() {
    // function* guarded(){ try { yield 1; } catch (e) { yield e + "?"; } }
    let value = run_value(program(vec![
        generator_decl(
            "guarded",
            &[],
            vec![try_catch(
                vec![expr_stmt(yield_expr(Some(num(1.0))))],
                Some("e"),
                vec![expr_stmt(yield_expr(Some(binary(
                    BinaryOp::Add,
                    ident("e"),
                    string("?"),
                ))))],
            )],
        ),
        let_decl("it", call(ident("guarded"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        expr_stmt(member(
            call_method(ident("it"), "throw", vec![string("oops")]),
            "value",
        )),
    ]));
    assert_eq!(as_str(&value), "oops?");
}

#[test]
fn uncaught_generator_throw_propagates_to_the_resumer() {
    let value = run_value(program(vec![
        generator_decl("g", &[], vec![expr_stmt(yield_expr(Some(num(1.0))))]),
        let_decl("it", call(ident("g"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        let_decl("r", null()),
        try_catch(
            vec![expr_stmt(call_method(
                ident("it"),
                "throw",
                vec![string("bad")],
            ))],
            Some("e"),
            vec![expr_stmt(assign(ident("r"), ident("e")))],
        ),
        expr_stmt(array(vec![
            ident("r"),
            member(call_method(ident("it"), "next", vec![]), "done"),
        ])),
    ]));
    match &value {
        Value::Array(elements) => {
            let elements = elements.borrow();
            assert_eq!(as_str(&elements[0]), "bad");
            assert!(as_bool(&elements[1]));
        }
        other => panic!("expected array, got {}", other),
    }
}

#[test]
fn uncaught_throw_inside_the_body_reaches_the_resumers_handler() {
    let value = run_value(program(vec![
        generator_decl(
            "g",
            &[],
            vec![
                expr_stmt(yield_expr(Some(num(1.0)))),
                throw_stmt(string("from body")),
            ],
        ),
        let_decl("it", call(ident("g"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        let_decl("r", null()),
        try_catch(
            vec![expr_stmt(call_method(ident("it"), "next", vec![]))],
            Some("e"),
            vec![expr_stmt(assign(ident("r"), ident("e")))],
        ),
        expr_stmt(ident("r")),
    ]));
    assert_eq!(as_str(&value), "from body");
}

#[test]
fn closures_created_inside_a_generator_share_its_variables() {
    // The generator yields a closure over its own local, then keeps
    // mutating that local.
    let value = run_value(program(vec![
        generator_decl(
            "g",
            &[],
            vec![
                let_decl("n", num(1.0)),
                expr_stmt(yield_expr(Some(func_expr(
                    &[],
                    vec![ret(Some(ident("n")))],
                )))),
                expr_stmt(assign(ident("n"), num(2.0))),
                expr_stmt(yield_expr(Some(null()))),
            ],
        ),
        let_decl("it", call(ident("g"), vec![])),
        let_decl(
            "peek",
            member(call_method(ident("it"), "next", vec![]), "value"),
        ),
        let_decl("before", call(ident("peek"), vec![])),
        expr_stmt(call_method(ident("it"), "next", vec![])),
        let_decl("after", call(ident("peek"), vec![])),
        expr_stmt(array(vec![ident("before"), ident("after")])),
    ]));
    assert_eq!(as_numbers(&value), vec![1.0, 2.0]);
}

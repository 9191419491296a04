// jot-vm - Closure and upvalue tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;

use common::*;
use jot_ast::builders::*;
use jot_ast::{BinaryOp, UpdateOp};
use jot_vm::InterpretOutcome;

#[test]
fn closures_preserve_bindings_per_activation() {
    // function outer(){ let x = 0; return function(){ return ++x; } }
    // let f1 = outer(), f2 = outer();
    // [f1(), f1(), f2(), f1(), f2()] == [1, 2, 1, 3, 2]
    let value = run_value(program(vec![
        func_decl(
            "outer",
            &[],
            vec![
                let_decl("x", num(0.0)),
                ret(Some(func_expr(
                    &[],
                    vec![ret(Some(update(UpdateOp::Increment, true, ident("x"))))],
                ))),
            ],
        ),
        let_decl("f1", call(ident("outer"), vec![])),
        let_decl("f2", call(ident("outer"), vec![])),
        expr_stmt(array(vec![
            call(ident("f1"), vec![]),
            call(ident("f1"), vec![]),
            call(ident("f2"), vec![]),
            call(ident("f1"), vec![]),
            call(ident("f2"), vec![]),
        ])),
    ]));
    assert_eq!(as_numbers(&value), vec![1.0, 2.0, 1.0, 3.0, 2.0]);
}

#[test]
fn two_closures_share_one_upvalue_cell() {
    // One closure writes, the other observes the write.
    let value = run_value(program(vec![
        func_decl(
            "make",
            &[],
            vec![
                let_decl("v", num(0.0)),
                let_decl(
                    "inc",
                    func_expr(
                        &[],
                        vec![
                            expr_stmt(assign(
                                ident("v"),
                                binary(BinaryOp::Add, ident("v"), num(1.0)),
                            )),
                            ret(Some(ident("v"))),
                        ],
                    ),
                ),
                let_decl(
                    "get",
                    func_expr(&[], vec![ret(Some(ident("v")))]),
                ),
                ret(Some(array(vec![ident("inc"), ident("get")]))),
            ],
        ),
        let_decl("pair", call(ident("make"), vec![])),
        let_decl("inc", index(ident("pair"), num(0.0))),
        let_decl("get", index(ident("pair"), num(1.0))),
        expr_stmt(call(ident("inc"), vec![])),
        expr_stmt(call(ident("inc"), vec![])),
        expr_stmt(call(ident("get"), vec![])),
    ]));
    assert_eq!(as_number(&value), 2.0);
}

#[test]
fn transitive_capture_through_two_function_levels() {
    // inner reaches x through middle, which never mentions it itself
    // except as a conduit.
    let value = run_value(program(vec![
        func_decl(
            "outer",
            &[],
            vec![
                let_decl("x", num(7.0)),
                func_decl(
                    "middle",
                    &[],
                    vec![
                        func_decl("inner", &[], vec![ret(Some(ident("x")))]),
                        ret(Some(ident("inner"))),
                    ],
                ),
                ret(Some(ident("middle"))),
            ],
        ),
        expr_stmt(call(call(call(ident("outer"), vec![]), vec![]), vec![])),
    ]));
    assert_eq!(as_number(&value), 7.0);
}

#[test]
fn counter_closure_survives_its_frame() {
    let value = run_value(program(vec![
        func_decl(
            "counter",
            &[],
            vec![
                let_decl("n", num(0.0)),
                ret(Some(func_expr(
                    &[],
                    vec![
                        expr_stmt(assign(
                            ident("n"),
                            binary(BinaryOp::Add, ident("n"), num(1.0)),
                        )),
                        ret(Some(ident("n"))),
                    ],
                ))),
            ],
        ),
        let_decl("c", call(ident("counter"), vec![])),
        expr_stmt(array(vec![
            call(ident("c"), vec![]),
            call(ident("c"), vec![]),
            call(ident("c"), vec![]),
        ])),
    ]));
    assert_eq!(as_numbers(&value), vec![1.0, 2.0, 3.0]);
}

#[test]
fn named_function_can_recurse_through_its_own_slot() {
    let value = run_value(program(vec![
        func_decl(
            "fact",
            &["n"],
            vec![
                if_stmt(
                    binary(BinaryOp::LtEq, ident("n"), num(1.0)),
                    vec![ret(Some(num(1.0)))],
                ),
                ret(Some(binary(
                    BinaryOp::Mul,
                    ident("n"),
                    call(
                        ident("fact"),
                        vec![binary(BinaryOp::Sub, ident("n"), num(1.0))],
                    ),
                ))),
            ],
        ),
        expr_stmt(call(ident("fact"), vec![num(6.0)])),
    ]));
    assert_eq!(as_number(&value), 720.0);
}

#[test]
fn arity_mismatch_is_a_runtime_error() {
    let outcome = run_outcome(program(vec![
        func_decl("f", &["a"], vec![ret(Some(ident("a")))]),
        expr_stmt(call(ident("f"), vec![])),
    ]));
    assert_eq!(outcome, InterpretOutcome::RuntimeError);
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    let outcome = run_outcome(program(vec![
        func_decl(
            "r",
            &[],
            vec![ret(Some(call(ident("r"), vec![])))],
        ),
        expr_stmt(call(ident("r"), vec![])),
    ]));
    assert_eq!(outcome, InterpretOutcome::RuntimeError);
}

#[test]
fn captured_block_local_is_closed_at_scope_exit() {
    // The block pops `hidden`; the closure keeps the closed-over cell.
    let value = run_value(program(vec![
        let_decl("f", null()),
        block(vec![
            let_decl("hidden", num(41.0)),
            expr_stmt(assign(
                ident("f"),
                func_expr(
                    &[],
                    vec![ret(Some(binary(BinaryOp::Add, ident("hidden"), num(1.0))))],
                ),
            )),
        ]),
        expr_stmt(call(ident("f"), vec![])),
    ]));
    assert_eq!(as_number(&value), 42.0);
}

#[test]
fn arrow_functions_are_closures_too() {
    let value = run_value(program(vec![
        let_decl("base", num(10.0)),
        let_decl(
            "add",
            arrow_expr(&["n"], binary(BinaryOp::Add, ident("base"), ident("n"))),
        ),
        expr_stmt(call(ident("add"), vec![num(5.0)])),
    ]));
    assert_eq!(as_number(&value), 15.0);
}

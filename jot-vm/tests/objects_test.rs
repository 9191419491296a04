// jot-vm - Object, array, and prototype tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;

use common::*;
use jot_ast::builders::*;
use jot_ast::{AssignOp, BinaryOp, UpdateOp};
use jot_vm::InterpretOutcome;

#[test]
fn object_literal_and_property_read() {
    let value = run_value(program(vec![
        let_decl("o", object(vec![("a", num(1.0)), ("b", string("x"))])),
        expr_stmt(member(ident("o"), "a")),
    ]));
    assert_eq!(as_number(&value), 1.0);
}

#[test]
fn property_write_and_read_back() {
    let value = run_value(program(vec![
        let_decl("o", object(vec![])),
        expr_stmt(assign(member(ident("o"), "p"), num(5.0))),
        expr_stmt(member(ident("o"), "p")),
    ]));
    assert_eq!(as_number(&value), 5.0);
}

#[test]
fn missing_property_reads_null() {
    let value = run_value(program(vec![
        let_decl("o", object(vec![])),
        expr_stmt(binary(BinaryOp::Eq, member(ident("o"), "missing"), null())),
    ]));
    assert!(as_bool(&value));
}

#[test]
fn property_on_a_number_is_a_runtime_error() {
    let outcome = run_outcome(program(vec![expr_stmt(member(num(5.0), "p"))]));
    assert_eq!(outcome, InterpretOutcome::RuntimeError);
}

#[test]
fn object_create_wires_the_prototype_chain() {
    let value = run_value(program(vec![
        let_decl("proto", object(vec![("greet", string("hi"))])),
        let_decl(
            "o",
            call_method(ident("Object"), "create", vec![ident("proto")]),
        ),
        expr_stmt(member(ident("o"), "greet")),
    ]));
    assert_eq!(as_str(&value), "hi");
}

#[test]
fn own_property_shadows_the_prototype() {
    let value = run_value(program(vec![
        let_decl("proto", object(vec![("v", num(1.0))])),
        let_decl(
            "o",
            call_method(ident("Object"), "create", vec![ident("proto")]),
        ),
        expr_stmt(assign(member(ident("o"), "v"), num(2.0))),
        expr_stmt(array(vec![
            member(ident("o"), "v"),
            member(ident("proto"), "v"),
        ])),
    ]));
    assert_eq!(as_numbers(&value), vec![2.0, 1.0]);
}

#[test]
fn proto_assignment_reparents_an_object() {
    let value = run_value(program(vec![
        let_decl("parent", object(vec![("v", num(42.0))])),
        let_decl("o", object(vec![])),
        expr_stmt(assign(member(ident("o"), "__proto__"), ident("parent"))),
        expr_stmt(member(ident("o"), "v")),
    ]));
    assert_eq!(as_number(&value), 42.0);
}

#[test]
fn cyclic_prototype_assignment_is_a_runtime_error() {
    let outcome = run_outcome(program(vec![
        let_decl("a", object(vec![])),
        let_decl(
            "b",
            call_method(ident("Object"), "create", vec![ident("a")]),
        ),
        expr_stmt(assign(member(ident("a"), "__proto__"), ident("b"))),
    ]));
    assert_eq!(outcome, InterpretOutcome::RuntimeError);
}

#[test]
fn array_indexing_and_length() {
    let value = run_value(program(vec![
        let_decl("a", array(vec![num(1.0), num(2.0), num(3.0)])),
        expr_stmt(array(vec![
            index(ident("a"), num(1.0)),
            member(ident("a"), "length"),
        ])),
    ]));
    assert_eq!(as_numbers(&value), vec![2.0, 3.0]);
}

#[test]
fn out_of_range_index_reads_null() {
    let value = run_value(program(vec![
        let_decl("a", array(vec![num(1.0)])),
        expr_stmt(binary(BinaryOp::Eq, index(ident("a"), num(5.0)), null())),
    ]));
    assert!(as_bool(&value));
}

#[test]
fn writing_past_the_end_grows_the_array() {
    let value = run_value(program(vec![
        let_decl("a", array(vec![])),
        expr_stmt(assign(index(ident("a"), num(2.0)), num(9.0))),
        expr_stmt(array(vec![
            member(ident("a"), "length"),
            binary(BinaryOp::Eq, index(ident("a"), num(0.0)), null()),
            index(ident("a"), num(2.0)),
        ])),
    ]));
    match &value {
        jot_vm::Value::Array(elements) => {
            let elements = elements.borrow();
            assert_eq!(as_number(&elements[0]), 3.0);
            assert!(as_bool(&elements[1]));
            assert_eq!(as_number(&elements[2]), 9.0);
        }
        other => panic!("expected array, got {}", other),
    }
}

#[test]
fn computed_access_on_objects_uses_string_keys() {
    let value = run_value(program(vec![
        let_decl("o", object(vec![("k", num(7.0))])),
        expr_stmt(index(ident("o"), string("k"))),
    ]));
    assert_eq!(as_number(&value), 7.0);
}

#[test]
fn global_array_destructuring() {
    let value = run_value(program(vec![
        let_array_pattern(&["p", "q"], array(vec![num(10.0), num(20.0)])),
        expr_stmt(binary(BinaryOp::Add, ident("p"), ident("q"))),
    ]));
    assert_eq!(as_number(&value), 30.0);
}

#[test]
fn global_object_destructuring() {
    let value = run_value(program(vec![
        let_object_pattern(&["m", "n"], object(vec![("m", num(1.0)), ("n", num(2.0))])),
        expr_stmt(binary(BinaryOp::Add, ident("m"), ident("n"))),
    ]));
    assert_eq!(as_number(&value), 3.0);
}

#[test]
fn destructuring_inside_a_function_binds_locals() {
    let value = run_value(program(vec![
        func_decl(
            "f",
            &["pair"],
            vec![
                let_array_pattern(&["a", "b"], ident("pair")),
                ret(Some(binary(BinaryOp::Sub, ident("a"), ident("b")))),
            ],
        ),
        expr_stmt(call(ident("f"), vec![array(vec![num(9.0), num(4.0)])])),
    ]));
    assert_eq!(as_number(&value), 5.0);
}

#[test]
fn compound_member_assignment_and_postfix_increment() {
    // let o = {n: 10}; o.n += 5; o.n++;  =>  o.n == 16
    let value = run_value(program(vec![
        let_decl("o", object(vec![("n", num(10.0))])),
        expr_stmt(assign_op(
            AssignOp::AddAssign,
            member(ident("o"), "n"),
            num(5.0),
        )),
        expr_stmt(update(UpdateOp::Increment, false, member(ident("o"), "n"))),
        expr_stmt(member(ident("o"), "n")),
    ]));
    assert_eq!(as_number(&value), 16.0);
}

#[test]
fn postfix_on_a_property_yields_the_old_value() {
    let value = run_value(program(vec![
        let_decl("o", object(vec![("n", num(10.0))])),
        let_decl(
            "old",
            update(UpdateOp::Increment, false, member(ident("o"), "n")),
        ),
        expr_stmt(array(vec![ident("old"), member(ident("o"), "n")])),
    ]));
    assert_eq!(as_numbers(&value), vec![10.0, 11.0]);
}

#[test]
fn prefix_on_a_property_yields_the_new_value() {
    let value = run_value(program(vec![
        let_decl("o", object(vec![("n", num(3.0))])),
        expr_stmt(update(UpdateOp::Decrement, true, member(ident("o"), "n"))),
    ]));
    assert_eq!(as_number(&value), 2.0);
}

#[test]
fn compound_computed_assignment() {
    let value = run_value(program(vec![
        let_decl("a", array(vec![num(1.0), num(2.0)])),
        expr_stmt(assign_op(
            AssignOp::MulAssign,
            index(ident("a"), num(1.0)),
            num(10.0),
        )),
        expr_stmt(index(ident("a"), num(1.0))),
    ]));
    assert_eq!(as_number(&value), 20.0);
}

#[test]
fn array_push_pop_index_of() {
    let value = run_value(program(vec![
        let_decl("a", array(vec![num(1.0), num(2.0), num(3.0)])),
        expr_stmt(call_method(ident("a"), "push", vec![num(4.0)])),
        expr_stmt(array(vec![
            member(ident("a"), "length"),
            call_method(ident("a"), "pop", vec![]),
            call_method(ident("a"), "indexOf", vec![num(2.0)]),
        ])),
    ]));
    assert_eq!(as_numbers(&value), vec![4.0, 4.0, 1.0]);
}

#[test]
fn array_join_and_slice() {
    let value = run_value(program(vec![expr_stmt(call_method(
        array(vec![string("a"), string("b"), string("c")]),
        "join",
        vec![string("-")],
    ))]));
    assert_eq!(as_str(&value), "a-b-c");

    let value = run_value(program(vec![expr_stmt(call_method(
        array(vec![num(1.0), num(2.0), num(3.0), num(4.0)]),
        "slice",
        vec![num(1.0), num(3.0)],
    ))]));
    assert_eq!(as_numbers(&value), vec![2.0, 3.0]);
}

#[test]
fn array_map_and_filter_reenter_the_vm() {
    let value = run_value(program(vec![expr_stmt(call_method(
        array(vec![num(1.0), num(2.0), num(3.0)]),
        "map",
        vec![arrow_expr(
            &["x"],
            binary(BinaryOp::Mul, ident("x"), num(2.0)),
        )],
    ))]));
    assert_eq!(as_numbers(&value), vec![2.0, 4.0, 6.0]);

    let value = run_value(program(vec![expr_stmt(call_method(
        array(vec![num(1.0), num(2.0), num(3.0), num(4.0)]),
        "filter",
        vec![arrow_expr(
            &["x"],
            binary(
                BinaryOp::Eq,
                binary(BinaryOp::Mod, ident("x"), num(2.0)),
                num(0.0),
            ),
        )],
    ))]));
    assert_eq!(as_numbers(&value), vec![2.0, 4.0]);
}

#[test]
fn array_for_each_sees_every_element() {
    let value = run_value(program(vec![
        let_decl("total", num(0.0)),
        expr_stmt(call_method(
            array(vec![num(1.0), num(2.0), num(3.0)]),
            "forEach",
            vec![func_expr(
                &["x"],
                vec![expr_stmt(assign_op(
                    AssignOp::AddAssign,
                    ident("total"),
                    ident("x"),
                ))],
            )],
        )),
        expr_stmt(ident("total")),
    ]));
    assert_eq!(as_number(&value), 6.0);
}

#[test]
fn object_keys_preserve_insertion_order() {
    let value = run_value(program(vec![
        let_decl("o", object(vec![("z", num(1.0)), ("a", num(2.0))])),
        expr_stmt(call_method(
            call_method(ident("Object"), "keys", vec![ident("o")]),
            "join",
            vec![string(",")],
        )),
    ]));
    assert_eq!(as_str(&value), "z,a");
}

#[test]
fn reference_equality_for_objects() {
    let value = run_value(program(vec![
        let_decl("o", object(vec![])),
        let_decl("p", ident("o")),
        expr_stmt(array(vec![
            binary(BinaryOp::Eq, ident("o"), ident("p")),
            binary(BinaryOp::Eq, ident("o"), object(vec![])),
        ])),
    ]));
    match &value {
        jot_vm::Value::Array(elements) => {
            let elements = elements.borrow();
            assert!(as_bool(&elements[0]));
            assert!(!as_bool(&elements[1]));
        }
        other => panic!("expected array, got {}", other),
    }
}

// jot-vm - Shared test helpers
// Copyright (c) 2025 Tom Waddington. MIT licensed.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use jot_ast::Program;
use jot_vm::runtime::builtins;
use jot_vm::{CompileError, InterpretOutcome, Value, Vm};

/// Run a program with a capturing console; returns the outcome, the
/// script's completion value, and the console lines.
pub fn run(program: Program) -> (InterpretOutcome, Value, Vec<String>) {
    let mut vm = Vm::new();
    let logs = Rc::new(RefCell::new(Vec::new()));
    vm.bind_native("console", builtins::console_capture(logs.clone()));
    let interpretation = vm.interpret(&program).expect("compile error");
    let lines = logs.borrow().clone();
    (interpretation.result, interpretation.value, lines)
}

/// Run a program that must succeed; returns its completion value.
pub fn run_value(program: Program) -> Value {
    let (outcome, value, _) = run(program);
    assert_eq!(outcome, InterpretOutcome::Ok, "unexpected runtime error");
    value
}

/// Run a program that must succeed; returns the console lines.
pub fn run_logs(program: Program) -> Vec<String> {
    let (outcome, _, logs) = run(program);
    assert_eq!(outcome, InterpretOutcome::Ok, "unexpected runtime error");
    logs
}

/// Run a program and return only the outcome.
pub fn run_outcome(program: Program) -> InterpretOutcome {
    run(program).0
}

/// Compile a program that must be rejected; returns the error.
pub fn compile_error(program: Program) -> CompileError {
    match jot_vm::compile(&program) {
        Ok(_) => panic!("expected a compile error"),
        Err(error) => error,
    }
}

pub fn as_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        other => panic!("expected number, got {}", other),
    }
}

pub fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        other => panic!("expected boolean, got {}", other),
    }
}

pub fn as_str(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        other => panic!("expected string, got {}", other),
    }
}

pub fn as_numbers(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(elements) => elements.borrow().iter().map(as_number).collect(),
        other => panic!("expected array, got {}", other),
    }
}

pub fn is_null(value: &Value) -> bool {
    matches!(value, Value::Null)
}

// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode compiler and stack-based virtual machine for Jot.
//!
//! Jot is a small dynamically-typed, JavaScript-like scripting language.
//! This crate lowers a [`jot_ast::Program`] into stack-based bytecode and
//! executes it with support for closures, prototype-based objects,
//! classes, generators, exceptions, and async/await driven by an event
//! loop with a microtask queue.
//!
//! Parsing is not part of this crate: any parser producing the
//! `jot-ast` node shapes can feed [`Vm::interpret`]. Host facilities
//! (console, timers, fetch) are injected as native objects through
//! [`Vm::bind_native`]; defaults are installed by [`Vm::new`].

pub mod chunk;
pub mod compiler;
pub mod opcode;
pub mod runtime;
pub mod value;
pub mod vm;

pub use chunk::{Chunk, Function, UpvalueDesc};
pub use compiler::{compile, CompileError};
pub use opcode::OpCode;
pub use value::{Object, Value};
pub use vm::{Interpretation, InterpretOutcome, RuntimeError, Vm};

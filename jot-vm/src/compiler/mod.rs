// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Single-pass compiler from the Jot AST to bytecode.

pub mod codegen;
pub mod emit;
pub mod types;

pub use codegen::compile;
pub use types::CompileError;

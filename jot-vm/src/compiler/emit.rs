// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode emission and scope bookkeeping for the compiler.
//!
//! Everything here operates on the innermost function state; the
//! lowering logic in `codegen` stays free of byte-level details.

use crate::opcode::OpCode;
use crate::value::Value;

use super::codegen::Compiler;
use super::types::{CompileError, FuncState, FunctionKind, Local, LoopContext, Result};

impl Compiler {
    pub(crate) fn state(&mut self) -> &mut FuncState {
        self.states.last_mut().expect("compiler has no active state")
    }

    pub(crate) fn state_ref(&self) -> &FuncState {
        self.states.last().expect("compiler has no active state")
    }

    /// True at module depth, where declarations become globals.
    pub(crate) fn at_global_scope(&self) -> bool {
        self.states.len() == 1
            && self.state_ref().kind == FunctionKind::Script
            && self.state_ref().scope_depth == 0
    }

    // ------------------------------------------------------------------
    // Raw emission
    // ------------------------------------------------------------------

    pub(crate) fn emit_op(&mut self, op: OpCode) {
        self.state().chunk.write_op(op);
    }

    pub(crate) fn emit_byte(&mut self, byte: u8) {
        self.state().chunk.write_byte(byte);
    }

    pub(crate) fn current_offset(&self) -> usize {
        self.state_ref().chunk.current_offset()
    }

    pub(crate) fn add_constant(&mut self, value: Value) -> Result<u8> {
        self.state()
            .chunk
            .add_constant(value)
            .ok_or(CompileError::TooManyConstants)
    }

    /// Pool a name used as an instruction operand (globals, properties).
    pub(crate) fn name_constant(&mut self, name: &str) -> Result<u8> {
        self.add_constant(Value::string(name))
    }

    /// Emit `PushConst` for a pooled literal.
    pub(crate) fn emit_const(&mut self, value: Value) -> Result<()> {
        let idx = self.add_constant(value)?;
        self.emit_op(OpCode::PushConst);
        self.emit_byte(idx);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Jumps
    // ------------------------------------------------------------------

    /// Emit a forward jump with a placeholder operand; returns the
    /// operand offset for later patching.
    pub(crate) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        let operand = self.current_offset();
        self.state().chunk.write_u16(0xffff);
        operand
    }

    /// Patch a forward jump to land at the current position.
    pub(crate) fn patch_jump(&mut self, operand: usize) -> Result<()> {
        let distance = self.current_offset() - (operand + 2);
        if distance > u16::MAX as usize {
            return Err(CompileError::JumpTooFar);
        }
        self.state().chunk.patch_u16(operand, distance as u16);
        Ok(())
    }

    /// Emit a backward jump to `target`.
    pub(crate) fn emit_loop(&mut self, target: usize) -> Result<()> {
        self.emit_op(OpCode::Loop);
        let distance = self.current_offset() + 2 - target;
        if distance > u16::MAX as usize {
            return Err(CompileError::JumpTooFar);
        }
        self.state().chunk.write_u16(distance as u16);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scopes and locals
    // ------------------------------------------------------------------

    pub(crate) fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    /// Leave a scope, popping its locals. Captured locals are closed
    /// into their upvalue cells instead of discarded.
    pub(crate) fn end_scope(&mut self) {
        self.state().scope_depth -= 1;
        loop {
            let state = self.state();
            let depth_limit = state.scope_depth;
            let op = match state.locals.last() {
                Some(local) if local.depth > depth_limit => {
                    if local.is_captured {
                        OpCode::CloseUpvalue
                    } else {
                        OpCode::Pop
                    }
                }
                _ => break,
            };
            state.locals.pop();
            self.emit_op(op);
        }
    }

    /// Declare a local for the value currently on top of the stack.
    /// Returns its slot.
    pub(crate) fn declare_local(&mut self, name: &str) -> Result<u8> {
        let state = self.state();
        for local in state.locals.iter().rev() {
            if local.depth < state.scope_depth {
                break;
            }
            if local.name == name {
                return Err(CompileError::DuplicateDeclaration(name.to_string()));
            }
        }
        if state.locals.len() >= 256 {
            return Err(CompileError::TooManyLocals);
        }
        let slot = state.locals.len() as u8;
        let depth = state.scope_depth;
        state.locals.push(Local {
            name: name.to_string(),
            depth,
            is_captured: false,
        });
        Ok(slot)
    }

    /// Declare an unnameable scratch local (destructuring source).
    pub(crate) fn declare_tmp_local(&mut self) -> Result<u8> {
        let n = self.state().tmp_count;
        self.state().tmp_count = n + 1;
        self.declare_local(&format!("<tmp{}>", n))
    }

    /// Bind the value on top of the stack to `name`: a global at module
    /// depth, a fresh local otherwise.
    pub(crate) fn define_binding(&mut self, name: &str) -> Result<()> {
        if self.at_global_scope() {
            let idx = self.name_constant(name)?;
            self.emit_op(OpCode::DefineGlobal);
            self.emit_byte(idx);
        } else {
            self.declare_local(name)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loops and non-local exits
    // ------------------------------------------------------------------

    pub(crate) fn begin_loop(&mut self, continue_target: Option<usize>) {
        let state = self.state();
        let context = LoopContext {
            scope_depth: state.scope_depth,
            try_depth: state.try_depth,
            continue_target,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
        };
        state.loops.push(context);
    }

    pub(crate) fn end_loop(&mut self) -> LoopContext {
        self.state().loops.pop().expect("end_loop without begin_loop")
    }

    /// Emit the pops and handler removals needed to leave every scope
    /// and try block opened since the innermost loop header, without
    /// touching the compile-time tables (the source position continues
    /// inside those scopes).
    pub(crate) fn emit_loop_exit_cleanup(&mut self) {
        let (target_depth, target_try_depth) = {
            let context = self.state().loops.last().expect("no active loop");
            (context.scope_depth, context.try_depth)
        };
        let current_try_depth = self.state().try_depth;
        for _ in target_try_depth..current_try_depth {
            self.emit_op(OpCode::PopCatch);
        }
        let ops: Vec<OpCode> = {
            let state = self.state();
            state
                .locals
                .iter()
                .rev()
                .take_while(|local| local.depth > target_depth)
                .map(|local| {
                    if local.is_captured {
                        OpCode::CloseUpvalue
                    } else {
                        OpCode::Pop
                    }
                })
                .collect()
        };
        for op in ops {
            self.emit_op(op);
        }
    }
}

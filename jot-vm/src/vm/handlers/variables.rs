// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Variable opcode handlers: globals, locals, upvalues, and the
//! dedicated increment/decrement forms.

use std::cell::RefCell;
use std::rc::Rc;

use crate::opcode::OpCode;
use crate::value::{type_name, Upvalue, Value};
use crate::vm::{Result, RuntimeError, Vm};

impl Vm {
    /// Execute a variable opcode.
    pub(crate) fn execute_variables(&mut self, op: OpCode) -> Result<()> {
        match op {
            OpCode::GetGlobal => {
                let name = self.read_string_constant()?;
                let value = self
                    .global(&name)
                    .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?;
                self.push(value);
            }
            OpCode::SetGlobal => {
                let name = self.read_string_constant()?;
                if self.global(&name).is_none() {
                    return Err(RuntimeError::UndefinedVariable(name.to_string()));
                }
                // Assignment is an expression; the value stays put.
                let value = self.peek(0)?;
                self.set_global(name, value);
            }
            OpCode::DefineGlobal => {
                let name = self.read_string_constant()?;
                let value = self.pop()?;
                self.set_global(name, value);
            }
            OpCode::GetLocal => {
                let slot = self.read_byte()? as usize;
                let base = self.current_base()?;
                let value = self.stack_get(base + slot)?;
                self.push(value);
            }
            OpCode::SetLocal => {
                let slot = self.read_byte()? as usize;
                let base = self.current_base()?;
                let value = self.peek(0)?;
                self.stack_set(base + slot, value)?;
            }
            OpCode::GetUpvalue => {
                let cell = self.upvalue_cell()?;
                let value = cell.borrow().get();
                self.push(value);
            }
            OpCode::SetUpvalue => {
                let cell = self.upvalue_cell()?;
                let value = self.peek(0)?;
                cell.borrow_mut().set(value);
            }
            OpCode::IncLocal | OpCode::DecLocal => {
                let slot = self.read_byte()? as usize;
                let base = self.current_base()?;
                let index = base + slot;
                match self.stack_get(index)? {
                    Value::Number(n) => {
                        let delta = if op == OpCode::IncLocal { 1.0 } else { -1.0 };
                        self.stack_set(index, Value::Number(n + delta))?;
                    }
                    other => return Err(update_type_error(&other)),
                }
            }
            OpCode::IncGlobal | OpCode::DecGlobal => {
                let name = self.read_string_constant()?;
                let delta = if op == OpCode::IncGlobal { 1.0 } else { -1.0 };
                match self.global_entry_mut(&name) {
                    Some(Value::Number(n)) => *n += delta,
                    Some(other) => return Err(update_type_error(&other.clone())),
                    None => return Err(RuntimeError::UndefinedVariable(name.to_string())),
                }
            }
            OpCode::IncUpvalue | OpCode::DecUpvalue => {
                let cell = self.upvalue_cell()?;
                let delta = if op == OpCode::IncUpvalue { 1.0 } else { -1.0 };
                let current = cell.borrow().get();
                match current {
                    Value::Number(n) => cell.borrow_mut().set(Value::Number(n + delta)),
                    other => return Err(update_type_error(&other)),
                }
            }
            other => {
                return Err(RuntimeError::Internal(format!(
                    "execute_variables: unexpected opcode {:?}",
                    other
                )));
            }
        }
        Ok(())
    }

    /// Read an upvalue-slot operand and fetch the current closure's
    /// cell for it.
    fn upvalue_cell(&mut self) -> Result<Rc<RefCell<Upvalue>>> {
        let slot = self.read_byte()? as usize;
        self.frame()?
            .closure
            .upvalues
            .get(slot)
            .cloned()
            .ok_or_else(|| RuntimeError::Internal(format!("upvalue slot {} out of bounds", slot)))
    }
}

fn update_type_error(got: &Value) -> RuntimeError {
    RuntimeError::TypeError {
        expected: "number",
        got: type_name(got),
        context: Some("'++'/'--'".to_string()),
    }
}

// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Exception opcode handlers: handler installation and `throw`.
//!
//! The unwind protocol itself lives on the VM; `Throw` only surfaces
//! the value as a runtime error for the dispatch loop to unwind.

use crate::opcode::OpCode;
use crate::vm::{HandlerRecord, Result, RuntimeError, Vm};

impl Vm {
    /// Execute an exception opcode.
    pub(crate) fn execute_exceptions(&mut self, op: OpCode) -> Result<()> {
        match op {
            OpCode::SetupTry => {
                let offset = self.read_u16()? as usize;
                let catch_ip = self.frame()?.ip + offset;
                let record = HandlerRecord {
                    catch_ip,
                    stack_depth: self.stack_len(),
                    frame_index: self.ctx.frames.len() - 1,
                };
                self.ctx.handlers.push(record);
            }
            OpCode::PopCatch => {
                self.ctx.handlers.pop().ok_or_else(|| {
                    RuntimeError::Internal("PopCatch without an installed handler".to_string())
                })?;
            }
            OpCode::Throw => {
                let value = self.pop()?;
                return Err(RuntimeError::Thrown(value));
            }
            other => {
                return Err(RuntimeError::Internal(format!(
                    "execute_exceptions: unexpected opcode {:?}",
                    other
                )));
            }
        }
        Ok(())
    }
}

// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Arithmetic and comparison opcode handlers.

use crate::opcode::OpCode;
use crate::value::{is_falsy, type_name, values_equal, Value};
use crate::vm::{Result, RuntimeError, Vm};

impl Vm {
    /// Execute an arithmetic or comparison opcode.
    pub(crate) fn execute_arithmetic(&mut self, op: OpCode) -> Result<()> {
        match op {
            OpCode::Add => self.execute_add(),
            OpCode::Sub => self.binary_number_op(|a, b| a - b, "-"),
            OpCode::Mul => self.binary_number_op(|a, b| a * b, "*"),
            OpCode::Div => self.execute_div(OpCode::Div),
            OpCode::Mod => self.execute_div(OpCode::Mod),
            OpCode::Pow => self.binary_number_op(f64::powf, "**"),
            OpCode::Eq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(values_equal(&a, &b)));
                Ok(())
            }
            OpCode::NotEq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(!values_equal(&a, &b)));
                Ok(())
            }
            OpCode::Gt => self.comparison_op(|a, b| a > b, ">"),
            OpCode::Lt => self.comparison_op(|a, b| a < b, "<"),
            OpCode::GtEq => self.comparison_op(|a, b| a >= b, ">="),
            OpCode::LtEq => self.comparison_op(|a, b| a <= b, "<="),
            OpCode::Neg => {
                let value = self.pop()?;
                match value {
                    Value::Number(n) => {
                        self.push(Value::Number(-n));
                        Ok(())
                    }
                    other => Err(RuntimeError::TypeError {
                        expected: "number",
                        got: type_name(&other),
                        context: Some("unary '-'".to_string()),
                    }),
                }
            }
            OpCode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(is_falsy(&value)));
                Ok(())
            }
            other => Err(RuntimeError::Internal(format!(
                "execute_arithmetic: unexpected opcode {:?}",
                other
            ))),
        }
    }

    /// ADD coerces to string concatenation when either operand is a
    /// string; otherwise both operands must be numbers.
    fn execute_add(&mut self) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                self.push(Value::string(format!("{}{}", a, b)));
                Ok(())
            }
            (Value::Number(a), Value::Number(b)) => {
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Number(_), other) | (other, _) => Err(RuntimeError::TypeError {
                expected: "number or string",
                got: type_name(other),
                context: Some("'+'".to_string()),
            }),
        }
    }

    fn execute_div(&mut self, op: OpCode) -> Result<()> {
        let (a, b) = self.number_operands(if op == OpCode::Div { "/" } else { "%" })?;
        if b == 0.0 {
            return Err(RuntimeError::DivisionByZero);
        }
        let result = if op == OpCode::Div { a / b } else { a % b };
        self.push(Value::Number(result));
        Ok(())
    }

    fn binary_number_op(&mut self, f: fn(f64, f64) -> f64, name: &'static str) -> Result<()> {
        let (a, b) = self.number_operands(name)?;
        self.push(Value::Number(f(a, b)));
        Ok(())
    }

    fn comparison_op(&mut self, f: fn(f64, f64) -> bool, name: &'static str) -> Result<()> {
        let (a, b) = self.number_operands(name)?;
        self.push(Value::Bool(f(a, b)));
        Ok(())
    }

    fn number_operands(&mut self, name: &'static str) -> Result<(f64, f64)> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
            (Value::Number(_), other) | (other, _) => Err(RuntimeError::TypeError {
                expected: "number",
                got: type_name(other),
                context: Some(format!("'{}'", name)),
            }),
        }
    }
}

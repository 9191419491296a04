// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Runtime error type for the VM.

use crate::value::Value;

/// Runtime error during VM execution.
///
/// Every variant renders as a human-readable message; `Thrown` carries
/// a user value raised by `throw` (or a generator's `throw` method).
#[derive(Debug, Clone)]
pub enum RuntimeError {
    TypeError {
        expected: &'static str,
        got: &'static str,
        context: Option<String>,
    },
    DivisionByZero,
    UndefinedVariable(String),
    NotCallable(&'static str),
    NotConstructor(&'static str),
    NoSuchMethod {
        method: String,
        got: &'static str,
    },
    MethodOnNull(String),
    PropertyOnNonObject {
        property: String,
        got: &'static str,
    },
    NoNumericProperty(String),
    ArityMismatch {
        expected: u8,
        got: u8,
    },
    InvalidPrototype(&'static str),
    CyclicPrototype,
    StackOverflow,
    StackUnderflow,
    UnknownOpcode(u8),
    GeneratorRunning,
    /// `await`/`yield` reached a point where suspension cannot cross,
    /// such as a synchronous host re-entry.
    IllegalSuspension,
    /// A value raised by `throw`.
    Thrown(Value),
    Internal(String),
}

impl RuntimeError {
    /// The value a `catch` block (or a rejecting promise) receives.
    pub fn into_thrown(self) -> Value {
        match self {
            RuntimeError::Thrown(value) => value,
            other => Value::string(other.to_string()),
        }
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::TypeError {
                expected,
                got,
                context,
            } => match context {
                Some(context) => {
                    write!(f, "{}: expected {}, got {}", context, expected, got)
                }
                None => write!(f, "Type error: expected {}, got {}", expected, got),
            },
            RuntimeError::DivisionByZero => write!(f, "Division by zero"),
            RuntimeError::UndefinedVariable(name) => {
                write!(f, "Undefined variable: {}", name)
            }
            RuntimeError::NotCallable(got) => {
                write!(f, "Value is not callable: {}", got)
            }
            RuntimeError::NotConstructor(got) => {
                write!(f, "Value is not a constructor: {}", got)
            }
            RuntimeError::NoSuchMethod { method, got } => {
                write!(f, "No method '{}' on {}", method, got)
            }
            RuntimeError::MethodOnNull(method) => {
                write!(f, "Cannot call method '{}' on null", method)
            }
            RuntimeError::PropertyOnNonObject { property, got } => {
                write!(f, "Cannot access property '{}' on {}", property, got)
            }
            RuntimeError::NoNumericProperty(property) => {
                write!(f, "No numeric property '{}' to update", property)
            }
            RuntimeError::ArityMismatch { expected, got } => {
                write!(
                    f,
                    "Wrong number of arguments: expected {}, got {}",
                    expected, got
                )
            }
            RuntimeError::InvalidPrototype(got) => {
                write!(f, "Prototype must be an object or null, got {}", got)
            }
            RuntimeError::CyclicPrototype => write!(f, "Cyclic prototype chain"),
            RuntimeError::StackOverflow => write!(f, "Stack overflow"),
            RuntimeError::StackUnderflow => write!(f, "Stack underflow"),
            RuntimeError::UnknownOpcode(byte) => write!(f, "Unknown opcode: {:#04x}", byte),
            RuntimeError::GeneratorRunning => write!(f, "Generator is already running"),
            RuntimeError::IllegalSuspension => {
                write!(f, "Cannot suspend during a synchronous host call")
            }
            RuntimeError::Thrown(value) => write!(f, "Uncaught exception: {}", value),
            RuntimeError::Internal(message) => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Result type for VM operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

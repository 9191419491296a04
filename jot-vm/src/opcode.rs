// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode instruction definitions.
//!
//! Each instruction is one byte, followed by zero, one, or two immediate
//! operand bytes. Jump operands are two-byte big-endian unsigned offsets
//! relative to the position immediately after the operand. `Closure` is
//! the one variable-length instruction: its constant-index operand is
//! followed by two bytes per declared upvalue (`is_local`, `index`).

macro_rules! opcodes {
    ($($name:ident = $byte:literal),* $(,)?) => {
        /// Bytecode instructions for the Jot VM.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum OpCode {
            $($name = $byte),*
        }

        impl OpCode {
            /// Decode a single opcode byte.
            pub fn from_byte(byte: u8) -> Option<OpCode> {
                match byte {
                    $($byte => Some(OpCode::$name),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    // =========================================================================
    // Literals & stack
    // =========================================================================
    PushConst = 0,
    PushNull = 1,
    PushTrue = 2,
    PushFalse = 3,
    Pop = 4,
    Duplicate = 5,

    // =========================================================================
    // Arithmetic & comparison
    // =========================================================================
    Add = 6,
    Sub = 7,
    Mul = 8,
    Div = 9,
    Mod = 10,
    Pow = 11,
    Eq = 12,
    NotEq = 13,
    Gt = 14,
    Lt = 15,
    GtEq = 16,
    LtEq = 17,
    Neg = 18,
    Not = 19,

    // =========================================================================
    // Variables
    // =========================================================================
    GetGlobal = 20,
    SetGlobal = 21,
    DefineGlobal = 22,
    GetLocal = 23,
    SetLocal = 24,
    GetUpvalue = 25,
    SetUpvalue = 26,
    IncLocal = 27,
    DecLocal = 28,
    IncGlobal = 29,
    DecGlobal = 30,
    IncUpvalue = 31,
    DecUpvalue = 32,

    // =========================================================================
    // Control flow
    // =========================================================================
    Jump = 33,
    JumpIfFalse = 34,
    Loop = 35,

    // =========================================================================
    // Exceptions
    // =========================================================================
    SetupTry = 36,
    PopCatch = 37,
    Throw = 38,

    // =========================================================================
    // Calls & closures
    // =========================================================================
    Call = 39,
    CallMethod = 40,
    Return = 41,
    Closure = 42,
    CloseUpvalue = 43,

    // =========================================================================
    // Coroutines
    // =========================================================================
    Yield = 44,
    Await = 45,

    // =========================================================================
    // Objects & interop
    // =========================================================================
    GetNative = 46,
    SetPrototype = 47,
    NewArray = 48,
    NewObject = 49,
    GetIndex = 50,
    SetIndex = 51,
    GetProp = 52,
    SetProp = 53,
    ObjectCreate = 54,
    GetPrototype = 55,
    New = 56,
    IncProp = 57,
    DecProp = 58,
}

impl OpCode {
    /// Number of immediate operand bytes following the opcode.
    ///
    /// For `Closure` this is the fixed part only; the declared upvalue
    /// descriptors (two bytes each) follow the constant index.
    pub fn operand_width(self) -> usize {
        match self {
            OpCode::PushConst
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::DefineGlobal
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::IncLocal
            | OpCode::DecLocal
            | OpCode::IncGlobal
            | OpCode::DecGlobal
            | OpCode::IncUpvalue
            | OpCode::DecUpvalue
            | OpCode::Call
            | OpCode::Closure
            | OpCode::GetNative
            | OpCode::NewArray
            | OpCode::NewObject
            | OpCode::GetProp
            | OpCode::SetProp
            | OpCode::New => 1,

            OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::Loop
            | OpCode::SetupTry
            | OpCode::CallMethod
            | OpCode::IncProp
            | OpCode::DecProp => 2,

            _ => 0,
        }
    }

    /// The fixed stack effect of this instruction (positive = net push).
    ///
    /// Returns `None` for instructions whose effect depends on operands
    /// (`Call`, `NewArray`, ...) or that transfer control between stacks
    /// (`Return`, `Yield`, `Await`).
    pub fn stack_effect(self) -> Option<i8> {
        Some(match self {
            OpCode::PushConst
            | OpCode::PushNull
            | OpCode::PushTrue
            | OpCode::PushFalse
            | OpCode::Duplicate
            | OpCode::GetGlobal
            | OpCode::GetLocal
            | OpCode::GetUpvalue
            | OpCode::GetNative
            | OpCode::Closure => 1,

            OpCode::Pop
            | OpCode::DefineGlobal
            | OpCode::Throw
            | OpCode::CloseUpvalue
            | OpCode::GetIndex
            | OpCode::SetProp
            | OpCode::SetPrototype => -1,

            // Binary operators pop two and push one.
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Eq
            | OpCode::NotEq
            | OpCode::Gt
            | OpCode::Lt
            | OpCode::GtEq
            | OpCode::LtEq => -1,

            OpCode::SetIndex => -2,

            // In-place or peek-only instructions.
            OpCode::Neg
            | OpCode::Not
            | OpCode::SetGlobal
            | OpCode::SetLocal
            | OpCode::SetUpvalue
            | OpCode::IncLocal
            | OpCode::DecLocal
            | OpCode::IncGlobal
            | OpCode::DecGlobal
            | OpCode::IncUpvalue
            | OpCode::DecUpvalue
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::Loop
            | OpCode::SetupTry
            | OpCode::PopCatch
            | OpCode::GetProp
            | OpCode::ObjectCreate
            | OpCode::GetPrototype => 0,

            OpCode::Call
            | OpCode::CallMethod
            | OpCode::Return
            | OpCode::Yield
            | OpCode::Await
            | OpCode::NewArray
            | OpCode::NewObject
            | OpCode::New
            | OpCode::IncProp
            | OpCode::DecProp => return None,
        })
    }
}

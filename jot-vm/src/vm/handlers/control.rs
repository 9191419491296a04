// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Control-flow opcode handlers: jumps, calls, returns, closures, and
//! `new`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::opcode::OpCode;
use crate::runtime::generator::GeneratorState;
use crate::runtime::native::NativeKind;
use crate::runtime::promise::Promise;
use crate::value::{is_falsy, type_name, Closure, Object, Value};
use crate::vm::{iter_result, ContextKind, Flow, Result, RuntimeError, Vm};

impl Vm {
    /// Execute a control-flow opcode.
    pub(crate) fn execute_control(&mut self, op: OpCode) -> Result<Flow> {
        match op {
            OpCode::Jump => {
                let offset = self.read_u16()? as usize;
                self.frame_mut()?.ip += offset;
            }
            OpCode::JumpIfFalse => {
                let offset = self.read_u16()? as usize;
                let condition = self.peek(0)?;
                if is_falsy(&condition) {
                    self.frame_mut()?.ip += offset;
                }
            }
            OpCode::Loop => {
                let offset = self.read_u16()? as usize;
                let frame = self.frame_mut()?;
                frame.ip = frame.ip.checked_sub(offset).ok_or_else(|| {
                    RuntimeError::Internal("loop target before chunk start".to_string())
                })?;
            }
            OpCode::Call => {
                let argc = self.read_byte()? as usize;
                self.call_value(argc)?;
            }
            OpCode::CallMethod => {
                let name = self.read_string_constant()?;
                let argc = self.read_byte()? as usize;
                self.call_method(name, argc)?;
            }
            OpCode::Return => return self.execute_return(),
            OpCode::Closure => self.execute_closure()?,
            OpCode::CloseUpvalue => {
                let len = self.stack_len();
                if len == 0 {
                    return Err(RuntimeError::StackUnderflow);
                }
                self.close_upvalues(len - 1);
                self.pop()?;
            }
            OpCode::New => {
                let argc = self.read_byte()? as usize;
                self.execute_new(argc)?;
            }
            other => {
                return Err(RuntimeError::Internal(format!(
                    "execute_control: unexpected opcode {:?}",
                    other
                )));
            }
        }
        Ok(Flow::Continue)
    }

    /// Return from the current frame. The root frame of a coroutine
    /// context settles its owner: async frames resolve their promise,
    /// generator frames finish with `{value, done: true}`.
    fn execute_return(&mut self) -> Result<Flow> {
        let result = self.pop()?;
        let frame = self
            .ctx
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::Internal("return without a frame".to_string()))?;
        self.close_upvalues(frame.base);
        self.stack_truncate(frame.base);

        if !self.ctx.frames.is_empty() {
            self.push(result);
            return Ok(Flow::Continue);
        }

        match self.context_kind() {
            ContextKind::Main => {
                // The script's completion value stays for the host.
                self.push(result);
                Ok(Flow::Continue)
            }
            ContextKind::Async(_) => {
                let promise = frame.promise.clone().ok_or_else(|| {
                    RuntimeError::Internal("async frame without a promise".to_string())
                })?;
                self.exit_context()?;
                self.resolve_promise(&promise, result);
                Ok(Flow::Suspend)
            }
            ContextKind::Generator(generator) => {
                self.exit_context()?;
                {
                    let mut g = generator.borrow_mut();
                    g.state = GeneratorState::Done;
                    g.ctx = None;
                }
                self.push(iter_result(result, true));
                Ok(Flow::Continue)
            }
        }
    }

    /// Build a closure: capture locals by absolute stack slot (sharing
    /// any existing open cell) or inherit cells from the enclosing
    /// closure, per the descriptor bytes following the instruction.
    fn execute_closure(&mut self) -> Result<()> {
        let function = match self.read_constant()? {
            Value::Function(function) => function,
            other => {
                return Err(RuntimeError::Internal(format!(
                    "closure constant is not a function: {}",
                    type_name(&other)
                )));
            }
        };
        let parent = self.frame()?.closure.clone();
        let base = self.current_base()?;
        let count = function.upvalue_count();
        let mut upvalues = Vec::with_capacity(count);
        for _ in 0..count {
            let is_local = self.read_byte()? != 0;
            let index = self.read_byte()? as usize;
            if is_local {
                upvalues.push(self.capture_upvalue(base + index));
            } else {
                let cell = parent.upvalues.get(index).cloned().ok_or_else(|| {
                    RuntimeError::Internal(format!("inherited upvalue {} out of bounds", index))
                })?;
                upvalues.push(cell);
            }
        }
        self.push(Value::Closure(Rc::new(Closure::new(function, upvalues))));
        Ok(())
    }

    /// `new Callee(args)`: allocate an instance wired to the class
    /// prototype and run the constructor with the instance in slot 0.
    /// The native `Promise` constructor runs its executor immediately.
    fn execute_new(&mut self, argc: usize) -> Result<()> {
        if self.stack_len() < argc + 1 {
            return Err(RuntimeError::StackUnderflow);
        }
        let callee_index = self.stack_len() - argc - 1;
        let callee = self.stack_get(callee_index)?;
        match callee {
            Value::Closure(closure) => {
                if closure.function.is_async || closure.function.is_generator {
                    return Err(RuntimeError::NotConstructor("function"));
                }
                let prototype = self.closure_prototype(&closure);
                let instance = Value::object(Object::with_prototype(Some(prototype)));
                self.stack_set(callee_index, instance)?;
                self.call_closure(closure, argc)
            }
            Value::Native(native) if native.kind == NativeKind::PromiseConstructor => {
                if argc != 1 {
                    return Err(RuntimeError::ArityMismatch {
                        expected: 1,
                        got: argc as u8,
                    });
                }
                let executor = self.pop()?;
                self.pop()?;
                let promise = Promise::pending();
                let resolve = self.promise_settler(promise.clone(), false);
                let reject = self.promise_settler(promise.clone(), true);
                // Executor errors reject instead of unwinding.
                if let Err(error) = self.call_function(executor, &[resolve, reject]) {
                    self.reject_promise(&promise, error.into_thrown());
                }
                self.push(Value::Promise(promise));
                Ok(())
            }
            other => Err(RuntimeError::NotConstructor(type_name(&other))),
        }
    }

    /// A closure's class prototype object, allocated on first use.
    pub(crate) fn closure_prototype(&self, closure: &Closure) -> Rc<RefCell<Object>> {
        let mut slot = closure.prototype.borrow_mut();
        match &*slot {
            Some(prototype) => prototype.clone(),
            None => {
                let prototype = Rc::new(RefCell::new(Object::new()));
                *slot = Some(prototype.clone());
                prototype
            }
        }
    }
}

// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Suspension opcode handlers (`Await`, `Yield`) and the method suites
//! of promises and generators.

use std::cell::RefCell;
use std::rc::Rc;

use crate::opcode::OpCode;
use crate::runtime::generator::{Generator, GeneratorState};
use crate::runtime::promise::{Promise, Suspension};
use crate::value::Value;
use crate::vm::{iter_result, ContextKind, Flow, Result, RuntimeError, Vm};

impl Vm {
    /// Execute a coroutine opcode.
    pub(crate) fn execute_tasks(&mut self, op: OpCode) -> Result<Flow> {
        match op {
            OpCode::Await => self.execute_await(),
            OpCode::Yield => self.execute_yield(),
            other => Err(RuntimeError::Internal(format!(
                "execute_tasks: unexpected opcode {:?}",
                other
            ))),
        }
    }

    /// `await`: a non-promise passes through synchronously. A promise
    /// parks this async context on it; the awaited value stays on the
    /// suspended stack and is replaced by the settlement on resume.
    fn execute_await(&mut self) -> Result<Flow> {
        let awaited = self.peek(0)?;
        let promise = match awaited {
            Value::Promise(promise) => promise,
            _ => return Ok(Flow::Continue),
        };
        let own_promise = match self.context_kind() {
            ContextKind::Async(promise) => promise,
            _ => return Err(RuntimeError::IllegalSuspension),
        };
        if self.suspension_blocked() {
            return Err(RuntimeError::IllegalSuspension);
        }
        let ctx = self.exit_context()?;
        self.register_await(
            &promise,
            Suspension {
                ctx,
                promise: own_promise,
            },
        );
        Ok(Flow::Suspend)
    }

    /// `yield`: swap back to the resumer's context, park this one on
    /// the generator, and hand the resumer `{value, done: false}`.
    fn execute_yield(&mut self) -> Result<Flow> {
        let value = self.pop()?;
        let generator = match self.context_kind() {
            ContextKind::Generator(generator) => generator,
            _ => return Err(RuntimeError::IllegalSuspension),
        };
        if self.suspension_blocked() {
            return Err(RuntimeError::IllegalSuspension);
        }
        let ctx = self.exit_context()?;
        {
            let mut g = generator.borrow_mut();
            g.state = GeneratorState::Suspended;
            g.ctx = Some(ctx);
        }
        self.push(iter_result(value, false));
        Ok(Flow::Continue)
    }

    /// Generator method suite: `next`, `return`, `throw`.
    pub(crate) fn generator_method(
        &mut self,
        generator: Rc<RefCell<Generator>>,
        name: &str,
        argc: usize,
    ) -> Result<()> {
        let mut args = self.pop_args(argc)?;
        self.pop()?;
        let argument = if args.is_empty() {
            Value::Null
        } else {
            args.remove(0)
        };
        match name {
            "next" => {
                let state = generator.borrow().state;
                match state {
                    GeneratorState::Done => {
                        self.push(iter_result(Value::Null, true));
                        Ok(())
                    }
                    GeneratorState::Running => Err(RuntimeError::GeneratorRunning),
                    GeneratorState::Suspended => {
                        let (ctx, first) = {
                            let mut g = generator.borrow_mut();
                            let ctx = g.ctx.take().ok_or_else(|| {
                                RuntimeError::Internal("generator context missing".to_string())
                            })?;
                            let first = !g.started;
                            g.started = true;
                            g.state = GeneratorState::Running;
                            (ctx, first)
                        };
                        if !first {
                            // The resume value becomes the result of
                            // the suspended yield expression.
                            ctx.stack.borrow_mut().push(argument);
                        }
                        self.enter_context(ctx);
                        Ok(())
                    }
                }
            }
            "return" => {
                {
                    let mut g = generator.borrow_mut();
                    if g.state == GeneratorState::Running {
                        return Err(RuntimeError::GeneratorRunning);
                    }
                    if let Some(mut ctx) = g.ctx.take() {
                        ctx.close_all_upvalues();
                    }
                    g.state = GeneratorState::Done;
                }
                self.push(iter_result(argument, true));
                Ok(())
            }
            "throw" => {
                let (state, started) = {
                    let g = generator.borrow();
                    (g.state, g.started)
                };
                match state {
                    GeneratorState::Running => Err(RuntimeError::GeneratorRunning),
                    GeneratorState::Suspended if started => {
                        let ctx = {
                            let mut g = generator.borrow_mut();
                            g.state = GeneratorState::Running;
                            g.ctx.take().ok_or_else(|| {
                                RuntimeError::Internal("generator context missing".to_string())
                            })?
                        };
                        // Unwinds inside the generator; an uncaught
                        // throw finishes it and re-throws here.
                        self.enter_context(ctx);
                        Err(RuntimeError::Thrown(argument))
                    }
                    _ => {
                        {
                            let mut g = generator.borrow_mut();
                            if let Some(mut ctx) = g.ctx.take() {
                                ctx.close_all_upvalues();
                            }
                            g.state = GeneratorState::Done;
                        }
                        Err(RuntimeError::Thrown(argument))
                    }
                }
            }
            _ => Err(RuntimeError::NoSuchMethod {
                method: name.to_string(),
                got: "generator",
            }),
        }
    }

    /// Promise method suite: `then` and `catch`. Non-callable
    /// arguments are treated as absent, passing the settlement through.
    pub(crate) fn promise_method(
        &mut self,
        promise: Rc<RefCell<Promise>>,
        name: &str,
        argc: usize,
    ) -> Result<()> {
        let args = self.pop_args(argc)?;
        self.pop()?;
        match name {
            "then" => {
                let on_fulfilled = args.first().cloned().filter(is_callable);
                let on_rejected = args.get(1).cloned().filter(is_callable);
                let result = self.promise_then(&promise, on_fulfilled, on_rejected);
                self.push(Value::Promise(result));
                Ok(())
            }
            "catch" => {
                let on_rejected = args.first().cloned().filter(is_callable);
                let result = self.promise_then(&promise, None, on_rejected);
                self.push(Value::Promise(result));
                Ok(())
            }
            _ => Err(RuntimeError::NoSuchMethod {
                method: name.to_string(),
                got: "promise",
            }),
        }
    }
}

fn is_callable(value: &Value) -> bool {
    match value {
        Value::Closure(_) => true,
        Value::Native(native) => native.call.is_some(),
        _ => false,
    }
}

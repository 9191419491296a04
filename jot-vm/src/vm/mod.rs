// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Stack-based virtual machine for executing Jot bytecode.
//!
//! The VM owns one executing context (value stack, call frames, open
//! upvalues, exception handlers) plus the globals map, the microtask
//! queue, and the pending-host-operation ledger. Generators and async
//! function bodies run on private contexts that the VM swaps in and
//! out; the event loop alternates between draining microtasks and
//! waiting on host operations until nothing remains.

pub mod error;
pub mod frame;
pub mod handlers;
pub mod stack;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::rc::Rc;
use std::time::{Duration, Instant};

use jot_ast::Program;

use crate::compiler::{self, CompileError};
use crate::opcode::OpCode;
use crate::runtime::builtins;
use crate::runtime::generator::Generator;
use crate::runtime::native::{FetchHandler, HostOp, NativeObject, TimerEntry, TimerQueue};
use crate::runtime::promise::{Microtask, Promise, PromiseState, Reaction, Suspension};
use crate::value::{type_name, Closure, Object, Upvalue, Value};

pub use error::{Result, RuntimeError};
pub use frame::CallFrame;
pub use stack::ValueStack;

/// Call-frame depth bound. Exceeding it is a runtime error.
pub const MAX_FRAMES: usize = 256;

/// Status returned by a dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The current context ran out of frames.
    Done,
    /// Execution suspended (await) or handed off to the event loop.
    Yield,
}

/// Per-instruction flow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Suspend,
}

/// Outcome of the unwind protocol when it does not escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnwindFlow {
    Caught,
    Rejected,
}

/// An installed `try` handler: where to land, and how deep the stacks
/// were when it was installed.
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    pub catch_ip: usize,
    pub stack_depth: usize,
    pub frame_index: usize,
}

/// What kind of execution context is running.
#[derive(Debug, Clone)]
pub enum ContextKind {
    Main,
    Async(Rc<RefCell<Promise>>),
    Generator(Rc<RefCell<Generator>>),
}

/// One unit of suspendable execution: a value stack, call frames, open
/// upvalues, and exception handlers. The main program, every generator,
/// and every running async call each own one; the VM swaps between
/// them.
#[derive(Debug)]
pub struct ExecCtx {
    pub stack: Rc<RefCell<ValueStack>>,
    pub frames: Vec<CallFrame>,
    pub open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
    pub handlers: Vec<HandlerRecord>,
    pub kind: ContextKind,
}

impl ExecCtx {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            stack: Rc::new(RefCell::new(ValueStack::new())),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            handlers: Vec::new(),
            kind,
        }
    }

    /// Close every open upvalue into its cell. Required before a
    /// context is abandoned so captured variables outlive its stack.
    pub fn close_all_upvalues(&mut self) {
        for cell in self.open_upvalues.drain(..) {
            let value = {
                let borrowed = cell.borrow();
                match &*borrowed {
                    Upvalue::Open { stack, index } => {
                        stack.borrow().get(*index).unwrap_or(Value::Null)
                    }
                    Upvalue::Closed(value) => value.clone(),
                }
            };
            *cell.borrow_mut() = Upvalue::Closed(value);
        }
    }
}

/// Active synchronous re-entry bound: suspensions and unwinds may not
/// cross below it.
#[derive(Debug, Clone, Copy)]
struct ReentryFloor {
    outer_len: usize,
    frame_floor: usize,
    stack_floor: usize,
}

/// Outcome of [`Vm::interpret`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretOutcome {
    Ok,
    RuntimeError,
}

/// The result of interpreting a program: the outcome plus the script's
/// completion value.
#[derive(Debug)]
pub struct Interpretation {
    pub result: InterpretOutcome,
    pub value: Value,
}

/// The Jot virtual machine.
pub struct Vm {
    ctx: ExecCtx,
    /// Suspended contexts beneath the current one, innermost last.
    outer: Vec<ExecCtx>,
    globals: HashMap<Rc<str>, Value>,
    microtasks: VecDeque<Microtask>,
    pub(crate) pending_host_ops: usize,
    timers: TimerQueue,
    host_ops: VecDeque<HostOp>,
    fetch_handler: Option<FetchHandler>,
    reentry: Vec<ReentryFloor>,
    has_error: bool,
    started_at: Instant,
}

impl Vm {
    /// Create a VM with the default native bindings installed.
    pub fn new() -> Self {
        let mut vm = Self {
            ctx: ExecCtx::new(ContextKind::Main),
            outer: Vec::new(),
            globals: HashMap::new(),
            microtasks: VecDeque::new(),
            pending_host_ops: 0,
            timers: TimerQueue::new(),
            host_ops: VecDeque::new(),
            fetch_handler: None,
            reentry: Vec::new(),
            has_error: false,
            started_at: Instant::now(),
        };
        builtins::install_default_globals(&mut vm);
        vm
    }

    /// Register a native object (or any value) under a global name.
    pub fn bind_native(&mut self, name: &str, value: Value) {
        self.globals.insert(Rc::from(name), value);
    }

    /// Install the handler behind the `fetch` built-in.
    pub fn set_fetch_handler(&mut self, handler: FetchHandler) {
        self.fetch_handler = Some(handler);
    }

    pub(crate) fn elapsed_millis(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() * 1000.0
    }

    // ------------------------------------------------------------------
    // Interpret entrypoint and event loop
    // ------------------------------------------------------------------

    /// Compile and run a program to completion: execute the script,
    /// then drain microtasks and host operations until nothing remains
    /// or a fatal error is hit.
    pub fn interpret(
        &mut self,
        program: &Program,
    ) -> std::result::Result<Interpretation, CompileError> {
        let function = compiler::compile(program)?;
        self.reset_run_state();

        let closure = Rc::new(Closure::new(Rc::new(function), Vec::new()));
        self.push(Value::Closure(closure.clone()));
        if let Err(error) = self.push_frame(closure, 0, None) {
            self.fail(error);
        }

        let mut value = Value::Null;
        if !self.has_error {
            match self.run() {
                Ok(_) => {
                    if self.stack_len() > 0 {
                        value = self.pop().unwrap_or(Value::Null);
                    }
                }
                Err(error) => self.fail(error),
            }
        }

        self.run_event_loop();

        if self.has_error {
            Ok(Interpretation {
                result: InterpretOutcome::RuntimeError,
                value: Value::Null,
            })
        } else {
            Ok(Interpretation {
                result: InterpretOutcome::Ok,
                value,
            })
        }
    }

    fn reset_run_state(&mut self) {
        self.ctx = ExecCtx::new(ContextKind::Main);
        self.outer.clear();
        self.microtasks.clear();
        self.host_ops.clear();
        self.timers = TimerQueue::new();
        self.pending_host_ops = 0;
        self.reentry.clear();
        self.has_error = false;
    }

    fn run_event_loop(&mut self) {
        loop {
            if self.has_error {
                break;
            }
            self.drain_microtasks();
            if self.has_error || !self.microtasks.is_empty() {
                continue;
            }
            if self.pending_host_ops > 0 {
                self.wait_for_host();
                continue;
            }
            break;
        }
    }

    /// Service one host operation: ready I/O first, then the nearest
    /// timer, sleeping until its deadline if necessary.
    fn wait_for_host(&mut self) {
        if let Some(op) = self.host_ops.pop_front() {
            match op {
                HostOp::Fetch { url, promise } => {
                    let outcome = match &self.fetch_handler {
                        Some(handler) => handler.clone()(&url),
                        None => Err(Value::string(format!(
                            "fetch: no host handler installed for '{}'",
                            url
                        ))),
                    };
                    match outcome {
                        Ok(value) => self.resolve_promise(&promise, value),
                        Err(reason) => self.reject_promise(&promise, reason),
                    }
                    self.pending_host_ops = self.pending_host_ops.saturating_sub(1);
                }
            }
            return;
        }

        if let Some(entry) = self.timers.pop_due(Instant::now()) {
            self.fire_timer(entry);
            return;
        }
        match self.timers.next_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                if let Some(entry) = self.timers.pop_due(Instant::now()) {
                    self.fire_timer(entry);
                }
            }
            // Pending operations that nothing can ever complete.
            None => self.pending_host_ops = 0,
        }
    }

    fn fire_timer(&mut self, entry: TimerEntry) {
        if entry.cancelled.get() {
            return;
        }
        match entry.interval {
            Some(interval) => {
                self.microtasks.push_back(Microtask::RunCallback {
                    callback: entry.callback.clone(),
                    arg: Value::Null,
                    result: None,
                });
                self.timers.arm_with_flag(
                    entry.deadline + interval,
                    entry.callback,
                    Some(interval),
                    entry.cancelled,
                );
            }
            None => {
                entry.cancelled.set(true);
                self.pending_host_ops = self.pending_host_ops.saturating_sub(1);
                self.microtasks.push_back(Microtask::RunCallback {
                    callback: entry.callback,
                    arg: Value::Null,
                    result: None,
                });
            }
        }
    }

    /// Arm a timer and return its opaque handle (a native object with
    /// a `clear()` method).
    pub(crate) fn arm_timer(
        &mut self,
        callback: Value,
        delay: Duration,
        interval: Option<Duration>,
    ) -> Value {
        self.pending_host_ops += 1;
        let cancelled = self.timers.arm(delay, callback, interval);
        let handle = NativeObject::object("Timeout").with_property(
            "clear",
            NativeObject::function_value("clear", move |vm, _args| {
                if !cancelled.get() {
                    cancelled.set(true);
                    vm.pending_host_ops = vm.pending_host_ops.saturating_sub(1);
                }
                Ok(Value::Null)
            }),
        );
        Value::Native(Rc::new(handle))
    }

    /// Queue a fetch host operation and return its pending promise.
    pub(crate) fn queue_fetch(&mut self, url: Rc<str>) -> Value {
        let promise = Promise::pending();
        self.pending_host_ops += 1;
        self.host_ops.push_back(HostOp::Fetch {
            url,
            promise: promise.clone(),
        });
        Value::Promise(promise)
    }

    fn fail(&mut self, error: RuntimeError) {
        let name = self
            .ctx
            .frames
            .last()
            .map(|frame| frame.closure.function.name.to_string())
            .unwrap_or_else(|| "<script>".to_string());
        eprintln!("Runtime error in {}: {}", name, error);
        self.has_error = true;
        self.ctx.frames.clear();
        self.ctx.handlers.clear();
        self.stack_truncate(0);
    }

    // ------------------------------------------------------------------
    // Microtasks
    // ------------------------------------------------------------------

    pub(crate) fn enqueue(&mut self, task: Microtask) {
        self.microtasks.push_back(task);
    }

    fn drain_microtasks(&mut self) {
        while let Some(task) = self.microtasks.pop_front() {
            if let Err(error) = self.execute_microtask(task) {
                self.fail(error);
                return;
            }
            if self.has_error {
                return;
            }
        }
    }

    /// Run one microtask to completion (or to its next suspension).
    fn execute_microtask(&mut self, task: Microtask) -> Result<()> {
        match task {
            Microtask::AsyncCall {
                closure,
                promise,
                slot0,
                args,
            } => {
                let mut ctx = ExecCtx::new(ContextKind::Async(promise.clone()));
                {
                    let mut stack = ctx.stack.borrow_mut();
                    stack.push(slot0);
                    for arg in args {
                        stack.push(arg);
                    }
                }
                let mut frame = CallFrame::new(closure, 0);
                frame.promise = Some(promise);
                ctx.frames.push(frame);
                self.enter_context(ctx);
                self.run().map(|_| ())
            }
            Microtask::RunCallback {
                callback,
                arg,
                result,
            } => match self.call_function(callback, &[arg]) {
                Ok(value) => {
                    if let Some(result) = result {
                        self.resolve_promise(&result, value);
                    }
                    Ok(())
                }
                Err(error) => match result {
                    Some(result) => {
                        self.reject_promise(&result, error.into_thrown());
                        Ok(())
                    }
                    None => Err(error),
                },
            },
            Microtask::Resume {
                suspension,
                value,
                rejected,
            } => {
                let Suspension { ctx, .. } = suspension;
                self.enter_context(ctx);
                // The awaited promise is still on the suspended stack.
                self.pop()?;
                if rejected {
                    match self.unwind(RuntimeError::Thrown(value))? {
                        UnwindFlow::Caught => self.run().map(|_| ()),
                        UnwindFlow::Rejected => Ok(()),
                    }
                } else {
                    self.push(value);
                    self.run().map(|_| ())
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Promise plumbing
    // ------------------------------------------------------------------

    /// Resolve a promise. Resolving with another promise adopts it.
    pub(crate) fn resolve_promise(&mut self, promise: &Rc<RefCell<Promise>>, value: Value) {
        if let Value::Promise(inner) = &value {
            if Rc::ptr_eq(inner, promise) {
                self.settle_promise(promise, Value::string("Chaining cycle detected"), true);
                return;
            }
            let state = inner.borrow().state.clone();
            match state {
                PromiseState::Pending => {
                    inner
                        .borrow_mut()
                        .reactions
                        .push(Reaction::Adopt(promise.clone()));
                }
                PromiseState::Fulfilled(value) => self.settle_promise(promise, value, false),
                PromiseState::Rejected(reason) => self.settle_promise(promise, reason, true),
            }
            return;
        }
        self.settle_promise(promise, value, false);
    }

    pub(crate) fn reject_promise(&mut self, promise: &Rc<RefCell<Promise>>, reason: Value) {
        self.settle_promise(promise, reason, true);
    }

    /// One-shot settlement: a settled promise ignores further
    /// resolve/reject. Queued reactions become microtasks.
    fn settle_promise(&mut self, promise: &Rc<RefCell<Promise>>, value: Value, rejected: bool) {
        let reactions = {
            let mut p = promise.borrow_mut();
            if !p.is_pending() {
                return;
            }
            p.state = if rejected {
                PromiseState::Rejected(value.clone())
            } else {
                PromiseState::Fulfilled(value.clone())
            };
            mem::take(&mut p.reactions)
        };
        for reaction in reactions {
            self.fire_reaction(reaction, value.clone(), rejected);
        }
    }

    fn fire_reaction(&mut self, reaction: Reaction, value: Value, rejected: bool) {
        match reaction {
            Reaction::Then {
                on_fulfilled,
                on_rejected,
                result,
            } => {
                let callback = if rejected { on_rejected } else { on_fulfilled };
                match callback {
                    Some(callback) => self.enqueue(Microtask::RunCallback {
                        callback,
                        arg: value,
                        result: Some(result),
                    }),
                    None => self.settle_promise(&result, value, rejected),
                }
            }
            Reaction::Await(suspension) => self.enqueue(Microtask::Resume {
                suspension,
                value,
                rejected,
            }),
            Reaction::Adopt(outer) => self.settle_promise(&outer, value, rejected),
        }
    }

    /// Register a `.then`-style reaction and return the chained
    /// promise.
    pub(crate) fn promise_then(
        &mut self,
        promise: &Rc<RefCell<Promise>>,
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
    ) -> Rc<RefCell<Promise>> {
        let result = Promise::pending();
        let reaction = Reaction::Then {
            on_fulfilled,
            on_rejected,
            result: result.clone(),
        };
        let state = promise.borrow().state.clone();
        match state {
            PromiseState::Pending => promise.borrow_mut().reactions.push(reaction),
            PromiseState::Fulfilled(value) => self.fire_reaction(reaction, value, false),
            PromiseState::Rejected(reason) => self.fire_reaction(reaction, reason, true),
        }
        result
    }

    /// Park a suspended async body on a promise.
    pub(crate) fn register_await(
        &mut self,
        promise: &Rc<RefCell<Promise>>,
        suspension: Suspension,
    ) {
        let state = promise.borrow().state.clone();
        match state {
            PromiseState::Pending => {
                promise
                    .borrow_mut()
                    .reactions
                    .push(Reaction::Await(suspension));
            }
            PromiseState::Fulfilled(value) => self.enqueue(Microtask::Resume {
                suspension,
                value,
                rejected: false,
            }),
            PromiseState::Rejected(reason) => self.enqueue(Microtask::Resume {
                suspension,
                value: reason,
                rejected: true,
            }),
        }
    }

    /// Build the resolve/reject host function handed to a Promise
    /// executor.
    pub(crate) fn promise_settler(&self, promise: Rc<RefCell<Promise>>, rejecting: bool) -> Value {
        let name = if rejecting { "reject" } else { "resolve" };
        NativeObject::function_value(name, move |vm, args| {
            let value = args.first().cloned().unwrap_or(Value::Null);
            if rejecting {
                vm.reject_promise(&promise, value);
            } else {
                vm.resolve_promise(&promise, value);
            }
            Ok(Value::Null)
        })
    }

    // ------------------------------------------------------------------
    // Stack and frame access
    // ------------------------------------------------------------------

    pub(crate) fn push(&mut self, value: Value) {
        self.ctx.stack.borrow_mut().push(value);
    }

    pub(crate) fn pop(&mut self) -> Result<Value> {
        self.ctx.stack.borrow_mut().pop()
    }

    pub(crate) fn peek(&self, distance: usize) -> Result<Value> {
        self.ctx.stack.borrow().peek(distance)
    }

    pub(crate) fn stack_len(&self) -> usize {
        self.ctx.stack.borrow().len()
    }

    pub(crate) fn stack_truncate(&mut self, len: usize) {
        self.ctx.stack.borrow_mut().truncate(len);
    }

    pub(crate) fn stack_get(&self, index: usize) -> Result<Value> {
        self.ctx.stack.borrow().get(index)
    }

    pub(crate) fn stack_set(&mut self, index: usize, value: Value) -> Result<()> {
        self.ctx.stack.borrow_mut().set(index, value)
    }

    pub(crate) fn pop_args(&mut self, argc: usize) -> Result<Vec<Value>> {
        self.ctx.stack.borrow_mut().pop_n(argc)
    }

    pub(crate) fn frame(&self) -> Result<&CallFrame> {
        self.ctx
            .frames
            .last()
            .ok_or_else(|| RuntimeError::Internal("no active call frame".to_string()))
    }

    pub(crate) fn frame_mut(&mut self) -> Result<&mut CallFrame> {
        self.ctx
            .frames
            .last_mut()
            .ok_or_else(|| RuntimeError::Internal("no active call frame".to_string()))
    }

    pub(crate) fn current_base(&self) -> Result<usize> {
        Ok(self.frame()?.base)
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8> {
        let frame = self
            .ctx
            .frames
            .last_mut()
            .ok_or_else(|| RuntimeError::Internal("no active call frame".to_string()))?;
        let byte = frame
            .closure
            .function
            .chunk
            .code
            .get(frame.ip)
            .copied()
            .ok_or_else(|| RuntimeError::Internal("instruction pointer past end".to_string()))?;
        frame.ip += 1;
        Ok(byte)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        let high = self.read_byte()?;
        let low = self.read_byte()?;
        Ok(u16::from_be_bytes([high, low]))
    }

    pub(crate) fn read_constant(&mut self) -> Result<Value> {
        let index = self.read_byte()? as usize;
        let frame = self.frame()?;
        frame
            .closure
            .function
            .chunk
            .constants
            .get(index)
            .cloned()
            .ok_or_else(|| RuntimeError::Internal("constant index out of bounds".to_string()))
    }

    pub(crate) fn read_string_constant(&mut self) -> Result<Rc<str>> {
        match self.read_constant()? {
            Value::Str(s) => Ok(s),
            other => Err(RuntimeError::Internal(format!(
                "name operand is not a string: {}",
                type_name(&other)
            ))),
        }
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub(crate) fn set_global(&mut self, name: Rc<str>, value: Value) {
        self.globals.insert(name, value);
    }

    pub(crate) fn global_entry_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.globals.get_mut(name)
    }

    // ------------------------------------------------------------------
    // Context switching and upvalues
    // ------------------------------------------------------------------

    pub(crate) fn enter_context(&mut self, ctx: ExecCtx) {
        let previous = mem::replace(&mut self.ctx, ctx);
        self.outer.push(previous);
    }

    pub(crate) fn exit_context(&mut self) -> Result<ExecCtx> {
        let previous = self
            .outer
            .pop()
            .ok_or_else(|| RuntimeError::Internal("context switch without caller".to_string()))?;
        Ok(mem::replace(&mut self.ctx, previous))
    }

    pub(crate) fn context_kind(&self) -> ContextKind {
        self.ctx.kind.clone()
    }

    /// True when suspending the current context would cross an active
    /// synchronous re-entry.
    pub(crate) fn suspension_blocked(&self) -> bool {
        matches!(self.reentry.last(), Some(floor) if floor.outer_len >= self.outer.len())
    }

    /// Find or create the open upvalue for an absolute stack slot. The
    /// list stays sorted by descending location so closing can stop
    /// early; each live slot has at most one open cell.
    pub(crate) fn capture_upvalue(&mut self, location: usize) -> Rc<RefCell<Upvalue>> {
        let mut insert_at = self.ctx.open_upvalues.len();
        for (i, cell) in self.ctx.open_upvalues.iter().enumerate() {
            let index = match &*cell.borrow() {
                Upvalue::Open { index, .. } => *index,
                Upvalue::Closed(_) => continue,
            };
            if index == location {
                return cell.clone();
            }
            if index < location {
                insert_at = i;
                break;
            }
        }
        let cell = Rc::new(RefCell::new(Upvalue::Open {
            stack: self.ctx.stack.clone(),
            index: location,
        }));
        self.ctx.open_upvalues.insert(insert_at, cell.clone());
        cell
    }

    /// Close every open upvalue at or above `from`, moving the stack
    /// values into their cells.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        loop {
            let index = match self.ctx.open_upvalues.first() {
                Some(cell) => match &*cell.borrow() {
                    Upvalue::Open { index, .. } => *index,
                    Upvalue::Closed(_) => usize::MAX,
                },
                None => break,
            };
            if index != usize::MAX && index < from {
                break;
            }
            let cell = self.ctx.open_upvalues.remove(0);
            let value = if index == usize::MAX {
                match &*cell.borrow() {
                    Upvalue::Closed(value) => value.clone(),
                    Upvalue::Open { .. } => Value::Null,
                }
            } else {
                self.ctx.stack.borrow().get(index).unwrap_or(Value::Null)
            };
            *cell.borrow_mut() = Upvalue::Closed(value);
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub(crate) fn push_frame(
        &mut self,
        closure: Rc<Closure>,
        base: usize,
        promise: Option<Rc<RefCell<Promise>>>,
    ) -> Result<()> {
        if self.ctx.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::StackOverflow);
        }
        let mut frame = CallFrame::new(closure, base);
        frame.promise = promise;
        self.ctx.frames.push(frame);
        Ok(())
    }

    /// Invoke the callee at `stack[len - argc - 1]` with the `argc`
    /// arguments above it.
    pub(crate) fn call_value(&mut self, argc: usize) -> Result<()> {
        if self.stack_len() < argc + 1 {
            return Err(RuntimeError::StackUnderflow);
        }
        let callee_index = self.stack_len() - argc - 1;
        let callee = self.stack_get(callee_index)?;
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::Native(native) => {
                let call = match &native.call {
                    Some(call) => call.clone(),
                    None => return Err(RuntimeError::NotCallable("native")),
                };
                let args = self.pop_args(argc)?;
                self.pop()?;
                let result = call(self, &args)?;
                self.push(result);
                Ok(())
            }
            other => Err(RuntimeError::NotCallable(type_name(&other))),
        }
    }

    /// Invoke a closure whose slot-0 value and arguments are already on
    /// the stack. Async closures return a promise and schedule the
    /// body; generator closures return a generator object without
    /// running anything.
    pub(crate) fn call_closure(&mut self, closure: Rc<Closure>, argc: usize) -> Result<()> {
        let function = closure.function.clone();
        if function.arity as usize != argc {
            return Err(RuntimeError::ArityMismatch {
                expected: function.arity,
                got: argc as u8,
            });
        }
        if function.is_async {
            let args = self.pop_args(argc)?;
            let slot0 = self.pop()?;
            let promise = Promise::pending();
            self.enqueue(Microtask::AsyncCall {
                closure,
                promise: promise.clone(),
                slot0,
                args,
            });
            self.push(Value::Promise(promise));
            return Ok(());
        }
        if function.is_generator {
            let args = self.pop_args(argc)?;
            let slot0 = self.pop()?;
            let mut ctx = ExecCtx::new(ContextKind::Main);
            {
                let mut stack = ctx.stack.borrow_mut();
                stack.push(slot0);
                for arg in args {
                    stack.push(arg);
                }
            }
            ctx.frames.push(CallFrame::new(closure, 0));
            let generator = Rc::new(RefCell::new(Generator::new(ctx)));
            {
                let mut g = generator.borrow_mut();
                if let Some(ctx) = g.ctx.as_mut() {
                    ctx.kind = ContextKind::Generator(generator.clone());
                }
            }
            self.push(Value::Generator(generator));
            return Ok(());
        }
        let callee_index = self.stack_len() - argc - 1;
        self.push_frame(closure, callee_index, None)
    }

    /// Method-call dispatch: native property, promise/generator/array
    /// built-ins, then the receiver's prototype chain.
    pub(crate) fn call_method(&mut self, name: Rc<str>, argc: usize) -> Result<()> {
        let receiver = self.peek(argc)?;
        match receiver {
            Value::Native(native) => match native.get_property(&name) {
                Some(Value::Native(method)) => {
                    let call = match &method.call {
                        Some(call) => call.clone(),
                        None => return Err(RuntimeError::NotCallable("native")),
                    };
                    let args = self.pop_args(argc)?;
                    self.pop()?;
                    let result = call(self, &args)?;
                    self.push(result);
                    Ok(())
                }
                Some(Value::Closure(closure)) => self.call_closure(closure, argc),
                Some(other) => Err(RuntimeError::NotCallable(type_name(&other))),
                None => Err(RuntimeError::NoSuchMethod {
                    method: name.to_string(),
                    got: "native",
                }),
            },
            Value::Promise(promise) => self.promise_method(promise, &name, argc),
            Value::Generator(generator) => self.generator_method(generator, &name, argc),
            Value::Array(array) => self.array_method(array, &name, argc),
            Value::Object(object) => {
                let method = object.borrow().lookup(&name);
                match method {
                    Some(Value::Closure(closure)) => self.call_closure(closure, argc),
                    Some(Value::Native(native)) => {
                        let call = match &native.call {
                            Some(call) => call.clone(),
                            None => return Err(RuntimeError::NotCallable("native")),
                        };
                        let args = self.pop_args(argc)?;
                        self.pop()?;
                        let result = call(self, &args)?;
                        self.push(result);
                        Ok(())
                    }
                    Some(other) => Err(RuntimeError::NotCallable(type_name(&other))),
                    None => Err(RuntimeError::NoSuchMethod {
                        method: name.to_string(),
                        got: "object",
                    }),
                }
            }
            Value::Null => Err(RuntimeError::MethodOnNull(name.to_string())),
            other => Err(RuntimeError::NoSuchMethod {
                method: name.to_string(),
                got: type_name(&other),
            }),
        }
    }

    /// Invoke a callable from host context and run it to completion,
    /// returning its result. Used for promise callbacks, executors, and
    /// callback-taking array methods; suspension points may not cross
    /// this boundary. Closure callees receive exactly their declared
    /// parameter count; host argument lists are truncated or padded
    /// with null, the way host callbacks expect.
    pub(crate) fn call_function(&mut self, callee: Value, args: &[Value]) -> Result<Value> {
        let entry_outer = self.outer.len();
        let entry_frames = self.ctx.frames.len();
        let entry_stack = self.stack_len();

        let mut argv: Vec<Value> = args.to_vec();
        if let Value::Closure(closure) = &callee {
            argv.resize(closure.function.arity as usize, Value::Null);
        }
        self.push(callee);
        let argc = argv.len();
        for arg in argv {
            self.push(arg);
        }
        if let Err(error) = self.call_value(argc) {
            self.stack_truncate(entry_stack);
            return Err(error);
        }
        if self.ctx.frames.len() > entry_frames || self.outer.len() != entry_outer {
            self.run_reentrant(entry_frames, entry_outer, entry_stack)?;
        }
        self.pop()
    }

    fn run_reentrant(
        &mut self,
        frame_floor: usize,
        outer_len: usize,
        stack_floor: usize,
    ) -> Result<()> {
        self.reentry.push(ReentryFloor {
            outer_len,
            frame_floor,
            stack_floor,
        });
        let result = loop {
            if self.outer.len() == outer_len && self.ctx.frames.len() <= frame_floor {
                break Ok(());
            }
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Suspend) => break Err(RuntimeError::IllegalSuspension),
                Err(error) => match self.unwind(error) {
                    Ok(_) => {}
                    Err(fatal) => break Err(fatal),
                },
            }
        };
        self.reentry.pop();
        if result.is_err() && self.outer.len() == outer_len {
            while self.ctx.frames.len() > frame_floor {
                self.ctx.frames.pop();
            }
            self.close_upvalues(stack_floor);
            self.stack_truncate(stack_floor);
        }
        result
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Run until the current context has no frames, a suspension hands
    /// control back, or an unhandled error escapes the main context.
    pub(crate) fn run(&mut self) -> Result<Signal> {
        loop {
            if self.ctx.frames.is_empty() {
                return Ok(Signal::Done);
            }
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Suspend) => return Ok(Signal::Yield),
                Err(error) => match self.unwind(error)? {
                    UnwindFlow::Caught => {}
                    UnwindFlow::Rejected => return Ok(Signal::Yield),
                },
            }
        }
    }

    fn step(&mut self) -> Result<Flow> {
        let byte = self.read_byte()?;
        let op = OpCode::from_byte(byte).ok_or(RuntimeError::UnknownOpcode(byte))?;
        self.execute(op)
    }

    fn execute(&mut self, op: OpCode) -> Result<Flow> {
        match op {
            OpCode::PushConst => {
                let value = self.read_constant()?;
                self.push(value);
            }
            OpCode::PushNull => self.push(Value::Null),
            OpCode::PushTrue => self.push(Value::Bool(true)),
            OpCode::PushFalse => self.push(Value::Bool(false)),
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Duplicate => {
                let top = self.peek(0)?;
                self.push(top);
            }

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
            | OpCode::LtEq
            | OpCode::Neg
            | OpCode::Not => self.execute_arithmetic(op)?,

            OpCode::GetGlobal
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
            | OpCode::DecUpvalue => self.execute_variables(op)?,

            OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::Loop
            | OpCode::Call
            | OpCode::CallMethod
            | OpCode::Return
            | OpCode::Closure
            | OpCode::CloseUpvalue
            | OpCode::New => return self.execute_control(op),

            OpCode::SetupTry | OpCode::PopCatch | OpCode::Throw => self.execute_exceptions(op)?,

            OpCode::Yield | OpCode::Await => return self.execute_tasks(op),

            OpCode::GetNative
            | OpCode::SetPrototype
            | OpCode::NewArray
            | OpCode::NewObject
            | OpCode::GetIndex
            | OpCode::SetIndex
            | OpCode::GetProp
            | OpCode::SetProp
            | OpCode::ObjectCreate
            | OpCode::GetPrototype
            | OpCode::IncProp
            | OpCode::DecProp => self.execute_objects(op)?,
        }
        Ok(Flow::Continue)
    }

    // ------------------------------------------------------------------
    // Unwind protocol
    // ------------------------------------------------------------------

    /// Unwind after a runtime error: innermost handler in the current
    /// context first; failing that, the context boundary decides.
    /// Async contexts convert the error into a promise rejection,
    /// generator contexts finish and re-throw at the resume site, and
    /// the main context escalates to a fatal error.
    fn unwind(&mut self, error: RuntimeError) -> Result<UnwindFlow> {
        let thrown = error.clone().into_thrown();
        loop {
            let floor = match self.reentry.last() {
                Some(floor) if floor.outer_len == self.outer.len() => Some(*floor),
                _ => None,
            };

            let handler = match self.ctx.handlers.last() {
                Some(h) => {
                    let blocked =
                        matches!(floor, Some(floor) if h.frame_index < floor.frame_floor);
                    if blocked {
                        None
                    } else {
                        Some(h.clone())
                    }
                }
                None => None,
            };
            if let Some(handler) = handler {
                self.ctx.handlers.pop();
                while self.ctx.frames.len() > handler.frame_index + 1 {
                    self.ctx.frames.pop();
                }
                self.close_upvalues(handler.stack_depth);
                self.stack_truncate(handler.stack_depth);
                self.push(thrown);
                self.frame_mut()?.ip = handler.catch_ip;
                return Ok(UnwindFlow::Caught);
            }

            if floor.is_some() {
                // The error escapes a synchronous host call; the caller
                // turns it into its own failure (executor rejection,
                // callback error).
                return Err(RuntimeError::Thrown(thrown));
            }

            match self.context_kind() {
                ContextKind::Main => return Err(error),
                ContextKind::Async(promise) => {
                    self.close_upvalues(0);
                    self.exit_context()?;
                    self.reject_promise(&promise, thrown);
                    return Ok(UnwindFlow::Rejected);
                }
                ContextKind::Generator(generator) => {
                    self.close_upvalues(0);
                    self.exit_context()?;
                    {
                        let mut g = generator.borrow_mut();
                        g.state = crate::runtime::generator::GeneratorState::Done;
                        g.ctx = None;
                    }
                    // Re-throw where the generator was resumed from.
                    continue;
                }
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a `{value, done}` iteration-result object.
pub(crate) fn iter_result(value: Value, done: bool) -> Value {
    let mut object = Object::new();
    object.set("value", value);
    object.set("done", Value::Bool(done));
    Value::object(object)
}


// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Single-threaded promises and the microtask queue.
//!
//! A promise settles exactly once. Nothing observable happens at
//! settlement time itself: reactions (`then` callbacks, await resumes,
//! adoption of an inner promise) are enqueued on the VM's microtask
//! queue and run in FIFO order between bytecode execution windows.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::{Closure, Value};
use crate::vm::ExecCtx;

#[derive(Debug, Clone)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

#[derive(Debug)]
pub struct Promise {
    pub state: PromiseState,
    pub reactions: Vec<Reaction>,
}

impl Promise {
    pub fn pending() -> Rc<RefCell<Promise>> {
        Rc::new(RefCell::new(Promise {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        }))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, PromiseState::Pending)
    }
}

/// A deferred consequence of a promise settling.
#[derive(Debug)]
pub enum Reaction {
    /// A `.then`/`.catch` registration. The missing side passes the
    /// settlement through to `result` unchanged.
    Then {
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
        result: Rc<RefCell<Promise>>,
    },

    /// An `await` waiting on this promise.
    Await(Suspension),

    /// An outer promise that resolved with this one and adopts its
    /// settlement.
    Adopt(Rc<RefCell<Promise>>),
}

/// A suspended async function body: its private execution context,
/// parked until the awaited promise settles, plus the promise the
/// async call handed to its caller.
#[derive(Debug)]
pub struct Suspension {
    pub ctx: ExecCtx,
    pub promise: Rc<RefCell<Promise>>,
}

/// A unit of deferred work drained by the event loop.
#[derive(Debug)]
pub enum Microtask {
    /// Start an async function body: push slot 0 (the callee, or the
    /// receiver for methods) and arguments into a fresh context and run
    /// it.
    AsyncCall {
        closure: Rc<Closure>,
        promise: Rc<RefCell<Promise>>,
        slot0: Value,
        args: Vec<Value>,
    },

    /// Invoke a callback with one argument; settle `result` with the
    /// outcome when present.
    RunCallback {
        callback: Value,
        arg: Value,
        result: Option<Rc<RefCell<Promise>>>,
    },

    /// Resume a suspended async body with the awaited promise's
    /// settlement.
    Resume {
        suspension: Suspension,
        value: Value,
        rejected: bool,
    },
}

// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The host interop boundary: native objects, host functions, timers,
//! and pending host operations.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::runtime::promise::Promise;
use crate::value::Value;
use crate::vm::{RuntimeError, Vm};

/// A host function callable from Jot code. Receives the VM so hosts
/// can settle promises, arm timers, or re-enter the interpreter.
pub type NativeFn = Rc<dyn Fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>>;

/// How the VM treats this native when it is the target of `new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    Plain,
    /// The `Promise` built-in: `new` takes an executor and constructs
    /// a VM promise.
    PromiseConstructor,
}

/// A host-provided value exposed through the interop boundary.
///
/// Natives carry an optional call hook (host functions) and a property
/// table (method suites like `console.log`). Property reads and writes
/// from Jot code go straight to the table.
pub struct NativeObject {
    pub name: Rc<str>,
    pub kind: NativeKind,
    pub call: Option<NativeFn>,
    pub properties: RefCell<IndexMap<Rc<str>, Value>>,
}

impl std::fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeObject")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("callable", &self.call.is_some())
            .finish()
    }
}

impl NativeObject {
    /// A non-callable native carrying only properties.
    pub fn object(name: impl Into<Rc<str>>) -> NativeObject {
        NativeObject {
            name: name.into(),
            kind: NativeKind::Plain,
            call: None,
            properties: RefCell::new(IndexMap::new()),
        }
    }

    /// A callable host function.
    pub fn function<F>(name: impl Into<Rc<str>>, f: F) -> NativeObject
    where
        F: Fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        NativeObject {
            name: name.into(),
            kind: NativeKind::Plain,
            call: Some(Rc::new(f)),
            properties: RefCell::new(IndexMap::new()),
        }
    }

    pub fn with_kind(mut self, kind: NativeKind) -> NativeObject {
        self.kind = kind;
        self
    }

    pub fn with_property(self, name: impl Into<Rc<str>>, value: Value) -> NativeObject {
        self.properties.borrow_mut().insert(name.into(), value);
        self
    }

    /// Wrap a host function directly as a `Value`.
    pub fn function_value<F>(name: impl Into<Rc<str>>, f: F) -> Value
    where
        F: Fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        Value::Native(Rc::new(NativeObject::function(name, f)))
    }

    pub fn get_property(&self, name: &str) -> Option<Value> {
        self.properties.borrow().get(name).cloned()
    }

    pub fn set_property(&self, name: impl Into<Rc<str>>, value: Value) {
        self.properties.borrow_mut().insert(name.into(), value);
    }
}

/// Handler invoked when Jot code calls `fetch(url)`. Returns the value
/// to fulfill with, or the reason to reject with.
pub type FetchHandler = Rc<dyn Fn(&str) -> Result<Value, Value>>;

/// A host operation awaiting service in the event loop's wait phase.
#[derive(Debug)]
pub enum HostOp {
    Fetch {
        url: Rc<str>,
        promise: Rc<RefCell<Promise>>,
    },
}

/// An armed timer. One-shot timers fire once; interval timers re-arm
/// themselves until cleared.
pub struct TimerEntry {
    pub deadline: Instant,
    pub seq: u64,
    pub callback: Value,
    pub interval: Option<Duration>,
    pub cancelled: Rc<Cell<bool>>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the nearest deadline wins.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Armed timers ordered by deadline, FIFO within a deadline.
#[derive(Default)]
pub struct TimerQueue {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(
        &mut self,
        delay: Duration,
        callback: Value,
        interval: Option<Duration>,
    ) -> Rc<Cell<bool>> {
        let cancelled = Rc::new(Cell::new(false));
        self.arm_with_flag(Instant::now() + delay, callback, interval, cancelled.clone());
        cancelled
    }

    pub fn arm_with_flag(
        &mut self,
        deadline: Instant,
        callback: Value,
        interval: Option<Duration>,
        cancelled: Rc<Cell<bool>>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(TimerEntry {
            deadline,
            seq,
            callback,
            interval,
            cancelled,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.peek().map(|entry| entry.deadline)
    }

    /// Pop the nearest timer if its deadline has passed.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerEntry> {
        if matches!(self.entries.peek(), Some(entry) if entry.deadline <= now) {
            self.entries.pop()
        } else {
            None
        }
    }
}

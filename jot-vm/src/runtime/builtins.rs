// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Default native bindings: console, Math, Object, Promise, Date,
//! performance, timers, and fetch.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::runtime::native::{NativeKind, NativeObject};
use crate::runtime::promise::Promise;
use crate::value::{prototype_chain_contains, type_name, Object, Value};
use crate::vm::{RuntimeError, Vm};

/// Install the default global bindings on a VM.
pub fn install_default_globals(vm: &mut Vm) {
    vm.bind_native("console", console());
    vm.bind_native("Math", math());
    vm.bind_native("Object", object_builtin());
    vm.bind_native("Promise", promise_builtin());
    vm.bind_native("Date", date());
    vm.bind_native("performance", performance());
    vm.bind_native("setTimeout", set_timeout());
    vm.bind_native("clearTimeout", clear_timer("clearTimeout"));
    vm.bind_native("setInterval", set_interval());
    vm.bind_native("clearInterval", clear_timer("clearInterval"));
    vm.bind_native("fetch", fetch());
}

// ---------------------------------------------------------------------------
// console
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum ConsoleTarget {
    Standard,
    Capture(Rc<RefCell<Vec<String>>>),
}

impl ConsoleTarget {
    fn write(&self, line: String, is_error: bool) {
        match self {
            ConsoleTarget::Standard => {
                if is_error {
                    eprintln!("{}", line);
                } else {
                    println!("{}", line);
                }
            }
            ConsoleTarget::Capture(buffer) => buffer.borrow_mut().push(line),
        }
    }
}

fn join_args(args: &[Value]) -> String {
    let parts: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    parts.join(" ")
}

fn console_with(target: ConsoleTarget) -> Value {
    let log_target = target.clone();
    let warn_target = target.clone();
    let native = NativeObject::object("console")
        .with_property(
            "log",
            NativeObject::function_value("log", move |_vm, args| {
                log_target.write(join_args(args), false);
                Ok(Value::Null)
            }),
        )
        .with_property(
            "warn",
            NativeObject::function_value("warn", move |_vm, args| {
                warn_target.write(join_args(args), true);
                Ok(Value::Null)
            }),
        )
        .with_property(
            "error",
            NativeObject::function_value("error", move |_vm, args| {
                target.write(join_args(args), true);
                Ok(Value::Null)
            }),
        );
    Value::Native(Rc::new(native))
}

/// The standard console: `log` to stdout, `warn`/`error` to stderr.
pub fn console() -> Value {
    console_with(ConsoleTarget::Standard)
}

/// A console that appends each line to a shared buffer. Used by
/// embedders and tests that need to observe output.
pub fn console_capture(buffer: Rc<RefCell<Vec<String>>>) -> Value {
    console_with(ConsoleTarget::Capture(buffer))
}

// ---------------------------------------------------------------------------
// Math
// ---------------------------------------------------------------------------

// LCG constants (same as used in glibc).
const LCG_MULTIPLIER: u64 = 6364136223846793005;
const LCG_INCREMENT: u64 = 1442695040888963407;

thread_local! {
    static RNG_STATE: Cell<u64> = const { Cell::new(0) };
    static RNG_SEEDED: Cell<bool> = const { Cell::new(false) };
}

fn next_random() -> u64 {
    RNG_SEEDED.with(|seeded| {
        if !seeded.get() {
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x5eed);
            RNG_STATE.with(|state| state.set(seed | 1));
            seeded.set(true);
        }
    });
    RNG_STATE.with(|state| {
        let next = state
            .get()
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        state.set(next);
        next
    })
}

fn random_f64() -> f64 {
    (next_random() >> 11) as f64 / (1u64 << 53) as f64
}

fn arg_number(args: &[Value], index: usize, who: &'static str) -> Result<f64, RuntimeError> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(RuntimeError::TypeError {
            expected: "number",
            got: type_name(other),
            context: Some(who.to_string()),
        }),
        None => Err(RuntimeError::TypeError {
            expected: "number",
            got: "nothing",
            context: Some(who.to_string()),
        }),
    }
}

fn math_fn1(name: &'static str, f: fn(f64) -> f64) -> Value {
    NativeObject::function_value(name, move |_vm, args| {
        Ok(Value::Number(f(arg_number(args, 0, name)?)))
    })
}

fn math() -> Value {
    let native = NativeObject::object("Math")
        .with_property("PI", Value::Number(std::f64::consts::PI))
        .with_property("E", Value::Number(std::f64::consts::E))
        .with_property("abs", math_fn1("abs", f64::abs))
        .with_property("floor", math_fn1("floor", f64::floor))
        .with_property("ceil", math_fn1("ceil", f64::ceil))
        .with_property("round", math_fn1("round", f64::round))
        .with_property("sqrt", math_fn1("sqrt", f64::sqrt))
        .with_property(
            "pow",
            NativeObject::function_value("pow", |_vm, args| {
                let base = arg_number(args, 0, "pow")?;
                let exp = arg_number(args, 1, "pow")?;
                Ok(Value::Number(base.powf(exp)))
            }),
        )
        .with_property(
            "min",
            NativeObject::function_value("min", |_vm, args| {
                let mut result = f64::INFINITY;
                for (i, _) in args.iter().enumerate() {
                    result = result.min(arg_number(args, i, "min")?);
                }
                Ok(Value::Number(result))
            }),
        )
        .with_property(
            "max",
            NativeObject::function_value("max", |_vm, args| {
                let mut result = f64::NEG_INFINITY;
                for (i, _) in args.iter().enumerate() {
                    result = result.max(arg_number(args, i, "max")?);
                }
                Ok(Value::Number(result))
            }),
        )
        .with_property(
            "random",
            NativeObject::function_value("random", |_vm, _args| Ok(Value::Number(random_f64()))),
        );
    Value::Native(Rc::new(native))
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

fn object_builtin() -> Value {
    let native = NativeObject::object("Object")
        .with_property(
            "create",
            NativeObject::function_value("create", |_vm, args| {
                let prototype = match args.first() {
                    Some(Value::Object(proto)) => Some(proto.clone()),
                    Some(Value::Null) | None => None,
                    Some(other) => {
                        return Err(RuntimeError::InvalidPrototype(type_name(other)));
                    }
                };
                Ok(Value::object(Object::with_prototype(prototype)))
            }),
        )
        .with_property(
            "keys",
            NativeObject::function_value("keys", |_vm, args| match args.first() {
                Some(Value::Object(object)) => {
                    let keys = object
                        .borrow()
                        .properties
                        .keys()
                        .map(|key| Value::Str(key.clone()))
                        .collect();
                    Ok(Value::array(keys))
                }
                Some(other) => Err(RuntimeError::PropertyOnNonObject {
                    property: "keys".to_string(),
                    got: type_name(other),
                }),
                None => Ok(Value::array(Vec::new())),
            }),
        )
        .with_property(
            "getPrototypeOf",
            NativeObject::function_value("getPrototypeOf", |_vm, args| match args.first() {
                Some(Value::Object(object)) => Ok(object
                    .borrow()
                    .prototype
                    .clone()
                    .map(Value::Object)
                    .unwrap_or(Value::Null)),
                Some(other) => Err(RuntimeError::PropertyOnNonObject {
                    property: "getPrototypeOf".to_string(),
                    got: type_name(other),
                }),
                None => Ok(Value::Null),
            }),
        )
        .with_property(
            "setPrototypeOf",
            NativeObject::function_value("setPrototypeOf", |_vm, args| {
                let target = match args.first() {
                    Some(Value::Object(object)) => object.clone(),
                    Some(other) => {
                        return Err(RuntimeError::PropertyOnNonObject {
                            property: "setPrototypeOf".to_string(),
                            got: type_name(other),
                        });
                    }
                    None => return Ok(Value::Null),
                };
                let prototype = match args.get(1) {
                    Some(Value::Object(proto)) => {
                        if prototype_chain_contains(proto, &target) {
                            return Err(RuntimeError::CyclicPrototype);
                        }
                        Some(proto.clone())
                    }
                    Some(Value::Null) | None => None,
                    Some(other) => {
                        return Err(RuntimeError::InvalidPrototype(type_name(other)));
                    }
                };
                target.borrow_mut().prototype = prototype;
                Ok(Value::Object(target))
            }),
        );
    Value::Native(Rc::new(native))
}

// ---------------------------------------------------------------------------
// Promise
// ---------------------------------------------------------------------------

fn promise_builtin() -> Value {
    let native = NativeObject::object("Promise")
        .with_kind(NativeKind::PromiseConstructor)
        .with_property(
            "resolve",
            NativeObject::function_value("resolve", |vm, args| {
                let promise = Promise::pending();
                vm.resolve_promise(&promise, args.first().cloned().unwrap_or(Value::Null));
                Ok(Value::Promise(promise))
            }),
        )
        .with_property(
            "reject",
            NativeObject::function_value("reject", |vm, args| {
                let promise = Promise::pending();
                vm.reject_promise(&promise, args.first().cloned().unwrap_or(Value::Null));
                Ok(Value::Promise(promise))
            }),
        );
    Value::Native(Rc::new(native))
}

// ---------------------------------------------------------------------------
// Date / performance
// ---------------------------------------------------------------------------

fn date() -> Value {
    let native = NativeObject::object("Date").with_property(
        "now",
        NativeObject::function_value("now", |_vm, _args| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as f64)
                .unwrap_or(0.0);
            Ok(Value::Number(millis))
        }),
    );
    Value::Native(Rc::new(native))
}

fn performance() -> Value {
    let native = NativeObject::object("performance").with_property(
        "now",
        NativeObject::function_value("now", |vm, _args| {
            Ok(Value::Number(vm.elapsed_millis()))
        }),
    );
    Value::Native(Rc::new(native))
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

fn is_callable(value: &Value) -> bool {
    match value {
        Value::Closure(_) => true,
        Value::Native(native) => native.call.is_some(),
        _ => false,
    }
}

fn timer_args(args: &[Value], who: &'static str) -> Result<(Value, Duration), RuntimeError> {
    let callback = match args.first() {
        Some(value) if is_callable(value) => value.clone(),
        Some(other) => {
            return Err(RuntimeError::NotCallable(type_name(other)));
        }
        None => {
            return Err(RuntimeError::TypeError {
                expected: "function",
                got: "nothing",
                context: Some(who.to_string()),
            });
        }
    };
    let millis = match args.get(1) {
        Some(Value::Number(n)) if *n >= 0.0 => *n,
        Some(Value::Number(_)) | None => 0.0,
        Some(other) => {
            return Err(RuntimeError::TypeError {
                expected: "number",
                got: type_name(other),
                context: Some(who.to_string()),
            });
        }
    };
    Ok((callback, Duration::from_micros((millis * 1000.0) as u64)))
}

fn set_timeout() -> Value {
    NativeObject::function_value("setTimeout", |vm, args| {
        let (callback, delay) = timer_args(args, "setTimeout")?;
        Ok(vm.arm_timer(callback, delay, None))
    })
}

fn set_interval() -> Value {
    NativeObject::function_value("setInterval", |vm, args| {
        let (callback, delay) = timer_args(args, "setInterval")?;
        Ok(vm.arm_timer(callback, delay, Some(delay)))
    })
}

fn clear_timer(name: &'static str) -> Value {
    NativeObject::function_value(name, |vm, args| {
        if let Some(Value::Native(handle)) = args.first() {
            if let Some(Value::Native(clear)) = handle.get_property("clear") {
                if let Some(call) = &clear.call {
                    return call(vm, &[]);
                }
            }
        }
        Ok(Value::Null)
    })
}

// ---------------------------------------------------------------------------
// fetch
// ---------------------------------------------------------------------------

fn fetch() -> Value {
    NativeObject::function_value("fetch", |vm, args| {
        let url: Rc<str> = match args.first() {
            Some(Value::Str(url)) => url.clone(),
            Some(other) => {
                return Err(RuntimeError::TypeError {
                    expected: "string",
                    got: type_name(other),
                    context: Some("fetch".to_string()),
                });
            }
            None => Rc::from(""),
        };
        Ok(vm.queue_fetch(url))
    })
}

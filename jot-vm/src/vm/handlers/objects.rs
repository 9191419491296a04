// jot-vm - Bytecode compiler and virtual machine for the Jot scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Object, array, and interop opcode handlers: literals, property and
//! index access, prototypes, and property increments.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::opcode::OpCode;
use crate::value::{
    format_number, is_falsy, prototype_chain_contains, type_name, values_equal, Object, Value,
};
use crate::vm::{Result, RuntimeError, Vm};

impl Vm {
    /// Execute an object or interop opcode.
    pub(crate) fn execute_objects(&mut self, op: OpCode) -> Result<()> {
        match op {
            OpCode::GetNative => {
                let name = self.read_string_constant()?;
                let value = self
                    .global(&name)
                    .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?;
                self.push(value);
            }
            OpCode::SetPrototype => {
                let proto_value = self.pop()?;
                let target = self.pop()?;
                let target = match target {
                    Value::Object(object) => object,
                    other => {
                        return Err(RuntimeError::PropertyOnNonObject {
                            property: "__proto__".to_string(),
                            got: type_name(&other),
                        });
                    }
                };
                match &proto_value {
                    Value::Object(proto) => {
                        if prototype_chain_contains(proto, &target) {
                            return Err(RuntimeError::CyclicPrototype);
                        }
                        target.borrow_mut().prototype = Some(proto.clone());
                    }
                    Value::Null => target.borrow_mut().prototype = None,
                    other => return Err(RuntimeError::InvalidPrototype(type_name(other))),
                }
                self.push(proto_value);
            }
            OpCode::NewArray => {
                let count = self.read_byte()? as usize;
                let elements = self.pop_args(count)?;
                self.push(Value::array(elements));
            }
            OpCode::NewObject => {
                let pairs = self.read_byte()? as usize;
                let flat = self.pop_args(pairs * 2)?;
                let mut properties = IndexMap::with_capacity(pairs);
                let mut iter = flat.into_iter();
                while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                    match key {
                        Value::Str(key) => {
                            properties.insert(key, value);
                        }
                        other => {
                            return Err(RuntimeError::Internal(format!(
                                "object literal key is not a string: {}",
                                type_name(&other)
                            )));
                        }
                    }
                }
                self.push(Value::Object(Rc::new(RefCell::new(Object {
                    properties,
                    prototype: None,
                }))));
            }
            OpCode::GetIndex => self.execute_get_index()?,
            OpCode::SetIndex => self.execute_set_index()?,
            OpCode::GetProp => {
                let name = self.read_string_constant()?;
                let target = self.pop()?;
                let value = self.get_property(&target, &name)?;
                self.push(value);
            }
            OpCode::SetProp => {
                let name = self.read_string_constant()?;
                let value = self.pop()?;
                let target = self.pop()?;
                self.set_property(&target, name, value.clone())?;
                self.push(value);
            }
            OpCode::ObjectCreate => {
                let proto = self.pop()?;
                let prototype = match proto {
                    Value::Object(proto) => Some(proto),
                    Value::Null => None,
                    other => return Err(RuntimeError::InvalidPrototype(type_name(&other))),
                };
                self.push(Value::object(Object::with_prototype(prototype)));
            }
            OpCode::GetPrototype => {
                let target = self.pop()?;
                match target {
                    Value::Closure(closure) => {
                        let prototype = self.closure_prototype(&closure);
                        self.push(Value::Object(prototype));
                    }
                    Value::Object(object) => {
                        let prototype = object.borrow().prototype.clone();
                        self.push(prototype.map(Value::Object).unwrap_or(Value::Null));
                    }
                    other => {
                        return Err(RuntimeError::PropertyOnNonObject {
                            property: "prototype".to_string(),
                            got: type_name(&other),
                        });
                    }
                }
            }
            OpCode::IncProp | OpCode::DecProp => {
                let name = self.read_string_constant()?;
                let mode = self.read_byte()?;
                let delta = if op == OpCode::IncProp { 1.0 } else { -1.0 };
                self.execute_update_property(name, mode, delta)?;
            }
            other => {
                return Err(RuntimeError::Internal(format!(
                    "execute_objects: unexpected opcode {:?}",
                    other
                )));
            }
        }
        Ok(())
    }

    /// Property read dispatch: native hook, own-map-plus-prototype walk
    /// for objects, `length` for arrays and strings. Misses read null.
    pub(crate) fn get_property(&self, target: &Value, name: &str) -> Result<Value> {
        match target {
            Value::Object(object) => Ok(object.borrow().lookup(name).unwrap_or(Value::Null)),
            Value::Native(native) => Ok(native.get_property(name).unwrap_or(Value::Null)),
            Value::Array(array) => {
                if name == "length" {
                    Ok(Value::Number(array.borrow().len() as f64))
                } else {
                    Ok(Value::Null)
                }
            }
            Value::Str(s) => {
                if name == "length" {
                    Ok(Value::Number(s.chars().count() as f64))
                } else {
                    Ok(Value::Null)
                }
            }
            Value::Promise(_) | Value::Generator(_) | Value::Closure(_) | Value::Function(_) => {
                Ok(Value::Null)
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {
                Err(RuntimeError::PropertyOnNonObject {
                    property: name.to_string(),
                    got: type_name(target),
                })
            }
        }
    }

    fn set_property(&mut self, target: &Value, name: Rc<str>, value: Value) -> Result<()> {
        match target {
            Value::Object(object) => {
                object.borrow_mut().properties.insert(name, value);
                Ok(())
            }
            Value::Native(native) => {
                native.set_property(name, value);
                Ok(())
            }
            other => Err(RuntimeError::PropertyOnNonObject {
                property: name.to_string(),
                got: type_name(other),
            }),
        }
    }

    /// `target[index]`: numeric indexing for arrays and strings,
    /// string-keyed access for objects. Out-of-range reads are null.
    fn execute_get_index(&mut self) -> Result<()> {
        let index = self.pop()?;
        let target = self.pop()?;
        let value = match (&target, &index) {
            (Value::Array(array), Value::Number(n)) => {
                let array = array.borrow();
                if *n >= 0.0 && n.fract() == 0.0 && (*n as usize) < array.len() {
                    array[*n as usize].clone()
                } else {
                    Value::Null
                }
            }
            (Value::Array(_), Value::Str(key)) => {
                if &**key == "length" {
                    self.get_property(&target, "length")?
                } else {
                    Value::Null
                }
            }
            (Value::Str(s), Value::Number(n)) => {
                if *n >= 0.0 && n.fract() == 0.0 {
                    s.chars()
                        .nth(*n as usize)
                        .map(|c| Value::string(c.to_string()))
                        .unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            }
            (Value::Object(object), Value::Str(key)) => {
                object.borrow().lookup(key).unwrap_or(Value::Null)
            }
            (Value::Object(object), Value::Number(n)) => object
                .borrow()
                .lookup(&format_number(*n))
                .unwrap_or(Value::Null),
            (Value::Native(native), Value::Str(key)) => {
                native.get_property(key).unwrap_or(Value::Null)
            }
            (Value::Null | Value::Bool(_) | Value::Number(_), _) => {
                return Err(RuntimeError::PropertyOnNonObject {
                    property: index.to_string(),
                    got: type_name(&target),
                });
            }
            _ => Value::Null,
        };
        self.push(value);
        Ok(())
    }

    /// `target[index] = value`: arrays grow with nulls when written
    /// past their end.
    fn execute_set_index(&mut self) -> Result<()> {
        let value = self.pop()?;
        let index = self.pop()?;
        let target = self.pop()?;
        match (&target, &index) {
            (Value::Array(array), Value::Number(n)) => {
                if *n < 0.0 || n.fract() != 0.0 {
                    return Err(RuntimeError::TypeError {
                        expected: "non-negative integer index",
                        got: "number",
                        context: Some("array assignment".to_string()),
                    });
                }
                let idx = *n as usize;
                let mut array = array.borrow_mut();
                if idx >= array.len() {
                    array.resize(idx + 1, Value::Null);
                }
                array[idx] = value.clone();
            }
            (Value::Object(object), Value::Str(key)) => {
                object.borrow_mut().properties.insert(key.clone(), value.clone());
            }
            (Value::Object(object), Value::Number(n)) => {
                object
                    .borrow_mut()
                    .properties
                    .insert(Rc::from(format_number(*n)), value.clone());
            }
            (Value::Native(native), Value::Str(key)) => {
                native.set_property(key.clone(), value.clone());
            }
            _ => {
                return Err(RuntimeError::PropertyOnNonObject {
                    property: index.to_string(),
                    got: type_name(&target),
                });
            }
        }
        self.push(value);
        Ok(())
    }

    /// `IncProp`/`DecProp`: the receiver on top of the stack must have
    /// a numeric own property. Mode 0 yields the old value, mode 1 the
    /// new one; mode 2 leaves the receiver for a statement-level pop.
    fn execute_update_property(&mut self, name: Rc<str>, mode: u8, delta: f64) -> Result<()> {
        let target = self.peek(0)?;
        let object = match target {
            Value::Object(object) => object,
            other => {
                return Err(RuntimeError::PropertyOnNonObject {
                    property: name.to_string(),
                    got: type_name(&other),
                });
            }
        };
        let old = {
            let object = object.borrow();
            match object.properties.get(&*name) {
                Some(Value::Number(n)) => *n,
                _ => return Err(RuntimeError::NoNumericProperty(name.to_string())),
            }
        };
        object
            .borrow_mut()
            .properties
            .insert(name.clone(), Value::Number(old + delta));
        match mode {
            2 => {}
            0 => {
                self.pop()?;
                self.push(Value::Number(old));
            }
            1 => {
                self.pop()?;
                self.push(Value::Number(old + delta));
            }
            other => {
                return Err(RuntimeError::Internal(format!(
                    "invalid property-update mode {}",
                    other
                )));
            }
        }
        Ok(())
    }

    /// Array method suite. The callback-taking methods re-enter the
    /// interpreter synchronously.
    pub(crate) fn array_method(
        &mut self,
        array: Rc<RefCell<Vec<Value>>>,
        name: &str,
        argc: usize,
    ) -> Result<()> {
        let args = self.pop_args(argc)?;
        self.pop()?;
        let result = match name {
            "push" => {
                let mut elements = array.borrow_mut();
                for value in args {
                    elements.push(value);
                }
                Value::Number(elements.len() as f64)
            }
            "pop" => array.borrow_mut().pop().unwrap_or(Value::Null),
            "indexOf" => {
                let needle = args.first().cloned().unwrap_or(Value::Null);
                let elements = array.borrow();
                elements
                    .iter()
                    .position(|value| values_equal(value, &needle))
                    .map(|i| Value::Number(i as f64))
                    .unwrap_or(Value::Number(-1.0))
            }
            "join" => {
                let separator = match args.first() {
                    Some(Value::Str(s)) => s.to_string(),
                    _ => ",".to_string(),
                };
                let elements = array.borrow();
                let parts: Vec<String> = elements.iter().map(|v| v.to_string()).collect();
                Value::string(parts.join(&separator))
            }
            "slice" => {
                let elements = array.borrow();
                let len = elements.len() as f64;
                let clamp = |n: f64| -> usize {
                    let n = if n < 0.0 { len + n } else { n };
                    n.clamp(0.0, len) as usize
                };
                let start = match args.first() {
                    Some(Value::Number(n)) => clamp(*n),
                    _ => 0,
                };
                let end = match args.get(1) {
                    Some(Value::Number(n)) => clamp(*n),
                    _ => len as usize,
                };
                if start < end {
                    Value::array(elements[start..end].to_vec())
                } else {
                    Value::array(Vec::new())
                }
            }
            "forEach" => {
                let callback = callback_arg(&args, "forEach")?;
                let mut i = 0;
                loop {
                    let element = {
                        let elements = array.borrow();
                        if i >= elements.len() {
                            break;
                        }
                        elements[i].clone()
                    };
                    self.call_function(callback.clone(), &[element, Value::Number(i as f64)])?;
                    i += 1;
                }
                Value::Null
            }
            "map" => {
                let callback = callback_arg(&args, "map")?;
                let mut mapped = Vec::new();
                let mut i = 0;
                loop {
                    let element = {
                        let elements = array.borrow();
                        if i >= elements.len() {
                            break;
                        }
                        elements[i].clone()
                    };
                    let value =
                        self.call_function(callback.clone(), &[element, Value::Number(i as f64)])?;
                    mapped.push(value);
                    i += 1;
                }
                Value::array(mapped)
            }
            "filter" => {
                let callback = callback_arg(&args, "filter")?;
                let mut kept = Vec::new();
                let mut i = 0;
                loop {
                    let element = {
                        let elements = array.borrow();
                        if i >= elements.len() {
                            break;
                        }
                        elements[i].clone()
                    };
                    let keep = self
                        .call_function(callback.clone(), &[element.clone(), Value::Number(i as f64)])?;
                    if !is_falsy(&keep) {
                        kept.push(element);
                    }
                    i += 1;
                }
                Value::array(kept)
            }
            _ => {
                return Err(RuntimeError::NoSuchMethod {
                    method: name.to_string(),
                    got: "array",
                });
            }
        };
        self.push(result);
        Ok(())
    }
}

fn callback_arg(args: &[Value], who: &'static str) -> Result<Value> {
    match args.first() {
        Some(value @ Value::Closure(_)) => Ok(value.clone()),
        Some(value @ Value::Native(_)) => Ok(value.clone()),
        Some(other) => Err(RuntimeError::NotCallable(type_name(other))),
        None => Err(RuntimeError::TypeError {
            expected: "function",
            got: "nothing",
            context: Some(who.to_string()),
        }),
    }
}

//! Runtime values of cellscript.
//!
//! Primitives compare by value, arrays/objects/functions/promises by
//! identity. [`Value::same_value`] is the comparison the reactive context
//! uses to decide whether a write is a change.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

use super::interpreter::Closure;

/// Nesting limit for display and JSON conversion (guards cyclic objects).
const MAX_RENDER_DEPTH: usize = 32;

/// Largest number of holes a single index write may add to an array.
const MAX_ARRAY_GROWTH: usize = 1 << 16;

/// Integral numbers below this render as JSON integers.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A cellscript value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<PropertyMap>>),
    Function(Rc<Closure>),
    Native(Rc<NativeFunction>),
    Promise(Rc<Promise>),
    Host(Rc<dyn HostObject>),
}

/// An object whose properties are implemented by the embedder (the `$`
/// context view, for one).
pub trait HostObject {
    /// Name used when the object is printed.
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Value;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// A fresh, empty object.
    pub fn object() -> Self {
        Value::Object(Rc::new(RefCell::new(PropertyMap::default())))
    }

    /// An object holding `entries` in order.
    pub fn object_from<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let mut map = PropertyMap::default();
        for (key, value) in entries {
            map.insert(key.into(), value);
        }
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn native(name: &'static str, func: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Value::Native(Rc::new(NativeFunction {
            name,
            func: Box::new(func),
        }))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) | Value::Object(_) | Value::Promise(_) | Value::Host(_) => "object",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric conversion as performed by arithmetic operators.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => match items.borrow().as_slice() {
                [] => 0.0,
                [single] => single.to_number(),
                _ => f64::NAN,
            },
            _ => f64::NAN,
        }
    }

    /// String conversion as performed by `+` with a string operand.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.to_string(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            other => other.to_string(),
        }
    }

    /// Property read (`value.key`). Missing properties read as `undefined`.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned().unwrap_or_default(),
            Value::Array(items) => {
                let items = items.borrow();
                if key == "length" {
                    return Value::Number(items.len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default()
            }
            Value::String(s) if key == "length" => Value::Number(s.chars().count() as f64),
            Value::Host(host) => host.get(key),
            _ => Value::Undefined,
        }
    }

    /// Property write (`value.key = v`).
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        match self {
            Value::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let index: usize = key
                    .parse()
                    .map_err(|_| Error::runtime(format!("invalid array index '{}'", key)))?;
                let mut items = items.borrow_mut();
                if index >= items.len() {
                    if index - items.len() > MAX_ARRAY_GROWTH {
                        return Err(Error::runtime(format!(
                            "array index {} out of range",
                            index
                        )));
                    }
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                Ok(())
            }
            Value::Host(host) => host.set(key, value),
            other => Err(Error::runtime(format!(
                "cannot set property '{}' on {}",
                key,
                other.type_of()
            ))),
        }
    }

    /// Own enumerable keys of an object, in insertion order.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.borrow().keys().map(str::to_string).collect(),
            Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
            Value::Host(host) => host.keys(),
            _ => Vec::new(),
        }
    }

    /// `===`.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            _ => self.same_value(other),
        }
    }

    /// Change-detection equality: `===`, except that `NaN` equals `NaN`.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`: like `===` but with null/undefined and number/string coercion.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                !self.is_nullish() && !other.is_nullish() && self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }

    /// JSON rendering; functions and promises become descriptive strings,
    /// cycles are cut at a fixed depth.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> serde_json::Value {
        use serde_json::Value as Json;
        if depth > MAX_RENDER_DEPTH {
            return Json::String("[Circular]".into());
        }
        match self {
            Value::Undefined | Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => {
                Json::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.to_string()),
            Value::Array(items) => Json::Array(
                items.borrow().iter().map(|v| v.to_json_at(depth + 1)).collect(),
            ),
            Value::Object(map) => Json::Object(
                map.borrow()
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined))
                    .map(|(k, v)| (k.to_string(), v.to_json_at(depth + 1)))
                    .collect(),
            ),
            other => Json::String(other.to_string()),
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize, nested: bool) -> fmt::Result {
        if depth > MAX_RENDER_DEPTH {
            return write!(f, "[Circular]");
        }
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) if nested => write!(f, "{:?}", s),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.render(f, depth + 1, true)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                let map = map.borrow();
                if map.is_empty() {
                    return write!(f, "{{}}");
                }
                write!(f, "{{ ")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    value.render(f, depth + 1, true)?;
                }
                write!(f, " }}")
            }
            Value::Function(closure) => write!(f, "[Function ({} params)]", closure.arity()),
            Value::Native(native) => write!(f, "[Function {}]", native.name),
            Value::Promise(_) => write!(f, "[Promise]"),
            Value::Host(host) => write!(f, "[object {}]", host.name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0, false)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0, true)
    }
}

/// Structural equality for tests and assertions; not used for change
/// detection.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            _ => self.same_value(other),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::from(s),
            Json::Array(items) => Value::array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Value::object_from(map.into_iter().map(|(k, v)| (k, Value::from(v)))),
        }
    }
}

/// Format a number the way scripts print it: integers without a fraction,
/// `Infinity`/`NaN` spelled out.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        (if n > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

/// Insertion-ordered property table.
#[derive(Clone, Default, PartialEq)]
pub struct PropertyMap {
    entries: Vec<(String, Value)>,
}

impl PropertyMap {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A function implemented in Rust.
pub struct NativeFunction {
    pub name: &'static str,
    func: Box<dyn Fn(&[Value]) -> Result<Value>>,
}

impl NativeFunction {
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }
}

enum PromiseState {
    Pending(LocalBoxFuture<'static, Result<Value>>),
    /// Being awaited right now.
    Running,
    Settled(Result<Value>),
}

/// A value that becomes available later; produced by `require`.
///
/// A promise settles once; later awaits observe the stored result.
pub struct Promise {
    state: RefCell<PromiseState>,
}

impl Promise {
    pub fn new(future: LocalBoxFuture<'static, Result<Value>>) -> Self {
        Self {
            state: RefCell::new(PromiseState::Pending(future)),
        }
    }

    pub fn resolved(value: Value) -> Self {
        Self {
            state: RefCell::new(PromiseState::Settled(Ok(value))),
        }
    }

    /// Wait for the promise to settle.
    pub async fn settle(&self) -> Result<Value> {
        let pending = {
            let mut state = self.state.borrow_mut();
            match std::mem::replace(&mut *state, PromiseState::Running) {
                PromiseState::Pending(future) => future,
                PromiseState::Settled(result) => {
                    *state = PromiseState::Settled(result.clone());
                    return result;
                }
                PromiseState::Running => {
                    return Err(Error::runtime("promise is already being awaited elsewhere"));
                }
            }
        };
        let result = pending.await;
        *self.state.borrow_mut() = PromiseState::Settled(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(Value::Number(10.0).to_string(), "10");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "Infinity");
    }

    #[test]
    fn test_same_value_identity_for_objects() {
        let a = Value::object_from([("x", Value::Number(1.0))]);
        let b = Value::object_from([("x", Value::Number(1.0))]);
        assert!(a.same_value(&a.clone()));
        assert!(!a.same_value(&b));
        // Structural equality still holds.
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_value_nan() {
        assert!(Value::Number(f64::NAN).same_value(&Value::Number(f64::NAN)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(Value::Number(1.0).loose_equals(&Value::from("1")));
        assert!(!Value::Null.loose_equals(&Value::Number(0.0)));
    }

    #[test]
    fn test_display_object() {
        let v = Value::object_from([
            ("sum", Value::Number(10.0)),
            ("name", Value::from("cell")),
            ("list", Value::array(vec![Value::Number(1.0), Value::Null])),
        ]);
        assert_eq!(v.to_string(), r#"{ sum: 10, name: "cell", list: [1, null] }"#);
    }

    #[test]
    fn test_cyclic_object_is_cut() {
        let v = Value::object();
        v.set("me", v.clone()).unwrap();
        assert!(v.to_string().contains("[Circular]"));
        assert!(v.to_json().to_string().contains("[Circular]"));
    }

    #[test]
    fn test_json_round_trip_shape() {
        let json = serde_json::json!({"a": [1, 2], "b": {"c": "d"}});
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_array_index_write_extends() {
        let arr = Value::array(Vec::new());
        arr.set("2", Value::Number(5.0)).unwrap();
        assert_eq!(arr.get("length"), Value::Number(3.0));
        assert_eq!(arr.get("0"), Value::Undefined);
    }

    #[test]
    fn test_array_index_write_far_past_the_end_fails() {
        let arr = Value::array(vec![Value::Null]);
        let err = arr.set("100000000000000", Value::Number(1.0)).unwrap_err();
        assert!(matches!(err, Error::Runtime(message) if message.contains("out of range")));

        let max = usize::MAX.to_string();
        assert!(arr.set(&max, Value::Number(1.0)).is_err());
        assert_eq!(arr.get("length"), Value::Number(1.0));

        let limit = (1 + MAX_ARRAY_GROWTH).to_string();
        arr.set(&limit, Value::Number(1.0)).unwrap();
        assert_eq!(arr.get("length"), Value::Number((MAX_ARRAY_GROWTH + 2) as f64));
    }
}

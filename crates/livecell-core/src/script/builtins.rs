//! Global objects every cell sees: `Math`, `JSON`, `Object`, `console`.

use std::rc::Rc;

use crate::error::{Error, Result};

use super::interpreter::Env;
use super::value::Value;

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn math_fn(name: &'static str, f: fn(f64) -> f64) -> (&'static str, Value) {
    (name, Value::native(name, move |args| Ok(Value::Number(f(arg(args, 0).to_number())))))
}

fn math() -> Value {
    Value::object_from([
        ("PI", Value::Number(std::f64::consts::PI)),
        ("E", Value::Number(std::f64::consts::E)),
        math_fn("abs", f64::abs),
        math_fn("floor", f64::floor),
        math_fn("ceil", f64::ceil),
        math_fn("round", |n| (n + 0.5).floor()),
        math_fn("trunc", f64::trunc),
        math_fn("sqrt", f64::sqrt),
        math_fn("sign", |n| if n == 0.0 || n.is_nan() { n } else { n.signum() }),
        (
            "pow",
            Value::native("pow", |args| {
                Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number())))
            }),
        ),
        (
            "min",
            Value::native("min", |args| {
                Ok(Value::Number(args.iter().map(Value::to_number).fold(f64::INFINITY, |a, b| {
                    if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
                })))
            }),
        ),
        (
            "max",
            Value::native("max", |args| {
                Ok(Value::Number(args.iter().map(Value::to_number).fold(
                    f64::NEG_INFINITY,
                    |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) },
                )))
            }),
        ),
    ])
}

fn json() -> Value {
    Value::object_from([
        (
            "stringify",
            Value::native("stringify", |args| {
                let value = arg(args, 0);
                if matches!(value, Value::Undefined) {
                    return Ok(Value::Undefined);
                }
                let json = value.to_json();
                let pretty = !arg(args, 2).is_nullish();
                let text = if pretty {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                };
                text.map(Value::from)
                    .map_err(|e| Error::runtime(format!("JSON.stringify: {}", e)))
            }),
        ),
        (
            "parse",
            Value::native("parse", |args| {
                let text = arg(args, 0).to_display_string();
                serde_json::from_str::<serde_json::Value>(&text)
                    .map(Value::from)
                    .map_err(|e| Error::runtime(format!("JSON.parse: {}", e)))
            }),
        ),
    ])
}

fn object() -> Value {
    Value::object_from([(
        "keys",
        Value::native("keys", |args| {
            Ok(Value::array(arg(args, 0).keys().into_iter().map(Value::from).collect()))
        }),
    )])
}

fn console(model: Rc<str>) -> Value {
    Value::object_from([(
        "log",
        Value::native("log", move |args: &[Value]| -> Result<Value> {
            let line = args
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            tracing::info!(model = %model, "{}", line);
            Ok(Value::Undefined)
        }),
    )])
}

/// Declare the global objects in `env`. `model` tags `console.log` output.
pub fn install(env: &Env, model: &str) {
    env.declare("Math", math());
    env.declare("JSON", json());
    env.declare("Object", object());
    env.declare("console", console(Rc::from(model)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(object: &Value, method: &str, args: &[Value]) -> Value {
        match object.get(method) {
            Value::Native(native) => native.call(args).unwrap(),
            other => panic!("{} is not native", other),
        }
    }

    #[test]
    fn test_math() {
        let math = math();
        assert_eq!(call(&math, "floor", &[Value::Number(2.7)]), Value::Number(2.0));
        assert_eq!(call(&math, "round", &[Value::Number(-2.5)]), Value::Number(-2.0));
        assert_eq!(
            call(&math, "max", &[Value::Number(1.0), Value::Number(9.0), Value::Number(3.0)]),
            Value::Number(9.0)
        );
        assert_eq!(call(&math, "min", &[]), Value::Number(f64::INFINITY));
    }

    #[test]
    fn test_json_stringify_and_parse() {
        let json = json();
        let value = Value::object_from([("a", Value::Number(1.0)), ("b", Value::from("x"))]);
        assert_eq!(call(&json, "stringify", &[value]), Value::from(r#"{"a":1,"b":"x"}"#));
        let parsed = call(&json, "parse", &[Value::from("[1, true]")]);
        assert_eq!(parsed, Value::array(vec![Value::Number(1.0), Value::Bool(true)]));
    }

    #[test]
    fn test_json_parse_error() {
        let Value::Native(parse) = json().get("parse") else {
            panic!("parse missing");
        };
        assert!(matches!(parse.call(&[Value::from("{")]), Err(Error::Runtime(_))));
    }

    #[test]
    fn test_object_keys() {
        let value = Value::object_from([("a", Value::Null), ("b", Value::Null)]);
        assert_eq!(
            call(&object(), "keys", &[value]),
            Value::array(vec![Value::from("a"), Value::from("b")])
        );
    }
}

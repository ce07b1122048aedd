//! Tree-walking interpreter for cellscript.
//!
//! Evaluation is asynchronous all the way down: `await` may suspend the
//! run at any depth (most commonly on a `require` promise), letting other
//! cells make progress on the same thread. Recursive evaluation therefore
//! returns boxed local futures.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::ast::{
    AssignOp, BinaryOp, Expr, FunctionBody, FunctionDef, LogicalOp, Program, Stmt, UnaryOp,
};
use super::lexer::Position;
use super::value::{Value, format_number};

/// Nested function calls allowed before the run is aborted.
const MAX_CALL_DEPTH: usize = 200;

/// Nested expression evaluations allowed before the run is aborted. Counts
/// across calls, so it bounds the native stack a single run can use.
const MAX_EXPRESSION_DEPTH: usize = 256;

fn error_at(pos: Position, message: impl std::fmt::Display) -> Error {
    Error::Runtime(format!("{} (at {}:{})", message, pos.line, pos.column))
}

/// A lexical scope.
pub struct Env {
    vars: RefCell<FxHashMap<String, Value>>,
    parent: Option<Rc<Env>>,
}

impl Env {
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(FxHashMap::default()),
            parent: None,
        })
    }

    pub fn child(parent: &Rc<Env>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(FxHashMap::default()),
            parent: Some(parent.clone()),
        })
    }

    pub fn declare(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// Update an existing binding. Returns false if `name` is not declared.
    fn assign(&self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = value;
            return true;
        }
        self.parent
            .as_ref()
            .is_some_and(|parent| parent.assign(name, value))
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("vars", &self.vars.borrow().len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// An arrow function value together with the scope it closed over.
pub struct Closure {
    def: Rc<FunctionDef>,
    env: Rc<Env>,
    interpreter: Interpreter,
}

impl Closure {
    pub fn arity(&self) -> usize {
        self.def.params.len()
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        self.interpreter.call_closure(self, args).await
    }
}

struct Limits {
    max_loop_iterations: u64,
    call_depth: Cell<usize>,
    expression_depth: Cell<usize>,
}

/// Decrements a depth counter when the nested work finishes, however it
/// finishes.
struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>, max: usize, message: &str) -> Result<Self> {
        let next = depth.get() + 1;
        if next > max {
            return Err(Error::runtime(message));
        }
        depth.set(next);
        Ok(Self(depth))
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

enum Flow {
    Normal,
    Return(Value),
}

/// Executes parsed programs. Cheap to clone; clones share limits.
#[derive(Clone)]
pub struct Interpreter {
    limits: Rc<Limits>,
}

impl Interpreter {
    pub fn new(max_loop_iterations: u64) -> Self {
        Self {
            limits: Rc::new(Limits {
                max_loop_iterations,
                call_depth: Cell::new(0),
                expression_depth: Cell::new(0),
            }),
        }
    }

    /// Run a module body to completion in `env`.
    pub async fn run_program(&self, program: &Program, env: &Rc<Env>) -> Result<()> {
        self.exec_block(&program.body, env).await.map(|_| ())
    }

    fn exec_block<'a>(
        &'a self,
        stmts: &'a [Stmt],
        env: &'a Rc<Env>,
    ) -> LocalBoxFuture<'a, Result<Flow>> {
        async move {
            for stmt in stmts {
                if let Flow::Return(value) = self.exec(stmt, env).await? {
                    return Ok(Flow::Return(value));
                }
            }
            Ok(Flow::Normal)
        }
        .boxed_local()
    }

    fn check_iterations(&self, count: &mut u64) -> Result<()> {
        *count += 1;
        if *count > self.limits.max_loop_iterations {
            return Err(Error::runtime(format!(
                "loop exceeded {} iterations",
                self.limits.max_loop_iterations
            )));
        }
        Ok(())
    }

    fn exec<'a>(&'a self, stmt: &'a Stmt, env: &'a Rc<Env>) -> LocalBoxFuture<'a, Result<Flow>> {
        async move {
            match stmt {
                Stmt::Declare { name, init } => {
                    let value = match init {
                        Some(expr) => self.eval(expr, env).await?,
                        None => Value::Undefined,
                    };
                    env.declare(name.clone(), value);
                    Ok(Flow::Normal)
                }
                Stmt::Assign {
                    target,
                    op,
                    value,
                    pos,
                } => {
                    self.assign(target, *op, value, env, *pos).await?;
                    Ok(Flow::Normal)
                }
                Stmt::Expr(expr) => {
                    self.eval(expr, env).await?;
                    Ok(Flow::Normal)
                }
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.eval(cond, env).await?.truthy() {
                        self.exec(then, env).await
                    } else if let Some(otherwise) = otherwise {
                        self.exec(otherwise, env).await
                    } else {
                        Ok(Flow::Normal)
                    }
                }
                Stmt::While { cond, body } => {
                    let mut iterations = 0;
                    while self.eval(cond, env).await?.truthy() {
                        self.check_iterations(&mut iterations)?;
                        if let Flow::Return(value) = self.exec(body, env).await? {
                            return Ok(Flow::Return(value));
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::For {
                    init,
                    cond,
                    step,
                    body,
                } => {
                    let scope = Env::child(env);
                    if let Some(init) = init {
                        self.exec(init, &scope).await?;
                    }
                    let mut iterations = 0;
                    loop {
                        if let Some(cond) = cond {
                            if !self.eval(cond, &scope).await?.truthy() {
                                break;
                            }
                        }
                        self.check_iterations(&mut iterations)?;
                        if let Flow::Return(value) = self.exec(body, &scope).await? {
                            return Ok(Flow::Return(value));
                        }
                        if let Some(step) = step {
                            self.exec(step, &scope).await?;
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Block(stmts) => {
                    let scope = Env::child(env);
                    self.exec_block(stmts, &scope).await
                }
                Stmt::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval(expr, env).await?,
                        None => Value::Undefined,
                    };
                    Ok(Flow::Return(value))
                }
            }
        }
        .boxed_local()
    }

    async fn assign(
        &self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        env: &Rc<Env>,
        pos: Position,
    ) -> Result<()> {
        match target {
            Expr::Ident(name, _) => {
                let mut value = self.eval(value, env).await?;
                if let Some(bin) = op.binary() {
                    let current = env
                        .lookup(name)
                        .ok_or_else(|| error_at(pos, format!("'{}' is not defined", name)))?;
                    value = binary(bin, &current, &value, pos)?;
                }
                if !env.assign(name, value) {
                    return Err(error_at(pos, format!("'{}' is not defined", name)));
                }
                Ok(())
            }
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, env).await?;
                self.assign_property(&object, property, op, value, env, pos)
                    .await
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, env).await?;
                let key = property_key(&self.eval(index, env).await?);
                self.assign_property(&object, &key, op, value, env, pos)
                    .await
            }
            _ => Err(error_at(pos, "invalid assignment target")),
        }
    }

    async fn assign_property(
        &self,
        object: &Value,
        key: &str,
        op: AssignOp,
        value: &Expr,
        env: &Rc<Env>,
        pos: Position,
    ) -> Result<()> {
        if object.is_nullish() {
            return Err(error_at(
                pos,
                format!("cannot set property '{}' of {}", key, object),
            ));
        }
        let mut value = self.eval(value, env).await?;
        if let Some(bin) = op.binary() {
            value = binary(bin, &object.get(key), &value, pos)?;
        }
        object.set(key, value).map_err(|e| match e {
            Error::Runtime(message) => error_at(pos, message),
            other => other,
        })
    }

    fn eval<'a>(&'a self, expr: &'a Expr, env: &'a Rc<Env>) -> LocalBoxFuture<'a, Result<Value>> {
        async move {
            let _guard = DepthGuard::enter(
                &self.limits.expression_depth,
                MAX_EXPRESSION_DEPTH,
                "expression nested too deeply",
            )?;
            match expr {
                Expr::Number(n) => Ok(Value::Number(*n)),
                Expr::Str(s) => Ok(Value::String(s.clone())),
                Expr::Bool(b) => Ok(Value::Bool(*b)),
                Expr::Null => Ok(Value::Null),
                Expr::Undefined => Ok(Value::Undefined),
                Expr::Ident(name, pos) => env
                    .lookup(name)
                    .ok_or_else(|| error_at(*pos, format!("'{}' is not defined", name))),
                Expr::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, env).await?);
                    }
                    Ok(Value::array(values))
                }
                Expr::Object(props) => {
                    let object = Value::object();
                    for (key, value) in props {
                        object.set(key, self.eval(value, env).await?)?;
                    }
                    Ok(object)
                }
                Expr::Member {
                    object,
                    property,
                    pos,
                } => {
                    let object = self.eval(object, env).await?;
                    read_property(&object, property, *pos)
                }
                Expr::Index { object, index, pos } => {
                    let object = self.eval(object, env).await?;
                    let key = property_key(&self.eval(index, env).await?);
                    read_property(&object, &key, *pos)
                }
                Expr::Call { callee, args, pos } => self.eval_call(callee, args, env, *pos).await,
                Expr::Arrow(def) => Ok(Value::Function(Rc::new(Closure {
                    def: def.clone(),
                    env: env.clone(),
                    interpreter: self.clone(),
                }))),
                Expr::Unary { op, operand } => {
                    let value = self.eval(operand, env).await?;
                    Ok(match op {
                        UnaryOp::Neg => Value::Number(-value.to_number()),
                        UnaryOp::Plus => Value::Number(value.to_number()),
                        UnaryOp::Not => Value::Bool(!value.truthy()),
                        UnaryOp::TypeOf => Value::string(value.type_of()),
                    })
                }
                Expr::Binary {
                    op,
                    left,
                    right,
                    pos,
                } => {
                    let left = self.eval(left, env).await?;
                    let right = self.eval(right, env).await?;
                    binary(*op, &left, &right, *pos)
                }
                Expr::Logical { op, left, right } => {
                    let left = self.eval(left, env).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !left.truthy(),
                        LogicalOp::Or => left.truthy(),
                        LogicalOp::Nullish => !left.is_nullish(),
                    };
                    if short_circuit {
                        Ok(left)
                    } else {
                        self.eval(right, env).await
                    }
                }
                Expr::Conditional {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.eval(cond, env).await?.truthy() {
                        self.eval(then, env).await
                    } else {
                        self.eval(otherwise, env).await
                    }
                }
                Expr::Await(inner, _) => match self.eval(inner, env).await? {
                    Value::Promise(promise) => promise.settle().await,
                    other => Ok(other),
                },
            }
        }
        .boxed_local()
    }

    async fn eval_call(
        &self,
        callee: &Expr,
        args: &[Expr],
        env: &Rc<Env>,
        pos: Position,
    ) -> Result<Value> {
        // Method calls on built-in receivers are dispatched here so that
        // callbacks can be invoked asynchronously.
        let (receiver, function) = match callee {
            Expr::Member {
                object, property, ..
            } => {
                let receiver = self.eval(object, env).await?;
                let function = read_property(&receiver, property, pos)?;
                if function.is_nullish() {
                    let args = self.eval_args(args, env).await?;
                    return self.call_builtin_method(&receiver, property, args, pos).await;
                }
                (Some(receiver), function)
            }
            other => (None, self.eval(other, env).await?),
        };
        let args = self.eval_args(args, env).await?;
        match function {
            Value::Function(_) | Value::Native(_) => self.call_value(&function, args, pos).await,
            other => {
                let described = match (receiver, callee) {
                    (Some(_), Expr::Member { property, .. }) => format!(".{}", property),
                    _ => other.to_string(),
                };
                Err(error_at(pos, format!("{} is not a function", described)))
            }
        }
    }

    async fn eval_args(&self, args: &[Expr], env: &Rc<Env>) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, env).await?);
        }
        Ok(values)
    }

    /// Call a function value.
    pub async fn call_value(&self, function: &Value, args: Vec<Value>, pos: Position) -> Result<Value> {
        match function {
            Value::Function(closure) => self.call_closure(closure, args).await,
            Value::Native(native) => native.call(&args).map_err(|e| match e {
                Error::Runtime(message) => error_at(pos, message),
                other => other,
            }),
            other => Err(error_at(pos, format!("{} is not a function", other))),
        }
    }

    async fn call_closure(&self, closure: &Closure, args: Vec<Value>) -> Result<Value> {
        let _guard = DepthGuard::enter(
            &self.limits.call_depth,
            MAX_CALL_DEPTH,
            "maximum call depth exceeded",
        )?;

        let scope = Env::child(&closure.env);
        let mut args = args.into_iter();
        for param in &closure.def.params {
            scope.declare(param.clone(), args.next().unwrap_or_default());
        }
        match &closure.def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &scope).await,
            FunctionBody::Block(stmts) => match self.exec_block(stmts, &scope).await? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::Undefined),
            },
        }
    }

    async fn call_builtin_method(
        &self,
        receiver: &Value,
        method: &str,
        args: Vec<Value>,
        pos: Position,
    ) -> Result<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        match receiver {
            Value::Array(items) => {
                let snapshot = || items.borrow().clone();
                match method {
                    "push" => {
                        let mut items = items.borrow_mut();
                        items.extend(args.iter().cloned());
                        Ok(Value::Number(items.len() as f64))
                    }
                    "pop" => Ok(items.borrow_mut().pop().unwrap_or_default()),
                    "join" => {
                        let sep = match arg(0) {
                            Value::Undefined => ",".to_string(),
                            other => other.to_display_string(),
                        };
                        Ok(Value::from(
                            snapshot()
                                .iter()
                                .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                                .collect::<Vec<_>>()
                                .join(&sep),
                        ))
                    }
                    "includes" => Ok(Value::Bool(
                        snapshot().iter().any(|v| v.same_value(&arg(0))),
                    )),
                    "indexOf" => Ok(Value::Number(
                        snapshot()
                            .iter()
                            .position(|v| v.strict_equals(&arg(0)))
                            .map_or(-1.0, |i| i as f64),
                    )),
                    "slice" => {
                        let all = snapshot();
                        let (start, end) = slice_bounds(all.len(), &arg(0), &arg(1));
                        Ok(Value::array(all[start..end].to_vec()))
                    }
                    "concat" => {
                        let mut all = snapshot();
                        for extra in &args {
                            match extra {
                                Value::Array(more) => all.extend(more.borrow().iter().cloned()),
                                other => all.push(other.clone()),
                            }
                        }
                        Ok(Value::array(all))
                    }
                    "map" | "filter" | "forEach" | "find" | "some" | "every" => {
                        let callback = arg(0);
                        let mut mapped = Vec::new();
                        for (i, item) in snapshot().into_iter().enumerate() {
                            let result = self
                                .call_value(&callback, vec![item.clone(), Value::Number(i as f64)], pos)
                                .await?;
                            match method {
                                "map" => mapped.push(result),
                                "filter" if result.truthy() => mapped.push(item),
                                "find" if result.truthy() => return Ok(item),
                                "some" if result.truthy() => return Ok(Value::Bool(true)),
                                "every" if !result.truthy() => return Ok(Value::Bool(false)),
                                _ => {}
                            }
                        }
                        Ok(match method {
                            "map" | "filter" => Value::array(mapped),
                            "some" => Value::Bool(false),
                            "every" => Value::Bool(true),
                            _ => Value::Undefined,
                        })
                    }
                    "reduce" => {
                        let callback = arg(0);
                        let mut items = snapshot().into_iter().enumerate();
                        let mut acc = match args.get(1) {
                            Some(initial) => initial.clone(),
                            None => match items.next() {
                                Some((_, first)) => first,
                                None => {
                                    return Err(error_at(pos, "reduce of empty array with no initial value"));
                                }
                            },
                        };
                        for (i, item) in items {
                            acc = self
                                .call_value(&callback, vec![acc, item, Value::Number(i as f64)], pos)
                                .await?;
                        }
                        Ok(acc)
                    }
                    _ => Err(error_at(pos, format!(".{} is not a function", method))),
                }
            }
            Value::String(s) => match method {
                "toUpperCase" => Ok(Value::from(s.to_uppercase())),
                "toLowerCase" => Ok(Value::from(s.to_lowercase())),
                "trim" => Ok(Value::from(s.trim())),
                "includes" => Ok(Value::Bool(s.contains(&*arg(0).to_display_string()))),
                "startsWith" => Ok(Value::Bool(s.starts_with(&*arg(0).to_display_string()))),
                "endsWith" => Ok(Value::Bool(s.ends_with(&*arg(0).to_display_string()))),
                "split" => {
                    let sep = arg(0).to_display_string();
                    let parts: Vec<Value> = if sep.is_empty() {
                        s.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::from).collect()
                    };
                    Ok(Value::array(parts))
                }
                "repeat" => {
                    let count = arg(0).to_number();
                    if !(0.0..=1e6).contains(&count) {
                        return Err(error_at(pos, "invalid repeat count"));
                    }
                    Ok(Value::from(s.repeat(count as usize)))
                }
                "slice" => {
                    let chars: Vec<char> = s.chars().collect();
                    let (start, end) = slice_bounds(chars.len(), &arg(0), &arg(1));
                    Ok(Value::from(chars[start..end].iter().collect::<String>()))
                }
                _ => Err(error_at(pos, format!(".{} is not a function", method))),
            },
            Value::Number(n) => match method {
                "toFixed" => {
                    let digits = arg(0).to_number();
                    let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 20.0) as usize };
                    Ok(Value::from(format!("{:.*}", digits, n)))
                }
                "toString" => Ok(Value::from(format_number(*n))),
                _ => Err(error_at(pos, format!(".{} is not a function", method))),
            },
            other => Err(error_at(
                pos,
                format!(".{} is not a function on {}", method, other.type_of()),
            )),
        }
    }
}

fn read_property(object: &Value, key: &str, pos: Position) -> Result<Value> {
    if object.is_nullish() {
        return Err(error_at(
            pos,
            format!("cannot read property '{}' of {}", key, object),
        ));
    }
    Ok(object.get(key))
}

fn property_key(value: &Value) -> String {
    match value {
        Value::Number(n) => format_number(*n),
        other => other.to_display_string(),
    }
}

/// Resolve JS-style `slice(start, end)` arguments against `len`.
fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    let resolve = |value: &Value, default: usize| -> usize {
        if value.is_nullish() {
            return default;
        }
        let n = value.to_number();
        if n.is_nan() {
            return 0;
        }
        let n = n.trunc();
        if n < 0.0 {
            (len as f64 + n).max(0.0) as usize
        } else {
            (n as usize).min(len)
        }
    };
    let start = resolve(start, 0);
    let end = resolve(end, len);
    (start, end.max(start))
}

fn binary(op: BinaryOp, left: &Value, right: &Value, pos: Position) -> Result<Value> {
    let num = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
    Ok(match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::String(_), _) | (_, Value::String(_)) => Value::from(format!(
                "{}{}",
                left.to_display_string(),
                right.to_display_string()
            )),
            (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
                Value::from(format!(
                    "{}{}",
                    left.to_display_string(),
                    right.to_display_string()
                ))
            }
            _ => num(|a, b| a + b),
        },
        BinaryOp::Sub => num(|a, b| a - b),
        BinaryOp::Mul => num(|a, b| a * b),
        BinaryOp::Div => num(|a, b| a / b),
        BinaryOp::Rem => num(|a, b| a % b),
        BinaryOp::Pow => num(f64::powf),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Ge => ordering.is_ge(),
                _ => return Err(error_at(pos, "invalid comparison")),
            })
        }
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_equals(right)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;

    fn run(source: &str) -> Result<Rc<Env>> {
        let program = parse_program(source)?;
        let env = Env::root();
        env.declare("exports", Value::object());
        futures::executor::block_on(Interpreter::new(10_000).run_program(&program, &env))?;
        Ok(env)
    }

    fn exports(source: &str) -> Value {
        run(source).unwrap().lookup("exports").unwrap()
    }

    #[test]
    fn test_sum_cell() {
        let out = exports("let x=4;let y=6;let sum=x+y;exports.sum=sum;exports.default=sum;");
        assert_eq!(out.get("sum"), Value::Number(10.0));
        assert_eq!(out.get("default"), Value::Number(10.0));
    }

    #[test]
    fn test_functions_and_closures() {
        let out = exports(
            "const add = (a) => (b) => a + b; const inc = add(1); function twice(f, x) { return f(f(x)); } exports.v = twice(inc, 5);",
        );
        assert_eq!(out.get("v"), Value::Number(7.0));
    }

    #[test]
    fn test_loops_and_compound_assignment() {
        let out = exports("let t = 0; for (let i = 1; i <= 4; i += 1) { t += i; } let w = 3; while (w > 0) { w -= 1; } exports.t = t; exports.w = w;");
        assert_eq!(out.get("t"), Value::Number(10.0));
        assert_eq!(out.get("w"), Value::Number(0.0));
    }

    #[test]
    fn test_array_methods() {
        let out = exports(
            "const xs = [1, 2, 3, 4]; exports.m = xs.map(x => x * 2).filter(x => x > 4).join('-'); exports.r = xs.reduce((a, b) => a + b, 0); exports.n = xs.length;",
        );
        assert_eq!(out.get("m"), Value::from("6-8"));
        assert_eq!(out.get("r"), Value::Number(10.0));
        assert_eq!(out.get("n"), Value::Number(4.0));
    }

    #[test]
    fn test_string_concat_and_methods() {
        let out = exports("exports.s = ('a' + 1 + 2).toUpperCase(); exports.n = 1 + 2 + 'x';");
        assert_eq!(out.get("s"), Value::from("A12"));
        assert_eq!(out.get("n"), Value::from("3x"));
    }

    #[test]
    fn test_logical_operators() {
        let out = exports("exports.a = null ?? 5; exports.b = 0 || 'x'; exports.c = 1 && 2; exports.d = 0 ?? 9;");
        assert_eq!(out.get("a"), Value::Number(5.0));
        assert_eq!(out.get("b"), Value::from("x"));
        assert_eq!(out.get("c"), Value::Number(2.0));
        assert_eq!(out.get("d"), Value::Number(0.0));
    }

    #[test]
    fn test_undefined_variable_is_runtime_error() {
        let err = run("exports.x = missing + 1;").unwrap_err();
        assert!(matches!(err, Error::Runtime(message) if message.contains("'missing' is not defined")));
    }

    #[test]
    fn test_reading_property_of_undefined() {
        let err = run("let o; exports.x = o.y;").unwrap_err();
        assert!(matches!(err, Error::Runtime(message) if message.contains("cannot read property 'y'")));
    }

    #[test]
    fn test_runaway_loop_is_stopped() {
        let err = run("while (true) {}").unwrap_err();
        assert!(matches!(err, Error::Runtime(message) if message.contains("loop exceeded")));
    }

    #[test]
    fn test_unbounded_recursion_is_stopped() {
        let err = run("const f = (n) => f(n + 1); f(0);").unwrap_err();
        assert!(matches!(err, Error::Runtime(message) if message.contains("call depth")));
    }

    #[test]
    fn test_deep_evaluation_is_stopped() {
        let source = "const f = (n) => n === 0 ? 0 : 1 + f(n - 1); exports.v = f(COUNT);";

        let out = exports(&source.replace("COUNT", "50"));
        assert_eq!(out.get("v"), Value::Number(50.0));

        let err = run(&source.replace("COUNT", "150")).unwrap_err();
        assert!(matches!(err, Error::Runtime(message) if message.contains("nested too deeply")));
    }

    #[test]
    fn test_block_scoping() {
        let out = exports("let x = 1; { let x = 2; exports.inner = x; } exports.outer = x;");
        assert_eq!(out.get("inner"), Value::Number(2.0));
        assert_eq!(out.get("outer"), Value::Number(1.0));
    }

    #[test]
    fn test_await_non_promise_passes_through() {
        let out = exports("exports.v = await 3;");
        assert_eq!(out.get("v"), Value::Number(3.0));
    }
}

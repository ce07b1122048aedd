//! Execution substrate for cell code.
//!
//! The evaluator only talks to [`CellCompiler`] and [`ModuleBody`]; the
//! default implementation, [`ScriptCompiler`], runs `cellscript`, a small
//! JavaScript-like language whose module syntax is lowered onto a fixed
//! ABI: the body receives `$`, `exports`, `require` and `hooks` and
//! populates `exports`.

mod ast;
mod builtins;
mod interpreter;
mod lexer;
mod parser;
mod value;

use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::error::Result;

pub use value::{HostObject, NativeFunction, Promise, PropertyMap, Value};

use interpreter::{Env, Interpreter};
use parser::parse_program;

/// Language identifier of the built-in compiler.
pub const LANGUAGE: &str = "cellscript";

/// Bindings injected into a module body for one run.
pub struct Bindings {
    /// Path of the model being run; tags log output.
    pub model: String,
    /// The `$` view onto the reactive context.
    pub context: Value,
    /// Object the body populates with its exports.
    pub exports: Value,
    /// `require(name)`, returning a promise of the module value.
    pub require: Value,
    /// The `hooks` object.
    pub hooks: Value,
}

/// A compiled cell, ready to be run any number of times.
pub trait ModuleBody {
    /// Module names the source imports statically.
    fn imports(&self) -> &[String];

    fn run(&self, bindings: Bindings) -> LocalBoxFuture<'static, Result<()>>;
}

/// Turns cell source text into a [`ModuleBody`].
pub trait CellCompiler {
    fn compile(&self, source: &str) -> Result<Rc<dyn ModuleBody>>;
}

/// The `cellscript` compiler.
#[derive(Debug, Clone)]
pub struct ScriptCompiler {
    max_loop_iterations: u64,
}

impl ScriptCompiler {
    pub fn new(max_loop_iterations: u64) -> Self {
        Self {
            max_loop_iterations,
        }
    }
}

impl CellCompiler for ScriptCompiler {
    fn compile(&self, source: &str) -> Result<Rc<dyn ModuleBody>> {
        let program = parse_program(source)?;
        Ok(Rc::new(CompiledScript {
            program: Rc::new(program),
            max_loop_iterations: self.max_loop_iterations,
        }))
    }
}

struct CompiledScript {
    program: Rc<ast::Program>,
    max_loop_iterations: u64,
}

impl ModuleBody for CompiledScript {
    fn imports(&self) -> &[String] {
        &self.program.imports
    }

    fn run(&self, bindings: Bindings) -> LocalBoxFuture<'static, Result<()>> {
        let program = self.program.clone();
        // Each run gets fresh limits so an earlier run's call depth never leaks.
        let interpreter = Interpreter::new(self.max_loop_iterations);
        Box::pin(async move {
            let env = Env::root();
            builtins::install(&env, &bindings.model);
            env.declare("$", bindings.context);
            env.declare("exports", bindings.exports);
            env.declare("require", bindings.require);
            env.declare("hooks", bindings.hooks);
            interpreter.run_program(&program, &env).await
        })
    }
}

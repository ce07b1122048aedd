//! Events the engine publishes.

use std::fmt;

use serde_json::json;

use crate::error::Result;
use crate::model::ModelRef;
use crate::script::Value;

/// Result of one completed evaluation.
#[derive(Clone)]
pub struct OutputEvent {
    pub model: ModelRef,
    /// Generation of the run that produced it.
    pub generation: u64,
    /// The exports object, or the error the run ended with.
    pub output: Result<Value>,
}

impl OutputEvent {
    pub fn path(&self) -> &str {
        self.model.path()
    }

    pub fn is_error(&self) -> bool {
        self.output.is_err()
    }

    /// JSON form used by the CLI: `{"model", "generation", "output" | "error"}`.
    pub fn to_json(&self) -> serde_json::Value {
        match &self.output {
            Ok(value) => json!({
                "model": self.path(),
                "generation": self.generation,
                "output": value.to_json(),
            }),
            Err(error) => json!({
                "model": self.path(),
                "generation": self.generation,
                "error": error.to_string(),
            }),
        }
    }
}

impl fmt::Debug for OutputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputEvent")
            .field("model", &self.path())
            .field("generation", &self.generation)
            .field("output", &self.output)
            .finish()
    }
}

/// Fired right before a model's code runs.
#[derive(Clone)]
pub struct ExecutionEvent {
    pub model: ModelRef,
    pub generation: u64,
}

impl ExecutionEvent {
    pub fn path(&self) -> &str {
        self.model.path()
    }
}

impl fmt::Debug for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEvent")
            .field("model", &self.path())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::TextModel;
    use std::rc::Rc;

    #[test]
    fn test_json_shapes() {
        let model: ModelRef = Rc::new(TextModel::new("a.cell", "cellscript", ""));
        let ok = OutputEvent {
            model: model.clone(),
            generation: 1,
            output: Ok(Value::object_from([("sum", Value::Number(10.0))])),
        };
        assert_eq!(
            ok.to_json(),
            json!({"model": "a.cell", "generation": 1, "output": {"sum": 10}})
        );

        let err = OutputEvent {
            model,
            generation: 2,
            output: Err(Error::ModuleNotFound("x".into())),
        };
        assert!(err.is_error());
        assert_eq!(err.to_json()["error"], "module not found: x");
    }
}

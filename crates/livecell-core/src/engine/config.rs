//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::script::LANGUAGE;

/// Configuration for a [`ReactiveEngine`](super::ReactiveEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Language models must declare to be accepted.
    pub language: String,

    /// Quiet period after a text edit before the model is re-evaluated.
    #[serde(with = "millis")]
    pub debounce: Duration,

    /// Iterations a single loop may run before the cell is aborted.
    pub max_loop_iterations: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            language: LANGUAGE.to_string(),
            debounce: Duration::from_millis(100),
            max_loop_iterations: 1_000_000,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_max_loop_iterations(mut self, max: u64) -> Self {
        self.max_loop_iterations = max;
        self
    }
}

/// `Duration` as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.language, "cellscript");
        assert_eq!(config.debounce, Duration::from_millis(100));
        assert_eq!(config.max_loop_iterations, 1_000_000);
    }

    #[test]
    fn test_serde_uses_millis_and_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"debounce": 250}"#).unwrap();
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.language, "cellscript");

        let json = serde_json::to_value(EngineConfig::new().with_debounce(Duration::from_millis(5))).unwrap();
        assert_eq!(json["debounce"], 5);
    }
}

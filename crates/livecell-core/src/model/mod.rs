//! Code models: the units of source text the engine evaluates.
//!
//! The engine never owns model storage. Anything that can hand out the
//! current text plus change and dispose notifications can be registered;
//! [`TextModel`] and [`ModelStore`] are the in-memory implementations used by
//! the CLI and the tests.

mod store;
mod text;

use std::path::Path;
use std::rc::Rc;

use crate::event::Event;

pub use store::{ModelProvider, ModelStore};
pub use text::TextModel;

/// A unit of cell source text.
pub trait CodeModel {
    /// Stable identifier. Its file stem is the model's export key.
    fn path(&self) -> &str;

    fn language(&self) -> &str;

    /// Current source text.
    fn value(&self) -> String;

    /// Fires whenever the text may have changed.
    fn on_did_change_content(&self) -> Event<()>;

    /// Fires exactly once, when the model goes away.
    fn on_will_dispose(&self) -> Event<()>;
}

/// Shared handle to a model.
pub type ModelRef = Rc<dyn CodeModel>;

/// The context key a model's default export is published under: the file
/// stem of its path (`cells/sum.cell` → `sum`).
pub fn export_key(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_key() {
        assert_eq!(export_key("cells/sum.cell"), "sum");
        assert_eq!(export_key("model1"), "model1");
        assert_eq!(export_key("a.b.cell"), "a.b");
    }
}

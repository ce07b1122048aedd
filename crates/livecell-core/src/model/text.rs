use std::cell::{Cell, RefCell};

use crate::error::{Error, Result};
use crate::event::{Emitter, Event};

use super::CodeModel;

/// In-memory text buffer.
pub struct TextModel {
    path: String,
    language: String,
    value: RefCell<String>,
    on_change: Emitter<()>,
    on_dispose: Emitter<()>,
    disposed: Cell<bool>,
}

impl TextModel {
    pub fn new(path: impl Into<String>, language: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language: language.into(),
            value: RefCell::new(value.into()),
            on_change: Emitter::new(),
            on_dispose: Emitter::new(),
            disposed: Cell::new(false),
        }
    }

    /// Replace the text and notify listeners.
    ///
    /// The change event fires even if the text is unchanged; upstream
    /// plumbing is noisy and consumers are expected to compare.
    pub fn set_value(&self, value: impl Into<String>) {
        *self.value.borrow_mut() = value.into();
        self.on_change.fire(&());
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Fire will-dispose. A second call fails.
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.replace(true) {
            return Err(Error::AlreadyDisposed("model"));
        }
        self.on_dispose.fire(&());
        self.on_change.clear();
        self.on_dispose.clear();
        Ok(())
    }
}

impl CodeModel for TextModel {
    fn path(&self) -> &str {
        &self.path
    }

    fn language(&self) -> &str {
        &self.language
    }

    fn value(&self) -> String {
        self.value.borrow().clone()
    }

    fn on_did_change_content(&self) -> Event<()> {
        self.on_change.event()
    }

    fn on_will_dispose(&self) -> Event<()> {
        self.on_dispose.event()
    }
}

impl std::fmt::Debug for TextModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextModel")
            .field("path", &self.path)
            .field("language", &self.language)
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_set_value_always_notifies() {
        let model = TextModel::new("a.cell", "cellscript", "x");
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let _sub = model.on_did_change_content().subscribe(move |_| c.set(c.get() + 1));
        model.set_value("y");
        model.set_value("y");
        assert_eq!(count.get(), 2);
        assert_eq!(model.value(), "y");
    }

    #[test]
    fn test_dispose_fires_once() {
        let model = TextModel::new("a.cell", "cellscript", "");
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let _sub = model.on_will_dispose().subscribe(move |_| c.set(c.get() + 1));
        model.dispose().unwrap();
        assert_eq!(model.dispose(), Err(Error::AlreadyDisposed("model")));
        assert_eq!(count.get(), 1);
    }
}

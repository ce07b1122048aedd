use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::event::{Emitter, Event};

use super::{CodeModel, ModelRef, TextModel};

/// A source of models: the ones that exist now plus a stream of new ones.
pub trait ModelProvider {
    fn models(&self) -> Vec<ModelRef>;

    fn on_did_create_model(&self) -> Event<ModelRef>;
}

/// In-memory [`ModelProvider`] keyed by path.
#[derive(Default)]
pub struct ModelStore {
    models: RefCell<Vec<Rc<TextModel>>>,
    on_create: Emitter<ModelRef>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a model and announce it. An existing model with the same path
    /// has its text replaced instead.
    pub fn create_model(
        &self,
        path: impl Into<String>,
        language: impl Into<String>,
        value: impl Into<String>,
    ) -> Rc<TextModel> {
        let path = path.into();
        if let Some(existing) = self.get(&path) {
            existing.set_value(value);
            return existing;
        }
        let model = Rc::new(TextModel::new(path, language, value));
        self.models.borrow_mut().push(model.clone());
        let shared: ModelRef = model.clone();
        self.on_create.fire(&shared);
        model
    }

    pub fn get(&self, path: &str) -> Option<Rc<TextModel>> {
        self.models
            .borrow()
            .iter()
            .find(|m| m.path() == path)
            .cloned()
    }

    /// Remove and dispose the model at `path`.
    pub fn remove(&self, path: &str) -> Result<Option<Rc<TextModel>>> {
        let removed = {
            let mut models = self.models.borrow_mut();
            models
                .iter()
                .position(|m| m.path() == path)
                .map(|idx| models.remove(idx))
        };
        if let Some(model) = &removed {
            model.dispose()?;
        }
        Ok(removed)
    }

    pub fn paths(&self) -> Vec<String> {
        self.models
            .borrow()
            .iter()
            .map(|m| m.path().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.borrow().is_empty()
    }
}

impl ModelProvider for ModelStore {
    fn models(&self) -> Vec<ModelRef> {
        self.models
            .borrow()
            .iter()
            .map(|m| m.clone() as ModelRef)
            .collect()
    }

    fn on_did_create_model(&self) -> Event<ModelRef> {
        self.on_create.event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_create_announces_model() {
        let store = ModelStore::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = store
            .on_did_create_model()
            .subscribe(move |m| s.borrow_mut().push(m.path().to_string()));
        store.create_model("a.cell", "cellscript", "1");
        store.create_model("b.cell", "cellscript", "2");
        assert_eq!(*seen.borrow(), vec!["a.cell", "b.cell"]);
        assert_eq!(store.models().len(), 2);
    }

    #[test]
    fn test_create_existing_path_updates_text() {
        let store = ModelStore::new();
        let first = store.create_model("a.cell", "cellscript", "1");
        let second = store.create_model("a.cell", "cellscript", "2");
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.value(), "2");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_disposes() {
        let store = ModelStore::new();
        let model = store.create_model("a.cell", "cellscript", "");
        let disposed = Rc::new(Cell::new(false));
        let d = disposed.clone();
        let _sub = model.on_will_dispose().subscribe(move |_| d.set(true));
        assert!(store.remove("a.cell").unwrap().is_some());
        assert!(disposed.get());
        assert!(store.get("a.cell").is_none());
        assert!(store.remove("a.cell").unwrap().is_none());
    }
}

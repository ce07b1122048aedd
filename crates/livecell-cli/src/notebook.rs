//! A notebook on disk: a directory of `.cell` files, one model each.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use livecell_core::ModelStore;

/// Extension of cell files.
pub const CELL_EXTENSION: &str = "cell";

/// Cell files of a directory, loaded into a [`ModelStore`].
///
/// Models are named by file name, so `sum.cell` publishes its default
/// export as `$.sum`.
pub struct Notebook {
    dir: PathBuf,
    language: String,
    store: ModelStore,
}

impl Notebook {
    /// Load every `.cell` file in `dir`, in file name order.
    pub fn load(dir: impl AsRef<Path>, language: &str) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            anyhow::bail!("Notebook directory not found: {}", dir.display());
        }
        let notebook = Self {
            dir: dir.canonicalize()?,
            language: language.to_string(),
            store: ModelStore::new(),
        };

        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_cell_file(path))
            .collect();
        files.sort();

        for path in files {
            notebook.load_file(&path)?;
        }
        Ok(notebook)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Create or update the model for `path` from disk.
    pub fn load_file(&self, path: &Path) -> anyhow::Result<()> {
        let Some(name) = model_name(path) else {
            return Ok(());
        };
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cell {}", path.display()))?;
        self.store.create_model(name, self.language.as_str(), source);
        Ok(())
    }

    /// Dispose the model for a deleted file. Returns whether one existed.
    pub fn remove_file(&self, path: &Path) -> anyhow::Result<bool> {
        let Some(name) = model_name(path) else {
            return Ok(false);
        };
        Ok(self.store.remove(&name)?.is_some())
    }
}

pub fn is_cell_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == CELL_EXTENSION)
}

fn model_name(path: &Path) -> Option<String> {
    if !is_cell_file(path) {
        return None;
    }
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecell_core::{CodeModel, ModelProvider};
    use tempfile::TempDir;

    #[test]
    fn test_load_only_cell_files_in_order() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("b.cell"), "exports.b = 2;").unwrap();
        fs::write(temp.path().join("a.cell"), "exports.a = 1;").unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let notebook = Notebook::load(temp.path(), "cellscript").unwrap();
        assert_eq!(notebook.store().paths(), vec!["a.cell", "b.cell"]);
        let models = notebook.store().models();
        assert_eq!(models[0].language(), "cellscript");
        assert_eq!(models[1].value(), "exports.b = 2;");
    }

    #[test]
    fn test_load_file_updates_existing_model() {
        let temp = TempDir::new().unwrap();
        let cell = temp.path().join("a.cell");
        fs::write(&cell, "exports.a = 1;").unwrap();
        let notebook = Notebook::load(temp.path(), "cellscript").unwrap();

        fs::write(&cell, "exports.a = 2;").unwrap();
        notebook.load_file(&cell).unwrap();
        assert_eq!(notebook.store().get("a.cell").unwrap().value(), "exports.a = 2;");

        assert!(notebook.remove_file(&cell).unwrap());
        assert!(notebook.is_empty());
    }

    #[test]
    fn test_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        assert!(Notebook::load(temp.path().join("nope"), "cellscript").is_err());
    }
}

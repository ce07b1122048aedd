//! Watch command: keep the notebook live and print outputs as they arrive.

use std::time::Duration;

use livecell_core::{EngineConfig, OutputEvent, ReactiveEngine};

use crate::colors;
use crate::notebook::Notebook;
use crate::output::print_event;
use crate::watcher::{FileEvent, FileWatcher};

/// Delay used to coalesce file system events before they reach the models.
const FILE_EVENT_DELAY: Duration = Duration::from_millis(50);

/// Execute the watch command.
pub async fn execute(dir: &str, config: EngineConfig, json: bool) -> anyhow::Result<()> {
    let notebook = Notebook::load(dir, &config.language)?;

    if !json {
        println!(
            "\n{}Livecell{} - Watching {}{}{}",
            colors::BOLD,
            colors::RESET,
            colors::CYAN,
            notebook.dir().display(),
            colors::RESET
        );
        println!("{}Press Ctrl+C to stop{}\n", colors::DIM, colors::RESET);
    }

    let mut watcher = FileWatcher::new(notebook.dir(), FILE_EVENT_DELAY)?;
    let engine = ReactiveEngine::new(config);
    let _output = engine
        .on_output()
        .subscribe(move |event: &OutputEvent| print_event(event, json));
    engine.register_model_provider(notebook.store())?;

    loop {
        tokio::select! {
            event = watcher.recv() => {
                let Some(event) = event else {
                    break;
                };
                if let Err(error) = apply(&notebook, &event) {
                    tracing::warn!(?event, %error, "failed to apply file change");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    engine.dispose()?;
    if !json {
        println!("\n{}Stopped{}", colors::DIM, colors::RESET);
    }
    Ok(())
}

fn apply(notebook: &Notebook, event: &FileEvent) -> anyhow::Result<()> {
    match event {
        FileEvent::Modified(path) => {
            tracing::debug!(path = %path.display(), "cell file modified");
            notebook.load_file(path)
        }
        FileEvent::Removed(path) => {
            tracing::debug!(path = %path.display(), "cell file removed");
            notebook.remove_file(path).map(|_| ())
        }
    }
}

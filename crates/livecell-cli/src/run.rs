//! Run command: evaluate every cell once and print the results.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use livecell_core::{EngineConfig, OutputEvent, ReactiveEngine};

use crate::colors;
use crate::notebook::Notebook;
use crate::output::print_event;

/// Execute the run command.
pub async fn execute(dir: &str, config: EngineConfig, json: bool) -> anyhow::Result<()> {
    let notebook = Notebook::load(dir, &config.language)?;

    if notebook.is_empty() {
        if !json {
            println!("No cells found in {}", notebook.dir().display());
        }
        return Ok(());
    }

    if !json {
        println!(
            "\n{}Livecell{} - Running {}{}{}\n",
            colors::BOLD,
            colors::RESET,
            colors::CYAN,
            notebook.dir().display(),
            colors::RESET
        );
    }

    let engine = ReactiveEngine::new(config);

    // Only the last output of each model is reported.
    let latest: Rc<RefCell<BTreeMap<String, OutputEvent>>> = Rc::default();
    let sink = latest.clone();
    let subscription = engine.on_output().subscribe(move |event: &OutputEvent| {
        sink.borrow_mut()
            .insert(event.path().to_string(), event.clone());
    });

    engine.register_model_provider(notebook.store())?;
    engine.idle().await;

    subscription.dispose();
    engine.dispose()?;

    let latest = latest.take();
    let failed = latest.values().filter(|event| event.is_error()).count();
    for event in latest.values() {
        print_event(event, json);
    }

    if !json {
        println!("\n{}", "─".repeat(40));
        if failed == 0 {
            println!(
                "{}✓{} {} cells evaluated",
                colors::GREEN,
                colors::RESET,
                latest.len()
            );
        } else {
            println!(
                "{}!{} {} of {} cells failed",
                colors::YELLOW,
                colors::RESET,
                failed,
                latest.len()
            );
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} cell(s) failed");
    }
    Ok(())
}

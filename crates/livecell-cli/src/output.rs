//! Printing of evaluation outputs.

use livecell_core::OutputEvent;

use crate::colors;

/// Print one output, either as a JSON line or as a colored summary line.
pub fn print_event(event: &OutputEvent, json: bool) {
    if json {
        println!("{}", event.to_json());
        return;
    }
    match &event.output {
        Ok(exports) => println!(
            "{}✓{} {}{}{} {}",
            colors::GREEN,
            colors::RESET,
            colors::BOLD,
            event.path(),
            colors::RESET,
            exports
        ),
        Err(error) => println!(
            "{}✗{} {}{}{} {}{}{}",
            colors::RED,
            colors::RESET,
            colors::BOLD,
            event.path(),
            colors::RESET,
            colors::RED,
            error,
            colors::RESET
        ),
    }
}

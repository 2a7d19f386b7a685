//! Status spinner and confirmation prompts.
//!
//! Spinners only render when stderr is a terminal and the output mode is
//! interactive; otherwise status lines are printed as plain text.

use std::time::Duration;

use console::Term;
use dockhand::repair::RepairIo;
use dockhand::types::OutputMode;
use indicatif::{ProgressBar, ProgressStyle};

/// Whether stderr is connected to a terminal.
pub fn is_tty() -> bool {
    Term::stderr().is_term()
}

/// A spinner for one long-running step.
pub struct Spinner {
    bar: Option<ProgressBar>,
    message: String,
    quiet: bool,
}

impl Spinner {
    pub fn start(mode: OutputMode, message: &str) -> Self {
        let bar = (mode == OutputMode::Interactive && is_tty()).then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner} {msg} ({elapsed})")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message(message.to_string());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });
        let quiet = mode == OutputMode::Json;
        if bar.is_none() && !quiet {
            eprintln!("[status] {message}...");
        }
        Self {
            bar,
            message: message.to_string(),
            quiet,
        }
    }

    pub fn finish(self, success: bool) {
        let outcome = if success { "done" } else { "failed" };
        match self.bar {
            Some(pb) => pb.finish_with_message(format!("{} {outcome}", self.message)),
            None if !self.quiet => eprintln!("[status] {} {outcome}", self.message),
            None => {}
        }
    }
}

/// Ask a yes/no question on the terminal. An empty answer takes `default`.
pub fn confirm(prompt: &str, default: bool) -> bool {
    let term = Term::stderr();
    if term.write_str(&format!("{prompt} ")).is_err() {
        return default;
    }
    match term.read_line() {
        Ok(answer) => parse_answer(&answer, default),
        Err(_) => default,
    }
}

fn parse_answer(answer: &str, default: bool) -> bool {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}

/// [`RepairIo`] backed by the terminal.
pub struct TerminalIo {
    mode: OutputMode,
    spinner: Option<Spinner>,
}

impl TerminalIo {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode, spinner: None }
    }
}

impl RepairIo for TerminalIo {
    fn confirm(&mut self, prompt: &str) -> bool {
        confirm(prompt, true)
    }

    fn start_status(&mut self, message: &str) {
        self.spinner = Some(Spinner::start(self.mode, message));
    }

    fn finish_status(&mut self, success: bool) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish(success);
        }
    }
}

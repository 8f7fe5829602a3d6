use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunPlan, RunSummary};
use crate::merge::MergeOutcome;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_plan(plan: &RunPlan) -> io::Result<()> {
        Self::print_json(plan)
    }

    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

const BAR_TEMPLATE: &str = "{prefix:>5} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Phase lines and a progress bar on stderr, coloured summary on stdout.
#[derive(Default)]
pub struct TextOutput {
    bar: Mutex<Option<ProgressBar>>,
}

impl TextOutput {
    fn current(&self) -> Option<ProgressBar> {
        self.bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        let line = match event.elapsed {
            Some(elapsed) => format!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => event.message,
        };
        match self.current() {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    fn begin(&self, phase: &str, total: usize) {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(phase.to_string());
        *self.bar.lock().unwrap_or_else(PoisonError::into_inner) = Some(bar);
    }

    fn step(&self, detail: &str) {
        if let Some(bar) = self.current() {
            bar.set_message(detail.to_string());
            bar.inc(1);
        }
    }

    fn end(&self) {
        let finished = self.bar.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(bar) = finished {
            bar.finish_and_clear();
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

impl TextOutput {
    pub fn print_plan(plan: &RunPlan) {
        println!("{CYAN}NARR fetch plan{RESET}");
        println!(
            "{GREEN}events: {}  tasks: {}  deduplicated: {}{RESET}",
            plan.events.len(),
            plan.tasks.len(),
            plan.collapsed
        );
        if !plan.skipped.is_empty() || !plan.degenerate.is_empty() {
            println!(
                "{YELLOW}skipped events: {}  degenerate tasks: {}{RESET}",
                plan.skipped.len(),
                plan.degenerate.len()
            );
        }
        for task in &plan.tasks {
            println!(
                "  {} {} -> {} ({})",
                task.variable,
                task.period,
                task.relative_path,
                task.variable.description()
            );
        }
    }

    pub fn print_summary(summary: &RunSummary) {
        let counts = &summary.counts;
        println!("{CYAN}narr-profiles {} summary{RESET}", summary.command);
        println!(
            "events: {}  skipped: {}  degenerate tasks: {}",
            counts.events, counts.skipped_events, counts.degenerate_tasks
        );
        println!(
            "{GREEN}tasks: {}  deduplicated: {}  fetched: {}  reused: {}{RESET}",
            counts.tasks, counts.deduplicated, counts.fetched, counts.reused
        );
        let failed_color = if counts.failed > 0 { RED } else { GREEN };
        println!("{failed_color}failed fetches: {}{RESET}", counts.failed);
        if !summary.profiles.is_empty() {
            println!(
                "{GREEN}merged: {}{RESET}  {YELLOW}incomplete: {}{RESET}  {RED}merge failed: {}{RESET}",
                counts.merged, counts.incomplete, counts.merge_failed
            );
        }

        for failure in &summary.failures {
            println!(
                "{RED}  x {} {}: {}{RESET}",
                failure.variable, failure.period, failure.error
            );
        }
        for report in &summary.profiles {
            match &report.outcome {
                MergeOutcome::Merged(profile) => {
                    let action = if profile.reused { "kept" } else { "merged" };
                    println!("{GREEN}  + {} {action}: {}{RESET}", report.event_id, profile.path);
                }
                MergeOutcome::Incomplete { .. } => {
                    if let Some(err) = report.outcome.error(&report.event_id) {
                        println!("{YELLOW}  ~ {err}{RESET}");
                    }
                }
                MergeOutcome::Failed { .. } => {
                    if let Some(err) = report.outcome.error(&report.event_id) {
                        println!("{RED}  x {err}{RESET}");
                    }
                }
            }
        }
        println!("manifest: {}/manifest.json", summary.output_root);
    }
}

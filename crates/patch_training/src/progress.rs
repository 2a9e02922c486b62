//! Progress reporting for train/eval passes.

use indicatif::{ProgressBar, ProgressStyle};

/// Receives one update per batch. Purely observational.
pub trait ProgressSink {
    fn report(&mut self, epoch: usize, epochs: usize, batch: usize, batches: usize, status: &str);
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _: usize, _: usize, _: usize, _: usize, _: &str) {}
}

/// Keeps every update; handy for asserting on pass behaviour.
#[derive(Debug, Default, Clone)]
pub struct RecordingProgress {
    pub updates: Vec<ProgressUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub epoch: usize,
    pub epochs: usize,
    pub batch: usize,
    pub batches: usize,
    pub status: String,
}

impl ProgressSink for RecordingProgress {
    fn report(&mut self, epoch: usize, epochs: usize, batch: usize, batches: usize, status: &str) {
        self.updates.push(ProgressUpdate {
            epoch,
            epochs,
            batch,
            batches,
            status: status.to_string(),
        });
    }
}

/// Console bar, one per pass. A new bar starts whenever batch 0 is reported.
#[derive(Default)]
pub struct ConsoleProgress {
    bar: Option<ProgressBar>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&mut self, epoch: usize, epochs: usize, batches: usize) -> ProgressBar {
        if let Some(old) = self.bar.take() {
            old.abandon();
        }
        let bar = ProgressBar::new(batches as u64);
        let style = ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.set_prefix(format!("Epoch {}/{}", epoch + 1, epochs));
        self.bar = Some(bar.clone());
        bar
    }
}

impl ProgressSink for ConsoleProgress {
    fn report(&mut self, epoch: usize, epochs: usize, batch: usize, batches: usize, status: &str) {
        let bar = match self.bar.clone() {
            Some(bar) if batch > 0 => bar,
            _ => self.start(epoch, epochs, batches),
        };
        bar.set_position(batch as u64 + 1);
        bar.set_message(status.to_string());
        if batch + 1 >= batches {
            bar.finish();
            self.bar = None;
        }
    }
}

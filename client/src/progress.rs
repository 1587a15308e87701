use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Multi-line progress display for a push or pull: one bar per in-flight
/// blob, updated from the worker that owns it.
#[derive(Clone)]
pub struct Progress {
    multi: MultiProgress,
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:>12.cyan} {spinner} {msg}")
        .expect("static progress template")
}

fn bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:>12.cyan} [{bar:30}] {bytes:>10}/{total_bytes:<10} {msg}",
    )
    .expect("static progress template")
    .progress_chars("=> ")
}

impl Progress {
    /// A visible display renders to stderr; a hidden one swallows updates
    /// (used by tests and non-interactive callers).
    pub fn new(visible: bool) -> Self {
        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self { multi }
    }

    pub fn bar(&self, name: &str, status: &str) -> TransferBar {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(name.to_string());
        bar.set_message(status.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        TransferBar { bar }
    }
}

/// One blob's bar. Workers flip its status through the transfer protocol
/// (digesting, then pushing or downloading, then a terminal status).
#[derive(Clone)]
pub struct TransferBar {
    bar: ProgressBar,
}

impl TransferBar {
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    pub fn set_name(&self, name: &str) {
        self.bar.set_prefix(name.to_string());
    }

    /// Switch to a byte-counting bar for an actual transfer.
    pub fn start_bytes(&self, name: &str, total: i64, status: &str) {
        self.bar.set_style(bytes_style());
        self.bar.set_prefix(name.to_string());
        self.bar.set_message(status.to_string());
        if total > 0 {
            self.bar.set_length(total as u64);
        }
        self.bar.set_position(0);
    }

    pub fn wrap_async_read<R: tokio::io::AsyncRead + Unpin>(
        &self,
        reader: R,
    ) -> indicatif::ProgressBarIter<R> {
        self.bar.wrap_async_read(reader)
    }

    pub fn wrap_async_write<W: tokio::io::AsyncWrite + Unpin>(
        &self,
        writer: W,
    ) -> indicatif::ProgressBarIter<W> {
        self.bar.wrap_async_write(writer)
    }

    pub fn finish(&self, status: &str) {
        self.bar.set_message(status.to_string());
        self.bar.finish();
    }

    pub fn fail(&self) {
        self.bar.set_message("failed".to_string());
        self.bar.abandon();
    }
}

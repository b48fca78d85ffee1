#![forbid(unsafe_code)]

use std::io::{self, ErrorKind};
use std::path::Path;

use crate::logs::{LogTail, render_line};

/// Rendered lines kept in memory per pane; older ones are dropped.
const MAX_LINES: usize = 5_000;

/// Rendered log of the selected job, fed incrementally on every refresh tick.
#[derive(Debug, Default)]
pub struct LogPane {
    job_id: Option<String>,
    tail: LogTail,
    lines: Vec<String>,
    scroll: usize,
    pinned_to_bottom: bool,
}

impl LogPane {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pinned_to_bottom: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Points the pane at another job, discarding what was shown.
    pub fn select(&mut self, job_id: Option<&str>) {
        if self.job_id.as_deref() == job_id {
            return;
        }
        *self = Self::new();
        self.job_id = job_id.map(str::to_owned);
    }

    /// Reads what the log gained since the last call. A missing log is not an error.
    pub fn refresh(&mut self, path: &Path) -> io::Result<()> {
        let mut file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for raw in self.tail.poll(&mut file)? {
            self.lines
                .extend(render_line(&raw).lines().map(str::to_owned));
        }
        if self.lines.len() > MAX_LINES {
            let excess = self.lines.len() - MAX_LINES;
            self.lines.drain(..excess);
            self.scroll = self.scroll.saturating_sub(excess);
        }
        Ok(())
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// First line to show in a viewport of `height` rows.
    #[must_use]
    pub fn first_visible(&self, height: usize) -> usize {
        let max = self.lines.len().saturating_sub(height);
        if self.pinned_to_bottom {
            max
        } else {
            self.scroll.min(max)
        }
    }

    pub fn scroll_by(&mut self, delta: isize, height: usize) {
        let current = self.first_visible(height);
        let max = self.lines.len().saturating_sub(height);
        let next = current.saturating_add_signed(delta).min(max);
        self.scroll = next;
        self.pinned_to_bottom = next >= max;
    }

    pub fn top(&mut self) {
        self.scroll = 0;
        self.pinned_to_bottom = false;
    }

    pub fn bottom(&mut self) {
        self.pinned_to_bottom = true;
    }
}

#![forbid(unsafe_code)]

use std::io::{self, Read, Seek, SeekFrom};
use std::time::Duration;

use tokio::time::MissedTickBehavior;

/// Upper bound on bytes consumed by a single poll.
pub const DEFAULT_MAX_CHUNK: usize = 1 << 20;

pub const FOLLOW_INTERVAL: Duration = Duration::from_millis(200);

/// Incremental line reader over a growing file.
///
/// The byte offset only moves forward past bytes that were read, so each
/// byte is delivered once. An unterminated trailing line stays buffered
/// until a later poll brings its newline. A file that became shorter than
/// the offset was replaced, and reading restarts from the beginning.
#[derive(Debug, Clone)]
pub struct LogTail {
    offset: u64,
    partial: Vec<u8>,
    max_chunk: usize,
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new()
    }
}

impl LogTail {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_chunk(DEFAULT_MAX_CHUNK)
    }

    #[must_use]
    pub fn with_max_chunk(max_chunk: usize) -> Self {
        Self {
            offset: 0,
            partial: Vec::new(),
            max_chunk: max_chunk.max(1),
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads what was appended since the last poll and returns the complete
    /// lines, without their `\n` / `\r\n` terminators.
    pub fn poll<R: Read + Seek>(&mut self, file: &mut R) -> io::Result<Vec<Vec<u8>>> {
        let len = file.seek(SeekFrom::End(0))?;
        if len < self.offset {
            tracing::debug!(len, offset = self.offset, "log shrank; rereading from start");
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let want = (len - self.offset).min(self.max_chunk as u64);
        let before = self.partial.len();
        file.by_ref().take(want).read_to_end(&mut self.partial)?;
        self.offset += (self.partial.len() - before) as u64;

        let mut lines = Vec::new();
        let mut start = 0;
        for (i, b) in self.partial.iter().enumerate() {
            if *b == b'\n' {
                let line = &self.partial[start..i];
                lines.push(line.strip_suffix(b"\r").unwrap_or(line).to_vec());
                start = i + 1;
            }
        }
        self.partial.drain(..start);
        Ok(lines)
    }

    /// Hands out a buffered unterminated line, if any.
    pub fn flush_partial(&mut self) -> Option<Vec<u8>> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}

/// Polls `file` every `interval`, passing each complete line to `emit`.
///
/// After a poll that read nothing, `keep_going` decides whether to wait for
/// more. On return any unterminated last line is flushed through `emit`.
pub async fn follow<R, E, K>(
    file: &mut R,
    tail: &mut LogTail,
    interval: Duration,
    mut emit: E,
    mut keep_going: K,
) -> io::Result<()>
where
    R: Read + Seek,
    E: FnMut(&[u8]) -> io::Result<()>,
    K: FnMut() -> bool,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let before = tail.offset();
        for line in tail.poll(file)? {
            emit(&line)?;
        }
        if tail.offset() == before && !keep_going() {
            break;
        }
    }
    // Bytes may have landed between the idle poll and the stop decision.
    loop {
        let before = tail.offset();
        for line in tail.poll(file)? {
            emit(&line)?;
        }
        if tail.offset() == before {
            break;
        }
    }
    if let Some(rest) = tail.flush_partial() {
        emit(&rest)?;
    }
    Ok(())
}

#![forbid(unsafe_code)]

//! Agent output logs: NDJSON event parsing, plain rendering and incremental tailing.

pub mod event;
pub mod render;
pub mod tail;

pub use event::{LogEvent, parse_line};
pub use render::{render_all, render_line, render_plain};
pub use tail::{FOLLOW_INTERVAL, LogTail, follow};

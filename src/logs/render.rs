#![forbid(unsafe_code)]

use std::fmt::Write as _;

use crate::logs::event::{LogEvent, parse_line};

#[must_use]
pub fn render_plain(events: &[LogEvent]) -> String {
    let mut out = String::new();
    for event in events {
        let _ = match event {
            LogEvent::Text(text) => writeln!(out, "{text}"),
            LogEvent::Tool(name) => writeln!(out, "[tool: {name}]"),
            LogEvent::Result(subtype) => writeln!(out, "[result: {subtype}]"),
        };
    }
    out
}

/// Parses and renders one raw line; blank lines render to nothing.
#[must_use]
pub fn render_line(line: &[u8]) -> String {
    if line.iter().all(u8::is_ascii_whitespace) {
        return String::new();
    }
    render_plain(&parse_line(line))
}

/// Renders a whole log buffer, one line at a time.
#[must_use]
pub fn render_all(data: &[u8]) -> String {
    data.split(|b| *b == b'\n')
        .map(|line| render_line(line.strip_suffix(b"\r").unwrap_or(line)))
        .collect()
}

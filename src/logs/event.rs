#![forbid(unsafe_code)]

use serde_json::{Map, Value};

/// One renderable item extracted from an agent output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Text(String),
    Tool(String),
    Result(String),
}

/// Parses one NDJSON line into zero or more events.
///
/// Lines that are not JSON objects are kept verbatim as a single text event.
/// Unrecognised `type`s (system/init markers and the like) yield nothing.
#[must_use]
pub fn parse_line(line: &[u8]) -> Vec<LogEvent> {
    let Ok(Value::Object(obj)) = serde_json::from_slice::<Value>(line) else {
        return vec![LogEvent::Text(String::from_utf8_lossy(line).into_owned())];
    };

    match obj.get("type").and_then(Value::as_str) {
        Some("assistant") => content_events(AssistantPayload::from_object(&obj).content()),
        Some("tool_use") => vec![LogEvent::Tool(str_field(&obj, "name"))],
        Some("result") => vec![LogEvent::Result(str_field(&obj, "subtype"))],
        _ => Vec::new(),
    }
}

/// The two shapes an `assistant` line comes in.
enum AssistantPayload<'a> {
    /// `{"type":"assistant","message":{"content":[...]}}` as streamed by the agent.
    Nested(&'a Map<String, Value>),
    /// `{"type":"assistant","content":"..."}`.
    Flat(&'a Map<String, Value>),
}

impl<'a> AssistantPayload<'a> {
    fn from_object(obj: &'a Map<String, Value>) -> Self {
        match obj.get("message") {
            Some(Value::Object(message)) => Self::Nested(message),
            _ => Self::Flat(obj),
        }
    }

    fn content(&self) -> Option<&'a Value> {
        match self {
            Self::Nested(m) | Self::Flat(m) => m.get("content"),
        }
    }
}

fn content_events(content: Option<&Value>) -> Vec<LogEvent> {
    match content {
        Some(Value::String(s)) if !s.is_empty() => vec![LogEvent::Text(s.clone())],
        Some(Value::Array(blocks)) => blocks.iter().filter_map(block_event).collect(),
        _ => Vec::new(),
    }
}

fn block_event(block: &Value) -> Option<LogEvent> {
    let block = block.as_object()?;
    match block.get("type").and_then(Value::as_str)? {
        "text" => {
            let text = block.get("text").and_then(Value::as_str)?;
            (!text.is_empty()).then(|| LogEvent::Text(text.to_owned()))
        }
        "tool_use" => {
            let name = block.get("name").and_then(Value::as_str)?;
            Some(LogEvent::Tool(name.to_owned()))
        }
        _ => None,
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_assistant_string() {
        assert_eq!(
            parse_line(br#"{"type":"assistant","content":"hi"}"#),
            [LogEvent::Text("hi".to_owned())]
        );
        assert!(parse_line(br#"{"type":"assistant","content":""}"#).is_empty());
    }

    #[test]
    fn nested_message_content_blocks() {
        let line = br#"{"type":"assistant","message":{"content":[{"type":"text","text":"Real message."},{"type":"tool_use","name":"Bash","id":"x"},{"type":"thinking","thinking":"..."},{"type":"text","text":""},42]}}"#;
        assert_eq!(
            parse_line(line),
            [
                LogEvent::Text("Real message.".to_owned()),
                LogEvent::Tool("Bash".to_owned()),
            ]
        );
    }

    #[test]
    fn nested_message_wins_over_flat_content() {
        let line = br#"{"type":"assistant","content":"flat","message":{"content":"nested"}}"#;
        assert_eq!(parse_line(line), [LogEvent::Text("nested".to_owned())]);
    }

    #[test]
    fn top_level_tool_use_and_result() {
        assert_eq!(
            parse_line(br#"{"type":"tool_use","name":"Edit","input":{"file_path":"/tmp/foo.rs"}}"#),
            [LogEvent::Tool("Edit".to_owned())]
        );
        assert_eq!(
            parse_line(br#"{"type":"result","subtype":"success"}"#),
            [LogEvent::Result("success".to_owned())]
        );
        assert_eq!(
            parse_line(br#"{"type":"result"}"#),
            [LogEvent::Result(String::new())]
        );
    }

    #[test]
    fn unknown_types_are_silent() {
        assert!(parse_line(br#"{"type":"system","subtype":"init"}"#).is_empty());
        assert!(parse_line(br#"{"no_type":true}"#).is_empty());
    }

    #[test]
    fn non_json_is_kept_verbatim() {
        let raw = b"panic: something broke {";
        assert_eq!(
            parse_line(raw),
            [LogEvent::Text("panic: something broke {".to_owned())]
        );
        assert_eq!(parse_line(b"[1,2]"), [LogEvent::Text("[1,2]".to_owned())]);
    }
}

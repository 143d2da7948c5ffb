//! Incremental parser for the server-sent-event wire protocol.
use std::sync::LazyLock;

use regex::Regex;

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(?P<field>event|id|data) *: *(?P<value>.*)$")
        .expect("the SSE field pattern is valid")
});

/// One complete event as delimited on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Accumulates protocol lines into [`SseRecord`]s.
///
/// A record is emitted on the first blank line after at least one `data` field was seen; blank
/// lines without pending data (server heartbeats) emit nothing. Repeated fields replace the
/// previous value, unknown fields and malformed lines are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    id: Option<String>,
    data: Option<String>,
}

impl SseParser {
    pub fn new() -> SseParser {
        SseParser::default()
    }

    /// Feed one protocol line, returning a record if this line completed one.
    pub fn push_line(&mut self, line: &str) -> Option<SseRecord> {
        if line.is_empty() {
            let data = self.data.take()?;
            return Some(SseRecord {
                event: self.event.take(),
                id: self.id.take(),
                data,
            });
        }

        if let Some(captures) = FIELD.captures(line) {
            let value = captures["value"].to_owned();
            match captures["field"].to_ascii_lowercase().as_str() {
                "event" => self.event = Some(value),
                "id" => self.id = Some(value),
                "data" => self.data = Some(value),
                _ => unreachable!("the pattern only matches known fields"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{SseParser, SseRecord};

    #[test]
    fn accumulates_fields_until_the_blank_line() {
        let mut parser = SseParser::new();
        assert_eq!(parser.push_line("event: FEATURE_UPDATED"), None);
        assert_eq!(parser.push_line("id: 42"), None);
        assert_eq!(parser.push_line(r#"data: {"id":"f"}"#), None);
        assert_eq!(
            parser.push_line(""),
            Some(SseRecord {
                event: Some("FEATURE_UPDATED".to_owned()),
                id: Some("42".to_owned()),
                data: r#"{"id":"f"}"#.to_owned(),
            })
        );
    }

    #[test]
    fn blank_line_without_data_is_a_heartbeat() {
        let mut parser = SseParser::new();
        assert_eq!(parser.push_line(""), None);
        parser.push_line("event: KEEP_ALIVE");
        assert_eq!(parser.push_line(""), None);
    }

    #[test]
    fn field_names_are_case_insensitive_and_padding_is_tolerated() {
        let mut parser = SseParser::new();
        parser.push_line("EVENT : FEATURE_STATES");
        parser.push_line("Data:  {}");
        let record = parser.push_line("").unwrap();
        assert_eq!(record.event.as_deref(), Some("FEATURE_STATES"));
        assert_eq!(record.data, "{}");
    }

    #[test]
    fn repeated_data_replaces_the_previous_value() {
        let mut parser = SseParser::new();
        parser.push_line("data: first");
        parser.push_line("data: second");
        assert_eq!(parser.push_line("").unwrap().data, "second");
    }

    #[test]
    fn unknown_fields_and_noise_are_ignored() {
        let mut parser = SseParser::new();
        parser.push_line("retry: 5000");
        parser.push_line(": comment");
        parser.push_line("garbage without a colon");
        parser.push_line("data: x");
        assert_eq!(parser.push_line("").unwrap().data, "x");
    }

    #[test]
    fn state_resets_between_records() {
        let mut parser = SseParser::new();
        parser.push_line("event: FEATURE_DELETED");
        parser.push_line("data: a");
        parser.push_line("");
        parser.push_line("data: b");
        let second = parser.push_line("").unwrap();
        assert_eq!(second.event, None);
        assert_eq!(second.data, "b");
    }
}

use std::sync::LazyLock;

use regex::Regex;

use crate::context::ExecutionContext;
use crate::events::{EventId, EventSink, FilePosition, MessageKind};
use crate::line::{ClassifiedLine, Level};
use crate::reader::LineReader;

use super::{LineMatcher, emit_diagnostic};

/// Regex for the classic Kotlin compiler format.
///
/// Matches `e: /src/App.kt: (12, 5): Unresolved reference: foo`.
/// Captures: (1) severity, (2) path, (3) line, (4) column, (5) message.
static KOTLIN_PAREN_RE: LazyLock<Regex> = LazyLock::new(|| {
    // safety: this regex is valid and tested
    Regex::new(
        r"^([ewi]): (?:file://)?(.+?\.kts?): \((\d+), (\d+)\): (.*)$",
    )
    .expect("valid regex")
});

/// Regex for the Kotlin 1.8+ format.
///
/// Matches `e: file:///src/App.kt:12:5 Unresolved reference: foo`.
/// Captures: (1) severity, (2) path, (3) line, (4) column, (5) message.
static KOTLIN_COLON_RE: LazyLock<Regex> = LazyLock::new(|| {
    // safety: this regex is valid and tested
    Regex::new(r"^([ewi]): (?:file://)?(.+?\.kts?):(\d+):(\d+) (.*)$").expect("valid regex")
});

/// A diagnostic parsed from one Kotlin compiler line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KotlinDiagnostic {
    pub kind: MessageKind,
    pub position: FilePosition,
    pub message: String,
}

/// Parse a Kotlin compiler diagnostic in either output format.
pub fn parse_kotlin_line(text: &str) -> Option<KotlinDiagnostic> {
    let text = text.trim();
    let caps = KOTLIN_PAREN_RE
        .captures(text)
        .or_else(|| KOTLIN_COLON_RE.captures(text))?;
    let kind = match &caps[1] {
        "e" => MessageKind::Error,
        "w" => MessageKind::Warning,
        _ => MessageKind::Info,
    };
    Some(KotlinDiagnostic {
        kind,
        position: FilePosition {
            path: caps[2].to_string(),
            line: caps[3].parse().ok(),
            column: caps[4].parse().ok(),
        },
        message: caps[5].to_string(),
    })
}

/// Turns Kotlin compiler diagnostics into file-positioned messages.
///
/// The Kotlin plugin does not always route compiler output through the
/// build's logger, so unprefixed lines are inspected as well.
#[derive(Debug, Default)]
pub struct KotlinMatcher;

impl LineMatcher for KotlinMatcher {
    fn supports_level(&self, _level: Option<Level>) -> bool {
        true
    }

    fn try_consume(
        &mut self,
        parent: &EventId,
        _ctx: &ExecutionContext,
        line: &ClassifiedLine,
        _reader: &mut LineReader<'_>,
        sink: &mut dyn EventSink,
    ) -> bool {
        let Some(diagnostic) = parse_kotlin_line(&line.text) else {
            return false;
        };
        emit_diagnostic(
            sink,
            parent,
            diagnostic.kind,
            diagnostic.message,
            Some(diagnostic.position),
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BuildEvent;
    use crate::line::classify;

    #[test]
    fn test_parse_paren_format() {
        let d = parse_kotlin_line("e: /src/App.kt: (12, 5): Unresolved reference: foo").unwrap();
        assert_eq!(d.kind, MessageKind::Error);
        assert_eq!(d.position.path, "/src/App.kt");
        assert_eq!(d.position.line, Some(12));
        assert_eq!(d.position.column, Some(5));
        assert_eq!(d.message, "Unresolved reference: foo");
    }

    #[test]
    fn test_parse_colon_format_strips_scheme() {
        let d = parse_kotlin_line("w: file:///src/build.gradle.kts:3:1 Deprecated").unwrap();
        assert_eq!(d.kind, MessageKind::Warning);
        assert_eq!(d.position.path, "/src/build.gradle.kts");
        assert_eq!(d.position.line, Some(3));
        assert_eq!(d.position.column, Some(1));
        assert_eq!(d.message, "Deprecated");
    }

    #[test]
    fn test_parse_rejects_other_lines() {
        assert!(parse_kotlin_line("Compiling 3 Kotlin files").is_none());
        assert!(parse_kotlin_line("e: something went wrong").is_none());
    }

    #[test]
    fn test_consumes_prefixed_and_plain_lines() {
        let ctx = ExecutionContext::with_session(1);
        let mut m = KotlinMatcher;
        let mut reader = LineReader::empty();
        let mut sink: Vec<BuildEvent> = Vec::new();
        let parent = EventId::Session(1);
        for raw in [
            "[ERROR] e: file:///src/App.kt:1:2 Unresolved reference: x",
            "e: /src/App.kt: (4, 1): Type mismatch",
        ] {
            let line = classify(raw);
            assert!(m.supports_level(line.level));
            assert!(m.try_consume(&parent, &ctx, &line, &mut reader, &mut sink));
        }
        assert_eq!(sink.len(), 2);
        assert!(sink.iter().all(|e| matches!(
            e,
            BuildEvent::Message {
                kind: MessageKind::Error,
                ..
            }
        )));
    }
}

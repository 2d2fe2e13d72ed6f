use std::sync::LazyLock;

use regex::Regex;

use crate::context::ExecutionContext;
use crate::events::{BuildEvent, EventId, EventSink, FilePosition, MessageKind};
use crate::line::{ClassifiedLine, Level};
use crate::reader::LineReader;

use super::{LineMatcher, emit_diagnostic, message_kind, read_continuation};

/// Marker the JVM prints when the compiler ran out of heap.
pub const OUT_OF_MEMORY_MARKER: &str = "java.lang.OutOfMemoryError";

/// Regex for diagnostics printed by the Java compiler plugin.
///
/// Matches patterns like:
///   `/src/main/java/App.java:[12,5] cannot find symbol`
///   `C:\src\App.java:[12] unreachable statement`
///
/// Captures: (1) path, (2) line, (3) optional column, (4) message.
pub static JAVAC_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // safety: this regex is valid and tested
    Regex::new(r"^(.+?\.java):\[(\d+)(?:,(\d+))?\]\s*(.*)$").expect("valid regex")
});

/// A diagnostic parsed from one javac output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavacDiagnostic {
    pub position: FilePosition,
    pub message: String,
}

/// Parse a `<path>.java:[line,col] message` line.
pub fn parse_javac_line(text: &str) -> Option<JavacDiagnostic> {
    let caps = JAVAC_LINE_RE.captures(text.trim())?;
    Some(JavacDiagnostic {
        position: FilePosition {
            path: caps[1].to_string(),
            line: caps[2].parse().ok(),
            column: caps.get(3).and_then(|c| c.as_str().parse().ok()),
        },
        message: caps[4].to_string(),
    })
}

/// True for an error line reporting that the compiler ran out of memory.
pub fn is_out_of_memory(text: &str) -> bool {
    let text = text.trim_end();
    text.ends_with(OUT_OF_MEMORY_MARKER) || text.contains(&format!("{OUT_OF_MEMORY_MARKER}:"))
}

/// Turns Java compiler diagnostics into file-positioned messages.
#[derive(Debug, Default)]
pub struct JavacMatcher {
    errors: usize,
    warnings: usize,
}

impl LineMatcher for JavacMatcher {
    fn supports_level(&self, level: Option<Level>) -> bool {
        matches!(level, Some(Level::Error) | Some(Level::Warning))
    }

    fn try_consume(
        &mut self,
        parent: &EventId,
        _ctx: &ExecutionContext,
        line: &ClassifiedLine,
        reader: &mut LineReader<'_>,
        sink: &mut dyn EventSink,
    ) -> bool {
        if line.level == Some(Level::Error) && is_out_of_memory(&line.text) {
            self.errors += 1;
            sink.accept(BuildEvent::Message {
                parent: parent.clone(),
                kind: MessageKind::Error,
                title: "Out of memory".to_string(),
                text: line.text.trim().to_string(),
                position: None,
            });
            return true;
        }

        let Some(diagnostic) = parse_javac_line(&line.text) else {
            return false;
        };
        let mut text = diagnostic.message;
        read_continuation(reader, line.level, &mut text);

        let kind = message_kind(line.level);
        match kind {
            MessageKind::Error => self.errors += 1,
            MessageKind::Warning => self.warnings += 1,
            MessageKind::Info => {}
        }
        emit_diagnostic(sink, parent, kind, text, Some(diagnostic.position));
        true
    }

    fn finalize(&mut self, session: &EventId, sink: &mut dyn EventSink) {
        if self.errors == 0 && self.warnings == 0 {
            return;
        }
        let text = format!(
            "{} errors, {} warnings reported by javac",
            self.errors, self.warnings
        );
        emit_diagnostic(sink, session, MessageKind::Info, text, None);
        self.errors = 0;
        self.warnings = 0;
    }
}

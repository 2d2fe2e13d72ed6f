//! Pluggable recognizers for domain-specific output.
//!
//! [`LineMatcher`]s see plain (non-spy) output lines; [`SpyErrorMatcher`]s
//! see the error text carried by failed lifecycle events. Both are handed to
//! the dispatcher in registration order and the first one that consumes an
//! input ends the scan for it.

pub mod compilation;
pub mod javac;
pub mod kotlin;

use crate::context::ExecutionContext;
use crate::events::{BuildEvent, EventId, EventSink, FilePosition, MessageKind};
use crate::line::{ClassifiedLine, Level};
use crate::reader::LineReader;
use crate::spy::SpyEventKind;

pub use compilation::CompilationFailureMatcher;
pub use javac::JavacMatcher;
pub use kotlin::KotlinMatcher;

/// Recognizer for plain output lines.
pub trait LineMatcher: Send {
    /// Whether lines of `level` (or unprefixed lines, for `None`) are of interest.
    fn supports_level(&self, level: Option<Level>) -> bool;

    /// Try to turn `line` into events under `parent`.
    ///
    /// May read further lines from `reader`; a line read but not wanted must
    /// be pushed back so the dispatcher processes it normally.
    fn try_consume(
        &mut self,
        parent: &EventId,
        ctx: &ExecutionContext,
        line: &ClassifiedLine,
        reader: &mut LineReader<'_>,
        sink: &mut dyn EventSink,
    ) -> bool;

    /// Called once when the session ends or the stream runs out.
    fn finalize(&mut self, _session: &EventId, _sink: &mut dyn EventSink) {}
}

/// Recognizer for error text attached to failed lifecycle events.
pub trait SpyErrorMatcher: Send {
    fn supports_kind(&self, kind: SpyEventKind) -> bool;

    fn try_consume(
        &mut self,
        parent: &EventId,
        ctx: &ExecutionContext,
        error: &str,
        sink: &mut dyn EventSink,
    ) -> bool;
}

/// Message kind matching a line level; unprefixed lines count as info.
pub fn message_kind(level: Option<Level>) -> MessageKind {
    match level {
        Some(Level::Error) => MessageKind::Error,
        Some(Level::Warning) => MessageKind::Warning,
        Some(Level::Info) | None => MessageKind::Info,
    }
}

/// Emit a diagnostic whose title is the first line of `text`.
pub(crate) fn emit_diagnostic(
    sink: &mut dyn EventSink,
    parent: &EventId,
    kind: MessageKind,
    text: String,
    position: Option<FilePosition>,
) {
    let title = text.lines().next().unwrap_or_default().trim().to_string();
    sink.accept(BuildEvent::Message {
        parent: parent.clone(),
        kind,
        title,
        text,
        position,
    });
}

/// Fold indented follow-up lines of `level` into `text`.
///
/// Stops at the first line that is not a continuation and pushes it back.
pub(crate) fn read_continuation(
    reader: &mut LineReader<'_>,
    level: Option<Level>,
    text: &mut String,
) {
    while let Some(next) = reader.read_line() {
        let is_continuation = next.level == level
            && next.text.starts_with(char::is_whitespace)
            && !next.text.trim().is_empty();
        if !is_continuation {
            reader.push_back();
            break;
        }
        text.push('\n');
        text.push_str(next.text.trim());
    }
}

/// Built-in line matchers, in their default order.
pub fn default_line_matchers(javac: bool, kotlin: bool) -> Vec<Box<dyn LineMatcher>> {
    let mut matchers: Vec<Box<dyn LineMatcher>> = Vec::new();
    if javac {
        matchers.push(Box::new(JavacMatcher::default()));
    }
    if kotlin {
        matchers.push(Box::new(KotlinMatcher));
    }
    matchers
}

use crate::context::ExecutionContext;
use crate::events::{EventId, EventSink, MessageKind};
use crate::spy::SpyEventKind;

use super::javac::parse_javac_line;
use super::{SpyErrorMatcher, emit_diagnostic};

/// Splits the error text of a failed goal into per-file compiler messages.
///
/// When the compiler plugin fails, the listener reports the whole
/// "Compilation failure" block as the error of the failed goal and project.
/// Each javac-formatted line becomes its own error, with indented lines
/// folded into the message above them.
#[derive(Debug, Default)]
pub struct CompilationFailureMatcher;

impl SpyErrorMatcher for CompilationFailureMatcher {
    fn supports_kind(&self, kind: SpyEventKind) -> bool {
        matches!(kind, SpyEventKind::MojoFailed | SpyEventKind::ProjectFailed)
    }

    fn try_consume(
        &mut self,
        parent: &EventId,
        _ctx: &ExecutionContext,
        error: &str,
        sink: &mut dyn EventSink,
    ) -> bool {
        let mut found = Vec::new();
        for line in error.lines() {
            if let Some(diagnostic) = parse_javac_line(line) {
                found.push((diagnostic.position, diagnostic.message));
            } else if line.starts_with(char::is_whitespace)
                && !line.trim().is_empty()
                && let Some((_, message)) = found.last_mut()
            {
                message.push('\n');
                message.push_str(line.trim());
            }
        }
        if found.is_empty() {
            return false;
        }
        for (position, message) in found {
            emit_diagnostic(sink, parent, MessageKind::Error, message, Some(position));
        }
        true
    }
}

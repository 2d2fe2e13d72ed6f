use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};
use tokio::sync::mpsc::UnboundedSender;

/// Opaque handle naming one node of the event tree.
///
/// Entry ids are minted by the execution context and are never reused while
/// the entry is live. `Named` ids are derived from text (artifact downloads).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventId {
    /// The root of one build session.
    Session(u64),
    /// A project, task or node entry inside a session.
    Entry { session: u64, seq: u64 },
    /// An id derived from text, e.g. `"download" + coord`.
    Named(String),
}

impl EventId {
    /// Id of a single artifact download event.
    pub fn download(coord: &str) -> Self {
        EventId::Named(format!("download{coord}"))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventId::Session(n) => write!(f, "session-{n}"),
            EventId::Entry { session, seq } => write!(f, "session-{session}/{seq}"),
            EventId::Named(text) => f.write_str(text),
        }
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome carried by a finish event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum BuildResult {
    Success,
    Failure { message: String },
    Skipped,
    /// The stream, or the execution the entry belonged to, ended before the
    /// entry reported its result.
    Unknown,
}

impl BuildResult {
    pub fn failure(message: impl Into<String>) -> Self {
        BuildResult::Failure {
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, BuildResult::Failure { .. })
    }
}

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Info,
    Warning,
    Error,
}

/// Source location attached to a compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePosition {
    pub path: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Events emitted while parsing a worker's output stream.
///
/// The parser never renders anything itself; frontends (terminal tree,
/// JSON lines, an IDE view) consume the same stream through an [`EventSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BuildEvent {
    /// An entry (project, task, node, download) began.
    Started {
        id: EventId,
        parent: Option<EventId>,
        timestamp: u64,
        name: String,
    },
    /// An entry finished. Session finishes have no parent.
    Finished {
        id: EventId,
        parent: Option<EventId>,
        timestamp: u64,
        name: String,
        result: BuildResult,
    },
    /// A raw output line attributed to an open entry.
    Output { parent: EventId, text: String },
    /// A diagnostic recognized by a matcher.
    Message {
        parent: EventId,
        kind: MessageKind,
        title: String,
        text: String,
        position: Option<FilePosition>,
    },
}

impl BuildEvent {
    /// The id this event starts or finishes, if it is a lifecycle event.
    pub fn id(&self) -> Option<&EventId> {
        match self {
            BuildEvent::Started { id, .. } | BuildEvent::Finished { id, .. } => Some(id),
            BuildEvent::Output { .. } | BuildEvent::Message { .. } => None,
        }
    }
}

/// Receiver of parsed build events.
pub trait EventSink {
    fn accept(&mut self, event: BuildEvent);
}

impl EventSink for Vec<BuildEvent> {
    fn accept(&mut self, event: BuildEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<BuildEvent> {
    fn accept(&mut self, event: BuildEvent) {
        // A closed receiver means the frontend is gone; parsing carries on.
        let _ = self.send(event);
    }
}

/// Source of event timestamps, in unix milliseconds.
pub type Clock = Box<dyn Fn() -> u64 + Send>;

/// Clock backed by the system time.
pub fn system_clock() -> Clock {
    Box::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    })
}

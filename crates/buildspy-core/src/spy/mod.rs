//! The machine-readable "spy" side channel written by the instrumented build listener.
//!
//! Wire format of one line:
//!
//! ```text
//! [IJ]-<thread>-[IJ]-<TYPE>-[IJ]-<key>=<value>-[IJ]-<key>=<value>...
//! ```
//!
//! Newlines inside values are escaped by the producer as `-[N]-`.

pub mod machine;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub use machine::EventStateMachine;

/// Literal prefix of every spy line.
pub const SPY_PREFIX: &str = "[IJ]-";
/// Separator between the thread id, the type and each parameter.
pub const FIELD_SEPARATOR: &str = "-[IJ]-";
/// Escaped form of a newline inside a parameter value.
pub const NEWLINE_ESCAPE: &str = "-[N]-";

/// Lifecycle events the listener reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpyEventKind {
    SessionStarted,
    SessionEnded,
    ProjectStarted,
    ProjectSucceeded,
    ProjectFailed,
    ProjectSkipped,
    MojoStarted,
    MojoSucceeded,
    MojoFailed,
    MojoSkipped,
    ArtifactResolved,
    ArtifactDownloading,
}

impl SpyEventKind {
    pub const ALL: [SpyEventKind; 12] = [
        SpyEventKind::SessionStarted,
        SpyEventKind::SessionEnded,
        SpyEventKind::ProjectStarted,
        SpyEventKind::ProjectSucceeded,
        SpyEventKind::ProjectFailed,
        SpyEventKind::ProjectSkipped,
        SpyEventKind::MojoStarted,
        SpyEventKind::MojoSucceeded,
        SpyEventKind::MojoFailed,
        SpyEventKind::MojoSkipped,
        SpyEventKind::ArtifactResolved,
        SpyEventKind::ArtifactDownloading,
    ];

    /// The TYPE token as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            SpyEventKind::SessionStarted => "SessionStarted",
            SpyEventKind::SessionEnded => "SessionEnded",
            SpyEventKind::ProjectStarted => "ProjectStarted",
            SpyEventKind::ProjectSucceeded => "ProjectSucceeded",
            SpyEventKind::ProjectFailed => "ProjectFailed",
            SpyEventKind::ProjectSkipped => "ProjectSkipped",
            SpyEventKind::MojoStarted => "MojoStarted",
            SpyEventKind::MojoSucceeded => "MojoSucceeded",
            SpyEventKind::MojoFailed => "MojoFailed",
            SpyEventKind::MojoSkipped => "MojoSkipped",
            SpyEventKind::ArtifactResolved => "ArtifactResolved",
            SpyEventKind::ArtifactDownloading => "ArtifactDownloading",
        }
    }
}

impl fmt::Display for SpyEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpyEventKind {
    type Err = SpyDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpyEventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SpyDecodeError::UnknownEventType(s.to_string()))
    }
}

/// Reasons a spy line is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpyDecodeError {
    #[error("line does not start with the spy prefix")]
    NotSpyLine,
    #[error("invalid thread id: {0:?}")]
    InvalidThreadId(String),
    #[error("missing separator before the event type")]
    MissingTypeSeparator,
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

/// One decoded spy line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpyLine {
    pub thread_id: u64,
    pub kind: SpyEventKind,
    pub params: HashMap<String, String>,
}

impl SpyLine {
    /// Parameter value, treating empty values and the literal `null` as absent.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty() && *v != "null")
    }
}

/// True when the line carries the spy prefix, whether or not it decodes.
pub fn is_spy_line(raw: &str) -> bool {
    raw.starts_with(SPY_PREFIX)
}

/// Decode one spy line.
pub fn decode(raw: &str) -> Result<SpyLine, SpyDecodeError> {
    let body = raw
        .trim_end_matches(['\n', '\r'])
        .strip_prefix(SPY_PREFIX)
        .ok_or(SpyDecodeError::NotSpyLine)?;

    let dash = body
        .find('-')
        .ok_or_else(|| SpyDecodeError::InvalidThreadId(body.to_string()))?;
    let thread = &body[..dash];
    if thread.is_empty() || !thread.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SpyDecodeError::InvalidThreadId(thread.to_string()));
    }
    let thread_id: u64 = thread
        .parse()
        .map_err(|_| SpyDecodeError::InvalidThreadId(thread.to_string()))?;

    let rest = body[dash..]
        .strip_prefix(FIELD_SEPARATOR)
        .ok_or(SpyDecodeError::MissingTypeSeparator)?;

    let mut fields = rest.split(FIELD_SEPARATOR);
    let kind: SpyEventKind = fields.next().unwrap_or_default().parse()?;

    let params = fields
        .filter_map(|token| {
            let (key, value) = token.split_once('=')?;
            if value.contains('=') {
                return None;
            }
            Some((key.to_string(), value.replace(NEWLINE_ESCAPE, "\n")))
        })
        .collect();

    Ok(SpyLine {
        thread_id,
        kind,
        params,
    })
}

/// Encode a spy line, escaping newlines in values. Used by tests and tooling
/// that replays recorded sessions.
pub fn encode(thread_id: u64, kind: SpyEventKind, params: &[(&str, &str)]) -> String {
    let mut line = format!("{SPY_PREFIX}{thread_id}{FIELD_SEPARATOR}{kind}");
    for (key, value) in params {
        line.push_str(FIELD_SEPARATOR);
        line.push_str(key);
        line.push('=');
        line.push_str(&value.replace('\n', NEWLINE_ESCAPE));
    }
    line
}

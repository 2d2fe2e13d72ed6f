use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::context::{ExecutionContext, ExecutionEntry};
use crate::events::{BuildEvent, BuildResult, EventId, EventSink};
use crate::matchers::SpyErrorMatcher;

use super::{SpyEventKind, SpyLine, decode};

/// Separator between reactor project ids in `SessionStarted`.
const PROJECTS_SEPARATOR: &str = "&&";

/// Applies decoded spy events to an [`ExecutionContext`] and emits the
/// matching lifecycle events.
pub struct EventStateMachine {
    session_name: String,
    download_node_name: String,
    /// Artifacts with an open download event, across all threads, mapped to
    /// the aggregator node their start event hung under.
    downloading: BTreeMap<String, EventId>,
    error_matchers: Vec<Box<dyn SpyErrorMatcher>>,
}

impl EventStateMachine {
    pub fn new(session_name: impl Into<String>, download_node_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            download_node_name: download_node_name.into(),
            downloading: BTreeMap::new(),
            error_matchers: Vec::new(),
        }
    }

    pub fn add_error_matcher(&mut self, matcher: Box<dyn SpyErrorMatcher>) {
        self.error_matchers.push(matcher);
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn is_downloading(&self, coord: &str) -> bool {
        self.downloading.contains_key(coord)
    }

    /// Decode and apply one raw spy line. Malformed lines are dropped.
    ///
    /// Returns whether the line decoded.
    pub fn process_line(
        &mut self,
        raw: &str,
        ctx: &mut ExecutionContext,
        sink: &mut dyn EventSink,
        now: u64,
    ) -> bool {
        match decode(raw) {
            Ok(line) => {
                self.apply(&line, ctx, sink, now);
                true
            }
            Err(e) => {
                debug!(error = %e, line = raw, "dropping malformed spy line");
                false
            }
        }
    }

    /// Apply one decoded event.
    pub fn apply(
        &mut self,
        line: &SpyLine,
        ctx: &mut ExecutionContext,
        sink: &mut dyn EventSink,
        now: u64,
    ) {
        trace!(thread = line.thread_id, kind = %line.kind, "spy event");
        let thread = line.thread_id;

        if let Some(error) = line.param("error") {
            let parent = ctx
                .innermost_execution_id(thread)
                .unwrap_or_else(|| ctx.current_id());
            for matcher in self.error_matchers.iter_mut() {
                if !matcher.supports_kind(line.kind) {
                    continue;
                }
                if matcher.try_consume(&parent, ctx, error, sink) {
                    break;
                }
            }
        }

        match line.kind {
            SpyEventKind::SessionStarted => {
                let projects = line
                    .param("projects")
                    .map(|p| {
                        p.split(PROJECTS_SEPARATOR)
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                ctx.set_reactor_projects(projects);
            }
            SpyEventKind::SessionEnded => {
                ctx.set_session_ended();
                let result = if ctx.project_failed() {
                    BuildResult::failure("one or more projects failed")
                } else {
                    BuildResult::Success
                };
                self.finish_session(ctx, sink, now, result);
            }
            SpyEventKind::ProjectStarted => {
                let Some(name) = required(line, "id") else {
                    return;
                };
                if let Some(entry) = ctx.get_or_create_project(thread, name, true) {
                    start(sink, &entry, now);
                }
            }
            SpyEventKind::MojoStarted => {
                let Some(goal) = required(line, "goal") else {
                    return;
                };
                let project = line.param("id");
                if let Some(entry) = ctx.get_or_create_task(thread, project, goal, true) {
                    start(sink, &entry, now);
                }
            }
            SpyEventKind::MojoSucceeded | SpyEventKind::MojoFailed | SpyEventKind::MojoSkipped => {
                self.close_downloads(thread, ctx, sink, now);
                let Some(goal) = required(line, "goal") else {
                    return;
                };
                let project = line.param("id");
                let Some(entry) = ctx.get_or_create_task(thread, project, goal, false) else {
                    missing(line, goal);
                    return;
                };
                finish(sink, &entry, now, outcome(line));
                ctx.complete(&entry);
            }
            SpyEventKind::ProjectSucceeded | SpyEventKind::ProjectFailed => {
                self.close_downloads(thread, ctx, sink, now);
                if line.kind == SpyEventKind::ProjectFailed {
                    ctx.set_project_failed();
                }
                self.complete_project(line, ctx, sink, now);
            }
            SpyEventKind::ProjectSkipped => self.complete_project(line, ctx, sink, now),
            SpyEventKind::ArtifactDownloading => self.artifact_downloading(line, ctx, sink, now),
            SpyEventKind::ArtifactResolved => self.artifact_resolved(line, ctx, sink, now),
        }
    }

    /// Emit the session finish event.
    pub fn finish_session(
        &self,
        ctx: &ExecutionContext,
        sink: &mut dyn EventSink,
        now: u64,
        result: BuildResult,
    ) {
        sink.accept(BuildEvent::Finished {
            id: ctx.session_id(),
            parent: None,
            timestamp: now,
            name: self.session_name.clone(),
            result,
        });
    }

    /// Finish every download still open with [`BuildResult::Unknown`].
    ///
    /// Called once the input ends; each finish keeps the parent its start
    /// event was emitted with.
    pub fn abandon_downloads(&mut self, sink: &mut dyn EventSink, now: u64) {
        for (coord, parent) in std::mem::take(&mut self.downloading) {
            debug!(coord = %coord, "download never resolved");
            finish_download(sink, &coord, parent, now, BuildResult::Unknown);
        }
    }

    fn complete_project(
        &mut self,
        line: &SpyLine,
        ctx: &mut ExecutionContext,
        sink: &mut dyn EventSink,
        now: u64,
    ) {
        let Some(name) = required(line, "id") else {
            return;
        };
        let Some(entry) = ctx.get_or_create_project(line.thread_id, name, false) else {
            missing(line, name);
            return;
        };
        finish(sink, &entry, now, outcome(line));
        ctx.complete(&entry);
    }

    /// Finish the download aggregator of `thread`, if one is open.
    ///
    /// Downloads started under the aggregator that never resolved are
    /// finished first with [`BuildResult::Unknown`], so a later download of
    /// the same artifact starts afresh.
    fn close_downloads(
        &mut self,
        thread: u64,
        ctx: &mut ExecutionContext,
        sink: &mut dyn EventSink,
        now: u64,
    ) {
        let name = self.download_node_name.as_str();
        let Some(node) = ctx.get_or_create_node(thread, name, false) else {
            return;
        };
        let abandoned: Vec<String> = self
            .downloading
            .iter()
            .filter(|(_, parent)| **parent == node.id)
            .map(|(coord, _)| coord.clone())
            .collect();
        for coord in abandoned {
            self.downloading.remove(&coord);
            debug!(coord = %coord, "download abandoned with its aggregator");
            let parent = node.id.clone();
            finish_download(sink, &coord, parent, now, BuildResult::Unknown);
        }
        finish(sink, &node, now, BuildResult::Success);
        ctx.complete(&node);
    }

    fn artifact_downloading(
        &mut self,
        line: &SpyLine,
        ctx: &mut ExecutionContext,
        sink: &mut dyn EventSink,
        now: u64,
    ) {
        let Some(coord) = line.param("artifactCoord") else {
            return;
        };
        if self.downloading.contains_key(coord) {
            return;
        }
        let thread = line.thread_id;
        let name = self.download_node_name.as_str();
        let node = match ctx.get_or_create_node(thread, name, false) {
            Some(node) => node,
            None => {
                let Some(node) = ctx.get_or_create_node(thread, name, true) else {
                    return;
                };
                start(sink, &node, now);
                node
            }
        };
        self.downloading.insert(coord.to_string(), node.id.clone());
        sink.accept(BuildEvent::Started {
            id: EventId::download(coord),
            parent: Some(node.id),
            timestamp: now,
            name: coord.to_string(),
        });
    }

    fn artifact_resolved(
        &mut self,
        line: &SpyLine,
        ctx: &mut ExecutionContext,
        sink: &mut dyn EventSink,
        now: u64,
    ) {
        let coord = line.param("artifactCoord");
        let error = line.param("error");

        // The finish hangs where the start did, whichever thread resolves it
        if let Some((coord, parent)) = coord.and_then(|c| self.downloading.remove_entry(c)) {
            let result = error
                .map(BuildResult::failure)
                .unwrap_or(BuildResult::Success);
            finish_download(sink, &coord, parent, now, result);
            return;
        }

        let Some(error) = error else {
            return;
        };
        let thread = line.thread_id;
        let parent = ctx
            .find_node(thread, &self.download_node_name)
            .map(|n| n.id.clone())
            .or_else(|| ctx.innermost_id(thread))
            .unwrap_or_else(|| ctx.current_id());
        let id = EventId::Named(error.to_string());
        sink.accept(BuildEvent::Started {
            id: id.clone(),
            parent: Some(parent.clone()),
            timestamp: now,
            name: error.to_string(),
        });
        sink.accept(BuildEvent::Finished {
            id,
            parent: Some(parent),
            timestamp: now,
            name: error.to_string(),
            result: BuildResult::failure(error),
        });
    }
}

fn required<'a>(line: &'a SpyLine, key: &str) -> Option<&'a str> {
    let value = line.param(key);
    if value.is_none() {
        warn!(thread = line.thread_id, kind = %line.kind, key, "spy event is missing a parameter");
    }
    value
}

fn missing(line: &SpyLine, name: &str) {
    warn!(
        thread = line.thread_id,
        kind = %line.kind,
        name,
        "spy event refers to an execution that is not running"
    );
}

/// Result carried by a finish event of `line`'s kind.
fn outcome(line: &SpyLine) -> BuildResult {
    match line.kind {
        SpyEventKind::MojoFailed | SpyEventKind::ProjectFailed => {
            BuildResult::failure(line.param("error").unwrap_or_default())
        }
        SpyEventKind::MojoSkipped | SpyEventKind::ProjectSkipped => BuildResult::Skipped,
        _ => BuildResult::Success,
    }
}

fn start(sink: &mut dyn EventSink, entry: &ExecutionEntry, now: u64) {
    sink.accept(BuildEvent::Started {
        id: entry.id.clone(),
        parent: Some(entry.parent_id().clone()),
        timestamp: now,
        name: entry.name.clone(),
    });
}

fn finish(sink: &mut dyn EventSink, entry: &ExecutionEntry, now: u64, result: BuildResult) {
    sink.accept(BuildEvent::Finished {
        id: entry.id.clone(),
        parent: Some(entry.parent_id().clone()),
        timestamp: now,
        name: entry.name.clone(),
        result,
    });
}

fn finish_download(
    sink: &mut dyn EventSink,
    coord: &str,
    parent: EventId,
    now: u64,
    result: BuildResult,
) {
    sink.accept(BuildEvent::Finished {
        id: EventId::download(coord),
        parent: Some(parent),
        timestamp: now,
        name: coord.to_string(),
        result,
    });
}

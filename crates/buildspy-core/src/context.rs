use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::EventId;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Which kind of execution an entry tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// One sub-project of the reactor.
    Project,
    /// One goal execution inside a project.
    Task,
    /// A synthetic grouping node, e.g. the download aggregator.
    Node,
}

/// Kind of the entry an entry hangs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentKind {
    Session,
    Project,
    Task,
}

/// Parent pointer, fixed when the entry is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentLink {
    pub kind: ParentKind,
    pub id: EventId,
}

/// A live node of the reconstructed execution tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionEntry {
    pub kind: EntryKind,
    pub name: String,
    pub thread_id: u64,
    pub id: EventId,
    pub parent: ParentLink,
}

impl ExecutionEntry {
    pub fn parent_id(&self) -> &EventId {
        &self.parent.id
    }
}

/// Live execution entries of one build session, indexed by worker thread.
///
/// Each thread keeps its entries in creation order; lookups scan from the
/// most recent entry backwards so the innermost match wins.
#[derive(Debug)]
pub struct ExecutionContext {
    session: u64,
    next_seq: u64,
    threads: BTreeMap<u64, Vec<ExecutionEntry>>,
    last_thread_id: Option<u64>,
    reactor_projects: Vec<String>,
    started_projects: Vec<String>,
    session_ended: bool,
    project_failed: bool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// A fresh context with a process-unique session number.
    pub fn new() -> Self {
        Self::with_session(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    /// A fresh context with a caller-chosen session number.
    ///
    /// Replaying hosts use this to get identical ids across runs; the caller
    /// is responsible for not sharing a number between live sessions.
    pub fn with_session(session: u64) -> Self {
        Self {
            session,
            next_seq: 1,
            threads: BTreeMap::new(),
            last_thread_id: None,
            reactor_projects: Vec::new(),
            started_projects: Vec::new(),
            session_ended: false,
            project_failed: false,
        }
    }

    pub fn session_id(&self) -> EventId {
        EventId::Session(self.session)
    }

    fn mint_id(&mut self) -> EventId {
        let seq = self.next_seq;
        self.next_seq += 1;
        EventId::Entry {
            session: self.session,
            seq,
        }
    }

    fn session_link(&self) -> ParentLink {
        ParentLink {
            kind: ParentKind::Session,
            id: self.session_id(),
        }
    }

    fn find(&self, thread_id: u64, kind: EntryKind, name: &str) -> Option<&ExecutionEntry> {
        self.threads
            .get(&thread_id)?
            .iter()
            .rev()
            .find(|e| e.kind == kind && e.name == name)
    }

    fn innermost_of(&self, thread_id: u64, kind: EntryKind) -> Option<&ExecutionEntry> {
        self.threads
            .get(&thread_id)?
            .iter()
            .rev()
            .find(|e| e.kind == kind)
    }

    fn push(
        &mut self,
        kind: EntryKind,
        thread_id: u64,
        name: &str,
        parent: ParentLink,
    ) -> ExecutionEntry {
        let entry = ExecutionEntry {
            kind,
            name: name.to_string(),
            thread_id,
            id: self.mint_id(),
            parent,
        };
        self.threads
            .entry(thread_id)
            .or_default()
            .push(entry.clone());
        self.last_thread_id = Some(thread_id);
        entry
    }

    pub fn find_project(&self, thread_id: u64, name: &str) -> Option<&ExecutionEntry> {
        self.find(thread_id, EntryKind::Project, name)
    }

    pub fn find_task(&self, thread_id: u64, name: &str) -> Option<&ExecutionEntry> {
        self.find(thread_id, EntryKind::Task, name)
    }

    pub fn find_node(&self, thread_id: u64, name: &str) -> Option<&ExecutionEntry> {
        self.find(thread_id, EntryKind::Node, name)
    }

    /// Look up the project `name` on `thread_id`, creating it when asked.
    ///
    /// New projects hang under the session and are recorded in the started
    /// projects log in their `group:artifact` form.
    pub fn get_or_create_project(
        &mut self,
        thread_id: u64,
        name: &str,
        create: bool,
    ) -> Option<ExecutionEntry> {
        if let Some(entry) = self.find_project(thread_id, name) {
            return Some(entry.clone());
        }
        if !create {
            return None;
        }
        let parent = self.session_link();
        let entry = self.push(EntryKind::Project, thread_id, name, parent);
        self.started_projects.push(normalize_project_id(name));
        Some(entry)
    }

    /// Look up the task `name` on `thread_id`, creating it when asked.
    ///
    /// A new task hangs under the open project `project` on the same thread,
    /// or under the session when that project is not open.
    pub fn get_or_create_task(
        &mut self,
        thread_id: u64,
        project: Option<&str>,
        name: &str,
        create: bool,
    ) -> Option<ExecutionEntry> {
        if let Some(entry) = self.find_task(thread_id, name) {
            return Some(entry.clone());
        }
        if !create {
            return None;
        }
        let parent = project
            .and_then(|p| self.get_or_create_project(thread_id, p, false))
            .map(|p| ParentLink {
                kind: ParentKind::Project,
                id: p.id,
            })
            .unwrap_or_else(|| self.session_link());
        Some(self.push(EntryKind::Task, thread_id, name, parent))
    }

    /// Look up the node `name` on `thread_id`, creating it when asked.
    ///
    /// A new node hangs under the innermost open task, else the innermost open
    /// project, else the session.
    pub fn get_or_create_node(
        &mut self,
        thread_id: u64,
        name: &str,
        create: bool,
    ) -> Option<ExecutionEntry> {
        if let Some(entry) = self.find_node(thread_id, name) {
            return Some(entry.clone());
        }
        if !create {
            return None;
        }
        let parent = if let Some(task) = self.innermost_of(thread_id, EntryKind::Task) {
            ParentLink {
                kind: ParentKind::Task,
                id: task.id.clone(),
            }
        } else if let Some(project) = self.innermost_of(thread_id, EntryKind::Project) {
            ParentLink {
                kind: ParentKind::Project,
                id: project.id.clone(),
            }
        } else {
            self.session_link()
        };
        Some(self.push(EntryKind::Node, thread_id, name, parent))
    }

    /// Remove `entry` from its thread's live list. Completing twice is a no-op.
    pub fn complete(&mut self, entry: &ExecutionEntry) {
        if let Some(entries) = self.threads.get_mut(&entry.thread_id) {
            entries.retain(|e| e.id != entry.id);
            if entries.is_empty() {
                self.threads.remove(&entry.thread_id);
            }
        }
    }

    /// Id of the innermost live entry on the most recently active thread.
    pub fn current_id(&self) -> EventId {
        self.last_thread_id
            .and_then(|t| self.innermost_id(t))
            .unwrap_or_else(|| self.session_id())
    }

    /// Id of the innermost live entry on `thread_id`, if any.
    pub fn innermost_id(&self, thread_id: u64) -> Option<EventId> {
        self.threads
            .get(&thread_id)
            .and_then(|entries| entries.last())
            .map(|e| e.id.clone())
    }

    /// Id of the innermost live project or task on `thread_id`, skipping
    /// grouping nodes.
    pub fn innermost_execution_id(&self, thread_id: u64) -> Option<EventId> {
        self.threads
            .get(&thread_id)?
            .iter()
            .rev()
            .find(|e| e.kind != EntryKind::Node)
            .map(|e| e.id.clone())
    }

    /// Every live entry of the most recently active thread, innermost first.
    pub fn live_entries_of_last_thread_reversed(&self) -> Vec<&ExecutionEntry> {
        self.last_thread_id
            .and_then(|t| self.threads.get(&t))
            .map(|entries| entries.iter().rev().collect())
            .unwrap_or_default()
    }

    /// Every live entry of every thread, thread by thread, innermost first.
    pub fn live_entries_reversed(&self) -> Vec<&ExecutionEntry> {
        self.threads
            .values()
            .flat_map(|entries| entries.iter().rev())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.threads.values().map(Vec::len).sum()
    }

    pub fn last_thread_id(&self) -> Option<u64> {
        self.last_thread_id
    }

    pub fn set_reactor_projects(&mut self, projects: Vec<String>) {
        self.reactor_projects = projects;
    }

    pub fn reactor_projects(&self) -> &[String] {
        &self.reactor_projects
    }

    /// Projects started so far, as `group:artifact`.
    pub fn started_projects(&self) -> &[String] {
        &self.started_projects
    }

    /// Reactor projects that never started.
    pub fn pending_projects(&self) -> Vec<&str> {
        self.reactor_projects
            .iter()
            .filter(|p| {
                let normalized = normalize_project_id(p);
                !self.started_projects.contains(&normalized)
            })
            .map(String::as_str)
            .collect()
    }

    pub fn session_ended(&self) -> bool {
        self.session_ended
    }

    pub fn set_session_ended(&mut self) {
        self.session_ended = true;
    }

    pub fn project_failed(&self) -> bool {
        self.project_failed
    }

    pub fn set_project_failed(&mut self) {
        self.project_failed = true;
    }
}

/// Reduce a project id to `group:artifact`.
///
/// `org.acme:app:1.0` and `org.acme:app:jar:1.0` both become `org.acme:app`;
/// ids with fewer than three parts are kept as they are.
pub fn normalize_project_id(id: &str) -> String {
    let parts: Vec<&str> = id.split(':').collect();
    if parts.len() >= 3 {
        format!("{}:{}", parts[0], parts[1])
    } else {
        id.to_string()
    }
}

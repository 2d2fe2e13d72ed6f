use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use buildspy_core::events::{FilePosition, MessageKind};
use buildspy_core::{BuildEvent, BuildResult, EventId};

/// How events are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Indented tree with colors and a spinner.
    Tree { show_output: bool, spinner: bool },
    /// One JSON object per event.
    Json,
}

/// What the renderer saw, for the final status line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSummary {
    /// Result of the last session finish event, if any arrived.
    pub session_result: Option<BuildResult>,
    pub errors: usize,
    pub warnings: usize,
}

impl RenderSummary {
    fn observe(&mut self, event: &BuildEvent) {
        match event {
            BuildEvent::Finished {
                parent: None,
                result,
                ..
            } => self.session_result = Some(result.clone()),
            BuildEvent::Message { kind, .. } => match kind {
                MessageKind::Error => self.errors += 1,
                MessageKind::Warning => self.warnings += 1,
                MessageKind::Info => {}
            },
            _ => {}
        }
    }
}

/// Create a spinner showing the innermost running entry.
pub fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Spawn a renderer task.
///
/// Returns an event sender and a join handle. Drop the sender when done
/// to signal the render loop to finish, then await the handle.
pub fn spawn_renderer(
    mode: RenderMode,
) -> (
    mpsc::UnboundedSender<BuildEvent>,
    JoinHandle<Result<RenderSummary>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move { render_loop(rx, mode).await });
    (tx, handle)
}

/// Internal render loop that processes events and produces terminal output.
async fn render_loop(
    mut rx: mpsc::UnboundedReceiver<BuildEvent>,
    mode: RenderMode,
) -> Result<RenderSummary> {
    let mut summary = RenderSummary::default();
    let (show_output, pb) = match mode {
        RenderMode::Tree {
            show_output,
            spinner,
        } => (show_output, spinner.then(create_spinner)),
        RenderMode::Json => (false, None),
    };
    let mut tree = TreeRenderer::new(show_output);

    while let Some(event) = rx.recv().await {
        summary.observe(&event);

        if mode == RenderMode::Json {
            let json = serde_json::to_string(&event).context("Failed to serialize event")?;
            println!("{json}");
            continue;
        }

        let line = tree.render(&event);
        if let Some(ref pb) = pb {
            pb.set_message(tree.running_label());
        }
        if let Some(line) = line {
            match pb {
                Some(ref pb) => pb.suspend(|| println!("{line}")),
                None => println!("{line}"),
            }
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    Ok(summary)
}

/// Turns events into indented tree lines.
///
/// Output lines are forwarded by the parser to every open ancestor,
/// innermost first; only the first copy of each line is printed.
pub struct TreeRenderer {
    show_output: bool,
    depth: HashMap<EventId, usize>,
    names: HashMap<EventId, String>,
    running: Vec<EventId>,
    last_output: Option<(String, usize)>,
}

impl TreeRenderer {
    pub fn new(show_output: bool) -> Self {
        Self {
            show_output,
            depth: HashMap::new(),
            names: HashMap::new(),
            running: Vec::new(),
            last_output: None,
        }
    }

    fn depth_of(&self, id: Option<&EventId>) -> usize {
        id.and_then(|id| self.depth.get(id)).copied().unwrap_or(0)
    }

    /// Name of the innermost running entry, for the spinner.
    pub fn running_label(&self) -> String {
        self.running
            .last()
            .and_then(|id| self.names.get(id))
            .cloned()
            .unwrap_or_default()
    }

    /// Render one event, or `None` if it produces no line.
    pub fn render(&mut self, event: &BuildEvent) -> Option<String> {
        match event {
            BuildEvent::Started {
                id, parent, name, ..
            } => {
                let depth = self.depth_of(parent.as_ref()) + 1;
                self.depth.insert(id.clone(), depth);
                self.names.insert(id.clone(), name.clone());
                self.running.push(id.clone());
                self.last_output = None;
                Some(format!("{}{} {}", indent(depth), ">".cyan(), name.bold()))
            }
            BuildEvent::Finished {
                id,
                parent,
                name,
                result,
                ..
            } => {
                let depth = self
                    .depth
                    .remove(id)
                    .unwrap_or_else(|| self.depth_of(parent.as_ref()) + 1);
                self.names.remove(id);
                self.running.retain(|r| r != id);
                self.last_output = None;
                let status = match result {
                    BuildResult::Success => "SUCCESS".green().to_string(),
                    BuildResult::Failure { message } if message.is_empty() => {
                        "FAILED".red().to_string()
                    }
                    BuildResult::Failure { message } => {
                        format!("{} {}", "FAILED".red(), first_line(message))
                    }
                    BuildResult::Skipped => "SKIPPED".yellow().to_string(),
                    BuildResult::Unknown => "UNFINISHED".dimmed().to_string(),
                };
                let label = if parent.is_none() && name.is_empty() {
                    "build".to_string()
                } else {
                    name.clone()
                };
                Some(format!(
                    "{}{} {}",
                    indent(depth.saturating_sub(1)),
                    label,
                    status
                ))
            }
            BuildEvent::Output { parent, text } => {
                if !self.show_output {
                    return None;
                }
                let text = text.trim_end_matches('\n').to_string();
                let depth = self.depth_of(Some(parent));
                let duplicate = matches!(
                    &self.last_output,
                    Some((last, last_depth)) if *last == text && depth < *last_depth
                );
                self.last_output = Some((text.clone(), depth));
                if duplicate {
                    return None;
                }
                Some(format!("{}{}", indent(depth + 1), text.dimmed()))
            }
            BuildEvent::Message {
                parent,
                kind,
                title,
                text,
                position,
            } => {
                let depth = self.depth_of(Some(parent)) + 1;
                let label = match kind {
                    MessageKind::Error => "error".red().bold(),
                    MessageKind::Warning => "warning".yellow().bold(),
                    MessageKind::Info => "info".blue().bold(),
                };
                let location = position
                    .as_ref()
                    .map(|p| format!("{} ", format_position(p)))
                    .unwrap_or_default();
                let mut line = format!("{}{}: {}{}", indent(depth), label, location, title);
                for extra in text.lines().skip(1) {
                    line.push('\n');
                    line.push_str(&indent(depth + 1));
                    line.push_str(extra);
                }
                Some(line)
            }
        }
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// `path:line:col`, omitting the parts that are unknown.
pub fn format_position(position: &FilePosition) -> String {
    match (position.line, position.column) {
        (Some(line), Some(col)) => format!("{}:{}:{}", position.path, line, col),
        (Some(line), None) => format!("{}:{}", position.path, line),
        _ => position.path.clone(),
    }
}

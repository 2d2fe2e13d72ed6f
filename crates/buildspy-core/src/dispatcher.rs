use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::config::ParserConfig;
use crate::context::ExecutionContext;
use crate::events::{BuildEvent, BuildResult, Clock, EventSink, system_clock};
use crate::line::{Level, classify, is_blank};
use crate::matchers::{
    CompilationFailureMatcher, LineMatcher, SpyErrorMatcher, default_line_matchers,
};
use crate::reader::LineReader;
use crate::spy::{EventStateMachine, is_spy_line};

/// Where the dispatcher is in the output stream.
///
/// - `Active`: the session is running, every line is parsed
/// - `Ended`: the build reported the end of the session; only late error
///   lines are still looked at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Ended,
}

/// Turns a worker's output, one line at a time, into build events.
///
/// One dispatcher handles exactly one build session.
pub struct LineDispatcher {
    ctx: ExecutionContext,
    machine: EventStateMachine,
    matchers: Vec<Box<dyn LineMatcher>>,
    forward_output: bool,
    clock: Clock,
    phase: Phase,
    finalized: bool,
    finished: bool,
}

impl LineDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// A dispatcher with the built-in matchers enabled in `config`.
    pub fn with_default_matchers(config: &ParserConfig) -> Self {
        Self::builder()
            .config(config.clone())
            .default_matchers()
            .build()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn into_context(self) -> ExecutionContext {
        self.ctx
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Parse one raw line.
    ///
    /// `reader` is the cursor the line came from; matchers may read ahead
    /// through it. Returns whether the line was consumed by the spy channel
    /// or by a matcher.
    pub fn parse_line(
        &mut self,
        raw: &str,
        reader: &mut LineReader<'_>,
        sink: &mut dyn EventSink,
    ) -> bool {
        let now = (self.clock)();

        if self.phase == Phase::Ended {
            self.check_error_after_session(raw, sink, now);
            return false;
        }
        if is_blank(raw) {
            return false;
        }

        if is_spy_line(raw) {
            self.machine.process_line(raw, &mut self.ctx, sink, now);
            if self.ctx.session_ended() {
                debug!("session ended");
                self.phase = Phase::Ended;
                self.finalize(sink);
            }
            return true;
        }

        if self.forward_output {
            self.forward(raw, sink);
        }

        let line = classify(raw);
        let parent = self.ctx.current_id();
        for matcher in self.matchers.iter_mut() {
            if !matcher.supports_level(line.level) {
                continue;
            }
            if matcher.try_consume(&parent, &self.ctx, &line, reader, sink) {
                trace!(line = raw, "line consumed by matcher");
                return true;
            }
        }
        false
    }

    /// Flush everything still pending once the stream is exhausted.
    ///
    /// Downloads that never resolved and entries that never completed are
    /// finished with an unknown result, and a session that never reported its
    /// end gets a synthetic finish. Calling this more than once has no further
    /// effect.
    pub fn finish(&mut self, sink: &mut dyn EventSink) {
        if self.finished {
            return;
        }
        self.finished = true;
        let now = (self.clock)();

        self.finalize(sink);
        self.machine.abandon_downloads(sink, now);

        let open: Vec<_> = self
            .ctx
            .live_entries_reversed()
            .into_iter()
            .cloned()
            .collect();
        for entry in open {
            debug!(name = %entry.name, id = %entry.id, "finishing entry left open");
            sink.accept(BuildEvent::Finished {
                id: entry.id.clone(),
                parent: Some(entry.parent_id().clone()),
                timestamp: now,
                name: entry.name.clone(),
                result: BuildResult::Unknown,
            });
            self.ctx.complete(&entry);
        }

        if !self.ctx.session_ended() {
            self.machine
                .finish_session(&self.ctx, sink, now, BuildResult::Unknown);
        }
        self.phase = Phase::Ended;
    }

    /// Feed every line of `lines` through the dispatcher, then [`finish`](Self::finish).
    pub fn run<'a, I>(mut self, lines: I, sink: &mut dyn EventSink) -> ExecutionContext
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: 'a,
    {
        let mut reader = LineReader::new(lines);
        while let Some(raw) = reader.next_raw() {
            self.parse_line(&raw, &mut reader, sink);
        }
        self.finish(sink);
        self.ctx
    }

    /// Share this dispatcher between callers behind a lock.
    pub fn into_shared(self) -> SharedDispatcher {
        SharedDispatcher(Arc::new(Mutex::new(self)))
    }

    fn finalize(&mut self, sink: &mut dyn EventSink) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        let session = self.ctx.session_id();
        for matcher in self.matchers.iter_mut() {
            matcher.finalize(&session, sink);
        }
    }

    fn forward(&self, raw: &str, sink: &mut dyn EventSink) {
        let text = format!("{}\n", raw.trim_end_matches(['\n', '\r']));
        let open = self.ctx.live_entries_of_last_thread_reversed();
        if open.is_empty() {
            sink.accept(BuildEvent::Output {
                parent: self.ctx.session_id(),
                text,
            });
            return;
        }
        for entry in open {
            sink.accept(BuildEvent::Output {
                parent: entry.id.clone(),
                text: text.clone(),
            });
        }
    }

    /// A late error line fails a session that had reported success, once.
    fn check_error_after_session(&mut self, raw: &str, sink: &mut dyn EventSink, now: u64) {
        if is_spy_line(raw) || self.ctx.project_failed() {
            return;
        }
        let line = classify(raw);
        if line.level != Some(Level::Error) {
            return;
        }
        debug!(line = raw, "error reported after the session ended");
        self.ctx.set_project_failed();
        self.machine
            .finish_session(&self.ctx, sink, now, BuildResult::failure(line.text));
    }
}

/// Assembles a [`LineDispatcher`] with injected matchers and settings.
#[derive(Default)]
pub struct DispatcherBuilder {
    config: ParserConfig,
    context: Option<ExecutionContext>,
    clock: Option<Clock>,
    line_matchers: Vec<Box<dyn LineMatcher>>,
    error_matchers: Vec<Box<dyn SpyErrorMatcher>>,
    default_matchers: bool,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: ParserConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing context instead of a fresh one.
    pub fn context(mut self, ctx: ExecutionContext) -> Self {
        self.context = Some(ctx);
        self
    }

    pub fn clock(mut self, clock: impl Fn() -> u64 + Send + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Register a line matcher. Matchers are tried in registration order.
    pub fn line_matcher(mut self, matcher: impl LineMatcher + 'static) -> Self {
        self.line_matchers.push(Box::new(matcher));
        self
    }

    /// Register a matcher for error text carried by failed events.
    pub fn spy_error_matcher(mut self, matcher: impl SpyErrorMatcher + 'static) -> Self {
        self.error_matchers.push(Box::new(matcher));
        self
    }

    /// Also register the built-in matchers enabled in the config, after any
    /// explicitly registered ones.
    pub fn default_matchers(mut self) -> Self {
        self.default_matchers = true;
        self
    }

    pub fn build(self) -> LineDispatcher {
        let mut machine = EventStateMachine::new(
            &self.config.session_name,
            &self.config.download_node_name,
        );
        for matcher in self.error_matchers {
            machine.add_error_matcher(matcher);
        }

        let mut matchers = self.line_matchers;
        if self.default_matchers {
            let toggles = &self.config.matchers;
            matchers.extend(default_line_matchers(toggles.javac, toggles.kotlin));
            if toggles.compilation_failure {
                machine.add_error_matcher(Box::new(CompilationFailureMatcher));
            }
        }

        LineDispatcher {
            ctx: self.context.unwrap_or_default(),
            machine,
            matchers,
            forward_output: self.config.forward_output,
            clock: self.clock.unwrap_or_else(system_clock),
            phase: Phase::Active,
            finalized: false,
            finished: false,
        }
    }
}

/// A dispatcher shared between callers. Every call holds the session lock
/// for its whole duration, so lines are never processed concurrently.
#[derive(Clone)]
pub struct SharedDispatcher(Arc<Mutex<LineDispatcher>>);

impl SharedDispatcher {
    pub fn parse_line(
        &self,
        raw: &str,
        reader: &mut LineReader<'_>,
        sink: &mut dyn EventSink,
    ) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .parse_line(raw, reader, sink)
    }

    pub fn finish(&self, sink: &mut dyn EventSink) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EntryKind;
    use crate::events::{EventId, MessageKind};
    use crate::matchers::JavacMatcher;
    use crate::spy::{SpyEventKind, encode};

    fn dispatcher() -> LineDispatcher {
        LineDispatcher::builder()
            .context(ExecutionContext::with_session(1))
            .clock(|| 42)
            .build()
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    /// Lifecycle events only, rendered as `start NAME` / `finish NAME RESULT`.
    fn lifecycle(events: &[BuildEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                BuildEvent::Started { name, .. } => Some(format!("start {name}")),
                BuildEvent::Finished { name, result, .. } => {
                    Some(format!("finish {name} {result:?}"))
                }
                _ => None,
            })
            .collect()
    }

    fn outputs(events: &[BuildEvent]) -> Vec<(EventId, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                BuildEvent::Output { parent, text } => Some((parent.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_project_start_and_success() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let ctx = dispatcher().run(
            lines(&[
                "[IJ]-0-[IJ]-ProjectStarted-[IJ]-id=app",
                "[IJ]-0-[IJ]-ProjectSucceeded-[IJ]-id=app",
                "[IJ]-0-[IJ]-SessionEnded",
            ]),
            &mut sink,
        );
        assert_eq!(
            lifecycle(&sink),
            vec!["start app", "finish app Success", "finish build Success"]
        );
        assert_eq!(ctx.live_count(), 0);
        match &sink[0] {
            BuildEvent::Started {
                parent, timestamp, ..
            } => {
                assert_eq!(parent, &Some(EventId::Session(1)));
                assert_eq!(*timestamp, 42);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_well_formed_sequence_nests_and_empties_context() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let ctx = dispatcher().run(
            vec![
                encode(0, SpyEventKind::ProjectStarted, &[("id", "A")]),
                encode(0, SpyEventKind::MojoStarted, &[("id", "A"), ("goal", "g")]),
                encode(
                    0,
                    SpyEventKind::MojoSucceeded,
                    &[("id", "A"), ("goal", "g")],
                ),
                encode(0, SpyEventKind::ProjectSucceeded, &[("id", "A")]),
                encode(0, SpyEventKind::SessionEnded, &[]),
            ],
            &mut sink,
        );
        assert_eq!(
            lifecycle(&sink)[..4],
            ["start A", "start g", "finish g Success", "finish A Success"]
        );
        let project = sink[0].id().cloned();
        match &sink[1] {
            BuildEvent::Started { parent, .. } => assert_eq!(parent, &project),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(ctx.live_count(), 0);
    }

    #[test]
    fn test_error_after_session_end_fails_once() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let ctx = dispatcher().run(
            lines(&[
                "[IJ]-0-[IJ]-SessionEnded",
                "[INFO] building",
                "[ERROR] boom",
                "[ERROR] boom again",
            ]),
            &mut sink,
        );
        assert_eq!(
            lifecycle(&sink),
            vec![
                "finish build Success".to_string(),
                format!("finish build {:?}", BuildResult::failure("boom")),
            ]
        );
        assert!(ctx.project_failed());
        // Nothing after the session end is forwarded as output
        assert!(outputs(&sink).is_empty());
    }

    #[test]
    fn test_error_after_failed_session_is_noop() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        dispatcher().run(
            lines(&[
                "[IJ]-0-[IJ]-ProjectStarted-[IJ]-id=app",
                "[IJ]-0-[IJ]-ProjectFailed-[IJ]-id=app-[IJ]-error=bad",
                "[IJ]-0-[IJ]-SessionEnded",
                "[ERROR] late",
            ]),
            &mut sink,
        );
        let session_finishes = sink
            .iter()
            .filter(|e| e.id() == Some(&EventId::Session(1)))
            .count();
        assert_eq!(session_finishes, 1);
    }

    #[test]
    fn test_download_then_resolution() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let mut d = dispatcher();
        let mut reader = LineReader::empty();
        for raw in [
            encode(
                0,
                SpyEventKind::ArtifactDownloading,
                &[("artifactCoord", "g:a:1")],
            ),
            encode(
                0,
                SpyEventKind::ArtifactResolved,
                &[("artifactCoord", "g:a:1"), ("error", "null")],
            ),
            encode(
                0,
                SpyEventKind::ArtifactResolved,
                &[("artifactCoord", "g:a:1")],
            ),
        ] {
            assert!(d.parse_line(&raw, &mut reader, &mut sink));
        }
        let download: Vec<&BuildEvent> = sink
            .iter()
            .filter(|e| e.id() == Some(&EventId::download("g:a:1")))
            .collect();
        assert_eq!(download.len(), 2);
        assert!(matches!(download[0], BuildEvent::Started { .. }));
        assert!(matches!(
            download[1],
            BuildEvent::Finished {
                result: BuildResult::Success,
                ..
            }
        ));
    }

    #[test]
    fn test_failed_task_without_start_emits_nothing() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let mut d = dispatcher();
        let consumed = d.parse_line(
            "[IJ]-0-[IJ]-MojoFailed-[IJ]-id=app-[IJ]-goal=g-[IJ]-error=X",
            &mut LineReader::empty(),
            &mut sink,
        );
        assert!(consumed);
        assert!(sink.is_empty());
        assert_eq!(d.context().live_count(), 0);
    }

    #[test]
    fn test_plain_lines_forwarded_to_open_entries() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let mut d = dispatcher();
        let mut reader = LineReader::empty();
        d.parse_line("[INFO] before anything\r\n", &mut reader, &mut sink);
        d.parse_line(
            "[IJ]-0-[IJ]-ProjectStarted-[IJ]-id=app",
            &mut reader,
            &mut sink,
        );
        d.parse_line(
            "[IJ]-0-[IJ]-MojoStarted-[IJ]-id=app-[IJ]-goal=compile",
            &mut reader,
            &mut sink,
        );
        d.parse_line("[INFO] Compiling 3 files", &mut reader, &mut sink);

        let project = d.context().find_project(0, "app").unwrap().id.clone();
        let task = d.context().find_task(0, "compile").unwrap().id.clone();
        assert_eq!(
            outputs(&sink),
            vec![
                (EventId::Session(1), "[INFO] before anything\n".to_string()),
                (task, "[INFO] Compiling 3 files\n".to_string()),
                (project, "[INFO] Compiling 3 files\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_output_forwarding_can_be_disabled() {
        let config = ParserConfig {
            forward_output: false,
            ..ParserConfig::default()
        };
        let mut sink: Vec<BuildEvent> = Vec::new();
        LineDispatcher::builder()
            .config(config)
            .context(ExecutionContext::with_session(1))
            .build()
            .run(lines(&["[INFO] hello"]), &mut sink);
        assert!(outputs(&sink).is_empty());
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let mut d = dispatcher();
        assert!(!d.parse_line("   ", &mut LineReader::empty(), &mut sink));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_stream_end_without_session_end() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let ctx = dispatcher().run(
            lines(&[
                "[IJ]-0-[IJ]-ProjectStarted-[IJ]-id=app",
                "[IJ]-0-[IJ]-MojoStarted-[IJ]-id=app-[IJ]-goal=compile",
            ]),
            &mut sink,
        );
        assert_eq!(
            lifecycle(&sink),
            vec![
                "start app",
                "start compile",
                "finish compile Unknown",
                "finish app Unknown",
                "finish build Unknown",
            ]
        );
        assert_eq!(ctx.live_count(), 0);
    }

    #[test]
    fn test_stream_end_abandons_open_downloads() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let ctx = dispatcher().run(
            lines(&[
                "[IJ]-0-[IJ]-ProjectStarted-[IJ]-id=app",
                "[IJ]-0-[IJ]-ArtifactDownloading-[IJ]-artifactCoord=x:y:1",
            ]),
            &mut sink,
        );
        assert_eq!(
            lifecycle(&sink),
            vec![
                "start app",
                "start Downloading dependencies",
                "start x:y:1",
                "finish x:y:1 Unknown",
                "finish Downloading dependencies Unknown",
                "finish app Unknown",
                "finish build Unknown",
            ]
        );
        let download = EventId::download("x:y:1");
        let parents: Vec<&Option<EventId>> = sink
            .iter()
            .filter_map(|e| match e {
                BuildEvent::Started { id, parent, .. } if *id == download => Some(parent),
                BuildEvent::Finished { id, parent, .. } if *id == download => Some(parent),
                _ => None,
            })
            .collect();
        assert_eq!(parents.len(), 2);
        assert_eq!(parents[0], parents[1]);
        assert_eq!(ctx.live_count(), 0);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let mut d = dispatcher();
        d.finish(&mut sink);
        d.finish(&mut sink);
        assert_eq!(lifecycle(&sink), vec!["finish build Unknown"]);
        assert_eq!(d.phase(), Phase::Ended);
    }

    #[test]
    fn test_matchers_see_lines_and_pushed_back_lines_are_reprocessed() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        LineDispatcher::builder()
            .context(ExecutionContext::with_session(1))
            .clock(|| 0)
            .line_matcher(JavacMatcher::default())
            .build()
            .run(
                lines(&[
                    "[ERROR] /src/A.java:[1,2] cannot find symbol",
                    "[ERROR]   symbol: class X",
                    "[ERROR] /src/B.java:[3,4] missing return",
                ]),
                &mut sink,
            );
        let messages: Vec<(&str, u32)> = sink
            .iter()
            .filter_map(|e| match e {
                BuildEvent::Message {
                    kind: MessageKind::Error,
                    title,
                    position: Some(p),
                    ..
                } => Some((title.as_str(), p.line.unwrap_or_default())),
                _ => None,
            })
            .collect();
        assert_eq!(
            messages,
            vec![("cannot find symbol", 1), ("missing return", 3)]
        );
        // The pushed-back line was forwarded like any other line
        assert_eq!(outputs(&sink).len(), 2);
    }

    struct Counting {
        level: Level,
        seen: Arc<Mutex<Vec<String>>>,
        finalized: Arc<Mutex<usize>>,
        consume: bool,
    }

    impl LineMatcher for Counting {
        fn supports_level(&self, level: Option<Level>) -> bool {
            level == Some(self.level)
        }

        fn try_consume(
            &mut self,
            _parent: &EventId,
            _ctx: &ExecutionContext,
            line: &crate::line::ClassifiedLine,
            _reader: &mut LineReader<'_>,
            _sink: &mut dyn EventSink,
        ) -> bool {
            self.seen.lock().unwrap().push(line.text.clone());
            self.consume
        }

        fn finalize(&mut self, _session: &EventId, _sink: &mut dyn EventSink) {
            *self.finalized.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_first_consuming_matcher_stops_scan() {
        let first_seen = Arc::new(Mutex::new(Vec::new()));
        let second_seen = Arc::new(Mutex::new(Vec::new()));
        let finalized = Arc::new(Mutex::new(0));
        let mut sink: Vec<BuildEvent> = Vec::new();
        LineDispatcher::builder()
            .context(ExecutionContext::with_session(1))
            .line_matcher(Counting {
                level: Level::Warning,
                seen: first_seen.clone(),
                finalized: finalized.clone(),
                consume: true,
            })
            .line_matcher(Counting {
                level: Level::Warning,
                seen: second_seen.clone(),
                finalized: finalized.clone(),
                consume: true,
            })
            .build()
            .run(
                lines(&["[WARNING] w", "[INFO] i", "[IJ]-0-[IJ]-SessionEnded"]),
                &mut sink,
            );
        assert_eq!(*first_seen.lock().unwrap(), vec!["w".to_string()]);
        assert!(second_seen.lock().unwrap().is_empty());
        // Finalized on session end, not again at stream end
        assert_eq!(*finalized.lock().unwrap(), 2);
    }

    #[test]
    fn test_session_end_finalizes_matchers_before_stream_end() {
        let finalized = Arc::new(Mutex::new(0));
        let mut d = LineDispatcher::builder()
            .context(ExecutionContext::with_session(1))
            .line_matcher(Counting {
                level: Level::Error,
                seen: Arc::new(Mutex::new(Vec::new())),
                finalized: finalized.clone(),
                consume: false,
            })
            .build();
        let mut sink: Vec<BuildEvent> = Vec::new();
        d.parse_line(
            "[IJ]-0-[IJ]-SessionEnded",
            &mut LineReader::empty(),
            &mut sink,
        );
        assert_eq!(*finalized.lock().unwrap(), 1);
        assert_eq!(d.phase(), Phase::Ended);
    }

    #[test]
    fn test_default_matchers_follow_config() {
        let mut sink: Vec<BuildEvent> = Vec::new();
        let mut config = ParserConfig::default();
        config.matchers.javac = false;
        LineDispatcher::builder()
            .config(config)
            .context(ExecutionContext::with_session(1))
            .default_matchers()
            .build()
            .run(
                lines(&[
                    "[ERROR] /src/A.java:[1,2] ignored",
                    "[ERROR] e: /src/A.kt: (1, 2): kotlin error",
                ]),
                &mut sink,
            );
        let titles: Vec<&str> = sink
            .iter()
            .filter_map(|e| match e {
                BuildEvent::Message { title, .. } => Some(title.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(titles, vec!["kotlin error"]);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let input = lines(&[
            "[IJ]-0-[IJ]-SessionStarted-[IJ]-projects=g:a:1&&g:b:1",
            "[IJ]-1-[IJ]-ProjectStarted-[IJ]-id=g:a:1",
            "[IJ]-2-[IJ]-ProjectStarted-[IJ]-id=g:b:1",
            "[IJ]-1-[IJ]-MojoStarted-[IJ]-id=g:a:1-[IJ]-goal=compile",
            "[INFO] Compiling",
            "[IJ]-2-[IJ]-ArtifactDownloading-[IJ]-artifactCoord=x:y:2",
            "[IJ]-2-[IJ]-ArtifactResolved-[IJ]-artifactCoord=x:y:2",
            "[IJ]-1-[IJ]-MojoFailed-[IJ]-id=g:a:1-[IJ]-goal=compile-[IJ]-error=/A.java:[1,1] bad",
            "[IJ]-1-[IJ]-ProjectFailed-[IJ]-id=g:a:1-[IJ]-error=failed",
            "[IJ]-2-[IJ]-ProjectSucceeded-[IJ]-id=g:b:1",
            "[IJ]-0-[IJ]-SessionEnded",
        ]);
        let run = || {
            let mut sink: Vec<BuildEvent> = Vec::new();
            LineDispatcher::builder()
                .context(ExecutionContext::with_session(9))
                .clock(|| 7)
                .default_matchers()
                .build()
                .run(input.clone(), &mut sink);
            sink
        };
        let first = run();
        assert_eq!(first, run());
        assert!(matches!(
            first.last(),
            Some(BuildEvent::Finished { result, parent: None, .. }) if result.is_failure()
        ));
    }

    #[test]
    fn test_entries_nest_under_download_node_kind() {
        let mut d = dispatcher();
        let mut sink: Vec<BuildEvent> = Vec::new();
        d.parse_line(
            "[IJ]-0-[IJ]-ArtifactDownloading-[IJ]-artifactCoord=a:b:1",
            &mut LineReader::empty(),
            &mut sink,
        );
        let live = d.context().live_entries_reversed();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].kind, EntryKind::Node);
    }

    #[test]
    fn test_shared_dispatcher_serializes_calls() {
        let shared = dispatcher().into_shared();
        let other = shared.clone();
        let handle = std::thread::spawn(move || {
            let mut sink: Vec<BuildEvent> = Vec::new();
            other.parse_line(
                "[IJ]-0-[IJ]-ProjectStarted-[IJ]-id=app",
                &mut LineReader::empty(),
                &mut sink,
            );
            sink
        });
        let from_thread = handle.join().unwrap();
        assert_eq!(lifecycle(&from_thread), vec!["start app"]);

        let mut sink: Vec<BuildEvent> = Vec::new();
        shared.finish(&mut sink);
        assert_eq!(
            lifecycle(&sink),
            vec!["finish app Unknown", "finish build Unknown"]
        );
    }
}

//! Turns the text output of a build-tool worker into a tree of build events.
//!
//! The worker interleaves level-prefixed log lines with a machine-readable
//! spy channel (see [`spy`]). A [`LineDispatcher`] takes the lines one at a
//! time, rebuilds the reactor session / project / task / node tree in an
//! [`ExecutionContext`], and emits [`BuildEvent`]s to an [`EventSink`].
//!
//! ```
//! use buildspy_core::{BuildEvent, LineDispatcher, ParserConfig};
//!
//! let lines = vec![
//!     "[IJ]-0-[IJ]-ProjectStarted-[IJ]-id=app".to_string(),
//!     "[INFO] Building app".to_string(),
//!     "[IJ]-0-[IJ]-ProjectSucceeded-[IJ]-id=app".to_string(),
//!     "[IJ]-0-[IJ]-SessionEnded".to_string(),
//! ];
//! let mut events: Vec<BuildEvent> = Vec::new();
//! let dispatcher = LineDispatcher::with_default_matchers(&ParserConfig::default());
//! let ctx = dispatcher.run(lines, &mut events);
//! assert_eq!(ctx.live_count(), 0);
//! assert!(matches!(events.last(), Some(BuildEvent::Finished { parent: None, .. })));
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod line;
pub mod matchers;
pub mod reader;
pub mod spy;

pub use config::ParserConfig;
pub use context::ExecutionContext;
pub use dispatcher::{DispatcherBuilder, LineDispatcher, Phase, SharedDispatcher};
pub use events::{BuildEvent, BuildResult, EventId, EventSink};
pub use reader::LineReader;

use serde::Serialize;

/// Log level announced by a plain output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    /// Levels in the order their prefixes are tried.
    pub const ALL: [Level; 3] = [Level::Info, Level::Warning, Level::Error];

    /// The exact literal prefix, trailing space included.
    pub fn prefix(self) -> &'static str {
        match self {
            Level::Info => "[INFO] ",
            Level::Warning => "[WARNING] ",
            Level::Error => "[ERROR] ",
        }
    }
}

/// A plain output line split into its level and payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassifiedLine {
    pub level: Option<Level>,
    pub text: String,
}

impl ClassifiedLine {
    pub fn new(level: Option<Level>, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

/// Drop the line terminator, then keep only what follows the last `\r`.
///
/// Progress bars redraw themselves with carriage returns, so the text after
/// the last one is what the terminal would finally show.
pub fn strip_progress(raw: &str) -> &str {
    let line = raw.trim_end_matches(['\n', '\r']);
    match line.rfind('\r') {
        Some(idx) => &line[idx + 1..],
        None => line,
    }
}

/// Classify a raw output line by its level prefix.
pub fn classify(raw: &str) -> ClassifiedLine {
    let line = strip_progress(raw);
    for level in Level::ALL {
        if let Some(rest) = line.strip_prefix(level.prefix()) {
            return ClassifiedLine::new(Some(level), rest);
        }
    }
    ClassifiedLine::new(None, line)
}

/// True for empty or whitespace-only lines.
pub fn is_blank(raw: &str) -> bool {
    raw.trim().is_empty()
}

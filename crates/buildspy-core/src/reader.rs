use crate::line::{ClassifiedLine, classify};

/// Pull-based cursor over raw output lines with room for one pushed-back line.
///
/// The dispatcher reads its next line through the same cursor that matchers
/// use for lookahead, so a line a matcher pushes back is processed again as
/// if it had just arrived.
pub struct LineReader<'a> {
    source: Box<dyn Iterator<Item = String> + 'a>,
    pushed_back: Option<String>,
    last: Option<String>,
}

impl<'a> LineReader<'a> {
    pub fn new<I>(lines: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: 'a,
    {
        Self {
            source: Box::new(lines.into_iter()),
            pushed_back: None,
            last: None,
        }
    }

    /// A reader with nothing to look ahead at, for hosts that push lines one by one.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Next raw line, taking the pushed-back line first.
    pub fn next_raw(&mut self) -> Option<String> {
        let line = self.pushed_back.take().or_else(|| self.source.next())?;
        self.last = Some(line.clone());
        Some(line)
    }

    /// Next line, classified.
    pub fn read_line(&mut self) -> Option<ClassifiedLine> {
        self.next_raw().map(|raw| classify(&raw))
    }

    /// Re-queue the most recently returned line.
    ///
    /// Does nothing when nothing was read yet or a line is already queued.
    pub fn push_back(&mut self) {
        if self.pushed_back.is_none()
            && let Some(line) = self.last.take()
        {
            self.pushed_back = Some(line);
        }
    }

    /// Look at the next line without consuming it.
    pub fn peek(&mut self) -> Option<ClassifiedLine> {
        if self.pushed_back.is_some() {
            return self.pushed_back.as_deref().map(classify);
        }
        let line = self.read_line()?;
        self.push_back();
        Some(line)
    }
}

impl Iterator for LineReader<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.next_raw()
    }
}

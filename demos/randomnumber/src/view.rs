//! Where rendered text ends up.

use std::io::{self, Write};

/// A place that shows lines of text, newest first.
pub trait Surface {
    /// Insert `text` as a new element at `position` (0 is the top).
    fn insert_text(&mut self, position: usize, text: &str) -> io::Result<()>;
}

/// Writes each insertion as a line.
///
/// A terminal cannot insert above earlier output, so position is ignored and
/// the newest element is simply the last line printed.
pub struct TerminalSurface<W: Write> {
    out: W,
}

impl TerminalSurface<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> Surface for TerminalSurface<W> {
    fn insert_text(&mut self, _position: usize, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }
}

/// Keeps inserted text in memory, in display order.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub lines: Vec<String>,
}

#[cfg(test)]
impl Surface for RecordingSurface {
    fn insert_text(&mut self, position: usize, text: &str) -> io::Result<()> {
        let position = position.min(self.lines.len());
        self.lines.insert(position, text.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_writes_lines() {
        let mut surface = TerminalSurface { out: Vec::new() };
        surface.insert_text(0, "42").unwrap();
        surface.insert_text(0, "Closed").unwrap();
        assert_eq!(String::from_utf8(surface.out).unwrap(), "42\nClosed\n");
    }

    #[test]
    fn recording_inserts_at_position() {
        let mut surface = RecordingSurface::default();
        surface.insert_text(0, "first").unwrap();
        surface.insert_text(0, "second").unwrap();
        surface.insert_text(9, "bottom").unwrap();
        assert_eq!(surface.lines, vec!["second", "first", "bottom"]);
    }
}

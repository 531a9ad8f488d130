use serde::{Deserialize, Serialize};

/// The unique id of a single contiguous `write()` to the terminal. Used to
/// correlate dirty cells with the operation that produced them.
pub type WriteId = u32;

pub const ATTR_REVERSE: u16 = 1 << 0;
pub const ATTR_UNDERLINE: u16 = 1 << 1;
pub const ATTR_BOLD: u16 = 1 << 2;
pub const ATTR_GFX: u16 = 1 << 3;
pub const ATTR_ITALIC: u16 = 1 << 4;
pub const ATTR_BLINK: u16 = 1 << 5;
/// Set on the last glyph of a line that continues onto the next line.
pub const ATTR_WRAP: u16 = 1 << 6;
pub const ATTR_BLANK: u16 = 1 << 7;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// A single cell of the terminal grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Glyph {
    pub char: char,
    pub mode: u16,
    pub fg: Color,
    pub bg: Color,
    pub transparent: bool,
    pub write: WriteId,
}

impl Default for Glyph {
    fn default() -> Self {
        Glyph {
            char: ' ',
            mode: ATTR_BLANK,
            fg: Color::Default,
            bg: Color::Default,
            transparent: false,
            write: 0,
        }
    }
}

impl Glyph {
    /// Whether this cell reads as whitespace.
    pub fn is_empty(&self) -> bool {
        self.char == ' '
    }

    /// Whether this cell has never been written to.
    pub fn is_default(&self) -> bool {
        self.mode & ATTR_BLANK != 0
    }

    pub fn is_wrap(&self) -> bool {
        self.mode & ATTR_WRAP != 0
    }
}

pub type Line = Vec<Glyph>;

pub fn empty_line(cols: usize) -> Line {
    vec![Glyph::default(); cols]
}

pub fn line_string(line: &[Glyph]) -> String {
    line.iter().map(|g| g.char).collect()
}

/// A line continues onto the next one iff its last glyph carries the wrap
/// attribute.
pub fn is_wrapped(line: &[Glyph]) -> bool {
    line.last().map(|g| g.is_wrap()).unwrap_or(false)
}

/// The length of the line up to (and including) its last non-whitespace,
/// non-default glyph.
pub fn line_length(line: &[Glyph]) -> usize {
    for i in (0..line.len()).rev() {
        let glyph = &line[i];
        if glyph.char != ' ' || glyph.fg != Color::Default || glyph.bg != Color::Default {
            return i + 1;
        }
    }
    0
}

/// The column range `[first, last]` of non-whitespace content, or `None` for
/// a blank line.
pub fn non_whitespace(line: &[Glyph]) -> Option<(usize, usize)> {
    let mut first = None;
    let mut last = 0;
    for (i, glyph) in line.iter().enumerate() {
        if glyph.is_empty() {
            continue;
        }
        if first.is_none() {
            first = Some(i);
        }
        last = i;
    }
    first.map(|first| (first, last))
}

/// Build a line from literal text. Test helper.
#[cfg(test)]
pub(crate) fn text_line(text: &str) -> Line {
    text.chars()
        .map(|char| Glyph {
            char,
            mode: 0,
            ..Glyph::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_ignores_trailing_whitespace() {
        let line = text_line("abc   ");
        assert_eq!(line_length(&line), 3);
        assert_eq!(line_length(&empty_line(10)), 0);
    }

    #[test]
    fn non_whitespace_span() {
        let line = text_line("  abc  ");
        assert_eq!(non_whitespace(&line), Some((2, 4)));
        assert_eq!(non_whitespace(&empty_line(4)), None);
    }
}

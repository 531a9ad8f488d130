use unicode_width::UnicodeWidthChar;

use crate::emu::{non_whitespace, Color, Glyph, Line, ScreenLine, State};
use crate::geom::{clamp, Size, Vec2};
use crate::tty::TtyState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollPosition {
    Top,
    Center,
    Bottom,
}

/// A cell range to paint over the rendered view. `screen` ranges are in
/// screen coordinates and get translated by flowing the whole screen;
/// otherwise coordinates are already in joined history+screen space.
#[derive(Clone, Copy, Debug)]
pub struct Highlight {
    pub from: Vec2,
    pub to: Vec2,
    pub fg: Color,
    pub bg: Color,
    pub screen: bool,
}

/// Cursor navigation over the flowed history of a terminal.
///
/// Until the user moves, the cursor follows the live terminal cursor; the
/// first movement flips `have_moved` and from then on the anchor `root` and
/// the sticky `desired_col` are preserved across updates.
pub struct Movement {
    viewport: Size,
    root: Vec2,
    /// The cursor's position relative to the viewport.
    cursor: Vec2,
    desired_col: i32,
    have_moved: bool,
}

impl Movement {
    pub fn new(term: &State, viewport: Size) -> Self {
        let mut movement = Movement {
            viewport,
            root: term.root(),
            cursor: Vec2::ZERO,
            desired_col: 0,
            have_moved: false,
        };
        movement.center_terminal_cursor(term);
        movement
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn root(&self) -> Vec2 {
        self.root
    }

    pub fn cursor(&self) -> Vec2 {
        self.cursor
    }

    pub fn have_moved(&self) -> bool {
        self.have_moved
    }

    /// Re-anchor on the live terminal cursor; called after time steps and
    /// incoming output while in follow mode.
    pub fn center_terminal_cursor(&mut self, term: &State) {
        // If the cursor is visible in the viewport as-is, just adopt it.
        let result = term.flow(self.viewport, self.root);
        if result.cursor_ok {
            self.cursor = result.cursor;
            self.desired_col = self.cursor.c;
            return;
        }

        // Otherwise flow everything below the root; the cursor must be in
        // there somewhere, so scroll it to the center.
        let result = term.flow(Vec2::new(0, self.viewport.c), self.root);
        if !result.cursor_ok {
            return;
        }
        let row = result.cursor.r as usize;
        if row >= result.lines.len() {
            return;
        }
        self.cursor.c = result.cursor.c;
        self.desired_col = self.cursor.c;
        let dest = result.lines[row].root();
        self.scroll_to_line(term, dest, ScrollPosition::Center);
    }

    /// Reset to follow mode, tracking the live cursor again.
    pub fn snap_to_terminal(&mut self, term: &State) {
        self.have_moved = false;
        self.root = term.root();
        self.cursor = Vec2::ZERO;
        self.desired_col = 0;
        self.center_terminal_cursor(term);
    }

    pub fn scroll_top(&mut self, term: &State) {
        self.have_moved = true;
        self.scroll_to_line(term, Vec2::ZERO, ScrollPosition::Top);
        self.cursor.c = self.resolve_screen_column(term, self.cursor.r);
    }

    pub fn scroll_bottom(&mut self, term: &State) {
        self.have_moved = true;
        let last = self.get_last_root(term);
        self.scroll_to_line(term, last, ScrollPosition::Bottom);
        self.cursor.c = self.resolve_screen_column(term, self.cursor.r);
    }

    pub fn scroll_y_delta(&mut self, term: &State, delta: i32) {
        self.have_moved = true;

        let is_up = delta < 0;
        // Flow returns the root line as well.
        let delta = if is_up { delta } else { delta + 1 };

        let result = term.flow(Vec2::new(delta, self.viewport.c), self.root);
        let num_lines = result.lines.len();
        if num_lines == 0 {
            return;
        }

        let target = if is_up { 0 } else { num_lines - 1 };
        self.root = result.lines[target].root();

        let new_row = if is_up {
            self.cursor.r + num_lines as i32
        } else {
            // Skipping the root line.
            self.cursor.r - (num_lines as i32 - 1)
        };
        let new_row = clamp(new_row, 0, self.viewport.r - 1);
        self.cursor = Vec2::new(new_row, self.resolve_screen_column(term, new_row));
    }

    /// Columns are determined by the wrap width in flow mode.
    pub fn scroll_x_delta(&mut self, _delta: i32) {}

    /// A line of the current viewport; negative rows address lines above
    /// the root.
    fn get_line(&self, term: &State, row: i32) -> Option<ScreenLine> {
        // Include the root line when counting downward.
        let count = if row >= 0 { row + 1 } else { row };

        let flow = term.flow(Vec2::new(count, self.viewport.c), self.root);
        if !flow.ok {
            return None;
        }
        if (flow.lines.len() as i32) < count.abs() {
            return None;
        }

        if row < 0 {
            flow.lines.first().cloned()
        } else {
            flow.lines.get(row as usize).cloned()
        }
    }

    /// The root of the last non-empty physical line; scrolling never goes
    /// past it, which keeps the cursor off the blank tail of the screen.
    fn get_last_root(&self, term: &State) -> Vec2 {
        let screen = term.flow(term.size(), term.root());
        for line in screen.lines.iter().rev() {
            if line.chars.iter().any(|glyph| !glyph.is_empty()) {
                return line.root();
            }
        }
        Vec2::ZERO
    }

    fn get_last_line(&self, term: &State) -> i32 {
        self.get_last_root(term).r
    }

    fn scroll_to_line(&mut self, term: &State, dest: Vec2, position: ScrollPosition) {
        if dest.r < 0 || dest.c < 0 {
            return;
        }
        if dest.r > self.get_last_line(term) {
            return;
        }

        // If the destination is already on screen the cursor just moves.
        let viewport = term.flow(self.viewport, self.root);
        for (row, line) in viewport.lines.iter().enumerate() {
            if line.root() == dest {
                self.cursor.r = row as i32;
                break;
            }
        }

        let rows = match position {
            ScrollPosition::Top => 0,
            ScrollPosition::Center => self.viewport.r / 2,
            ScrollPosition::Bottom => self.viewport.r - 1,
        }
        .max(0);

        if rows == 0 {
            self.root = dest;
            self.cursor.r = 0;
            return;
        }

        let flow = term.flow(Vec2::new(-rows, self.viewport.c), dest);
        if !flow.ok || flow.lines.is_empty() {
            self.root = dest;
            self.cursor.r = 0;
            return;
        }

        self.root = flow.lines[0].root();
        self.cursor.r = flow.lines.len() as i32;
    }

    /// The best available column on `row` for the sticky desired column.
    fn resolve_screen_column(&self, term: &State, row: i32) -> i32 {
        let result = term.flow(self.viewport, self.root);
        if !result.ok {
            return 0;
        }
        match result.lines.get(row.max(0) as usize) {
            Some(line) => resolve_desired_column(&line.chars, self.desired_col),
            None => 0,
        }
    }

    pub fn resize(&mut self, term: &State, new_size: Size) {
        let cursor = self.cursor_coord(term);
        let old_size = self.viewport;
        self.viewport = new_size;

        // Before the first movement the terminal cursor can be anywhere, so
        // lean on the ordinary follow-mode reflow. Afterwards movement is
        // constrained to cells with printable characters.
        if !self.have_moved {
            self.center_terminal_cursor(term);
            return;
        }

        // Flow a window certainly large enough to contain the cursor.
        let rows = (old_size.c * old_size.r) / new_size.c.max(1) + 1;
        let flow = term.flow(Vec2::new(rows, new_size.c), self.root);

        let mut dest = ScreenLine::default();
        for line in &flow.lines {
            if cursor.r != line.r || cursor.c < line.c0 || cursor.c >= line.c1.max(line.c0 + 1) {
                continue;
            }
            self.cursor.c = cursor.c - line.c0;
            self.desired_col = self.cursor.c;
            dest = line.clone();
            break;
        }

        self.scroll_to_line(term, dest.root(), ScrollPosition::Center);
    }

    /// The cursor's position in joined history+screen coordinates.
    pub fn cursor_coord(&self, term: &State) -> Vec2 {
        let result = term.flow(self.viewport, self.root);

        for (row, line) in result.lines.iter().enumerate() {
            if self.cursor.r != row as i32 {
                continue;
            }

            let num_chars = line.c1 - line.c0;
            let mut coord = Vec2::new(line.r, line.c0 + self.cursor.c);
            if self.cursor.c >= num_chars {
                // Snap to a real cell.
                let last = non_whitespace(&line.chars)
                    .map(|(_, last)| last as i32)
                    .unwrap_or(0);
                coord.c = line.c0 + last;
            }
            return coord;
        }

        Vec2::ZERO
    }

    pub fn move_cursor_x(&mut self, term: &State, delta: i32) {
        self.have_moved = true;

        let Some(current) = self.get_line(term, self.cursor.r) else {
            return;
        };

        let last = non_whitespace(&current.chars)
            .map(|(_, last)| last as i32)
            .unwrap_or(0);
        let new_col = clamp(self.cursor.c + delta, 0, last);
        if new_col == self.cursor.c {
            return;
        }

        self.cursor.c = new_col;
        self.desired_col = new_col;
    }

    pub fn move_cursor_y(&mut self, term: &State, delta: i32) {
        self.have_moved = true;

        let Some(current) = self.get_line(term, self.cursor.r) else {
            return;
        };

        // Include the root line when moving down.
        let num_rows = if delta >= 0 { delta + 1 } else { delta };

        // Flow from the cursor's own line to its destination to find out how
        // far the viewport must move.
        let flow = term.flow(Vec2::new(num_rows, self.viewport.c), current.root());
        if !flow.ok {
            return;
        }

        // The user cannot move past the last physical line.
        let last_line = self.get_last_line(term);
        let mut lines = flow.lines;
        if let Some(limit) = lines.iter().position(|line| line.root().r > last_line) {
            lines.truncate(limit);
        }
        if lines.is_empty() {
            return;
        }

        let dest = if delta >= 0 {
            lines.last().unwrap().clone()
        } else {
            lines[0].clone()
        };
        if dest.root() == current.root() {
            return;
        }

        self.cursor.c = resolve_desired_column(&dest.chars, self.desired_col);

        let viewport = term.flow(self.viewport, self.root);
        for (row, line) in viewport.lines.iter().enumerate() {
            if line.root() == dest.root() {
                self.cursor.r = row as i32;
                break;
            }
        }

        let position = if delta < 0 {
            ScrollPosition::Top
        } else {
            ScrollPosition::Bottom
        };
        self.scroll_to_line(term, dest.root(), position);
    }

    /// vi-style `f`/`t`/`F`/`T` on the current flowed line.
    pub fn jump(&mut self, term: &State, needle: char, forward: bool, to: bool) {
        let Some(line) = self.get_line(term, self.cursor.r) else {
            return;
        };

        let old_col = self.cursor.c;
        let new_col = calculate_jump(&line.chars, needle, forward, to, old_col);
        self.move_cursor_x(term, new_col - old_col);
    }

    /// Render the flowed viewport with highlights into an image. Highlight
    /// overlaps are last-writer-wins in the order provided.
    pub fn view(&self, term: &State, highlights: &[Highlight]) -> TtyState {
        let mut out = TtyState::new(self.viewport);

        let flow = term.flow(self.viewport, self.root);
        let screen = term.flow(term.size(), term.root());
        if !flow.ok || !screen.ok {
            return out;
        }

        // Screen-relative highlights become joined coordinates first.
        let mut resolved: Vec<Highlight> = Vec::with_capacity(highlights.len());
        for highlight in highlights {
            let mut highlight = *highlight;
            if highlight.screen {
                let (Some(from), Some(to)) = (
                    screen.coord(highlight.from),
                    screen.coord(highlight.to),
                ) else {
                    continue;
                };
                let (from, to) = normalize_range(from, to);
                highlight.from = from;
                highlight.to = to;
                highlight.screen = false;
            }
            resolved.push(highlight);
        }

        for (row, line) in flow.lines.iter().enumerate() {
            for (col, glyph) in line.chars.iter().enumerate() {
                if col < out.image[row].len() {
                    out.image[row][col] = *glyph;
                }
            }

            for highlight in &resolved {
                highlight_row(&mut out.image[row], line, highlight);
            }
        }

        out.cursor = self.cursor;
        out.cursor_visible = true;

        // Scrolled back: draw the "[r/N]" indicator in the top-right corner.
        if self.root.r < term.root().r {
            let text = format!("[{}/{}]", self.root.r, flow.num_lines);
            let cols = self.viewport.c as usize;
            let start = cols.saturating_sub(text.len());
            for (i, char) in text.chars().enumerate() {
                if start + i >= cols || out.image.is_empty() {
                    break;
                }
                out.image[0][start + i] = Glyph {
                    char,
                    fg: Color::Indexed(9),
                    bg: Color::Indexed(240),
                    ..Glyph::default()
                };
            }
        }

        out
    }
}

fn normalize_range(a: Vec2, b: Vec2) -> (Vec2, Vec2) {
    if (b.r, b.c) < (a.r, a.c) {
        (b, a)
    } else {
        (a, b)
    }
}

fn highlight_row(row: &mut Line, line: &ScreenLine, highlight: &Highlight) {
    if highlight.from.r > line.r || highlight.to.r < line.r {
        return;
    }

    let lo = if highlight.from.r == line.r {
        highlight.from.c.max(line.c0)
    } else {
        line.c0
    };
    let hi = if highlight.to.r == line.r {
        highlight.to.c.min(line.c1 - 1)
    } else {
        line.c1 - 1
    };
    if lo > hi {
        return;
    }

    for col in lo..=hi {
        let index = (col - line.c0) as usize;
        if let Some(glyph) = row.get_mut(index) {
            glyph.fg = highlight.fg;
            glyph.bg = highlight.bg;
        }
    }
}

/// The best cursor column on `line` for a desired column: the nearest cell
/// holding a real character, mimicking vertical movement in a text editor.
pub fn resolve_desired_column(line: &[Glyph], desired: i32) -> i32 {
    if line.is_empty() {
        return 0;
    }

    let mut occupancy = vec![false; line.len()];
    let mut i = 0;
    while i < line.len() {
        let glyph = &line[i];
        if !glyph.is_empty() {
            let width = UnicodeWidthChar::width(glyph.char).unwrap_or(1).max(1);
            for j in 0..width {
                if i + j < occupancy.len() {
                    occupancy[i + j] = true;
                }
            }
            i += width;
            continue;
        }
        i += 1;
    }

    let desired = clamp(desired, 0, line.len() as i32 - 1) as usize;
    if occupancy[desired] {
        return desired as i32;
    }

    let before = occupancy[..desired].iter().rposition(|&occupied| occupied);
    let after = occupancy[desired + 1..]
        .iter()
        .position(|&occupied| occupied)
        .map(|i| desired + 1 + i);

    match (before, after) {
        // Blank line: column zero.
        (None, None) => 0,
        // Between content: stay put.
        (Some(_), Some(_)) => desired as i32,
        // Content only ahead: stop just short of it.
        (None, Some(first)) => first.saturating_sub(1) as i32,
        // Content only behind: its last column.
        (Some(last), None) => last as i32,
    }
}

/// One-line character jump; `to` lands one column short of the needle.
pub fn calculate_jump(line: &[Glyph], needle: char, forward: bool, to: bool, col: i32) -> i32 {
    let col = col.max(0) as usize;

    if forward {
        for i in col + 1..line.len() {
            if line[i].char == needle {
                return if to { i as i32 - 1 } else { i as i32 };
            }
        }
    } else {
        for i in (0..col.min(line.len())).rev() {
            if line[i].char == needle {
                return if to { i as i32 + 1 } else { i as i32 };
            }
        }
    }
    col as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::{Terminal, State};
    use crate::geom::DEFAULT_SIZE;

    fn term_with(content: &[u8], size: Size) -> Terminal {
        let mut term = Terminal::new(size);
        term.write(content);
        term
    }

    fn glyphs(text: &str) -> Line {
        text.chars()
            .map(|char| Glyph {
                char,
                mode: 0,
                ..Glyph::default()
            })
            .collect()
    }

    #[test]
    fn desired_column_resolution() {
        let line = glyphs("  abc  ");
        assert_eq!(resolve_desired_column(&line, 3), 3);
        assert_eq!(resolve_desired_column(&line, 0), 1);
        assert_eq!(resolve_desired_column(&line, 6), 4);
        assert_eq!(resolve_desired_column(&glyphs("      "), 3), 0);
    }

    #[test]
    fn jump_forward_and_back() {
        let line = glyphs("a.b.c");
        assert_eq!(calculate_jump(&line, '.', true, false, 0), 1);
        assert_eq!(calculate_jump(&line, '.', true, true, 0), 0);
        assert_eq!(calculate_jump(&line, '.', true, false, 1), 3);
        assert_eq!(calculate_jump(&line, '.', false, false, 4), 3);
        assert_eq!(calculate_jump(&line, '.', false, true, 4), 4);
        assert_eq!(calculate_jump(&line, 'z', true, false, 0), 0);
    }

    #[test]
    fn follow_mode_tracks_cursor() {
        let term = term_with(b"one\r\ntwo\r\nabc", Size::new(4, 10));
        let movement = Movement::new(&term, Size::new(4, 10));
        assert!(!movement.have_moved());
        assert_eq!(movement.cursor(), Vec2::new(2, 3));
    }

    #[test]
    fn movement_enters_selection() {
        let term = term_with(b"one\r\ntwo\r\nabc", Size::new(4, 10));
        let mut movement = Movement::new(&term, Size::new(4, 10));
        movement.move_cursor_x(&term, -1);
        assert!(movement.have_moved());
        assert_eq!(movement.cursor().c, 2);
    }

    #[test]
    fn vertical_motion_keeps_desired_column() {
        let term = term_with(b"wide line here\r\nab\r\nlonger again", Size::new(4, 20));
        let mut movement = Movement::new(&term, Size::new(4, 20));

        // Put the cursor on the first line at column 8. Follow mode left the
        // desired column at the live cursor's column 12.
        movement.scroll_top(&term);
        movement.move_cursor_x(&term, -4);
        assert_eq!(movement.cursor().c, 8);

        // "ab" only reaches column 1.
        movement.move_cursor_y(&term, 1);
        assert_eq!(movement.cursor().r, 1);
        assert_eq!(movement.cursor().c, 1);

        // The desired column comes back on the longer line.
        movement.move_cursor_y(&term, 1);
        assert_eq!(movement.cursor().c, 8);
    }

    #[test]
    fn scroll_back_and_to_bottom() {
        let mut term = Terminal::new(Size::new(3, 10));
        for i in 0..10 {
            term.write(format!("line {}\r\n", i).as_bytes());
        }
        let mut movement = Movement::new(&term, Size::new(3, 10));

        movement.scroll_top(&term);
        assert_eq!(movement.root(), Vec2::ZERO);

        movement.scroll_y_delta(&term, 2);
        assert_eq!(movement.root().r, 2);

        movement.scroll_bottom(&term);
        assert!(movement.root().r > 2);
    }

    #[test]
    fn view_applies_highlights() {
        let term = term_with(b"abcdef", Size::new(2, 10));
        let movement = Movement::new(&term, Size::new(2, 10));

        let highlight = Highlight {
            from: Vec2::new(0, 1),
            to: Vec2::new(0, 2),
            fg: Color::Indexed(0),
            bg: Color::Indexed(3),
            screen: false,
        };
        let view = movement.view(&term, &[highlight]);
        assert_eq!(view.image[0][1].bg, Color::Indexed(3));
        assert_eq!(view.image[0][2].bg, Color::Indexed(3));
        assert_eq!(view.image[0][0].bg, Color::Default);
    }

    #[test]
    fn screen_relative_highlights_are_translated() {
        let mut term = Terminal::new(Size::new(2, 10));
        for i in 0..5 {
            term.write(format!("line {}\r\n", i).as_bytes());
        }
        let movement = Movement::new(&term, Size::new(2, 10));

        // Screen row 0 is deep in the joined document.
        let highlight = Highlight {
            from: Vec2::new(0, 0),
            to: Vec2::new(0, 3),
            fg: Color::Indexed(0),
            bg: Color::Indexed(4),
            screen: true,
        };
        let view = movement.view(&term, &[highlight]);
        let highlighted: usize = view
            .image
            .iter()
            .flatten()
            .filter(|glyph| glyph.bg == Color::Indexed(4))
            .count();
        assert_eq!(highlighted, 4);
    }

    #[test]
    fn resize_when_unmoved_recenters() {
        let mut term = Terminal::new(DEFAULT_SIZE);
        term.write(b"hello world");
        let mut movement = Movement::new(&term, Size::new(10, 40));
        movement.resize(&term, Size::new(5, 20));
        assert!(!movement.have_moved());
    }

    #[test]
    fn resize_after_movement_follows_the_cell() {
        let mut term = Terminal::new(Size::new(4, 40));
        term.write(b"0123456789abcdefghij\r\nsecond line");
        let mut movement = Movement::new(&term, Size::new(4, 40));

        movement.scroll_top(&term);
        movement.move_cursor_x(&term, 12);
        let before = movement.cursor_coord(&term);

        movement.resize(&term, Size::new(4, 8));
        let after = movement.cursor_coord(&term);
        assert_eq!(before, after);
    }

    #[test]
    fn selection_round_trip() {
        let term = term_with(b"one\r\ntwo\r\nthree", Size::new(4, 10));
        let mut movement = Movement::new(&term, Size::new(4, 10));
        let cursor = movement.cursor();
        let root = movement.root();

        // Enter and leave selection mode without moving anywhere.
        movement.snap_to_terminal(&term);
        assert_eq!(movement.cursor(), cursor);
        assert_eq!(movement.root(), root);
    }

    #[test]
    fn state_is_reachable_through_deref() {
        let term = term_with(b"x", Size::new(2, 4));
        let state: &State = &term;
        assert_eq!(state.cell(0, 0).char, 'x');
    }
}

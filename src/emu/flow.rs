use crate::emu::glyph::{self, Line};
use crate::emu::state::State;
use crate::emu::CURSOR_WRAP_NEXT;
use crate::geom::{clamp, Vec2};

/// One physical row of a flowed viewport, with a back-pointer into its
/// source line: `r` indexes the joined history+screen sequence and
/// `[c0, c1)` is the covered column range within that line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScreenLine {
    pub r: i32,
    pub c0: i32,
    pub c1: i32,
    pub chars: Line,
}

impl ScreenLine {
    pub fn root(&self) -> Vec2 {
        Vec2::new(self.r, self.c0)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FlowResult {
    /// The total number of joined lines in the history and on the screen.
    pub num_lines: i32,
    pub lines: Vec<ScreenLine>,
    pub ok: bool,
    /// The live terminal cursor projected into viewport coordinates.
    pub cursor: Vec2,
    /// True iff the cursor fell on one of the returned lines.
    pub cursor_ok: bool,
}

impl FlowResult {
    /// Translate a position on the flowed viewport back into joined
    /// history+screen coordinates.
    pub fn coord(&self, pos: Vec2) -> Option<Vec2> {
        if pos.r < 0 || pos.r as usize >= self.lines.len() {
            return None;
        }
        let line = &self.lines[pos.r as usize];
        if pos.c < 0 || pos.c as usize >= line.chars.len() {
            return None;
        }
        Some(Vec2::new(line.r, line.c0 + pos.c))
    }
}

/// Left-aligned chunking of `[from, length)` at `cols`. A blank remainder
/// still produces one empty chunk so the row is not lost.
fn chunk_forward(length: usize, from: usize, cols: usize) -> Vec<(usize, usize)> {
    if from >= length {
        return vec![(from, from)];
    }
    let mut out = Vec::new();
    let mut start = from;
    while start < length {
        let end = (start + cols).min(length);
        out.push((start, end));
        start = end;
    }
    out
}

/// Right-aligned chunking of `[0, length)` at `cols`: chunks end flush at
/// `length`, so the first chunk may be short. Used when flowing upward, so
/// that emitted lines end exactly where the flow anchor begins.
fn chunk_backward(length: usize, cols: usize) -> Vec<(usize, usize)> {
    if length == 0 {
        return vec![(0, 0)];
    }
    let mut out = Vec::new();
    let mut end = length;
    while end > 0 {
        let start = end.saturating_sub(cols);
        out.push((start, end));
        end = start;
    }
    out.reverse();
    out
}

impl State {
    /// Runs of main-screen rows joined by the wrap attribute, as inclusive
    /// `(start, end)` row ranges.
    fn screen_groups(&self) -> Vec<(usize, usize)> {
        let screen = self.main_screen();
        let mut groups = Vec::new();
        let mut start = 0;
        for (row, line) in screen.iter().enumerate() {
            if !glyph::is_wrapped(line) || row == screen.len() - 1 {
                groups.push((start, row));
                start = row + 1;
            }
        }
        groups
    }

    /// Whether the last history line continues onto the top of the screen.
    fn seam(&self) -> bool {
        self.history
            .back()
            .map(|line| glyph::is_wrapped(line))
            .unwrap_or(false)
    }

    /// The number of lines in the joined history+screen sequence, counting
    /// the wrap-joined seam as one line.
    pub fn num_flow_lines(&self) -> i32 {
        let joined = self.history.len() + self.screen_groups().len();
        joined as i32 - self.seam() as i32
    }

    /// The location of the screen's top-left cell in joined coordinates.
    /// With one unwrapped line in history this is `[1, 0]`.
    pub fn root(&self) -> Vec2 {
        let num_history = self.history.len() as i32;
        if self.seam() {
            let width = self.history.back().map(|l| l.len()).unwrap_or(0);
            Vec2::new(num_history - 1, width as i32)
        } else {
            Vec2::new(num_history, 0)
        }
    }

    /// The full content of one line in the joined history+screen sequence.
    pub fn joined_line(&self, index: i32) -> Option<Line> {
        if index < 0 || index >= self.num_flow_lines() {
            return None;
        }
        let index = index as usize;
        let num_history = self.history.len();
        let screen = self.main_screen();
        let groups = self.screen_groups();

        let join_group = |k: usize| -> Line {
            let (start, end) = groups[k];
            let mut line = Line::new();
            for row in start..=end {
                line.extend(screen[row].iter().cloned());
            }
            line
        };

        if self.seam() {
            if index < num_history - 1 {
                return Some(self.history[index].clone());
            }
            if index == num_history - 1 {
                let mut line = self.history[num_history - 1].clone();
                line.extend(join_group(0));
                return Some(line);
            }
            return Some(join_group(index - num_history + 1));
        }

        if index < num_history {
            return Some(self.history[index].clone());
        }
        Some(join_group(index - num_history))
    }

    /// The live cursor in joined coordinates, along with whether it sits in
    /// the wrap-next state.
    fn joined_cursor(&self) -> (Vec2, bool) {
        let cursor = self.main_cursor();
        let num_history = self.history.len();
        let seam = self.seam();

        for (k, (start, end)) in self.screen_groups().into_iter().enumerate() {
            if cursor.y < start || cursor.y > end {
                continue;
            }
            let mut c = ((cursor.y - start) * self.cols + cursor.x) as i32;
            let mut r = (num_history + k) as i32;
            if seam {
                r -= 1;
                if k == 0 {
                    c += self.history.back().map(|l| l.len()).unwrap_or(0) as i32;
                }
            }
            return (Vec2::new(r, c), cursor.state & CURSOR_WRAP_NEXT != 0);
        }

        (Vec2::ZERO, false)
    }

    /// Project history and screen onto a viewport of width `viewport.c`,
    /// anchored at `root`.
    ///
    /// `viewport.r > 0` returns up to that many lines starting at `root` and
    /// moving downward; a negative count returns lines ending just before
    /// `root`, moving upward; zero returns everything on that side.
    pub fn flow(&self, viewport: Vec2, root: Vec2) -> FlowResult {
        let cols = viewport.c.max(1) as usize;
        let num_lines = self.num_flow_lines();
        let mut result = FlowResult {
            num_lines,
            ..Default::default()
        };

        if root.r < 0 || root.c < 0 || root.r >= num_lines {
            return result;
        }
        let root_line = match self.joined_line(root.r) {
            Some(line) => line,
            None => return result,
        };
        if root.c > 0 && root.c as usize >= root_line.len() {
            return result;
        }

        result.ok = true;

        let backwards = viewport.r < 0;
        let want = viewport.r.abs() as usize;
        let mut lines: Vec<ScreenLine> = Vec::new();

        if !backwards {
            let mut row = root.r;
            let mut line = root_line;
            let mut from = root.c as usize;
            'forward: loop {
                for (c0, c1) in chunk_forward(glyph::line_length(&line), from, cols) {
                    lines.push(ScreenLine {
                        r: row,
                        c0: c0 as i32,
                        c1: c1 as i32,
                        chars: line[c0.min(line.len())..c1.min(line.len())].to_vec(),
                    });
                    if want != 0 && lines.len() == want {
                        break 'forward;
                    }
                }
                row += 1;
                match self.joined_line(row) {
                    Some(next) => {
                        line = next;
                        from = 0;
                    }
                    None => break,
                }
            }
        } else {
            // Collected bottom-up, reversed at the end.
            let mut rev: Vec<ScreenLine> = Vec::new();
            let mut row = root.r;
            let mut done = false;

            let prefix = &root_line[..(root.c as usize).min(root_line.len())];
            let prefix_len = glyph::line_length(prefix);
            if prefix_len > 0 {
                for (c0, c1) in chunk_backward(prefix_len, cols).into_iter().rev() {
                    rev.push(ScreenLine {
                        r: row,
                        c0: c0 as i32,
                        c1: c1 as i32,
                        chars: root_line[c0..c1].to_vec(),
                    });
                    if want != 0 && rev.len() == want {
                        done = true;
                        break;
                    }
                }
            }

            while !done {
                row -= 1;
                let line = match self.joined_line(row) {
                    Some(line) => line,
                    None => break,
                };
                for (c0, c1) in chunk_backward(glyph::line_length(&line), cols)
                    .into_iter()
                    .rev()
                {
                    rev.push(ScreenLine {
                        r: row,
                        c0: c0 as i32,
                        c1: c1 as i32,
                        chars: line[c0.min(line.len())..c1.min(line.len())].to_vec(),
                    });
                    if want != 0 && rev.len() == want {
                        done = true;
                        break;
                    }
                }
            }

            rev.reverse();
            lines = rev;
        }

        // Project the live cursor onto the flowed lines.
        let (cursor, is_end) = self.joined_cursor();
        for (row, line) in lines.iter().enumerate() {
            if line.r != cursor.r {
                continue;
            }
            let contains = cursor.c >= line.c0
                && (cursor.c < line.c1 || (line.c0 == line.c1 && cursor.c == line.c0));
            // The cursor may rest past the end of content on the last chunk
            // of its line; snap it to the chunk end.
            let last_chunk = lines
                .get(row + 1)
                .map(|next| next.r != line.r)
                .unwrap_or(true);
            if !contains && !(last_chunk && cursor.c >= line.c1) {
                continue;
            }

            let mut x = clamp(cursor.c - line.c0, 0, (line.c1 - line.c0).max(0));
            if is_end {
                x += 1;
            }
            result.cursor = Vec2::new(row as i32, clamp(x, 0, cols as i32 - 1));
            result.cursor_ok = true;
            break;
        }

        result.lines = lines;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::glyph::{line_string, text_line, Glyph, ATTR_WRAP};
    use crate::geom::Size;

    fn padded(text: &str, cols: usize) -> Line {
        let mut line = text_line(text);
        line.resize(cols, Glyph::default());
        line
    }

    fn wrapped(text: &str, cols: usize) -> Line {
        let mut line = padded(text, cols);
        if let Some(last) = line.last_mut() {
            last.mode |= ATTR_WRAP;
        }
        line
    }

    fn strings(result: &FlowResult) -> Vec<String> {
        result
            .lines
            .iter()
            .map(|line| line_string(&line.chars))
            .collect()
    }

    /// History "abcdefg"; the screen shows "abc" / "foobarbaz" with the
    /// anchor on the 'a' of "abc" (the "!" position in the classic example).
    fn flow_fixture() -> State {
        let mut state = State::new(Size::new(2, 12), true);
        state.history.push_back(text_line("abcdefg"));
        state.screen = vec![padded("abc", 12), padded("foobarbaz", 12)];
        state
    }

    #[test]
    fn flow_basic_forward() {
        let state = flow_fixture();
        let result = state.flow(Vec2::new(2, 3), Vec2::new(1, 0));
        assert!(result.ok);
        assert_eq!(strings(&result), vec!["abc", "foo"]);
        assert_eq!(result.lines[0].root(), Vec2::new(1, 0));
        assert_eq!(result.lines[1].root(), Vec2::new(2, 0));
    }

    #[test]
    fn flow_basic_backward() {
        let state = flow_fixture();
        let result = state.flow(Vec2::new(-2, 3), Vec2::new(1, 0));
        assert!(result.ok);
        assert_eq!(strings(&result), vec!["bcd", "efg"]);
        assert_eq!(result.lines[0].root(), Vec2::new(0, 1));
        assert_eq!(result.lines[1].root(), Vec2::new(0, 4));
    }

    #[test]
    fn flow_zero_rows_returns_everything() {
        let state = flow_fixture();
        let result = state.flow(Vec2::new(0, 3), Vec2::new(0, 0));
        assert_eq!(
            strings(&result),
            vec!["abc", "def", "g", "abc", "foo", "bar", "baz"]
        );
    }

    #[test]
    fn flow_counts_joined_lines() {
        let state = flow_fixture();
        assert_eq!(state.num_flow_lines(), 3);
        assert_eq!(state.root(), Vec2::new(1, 0));
    }

    #[test]
    fn flow_seam_joins_history_to_screen() {
        let mut state = State::new(Size::new(2, 4), true);
        state.history.push_back(wrapped("abcd", 4));
        state.screen = vec![padded("ef", 4), padded("xyz", 4)];

        assert_eq!(state.num_flow_lines(), 2);
        assert_eq!(state.root(), Vec2::new(0, 4));

        let result = state.flow(Vec2::new(0, 6), Vec2::new(0, 0));
        assert_eq!(strings(&result), vec!["abcdef", "xyz"]);
    }

    #[test]
    fn flow_invalid_root_is_not_ok() {
        let state = flow_fixture();
        assert!(!state.flow(Vec2::new(2, 3), Vec2::new(9, 0)).ok);
        assert!(!state.flow(Vec2::new(2, 3), Vec2::new(-1, 0)).ok);
        assert!(!state.flow(Vec2::new(2, 3), Vec2::new(0, 40)).ok);
    }

    #[test]
    fn flow_projects_cursor() {
        let mut state = flow_fixture();
        state.cursor.x = 4;
        state.cursor.y = 1;

        // "foobarbaz" wraps at 3; column 4 lands on row "bar", column 1.
        let result = state.flow(Vec2::new(0, 3), Vec2::new(1, 0));
        assert!(result.cursor_ok);
        assert_eq!(result.cursor, Vec2::new(2, 1));
        assert_eq!(line_string(&result.lines[2].chars), "bar");
    }

    #[test]
    fn flow_cursor_not_ok_outside_viewport() {
        let mut state = flow_fixture();
        state.cursor.x = 0;
        state.cursor.y = 1;

        // A single row anchored on the first screen line cannot contain the
        // cursor, which sits on the second.
        let result = state.flow(Vec2::new(1, 12), Vec2::new(1, 0));
        assert!(result.ok);
        assert!(!result.cursor_ok);
    }

    #[test]
    fn flow_blank_lines_occupy_rows() {
        let mut state = State::new(Size::new(3, 8), true);
        state.screen = vec![padded("a", 8), padded("", 8), padded("b", 8)];

        let result = state.flow(Vec2::new(3, 8), Vec2::new(0, 0));
        assert_eq!(strings(&result), vec!["a", "", "b"]);
    }

    #[test]
    fn coord_round_trips() {
        let state = flow_fixture();
        let result = state.flow(Vec2::new(0, 3), Vec2::new(0, 0));
        assert_eq!(result.coord(Vec2::new(0, 1)), Some(Vec2::new(0, 1)));
        assert_eq!(result.coord(Vec2::new(1, 2)), Some(Vec2::new(0, 5)));
        assert_eq!(result.coord(Vec2::new(99, 0)), None);
    }
}

use std::collections::VecDeque;

use unicode_width::UnicodeWidthChar;
use vte::{Params, Perform};

use crate::emu::dirty::Dirty;
use crate::emu::glyph::{
    self, empty_line, Color, Glyph, Line, WriteId, ATTR_BLANK, ATTR_BLINK, ATTR_BOLD, ATTR_ITALIC,
    ATTR_REVERSE, ATTR_UNDERLINE, ATTR_WRAP,
};
use crate::emu::wrap::reflow;
use crate::emu::{
    CursorStyle, ModeFlag, COMMAND_HOOK, CURSOR_ORIGIN, CURSOR_WRAP_NEXT, MODE_ALT_SCREEN,
    MODE_APP_CURSOR, MODE_APP_KEYPAD, MODE_BLINK, MODE_CRLF, MODE_FOCUS, MODE_HIDE, MODE_INSERT,
    MODE_MOUSE_BUTTON, MODE_MOUSE_MANY, MODE_MOUSE_MOTION, MODE_MOUSE_SGR, MODE_MOUSE_X10,
    MODE_REVERSE, MODE_WRAP,
};
use crate::geom::{Size, Vec2};

pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub x: usize,
    pub y: usize,
    pub attr: Glyph,
    pub state: u8,
    pub style: CursorStyle,
}

/// The full grid state of the virtual terminal. All mutation happens through
/// `Perform` callbacks driven by the parser in [`crate::emu::Terminal`].
#[derive(Clone)]
pub struct State {
    pub(super) cols: usize,
    pub(super) rows: usize,

    /// The active screen buffer.
    pub(super) screen: Vec<Line>,
    /// The inactive buffer; swapped in when the alternate screen toggles.
    other: Vec<Line>,

    pub(super) history: VecDeque<Line>,
    history_enabled: bool,
    history_limit: usize,

    pub(super) cursor: Cursor,
    saved_cursor: [Cursor; 2],

    mode: ModeFlag,
    scroll_top: usize,
    scroll_bottom: usize,
    tabs: Vec<bool>,

    title: String,
    directory: String,

    write_id: WriteId,
    pub(super) dirty: Dirty,
}

fn default_tabs(cols: usize) -> Vec<bool> {
    (0..cols).map(|i| i > 0 && i % 8 == 0).collect()
}

impl State {
    pub fn new(size: Size, history_enabled: bool) -> Self {
        let rows = size.r.max(1) as usize;
        let cols = size.c.max(1) as usize;
        State {
            cols,
            rows,
            screen: (0..rows).map(|_| empty_line(cols)).collect(),
            other: (0..rows).map(|_| empty_line(cols)).collect(),
            history: VecDeque::new(),
            history_enabled,
            history_limit: DEFAULT_HISTORY_LIMIT,
            cursor: Cursor::default(),
            saved_cursor: [Cursor::default(); 2],
            mode: MODE_WRAP,
            scroll_top: 0,
            scroll_bottom: rows - 1,
            tabs: default_tabs(cols),
            title: String::new(),
            directory: String::new(),
            write_id: 0,
            dirty: Dirty::default(),
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.rows as i32, self.cols as i32)
    }

    pub fn mode(&self) -> ModeFlag {
        self.mode
    }

    pub fn is_alt(&self) -> bool {
        self.mode & MODE_ALT_SCREEN != 0
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn cursor_visible(&self) -> bool {
        self.mode & MODE_HIDE == 0
    }

    pub fn screen(&self) -> &[Line] {
        &self.screen
    }

    /// The main screen, regardless of which buffer is active.
    pub fn main_screen(&self) -> &[Line] {
        if self.is_alt() {
            &self.other
        } else {
            &self.screen
        }
    }

    /// The cursor on the main screen. While the alternate screen is active
    /// this is the cursor saved when the application switched over.
    pub fn main_cursor(&self) -> Cursor {
        if self.is_alt() {
            self.saved_cursor[0]
        } else {
            self.cursor
        }
    }

    pub fn history(&self) -> &VecDeque<Line> {
        &self.history
    }

    pub fn cell(&self, x: usize, y: usize) -> Glyph {
        self.screen
            .get(y)
            .and_then(|line| line.get(x))
            .copied()
            .unwrap_or_default()
    }

    pub fn dirty(&self) -> &Dirty {
        &self.dirty
    }

    pub fn dirty_mut(&mut self) -> &mut Dirty {
        &mut self.dirty
    }

    pub fn last_write(&self) -> WriteId {
        self.write_id
    }

    /// Dump the visible screen as text, one row per line.
    pub fn screen_string(&self) -> String {
        let mut out = String::new();
        for line in &self.screen {
            out.push_str(glyph::line_string(line).trim_end());
            out.push('\n');
        }
        out
    }

    pub(super) fn begin_write(&mut self) {
        self.write_id = self.write_id.wrapping_add(1);
        self.dirty.mark_write(self.write_id);
    }

    fn blank_glyph(&self) -> Glyph {
        Glyph {
            bg: self.cursor.attr.bg,
            ..Glyph::default()
        }
    }

    fn blank_line(&self) -> Line {
        vec![self.blank_glyph(); self.cols]
    }

    fn push_history(&mut self, line: Line) {
        self.history.push_back(line);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    fn move_to(&mut self, x: i32, y: i32) {
        let (min_y, max_y) = if self.cursor.state & CURSOR_ORIGIN != 0 {
            (self.scroll_top as i32, self.scroll_bottom as i32)
        } else {
            (0, self.rows as i32 - 1)
        };
        self.cursor.x = x.clamp(0, self.cols as i32 - 1) as usize;
        self.cursor.y = y.clamp(min_y, max_y) as usize;
        self.cursor.state &= !CURSOR_WRAP_NEXT;
    }

    /// Move to an absolute position, honoring origin mode.
    fn move_to_absolute(&mut self, x: i32, y: i32) {
        let y = if self.cursor.state & CURSOR_ORIGIN != 0 {
            y + self.scroll_top as i32
        } else {
            y
        };
        self.move_to(x, y);
    }

    fn linefeed(&mut self, carriage_return: bool) {
        if self.cursor.y == self.scroll_bottom {
            self.scroll_up(self.scroll_top, 1);
        } else if self.cursor.y + 1 < self.rows {
            self.cursor.y += 1;
        }
        if carriage_return {
            self.cursor.x = 0;
        }
        self.cursor.state &= !CURSOR_WRAP_NEXT;
    }

    fn reverse_index(&mut self) {
        if self.cursor.y == self.scroll_top {
            self.scroll_down(self.scroll_top, 1);
        } else {
            self.cursor.y = self.cursor.y.saturating_sub(1);
        }
        self.cursor.state &= !CURSOR_WRAP_NEXT;
    }

    /// Scroll the region `[orig, scroll_bottom]` up by `n`. Lines that leave
    /// the top of the main screen are appended to history with their wrap
    /// attribute preserved.
    fn scroll_up(&mut self, orig: usize, n: usize) {
        if orig > self.scroll_bottom {
            return;
        }
        let n = n.min(self.scroll_bottom - orig + 1);
        if n == 0 {
            return;
        }

        if orig == 0 && !self.is_alt() && self.history_enabled {
            for i in 0..n {
                let line = self.screen[i].clone();
                self.push_history(line);
            }
        }

        self.screen[orig..=self.scroll_bottom].rotate_left(n);
        let blank = self.blank_line();
        for row in (self.scroll_bottom + 1 - n)..=self.scroll_bottom {
            self.screen[row] = blank.clone();
        }
        self.dirty.screen_changed = true;
    }

    fn scroll_down(&mut self, orig: usize, n: usize) {
        if orig > self.scroll_bottom {
            return;
        }
        let n = n.min(self.scroll_bottom - orig + 1);
        if n == 0 {
            return;
        }

        self.screen[orig..=self.scroll_bottom].rotate_right(n);
        let blank = self.blank_line();
        for row in orig..orig + n {
            self.screen[row] = blank.clone();
        }
        self.dirty.screen_changed = true;
    }

    fn set_glyph(&mut self, x: usize, y: usize, char: char) {
        let pen = self.cursor.attr;
        self.screen[y][x] = Glyph {
            char,
            mode: pen.mode & !(ATTR_WRAP | ATTR_BLANK),
            fg: pen.fg,
            bg: pen.bg,
            transparent: false,
            write: self.write_id,
        };
    }

    fn insert_blanks(&mut self, n: usize) {
        let y = self.cursor.y;
        let x = self.cursor.x;
        let n = n.min(self.cols - x);
        let blank = self.blank_glyph();
        self.screen[y][x..].rotate_right(n);
        for col in x..x + n {
            self.screen[y][col] = blank;
        }
    }

    fn delete_chars(&mut self, n: usize) {
        let y = self.cursor.y;
        let x = self.cursor.x;
        let n = n.min(self.cols - x);
        let blank = self.blank_glyph();
        self.screen[y][x..].rotate_left(n);
        let start = self.cols - n;
        for col in start..self.cols {
            self.screen[y][col] = blank;
        }
    }

    fn clear_region(&mut self, x0: usize, y0: usize, x1: usize, y1: usize) {
        let blank = self.blank_glyph();
        for y in y0..=y1.min(self.rows - 1) {
            let (start, end) = if y0 == y1 {
                (x0, x1)
            } else if y == y0 {
                (x0, self.cols - 1)
            } else if y == y1 {
                (0, x1)
            } else {
                (0, self.cols - 1)
            };
            for x in start..=end.min(self.cols - 1) {
                self.screen[y][x] = blank;
            }
        }
        self.dirty.screen_changed = true;
    }

    fn save_cursor(&mut self) {
        let slot = self.is_alt() as usize;
        self.saved_cursor[slot] = self.cursor;
    }

    fn restore_cursor(&mut self) {
        let slot = self.is_alt() as usize;
        self.cursor = self.saved_cursor[slot];
        self.cursor.x = self.cursor.x.min(self.cols - 1);
        self.cursor.y = self.cursor.y.min(self.rows - 1);
    }

    fn enter_alt(&mut self, clear: bool) {
        if self.is_alt() {
            return;
        }
        std::mem::swap(&mut self.screen, &mut self.other);
        self.mode |= MODE_ALT_SCREEN;
        if clear {
            let blank = self.blank_line();
            for line in self.screen.iter_mut() {
                *line = blank.clone();
            }
        }
        self.dirty.screen_changed = true;
    }

    fn leave_alt(&mut self) {
        if !self.is_alt() {
            return;
        }
        std::mem::swap(&mut self.screen, &mut self.other);
        self.mode &= !MODE_ALT_SCREEN;
        self.dirty.screen_changed = true;
    }

    fn set_private_mode(&mut self, arg: i32, set: bool) {
        let flag = match arg {
            1 => MODE_APP_CURSOR,
            5 => MODE_REVERSE,
            6 => {
                if set {
                    self.cursor.state |= CURSOR_ORIGIN;
                } else {
                    self.cursor.state &= !CURSOR_ORIGIN;
                }
                self.move_to_absolute(0, 0);
                return;
            }
            7 => MODE_WRAP,
            9 => MODE_MOUSE_X10,
            12 => MODE_BLINK,
            25 => {
                // DECTCEM: set = show
                if set {
                    self.mode &= !MODE_HIDE;
                } else {
                    self.mode |= MODE_HIDE;
                }
                return;
            }
            47 | 1047 => {
                if set {
                    self.enter_alt(true);
                } else {
                    self.leave_alt();
                }
                return;
            }
            66 => MODE_APP_KEYPAD,
            1000 => MODE_MOUSE_BUTTON,
            1002 => MODE_MOUSE_MOTION,
            1003 => MODE_MOUSE_MANY,
            1004 => MODE_FOCUS,
            1006 => MODE_MOUSE_SGR,
            1048 => {
                if set {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
                return;
            }
            1049 => {
                if set {
                    self.save_cursor();
                    self.enter_alt(true);
                } else {
                    self.leave_alt();
                    self.restore_cursor();
                }
                return;
            }
            _ => return,
        };

        if set {
            self.mode |= flag;
        } else {
            self.mode &= !flag;
        }
    }

    fn set_mode(&mut self, arg: i32, set: bool) {
        let flag = match arg {
            4 => MODE_INSERT,
            20 => MODE_CRLF,
            _ => return,
        };
        if set {
            self.mode |= flag;
        } else {
            self.mode &= !flag;
        }
    }

    fn handle_sgr(&mut self, params: &Params) {
        let flat: Vec<i32> = params
            .iter()
            .flat_map(|p| p.iter().map(|&v| v as i32))
            .collect();

        let pen = &mut self.cursor.attr;
        if flat.is_empty() {
            *pen = Glyph::default();
            return;
        }

        let mut i = 0;
        while i < flat.len() {
            match flat[i] {
                0 => *pen = Glyph::default(),
                1 => pen.mode |= ATTR_BOLD,
                3 => pen.mode |= ATTR_ITALIC,
                4 => pen.mode |= ATTR_UNDERLINE,
                5 | 6 => pen.mode |= ATTR_BLINK,
                7 => pen.mode |= ATTR_REVERSE,
                21 | 22 => pen.mode &= !ATTR_BOLD,
                23 => pen.mode &= !ATTR_ITALIC,
                24 => pen.mode &= !ATTR_UNDERLINE,
                25 => pen.mode &= !ATTR_BLINK,
                27 => pen.mode &= !ATTR_REVERSE,
                30..=37 => pen.fg = Color::Indexed((flat[i] - 30) as u8),
                39 => pen.fg = Color::Default,
                40..=47 => pen.bg = Color::Indexed((flat[i] - 40) as u8),
                49 => pen.bg = Color::Default,
                90..=97 => pen.fg = Color::Indexed((flat[i] - 90 + 8) as u8),
                100..=107 => pen.bg = Color::Indexed((flat[i] - 100 + 8) as u8),
                38 | 48 => {
                    let is_fg = flat[i] == 38;
                    let color = match flat.get(i + 1) {
                        Some(5) => {
                            let index = flat.get(i + 2).copied().unwrap_or(0);
                            i += 2;
                            Some(Color::Indexed(index.clamp(0, 255) as u8))
                        }
                        Some(2) => {
                            let r = flat.get(i + 2).copied().unwrap_or(0);
                            let g = flat.get(i + 3).copied().unwrap_or(0);
                            let b = flat.get(i + 4).copied().unwrap_or(0);
                            i += 4;
                            Some(Color::Rgb(
                                r.clamp(0, 255) as u8,
                                g.clamp(0, 255) as u8,
                                b.clamp(0, 255) as u8,
                            ))
                        }
                        _ => None,
                    };
                    if let Some(color) = color {
                        if is_fg {
                            pen.fg = color;
                        } else {
                            pen.bg = color;
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn next_tab_stop(&self) -> usize {
        for x in self.cursor.x + 1..self.cols {
            if self.tabs[x] {
                return x;
            }
        }
        self.cols - 1
    }

    fn reset(&mut self) {
        let size = self.size();
        let history_enabled = self.history_enabled;
        let history_limit = self.history_limit;
        *self = State::new(size, history_enabled);
        self.history_limit = history_limit;
        self.dirty.screen_changed = true;
    }

    /// Resize the terminal. The main screen is reflowed together with
    /// history; the alternate screen is clipped or padded. Emits a single
    /// screen-changed mark.
    pub fn resize(&mut self, size: Size) {
        let rows = size.r.max(1) as usize;
        let cols = size.c.max(1) as usize;
        if rows == self.rows && cols == self.cols {
            return;
        }

        let was_alt = self.is_alt();
        if was_alt {
            // Work on the main buffer directly; swap back afterwards.
            std::mem::swap(&mut self.screen, &mut self.other);
            std::mem::swap(&mut self.cursor, &mut self.saved_cursor[0]);
        }

        let anchor = self.cursor_anchor();

        let history: Vec<Line> = self.history.iter().cloned().collect();
        let (new_history, mut new_screen) = reflow(&history, &self.screen, rows, cols);
        while new_screen.len() < rows {
            new_screen.push(empty_line(cols));
        }

        self.history = new_history.into();
        self.screen = new_screen;
        self.rows = rows;
        self.cols = cols;
        self.restore_cursor_anchor(anchor);

        // Alternate screen: clip or pad, never reflowed.
        self.other.resize(rows, empty_line(cols));
        for line in self.other.iter_mut() {
            line.resize(cols, Glyph::default());
        }

        if was_alt {
            std::mem::swap(&mut self.screen, &mut self.other);
            std::mem::swap(&mut self.cursor, &mut self.saved_cursor[0]);
            self.cursor.x = self.cursor.x.min(cols - 1);
            self.cursor.y = self.cursor.y.min(rows - 1);
        }

        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.tabs = default_tabs(cols);
        self.cursor.state &= !CURSOR_WRAP_NEXT;
        for slot in self.saved_cursor.iter_mut() {
            slot.x = slot.x.min(cols - 1);
            slot.y = slot.y.min(rows - 1);
        }
        self.dirty.screen_changed = true;
    }

    /// The cursor's position as `(logical line index, column offset within
    /// it)`, counted over the joined history+screen document. Logical
    /// structure survives a reflow, so this anchor lets the cursor be placed
    /// back after the grid is re-wrapped.
    fn cursor_anchor(&self) -> (usize, usize) {
        let global = self.history.len() + self.cursor.y;
        let all: Vec<&Line> = self.history.iter().chain(self.screen.iter()).collect();

        let mut logical = 0;
        let mut run_start = 0;
        for (row, line) in all.iter().enumerate() {
            if row == global {
                break;
            }
            if !glyph::is_wrapped(line) {
                logical += 1;
                run_start = row + 1;
            }
        }

        let mut column = self.cursor.x;
        for row in run_start..global {
            column += all[row].len();
        }
        (logical, column)
    }

    fn restore_cursor_anchor(&mut self, (logical, column): (usize, usize)) {
        let num_history = self.history.len();
        let all: Vec<&Line> = self.history.iter().chain(self.screen.iter()).collect();

        let mut index = 0;
        let mut found: Option<(usize, usize)> = None;
        let mut row = 0;
        while row < all.len() {
            let run_end = {
                let mut end = row;
                while end + 1 < all.len() && glyph::is_wrapped(all[end]) {
                    end += 1;
                }
                end
            };
            if index == logical {
                let width = self.cols.max(1);
                let target = (row + column / width).min(run_end);
                let x = if target == row + column / width {
                    column % width
                } else {
                    self.cols - 1
                };
                found = Some((target, x));
                break;
            }
            index += 1;
            row = run_end + 1;
        }

        let (row, x) = found.unwrap_or((all.len().saturating_sub(1), 0));
        self.cursor.x = x.min(self.cols - 1);
        self.cursor.y = row.saturating_sub(num_history).min(self.rows - 1);
    }
}

impl Perform for State {
    fn print(&mut self, c: char) {
        let width = UnicodeWidthChar::width(c).unwrap_or(1);
        if width == 0 {
            return;
        }

        if self.cursor.state & CURSOR_WRAP_NEXT != 0 && self.mode & MODE_WRAP != 0 {
            let y = self.cursor.y;
            self.screen[y][self.cols - 1].mode |= ATTR_WRAP;
            self.cursor.state &= !CURSOR_WRAP_NEXT;
            self.linefeed(true);
        }

        if self.mode & MODE_INSERT != 0 {
            self.insert_blanks(width);
        }

        // A wide character that does not fit is pushed to the next line.
        if width > 1 && self.cursor.x + width > self.cols && self.mode & MODE_WRAP != 0 {
            let y = self.cursor.y;
            self.screen[y][self.cols - 1].mode |= ATTR_WRAP;
            self.linefeed(true);
        }

        let x = self.cursor.x;
        let y = self.cursor.y;
        self.set_glyph(x, y, c);
        self.dirty
            .mark_print(Vec2::new(y as i32, x as i32), self.write_id);

        if width == 2 && x + 1 < self.cols {
            // Continuation cell of a wide character.
            let mut spacer = self.screen[y][x];
            spacer.char = ' ';
            self.screen[y][x + 1] = spacer;
        }

        let next = x + width;
        if next >= self.cols {
            self.cursor.x = self.cols - 1;
            if self.mode & MODE_WRAP != 0 {
                self.cursor.state |= CURSOR_WRAP_NEXT;
            }
        } else {
            self.cursor.x = next;
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\x08' => {
                self.cursor.x = self.cursor.x.saturating_sub(1);
                self.cursor.state &= !CURSOR_WRAP_NEXT;
            }
            b'\t' => {
                self.cursor.x = self.next_tab_stop();
            }
            b'\n' | b'\x0b' | b'\x0c' => {
                let crlf = self.mode & MODE_CRLF != 0;
                self.linefeed(crlf);
            }
            b'\r' => {
                self.cursor.x = 0;
                self.cursor.state &= !CURSOR_WRAP_NEXT;
            }
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        let Some(selector) = params.first() else {
            return;
        };

        match *selector {
            b"0" | b"2" => {
                if let Some(title) = params.get(1) {
                    self.title = String::from_utf8_lossy(title).into_owned();
                    self.dirty.title_changed = true;
                }
            }
            b"7" => {
                if let Some(url) = params.get(1) {
                    let url = String::from_utf8_lossy(url);
                    // OSC 7 carries a file:// URL; keep only the path.
                    let path = url
                        .strip_prefix("file://")
                        .map(|rest| match rest.find('/') {
                            Some(i) => &rest[i..],
                            None => rest,
                        })
                        .unwrap_or(&url);
                    self.directory = path.to_string();
                }
            }
            b"177" => {
                self.dirty.mark_hook(COMMAND_HOOK, self.write_id);
            }
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, action: char) {
        let args: Vec<i32> = params.iter().map(|p| p[0] as i32).collect();
        let arg = |i: usize, default: i32| -> i32 {
            match args.get(i) {
                Some(&v) if v != 0 => v,
                _ => default,
            }
        };
        let private = intermediates.first() == Some(&b'?');

        let x = self.cursor.x as i32;
        let y = self.cursor.y as i32;

        match action {
            'A' => self.move_to(x, y - arg(0, 1)),
            'B' | 'e' => self.move_to(x, y + arg(0, 1)),
            'C' | 'a' => self.move_to(x + arg(0, 1), y),
            'D' => self.move_to(x - arg(0, 1), y),
            'E' => self.move_to(0, y + arg(0, 1)),
            'F' => self.move_to(0, y - arg(0, 1)),
            'G' | '`' => self.move_to(arg(0, 1) - 1, y),
            'H' | 'f' => self.move_to_absolute(arg(1, 1) - 1, arg(0, 1) - 1),
            'd' => self.move_to_absolute(x, arg(0, 1) - 1),
            'J' => match args.first().copied().unwrap_or(0) {
                0 => {
                    self.clear_region(x as usize, y as usize, self.cols - 1, y as usize);
                    if (y as usize) < self.rows - 1 {
                        self.clear_region(0, y as usize + 1, self.cols - 1, self.rows - 1);
                    }
                }
                1 => {
                    if y > 0 {
                        self.clear_region(0, 0, self.cols - 1, y as usize - 1);
                    }
                    self.clear_region(0, y as usize, x as usize, y as usize);
                }
                2 => self.clear_region(0, 0, self.cols - 1, self.rows - 1),
                3 => {
                    self.clear_region(0, 0, self.cols - 1, self.rows - 1);
                    self.history.clear();
                }
                _ => {}
            },
            'K' => match args.first().copied().unwrap_or(0) {
                0 => self.clear_region(x as usize, y as usize, self.cols - 1, y as usize),
                1 => self.clear_region(0, y as usize, x as usize, y as usize),
                2 => self.clear_region(0, y as usize, self.cols - 1, y as usize),
                _ => {}
            },
            'L' => {
                if (y as usize) >= self.scroll_top && (y as usize) <= self.scroll_bottom {
                    self.scroll_down(y as usize, arg(0, 1) as usize);
                }
            }
            'M' => {
                if (y as usize) >= self.scroll_top && (y as usize) <= self.scroll_bottom {
                    self.scroll_up(y as usize, arg(0, 1) as usize);
                }
            }
            'P' => self.delete_chars(arg(0, 1) as usize),
            '@' => self.insert_blanks(arg(0, 1) as usize),
            'S' => self.scroll_up(self.scroll_top, arg(0, 1) as usize),
            'T' => self.scroll_down(self.scroll_top, arg(0, 1) as usize),
            'X' => {
                let n = arg(0, 1) as usize;
                let end = (x as usize + n - 1).min(self.cols - 1);
                self.clear_region(x as usize, y as usize, end, y as usize);
            }
            'g' => match args.first().copied().unwrap_or(0) {
                0 => self.tabs[x as usize] = false,
                3 => self.tabs.iter_mut().for_each(|t| *t = false),
                _ => {}
            },
            'h' => {
                for &a in &args {
                    if private {
                        self.set_private_mode(a, true);
                    } else {
                        self.set_mode(a, true);
                    }
                }
            }
            'l' => {
                for &a in &args {
                    if private {
                        self.set_private_mode(a, false);
                    } else {
                        self.set_mode(a, false);
                    }
                }
            }
            'm' => self.handle_sgr(params),
            'r' => {
                if !private {
                    let top = (arg(0, 1) - 1).clamp(0, self.rows as i32 - 1) as usize;
                    let bottom = (arg(1, self.rows as i32) - 1).clamp(0, self.rows as i32 - 1) as usize;
                    if top < bottom {
                        self.scroll_top = top;
                        self.scroll_bottom = bottom;
                        self.move_to_absolute(0, 0);
                    }
                }
            }
            's' => self.save_cursor(),
            'u' => self.restore_cursor(),
            'q' => {
                if intermediates.first() == Some(&b' ') {
                    self.cursor.style = match args.first().copied().unwrap_or(0) {
                        0 | 1 => CursorStyle::Block,
                        2 => CursorStyle::SteadyBlock,
                        3 => CursorStyle::BlinkUnderline,
                        4 => CursorStyle::Underline,
                        5 => CursorStyle::BlinkBar,
                        6 => CursorStyle::Bar,
                        _ => CursorStyle::Block,
                    };
                }
            }
            // DA, DSR and friends need a reply channel; there is none, so
            // they are ignored rather than failing the parse.
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        if !intermediates.is_empty() {
            return;
        }
        match byte {
            b'D' => self.linefeed(false),
            b'E' => self.linefeed(true),
            b'M' => self.reverse_index(),
            b'H' => self.tabs[self.cursor.x] = true,
            b'7' => self.save_cursor(),
            b'8' => self.restore_cursor(),
            b'c' => self.reset(),
            b'=' => self.mode |= MODE_APP_KEYPAD,
            b'>' => self.mode &= !MODE_APP_KEYPAD,
            _ => {}
        }
    }
}

//! The VT emulator: an xterm-subset ECMA-48 state machine over a grid with
//! preserved scrollback, plus the reflow engine that projects history and
//! screen onto arbitrary viewport widths.

mod dirty;
mod flow;
mod glyph;
mod state;
mod wrap;

use std::ops::{Deref, DerefMut};

use crate::geom::Size;

pub use dirty::{Dirty, PrintRecord};
pub use flow::{FlowResult, ScreenLine};
pub use glyph::{
    empty_line, is_wrapped, line_length, line_string, non_whitespace, Color, Glyph, Line, WriteId,
    ATTR_BLANK, ATTR_BLINK, ATTR_BOLD, ATTR_GFX, ATTR_ITALIC, ATTR_REVERSE, ATTR_UNDERLINE,
    ATTR_WRAP,
};
pub use state::{Cursor, State};
pub use wrap::{reflow, wrap_line};

pub type ModeFlag = u32;

pub const MODE_WRAP: ModeFlag = 1 << 0;
pub const MODE_INSERT: ModeFlag = 1 << 1;
pub const MODE_APP_KEYPAD: ModeFlag = 1 << 2;
pub const MODE_ALT_SCREEN: ModeFlag = 1 << 3;
pub const MODE_CRLF: ModeFlag = 1 << 4;
pub const MODE_MOUSE_BUTTON: ModeFlag = 1 << 5;
pub const MODE_MOUSE_MOTION: ModeFlag = 1 << 6;
pub const MODE_REVERSE: ModeFlag = 1 << 7;
pub const MODE_HIDE: ModeFlag = 1 << 8;
pub const MODE_APP_CURSOR: ModeFlag = 1 << 9;
pub const MODE_MOUSE_SGR: ModeFlag = 1 << 10;
pub const MODE_BLINK: ModeFlag = 1 << 11;
pub const MODE_FOCUS: ModeFlag = 1 << 12;
pub const MODE_MOUSE_X10: ModeFlag = 1 << 13;
pub const MODE_MOUSE_MANY: ModeFlag = 1 << 14;

pub const CURSOR_DEFAULT: u8 = 1 << 0;
pub const CURSOR_WRAP_NEXT: u8 = 1 << 1;
pub const CURSOR_ORIGIN: u8 = 1 << 2;

/// The OSC code applications emit to mark a shell prompt; see
/// [`crate::replay::detect`].
pub const COMMAND_HOOK: u32 = 177;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorStyle {
    #[default]
    Block,
    SteadyBlock,
    Underline,
    BlinkUnderline,
    Bar,
    BlinkBar,
}

pub fn is_alt_mode(mode: ModeFlag) -> bool {
    mode & MODE_ALT_SCREEN != 0
}

/// The virtual terminal: a byte parser feeding grid state. Parsing never
/// fails; malformed sequences are dropped and invalid UTF-8 is replaced
/// with U+FFFD.
pub struct Terminal {
    parser: vte::Parser,
    state: State,
}

impl Terminal {
    pub fn new(size: Size) -> Self {
        Terminal {
            parser: vte::Parser::new(),
            state: State::new(size, true),
        }
    }

    /// A terminal with the scrollback buffer disabled, for panes whose
    /// history is uninteresting (e.g. the log stream).
    pub fn without_history(size: Size) -> Self {
        Terminal {
            parser: vte::Parser::new(),
            state: State::new(size, false),
        }
    }

    /// Feed bytes to the terminal. Each call is one contiguous write: every
    /// cell it places is tagged with the same fresh [`WriteId`].
    pub fn write(&mut self, data: &[u8]) {
        self.state.begin_write();
        for &byte in data {
            self.parser.advance(&mut self.state, byte);
        }
    }

    /// Capture the grid state for a snapshot. Only valid between writes that
    /// leave the parser in its ground state; see the session player.
    pub fn snapshot(&self) -> State {
        self.state.clone()
    }

    /// Replace the grid state from a snapshot, resetting the parser.
    pub fn restore(&mut self, state: State) {
        self.state = state;
        self.parser = vte::Parser::new();
    }
}

impl Deref for Terminal {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

impl DerefMut for Terminal {
    fn deref_mut(&mut self) -> &mut State {
        &mut self.state
    }
}

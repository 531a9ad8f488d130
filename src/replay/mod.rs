//! Time travel for a recorded pane: a movement layer over the flowed
//! history of a session being replayed.

pub mod detect;
mod movement;

pub use movement::{calculate_jump, resolve_desired_column, Highlight, Movement, ScrollPosition};

use crate::geom::{Size, Vec2};
use crate::search::{self, SearchError, SearchResult};
use crate::sessions::{Event, Player};
use crate::tty::TtyState;

/// A replay session: the player owns the emulator, the movement layer owns
/// the viewport. In follow mode the cursor tracks the live terminal cursor
/// after every time step; the first cursor movement switches to selection
/// mode, which preserves the anchor until it is explicitly dropped.
pub struct Replay {
    player: Player,
    movement: Movement,
    selection_mode: bool,
}

impl Replay {
    pub fn new(events: Vec<Event>, viewport: Size) -> Self {
        let mut player = Player::new(events);
        player.to_end();
        let movement = Movement::new(player.terminal(), viewport);
        Replay {
            player,
            movement,
            selection_mode: false,
        }
    }

    pub fn index(&self) -> usize {
        self.player.index()
    }

    pub fn cursor(&self) -> Vec2 {
        self.movement.cursor()
    }

    pub fn root(&self) -> Vec2 {
        self.movement.root()
    }

    pub fn viewport(&self) -> Size {
        self.movement.viewport()
    }

    pub fn is_selection_mode(&self) -> bool {
        self.selection_mode
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    /// Moving in time always drops selection mode and re-centers on the
    /// live cursor.
    fn after_seek(&mut self) {
        self.selection_mode = false;
        self.movement.snap_to_terminal(self.player.terminal());
    }

    pub fn step_forward(&mut self) {
        self.player.step_forward();
        self.after_seek();
    }

    pub fn step_back(&mut self) {
        self.player.step_back();
        self.after_seek();
    }

    pub fn to_beginning(&mut self) {
        self.player.to_beginning();
        self.after_seek();
    }

    pub fn to_end(&mut self) {
        self.player.to_end();
        self.after_seek();
    }

    pub fn seek(&mut self, index: i64) {
        self.player.seek(index);
        self.after_seek();
    }

    pub fn move_cursor_x(&mut self, delta: i32) {
        self.selection_mode = true;
        self.movement.move_cursor_x(self.player.terminal(), delta);
    }

    pub fn move_cursor_y(&mut self, delta: i32) {
        self.selection_mode = true;
        self.movement.move_cursor_y(self.player.terminal(), delta);
    }

    pub fn scroll_y_delta(&mut self, delta: i32) {
        self.selection_mode = true;
        self.movement.scroll_y_delta(self.player.terminal(), delta);
    }

    pub fn scroll_x_delta(&mut self, delta: i32) {
        self.movement.scroll_x_delta(delta);
    }

    pub fn scroll_top(&mut self) {
        self.selection_mode = true;
        self.movement.scroll_top(self.player.terminal());
    }

    pub fn scroll_bottom(&mut self) {
        self.selection_mode = true;
        self.movement.scroll_bottom(self.player.terminal());
    }

    pub fn jump(&mut self, needle: char, forward: bool, to: bool) {
        self.selection_mode = true;
        self.movement.jump(self.player.terminal(), needle, forward, to);
    }

    /// Leave selection mode, returning the cursor and viewport to their
    /// follow-mode positions.
    pub fn exit_selection(&mut self) {
        self.selection_mode = false;
        self.movement.snap_to_terminal(self.player.terminal());
    }

    pub fn resize(&mut self, viewport: Size) {
        self.movement.resize(self.player.terminal(), viewport);
    }

    pub fn view(&self, highlights: &[Highlight]) -> TtyState {
        self.movement.view(self.player.terminal(), highlights)
    }

    /// Execute a query: a duration (`45s`, `3m`, `1h30m`) jumps in time, any
    /// other text searches the whole session and lands on the nearest match
    /// in the given direction. Returns the matches for highlighting.
    pub fn query(&mut self, text: &str, forward: bool) -> Result<Vec<SearchResult>, SearchError> {
        if let Some(duration) = search::parse_duration(text) {
            // A zero duration is a no-op.
            if !duration.is_zero() {
                let index =
                    search::find_time(self.player.events(), self.index(), duration, forward);
                self.player.seek(index as i64);
                self.after_seek();
            }
            return Ok(Vec::new());
        }

        let matches = search::search(self.player.events(), text, None, None)?;
        let current = self.index();
        let target = if forward {
            matches
                .iter()
                .find(|result| result.begin.index > current)
                .or_else(|| matches.first())
        } else {
            matches
                .iter()
                .rev()
                .find(|result| result.begin.index < current)
                .or_else(|| matches.last())
        };

        if let Some(result) = target {
            self.player.seek(result.begin.index as i64);
            self.after_seek();
        }
        Ok(matches)
    }
}

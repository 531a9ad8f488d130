use std::collections::HashMap;

use crate::emu::glyph::WriteId;
use crate::geom::Vec2;

/// The screen coordinates and write id of the most recent character print.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrintRecord {
    pub pos: Vec2,
    pub write: WriteId,
}

/// Accumulates the side effects of writes to the terminal. Observers take a
/// snapshot under the emulator lock and reset it; they never look at
/// partially-updated grid state.
#[derive(Clone, Debug, Default)]
pub struct Dirty {
    pub screen_changed: bool,
    pub title_changed: bool,

    /// The last print, if any character has been placed since the last reset.
    pub print: Option<PrintRecord>,

    hooks: HashMap<u32, WriteId>,
    last_write: WriteId,
}

impl Dirty {
    pub fn mark_print(&mut self, pos: Vec2, write: WriteId) {
        self.print = Some(PrintRecord { pos, write });
        self.screen_changed = true;
    }

    pub fn mark_hook(&mut self, tag: u32, write: WriteId) {
        self.hooks.insert(tag, write);
    }

    pub fn mark_write(&mut self, write: WriteId) {
        self.last_write = write;
    }

    /// The write id that most recently activated `tag`, if it fired since the
    /// last reset.
    pub fn hook(&self, tag: u32) -> Option<WriteId> {
        self.hooks.get(&tag).copied()
    }

    pub fn last_write(&self) -> WriteId {
        self.last_write
    }

    pub fn reset(&mut self) {
        let last_write = self.last_write;
        *self = Dirty::default();
        self.last_write = last_write;
    }
}

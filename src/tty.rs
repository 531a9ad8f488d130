//! A renderable terminal image: the unit the multiplexer composes and
//! ships to clients.

use crate::emu::{empty_line, Glyph, Line, State};
use crate::geom::{Size, Vec2};

#[derive(Clone, Debug, PartialEq)]
pub struct TtyState {
    pub image: Vec<Line>,
    pub cursor: Vec2,
    pub cursor_visible: bool,
}

impl TtyState {
    pub fn new(size: Size) -> Self {
        let rows = size.r.max(0) as usize;
        let cols = size.c.max(0) as usize;
        TtyState {
            image: (0..rows).map(|_| empty_line(cols)).collect(),
            cursor: Vec2::ZERO,
            cursor_visible: true,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(
            self.image.len() as i32,
            self.image.first().map(|line| line.len()).unwrap_or(0) as i32,
        )
    }

    /// Capture the active screen of an emulator.
    pub fn capture(state: &State) -> Self {
        let cursor = state.cursor();
        TtyState {
            image: state.screen().to_vec(),
            cursor: Vec2::new(cursor.y as i32, cursor.x as i32),
            cursor_visible: state.cursor_visible(),
        }
    }

    pub fn cell_mut(&mut self, pos: Vec2) -> Option<&mut Glyph> {
        self.image
            .get_mut(pos.r.max(0) as usize)?
            .get_mut(pos.c.max(0) as usize)
    }
}

/// Copy `src` into `dst` with its top-left corner at `offset`; cells that
/// fall outside `dst` are dropped. The cursor follows the copy.
pub fn copy_image(offset: Vec2, dst: &mut TtyState, src: &TtyState) {
    let dst_size = dst.size();
    for (r, line) in src.image.iter().enumerate() {
        let row = offset.r + r as i32;
        if row < 0 || row >= dst_size.r {
            continue;
        }
        for (c, glyph) in line.iter().enumerate() {
            let col = offset.c + c as i32;
            if col < 0 || col >= dst_size.c {
                continue;
            }
            dst.image[row as usize][col as usize] = *glyph;
        }
    }

    dst.cursor = src.cursor.add(offset);
    dst.cursor_visible = src.cursor_visible;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_respects_bounds() {
        let mut dst = TtyState::new(Size::new(4, 4));
        let mut src = TtyState::new(Size::new(2, 2));
        src.image[0][0].char = 'x';
        src.cursor = Vec2::new(0, 1);

        copy_image(Vec2::new(1, 1), &mut dst, &src);
        assert_eq!(dst.image[1][1].char, 'x');
        assert_eq!(dst.cursor, Vec2::new(1, 2));

        // Far out of bounds: nothing lands, no panic.
        copy_image(Vec2::new(10, 10), &mut dst, &src);
    }
}

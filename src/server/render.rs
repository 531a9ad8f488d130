//! Renders a composed image to the ANSI byte stream shipped to clients.

use crate::emu::{Color, Glyph, ATTR_BLINK, ATTR_BOLD, ATTR_ITALIC, ATTR_REVERSE, ATTR_UNDERLINE};
use crate::tty::TtyState;

fn push_color(out: &mut Vec<u8>, color: Color, background: bool) {
    let base = if background { 40 } else { 30 };
    match color {
        Color::Default => {}
        Color::Indexed(index) if index < 8 => {
            out.extend_from_slice(format!("\x1b[{}m", base + index as u16).as_bytes());
        }
        Color::Indexed(index) if index < 16 => {
            out.extend_from_slice(format!("\x1b[{}m", base + 60 + (index - 8) as u16).as_bytes());
        }
        Color::Indexed(index) => {
            out.extend_from_slice(format!("\x1b[{};5;{}m", base + 8, index).as_bytes());
        }
        Color::Rgb(r, g, b) => {
            out.extend_from_slice(format!("\x1b[{};2;{};{};{}m", base + 8, r, g, b).as_bytes());
        }
    }
}

fn push_pen(out: &mut Vec<u8>, glyph: &Glyph) {
    out.extend_from_slice(b"\x1b[0m");
    for (attr, code) in [
        (ATTR_BOLD, 1),
        (ATTR_ITALIC, 3),
        (ATTR_UNDERLINE, 4),
        (ATTR_BLINK, 5),
        (ATTR_REVERSE, 7),
    ] {
        if glyph.mode & attr != 0 {
            out.extend_from_slice(format!("\x1b[{}m", code).as_bytes());
        }
    }
    push_color(out, glyph.fg, false);
    push_color(out, glyph.bg, true);
}

fn pen_signature(glyph: &Glyph) -> (u16, Color, Color) {
    let attrs = ATTR_BOLD | ATTR_ITALIC | ATTR_UNDERLINE | ATTR_BLINK | ATTR_REVERSE;
    (glyph.mode & attrs, glyph.fg, glyph.bg)
}

/// A full-screen repaint: home the cursor, draw every row, then park the
/// cursor where the composed image says it belongs.
pub fn render_full(state: &TtyState) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"\x1b[?25l\x1b[H\x1b[0m");

    let mut pen: Option<(u16, Color, Color)> = None;
    let num_rows = state.image.len();
    for (row, line) in state.image.iter().enumerate() {
        for glyph in line {
            let signature = pen_signature(glyph);
            if pen != Some(signature) {
                push_pen(&mut out, glyph);
                pen = Some(signature);
            }
            let mut buf = [0u8; 4];
            out.extend_from_slice(glyph.char.encode_utf8(&mut buf).as_bytes());
        }
        if row + 1 < num_rows {
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(
        format!("\x1b[0m\x1b[{};{}H", state.cursor.r + 1, state.cursor.c + 1).as_bytes(),
    );
    if state.cursor_visible {
        out.extend_from_slice(b"\x1b[?25h");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Size, Vec2};

    #[test]
    fn rendered_output_replays_into_the_same_image() {
        let mut state = TtyState::new(Size::new(3, 8));
        state.image[0][0].char = 'h';
        state.image[0][1].char = 'i';
        state.image[0][1].fg = Color::Indexed(2);
        state.image[1][0].char = '!';
        state.cursor = Vec2::new(1, 1);

        let bytes = render_full(&state);

        let mut term = crate::emu::Terminal::new(Size::new(3, 8));
        term.write(&bytes);
        assert_eq!(term.cell(0, 0).char, 'h');
        assert_eq!(term.cell(1, 0).char, 'i');
        assert_eq!(term.cell(1, 0).fg, Color::Indexed(2));
        assert_eq!(term.cell(0, 1).char, '!');
        let cursor = term.cursor();
        assert_eq!((cursor.y as i32, cursor.x as i32), (1, 1));
    }

    #[test]
    fn hides_cursor_when_invisible() {
        let mut state = TtyState::new(Size::new(2, 4));
        state.cursor_visible = false;
        let bytes = render_full(&state);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("\x1b[?25l"));
        assert!(!text.contains("\x1b[?25h"));
    }
}

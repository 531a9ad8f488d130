use crate::emu::glyph::{self, empty_line, Glyph, Line, ATTR_WRAP};
use crate::geom::clamp;

/// Wrap a logical line at `cols`, covering only its non-trailing-whitespace
/// prefix. Every emitted line has exactly `cols` cells; the wrap attribute is
/// set on the last cell of each emitted line except the final one. Blank
/// lines produce no output.
pub fn wrap_line(line: &[Glyph], cols: usize) -> Vec<Line> {
    let length = glyph::line_length(line);
    if length == 0 {
        return Vec::new();
    }

    let mut num_lines = length / cols;
    if length % cols > 0 {
        num_lines += 1;
    }

    let mut result = Vec::with_capacity(num_lines);
    for i in 0..num_lines {
        let start = i * cols;
        let end = ((i + 1) * cols).min(length);

        let mut row: Line = line[start..end].to_vec();
        for glyph in row.iter_mut() {
            glyph.mode &= !ATTR_WRAP;
        }
        while row.len() < cols {
            row.push(Glyph::default());
        }
        result.push(row);
    }

    for i in 0..result.len().saturating_sub(1) {
        result[i][cols - 1].mode |= ATTR_WRAP;
    }

    result
}

/// Recalculate the wrap point for all lines in `history` and `screen`,
/// producing a new `(history, screen)` pair with at most `rows` lines on the
/// screen.
pub fn reflow(
    history: &[Line],
    screen: &[Line],
    rows: usize,
    cols: usize,
) -> (Vec<Line>, Vec<Line>) {
    // Each entry is the physical lines of one logical line; blank logical
    // lines keep a placeholder so interior blank rows survive.
    let mut result: Vec<Option<Vec<Line>>> = Vec::new();

    let mut current: Option<Line> = None;
    for line in history.iter().chain(screen.iter()) {
        let was_wrapped = glyph::is_wrapped(line);

        match current.as_mut() {
            Some(joined) => joined.extend(line.iter().cloned()),
            None => current = Some(line.clone()),
        }

        if was_wrapped {
            continue;
        }

        let joined = current.take().unwrap();
        let wrapped = wrap_line(&joined, cols);
        result.push(if wrapped.is_empty() {
            None
        } else {
            Some(wrapped)
        });
    }

    if let Some(joined) = current.take() {
        let wrapped = wrap_line(&joined, cols);
        result.push(if wrapped.is_empty() {
            None
        } else {
            Some(wrapped)
        });
    }

    // Trailing blank lines are dropped entirely.
    while matches!(result.last(), Some(None)) {
        result.pop();
    }

    let mut flat: Vec<Line> = Vec::new();
    for entry in result {
        match entry {
            Some(lines) => flat.extend(lines),
            None => flat.push(empty_line(cols)),
        }
    }

    let num_history = clamp(flat.len() as i32 - rows as i32, 0, flat.len() as i32) as usize;
    let screen = flat.split_off(num_history);
    (flat, screen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::glyph::{line_string, text_line};

    fn wrapped_line(text: &str) -> Line {
        let mut line = text_line(text);
        if let Some(last) = line.last_mut() {
            last.mode |= ATTR_WRAP;
        }
        line
    }

    fn strings(lines: &[Line]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line_string(line).trim_end().to_string())
            .collect()
    }

    #[test]
    fn wrap_marks_continuations() {
        let line = text_line("abcdefg");
        let wrapped = wrap_line(&line, 3);
        assert_eq!(strings(&wrapped), vec!["abc", "def", "g"]);
        assert!(glyph::is_wrapped(&wrapped[0]));
        assert!(glyph::is_wrapped(&wrapped[1]));
        assert!(!glyph::is_wrapped(&wrapped[2]));
        assert!(wrapped.iter().all(|row| row.len() == 3));
    }

    #[test]
    fn wrap_elides_blank_lines() {
        assert!(wrap_line(&text_line("     "), 4).is_empty());
        assert!(wrap_line(&[], 4).is_empty());
    }

    #[test]
    fn reflow_partitions_at_rows() {
        let history = vec![text_line("abcdefg")];
        let screen = vec![text_line("hij")];
        let (new_history, new_screen) = reflow(&history, &screen, 2, 3);
        assert_eq!(strings(&new_history), vec!["abc", "def"]);
        assert_eq!(strings(&new_screen), vec!["g", "hij"]);
    }

    #[test]
    fn reflow_joins_wrapped_runs() {
        // "abc" + "defg" form one logical line; widening merges them back.
        let history = vec![wrapped_line("abc")];
        let screen = vec![text_line("defg")];
        let (new_history, new_screen) = reflow(&history, &screen, 4, 10);
        assert!(new_history.is_empty());
        assert_eq!(strings(&new_screen), vec!["abcdefg"]);
    }

    #[test]
    fn reflow_is_idempotent() {
        let history = vec![text_line("the quick brown fox"), text_line("")];
        let screen = vec![text_line("jumps over"), text_line("the lazy dog")];
        let (h1, s1) = reflow(&history, &screen, 3, 7);
        let (h2, s2) = reflow(&h1, &s1, 3, 7);
        assert_eq!(h1, h2);
        assert_eq!(s1, s2);
    }

    #[test]
    fn reflow_round_trips_through_wide_columns() {
        let history = vec![text_line("abcdefg")];
        let screen = vec![text_line("!abc"), text_line("foobarbaz")];
        let (h1, s1) = reflow(&history, &screen, 2, 3);
        let (h2, s2) = reflow(&h1, &s1, 2, 64);

        let mut original = strings(&history);
        original.extend(strings(&screen));
        let mut round_tripped = strings(&h2);
        round_tripped.extend(strings(&s2));
        assert_eq!(original, round_tripped);
    }

    #[test]
    fn reflow_preserves_interior_blank_lines() {
        let screen = vec![text_line("a"), text_line(""), text_line("b")];
        let (history, new_screen) = reflow(&[], &screen, 3, 5);
        assert!(history.is_empty());
        assert_eq!(strings(&new_screen), vec!["a", "", "b"]);
    }
}

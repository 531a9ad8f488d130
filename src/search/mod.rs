//! Scans a recorded event stream for text appearances or time offsets.
//! Search is a pure function of an immutable event slice; the only side
//! effects are progress notifications to a caller-provided sink.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::emu::{line_string, Terminal};
use crate::geom::{Vec2, DEFAULT_SIZE};
use crate::sessions::{Event, EventData};

/// A point in a session: an event index and a byte offset within it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Address {
    pub index: usize,
    pub offset: usize,
}

/// An inclusive range of cells in joined history+screen coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Selection {
    pub from: Vec2,
    pub to: Vec2,
}

/// One appearance of the needle: where in the session it first showed up,
/// where it disappeared (or the end of the stream), and the cells it
/// occupied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResult {
    pub begin: Address,
    pub end: Address,
    pub selection: Selection,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("search cancelled")]
    Cancelled,
}

/// Scan progress in percent of events processed.
pub type ProgressSink<'a> = &'a mut dyn FnMut(u8);

struct Scanner {
    terminal: Terminal,
    needle: Vec<char>,
    needle_chars: HashSet<char>,
    /// Appearances currently visible on screen, keyed by their start cell.
    open: HashMap<Vec2, Address>,
    /// Appearances that scrolled into history; immutable from then on.
    scrolled: Vec<(Vec2, Address)>,
    results: Vec<SearchResult>,
}

impl Scanner {
    fn new(needle: &str) -> Self {
        Scanner {
            terminal: Terminal::new(DEFAULT_SIZE),
            needle: needle.chars().collect(),
            needle_chars: needle.chars().collect(),
            open: HashMap::new(),
            scrolled: Vec::new(),
            results: Vec::new(),
        }
    }

    /// All needle occurrences currently on the screen, as start cells in
    /// joined coordinates.
    fn visible(&self) -> HashSet<Vec2> {
        let mut found = HashSet::new();
        let root = self.terminal.root();
        let flowed = self.terminal.flow(Vec2::new(0, i32::MAX / 2), root);

        for line in &flowed.lines {
            let chars: Vec<char> = line_string(&line.chars).chars().collect();
            if chars.len() < self.needle.len() {
                continue;
            }
            for start in 0..=chars.len() - self.needle.len() {
                if chars[start..start + self.needle.len()] == self.needle[..] {
                    found.insert(Vec2::new(line.r, line.c0 + start as i32));
                }
            }
        }
        found
    }

    fn reconcile(&mut self, address: Address) {
        let visible = self.visible();
        let root_r = self.terminal.root().r;

        for &pos in &visible {
            self.open.entry(pos).or_insert(address);
        }

        let gone: Vec<Vec2> = self
            .open
            .keys()
            .filter(|pos| !visible.contains(pos))
            .copied()
            .collect();
        for pos in gone {
            let begin = self.open.remove(&pos).unwrap();
            if pos.r < root_r {
                // Evicted to history: the text is still part of the session.
                self.scrolled.push((pos, begin));
            } else {
                self.results.push(SearchResult {
                    begin,
                    end: address,
                    selection: self.selection(pos),
                });
            }
        }
    }

    fn selection(&self, pos: Vec2) -> Selection {
        Selection {
            from: pos,
            to: Vec2::new(pos.r, pos.c + self.needle.len() as i32 - 1),
        }
    }

    fn finish(mut self, end: Address) -> Vec<SearchResult> {
        let open: Vec<(Vec2, Address)> = self.open.drain().collect();
        let scrolled: Vec<(Vec2, Address)> = self.scrolled.drain(..).collect();
        for (pos, begin) in open.into_iter().chain(scrolled.into_iter()) {
            self.results.push(SearchResult {
                begin,
                end,
                selection: self.selection(pos),
            });
        }
        self.results.sort_by_key(|result| result.begin);
        self.results
    }
}

/// Find every appearance of `needle` across a session. Cancellation is
/// checked at every event boundary and is never silent: the caller sees
/// either the complete result or `Cancelled`.
pub fn search(
    events: &[Event],
    needle: &str,
    mut progress: Option<ProgressSink<'_>>,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<SearchResult>, SearchError> {
    if needle.is_empty() || events.is_empty() {
        return Ok(Vec::new());
    }

    let mut scanner = Scanner::new(needle);
    let num_events = events.len();

    for (index, event) in events.iter().enumerate() {
        if let Some(cancel) = cancel {
            if cancel.is_cancelled() {
                return Err(SearchError::Cancelled);
            }
        }

        match &event.data {
            EventData::Size(size) => {
                scanner.terminal.resize(*size);
                scanner.reconcile(Address { index, offset: 0 });
            }
            EventData::Output(data) => {
                // Byte-at-a-time so each appearance gets an exact offset; a
                // full reconcile only runs when a needle character lands.
                for (offset, &byte) in data.iter().enumerate() {
                    let before = scanner.terminal.dirty().print;
                    scanner.terminal.write(&[byte]);
                    let after = scanner.terminal.dirty().print;

                    if before != after {
                        let printed = after
                            .map(|print| {
                                let cell = scanner
                                    .terminal
                                    .cell(print.pos.c as usize, print.pos.r as usize);
                                scanner.needle_chars.contains(&cell.char)
                            })
                            .unwrap_or(false);
                        if printed {
                            scanner.reconcile(Address { index, offset });
                        }
                    }
                }
                let offset = data.len().saturating_sub(1);
                scanner.reconcile(Address { index, offset });
            }
        }

        if let Some(sink) = progress.as_mut() {
            sink((((index + 1) * 100) / num_events) as u8);
        }
    }

    let last = events.len() - 1;
    let end_offset = match &events[last].data {
        EventData::Output(data) => data.len().saturating_sub(1),
        EventData::Size(_) => 0,
    };
    Ok(scanner.finish(Address {
        index: last,
        offset: end_offset,
    }))
}

/// Parse a duration query like `45s`, `3m`, `1h30m`. Returns `None` when
/// the text is not a duration at all.
pub fn parse_duration(query: &str) -> Option<Duration> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    for ch in query.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match ch {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total += Duration::from_secs(value * unit);
    }

    if !digits.is_empty() {
        // A bare number is not a duration query.
        return None;
    }
    Some(total)
}

/// The index of the event whose timestamp is closest to the current event's
/// stamp plus or minus `delta`. A zero delta is a no-op.
pub fn find_time(events: &[Event], current: usize, delta: Duration, forward: bool) -> usize {
    if events.is_empty() || delta.is_zero() {
        return current;
    }
    let current = current.min(events.len() - 1);
    let delta = delta.as_nanos() as i64;
    let target = if forward {
        events[current].stamp.saturating_add(delta)
    } else {
        events[current].stamp.saturating_sub(delta)
    };

    let mut best = current;
    let mut best_distance = i64::MAX;
    for (index, event) in events.iter().enumerate() {
        let distance = (event.stamp - target).abs();
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

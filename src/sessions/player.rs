use crate::emu::{State, Terminal};
use crate::geom::{clamp, DEFAULT_SIZE};
use crate::sessions::{Event, EventData};

/// The first geometric snapshot boundary; later snapshots double the index.
const FIRST_SNAPSHOT: usize = 16;

struct Snapshot {
    /// Events `[0, index]` are applied in `state`.
    index: usize,
    state: State,
}

/// Replays a recorded session into a fresh emulator. Playing is monotonic
/// forward; a backward seek restores the nearest snapshot at or before the
/// target and replays from there, which is byte-equivalent to replaying
/// from the start.
pub struct Player {
    events: Vec<Event>,
    terminal: Terminal,
    /// The index of the last applied event, or `None` before the first.
    index: Option<usize>,
    snapshots: Vec<Snapshot>,
    next_snapshot: usize,
}

impl Player {
    pub fn new(events: Vec<Event>) -> Self {
        Player {
            events,
            terminal: Terminal::new(DEFAULT_SIZE),
            index: None,
            snapshots: Vec::new(),
            next_snapshot: FIRST_SNAPSHOT,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut Terminal {
        &mut self.terminal
    }

    /// The index of the currently displayed event; zero before any seek.
    pub fn index(&self) -> usize {
        self.index.unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn current_stamp(&self) -> Option<i64> {
        self.index.map(|i| self.events[i].stamp)
    }

    fn apply(&mut self, index: usize) {
        match &self.events[index].data {
            EventData::Output(data) => {
                let data = data.clone();
                self.terminal.write(&data);
            }
            EventData::Size(size) => self.terminal.resize(*size),
        }

        // Snapshots are only taken at writes that leave the parser in its
        // ground state; restoring mid-sequence would corrupt the replay.
        if index + 1 >= self.next_snapshot && self.event_ends_in_ground(index) {
            self.snapshots.push(Snapshot {
                index,
                state: self.terminal.snapshot(),
            });
            while self.next_snapshot <= index + 1 {
                self.next_snapshot *= 2;
            }
        }
    }

    fn event_ends_in_ground(&self, index: usize) -> bool {
        match &self.events[index].data {
            EventData::Output(data) => ends_in_ground(data),
            EventData::Size(_) => true,
        }
    }

    /// Seek to an event index; negative indices count back from the end.
    /// Returns the resolved index. Equivalent to replaying events `[0, i]`
    /// into a fresh emulator.
    pub fn seek(&mut self, index: i64) -> usize {
        let num_events = self.events.len();
        if num_events == 0 {
            return 0;
        }

        let to = if index < 0 {
            clamp(num_events as i32 + index as i32, 0, num_events as i32 - 1) as usize
        } else {
            clamp(index as i32, 0, num_events as i32 - 1) as usize
        };

        match self.index {
            Some(from) if from == to => return to,
            Some(from) if from < to => {
                for i in from + 1..=to {
                    self.apply(i);
                }
            }
            _ => {
                // Backward (or first) seek: restore the nearest snapshot at
                // or before the target, then replay the remainder.
                let snapshot = self
                    .snapshots
                    .iter()
                    .rev()
                    .find(|snapshot| snapshot.index <= to);

                let start = match snapshot {
                    Some(snapshot) => {
                        let state = snapshot.state.clone();
                        self.terminal.restore(state);
                        snapshot.index + 1
                    }
                    None => {
                        self.terminal = Terminal::new(DEFAULT_SIZE);
                        0
                    }
                };

                for i in start..=to {
                    self.apply(i);
                }
            }
        }

        self.index = Some(to);
        to
    }

    pub fn step_forward(&mut self) -> usize {
        match self.index {
            Some(index) => self.seek(index as i64 + 1),
            None => self.seek(0),
        }
    }

    pub fn step_back(&mut self) -> usize {
        match self.index {
            Some(index) if index > 0 => self.seek(index as i64 - 1),
            _ => self.seek(0),
        }
    }

    pub fn to_beginning(&mut self) -> usize {
        self.seek(0)
    }

    pub fn to_end(&mut self) -> usize {
        self.seek(-1)
    }
}

/// Whether `data` leaves a VT parser in its ground state: no dangling
/// escape sequence and no partial UTF-8 character. Conservative; used only
/// to gate snapshots.
fn ends_in_ground(data: &[u8]) -> bool {
    #[derive(PartialEq)]
    enum Scan {
        Ground,
        Escape,
        Csi,
        OscOrString,
    }

    let mut state = Scan::Ground;
    let mut iter = data.iter().peekable();
    while let Some(&byte) = iter.next() {
        state = match state {
            Scan::Ground => match byte {
                0x1b => Scan::Escape,
                _ => Scan::Ground,
            },
            Scan::Escape => match byte {
                b'[' => Scan::Csi,
                b']' | b'P' | b'X' | b'^' | b'_' => Scan::OscOrString,
                _ => Scan::Ground,
            },
            Scan::Csi => match byte {
                0x40..=0x7e => Scan::Ground,
                _ => Scan::Csi,
            },
            Scan::OscOrString => match byte {
                0x07 => Scan::Ground,
                0x1b => {
                    // ST is ESC \; anything else begins a new sequence.
                    match iter.next() {
                        Some(b'\\') | None => Scan::Ground,
                        Some(b'[') => Scan::Csi,
                        Some(_) => Scan::Ground,
                    }
                }
                _ => Scan::OscOrString,
            },
        };
    }

    if state != Scan::Ground {
        return false;
    }

    // A trailing partial UTF-8 sequence also carries parser state.
    let tail = &data[data.len().saturating_sub(4)..];
    for (i, &byte) in tail.iter().enumerate() {
        let needed = match byte {
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => continue,
        };
        if tail.len() - i < needed {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Size;

    fn fixture() -> Vec<Event> {
        let mut events = vec![Event::size(0, Size::new(4, 10))];
        for i in 0..40 {
            events.push(Event::output(
                (i + 1) * 1_000,
                format!("line {}\r\n", i).into_bytes(),
            ));
        }
        events
    }

    #[test]
    fn seek_matches_stepping() {
        let events = fixture();
        for target in [0usize, 5, 17, 40] {
            let mut stepped = Player::new(events.clone());
            stepped.seek(0);
            for _ in 0..target {
                stepped.step_forward();
            }

            let mut sought = Player::new(events.clone());
            sought.seek(target as i64);

            assert_eq!(
                stepped.terminal().screen_string(),
                sought.terminal().screen_string(),
                "target {}",
                target
            );
        }
    }

    #[test]
    fn backward_seek_rebuilds() {
        let events = fixture();
        let mut player = Player::new(events.clone());
        player.to_end();
        player.seek(3);

        let mut fresh = Player::new(events);
        fresh.seek(3);
        assert_eq!(
            player.terminal().screen_string(),
            fresh.terminal().screen_string()
        );
        assert_eq!(player.index(), 3);
    }

    #[test]
    fn split_escape_sequences_survive_seeks() {
        // An SGR sequence split across two events straddles every snapshot
        // boundary candidate; seeks must still replay it correctly.
        let mut events = vec![Event::size(0, Size::new(2, 20))];
        for i in 0..30 {
            events.push(Event::output(i * 10, b"\x1b[3".to_vec()));
            events.push(Event::output(i * 10 + 1, b"1mx\x1b[m\r".to_vec()));
        }

        let mut player = Player::new(events.clone());
        player.to_end();
        player.seek(40);

        let mut fresh = Player::new(events);
        fresh.seek(40);
        assert_eq!(
            player.terminal().screen_string(),
            fresh.terminal().screen_string()
        );
        assert_eq!(
            player.terminal().cell(0, 0).fg,
            fresh.terminal().cell(0, 0).fg
        );
    }

    #[test]
    fn negative_index_counts_from_end() {
        let events = fixture();
        let mut player = Player::new(events);
        assert_eq!(player.to_end(), 40);
        assert_eq!(player.seek(-2), 39);
    }

    #[test]
    fn ground_detection() {
        assert!(ends_in_ground(b"plain text\r\n"));
        assert!(ends_in_ground(b"\x1b[31mred\x1b[m"));
        assert!(!ends_in_ground(b"text\x1b["));
        assert!(!ends_in_ground(b"text\x1b]0;title"));
        assert!(ends_in_ground(b"text\x1b]0;title\x07"));
        assert!(!ends_in_ground(&[b'a', 0xe4, 0xb8]));
        assert!(ends_in_ground("漢".as_bytes()));
    }
}

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::emu::{is_alt_mode, line_length, line_string, Terminal, WriteId, COMMAND_HOOK};
use crate::geom::Vec2;
use crate::search::Selection;

/// One detected shell command: where it was typed, the output it produced,
/// and the event indices of its lifecycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub input: Vec<Selection>,
    pub output: Selection,
    pub prompted: usize,
    pub executed: usize,
    pub completed: usize,
    pub text: String,
}

/// Per-consumer queue depth for command fan-out; consumers that fall
/// further behind drop the oldest commands.
const COMMAND_QUEUE: usize = 256;

/// Watches an emulator for the prompt hook (OSC 177) and cuts the stream
/// into commands at each pair of hooks. A hook whose write printed nothing
/// leaves no anchor and is discarded; the first hook is stored silently.
pub struct Detector {
    have_prompt: bool,
    from: Vec2,
    from_write: WriteId,
    from_index: usize,
    commands: Vec<Command>,
    tx: broadcast::Sender<Command>,
}

impl Default for Detector {
    fn default() -> Self {
        Detector::new()
    }
}

impl Detector {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(COMMAND_QUEUE);
        Detector {
            have_prompt: false,
            from: Vec2::ZERO,
            from_write: 0,
            from_index: 0,
            commands: Vec::new(),
            tx,
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Command> {
        self.tx.subscribe()
    }

    /// Inspect the terminal's dirty state after a write; `index` is the
    /// position in the event stream (zero for live panes).
    pub fn update(&mut self, term: &mut Terminal, index: usize) {
        let dirty = term.dirty().clone();
        term.dirty_mut().reset();

        if is_alt_mode(term.mode()) {
            return;
        }

        if dirty.hook(COMMAND_HOOK).is_none() {
            return;
        }

        let flow = term.flow(term.size(), term.root());
        if !flow.ok || !flow.cursor_ok {
            return;
        }

        let Some(print) = dirty.print else {
            return;
        };
        let to = match flow.coord(print.pos) {
            Some(to) => to,
            None => {
                // A prompt ending in unstyled whitespace reflows away its
                // tail; anchor on the last real cell of that row instead.
                let Some(line) = flow.lines.get(print.pos.r.max(0) as usize) else {
                    return;
                };
                let last = (line.c1 - line.c0 - 1).max(0);
                Vec2::new(line.r, line.c0 + print.pos.c.min(last))
            }
        };

        // If the prompt itself printed nothing there is no anchor: the most
        // recent write must be the one that printed.
        let to_write = dirty.last_write();
        if print.write != to_write {
            return;
        }

        let from = std::mem::replace(&mut self.from, to);
        let from_write = std::mem::replace(&mut self.from_write, to_write);
        let from_index = std::mem::replace(&mut self.from_index, index);

        if !self.have_prompt {
            self.have_prompt = true;
            return;
        }

        let Some(mut command) = self.cut_command(term, from, to, from_write) else {
            return;
        };
        command.prompted = from_index;
        command.executed = from_index;
        command.completed = index;

        let mut text = String::new();
        for (i, input) in command.input.iter().enumerate() {
            let Some(line) = term.joined_line(input.from.r) else {
                return;
            };
            let lo = input.from.c.max(0) as usize;
            let hi = ((input.to.c + 1).max(0) as usize).min(line.len());
            if lo >= hi {
                return;
            }
            text.push_str(line_string(&line[lo..hi]).trim());
            if i < command.input.len() - 1 {
                text.push('\n');
            }
        }
        command.text = text;

        self.commands.push(command.clone());
        let _ = self.tx.send(command);
    }

    /// Build the command delimited by two prompt anchors: input is the text
    /// after the first prompt on its line (only cells written after the
    /// prompt count), output is everything between the prompts.
    fn cut_command(&self, term: &Terminal, from: Vec2, to: Vec2, from_write: WriteId) -> Option<Command> {
        if to.r < from.r || (to.r == from.r && to.c <= from.c) {
            return None;
        }

        let input_line = term.joined_line(from.r)?;
        let input_start = from.c + 1;
        let mut input_end = line_length(&input_line) as i32 - 1;
        while input_end >= input_start && input_line[input_end as usize].write < from_write {
            input_end -= 1;
        }
        if input_end < input_start {
            return None;
        }

        let input = Selection {
            from: Vec2::new(from.r, input_start),
            to: Vec2::new(from.r, input_end),
        };

        let output = if to.r > from.r + 1 {
            let last_row = to.r - 1;
            let last_line = term.joined_line(last_row)?;
            Selection {
                from: Vec2::new(from.r + 1, 0),
                to: Vec2::new(last_row, (line_length(&last_line) as i32 - 1).max(0)),
            }
        } else {
            Selection::default()
        };

        Some(Command {
            input: vec![input],
            output,
            ..Command::default()
        })
    }
}

use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::geom::Size;
use crate::mux::{Screen, ScreenEvent, SCREEN_QUEUE};
use crate::replay::Replay;
use crate::sessions::Event;
use crate::tty::TtyState;

/// A pane's recorded history presented as an attachable screen: key input
/// drives the replay cursor instead of a subprocess.
pub struct ReplayScreen {
    replay: Mutex<Replay>,
    updates: broadcast::Sender<ScreenEvent>,
}

impl ReplayScreen {
    pub fn new(events: Vec<Event>, viewport: Size) -> ReplayScreen {
        let (updates, _) = broadcast::channel(SCREEN_QUEUE);
        ReplayScreen {
            replay: Mutex::new(Replay::new(events, viewport)),
            updates,
        }
    }

    fn handle_key(&self, replay: &mut Replay, byte: u8) -> bool {
        match byte {
            b'q' | 0x03 => return true,
            b'h' => replay.move_cursor_x(-1),
            b'l' => replay.move_cursor_x(1),
            b'k' => replay.move_cursor_y(-1),
            b'j' => replay.move_cursor_y(1),
            // ctrl-u / ctrl-d scroll half the viewport.
            0x15 => replay.scroll_y_delta(-(replay.viewport().r / 2).max(1)),
            0x04 => replay.scroll_y_delta((replay.viewport().r / 2).max(1)),
            b'g' => replay.scroll_top(),
            b'G' => replay.scroll_bottom(),
            b'[' => replay.step_back(),
            b']' => replay.step_forward(),
            b'0' => replay.to_beginning(),
            b'$' => replay.to_end(),
            0x1b => replay.exit_selection(),
            _ => return false,
        }
        false
    }
}

impl Screen for ReplayScreen {
    fn state(&self) -> TtyState {
        self.replay.lock().unwrap().view(&[])
    }

    fn size(&self) -> Size {
        self.replay.lock().unwrap().viewport()
    }

    fn resize(&self, size: Size) {
        self.replay.lock().unwrap().resize(size);
        let _ = self.updates.send(ScreenEvent::Changed);
    }

    fn write_input(&self, data: &[u8]) {
        let mut replay = self.replay.lock().unwrap();
        let mut done = false;
        for &byte in data {
            if self.handle_key(&mut replay, byte) {
                done = true;
                break;
            }
        }
        drop(replay);

        if done {
            let _ = self.updates.send(ScreenEvent::Exited);
        } else {
            let _ = self.updates.send(ScreenEvent::Changed);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ScreenEvent> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen() -> ReplayScreen {
        let mut events = vec![Event::size(0, Size::new(4, 10))];
        for i in 0..8 {
            events.push(Event::output(i, format!("line {}\r\n", i).into_bytes()));
        }
        ReplayScreen::new(events, Size::new(4, 10))
    }

    #[test]
    fn keys_drive_the_replay() {
        let screen = screen();
        let mut updates = screen.subscribe();

        screen.write_input(b"k");
        assert_eq!(updates.try_recv(), Ok(ScreenEvent::Changed));

        screen.write_input(b"[");
        assert_eq!(updates.try_recv(), Ok(ScreenEvent::Changed));
    }

    #[test]
    fn quit_emits_exited() {
        let screen = screen();
        let mut updates = screen.subscribe();
        screen.write_input(b"q");
        assert_eq!(updates.try_recv(), Ok(ScreenEvent::Exited));
    }
}

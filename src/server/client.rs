use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::emu::{Color, Glyph};
use crate::geom::{Rect, Size, Vec2};
use crate::mux::{Screen, ScreenEvent, SCREEN_QUEUE};
use crate::server::MuxServer;
use crate::tty::{copy_image, TtyState};

struct ClientState {
    size: Size,
    screen: Option<Arc<dyn Screen>>,
    attachment: Option<CancellationToken>,
}

/// One attached client of the mux server: its viewport size, the screen it
/// is attached to, and the scoped lifetime of that attachment.
pub struct MuxClient {
    state: Mutex<ClientState>,
    publisher: broadcast::Sender<ScreenEvent>,
    server: Weak<MuxServer>,
}

impl MuxClient {
    pub(super) fn new(server: Weak<MuxServer>, size: Size) -> Arc<MuxClient> {
        let (publisher, _) = broadcast::channel(SCREEN_QUEUE);
        Arc::new(MuxClient {
            state: Mutex::new(ClientState {
                size,
                screen: None,
                attachment: None,
            }),
            publisher,
            server,
        })
    }

    pub fn size(&self) -> Size {
        self.state.lock().unwrap().size
    }

    pub fn screen(&self) -> Option<Arc<dyn Screen>> {
        self.state.lock().unwrap().screen.clone()
    }

    /// Updates from the currently attached screen only; re-attaching swaps
    /// the stream at the same receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ScreenEvent> {
        self.publisher.subscribe()
    }

    /// Attach to a screen. Any prior attachment is cancelled first; both
    /// the old and new screens get their sizes recomputed.
    pub fn attach(self: &Arc<Self>, ctx: &CancellationToken, screen: Arc<dyn Screen>) {
        let attachment = ctx.child_token();

        let old_screen = {
            let mut state = self.state.lock().unwrap();
            if let Some(old) = state.attachment.take() {
                old.cancel();
            }
            state.attachment = Some(attachment.clone());
            std::mem::replace(&mut state.screen, Some(screen.clone()))
        };

        if let Some(server) = self.server.upgrade() {
            if let Some(old_screen) = old_screen {
                server.refresh_pane(old_screen.as_ref());
            }
            server.refresh_pane(screen.as_ref());
        }

        let client = self.clone();
        let mut updates = screen.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Cancellation always wins over a pending event so a
                    // stale attachment can never deliver one more update.
                    biased;
                    _ = attachment.cancelled() => return,
                    event = updates.recv() => match event {
                        Ok(event) => {
                            let _ = client.publisher.send(event);
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Dropped oldest updates; the next state read
                            // catches the client up.
                            let _ = client.publisher.send(ScreenEvent::Changed);
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        let _ = self.publisher.send(ScreenEvent::Changed);
    }

    pub fn detach(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(attachment) = state.attachment.take() {
            attachment.cancel();
        }
        state.screen = None;
    }

    pub fn resize(&self, size: Size) {
        let screen = {
            let mut state = self.state.lock().unwrap();
            state.size = size;
            state.screen.clone()
        };

        if let Some(screen) = screen {
            if let Some(server) = self.server.upgrade() {
                server.refresh_pane(screen.as_ref());
            }
        }
    }

    pub fn write_input(&self, data: &[u8]) {
        let screen = self.state.lock().unwrap().screen.clone();
        // Input during a reattachment transition is dropped with the old
        // attachment; this is the only allowed input loss.
        if let Some(screen) = screen {
            screen.write_input(data);
        }
    }

    /// Compose this client's output image. A screen at least as large as
    /// the viewport is copied top-left; a smaller one is centered on a
    /// dim-dashed background. The cursor is forced off-screen and invisible
    /// when it falls outside the visible rectangle.
    pub fn state(&self) -> TtyState {
        let (size, screen) = {
            let state = self.state.lock().unwrap();
            (state.size, state.screen.clone())
        };

        let Some(screen) = screen else {
            return TtyState::new(size);
        };

        let state = screen.state();
        if size.is_zero() {
            return state;
        }

        let mut out = TtyState::new(size);
        let state_size = state.size();

        if state_size.r >= size.r && state_size.c >= size.c {
            copy_image(Vec2::ZERO, &mut out, &state);
        } else {
            for line in out.image.iter_mut() {
                for glyph in line.iter_mut() {
                    *glyph = Glyph {
                        char: '-',
                        fg: Color::Indexed(8),
                        ..Glyph::default()
                    };
                }
            }
            copy_image(size.center(state_size), &mut out, &state);
        }

        let visible = Rect {
            pos: Vec2::ZERO,
            size: Size::new(size.r - 1, size.c - 1),
        };
        if !visible.contains(out.cursor) {
            out.cursor = Vec2::ZERO;
            out.cursor_visible = false;
        }

        out
    }

    pub(super) fn kill(&self) {
        self.detach();
    }
}

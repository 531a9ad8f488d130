//! The multiplexer's composition surface: anything that can be attached to
//! a client is a [`Screen`].

use tokio::sync::broadcast;

use crate::geom::Size;
use crate::tty::TtyState;

/// Events published by a screen to its subscribers. Subscriptions use a
/// bounded broadcast queue; a consumer that falls behind loses the oldest
/// events, which is safe because every event is a prompt to re-read state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenEvent {
    Changed,
    Exited,
}

/// Per-subscriber queue depth for screen updates.
pub const SCREEN_QUEUE: usize = 64;

pub trait Screen: Send + Sync {
    /// The renderable image of this screen.
    fn state(&self) -> TtyState;

    /// The screen's natural size.
    fn size(&self) -> Size;

    fn resize(&self, size: Size);

    /// Deliver client input to whatever process is behind the screen.
    fn write_input(&self, data: &[u8]);

    fn subscribe(&self) -> broadcast::Receiver<ScreenEvent>;
}

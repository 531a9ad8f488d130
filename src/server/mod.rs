//! The multi-client mux server: attachment lifetimes, per-client screen
//! composition, and the resize policy that keeps a screen as large as its
//! largest attached viewport.

mod client;
pub mod daemon;
pub mod render;
pub mod replay_screen;

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::geom::Size;
use crate::mux::Screen;

pub use client::MuxClient;

#[derive(Default)]
pub struct MuxServer {
    clients: Mutex<Vec<Arc<MuxClient>>>,
}

impl MuxServer {
    pub fn new() -> Arc<MuxServer> {
        Arc::new(MuxServer::default())
    }

    /// Register a client; it deregisters itself when `ctx` is cancelled.
    pub fn add_client(self: &Arc<Self>, ctx: &CancellationToken, size: Size) -> Arc<MuxClient> {
        let client = MuxClient::new(Arc::downgrade(self), size);
        self.clients.lock().unwrap().push(client.clone());

        let server = self.clone();
        let handle = client.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            ctx.cancelled().await;
            let screen = handle.screen();
            handle.kill();
            server
                .clients
                .lock()
                .unwrap()
                .retain(|other| !Arc::ptr_eq(other, &handle));
            if let Some(screen) = screen {
                server.refresh_pane(screen.as_ref());
            }
        });

        client
    }

    pub fn num_clients(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Resize `screen` to the maximum viewport of the clients still
    /// attached to it. With no clients left the screen keeps its last size.
    pub fn refresh_pane(&self, screen: &dyn Screen) {
        let clients = self.clients.lock().unwrap().clone();

        let mut size: Option<Size> = None;
        for client in clients {
            let Some(attached) = client.screen() else {
                continue;
            };
            if !std::ptr::eq(
                attached.as_ref() as *const dyn Screen as *const (),
                screen as *const dyn Screen as *const (),
            ) {
                continue;
            }
            let client_size = client.size();
            size = Some(match size {
                Some(max) => Size::new(max.r.max(client_size.r), max.c.max(client_size.c)),
                None => client_size,
            });
        }

        if let Some(size) = size {
            if size.r > 0 && size.c > 0 {
                screen.resize(size);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Vec2;
    use crate::mux::ScreenEvent;
    use crate::tree::Tree;
    use std::time::Duration;

    async fn recv_changed(
        rx: &mut tokio::sync::broadcast::Receiver<ScreenEvent>,
    ) -> Option<ScreenEvent> {
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .and_then(|result| result.ok())
    }

    /// A screen that cannot be resized, like a replay frozen at its
    /// recorded dimensions.
    struct FixedScreen {
        state: Mutex<crate::tty::TtyState>,
        updates: tokio::sync::broadcast::Sender<ScreenEvent>,
    }

    impl FixedScreen {
        fn new(size: Size) -> Arc<FixedScreen> {
            let (updates, _) = tokio::sync::broadcast::channel(8);
            Arc::new(FixedScreen {
                state: Mutex::new(crate::tty::TtyState::new(size)),
                updates,
            })
        }
    }

    impl Screen for FixedScreen {
        fn state(&self) -> crate::tty::TtyState {
            self.state.lock().unwrap().clone()
        }

        fn size(&self) -> Size {
            self.state.lock().unwrap().size()
        }

        fn resize(&self, _size: Size) {}

        fn write_input(&self, _data: &[u8]) {}

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ScreenEvent> {
            self.updates.subscribe()
        }
    }

    #[tokio::test]
    async fn composes_smaller_screen_centered() {
        let screen = FixedScreen::new(Size::new(2, 4));
        screen.state.lock().unwrap().image[0][0].char = 'x';

        let server = MuxServer::new();
        let ctx = CancellationToken::new();
        let client = server.add_client(&ctx, Size::new(6, 10));
        client.attach(&ctx, screen.clone());

        let state = client.state();
        assert_eq!(state.size(), Size::new(6, 10));
        // The border fill is dim dashes; the screen lands centered.
        assert_eq!(state.image[0][0].char, '-');
        assert_eq!(state.image[2][3].char, 'x');
    }

    #[tokio::test]
    async fn attach_grows_pane_to_viewport() {
        let tree = Tree::new();
        let pane = tree
            .new_memory_pane(tree.root(), Size::new(2, 4))
            .expect("pane");

        let server = MuxServer::new();
        let ctx = CancellationToken::new();
        let client = server.add_client(&ctx, Size::new(10, 40));
        client.attach(&ctx, pane.clone());

        assert_eq!(pane.size(), Size::new(10, 40));
    }

    #[tokio::test]
    async fn attachment_is_exclusive() {
        let tree = Tree::new();
        let first = tree
            .new_memory_pane(tree.root(), Size::new(4, 10))
            .expect("first");
        let second = tree
            .new_memory_pane(tree.root(), Size::new(4, 10))
            .expect("second");

        let server = MuxServer::new();
        let ctx = CancellationToken::new();
        let client = server.add_client(&ctx, Size::new(4, 10));

        client.attach(&ctx, first.clone());
        let mut updates = client.subscribe();

        client.attach(&ctx, second.clone());
        // Drain the attach notification.
        while let Ok(event) = updates.try_recv() {
            let _ = event;
        }

        // Output on the old screen must not reach the client...
        first.write_input(b"old");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(updates.try_recv().is_err());

        // ...but output on the new one does.
        second.write_input(b"new");
        let event = recv_changed(&mut updates).await;
        assert_eq!(event, Some(ScreenEvent::Changed));
    }

    #[tokio::test]
    async fn biggest_attached_viewport_wins() {
        let tree = Tree::new();
        let pane = tree
            .new_memory_pane(tree.root(), Size::new(4, 10))
            .expect("pane");

        let server = MuxServer::new();
        let ctx = CancellationToken::new();
        let small = server.add_client(&ctx, Size::new(5, 20));
        let large = server.add_client(&ctx, Size::new(30, 90));
        small.attach(&ctx, pane.clone());
        large.attach(&ctx, pane.clone());

        assert_eq!(pane.size(), Size::new(30, 90));

        // The large client goes away; the pane shrinks to what remains.
        large.detach();
        server.refresh_pane(pane.as_ref());
        assert_eq!(pane.size(), Size::new(5, 20));
    }

    #[tokio::test]
    async fn disconnect_deregisters_client() {
        let tree = Tree::new();
        let pane = tree
            .new_memory_pane(tree.root(), Size::new(4, 10))
            .expect("pane");

        let server = MuxServer::new();
        let ctx = CancellationToken::new();
        let client = server.add_client(&ctx, Size::new(4, 10));
        client.attach(&ctx, pane.clone());
        assert_eq!(server.num_clients(), 1);

        ctx.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.num_clients(), 0);
    }

    #[tokio::test]
    async fn cursor_forced_off_when_outside() {
        let screen = FixedScreen::new(Size::new(4, 20));
        screen.state.lock().unwrap().cursor = Vec2::new(0, 14);

        let server = MuxServer::new();
        let ctx = CancellationToken::new();
        // The viewport only shows columns 0-3; the cursor at 14 is out.
        let client = server.add_client(&ctx, Size::new(2, 4));
        client.attach(&ctx, screen.clone());

        let state = client.state();
        assert!(!state.cursor_visible);
        assert_eq!(state.cursor, Vec2::ZERO);
    }
}

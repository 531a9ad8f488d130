use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bind::{Action, BindEvent, Engine};
use crate::config::{format_context, Config, CONTEXT_ENV};
use crate::error::CyError;
use crate::geom::{Size, DEFAULT_SIZE};
use crate::mux::ScreenEvent;
use crate::protocol::{read_message, write_message, Handshake, Message};
use crate::server::render::render_full;
use crate::server::replay_screen::ReplayScreen;
use crate::server::{MuxClient, MuxServer};
use crate::tree::{NodeId, PaneOptions, Tree};

/// The server must see a handshake this quickly or the connection is
/// rejected.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct CyServer {
    tree: Arc<Tree>,
    mux: Arc<MuxServer>,
    socket: PathBuf,
    config: Config,
    cancel: CancellationToken,
}

impl CyServer {
    pub fn new(socket: PathBuf, config: Config) -> Arc<CyServer> {
        let tree = Tree::new();

        // Default key table on the root scope; every pane inherits it.
        if let Ok(binds) = tree.group_binds(tree.root()) {
            binds.set(b"\x01n".to_vec(), Action::NextPane);
            binds.set(b"\x01p".to_vec(), Action::PreviousPane);
            binds.set(b"\x01c".to_vec(), Action::NewPane);
            binds.set(b"\x01x".to_vec(), Action::RemovePane);
            binds.set(b"\x01d".to_vec(), Action::Detach);
            binds.set(b"\x01r".to_vec(), Action::EnterReplay);
        }

        Arc::new(CyServer {
            tree,
            mux: MuxServer::new(),
            socket,
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Bind the socket and serve clients until cancelled.
    pub async fn listen(self: Arc<Self>) -> Result<(), CyError> {
        let listener = match UnixListener::bind(&self.socket) {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                // A stale socket from a dead server; clear it and rebind.
                std::fs::remove_file(&self.socket)?;
                UnixListener::bind(&self.socket)?
            }
            Err(err) => return Err(err.into()),
        };
        tracing::info!(target: "cy::server", socket = %self.socket.display(), "listening");

        self.default_pane()?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = std::fs::remove_file(&self.socket);
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_client(stream).await {
                            tracing::warn!(target: "cy::server", error = %err, "client session ended with error");
                        }
                    });
                }
            }
        }
    }

    /// The pane new clients attach to; created on demand.
    fn default_pane(&self) -> Result<Arc<crate::tree::Pane>, CyError> {
        if let Some(pane) = self.tree.leaves().into_iter().next() {
            return Ok(pane);
        }

        let shell = self.config.shell.clone();
        let term = self.config.term.clone();
        let socket = self.socket.clone();
        let pane = self.tree.new_pane_with(self.tree.root(), DEFAULT_SIZE, |id| PaneOptions {
            command: shell,
            env: vec![
                (CONTEXT_ENV.to_string(), format_context(&socket, id)),
                ("TERM".to_string(), term),
            ],
            ..PaneOptions::default()
        })?;
        Ok(pane)
    }

    async fn handle_client(self: Arc<Self>, stream: UnixStream) -> Result<(), CyError> {
        let (mut reader, mut writer) = stream.into_split();

        // The first frame must be a handshake, and it must arrive quickly.
        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_message(&mut reader)).await;
        let handshake = match handshake {
            Ok(Ok(Message::Handshake(handshake))) => handshake,
            Ok(Ok(_)) => {
                let _ = write_message(
                    &mut writer,
                    &Message::Error("must send handshake first".into()),
                )
                .await;
                return Err(CyError::Invalid("client skipped handshake".into()));
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                let _ = write_message(
                    &mut writer,
                    &Message::Error("no handshake received".into()),
                )
                .await;
                return Err(CyError::Timeout("handshake".into()));
            }
        };

        let ctx = self.cancel.child_token();
        let session = ClientSession::start(self.clone(), &ctx, handshake, writer).await?;
        let result = session.recv_loop(&ctx, reader).await;
        ctx.cancel();
        result
    }

    /// Execute an `exec` RPC: the code names an action in the registry.
    fn execute(&self, code: &str) -> Result<String, CyError> {
        let name = code.trim();
        match crate::bind::lookup_action(name) {
            Some(action) => Ok(format!("{:?}", action)),
            None => Err(CyError::NotFound(format!("unknown action {:?}", name))),
        }
    }
}

/// One connected client: its mux seat, bindings engine, and outbound frame
/// queue.
struct ClientSession {
    server: Arc<CyServer>,
    client: Arc<MuxClient>,
    node: Mutex<NodeId>,
    engine: Mutex<Engine>,
    frames: mpsc::UnboundedSender<Message>,
}

impl ClientSession {
    async fn start(
        server: Arc<CyServer>,
        ctx: &CancellationToken,
        handshake: Handshake,
        writer: OwnedWriteHalf,
    ) -> Result<Arc<ClientSession>, CyError> {
        let size = Size::new(handshake.rows as i32, handshake.cols as i32);
        let client = server.mux.add_client(ctx, size);

        let pane = server.default_pane()?;
        let node = pane.id();

        let (engine, bind_events) = Engine::new();
        let (frames, frame_queue) = mpsc::unbounded_channel();

        let session = Arc::new(ClientSession {
            server,
            client: client.clone(),
            node: Mutex::new(node),
            engine: Mutex::new(engine),
            frames,
        });

        session.attach_pane(ctx, pane);
        session.spawn_send_loop(ctx, writer, frame_queue);
        session.spawn_render_loop(ctx);
        session.spawn_bind_loop(ctx, bind_events);

        Ok(session)
    }

    fn attach_pane(&self, ctx: &CancellationToken, pane: Arc<crate::tree::Pane>) {
        *self.node.lock().unwrap() = pane.id();
        if let Ok(scopes) = self.server.tree.binds_for(pane.id()) {
            self.engine.lock().unwrap().set_scopes(scopes);
        }
        self.client.attach(ctx, pane);
    }

    fn send_frame(&self, message: Message) {
        let _ = self.frames.send(message);
    }

    /// Drains the frame queue onto the socket, in order.
    fn spawn_send_loop(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        mut writer: OwnedWriteHalf,
        mut queue: mpsc::UnboundedReceiver<Message>,
    ) {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => return,
                    message = queue.recv() => {
                        let Some(message) = message else { return };
                        if write_message(&mut writer, &message).await.is_err() {
                            ctx.cancel();
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Repaints the client whenever its attached screen changes.
    fn spawn_render_loop(self: &Arc<Self>, ctx: &CancellationToken) {
        let session = self.clone();
        let ctx = ctx.clone();
        let mut updates = self.client.subscribe();
        tokio::spawn(async move {
            session.repaint();
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => return,
                    event = updates.recv() => match event {
                        Ok(ScreenEvent::Changed) => session.repaint(),
                        Ok(ScreenEvent::Exited) => {
                            // A finished replay (or dead pane) hands the
                            // seat back to a live pane.
                            session.reattach_somewhere(&ctx);
                            session.repaint();
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            session.repaint();
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });
    }

    fn repaint(&self) {
        let state = self.client.state();
        self.send_frame(Message::Output(render_full(&state)));
    }

    fn reattach_somewhere(&self, ctx: &CancellationToken) {
        if let Some(pane) = self.server.tree.leaves().into_iter().next() {
            self.attach_pane(ctx, pane);
        }
    }

    /// Turns bind engine output into pane input or actions.
    fn spawn_bind_loop(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        mut events: mpsc::UnboundedReceiver<BindEvent>,
    ) {
        let session = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => return,
                    event = events.recv() => {
                        let Some(event) = event else { return };
                        match event {
                            BindEvent::Raw(data) => session.client.write_input(&data),
                            BindEvent::Action(action) => session.handle_action(&ctx, action),
                        }
                    }
                }
            }
        });
    }

    fn handle_action(&self, ctx: &CancellationToken, action: Action) {
        match action {
            Action::Detach => ctx.cancel(),
            Action::NewPane => {
                let server = &self.server;
                let shell = server.config.shell.clone();
                let socket = server.socket.clone();
                let created = server.tree.new_pane_with(
                    server.tree.root(),
                    self.client.size(),
                    |id| PaneOptions {
                        command: shell,
                        env: vec![(CONTEXT_ENV.to_string(), format_context(&socket, id))],
                        ..PaneOptions::default()
                    },
                );
                match created {
                    Ok(pane) => self.attach_pane(ctx, pane),
                    Err(err) => {
                        tracing::error!(target: "cy::server", error = %err, "failed to create pane");
                        self.send_frame(Message::Error(format!("failed to create pane: {}", err)));
                    }
                }
            }
            Action::NextPane | Action::PreviousPane => {
                let leaves = self.server.tree.leaves();
                if leaves.is_empty() {
                    return;
                }
                let current = *self.node.lock().unwrap();
                let index = leaves
                    .iter()
                    .position(|pane| pane.id() == current)
                    .unwrap_or(0);
                let next = if action == Action::NextPane {
                    (index + 1) % leaves.len()
                } else {
                    (index + leaves.len() - 1) % leaves.len()
                };
                self.attach_pane(ctx, leaves[next].clone());
            }
            Action::RemovePane => {
                let current = *self.node.lock().unwrap();
                if let Err(err) = self.server.tree.remove(current) {
                    tracing::warn!(target: "cy::server", error = %err, "remove failed");
                }
                self.reattach_somewhere(ctx);
            }
            Action::EnterReplay => {
                let current = *self.node.lock().unwrap();
                let Some(pane) = self.server.tree.get_pane(current) else {
                    return;
                };
                let screen = Arc::new(ReplayScreen::new(pane.events(), self.client.size()));
                self.client.attach(ctx, screen);
            }
        }
    }

    /// The per-client receive loop: decodes frames and routes input and
    /// resizes. Runs on the connection's own task.
    async fn recv_loop(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        mut reader: OwnedReadHalf,
    ) -> Result<(), CyError> {
        loop {
            let message = tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                message = read_message(&mut reader) => message,
            };

            match message {
                Ok(Message::Size { rows, cols }) => {
                    // Applied synchronously so the next frame renders with
                    // the new size.
                    self.client.resize(Size::new(rows as i32, cols as i32));
                    self.repaint();
                }
                Ok(Message::Input(data)) => {
                    self.engine.lock().unwrap().input(&data);
                }
                Ok(Message::Exec(request)) => {
                    let response = match self.server.execute(&request.code) {
                        Ok(data) => crate::protocol::ExecResponse { ok: true, data },
                        Err(err) => crate::protocol::ExecResponse {
                            ok: false,
                            data: err.to_string(),
                        },
                    };
                    self.send_frame(Message::ExecResult(response));
                }
                Ok(Message::Handshake(_)) => {
                    self.send_frame(Message::Error("duplicate handshake".into()));
                }
                Ok(_) => {}
                Err(crate::protocol::ProtocolError::Closed) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

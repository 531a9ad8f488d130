use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::emu::Terminal;
use crate::geom::Size;
use crate::mux::{Screen, ScreenEvent, SCREEN_QUEUE};
use crate::replay::detect::Detector;
use crate::sessions::{Event, Recorder};
use crate::tree::NodeId;
use crate::tty::TtyState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaneStatus {
    Starting,
    Healthy,
    Failed,
    Done,
}

#[derive(Clone, Debug, Default)]
pub struct PaneOptions {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<String>,
    /// Record the pane's events to this session file.
    pub session_file: Option<PathBuf>,
}

/// A leaf of the tree: one subprocess (or in-memory stream), its emulator,
/// and its recorder. The pane exclusively owns its emulator; readers go
/// through the pane's lock.
pub struct Pane {
    id: NodeId,
    terminal: Mutex<Terminal>,
    detector: Mutex<Detector>,
    recorder: Mutex<Recorder>,
    writer: Mutex<Option<Box<dyn std::io::Write + Send>>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    status: Mutex<PaneStatus>,
    size: Mutex<Size>,
    updates: broadcast::Sender<ScreenEvent>,
    cancel: CancellationToken,
}

impl Pane {
    fn base(id: NodeId, size: Size, recorder: Recorder, cancel: CancellationToken) -> Pane {
        let (updates, _) = broadcast::channel(SCREEN_QUEUE);
        Pane {
            id,
            terminal: Mutex::new(Terminal::new(size)),
            detector: Mutex::new(Detector::new()),
            recorder: Mutex::new(recorder),
            writer: Mutex::new(None),
            master: Mutex::new(None),
            child: Mutex::new(None),
            status: Mutex::new(PaneStatus::Starting),
            size: Mutex::new(size),
            updates,
            cancel,
        }
    }

    /// A pane with no subprocess: input loops straight back into the
    /// emulator. Used for the log pane and in tests.
    pub fn memory(id: NodeId, size: Size, cancel: CancellationToken) -> Arc<Pane> {
        let pane = Arc::new(Pane::base(id, size, Recorder::memory(), cancel));
        *pane.status.lock().unwrap() = PaneStatus::Healthy;
        pane
    }

    /// Spawn a subprocess-backed pane. The returned pane is `Healthy` once
    /// the process starts; it flips to `Failed` or `Done` when the process
    /// exits, and stays in the tree either way so the recording remains
    /// viewable.
    pub fn spawn(
        id: NodeId,
        options: PaneOptions,
        size: Size,
        cancel: CancellationToken,
    ) -> anyhow::Result<Arc<Pane>> {
        let recorder = match &options.session_file {
            Some(path) => Recorder::create(path)?,
            None => Recorder::memory(),
        };

        let pty_system = native_pty_system();
        let pair = pty_system.openpty(PtySize {
            rows: size.r.max(1) as u16,
            cols: size.c.max(1) as u16,
            pixel_width: 0,
            pixel_height: 0,
        })?;

        let mut cmd = CommandBuilder::new(&options.command);
        cmd.args(&options.args);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &options.cwd {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd)?;
        let reader = pair.master.try_clone_reader()?;
        let writer = pair.master.take_writer()?;

        let pane = Arc::new(Pane::base(id, size, recorder, cancel));
        *pane.writer.lock().unwrap() = Some(writer);
        *pane.master.lock().unwrap() = Some(pair.master);
        *pane.child.lock().unwrap() = Some(child);
        *pane.status.lock().unwrap() = PaneStatus::Healthy;

        pane.recorder.lock().unwrap().record_size(size);

        Pane::start_pump(pane.clone(), reader);
        Pane::start_reaper(pane.clone());

        Ok(pane)
    }

    /// The per-pane output pump: child bytes flow through the recorder into
    /// the emulator, and subscribers hear about the change.
    fn start_pump(pane: Arc<Pane>, mut reader: Box<dyn Read + Send>) {
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                if pane.cancel.is_cancelled() {
                    break;
                }
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => pane.feed(&buf[..n]),
                    Err(err) => {
                        if !pane.cancel.is_cancelled() {
                            tracing::warn!(
                                target: "cy::pane",
                                id = pane.id,
                                error = %err,
                                "pane stream read failed"
                            );
                        }
                        break;
                    }
                }
            }
        });
    }

    /// Polls the child until it exits (or the pane is cancelled) and
    /// resolves the pane's final status.
    fn start_reaper(pane: Arc<Pane>) {
        tokio::task::spawn_blocking(move || {
            let status = loop {
                if pane.cancel.is_cancelled() {
                    let mut child = pane.child.lock().unwrap();
                    if let Some(child) = child.as_mut() {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                    break PaneStatus::Done;
                }

                let exited = {
                    let mut child = pane.child.lock().unwrap();
                    match child.as_mut() {
                        Some(child) => child.try_wait(),
                        None => break PaneStatus::Done,
                    }
                };
                match exited {
                    Ok(Some(exit)) if exit.success() => break PaneStatus::Done,
                    Ok(Some(_)) | Err(_) => break PaneStatus::Failed,
                    Ok(None) => std::thread::sleep(std::time::Duration::from_millis(25)),
                }
            };

            *pane.status.lock().unwrap() = status;
            let _ = pane.recorder.lock().unwrap().flush();
            let _ = pane.updates.send(ScreenEvent::Exited);
            tracing::info!(target: "cy::pane", id = pane.id, ?status, "pane exited");
        });
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn status(&self) -> PaneStatus {
        *self.status.lock().unwrap()
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Feed output bytes through the recorder into the emulator.
    pub fn feed(&self, data: &[u8]) {
        let index = {
            let mut recorder = self.recorder.lock().unwrap();
            recorder.record_output(data);
            recorder.len().saturating_sub(1)
        };

        let mut terminal = self.terminal.lock().unwrap();
        terminal.write(data);
        self.detector.lock().unwrap().update(&mut terminal, index);
        drop(terminal);

        let _ = self.updates.send(ScreenEvent::Changed);
    }

    /// The complete recorded event sequence.
    pub fn events(&self) -> Vec<Event> {
        self.recorder.lock().unwrap().events()
    }

    pub fn session_file(&self) -> Option<PathBuf> {
        self.recorder
            .lock()
            .unwrap()
            .path()
            .map(|path| path.to_path_buf())
    }

    pub fn commands(&self) -> Vec<crate::replay::detect::Command> {
        self.detector.lock().unwrap().commands().to_vec()
    }

    /// Run a closure against the pane's emulator under its lock.
    pub fn with_terminal<T>(&self, f: impl FnOnce(&Terminal) -> T) -> T {
        let terminal = self.terminal.lock().unwrap();
        f(&terminal)
    }
}

impl Screen for Pane {
    fn state(&self) -> TtyState {
        let terminal = self.terminal.lock().unwrap();
        TtyState::capture(&terminal)
    }

    fn size(&self) -> Size {
        *self.size.lock().unwrap()
    }

    fn resize(&self, size: Size) {
        {
            let mut current = self.size.lock().unwrap();
            if *current == size {
                return;
            }
            *current = size;
        }

        if let Some(master) = self.master.lock().unwrap().as_ref() {
            let result = master.resize(PtySize {
                rows: size.r.max(1) as u16,
                cols: size.c.max(1) as u16,
                pixel_width: 0,
                pixel_height: 0,
            });
            if let Err(err) = result {
                tracing::warn!(target: "cy::pane", id = self.id, error = %err, "pty resize failed");
            }
        }

        self.recorder.lock().unwrap().record_size(size);
        self.terminal.lock().unwrap().resize(size);
        let _ = self.updates.send(ScreenEvent::Changed);
    }

    fn write_input(&self, data: &[u8]) {
        let mut writer = self.writer.lock().unwrap();
        match writer.as_mut() {
            Some(writer) => {
                if let Err(err) = writer.write_all(data).and_then(|_| writer.flush()) {
                    tracing::warn!(target: "cy::pane", id = self.id, error = %err, "pane write failed");
                    *self.status.lock().unwrap() = PaneStatus::Failed;
                }
            }
            // Memory panes loop input straight back into the emulator.
            None => self.feed(data),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ScreenEvent> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pane_loops_input() {
        let pane = Pane::memory(1, Size::new(4, 20), CancellationToken::new());
        let mut updates = pane.subscribe();

        pane.write_input(b"hello");
        assert_eq!(updates.try_recv(), Ok(ScreenEvent::Changed));
        assert_eq!(pane.with_terminal(|t| t.cell(0, 0).char), 'h');
        assert_eq!(pane.events().len(), 1);
    }

    #[tokio::test]
    async fn memory_pane_resize_records_size() {
        let pane = Pane::memory(1, Size::new(4, 20), CancellationToken::new());
        pane.resize(Size::new(10, 30));
        assert_eq!(pane.size(), Size::new(10, 30));
        assert_eq!(pane.events().len(), 1);
        assert_eq!(pane.with_terminal(|t| t.size()), Size::new(10, 30));
    }
}

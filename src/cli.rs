//! The client side of the CLI: `connect` attaches this terminal to the
//! server, `exec` runs a one-shot RPC.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{bail, Context};
use crossterm::terminal;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use cy::config::{self, Config, CONTEXT_ENV};
use cy::error::CyError;
use cy::protocol::{read_message, write_message, ExecRequest, Handshake, Message, ProtocolError};
use cy::socket;

/// Restores the terminal no matter how the client exits.
struct RawGuard;

impl RawGuard {
    fn enable() -> anyhow::Result<RawGuard> {
        terminal::enable_raw_mode().context("failed to enter raw mode")?;
        Ok(RawGuard)
    }
}

impl Drop for RawGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn build_handshake(config: &Config) -> anyhow::Result<Handshake> {
    let (cols, rows) = terminal::size().context("failed to read terminal size")?;
    Ok(Handshake {
        term: config.term.clone(),
        shell: config.shell.clone(),
        editor: config.editor.clone(),
        rows,
        cols,
        profile: "truecolor".to_string(),
    })
}

/// Spawn `cy serve` detached; used when connecting to a missing socket.
fn start_server(socket_name: &str) -> Result<(), CyError> {
    let exe = std::env::current_exe()?;
    Command::new(exe)
        .args(["--socket-name", socket_name, "serve"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

pub async fn connect_command(socket_name: &str) -> anyhow::Result<()> {
    let config = Config::from_env();
    let path = socket::socket_path(socket_name)?;

    let name = socket_name.to_string();
    let stream = socket::connect(&path, move || start_server(&name)).await?;
    let (mut reader, mut writer) = stream.into_split();

    write_message(&mut writer, &Message::Handshake(build_handshake(&config)?)).await?;

    let _raw = RawGuard::enable()?;

    // All outbound frames funnel through one queue so input and resizes
    // stay ordered.
    let (frames, mut frame_queue) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = frame_queue.recv().await {
            if write_message(&mut writer, &message).await.is_err() {
                return;
            }
        }
    });

    // stdin pump.
    let input_frames = frames.clone();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if input_frames
                        .send(Message::Input(buf[..n].to_vec()))
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    });

    // Window size changes.
    let resize_frames = frames.clone();
    tokio::spawn(async move {
        let mut winch =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change()) {
                Ok(winch) => winch,
                Err(_) => return,
            };
        let mut current = (0u16, 0u16);
        loop {
            winch.recv().await;
            let Ok((cols, rows)) = terminal::size() else {
                continue;
            };
            if (rows, cols) == current {
                continue;
            }
            current = (rows, cols);
            if resize_frames.send(Message::Size { rows, cols }).is_err() {
                return;
            }
        }
    });

    let mut stdout = std::io::stdout();
    loop {
        match read_message(&mut reader).await {
            Ok(Message::Output(data)) => {
                stdout.write_all(&data)?;
                stdout.flush()?;
            }
            Ok(Message::Error(message)) => {
                drop(_raw);
                bail!("{}", message);
            }
            Ok(_) => {}
            Err(ProtocolError::Closed) => return Ok(()),
            Err(err) => {
                drop(_raw);
                return Err(err.into());
            }
        }
    }
}

fn read_code(command: Option<String>, file: Option<String>) -> anyhow::Result<(String, String)> {
    if let Some(code) = command {
        return Ok(("<argument>".to_string(), code));
    }
    match file.as_deref() {
        Some("-") => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("failed to read from stdin")?;
            Ok(("<stdin>".to_string(), code))
        }
        Some(path) => {
            let code = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read from {}", path))?;
            Ok((path.to_string(), code))
        }
        None => bail!("no code provided; use -c or a file argument"),
    }
}

pub async fn exec_command(
    socket_name: &str,
    command: Option<String>,
    file: Option<String>,
) -> anyhow::Result<()> {
    let (source, code) = read_code(command, file)?;

    // Inside a pane the CY variable carries the socket and our node id.
    let context = std::env::var(CONTEXT_ENV)
        .ok()
        .and_then(|value| config::parse_context(&value));
    let (path, node) = match context {
        Some((socket, node)) => (PathBuf::from(socket), node),
        None => (socket::socket_path(socket_name)?, 0),
    };

    let stream = UnixStream::connect(&path)
        .await
        .with_context(|| format!("no server at {}", path.display()))?;
    let (mut reader, mut writer) = stream.into_split();

    let config = Config::from_env();
    write_message(
        &mut writer,
        &Message::Handshake(Handshake {
            term: config.term.clone(),
            shell: config.shell.clone(),
            editor: config.editor.clone(),
            rows: 0,
            cols: 0,
            profile: String::new(),
        }),
    )
    .await?;

    let cwd = std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();
    write_message(
        &mut writer,
        &Message::Exec(ExecRequest {
            source,
            code,
            node,
            dir: cwd,
        }),
    )
    .await?;

    loop {
        match read_message(&mut reader).await? {
            Message::ExecResult(response) => {
                if !response.data.is_empty() {
                    println!("{}", response.data);
                }
                if !response.ok {
                    bail!("exec failed");
                }
                return Ok(());
            }
            Message::Error(message) => bail!("{}", message),
            // Screen traffic for the attached seat; irrelevant here.
            _ => {}
        }
    }
}

//! Socket-level tests against the real server binary: auto-start racing,
//! the handshake deadline, and the attach-output path.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use cy::protocol::{read_message, write_message, Handshake, Message, ProtocolError};
use cy::socket;
use tokio::net::UnixStream;

struct ServerProcess {
    child: Child,
    path: PathBuf,
}

impl ServerProcess {
    fn start(dir: &std::path::Path, name: &str) -> ServerProcess {
        let child = Command::new(env!("CARGO_BIN_EXE_cy"))
            .args(["--socket-name", name, "serve"])
            .env("XDG_RUNTIME_DIR", dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn server");
        ServerProcess {
            child,
            path: dir.join(format!("cy-{}", name)),
        }
    }

    async fn wait_ready(&self) {
        for _ in 0..100 {
            if UnixStream::connect(&self.path).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("server did not come up at {:?}", self.path);
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn handshake() -> Message {
    Message::Handshake(Handshake {
        term: "xterm-256color".into(),
        shell: "/bin/sh".into(),
        editor: String::new(),
        rows: 10,
        cols: 40,
        profile: "truecolor".into(),
    })
}

#[tokio::test]
async fn handshake_then_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = ServerProcess::start(dir.path(), "e2e");
    server.wait_ready().await;

    let stream = UnixStream::connect(&server.path).await.expect("connect");
    let (mut reader, mut writer) = stream.into_split();
    write_message(&mut writer, &handshake()).await.expect("handshake");

    // The server paints the attached pane; the first output frame is the
    // initial full repaint.
    let message = tokio::time::timeout(Duration::from_secs(5), read_message(&mut reader))
        .await
        .expect("frame before timeout")
        .expect("valid frame");
    assert!(matches!(message, Message::Output(_)));
}

#[tokio::test]
async fn missing_handshake_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = ServerProcess::start(dir.path(), "deadline");
    server.wait_ready().await;

    let stream = UnixStream::connect(&server.path).await.expect("connect");
    let (mut reader, _writer) = stream.into_split();

    // Send nothing; within ~1s the server must give up on us.
    let message = tokio::time::timeout(Duration::from_secs(3), read_message(&mut reader))
        .await
        .expect("server responded before the test timeout");
    match message {
        Ok(Message::Error(text)) => assert!(text.contains("handshake")),
        Err(ProtocolError::Closed) => {}
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn socket_races_start_one_server() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cy-race");

    let children: std::sync::Arc<std::sync::Mutex<Vec<Child>>> = Default::default();
    let starter = {
        let dir = dir.path().to_path_buf();
        let children = children.clone();
        move || {
            let child = Command::new(env!("CARGO_BIN_EXE_cy"))
                .args(["--socket-name", "race", "serve"])
                .env("XDG_RUNTIME_DIR", &dir)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(cy::error::CyError::from)?;
            children.lock().unwrap().push(child);
            Ok(())
        }
    };

    // Two clients race to connect to a socket that does not exist yet;
    // exactly one acquires the lock and starts the server, and both end up
    // connected.
    let a = socket::connect(&path, starter.clone());
    let b = socket::connect(&path, starter.clone());
    let (a, b) = tokio::join!(a, b);

    let a = a.expect("first client connected");
    let b = b.expect("second client connected");

    // Exactly one client won the flock and started the server.
    assert_eq!(children.lock().unwrap().len(), 1);

    // Both connections speak to a live server.
    for stream in [a, b] {
        let (mut reader, mut writer) = stream.into_split();
        write_message(&mut writer, &handshake()).await.expect("handshake");
        let message = tokio::time::timeout(Duration::from_secs(5), read_message(&mut reader))
            .await
            .expect("frame before timeout")
            .expect("valid frame");
        assert!(matches!(message, Message::Output(_)));
    }

    for child in children.lock().unwrap().iter_mut() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

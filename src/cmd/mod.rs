//! A durable record of every command detected across sessions, stored as
//! JSON lines so it can be appended without rewriting.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::replay::detect::Command;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub timestamp: DateTime<Utc>,
    pub command: Command,
    /// The session file the command was recorded in.
    pub session: PathBuf,
    pub cwd: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed store entry: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Append-only command store. Each line is one `CommandEvent`.
pub struct CommandStore {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CommandStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(CommandStore {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn create_command(&mut self, event: &CommandEvent) -> Result<(), StoreError> {
        let json = serde_json::to_string(event)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// All stored commands in insertion order.
    pub fn list_commands(&self) -> Result<Vec<CommandEvent>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_command(text: &str) -> Command {
        Command {
            text: text.to_string(),
            ..Command::default()
        }
    }

    #[test]
    fn stores_commands_in_insertion_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = CommandStore::open(dir.path().join("cmd.json")).expect("open");

        let first = CommandEvent {
            timestamp: Utc::now(),
            command: test_command("ls"),
            session: PathBuf::from("/tmp/one.cy"),
            cwd: "/tmp".into(),
        };
        let second = CommandEvent {
            timestamp: Utc::now(),
            command: test_command("ls"),
            session: PathBuf::from("/tmp/two.cy"),
            cwd: "/tmp".into(),
        };

        store.create_command(&first).expect("create");
        store.create_command(&second).expect("create");

        let commands = store.list_commands().expect("list");
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].command, first.command);
        assert_eq!(commands[1].command, second.command);
        assert_ne!(commands[0].session, commands[1].session);
    }

    #[test]
    fn empty_store_lists_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CommandStore::open(dir.path().join("cmd.json")).expect("open");
        assert!(store.list_commands().expect("list").is_empty());
    }
}

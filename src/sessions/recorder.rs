use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::geom::Size;
use crate::sessions::{encode_event, timestamp_now, Event, EventData, SessionError};

/// How long the recorder lets writes sit unsynced before the next append
/// forces them to disk.
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(1000);

/// Tees a pane's event stream into an in-memory sequence and, optionally, a
/// length-framed session file. A write error flips the recorder into a
/// read-only state: the session stays viewable but stops being durable. It
/// never takes the pane down.
pub struct Recorder {
    events: Vec<Event>,
    writer: Option<BufWriter<File>>,
    file: Option<File>,
    path: Option<PathBuf>,
    sync_interval: Duration,
    last_sync: Instant,
    read_only: bool,
}

impl Recorder {
    /// A recorder with no backing file.
    pub fn memory() -> Self {
        Recorder {
            events: Vec::new(),
            writer: None,
            file: None,
            path: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            last_sync: Instant::now(),
            read_only: false,
        }
    }

    pub fn create(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let clone = file.try_clone()?;
        Ok(Recorder {
            events: Vec::new(),
            writer: Some(BufWriter::new(file)),
            file: Some(clone),
            path: Some(path),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            last_sync: Instant::now(),
            read_only: false,
        })
    }

    /// Override how long writes may sit unsynced between fsyncs.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn record_output(&mut self, data: &[u8]) {
        let event = Event::output(timestamp_now(), data.to_vec());
        self.append(event, false);
    }

    /// Size frames are synced eagerly; they are rare and losing one skews
    /// every replay after it.
    pub fn record_size(&mut self, size: Size) {
        let event = Event::size(timestamp_now(), size);
        self.append(event, true);
    }

    fn append(&mut self, event: Event, sync: bool) {
        let frame = encode_event(&event);
        self.events.push(event);

        if self.read_only {
            return;
        }

        let sync = sync || self.last_sync.elapsed() >= self.sync_interval;
        let result = self.write_frame(&frame, sync);
        if let Err(err) = result {
            tracing::error!(
                target: "cy::session",
                path = ?self.path,
                error = %err,
                "session write failed; recorder is now read-only"
            );
            self.read_only = true;
        }
    }

    fn write_frame(&mut self, frame: &[u8], sync: bool) -> std::io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writer.write_all(frame)?;
        if sync {
            writer.flush()?;
            if let Some(file) = self.file.as_ref() {
                file.sync_data()?;
            }
            self.last_sync = Instant::now();
        }
        Ok(())
    }

    /// Flush buffered frames to disk with an fsync.
    pub fn flush(&mut self) -> Result<(), SessionError> {
        if self.read_only {
            return Ok(());
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        if let Some(file) = self.file.as_ref() {
            file.sync_data()?;
        }
        self.last_sync = Instant::now();
        Ok(())
    }

    /// The complete event sequence recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.clone()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// True when the recorded stream contains any output; used to decide
/// whether a session file is worth keeping.
pub fn has_output(events: &[Event]) -> bool {
    events
        .iter()
        .any(|event| matches!(&event.data, EventData::Output(data) if !data.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::decode_events;

    #[test]
    fn records_through_to_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.cy");

        let mut recorder = Recorder::create(&path).expect("create");
        recorder.record_size(Size::new(26, 80));
        recorder.record_output(b"hello");
        recorder.flush().expect("flush");

        let bytes = std::fs::read(&path).expect("read");
        let decoded = decode_events(&bytes).expect("decode");
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded, recorder.events());
    }

    #[test]
    fn memory_recorder_keeps_events() {
        let mut recorder = Recorder::memory();
        recorder.record_output(b"a");
        recorder.record_output(b"b");
        assert_eq!(recorder.len(), 2);
        assert!(!recorder.is_read_only());
    }

    #[test]
    fn stamps_are_monotonic() {
        let mut recorder = Recorder::memory();
        recorder.record_output(b"a");
        recorder.record_output(b"b");
        let events = recorder.events();
        assert!(events[0].stamp <= events[1].stamp);
    }
}

//! Recorded pane sessions: the event model, the on-disk format, the
//! recorder that tees live output to durable storage, and the player that
//! deterministically replays a recording.

mod encoding;
mod player;
mod recorder;

use bytes::Bytes;
use thiserror::Error;

use crate::geom::Size;

pub use encoding::{decode_events, encode_event, FRAME_VERSION, KIND_OUTPUT, KIND_SIZE};
pub use player::Player;
pub use recorder::{has_output, Recorder};

/// A timestamped message in a session; stamps are UTC nanoseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub stamp: i64,
    pub data: EventData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventData {
    Output(Bytes),
    Size(Size),
}

impl Event {
    pub fn output(stamp: i64, data: impl Into<Bytes>) -> Self {
        Event {
            stamp,
            data: EventData::Output(data.into()),
        }
    }

    pub fn size(stamp: i64, size: Size) -> Self {
        Event {
            stamp,
            data: EventData::Size(size),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed session frame: {0}")]
    Protocol(&'static str),
    #[error("unsupported session version {0}")]
    UnsupportedVersion(u8),
}

pub fn timestamp_now() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

//! cy: a time-traveling terminal multiplexer. Clients attach to a
//! long-lived server hosting a tree of panes; every pane's byte stream is
//! recorded and can be replayed, reflowed, and searched after the fact.

pub mod bind;
pub mod cmd;
pub mod config;
pub mod emu;
pub mod error;
pub mod geom;
pub mod mux;
pub mod protocol;
pub mod replay;
pub mod search;
pub mod server;
pub mod sessions;
pub mod socket;
pub mod telemetry;
pub mod tree;
pub mod tty;

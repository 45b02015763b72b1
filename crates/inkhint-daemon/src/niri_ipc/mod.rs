//! Niri IPC client for compositor integration
//!
//! Niri exposes a Unix socket at `$NIRI_SOCKET`. Clients send JSON-formatted
//! `Request` messages (one per line) and receive JSON `Reply` responses.
//!
//! - `NiriClient`: request/reply connection used to query windows,
//!   workspaces and outputs
//! - `NiriEventStream`: a second connection that only receives events after
//!   sending `Request::EventStream`

mod client;
mod error;
mod events;

pub use client::{get_socket_path, NiriClient};
pub use error::NiriError;
pub use events::{affects_layout, NiriEventStream};

//! Line-oriented TCP chat relay.
//!
//! A relay accepts many clients, gives each a unique display name and routes
//! newline-delimited text between them. Each module owns one concern:
//!
//! - [`address`] validates ports and hosts, from flags or terminal prompts.
//! - [`input`] feeds terminal lines to prompts and the client.
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`protocol`] frames lines and renders the relay's own notices.
//! - [`registry`] is the shared roster of active sessions keyed by name.
//! - [`session`] drives one connection through handshake, read loop and
//!   teardown.
//! - [`router`] decides whether a line is a quit, roster query, direct
//!   message or broadcast, and delivers it.
//! - [`relay`] accepts connections and spawns a session task per client.
//! - [`client`] connects to a relay and bridges it with a terminal.
//!
//! Unit tests live beside each module; `tests/` drives a real relay over TCP.

pub mod address;
pub mod cli;
pub mod client;
pub mod error;
pub mod input;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;

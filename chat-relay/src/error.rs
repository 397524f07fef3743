use std::io;

use thiserror::Error;

/// Rejected terminal or command-line address input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("port must be a number in [1, 65535], got '{0}'")]
    InvalidPort(String),
    #[error("address must be a dotted-quad IPv4 address or 'localhost', got '{0}'")]
    InvalidHost(String),
}

/// Reasons a connection never made it past the name exchange.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection closed before a name was sent")]
    Disconnected,
    #[error("requested name is empty")]
    EmptyName,
    #[error("session stopped handshaking before it could register")]
    NotHandshaking,
    #[error("transport failure during handshake")]
    Io(#[from] io::Error),
}

/// Client-side connection failures that end the retry loop.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no server is listening on {addr}")]
    Refused { addr: String },
    #[error("could not reach {addr} after {attempts} attempts")]
    Exhausted { addr: String, attempts: u32 },
}

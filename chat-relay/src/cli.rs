use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::{
    address::{Host, parse_port},
    router::DirectMatch,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP connections from chat clients.
    Server(ServerArgs),
    /// Connect to a relay and chat from this terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind: a dotted-quad IPv4 address or `localhost`.
    #[arg(long)]
    pub bind: Option<Host>,

    /// Port to listen on, in [1, 65535]. Prompted for when omitted.
    #[arg(long, value_parser = parse_port)]
    pub port: Option<u16>,

    /// How `#name` is recognised inside a line to address a direct message.
    #[arg(long, value_enum, default_value_t = DirectMatch::Substring)]
    pub direct_match: DirectMatch,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Relay address: a dotted-quad IPv4 address or `localhost`. Prompted for when omitted.
    #[arg(long)]
    pub address: Option<Host>,

    /// Relay port, in [1, 65535]. Prompted for when omitted.
    #[arg(long, value_parser = parse_port)]
    pub port: Option<u16>,

    /// Requested display name; the relay may append a numeric suffix.
    #[arg(long)]
    pub name: Option<String>,

    /// Connection attempts before giving up.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub attempts: u32,

    /// Seconds to wait between connection attempts.
    #[arg(long = "retry-delay", default_value = "5", value_parser = parse_seconds)]
    pub retry_delay: Duration,

    /// After a session ends without `\q`, ask whether to close or to
    /// reconnect on another port.
    #[arg(long)]
    pub reconnect: bool,
}

fn parse_seconds(input: &str) -> Result<Duration, std::num::ParseIntError> {
    input.trim().parse::<u64>().map(Duration::from_secs)
}

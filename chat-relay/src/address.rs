//! Validated port and host input, from flags or interactive prompts.

use std::{
    fmt,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{error::AddressError, input::LineSource};

const LOCALHOST: &str = "localhost";

/// Host a client dials or a server binds: `localhost` or a dotted-quad IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    Localhost,
    Ipv4(Ipv4Addr),
}

impl Host {
    pub const UNSPECIFIED: Host = Host::Ipv4(Ipv4Addr::UNSPECIFIED);

    pub fn ip(self) -> IpAddr {
        match self {
            Host::Localhost => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Host::Ipv4(addr) => IpAddr::V4(addr),
        }
    }

    pub fn socket_addr(self, port: u16) -> SocketAddr {
        SocketAddr::new(self.ip(), port)
    }
}

impl FromStr for Host {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case(LOCALHOST) {
            return Ok(Host::Localhost);
        }
        trimmed
            .parse::<Ipv4Addr>()
            .map(Host::Ipv4)
            .map_err(|_| AddressError::InvalidHost(input.to_string()))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Localhost => f.write_str(LOCALHOST),
            Host::Ipv4(addr) => write!(f, "{addr}"),
        }
    }
}

/// Parses a port in `[1, 65535]`.
pub fn parse_port(input: &str) -> Result<u16, AddressError> {
    match input.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(AddressError::InvalidPort(input.to_string())),
    }
}

/// Re-prompts on a terminal-like stream until the answer validates.
///
/// End of input is reported as [`io::ErrorKind::UnexpectedEof`] rather than
/// looping forever.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R, W> Prompter<R, W>
where
    R: LineSource,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub async fn port(&mut self) -> io::Result<u16> {
        loop {
            let answer = self.ask("Enter your port number:").await?;
            if let Some(port) = self.validate(&answer, parse_port).await? {
                return Ok(port);
            }
        }
    }

    pub async fn host(&mut self) -> io::Result<Host> {
        let host = loop {
            let choice = self
                .ask("1) Enter IP address\n2) Use 'localhost'\nPlease enter a valid input[1-2]>")
                .await?;
            match choice.trim() {
                "1" => break Host::Ipv4(self.octets().await?),
                "2" => break Host::Localhost,
                "" => self.say("Blank entry. ").await?,
                _ => self.say("Invalid input! ").await?,
            }
        };
        self.say(&format!("IP address set to: {host}\n")).await?;
        Ok(host)
    }

    pub async fn name(&mut self) -> io::Result<String> {
        loop {
            let answer = self.ask("Enter your user name for the group chat: ").await?;
            let name = answer.trim();
            if !name.is_empty() {
                return Ok(name.to_string());
            }
            self.say("Blank entry. ").await?;
        }
    }

    /// Asks whether to quit after a session ended. `false` means the user
    /// wants to try another port.
    pub async fn confirm_close(&mut self) -> io::Result<bool> {
        loop {
            let answer = self.ask("Close application? [Y/N]").await?;
            let answer = answer.trim();
            if answer.eq_ignore_ascii_case("y") {
                self.say("Client shutdown\n").await?;
                return Ok(true);
            }
            if answer.eq_ignore_ascii_case("n") {
                self.say("Ok try again\n").await?;
                return Ok(false);
            }
            self.say("Try again\n").await?;
        }
    }

    async fn octets(&mut self) -> io::Result<Ipv4Addr> {
        let mut octets = [0u8; 4];
        for (index, octet) in octets.iter_mut().enumerate() {
            let prompt = format!(
                "Enter IP address number {} of 4 in range [0-255] digits only",
                index + 1
            );
            *octet = loop {
                let answer = self.ask(&prompt).await?;
                let parsed = self
                    .validate(&answer, |raw| {
                        raw.trim()
                            .parse::<u8>()
                            .map_err(|_| AddressError::InvalidHost(raw.to_string()))
                    })
                    .await?;
                if let Some(value) = parsed {
                    break value;
                }
            };
        }
        Ok(Ipv4Addr::from(octets))
    }

    async fn validate<T>(
        &mut self,
        answer: &str,
        parse: impl FnOnce(&str) -> Result<T, AddressError>,
    ) -> io::Result<Option<T>> {
        if answer.trim().is_empty() {
            self.say("Blank entry. ").await?;
            return Ok(None);
        }
        match parse(answer) {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                self.say("Invalid input! ").await?;
                Ok(None)
            }
        }
    }

    async fn ask(&mut self, prompt: &str) -> io::Result<String> {
        self.say(prompt).await?;
        self.say("\n").await?;

        self.input.next_line().await?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "input closed while prompting")
        })
    }

    async fn say(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await
    }
}

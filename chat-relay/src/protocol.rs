//! Newline-delimited text framing and the fixed server-to-client lines.

use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub const QUIT: &str = "\\q";
pub const USER_LIST: &str = "#userlist";
pub const RENAME_PREFIX: &str = "#name";
pub const DIRECT_PREFIX: &str = "DM from ";

/// Lines the relay generates itself rather than relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// One-time reply to the handshake carrying the assigned name.
    Rename { name: String },
    Joined { name: String },
    Left { name: String },
    Roster { names: Vec<String> },
    EmptyName,
    ShuttingDown,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Rename { name } => write!(f, "{RENAME_PREFIX}{name}"),
            Notice::Joined { name } => write!(f, "Server: {name} has entered the chat."),
            Notice::Left { name } => write!(f, "Server: {name} has left the chat."),
            Notice::Roster { names } => write!(f, "Users online: {}", names.join(", ")),
            Notice::EmptyName => f.write_str("Server: name cannot be empty."),
            Notice::ShuttingDown => f.write_str("Server: relay shutting down."),
        }
    }
}

/// What a received line asks the relay to do, before any roster lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Quit,
    UserList,
    Text(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        if line.eq_ignore_ascii_case(QUIT) {
            Command::Quit
        } else if line.eq_ignore_ascii_case(USER_LIST) {
            Command::UserList
        } else {
            Command::Text(line)
        }
    }
}

/// Strips the rename prefix from a server line, if it is a rename notice.
pub fn parse_rename(line: &str) -> Option<&str> {
    line.strip_prefix(RENAME_PREFIX)
}

/// Reads the next non-empty line, without its terminator.
///
/// Returns `Ok(None)` once the peer closes its side of the stream.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        return Ok(Some(trimmed.to_string()));
    }
}

/// Writes one line and flushes so the peer sees it immediately.
pub async fn write_line<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(text.len() + 1);
    encoded.extend_from_slice(text.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_render_wire_text() {
        assert_eq!(
            Notice::Rename {
                name: "alice1".into()
            }
            .to_string(),
            "#namealice1"
        );
        assert_eq!(
            Notice::Joined { name: "bob".into() }.to_string(),
            "Server: bob has entered the chat."
        );
        assert_eq!(
            Notice::Left { name: "bob".into() }.to_string(),
            "Server: bob has left the chat."
        );
        assert_eq!(
            Notice::Roster {
                names: vec!["bob".into(), "carol".into()]
            }
            .to_string(),
            "Users online: bob, carol"
        );
        assert_eq!(
            Notice::Roster { names: Vec::new() }.to_string(),
            "Users online: "
        );
    }

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(Command::parse("\\Q"), Command::Quit);
        assert_eq!(Command::parse("#UserList"), Command::UserList);
        assert_eq!(Command::parse("#userlist please"), Command::Text("#userlist please"));
        assert_eq!(Command::parse("hello"), Command::Text("hello"));
    }

    #[tokio::test]
    async fn read_line_skips_empty_lines_and_strips_crlf() {
        let mut reader = tokio::io::BufReader::new(&b"\r\n\nhello\r\nlast"[..]);

        assert_eq!(
            read_line(&mut reader).await.expect("read"),
            Some("hello".to_string())
        );
        assert_eq!(
            read_line(&mut reader).await.expect("read"),
            Some("last".to_string())
        );
        assert_eq!(read_line(&mut reader).await.expect("read"), None);
    }

    #[tokio::test]
    async fn write_line_appends_newline() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = tokio::io::BufReader::new(reader);

        write_line(&mut writer, "Users online: ").await.expect("write");
        let mut raw = String::new();
        reader.read_line(&mut raw).await.expect("read");

        assert_eq!(raw, "Users online: \n");
    }
}

//! Interprets one received line against the roster and delivers it.

use clap::ValueEnum;
use tracing::debug;

use crate::{
    protocol::{Command, DIRECT_PREFIX, Notice},
    registry::Registry,
    session::Mailbox,
};

/// How `#name` inside a line selects a direct-message recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DirectMatch {
    /// `#name` anywhere in the line, as existing clients expect.
    #[default]
    Substring,
    /// `#name` must be a whole token: preceded by the line start, whitespace
    /// or `:` and followed by whitespace or the line end.
    Token,
}

/// What a line resolves to once the roster has been consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Quit,
    Roster,
    Direct { target: String, text: String },
    Broadcast,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Resolves `line` against `roster`, which should include every active name.
pub fn classify(line: &str, roster: &[String], policy: DirectMatch) -> Route {
    match Command::parse(line) {
        Command::Quit => Route::Quit,
        Command::UserList => Route::Roster,
        Command::Text(text) if text.trim().is_empty() => Route::Ignore,
        Command::Text(text) => match find_target(text, roster, policy) {
            Some(target) => Route::Direct {
                target: target.to_string(),
                text: text.replace(&format!("#{target}"), ""),
            },
            None => Route::Broadcast,
        },
    }
}

/// Picks the recipient addressed by `#name` in `text`.
///
/// When several names match, the longest wins so `#alice1` reaches
/// `alice1` and not `alice`.
pub fn find_target<'r>(text: &str, roster: &'r [String], policy: DirectMatch) -> Option<&'r str> {
    roster
        .iter()
        .filter(|name| mentions(text, name, policy))
        .max_by_key(|name| name.len())
        .map(String::as_str)
}

fn mentions(text: &str, name: &str, policy: DirectMatch) -> bool {
    let tag = format!("#{name}");
    match policy {
        DirectMatch::Substring => text.contains(&tag),
        DirectMatch::Token => text.match_indices(&tag).any(|(start, _)| {
            let before = text[..start].chars().next_back();
            let after = text[start + tag.len()..].chars().next();
            before.is_none_or(|c| c.is_whitespace() || c == ':')
                && after.is_none_or(char::is_whitespace)
        }),
    }
}

/// Routes one line received from `sender` and delivers the result.
pub async fn dispatch(
    line: &str,
    sender: &str,
    mailbox: &Mailbox,
    registry: &Registry,
    policy: DirectMatch,
) -> Flow {
    let roster = registry.snapshot().await;

    match classify(line, &roster, policy) {
        Route::Quit => return Flow::Quit,
        Route::Roster => {
            let names = roster.into_iter().filter(|name| name != sender).collect();
            mailbox.send(Notice::Roster { names }.to_string());
        }
        Route::Direct { target, text } => match registry.find(&target).await {
            Some(recipient) => {
                if !recipient.send(format!("{DIRECT_PREFIX}{text}")) {
                    debug!(%sender, %target, "direct message dropped by closing session");
                }
            }
            None => debug!(%sender, %target, "direct message target left before delivery"),
        },
        Route::Broadcast => {
            registry
                .for_each_except(sender, |_, peer| {
                    peer.send(line);
                })
                .await;
        }
        Route::Ignore => {}
    }

    Flow::Continue
}

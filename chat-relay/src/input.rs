//! Line-oriented input for the prompts and the terminal client.
//!
//! Terminal input is read on its own OS thread and handed over through a
//! channel. A blocked read on that thread never holds up runtime shutdown,
//! so the client can exit as soon as the relay hangs up.

use std::{
    future::Future,
    io::{self, BufRead},
    thread,
};

use tokio::{
    io::{AsyncBufRead, Lines},
    sync::mpsc,
};
use tracing::debug;

const STDIN_BUFFER: usize = 16;

/// A source of input lines with line terminators already stripped.
///
/// `next_line` must be cancel safe: it is polled inside `select!`.
pub trait LineSource {
    /// Yields the next line, or `None` once the input is closed.
    fn next_line(&mut self) -> impl Future<Output = io::Result<Option<String>>>;
}

impl<L> LineSource for &mut L
where
    L: LineSource,
{
    fn next_line(&mut self) -> impl Future<Output = io::Result<Option<String>>> {
        (**self).next_line()
    }
}

impl<R> LineSource for Lines<R>
where
    R: AsyncBufRead + Unpin,
{
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        Lines::next_line(self).await
    }
}

impl LineSource for mpsc::Receiver<String> {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.recv().await)
    }
}

/// Reads standard input on a detached thread.
///
/// The channel closes at end of input or on a read error. The thread exits
/// on its next line once the receiver is dropped.
pub fn spawn_stdin() -> io::Result<mpsc::Receiver<String>> {
    let (lines, receiver) = mpsc::channel(STDIN_BUFFER);
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(error) => {
                        debug!(?error, "failed to read standard input");
                        break;
                    }
                };
                if lines.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn channel_source_ends_when_senders_drop() {
        let (lines, mut source) = mpsc::channel(4);
        lines.send("first".to_string()).await.expect("send");
        drop(lines);

        assert_eq!(
            LineSource::next_line(&mut source).await.expect("read").as_deref(),
            Some("first")
        );
        assert_eq!(LineSource::next_line(&mut source).await.expect("read"), None);
    }

    #[tokio::test]
    async fn reader_source_strips_terminators() {
        let mut source = BufReader::new(&b"one\r\ntwo\n"[..]).lines();

        assert_eq!(
            LineSource::next_line(&mut source).await.expect("read").as_deref(),
            Some("one")
        );
        assert_eq!(
            LineSource::next_line(&mut source).await.expect("read").as_deref(),
            Some("two")
        );
        assert_eq!(LineSource::next_line(&mut source).await.expect("read"), None);
    }
}

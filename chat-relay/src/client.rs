use std::{io, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tracing::{info, warn};

use crate::{
    address::{Host, Prompter},
    error::ConnectError,
    input::LineSource,
    protocol::{QUIT, USER_LIST, parse_rename, write_line},
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: Host,
    pub port: u16,
    pub name: String,
    pub attempts: u32,
    pub retry_delay: Duration,
}

/// Per-connection state owned by the client loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    pub name: String,
    pub quit: bool,
}

impl ClientState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quit: false,
        }
    }
}

pub async fn run<I, O>(config: ClientConfig, input: I, mut output: O) -> Result<ClientState>
where
    I: LineSource,
    O: AsyncWrite + Unpin,
{
    let addr = config.host.socket_addr(config.port);
    let stream = connect_with_retry(addr, config.attempts, config.retry_delay).await?;
    info!("connected to {addr}");

    let (reader, mut writer) = stream.into_split();
    let mut state = ClientState::new(config.name);
    run_session(
        BufReader::new(reader),
        &mut writer,
        input,
        &mut output,
        &mut state,
    )
    .await?;

    shutdown_connection(&mut writer).await;
    Ok(state)
}

/// Runs sessions until the user quits, asking after every other ending
/// whether to close or reconnect on another port.
///
/// Connection failures are reported on `output` instead of ending the
/// client; closed input while prompting does end it.
pub async fn run_with_reconnect<I, O>(
    mut config: ClientConfig,
    mut input: I,
    mut output: O,
) -> Result<ClientState>
where
    I: LineSource,
    O: AsyncWrite + Unpin,
{
    loop {
        let state = match run(config.clone(), &mut input, &mut output).await {
            Ok(state) if state.quit => return Ok(state),
            Ok(state) => state,
            Err(error) => {
                warn!("session ended: {error:#}");
                write_output(&mut output, &format!("{error:#}")).await?;
                ClientState::new(config.name.clone())
            }
        };

        let mut prompter = Prompter::new(&mut input, &mut output);
        if prompter.confirm_close().await? {
            return Ok(state);
        }
        config.port = prompter.port().await?;
    }
}

/// Dials `addr`, retrying transient failures up to `attempts` times with a
/// fixed `delay` in between. A refused connection means nothing listens on
/// the port and ends the attempt immediately.
pub async fn connect_with_retry(
    addr: SocketAddr,
    attempts: u32,
    delay: Duration,
) -> Result<TcpStream, ConnectError> {
    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(ConnectError::Refused {
                    addr: addr.to_string(),
                });
            }
            Err(err) => {
                let remaining = attempts - attempt;
                warn!(%addr, attempt, remaining, error = ?err, "failed to reach relay");
                if remaining > 0 {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(ConnectError::Exhausted {
        addr: addr.to_string(),
        attempts,
    })
}

/// Sends the requested name, then multiplexes relay lines and user input
/// until either side ends, the user quits or Ctrl-C is pressed.
pub async fn run_session<SR, SW, I, O>(
    server_reader: SR,
    server_writer: &mut SW,
    mut input: I,
    output: &mut O,
    state: &mut ClientState,
) -> Result<()>
where
    SR: AsyncBufRead + Unpin,
    SW: AsyncWrite + Unpin,
    I: LineSource,
    O: AsyncWrite + Unpin,
{
    write_line(server_writer, &state.name)
        .await
        .context("failed to send name to relay")?;

    let mut server_lines = server_reader.lines();

    while !state.quit {
        select! {
            server_line = server_lines.next_line() => {
                match server_line {
                    Ok(Some(line)) => render_server_line(&line, state, output).await?,
                    Ok(None) | Err(_) => {
                        write_output(output, "Disconnected from server.").await?;
                        break;
                    }
                }
            }
            input_line = input.next_line() => {
                match input_line? {
                    Some(line) => handle_input(&line, server_writer, output, state).await?,
                    None => break,
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                state.quit = true;
                break;
            }
        }
    }

    Ok(())
}

fn handle_ctrl_c(result: io::Result<()>) {
    match result {
        Ok(()) => info!("interrupted; leaving the chat room"),
        Err(error) => warn!(?error, "ctrl-c handler failed"),
    }
}

async fn render_server_line<O>(line: &str, state: &mut ClientState, output: &mut O) -> Result<()>
where
    O: AsyncWrite + Unpin,
{
    match parse_rename(line) {
        Some(assigned) => {
            state.name = assigned.to_string();
            write_output(
                output,
                &format!("You have now entered the chat room as {assigned}"),
            )
            .await?;
        }
        None => write_output(output, line).await?,
    }
    Ok(())
}

async fn handle_input<SW, O>(
    line: &str,
    server_writer: &mut SW,
    output: &mut O,
    state: &mut ClientState,
) -> Result<()>
where
    SW: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    let text = line.trim_end();
    if text.trim().is_empty() {
        return Ok(());
    }

    if text.eq_ignore_ascii_case(QUIT) {
        write_line(server_writer, QUIT).await?;
        write_output(output, "You left the chat room.").await?;
        state.quit = true;
    } else if text.eq_ignore_ascii_case(USER_LIST) {
        write_line(server_writer, USER_LIST).await?;
    } else {
        write_line(server_writer, &format!("{}:{text}", state.name)).await?;
    }
    Ok(())
}

async fn shutdown_connection<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_output<O>(output: &mut O, line: &str) -> io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

//! One connected client: name handshake, read loop, outbound queue, teardown.
//!
//! A session moves through `Handshaking -> Active -> Closing -> Closed`. It is
//! visible in the [`Registry`] exactly while it is `Active`; the registry
//! performs the `Handshaking -> Active` and `Active -> Closing` transitions
//! under its write lock so the two can never disagree.
//!
//! Outbound lines go through a bounded queue drained by a dedicated writer
//! task. [`Mailbox::send`] therefore never blocks the caller, and concurrent
//! senders are serialized into whole lines. A client that stops reading fills
//! its queue; the overflowing line is dropped and the session is closed. A
//! failed write or an overflow wakes the read loop so the session closes
//! through the same path as a clean quit.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt},
    select,
    sync::{
        Notify,
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    error::HandshakeError,
    protocol::{Notice, read_line, write_line},
    registry::Registry,
    router::{self, DirectMatch, Flow},
};

pub type SessionId = u64;

/// Lines a session may have queued before it counts as stalled.
pub const OUTBOUND_CAPACITY: usize = 128;

/// How long `close` lets the writer flush before abandoning the connection.
const WRITER_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Handshaking = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Handshaking,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Handshaking => "handshaking",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

struct Lifecycle {
    state: AtomicU8,
    faulted: Notify,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Handshaking as u8),
            faulted: Notify::new(),
        }
    }

    fn get(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }
}

/// Cloneable send side of a session, held by the registry.
#[derive(Clone)]
pub struct Mailbox {
    id: SessionId,
    outbound: mpsc::Sender<String>,
    lifecycle: Arc<Lifecycle>,
}

impl Mailbox {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.get()
    }

    /// Queues one line for the client.
    ///
    /// Returns `false` without side effects once the session is closing or
    /// its writer has stopped. A full queue drops the line and asks the
    /// session to close.
    pub fn send(&self, text: impl Into<String>) -> bool {
        match self.state() {
            SessionState::Handshaking | SessionState::Active => {}
            SessionState::Closing | SessionState::Closed => return false,
        }
        match self.outbound.try_send(text.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(session = self.id, "client is not reading; dropping line");
                self.lifecycle.faulted.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Marks the session active and queues its rename notice ahead of
    /// anything a peer can send it.
    pub(crate) fn admit(&self, name: &str) -> bool {
        if !self
            .lifecycle
            .transition(SessionState::Handshaking, SessionState::Active)
        {
            return false;
        }
        let rename = Notice::Rename {
            name: name.to_string(),
        };
        self.send(rename.to_string());
        true
    }

    pub(crate) fn begin_close(&self) -> bool {
        self.lifecycle
            .transition(SessionState::Active, SessionState::Closing)
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

struct WriterTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Server-side state for one connection.
pub struct Session {
    mailbox: Mailbox,
    registry: Arc<Registry>,
    name: Option<String>,
    writer: Option<WriterTask>,
}

impl Session {
    /// Starts the outbound writer for `writer`; the session begins in
    /// `Handshaking`.
    pub fn open<W>(id: SessionId, writer: W, registry: Arc<Registry>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, inbox) = mpsc::channel(OUTBOUND_CAPACITY);
        let (stop, stopped) = oneshot::channel();
        let lifecycle = Arc::new(Lifecycle::new());
        let handle = tokio::spawn(drain_outbound(
            id,
            writer,
            inbox,
            stopped,
            Arc::clone(&lifecycle),
        ));

        Self {
            mailbox: Mailbox {
                id,
                outbound,
                lifecycle,
            },
            registry,
            name: None,
            writer: Some(WriterTask { stop, handle }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.mailbox.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.mailbox.state()
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Reads the requested name, registers under a unique variant of it and
    /// announces the join to everyone else.
    pub async fn handshake<R>(&mut self, reader: &mut R) -> Result<String, HandshakeError>
    where
        R: AsyncBufRead + Unpin,
    {
        let requested = read_line(reader)
            .await?
            .ok_or(HandshakeError::Disconnected)?;
        let requested = requested.trim();
        if requested.is_empty() {
            self.mailbox.send(Notice::EmptyName.to_string());
            return Err(HandshakeError::EmptyName);
        }

        let name = self
            .registry
            .try_add(requested, &self.mailbox)
            .await
            .ok_or(HandshakeError::NotHandshaking)?;
        info!(session = self.id(), %name, requested, "client joined");

        let joined = Notice::Joined { name: name.clone() }.to_string();
        self.registry
            .for_each_except(&name, |_, peer| {
                peer.send(joined.as_str());
            })
            .await;

        self.name = Some(name.clone());
        Ok(name)
    }

    /// Routes incoming lines until quit, end of stream, a read error, a
    /// failed write or an overflowing queue.
    pub async fn run<R>(&mut self, reader: &mut R, policy: DirectMatch)
    where
        R: AsyncBufRead + Unpin,
    {
        let Some(name) = self.name.clone() else {
            return;
        };
        let lifecycle = Arc::clone(&self.mailbox.lifecycle);

        loop {
            select! {
                line = read_line(reader) => match line {
                    Ok(Some(line)) => {
                        let flow =
                            router::dispatch(&line, &name, &self.mailbox, &self.registry, policy)
                                .await;
                        if flow == Flow::Quit {
                            debug!(session = self.id(), %name, "client quit");
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(session = self.id(), %name, "client closed the stream");
                        break;
                    }
                    Err(error) => {
                        debug!(session = self.id(), %name, ?error, "read failed");
                        break;
                    }
                },
                _ = lifecycle.faulted.notified() => {
                    debug!(session = self.id(), %name, "client stopped accepting lines");
                    break;
                }
            }
        }
    }

    /// Leaves the registry, tells the remaining clients and releases the
    /// outbound stream. Calling it again is a no-op.
    ///
    /// Queued lines get a short grace period to flush; a writer still blocked
    /// on the client after that is aborted, which drops the connection.
    pub async fn close(&mut self) {
        if let Some(name) = self.registry.remove(&self.mailbox).await {
            info!(session = self.id(), %name, "client left");
            let left = Notice::Left { name: name.clone() }.to_string();
            self.registry
                .for_each_except(&name, |_, peer| {
                    peer.send(left.as_str());
                })
                .await;
        }
        self.mailbox.lifecycle.finish();

        if let Some(WriterTask { stop, mut handle }) = self.writer.take() {
            let _ = stop.send(());
            match timeout(WRITER_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    debug!(session = self.id(), ?error, "writer task ended abnormally")
                }
                Err(_) => {
                    warn!(session = self.id(), "client stalled; dropping unsent lines");
                    handle.abort();
                }
            }
        }
    }
}

/// Drives one connection from accept to teardown.
pub async fn serve<R, W>(
    id: SessionId,
    mut reader: R,
    writer: W,
    registry: Arc<Registry>,
    policy: DirectMatch,
) -> Result<(), HandshakeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut session = Session::open(id, writer, registry);
    let outcome = session.handshake(&mut reader).await;
    if outcome.is_ok() {
        session.run(&mut reader, policy).await;
    }
    session.close().await;
    outcome.map(|_| ())
}

async fn drain_outbound<W>(
    id: SessionId,
    mut writer: W,
    mut inbox: mpsc::Receiver<String>,
    mut stop: oneshot::Receiver<()>,
    lifecycle: Arc<Lifecycle>,
) where
    W: AsyncWrite + Unpin,
{
    let mut stopping = false;
    loop {
        select! {
            biased;
            _ = &mut stop, if !stopping => {
                // Flush what is already queued, then stop.
                inbox.close();
                stopping = true;
            }
            line = inbox.recv() => match line {
                Some(line) => {
                    if let Err(error) = write_line(&mut writer, &line).await {
                        debug!(session = id, ?error, "failed to deliver line to client");
                        lifecycle.faulted.notify_one();
                        return;
                    }
                }
                None => break,
            }
        }
    }

    if let Err(error) = writer.shutdown().await {
        debug!(session = id, ?error, "failed to shut down client writer");
    }
}

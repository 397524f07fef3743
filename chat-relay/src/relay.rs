use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    error::HandshakeError,
    protocol::Notice,
    registry::Registry,
    router::DirectMatch,
    session::{self, SessionId},
};

/// Pause after a failed accept, so a persistent error such as running out of
/// file descriptors does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop handing each connection to its own session task.
pub struct Relay {
    listener: TcpListener,
    state: Arc<RelayState>,
}

struct RelayState {
    registry: Arc<Registry>,
    policy: DirectMatch,
    next_id: AtomicU64,
}

impl RelayState {
    fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Relay {
    pub fn new(listener: TcpListener) -> Self {
        Self::with_direct_match(listener, DirectMatch::default())
    }

    pub fn with_direct_match(listener: TcpListener, policy: DirectMatch) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState {
                registry: Arc::new(Registry::new()),
                policy,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.state.registry)
    }

    /// Accepts until `shutdown` resolves, then drops the listener.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state).await;
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &RelayState) {
    info!("relay shutting down");
    let notice = Notice::ShuttingDown.to_string();
    state
        .registry
        .for_each(|_, mailbox| {
            mailbox.send(notice.as_str());
        })
        .await;
}

async fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, state),
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
        }
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, state: &Arc<RelayState>) {
    let id = state.next_id();
    let registry = Arc::clone(&state.registry);
    let policy = state.policy;
    info!(session = id, %peer, "client connected");

    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        match session::serve(id, BufReader::new(reader), writer, registry, policy).await {
            Ok(()) => debug!(session = id, %peer, "session closed"),
            Err(HandshakeError::Io(err)) => {
                warn!(session = id, %peer, error = ?err, "handshake failed")
            }
            Err(err) => debug!(session = id, %peer, reason = %err, "client left before joining"),
        }
    });
}

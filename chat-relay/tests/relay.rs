use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use chat_relay::{
    protocol::{read_line, write_line},
    registry::Registry,
    relay::Relay,
    router::DirectMatch,
};
use tokio::{
    io::BufReader,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(1);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

struct TestRelay {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl TestRelay {
    async fn start(policy: DirectMatch) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let relay = Relay::with_direct_match(listener, policy);
        let registry = relay.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = relay.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            registry,
            shutdown: Some(shutdown_tx),
            server,
        })
    }

    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.server.await;
    }

    /// Waits until the roster matches `expected`; joins and leaves settle
    /// asynchronously with respect to the client that triggered them.
    async fn wait_for_roster(&self, expected: &[&str]) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
        loop {
            let roster = self.registry.snapshot().await;
            if roster == expected || tokio::time::Instant::now() >= deadline {
                return roster;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn join(addr: SocketAddr, requested: &str) -> Result<(Self, String)> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
        };

        client.send(requested).await?;
        let rename = client.recv().await?;
        let assigned = rename
            .strip_prefix("#name")
            .unwrap_or_else(|| panic!("unexpected handshake response: {rename}"))
            .to_string();
        Ok((client, assigned))
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        write_line(&mut self.writer, line).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String> {
        let line = timeout(READ_TIMEOUT, read_line(&mut self.reader))
            .await??
            .expect("relay closed the connection");
        Ok(line)
    }

    /// Asserts nothing arrives within a short quiet period.
    async fn expect_silence(&mut self) {
        if let Ok(line) = timeout(QUIET_PERIOD, read_line(&mut self.reader)).await {
            panic!("expected no message, got {line:?}");
        }
    }

    async fn expect_closed(&mut self) -> Result<()> {
        let line = timeout(READ_TIMEOUT, read_line(&mut self.reader)).await??;
        assert_eq!(line, None, "expected the relay to close the connection");
        Ok(())
    }
}

#[tokio::test]
async fn chat_walkthrough() -> Result<()> {
    let relay = TestRelay::start(DirectMatch::Substring).await?;

    let (mut alice, alice_name) = TestClient::join(relay.addr, "alice").await?;
    assert_eq!(alice_name, "alice");

    let (mut bob, bob_name) = TestClient::join(relay.addr, "alice").await?;
    assert_eq!(bob_name, "alice1");
    assert_eq!(alice.recv().await?, "Server: alice1 has entered the chat.");

    alice.send("hello everyone").await?;
    assert_eq!(bob.recv().await?, "hello everyone");
    alice.expect_silence().await;

    alice.send("#alice1 hi").await?;
    assert_eq!(bob.recv().await?, "DM from  hi");
    alice.expect_silence().await;

    alice.send("\\q").await?;
    alice.expect_closed().await?;
    assert_eq!(bob.recv().await?, "Server: alice has left the chat.");
    assert_eq!(relay.wait_for_roster(&["alice1"]).await, vec!["alice1"]);

    bob.send("#userlist").await?;
    assert_eq!(bob.recv().await?, "Users online: ");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn direct_message_reaches_only_its_target() -> Result<()> {
    let relay = TestRelay::start(DirectMatch::Substring).await?;

    let (mut ann, _) = TestClient::join(relay.addr, "ann").await?;
    let (mut ben, _) = TestClient::join(relay.addr, "ben").await?;
    assert_eq!(ann.recv().await?, "Server: ben has entered the chat.");
    let (mut cat, _) = TestClient::join(relay.addr, "cat").await?;
    assert_eq!(ann.recv().await?, "Server: cat has entered the chat.");
    assert_eq!(ben.recv().await?, "Server: cat has entered the chat.");

    ann.send("ann:#cat see you at noon").await?;
    assert_eq!(cat.recv().await?, "DM from ann: see you at noon");
    ben.expect_silence().await;
    ann.expect_silence().await;

    ben.send("#USERLIST").await?;
    assert_eq!(ben.recv().await?, "Users online: ann, cat");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn broadcast_skips_the_sender_and_reaches_everyone_else() -> Result<()> {
    let relay = TestRelay::start(DirectMatch::Substring).await?;

    let (mut one, _) = TestClient::join(relay.addr, "one").await?;
    let (mut two, _) = TestClient::join(relay.addr, "two").await?;
    assert_eq!(one.recv().await?, "Server: two has entered the chat.");
    let (mut three, _) = TestClient::join(relay.addr, "three").await?;
    assert_eq!(one.recv().await?, "Server: three has entered the chat.");
    assert_eq!(two.recv().await?, "Server: three has entered the chat.");

    two.send("two:anyone around?").await?;
    assert_eq!(one.recv().await?, "two:anyone around?");
    assert_eq!(three.recv().await?, "two:anyone around?");
    two.expect_silence().await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn abrupt_disconnect_is_announced_once() -> Result<()> {
    let relay = TestRelay::start(DirectMatch::Substring).await?;

    let (mut stayer, _) = TestClient::join(relay.addr, "stayer").await?;
    let (leaver, _) = TestClient::join(relay.addr, "leaver").await?;
    assert_eq!(stayer.recv().await?, "Server: leaver has entered the chat.");

    drop(leaver);
    assert_eq!(stayer.recv().await?, "Server: leaver has left the chat.");
    stayer.expect_silence().await;
    assert_eq!(relay.wait_for_roster(&["stayer"]).await, vec!["stayer"]);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn token_policy_broadcasts_embedded_tags() -> Result<()> {
    let relay = TestRelay::start(DirectMatch::Token).await?;

    let (mut al, _) = TestClient::join(relay.addr, "al").await?;
    let (mut alfred, _) = TestClient::join(relay.addr, "alfred").await?;
    assert_eq!(al.recv().await?, "Server: alfred has entered the chat.");

    alfred.send("see issue#al for details").await?;
    assert_eq!(al.recv().await?, "see issue#al for details");

    alfred.send("#al ping").await?;
    assert_eq!(al.recv().await?, "DM from  ping");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_notifies_connected_clients() -> Result<()> {
    let relay = TestRelay::start(DirectMatch::Substring).await?;

    let (mut alice, _) = TestClient::join(relay.addr, "alice").await?;
    relay.stop().await;

    assert_eq!(alice.recv().await?, "Server: relay shutting down.");
    Ok(())
}

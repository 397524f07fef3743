use anyhow::{Context, Result};
use clap::Parser;
use tokio::{io::AsyncWrite, net::TcpListener};
use tracing::{info, warn};

use chat_relay::{
    address::{Host, Prompter},
    cli::{Cli, ClientArgs, Command, ServerArgs},
    client::{self, ClientConfig},
    input::{self, LineSource},
    relay::Relay,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut stdin = input::spawn_stdin().context("failed to start reading standard input")?;
    match cli.command {
        Command::Server(args) => run_server(args, &mut stdin).await?,
        Command::Client(args) => {
            let reconnect = args.reconnect;
            let config = client_config(args, &mut stdin).await?;
            let stdout = tokio::io::stdout();
            let state = if reconnect {
                client::run_with_reconnect(config, stdin, stdout).await?
            } else {
                client::run(config, stdin, stdout).await?
            };
            info!(name = %state.name, "client finished");
        }
    }

    Ok(())
}

async fn run_server<I>(args: ServerArgs, stdin: &mut I) -> Result<()>
where
    I: LineSource,
{
    let port = match args.port {
        Some(port) => port,
        None => prompter(stdin).port().await?,
    };
    let addr = args.bind.unwrap_or(Host::UNSPECIFIED).socket_addr(port);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let relay = Relay::with_direct_match(listener, args.direct_match);
    let addr = relay.local_addr()?;
    info!("relay listening on {}", addr);
    if let Err(err) = relay.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn client_config<I>(args: ClientArgs, stdin: &mut I) -> Result<ClientConfig>
where
    I: LineSource,
{
    let mut prompter = prompter(stdin);
    let host = match args.address {
        Some(host) => host,
        None => prompter.host().await?,
    };
    let port = match args.port {
        Some(port) => port,
        None => prompter.port().await?,
    };
    let name = match args.name {
        Some(name) => name,
        None => prompter.name().await?,
    };

    Ok(ClientConfig {
        host,
        port,
        name,
        attempts: args.attempts,
        retry_delay: args.retry_delay,
    })
}

fn prompter<I>(stdin: &mut I) -> Prompter<&mut I, impl AsyncWrite + Unpin>
where
    I: LineSource,
{
    Prompter::new(stdin, tokio::io::stdout())
}

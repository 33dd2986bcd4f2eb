use anyhow::Context;
use busgate::types::events::{ConnectionState, Event};
use busgate::{Address, Client, ClientConfig, DeviceRegistry, MemoryRegistry, OutboundCommand};
use busgate_tokio_transport::TokioTcpTransportFactory;
use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

// Usage:
//   busgate --host 192.168.1.50 --password secret          # log bus traffic
//   busgate --config gateway.json --no-details             # no detail reads
//   busgate --host gw send G3 0 toggle                     # one-shot command

/// How long a one-shot command waits for the device to acknowledge.
const SEND_ACK_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECT_WAIT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "busgate", version, about = "Client for a home-automation bus gateway")]
struct Cli {
    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, env = "BUSGATE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Do not read module details in the background
    #[arg(long)]
    no_details: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, send one command and exit
    Send {
        /// Object (`42`), group (`G3`) or module (`MD1A2B`) address
        target: Address,
        object: u16,
        #[command(subcommand)]
        action: Action,
    },
}

#[derive(Subcommand, Debug)]
enum Action {
    Set { value: u16 },
    Inc { step: u8 },
    Dec { step: u8 },
    Toggle,
    Dim {
        level: u8,
        #[arg(default_value_t = 0)]
        ramp_secs: u8,
    },
    Lock {
        #[arg(action = clap::ArgAction::Set)]
        locked: bool,
    },
    Read,
    Lcd { line: u8, column: u8, text: String },
    Details,
}

impl From<Action> for OutboundCommand {
    fn from(action: Action) -> Self {
        match action {
            Action::Set { value } => OutboundCommand::Set { value },
            Action::Inc { step } => OutboundCommand::Increment { step },
            Action::Dec { step } => OutboundCommand::Decrement { step },
            Action::Toggle => OutboundCommand::Toggle,
            Action::Dim { level, ramp_secs } => OutboundCommand::Dim { level, ramp_secs },
            Action::Lock { locked } => OutboundCommand::Lock { locked },
            Action::Read => OutboundCommand::RequestValue,
            Action::Lcd { line, column, text } => {
                OutboundCommand::SetLcdText { line, column, text }
            }
            Action::Details => OutboundCommand::RequestDetails,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(cli)) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_json_file(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }
    if cli.no_details {
        config.detail.enabled = false;
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli).await?;
    info!("Using gateway {}:{}", config.host, config.port);

    let client = Client::new(
        config,
        Arc::new(TokioTcpTransportFactory::new()),
        Arc::new(MemoryRegistry::new()),
    );

    match cli.command {
        Some(Command::Send {
            target,
            object,
            action,
        }) => send_once(client, target, object, action.into()).await,
        None => monitor(client).await,
    }
}

fn log_event(event: &Event) {
    match event {
        Event::ValueUpdate(update) => info!(
            target: "Event",
            "{} obj {} -> {}: {}",
            update.source, update.object, update.target, update.reading
        ),
        Event::ConnectionStateChanged(state) => info!(target: "Event", "Connection {state}"),
        other => match serde_json::to_string(other) {
            Ok(json) => info!(target: "Event", "{json}"),
            Err(_) => info!(target: "Event", "{other:?}"),
        },
    }
}

async fn monitor(client: Arc<Client>) -> anyhow::Result<()> {
    let mut events = client.subscribe();

    let scheduler = client
        .config()
        .detail
        .enabled
        .then(|| client.detail_scheduler());
    if let Some(scheduler) = &scheduler {
        tokio::spawn(scheduler.clone().run());
    }

    let mut runner = tokio::spawn({
        let client = client.clone();
        async move { client.run().await }
    });

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down.");
                break None;
            }
            result = &mut runner => break Some(result),
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => warn!("Skipped {n} events"),
                Err(RecvError::Closed) => break None,
            },
        }
    };

    if let Some(scheduler) = &scheduler {
        scheduler.stop().await;
    }
    client.disconnect().await;

    let result = match outcome {
        Some(result) => result,
        None => runner.await,
    };
    result.context("client task panicked")??;

    let devices = client.registry().all().await?;
    info!("Known devices at exit: {}", devices.len());
    Ok(())
}

async fn send_once(
    client: Arc<Client>,
    target: Address,
    object: u16,
    command: OutboundCommand,
) -> anyhow::Result<()> {
    client.set_auto_reconnect(false);
    let mut events = client.subscribe();
    let mut state = client.watch_state();

    let runner = tokio::spawn({
        let client = client.clone();
        async move { client.run().await }
    });

    tokio::time::timeout(
        CONNECT_WAIT,
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .context("timed out connecting to the gateway")??;

    client.send(target, object, command).await?;
    info!("Sent to {target} object {object}");

    let wait_for_ack = async {
        loop {
            match events.recv().await {
                Ok(Event::Ack(ack)) if ack.source == target => return Some(ack),
                Ok(Event::AuthResult(result)) if !result.accepted => return None,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    };
    match tokio::time::timeout(SEND_ACK_TIMEOUT, wait_for_ack).await {
        Ok(Some(ack)) if ack.is_ok() => info!("Acknowledged by {}", ack.source),
        Ok(Some(ack)) => warn!("{} answered with status {}", ack.source, ack.status),
        Ok(None) => warn!("No acknowledgement"),
        Err(_) => warn!("No acknowledgement within {SEND_ACK_TIMEOUT:?}"),
    }

    client.disconnect().await;
    runner.await.context("client task panicked")??;
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env, Target};
use log::{error, info};
use std::{io::Write, sync::Arc};
use tokio::signal::unix::{SignalKind, signal};
use wifi_portal::{
    config::AppConfig,
    network_manager::NmcliClient,
    services::{
        connection::{SessionHandle, SessionState},
        hotspot_config::Credential,
        portal::{PortalService, SubmitRequest},
    },
};

type Portal = PortalService<NmcliClient>;

#[derive(Parser, Debug)]
#[command(version, about = "Connect this device to a wifi network via NetworkManager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List networks visible to the managed device
    Networks,
    /// Print the connectivity of the managed device
    Status,
    /// Connect to a network
    Connect {
        ssid: String,
        #[arg(short, long)]
        password: Option<String>,
        /// Keep retrying in the background until connected or timed out
        #[arg(short, long)]
        background: bool,
    },
    /// Retry the network saved by the last background connect
    Resume,
    /// Print the saved network
    Saved,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    initialize();

    let config = AppConfig::load().context("failed to load configuration")?;
    let network_manager = Arc::new(NmcliClient::new(&config.network_manager));
    let portal = PortalService::new(network_manager, &config);

    match cli.command {
        Command::Networks => {
            for ssid in portal.list_available_networks().await? {
                println!("{ssid}");
            }
        }
        Command::Status => print_json(&portal.get_status().await)?,
        Command::Connect {
            ssid,
            password,
            background,
        } => {
            let response = portal
                .submit(SubmitRequest {
                    ssid,
                    password: password.map(Credential::from),
                    manual_connect: background,
                })
                .await?;
            print_json(&response)?;

            if let Some(session) = background.then(|| portal.orchestrator().session()).flatten() {
                await_session(&portal, session).await?;
            }
        }
        Command::Resume => match portal.resume_saved() {
            Some(session) => await_session(&portal, session).await?,
            None => println!("no saved network"),
        },
        Command::Saved => match portal.saved_config() {
            Some(config) => println!("{}", config.ssid),
            None => println!("no saved network"),
        },
    }

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!(
        "module version: {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHORT_REV")
    );
}

/// Wait for a background session to end, cancelling it on SIGTERM or ctrl-c
async fn await_session(portal: &Portal, session: SessionHandle) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let state = tokio::select! {
        state = session.wait() => state,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c");
            portal.shutdown().await;
            session.state()
        },
        _ = sigterm.recv() => {
            info!("SIGTERM");
            portal.shutdown().await;
            session.state()
        },
    };

    print_json(&state)?;

    match state {
        SessionState::Succeeded { .. } => Ok(()),
        state => anyhow::bail!(
            "failed to connect to \"{}\": {}",
            session.ssid(),
            state
                .last_outcome()
                .map(|outcome| outcome.message())
                .unwrap_or_else(|| "no attempt finished".to_string())
        ),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

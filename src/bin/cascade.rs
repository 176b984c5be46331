//! Cascade - peer directory client for lab helpers
//!
//! # Usage
//!
//! ```bash
//! # Stay logged in, offer help on two subjects and print directory changes
//! cascade watch --subject maths --subject java --cascade
//!
//! # Print who is currently helping with maths in lab tb-1
//! cascade peers --subject maths --lab tb-1
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cascade_client::{
    spawn_session, ClientConfig, ConnectionState, SessionEvent, SessionHandle, TcpTransport,
};
use cascade_core::{PeerQuery, PeerRegistry};

/// Cascade - find and offer help in the lab
#[derive(Parser, Debug)]
#[command(name = "cascade", version, about)]
struct Args {
    /// Config file (defaults to the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stay connected and print directory changes and help requests
    Watch {
        /// Subject to offer help on (repeatable)
        #[arg(short, long = "subject")]
        subjects: Vec<String>,

        /// Start cascading once logged in
        #[arg(long)]
        cascade: bool,
    },
    /// Log in once and print matching peers
    Peers {
        /// Only peers on a host in this lab
        #[arg(long)]
        lab: Option<String>,

        /// Only peers offering any of these subjects (repeatable)
        #[arg(short, long = "subject")]
        subjects: Vec<String>,

        /// Only peers on this host
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cascade=info".parse()?)
                .add_directive("cascade_client=info".parse()?)
                .add_directive("cascade_core=warn".parse()?),
        )
        .init();

    let config = match &args.config {
        Some(path) => ClientConfig::load(path),
        None => ClientConfig::load_default(),
    }
    .context("Failed to load configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server_addr(),
        username = %config.username,
        "Cascade starting"
    );

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let (transport, pushes) = TcpTransport::new(config.tcp_config());
    let session = spawn_session(
        Arc::new(transport),
        pushes,
        Arc::new(config.lab_resolver()),
        config.session_config(),
        cancel_token.clone(),
    );

    let result = match args.command {
        Command::Watch { subjects, cascade } => {
            watch(&session, subjects, cascade, &cancel_token).await
        }
        Command::Peers {
            lab,
            subjects,
            host,
        } => {
            let mut query = PeerQuery::new();
            if let Some(lab) = lab {
                query = query.lab(lab);
            }
            if !subjects.is_empty() {
                query = query.subjects(subjects);
            }
            if let Some(host) = host {
                query = query.host(host);
            }
            peers(&session, &query).await
        }
    };

    session.shutdown();
    result
}

async fn watch(
    session: &SessionHandle,
    subjects: Vec<String>,
    cascade: bool,
    cancel_token: &CancellationToken,
) -> Result<()> {
    let mut events = session.subscribe();
    session.reconnect().await;

    tokio::select! {
        result = session.wait_for_state(ConnectionState::LoggedIn) => result?,
        _ = cancel_token.cancelled() => return Ok(()),
    }

    if !subjects.is_empty() {
        session
            .add_subjects(subjects)
            .await
            .context("Failed to add subjects")?;
    }
    if cascade {
        session
            .start_cascading()
            .await
            .context("Failed to start cascading")?;
    }
    print_directory(&session.directory(), &PeerQuery::new());

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = cancel_token.cancelled() => break,
        };

        match event {
            Ok(SessionEvent::DirectoryChanged { directory }) => {
                print_directory(&directory, &PeerQuery::new());
            }
            Ok(SessionEvent::OwnSubjectsChanged { subjects }) => {
                let names: Vec<&str> = subjects.iter().map(|s| s.as_str()).collect();
                println!("my subjects: {}", names.join(", "));
            }
            Ok(SessionEvent::HelpRequested {
                request,
                received_at,
            }) => {
                println!(
                    "[{}] {}@{} needs help with {}: {}",
                    received_at.format("%H:%M:%S"),
                    request.username,
                    request.host,
                    request.subject,
                    request.description
                );
            }
            Ok(SessionEvent::ConnectionChanged { state }) => {
                println!("connection: {state}");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event stream lagged, re-reading directory");
                print_directory(&session.directory(), &PeerQuery::new());
            }
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}

async fn peers(session: &SessionHandle, query: &PeerQuery) -> Result<()> {
    session.connect().await.context("Failed to connect to broker")?;
    session.login().await.context("Failed to log in")?;
    print_directory(&session.directory(), query);
    Ok(())
}

fn print_directory(directory: &PeerRegistry, query: &PeerQuery) {
    let mut matches: Vec<_> = directory.query(query).collect();
    matches.sort_by(|a, b| a.username.cmp(b.username));

    println!("{} peer(s)", matches.len());
    for peer in matches {
        let names: Vec<&str> = peer.subjects.iter().map(|s| s.as_str()).collect();
        println!("  {:<16} {:<20} {}", peer.username, peer.host, names.join(", "));
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

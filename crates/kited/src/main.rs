//! kited: the kite daemon.
//!
//! Serves the deploy API and runs the periodic garbage collector. The
//! other subcommands run one operation against the same store and exit.
//!
//! # Usage
//!
//! ```text
//! kited --config /etc/kite/kite.toml serve
//! kited --config /etc/kite/kite.toml --phase prod gc --dry-run
//! kited activate kakao api 3f2a9c1 42
//! kited deploy kakao api 3f2a9c1 registry.example/api:3f2a9c1
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kite_core::{DeployId, KiteConfig};
use kite_rollout::DeployRequest;
use kited::Kite;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kited", about = "kite deployment control plane")]
struct Cli {
    /// Configuration file. Defaults apply when it does not exist.
    #[arg(long, default_value = "kite.toml")]
    config: PathBuf,

    /// Phase overlay merged over the base config (`<dir>/<phase>.toml`).
    #[arg(long, env = "KITE_PHASE")]
    phase: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API and run the periodic garbage collector.
    Serve,
    /// Run one garbage collection sweep and print the report.
    Gc {
        /// Report what would be deleted without deleting it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Point a Service at one revision.
    Activate {
        namespace: String,
        service: String,
        sha: String,
        deploy_id: DeployId,
    },
    /// Deploy one revision and wait for the outcome.
    Deploy {
        namespace: String,
        service: String,
        sha: String,
        image: String,
        /// Deployment record opened elsewhere.
        #[arg(long)]
        deploy_id: Option<DeployId>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli)?;
    let kite = Kite::open(config)?;

    match cli.command {
        Command::Serve => serve(kite).await,
        Command::Gc { dry_run } => {
            let report = kite.gc.sweep(dry_run, kite.config.gc.retention).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Activate {
            namespace,
            service,
            sha,
            deploy_id,
        } => {
            let svc = kite.cutover.activate(&namespace, &service, &sha, deploy_id).await?;
            println!("{}", serde_json::to_string_pretty(&svc)?);
            Ok(())
        }
        Command::Deploy {
            namespace,
            service,
            sha,
            image,
            deploy_id,
        } => {
            let (_, metadata) = kite.orchestrator.services().get(&namespace, &service).await?;
            let report = kite
                .orchestrator
                .deploy(DeployRequest {
                    metadata,
                    sha,
                    image,
                    deploy_id,
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            anyhow::ensure!(report.succeeded(), "deploy did not succeed");
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kite=debug,kited=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<KiteConfig> {
    if cli.config.exists() {
        let config = KiteConfig::load(&cli.config, cli.phase.as_deref())?;
        info!(path = %cli.config.display(), phase = ?cli.phase, "config loaded");
        Ok(config)
    } else {
        anyhow::ensure!(
            cli.phase.is_none(),
            "phase given but config {} does not exist",
            cli.config.display()
        );
        info!(path = %cli.config.display(), "config not found, using defaults");
        Ok(KiteConfig::default())
    }
}

async fn serve(kite: Kite) -> anyhow::Result<()> {
    info!("kite daemon starting");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let gc_handle = kite.config.gc.interval.map(|interval| {
        let gc = kite.gc.clone();
        let ttl = kite.config.gc.retention;
        let dry_run = kite.config.gc.dry_run;
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { gc.run(interval, ttl, dry_run, shutdown).await })
    });
    if gc_handle.is_none() {
        info!("periodic garbage collection disabled");
    }

    // ── API server ─────────────────────────────────────────────

    let router = kite.router();
    let listen = kite.config.server.listen.clone();
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(addr = %listen, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = gc_handle {
        let _ = handle.await;
    }

    info!("kite daemon stopped");
    Ok(())
}

#![forbid(unsafe_code)]

//! `uci-bridge` — WebSocket to UCI engine bridge binary.
//!
//! Loads configuration, resolves the engine assets once, and serves the
//! WebSocket listener until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use uci_bridge::config::GlobalConfig;
use uci_bridge::engine::assets::{AssetLayout, AssetResolver, LayoutResolver};
use uci_bridge::transport::ws;
use uci_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "uci-bridge", about = "WebSocket bridge to a local UCI engine", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listener port; overrides `http_port` from the config file.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Resolve engine assets relative to the installed binary.
    #[arg(long)]
    packaged: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("uci-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if args.packaged {
        config.engine.layout = AssetLayout::Packaged;
    }
    info!(
        addr = %config.listen_addr(),
        layout = ?config.engine.layout,
        max_sessions = config.max_sessions,
        "configuration loaded"
    );

    let resolver = LayoutResolver::from_config(&config.engine);
    match resolver.resolve().and_then(|assets| assets.verify().map(|()| assets)) {
        Ok(assets) => info!(
            executable = %assets.executable.display(),
            eval_file = %assets.eval_file.display(),
            "engine assets found"
        ),
        // Sessions report this to each client; the listener still starts.
        Err(err) => warn!(%err, "engine assets not available"),
    }
    let resolver: Arc<dyn AssetResolver> = Arc::new(resolver);

    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let mut server = tokio::spawn(async move { ws::serve(&config, resolver, server_ct).await });

    let joined = tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            server.await
        }
        joined = &mut server => joined,
    };

    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(%err, "websocket listener failed");
            return Err(err);
        }
        Err(err) => {
            return Err(AppError::Transport(format!("listener task panicked: {err}")));
        }
    }

    info!("uci-bridge shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

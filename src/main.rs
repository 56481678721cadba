//! Foremast anomaly dashboard service.
//!
//! Polls the foremast metrics API every interval, aligns anomaly markers
//! onto the measured series, and serves the assembled charts as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{watch, RwLock};

use foremast_dashboard::config::MetricCatalog;
use foremast_dashboard::dashboard::poller::DEFAULT_API_URL;
use foremast_dashboard::dashboard::{
    run_server, AppState, DashboardState, HttpMetricsSource, Poller, PollerConfig, ServerConfig,
    Workload,
};

/// Foremast anomaly dashboard
#[derive(Parser, Debug, Clone)]
#[command(name = "foremast-dashboard")]
#[command(about = "Poll foremast metrics and serve anomaly charts as JSON")]
struct Args {
    /// Base URL of the metrics query API
    #[arg(long, env = "FOREMAST_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Port for the dashboard API
    #[arg(short, long, default_value = "8060")]
    port: u16,

    /// Seconds between poll cycles
    #[arg(long, default_value = "15")]
    interval_secs: u64,

    /// How many minutes of history each query covers
    #[arg(long, default_value = "15")]
    window_minutes: u32,

    /// Query step in seconds (also the anomaly alignment window)
    #[arg(long, default_value = "15")]
    step_secs: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "10")]
    request_timeout_secs: u64,

    /// Namespace shown in chart titles
    #[arg(long, env = "FOREMAST_NAMESPACE", default_value = "foremast-examples")]
    namespace: String,

    /// Application shown in chart titles
    #[arg(long, env = "FOREMAST_APP", default_value = "foo")]
    app: String,

    /// YAML metric catalog (built-in catalog if omitted)
    #[arg(long)]
    metrics_config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,
}

impl Args {
    /// Reject settings that would produce empty or inverted query windows.
    fn validate(&self) -> anyhow::Result<()> {
        if self.interval_secs == 0 {
            anyhow::bail!("--interval-secs must be greater than zero");
        }
        if self.step_secs == 0 {
            anyhow::bail!("--step-secs must be greater than zero");
        }
        if self.window_minutes == 0 {
            anyhow::bail!("--window-minutes must be greater than zero");
        }
        Ok(())
    }

    fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.window_minutes))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing - RUST_LOG takes precedence, fallback to info
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    args.validate()?;

    let catalog = match &args.metrics_config {
        Some(path) => MetricCatalog::load(path)
            .with_context(|| format!("Failed to load metric catalog {}", path.display()))?,
        None => MetricCatalog::builtin(),
    };
    let catalog = Arc::new(catalog);

    tracing::info!(
        api_url = %args.api_url,
        port = args.port,
        interval_secs = args.interval_secs,
        window_minutes = args.window_minutes,
        step_secs = args.step_secs,
        namespace = %args.namespace,
        app = %args.app,
        groups = catalog.groups.len(),
        "Starting foremast-dashboard"
    );

    let source = HttpMetricsSource::new(Duration::from_secs(args.request_timeout_secs))?;
    let state = Arc::new(RwLock::new(DashboardState::new(
        &catalog,
        Workload::new(args.namespace.clone(), args.app.clone()),
    )));

    let poller = Arc::new(Poller::new(
        source,
        catalog.clone(),
        state.clone(),
        PollerConfig {
            api_url: args.api_url.clone(),
            interval: Duration::from_secs(args.interval_secs),
            lookback: args.lookback(),
            step_secs: args.step_secs,
        },
    ));

    // Set up shutdown coordination
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let poller_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { poller.run(shutdown).await })
    };

    let mut server_shutdown = shutdown_rx;
    let server_result = run_server(
        Arc::new(AppState { catalog, state }),
        ServerConfig { port: args.port },
        async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        },
    )
    .await;

    if let Err(e) = server_result {
        poller_handle.abort();
        return Err(e);
    }
    poller_handle.await.context("Poller task panicked")?;

    tracing::info!("foremast-dashboard stopped");
    Ok(())
}

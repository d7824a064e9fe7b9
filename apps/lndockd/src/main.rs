mod config;
mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lndock_core::{
    loopback::LoopbackMailbox, MailboxTransport, MethodRegistry, SessionPool,
};

use crate::{
    config::Config,
    handlers::{health_check, metrics_handler, require_bearer, rpc_handler, AppState, GaugeStats},
};

#[derive(Parser, Debug)]
#[command(name = "lndockd")]
#[command(about = "HTTP daemon bridging JSON requests to mailbox-relayed Lightning nodes")]
struct Cli {
    /// Bind host (overrides LNDOCK_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides LNDOCK_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Serve the in-memory loopback mailbox instead of a real relay.
    /// Development only.
    #[arg(long)]
    dev_loopback: bool,
}

/// The wire-level method surface: payloads are pre-marshaled JSON, so every
/// method forwards through the stream untouched.
fn lightning_registry() -> MethodRegistry {
    const METHODS: &[&str] = &[
        "lnrpc.Lightning.GetInfo",
        "lnrpc.Lightning.WalletBalance",
        "lnrpc.Lightning.ChannelBalance",
        "lnrpc.Lightning.ListChannels",
        "lnrpc.Lightning.ListPeers",
        "lnrpc.Lightning.ListInvoices",
        "lnrpc.Lightning.ListPayments",
        "lnrpc.Lightning.AddInvoice",
        "lnrpc.Lightning.LookupInvoice",
        "lnrpc.Lightning.DecodePayReq",
        "lnrpc.Lightning.SendPaymentSync",
        "lnrpc.Lightning.GetTransactions",
        "lnrpc.Lightning.NewAddress",
        "routerrpc.Router.SendPaymentV2",
        "routerrpc.Router.TrackPaymentV2",
    ];

    let mut builder = MethodRegistry::builder();
    for method in METHODS {
        builder = builder.passthrough(method);
    }
    builder.build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.dev_loopback {
        config.dev_loopback = true;
    }

    // Default to the configured verbosity when RUST_LOG is not set.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", if config.debug { "debug" } else { "info" });
    }
    tracing_subscriber::fmt::init();

    info!("starting lndockd");
    info!(
        "LNDOCK_TIMEOUT: {}",
        humantime::format_duration(config.idle_timeout)
    );
    info!("LNDOCK_LIMIT_ACTIVE_CONNECTIONS: {}", config.max_sessions);
    info!(
        "LNDOCK_STATS_INTERVAL: {}",
        humantime::format_duration(config.stats_interval)
    );
    info!("LNDOCK_DEBUG: {}", config.debug);
    info!("LNDOCK_HOST: {}", config.host);
    info!("LNDOCK_PORT: {}", config.port);
    if config.unsafe_log {
        info!("LNDOCK_AUTH_TOKEN: {}", config.auth_token);
        info!("!!! UNSAFE LOGGING ENABLED !!!");
    }

    let transport: Arc<dyn MailboxTransport> = if config.dev_loopback {
        warn!("serving the in-memory loopback mailbox; development only");
        Arc::new(LoopbackMailbox::new())
    } else {
        anyhow::bail!(
            "no mailbox transport is configured; set LNDOCK_DEV_LOOPBACK=1 \
             (or pass --dev-loopback) to serve the in-memory relay"
        );
    };

    let registry = Arc::new(lightning_registry());
    let pool = SessionPool::new(transport, registry, config.pool_config());
    let _stats = pool.spawn_stats_reporter(Arc::new(GaugeStats));

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        pool: pool.clone(),
        auth_token: config.auth_token.clone(),
        unsafe_log: config.unsafe_log,
    };

    let api_routes = Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    let app = Router::new()
        .merge(api_routes)
        .merge(metrics_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("lndockd listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    pool.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

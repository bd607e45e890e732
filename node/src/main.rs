// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # ArcadePay Node
//!
//! Entry point for the `arcadepay-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the ledger and serves the HTTP API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     start the node
//! - `sign`    compute a machine claim signature (for controller tooling)
//! - `version` print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use arcadepay_ledger::{
    DemoPaymentVerifier, LedgerDb, MachineSecret, PaymentVerifier, RejectingPaymentVerifier,
    ReservationService, SignatureVerifier,
};

use cli::{ArcadePayCli, Commands, PaymentMode};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ArcadePayCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Sign(args) => sign_claim(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: ledger, API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format)?;

    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        payment_mode = ?args.payment_mode,
        "starting arcadepay-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("ledger");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = LedgerDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Claim signatures ---
    let secret = MachineSecret::new(&args.machine_secret).context("invalid MACHINE_SECRET")?;
    let signatures = SignatureVerifier::new(secret);

    // --- Payments ---
    let payments: Arc<dyn PaymentVerifier> = match args.payment_mode {
        PaymentMode::Demo => {
            tracing::warn!("demo payment mode accepts a fixed proof; do not use in production");
            Arc::new(DemoPaymentVerifier)
        }
        PaymentMode::Reject => Arc::new(RejectingPaymentVerifier),
    };

    if args.enable_debug_grants {
        tracing::warn!("debug token grants are enabled; do not use in production");
    }

    // --- Ledger service ---
    let service = ReservationService::new(&db, signatures)
        .with_payment_verifier(payments)
        .with_payment_timeout(args.payment_timeout());
    service
        .machines()
        .seed_default()
        .context("failed to seed default machine")?;
    tracing::info!(
        wallets = db.wallet_count(),
        transactions = db.transaction_count(),
        machines = db.machine_count(),
        payment_provider = service.payment_provider(),
        "ledger ready"
    );

    // --- Metrics ---
    let node_metrics =
        Arc::new(NodeMetrics::new().context("failed to register prometheus metrics")?);

    // --- Application state ---
    let app_state = api::AppState {
        service,
        metrics: Arc::clone(&node_metrics),
        debug_grants: args.enable_debug_grants,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    db.flush().context("failed to flush ledger on shutdown")?;
    tracing::info!("arcadepay-node stopped");
    Ok(())
}

/// Prints the `X-Machine-Signature` value for a claim.
fn sign_claim(args: cli::SignArgs) -> Result<()> {
    let secret = MachineSecret::new(&args.machine_secret).context("invalid MACHINE_SECRET")?;
    let signature = SignatureVerifier::new(secret).sign(
        &args.machine_id,
        &args.user_id,
        args.tokens,
        &args.transaction_id,
    );
    println!("{}", signature);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("arcadepay-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc          {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed the error is logged and that branch never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

//! # CLI Interface
//!
//! Defines the command-line argument structure for `arcadepay-node` using
//! `clap` derive. Supports three subcommands: `run`, `sign`, and `version`.
//!
//! Every `run` option can also come from the environment, which is how the
//! node is configured when deployed as a container.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogFormat;

/// ArcadePay backend node.
///
/// The backend of record for arcade tokens. Serves the app and machine
/// HTTP API over an embedded ledger and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "arcadepay-node",
    about = "ArcadePay token ledger node",
    version,
    propagate_version = true
)]
pub struct ArcadePayCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Compute the signature a machine controller sends with a claim.
    Sign(SignArgs),
    /// Print version information and exit.
    Version,
}

/// Which payment verifier the node trusts for purchases.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMode {
    /// Accept the proof "demo". Insecure; local development only.
    Demo,
    /// Refuse every purchase.
    Reject,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the ledger database. Created on first run.
    #[arg(long, short = 'd', env = "ARCADEPAY_DATA_DIR", default_value = "./arcadepay-data")]
    pub data_dir: PathBuf,

    /// Port for the app and machine HTTP API.
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "ARCADEPAY_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Secret shared with every machine controller, used to sign claims.
    #[arg(long, env = "MACHINE_SECRET", hide_env_values = true)]
    pub machine_secret: String,

    /// Payment verifier for purchases.
    #[arg(long, env = "ARCADEPAY_PAYMENT_MODE", value_enum, default_value_t = PaymentMode::Reject)]
    pub payment_mode: PaymentMode,

    /// Seconds to wait for the payment verifier before rejecting.
    #[arg(long, env = "ARCADEPAY_PAYMENT_TIMEOUT_SECS", default_value_t = 10)]
    pub payment_timeout_secs: u64,

    /// Serve POST /api/debug/give-tokens. Never enable in production.
    #[arg(long, env = "ARCADEPAY_ENABLE_DEBUG_GRANTS")]
    pub enable_debug_grants: bool,

    /// Log output format.
    #[arg(long, env = "ARCADEPAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RunArgs {
    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs)
    }
}

/// Arguments for the `sign` subcommand.
#[derive(Parser, Debug)]
pub struct SignArgs {
    /// Shared machine secret.
    #[arg(long, env = "MACHINE_SECRET", hide_env_values = true)]
    pub machine_secret: String,

    #[arg(long)]
    pub machine_id: String,

    #[arg(long)]
    pub user_id: String,

    #[arg(long)]
    pub tokens: u64,

    #[arg(long)]
    pub transaction_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        ArcadePayCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = ArcadePayCli::try_parse_from([
            "arcadepay-node",
            "run",
            "--machine-secret",
            "s3cret",
            "--port",
            "5000",
            "--payment-mode",
            "reject",
        ])
        .expect("should parse");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.machine_secret, "s3cret");
        assert_eq!(args.port, 5000);
        assert_eq!(args.payment_mode, PaymentMode::Reject);
        assert_eq!(args.payment_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn run_accepts_demo_payments_and_json_logs() {
        let cli = ArcadePayCli::try_parse_from([
            "arcadepay-node",
            "run",
            "--machine-secret",
            "s",
            "--payment-mode",
            "demo",
            "--log-format",
            "json",
            "--enable-debug-grants",
        ])
        .expect("should parse");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.payment_mode, PaymentMode::Demo);
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(args.enable_debug_grants);
    }

    #[test]
    fn sign_requires_claim_fields() {
        let result = ArcadePayCli::try_parse_from([
            "arcadepay-node",
            "sign",
            "--machine-secret",
            "s",
            "--machine-id",
            "M001",
        ]);
        assert!(result.is_err());
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{FailMode, TurnstileConfig};
use turnstile::ratelimit::{build_backend, LimiterSettings, RateLimiter};

/// Issue a burst of admission checks for one key and report each decision.
///
/// Remote backend credentials are read from the configuration file or from
/// `TURNSTILE__BACKEND__URL`, never from the command line.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version)]
struct Args {
    /// YAML or TOML configuration file, layered under TURNSTILE__* variables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Client key to check, typically an address
    #[arg(long, default_value = "127.0.0.1")]
    key: String,

    /// Number of admission checks to issue
    #[arg(long, default_value_t = 10)]
    requests: usize,

    /// Checks in flight at once
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Override `limiter.max_requests`
    #[arg(long)]
    max_requests: Option<u64>,

    /// Override `limiter.window_ms`
    #[arg(long)]
    window_ms: Option<u64>,

    /// Override `on_backend_error`
    #[arg(long, value_enum)]
    on_backend_error: Option<FailMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(max_requests) = args.max_requests {
        config.limiter.max_requests = max_requests;
    }
    if let Some(window_ms) = args.window_ms {
        config.limiter.window_ms = window_ms;
    }
    if let Some(fail_mode) = args.on_backend_error {
        config.on_backend_error = fail_mode;
    }

    let settings = LimiterSettings::try_from(&config.limiter)?;
    info!(
        max_requests = settings.max_requests(),
        window = ?settings.window(),
        backend = ?config.backend,
        "Configuration loaded"
    );

    let backend = build_backend(&config.backend).await?;
    let limiter = Arc::new(RateLimiter::new(backend, settings));
    let fail_mode = config.on_backend_error;

    let mut allowed = 0usize;
    let mut issued = 0usize;
    while issued < args.requests {
        let batch = args.concurrency.max(1).min(args.requests - issued);
        let checks = (0..batch).map(|_| {
            let limiter = Arc::clone(&limiter);
            let key = args.key.clone();
            async move { limiter.is_allowed(&key).await }
        });

        for outcome in join_all(checks).await {
            issued += 1;
            let admitted = fail_mode.resolve(outcome);
            if admitted {
                allowed += 1;
            }
            println!(
                "request {issued:>4} key={} {}",
                args.key,
                if admitted { "allowed" } else { "rejected" }
            );
        }
    }

    println!(
        "{allowed} allowed, {} rejected out of {issued}",
        issued - allowed
    );
    Ok(())
}

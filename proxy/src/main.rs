mod api;
mod config;
mod error;
mod server;
mod socks5;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "traffic-proxy")]
#[command(about = "SOCKS5 proxy with per-client and global traffic limits", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "proxy.toml")]
    config: String,

    /// Proxy listen address
    #[arg(long, env = "PROXY_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Admin API listen address
    #[arg(long, env = "PROXY_API_ADDR")]
    api_addr: Option<String>,

    /// Bytes a single client may read, or write
    #[arg(long, env = "PROXY_USER_LIMIT")]
    user_limit: Option<u64>,

    /// Bytes all clients together may transfer
    #[arg(long, env = "PROXY_GLOBAL_LIMIT")]
    global_limit: Option<u64>,

    /// Seconds between usage reports
    #[arg(long, env = "PROXY_REPORT_PERIOD_SECS")]
    report_period_secs: Option<u64>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = config::ProxyConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    // Override with command line arguments
    if let Some(listen_addr) = args.listen_addr {
        cfg.listen_addr = listen_addr;
    }
    if let Some(api_addr) = args.api_addr {
        cfg.api_addr = Some(api_addr);
    }
    if let Some(user_limit) = args.user_limit {
        cfg.user_limit = user_limit;
    }
    if let Some(global_limit) = args.global_limit {
        cfg.global_limit = global_limit;
    }
    if let Some(report_period_secs) = args.report_period_secs {
        cfg.report_period_secs = report_period_secs;
    }
    if let Some(log_level) = args.log_level {
        cfg.log_level = log_level;
    }
    cfg.validate()?;

    let _guard = meter::init_tracing(cfg.log_dir.as_deref(), "traffic-proxy.log", &cfg.log_level);

    info!("Starting proxy with configuration: {:?}", cfg);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    shutdown.cancel();
                }
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        });
    }

    server::ProxyServer::new(cfg)
        .run(shutdown)
        .await
        .context("Proxy server failed")?;

    info!("Shutting down proxy");
    Ok(())
}

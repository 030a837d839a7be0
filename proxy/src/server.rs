use crate::api::ApiServer;
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::socks5::{self, Socks5RuleFailure};
use meter::{Acceptor, MeteringListener, TrafficMeter, UsageReporter};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    meter: Arc<TrafficMeter>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        let meter = TrafficMeter::new(config.meter_config()).with_rejection_reply(Socks5RuleFailure);
        Self {
            config: Arc::new(config),
            meter: Arc::new(meter),
        }
    }

    /// Serves until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let listener = MeteringListener::new(listener, self.meter.clone());
        info!("Proxy server listening on {}", listener.local_addr()?);

        let reporter = UsageReporter::new(self.meter.clone(), shutdown.clone())?;
        let reporter_handle = tokio::spawn(reporter.run());

        let api_handle = self.config.api_addr.clone().map(|api_addr| {
            let api_server = ApiServer::new(api_addr, self.meter.clone());
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = api_server.run(shutdown).await {
                    error!("API server error: {}", e);
                }
            })
        });

        serve(listener, shutdown.clone()).await;

        // Stops the reporter and the API server if the accept loop ended first.
        shutdown.cancel();
        if let Err(e) = reporter_handle.await {
            error!("Usage reporter task failed: {}", e);
        }
        if let Some(api_handle) = api_handle {
            let _ = api_handle.await;
        }

        info!(
            "Proxy server stopped, total traffic {} bytes",
            self.meter.global_traffic()
        );
        Ok(())
    }
}

/// Accept loop: one SOCKS5 session task per connection.
///
/// Accept errors are logged and the loop keeps going.
pub async fn serve<A: Acceptor>(listener: A, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stopped accepting connections");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        tokio::spawn(async move {
                            if let Err(e) = socks5::handle_connection(stream).await {
                                warn!("Connection from {} closed with error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

use crate::error::{MeterError, Result};
use crate::traffic_meter::TrafficMeter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Periodically logs per-client and global usage until cancelled.
pub struct UsageReporter {
    meter: Arc<TrafficMeter>,
    period: Duration,
    shutdown: CancellationToken,
}

impl UsageReporter {
    /// Uses the meter's report period.
    pub fn new(meter: Arc<TrafficMeter>, shutdown: CancellationToken) -> Result<Self> {
        let period = meter.report_period();
        Self::with_period(meter, period, shutdown)
    }

    pub fn with_period(
        meter: Arc<TrafficMeter>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        if period.is_zero() {
            return Err(MeterError::Configuration(
                "report period must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            meter,
            period,
            shutdown,
        })
    }

    /// Runs until the shutdown token is cancelled and returns the number of
    /// reports emitted. The first report is due one full period after start.
    pub async fn run(self) -> u64 {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reports = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Usage reporter shutting down after {} reports", reports);
                    return reports;
                }
                _ = ticker.tick() => {
                    self.report();
                    reports += 1;
                }
            }
        }
    }

    pub fn report(&self) {
        let snapshot = self.meter.snapshot();
        for usage in &snapshot.clients {
            info!(
                client = %usage.client,
                read = usage.read,
                written = usage.written,
                "Client {} used {}/{} bytes of traffic",
                usage.client, usage.read, usage.written
            );
        }
        info!(total = snapshot.total, "Total traffic is {} bytes", snapshot.total);
    }
}

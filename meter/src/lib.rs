pub mod config;
pub mod error;
pub mod identity;
pub mod listener;
pub mod policy;
pub mod reporter;
pub mod stream;
pub mod traffic_meter;
pub mod usage;

pub use config::MeterConfig;
pub use error::{MeterError, Result};
pub use identity::ClientIdentity;
pub use listener::{Acceptor, MeteringListener};
pub use policy::{Decision, Limits, ThresholdPolicy};
pub use reporter::UsageReporter;
pub use stream::{RejectionReply, SilentRejection, TrackingStream};
pub use traffic_meter::TrafficMeter;
pub use usage::{ClientUsage, UsageRecord, UsageSnapshot, UsageTable};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `log_level`. When `log_dir` is given the
/// output goes to a daily rolling file and the returned guard must be kept
/// alive for the lifetime of the process.
pub fn init_tracing(log_dir: Option<&str>, log_file: &str, log_level: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if let Some(log_dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(log_dir, log_file);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_ansi(false),
            )
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_ansi(true),
            )
            .init();
        None
    }
}

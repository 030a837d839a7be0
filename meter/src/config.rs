use std::time::Duration;

/// 2 MiB.
pub const DEFAULT_USER_LIMIT: u64 = 2 << 20;
/// 5 MiB.
pub const DEFAULT_GLOBAL_LIMIT: u64 = 5 << 20;
pub const DEFAULT_REPORT_PERIOD: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterConfig {
    /// Maximum cumulative bytes read, or written, by a single client.
    pub user_limit: u64,
    /// Maximum cumulative bytes transferred across all clients.
    pub global_limit: u64,
    pub report_period: Duration,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            user_limit: DEFAULT_USER_LIMIT,
            global_limit: DEFAULT_GLOBAL_LIMIT,
            report_period: DEFAULT_REPORT_PERIOD,
        }
    }
}

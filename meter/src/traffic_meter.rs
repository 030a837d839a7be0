use crate::config::MeterConfig;
use crate::error::MeterError;
use crate::identity::ClientIdentity;
use crate::policy::{Decision, Limits, ThresholdPolicy};
use crate::stream::{RejectionReply, SilentRejection, TrackingStream};
use crate::usage::{UsageRecord, UsageSnapshot, UsageTable};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Shared accounting state for every metered connection.
///
/// Limits and the report period are set through `&mut self` methods, so they
/// can only change before the meter is shared behind an `Arc`.
pub struct TrafficMeter {
    usage: UsageTable,
    policy: ThresholdPolicy,
    report_period: Duration,
    rejection: Arc<dyn RejectionReply>,
}

impl TrafficMeter {
    pub fn new(config: MeterConfig) -> Self {
        info!(
            "Traffic meter running with settings: user_limit={} global_limit={} report_period={:?}",
            config.user_limit, config.global_limit, config.report_period
        );
        Self {
            usage: UsageTable::new(),
            policy: ThresholdPolicy::new(Limits::from(&config)),
            report_period: config.report_period,
            rejection: Arc::new(SilentRejection),
        }
    }

    /// Sets the reply written to a peer whose read is rejected.
    pub fn with_rejection_reply<R: RejectionReply>(mut self, reply: R) -> Self {
        self.rejection = Arc::new(reply);
        self
    }

    pub fn set_user_limit(&mut self, limit: u64) {
        debug!("User limit set to {} bytes", limit);
        self.policy.limits_mut().user_limit = limit;
    }

    pub fn set_global_limit(&mut self, limit: u64) {
        debug!("Global limit set to {} bytes", limit);
        self.policy.limits_mut().global_limit = limit;
    }

    pub fn set_report_period(&mut self, period: Duration) {
        debug!("Report period set to {:?}", period);
        self.report_period = period;
    }

    pub fn limits(&self) -> Limits {
        self.policy.limits()
    }

    pub fn report_period(&self) -> Duration {
        self.report_period
    }

    pub fn usage(&self) -> &UsageTable {
        &self.usage
    }

    pub fn global_traffic(&self) -> u64 {
        self.usage.global_total()
    }

    /// Usage of a client, looked up by bare host or by `host:port`.
    pub fn traffic_for(&self, client: &str) -> Option<UsageRecord> {
        let identity = ClientIdentity::parse(client);
        self.usage.usage(identity.as_str())
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    pub fn admit(&self, client: &ClientIdentity) -> Decision {
        let (record, total) = self.usage.view(client.as_str());
        self.policy.admit(record, total)
    }

    pub(crate) fn rejection_error(
        &self,
        decision: Decision,
        client: &ClientIdentity,
    ) -> Option<MeterError> {
        self.policy.rejection(decision, client)
    }

    pub(crate) fn rejection_frame(&self, error: &MeterError) -> Bytes {
        self.rejection.frame(error)
    }

    /// Wraps a stream so that its traffic is charged to `client`.
    pub fn track<S>(self: &Arc<Self>, stream: S, client: ClientIdentity) -> TrackingStream<S> {
        TrackingStream::new(stream, client, self.clone())
    }
}

impl Default for TrafficMeter {
    fn default() -> Self {
        Self::new(MeterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_update_limits_before_sharing() {
        let mut meter = TrafficMeter::default();
        meter.set_user_limit(7000);
        meter.set_global_limit(9000);
        meter.set_report_period(Duration::from_secs(1));

        assert_eq!(
            meter.limits(),
            Limits {
                user_limit: 7000,
                global_limit: 9000
            }
        );
        assert_eq!(meter.report_period(), Duration::from_secs(1));
    }

    #[test]
    fn traffic_for_accepts_host_and_port() {
        let meter = TrafficMeter::default();
        meter
            .usage()
            .record_read(&ClientIdentity::parse("10.0.0.1"), 10);

        assert_eq!(meter.traffic_for("10.0.0.1:5555").unwrap().read, 10);
        assert_eq!(meter.traffic_for("10.0.0.1").unwrap().read, 10);
        assert!(meter.traffic_for("10.0.0.2").is_none());
        assert_eq!(meter.global_traffic(), 10);
    }

    #[test]
    fn admit_uses_current_usage() {
        let mut meter = TrafficMeter::default();
        meter.set_user_limit(100);
        let client = ClientIdentity::parse("10.0.0.1");

        assert_eq!(meter.admit(&client), Decision::Allow);
        meter.usage().record_write(&client, 100);
        assert_eq!(meter.admit(&client), Decision::RejectUser);
    }

    #[test]
    fn two_clients_under_large_limits() {
        let mut meter = TrafficMeter::default();
        meter.set_global_limit(5000 << 20);
        meter.set_user_limit(2 << 20);
        let a = ClientIdentity::parse("10.0.0.1");
        let b = ClientIdentity::parse("10.0.0.2");

        assert_eq!(meter.admit(&a), Decision::Allow);
        meter.usage().record_read(&a, 1000);
        assert_eq!(meter.admit(&b), Decision::Allow);
        meter.usage().record_read(&b, 1000);

        assert_eq!(meter.global_traffic(), 2000);
        assert_eq!(meter.traffic_for("10.0.0.1").unwrap().total(), 1000);
        assert_eq!(meter.traffic_for("10.0.0.2").unwrap().total(), 1000);
    }
}

use crate::config::MeterConfig;
use crate::error::MeterError;
use crate::identity::ClientIdentity;
use crate::usage::UsageRecord;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RejectUser,
    RejectGlobal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub user_limit: u64,
    pub global_limit: u64,
}

impl From<&MeterConfig> for Limits {
    fn from(config: &MeterConfig) -> Self {
        Self {
            user_limit: config.user_limit,
            global_limit: config.global_limit,
        }
    }
}

/// Decides whether the next read of a client may proceed.
///
/// A limit is the maximum permitted cumulative usage: reaching it trips the
/// check. The per-user check runs first and wins when both limits are hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPolicy {
    limits: Limits,
}

impl ThresholdPolicy {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub(crate) fn limits_mut(&mut self) -> &mut Limits {
        &mut self.limits
    }

    pub fn admit(&self, usage: Option<UsageRecord>, global_total: u64) -> Decision {
        let usage = usage.unwrap_or_default();
        if usage.read >= self.limits.user_limit || usage.written >= self.limits.user_limit {
            Decision::RejectUser
        } else if global_total >= self.limits.global_limit {
            Decision::RejectGlobal
        } else {
            Decision::Allow
        }
    }

    /// Error describing a rejecting decision, `None` for [`Decision::Allow`].
    pub fn rejection(&self, decision: Decision, client: &ClientIdentity) -> Option<MeterError> {
        match decision {
            Decision::Allow => None,
            Decision::RejectUser => Some(MeterError::UserLimitExceeded {
                client: client.clone(),
                limit: self.limits.user_limit,
            }),
            Decision::RejectGlobal => Some(MeterError::GlobalLimitExceeded {
                limit: self.limits.global_limit,
            }),
        }
    }
}

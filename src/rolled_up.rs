//! System-wide health from many components
//!
//! Members are split into critical and noncritical groups when the rollup is
//! built. A noncritical member that is not `Up` can only degrade the system;
//! a critical member passes its own status through if it is worse.

use crate::status::{Monitorable, Status};
use std::fmt;
use std::sync::Arc;

/// Aggregated status of a fixed set of members
#[derive(Clone, Default)]
pub struct RolledUpStatus {
    critical: Vec<Arc<dyn Monitorable>>,
    noncritical: Vec<Arc<dyn Monitorable>>,
}

impl RolledUpStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member whose status passes through to the rollup
    #[must_use]
    pub fn with_critical(mut self, member: Arc<dyn Monitorable>) -> Self {
        self.critical.push(member);
        self
    }

    /// Add a member that can at most degrade the rollup
    #[must_use]
    pub fn with_noncritical(mut self, member: Arc<dyn Monitorable>) -> Self {
        self.noncritical.push(member);
        self
    }

    pub fn critical(&self) -> &[Arc<dyn Monitorable>] {
        &self.critical
    }

    pub fn noncritical(&self) -> &[Arc<dyn Monitorable>] {
        &self.noncritical
    }
}

impl Monitorable for RolledUpStatus {
    fn status(&self) -> Status {
        let mut result = Status::Up;

        if self.noncritical.iter().any(|m| m.status() != Status::Up) {
            result = Status::Degraded;
        }

        for member in &self.critical {
            let status = member.status();
            if status.is_worse_than(result) {
                result = status;
            }
        }
        result
    }
}

impl fmt::Debug for RolledUpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RolledUpStatus")
            .field("critical", &self.critical.len())
            .field("noncritical", &self.noncritical.len())
            .finish()
    }
}

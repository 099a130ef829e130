/*!
 * Health status shared by breakers and rollups
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Health of a component, ordered by severity (`Up < Degraded < Down`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Fully operational
    Up,
    /// Working, with reduced capacity or a failing non-critical part
    Degraded,
    /// Not usable
    Down,
}

impl Status {
    /// Traffic-light signal for dashboards
    pub fn signal(&self) -> &'static str {
        match self {
            Status::Up => "GREEN",
            Status::Degraded => "YELLOW",
            Status::Down => "RED",
        }
    }

    /// Check if this status is worse than `other`
    pub fn is_worse_than(&self, other: Status) -> bool {
        *self > other
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Up => write!(f, "UP"),
            Status::Degraded => write!(f, "DEGRADED"),
            Status::Down => write!(f, "DOWN"),
        }
    }
}

/// Anything that can report its own health
pub trait Monitorable: Send + Sync {
    /// Current health
    fn status(&self) -> Status;
}

impl<M: Monitorable + ?Sized> Monitorable for Arc<M> {
    fn status(&self) -> Status {
        (**self).status()
    }
}

impl<M: Monitorable + ?Sized> Monitorable for &M {
    fn status(&self) -> Status {
        (**self).status()
    }
}

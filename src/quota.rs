//! Per-project execution quota.
//!
//! Each project gets a fractional budget of executions that regrows
//! continuously toward the configured per-minute cap. State lives in memory
//! only, so a restart hands every project a full budget again.

use dashmap::DashMap;
use std::time::Instant;
use uuid::Uuid;

#[derive(Clone, Copy)]
struct Budget {
    available: f64,
    stamped_at: Instant,
}

/// Tracks how much of its per-minute execution budget each project has left.
pub struct ExecutionQuota {
    budgets: DashMap<Uuid, Budget>,
}

impl ExecutionQuota {
    pub fn new() -> Self {
        Self {
            budgets: DashMap::new(),
        }
    }

    /// Charge one execution to `project_id` under a cap of
    /// `limit_per_minute`. Returns false when the project has no budget left;
    /// a rejected call is not charged.
    pub fn check_and_consume(&self, project_id: Uuid, limit_per_minute: u64) -> bool {
        let cap = limit_per_minute as f64;
        let now = Instant::now();
        let mut entry = self.budgets.entry(project_id).or_insert(Budget {
            available: cap,
            stamped_at: now,
        });

        let regained = now.duration_since(entry.stamped_at).as_secs_f64() * cap / 60.0;
        entry.available = f64::min(entry.available + regained, cap);
        entry.stamped_at = now;

        if entry.available < 1.0 {
            return false;
        }
        entry.available -= 1.0;
        true
    }
}

impl Default for ExecutionQuota {
    fn default() -> Self {
        Self::new()
    }
}

//! Waiting for the runner agent to flag itself ready.
//!
//! The startup script flips an instance label once the agent is registered.
//! This module polls that label at a fixed interval over a fixed budget.

use anyhow::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const READY_LABEL: &str = "gh_ready";
pub const READY_VALUE: &str = "1";
pub const NOT_READY_VALUE: &str = "0";

pub type Labels = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub label: String,
    pub ready_value: String,
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        ReadinessPolicy {
            label: READY_LABEL.to_string(),
            ready_value: READY_VALUE.to_string(),
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(1),
        }
    }
}

impl ReadinessPolicy {
    pub fn is_ready(&self, labels: &Labels) -> bool {
        labels.get(&self.label).is_some_and(|v| *v == self.ready_value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32, elapsed: Duration },
    TimedOut { attempts: u32, elapsed: Duration },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Poll `check` until the policy's label carries the ready value or the
/// timeout elapses. `on_pending` is called with the attempt number after each
/// check that found the instance not ready yet. A failed check ends the wait.
///
/// Blocks the calling thread: checks are synchronous `gcloud` invocations.
pub fn wait_for_label<P, N>(policy: &ReadinessPolicy, mut check: P, mut on_pending: N) -> Result<Readiness>
where
    P: FnMut() -> Result<Labels>,
    N: FnMut(u32),
{
    let start = Instant::now();
    let mut attempts = 0;

    while start.elapsed() < policy.timeout {
        attempts += 1;
        let labels = check()?;
        if policy.is_ready(&labels) {
            return Ok(Readiness::Ready { attempts, elapsed: start.elapsed() });
        }
        on_pending(attempts);
        std::thread::sleep(policy.interval);
    }

    Ok(Readiness::TimedOut { attempts, elapsed: start.elapsed() })
}

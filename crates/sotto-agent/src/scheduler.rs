//! Scheduler capability — the one entry point the engine needs from
//! whatever scheduling service surrounds it: queueing the post-restart
//! verification message.

use async_trait::async_trait;

use sotto_core::restart::VerifyJob;

/// Consumed by the agent loop's restart-signal check.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Schedule a one-shot verification message for `job.at_time`.
    async fn schedule_verification(&self, job: VerifyJob) -> anyhow::Result<()>;
}

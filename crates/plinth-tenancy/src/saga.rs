//! Ordered steps with compensating actions.
//!
//! [`run`] applies each step in turn. When one fails, every step that
//! completed before it is compensated in reverse order. Compensation is
//! best-effort: a failing compensation is logged and the rest still run.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::{TenancyError, TenancyResult};

#[async_trait]
pub trait Step<Ctx: Send>: Send + Sync {
    /// Stable identifier used in logs and error reports.
    fn name(&self) -> &'static str;

    /// Whether the step runs at all for this context.
    fn applies(&self, _ctx: &Ctx) -> bool {
        true
    }

    async fn apply(&self, ctx: &mut Ctx) -> TenancyResult<()>;

    /// Undo what [`apply`](Step::apply) did. Must tolerate a partially
    /// applied step.
    async fn compensate(&self, _ctx: &mut Ctx) -> TenancyResult<()> {
        Ok(())
    }
}

/// The step that failed, its cause, and any compensation failures.
#[derive(Debug)]
pub struct SagaFailure {
    pub step: &'static str,
    pub cause: TenancyError,
    /// Every entry is a [`TenancyError::CleanupFailed`].
    pub cleanup_errors: Vec<TenancyError>,
}

impl SagaFailure {
    pub fn cleanup_complete(&self) -> bool {
        self.cleanup_errors.is_empty()
    }
}

/// Run `steps` against `ctx`, each bounded by `step_timeout`.
///
/// Returns the names of the steps that ran (skipped steps excluded).
pub async fn run<Ctx: Send>(
    steps: &[Box<dyn Step<Ctx> + '_>],
    ctx: &mut Ctx,
    step_timeout: Duration,
) -> Result<Vec<&'static str>, SagaFailure> {
    let mut completed: Vec<usize> = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        if !step.applies(ctx) {
            debug!(step = step.name(), "Step skipped");
            continue;
        }

        info!(step = step.name(), "Running step");
        let outcome = tokio::time::timeout(step_timeout, step.apply(ctx)).await;
        let (cause, timed_out) = match outcome {
            Ok(Ok(())) => {
                completed.push(index);
                continue;
            }
            Ok(Err(e)) => (e, false),
            Err(_) => (
                TenancyError::Timeout {
                    operation: step.name().to_string(),
                    secs: step_timeout.as_secs(),
                },
                true,
            ),
        };

        error!(step = step.name(), error = %cause, "Step failed, rolling back");

        // A timed-out step was cut off mid-flight and may have left
        // side effects behind.
        if timed_out {
            completed.push(index);
        }

        let cleanup_errors = rollback(steps, &completed, ctx, step_timeout).await;
        return Err(SagaFailure {
            step: step.name(),
            cause,
            cleanup_errors,
        });
    }

    Ok(completed.into_iter().map(|i| steps[i].name()).collect())
}

async fn rollback<Ctx: Send>(
    steps: &[Box<dyn Step<Ctx> + '_>],
    completed: &[usize],
    ctx: &mut Ctx,
    step_timeout: Duration,
) -> Vec<TenancyError> {
    let mut failures = Vec::new();

    for &index in completed.iter().rev() {
        let step = &steps[index];
        let cause = match tokio::time::timeout(step_timeout, step.compensate(ctx)).await {
            Ok(Ok(())) => {
                debug!(step = step.name(), "Step compensated");
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}s", step_timeout.as_secs()),
        };

        let err = TenancyError::CleanupFailed {
            step: step.name().to_string(),
            cause,
        };
        warn!(step = step.name(), error = %err, "Cleanup failed, continuing rollback");
        failures.push(err);
    }

    failures
}

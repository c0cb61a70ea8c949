//! Per-step retry loop.

use crate::artifact::ArtifactCapture;
use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::executor::StepExecutor;
use crate::model::{ArtifactRef, ErrorDetail, StepDefinition, StepResult, StepStatus};
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

/// Lifecycle of one step across its attempts.
#[derive(Debug)]
enum StepState {
    Pending,
    Attempting(u32),
    Passed(u32),
    Failed { attempts: u32, error: EngineError },
}

/// Retries retryable step failures up to `max_retry_attempts` extra
/// times. Attempts are numbered from 1.
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    max_retry_attempts: u32,
}

impl RetryController {
    pub fn new(max_retry_attempts: u32) -> Self {
        Self { max_retry_attempts }
    }

    /// Total attempts allowed for one step.
    pub fn max_attempts(&self) -> u32 {
        self.max_retry_attempts.saturating_add(1)
    }

    /// Drive `step` to a terminal state and record the outcome.
    pub async fn run_step(
        &self,
        step: &StepDefinition,
        executor: &StepExecutor<'_>,
        capture: &mut ArtifactCapture<'_>,
        cancel: &CancelToken,
    ) -> StepResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut artifacts: Vec<ArtifactRef> = Vec::new();
        let mut state = StepState::Pending;

        let (attempts, error) = loop {
            state = match state {
                StepState::Pending if cancel.is_cancelled() => StepState::Failed {
                    attempts: 0,
                    error: EngineError::Cancelled,
                },
                StepState::Pending => StepState::Attempting(1),
                StepState::Attempting(attempt) => match executor.execute(step).await {
                    Ok(()) => {
                        artifacts.extend(capture.on_step_passed(step, attempt).await);
                        StepState::Passed(attempt)
                    }
                    Err(error) => {
                        let retry = error.is_retryable()
                            && attempt < self.max_attempts()
                            && !cancel.is_cancelled();
                        artifacts.extend(capture.on_attempt_failed(step, attempt, !retry).await);
                        if retry {
                            warn!(
                                "Step {} attempt {}/{} failed, retrying: {}",
                                step.step_id,
                                attempt,
                                self.max_attempts(),
                                error
                            );
                            StepState::Attempting(attempt + 1)
                        } else {
                            StepState::Failed {
                                attempts: attempt,
                                error,
                            }
                        }
                    }
                },
                StepState::Passed(attempts) => break (attempts, None),
                StepState::Failed { attempts, error } => break (attempts, Some(error)),
            };
        };

        artifacts.extend(capture.close_step_segment(step).await);

        let status = if error.is_none() {
            info!("Step {} ({}) passed", step.step_id, step.step_name);
            StepStatus::Passed
        } else {
            StepStatus::Failed
        };
        if let Some(err) = &error {
            warn!(
                "Step {} ({}) failed after {} attempt(s): {}",
                step.step_id, step.step_name, attempts, err
            );
        }

        StepResult {
            step_id: step.step_id,
            step_name: step.step_name.clone(),
            action: step.kind,
            status,
            attempts,
            duration_ms: clock.elapsed().as_millis() as u64,
            artifacts,
            error: error.as_ref().map(ErrorDetail::from),
            started_at,
        }
    }
}

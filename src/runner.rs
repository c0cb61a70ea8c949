//! Scenario selection and execution.

use crate::aggregator::ResultAggregator;
use crate::artifact::{ArtifactCapture, ArtifactStore, CapturePolicy};
use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::driver::{BrowserDriver, DriverFactory};
use crate::error::EngineError;
use crate::executor::StepExecutor;
use crate::loader::ScenarioLoader;
use crate::model::*;
use crate::retry::RetryController;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound for ending a browser session.
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the selected scenarios of one configuration.
#[derive(Clone)]
pub struct RunOrchestrator {
    config: Arc<RunConfig>,
    drivers: Arc<dyn DriverFactory>,
    store: Arc<dyn ArtifactStore>,
    cancel: CancelToken,
    run_id: String,
}

impl RunOrchestrator {
    pub fn new(
        config: Arc<RunConfig>,
        drivers: Arc<dyn DriverFactory>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            drivers,
            store,
            cancel: CancelToken::new(),
            run_id: Utc::now().format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    /// Share an externally owned cancellation token (e.g. Ctrl-C).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Entries with `execute == "y"`, stably ordered by priority.
    pub fn select_scenarios(entries: &[ScenarioEntry]) -> Vec<ScenarioEntry> {
        let mut selected: Vec<ScenarioEntry> =
            entries.iter().filter(|e| e.is_selected()).cloned().collect();
        selected.sort_by_key(|e| e.priority);
        selected
    }

    /// Run every selected scenario and finalize the report. A run
    /// cut short by cancellation still yields the partial report.
    pub async fn run(&self) -> RunReport {
        let framework = &self.config.master.framework_config;
        let selected = Self::select_scenarios(&self.config.master.test_scenarios);
        info!(
            "Running {} of {} configured scenarios (run {})",
            selected.len(),
            self.config.master.test_scenarios.len(),
            self.run_id
        );

        let aggregator = Arc::new(ResultAggregator::new(
            self.run_id.clone(),
            self.config.environment.environment_id.clone(),
        ));
        let deadline = self.arm_run_timeout();

        if framework.parallel_execution && selected.len() > 1 {
            self.run_parallel(selected, &aggregator).await;
        } else {
            self.run_sequential(selected, &aggregator).await;
        }

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!("Run {} was cancelled; reporting partial results", self.run_id);
        }
        aggregator.finalize(cancelled)
    }

    async fn run_sequential(&self, selected: Vec<ScenarioEntry>, aggregator: &ResultAggregator) {
        for (index, entry) in selected.iter().enumerate() {
            if self.cancel.is_cancelled() {
                debug!("Not starting '{}': run cancelled", entry.name);
                break;
            }
            let result = self.run_scenario(entry).await;
            aggregator.append(index, result);
        }
    }

    async fn run_parallel(&self, selected: Vec<ScenarioEntry>, aggregator: &Arc<ResultAggregator>) {
        let workers = self.config.master.framework_config.max_parallel_workers.max(1);
        info!("Parallel execution with up to {workers} workers");

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for (index, entry) in selected.into_iter().enumerate() {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let aggregator = Arc::clone(aggregator);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if this.cancel.is_cancelled() {
                    debug!("Not starting '{}': run cancelled", entry.name);
                    return;
                }
                let result = this.run_scenario(&entry).await;
                aggregator.append(index, result);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!("Scenario task failed: {err}");
            }
        }
    }

    /// Cancel the run once `run_timeout` elapses.
    fn arm_run_timeout(&self) -> Option<tokio::task::JoinHandle<()>> {
        let limit = run_time_limit(self.config.master.framework_config.run_timeout)?;
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!("Run timeout of {:.1}s reached, cancelling", limit.as_secs_f64());
            cancel.cancel();
        }))
    }

    /// Load, execute and close one scenario. Never fails: every
    /// problem ends up in the returned result.
    #[instrument(skip_all, fields(scenario = %entry.name))]
    pub async fn run_scenario(&self, entry: &ScenarioEntry) -> ScenarioResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Running scenario: {}", entry.name);

        let loader = ScenarioLoader::new(&self.config.environment);
        let definition = match loader.load(entry) {
            Ok(definition) => definition,
            Err(err) => {
                error!("Failed to load scenario '{}': {err}", entry.name);
                return ScenarioResult::aborted(entry, &err, started_at, clock.elapsed());
            }
        };

        let driver = match self.open_session().await {
            Ok(driver) => driver,
            Err(err) => {
                error!("Failed to open browser session for '{}': {err}", entry.name);
                return ScenarioResult::aborted(entry, &err, started_at, clock.elapsed());
            }
        };

        let (steps, artifacts) = self.execute_steps(&definition, driver.as_ref()).await;

        match tokio::time::timeout(SESSION_CLOSE_TIMEOUT, driver.close()).await {
            Ok(Ok(())) => debug!("Browser session closed"),
            Ok(Err(err)) => warn!("Failed to close browser session: {err}"),
            Err(_) => warn!("Closing browser session timed out"),
        }

        let result = ScenarioResult {
            name: entry.name.clone(),
            scenario_file: entry.scenario_file.clone(),
            status: ScenarioResult::status_of(&steps),
            steps,
            duration_ms: clock.elapsed().as_millis() as u64,
            artifacts,
            error: None,
            started_at,
        };

        if result.passed() {
            info!(
                "Scenario '{}' passed in {}ms",
                result.name, result.duration_ms
            );
        } else {
            warn!(
                "Scenario '{}' failed in {}ms",
                result.name, result.duration_ms
            );
        }
        result
    }

    async fn open_session(&self) -> Result<Box<dyn BrowserDriver>, EngineError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            session = self.drivers.open_session() => session.map_err(EngineError::from),
        }
    }

    /// Run steps strictly in order; after the first failure the
    /// remaining steps are skipped.
    async fn execute_steps(
        &self,
        definition: &ScenarioDefinition,
        driver: &dyn BrowserDriver,
    ) -> (Vec<StepResult>, Vec<ArtifactRef>) {
        let timeouts = self.config.timeouts();
        let policy = CapturePolicy::from_config(&self.config.master);
        let executor = StepExecutor::new(driver, timeouts, &self.cancel);
        let retry = RetryController::new(self.config.master.framework_config.max_retry_attempts);
        let mut capture = ArtifactCapture::new(
            driver,
            self.store.as_ref(),
            &policy,
            &definition.name,
            timeouts.script(),
        );

        capture.start_scenario().await;

        let mut results = Vec::with_capacity(definition.steps.len());
        let mut halted = false;
        for step in &definition.steps {
            if halted {
                results.push(StepResult::skipped(step));
                continue;
            }
            debug!("Executing step {}: {}", step.step_id, step.step_name);
            let result = retry
                .run_step(step, &executor, &mut capture, &self.cancel)
                .await;
            halted = result.status != StepStatus::Passed;
            results.push(result);
        }

        let artifacts = capture.finish_scenario().await;
        (results, artifacts)
    }
}

/// The armed run limit, or `None` for no limit. Limits too large to
/// represent are treated as no limit.
fn run_time_limit(run_timeout: Option<f64>) -> Option<Duration> {
    let seconds = run_timeout?;
    if seconds.is_nan() || seconds <= 0.0 {
        return None;
    }
    match Duration::try_from_secs_f64(seconds) {
        Ok(limit) => Some(limit),
        Err(err) => {
            warn!("Ignoring run_timeout of {seconds}s: {err}");
            None
        }
    }
}

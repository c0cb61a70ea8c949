//! Configuration files, loaded scenario definitions and result
//! records.

use crate::action::{ActionKind, StepAction};
use crate::error::{EngineError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

// ── Master configuration ────────────────────────────────

/// Top-level run configuration (`master_config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub framework_config: FrameworkConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub video_config: VideoConfig,
    /// Ordered run selection.
    pub test_scenarios: Vec<ScenarioEntry>,
}

/// Browser, wait, capture and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    #[serde(default = "default_browser")]
    pub browser: String,
    /// WebDriver implicit wait in seconds. Element lookups are polled
    /// by the engine, so this normally stays at zero.
    #[serde(default)]
    pub implicit_wait: f64,
    /// Element wait in seconds used when no environment profile is
    /// selected.
    #[serde(default = "default_explicit_wait")]
    pub explicit_wait: f64,
    #[serde(default)]
    pub screenshot_on_step: bool,
    #[serde(default = "default_true")]
    pub screenshot_on_failure: bool,
    #[serde(default)]
    pub video_recording: bool,
    #[serde(default)]
    pub parallel_execution: bool,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_max_parallel_workers")]
    pub max_parallel_workers: usize,
    /// Whole-run deadline in seconds.
    #[serde(default)]
    pub run_timeout: Option<f64>,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            browser: default_browser(),
            implicit_wait: 0.0,
            explicit_wait: default_explicit_wait(),
            screenshot_on_step: false,
            screenshot_on_failure: true,
            video_recording: false,
            parallel_execution: false,
            max_retry_attempts: default_max_retry_attempts(),
            max_parallel_workers: default_max_parallel_workers(),
            run_timeout: None,
            webdriver_url: default_webdriver_url(),
        }
    }
}

/// Where reports and artifacts go, and which report formats to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    #[serde(default = "default_report_directory")]
    pub report_directory: PathBuf,
    #[serde(default = "default_screenshot_directory")]
    pub screenshot_directory: PathBuf,
    #[serde(default = "default_video_directory")]
    pub video_directory: PathBuf,
    #[serde(default = "default_true")]
    pub json_reports: bool,
    /// Human-readable document report.
    #[serde(default = "default_true")]
    pub word_reports: bool,
    #[serde(default)]
    pub yaml_reports: bool,
    /// Inline screenshots in the document report instead of linking.
    #[serde(default = "default_true")]
    pub screenshot_embedding: bool,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            report_directory: default_report_directory(),
            screenshot_directory: default_screenshot_directory(),
            video_directory: default_video_directory(),
            json_reports: true,
            word_reports: true,
            yaml_reports: false,
            screenshot_embedding: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_true")]
    pub compression: bool,
    /// Segment the scenario recording at every step boundary.
    #[serde(default)]
    pub step_videos: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            quality: default_quality(),
            compression: true,
            step_videos: false,
        }
    }
}

/// One entry of the run selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioEntry {
    pub name: String,
    pub scenario_file: PathBuf,
    pub test_data_file: PathBuf,
    /// `"y"` or `"n"`.
    pub execute: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

impl ScenarioEntry {
    pub fn is_selected(&self) -> bool {
        self.execute.trim().eq_ignore_ascii_case("y")
    }
}

// ── Environment profile ─────────────────────────────────

/// Per-environment settings, selected once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentProfile {
    #[serde(default = "default_environment_name")]
    pub environment_name: String,
    #[serde(default = "default_environment_name")]
    pub environment_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub timeout_settings: TimeoutSettings,
    #[serde(default)]
    pub browser_settings: BrowserSettings,
    #[serde(default)]
    pub credentials: Map<String, Value>,
    #[serde(default)]
    pub test_data: Map<String, Value>,
    #[serde(default)]
    pub api_endpoints: Map<String, Value>,
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
}

impl Default for EnvironmentProfile {
    fn default() -> Self {
        Self {
            environment_name: default_environment_name(),
            environment_id: default_environment_name(),
            description: String::new(),
            base_url: String::new(),
            timeout_settings: TimeoutSettings::default(),
            browser_settings: BrowserSettings::default(),
            credentials: Map::new(),
            test_data: Map::new(),
            api_endpoints: Map::new(),
            feature_flags: BTreeMap::new(),
        }
    }
}

impl EnvironmentProfile {
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.feature_flags.get(name).copied().unwrap_or(false)
    }
}

/// Bounded waits, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout: f64,
    #[serde(default = "default_element_wait_timeout")]
    pub element_wait_timeout: f64,
    #[serde(default = "default_script_timeout")]
    pub script_timeout: f64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            page_load_timeout: default_page_load_timeout(),
            element_wait_timeout: default_element_wait_timeout(),
            script_timeout: default_script_timeout(),
        }
    }
}

impl TimeoutSettings {
    pub fn page_load(&self) -> Duration {
        secs(self.page_load_timeout)
    }

    pub fn element_wait(&self) -> Duration {
        secs(self.element_wait_timeout)
    }

    pub fn script(&self) -> Duration {
        secs(self.script_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    #[serde(default)]
    pub window_size: WindowSize,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_true")]
    pub incognito: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            window_size: WindowSize::default(),
            headless: false,
            incognito: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

// ── Scenario files ──────────────────────────────────────

/// On-disk scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFile {
    pub scenario_info: ScenarioInfo,
    pub test_steps: Vec<RawStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub expected_duration: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A step as written in the scenario file, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStep {
    pub step_id: u32,
    pub step_name: String,
    pub action: String,
    #[serde(default)]
    pub target: String,
    /// Strings are templates; numbers are accepted for counts.
    #[serde(default)]
    pub value: Value,
    /// Settle delay after the action, in seconds.
    #[serde(default)]
    pub wait_time: f64,
    #[serde(default)]
    pub screenshot: bool,
}

impl RawStep {
    pub fn value_template(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl ScenarioFile {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ── Loaded definitions ──────────────────────────────────

/// A validated scenario with every template resolved.
#[derive(Debug, Clone)]
pub struct ScenarioDefinition {
    pub name: String,
    pub description: String,
    pub url: String,
    pub expected_duration: Option<String>,
    pub tags: BTreeSet<String>,
    pub steps: Vec<StepDefinition>,
}

/// A validated step. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub step_id: u32,
    pub step_name: String,
    pub kind: ActionKind,
    /// Resolved target string as written (`id:login-button`, `url`).
    pub target: String,
    pub value_template: String,
    pub value: String,
    pub action: StepAction,
    pub wait_time: Duration,
    pub screenshot: bool,
}

// ── Results ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EngineError> for ErrorDetail {
    fn from(err: &EngineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Screenshot,
    Video,
}

/// Reference to a stored screenshot or video segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    #[serde(default)]
    pub step_id: Option<u32>,
    #[serde(default)]
    pub attempt: Option<u32>,
    pub captured_at: DateTime<Utc>,
}

/// Outcome of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: u32,
    pub step_name: String,
    pub action: ActionKind,
    pub status: StepStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    pub started_at: DateTime<Utc>,
}

impl StepResult {
    /// Result for a step that never ran.
    pub fn skipped(step: &StepDefinition) -> Self {
        Self {
            step_id: step.step_id,
            step_name: step.step_name.clone(),
            action: step.kind,
            status: StepStatus::Skipped,
            attempts: 0,
            duration_ms: 0,
            artifacts: Vec::new(),
            error: None,
            started_at: Utc::now(),
        }
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub scenario_file: PathBuf,
    pub status: ScenarioStatus,
    pub steps: Vec<StepResult>,
    pub duration_ms: u64,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    pub started_at: DateTime<Utc>,
}

impl ScenarioResult {
    /// Passed iff there is at least one step and every step passed.
    pub fn status_of(steps: &[StepResult]) -> ScenarioStatus {
        if !steps.is_empty() && steps.iter().all(|s| s.status == StepStatus::Passed) {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        }
    }

    /// A scenario that failed before executing any step.
    pub fn aborted(
        entry: &ScenarioEntry,
        error: &EngineError,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            name: entry.name.clone(),
            scenario_file: entry.scenario_file.clone(),
            status: ScenarioStatus::Failed,
            steps: Vec::new(),
            duration_ms: duration.as_millis() as u64,
            artifacts: Vec::new(),
            error: Some(ErrorDetail::from(error)),
            started_at,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// Aggregate numbers for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_scenarios: usize,
    pub passed_scenarios: usize,
    pub failed_scenarios: usize,
    pub total_steps: usize,
    pub passed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub success_rate: f64,
    pub passed: bool,
}

impl RunSummary {
    pub fn from_results(scenarios: &[ScenarioResult], cancelled: bool) -> Self {
        let mut summary = RunSummary {
            total_scenarios: scenarios.len(),
            ..Default::default()
        };
        for scenario in scenarios {
            if scenario.passed() {
                summary.passed_scenarios += 1;
            } else {
                summary.failed_scenarios += 1;
            }
            for step in &scenario.steps {
                summary.total_steps += 1;
                match step.status {
                    StepStatus::Passed => summary.passed_steps += 1,
                    StepStatus::Failed => summary.failed_steps += 1,
                    StepStatus::Skipped => summary.skipped_steps += 1,
                }
            }
        }
        summary.success_rate = if summary.total_scenarios == 0 {
            0.0
        } else {
            let rate = summary.passed_scenarios as f64 / summary.total_scenarios as f64;
            (rate * 10_000.0).round() / 100.0
        };
        summary.passed = !cancelled && summary.failed_scenarios == 0;
        summary
    }
}

/// The finalized aggregate of one engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub environment_id: String,
    pub scenarios: Vec<ScenarioResult>,
    pub summary: RunSummary,
    #[serde(default)]
    pub cancelled: bool,
}

impl RunReport {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn passed(&self) -> bool {
        self.summary.passed
    }

    /// Every artifact referenced anywhere in the report, scenario
    /// by scenario and step by step.
    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        let mut all = Vec::new();
        for scenario in &self.scenarios {
            for step in &scenario.steps {
                all.extend(step.artifacts.iter().cloned());
            }
            all.extend(scenario.artifacts.iter().cloned());
        }
        all
    }
}

// ── Defaults ────────────────────────────────────────────

/// Longest timeout the engine will arm; larger settings saturate.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(u32::MAX as u64);

fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value)
        .map(|d| d.min(MAX_TIMEOUT))
        .unwrap_or(MAX_TIMEOUT)
}

fn default_true() -> bool {
    true
}

fn default_browser() -> String {
    "chrome".to_string()
}

fn default_explicit_wait() -> f64 {
    30.0
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_max_parallel_workers() -> usize {
    4
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_report_directory() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_screenshot_directory() -> PathBuf {
    PathBuf::from("./screenshots")
}

fn default_video_directory() -> PathBuf {
    PathBuf::from("./videos")
}

fn default_fps() -> u32 {
    10
}

fn default_quality() -> String {
    "medium".to_string()
}

fn default_priority() -> i64 {
    999
}

fn default_environment_name() -> String {
    "default".to_string()
}

fn default_page_load_timeout() -> f64 {
    30.0
}

fn default_element_wait_timeout() -> f64 {
    15.0
}

fn default_script_timeout() -> f64 {
    10.0
}

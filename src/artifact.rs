//! Screenshot and video capture around step and scenario
//! boundaries.
//!
//! [`ArtifactCapture`] decides *when* to capture; the bytes are
//! persisted through an [`ArtifactStore`]. A failed capture is
//! logged and never changes a step's outcome.

use crate::driver::{BrowserDriver, DriverResult};
use crate::model::{
    ArtifactKind, ArtifactRef, MasterConfig, ReportingConfig, StepDefinition, VideoConfig,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Why an artifact was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureReason {
    StepPassed,
    StepFailed,
    StepSegment,
    Scenario,
}

/// Identity of a captured artifact.
#[derive(Debug, Clone)]
pub struct ArtifactKey {
    pub kind: ArtifactKind,
    pub reason: CaptureReason,
    pub scenario: String,
    pub step_id: Option<u32>,
    pub attempt: Option<u32>,
    pub captured_at: DateTime<Utc>,
}

impl ArtifactKey {
    /// File name unique per (scenario, step, attempt, timestamp).
    pub fn file_name(&self) -> String {
        let stamp = self.captured_at.format("%H%M%S%3f");
        let scenario = sanitize_filename(&self.scenario);
        match (self.reason, self.step_id) {
            (CaptureReason::StepPassed | CaptureReason::StepFailed, Some(id)) => {
                let outcome = if self.reason == CaptureReason::StepPassed {
                    "passed"
                } else {
                    "failed"
                };
                format!(
                    "step_{id:02}_attempt_{}_{stamp}_{scenario}_{outcome}.png",
                    self.attempt.unwrap_or(1)
                )
            }
            (CaptureReason::StepSegment, Some(id)) => {
                format!("step_{id:02}_{stamp}_{scenario}.gif")
            }
            (_, _) => match self.kind {
                ArtifactKind::Screenshot => format!("scenario_{stamp}_{scenario}.png"),
                ArtifactKind::Video => format!("test_{stamp}_{scenario}.gif"),
            },
        }
    }
}

/// Persists artifact bytes and returns where they went.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<PathBuf>;
}

/// Writes artifacts into per-run session directories.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    screenshot_dir: PathBuf,
    video_dir: PathBuf,
}

impl FsArtifactStore {
    /// Screenshots land in `<screenshot_directory>/session_<stamp>`,
    /// videos in `<video_directory>/session_<stamp>`.
    pub fn new(reporting: &ReportingConfig, session_stamp: &str) -> Self {
        let session = format!("session_{session_stamp}");
        Self {
            screenshot_dir: reporting.screenshot_directory.join(&session),
            video_dir: reporting.video_directory.join(&session),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<PathBuf> {
        let dir = match key.kind {
            ArtifactKind::Screenshot => &self.screenshot_dir,
            ArtifactKind::Video => &self.video_dir,
        };
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create artifact directory {}", dir.display()))?;

        let path = dir.join(key.file_name());
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;
        Ok(path)
    }
}

/// Capture switches derived from the master configuration.
#[derive(Debug, Clone, Default)]
pub struct CapturePolicy {
    pub screenshot_on_step: bool,
    pub screenshot_on_failure: bool,
    pub video_recording: bool,
    pub step_videos: bool,
    pub video: VideoConfig,
}

impl CapturePolicy {
    pub fn from_config(config: &MasterConfig) -> Self {
        let framework = &config.framework_config;
        Self {
            screenshot_on_step: framework.screenshot_on_step,
            screenshot_on_failure: framework.screenshot_on_failure,
            video_recording: framework.video_recording,
            step_videos: framework.video_recording && config.video_config.step_videos,
            video: config.video_config.clone(),
        }
    }
}

/// Per-scenario capture state.
pub struct ArtifactCapture<'a> {
    driver: &'a dyn BrowserDriver,
    store: &'a dyn ArtifactStore,
    policy: &'a CapturePolicy,
    scenario: &'a str,
    limit: Duration,
    recording: bool,
}

impl<'a> ArtifactCapture<'a> {
    /// `limit` bounds every driver call made for capture.
    pub fn new(
        driver: &'a dyn BrowserDriver,
        store: &'a dyn ArtifactStore,
        policy: &'a CapturePolicy,
        scenario: &'a str,
        limit: Duration,
    ) -> Self {
        Self {
            driver,
            store,
            policy,
            scenario,
            limit,
            recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Start the scenario recording when video is enabled.
    pub async fn start_scenario(&mut self) {
        if self.policy.video_recording {
            self.start_recording().await;
        }
    }

    /// Screenshot for a passed step whose `screenshot` flag is set
    /// (or when every step is captured).
    pub async fn on_step_passed(
        &self,
        step: &StepDefinition,
        attempt: u32,
    ) -> Option<ArtifactRef> {
        if !(step.screenshot || self.policy.screenshot_on_step) {
            return None;
        }
        self.screenshot(step.step_id, attempt, CaptureReason::StepPassed)
            .await
    }

    /// Screenshot for a failed attempt. `terminal` marks the last
    /// attempt of the step.
    pub async fn on_attempt_failed(
        &self,
        step: &StepDefinition,
        attempt: u32,
        terminal: bool,
    ) -> Option<ArtifactRef> {
        let wanted = self.policy.screenshot_on_failure
            || (terminal && (step.screenshot || self.policy.screenshot_on_step));
        if !wanted {
            return None;
        }
        self.screenshot(step.step_id, attempt, CaptureReason::StepFailed)
            .await
    }

    /// Cut the running recording at the end of `step` and restart
    /// it. Only active with per-step videos.
    pub async fn close_step_segment(&mut self, step: &StepDefinition) -> Option<ArtifactRef> {
        if !(self.recording && self.policy.step_videos) {
            return None;
        }
        let bytes = self.stop_recording().await;
        let artifact = match bytes {
            Some(bytes) => {
                let key = self.key(
                    ArtifactKind::Video,
                    CaptureReason::StepSegment,
                    Some(step.step_id),
                    None,
                );
                self.persist(&key, &bytes).await
            }
            None => None,
        };
        self.start_recording().await;
        artifact
    }

    /// Stop the scenario recording, if any, and store it.
    pub async fn finish_scenario(&mut self) -> Vec<ArtifactRef> {
        if !self.recording {
            return Vec::new();
        }
        let Some(bytes) = self.stop_recording().await else {
            return Vec::new();
        };
        let key = self.key(ArtifactKind::Video, CaptureReason::Scenario, None, None);
        self.persist(&key, &bytes).await.into_iter().collect()
    }

    async fn screenshot(
        &self,
        step_id: u32,
        attempt: u32,
        reason: CaptureReason,
    ) -> Option<ArtifactRef> {
        let bytes = self.call("screenshot", self.driver.screenshot()).await?;
        let key = self.key(ArtifactKind::Screenshot, reason, Some(step_id), Some(attempt));
        self.persist(&key, &bytes).await
    }

    async fn start_recording(&mut self) {
        let started = self
            .call("start video", self.driver.start_video(&self.policy.video))
            .await;
        self.recording = started.is_some();
        if self.recording {
            debug!(scenario = self.scenario, "video recording started");
        }
    }

    async fn stop_recording(&mut self) -> Option<Vec<u8>> {
        self.recording = false;
        let bytes = self.call("stop video", self.driver.stop_video()).await?;
        if bytes.is_empty() {
            debug!(scenario = self.scenario, "driver returned no video data");
            return None;
        }
        Some(bytes)
    }

    fn key(
        &self,
        kind: ArtifactKind,
        reason: CaptureReason,
        step_id: Option<u32>,
        attempt: Option<u32>,
    ) -> ArtifactKey {
        ArtifactKey {
            kind,
            reason,
            scenario: self.scenario.to_string(),
            step_id,
            attempt,
            captured_at: Utc::now(),
        }
    }

    async fn persist(&self, key: &ArtifactKey, bytes: &[u8]) -> Option<ArtifactRef> {
        match self.store.store(key, bytes).await {
            Ok(path) => {
                debug!("Artifact captured: {}", path.display());
                Some(ArtifactRef {
                    kind: key.kind,
                    path,
                    step_id: key.step_id,
                    attempt: key.attempt,
                    captured_at: key.captured_at,
                })
            }
            Err(err) => {
                warn!(scenario = self.scenario, "Failed to store artifact: {err:#}");
                None
            }
        }
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> Option<T>
    where
        F: Future<Output = DriverResult<T>>,
    {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                warn!(scenario = self.scenario, "{what} failed: {err}");
                None
            }
            Err(_) => {
                warn!(scenario = self.scenario, "{what} timed out after {:?}", self.limit);
                None
            }
        }
    }
}

/// Make a scenario name safe for use in a file name.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.') {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    let limited: String = trimmed.chars().take(50).collect();
    if limited.is_empty() {
        "scenario".to_string()
    } else {
        limited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_step, MemoryArtifactStore, MockDriver};

    fn policy() -> CapturePolicy {
        CapturePolicy {
            screenshot_on_failure: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Login / Logout: happy path"), "Login_Logout_happy_path");
        assert_eq!(sanitize_filename("???"), "scenario");
        assert_eq!(sanitize_filename(&"x".repeat(80)).len(), 50);
    }

    #[test]
    fn test_file_names_are_keyed_by_step_and_attempt() {
        let key = ArtifactKey {
            kind: ArtifactKind::Screenshot,
            reason: CaptureReason::StepFailed,
            scenario: "Login Flow".into(),
            step_id: Some(3),
            attempt: Some(2),
            captured_at: Utc::now(),
        };
        let name = key.file_name();
        assert!(name.starts_with("step_03_attempt_2_"), "{name}");
        assert!(name.ends_with("_Login_Flow_failed.png"), "{name}");

        let video = ArtifactKey {
            kind: ArtifactKind::Video,
            reason: CaptureReason::Scenario,
            step_id: None,
            attempt: None,
            ..key
        };
        let name = video.file_name();
        assert!(name.starts_with("test_") && name.ends_with("_Login_Flow.gif"), "{name}");
    }

    #[tokio::test]
    async fn test_flagged_step_is_captured_on_pass() {
        let driver = MockDriver::new();
        let store = MemoryArtifactStore::default();
        let policy = policy();
        let capture = ArtifactCapture::new(&driver, &store, &policy, "Login", Duration::from_secs(1));

        let mut step = sample_step(1);
        assert!(capture.on_step_passed(&step, 1).await.is_none());

        step.screenshot = true;
        let artifact = capture.on_step_passed(&step, 1).await.unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Screenshot);
        assert_eq!(artifact.step_id, Some(1));
        assert_eq!(artifact.attempt, Some(1));
        assert_eq!(store.count(ArtifactKind::Screenshot), 1);
    }

    #[tokio::test]
    async fn test_failure_screenshots_follow_policy() {
        let driver = MockDriver::new();
        let store = MemoryArtifactStore::default();
        let off = CapturePolicy::default();
        let capture = ArtifactCapture::new(&driver, &store, &off, "Login", Duration::from_secs(1));

        let mut step = sample_step(2);
        assert!(capture.on_attempt_failed(&step, 1, false).await.is_none());
        assert!(capture.on_attempt_failed(&step, 1, true).await.is_none());

        // The step flag still yields one capture at the final attempt.
        step.screenshot = true;
        assert!(capture.on_attempt_failed(&step, 1, false).await.is_none());
        assert!(capture.on_attempt_failed(&step, 2, true).await.is_some());
        assert_eq!(store.count(ArtifactKind::Screenshot), 1);
    }

    #[tokio::test]
    async fn test_scenario_video_is_stored_on_finish() {
        let driver = MockDriver::new().with_video(b"VIDEO".to_vec());
        let store = MemoryArtifactStore::default();
        let policy = CapturePolicy {
            video_recording: true,
            ..Default::default()
        };
        let mut capture =
            ArtifactCapture::new(&driver, &store, &policy, "Checkout", Duration::from_secs(1));

        capture.start_scenario().await;
        assert!(capture.is_recording());
        let artifacts = capture.finish_scenario().await;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, ArtifactKind::Video);
        assert!(!capture.is_recording());
    }

    #[tokio::test]
    async fn test_step_segments_restart_recording() {
        let driver = MockDriver::new().with_video(b"SEGMENT".to_vec());
        let store = MemoryArtifactStore::default();
        let policy = CapturePolicy {
            video_recording: true,
            step_videos: true,
            ..Default::default()
        };
        let mut capture =
            ArtifactCapture::new(&driver, &store, &policy, "Checkout", Duration::from_secs(1));

        capture.start_scenario().await;
        let segment = capture.close_step_segment(&sample_step(1)).await.unwrap();
        assert_eq!(segment.step_id, Some(1));
        assert!(capture.is_recording(), "recording resumes after a segment");

        let closing = capture.finish_scenario().await;
        assert_eq!(closing.len(), 1);
        assert_eq!(store.count(ArtifactKind::Video), 2);
    }

    #[tokio::test]
    async fn test_drivers_without_video_produce_nothing() {
        let driver = MockDriver::new();
        let store = MemoryArtifactStore::default();
        let policy = CapturePolicy {
            video_recording: true,
            ..Default::default()
        };
        let mut capture =
            ArtifactCapture::new(&driver, &store, &policy, "Checkout", Duration::from_secs(1));

        capture.start_scenario().await;
        assert!(capture.finish_scenario().await.is_empty());
        assert_eq!(store.count(ArtifactKind::Video), 0);
    }

    #[tokio::test]
    async fn test_fs_store_writes_into_session_dir() {
        let dir = tempfile::tempdir().unwrap();
        let reporting = ReportingConfig {
            screenshot_directory: dir.path().join("shots"),
            video_directory: dir.path().join("videos"),
            ..Default::default()
        };
        let store = FsArtifactStore::new(&reporting, "20260101_120000");
        let key = ArtifactKey {
            kind: ArtifactKind::Screenshot,
            reason: CaptureReason::StepPassed,
            scenario: "Login".into(),
            step_id: Some(1),
            attempt: Some(1),
            captured_at: Utc::now(),
        };

        let path = store.store(&key, b"PNG").await.unwrap();
        assert!(path.starts_with(dir.path().join("shots").join("session_20260101_120000")));
        assert_eq!(std::fs::read(&path).unwrap(), b"PNG");
    }
}

//! In-memory collaborators for unit tests.

use crate::action::{ActionKind, Locator, StepAction};
use crate::artifact::{ArtifactKey, ArtifactStore};
use crate::driver::{BrowserDriver, DriverError, DriverFactory, DriverResult, ElementHandle};
use crate::model::{ArtifactKind, StepDefinition, VideoConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct MockElement {
    text: String,
    displayed: bool,
    count: usize,
    attributes: HashMap<String, String>,
    /// `(value, visible text)` pairs of a `<select>`.
    options: Vec<(String, String)>,
    /// Text that replaces `text` after the given number of reads.
    later_text: Option<(usize, String)>,
}

#[derive(Debug, Clone, Default)]
struct MockState {
    url: String,
    title: String,
    elements: HashMap<String, MockElement>,
    click_navigation: HashMap<String, String>,
    find_failures: HashMap<String, DriverError>,
    navigate_failure: Option<DriverError>,
    navigate_delay: Option<Duration>,
    typed: HashMap<String, String>,
    selected: HashMap<String, String>,
    video: Vec<u8>,
    calls: Vec<String>,
    find_calls: HashMap<String, usize>,
    screenshots: usize,
    closed: bool,
}

/// Scripted browser: a fixed set of elements keyed by locator.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_title(self, title: &str) -> Self {
        self.with_state(|s| s.title = title.to_string())
    }

    pub fn with_element(self, locator: &str, text: &str) -> Self {
        self.with_state(|s| {
            s.elements.insert(
                locator.to_string(),
                MockElement {
                    text: text.to_string(),
                    displayed: true,
                    count: 1,
                    ..Default::default()
                },
            );
        })
    }

    pub fn with_hidden_element(self, locator: &str) -> Self {
        self.with_state(|s| {
            s.elements.insert(
                locator.to_string(),
                MockElement {
                    displayed: false,
                    count: 1,
                    ..Default::default()
                },
            );
        })
    }

    pub fn with_elements(self, locator: &str, count: usize) -> Self {
        self.with_state(|s| {
            s.elements.insert(
                locator.to_string(),
                MockElement {
                    displayed: true,
                    count,
                    ..Default::default()
                },
            );
        })
    }

    /// Set an attribute on an element added earlier.
    pub fn with_attribute(self, locator: &str, name: &str, value: &str) -> Self {
        self.with_state(|s| {
            if let Some(element) = s.elements.get_mut(locator) {
                element.attributes.insert(name.to_string(), value.to_string());
            }
        })
    }

    /// Give an element added earlier `(value, visible text)` options.
    pub fn with_options(self, locator: &str, options: &[(&str, &str)]) -> Self {
        self.with_state(|s| {
            if let Some(element) = s.elements.get_mut(locator) {
                element.options = options
                    .iter()
                    .map(|(value, text)| (value.to_string(), text.to_string()))
                    .collect();
            }
        })
    }

    /// Swap an element's text once it has been read `reads` times.
    pub fn with_text_after(self, locator: &str, reads: usize, text: &str) -> Self {
        self.with_state(|s| {
            if let Some(element) = s.elements.get_mut(locator) {
                element.later_text = Some((reads, text.to_string()));
            }
        })
    }

    pub fn on_click_navigate(self, locator: &str, url: &str) -> Self {
        self.with_state(|s| {
            s.click_navigation
                .insert(locator.to_string(), url.to_string());
        })
    }

    pub fn failing_find(self, locator: &str, err: DriverError) -> Self {
        self.with_state(|s| {
            s.find_failures.insert(locator.to_string(), err);
        })
    }

    pub fn failing_navigation(self, err: DriverError) -> Self {
        self.with_state(|s| s.navigate_failure = Some(err))
    }

    pub fn with_navigate_delay(self, delay: Duration) -> Self {
        self.with_state(|s| s.navigate_delay = Some(delay))
    }

    pub fn with_video(self, bytes: Vec<u8>) -> Self {
        self.with_state(|s| s.video = bytes)
    }

    /// Independent copy with the same script and no recorded calls.
    pub fn fork(&self) -> Self {
        let mut state = self.state.lock().unwrap().clone();
        state.calls.clear();
        state.find_calls.clear();
        state.screenshots = 0;
        MockDriver {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn find_calls(&self, locator: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .find_calls
            .get(locator)
            .copied()
            .unwrap_or(0)
    }

    pub fn screenshots(&self) -> usize {
        self.state.lock().unwrap().screenshots
    }

    pub fn typed(&self, locator: &str) -> Option<String> {
        self.state.lock().unwrap().typed.get(locator).cloned()
    }

    pub fn selected(&self, locator: &str) -> Option<String> {
        self.state.lock().unwrap().selected.get(locator).cloned()
    }

    pub fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.record(format!("navigate {url}"));
        let (delay, failure) = {
            let state = self.state.lock().unwrap();
            (state.navigate_delay, state.navigate_failure.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }
        self.state.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn find(&self, locator: &Locator) -> DriverResult<ElementHandle> {
        let key = locator.to_string();
        let mut state = self.state.lock().unwrap();
        *state.find_calls.entry(key.clone()).or_insert(0) += 1;
        if let Some(err) = state.find_failures.get(&key) {
            return Err(err.clone());
        }
        match state.elements.get(&key) {
            Some(element) if element.count > 0 => Ok(ElementHandle(key)),
            _ => Err(DriverError::NotFound(key)),
        }
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        self.record(format!("click {}", element.id()));
        let mut state = self.state.lock().unwrap();
        if let Some(url) = state.click_navigation.get(element.id()).cloned() {
            state.url = url;
        }
        Ok(())
    }

    async fn double_click(&self, element: &ElementHandle) -> DriverResult<()> {
        self.record(format!("double_click {}", element.id()));
        Ok(())
    }

    async fn context_click(&self, element: &ElementHandle) -> DriverResult<()> {
        self.record(format!("context_click {}", element.id()));
        Ok(())
    }

    async fn hover(&self, element: &ElementHandle) -> DriverResult<()> {
        self.record(format!("hover {}", element.id()));
        Ok(())
    }

    async fn select_option(&self, element: &ElementHandle, option: &str) -> DriverResult<()> {
        self.record(format!("select {}", element.id()));
        let mut state = self.state.lock().unwrap();
        let options = state
            .elements
            .get(element.id())
            .map(|e| e.options.clone())
            .unwrap_or_default();
        let value = options
            .iter()
            .find(|(value, _)| value == option)
            .or_else(|| options.iter().find(|(_, text)| text == option))
            .map(|(value, _)| value.clone())
            .ok_or_else(|| DriverError::NotFound(format!("option '{option}' in {}", element.id())))?;
        state.selected.insert(element.id().to_string(), value);
        Ok(())
    }

    async fn clear(&self, element: &ElementHandle) -> DriverResult<()> {
        self.record(format!("clear {}", element.id()));
        self.state
            .lock()
            .unwrap()
            .typed
            .insert(element.id().to_string(), String::new());
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> DriverResult<()> {
        self.record(format!("type {}", element.id()));
        let mut state = self.state.lock().unwrap();
        state
            .typed
            .entry(element.id().to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn text_of(&self, element: &ElementHandle) -> DriverResult<String> {
        let mut state = self.state.lock().unwrap();
        let element = state
            .elements
            .get_mut(element.id())
            .ok_or_else(|| DriverError::NotFound(element.id().to_string()))?;
        let text = element.text.clone();
        if let Some((reads, later)) = element.later_text.take() {
            if reads <= 1 {
                element.text = later;
            } else {
                element.later_text = Some((reads - 1, later));
            }
        }
        Ok(text)
    }

    async fn is_displayed(&self, element: &ElementHandle) -> DriverResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .elements
            .get(element.id())
            .map(|e| e.displayed)
            .unwrap_or(false))
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> DriverResult<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .elements
            .get(element.id())
            .and_then(|e| e.attributes.get(name).cloned()))
    }

    async fn count(&self, locator: &Locator) -> DriverResult<usize> {
        let state = self.state.lock().unwrap();
        Ok(state
            .elements
            .get(&locator.to_string())
            .map(|e| e.count)
            .unwrap_or(0))
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.url())
    }

    async fn title(&self) -> DriverResult<String> {
        Ok(self.state.lock().unwrap().title.clone())
    }

    async fn refresh(&self) -> DriverResult<()> {
        self.record("refresh".into());
        Ok(())
    }

    async fn back(&self) -> DriverResult<()> {
        self.record("back".into());
        Ok(())
    }

    async fn forward(&self) -> DriverResult<()> {
        self.record("forward".into());
        Ok(())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.state.lock().unwrap().screenshots += 1;
        Ok(b"\x89PNG".to_vec())
    }

    async fn start_video(&self, _settings: &VideoConfig) -> DriverResult<()> {
        self.record("start_video".into());
        Ok(())
    }

    async fn stop_video(&self) -> DriverResult<Vec<u8>> {
        self.record("stop_video".into());
        Ok(self.state.lock().unwrap().video.clone())
    }

    async fn close(&self) -> DriverResult<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out a fresh fork of a template driver per session.
#[derive(Debug, Default)]
pub struct MockFactory {
    template: MockDriver,
    sessions: Mutex<Vec<MockDriver>>,
    refuse: Option<DriverError>,
}

impl MockFactory {
    pub fn new(template: MockDriver) -> Self {
        Self {
            template,
            sessions: Mutex::new(Vec::new()),
            refuse: None,
        }
    }

    pub fn refusing(err: DriverError) -> Self {
        Self {
            refuse: Some(err),
            ..Default::default()
        }
    }

    pub fn sessions(&self) -> Vec<MockDriver> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriverFactory for MockFactory {
    async fn open_session(&self) -> DriverResult<Box<dyn BrowserDriver>> {
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        let driver = self.template.fork();
        self.sessions.lock().unwrap().push(driver.clone());
        Ok(Box::new(driver))
    }
}

/// Keeps artifact keys in memory instead of writing files.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    keys: Mutex<Vec<ArtifactKey>>,
}

impl MemoryArtifactStore {
    pub fn count(&self, kind: ArtifactKind) -> usize {
        self.keys
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.kind == kind)
            .count()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store(&self, key: &ArtifactKey, _bytes: &[u8]) -> anyhow::Result<PathBuf> {
        self.keys.lock().unwrap().push(key.clone());
        Ok(PathBuf::from("memory").join(key.file_name()))
    }
}

/// A click step on `id:button`.
pub fn sample_step(step_id: u32) -> StepDefinition {
    let locator: Locator = "id:button".parse().unwrap();
    StepDefinition {
        step_id,
        step_name: format!("Step {step_id}"),
        kind: ActionKind::Click,
        target: locator.to_string(),
        value_template: String::new(),
        value: String::new(),
        action: StepAction::Click { locator },
        wait_time: Duration::ZERO,
        screenshot: false,
    }
}

/// Build a step with an explicit action.
pub fn step_with(step_id: u32, kind: ActionKind, action: StepAction) -> StepDefinition {
    StepDefinition {
        kind,
        action,
        ..sample_step(step_id)
    }
}

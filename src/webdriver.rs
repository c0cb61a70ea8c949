//! W3C WebDriver client.
//!
//! Speaks the JSON wire protocol of chromedriver, geckodriver or a
//! Selenium server at `framework_config.webdriver_url`. One
//! [`WebDriverClient`] owns one remote session.

use crate::action::{Locator, LocatorStrategy};
use crate::config::RunConfig;
use crate::driver::{BrowserDriver, DriverError, DriverFactory, DriverResult, ElementHandle};
use crate::model::{BrowserSettings, VideoConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Key under which W3C drivers return element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Transport-level ceiling; the engine bounds each call more tightly.
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Frame rate ceiling for screenshot-based recording.
const MAX_VIDEO_FPS: u32 = 30;

/// Frames kept per recording; later frames are dropped.
pub const MAX_VIDEO_FRAMES: usize = 600;

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

/// Opens a new WebDriver session per scenario.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    http: Client,
    endpoint: String,
    capabilities: Value,
    timeouts: Value,
    window: Value,
}

impl WebDriverFactory {
    pub fn new(config: &RunConfig) -> Result<Self> {
        let framework = &config.master.framework_config;
        let env = &config.environment;
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        let millis = |seconds: f64| (seconds.max(0.0) * 1000.0).round() as u64;
        let timeouts = json!({
            "implicit": millis(framework.implicit_wait),
            "pageLoad": millis(env.timeout_settings.page_load_timeout),
            "script": millis(env.timeout_settings.script_timeout),
        });
        let size = env.browser_settings.window_size;

        Ok(Self {
            http,
            endpoint: framework.webdriver_url.trim_end_matches('/').to_string(),
            capabilities: capabilities(&framework.browser, &env.browser_settings),
            timeouts,
            window: json!({ "width": size.width, "height": size.height }),
        })
    }

    async fn configure(&self, client: &WebDriverClient) -> DriverResult<()> {
        client
            .command(Method::POST, "/timeouts", Some(self.timeouts.clone()))
            .await?;
        client
            .command(Method::POST, "/window/rect", Some(self.window.clone()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn open_session(&self) -> DriverResult<Box<dyn BrowserDriver>> {
        let url = format!("{}/session", self.endpoint);
        let body = json!({ "capabilities": { "alwaysMatch": self.capabilities } });
        let value = send(self.http.post(&url).json(&body), &url).await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::fatal(format!("no sessionId in response from {url}")))?
            .to_string();
        info!("Opened WebDriver session {session_id}");

        let client = WebDriverClient {
            http: self.http.clone(),
            session_url: format!("{}/session/{session_id}", self.endpoint),
            session_id,
            recorder: Arc::default(),
        };
        if let Err(err) = self.configure(&client).await {
            if let Err(close_err) = client.close().await {
                warn!(
                    "Failed to close session {} after setup error: {close_err}",
                    client.session_id
                );
            }
            return Err(err);
        }
        Ok(Box::new(client))
    }
}

/// Background screenshot poller backing `start_video`/`stop_video`.
#[derive(Debug)]
struct Recording {
    stop: oneshot::Sender<()>,
    frames: JoinHandle<Vec<Vec<u8>>>,
    fps: u32,
    speed: i32,
}

/// A live WebDriver session.
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: Client,
    session_url: String,
    session_id: String,
    recorder: Arc<Mutex<Option<Recording>>>,
}

impl WebDriverClient {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn recorder(&self) -> MutexGuard<'_, Option<Recording>> {
        self.recorder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> DriverResult<Value> {
        let url = format!("{}{}", self.session_url, path);
        debug!("WebDriver {method} {url}");
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        send(request, &url).await
    }

    async fn get(&self, path: &str) -> DriverResult<Value> {
        self.command(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> DriverResult<Value> {
        self.command(Method::POST, path, Some(body)).await
    }

    async fn get_string(&self, path: &str) -> DriverResult<String> {
        let value = self.get(path).await?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| DriverError::transient(format!("expected a string from {path}, got {value}")))
    }

    /// Run a single-pointer action chain over `element`, then
    /// release all input state.
    async fn pointer_actions(&self, element: &ElementHandle, actions: Vec<Value>) -> DriverResult<()> {
        let mut origin = serde_json::Map::new();
        origin.insert(ELEMENT_KEY.to_string(), Value::String(element.id().to_string()));
        let mut sequence = vec![json!({
            "type": "pointerMove",
            "duration": 0,
            "origin": Value::Object(origin),
            "x": 0,
            "y": 0,
        })];
        sequence.extend(actions);
        let body = json!({
            "actions": [{
                "type": "pointer",
                "id": "mouse",
                "parameters": { "pointerType": "mouse" },
                "actions": sequence,
            }]
        });
        self.post("/actions", body).await?;
        self.command(Method::DELETE, "/actions", None).await.map(|_| ())
    }

    /// Child elements of `element` matching a W3C locator pair.
    async fn children(&self, element: &ElementHandle, using: &str, value: &str) -> DriverResult<Vec<ElementHandle>> {
        let found = self
            .post(
                &format!("/element/{}/elements", element.id()),
                json!({ "using": using, "value": value }),
            )
            .await?;
        Ok(found
            .as_array()
            .map(|items| items.iter().filter_map(element_id).map(ElementHandle).collect())
            .unwrap_or_default())
    }
}

fn click_with(button: u8) -> [Value; 2] {
    [
        json!({ "type": "pointerDown", "button": button }),
        json!({ "type": "pointerUp", "button": button }),
    ]
}

async fn fetch_screenshot(http: &Client, session_url: &str) -> DriverResult<Vec<u8>> {
    let url = format!("{session_url}/screenshot");
    let value = send(http.get(&url), &url).await?;
    let encoded = value
        .as_str()
        .ok_or_else(|| DriverError::transient(format!("expected a string from {url}, got {value}")))?;
    BASE64
        .decode(encoded.trim())
        .map_err(|e| DriverError::transient(format!("invalid screenshot data: {e}")))
}

/// Poll screenshots at `interval` until stopped, the session goes
/// away, or the frame cap is hit.
async fn record_frames(
    http: Client,
    session_url: String,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => match fetch_screenshot(&http, &session_url).await {
                Ok(frame) => {
                    frames.push(frame);
                    if frames.len() >= MAX_VIDEO_FRAMES {
                        warn!("Video reached {MAX_VIDEO_FRAMES} frames, recording stopped");
                        break;
                    }
                }
                Err(err @ DriverError::Fatal { transient: false, .. }) => {
                    warn!("Video recording stopped: {err}");
                    break;
                }
                Err(err) => debug!("Skipping video frame: {err}"),
            },
        }
    }
    frames
}

/// GIF encoder speed for a `video_config.quality` setting.
fn gif_speed(quality: &str) -> i32 {
    match quality.to_ascii_lowercase().as_str() {
        "high" => 1,
        "low" => 30,
        _ => 10,
    }
}

/// Encode PNG frames into a looping GIF. Frames that fail to decode
/// are skipped; no decodable frame yields empty output.
pub fn encode_gif(frames: &[Vec<u8>], fps: u32, speed: i32) -> DriverResult<Vec<u8>> {
    let delay_ms = 1000 / fps.clamp(1, MAX_VIDEO_FPS);
    let mut images = Vec::with_capacity(frames.len());
    for (index, bytes) in frames.iter().enumerate() {
        match image::load_from_memory(bytes) {
            Ok(img) => images.push(img.to_rgba8()),
            Err(err) => warn!("Skipping undecodable video frame {index}: {err}"),
        }
    }
    if images.is_empty() {
        return Ok(Vec::new());
    }

    let encode_err = |e: image::ImageError| DriverError::transient(format!("GIF encoding failed: {e}"));
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, speed);
        encoder.set_repeat(Repeat::Infinite).map_err(encode_err)?;
        for img in images {
            let frame = Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1));
            encoder.encode_frame(frame).map_err(encode_err)?;
        }
    }
    Ok(out)
}

#[async_trait]
impl BrowserDriver for WebDriverClient {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.post("/url", json!({ "url": url })).await.map(|_| ())
    }

    async fn find(&self, locator: &Locator) -> DriverResult<ElementHandle> {
        let (using, value) = wire_locator(locator);
        let found = self
            .post("/element", json!({ "using": using, "value": value }))
            .await
            .map_err(|err| match err {
                DriverError::NotFound(_) => DriverError::NotFound(locator.to_string()),
                other => other,
            })?;
        element_id(&found)
            .map(ElementHandle)
            .ok_or_else(|| DriverError::transient(format!("malformed element reference: {found}")))
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        self.post(&format!("/element/{}/click", element.id()), json!({}))
            .await
            .map(|_| ())
    }

    async fn double_click(&self, element: &ElementHandle) -> DriverResult<()> {
        let mut actions = click_with(0).to_vec();
        actions.extend(click_with(0));
        self.pointer_actions(element, actions).await
    }

    async fn context_click(&self, element: &ElementHandle) -> DriverResult<()> {
        self.pointer_actions(element, click_with(2).to_vec()).await
    }

    async fn hover(&self, element: &ElementHandle) -> DriverResult<()> {
        self.pointer_actions(element, Vec::new()).await
    }

    async fn select_option(&self, element: &ElementHandle, option: &str) -> DriverResult<()> {
        let by_value = format!("option[value=\"{}\"]", css_quote(option));
        let mut options = self.children(element, "css selector", &by_value).await?;
        if options.is_empty() {
            let by_text = format!(".//option[normalize-space(.)={}]", xpath_literal(option));
            options = self.children(element, "xpath", &by_text).await?;
        }
        let Some(choice) = options.first() else {
            return Err(DriverError::NotFound(format!("option '{option}'")));
        };
        self.click(choice).await
    }

    async fn clear(&self, element: &ElementHandle) -> DriverResult<()> {
        self.post(&format!("/element/{}/clear", element.id()), json!({}))
            .await
            .map(|_| ())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> DriverResult<()> {
        self.post(
            &format!("/element/{}/value", element.id()),
            json!({ "text": text }),
        )
        .await
        .map(|_| ())
    }

    async fn text_of(&self, element: &ElementHandle) -> DriverResult<String> {
        self.get_string(&format!("/element/{}/text", element.id()))
            .await
    }

    async fn is_displayed(&self, element: &ElementHandle) -> DriverResult<bool> {
        let value = self
            .get(&format!("/element/{}/displayed", element.id()))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> DriverResult<Option<String>> {
        let value = self
            .get(&format!("/element/{}/attribute/{name}", element.id()))
            .await?;
        Ok(match value {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        })
    }

    async fn count(&self, locator: &Locator) -> DriverResult<usize> {
        let (using, value) = wire_locator(locator);
        let found = self
            .post("/elements", json!({ "using": using, "value": value }))
            .await?;
        Ok(found.as_array().map(Vec::len).unwrap_or(0))
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.get_string("/url").await
    }

    async fn title(&self) -> DriverResult<String> {
        self.get_string("/title").await
    }

    async fn refresh(&self) -> DriverResult<()> {
        self.post("/refresh", json!({})).await.map(|_| ())
    }

    async fn back(&self) -> DriverResult<()> {
        self.post("/back", json!({})).await.map(|_| ())
    }

    async fn forward(&self) -> DriverResult<()> {
        self.post("/forward", json!({})).await.map(|_| ())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        fetch_screenshot(&self.http, &self.session_url).await
    }

    async fn start_video(&self, settings: &VideoConfig) -> DriverResult<()> {
        let fps = settings.fps.clamp(1, MAX_VIDEO_FPS);
        let (stop, stopped) = oneshot::channel();
        let frames = tokio::spawn(record_frames(
            self.http.clone(),
            self.session_url.clone(),
            Duration::from_millis(u64::from(1000 / fps)),
            stopped,
        ));
        let previous = self.recorder().replace(Recording {
            stop,
            frames,
            fps,
            speed: gif_speed(&settings.quality),
        });
        if let Some(previous) = previous {
            warn!("Discarding unfinished recording of session {}", self.session_id);
            previous.frames.abort();
        }
        debug!("Recording session {} at {fps} fps", self.session_id);
        Ok(())
    }

    async fn stop_video(&self) -> DriverResult<Vec<u8>> {
        let Some(recording) = self.recorder().take() else {
            return Ok(Vec::new());
        };
        if recording.stop.send(()).is_err() {
            debug!("Recorder of session {} had already stopped", self.session_id);
        }
        let frames = recording
            .frames
            .await
            .map_err(|e| DriverError::transient(format!("video recorder failed: {e}")))?;
        debug!("Encoding {} video frame(s)", frames.len());
        let (fps, speed) = (recording.fps, recording.speed);
        tokio::task::spawn_blocking(move || encode_gif(&frames, fps, speed))
            .await
            .map_err(|e| DriverError::transient(format!("video encoder failed: {e}")))?
    }

    async fn close(&self) -> DriverResult<()> {
        let recording = self.recorder().take();
        if let Some(recording) = recording {
            recording.frames.abort();
        }
        self.command(Method::DELETE, "", None).await.map(|_| ())?;
        info!("Closed WebDriver session {}", self.session_id);
        Ok(())
    }
}

async fn send(request: reqwest::RequestBuilder, url: &str) -> DriverResult<Value> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let payload: WireResponse = response
        .json()
        .await
        .map_err(|e| DriverError::transient(format!("invalid WebDriver response from {url}: {e}")))?;

    if status.is_success() {
        return Ok(payload.value);
    }
    let err = wire_error(status, payload.value);
    if matches!(err, DriverError::Fatal { transient: true, .. }) {
        warn!("WebDriver error from {url}: {err}");
    }
    Err(err)
}

/// Classify a W3C error response.
fn wire_error(status: StatusCode, value: Value) -> DriverError {
    let Ok(WireError { error, message }) = serde_json::from_value::<WireError>(value) else {
        return DriverError::transient(format!("WebDriver returned {status}"));
    };
    let detail = if message.is_empty() {
        error.clone()
    } else {
        format!("{error}: {message}")
    };
    match error.as_str() {
        "no such element" | "stale element reference" => DriverError::NotFound(detail),
        "timeout" | "script timeout" => DriverError::Timeout(detail),
        "invalid session id" | "session not created" | "no such window" => {
            DriverError::fatal(detail)
        }
        _ => DriverError::transient(detail),
    }
}

fn transport_error(err: reqwest::Error) -> DriverError {
    if err.is_timeout() {
        DriverError::Timeout(err.to_string())
    } else if err.is_connect() {
        DriverError::fatal(format!("cannot reach WebDriver: {err}"))
    } else {
        DriverError::transient(err.to_string())
    }
}

fn element_id(value: &Value) -> Option<String> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get("ELEMENT"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Map a locator onto a W3C `(using, value)` pair. Id, class and
/// name become CSS selectors.
pub fn wire_locator(locator: &Locator) -> (&'static str, String) {
    let value = locator.value.as_str();
    match locator.strategy {
        LocatorStrategy::Id => ("css selector", format!("[id=\"{}\"]", css_quote(value))),
        LocatorStrategy::Class => {
            let classes: Vec<&str> = value.split_whitespace().collect();
            ("css selector", format!(".{}", classes.join(".")))
        }
        LocatorStrategy::Name => ("css selector", format!("[name=\"{}\"]", css_quote(value))),
        LocatorStrategy::Css => ("css selector", value.to_string()),
        LocatorStrategy::Tag => ("tag name", value.to_string()),
        LocatorStrategy::Xpath => ("xpath", value.to_string()),
        LocatorStrategy::LinkText => ("link text", value.to_string()),
        LocatorStrategy::PartialLinkText => ("partial link text", value.to_string()),
    }
}

fn css_quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Quote `value` as an XPath 1.0 string literal.
fn xpath_literal(value: &str) -> String {
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let parts: Vec<String> = value.split('"').map(|part| format!("\"{part}\"")).collect();
    format!("concat({})", parts.join(", '\"', "))
}

/// `alwaysMatch` capabilities for the configured browser.
pub fn capabilities(browser: &str, settings: &BrowserSettings) -> Value {
    let size = settings.window_size;
    match browser.to_ascii_lowercase().as_str() {
        "firefox" => {
            let mut args = Vec::new();
            if settings.headless {
                args.push("-headless".to_string());
            }
            if settings.incognito {
                args.push("-private".to_string());
            }
            json!({ "browserName": "firefox", "moz:firefoxOptions": { "args": args } })
        }
        other => {
            let mut args = vec![format!("--window-size={},{}", size.width, size.height)];
            if settings.headless {
                args.push("--headless=new".to_string());
            }
            if settings.incognito {
                args.push(if other == "edge" { "--inprivate" } else { "--incognito" }.to_string());
            }
            if other == "edge" {
                json!({ "browserName": "MicrosoftEdge", "ms:edgeOptions": { "args": args } })
            } else {
                json!({ "browserName": "chrome", "goog:chromeOptions": { "args": args } })
            }
        }
    }
}

//! Browser driver abstraction.
//!
//! The engine never talks to a browser directly; it goes through
//! [`BrowserDriver`], one instance per browser session.

use crate::action::Locator;
use crate::error::EngineError;
use crate::model::VideoConfig;
use async_trait::async_trait;
use thiserror::Error;

/// Opaque reference to a located DOM element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

impl ElementHandle {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Failures reported by a driver implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("no element matches {0}")]
    NotFound(String),

    #[error("driver timed out: {0}")]
    Timeout(String),

    /// `transient` is `true` when the session is still usable and
    /// the same call may succeed on another attempt.
    #[error("{message}")]
    Fatal { message: String, transient: bool },
}

impl DriverError {
    pub fn fatal(message: impl Into<String>) -> Self {
        DriverError::Fatal {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        DriverError::Fatal {
            message: message.into(),
            transient: true,
        }
    }
}

impl From<DriverError> for EngineError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::NotFound(what) => EngineError::ElementNotFound(what),
            DriverError::Timeout(what) => EngineError::DriverTimeout(what),
            DriverError::Fatal { message, transient } => {
                EngineError::DriverFatal { message, transient }
            }
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Capabilities the engine needs from a live browser session.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load `url` and wait for the page load to complete.
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// Locate the first element matching `locator`.
    async fn find(&self, locator: &Locator) -> DriverResult<ElementHandle>;

    async fn click(&self, element: &ElementHandle) -> DriverResult<()>;

    async fn double_click(&self, element: &ElementHandle) -> DriverResult<()>;

    /// Secondary-button click, opening the context menu.
    async fn context_click(&self, element: &ElementHandle) -> DriverResult<()>;

    /// Move the pointer over the element without clicking.
    async fn hover(&self, element: &ElementHandle) -> DriverResult<()>;

    /// Select the `<option>` of a `<select>` element whose value, or
    /// failing that visible text, equals `option`.
    async fn select_option(&self, element: &ElementHandle, option: &str) -> DriverResult<()>;

    async fn clear(&self, element: &ElementHandle) -> DriverResult<()>;

    async fn type_text(&self, element: &ElementHandle, text: &str) -> DriverResult<()>;

    async fn text_of(&self, element: &ElementHandle) -> DriverResult<String>;

    async fn is_displayed(&self, element: &ElementHandle) -> DriverResult<bool>;

    /// Value of an attribute, `None` when the element does not carry it.
    async fn attribute(&self, element: &ElementHandle, name: &str) -> DriverResult<Option<String>>;

    /// Number of elements matching `locator`; zero is not an error.
    async fn count(&self, locator: &Locator) -> DriverResult<usize>;

    async fn current_url(&self) -> DriverResult<String>;

    async fn title(&self) -> DriverResult<String>;

    async fn refresh(&self) -> DriverResult<()>;

    async fn back(&self) -> DriverResult<()>;

    async fn forward(&self) -> DriverResult<()>;

    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    async fn start_video(&self, settings: &VideoConfig) -> DriverResult<()>;

    /// Stop the current recording and return its bytes. Empty when
    /// the driver cannot record.
    async fn stop_video(&self) -> DriverResult<Vec<u8>>;

    /// End the browser session.
    async fn close(&self) -> DriverResult<()>;
}

/// Opens isolated browser sessions, one per running scenario.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open_session(&self) -> DriverResult<Box<dyn BrowserDriver>>;
}

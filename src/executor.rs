//! Single-step dispatch onto the browser driver.

use crate::action::{Locator, StepAction};
use crate::cancel::CancelToken;
use crate::driver::{BrowserDriver, DriverError, DriverResult, ElementHandle};
use crate::error::EngineError;
use crate::model::{StepDefinition, TimeoutSettings};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Interval between element lookups while waiting for an element.
pub const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Executes one attempt of a step against a browser session.
pub struct StepExecutor<'a> {
    driver: &'a dyn BrowserDriver,
    timeouts: &'a TimeoutSettings,
    cancel: &'a CancelToken,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        driver: &'a dyn BrowserDriver,
        timeouts: &'a TimeoutSettings,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            driver,
            timeouts,
            cancel,
        }
    }

    /// Run the step's primary action, then its settle delay.
    #[instrument(skip_all, fields(step_id = step.step_id, action = %step.kind))]
    pub async fn execute(&self, step: &StepDefinition) -> Result<(), EngineError> {
        self.perform(&step.action).await?;
        if !step.wait_time.is_zero() {
            debug!("Settling for {:?}", step.wait_time);
            self.sleep(step.wait_time).await?;
        }
        Ok(())
    }

    async fn perform(&self, action: &StepAction) -> Result<(), EngineError> {
        let script = self.timeouts.script();
        match action {
            StepAction::Navigate { url } => {
                self.bounded("page load", self.timeouts.page_load(), self.driver.navigate(url))
                    .await
            }
            StepAction::InputText { locator, text } => {
                let element = self.locate(locator).await?;
                self.bounded("clear", script, self.driver.clear(&element)).await?;
                self.bounded("type", script, self.driver.type_text(&element, text))
                    .await
            }
            StepAction::Click { locator } => {
                let element = self.locate(locator).await?;
                self.bounded("click", script, self.driver.click(&element)).await
            }
            StepAction::DoubleClick { locator } => {
                let element = self.locate(locator).await?;
                self.bounded("double click", script, self.driver.double_click(&element))
                    .await
            }
            StepAction::RightClick { locator } => {
                let element = self.locate(locator).await?;
                self.bounded("right click", script, self.driver.context_click(&element))
                    .await
            }
            StepAction::Hover { locator } => {
                let element = self.locate(locator).await?;
                self.bounded("hover", script, self.driver.hover(&element)).await
            }
            StepAction::SelectDropdown { locator, option } => {
                let element = self.locate(locator).await?;
                self.bounded(
                    "select option",
                    script,
                    self.driver.select_option(&element, option),
                )
                .await
            }
            StepAction::ClearText { locator } => {
                let element = self.locate(locator).await?;
                self.bounded("clear", script, self.driver.clear(&element)).await
            }
            StepAction::AssertElementText { locator, expected } => {
                let element = self.locate(locator).await?;
                let actual = self
                    .bounded("read text", script, self.driver.text_of(&element))
                    .await?;
                let actual = actual.trim();
                if actual != expected {
                    return Err(EngineError::Assertion(format!(
                        "text of {locator} does not match. \
                         Expected: '{expected}', Actual: '{actual}'"
                    )));
                }
                Ok(())
            }
            StepAction::AssertElementCount { locator, expected } => {
                let actual = self
                    .bounded("count elements", script, self.driver.count(locator))
                    .await?;
                if actual != *expected {
                    return Err(EngineError::Assertion(format!(
                        "element count of {locator} does not match. \
                         Expected: {expected}, Actual: {actual}"
                    )));
                }
                Ok(())
            }
            StepAction::AssertElementVisible { locator } => {
                let element = match self.locate(locator).await {
                    Ok(element) => element,
                    Err(EngineError::ElementNotFound(_)) => {
                        return Err(EngineError::Assertion(format!(
                            "element {locator} is not visible: not found"
                        )))
                    }
                    Err(err) => return Err(err),
                };
                let displayed = self
                    .bounded("check visibility", script, self.driver.is_displayed(&element))
                    .await?;
                if !displayed {
                    return Err(EngineError::Assertion(format!(
                        "element {locator} is present but not visible"
                    )));
                }
                Ok(())
            }
            StepAction::AssertElementNotVisible { locator } => {
                let present = self
                    .bounded("count elements", script, self.driver.count(locator))
                    .await?;
                if present == 0 {
                    return Ok(());
                }
                let element = match self
                    .bounded("find element", script, self.driver.find(locator))
                    .await
                {
                    Ok(element) => element,
                    // Gone between the count and the lookup.
                    Err(EngineError::ElementNotFound(_)) => return Ok(()),
                    Err(err) => return Err(err),
                };
                let displayed = self
                    .bounded("check visibility", script, self.driver.is_displayed(&element))
                    .await?;
                if displayed {
                    return Err(EngineError::Assertion(format!(
                        "element {locator} is visible but should not be"
                    )));
                }
                Ok(())
            }
            StepAction::AssertElementAttribute {
                locator,
                attribute,
                expected,
            } => {
                let element = self.locate(locator).await?;
                let actual = self
                    .bounded(
                        "read attribute",
                        script,
                        self.driver.attribute(&element, attribute),
                    )
                    .await?;
                let actual = actual.as_deref().unwrap_or("null");
                if actual != expected {
                    return Err(EngineError::Assertion(format!(
                        "attribute of {locator} does not match. \
                         Expected {attribute}='{expected}', Actual {attribute}='{actual}'"
                    )));
                }
                Ok(())
            }
            StepAction::AssertUrlContains { expected } => {
                let url = self
                    .bounded("read url", script, self.driver.current_url())
                    .await?;
                if !url.contains(expected.as_str()) {
                    return Err(EngineError::Assertion(format!(
                        "URL does not contain '{expected}'. Actual URL: '{url}'"
                    )));
                }
                Ok(())
            }
            StepAction::AssertTitleContains { expected } => {
                let title = self.bounded("read title", script, self.driver.title()).await?;
                if !title.contains(expected.as_str()) {
                    return Err(EngineError::Assertion(format!(
                        "title does not contain '{expected}'. Actual title: '{title}'"
                    )));
                }
                Ok(())
            }
            StepAction::WaitForElement { locator } => self.locate(locator).await.map(|_| ()),
            StepAction::WaitForText { locator, text } => self.wait_for_text(locator, text).await,
            StepAction::Refresh => {
                self.bounded("refresh", self.timeouts.page_load(), self.driver.refresh())
                    .await
            }
            StepAction::Back => {
                self.bounded("back", self.timeouts.page_load(), self.driver.back())
                    .await
            }
            StepAction::Forward => {
                self.bounded("forward", self.timeouts.page_load(), self.driver.forward())
                    .await
            }
            StepAction::Wait { duration } => self.sleep(*duration).await,
        }
    }

    /// Poll `find` until the element shows up or the element-wait
    /// timeout elapses.
    async fn locate(&self, locator: &Locator) -> Result<ElementHandle, EngineError> {
        let wait = self.timeouts.element_wait();
        let deadline = Instant::now() + wait;

        loop {
            match self
                .bounded("find element", self.timeouts.script(), self.driver.find(locator))
                .await
            {
                Ok(element) => return Ok(element),
                Err(EngineError::ElementNotFound(_)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(EngineError::ElementNotFound(format!(
                            "{locator} (waited {:.1}s)",
                            wait.as_secs_f64()
                        )));
                    }
                    self.sleep(ELEMENT_POLL_INTERVAL.min(deadline - now)).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Poll the element's text until it contains `text` or the
    /// element-wait timeout elapses.
    async fn wait_for_text(&self, locator: &Locator, text: &str) -> Result<(), EngineError> {
        let wait = self.timeouts.element_wait();
        let deadline = Instant::now() + wait;
        let element = self.locate(locator).await?;

        loop {
            let actual = self
                .bounded("read text", self.timeouts.script(), self.driver.text_of(&element))
                .await?;
            if actual.contains(text) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::Timeout {
                    operation: format!("waiting for '{text}' in {locator}"),
                    seconds: wait.as_secs_f64(),
                });
            }
            self.sleep(ELEMENT_POLL_INTERVAL.min(deadline - now)).await?;
        }
    }

    /// Await a driver call, bounded by `limit` and by cancellation.
    async fn bounded<T, F>(&self, operation: &str, limit: Duration, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = DriverResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            res = tokio::time::timeout(limit, fut) => match res {
                Ok(Err(DriverError::Timeout(_))) => Err(EngineError::Timeout {
                    operation: operation.to_string(),
                    seconds: limit.as_secs_f64(),
                }),
                Ok(result) => result.map_err(EngineError::from),
                Err(_) => Err(EngineError::Timeout {
                    operation: operation.to_string(),
                    seconds: limit.as_secs_f64(),
                }),
            },
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<(), EngineError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

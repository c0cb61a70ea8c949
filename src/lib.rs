//! Data-driven browser UI scenario engine.
//!
//! Scenarios are JSON files of ordered steps (`navigate`, `input_text`,
//! `click`, assertions, ...) with `${name}` placeholders filled from an
//! environment profile and per-scenario test data. The engine runs
//! them against a [`driver::BrowserDriver`], retries flaky steps,
//! captures screenshots and video, and produces a [`model::RunReport`].

pub mod action;
pub mod aggregator;
pub mod artifact;
pub mod cancel;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod loader;
pub mod model;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod runner;
pub mod validator;
pub mod webdriver;

#[cfg(test)]
mod testing;

pub use cancel::CancelToken;
pub use config::*;
pub use error::{EngineError, ErrorKind};
pub use model::*;
pub use runner::*;
pub use validator::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

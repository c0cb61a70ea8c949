//! Master configuration and environment profile loading.

use crate::error::EngineError;
use crate::model::{EnvironmentProfile, MasterConfig, TimeoutSettings};
use crate::resolver::resolve_with;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default location of `<id>_environment.json` profiles.
pub const DEFAULT_ENVIRONMENTS_DIR: &str = "config/environments";

const ENVIRONMENT_SUFFIX: &str = "_environment.json";

/// Everything a run needs, fixed before the first scenario starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub master: MasterConfig,
    pub environment: EnvironmentProfile,
}

impl RunConfig {
    pub fn new(master: MasterConfig, environment: EnvironmentProfile) -> Self {
        Self {
            master,
            environment,
        }
    }

    /// Use the built-in environment, taking the element wait from
    /// `framework_config.explicit_wait`.
    pub fn without_environment(master: MasterConfig) -> Self {
        let environment = EnvironmentProfile {
            timeout_settings: TimeoutSettings {
                element_wait_timeout: master.framework_config.explicit_wait,
                ..Default::default()
            },
            ..Default::default()
        };
        Self::new(master, environment)
    }

    pub fn timeouts(&self) -> &TimeoutSettings {
        &self.environment.timeout_settings
    }
}

/// Load the master configuration. Relative scenario, test-data and
/// output paths are taken relative to the file's directory.
pub fn load_master_config<P: AsRef<Path>>(path: P) -> Result<MasterConfig> {
    let path = path.as_ref();
    info!("Loading master configuration from {}", path.display());

    let content = fs::read_to_string(path)
        .context(format!("Failed to read master config: {}", path.display()))?;
    let mut config: MasterConfig = serde_json::from_str(&content)
        .context(format!("Failed to parse master config: {}", path.display()))?;

    let base = path.parent().unwrap_or(Path::new(""));
    for entry in &mut config.test_scenarios {
        entry.scenario_file = rebase(base, &entry.scenario_file);
        if !entry.test_data_file.as_os_str().is_empty() {
            entry.test_data_file = rebase(base, &entry.test_data_file);
        }
    }
    let reporting = &mut config.reporting;
    reporting.report_directory = rebase(base, &reporting.report_directory);
    reporting.screenshot_directory = rebase(base, &reporting.screenshot_directory);
    reporting.video_directory = rebase(base, &reporting.video_directory);

    debug!(
        "Master configuration lists {} scenarios",
        config.test_scenarios.len()
    );
    Ok(config)
}

/// Load an environment profile, substituting `${VAR}` placeholders
/// in every string from the process environment.
pub fn load_environment<P: AsRef<Path>>(path: P) -> Result<EnvironmentProfile> {
    let path = path.as_ref();
    info!("Loading environment profile from {}", path.display());

    let content = fs::read_to_string(path)
        .context(format!("Failed to read environment: {}", path.display()))?;
    let mut raw: Value = serde_json::from_str(&content)
        .context(format!("Failed to parse environment: {}", path.display()))?;

    substitute_env_vars(&mut raw, "environment", &|name| std::env::var(name).ok())
        .context(format!("Failed to resolve environment: {}", path.display()))?;

    let profile: EnvironmentProfile = serde_json::from_value(raw)
        .context(format!("Invalid environment profile: {}", path.display()))?;
    Ok(profile)
}

/// Build the run configuration from a master config file and an
/// optional environment id.
pub fn load_run_config(
    config_path: &Path,
    environment: Option<&str>,
    environments_dir: &Path,
) -> Result<RunConfig> {
    let master = load_master_config(config_path)?;
    match environment {
        Some(id) => {
            let profile = load_environment(environment_path(environments_dir, id))?;
            Ok(RunConfig::new(master, profile))
        }
        None => Ok(RunConfig::without_environment(master)),
    }
}

pub fn environment_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}{ENVIRONMENT_SUFFIX}"))
}

/// Ids of every profile in `dir`, sorted.
pub fn list_environments(dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)
        .context(format!("Failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(ENVIRONMENT_SUFFIX)) {
            if !id.is_empty() && entry.path().is_file() {
                ids.push(id.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn substitute_env_vars(
    value: &mut Value,
    path: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> std::result::Result<(), EngineError> {
    match value {
        Value::String(s) => {
            *s = resolve_with(s, path, lookup)?;
        }
        Value::Array(items) => {
            for (idx, item) in items.iter_mut().enumerate() {
                substitute_env_vars(item, &format!("{path}.{idx}"), lookup)?;
            }
        }
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                substitute_env_vars(item, &format!("{path}.{key}"), lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

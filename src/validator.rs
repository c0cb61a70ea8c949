//! Pre-run configuration checks.

use crate::config::RunConfig;
use crate::loader::ScenarioLoader;
use crate::model::{FrameworkConfig, ScenarioEntry, TimeoutSettings, VideoConfig};
use std::collections::HashSet;
use url::Url;

pub const SUPPORTED_BROWSERS: &[&str] = &["chrome", "firefox", "edge"];

const VIDEO_QUALITIES: &[&str] = &["low", "medium", "high"];

/// Pre-run problems, split by how far they reach.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preflight {
    /// Master config, environment or framework problems. No scenario
    /// can run meaningfully.
    pub fatal: Vec<String>,
    /// Selected scenarios that will fail to load. The run still
    /// executes the others and reports these as failed.
    pub scenarios: Vec<String>,
}

impl Preflight {
    pub fn is_clean(&self) -> bool {
        self.fatal.is_empty() && self.scenarios.is_empty()
    }
}

pub fn preflight(config: &RunConfig) -> Preflight {
    Preflight {
        fatal: validate_settings(config),
        scenarios: validate_scenarios(config),
    }
}

/// Check the whole run configuration, loading every selected
/// scenario. Returns one message per problem; empty means valid.
pub fn validate_run_config(config: &RunConfig) -> Vec<String> {
    let Preflight { mut fatal, scenarios } = preflight(config);
    fatal.extend(scenarios);
    fatal
}

/// Run-wide settings: framework, timeouts, video and the scenario list.
pub fn validate_settings(config: &RunConfig) -> Vec<String> {
    let mut errors = Vec::new();
    errors.extend(validate_framework(&config.master.framework_config));
    errors.extend(validate_timeouts(&config.environment.timeout_settings));
    errors.extend(validate_video(&config.master.video_config));
    errors.extend(validate_entries(&config.master.test_scenarios));
    errors
}

/// Load every selected scenario, one message per scenario that fails.
pub fn validate_scenarios(config: &RunConfig) -> Vec<String> {
    let loader = ScenarioLoader::new(&config.environment);
    let mut errors = Vec::new();

    for entry in config.master.test_scenarios.iter().filter(|e| e.is_selected()) {
        if !entry.scenario_file.is_file() {
            errors.push(format!(
                "scenario '{}': scenario file not found: {}",
                entry.name,
                entry.scenario_file.display()
            ));
            continue;
        }
        if !entry.test_data_file.as_os_str().is_empty() && !entry.test_data_file.is_file() {
            errors.push(format!(
                "scenario '{}': test data file not found: {}",
                entry.name,
                entry.test_data_file.display()
            ));
            continue;
        }
        if let Err(err) = loader.load(entry) {
            errors.push(format!("scenario '{}': {err}", entry.name));
        }
    }

    errors
}

pub fn validate_framework(framework: &FrameworkConfig) -> Vec<String> {
    let mut errors = Vec::new();

    let browser = framework.browser.to_ascii_lowercase();
    if !SUPPORTED_BROWSERS.contains(&browser.as_str()) {
        errors.push(format!(
            "unsupported browser '{}' (expected one of: {})",
            framework.browser,
            SUPPORTED_BROWSERS.join(", ")
        ));
    }
    for (name, value) in [
        ("implicit_wait", framework.implicit_wait),
        ("explicit_wait", framework.explicit_wait),
    ] {
        if !value.is_finite() || value < 0.0 {
            errors.push(format!("framework_config.{name} must be non-negative, got {value}"));
        }
    }
    if framework.max_parallel_workers == 0 {
        errors.push("framework_config.max_parallel_workers must be at least 1".to_string());
    }
    if let Some(timeout) = framework.run_timeout {
        if !timeout.is_finite() || timeout <= 0.0 {
            errors.push(format!("framework_config.run_timeout must be positive, got {timeout}"));
        }
    }
    if let Err(e) = Url::parse(&framework.webdriver_url) {
        errors.push(format!(
            "framework_config.webdriver_url '{}' is not a valid URL: {e}",
            framework.webdriver_url
        ));
    }

    errors
}

pub fn validate_timeouts(timeouts: &TimeoutSettings) -> Vec<String> {
    let mut errors = Vec::new();
    for (name, value, allow_zero) in [
        ("page_load_timeout", timeouts.page_load_timeout, false),
        ("element_wait_timeout", timeouts.element_wait_timeout, true),
        ("script_timeout", timeouts.script_timeout, false),
    ] {
        let ok = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
        if !ok {
            errors.push(format!("timeout_settings.{name} must be positive, got {value}"));
        }
    }
    errors
}

pub fn validate_video(video: &VideoConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if video.fps == 0 {
        errors.push("video_config.fps must be at least 1".to_string());
    }
    if !VIDEO_QUALITIES.contains(&video.quality.to_ascii_lowercase().as_str()) {
        errors.push(format!(
            "video_config.quality '{}' must be one of: {}",
            video.quality,
            VIDEO_QUALITIES.join(", ")
        ));
    }
    errors
}

/// Selection flags and duplicate names.
pub fn validate_entries(entries: &[ScenarioEntry]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    if entries.is_empty() {
        errors.push("test_scenarios is empty".to_string());
    }

    for entry in entries {
        let execute = entry.execute.trim().to_ascii_lowercase();
        if execute != "y" && execute != "n" {
            errors.push(format!(
                "scenario '{}': execute must be \"y\" or \"n\", got \"{}\"",
                entry.name, entry.execute
            ));
        }
        if !seen.insert(entry.name.as_str()) {
            errors.push(format!("scenario '{}' is listed more than once", entry.name));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnvironmentProfile, MasterConfig, ReportingConfig};
    use std::path::PathBuf;

    fn entry(name: &str, scenario_file: PathBuf, test_data_file: PathBuf) -> ScenarioEntry {
        ScenarioEntry {
            name: name.into(),
            scenario_file,
            test_data_file,
            execute: "y".into(),
            priority: 1,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_framework(&FrameworkConfig::default()).is_empty());
        assert!(validate_timeouts(&TimeoutSettings::default()).is_empty());
        assert!(validate_video(&VideoConfig::default()).is_empty());
    }

    #[test]
    fn test_framework_problems() {
        let framework = FrameworkConfig {
            browser: "netscape".into(),
            explicit_wait: -1.0,
            max_parallel_workers: 0,
            run_timeout: Some(0.0),
            webdriver_url: "not a url".into(),
            ..Default::default()
        };
        let errors = validate_framework(&framework);
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors[0].contains("netscape"));
    }

    #[test]
    fn test_timeout_problems() {
        let timeouts = TimeoutSettings {
            page_load_timeout: 0.0,
            element_wait_timeout: 0.0,
            script_timeout: f64::NAN,
        };
        let errors = validate_timeouts(&timeouts);
        assert_eq!(errors.len(), 2, "{errors:?}");
    }

    #[test]
    fn test_entry_problems() {
        let mut maybe = entry("Login", "nope.json".into(), "".into());
        maybe.execute = "maybe".into();
        let entries = vec![
            maybe,
            entry("Checkout", "/missing/checkout.json".into(), "/missing/data.json".into()),
            entry("Checkout", "/missing/checkout.json".into(), "".into()),
        ];
        let errors = validate_entries(&entries);
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors[0].contains("execute must be"));
        assert!(errors[1].contains("listed more than once"));
    }

    fn config_with(entries: Vec<ScenarioEntry>) -> RunConfig {
        let master = MasterConfig {
            framework_config: FrameworkConfig::default(),
            reporting: ReportingConfig::default(),
            video_config: VideoConfig::default(),
            test_scenarios: entries,
        };
        RunConfig::new(master, EnvironmentProfile::default())
    }

    #[test]
    fn test_run_config_loads_selected_scenarios() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = dir.path().join("broken.json");
        std::fs::write(
            &scenario,
            r#"{ "scenario_info": { "name": "Broken" },
                 "test_steps": [ { "step_id": 1, "step_name": "x", "action": "execute_script", "target": "id:a" } ] }"#,
        )
        .unwrap();

        let config = config_with(vec![entry("Broken", scenario, "".into())]);

        let errors = validate_run_config(&config);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("unsupported action 'execute_script'"));
    }

    #[test]
    fn test_scenario_problems_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"{ "scenario_info": { "name": "Good", "url": "https://shop.test" },
                 "test_steps": [ { "step_id": 1, "step_name": "Open", "action": "navigate", "target": "url" } ] }"#,
        )
        .unwrap();
        let unresolved = dir.path().join("unresolved.json");
        std::fs::write(
            &unresolved,
            r#"{ "scenario_info": { "name": "Unresolved" },
                 "test_steps": [ { "step_id": 1, "step_name": "x", "action": "input_text", "target": "id:q", "value": "${nope}" } ] }"#,
        )
        .unwrap();

        let config = config_with(vec![
            entry("Unresolved", unresolved, "".into()),
            entry("Missing data", good.clone(), dir.path().join("absent.json")),
            entry("Good", good, "".into()),
        ]);

        let checks = preflight(&config);
        assert!(checks.fatal.is_empty(), "{:?}", checks.fatal);
        assert_eq!(checks.scenarios.len(), 2, "{:?}", checks.scenarios);
        assert!(checks.scenarios[0].contains("${nope}"));
        assert!(checks.scenarios[1].contains("test data file not found"));
        assert!(!checks.is_clean());
    }

    #[test]
    fn test_settings_problems_are_fatal() {
        let mut config = config_with(vec![]);
        config.master.framework_config.browser = "netscape".into();

        let checks = preflight(&config);
        assert_eq!(checks.fatal.len(), 2, "{:?}", checks.fatal);
        assert!(checks.scenarios.is_empty());
    }
}

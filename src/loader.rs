//! Scenario loading: parse, build the variable context, resolve and
//! validate every step.

use crate::action::{seconds_to_duration, ActionKind, StepAction, Target};
use crate::error::EngineError;
use crate::model::{
    EnvironmentProfile, ScenarioDefinition, ScenarioEntry, ScenarioFile, ScenarioInfo,
    StepDefinition,
};
use crate::resolver::VariableContext;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

/// Loads scenario definitions against one environment profile.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioLoader<'a> {
    environment: &'a EnvironmentProfile,
}

impl<'a> ScenarioLoader<'a> {
    pub fn new(environment: &'a EnvironmentProfile) -> Self {
        Self { environment }
    }

    /// Read the entry's scenario and test-data files and build the
    /// resolved definition.
    pub fn load(&self, entry: &ScenarioEntry) -> Result<ScenarioDefinition, EngineError> {
        info!("Loading scenario from {}", entry.scenario_file.display());

        let content = read_file(&entry.scenario_file, "scenario")?;
        let scenario = ScenarioFile::from_json(&content).map_err(|e| {
            EngineError::config(format!(
                "failed to parse scenario file {}: {e}",
                entry.scenario_file.display()
            ))
        })?;

        let test_data = read_test_data(&entry.test_data_file)?;
        let definition = self.from_parts(scenario, &test_data)?;

        debug!(
            "Loaded scenario '{}' with {} steps",
            definition.name,
            definition.steps.len()
        );
        Ok(definition)
    }

    /// Build a definition from an already parsed scenario file and
    /// its test data.
    pub fn from_parts(
        &self,
        scenario: ScenarioFile,
        test_data: &Value,
    ) -> Result<ScenarioDefinition, EngineError> {
        let ScenarioFile {
            scenario_info,
            test_steps,
        } = scenario;

        if test_steps.is_empty() {
            return Err(EngineError::config(format!(
                "scenario '{}' has no test_steps",
                scenario_info.name
            )));
        }

        let (context, url) = self.build_context(&scenario_info, test_data)?;

        let mut steps = Vec::with_capacity(test_steps.len());
        let mut previous: Option<u32> = None;

        for raw in test_steps {
            if let Some(prev) = previous {
                if raw.step_id <= prev {
                    return Err(EngineError::config(format!(
                        "step_id {} follows step_id {prev}; step ids must be \
                         unique and strictly increasing",
                        raw.step_id
                    )));
                }
            }
            previous = Some(raw.step_id);

            let field = |name: &str| format!("step {} {name}", raw.step_id);
            let kind: ActionKind = raw.action.parse()?;
            let target_text = context.resolve(&raw.target, &field("target"))?;
            let value_template = raw.value_template();
            let value = context.resolve(&value_template, &field("value"))?;
            let target: Target = target_text.parse()?;

            let navigate_to = match kind {
                ActionKind::Navigate => Some(self.absolute_url(&value, &url)?),
                _ => None,
            };
            let action = StepAction::build(kind, target, &target_text, &value, navigate_to)?;
            let wait_time = seconds_to_duration(raw.wait_time, &field("wait_time"))?;

            steps.push(StepDefinition {
                step_id: raw.step_id,
                step_name: raw.step_name,
                kind,
                target: target_text,
                value_template,
                value,
                action,
                wait_time,
                screenshot: raw.screenshot,
            });
        }

        Ok(ScenarioDefinition {
            name: scenario_info.name,
            description: scenario_info.description,
            url,
            expected_duration: scenario_info.expected_duration.map(|d| match d {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            tags: scenario_info.tags.into_iter().collect(),
            steps,
        })
    }

    /// Merge environment, test data and scenario info into one
    /// context. Later sources override earlier ones. Returns the
    /// context and the resolved scenario URL.
    pub fn build_context(
        &self,
        info: &ScenarioInfo,
        test_data: &Value,
    ) -> Result<(VariableContext, String), EngineError> {
        let env = self.environment;
        let mut context = VariableContext::new();

        context.insert("base_url", env.base_url.clone());

        let credentials = Value::Object(env.credentials.clone());
        context.merge_json("", &credentials);
        context.merge_json("credentials", &credentials);

        let env_data = Value::Object(env.test_data.clone());
        context.merge_json("", &env_data);
        context.merge_json("test_data", &env_data);

        context.merge_json("api_endpoints", &Value::Object(env.api_endpoints.clone()));
        for (flag, enabled) in &env.feature_flags {
            context.insert(format!("feature_flags.{flag}"), enabled.to_string());
        }

        context.merge_json("", test_data);

        // The scenario URL may itself reference `${base_url}`.
        let url = context.resolve(&info.url, "scenario_info.url")?;
        for (name, value) in [
            ("name", info.name.as_str()),
            ("description", info.description.as_str()),
            ("url", url.as_str()),
        ] {
            context.insert(name, value);
            context.insert(format!("scenario_info.{name}"), value);
        }

        Ok((context, url))
    }

    /// Absolutize a navigation target. An empty value falls back to
    /// the scenario URL; relative values join onto `base_url`.
    fn absolute_url(&self, value: &str, scenario_url: &str) -> Result<String, EngineError> {
        let raw = if value.trim().is_empty() {
            scenario_url.trim()
        } else {
            value.trim()
        };
        if raw.is_empty() {
            return Err(EngineError::config(
                "navigate has no value and the scenario has no url",
            ));
        }

        if let Ok(url) = Url::parse(raw) {
            return Ok(url.to_string());
        }

        let base_url = self.environment.base_url.trim();
        if base_url.is_empty() {
            return Err(EngineError::config(format!(
                "relative URL '{raw}' needs a base_url in the environment"
            )));
        }
        let base = Url::parse(base_url)
            .map_err(|e| EngineError::config(format!("invalid base_url '{base_url}': {e}")))?;
        let joined = base
            .join(raw)
            .map_err(|e| EngineError::config(format!("cannot join '{raw}' onto '{base_url}': {e}")))?;
        Ok(joined.to_string())
    }
}

fn read_file(path: &Path, what: &str) -> Result<String, EngineError> {
    fs::read_to_string(path).map_err(|e| {
        EngineError::config(format!("failed to read {what} file {}: {e}", path.display()))
    })
}

/// Test data must be a JSON object. An empty path means no data.
fn read_test_data(path: &Path) -> Result<Value, EngineError> {
    if path.as_os_str().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let content = read_file(path, "test data")?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        EngineError::config(format!("failed to parse test data {}: {e}", path.display()))
    })?;
    if !value.is_object() {
        return Err(EngineError::config(format!(
            "test data {} must be a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

//! Report serialization: JSON, YAML and a Markdown document with
//! embedded evidence.

use crate::model::*;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Serializes a finalized [`RunReport`].
pub trait ReportWriter: Send + Sync {
    fn write_json(&self, report: &RunReport) -> Result<PathBuf>;

    fn write_yaml(&self, _report: &RunReport) -> Result<PathBuf> {
        bail!("YAML reports are not supported by this writer")
    }

    /// Human-readable document including `artifacts` as evidence.
    fn write_document(&self, report: &RunReport, artifacts: &[ArtifactRef]) -> Result<PathBuf>;
}

/// Writes `test_report_<run_id>.{json,yaml,md}` into the report
/// directory.
#[derive(Debug, Clone)]
pub struct FsReportWriter {
    dir: PathBuf,
    embed_screenshots: bool,
}

impl FsReportWriter {
    pub fn new(reporting: &ReportingConfig) -> Self {
        Self {
            dir: reporting.report_directory.clone(),
            embed_screenshots: reporting.screenshot_embedding,
        }
    }

    fn write(&self, report: &RunReport, extension: &str, content: &str) -> Result<PathBuf> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).context(format!(
                "Failed to create report directory: {}",
                self.dir.display()
            ))?;
        }
        let path = self
            .dir
            .join(format!("test_report_{}.{extension}", report.run_id));
        fs::write(&path, content).context(format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }
}

impl ReportWriter for FsReportWriter {
    fn write_json(&self, report: &RunReport) -> Result<PathBuf> {
        let content = report.to_json()?;
        self.write(report, "json", &content)
    }

    fn write_yaml(&self, report: &RunReport) -> Result<PathBuf> {
        let content = serde_yaml::to_string(report)?;
        self.write(report, "yaml", &content)
    }

    fn write_document(&self, report: &RunReport, artifacts: &[ArtifactRef]) -> Result<PathBuf> {
        let content = render_markdown(report, artifacts, self.embed_screenshots);
        self.write(report, "md", &content)
    }
}

/// Hand the report to every enabled format. Writer failures are
/// logged and skipped.
pub fn publish(
    report: &RunReport,
    writer: &dyn ReportWriter,
    reporting: &ReportingConfig,
) -> Vec<PathBuf> {
    let mut written = Vec::new();
    let mut save = |format: &str, result: Result<PathBuf>| match result {
        Ok(path) => {
            info!("{format} report saved: {}", path.display());
            written.push(path);
        }
        Err(e) => error!("Failed to save {format} report: {e:#}"),
    };

    if reporting.json_reports {
        save("JSON", writer.write_json(report));
    }
    if reporting.yaml_reports {
        save("YAML", writer.write_yaml(report));
    }
    if reporting.word_reports {
        save("Document", writer.write_document(report, &report.artifacts()));
    }
    written
}

fn status_label(passed: bool) -> &'static str {
    if passed {
        "PASSED"
    } else {
        "FAILED"
    }
}

fn step_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Passed => "PASSED",
        StepStatus::Failed => "FAILED",
        StepStatus::Skipped => "SKIPPED",
    }
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Render the run as a Markdown document.
pub fn render_markdown(report: &RunReport, artifacts: &[ArtifactRef], embed: bool) -> String {
    let summary = &report.summary;
    let overall = if report.cancelled {
        "CANCELLED"
    } else {
        status_label(report.passed())
    };

    let mut out = String::new();
    let _ = writeln!(out, "# Test Execution Report\n");
    let _ = writeln!(out, "- **Run ID:** {}", report.run_id);
    let _ = writeln!(out, "- **Environment:** {}", report.environment_id);
    let _ = writeln!(out, "- **Started:** {}", report.started_at.to_rfc3339());
    let _ = writeln!(out, "- **Finished:** {}", report.finished_at.to_rfc3339());
    let _ = writeln!(out, "- **Result:** {overall}\n");

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "| Metric | Value |");
    let _ = writeln!(out, "|---|---|");
    for (metric, value) in [
        ("Total scenarios", summary.total_scenarios.to_string()),
        ("Passed scenarios", summary.passed_scenarios.to_string()),
        ("Failed scenarios", summary.failed_scenarios.to_string()),
        ("Total steps", summary.total_steps.to_string()),
        ("Passed steps", summary.passed_steps.to_string()),
        ("Failed steps", summary.failed_steps.to_string()),
        ("Skipped steps", summary.skipped_steps.to_string()),
        ("Success rate", format!("{:.2}%", summary.success_rate)),
    ] {
        let _ = writeln!(out, "| {metric} | {value} |");
    }
    out.push('\n');

    for (index, scenario) in report.scenarios.iter().enumerate() {
        let _ = writeln!(
            out,
            "## {}. {} ({})\n",
            index + 1,
            scenario.name,
            status_label(scenario.passed())
        );
        let _ = writeln!(out, "- **File:** {}", scenario.scenario_file.display());
        let _ = writeln!(out, "- **Duration:** {} ms", scenario.duration_ms);
        if let Some(err) = &scenario.error {
            let _ = writeln!(out, "- **Error ({}):** {}", err.kind, err.message);
        }
        out.push('\n');

        if !scenario.steps.is_empty() {
            let _ = writeln!(out, "| # | Step | Action | Status | Attempts | Duration | Error |");
            let _ = writeln!(out, "|---|---|---|---|---|---|---|");
            for step in &scenario.steps {
                let error = step
                    .error
                    .as_ref()
                    .map(|e| format!("{}: {}", e.kind, e.message))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {} ms | {} |",
                    step.step_id,
                    cell(&step.step_name),
                    step.action,
                    step_label(step.status),
                    step.attempts,
                    step.duration_ms,
                    cell(&error)
                );
            }
            out.push('\n');
        }

        let evidence: Vec<&ArtifactRef> = scenario
            .steps
            .iter()
            .flat_map(|s| s.artifacts.iter())
            .chain(scenario.artifacts.iter())
            .filter(|a| artifacts.contains(*a))
            .collect();
        if !evidence.is_empty() {
            let _ = writeln!(out, "### Evidence\n");
            for artifact in evidence {
                render_artifact(&mut out, artifact, embed);
            }
            out.push('\n');
        }
    }

    out
}

fn render_artifact(out: &mut String, artifact: &ArtifactRef, embed: bool) {
    let label = match (artifact.step_id, artifact.attempt) {
        (Some(step), Some(attempt)) => format!("Step {step}, attempt {attempt}"),
        (Some(step), None) => format!("Step {step}"),
        _ => "Scenario".to_string(),
    };
    let path = artifact.path.display();

    match artifact.kind {
        ArtifactKind::Screenshot if embed => match embed_image(&artifact.path) {
            Ok(uri) => {
                let _ = writeln!(out, "**{label}**\n\n![{label}]({uri})\n");
            }
            Err(e) => {
                warn!("Cannot embed screenshot {path}: {e:#}");
                let _ = writeln!(out, "**{label}**\n\n![{label}]({path})\n");
            }
        },
        ArtifactKind::Screenshot => {
            let _ = writeln!(out, "**{label}**\n\n![{label}]({path})\n");
        }
        ArtifactKind::Video => {
            let _ = writeln!(out, "- {label} video: [{path}]({path})");
        }
    }
}

fn embed_image(path: &Path) -> Result<String> {
    let bytes = fs::read(path).context(format!("Failed to read {}", path.display()))?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(bytes)))
}

//! Rendering of the final verdict
//!
//! Renderers only see the frozen [`VerdictReport`]. Each returns artifacts:
//! `stdout` and `stderr` are printed, any other name is a file written to the
//! configured output directory.
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{
    MetricKind, MetricSnapshot, ThresholdResult, ThresholdStatus, VerdictReport,
};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error writing report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unable to format report: {0}")]
    Format(#[from] std::fmt::Error),
}

pub const STDOUT: &str = "stdout";
pub const STDERR: &str = "stderr";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub contents: Vec<u8>,
}

impl Artifact {
    pub fn new(name: &str, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            contents: contents.into(),
        }
    }
}

pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;
    fn render(&self, report: &VerdictReport) -> Result<Vec<Artifact>, ReportError>;
}

/// Run every renderer once and emit what they produce. Failures are logged and
/// never change the verdict.
pub fn dispatch(renderers: &[Box<dyn Renderer>], report: &VerdictReport, out_dir: Option<&Path>) {
    for renderer in renderers {
        let artifacts = match renderer.render(report) {
            Ok(artifacts) => artifacts,
            Err(err) => {
                error!("Renderer {} failed: {err}", renderer.name());
                continue;
            }
        };

        for artifact in artifacts {
            if let Err(err) = emit(&artifact, out_dir) {
                error!(
                    "Unable to write {} from renderer {}: {err}",
                    artifact.name,
                    renderer.name()
                );
            }
        }
    }
}

fn emit(artifact: &Artifact, out_dir: Option<&Path>) -> Result<(), ReportError> {
    match artifact.name.as_str() {
        STDOUT => std::io::stdout().lock().write_all(&artifact.contents)?,
        STDERR => std::io::stderr().lock().write_all(&artifact.contents)?,
        name => {
            let path = match out_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    dir.join(name)
                }
                None => Path::new(name).to_path_buf(),
            };
            std::fs::write(&path, &artifact.contents)?;
            info!("Wrote {}", path.display());
        }
    }
    Ok(())
}

/// Full machine-readable dump of the report.
pub struct JsonSummary {
    file_name: String,
}

impl JsonSummary {
    pub fn to(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
        }
    }
}

impl Default for JsonSummary {
    fn default() -> Self {
        Self::to("summary.json")
    }
}

impl Renderer for JsonSummary {
    fn name(&self) -> &str {
        "json"
    }

    fn render(&self, report: &VerdictReport) -> Result<Vec<Artifact>, ReportError> {
        let json = serde_json::to_vec_pretty(report)?;
        Ok(vec![Artifact::new(&self.file_name, json)])
    }
}

/// Condensed console summary.
pub struct TextSummary {
    colors: bool,
    indent: String,
    target: String,
}

impl TextSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn colors(mut self, enabled: bool) -> Self {
        self.colors = enabled;
        self
    }

    pub fn indent(mut self, indent: &str) -> Self {
        self.indent = indent.to_string();
        self
    }

    /// Write to a file (or `stderr`) instead of `stdout`.
    pub fn to(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.colors {
            format!("\x1b[{}m{text}\x1b[0m", color as u8)
        } else {
            text.to_string()
        }
    }

    fn mark(&self, status: &ThresholdStatus) -> String {
        match status {
            ThresholdStatus::Passed => self.paint("✓", Color::Green),
            ThresholdStatus::Failed => self.paint("✗", Color::Red),
            ThresholdStatus::Indeterminate(_) => self.paint("?", Color::Yellow),
        }
    }

    fn summary(&self, report: &VerdictReport) -> Result<String, std::fmt::Error> {
        let i = &self.indent;
        let mut out = String::new();

        writeln!(out)?;
        writeln!(out, "{i}scenario: {}", report.name)?;
        writeln!(
            out,
            "{i}outcome:  {:?}, {} max virtual users, {}",
            report.outcome,
            report.vus_max,
            humantime::format_duration(round_ms(report.snapshot.elapsed))
        )?;
        for anomaly in &report.anomalies {
            writeln!(out, "{i}{} {anomaly}", self.paint("!", Color::Yellow))?;
        }

        if !report.thresholds.is_empty() {
            writeln!(out)?;
            writeln!(out, "{i}thresholds")?;
            for result in report.passed().chain(report.failed()) {
                writeln!(out, "{i}  {}", self.threshold_line(result))?;
            }
            let indeterminate: Vec<_> = report.indeterminate().collect();
            if !indeterminate.is_empty() {
                writeln!(out, "{i}  not evaluated")?;
                for result in indeterminate {
                    writeln!(out, "{i}    {}", self.threshold_line(result))?;
                }
            }
        }

        let checks: Vec<_> = report.snapshot.checks().collect();
        if !checks.is_empty() {
            writeln!(out)?;
            writeln!(out, "{i}checks")?;
            for (name, metric) in checks {
                let status = if metric.non_zero == metric.count {
                    ThresholdStatus::Passed
                } else {
                    ThresholdStatus::Failed
                };
                writeln!(
                    out,
                    "{i}  {} {name} {:.2}% ({} / {})",
                    self.mark(&status),
                    metric.rate() * 100.,
                    metric.non_zero,
                    metric.count
                )?;
            }
        }

        writeln!(out)?;
        let width = report
            .snapshot
            .metrics
            .keys()
            .map(|k| k.chars().count())
            .max()
            .unwrap_or(0)
            + 3;
        for (name, metric) in &report.snapshot.metrics {
            let dots = ".".repeat(width - name.chars().count());
            writeln!(
                out,
                "{i}{name}{dots}: {}",
                metric_line(metric, report.snapshot.elapsed)
            )?;
        }

        writeln!(out)?;
        let verdict = if report.overall_pass {
            self.paint("PASSED", Color::Green)
        } else {
            self.paint("FAILED", Color::Red)
        };
        writeln!(out, "{i}verdict: {verdict}")?;
        Ok(out)
    }

    fn threshold_line(&self, result: &ThresholdResult) -> String {
        let detail = match (&result.status, result.observed) {
            (ThresholdStatus::Indeterminate(reason), _) => reason.to_string(),
            (_, Some(observed)) => format!("observed {}", number(observed)),
            (_, None) => String::new(),
        };
        format!(
            "{} {} {} ({detail})",
            self.mark(&result.status),
            result.metric,
            result.expression
        )
    }
}

impl Default for TextSummary {
    fn default() -> Self {
        Self {
            colors: true,
            indent: " ".to_string(),
            target: STDOUT.to_string(),
        }
    }
}

impl Renderer for TextSummary {
    fn name(&self) -> &str {
        "text"
    }

    fn render(&self, report: &VerdictReport) -> Result<Vec<Artifact>, ReportError> {
        Ok(vec![Artifact::new(&self.target, self.summary(report)?)])
    }
}

#[derive(Clone, Copy)]
enum Color {
    Red = 31,
    Green = 32,
    Yellow = 33,
}

/// Standalone HTML page with thresholds, checks and metrics.
pub struct HtmlReport {
    file_name: String,
}

impl HtmlReport {
    pub fn to(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
        }
    }
}

impl Default for HtmlReport {
    fn default() -> Self {
        Self::to("result.html")
    }
}

impl Renderer for HtmlReport {
    fn name(&self) -> &str {
        "html"
    }

    fn render(&self, report: &VerdictReport) -> Result<Vec<Artifact>, ReportError> {
        let mut thresholds = String::new();
        for result in &report.thresholds {
            let (class, label) = match &result.status {
                ThresholdStatus::Passed => ("pass", "passed".to_string()),
                ThresholdStatus::Failed => ("fail", "failed".to_string()),
                ThresholdStatus::Indeterminate(reason) => ("unknown", reason.to_string()),
            };
            writeln!(
                thresholds,
                "<tr class=\"{class}\"><td>{}</td><td>{}</td><td>{}</td><td>{label}</td></tr>",
                escape(&result.metric.to_string()),
                escape(&result.expression),
                result.observed.map(number).unwrap_or_default(),
            )?;
        }

        let mut checks = String::new();
        for (name, metric) in report.snapshot.checks() {
            let class = if metric.non_zero == metric.count {
                "pass"
            } else {
                "fail"
            };
            writeln!(
                checks,
                "<tr class=\"{class}\"><td>{}</td><td>{}</td><td>{}</td><td>{:.2}%</td></tr>",
                escape(name),
                metric.non_zero,
                metric.count - metric.non_zero,
                metric.rate() * 100.
            )?;
        }

        let mut metrics = String::new();
        for (name, metric) in &report.snapshot.metrics {
            writeln!(
                metrics,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(name),
                metric.kind,
                escape(&metric_line(metric, report.snapshot.elapsed)),
            )?;
        }

        let mut anomalies = String::new();
        for anomaly in &report.anomalies {
            writeln!(anomalies, "<li>{}</li>", escape(&anomaly.to_string()))?;
        }

        let (verdict_class, verdict) = if report.overall_pass {
            ("pass", "PASSED")
        } else {
            ("fail", "FAILED")
        };

        let page = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title} - load test report</title>
<style>
body {{ font-family: sans-serif; margin: 2em; color: #222; }}
table {{ border-collapse: collapse; margin-bottom: 2em; min-width: 40em; }}
th, td {{ border: 1px solid #ccc; padding: 0.3em 0.8em; text-align: left; }}
th {{ background: #eee; }}
.pass {{ background: #e6f6e6; }}
.fail {{ background: #fbe3e3; }}
.unknown {{ background: #fdf6dc; }}
h1 span {{ padding: 0.1em 0.5em; border-radius: 0.3em; }}
</style>
</head>
<body>
<h1>{title} <span class="{verdict_class}">{verdict}</span></h1>
<p>Outcome: {outcome:?}. Peak virtual users: {vus_max}. Duration: {elapsed}.</p>
<ul>
{anomalies}</ul>
<h2>Thresholds</h2>
<table>
<tr><th>Metric</th><th>Expression</th><th>Observed</th><th>Status</th></tr>
{thresholds}</table>
<h2>Checks</h2>
<table>
<tr><th>Check</th><th>Passes</th><th>Failures</th><th>Rate</th></tr>
{checks}</table>
<h2>Metrics</h2>
<table>
<tr><th>Metric</th><th>Type</th><th>Values</th></tr>
{metrics}</table>
</body>
</html>
"#,
            title = escape(&report.name),
            outcome = report.outcome,
            vus_max = report.vus_max,
            elapsed = humantime::format_duration(round_ms(report.snapshot.elapsed)),
        );

        Ok(vec![Artifact::new(&self.file_name, page)])
    }
}

fn metric_line(metric: &MetricSnapshot, elapsed: Duration) -> String {
    let values = metric.values(elapsed);
    match metric.kind {
        MetricKind::Rate => format!(
            "{:.2}% {} / {}",
            metric.rate() * 100.,
            metric.non_zero,
            metric.count
        ),
        _ => values
            .iter()
            .map(|(name, value)| format!("{name}={}", number(*value)))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn number(value: f64) -> String {
    if value.fract() == 0. && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

fn round_ms(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

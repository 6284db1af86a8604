//! Default Volley runtime
//!
//! Selects one registered scenario, merges its configuration from a JSON file and the
//! command line, and turns the verdict into the process exit code.
use crate::{error::RuntimeError, RunnableScenario};
use clap::Parser;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use linkme::distributed_slice;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitCode;
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, instrument, warn, Instrument};
use volley_core::{RunConfig, Stage, EXIT_INVALID_CONFIG, EXIT_OK};

pub type ScenarioFactory = fn() -> Pin<Box<dyn RunnableScenario>>;

/// An array created at link-time which stores the names of each scenario and their
/// respective constructor.
#[doc(hidden)]
#[distributed_slice]
pub static VOLLEY_SCENARIOS: [(&'static str, ScenarioFactory)];

#[derive(Parser, Debug)]
#[command(version, about = "Run a Volley load test scenario")]
struct VolleyCli {
    /// Scenario to run; optional when only one is registered
    #[arg(long)]
    scenario: Option<String>,

    /// JSON run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stage as `<duration>:<target>`, e.g. `90s:20`; replaces the configured stages
    #[arg(short, long = "stage", value_parser = parse_stage)]
    stages: Vec<Stage>,

    /// Threshold as `<metric>=<expression>`, e.g. `http_req_failed=rate<0.01`
    #[arg(short, long = "threshold", value_parser = parse_threshold)]
    thresholds: Vec<(String, String)>,

    /// Total run length, overriding the length of the stages
    #[arg(short, long, value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Directory for `summary.json` and `result.html`
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Print the registered scenarios and exit
    #[arg(long)]
    list: bool,
}

/// Default Volley runtime. (requires `rt` feature)
///
/// # Example
///
/// ```ignore
/// use volley::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> std::process::ExitCode {
///     VolleyRuntime::new()
///         .with_args()
///         .run()
///         .await
/// }
/// ```
#[derive(Default)]
pub struct VolleyRuntime {
    scenario: Option<String>,
    config_path: Option<PathBuf>,
    stages: Vec<Stage>,
    thresholds: Vec<(String, String)>,
    duration: Option<Duration>,
    out_dir: Option<PathBuf>,
    list: bool,
    interrupt: Option<BoxFuture<'static, ()>>,
}

impl VolleyRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the default CLI arguments for Volley.
    ///
    /// # Example
    /// ```ignore
    /// $ ./my_load_test --scenario search -s 1m:5 -s 90s:20 -s 1m:0 -t 'http_req_failed=rate<0.01'
    /// $ ./my_load_test --config run.json --out-dir reports
    /// ```
    pub fn with_args(self) -> Self {
        self.apply(VolleyCli::parse())
    }

    /// Like [`with_args`](Self::with_args), parsing `args` instead of the process arguments.
    pub fn with_args_from<I, A>(self, args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = A>,
        A: Into<std::ffi::OsString> + Clone,
    {
        Ok(self.apply(VolleyCli::try_parse_from(args)?))
    }

    fn apply(mut self, args: VolleyCli) -> Self {
        self.scenario = args.scenario.or(self.scenario);
        self.config_path = args.config.or(self.config_path);
        if !args.stages.is_empty() {
            self.stages = args.stages;
        }
        self.thresholds.extend(args.thresholds);
        self.duration = args.duration.or(self.duration);
        self.out_dir = args.out_dir.or(self.out_dir);
        self.list |= args.list;
        self
    }

    pub fn scenario(mut self, name: &str) -> Self {
        self.scenario = Some(name.to_string());
        self
    }

    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn stage(mut self, duration: Duration, target: u64) -> Self {
        self.stages.push(Stage::new(duration, target));
        self
    }

    pub fn threshold(mut self, metric: &str, expression: &str) -> Self {
        self.thresholds
            .push((metric.to_string(), expression.to_string()));
        self
    }

    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    /// Stop the run when `signal` resolves instead of on Ctrl-C.
    pub fn interrupt(mut self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        self.interrupt = Some(signal.boxed());
        self
    }

    pub async fn run(self) -> ExitCode {
        ExitCode::from(self.run_from(&VOLLEY_SCENARIOS).await)
    }

    #[instrument(name = "volley", skip_all)]
    async fn run_from(mut self, scenarios: &[(&'static str, ScenarioFactory)]) -> u8 {
        if self.list {
            for (name, _) in scenarios {
                println!("{name}");
            }
            return EXIT_OK;
        }

        let (name, factory) = match select(scenarios, self.scenario.as_deref()) {
            Ok(entry) => entry,
            Err(err) => {
                error!("{err}");
                return EXIT_INVALID_CONFIG;
            }
        };

        let config = match self.build_config(name) {
            Ok(config) => config,
            Err(err) => {
                error!("Invalid configuration for {name}: {err}");
                return EXIT_INVALID_CONFIG;
            }
        };

        let interrupt = self.interrupt.take().unwrap_or_else(ctrl_c);
        info!("Running scenario {name}.");
        match factory().configure(config, interrupt).await {
            Ok(report) => report.exit_code(),
            Err(err) => {
                error!("Invalid configuration for {name}: {err}");
                EXIT_INVALID_CONFIG
            }
        }
    }

    /// The config file is the base. Stages given to the builder or on the command
    /// line replace its stages, thresholds are added to its thresholds.
    fn build_config(&self, name: &str) -> Result<RunConfig, RuntimeError> {
        let mut config = match &self.config_path {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };
        config.name = name.to_string();

        if !self.stages.is_empty() {
            config.stages = self.stages.clone();
        }
        if let Some(duration) = self.duration {
            config.duration = Some(duration);
        }
        for (metric, expression) in &self.thresholds {
            config.add_threshold(metric, expression.as_str().into());
        }
        if let Some(dir) = &self.out_dir {
            config.out_dir = Some(dir.clone());
        }

        config.validate()?;
        debug!("Configuration: {config:?}");
        Ok(config)
    }
}

fn select(
    scenarios: &[(&'static str, ScenarioFactory)],
    wanted: Option<&str>,
) -> Result<(&'static str, ScenarioFactory), RuntimeError> {
    let names = || {
        scenarios
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    };

    match (wanted, scenarios) {
        (_, []) => Err(RuntimeError::NoScenario),
        (None, [only]) => Ok(*only),
        (None, _) => Err(RuntimeError::AmbiguousScenario(names())),
        (Some(wanted), _) => scenarios
            .iter()
            .find(|(name, _)| *name == wanted)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownScenario(wanted.to_string(), names())),
    }
}

fn ctrl_c() -> BoxFuture<'static, ()> {
    async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => warn!("Received Ctrl-C, stopping the run"),
            Err(err) => {
                error!("Unable to listen for Ctrl-C: {err}");
                future::pending::<()>().await
            }
        }
    }
    .boxed()
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    let (duration, target) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected <duration>:<target>, found `{s}`"))?;
    let duration =
        humantime::parse_duration(duration.trim()).map_err(|err| format!("{err} in `{s}`"))?;
    let target = target
        .trim()
        .parse()
        .map_err(|err| format!("{err} in `{s}`"))?;
    Ok(Stage::new(duration, target))
}

fn parse_threshold(s: &str) -> Result<(String, String), String> {
    // Split on the first `=` that is not part of the comparison operator.
    let split = s
        .char_indices()
        .find(|(idx, c)| {
            *c == '='
                && !matches!(s[..*idx].chars().last(), Some('<' | '>' | '=' | '!'))
                && !s[idx + 1..].starts_with('=')
        })
        .map(|(idx, _)| idx)
        .ok_or_else(|| format!("expected <metric>=<expression>, found `{s}`"))?;

    let (metric, expression) = (s[..split].trim(), s[split + 1..].trim());
    if metric.is_empty() || expression.is_empty() {
        return Err(format!("expected <metric>=<expression>, found `{s}`"));
    }
    Ok((metric.to_string(), expression.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::{Context, Poll};
    use tracing_test::traced_test;
    use volley_core::{
        RunOutcome, RunResult, Snapshot, VerdictReport, EXIT_EXTERNAL_ABORT,
    };

    struct Fixed {
        config: RunConfig,
        interrupt: Option<BoxFuture<'static, ()>>,
    }

    impl Future for Fixed {
        type Output = RunResult;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let interrupted = match self.interrupt.as_mut() {
                Some(interrupt) => interrupt.poll_unpin(cx).is_ready(),
                None => false,
            };
            let validated = self.config.validate()?;
            Poll::Ready(Ok(VerdictReport {
                name: validated.config.name,
                thresholds: vec![],
                overall_pass: true,
                outcome: if interrupted {
                    RunOutcome::Interrupted
                } else {
                    RunOutcome::Completed
                },
                anomalies: vec![],
                vus_max: 0,
                snapshot: Snapshot::default(),
            }))
        }
    }

    impl RunnableScenario for Fixed {
        fn name(&self) -> &str {
            &self.config.name
        }

        fn configure(
            &self,
            config: RunConfig,
            interrupt: BoxFuture<'static, ()>,
        ) -> Pin<Box<dyn RunnableScenario>> {
            Box::pin(Fixed {
                config,
                interrupt: Some(interrupt),
            })
        }
    }

    fn fixed() -> Pin<Box<dyn RunnableScenario>> {
        Box::pin(Fixed {
            config: RunConfig::new("fixed"),
            interrupt: None,
        })
    }

    const SCENARIOS: &[(&str, ScenarioFactory)] = &[("search", fixed), ("index", fixed)];

    fn never() -> impl Future<Output = ()> + Send + 'static {
        future::pending()
    }

    #[test]
    fn stages_parse() {
        assert_eq!(
            parse_stage("90s:20").unwrap(),
            Stage::new(Duration::from_secs(90), 20)
        );
        assert_eq!(
            parse_stage("1m 30s:0").unwrap(),
            Stage::new(Duration::from_secs(90), 0)
        );
        assert!(parse_stage("90s").is_err());
        assert!(parse_stage("ninety:20").is_err());
        assert!(parse_stage("90s:-1").is_err());
    }

    #[test]
    fn thresholds_parse() {
        assert_eq!(
            parse_threshold("http_req_failed=rate<0.01").unwrap(),
            ("http_req_failed".to_string(), "rate<0.01".to_string())
        );
        assert_eq!(
            parse_threshold("http_reqs=count>=10").unwrap(),
            ("http_reqs".to_string(), "count>=10".to_string())
        );
        assert_eq!(
            parse_threshold("checks{check:status is 200} = rate==1").unwrap(),
            (
                "checks{check:status is 200}".to_string(),
                "rate==1".to_string()
            )
        );
        assert!(parse_threshold("rate<0.01").is_err());
        assert!(parse_threshold("=rate<0.01").is_err());
    }

    #[test]
    fn scenario_selection() {
        assert!(matches!(select(&[], None), Err(RuntimeError::NoScenario)));
        assert_eq!(select(&SCENARIOS[..1], None).unwrap().0, "search");
        assert!(matches!(
            select(SCENARIOS, None),
            Err(RuntimeError::AmbiguousScenario(names)) if names == "search, index"
        ));
        assert_eq!(select(SCENARIOS, Some("index")).unwrap().0, "index");
        assert!(matches!(
            select(SCENARIOS, Some("login")),
            Err(RuntimeError::UnknownScenario(name, _)) if name == "login"
        ));
    }

    #[test]
    fn cli_overrides_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{
                "name": "ignored",
                "stages": [{"duration": "1m", "target": 5}],
                "thresholds": {"http_req_duration": ["p(99)<500"]},
                "drain_timeout": "10s"
            }"#,
        )
        .unwrap();

        let runtime = VolleyRuntime::new()
            .with_args_from([
                "load-test",
                "--config",
                path.to_str().unwrap(),
                "-s",
                "30s:10",
                "-s",
                "30s:0",
                "-t",
                "http_req_failed=rate<0.01",
                "--out-dir",
                "reports",
            ])
            .unwrap();
        let config = runtime.build_config("search").unwrap();

        assert_eq!(config.name, "search");
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0], Stage::new(Duration::from_secs(30), 10));
        assert_eq!(config.thresholds.len(), 2);
        assert_eq!(config.out_dir, Some(PathBuf::from("reports")));
    }

    #[traced_test]
    #[tokio::test]
    async fn exit_codes() {
        let ok = VolleyRuntime::new()
            .scenario("search")
            .stage(Duration::from_secs(10), 2)
            .interrupt(never())
            .run_from(SCENARIOS)
            .await;
        assert_eq!(ok, EXIT_OK);

        let interrupted = VolleyRuntime::new()
            .scenario("search")
            .stage(Duration::from_secs(10), 2)
            .interrupt(future::ready(()))
            .run_from(SCENARIOS)
            .await;
        assert_eq!(interrupted, EXIT_EXTERNAL_ABORT);

        let no_stages = VolleyRuntime::new()
            .scenario("search")
            .interrupt(never())
            .run_from(SCENARIOS)
            .await;
        assert_eq!(no_stages, EXIT_INVALID_CONFIG);
        assert!(logs_contain("Invalid configuration for search"));

        let bad_threshold = VolleyRuntime::new()
            .scenario("search")
            .stage(Duration::from_secs(10), 2)
            .threshold("http_req_failed", "rate<")
            .interrupt(never())
            .run_from(SCENARIOS)
            .await;
        assert_eq!(bad_threshold, EXIT_INVALID_CONFIG);

        let unknown = VolleyRuntime::new()
            .scenario("login")
            .interrupt(never())
            .run_from(SCENARIOS)
            .await;
        assert_eq!(unknown, EXIT_INVALID_CONFIG);
        assert!(logs_contain("Unknown scenario `login`"));
    }
}

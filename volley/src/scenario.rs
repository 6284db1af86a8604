//! Scenario handle and its builder methods
use crate::http::Transport;
use crate::orchestrator::Orchestrator;
use crate::report::{HtmlReport, JsonSummary, Renderer, TextSummary};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::{
    future::Future,
    num::NonZeroU32,
    path::PathBuf,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};
use volley_core::{RampStart, RunConfig, RunResult, Stage, ThresholdSpec};

/// Load test scenario
///
/// Not intended for manual creation, use the [`#[scenario]`](volley_macros::scenario) macro
/// which turns an `async fn` into a function returning this handle. Awaiting it runs the
/// scenario to its verdict.
#[pin_project::pin_project]
pub struct Scenario<T> {
    func: T,
    runner_fut: Option<Pin<Box<dyn Future<Output = RunResult> + Send>>>,
    config: RunConfig,
    transport: Option<Arc<dyn Transport>>,
    renderers: Vec<Box<dyn Renderer>>,
    interrupt: Option<BoxFuture<'static, ()>>,
}

impl<T> Scenario<T> {
    #[doc(hidden)]
    pub fn new(name: &str, func: T) -> Self {
        Self {
            func,
            runner_fut: None,
            config: RunConfig::new(name),
            transport: None,
            renderers: vec![],
            interrupt: None,
        }
    }
}

impl<T, F> Future for Scenario<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    type Output = RunResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let runner = this.runner_fut.get_or_insert_with(|| {
            Box::pin(run_scenario(
                this.func.clone(),
                this.config.clone(),
                this.transport.clone(),
                std::mem::take(this.renderers),
                this.interrupt.take(),
            ))
        });
        runner.as_mut().poll(cx)
    }
}

pub trait ConfigurableScenario<T: Send>: Future<Output = T> + Sized + Send {
    fn stage(self, duration: Duration, target: u64) -> Self;
    fn stages(self, stages: impl IntoIterator<Item = Stage>) -> Self;
    fn ramp_start(self, start: RampStart) -> Self;
    fn duration(self, duration: Duration) -> Self;
    fn threshold(self, metric: &str, expression: &str) -> Self;
    fn abort_threshold(self, metric: &str, expression: &str) -> Self;
    fn tick(self, tick: Duration) -> Self;
    fn drain_timeout(self, timeout: Duration) -> Self;
    fn request_timeout(self, timeout: Duration) -> Self;
    fn think_time(self, think_time: Duration) -> Self;
    fn threshold_interval(self, interval: Duration) -> Self;
    fn rps(self, rps: NonZeroU32) -> Self;
    fn precision(self, significant_digits: u8) -> Self;
    fn out_dir(self, dir: impl Into<PathBuf>) -> Self;
    fn config(self, config: RunConfig) -> Self;
    fn transport(self, transport: Arc<dyn Transport>) -> Self;
    fn renderer(self, renderer: impl Renderer + 'static) -> Self;
    fn interrupt(self, signal: impl Future<Output = ()> + Send + 'static) -> Self;
}

impl<T, F> ConfigurableScenario<RunResult> for Scenario<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    /// Append a stage ramping linearly to `target` virtual users over `duration`.
    ///
    /// # Example
    /// ```no_run
    /// use volley::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let report = search()
    ///         .stage(Duration::from_secs(60), 5)
    ///         .stage(Duration::from_secs(90), 20)
    ///         .stage(Duration::from_secs(60), 0)
    ///         .threshold("http_req_failed", "rate<0.01")
    ///         .await
    ///         .unwrap();
    ///
    ///     std::process::exit(report.exit_code().into());
    /// }
    ///
    /// #[scenario]
    /// async fn search() {
    /// }
    /// ```
    fn stage(mut self, duration: Duration, target: u64) -> Self {
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.config.stages.extend(stages);
        self
    }

    /// Where the first stage ramps from. Defaults to zero users.
    fn ramp_start(mut self, start: RampStart) -> Self {
        self.config.ramp_start = start;
        self
    }

    /// Run for exactly `duration`, cutting the stages short or holding the
    /// last target until the end.
    fn duration(mut self, duration: Duration) -> Self {
        self.config.duration = Some(duration);
        self
    }

    /// Add a pass/fail criterion on a metric, such as `p(99)<500` on
    /// `http_req_duration` or `rate<0.01` on `http_req_failed{status:500}`.
    ///
    /// # Example
    /// ```no_run
    /// use volley::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     search()
    ///         .stage(Duration::from_secs(30), 10)
    ///         .threshold("http_req_duration", "p(99)<500")
    ///         .threshold("checks{check:status is 200}", "rate>0.99")
    ///         .await
    ///         .unwrap();
    /// }
    ///
    /// #[scenario]
    /// async fn search() {
    /// }
    /// ```
    fn threshold(mut self, metric: &str, expression: &str) -> Self {
        self.config.add_threshold(metric, ThresholdSpec::from(expression));
        self
    }

    /// Like [`threshold`](Self::threshold), and stop the run as soon as it fails.
    fn abort_threshold(mut self, metric: &str, expression: &str) -> Self {
        self.config.add_threshold(
            metric,
            ThresholdSpec::Detailed {
                threshold: expression.to_string(),
                abort_on_fail: true,
            },
        );
        self
    }

    fn tick(mut self, tick: Duration) -> Self {
        self.config.tick = tick;
        self
    }

    fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    fn think_time(mut self, think_time: Duration) -> Self {
        self.config.think_time = Some(think_time);
        self
    }

    /// How often `abort_threshold`s are checked during the run.
    fn threshold_interval(mut self, interval: Duration) -> Self {
        self.config.threshold_interval = interval;
        self
    }

    /// Cap requests per second across every virtual user.
    fn rps(mut self, rps: NonZeroU32) -> Self {
        self.config.rps = Some(rps);
        self
    }

    fn precision(mut self, significant_digits: u8) -> Self {
        self.config.histogram_precision = significant_digits;
        self
    }

    /// Write `summary.json` and `result.html` to `dir` in addition to the
    /// console summary. Ignored when custom renderers are set.
    fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.out_dir = Some(dir.into());
        self
    }

    /// Replace the whole configuration, keeping the scenario's name.
    fn config(mut self, config: RunConfig) -> Self {
        let name = std::mem::take(&mut self.config.name);
        self.config = RunConfig { name, ..config };
        self
    }

    fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderers.push(Box::new(renderer));
        self
    }

    fn interrupt(mut self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        self.interrupt = Some(signal.boxed());
        self
    }
}

#[cfg(feature = "rt")]
mod runtime {
    use super::*;
    use volley_runtime::RunnableScenario;

    impl<T, F> RunnableScenario for Scenario<T>
    where
        T: Fn() -> F + Send + Sync + 'static + Clone,
        F: Future<Output = ()> + Send + 'static,
    {
        fn name(&self) -> &str {
            &self.config.name
        }

        fn configure(
            &self,
            config: RunConfig,
            interrupt: BoxFuture<'static, ()>,
        ) -> Pin<Box<dyn RunnableScenario>> {
            Box::pin(Scenario {
                func: self.func.clone(),
                runner_fut: None,
                config,
                transport: self.transport.clone(),
                renderers: vec![],
                interrupt: Some(interrupt),
            })
        }
    }
}

#[instrument(name = "scenario", skip_all, fields(name = config.name))]
async fn run_scenario<T, F>(
    func: T,
    config: RunConfig,
    transport: Option<Arc<dyn Transport>>,
    mut renderers: Vec<Box<dyn Renderer>>,
    interrupt: Option<BoxFuture<'static, ()>>,
) -> RunResult
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    debug!("Running {} with config {:?}", config.name, &config);
    let validated = config.validate().map_err(|err| {
        error!("Invalid configuration for {}: {err}", config.name);
        err
    })?;

    if renderers.is_empty() && config.out_dir.is_some() {
        renderers = vec![
            Box::new(JsonSummary::default()),
            Box::new(HtmlReport::default()),
            Box::new(TextSummary::default()),
        ];
    }

    let mut orchestrator = Orchestrator::new(func, validated).renderers(renderers);
    if let Some(transport) = transport {
        orchestrator = orchestrator.transport(transport);
    }
    if let Some(interrupt) = interrupt {
        orchestrator = orchestrator.interrupt(interrupt);
    }

    Ok(orchestrator.run().await)
}

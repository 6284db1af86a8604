//! Drives a single run from the first ramp tick to the dispatched verdict
use crate::aggregator::Aggregator;
use crate::batch::BatchExecutor;
use crate::context::RunContext;
use crate::http::{HttpTransport, Transport};
use crate::ramp::{RampCommand, RampController, RampSchedule};
use crate::report::{self, Renderer, TextSummary};
use crate::scheduler::VuPool;
use crate::threshold::{abort_triggered, verdict};
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};
use volley_core::{
    Anomaly, MetricSample, RunOutcome, ValidatedConfig, VerdictReport, INTERRUPTED_ITERATIONS,
};

/// Lifecycle of a run. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Ramping,
    Draining,
    Completed,
}

pub struct Orchestrator<T> {
    scenario: T,
    config: ValidatedConfig,
    transport: Arc<dyn Transport>,
    renderers: Vec<Box<dyn Renderer>>,
    interrupt: Option<BoxFuture<'static, ()>>,
    state: watch::Sender<RunState>,
}

impl<T, F> Orchestrator<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    pub fn new(scenario: T, config: ValidatedConfig) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            scenario,
            config,
            transport: Arc::new(HttpTransport::new()),
            renderers: vec![],
            interrupt: None,
            state,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Add a renderer. Without any, the run prints a [`TextSummary`].
    pub fn renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderers.push(renderer);
        self
    }

    pub fn renderers(mut self, renderers: Vec<Box<dyn Renderer>>) -> Self {
        self.renderers.extend(renderers);
        self
    }

    /// Stop the run early, with [`RunOutcome::Interrupted`], once `signal` resolves.
    pub fn interrupt(mut self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        self.interrupt = Some(signal.boxed());
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    #[instrument(name = "run", skip_all, fields(scenario = %self.config.config.name))]
    pub async fn run(self) -> VerdictReport {
        let Orchestrator {
            scenario,
            config: validated,
            transport,
            mut renderers,
            interrupt,
            state,
        } = self;
        let config = &validated.config;

        let aggregator = Arc::new(Aggregator::new(
            config.histogram_precision,
            validated.submetrics(),
        ));
        let mut executor =
            BatchExecutor::new(transport, aggregator.clone(), config.request_timeout);
        if let Some(rps) = config.rps {
            executor = executor.with_rps(rps);
        }
        let context = Arc::new(RunContext::new(aggregator.clone(), executor));
        let mut pool = VuPool::new(scenario, context, config.think_time);

        let schedule = RampSchedule::from_config(config);
        info!(
            "Starting run of {}, up to {} virtual users",
            humantime::format_duration(schedule.total_duration()),
            schedule.max_target()
        );
        let start = Instant::now();
        let (mut commands, ramp) =
            RampController::new(schedule.clone(), config.tick).spawn(start);
        state.send_replace(RunState::Ramping);

        let mut interrupt = interrupt.unwrap_or_else(|| future::pending::<()>().boxed());
        let watch_thresholds = validated.has_abort_thresholds();
        let mut threshold_check = interval(config.threshold_interval);
        threshold_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut seen_nonzero = false;
        let outcome = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RampCommand::ScaleTo(target)) => {
                        pool.scale_to(target as usize);
                        if target > 0 {
                            seen_nonzero = true;
                        } else if seen_nonzero && schedule.remaining_peak(start.elapsed()) == 0 {
                            debug!("No users left to schedule");
                            break RunOutcome::Completed;
                        }
                    }
                    Some(RampCommand::Finished) | None => break RunOutcome::Completed,
                },
                _ = &mut interrupt => {
                    warn!("Run interrupted");
                    break RunOutcome::Interrupted;
                }
                _ = threshold_check.tick(), if watch_thresholds => {
                    let snapshot = aggregator.snapshot();
                    if let Some(threshold) = abort_triggered(&snapshot, &validated.thresholds) {
                        warn!(
                            "Threshold {} {} failed, aborting run",
                            threshold.selector, threshold.source
                        );
                        break RunOutcome::ThresholdAborted;
                    }
                }
            }
        };
        ramp.abort();

        state.send_replace(RunState::Draining);
        info!("Draining {} virtual users", pool.active());
        let drain = pool.drain(config.drain_timeout).await;

        let mut anomalies = vec![];
        if drain.forced > 0 {
            aggregator.record(MetricSample::counter(
                INTERRUPTED_ITERATIONS,
                drain.forced as f64,
                aggregator.elapsed(),
            ));
            anomalies.push(Anomaly::DrainTimeoutExceeded {
                timeout: config.drain_timeout,
                forced: drain.forced,
            });
        }

        let report = verdict(
            &config.name,
            aggregator.snapshot(),
            &validated.thresholds,
            outcome,
            anomalies,
            pool.peak() as u64,
        );
        state.send_replace(RunState::Completed);
        info!(
            "Run finished: {:?}, {}",
            report.outcome,
            if report.overall_pass { "passed" } else { "failed" }
        );

        if renderers.is_empty() {
            renderers.push(Box::new(TextSummary::default()));
        }
        report::dispatch(&renderers, &report, config.out_dir.as_deref());

        report
    }
}

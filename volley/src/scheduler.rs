//! Virtual user pool
use crate::check::panic_message;
use crate::context::{RunContext, VuContext, VU_CONTEXT};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn, Instrument};
use volley_core::{MetricSample, ITERATIONS, ITERATION_DURATION, ITERATION_FAILED, VUS, VUS_MAX};

/// Outcome of [`VuPool::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Users still running when the drain began that finished their iteration
    pub completed: usize,
    /// Users aborted when the drain timeout expired
    pub forced: usize,
}

struct VuHandle {
    id: u64,
    retire: CancellationToken,
}

/// Spawns and retires virtual users running a scenario in a loop.
pub struct VuPool<T> {
    scenario: T,
    context: Arc<RunContext>,
    think_time: Option<Duration>,
    tasks: JoinSet<()>,
    active: Vec<VuHandle>,
    next_id: u64,
    peak: usize,
}

impl<T, F> VuPool<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    pub fn new(scenario: T, context: Arc<RunContext>, think_time: Option<Duration>) -> Self {
        Self {
            scenario,
            context,
            think_time,
            tasks: JoinSet::new(),
            active: vec![],
            next_id: 1,
            peak: 0,
        }
    }

    /// Users that have not been asked to retire.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// Highest number of simultaneously active users so far.
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Spawn or retire users until `target` are active. The newest users retire first,
    /// each after finishing its current iteration.
    pub fn scale_to(&mut self, target: usize) {
        self.reap();

        if target == self.active.len() {
            return;
        }

        if self.context.is_stopped() {
            debug!("Ignoring scale to {target}, run is stopping");
            return;
        }

        while self.active.len() < target {
            self.spawn_user();
        }

        while self.active.len() > target {
            if let Some(user) = self.active.pop() {
                trace!("Retiring virtual user {}", user.id);
                user.retire.cancel();
            }
        }

        debug!("Scaled to {target} virtual users");
        self.peak = self.peak.max(self.active.len());
        self.context.set_active_users(self.active.len());

        let aggregator = self.context.aggregator();
        let offset = aggregator.elapsed();
        aggregator.record(MetricSample::gauge(VUS, self.active.len() as f64, offset));
        aggregator.record(MetricSample::gauge(VUS_MAX, self.peak as f64, offset));
    }

    fn spawn_user(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let retire = self.context.retire_token();
        let vu = VuContext {
            run: self.context.clone(),
            id,
        };
        let user = run_user(
            self.scenario.clone(),
            self.context.clone(),
            retire.clone(),
            self.think_time,
        );

        self.tasks.spawn(
            VU_CONTEXT
                .scope(vu, user)
                .instrument(tracing::debug_span!("vu", id)),
        );
        self.active.push(VuHandle { id, retire });
    }

    /// Collect users that already exited. Returns how many were collected.
    fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(err) = joined {
                error!("Virtual user task failed: {err}");
            }
            reaped += 1;
        }
        reaped
    }

    /// Stop the run, which retires every user.
    pub fn stop_all(&mut self) {
        self.context.stop();
        self.active.clear();
        self.context.set_active_users(0);

        let aggregator = self.context.aggregator();
        aggregator.record(MetricSample::gauge(VUS, 0., aggregator.elapsed()));
    }

    /// Stop every user and wait up to `timeout` for in-flight iterations to
    /// finish. Users still running at the deadline are aborted.
    pub async fn drain(&mut self, timeout: Duration) -> DrainReport {
        let reaped = self.reap();
        trace!("Collected {reaped} retired virtual users before draining");
        self.stop_all();

        let deadline = Instant::now() + timeout;
        let mut report = DrainReport::default();
        loop {
            match timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(Ok(()))) => report.completed += 1,
                Ok(Some(Err(err))) => {
                    error!("Virtual user task failed: {err}");
                    report.completed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    report.forced = self.tasks.len();
                    warn!(
                        "Drain timeout of {} exceeded, aborting {} virtual users",
                        humantime::format_duration(timeout),
                        report.forced
                    );
                    self.tasks.abort_all();
                    while self.tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        debug!("Drain finished: {report:?}");
        report
    }
}

async fn run_user<T, F>(
    scenario: T,
    context: Arc<RunContext>,
    retire: CancellationToken,
    think_time: Option<Duration>,
) where
    T: Fn() -> F + Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    trace!("Virtual user started");
    loop {
        if retire.is_cancelled() {
            break;
        }

        let start = Instant::now();
        let result = AssertUnwindSafe(scenario()).catch_unwind().await;
        let elapsed = start.elapsed();

        let aggregator = context.aggregator();
        let offset = aggregator.elapsed();
        aggregator.record(MetricSample::counter(ITERATIONS, 1., offset));
        aggregator.record(MetricSample::trend(
            ITERATION_DURATION,
            elapsed.as_secs_f64() * 1_000.,
            offset,
        ));
        aggregator.record(MetricSample::rate(ITERATION_FAILED, result.is_err(), offset));

        if let Err(panic) = result {
            warn!("Iteration panicked: {}", panic_message(&*panic));
        }

        if let Some(think_time) = think_time {
            tokio::select! {
                _ = sleep(think_time) => {}
                _ = retire.cancelled() => {}
            }
        }
    }
    trace!("Virtual user retired");
}

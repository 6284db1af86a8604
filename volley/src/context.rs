//! Shared state of a run and the per-user task-local handle to it
use crate::aggregator::Aggregator;
use crate::batch::BatchExecutor;
use crate::check::CheckEvaluator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// State owned by a run and shared with every virtual user.
pub struct RunContext {
    aggregator: Arc<Aggregator>,
    executor: BatchExecutor,
    checks: CheckEvaluator,
    stop: CancellationToken,
    active: AtomicUsize,
}

impl RunContext {
    pub fn new(aggregator: Arc<Aggregator>, executor: BatchExecutor) -> Self {
        Self {
            checks: CheckEvaluator::new(aggregator.clone()),
            aggregator,
            executor,
            stop: CancellationToken::new(),
            active: AtomicUsize::new(0),
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }

    pub fn checks(&self) -> &CheckEvaluator {
        &self.checks
    }

    /// Ask every virtual user to stop after its current iteration.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// Retire token for a new virtual user, cancelled by [`stop`](Self::stop) as well.
    pub(crate) fn retire_token(&self) -> CancellationToken {
        self.stop.child_token()
    }

    pub fn active_users(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn set_active_users(&self, count: usize) {
        self.active.store(count, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub(crate) struct VuContext {
    pub run: Arc<RunContext>,
    pub id: u64,
}

tokio::task_local! {
    pub(crate) static VU_CONTEXT: VuContext;
}

pub(crate) fn current() -> Option<VuContext> {
    VU_CONTEXT.try_with(|vu| vu.clone()).ok()
}

/// Number of the calling virtual user, starting at 1. `None` outside of a run.
pub fn vu_id() -> Option<u64> {
    VU_CONTEXT.try_with(|vu| vu.id).ok()
}

/// Evaluator of the calling virtual user, or a detached one outside of a run.
pub(crate) fn check_evaluator() -> CheckEvaluator {
    match current() {
        Some(vu) => vu.run.checks().clone(),
        None => {
            warn!("check called outside of a scenario, results are discarded");
            CheckEvaluator::new(Arc::new(Aggregator::default()))
        }
    }
}

//! Stage schedule and the task that drives it
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{RampStart, RunConfig, Stage};

/// Piecewise-linear target of virtual users over time.
#[derive(Debug, Clone, PartialEq)]
pub struct RampSchedule {
    stages: Vec<Stage>,
    start: RampStart,
    length: Duration,
}

impl RampSchedule {
    pub fn new(stages: Vec<Stage>, start: RampStart) -> Self {
        let length = stages.iter().map(|s| s.duration).sum();
        Self {
            stages,
            start,
            length,
        }
    }

    /// Schedule of a run, honouring its `duration` override.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            stages: config.stages.clone(),
            start: config.ramp_start,
            length: config.run_length(),
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.length
    }

    fn initial_target(&self) -> u64 {
        match (self.start, self.stages.first()) {
            (RampStart::FirstStage, Some(first)) => first.target,
            _ => 0,
        }
    }

    /// Target number of users `elapsed` into the run.
    ///
    /// Equals each stage's target exactly at the end of that stage. A stage with
    /// zero duration is a jump, and the jump instant takes the new value. Past
    /// the last stage the last target holds until the run ends, then it is 0.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if elapsed > self.length {
            return 0;
        }

        let mut from = self.initial_target();
        let mut stage_start = Duration::ZERO;
        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                return interpolate(from, stage.target, progress);
            }
            from = stage.target;
            stage_start = stage_end;
        }
        from
    }

    /// Highest target from `elapsed` until the end of the run.
    pub fn remaining_peak(&self, elapsed: Duration) -> u64 {
        if elapsed > self.length {
            return 0;
        }

        let mut peak = self.target_at(elapsed).max(self.target_at(self.length));
        let mut stage_end = Duration::ZERO;
        for stage in &self.stages {
            stage_end += stage.duration;
            if stage_end > elapsed && stage_end <= self.length {
                peak = peak.max(stage.target);
            }
        }
        peak
    }

    /// Highest target of the whole schedule.
    pub fn max_target(&self) -> u64 {
        self.remaining_peak(Duration::ZERO)
    }
}

fn interpolate(from: u64, to: u64, progress: f64) -> u64 {
    let value = from as f64 + (to as f64 - from as f64) * progress.clamp(0., 1.);
    value.round() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampCommand {
    ScaleTo(u64),
    /// The schedule has run its full length
    Finished,
}

/// Re-evaluates a [`RampSchedule`] every tick and emits scaling commands.
pub struct RampController {
    schedule: RampSchedule,
    tick: Duration,
}

impl RampController {
    pub fn new(schedule: RampSchedule, tick: Duration) -> Self {
        Self { schedule, tick }
    }

    pub fn schedule(&self) -> &RampSchedule {
        &self.schedule
    }

    /// Start ticking relative to `start`. Commands are only sent when the
    /// target changes; `Finished` is always the last command.
    pub fn spawn(self, start: Instant) -> (UnboundedReceiver<RampCommand>, JoinHandle<()>) {
        let (tx, rx) = unbounded_channel();
        let handle = tokio::spawn(self.run(start, tx));
        (rx, handle)
    }

    async fn run(self, start: Instant, tx: UnboundedSender<RampCommand>) {
        let mut interval = interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let end = start + self.schedule.total_duration();
        let mut last = None;

        loop {
            tokio::select! {
                biased;

                _ = sleep_until(end) => {
                    debug!("Ramp schedule finished");
                    let _ = tx.send(RampCommand::Finished);
                    return;
                }
                _ = interval.tick() => {
                    let target = self.schedule.target_at(start.elapsed());
                    if last != Some(target) {
                        debug!("Ramp target {target}");
                        if tx.send(RampCommand::ScaleTo(target)).is_err() {
                            return;
                        }
                        last = Some(target);
                    }
                }
            }
        }
    }
}

//! Named assertions over results
use crate::aggregator::Aggregator;
use crate::context;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::{MetricSample, CHECKS, CHECK_FAULTS, CHECK_TAG};

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail,
    /// The predicate panicked; counted as a failure
    Fault(String),
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, CheckOutcome::Pass)
    }
}

/// Runs check predicates in isolation and records their outcome.
#[derive(Clone)]
pub struct CheckEvaluator {
    aggregator: Arc<Aggregator>,
}

impl CheckEvaluator {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }

    pub fn evaluate<T, P>(&self, name: &str, value: &T, predicate: P) -> CheckOutcome
    where
        T: ?Sized,
        P: Fn(&T) -> bool,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(|| predicate(value))) {
            Ok(true) => CheckOutcome::Pass,
            Ok(false) => CheckOutcome::Fail,
            Err(panic) => CheckOutcome::Fault(panic_message(&*panic)),
        };

        let offset = self.aggregator.elapsed();
        self.aggregator
            .record(MetricSample::rate(CHECKS, outcome.passed(), offset).with_tag(CHECK_TAG, name));

        if let CheckOutcome::Fault(message) = &outcome {
            warn!("Check `{name}` panicked: {message}");
            self.aggregator.record(
                MetricSample::counter(CHECK_FAULTS, 1., offset).with_tag(CHECK_TAG, name),
            );
        }

        outcome
    }
}

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// A reusable, ordered set of named checks.
///
/// # Example
/// ```no_run
/// use volley::prelude::*;
/// use volley::http::{self, Request, Response};
///
/// #[scenario]
/// async fn search() {
///     let checks = Checks::<Response>::new()
///         .with("status is 200", |r| r.status == 200)
///         .with("has document", |r| r.text().contains("14_1.txt"));
///
///     for response in http::batch(vec![Request::get("http://localhost:8080/the")]).await {
///         checks.run(&response);
///     }
/// }
/// ```
pub struct Checks<T: ?Sized> {
    checks: Vec<(String, Predicate<T>)>,
}

impl<T: ?Sized> Checks<T> {
    pub fn new() -> Self {
        Self { checks: vec![] }
    }

    pub fn with<P>(mut self, name: &str, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.checks.push((name.to_string(), Box::new(predicate)));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Evaluate every check against `value`; true if all passed.
    ///
    /// Every check runs even after one fails.
    pub fn evaluate(&self, evaluator: &CheckEvaluator, value: &T) -> bool {
        self.checks.iter().fold(true, |all, (name, predicate)| {
            evaluator.evaluate(name, value, predicate).passed() && all
        })
    }

    /// Evaluate against the evaluator of the calling virtual user.
    pub fn run(&self, value: &T) -> bool {
        self.evaluate(&context::check_evaluator(), value)
    }
}

impl<T: ?Sized> Default for Checks<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a single named check within the current virtual user.
///
/// A threshold can target one check as `checks{check:<name>}`. Names may contain
/// `,` and `:`, but a `,` followed by a bare `key:` reads as a second tag.
pub fn check<T, P>(value: &T, name: &str, predicate: P) -> bool
where
    T: ?Sized,
    P: Fn(&T) -> bool,
{
    context::check_evaluator()
        .evaluate(name, value, predicate)
        .passed()
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn evaluator() -> (Arc<Aggregator>, CheckEvaluator) {
        let aggregator = Arc::new(Aggregator::default());
        (aggregator.clone(), CheckEvaluator::new(aggregator))
    }

    #[test]
    fn pass_and_fail_are_recorded() {
        let (aggregator, evaluator) = evaluator();
        assert_eq!(
            evaluator.evaluate("is even", &4, |v| v % 2 == 0),
            CheckOutcome::Pass
        );
        assert_eq!(
            evaluator.evaluate("is even", &3, |v| v % 2 == 0),
            CheckOutcome::Fail
        );

        let snapshot = aggregator.snapshot();
        let checks = snapshot.get(CHECKS).unwrap();
        assert_eq!(checks.count, 2);
        assert_eq!(checks.non_zero, 1);
        assert_eq!(snapshot.get("checks{check:is even}").unwrap().count, 2);
        assert!(snapshot.get(CHECK_FAULTS).is_none());
    }

    #[test]
    #[traced_test]
    fn panicking_predicate_is_a_fault() {
        let (aggregator, evaluator) = evaluator();
        let outcome = evaluator.evaluate("body parses", "not json", |body: &str| {
            let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
            parsed.is_object()
        });

        assert!(matches!(outcome, CheckOutcome::Fault(_)));
        assert!(!outcome.passed());

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.get(CHECKS).unwrap().non_zero, 0);
        assert_eq!(snapshot.get(CHECK_FAULTS).unwrap().sum, 1.);
        assert!(logs_contain("Check `body parses` panicked"));
    }

    #[test]
    fn check_set_runs_every_check() {
        let (aggregator, evaluator) = evaluator();
        let checks = Checks::<str>::new()
            .with("not empty", |s| !s.is_empty())
            .with("has marker", |s| s.contains("14_1.txt"))
            .with("short", |s| s.len() < 100);

        assert!(!checks.evaluate(&evaluator, "14_8.txt"));
        assert!(checks.evaluate(&evaluator, "14_1.txt"));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.get(CHECKS).unwrap().count, 6);
        assert_eq!(snapshot.checks().count(), 3);
    }

    #[test]
    fn threshold_reaches_check_with_separators() {
        let (aggregator, evaluator) = evaluator();
        let name = "status 200, body ok: 14_1.txt";
        evaluator.evaluate(name, &200u16, |s| *s == 200);
        evaluator.evaluate(name, &503u16, |s| *s == 200);

        let mut config = volley_core::RunConfig::new("checks");
        config.stages = vec![volley_core::Stage::new(Duration::from_secs(1), 1)];
        config.add_threshold(&format!("checks{{check:{name}}}"), "rate>=0.5".into());
        let thresholds = config.validate().unwrap().thresholds;

        let snapshot = aggregator.snapshot();
        let results = crate::threshold::evaluate(&snapshot, &thresholds);
        assert_eq!(results[0].status, volley_core::ThresholdStatus::Passed);
        assert_eq!(results[0].observed, Some(0.5));
        assert_eq!(snapshot.checks().next().map(|(n, _)| n), Some(name));
    }

    #[test]
    fn panic_messages() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&Duration::ZERO), "unknown panic");
    }
}

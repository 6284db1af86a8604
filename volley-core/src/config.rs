use crate::{
    ConfigError, MetricSelector, Threshold, DEFAULT_DRAIN_TIMEOUT, DEFAULT_HISTOGRAM_PRECISION,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_THRESHOLD_INTERVAL, DEFAULT_TICK, MAX_HISTOGRAM_PRECISION,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A ramp segment: reach `target` virtual users by the end of `duration`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Where the first stage ramps from.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RampStart {
    /// Interpolate from zero users up to the first stage's target.
    #[default]
    Zero,
    /// Hold the first stage's target for its whole duration.
    FirstStage,
}

/// A threshold as written in configuration, either a bare expression or
/// an object with extra flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdSpec {
    Expression(String),
    Detailed {
        threshold: String,
        #[serde(default, rename = "abortOnFail", alias = "abort_on_fail")]
        abort_on_fail: bool,
    },
}

impl ThresholdSpec {
    pub fn expression(&self) -> &str {
        match self {
            ThresholdSpec::Expression(expr) => expr,
            ThresholdSpec::Detailed { threshold, .. } => threshold,
        }
    }

    pub fn abort_on_fail(&self) -> bool {
        match self {
            ThresholdSpec::Expression(_) => false,
            ThresholdSpec::Detailed { abort_on_fail, .. } => *abort_on_fail,
        }
    }
}

impl From<&str> for ThresholdSpec {
    fn from(expr: &str) -> Self {
        ThresholdSpec::Expression(expr.to_string())
    }
}

/// Everything a run needs besides the scenario itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub name: String,
    pub stages: Vec<Stage>,
    pub ramp_start: RampStart,
    /// Overrides the run length implied by the stages
    #[serde(with = "humantime_serde")]
    pub duration: Option<Duration>,
    pub thresholds: BTreeMap<String, Vec<ThresholdSpec>>,
    #[serde(with = "humantime_serde")]
    pub tick: Duration,
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub think_time: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub threshold_interval: Duration,
    /// Global cap on requests per second across every virtual user
    pub rps: Option<NonZeroU32>,
    pub histogram_precision: u8,
    pub out_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            stages: vec![],
            ramp_start: RampStart::default(),
            duration: None,
            thresholds: BTreeMap::new(),
            tick: DEFAULT_TICK,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            think_time: None,
            threshold_interval: DEFAULT_THRESHOLD_INTERVAL,
            rps: None,
            histogram_precision: DEFAULT_HISTOGRAM_PRECISION,
            out_dir: None,
        }
    }
}

impl RunConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn add_threshold(&mut self, metric: &str, spec: ThresholdSpec) {
        self.thresholds
            .entry(metric.to_string())
            .or_default()
            .push(spec);
    }

    /// Sum of all stage durations.
    pub fn stages_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Total run length; the `duration` override wins over the stages.
    pub fn run_length(&self) -> Duration {
        self.duration.unwrap_or_else(|| self.stages_duration())
    }

    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }

        if self.run_length().is_zero() {
            return Err(ConfigError::ZeroLength);
        }

        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }

        if self.threshold_interval.is_zero() {
            return Err(ConfigError::ZeroThresholdInterval);
        }

        if !(1..=MAX_HISTOGRAM_PRECISION).contains(&self.histogram_precision) {
            return Err(ConfigError::InvalidPrecision(self.histogram_precision));
        }

        let mut thresholds = vec![];
        for (metric, specs) in &self.thresholds {
            let invalid = |source| ConfigError::InvalidThreshold {
                metric: metric.clone(),
                expression: String::new(),
                source,
            };
            let selector: MetricSelector = metric.parse().map_err(invalid)?;

            for spec in specs {
                let expression =
                    spec.expression()
                        .parse()
                        .map_err(|source| ConfigError::InvalidThreshold {
                            metric: metric.clone(),
                            expression: spec.expression().to_string(),
                            source,
                        })?;

                thresholds.push(Threshold {
                    selector: selector.clone(),
                    expression,
                    source: spec.expression().trim().to_string(),
                    abort_on_fail: spec.abort_on_fail(),
                });
            }
        }

        Ok(ValidatedConfig {
            config: self.clone(),
            thresholds,
            run_length: self.run_length(),
        })
    }
}

/// A configuration that passed validation, with its thresholds parsed.
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub config: RunConfig,
    pub thresholds: Vec<Threshold>,
    pub run_length: Duration,
}

impl ValidatedConfig {
    /// Selectors that need their own sub-metric in the aggregator.
    pub fn submetrics(&self) -> Vec<MetricSelector> {
        let mut selectors: Vec<_> = self
            .thresholds
            .iter()
            .map(|t| t.selector.clone())
            .filter(MetricSelector::is_submetric)
            .collect();
        selectors.sort();
        selectors.dedup();
        selectors
    }

    pub fn has_abort_thresholds(&self) -> bool {
        self.thresholds.iter().any(|t| t.abort_on_fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Aggregation, ExpressionError};

    fn one_minute_five_users() -> RunConfig {
        let mut config = RunConfig::new("index");
        config.stages = vec![Stage::new(Duration::from_secs(60), 5)];
        config
    }

    #[test]
    fn parse_json_config() {
        let config = RunConfig::from_json(
            r#"{
                "name": "inverted-index",
                "stages": [
                    { "duration": "1m", "target": 5 },
                    { "duration": "1m30s", "target": 20 },
                    { "duration": "1m", "target": 0 }
                ],
                "thresholds": {
                    "http_req_duration": ["p(99)<500"],
                    "http_req_failed": [{ "threshold": "rate<0.01", "abortOnFail": true }]
                },
                "drain_timeout": "10s",
                "rps": 100
            }"#,
        )
        .unwrap();

        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stages[1].duration, Duration::from_secs(90));
        assert_eq!(config.run_length(), Duration::from_secs(210));
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
        assert_eq!(config.tick, DEFAULT_TICK);
        assert_eq!(config.rps, NonZeroU32::new(100));
        assert_eq!(config.ramp_start, RampStart::Zero);

        let validated = config.validate().unwrap();
        assert_eq!(validated.thresholds.len(), 2);
        assert!(validated.has_abort_thresholds());
        let failed = validated
            .thresholds
            .iter()
            .find(|t| t.selector.metric == "http_req_failed")
            .unwrap();
        assert!(failed.abort_on_fail);
        assert_eq!(failed.expression.aggregation, Aggregation::Rate);
    }

    #[test]
    fn duration_override_wins() {
        let mut config = one_minute_five_users();
        config.duration = Some(Duration::from_secs(5));
        assert_eq!(config.run_length(), Duration::from_secs(5));
    }

    #[test]
    fn reject_empty_stages() {
        let config = RunConfig::new("empty");
        assert!(matches!(config.validate(), Err(ConfigError::NoStages)));
    }

    #[test]
    fn reject_zero_length() {
        let mut config = RunConfig::new("zero");
        config.stages = vec![Stage::new(Duration::ZERO, 5)];
        assert!(matches!(config.validate(), Err(ConfigError::ZeroLength)));
    }

    #[test]
    fn reject_zero_tick_and_bad_precision() {
        let mut config = one_minute_five_users();
        config.tick = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTick)));

        let mut config = one_minute_five_users();
        config.threshold_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroThresholdInterval)
        ));

        let mut config = one_minute_five_users();
        config.histogram_precision = 6;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPrecision(6))
        ));
    }

    #[test]
    fn reject_malformed_threshold() {
        let mut config = one_minute_five_users();
        config.add_threshold("http_req_duration", "p(99) 500".into());
        match config.validate() {
            Err(ConfigError::InvalidThreshold {
                metric,
                expression,
                source,
            }) => {
                assert_eq!(metric, "http_req_duration");
                assert_eq!(expression, "p(99) 500");
                assert_eq!(source, ExpressionError::MissingOperator);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unknown_metric_is_not_a_config_error() {
        let mut config = one_minute_five_users();
        config.add_threshold("nonexistent_metric", "count>0".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn submetrics_are_deduplicated() {
        let mut config = one_minute_five_users();
        config.add_threshold("http_req_duration{status:200}", "p(95)<300".into());
        config.add_threshold("http_req_duration{status:200}", "avg<100".into());
        config.add_threshold("http_req_duration", "max<1000".into());

        let validated = config.validate().unwrap();
        let subs = validated.submetrics();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].to_string(), "http_req_duration{status:200}");
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = one_minute_five_users();
        config.think_time = Some(Duration::from_millis(250));
        config.add_threshold("checks", "rate>0.99".into());
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(RunConfig::from_json(&json).unwrap(), config);
    }
}

use std::time::Duration;

/// How often the ramp controller re-evaluates the target VU count
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// How long retiring users get to finish their iteration once a run drains
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request timeout when neither the request nor the config sets one
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How often `abort_on_fail` thresholds are checked while a run is ramping
pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(2);

/// Significant figures kept by trend histograms. Relative error is 10^-precision.
pub const DEFAULT_HISTOGRAM_PRECISION: u8 = 3;
pub const MAX_HISTOGRAM_PRECISION: u8 = 5;

/// Trend values are stored in the histogram in thousandths of their unit.
pub const TREND_RESOLUTION: f64 = 1_000.;

pub const EXIT_OK: u8 = 0;
pub const EXIT_THRESHOLDS_FAILED: u8 = 99;
pub const EXIT_INVALID_CONFIG: u8 = 104;
pub const EXIT_EXTERNAL_ABORT: u8 = 105;

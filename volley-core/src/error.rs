use crate::{ExpressionError, MAX_HISTOGRAM_PRECISION};
use thiserror::Error;

/// Errors detected before a run starts. A run with an invalid configuration never begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("At least one stage is required")]
    NoStages,

    #[error("Run length is zero; stages or duration must add up to a positive duration")]
    ZeroLength,

    #[error("Ramp tick interval must be greater than zero")]
    ZeroTick,

    #[error("Threshold interval must be greater than zero")]
    ZeroThresholdInterval,

    #[error("Histogram precision must be between 1 and {MAX_HISTOGRAM_PRECISION}, found {0}")]
    InvalidPrecision(u8),

    #[error("Invalid threshold `{expression}` on `{metric}`: {source}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        source: ExpressionError,
    },

    #[error("Unable to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unable to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

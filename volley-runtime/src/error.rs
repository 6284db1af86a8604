use thiserror::Error;
use volley_core::ConfigError;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("No scenario is registered; annotate an async fn with #[scenario]")]
    NoScenario,

    #[error("Unknown scenario `{0}`; registered scenarios: {1}")]
    UnknownScenario(String, String),

    #[error("Several scenarios are registered, pick one with --scenario: {0}")]
    AmbiguousScenario(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

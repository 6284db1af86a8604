//! Volley command line runtime
//!
//! Picks a scenario registered by `#[scenario]`, builds its configuration from a JSON
//! file and command line flags, runs it with Ctrl-C as the interrupt and maps the
//! verdict to the process exit code.
mod error;
pub mod runtime;
pub mod traits;

pub use error::RuntimeError;
#[doc(hidden)]
pub use linkme::{self, distributed_slice};
pub use runtime::{VolleyRuntime, VOLLEY_SCENARIOS};
pub use traits::RunnableScenario;

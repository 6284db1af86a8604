#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

#[macro_use]
#[doc(hidden)]
pub mod macros;

pub mod aggregator;
pub mod batch;
pub mod check;
pub mod http;
pub mod orchestrator;
pub mod ramp;
pub mod report;
pub mod scenario;
pub mod scheduler;
pub mod threshold;

pub(crate) mod context;

pub use check::{check, CheckOutcome, Checks};
pub use context::{vu_id, RunContext};
pub use http::{batch, request, Method, Request, Response};
pub use orchestrator::{Orchestrator, RunState};
pub use scenario::Scenario;
pub use volley_core::*;

#[cfg(not(feature = "rt"))]
pub use volley_macros::scenario;

cfg_rt! {
    pub use volley_runtime::{self as runtime, VolleyRuntime};
    pub use volley_macros::scenario_linkme as scenario;
}

pub mod prelude {
    pub use crate::check::{check, Checks};
    pub use crate::http::{batch, request, Method, Request, Response};
    pub use crate::scenario::ConfigurableScenario;
    pub use volley_core::{RampStart, RunConfig, RunResult, Stage, VerdictReport};

    cfg_rt! {
        pub use volley_runtime::{RunnableScenario, VolleyRuntime};
        pub use volley_macros::scenario_linkme as scenario;
    }

    #[cfg(not(feature = "rt"))]
    pub use volley_macros::scenario;
}

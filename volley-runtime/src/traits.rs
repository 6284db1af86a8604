use futures_util::future::BoxFuture;
use std::{future::Future, pin::Pin};
use volley_core::{RunConfig, RunResult};

#[doc(hidden)]
pub trait RunnableScenario: Future<Output = RunResult> + Send {
    fn name(&self) -> &str;

    /// A fresh copy of this scenario with `config` and an interrupt signal.
    fn configure(
        &self,
        config: RunConfig,
        interrupt: BoxFuture<'static, ()>,
    ) -> Pin<Box<dyn RunnableScenario>>;
}

//! Ramp up to 5 users looking up `the` in the inverted index.
//!
//! Start the service with `cargo run -p mock-service`, then
//! `cargo run -p volley-demos --example inverted-index -- --out-dir reports`.
//! Stages given on the command line replace the default below, thresholds are
//! added to the defaults.
use std::process::ExitCode;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use volley::prelude::*;
use volley::{HTTP_REQ_DURATION, HTTP_REQ_FAILED};

static BASE_URL: OnceLock<String> = OnceLock::new();

fn base_url() -> &'static str {
    BASE_URL.get_or_init(|| {
        std::env::var("INDEX_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
    })
}

#[scenario]
async fn inverted_index() {
    let responses = batch(vec![Request::get(format!("{}/the", base_url()))]).await;

    Checks::new()
        .with("GET status is 200", |r: &Response| r.status == 200)
        .with("Correct body", |r: &Response| {
            let body = r.text();
            body.contains("14_1.txt") && body.contains("14_8.txt")
        })
        .run(&responses[0]);
}

#[tokio::main]
async fn main() -> ExitCode {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("volley=info")),
        )
        .init();

    VolleyRuntime::new()
        .stage(Duration::from_secs(60), 5)
        .threshold(HTTP_REQ_DURATION, "p(99)<500")
        .threshold(HTTP_REQ_FAILED, "rate<0.01")
        .with_args()
        .run()
        .await
}

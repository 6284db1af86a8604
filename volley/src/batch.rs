use crate::aggregator::Aggregator;
use crate::http::{HttpTransport, Request, RequestError, Response, Transport};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};
use volley_core::{
    MetricSample, DATA_RECEIVED, DATA_SENT, DEFAULT_REQUEST_TIMEOUT, HTTP_REQS,
    HTTP_REQ_DURATION, HTTP_REQ_FAILED,
};

/// Issues groups of requests concurrently and records their metrics.
#[derive(Clone)]
pub struct BatchExecutor {
    transport: Arc<dyn Transport>,
    aggregator: Arc<Aggregator>,
    request_timeout: Duration,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl BatchExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        aggregator: Arc<Aggregator>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            aggregator,
            request_timeout,
            limiter: None,
        }
    }

    /// Cap the rate of requests issued through this executor (and its clones).
    pub fn with_rps(mut self, rps: NonZeroU32) -> Self {
        self.limiter = Some(Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        self
    }

    /// Executor used outside of any run.
    pub(crate) fn standalone() -> Self {
        Self::new(
            Arc::new(HttpTransport::new()),
            Arc::new(Aggregator::default()),
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Send every request concurrently, returning one response per request in
    /// submission order once all have resolved or timed out.
    ///
    /// Request metrics are recorded only after the whole batch has resolved.
    #[instrument(name = "batch", skip_all, fields(size = requests.len()))]
    pub async fn execute(&self, requests: Vec<Request>) -> Vec<Response> {
        if requests.is_empty() {
            return vec![];
        }

        // Placeholders for any slot whose task never reports back.
        let mut responses: Vec<Response> = requests
            .iter()
            .map(|r| {
                Response::for_request(r)
                    .with_error(RequestError::Other("request task did not complete".into()))
            })
            .collect();

        let mut set = JoinSet::new();
        for (idx, request) in requests.into_iter().enumerate() {
            let this = self.clone();
            set.spawn(async move { (idx, this.dispatch(request).await) });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, response)) => responses[idx] = response,
                Err(err) => error!("Request task failed: {err}"),
            }
        }

        self.record(&responses);
        responses
    }

    pub async fn execute_one(&self, request: Request) -> Response {
        let response = self.dispatch(request).await;
        self.record(std::slice::from_ref(&response));
        response
    }

    async fn dispatch(&self, request: Request) -> Response {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let timeout = request.timeout.unwrap_or(self.request_timeout);
        let fallback = Response::for_request(&request);

        let start = Instant::now();
        let result = tokio::time::timeout(timeout, self.transport.send(request)).await;
        let duration = start.elapsed();

        let mut response = match result {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                debug!("Request to {} failed: {err}", fallback.url);
                fallback.with_error(err)
            }
            Err(_) => {
                debug!("Request to {} timed out", fallback.url);
                fallback.with_error(RequestError::Timeout(timeout))
            }
        };
        response.duration = duration;
        response
    }

    fn record(&self, responses: &[Response]) {
        let offset = self.aggregator.elapsed();
        for response in responses {
            let tags = response.tags();
            let ms = response.duration.as_secs_f64() * 1_000.;

            self.aggregator
                .record(MetricSample::counter(HTTP_REQS, 1., offset).with_tags(&tags));
            self.aggregator
                .record(MetricSample::trend(HTTP_REQ_DURATION, ms, offset).with_tags(&tags));
            self.aggregator.record(
                MetricSample::rate(HTTP_REQ_FAILED, !response.is_success(), offset)
                    .with_tags(&tags),
            );
            self.aggregator.record(
                MetricSample::counter(DATA_SENT, response.bytes_sent as f64, offset)
                    .with_tags(&tags),
            );
            self.aggregator.record(
                MetricSample::counter(DATA_RECEIVED, response.bytes_received as f64, offset)
                    .with_tags(&tags),
            );
        }
    }
}

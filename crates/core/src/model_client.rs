use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use toolrelay_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    StreamFragment,
};
use tracing::Instrument;

use crate::aggregator::{AggregatedTurn, Aggregator};

type BoxedError = Box<dyn ModelProviderError>;
type SendRequestResult = Result<ModelClientResponse, BoxedError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(&ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// How rate-limited requests are retried.
///
/// Only [`ErrorKind::RateLimitExceeded`] failures are retried, with an
/// exponentially growing, jittered delay. Other failures are reported
/// right away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How many times a request is retried before giving up.
    pub max_retries: u32,
    /// The delay before the first retry.
    pub initial_interval: Duration,
    /// The ceiling of the delay between two retries.
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[inline]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// A wrapper around a model provider that provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn =
            Arc::new(move |req: &ModelRequest| -> BoxedSendRequestFuture {
                let fut = provider.send_request(req);
                Box::pin(async move {
                    match fut.await {
                        Ok(resp) => Ok(ModelClientResponse {
                            inner: Box::pin(resp),
                        }),
                        Err(err) => Err(Box::new(err) as BoxedError),
                    }
                })
            });
        Self { handler_fn }
    }

    /// Sends a request, retrying rate-limited attempts according to
    /// `policy`.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Pending retries are abandoned when this
    /// operation is cancelled.
    pub async fn send_request(
        &self,
        req: &ModelRequest,
        policy: &RetryPolicy,
    ) -> SendRequestResult {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(policy.initial_interval)
            .with_max_interval(policy.max_interval)
            .with_max_elapsed_time(None)
            .build();
        let mut retries = 0;

        async {
            loop {
                trace!("sending {} messages", req.messages.len());
                let err = match (self.handler_fn)(req).await {
                    Ok(resp) => return Ok(resp),
                    Err(err) => err,
                };
                if err.kind() != ErrorKind::RateLimitExceeded
                    || retries >= policy.max_retries
                {
                    error!("request failed: {err}");
                    return Err(err);
                }
                let Some(delay) = backoff.next_backoff() else {
                    return Err(err);
                };
                retries += 1;
                warn!(
                    "rate limited, retry {retries}/{} in {delay:?}",
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
        }
        .instrument(trace_span!("model client req"))
        .await
    }
}

trait FragmentStream: Send {
    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<StreamFragment>, BoxedError>>;
}

impl<R: ModelResponse> FragmentStream for R {
    #[inline]
    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<StreamFragment>, BoxedError>> {
        self.poll_next_fragment(cx)
            .map_err(|err| Box::new(err) as BoxedError)
    }
}

/// An open response stream from the model client.
pub struct ModelClientResponse {
    inner: Pin<Box<dyn FragmentStream>>,
}

impl ModelClientResponse {
    /// Drains the stream into an [`AggregatedTurn`], calling `on_delta`
    /// with every content delta as it arrives.
    ///
    /// A stream that breaks off is not an error: what arrived so far is
    /// aggregated as if the stream had been truncated.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The underlying stream is closed when
    /// this operation is cancelled.
    pub async fn aggregate(
        mut self,
        mut on_delta: impl FnMut(&str),
    ) -> AggregatedTurn {
        let mut aggregator = Aggregator::new();
        let mut fragments = 0usize;
        loop {
            let fragment =
                match poll_fn(|cx| self.inner.as_mut().poll_next(cx)).await {
                    Ok(Some(fragment)) => fragment,
                    Ok(None) => break,
                    Err(err) => {
                        warn!("stream broke off after {fragments}: {err}");
                        break;
                    }
                };
            fragments += 1;
            if let Some(delta) = aggregator.push(fragment) {
                on_delta(delta);
            }
        }
        trace!("stream finished after {fragments} fragments");
        aggregator.finish()
    }
}

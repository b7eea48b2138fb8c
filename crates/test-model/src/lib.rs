//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::time::{Sleep, sleep};
use toolrelay_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    StreamFragment,
};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<PresetEvent>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_fragment(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<StreamFragment>, Self::Error>> {
        let this = self.get_mut();

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            return match this.events.front() {
                None => Poll::Ready(Ok(None)),
                Some(PresetEvent::Stall) => Poll::Pending,
                Some(PresetEvent::StreamError) => {
                    this.events.clear();
                    Poll::Ready(Err(Error {
                        message: "stream interrupted",
                        kind: ErrorKind::Other,
                    }))
                }
                Some(PresetEvent::Fragment(_)) => {
                    let Some(PresetEvent::Fragment(fragment)) =
                        this.events.pop_front()
                    else {
                        unreachable!()
                    };
                    Poll::Ready(Ok(Some(fragment)))
                }
            };
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_fragment(cx)
    }
}

struct ScriptedResponse {
    preset: PresetResponse,
    attempts: u64,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is the list of responses the model will stream back, in order. Each
/// successful request consumes one response. If the script runs out, an
/// error will be returned.
///
/// Clones share the script and the request log, so a test can keep a clone
/// around to inspect what was sent.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_response(&mut self, preset: PresetResponse) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedResponse { preset, attempts: 0 });
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns every request received so far, failed ones included.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Returns how many scripted responses are not consumed yet.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    fn next_response(&self) -> Result<PresetResponse, Error> {
        let mut script = self.script.lock().unwrap();
        let Some(front) = script.front_mut() else {
            return Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            });
        };

        let should_fail = match front.preset.failures {
            Some(0) => true,
            Some(failures) => front.attempts < failures,
            None => false,
        };
        if should_fail {
            front.attempts += 1;
            return Err(Error {
                message: "scripted failure",
                kind: if front.preset.rate_limited {
                    ErrorKind::RateLimitExceeded
                } else {
                    ErrorKind::Other
                },
            });
        }

        let Some(scripted) = script.pop_front() else {
            unreachable!()
        };
        Ok(scripted.preset)
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        self.requests.lock().unwrap().push(req.clone());
        let resp = self.next_response().map(|preset| TestModelResponse {
            events: preset.events.into(),
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
        });
        ready(resp)
    }
}

use serde::{Deserialize, Serialize};
use toolrelay_model::{FinishReason, StreamFragment, ToolCallDelta};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    /// Delivers a fragment.
    #[serde(rename = "fragment")]
    Fragment(StreamFragment),
    /// Fails the stream, as if the connection dropped.
    #[serde(rename = "stream_error")]
    StreamError,
    /// Never delivers anything again.
    #[serde(rename = "stall")]
    Stall,
}

impl PresetEvent {
    /// A fragment carrying a content delta.
    #[inline]
    pub fn content<S: Into<String>>(content: S) -> Self {
        Self::Fragment(StreamFragment::content(content))
    }

    /// A fragment carrying a single tool call delta.
    #[inline]
    pub fn tool_call(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Self {
        Self::Fragment(StreamFragment::tool_calls([ToolCallDelta {
            index,
            id: id.map(ToOwned::to_owned),
            name: name.map(ToOwned::to_owned),
            arguments: arguments.map(ToOwned::to_owned),
        }]))
    }

    /// A fragment carrying the finish reason.
    #[inline]
    pub fn finish(reason: FinishReason) -> Self {
        Self::Fragment(StreamFragment::finish(reason))
    }
}

/// The preset response for an assistant step.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
    /// Whether the failures are reported as rate limiting.
    #[serde(default)]
    pub rate_limited: bool,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            rate_limited: false,
        }
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Reports the failures as rate limiting instead of generic errors.
    #[inline]
    pub fn rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }
}

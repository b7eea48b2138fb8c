use std::pin::Pin;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};

use crate::provider::ModelProviderError;

/// A streamed response from the model provider.
pub trait ModelResponse: Sized + Send + 'static {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// Attempts to pull out the next fragment from the response.
    ///
    /// # Return value
    ///
    /// There are several possible return values, each indicating a
    /// distinct response state:
    ///
    /// - `Poll::Pending` means that this response is still waiting for
    ///   the next fragment. Implementations will ensure that the current
    ///   task will be notified when the next fragment may be ready.
    /// - `Poll::Ready(Ok(Some(fragment)))` means the response has a
    ///   fragment to deliver, and may produce further fragments on
    ///   subsequent `poll_next_fragment` calls.
    /// - `Poll::Ready(Ok(None))` means the response has completed.
    /// - `Poll::Ready(Err(error))` means an error occurred while
    ///   receiving the response.
    ///
    /// Calling this method after completion should always return `None`.
    fn poll_next_fragment(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<StreamFragment>, Self::Error>>;
}

/// The reason why a model response has finished.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinishReason {
    /// The model has finished generating text.
    Stop,
    /// The model needs to call a tool.
    ToolCalls,
    /// The output was cut by the token limit.
    Length,
    /// A reason this crate doesn't know about.
    Other(String),
}

impl FinishReason {
    /// Parses the wire representation of a finish reason.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "tool_calls" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            other => FinishReason::Other(other.to_owned()),
        }
    }
}

/// One incremental unit of a streamed response.
///
/// All fields are optional, a fragment may carry any combination of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFragment {
    /// The role marker, usually only present in the first fragment.
    pub role: Option<String>,
    /// A piece of the message text.
    pub content: Option<String>,
    /// Partial tool calls.
    pub tool_calls: Vec<ToolCallDelta>,
    /// The terminal signal of the response.
    pub finish_reason: Option<FinishReason>,
}

impl StreamFragment {
    /// Creates a fragment that only carries a content delta.
    #[inline]
    pub fn content<S: Into<String>>(content: S) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Creates a fragment that only carries tool call deltas.
    #[inline]
    pub fn tool_calls(deltas: impl Into<Vec<ToolCallDelta>>) -> Self {
        Self {
            tool_calls: deltas.into(),
            ..Default::default()
        }
    }

    /// Creates a fragment that only carries a finish reason.
    #[inline]
    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Default::default()
        }
    }
}

/// A partial tool call inside a [`StreamFragment`].
///
/// Deltas of the same call share an `index`. `name` and `arguments` are
/// pieces to be concatenated, while `id` is sent whole.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// The position of the call in the response.
    pub index: u32,
    /// The call identifier.
    pub id: Option<String>,
    /// A piece of the tool name.
    pub name: Option<String>,
    /// A piece of the JSON arguments text.
    pub arguments: Option<String>,
}

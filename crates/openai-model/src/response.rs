use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use toolrelay_model::{ErrorKind, ModelResponse, StreamFragment};

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, create_fragment};

struct StreamState {
    sse: Sse,
    chunk_count: usize,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextFragment = Result<(Option<StreamFragment>, StreamState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_fragment_fut: Option<PinnedFuture<NextFragment>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let state = StreamState {
            sse,
            chunk_count: 0,
        };
        let next_fragment_fut = async move { next_fragment(state).await };
        Self {
            next_fragment_fut: Some(Box::pin(next_fragment_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_fragment(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<StreamFragment>, Self::Error>> {
        let this = self.project();
        let Some(next_fragment_fut) = this.next_fragment_fut else {
            return Poll::Ready(Ok(None));
        };
        let (fragment, state) =
            match ready!(next_fragment_fut.as_mut().poll(cx)) {
                Ok((Some(fragment), state)) => (fragment, state),
                Ok((None, state)) => {
                    trace!("stream ended after {} chunks", state.chunk_count);
                    *this.next_fragment_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_fragment_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future
        // for the next fragment.
        let next_fragment_fut = async move { next_fragment(state).await };
        *this.next_fragment_fut = Some(Box::pin(next_fragment_fut));

        Poll::Ready(Ok(Some(fragment)))
    }
}

async fn next_fragment(mut state: StreamState) -> NextFragment {
    loop {
        let sse_event = match state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => return Ok((None, state)),
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event.trim() == "[DONE]" {
            return Ok((None, state));
        }
        state.chunk_count += 1;

        // A chunk we cannot decode is skipped rather than failing the whole
        // response, the remaining chunks are usually fine.
        let chunk = match serde_json::from_str::<ChatCompletionChunk>(&sse_event)
        {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!("skipping undecodable chunk: {err}");
                continue;
            }
        };
        if let Some(fragment) = create_fragment(chunk) {
            return Ok((Some(fragment), state));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use toolrelay_model::{FinishReason, ToolCallDelta};

    use super::*;
    use crate::io::Chunks;

    async fn collect(chunks: Chunks) -> Vec<StreamFragment> {
        let sse = Sse::new(chunks);
        let mut resp = pin!(OpenAIResponse::from_sse(sse));
        let mut fragments = vec![];
        while let Some(fragment) =
            poll_fn(|cx| resp.as_mut().poll_next_fragment(cx))
                .await
                .unwrap()
        {
            fragments.push(fragment);
        }
        fragments
    }

    #[tokio::test]
    async fn test_recorded_tool_call_stream() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(include_bytes!(
                "../fixtures/test_response.txt"
            ))]
            .into(),
        );
        let fragments = collect(chunks).await;

        let deltas = fragments
            .iter()
            .flat_map(|f| f.tool_calls.iter())
            .collect::<Vec<_>>();
        assert_eq!(
            deltas.iter().filter(|d| d.id.is_some()).count(),
            2,
            "two calls should be announced"
        );
        assert_eq!(
            deltas[0],
            &ToolCallDelta {
                index: 0,
                id: Some("call_a1".to_owned()),
                name: Some("find_order_by_name".to_owned()),
                arguments: Some(String::new()),
            }
        );
        assert_eq!(
            fragments.last().unwrap().finish_reason,
            Some(FinishReason::ToolCalls)
        );
        assert_eq!(fragments[0].role.as_deref(), Some("assistant"));
    }

    #[tokio::test]
    async fn test_skips_garbage_chunks() {
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n"),
                Bytes::from_static(b"data: {not json}\n\n"),
                Bytes::from_static(b"data: {\"choices\":[]}\n\n"),
                Bytes::from_static(b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n"),
                Bytes::from_static(b"data: [DONE]\n\n"),
                Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n"),
            ]
            .into(),
        );
        let fragments = collect(chunks).await;
        assert_eq!(
            fragments,
            vec![
                StreamFragment::content("Hi"),
                StreamFragment::finish(FinishReason::Stop),
            ]
        );
    }
}

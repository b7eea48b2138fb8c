//! The conversation driver.

mod builder;
pub mod machine;

use toolrelay_model::{
    ModelMessage, ModelProviderError, ModelRequest, ModelTool,
    ToolCallRequest, ToolCallResult, ToolChoice,
};
use tracing::Instrument;

use crate::Error;
use crate::conversation::Conversation;
use crate::extract::extract_tool_calls;
use crate::model_client::{ModelClient, ModelClientResponse, RetryPolicy};
use crate::tool::Registry;
pub use builder::AgentBuilder;
use machine::{Effect, Failure, TurnEvent, TurnState, transition};

type TranscriptFn = Box<dyn Fn(&str) + Send + Sync>;
type ToolResultFn =
    Box<dyn Fn(&ToolCallRequest, &ToolCallResult) + Send + Sync>;

pub(crate) struct Settings {
    pub(crate) tool_choice: ToolChoice,
    pub(crate) max_tool_rounds: u32,
    pub(crate) retry_policy: RetryPolicy,
}

/// An agent instance, which owns a conversation, a model client and the
/// tools the model may call.
///
/// Each call to [`Agent::send_message`] runs one turn to completion:
/// the model is asked, the tools it calls are run, and the model is asked
/// again with their results until it answers without calling any tool.
pub struct Agent {
    model_client: ModelClient,
    registry: Registry,
    conversation: Conversation,
    settings: Settings,
    on_transcript: Option<TranscriptFn>,
    on_tool_result: Option<ToolResultFn>,
}

impl Agent {
    /// Returns the conversation so far.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Returns the definitions of the registered tools.
    #[inline]
    pub fn tools(&self) -> Vec<ModelTool> {
        self.registry.definitions()
    }

    /// Sends a user message and returns the final answer of the model.
    ///
    /// A failed request on the first round removes the user message again,
    /// so the conversation is as if this call never happened. A failure in
    /// a later round keeps the completed rounds.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. When the returned future is dropped
    /// before it completes, the running request or tool is cancelled and
    /// the conversation is restored to its state before the call.
    pub async fn send_message<S: Into<String>>(
        &mut self,
        input: S,
    ) -> Result<String, Error> {
        let span = debug_span!("turn", messages = self.conversation.len());
        self.run_turn(input.into()).instrument(span).await
    }

    async fn run_turn(&mut self, input: String) -> Result<String, Error> {
        let Self {
            model_client,
            registry,
            conversation,
            settings,
            on_transcript,
            on_tool_result,
        } = self;
        let tools = registry.definitions();
        let mut turn = TurnGuard::new(conversation);

        let mut state = TurnState::AwaitingInput;
        let mut event = TurnEvent::UserInput(input);
        let mut response: Option<ModelClientResponse> = None;
        let mut last_error: Option<Box<dyn ModelProviderError>> = None;

        loop {
            let (next, effects) =
                match transition(state, event, settings.max_tool_rounds) {
                    Ok(next) => next,
                    Err(err) => unreachable!("inconsistent turn: {err}"),
                };
            trace!("turn state: {next:?}");
            state = next;

            let mut next_event = None;
            for effect in effects {
                match effect {
                    Effect::AppendUser(input) => {
                        turn.push(ModelMessage::user(input));
                    }
                    Effect::RollbackUser => turn.rollback(),
                    Effect::SendRequest => {
                        let req = ModelRequest {
                            messages: turn.messages().to_vec(),
                            tools: tools.clone(),
                            tool_choice: settings.tool_choice.clone(),
                        };
                        next_event = Some(
                            match model_client
                                .send_request(&req, &settings.retry_policy)
                                .await
                            {
                                Ok(resp) => {
                                    response = Some(resp);
                                    TurnEvent::RequestAccepted
                                }
                                Err(err) => {
                                    last_error = Some(err);
                                    TurnEvent::RequestFailed
                                }
                            },
                        );
                    }
                    Effect::Aggregate => {
                        let Some(resp) = response.take() else {
                            unreachable!("stream requested without a response");
                        };
                        let aggregated = resp
                            .aggregate(|delta| {
                                if let Some(on_transcript) = on_transcript {
                                    on_transcript(delta);
                                }
                            })
                            .await;
                        next_event = Some(TurnEvent::StreamFinished(aggregated));
                    }
                    Effect::Extract(content) => {
                        let tool_calls = extract_tool_calls(&content);
                        if !tool_calls.is_empty() {
                            debug!(
                                "recovered {} tool calls from content",
                                tool_calls.len()
                            );
                        }
                        next_event = Some(TurnEvent::Extracted(tool_calls));
                    }
                    Effect::AppendAssistant(msg) => {
                        turn.push(ModelMessage::Assistant(msg));
                    }
                    Effect::DispatchTools(tool_calls) => {
                        for call in &tool_calls {
                            let result = registry.dispatch(call).await;
                            if let Some(on_tool_result) = on_tool_result {
                                on_tool_result(call, &result);
                            }
                            turn.push(ModelMessage::Tool(result));
                        }
                        next_event = Some(TurnEvent::ToolsDispatched);
                    }
                    Effect::Finish(answer) => {
                        turn.commit();
                        return Ok(answer);
                    }
                    Effect::Fail(failure) => {
                        turn.commit();
                        return Err(match failure {
                            Failure::RequestFailed => {
                                let Some(err) = last_error.take() else {
                                    unreachable!(
                                        "request failed without an error"
                                    );
                                };
                                Error::Model(err)
                            }
                            Failure::RoundLimitReached(rounds) => {
                                warn!("giving up after {rounds} tool rounds");
                                Error::ToolRoundLimitReached(rounds)
                            }
                        });
                    }
                }
            }

            let Some(next_event) = next_event else {
                unreachable!("turn stalled without an event");
            };
            event = next_event;
        }
    }
}

/// Restores the conversation to its length at the start of a turn unless
/// the turn is committed.
struct TurnGuard<'a> {
    conversation: &'a mut Conversation,
    checkpoint: usize,
    committed: bool,
}

impl<'a> TurnGuard<'a> {
    fn new(conversation: &'a mut Conversation) -> Self {
        let checkpoint = conversation.len();
        Self {
            conversation,
            checkpoint,
            committed: false,
        }
    }

    #[inline]
    fn messages(&self) -> &[ModelMessage] {
        self.conversation.messages()
    }

    #[inline]
    fn push(&mut self, msg: ModelMessage) {
        self.conversation.push(msg);
    }

    fn rollback(&mut self) {
        self.conversation.truncate(self.checkpoint);
    }

    #[inline]
    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let discarded = self.conversation.len().saturating_sub(self.checkpoint);
        debug!("turn cancelled, discarding {discarded} messages");
        self.rollback();
    }
}

//! The state machine of a conversation turn.
//!
//! [`transition`] is a pure function: it decides what happens next and
//! describes it as a list of [`Effect`]s, the agent carries them out and
//! feeds the outcome back as the next [`TurnEvent`].

use std::fmt::{self, Display};

use toolrelay_model::{AssistantMessage, ToolCallRequest};

use crate::aggregator::AggregatedTurn;

/// Where a turn currently is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TurnState {
    /// No turn in progress.
    #[default]
    AwaitingInput,
    /// A request is in flight.
    Requesting {
        /// Zero-based round within the turn.
        round: u32,
    },
    /// The response is streaming in.
    Streaming {
        /// Zero-based round within the turn.
        round: u32,
    },
    /// Looking for tool calls embedded in the content.
    Extracting {
        /// Zero-based round within the turn.
        round: u32,
        /// The aggregated content of this round.
        content: String,
    },
    /// The tool calls are running.
    Dispatching {
        /// Zero-based round within the turn.
        round: u32,
    },
}

/// Something that happened while a turn was running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnEvent {
    /// The user sent a message.
    UserInput(String),
    /// The endpoint accepted the request and started streaming.
    RequestAccepted,
    /// The request failed before any fragment arrived.
    RequestFailed,
    /// The stream finished and was aggregated.
    StreamFinished(AggregatedTurn),
    /// The extractor ran over the content.
    Extracted(Vec<ToolCallRequest>),
    /// Every tool call has a result in the conversation.
    ToolsDispatched,
}

impl TurnEvent {
    fn name(&self) -> &'static str {
        match self {
            TurnEvent::UserInput(_) => "UserInput",
            TurnEvent::RequestAccepted => "RequestAccepted",
            TurnEvent::RequestFailed => "RequestFailed",
            TurnEvent::StreamFinished(_) => "StreamFinished",
            TurnEvent::Extracted(_) => "Extracted",
            TurnEvent::ToolsDispatched => "ToolsDispatched",
        }
    }
}

/// Why a turn ended without an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The model request failed.
    RequestFailed,
    /// The round cap was reached.
    RoundLimitReached(u32),
}

/// An action the agent must carry out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Append a user message.
    AppendUser(String),
    /// Send the whole conversation to the model.
    SendRequest,
    /// Remove the user message of the current turn.
    RollbackUser,
    /// Stream and aggregate the response.
    Aggregate,
    /// Run the extractor over the content.
    Extract(String),
    /// Append an assistant message.
    AppendAssistant(AssistantMessage),
    /// Run the tool calls and append their results.
    DispatchTools(Vec<ToolCallRequest>),
    /// End the turn with the given answer.
    Finish(String),
    /// End the turn without an answer.
    Fail(Failure),
}

/// An event that the current state cannot handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidTransition {
    /// The state the machine was in.
    pub state: TurnState,
    /// The name of the rejected event.
    pub event: &'static str,
}

impl Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected {} in state {:?}", self.event, self.state)
    }
}

/// Computes the next state and the effects to get there.
///
/// `max_rounds` caps the number of tool dispatching rounds in one turn.
pub fn transition(
    state: TurnState,
    event: TurnEvent,
    max_rounds: u32,
) -> Result<(TurnState, Vec<Effect>), InvalidTransition> {
    use TurnEvent as E;
    use TurnState as S;

    let next = match (state, event) {
        (S::AwaitingInput, E::UserInput(input)) => (
            S::Requesting { round: 0 },
            vec![Effect::AppendUser(input), Effect::SendRequest],
        ),
        (S::Requesting { round }, E::RequestAccepted) => {
            (S::Streaming { round }, vec![Effect::Aggregate])
        }
        (S::Requesting { round }, E::RequestFailed) => {
            let mut effects = vec![];
            // Completed rounds stay, they are a valid conversation.
            if round == 0 {
                effects.push(Effect::RollbackUser);
            }
            effects.push(Effect::Fail(Failure::RequestFailed));
            (S::AwaitingInput, effects)
        }
        (S::Streaming { round }, E::StreamFinished(turn)) => {
            if turn.tool_calls.is_empty() && !turn.content.trim().is_empty() {
                let content = turn.content;
                (
                    S::Extracting {
                        round,
                        content: content.clone(),
                    },
                    vec![Effect::Extract(content)],
                )
            } else {
                dispatch(round, turn.content, turn.tool_calls)
            }
        }
        (S::Extracting { round, content }, E::Extracted(tool_calls)) => {
            dispatch(round, content, tool_calls)
        }
        (S::Dispatching { round }, E::ToolsDispatched) => {
            let completed = round + 1;
            if completed >= max_rounds {
                (
                    S::AwaitingInput,
                    vec![Effect::Fail(Failure::RoundLimitReached(completed))],
                )
            } else {
                (S::Requesting { round: completed }, vec![Effect::SendRequest])
            }
        }
        (state, event) => {
            return Err(InvalidTransition {
                state,
                event: event.name(),
            });
        }
    };
    Ok(next)
}

fn dispatch(
    round: u32,
    content: String,
    tool_calls: Vec<ToolCallRequest>,
) -> (TurnState, Vec<Effect>) {
    let assistant =
        AssistantMessage::new(Some(content.clone()), tool_calls.clone());
    let mut effects = assistant
        .into_iter()
        .map(Effect::AppendAssistant)
        .collect::<Vec<_>>();

    if tool_calls.is_empty() {
        effects.push(Effect::Finish(content));
        (TurnState::AwaitingInput, effects)
    } else {
        effects.push(Effect::DispatchTools(tool_calls));
        (TurnState::Dispatching { round }, effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: format!("call_{name}"),
            name: name.to_owned(),
            arguments: "{}".to_owned(),
        }
    }

    fn finished(content: &str, tool_calls: Vec<ToolCallRequest>) -> TurnEvent {
        TurnEvent::StreamFinished(AggregatedTurn {
            content: content.to_owned(),
            tool_calls,
            finish_reason: None,
        })
    }

    #[test]
    fn test_plain_answer() {
        let (state, effects) = transition(
            TurnState::AwaitingInput,
            TurnEvent::UserInput("Hi".to_owned()),
            16,
        )
        .unwrap();
        assert_eq!(state, TurnState::Requesting { round: 0 });
        assert_eq!(
            effects,
            vec![Effect::AppendUser("Hi".to_owned()), Effect::SendRequest]
        );

        let (state, effects) =
            transition(state, TurnEvent::RequestAccepted, 16).unwrap();
        assert_eq!(state, TurnState::Streaming { round: 0 });
        assert_eq!(effects, vec![Effect::Aggregate]);

        let (state, effects) =
            transition(state, finished("Hello!", vec![]), 16).unwrap();
        assert_eq!(
            state,
            TurnState::Extracting {
                round: 0,
                content: "Hello!".to_owned()
            }
        );
        assert_eq!(effects, vec![Effect::Extract("Hello!".to_owned())]);

        let (state, effects) =
            transition(state, TurnEvent::Extracted(vec![]), 16).unwrap();
        assert_eq!(state, TurnState::AwaitingInput);
        assert_eq!(
            effects,
            vec![
                Effect::AppendAssistant(
                    AssistantMessage::new(Some("Hello!".to_owned()), vec![])
                        .unwrap()
                ),
                Effect::Finish("Hello!".to_owned()),
            ]
        );
    }

    #[test]
    fn test_structured_calls_skip_extraction() {
        let (state, effects) = transition(
            TurnState::Streaming { round: 2 },
            finished("", vec![call("a"), call("b")]),
            16,
        )
        .unwrap();
        assert_eq!(state, TurnState::Dispatching { round: 2 });
        assert_eq!(
            effects,
            vec![
                Effect::AppendAssistant(
                    AssistantMessage::new(None, vec![call("a"), call("b")])
                        .unwrap()
                ),
                Effect::DispatchTools(vec![call("a"), call("b")]),
            ]
        );

        let (state, effects) =
            transition(state, TurnEvent::ToolsDispatched, 16).unwrap();
        assert_eq!(state, TurnState::Requesting { round: 3 });
        assert_eq!(effects, vec![Effect::SendRequest]);
    }

    #[test]
    fn test_structured_calls_with_embedded_text() {
        let content = r#"Checking. <tool_call>{"name": "a"}</tool_call>"#;
        let (state, effects) = transition(
            TurnState::Streaming { round: 0 },
            finished(content, vec![call("a")]),
            16,
        )
        .unwrap();
        assert_eq!(state, TurnState::Dispatching { round: 0 });
        assert!(
            !effects.iter().any(|e| matches!(e, Effect::Extract(_))),
            "unexpected extraction: {effects:?}"
        );
        assert_eq!(
            effects,
            vec![
                Effect::AppendAssistant(
                    AssistantMessage::new(
                        Some(content.to_owned()),
                        vec![call("a")]
                    )
                    .unwrap()
                ),
                Effect::DispatchTools(vec![call("a")]),
            ]
        );
    }

    #[test]
    fn test_extracted_calls_are_dispatched() {
        let content = r#"<tool_call>{"name": "a"}</tool_call>"#;
        let state = TurnState::Extracting {
            round: 0,
            content: content.to_owned(),
        };
        let (state, effects) =
            transition(state, TurnEvent::Extracted(vec![call("a")]), 16)
                .unwrap();
        assert_eq!(state, TurnState::Dispatching { round: 0 });
        assert_eq!(
            effects.last(),
            Some(&Effect::DispatchTools(vec![call("a")]))
        );
    }

    #[test]
    fn test_empty_answer() {
        let state = TurnState::Streaming { round: 0 };
        let (state, effects) =
            transition(state, finished(" ", vec![]), 16).unwrap();
        assert_eq!(state, TurnState::AwaitingInput);
        assert_eq!(effects, vec![Effect::Finish(" ".to_owned())]);
    }

    #[test]
    fn test_request_failure() {
        let (state, effects) = transition(
            TurnState::Requesting { round: 0 },
            TurnEvent::RequestFailed,
            16,
        )
        .unwrap();
        assert_eq!(state, TurnState::AwaitingInput);
        assert_eq!(
            effects,
            vec![Effect::RollbackUser, Effect::Fail(Failure::RequestFailed)]
        );

        let (_, effects) = transition(
            TurnState::Requesting { round: 1 },
            TurnEvent::RequestFailed,
            16,
        )
        .unwrap();
        assert_eq!(effects, vec![Effect::Fail(Failure::RequestFailed)]);
    }

    #[test]
    fn test_round_limit() {
        let (state, effects) = transition(
            TurnState::Dispatching { round: 2 },
            TurnEvent::ToolsDispatched,
            3,
        )
        .unwrap();
        assert_eq!(state, TurnState::AwaitingInput);
        assert_eq!(effects, vec![Effect::Fail(Failure::RoundLimitReached(3))]);
    }

    #[test]
    fn test_invalid_transition() {
        let err = transition(
            TurnState::AwaitingInput,
            TurnEvent::ToolsDispatched,
            16,
        )
        .unwrap_err();
        assert_eq!(err.state, TurnState::AwaitingInput);
        assert_eq!(err.event, "ToolsDispatched");
    }
}

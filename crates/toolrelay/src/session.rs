use toolrelay_core::conversation::Conversation;
use toolrelay_core::{Agent, AgentBuilder, Error, RetryPolicy};
use toolrelay_model::{
    ModelProvider, ToolCallRequest, ToolCallResult, ToolChoice,
};

use crate::tools::*;

/// The system prompt used when none is given.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("./system_prompt.md");

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    system_prompt: String,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider);
        Self {
            agent_builder,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
        }
    }

    /// Replaces the default system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets how the model should pick tools.
    #[inline]
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.agent_builder = self.agent_builder.with_tool_choice(tool_choice);
        self
    }

    /// Caps the rounds of tool calls in a single turn.
    #[inline]
    pub fn with_max_tool_rounds(mut self, max_tool_rounds: u32) -> Self {
        self.agent_builder =
            self.agent_builder.with_max_tool_rounds(max_tool_rounds);
        self
    }

    /// Sets how rate-limited requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.agent_builder = self.agent_builder.with_retry_policy(retry_policy);
        self
    }

    /// Attaches a callback to be invoked with every streamed content delta.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_transcript(on_transcript);
        self
    }

    /// Attaches a callback to be invoked after each tool call.
    #[inline]
    pub fn on_tool_result(
        mut self,
        on_tool_result: impl Fn(&ToolCallRequest, &ToolCallResult)
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_tool_result(on_tool_result);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Session {
        let agent = self
            .agent_builder
            .with_system_prompt(self.system_prompt)
            .with_tool(FindOrderTool::new())
            .with_tool(DeliveryDateTool::new())
            .build();

        Session { agent }
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and it
/// is basically a wrapper around [`Agent`].
pub struct Session {
    agent: Agent,
}

impl Session {
    /// Sends a message to the session and waits for the answer.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe, a cancelled message leaves no trace in
    /// the conversation.
    #[inline]
    pub async fn send_message(
        &mut self,
        message: &str,
    ) -> Result<String, Error> {
        self.agent.send_message(message).await
    }

    /// Returns the conversation so far.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        self.agent.conversation()
    }
}

#[cfg(test)]
mod tests {
    use toolrelay_model::{FinishReason, ModelMessage};
    use toolrelay_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn tool_call(id: &str, name: &str, arguments: &str) -> PresetResponse {
        PresetResponse::with_events([
            PresetEvent::tool_call(0, Some(id), Some(name), Some(arguments)),
            PresetEvent::finish(FinishReason::ToolCalls),
        ])
    }

    #[tokio::test]
    async fn test_order_lookup_flow() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_response(tool_call(
            "call_1",
            "find_order_by_name",
            r#"{"customer_name": "Jane Doe"}"#,
        ));
        model_provider.add_response(tool_call(
            "call_2",
            "get_delivery_date",
            r#"{"order_id": "ORD-JAN08"}"#,
        ));
        model_provider.add_response(PresetResponse::with_events([
            PresetEvent::content("Your order arrives in three days."),
            PresetEvent::finish(FinishReason::Stop),
        ]));

        let mut session =
            SessionBuilder::with_model_provider(model_provider.clone())
                .build();
        let reply =
            session.send_message("Where is my order? I'm Jane Doe.").await;
        assert_eq!(reply.unwrap(), "Your order arrives in three days.");

        let requests = model_provider.requests();
        let tool_names = requests[0]
            .tools
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            tool_names,
            vec!["find_order_by_name", "get_delivery_date"]
        );

        let messages = session.conversation().messages();
        assert_eq!(messages[0], ModelMessage::system(DEFAULT_SYSTEM_PROMPT));
        let ModelMessage::Tool(found) = &messages[3] else {
            panic!("expected a tool message, got {:?}", messages[3]);
        };
        assert_eq!(found.content, r#"{"order_id":"ORD-JAN08"}"#);
        let ModelMessage::Tool(estimate) = &messages[5] else {
            panic!("expected a tool message, got {:?}", messages[5]);
        };
        assert_eq!(estimate.id, "call_2");
        assert!(estimate.content.contains("estimated_delivery_date"));
    }
}

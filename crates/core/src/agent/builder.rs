use toolrelay_model::{
    ModelProvider, ToolCallRequest, ToolCallResult, ToolChoice,
};

use super::{Agent, Settings, ToolResultFn, TranscriptFn};
use crate::conversation::Conversation;
use crate::model_client::{ModelClient, RetryPolicy};
use crate::tool::{Registry, Tool};

const DEFAULT_MAX_TOOL_ROUNDS: u32 = 16;

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    system_prompt: Option<String>,
    registry: Registry,
    tool_choice: ToolChoice,
    max_tool_rounds: u32,
    retry_policy: RetryPolicy,
    on_transcript: Option<TranscriptFn>,
    on_tool_result: Option<ToolResultFn>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: None,
            registry: Registry::default(),
            tool_choice: ToolChoice::Auto,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            retry_policy: RetryPolicy::default(),
            on_transcript: None,
            on_tool_result: None,
        }
    }

    /// Sets the system prompt that opens the conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.registry.add_tool(tool);
        self
    }

    /// Sets how the model should pick tools. Defaults to
    /// [`ToolChoice::Auto`].
    #[inline]
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    /// Caps the rounds of tool calls in a single turn. Defaults to 16,
    /// values below 1 are raised to 1.
    #[inline]
    pub fn with_max_tool_rounds(mut self, max_tool_rounds: u32) -> Self {
        self.max_tool_rounds = max_tool_rounds.max(1);
        self
    }

    /// Sets how rate-limited requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Attaches a callback to be invoked with every content delta as the
    /// model streams it.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Box::new(on_transcript));
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
        self.on_tool_result = Some(Box::new(on_tool_result));
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Agent {
        let AgentBuilder {
            model_client,
            system_prompt,
            registry,
            tool_choice,
            max_tool_rounds,
            retry_policy,
            on_transcript,
            on_tool_result,
        } = self;

        let conversation = match system_prompt {
            Some(prompt) => Conversation::with_system_prompt(prompt),
            None => Conversation::default(),
        };
        debug!("agent built with {} tools", registry.len());

        Agent {
            model_client,
            registry,
            conversation,
            settings: Settings {
                tool_choice,
                max_tool_rounds,
                retry_policy,
            },
            on_transcript,
            on_tool_result,
        }
    }
}

//! Conversation-related types.

use toolrelay_model::ModelMessage;

/// The ordered message history of one conversation.
///
/// Messages are only ever appended. The single exception is the rollback
/// the agent performs when a turn fails before the model answered or is
/// cancelled midway, which truncates back to the start of that turn.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    messages: Vec<ModelMessage>,
}

impl Conversation {
    /// Creates a conversation that starts with the given system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(prompt: S) -> Self {
        Self {
            messages: vec![ModelMessage::system(prompt)],
        }
    }

    /// Returns all messages in order.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if there are no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn push(&mut self, msg: ModelMessage) {
        if let ModelMessage::Tool(result) = &msg {
            if !self.has_tool_call(&result.id) {
                warn!("tool result `{}` answers no known tool call", result.id);
            }
        }
        trace!("appending a {} message", msg.role());
        self.messages.push(msg);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    fn has_tool_call(&self, id: &str) -> bool {
        self.messages.iter().rev().any(|msg| match msg {
            ModelMessage::Assistant(assistant) => {
                assistant.tool_calls().iter().any(|call| call.id == id)
            }
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use toolrelay_model::{AssistantMessage, ToolCallRequest, ToolCallResult};

    use super::*;

    #[test]
    fn test_append_and_truncate() {
        let mut conversation = Conversation::with_system_prompt("Be brief.");
        conversation.push(ModelMessage::user("Hi"));
        let call = ToolCallRequest {
            id: "call_1".to_owned(),
            name: "noop".to_owned(),
            arguments: "{}".to_owned(),
        };
        conversation.push(ModelMessage::Assistant(
            AssistantMessage::new(None, vec![call]).unwrap(),
        ));
        assert!(conversation.has_tool_call("call_1"));
        assert!(!conversation.has_tool_call("call_2"));
        conversation.push(ModelMessage::Tool(ToolCallResult {
            id: "call_1".to_owned(),
            name: "noop".to_owned(),
            content: "null".to_owned(),
        }));
        assert_eq!(conversation.len(), 4);

        conversation.truncate(1);
        assert_eq!(conversation.messages(), &[ModelMessage::system("Be brief.")]);
    }
}

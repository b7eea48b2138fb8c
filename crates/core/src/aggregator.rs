//! Folds streamed fragments into a complete assistant turn.

use toolrelay_model::{
    FinishReason, StreamFragment, ToolCallDelta, ToolCallRequest,
};

use crate::call_id::new_call_id;

/// The outcome of one streamed response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregatedTurn {
    /// The concatenation of every content delta, in arrival order.
    pub content: String,
    /// Tool calls assembled from the deltas, ordered by their index.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The last finish reason reported by the stream, if any.
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug)]
struct ToolCallBuilder {
    index: u32,
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallBuilder {
    fn new(index: u32, id: Option<String>) -> Self {
        Self {
            index,
            id,
            name: String::new(),
            arguments: String::new(),
        }
    }

    fn apply(&mut self, delta: ToolCallDelta) {
        if self.id.is_none() {
            self.id = delta.id;
        }
        if let Some(name) = delta.name {
            self.name.push_str(&name);
        }
        if let Some(arguments) = delta.arguments {
            self.arguments.push_str(&arguments);
        }
    }

    fn build(self) -> (u32, ToolCallRequest) {
        let id = match self.id {
            Some(id) => id,
            None => {
                let id = new_call_id();
                warn!("tool call at index {} has no id, using {id}", self.index);
                id
            }
        };
        if self.name.is_empty() {
            warn!("tool call {id} has no name");
        }
        let request = ToolCallRequest {
            id,
            name: self.name,
            arguments: self.arguments,
        };
        (self.index, request)
    }
}

/// Accumulates the fragments of a single streamed response.
///
/// Tool call deltas are correlated by their index until an id is known,
/// and by id afterwards. A delta that reuses an index with a different id
/// closes the call that held the index so far.
#[derive(Debug, Default)]
pub struct Aggregator {
    content: String,
    builders: Vec<ToolCallBuilder>,
    finished: Vec<(u32, ToolCallRequest)>,
    finish_reason: Option<FinishReason>,
}

impl Aggregator {
    /// Creates an empty aggregator.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a fragment and returns the content delta it carried, if any.
    pub fn push(&mut self, fragment: StreamFragment) -> Option<&str> {
        let StreamFragment {
            content,
            tool_calls,
            finish_reason,
            ..
        } = fragment;

        for delta in tool_calls {
            self.push_tool_call(delta);
        }
        if finish_reason.is_some() {
            self.finish_reason = finish_reason;
        }

        let content = content.filter(|c| !c.is_empty())?;
        let start = self.content.len();
        self.content.push_str(&content);
        Some(&self.content[start..])
    }

    fn push_tool_call(&mut self, delta: ToolCallDelta) {
        let by_id = delta.id.as_ref().and_then(|id| {
            self.builders
                .iter()
                .position(|b| b.id.as_ref() == Some(id))
        });
        if let Some(pos) = by_id {
            self.builders[pos].apply(delta);
            return;
        }

        let by_index = self.builders.iter().position(|b| b.index == delta.index);
        match by_index {
            Some(pos) => {
                let replaced = match (&self.builders[pos].id, &delta.id) {
                    (Some(current), Some(id)) => current != id,
                    _ => false,
                };
                if replaced {
                    trace!("index {} now belongs to a new call", delta.index);
                    let builder = self.builders.remove(pos);
                    self.finished.push(builder.build());
                    self.open(delta);
                } else {
                    self.builders[pos].apply(delta);
                }
            }
            None => self.open(delta),
        }
    }

    fn open(&mut self, delta: ToolCallDelta) {
        let mut builder = ToolCallBuilder::new(delta.index, None);
        builder.apply(delta);
        self.builders.push(builder);
    }

    /// Finalizes every pending call and returns the aggregated turn.
    ///
    /// This is also what happens when a stream breaks off early: the
    /// calls are kept as far as they arrived.
    pub fn finish(mut self) -> AggregatedTurn {
        for builder in self.builders.drain(..) {
            self.finished.push(builder.build());
        }
        // Stable, so calls sharing an index keep their arrival order.
        self.finished.sort_by_key(|(index, _)| *index);

        if let Some(FinishReason::Length) = self.finish_reason {
            warn!("response was truncated by the token limit");
        }

        AggregatedTurn {
            content: self.content,
            tool_calls: self
                .finished
                .into_iter()
                .map(|(_, call)| call)
                .collect(),
            finish_reason: self.finish_reason,
        }
    }
}

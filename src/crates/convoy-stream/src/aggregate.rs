//! Reconstruction of full message content from step events.
//!
//! [`DeltaAggregator`] is the reference consumer for the split handler's
//! output contract: it folds run steps and message deltas back into
//! per-block text, and can materialize the result as assistant [`Message`]s
//! for appending to a conversation history. Concatenating the aggregated
//! text reproduces the streamed input byte for byte.

use std::collections::HashMap;

use convoy_context::{ContentPart, Message, MessageContent, ToolCall};
use tracing::warn;

use crate::events::{DeltaBlock, StepDetails, StepEvent, ToolCallDelta};

/// One reconstructed block in run-step order.
#[derive(Debug, Clone, Default)]
struct BlockBuffer {
    message_id: String,
    text: String,
    reasoning: String,
}

/// Folds step events back into complete message content.
#[derive(Debug, Default)]
pub struct DeltaAggregator {
    blocks: Vec<BlockBuffer>,
    by_message: HashMap<String, usize>,
    tool_calls: Vec<ToolCallDelta>,
}

impl DeltaAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the aggregate.
    ///
    /// A delta for an unannounced message id is logged and dropped; the
    /// split handler always announces a block before sending deltas, so
    /// this only happens when events were reordered or lost upstream.
    pub fn apply(&mut self, event: &StepEvent) {
        match event {
            StepEvent::RunStep(step) => match &step.step_details {
                StepDetails::MessageCreation { message_id } => {
                    self.by_message.insert(message_id.clone(), self.blocks.len());
                    self.blocks.push(BlockBuffer {
                        message_id: message_id.clone(),
                        ..Default::default()
                    });
                }
                StepDetails::ToolCalls { tool_calls } => {
                    self.tool_calls.extend(tool_calls.iter().cloned());
                }
            },
            StepEvent::MessageDelta(delta) => {
                let Some(&pos) = self.by_message.get(&delta.id) else {
                    warn!(message_id = %delta.id, "delta for unannounced message; dropping");
                    return;
                };
                for block in &delta.delta.content {
                    match block {
                        DeltaBlock::Text { text } => self.blocks[pos].text.push_str(text),
                        DeltaBlock::Reasoning { reasoning } => {
                            self.blocks[pos].reasoning.push_str(reasoning)
                        }
                    }
                }
            }
        }
    }

    /// Fold a sequence of events.
    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a StepEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Number of announced blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Full visible text across all blocks, in run-step order.
    pub fn text(&self) -> String {
        self.blocks.iter().map(|b| b.text.as_str()).collect()
    }

    /// Full reasoning text across all blocks, in run-step order.
    pub fn reasoning(&self) -> String {
        self.blocks.iter().map(|b| b.reasoning.as_str()).collect()
    }

    /// Visible text of one block by its message id.
    pub fn text_for(&self, message_id: &str) -> Option<&str> {
        self.by_message.get(message_id).map(|&pos| self.blocks[pos].text.as_str())
    }

    /// Tool calls announced during the run.
    pub fn tool_calls(&self) -> &[ToolCallDelta] {
        &self.tool_calls
    }

    /// Materialize the aggregate as assistant messages, one per block.
    ///
    /// Blocks with reasoning carry it as a leading thinking part. Tool
    /// calls announced during the run attach to the final message, the turn
    /// that requested them. Calls still missing an id or name are dropped
    /// as incomplete.
    pub fn into_messages(self) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .blocks
            .into_iter()
            .filter(|b| !b.text.is_empty() || !b.reasoning.is_empty())
            .map(|block| {
                let mut parts = Vec::new();
                if !block.reasoning.is_empty() {
                    parts.push(ContentPart::thinking(block.reasoning));
                }
                if !block.text.is_empty() {
                    parts.push(ContentPart::text(block.text));
                }
                Message::assistant(MessageContent::Parts(parts)).with_id(block.message_id)
            })
            .collect();

        let calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .filter_map(|c| {
                Some(ToolCall {
                    id: c.id?,
                    name: c.name?,
                    args: serde_json::from_str(&c.arguments).unwrap_or(serde_json::Value::Null),
                })
            })
            .collect();
        if !calls.is_empty() {
            if let Some(last) = messages.pop() {
                messages.push(last.with_tool_calls(calls));
            }
        }
        messages
    }
}

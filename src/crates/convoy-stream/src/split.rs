//! Token-aware splitting of streamed output into logical message blocks.
//!
//! [`SplitStreamHandler`] consumes provider delta chunks and dispatches
//! [`StepEvent`]s: a run step announcing each new block, and message deltas
//! carrying the literal text. When a block grows past the configured
//! threshold the handler starts a new one, but only at a safe boundary:
//!
//! - the incoming chunk is scanned for the rightmost sentence-ending
//!   separator (or fence marker), and the split lands just after it;
//! - a chunk with no separator defers the split rather than cutting
//!   mid-word;
//! - inside a fenced code block splitting is suppressed entirely, however
//!   long the block grows.
//!
//! The visible-text and reasoning channels run the identical state machine
//! as two independent instances sharing one block counter.
//!
//! One handler per streaming run, fed chunks strictly in arrival order.
//! There is no flush: the last block simply ends with the stream.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::delta::StreamChunk;
use crate::events::{
    Delta, DeltaBlock, EventSink, MessageDelta, RunStep, StepDetails, StepEvent,
};

/// Default soft threshold, in characters, before a block is split.
pub const DEFAULT_BLOCK_THRESHOLD: usize = 4500;

/// Safe split boundaries, scanned for their rightmost occurrence in the
/// incoming chunk. Covers latin and CJK sentence enders plus the newline.
const SEPARATORS: [&str; 9] = [".", "?", "!", "\u{3002}", "\u{2025}", ";", "\u{00a1}", "\u{00bf}", "\n"];

/// Code fence marker; toggles suppression and doubles as a split boundary.
const FENCE: &str = "```";

/// Options for a [`SplitStreamHandler`].
#[derive(Debug, Clone, Copy)]
pub struct SplitOptions {
    /// Soft character threshold before a block is split
    pub block_threshold: usize,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self { block_threshold: DEFAULT_BLOCK_THRESHOLD }
    }
}

impl SplitOptions {
    /// Options with the default threshold.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the soft block threshold.
    pub fn with_block_threshold(mut self, block_threshold: usize) -> Self {
        self.block_threshold = block_threshold;
        self
    }
}

/// Which delta channel a piece of streamed content belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentChannel {
    /// Visible output text
    Text,
    /// Reasoning text from thinking models
    Reasoning,
}

/// Per-channel block state.
#[derive(Debug, Default)]
struct ChannelState {
    step_id: Option<String>,
    message_id: Option<String>,
    current_length: usize,
    in_code_block: bool,
}

/// Splits one streaming run into discrete message blocks.
pub struct SplitStreamHandler {
    options: SplitOptions,
    text: ChannelState,
    reasoning: ChannelState,
    blocks_started: usize,
}

impl SplitStreamHandler {
    /// Create a handler for one streaming run.
    pub fn new(options: SplitOptions) -> Self {
        Self {
            options,
            text: ChannelState::default(),
            reasoning: ChannelState::default(),
            blocks_started: 0,
        }
    }

    /// Index of the most recently announced block.
    ///
    /// The number of dispatched run steps is always `current_index() + 1`
    /// once any content has arrived.
    pub fn current_index(&self) -> usize {
        self.blocks_started.saturating_sub(1)
    }

    /// Step id of the channel's open block, if one is active.
    pub fn current_step_id(&self, channel: ContentChannel) -> Option<&str> {
        self.state(channel).step_id.as_deref()
    }

    /// Message id of the channel's open block, if one is active.
    pub fn current_message_id(&self, channel: ContentChannel) -> Option<&str> {
        self.state(channel).message_id.as_deref()
    }

    /// Whether the channel is currently inside a fenced code block.
    pub fn in_code_block(&self, channel: ContentChannel) -> bool {
        self.state(channel).in_code_block
    }

    /// Consume one provider chunk, dispatching zero or more events.
    pub fn handle(&mut self, chunk: &StreamChunk, sink: &mut dyn EventSink) {
        if let Some(content) = chunk.content() {
            self.push(ContentChannel::Text, content, sink);
        }
        if let Some(reasoning) = chunk.reasoning() {
            self.push(ContentChannel::Reasoning, reasoning, sink);
        }
    }

    /// Feed one piece of channel content through the state machine.
    pub fn push(&mut self, channel: ContentChannel, content: &str, sink: &mut dyn EventSink) {
        if content.is_empty() {
            return;
        }

        let message_id = self.ensure_block(channel, sink);
        {
            let state = self.state_mut(channel);
            if content.contains(FENCE) {
                state.in_code_block = !state.in_code_block;
            }
            state.current_length += content.chars().count();
        }

        let state = self.state(channel);
        if state.current_length > self.options.block_threshold && !state.in_code_block {
            if let Some(cut) = rightmost_separator(content) {
                let (head, tail) = content.split_at(cut);
                debug!(
                    index = self.current_index(),
                    length = state.current_length,
                    cut,
                    "splitting streamed block at separator"
                );
                sink.dispatch(message_delta(&message_id, channel, head));
                self.close_block(channel);
                if !tail.is_empty() {
                    let next_id = self.ensure_block(channel, sink);
                    self.state_mut(channel).current_length = tail.chars().count();
                    sink.dispatch(message_delta(&next_id, channel, tail));
                }
                return;
            }
            // No safe boundary in this chunk; let the block keep growing.
        }

        sink.dispatch(message_delta(&message_id, channel, content));
    }

    /// Open a block for the channel if none is active, announcing it with a
    /// run step. Returns the block's message id.
    fn ensure_block(&mut self, channel: ContentChannel, sink: &mut dyn EventSink) -> String {
        if let Some(id) = &self.state(channel).message_id {
            return id.clone();
        }

        let step_id = format!("step_{}", Uuid::new_v4());
        let message_id = format!("msg_{}", Uuid::new_v4());
        let index = self.blocks_started;
        self.blocks_started += 1;

        sink.dispatch(StepEvent::RunStep(RunStep {
            id: step_id.clone(),
            index,
            created_at: Utc::now(),
            step_details: StepDetails::MessageCreation { message_id: message_id.clone() },
        }));

        let state = self.state_mut(channel);
        state.step_id = Some(step_id);
        state.message_id = Some(message_id.clone());
        message_id
    }

    fn close_block(&mut self, channel: ContentChannel) {
        let state = self.state_mut(channel);
        state.step_id = None;
        state.message_id = None;
        state.current_length = 0;
    }

    fn state(&self, channel: ContentChannel) -> &ChannelState {
        match channel {
            ContentChannel::Text => &self.text,
            ContentChannel::Reasoning => &self.reasoning,
        }
    }

    fn state_mut(&mut self, channel: ContentChannel) -> &mut ChannelState {
        match channel {
            ContentChannel::Text => &mut self.text,
            ContentChannel::Reasoning => &mut self.reasoning,
        }
    }
}

/// Byte offset just past the rightmost separator in `content`, if any.
fn rightmost_separator(content: &str) -> Option<usize> {
    let mut best: Option<usize> = None;
    for sep in SEPARATORS.iter().chain(std::iter::once(&FENCE)) {
        if let Some(pos) = content.rfind(sep) {
            let end = pos + sep.len();
            best = Some(best.map_or(end, |b| b.max(end)));
        }
    }
    best
}

fn message_delta(message_id: &str, channel: ContentChannel, text: &str) -> StepEvent {
    let block = match channel {
        ContentChannel::Text => DeltaBlock::Text { text: text.to_string() },
        ContentChannel::Reasoning => DeltaBlock::Reasoning { reasoning: text.to_string() },
    };
    StepEvent::MessageDelta(MessageDelta {
        id: message_id.to_string(),
        delta: Delta { content: vec![block] },
    })
}

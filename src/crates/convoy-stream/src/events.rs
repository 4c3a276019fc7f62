//! Step events emitted while splitting streamed output.
//!
//! The split handler turns a raw provider stream into discrete logical
//! units: a [`RunStep`] announces a new message block (or a tool-call
//! batch), and [`MessageDelta`] events carry the literal text to append to
//! the current block. A caller-supplied aggregator reconstructs full
//! message content from the sequence; see `aggregate::DeltaAggregator` for
//! the reference implementation.
//!
//! Events are serde-serializable so callers can forward them over SSE or
//! similar transports without re-encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// An event dispatched by the split handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StepEvent {
    /// A new logical unit of streamed output
    RunStep(RunStep),
    /// Literal content to append to the current unit
    MessageDelta(MessageDelta),
}

/// One logical unit of streamed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    /// Generated step identifier
    pub id: String,

    /// Sequence index of this step within the run
    pub index: usize,

    /// Timestamp of the step announcement
    pub created_at: DateTime<Utc>,

    /// What this step announces
    pub step_details: StepDetails,
}

/// Payload of a [`RunStep`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetails {
    /// A new message block was opened
    MessageCreation {
        /// Identifier deltas for this block will carry
        message_id: String,
    },

    /// A batch of tool calls was announced
    ToolCalls {
        /// The calls, with arguments possibly still partial
        tool_calls: Vec<ToolCallDelta>,
    },
}

/// A possibly partial tool call streamed inside a run step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Provider-assigned call identifier, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Tool name, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Raw argument text accumulated so far
    #[serde(default)]
    pub arguments: String,
}

/// Literal content appended to the current block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    /// Message identifier announced by the owning run step
    pub id: String,

    /// The content payload
    pub delta: Delta,
}

/// Content payload of a [`MessageDelta`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Typed content fragments
    pub content: Vec<DeltaBlock>,
}

/// One typed content fragment inside a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaBlock {
    /// Visible output text
    Text {
        /// The text fragment
        text: String,
    },
    /// Reasoning-channel text
    Reasoning {
        /// The reasoning fragment
        reasoning: String,
    },
}

/// Synchronous dispatch target for step events.
///
/// The split handler is synchronous; sinks decide how events leave the
/// call. `Vec<StepEvent>` collects in place (the natural choice for tests
/// and batch consumers), [`ChannelSink`] forwards into an async channel.
pub trait EventSink {
    /// Receive one event.
    fn dispatch(&mut self, event: StepEvent);
}

impl EventSink for Vec<StepEvent> {
    fn dispatch(&mut self, event: StepEvent) {
        self.push(event);
    }
}

/// Forwards events into a tokio unbounded channel.
///
/// Send failures mean the receiver is gone; the sink drops the event rather
/// than failing the stream, matching the caller-owned cancellation model.
pub struct ChannelSink(pub mpsc::UnboundedSender<StepEvent>);

impl EventSink for ChannelSink {
    fn dispatch(&mut self, event: StepEvent) {
        self.0.send(event).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_step_serializes_with_tagged_details() {
        let step = RunStep {
            id: "step_1".to_string(),
            index: 0,
            created_at: Utc::now(),
            step_details: StepDetails::MessageCreation { message_id: "msg_1".to_string() },
        };
        let json = serde_json::to_value(StepEvent::RunStep(step)).unwrap();
        assert_eq!(json["event"], "run_step");
        assert_eq!(json["step_details"]["type"], "message_creation");
        assert_eq!(json["step_details"]["message_id"], "msg_1");
    }

    #[test]
    fn delta_blocks_are_typed() {
        let delta = MessageDelta {
            id: "msg_1".to_string(),
            delta: Delta {
                content: vec![DeltaBlock::Text { text: "hi".to_string() }],
            },
        };
        let json = serde_json::to_value(StepEvent::MessageDelta(delta)).unwrap();
        assert_eq!(json["event"], "message_delta");
        assert_eq!(json["delta"]["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = ChannelSink(tx);
        sink.dispatch(StepEvent::MessageDelta(MessageDelta {
            id: "msg_1".to_string(),
            delta: Delta { content: vec![] },
        }));
        assert!(matches!(rx.recv().await, Some(StepEvent::MessageDelta(_))));
    }
}

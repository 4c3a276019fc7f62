//! # convoy-stream - Run-Step Events from Streamed LLM Output
//!
//! Turns a raw provider token stream into discrete, well-bounded logical
//! message blocks.
//!
//! ## Overview
//!
//! Chat providers stream completions as small delta chunks. Downstream
//! consumers (UIs, persistence, tool dispatch) want logical units instead:
//! message blocks of bounded size that never break mid-sentence or inside a
//! fenced code block. This crate provides:
//!
//! - **Wire types** ([`StreamChunk`]) for provider delta chunks, including
//!   the reasoning channel of thinking models.
//! - **The split handler** ([`SplitStreamHandler`]) - a synchronous state
//!   machine that accumulates chunk lengths and starts a new block when a
//!   soft threshold is crossed at a safe separator boundary.
//! - **Step events** ([`StepEvent`], [`RunStep`], [`MessageDelta`]) emitted
//!   through a caller-supplied [`EventSink`].
//! - **An async adapter** ([`split_events`]) driving the handler over a
//!   `futures::Stream` of chunks.
//! - **An aggregator** ([`DeltaAggregator`]) that folds events back into
//!   complete messages; concatenating its output reproduces the streamed
//!   text exactly.
//!
//! ## Quick Start
//!
//! ```rust
//! use convoy_stream::{
//!     DeltaAggregator, SplitOptions, SplitStreamHandler, StepEvent, StreamChunk,
//! };
//!
//! let mut handler = SplitStreamHandler::new(SplitOptions::new().with_block_threshold(100));
//! let mut events: Vec<StepEvent> = Vec::new();
//!
//! handler.handle(&StreamChunk::text("Hello "), &mut events);
//! handler.handle(&StreamChunk::text("world."), &mut events);
//!
//! let mut aggregator = DeltaAggregator::new();
//! aggregator.apply_all(&events);
//! assert_eq!(aggregator.text(), "Hello world.");
//! ```
//!
//! ## Ordering
//!
//! One handler per streaming run, fed chunks strictly in arrival order;
//! reordering corrupts block boundaries. The handler performs no I/O and
//! has no flush - the final block ends with the stream.

pub mod adapter;
pub mod aggregate;
pub mod delta;
pub mod error;
pub mod events;
pub mod split;

pub use adapter::split_events;
pub use aggregate::DeltaAggregator;
pub use delta::{ChoiceDelta, DeltaPayload, StreamChunk};
pub use error::{Result, StreamError};
pub use events::{
    ChannelSink, Delta, DeltaBlock, EventSink, MessageDelta, RunStep, StepDetails, StepEvent,
    ToolCallDelta,
};
pub use split::{
    ContentChannel, SplitOptions, SplitStreamHandler, DEFAULT_BLOCK_THRESHOLD,
};

//! # convoy-context - Token-Budget Context Windows for Agent Conversations
//!
//! Core context-window management for streaming LLM agent conversations:
//! incremental token accounting, reconciliation against provider-reported
//! usage, and window selection under a hard token budget.
//!
//! ## Overview
//!
//! A conversation run accumulates messages; every model call must fit the
//! provider's context window. This crate provides two engines over the same
//! message model:
//!
//! - **Prune engine** ([`MessagePruner`]) - the primary path. Counts each
//!   message once, corrects estimates with usage metadata, and evicts the
//!   oldest turns first while always retaining the system message, keeping
//!   reasoning blocks attached to their assistant turn, and honoring a
//!   required starting role.
//! - **Trim engine** ([`MessageTrimmer`], [`trim_messages`]) - a general
//!   trimming primitive with `First`/`Last` retention strategies, role
//!   boundaries, and optional partial-message splitting.
//!
//! Token counting is injected through the [`TokenCounter`] contract; the
//! crate ships a [`HeuristicCounter`] but never tokenizes authoritatively
//! itself.
//!
//! ## Quick Start
//!
//! ```rust
//! use convoy_context::{
//!     HeuristicCounter, Message, MessagePruner, PruneConfig, PruneRequest,
//! };
//!
//! let mut pruner = MessagePruner::new(
//!     PruneConfig::new(8192).with_thinking(true),
//!     HeuristicCounter::new(),
//! );
//!
//! let mut history = vec![Message::system("Be concise."), Message::human("Hello!")];
//! let outcome = pruner.prune(PruneRequest::new(&history)).unwrap();
//!
//! // Feed `outcome.context` to the model, append its reply to `history`,
//! // and call `prune` again with the grown history - only the new messages
//! // are counted.
//! assert_eq!(outcome.context.len(), history.len());
//! history.push(Message::assistant("Hi!"));
//! ```
//!
//! ## Concurrency
//!
//! Engines are synchronous and single-threaded per call, and hold mutable
//! per-run state: one engine instance per conversation run, invoked
//! serially. Nothing here performs I/O or suspends.

pub mod error;
pub mod messages;
pub mod prune;
pub mod tokens;
pub mod trim;

pub use error::{ContextError, Result};
pub use messages::{ContentPart, Message, MessageContent, MessageRole, ToolCall};
pub use prune::{
    MessagePruner, PruneConfig, PruneOutcome, PruneRequest, REPLY_PRIME_TOKENS,
};
pub use tokens::{
    AsyncTokenCounter, HeuristicCounter, InputTokenDetails, TokenCounter, TokenTally,
    UsageMetadata,
};
pub use trim::{
    trim_messages, MessageTrimmer, TextSplitter, TrimOptions, TrimOutcome, TrimStrategy,
};

//! Token accounting: counter contracts, heuristic estimation, and
//! reconciliation against provider-reported usage.
//!
//! The engines in this crate never tokenize anything themselves. They are
//! handed a [`TokenCounter`] by the caller and cache its per-message results
//! in a [`TokenTally`], an explicit index-to-count map owned by exactly one
//! conversation run. When the provider reports authoritative usage for a
//! call, [`TokenTally::reconcile`] rescales every cached estimate so the
//! map's aggregate matches the report while preserving the relative
//! weighting between messages.
//!
//! # Examples
//!
//! ```rust
//! use convoy_context::messages::Message;
//! use convoy_context::tokens::{HeuristicCounter, TokenCounter, TokenTally};
//!
//! let counter = HeuristicCounter::new();
//! let mut tally = TokenTally::new();
//!
//! let history = vec![Message::system("Be brief."), Message::human("Hello!")];
//! for (idx, msg) in history.iter().enumerate() {
//!     tally.record(idx, counter.count(msg));
//! }
//!
//! assert_eq!(tally.len(), 2);
//! assert!(tally.total() > 0);
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::messages::{ContentPart, Message, MessageContent};

/// Maps a single message to a token count.
///
/// Implementations must be deterministic for identical content; cached
/// counts are reused across calls and a drifting counter would silently
/// corrupt the accounting. Any `Fn(&Message) -> usize` closure satisfies the
/// contract.
pub trait TokenCounter: Send + Sync {
    /// Count the tokens of one message.
    fn count(&self, message: &Message) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&Message) -> usize + Send + Sync,
{
    fn count(&self, message: &Message) -> usize {
        self(message)
    }
}

/// Asynchronous token counter contract for model-backed tokenizers.
///
/// Every synchronous [`TokenCounter`] satisfies this trait for free; only
/// counters that genuinely suspend (remote tokenizer endpoints) implement it
/// directly.
#[async_trait]
pub trait AsyncTokenCounter: Send + Sync {
    /// Count the tokens of one message.
    async fn count(&self, message: &Message) -> usize;
}

#[async_trait]
impl<T: TokenCounter> AsyncTokenCounter for T {
    async fn count(&self, message: &Message) -> usize {
        TokenCounter::count(self, message)
    }
}

/// Estimates token counts from content using a chars-per-token ratio.
///
/// This is a heuristic estimator - real tokenization varies per model. The
/// default ratio of 4.0 chars/token approximates GPT-family and Claude
/// models; reconciliation against usage metadata corrects the aggregate
/// after each model call.
#[derive(Debug, Clone)]
pub struct HeuristicCounter {
    chars_per_token: f32,
}

impl Default for HeuristicCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicCounter {
    /// Tokens charged per message for role markers and framing.
    const ROLE_OVERHEAD: usize = 4;

    /// Fixed estimate for image parts.
    const IMAGE_TOKENS: usize = 300;

    /// Creates a counter with the default ratio of 4.0 chars/token.
    pub fn new() -> Self {
        Self { chars_per_token: 4.0 }
    }

    /// Creates a counter with a custom chars-per-token ratio.
    pub fn with_ratio(chars_per_token: f32) -> Self {
        Self { chars_per_token }
    }

    /// Estimates the number of tokens in a text string.
    pub fn estimate_text(&self, text: &str) -> usize {
        (text.len() as f32 / self.chars_per_token).ceil() as usize
    }

    fn estimate_part(&self, part: &ContentPart) -> usize {
        match part {
            ContentPart::Text { text } => self.estimate_text(text),
            ContentPart::Thinking { thinking, .. } => self.estimate_text(thinking),
            ContentPart::ToolUse { name, input, .. } => {
                self.estimate_text(name) + self.estimate_text(&input.to_string())
            }
            ContentPart::ToolResult { content, .. } => self.estimate_text(content),
            ContentPart::Image { .. } => Self::IMAGE_TOKENS,
            ContentPart::Error { message } => self.estimate_text(message),
        }
    }
}

impl TokenCounter for HeuristicCounter {
    fn count(&self, message: &Message) -> usize {
        let content = match &message.content {
            MessageContent::Text(text) => self.estimate_text(text),
            MessageContent::Parts(parts) => parts.iter().map(|p| self.estimate_part(p)).sum(),
        };
        let tool_calls = message
            .tool_calls
            .iter()
            .flatten()
            .map(|c| self.estimate_text(&c.name) + self.estimate_text(&c.args.to_string()))
            .sum::<usize>();
        Self::ROLE_OVERHEAD + content + tool_calls
    }
}

/// Cache detail for prompt-cached input tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTokenDetails {
    /// Tokens written to the provider's prompt cache
    #[serde(default)]
    pub cache_creation: usize,
    /// Tokens served from the provider's prompt cache
    #[serde(default)]
    pub cache_read: usize,
}

/// Provider-reported token consumption for the most recent model call.
///
/// Used transiently to correct heuristic estimates; never persisted beyond
/// the call that supplies it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    /// Prompt tokens billed for the call
    #[serde(default)]
    pub input_tokens: usize,
    /// Completion tokens billed for the call
    #[serde(default)]
    pub output_tokens: usize,
    /// Provider-reported total, when present
    #[serde(default)]
    pub total_tokens: usize,
    /// Cache accounting detail, when the provider reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_token_details: Option<InputTokenDetails>,
}

impl UsageMetadata {
    /// Create usage metadata from input and output counts.
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            input_token_details: None,
        }
    }

    /// Attach cache accounting detail.
    pub fn with_cache_details(mut self, cache_creation: usize, cache_read: usize) -> Self {
        self.input_token_details = Some(InputTokenDetails { cache_creation, cache_read });
        self.total_tokens = self.total_input_tokens() + self.output_tokens;
        self
    }

    /// Total input cost including cache creation and cache reads.
    pub fn total_input_tokens(&self) -> usize {
        let details = self.input_token_details.unwrap_or_default();
        self.input_tokens + details.cache_creation + details.cache_read
    }

    /// The authoritative total used as the reconciliation target.
    ///
    /// Computed as total input plus output rather than trusting the raw
    /// `total_tokens` field, which providers variously omit or misreport
    /// when caching is involved. Returns `None` when the report carries no
    /// usable figures.
    pub fn effective_total(&self) -> Option<usize> {
        let total = self.total_input_tokens() + self.output_tokens;
        (total > 0).then_some(total)
    }
}

/// Index-to-token-count map for one accumulating message history.
///
/// Owned by exactly one conversation run and passed explicitly through the
/// engines. Indices refer to insertion order in the caller's history array.
/// The map grows monotonically and never shrinks - counts for messages that
/// fall out of the window stay cached for potential re-inclusion. An index's
/// count is immutable once recorded, with reconciliation as the single
/// sanctioned rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTally {
    counts: BTreeMap<usize, usize>,
}

impl TokenTally {
    /// Creates an empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the token count for a message index.
    ///
    /// Recording an index that is already present overwrites it; callers
    /// are expected to check [`contains`](Self::contains) first.
    pub fn record(&mut self, index: usize, count: usize) {
        self.counts.insert(index, count);
    }

    /// Whether a count is cached for this index.
    pub fn contains(&self, index: usize) -> bool {
        self.counts.contains_key(&index)
    }

    /// The cached count for an index, if any.
    pub fn get(&self, index: usize) -> Option<usize> {
        self.counts.get(&index).copied()
    }

    /// Sum of all cached counts.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the tally is empty.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterate entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.counts.iter().map(|(&i, &c)| (i, c))
    }

    /// Rescale every cached count against authoritative usage.
    ///
    /// Each entry is multiplied by `effective_total / current_total` and
    /// rounded half-up, keeping the relative weighting between messages
    /// while pinning the aggregate to the provider's figure. Rounding drift
    /// is folded into the highest-index entries so the aggregate matches
    /// exactly. Returns whether a rescale was applied.
    pub fn reconcile(&mut self, usage: &UsageMetadata) -> bool {
        let Some(target) = usage.effective_total() else {
            return false;
        };
        let current = self.total();
        if current == 0 {
            return false;
        }

        let ratio = target as f64 / current as f64;
        for count in self.counts.values_mut() {
            *count = (*count as f64 * ratio).round() as usize;
        }

        let mut drift = target as i64 - self.total() as i64;
        for count in self.counts.values_mut().rev() {
            if drift == 0 {
                break;
            }
            let adjusted = (*count as i64 + drift).max(0);
            drift -= adjusted - *count as i64;
            *count = adjusted as usize;
        }

        debug!(target, ratio, "reconciled token tally against usage metadata");
        true
    }
}

impl FromIterator<(usize, usize)> for TokenTally {
    fn from_iter<I: IntoIterator<Item = (usize, usize)>>(iter: I) -> Self {
        Self { counts: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_counts_scale_with_text() {
        let counter = HeuristicCounter::new();
        let short = TokenCounter::count(&counter, &Message::human("hi"));
        let long = TokenCounter::count(&counter, &Message::human("hi ".repeat(100)));
        assert!(long > short);
    }

    #[test]
    fn heuristic_counts_cover_all_parts() {
        let counter = HeuristicCounter::new();
        let msg = Message::assistant(MessageContent::Parts(vec![
            ContentPart::thinking("reasoning"),
            ContentPart::text("answer"),
            ContentPart::image_url("https://example.com/a.png"),
        ]));
        assert!(TokenCounter::count(&counter, &msg) > HeuristicCounter::IMAGE_TOKENS);
    }

    #[test]
    fn effective_total_includes_cache_details() {
        let usage = UsageMetadata::new(100, 50);
        assert_eq!(usage.effective_total(), Some(150));

        let cached = UsageMetadata::new(100, 50).with_cache_details(20, 30);
        assert_eq!(cached.total_input_tokens(), 150);
        assert_eq!(cached.effective_total(), Some(200));

        assert_eq!(UsageMetadata::default().effective_total(), None);
    }

    #[test]
    fn reconcile_preserves_exact_total() {
        let mut tally: TokenTally = [(0, 17), (1, 9), (2, 10)].into_iter().collect();
        let applied = tally.reconcile(&UsageMetadata::new(50, 25));
        assert!(applied);
        assert_eq!(tally.total(), 75);
        // Relative ordering survives the rescale.
        assert!(tally.get(0).unwrap() > tally.get(1).unwrap());
    }

    #[test]
    fn reconcile_is_a_noop_without_usable_usage() {
        let mut tally: TokenTally = [(0, 10)].into_iter().collect();
        assert!(!tally.reconcile(&UsageMetadata::default()));
        assert_eq!(tally.get(0), Some(10));

        let mut empty = TokenTally::new();
        assert!(!empty.reconcile(&UsageMetadata::new(10, 5)));
    }

    #[test]
    fn reconcile_handles_downscale_drift() {
        let mut tally: TokenTally = (0..7).map(|i| (i, 3)).collect();
        tally.reconcile(&UsageMetadata::new(7, 3));
        assert_eq!(tally.total(), 10);
    }

    #[tokio::test]
    async fn sync_counters_satisfy_the_async_contract() {
        let counter = HeuristicCounter::new();
        let msg = Message::human("hello");
        let sync = TokenCounter::count(&counter, &msg);
        let via_async = AsyncTokenCounter::count(&counter, &msg).await;
        assert_eq!(sync, via_async);
    }
}

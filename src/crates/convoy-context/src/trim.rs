//! Token-budget message trimming with first/last retention strategies.
//!
//! [`trim_messages`] selects the subsequence of a history that fits a token
//! budget, keeping either the newest or the oldest messages. It supports
//! holding aside a leading system message, role boundaries for the kept
//! window (`start_on`/`end_on`), and optional partial-message splitting when
//! the cutoff lands mid-message.
//!
//! [`MessageTrimmer`] wraps the same selection with incremental token
//! accounting: across repeated calls with a growing history it counts each
//! message exactly once and caches the result in a [`TokenTally`].
//!
//! # Example
//!
//! ```rust
//! use convoy_context::messages::Message;
//! use convoy_context::trim::{trim_messages, TrimOptions};
//!
//! let messages = vec![
//!     Message::system("You are a helpful assistant"),
//!     Message::human("Hello"),
//!     Message::assistant("Hi there!"),
//!     Message::human("How are you?"),
//! ];
//!
//! // Keep the newest messages within 20 tokens, system message held aside.
//! let counter = |m: &Message| m.content.flat_text().len() / 4 + 1;
//! let trimmed = trim_messages(&messages, &TrimOptions::last(20), &counter).unwrap();
//! assert!(trimmed.len() <= messages.len());
//! ```

use std::collections::VecDeque;

use tracing::warn;

use crate::error::{ContextError, Result};
use crate::messages::{Message, MessageContent, MessageRole};
use crate::tokens::{TokenCounter, TokenTally};

/// Strategy for trimming messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimStrategy {
    /// Keep the first (oldest) messages
    First,
    /// Keep the last (newest) messages
    Last,
}

/// Splits string content into fragments for partial-message trimming.
///
/// The default splitter breaks on newlines when the text contains any, and
/// otherwise treats the whole string as a single fragment. Fragments
/// concatenate back to the original text exactly.
#[derive(Debug, Clone, Copy, Default)]
pub enum TextSplitter {
    /// Split on newline boundaries, else keep the whole string
    #[default]
    Lines,
    /// Caller-supplied splitter
    Custom(fn(&str) -> Vec<String>),
}

impl TextSplitter {
    /// Split `text` into fragments whose concatenation equals `text`.
    pub fn split(&self, text: &str) -> Vec<String> {
        match self {
            TextSplitter::Lines => {
                if text.contains('\n') {
                    text.split_inclusive('\n').map(String::from).collect()
                } else {
                    vec![text.to_string()]
                }
            }
            TextSplitter::Custom(f) => f(text),
        }
    }
}

/// Options for trimming messages
#[derive(Debug, Clone)]
pub struct TrimOptions {
    /// Maximum number of tokens the kept window may cost
    pub max_tokens: usize,

    /// Strategy: `First` keeps oldest messages, `Last` keeps newest messages
    pub strategy: TrimStrategy,

    /// Whether to hold aside a leading system message (`Last` only)
    pub include_system: bool,

    /// Require the kept window to start on this role, discarding from the
    /// front to the first match (`Last` only)
    pub start_on: Option<MessageRole>,

    /// Require the kept window to end on this role, discarding from the
    /// back to the last match
    pub end_on: Option<MessageRole>,

    /// Split the message at the cutoff and keep the fitting fragment
    pub allow_partial: bool,

    /// Splitter used for string content when `allow_partial` is set
    pub text_splitter: TextSplitter,
}

impl Default for TrimOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            strategy: TrimStrategy::Last,
            include_system: true,
            start_on: None,
            end_on: None,
            allow_partial: false,
            text_splitter: TextSplitter::default(),
        }
    }
}

impl TrimOptions {
    /// Options keeping the newest messages within `max_tokens`.
    pub fn last(max_tokens: usize) -> Self {
        Self { max_tokens, strategy: TrimStrategy::Last, ..Default::default() }
    }

    /// Options keeping the oldest messages within `max_tokens`.
    pub fn first(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            strategy: TrimStrategy::First,
            include_system: false,
            ..Default::default()
        }
    }

    /// Set whether to hold aside a leading system message
    pub fn with_include_system(mut self, include: bool) -> Self {
        self.include_system = include;
        self
    }

    /// Require the kept window to start on the given role
    pub fn with_start_on(mut self, role: MessageRole) -> Self {
        self.start_on = Some(role);
        self
    }

    /// Require the kept window to end on the given role
    pub fn with_end_on(mut self, role: MessageRole) -> Self {
        self.end_on = Some(role);
        self
    }

    /// Enable partial-message splitting at the cutoff
    pub fn with_allow_partial(mut self, allow: bool) -> Self {
        self.allow_partial = allow;
        self
    }

    /// Set the splitter used for string content
    pub fn with_text_splitter(mut self, splitter: TextSplitter) -> Self {
        self.text_splitter = splitter;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.strategy == TrimStrategy::First {
            if self.start_on.is_some() {
                return Err(ContextError::invalid_options(
                    "start_on is only supported with the Last strategy",
                ));
            }
            if self.include_system {
                return Err(ContextError::invalid_options(
                    "include_system is only supported with the Last strategy",
                ));
            }
        }
        Ok(())
    }
}

/// Which end of a split message the fitting fragment is taken from.
#[derive(Clone, Copy)]
enum FragmentSide {
    Leading,
    Trailing,
}

/// Trim messages to fit a token budget.
///
/// Counts every message through the injected counter; use
/// [`MessageTrimmer`] to cache counts across repeated calls on a growing
/// history.
///
/// # Errors
///
/// Returns [`ContextError::InvalidOptions`] for option combinations the
/// strategies do not support (`start_on` or `include_system` with `First`).
pub fn trim_messages(
    messages: &[Message],
    options: &TrimOptions,
    counter: &dyn TokenCounter,
) -> Result<Vec<Message>> {
    options.validate()?;
    let mut lookup = |_: usize, message: &Message| counter.count(message);
    trim_with_lookup(messages, options, &mut lookup, counter)
}

/// Selection core shared by [`trim_messages`] and [`MessageTrimmer`].
///
/// `lookup` supplies per-index costs (cached or on-demand); `counter` is
/// needed separately because partial fragments are re-measured as candidate
/// messages that have no index of their own.
pub(crate) fn trim_with_lookup(
    messages: &[Message],
    options: &TrimOptions,
    lookup: &mut dyn FnMut(usize, &Message) -> usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<Message>> {
    options.validate()?;
    if messages.is_empty() {
        return Ok(Vec::new());
    }
    match options.strategy {
        TrimStrategy::Last => trim_last(messages, options, lookup, counter),
        TrimStrategy::First => trim_first(messages, options, lookup, counter),
    }
}

fn trim_last(
    messages: &[Message],
    options: &TrimOptions,
    lookup: &mut dyn FnMut(usize, &Message) -> usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<Message>> {
    let mut budget = options.max_tokens;
    let system_held = options.include_system && messages[0].role == MessageRole::System;
    let start = if system_held {
        budget = budget.saturating_sub(lookup(0, &messages[0]));
        1
    } else {
        0
    };

    let mut kept: VecDeque<Message> = VecDeque::new();
    let mut running = 0usize;
    for idx in (start..messages.len()).rev() {
        let cost = lookup(idx, &messages[idx]);
        if running + cost <= budget {
            kept.push_front(messages[idx].clone());
            running += cost;
        } else {
            if options.allow_partial {
                if let Some(partial) = partial_fit(
                    &messages[idx],
                    budget - running,
                    counter,
                    options.text_splitter,
                    FragmentSide::Trailing,
                ) {
                    kept.push_front(partial);
                }
            }
            break;
        }
    }

    if let Some(role) = options.start_on {
        while kept.front().is_some_and(|m| m.role != role) {
            kept.pop_front();
        }
    }
    if let Some(role) = options.end_on {
        while kept.back().is_some_and(|m| m.role != role) {
            kept.pop_back();
        }
    }

    let mut result = Vec::with_capacity(kept.len() + 1);
    if system_held {
        result.push(messages[0].clone());
    }
    result.extend(kept);
    Ok(result)
}

fn trim_first(
    messages: &[Message],
    options: &TrimOptions,
    lookup: &mut dyn FnMut(usize, &Message) -> usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<Message>> {
    let mut kept: Vec<Message> = Vec::new();
    let mut running = 0usize;
    for (idx, message) in messages.iter().enumerate() {
        let cost = lookup(idx, message);
        if running + cost <= options.max_tokens {
            kept.push(message.clone());
            running += cost;
        } else {
            if options.allow_partial {
                if let Some(partial) = partial_fit(
                    message,
                    options.max_tokens - running,
                    counter,
                    options.text_splitter,
                    FragmentSide::Leading,
                ) {
                    kept.push(partial);
                }
            }
            break;
        }
    }

    if let Some(role) = options.end_on {
        while kept.last().is_some_and(|m| m.role != role) {
            kept.pop();
        }
    }
    Ok(kept)
}

/// Largest fragment of `message` that fits `budget`, or `None`.
///
/// Structured content splits on part boundaries; string content goes through
/// the text splitter. The candidate partial message is re-measured after
/// each added fragment, so the decision uses real counts rather than
/// fragment-length arithmetic.
fn partial_fit(
    message: &Message,
    budget: usize,
    counter: &dyn TokenCounter,
    splitter: TextSplitter,
    side: FragmentSide,
) -> Option<Message> {
    if budget == 0 {
        return None;
    }

    match &message.content {
        MessageContent::Parts(parts) => {
            let mut chosen: VecDeque<_> = VecDeque::new();
            let mut best = None;
            for part in ordered(parts.iter().cloned(), side) {
                match side {
                    FragmentSide::Leading => chosen.push_back(part),
                    FragmentSide::Trailing => chosen.push_front(part),
                }
                let candidate = with_content(
                    message,
                    MessageContent::Parts(chosen.iter().cloned().collect()),
                );
                if counter.count(&candidate) <= budget {
                    best = Some(candidate);
                } else {
                    break;
                }
            }
            best
        }
        MessageContent::Text(text) => {
            let fragments = splitter.split(text);
            let mut chosen: VecDeque<String> = VecDeque::new();
            let mut best = None;
            for fragment in ordered(fragments.into_iter(), side) {
                match side {
                    FragmentSide::Leading => chosen.push_back(fragment),
                    FragmentSide::Trailing => chosen.push_front(fragment),
                }
                let candidate = with_content(
                    message,
                    MessageContent::Text(chosen.iter().cloned().collect()),
                );
                if counter.count(&candidate) <= budget {
                    best = Some(candidate);
                } else {
                    break;
                }
            }
            best
        }
    }
}

fn ordered<T>(
    iter: impl DoubleEndedIterator<Item = T>,
    side: FragmentSide,
) -> Box<dyn Iterator<Item = T>>
where
    T: 'static,
{
    match side {
        FragmentSide::Leading => Box::new(iter.collect::<Vec<_>>().into_iter()),
        FragmentSide::Trailing => Box::new(iter.rev().collect::<Vec<_>>().into_iter()),
    }
}

fn with_content(message: &Message, content: MessageContent) -> Message {
    let mut partial = message.clone();
    partial.content = content;
    partial
}

/// Result of one [`MessageTrimmer::trim`] call.
#[derive(Debug, Clone)]
pub struct TrimOutcome {
    /// The trimmed subsequence of the input history
    pub messages: Vec<Message>,
    /// Snapshot of the full index-to-count map, including entries for
    /// messages outside the trimmed window
    pub token_counts: TokenTally,
}

/// Incremental trimmer for one accumulating conversation history.
///
/// Owns the token tally for the run and the previously seen history length.
/// Each call counts only newly appended messages; the selection pass reads
/// counts through the cache and falls back to an on-demand recount (with a
/// warning) for anything unexpectedly missing.
///
/// Histories must grow by appending only. A shorter array than the previous
/// call fails fast with [`ContextError::HistoryRegression`] instead of
/// silently mis-detecting new messages.
///
/// Not safe for concurrent use on the same instance; one trimmer per
/// conversation run, invoked serially.
pub struct MessageTrimmer<C: TokenCounter> {
    options: TrimOptions,
    counter: C,
    tally: TokenTally,
    last_len: usize,
}

impl<C: TokenCounter> MessageTrimmer<C> {
    /// Create a trimmer for a fresh history.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidOptions`] for unsupported option
    /// combinations, so misconfiguration surfaces at construction rather
    /// than on the first call.
    pub fn new(options: TrimOptions, counter: C) -> Result<Self> {
        options.validate()?;
        Ok(Self { options, counter, tally: TokenTally::new(), last_len: 0 })
    }

    /// The accumulated index-to-count map.
    pub fn tally(&self) -> &TokenTally {
        &self.tally
    }

    /// Trim the current history, counting only newly appended messages.
    pub fn trim(&mut self, messages: &[Message]) -> Result<TrimOutcome> {
        if messages.len() < self.last_len {
            return Err(ContextError::HistoryRegression {
                previous: self.last_len,
                current: messages.len(),
            });
        }

        for (idx, message) in messages.iter().enumerate().skip(self.last_len) {
            if !self.tally.contains(idx) {
                self.tally.record(idx, self.counter.count(message));
            }
        }
        self.last_len = messages.len();

        let tally = &self.tally;
        let counter = &self.counter;
        let mut lookup = |idx: usize, message: &Message| match tally.get(idx) {
            Some(count) => count,
            None => {
                warn!(index = idx, "token count missing from cache; recounting");
                counter.count(message)
            }
        };
        let trimmed = trim_with_lookup(messages, &self.options, &mut lookup, &self.counter)?;

        Ok(TrimOutcome { messages: trimmed, token_counts: self.tally.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One token per character of flattened text; keeps budgets easy to
    /// reason about in tests.
    fn char_counter(message: &Message) -> usize {
        message.content.flat_text().chars().count()
    }

    #[test]
    fn last_keeps_newest_within_budget() {
        let messages = vec![
            Message::human("aaaa"),
            Message::assistant("bbbb"),
            Message::human("cc"),
        ];
        let trimmed = trim_messages(&messages, &TrimOptions::last(6), &char_counter).unwrap();
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].text(), Some("bbbb"));
        assert_eq!(trimmed[1].text(), Some("cc"));
    }

    #[test]
    fn include_system_holds_the_system_message_aside() {
        let messages = vec![
            Message::system("ssss"),
            Message::human("aaaa"),
            Message::assistant("cc"),
        ];
        let trimmed = trim_messages(&messages, &TrimOptions::last(6), &char_counter).unwrap();
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].role, MessageRole::System);
        assert_eq!(trimmed[1].text(), Some("cc"));
    }

    #[test]
    fn start_on_discards_to_the_first_matching_role() {
        let messages = vec![
            Message::assistant("aa"),
            Message::human("bb"),
            Message::assistant("cc"),
        ];
        let options = TrimOptions::last(100).with_start_on(MessageRole::Human);
        let trimmed = trim_messages(&messages, &options, &char_counter).unwrap();
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].role, MessageRole::Human);
    }

    #[test]
    fn end_on_discards_from_the_back() {
        let messages = vec![
            Message::human("aa"),
            Message::assistant("bb"),
            Message::human("cc"),
        ];
        let options = TrimOptions::last(100)
            .with_include_system(false)
            .with_end_on(MessageRole::Assistant);
        let trimmed = trim_messages(&messages, &options, &char_counter).unwrap();
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed.last().unwrap().role, MessageRole::Assistant);
    }

    #[test]
    fn first_keeps_oldest_within_budget() {
        let messages = vec![
            Message::human("aaaa"),
            Message::assistant("bbbb"),
            Message::human("cc"),
        ];
        let trimmed = trim_messages(&messages, &TrimOptions::first(8), &char_counter).unwrap();
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].text(), Some("aaaa"));
        assert_eq!(trimmed[1].text(), Some("bbbb"));
    }

    #[test]
    fn first_rejects_last_only_options() {
        let messages = vec![Message::human("aa")];
        let options = TrimOptions::first(10).with_start_on(MessageRole::Human);
        assert!(matches!(
            trim_messages(&messages, &options, &char_counter),
            Err(ContextError::InvalidOptions(_))
        ));

        let options = TrimOptions::first(10).with_include_system(true);
        assert!(matches!(
            trim_messages(&messages, &options, &char_counter),
            Err(ContextError::InvalidOptions(_))
        ));
    }

    #[test]
    fn partial_split_keeps_trailing_lines() {
        let messages = vec![
            Message::human("one\ntwo\nthree"),
            Message::assistant("xx"),
        ];
        let options = TrimOptions::last(10)
            .with_include_system(false)
            .with_allow_partial(true);
        let trimmed = trim_messages(&messages, &options, &char_counter).unwrap();
        // "xx" costs 2, leaving 8: "three" (5) fits, "two\nthree" (9) does not.
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].text(), Some("three"));
        assert_eq!(trimmed[1].text(), Some("xx"));
    }

    #[test]
    fn partial_split_keeps_leading_parts_for_first() {
        use crate::messages::{ContentPart, MessageContent};
        let messages = vec![Message::assistant(MessageContent::Parts(vec![
            ContentPart::text("aaaa"),
            ContentPart::text("bbbb"),
            ContentPart::text("cccc"),
        ]))];
        let options = TrimOptions::first(8).with_allow_partial(true);
        let trimmed = trim_messages(&messages, &options, &char_counter).unwrap();
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].content.flat_text(), "aaaabbbb");
    }

    #[test]
    fn trimmer_counts_each_new_message_once() {
        let calls = AtomicUsize::new(0);
        let counter = |m: &Message| {
            calls.fetch_add(1, Ordering::SeqCst);
            char_counter(m)
        };
        let mut trimmer = MessageTrimmer::new(TrimOptions::last(1000), counter).unwrap();

        let mut history = vec![Message::system("sys"), Message::human("hello")];
        trimmer.trim(&history).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        history.push(Message::assistant("hi"));
        trimmer.trim(&history).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // No new messages means no new counts.
        trimmer.trim(&history).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn trimmer_rejects_shrinking_history() {
        let mut trimmer = MessageTrimmer::new(TrimOptions::last(100), char_counter).unwrap();
        let history = vec![Message::human("a"), Message::assistant("b")];
        trimmer.trim(&history).unwrap();

        assert!(matches!(
            trimmer.trim(&history[..1]),
            Err(ContextError::HistoryRegression { previous: 2, current: 1 })
        ));
    }

    #[test]
    fn trimmer_returns_the_full_tally() {
        let mut trimmer = MessageTrimmer::new(TrimOptions::last(2), char_counter).unwrap();
        let history = vec![
            Message::human("aaaa"),
            Message::assistant("bb"),
        ];
        let outcome = trimmer.trim(&history).unwrap();
        // Only "bb" fits, but both indices are accounted.
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.token_counts.len(), 2);
        assert_eq!(outcome.token_counts.get(0), Some(4));
    }

    #[test]
    fn splitter_round_trips_text() {
        let splitter = TextSplitter::default();
        let text = "one\ntwo\nthree";
        assert_eq!(splitter.split(text).concat(), text);
        assert_eq!(splitter.split("no newline"), vec!["no newline".to_string()]);
    }
}

//! Stateful context-window pruning under a token budget.
//!
//! [`MessagePruner`] owns the token accounting for one conversation run. On
//! each call it counts only newly appended messages, reconciles cached
//! estimates against provider-reported usage, and selects the subsequence of
//! history that fits the budget, evicting oldest turns first.
//!
//! Structural invariants the window selection preserves:
//!
//! - A leading system message is always retained once present, regardless of
//!   budget pressure.
//! - A reasoning block stays attached to its assistant turn: when the
//!   carrier message is evicted while a later step of the same assistant/tool
//!   sequence survives, the block is relocated into the surviving window
//!   rather than silently dropped.
//! - An optional required starting role trims dangling fragments (for
//!   example a tool result with no preceding assistant call) off the front
//!   of the window.
//!
//! # Example
//!
//! ```rust
//! use convoy_context::messages::Message;
//! use convoy_context::prune::{MessagePruner, PruneConfig, PruneRequest};
//! use convoy_context::tokens::HeuristicCounter;
//!
//! let mut pruner = MessagePruner::new(PruneConfig::new(8192), HeuristicCounter::new());
//!
//! let history = vec![Message::system("Be concise."), Message::human("Hi!")];
//! let outcome = pruner.prune(PruneRequest::new(&history)).unwrap();
//! assert_eq!(outcome.context.len(), 2);
//! ```

use std::collections::VecDeque;

use tracing::debug;

use crate::error::{ContextError, Result};
use crate::messages::{ContentPart, Message, MessageContent, MessageRole};
use crate::tokens::{TokenCounter, TokenTally, UsageMetadata};

/// Tokens reserved for the reply-priming overhead of a chat completion.
///
/// A fixed framing cost charged before any history is admitted; not
/// configurable.
pub const REPLY_PRIME_TOKENS: usize = 3;

/// Configuration for a [`MessagePruner`].
#[derive(Debug, Clone)]
pub struct PruneConfig {
    /// Token budget for the selected context
    pub max_tokens: usize,
    /// History index where this run's accounting starts
    pub start_index: usize,
    /// Track and preserve reasoning blocks across eviction
    pub thinking_enabled: bool,
}

impl PruneConfig {
    /// Create a configuration with the given token budget.
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens, start_index: 0, thinking_enabled: false }
    }

    /// Set the history index where accounting starts.
    pub fn with_start_index(mut self, start_index: usize) -> Self {
        self.start_index = start_index;
        self
    }

    /// Enable reasoning-block tracking.
    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.thinking_enabled = enabled;
        self
    }
}

/// One pruning call: the full history plus per-call inputs.
#[derive(Debug, Clone)]
pub struct PruneRequest<'a> {
    /// The full accumulated message history
    pub messages: &'a [Message],
    /// Usage reported by the most recent model call, when available
    pub usage: Option<&'a UsageMetadata>,
    /// Role the selected context must start on, when required
    pub start_role: Option<MessageRole>,
}

impl<'a> PruneRequest<'a> {
    /// A request carrying only the history.
    pub fn new(messages: &'a [Message]) -> Self {
        Self { messages, usage: None, start_role: None }
    }

    /// Attach usage metadata from the last model call.
    pub fn with_usage(mut self, usage: &'a UsageMetadata) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Require the selected context to start on the given role.
    pub fn with_start_role(mut self, role: MessageRole) -> Self {
        self.start_role = Some(role);
        self
    }
}

/// Result of one [`MessagePruner::prune`] call.
#[derive(Debug, Clone)]
pub struct PruneOutcome {
    /// The selected context in chronological order
    pub context: Vec<Message>,
    /// Snapshot of the full index-to-count map
    pub token_counts: TokenTally,
    /// Budget left after the selected context
    pub remaining_tokens: usize,
}

/// Stateful pruning engine for one conversation run.
///
/// Maintains the turn cursor and the index-to-count map across calls. Not
/// safe for concurrent invocation on the same instance; one pruner per run,
/// invoked serially as messages arrive.
pub struct MessagePruner<C: TokenCounter> {
    config: PruneConfig,
    counter: C,
    tally: TokenTally,
    last_turn_start: usize,
}

impl<C: TokenCounter> MessagePruner<C> {
    /// Create a pruner with an empty tally.
    pub fn new(config: PruneConfig, counter: C) -> Self {
        let last_turn_start = config.start_index;
        Self { config, counter, tally: TokenTally::new(), last_turn_start }
    }

    /// Create a pruner seeded with counts from an earlier run segment.
    pub fn with_tally(config: PruneConfig, counter: C, tally: TokenTally) -> Self {
        let last_turn_start = config.start_index;
        Self { config, counter, tally, last_turn_start }
    }

    /// The accumulated index-to-count map.
    pub fn tally(&self) -> &TokenTally {
        &self.tally
    }

    /// Select the context for the next model call.
    ///
    /// Counts only messages appended since the previous call, using the
    /// reported output token figure for the turn-start message when usage
    /// metadata supplies one. When the full history fits the budget it is
    /// returned unchanged; otherwise the oldest messages are evicted.
    ///
    /// # Errors
    ///
    /// - [`ContextError::HistoryRegression`] when the history shrank since
    ///   the previous call.
    /// - [`ContextError::MalformedPayload`] when reasoning continuity cannot
    ///   be preserved (see module docs).
    pub fn prune(&mut self, request: PruneRequest<'_>) -> Result<PruneOutcome> {
        let messages = request.messages;
        if messages.len() < self.last_turn_start {
            return Err(ContextError::HistoryRegression {
                previous: self.last_turn_start,
                current: messages.len(),
            });
        }

        for (idx, message) in messages.iter().enumerate().skip(self.last_turn_start) {
            if self.tally.contains(idx) {
                continue;
            }
            let reported_output = request
                .usage
                .map(|u| u.output_tokens)
                .filter(|&tokens| tokens > 0);
            let count = match reported_output {
                // The turn-start message is the assistant response the last
                // call produced; the provider already counted it.
                Some(tokens) if idx == self.last_turn_start => tokens,
                _ => self.counter.count(message),
            };
            self.tally.record(idx, count);
        }

        if let Some(usage) = request.usage {
            self.tally.reconcile(usage);
        }
        self.last_turn_start = messages.len();

        let total = self.tally.total();
        if total <= self.config.max_tokens {
            return Ok(PruneOutcome {
                context: messages.to_vec(),
                token_counts: self.tally.clone(),
                remaining_tokens: self.config.max_tokens - total,
            });
        }

        let (context, remaining_tokens) = window_within_limit(
            messages,
            self.config.max_tokens,
            &self.tally,
            &self.counter,
            self.config.thinking_enabled,
            request.start_role,
        )?;
        Ok(PruneOutcome { context, token_counts: self.tally.clone(), remaining_tokens })
    }
}

/// A trailing assistant/tool sequence detected at the end of the history.
struct ThinkingTrace {
    /// Newest index of the run
    run_end: usize,
    /// Assistant message carrying the reasoning block, when one was found
    carrier: Option<(usize, ContentPart)>,
}

/// Scan backward for a trailing assistant/tool run and its reasoning block.
///
/// A human or system message reached before any reasoning block means the
/// run was a false start and tracking is reset entirely. A run that extends
/// to the start of the scan without a block is still reported so the caller
/// can reject a window cut inside it.
fn trailing_thinking_run(messages: &[Message], first_idx: usize) -> Option<ThinkingTrace> {
    let mut run_end = None;
    for idx in (first_idx..messages.len()).rev() {
        let message = &messages[idx];
        if !message.role.is_agent_side() {
            return None;
        }
        if run_end.is_none() {
            run_end = Some(idx);
        }
        if message.role == MessageRole::Assistant {
            if let Some(part) = message.thinking_part() {
                return Some(ThinkingTrace {
                    run_end: run_end.unwrap_or(idx),
                    carrier: Some((idx, part.clone())),
                });
            }
        }
    }
    run_end.map(|run_end| ThinkingTrace { run_end, carrier: None })
}

/// Select the newest subsequence of `messages` that fits `max_tokens`.
///
/// Walks the history backward, admitting messages while the running total
/// stays within the budget; the first failure stops the walk and everything
/// older is evicted. The window is built with `push_front` on a deque, so it
/// is chronological without a reverse pass. Returns the context (leading
/// system message re-attached) and the unspent budget.
fn window_within_limit(
    messages: &[Message],
    max_tokens: usize,
    tally: &TokenTally,
    counter: &dyn TokenCounter,
    thinking_enabled: bool,
    start_role: Option<MessageRole>,
) -> Result<(Vec<Message>, usize)> {
    let cost_of =
        |idx: usize, message: &Message| tally.get(idx).unwrap_or_else(|| counter.count(message));

    let mut remaining = max_tokens.saturating_sub(REPLY_PRIME_TOKENS);
    let system = messages.first().filter(|m| m.role == MessageRole::System);
    let first_idx = usize::from(system.is_some());
    if let Some(instructions) = system {
        // Always retained; its cost comes off the top of the budget.
        remaining = remaining.saturating_sub(cost_of(0, instructions));
    }

    let trace = if thinking_enabled {
        trailing_thinking_run(messages, first_idx)
    } else {
        None
    };

    let mut context: VecDeque<(usize, Message)> = VecDeque::new();
    let mut running = 0usize;
    for idx in (first_idx..messages.len()).rev() {
        let cost = cost_of(idx, &messages[idx]);
        if running + cost > remaining {
            break;
        }
        context.push_front((idx, messages[idx].clone()));
        running += cost;
    }
    debug!(
        kept = context.len(),
        evicted = messages.len() - first_idx - context.len(),
        "pruned context window"
    );

    if let Some(role) = start_role {
        if let Some(pos) = context.iter().position(|(_, m)| m.role == role) {
            for _ in 0..pos {
                if let Some((idx, dropped)) = context.pop_front() {
                    running = running.saturating_sub(cost_of(idx, &dropped));
                }
            }
        }
        // No message of the required role: the context is returned whole
        // rather than emptied.
    }

    if let Some(trace) = trace {
        if let Some(first_kept) = context.front().map(|(idx, _)| *idx) {
            match trace.carrier {
                Some((carrier_idx, block))
                    if carrier_idx < first_kept && first_kept <= trace.run_end =>
                {
                    reattach_thinking(&mut context, &mut running, remaining, block, counter, &cost_of)?;
                }
                None if first_kept > first_idx && first_kept <= trace.run_end => {
                    return Err(ContextError::malformed(
                        "a reasoning sequence was detected but no thinking block could be located",
                    ));
                }
                _ => {}
            }
        }
    }

    let mut result = Vec::with_capacity(context.len() + 1);
    if let Some(instructions) = system {
        result.push(instructions.clone());
    }
    result.extend(context.into_iter().map(|(_, message)| message));
    Ok((result, remaining.saturating_sub(running)))
}

/// Relocate an orphaned reasoning block into the surviving window.
///
/// The block is prepended into the latest assistant message of the context
/// and its own token cost charged against the budget. When that overdraws
/// the budget, a second independent bounded walk re-derives the window from
/// the already-retained messages; its evictions do not feed the primary
/// pruned remainder.
fn reattach_thinking(
    context: &mut VecDeque<(usize, Message)>,
    running: &mut usize,
    remaining: usize,
    block: ContentPart,
    counter: &dyn TokenCounter,
    cost_of: &impl Fn(usize, &Message) -> usize,
) -> Result<()> {
    let host_pos = context
        .iter()
        .rposition(|(_, m)| m.role == MessageRole::Assistant)
        .ok_or_else(|| {
            ContextError::malformed(
                "no assistant message in the surviving context to carry the reasoning block",
            )
        })?;
    let host_idx = context[host_pos].0;

    let block_cost =
        counter.count(&Message::assistant(MessageContent::Parts(vec![block.clone()])));
    context[host_pos].1.prepend_part(block);
    *running += block_cost;
    debug!(host_index = host_idx, block_cost, "relocated reasoning block into surviving context");

    if *running > remaining {
        let entries: Vec<(usize, Message)> = std::mem::take(context).into();
        let mut second: VecDeque<(usize, Message)> = VecDeque::new();
        let mut second_running = 0usize;
        for (idx, message) in entries.into_iter().rev() {
            let mut cost = cost_of(idx, &message);
            if idx == host_idx {
                cost += block_cost;
            }
            if second_running + cost > remaining {
                break;
            }
            second.push_front((idx, message));
            second_running += cost;
        }
        *context = second;
        *running = second_running;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counter with scripted per-message costs keyed on text content.
    ///
    /// A parts message holding a lone thinking block (the synthetic message
    /// used to price a relocated block) costs 4; any other parts message
    /// costs 20.
    fn scripted_counter(message: &Message) -> usize {
        if let Some(text) = message.text() {
            match text {
                "sys" => 17,
                "m1" | "m3" => 9,
                "m2" | "m4" => 10,
                other => other.len(),
            }
        } else if let MessageContent::Parts(parts) = &message.content {
            if parts.len() == 1 && message.has_thinking() {
                4
            } else {
                20
            }
        } else {
            0
        }
    }

    fn eviction_fixture() -> Vec<Message> {
        vec![
            Message::system("sys"),
            Message::human("m1"),
            Message::assistant("m2"),
            Message::human("m3"),
            Message::assistant("m4"),
        ]
    }

    #[test]
    fn fast_path_returns_history_unchanged() {
        let mut pruner = MessagePruner::new(PruneConfig::new(100), scripted_counter);
        let history = eviction_fixture();
        let outcome = pruner.prune(PruneRequest::new(&history)).unwrap();

        assert_eq!(outcome.context, history);
        assert_eq!(outcome.token_counts.len(), history.len());
        assert_eq!(outcome.remaining_tokens, 100 - 55);
    }

    #[test]
    fn evicts_oldest_messages_first() {
        let mut pruner = MessagePruner::new(PruneConfig::new(40), scripted_counter);
        let history = eviction_fixture();
        let outcome = pruner.prune(PruneRequest::new(&history)).unwrap();

        let texts: Vec<_> = outcome.context.iter().filter_map(|m| m.text()).collect();
        assert_eq!(texts, vec!["sys", "m3", "m4"]);
        assert_eq!(outcome.remaining_tokens, 1);
    }

    #[test]
    fn system_message_survives_any_budget_pressure() {
        // Budget covers only the reply overhead plus the system message.
        let mut pruner = MessagePruner::new(PruneConfig::new(21), scripted_counter);
        let history = eviction_fixture();
        let outcome = pruner.prune(PruneRequest::new(&history)).unwrap();

        assert_eq!(outcome.context.len(), 1);
        assert_eq!(outcome.context[0].role, MessageRole::System);
    }

    #[test]
    fn usage_rescaling_pins_the_tally_total() {
        let history = vec![
            Message::human("aaaaaaaaaa"),
            Message::assistant("bbbbbbbbbb"),
            Message::human("cccccccccc"),
        ];
        let mut pruner = MessagePruner::new(PruneConfig::new(1000), scripted_counter);
        pruner.prune(PruneRequest::new(&history)).unwrap();

        let usage = UsageMetadata::new(40, 20);
        let outcome = pruner
            .prune(PruneRequest::new(&history).with_usage(&usage))
            .unwrap();
        assert_eq!(outcome.token_counts.total(), 60);
        assert_eq!(outcome.context.len(), 3);
    }

    #[test]
    fn turn_start_message_uses_reported_output_tokens() {
        let history = vec![Message::assistant("whatever length")];
        let usage = UsageMetadata { output_tokens: 12, ..Default::default() };
        let mut pruner = MessagePruner::new(PruneConfig::new(1000), scripted_counter);
        let outcome = pruner
            .prune(PruneRequest::new(&history).with_usage(&usage))
            .unwrap();
        assert_eq!(outcome.token_counts.get(0), Some(12));
    }

    #[test]
    fn start_role_is_ignored_on_the_fast_path() {
        let history = eviction_fixture();
        let mut pruner = MessagePruner::new(PruneConfig::new(100), scripted_counter);
        let outcome = pruner
            .prune(PruneRequest::new(&history).with_start_role(MessageRole::Human))
            .unwrap();
        assert_eq!(outcome.context, history);
    }

    fn start_role_fixture() -> Vec<Message> {
        vec![
            Message::system("sssss"),
            Message::human("hhhhh"),
            Message::assistant("a1a1a"),
            Message::tool("ttttt", "call_1"),
            Message::assistant("a2a2a"),
        ]
    }

    #[test]
    fn start_role_trims_dangling_tool_results() {
        // Budget admits the trailing [tool, assistant] pair only.
        let mut pruner = MessagePruner::new(PruneConfig::new(20), scripted_counter);
        let outcome = pruner
            .prune(PruneRequest::new(&start_role_fixture()).with_start_role(MessageRole::Assistant))
            .unwrap();

        let texts: Vec<_> = outcome.context.iter().filter_map(|m| m.text()).collect();
        assert_eq!(texts, vec!["sssss", "a2a2a"]);
        assert_eq!(outcome.remaining_tokens, 7);
    }

    #[test]
    fn start_role_with_no_match_keeps_the_context_whole() {
        let mut pruner = MessagePruner::new(PruneConfig::new(20), scripted_counter);
        let outcome = pruner
            .prune(PruneRequest::new(&start_role_fixture()).with_start_role(MessageRole::Human))
            .unwrap();

        let texts: Vec<_> = outcome.context.iter().filter_map(|m| m.text()).collect();
        assert_eq!(texts, vec!["sssss", "ttttt", "a2a2a"]);
    }

    fn thinking_fixture() -> Vec<Message> {
        vec![
            Message::system("sssss"),
            Message::human("hhhhh"),
            Message::assistant(MessageContent::Parts(vec![
                ContentPart::thinking("work through the steps"),
                ContentPart::text("step one"),
                ContentPart::tool_use("call_1", "search", serde_json::json!({})),
            ])),
            Message::tool("ttttt", "call_1"),
            Message::assistant("a2a2a"),
        ]
    }

    #[test]
    fn orphaned_thinking_block_is_relocated() {
        // costs: sys 5, human 5, thinking carrier 20, tool 5, final 5.
        // Budget 30 evicts the carrier but keeps the rest of its run.
        let config = PruneConfig::new(30).with_thinking(true);
        let mut pruner = MessagePruner::new(config, scripted_counter);
        let outcome = pruner.prune(PruneRequest::new(&thinking_fixture())).unwrap();

        assert_eq!(outcome.context.len(), 3);
        let host = outcome.context.last().unwrap();
        assert_eq!(host.role, MessageRole::Assistant);
        assert!(host.has_thinking());
        // Block cost (4) charged on top of the surviving run (10).
        assert_eq!(outcome.remaining_tokens, 22 - 14);
    }

    #[test]
    fn relocation_overdraw_triggers_a_second_walk() {
        // Budget 20 leaves 12 after the system message: the surviving run
        // costs 10, the relocated block pushes it to 14, and the second
        // walk drops the tool result.
        let config = PruneConfig::new(20).with_thinking(true);
        let mut pruner = MessagePruner::new(config, scripted_counter);
        let outcome = pruner.prune(PruneRequest::new(&thinking_fixture())).unwrap();

        let roles: Vec<_> = outcome.context.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::System, MessageRole::Assistant]);
        assert!(outcome.context[1].has_thinking());
    }

    #[test]
    fn relocation_without_an_assistant_host_is_malformed() {
        let history = vec![
            Message::human("hhhhh"),
            Message::assistant(MessageContent::Parts(vec![
                ContentPart::thinking("why"),
                ContentPart::text("step one"),
            ])),
            Message::tool("ttttt", "call_1"),
            Message::tool("uuuuu", "call_2"),
        ];
        let config = PruneConfig::new(15).with_thinking(true);
        let mut pruner = MessagePruner::new(config, scripted_counter);
        assert!(matches!(
            pruner.prune(PruneRequest::new(&history)),
            Err(ContextError::MalformedPayload(_))
        ));
    }

    #[test]
    fn cut_inside_a_blockless_run_is_malformed() {
        let history = vec![
            Message::assistant("aaaaaaaaaa"),
            Message::tool("tttttttttt", "call_1"),
            Message::assistant("bbbbbbbbbb"),
        ];
        let config = PruneConfig::new(25).with_thinking(true);
        let mut pruner = MessagePruner::new(config, scripted_counter);
        assert!(matches!(
            pruner.prune(PruneRequest::new(&history)),
            Err(ContextError::MalformedPayload(_))
        ));
    }

    #[test]
    fn interrupted_run_resets_thinking_tracking() {
        // The earlier thinking carrier is not part of the trailing run, so
        // pruning inside the run raises nothing.
        let history = vec![
            Message::system("sssss"),
            Message::assistant(MessageContent::Parts(vec![
                ContentPart::thinking("old reasoning"),
                ContentPart::text("done"),
            ])),
            Message::human("hhhhh"),
            Message::assistant("aaaaa"),
            Message::tool("ttttt", "call_1"),
        ];
        let config = PruneConfig::new(20).with_thinking(true);
        let mut pruner = MessagePruner::new(config, scripted_counter);
        let outcome = pruner.prune(PruneRequest::new(&history)).unwrap();

        let texts: Vec<_> = outcome.context.iter().filter_map(|m| m.text()).collect();
        assert_eq!(texts, vec!["sssss", "aaaaa", "ttttt"]);
    }

    #[test]
    fn shrinking_history_is_rejected() {
        let history = eviction_fixture();
        let mut pruner = MessagePruner::new(PruneConfig::new(100), scripted_counter);
        pruner.prune(PruneRequest::new(&history)).unwrap();

        assert!(matches!(
            pruner.prune(PruneRequest::new(&history[..2])),
            Err(ContextError::HistoryRegression { .. })
        ));
    }
}

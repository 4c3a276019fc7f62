//! Wire types for provider stream chunks.
//!
//! Chat providers stream completions as a sequence of JSON chunks, each
//! carrying incremental content under `choices[0].delta`. Thinking models
//! additionally stream a reasoning channel, spelled `reasoning_content` by
//! some providers and `reasoning` by others; [`StreamChunk::reasoning`]
//! merges the two spellings. The final chunk may carry usage metadata for
//! the whole call.

use convoy_context::UsageMetadata;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

/// One streamed chunk from a chat provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Completion choices; chat streams carry a single choice
    #[serde(default)]
    pub choices: Vec<ChoiceDelta>,

    /// Usage for the whole call, reported on the final chunk by some
    /// providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageMetadata>,
}

/// One choice inside a streamed chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceDelta {
    /// Incremental content for this choice
    #[serde(default)]
    pub delta: DeltaPayload,

    /// Why the stream ended, present on the final chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Incremental content carried by one chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaPayload {
    /// Visible output text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Reasoning text (DeepSeek-style spelling)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Reasoning text (OpenRouter-style spelling)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl StreamChunk {
    /// A chunk carrying only visible text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![ChoiceDelta {
                delta: DeltaPayload { content: Some(content.into()), ..Default::default() },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// A chunk carrying only reasoning text.
    pub fn reasoning_text(reasoning: impl Into<String>) -> Self {
        Self {
            choices: vec![ChoiceDelta {
                delta: DeltaPayload {
                    reasoning_content: Some(reasoning.into()),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Decode a chunk from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::MalformedChunk`] when the payload is not a
    /// valid chunk object.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| StreamError::MalformedChunk(e.to_string()))
    }

    /// Visible text of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }

    /// Reasoning text of the first choice, merging provider spellings.
    pub fn reasoning(&self) -> Option<&str> {
        let delta = &self.choices.first()?.delta;
        delta.reasoning_content.as_deref().or(delta.reasoning.as_deref())
    }
}

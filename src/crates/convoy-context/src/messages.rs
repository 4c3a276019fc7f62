//! Conversation message model shared by the trim and prune engines.
//!
//! Messages carry a role, content that is either plain text or an ordered
//! sequence of typed content parts, and optional identifying fields for tool
//! interactions. The engines in this crate only ever read messages from the
//! caller's history; the single exception is window reconstruction, which
//! clones a message to prepend a relocated reasoning block.
//!
//! # Content Model
//!
//! [`MessageContent`] mirrors the wire formats of modern chat APIs: a bare
//! JSON string for simple messages, or an array of tagged parts for
//! multimodal and structured content. [`ContentPart`] is a closed sum type -
//! adding a new part kind is a compile-time event for every consumer rather
//! than a silently ignored string tag.
//!
//! # Examples
//!
//! ```rust
//! use convoy_context::messages::{ContentPart, Message, MessageContent, MessageRole};
//!
//! let msg = Message::assistant(MessageContent::Parts(vec![
//!     ContentPart::thinking("The user wants a summary first."),
//!     ContentPart::text("Here is the summary:"),
//! ]));
//!
//! assert_eq!(msg.role, MessageRole::Assistant);
//! assert!(msg.thinking_part().is_some());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Role of a message sender.
///
/// Roles serialize to lowercase strings compatible with OpenAI/Anthropic
/// APIs: `System` is `"system"`, `Human` is `"human"`, `Assistant` is
/// `"assistant"`, `Tool` is `"tool"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message providing instructions, context, or constraints.
    System,

    /// Human/user message containing input or queries.
    Human,

    /// AI assistant message containing generated responses.
    Assistant,

    /// Tool execution result message.
    Tool,
}

impl MessageRole {
    /// Whether this role belongs to the model-driven side of a turn
    /// (assistant output or the tool results it triggered).
    pub fn is_agent_side(self) -> bool {
        matches!(self, MessageRole::Assistant | MessageRole::Tool)
    }
}

/// A tool invocation requested by an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call identifier
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// JSON arguments for the invocation
    pub args: Value,
}

/// Individual content part in a structured message.
///
/// Serializes to tagged JSON compatible with LLM APIs:
///
/// ```json
/// {"type": "text", "text": "Hello"}
/// {"type": "thinking", "thinking": "..."}
/// {"type": "tool_use", "id": "call_1", "name": "search", "input": {}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content.
    Text {
        /// The text content
        text: String,
    },

    /// Extended reasoning produced before the visible answer.
    ///
    /// Providers that separate reasoning from output require this part to
    /// stay attached to the assistant turn that produced it across window
    /// reconstruction.
    Thinking {
        /// The reasoning text
        thinking: String,
        /// Provider-issued continuity signature, when present
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// A tool invocation embedded in an assistant message.
    ToolUse {
        /// Provider-assigned call identifier
        id: String,
        /// Name of the tool
        name: String,
        /// JSON arguments
        input: Value,
    },

    /// The result of a tool invocation.
    ToolResult {
        /// Identifier of the originating call
        tool_use_id: String,
        /// Result payload as text
        content: String,
        /// Whether the tool reported a failure
        #[serde(default)]
        is_error: bool,
    },

    /// Image content via URL or embedded data.
    Image {
        /// Image URL (mutually exclusive with source)
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        /// Base64 image data with metadata (mutually exclusive with url)
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<Value>,
    },

    /// An error surfaced inside the conversation stream.
    Error {
        /// Human-readable error description
        message: String,
    },
}

impl ContentPart {
    /// Create a text content part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a reasoning content part
    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self::Thinking { thinking: thinking.into(), signature: None }
    }

    /// Create a tool invocation part
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolUse { id: id.into(), name: name.into(), input }
    }

    /// Create a tool result part
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an image content part from URL
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::Image { url: Some(url.into()), source: None }
    }

    /// Create an image content part from base64 data
    pub fn image_data(media_type: &str, data: &str) -> Self {
        Self::Image {
            url: None,
            source: Some(serde_json::json!({
                "type": "base64",
                "media_type": media_type,
                "data": data
            })),
        }
    }
}

/// Message content supporting both simple text and structured parts.
///
/// Uses `#[serde(untagged)]` so a bare JSON string and a parts array both
/// deserialize without an explicit discriminator, matching LLM API formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text-only content.
    Text(String),

    /// Structured content with multiple typed parts.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all textual content, ignoring non-text parts.
    pub fn flat_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

/// Base message type for conversational AI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Role of the message sender
    pub role: MessageRole,

    /// Message content
    pub content: MessageContent,

    /// Optional message name (for system messages, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls (for assistant messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Tool call ID (for tool messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Additional metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    /// Create a new message with the given role and content
    pub fn new(role: MessageRole, content: impl Into<MessageContent>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            role,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            metadata: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a human message
    pub fn human(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    /// Create a user message (alias for `human`)
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::human(content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create an AI assistant message (alias for `assistant`)
    pub fn ai(content: impl Into<MessageContent>) -> Self {
        Self::assistant(content)
    }

    /// Create a tool message
    pub fn tool(content: impl Into<MessageContent>, tool_call_id: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            role: MessageRole::Tool,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            metadata: None,
        }
    }

    /// Set the message ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the message name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set tool calls (for assistant messages)
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Get the text content if this is a simple text message
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(_) => None,
        }
    }

    /// Ensure this message has an ID (generate one if missing)
    pub fn ensure_id(&mut self) {
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4().to_string());
        }
    }

    /// First reasoning part carried by this message, if any.
    pub fn thinking_part(&self) -> Option<&ContentPart> {
        match &self.content {
            MessageContent::Text(_) => None,
            MessageContent::Parts(parts) => {
                parts.iter().find(|p| matches!(p, ContentPart::Thinking { .. }))
            }
        }
    }

    /// Whether this message carries a reasoning part.
    pub fn has_thinking(&self) -> bool {
        self.thinking_part().is_some()
    }

    /// Prepend a content part, converting plain text content to parts.
    ///
    /// Used during window reconstruction to relocate a reasoning block into
    /// a surviving assistant message.
    pub fn prepend_part(&mut self, part: ContentPart) {
        match &mut self.content {
            MessageContent::Text(s) => {
                let text = std::mem::take(s);
                self.content = MessageContent::Parts(vec![part, ContentPart::Text { text }]);
            }
            MessageContent::Parts(parts) => parts.insert(0, part),
        }
    }
}

//! Message and conversation domain types.
//!
//! A [`Message`] is an immutable record in a conversation log. Its content is
//! an ordered list of parts so that a single user turn can carry text plus an
//! image, and an assistant turn can carry text plus tool calls.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of a conversation.
///
/// Conversations are created implicitly on first reference. Callers that do
/// not name one share the [`ConversationId::DEFAULT`] conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// The sentinel used when a caller supplies no conversation id.
    pub const DEFAULT: &'static str = "default";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Use `id` when present and non-blank, the default conversation otherwise.
    pub fn or_default(id: Option<&str>) -> Self {
        match id.map(str::trim) {
            Some(id) if !id.is_empty() => Self::new(id),
            _ => Self::default(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Instructions prepended to every model call, never stored in a conversation
    System,
    /// Tool execution result
    Tool,
}

/// An image attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageContent {
    /// Inline base64 payload.
    Base64 { mime_type: String, data: String },
    /// A remote image the model backend fetches itself.
    Url { url: String },
}

impl ImageContent {
    /// Load an image from disk and encode it inline.
    pub async fn from_file_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mime_type = mime_type_for(path).ok_or_else(|| {
            Error::InvalidRequest(format!("unsupported image type: {}", path.display()))
        })?;
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            Error::InvalidRequest(format!("cannot read image {}: {e}", path.display()))
        })?;
        Ok(Self::Base64 {
            mime_type: mime_type.to_string(),
            data: BASE64.encode(bytes),
        })
    }

    /// Parse a `data:<mime>;base64,<payload>` URL or accept an http(s) URL as-is.
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(Self::Url {
                url: url.to_string(),
            });
        }

        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| Error::InvalidRequest("image url must be a data: or http(s) URL".into()))?;
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| Error::InvalidRequest("malformed data URL".into()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| Error::InvalidRequest("only base64 data URLs are supported".into()))?;
        if !mime_type.starts_with("image/") {
            return Err(Error::InvalidRequest(format!(
                "data URL is not an image: {mime_type}"
            )));
        }
        BASE64
            .decode(data)
            .map_err(|e| Error::InvalidRequest(format!("invalid base64 image payload: {e}")))?;

        Ok(Self::Base64 {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }

    /// Render as a URL suitable for OpenAI-style `image_url` parts.
    pub fn to_url(&self) -> String {
        match self {
            Self::Base64 { mime_type, data } => format!("data:{mime_type};base64,{data}"),
            Self::Url { url } => url.clone(),
        }
    }
}

fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// A tool call requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a raw JSON string, exactly as the model produced them
    pub arguments: String,
}

/// The outcome of one tool call, folded into a tool message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultContent {
    /// The tool call this result answers
    pub call_id: String,

    pub tool_name: String,

    pub output: String,

    /// Set when the tool failed; `output` then carries the error text
    #[serde(default)]
    pub is_error: bool,
}

/// One ordered part of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { image: ImageContent },
    ToolCall { call: MessageToolCall },
    ToolResult { result: ToolResultContent },
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Ordered content parts
    pub content: Vec<ContentPart>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (provider info, request info, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Create a message from raw parts.
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::Text { text: text.into() }])
    }

    /// Create a user message carrying text and an image.
    pub fn user_with_image(text: impl Into<String>, image: ImageContent) -> Self {
        Self::new(
            Role::User,
            vec![
                ContentPart::Text { text: text.into() },
                ContentPart::Image { image },
            ],
        )
    }

    /// Create a new assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::Text { text: text.into() }])
    }

    /// Create an assistant message that requests tool calls.
    ///
    /// Empty text is omitted so the message carries only the calls.
    pub fn assistant_with_tool_calls(text: impl Into<String>, calls: Vec<MessageToolCall>) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            content.push(ContentPart::Text { text });
        }
        content.extend(calls.into_iter().map(|call| ContentPart::ToolCall { call }));
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::Text { text: text.into() }])
    }

    /// Create a tool result message.
    pub fn tool_result(result: ToolResultContent) -> Self {
        Self::new(Role::Tool, vec![ContentPart::ToolResult { result }])
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool calls requested by this message, in order.
    pub fn tool_calls(&self) -> Vec<&MessageToolCall> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall { call } => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|part| matches!(part, ContentPart::ToolCall { .. }))
    }

    /// The tool result carried by this message, if it is a tool message.
    pub fn tool_result_content(&self) -> Option<&ToolResultContent> {
        self.content.iter().find_map(|part| match part {
            ContentPart::ToolResult { result } => Some(result),
            _ => None,
        })
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageContent> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::Image { image } => Some(image),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn conversation_id_defaults_to_sentinel() {
        assert_eq!(ConversationId::default().as_str(), "default");
        assert_eq!(ConversationId::or_default(None).as_str(), "default");
        assert_eq!(ConversationId::or_default(Some("  ")).as_str(), "default");
        assert_eq!(ConversationId::or_default(Some("abc")).as_str(), "abc");
    }

    #[test]
    fn assistant_tool_calls_keep_order() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![
                MessageToolCall {
                    id: "a".into(),
                    name: "retrieval_tool".into(),
                    arguments: "{}".into(),
                },
                MessageToolCall {
                    id: "b".into(),
                    name: "send_reimbursement".into(),
                    arguments: "{}".into(),
                },
            ],
        );
        let ids: Vec<_> = msg.tool_calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        // Empty text is dropped
        assert_eq!(msg.content.len(), 2);
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::tool_result(ToolResultContent {
            call_id: "call_1".into(),
            tool_name: "retrieval_tool".into(),
            output: "File Content for a.md: hi\n\n".into(),
            is_error: false,
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Tool);
        assert_eq!(back.tool_result_content().unwrap().call_id, "call_1");
    }

    #[test]
    fn data_url_is_parsed() {
        let image = ImageContent::from_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(
            image,
            ImageContent::Base64 {
                mime_type: "image/png".into(),
                data: "aGVsbG8=".into()
            }
        );
        assert_eq!(image.to_url(), "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn bad_image_urls_are_rejected() {
        assert!(ImageContent::from_url("ftp://x/y.png").is_err());
        assert!(ImageContent::from_url("data:text/plain;base64,aGk=").is_err());
        assert!(ImageContent::from_url("data:image/png;base64,***").is_err());
    }

    #[tokio::test]
    async fn image_from_file_is_base64_encoded() {
        let mut file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        file.write_all(b"hello").unwrap();

        let image = ImageContent::from_file_path(file.path()).await.unwrap();
        match image {
            ImageContent::Base64 { mime_type, data } => {
                assert_eq!(mime_type, "image/jpeg");
                assert_eq!(data, "aGVsbG8=");
            }
            other => panic!("expected inline image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_with_unknown_extension_is_rejected() {
        let file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        let err = ImageContent::from_file_path(file.path()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}

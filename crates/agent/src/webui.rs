//! Tool call lifecycle events in the shape Open WebUI understands.
//!
//! A tool call produces two lifecycle events. The start event carries a
//! status line and an `info` notification. The end event carries a `done`
//! status, a `success` or `error` notification and a collapsible details
//! block with the call's arguments and raw result.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    ToolCallStart,
    ToolCallEnd,
}

/// One out-of-band event about a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub phase: LifecyclePhase,
    pub call_id: String,
    pub tool_name: String,

    /// Status line shown while the answer streams
    pub description: String,

    pub done: bool,

    pub notification_type: NotificationType,

    /// Toast text
    pub notification: String,

    /// Collapsible report, only on end events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_content: Option<String>,
}

impl LifecycleEvent {
    pub fn tool_call_start(call_id: &str, tool_name: &str) -> Self {
        let text = format!("Tool call started: {tool_name}");
        Self {
            phase: LifecyclePhase::ToolCallStart,
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            description: text.clone(),
            done: false,
            notification_type: NotificationType::Info,
            notification: text,
            detail_content: None,
        }
    }

    pub fn tool_call_end(
        call_id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
        result: &str,
        success: bool,
    ) -> Self {
        let arguments = render_arguments(arguments);
        Self {
            phase: LifecyclePhase::ToolCallEnd,
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            description: format!("Tool call ended: {tool_name} with arguments: {arguments}"),
            done: true,
            notification_type: if success {
                NotificationType::Success
            } else {
                NotificationType::Error
            },
            notification: format!("Tool call ended: {tool_name}"),
            detail_content: Some(details_block(
                &format!("Tool call result for {tool_name}"),
                &format!("```\nArguments:\n{arguments}\n\nResponse:\n{result}\n```"),
            )),
        }
    }

    /// The Open WebUI events for this lifecycle point, in emission order.
    pub fn to_webui_events(&self) -> Vec<WebUiEvent> {
        let mut events = vec![
            WebUiEvent::Status {
                description: self.description.clone(),
                done: self.done,
                hidden: false,
            },
            WebUiEvent::Notification {
                notification_type: self.notification_type,
                content: self.notification.clone(),
            },
        ];
        if let Some(details) = &self.detail_content {
            events.push(WebUiEvent::Message {
                content: details.clone(),
            });
        }
        events
    }
}

/// An event as Open WebUI receives it: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum WebUiEvent {
    Status {
        description: String,
        done: bool,
        hidden: bool,
    },
    Notification {
        #[serde(rename = "type")]
        notification_type: NotificationType,
        content: String,
    },
    /// Content appended to the assistant message
    Message { content: String },
}

/// Raw strings (unparseable arguments) are shown as-is, JSON compactly.
fn render_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn details_block(summary: &str, body: &str) -> String {
    format!("<details type=\"tool_calls\" done=\"true\">\n<summary>{summary}</summary>\n\n{body}\n</details>\n")
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record of the agent CLI's `stream-json` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },

    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "user")]
    User {
        #[serde(default)]
        message: Option<Value>,
    },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(other)]
    Other,
}

impl StreamEvent {
    /// Parse one output line. Blank and non-JSON lines yield `None`.
    pub fn parse_line(line: &str) -> Option<StreamEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

/// Text of the assistant's message, if it carried any.
fn assistant_text(message: &AssistantMessage) -> Option<String> {
    let text = message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    (!text.trim().is_empty()).then_some(text)
}

/// Overall verdict reported by the stream's `result` event, if one arrived.
pub fn reported_success(events: &[StreamEvent]) -> Option<bool> {
    events.iter().rev().find_map(|event| match event {
        StreamEvent::Result {
            subtype, is_error, ..
        } => Some(!is_error && (subtype.is_empty() || subtype == "success")),
        _ => None,
    })
}

/// The agent's final answer: the `result` text, else the last assistant text.
pub fn final_text(events: &[StreamEvent]) -> String {
    let from_result = events.iter().rev().find_map(|event| match event {
        StreamEvent::Result {
            result: Some(text), ..
        } if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    });

    from_result
        .or_else(|| {
            events.iter().rev().find_map(|event| match event {
                StreamEvent::Assistant { message } => assistant_text(message),
                _ => None,
            })
        })
        .unwrap_or_default()
}

/// Short description of an event for debug logging.
pub fn describe(event: &StreamEvent) -> String {
    match event {
        StreamEvent::System { subtype } => format!("system:{subtype}"),
        StreamEvent::Assistant { message } => {
            let tools: Vec<&str> = message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
                    _ => None,
                })
                .collect();
            if tools.is_empty() {
                "assistant:text".to_string()
            } else {
                format!("assistant:tool_use({})", tools.join(","))
            }
        }
        StreamEvent::User { .. } => "user:tool_result".to_string(),
        StreamEvent::Result { subtype, .. } => format!("result:{subtype}"),
        StreamEvent::Unknown => "unknown".to_string(),
    }
}

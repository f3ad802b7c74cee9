//! Wire types for the Messages endpoint plus the values an analysis yields.
//!
//! Requests carry a single base64 image followed by the instruction text;
//! responses are reduced to their text blocks and then interpreted according
//! to the workflow's [`OutputMode`].

use serde::{Deserialize, Serialize};

/// Encoded image handed to the analyzer. The batch processor never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// MIME type of `data`, e.g. `image/jpeg`.
    pub media_type: String,
    /// Base64 encoded bytes.
    pub data: String,
}

impl Payload {
    pub fn jpeg(data: String) -> Self {
        Self {
            media_type: "image/jpeg".to_string(),
            data,
        }
    }
}

/// How the response text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// Trimmed free text.
    Text,
    /// A JSON object, possibly wrapped in markdown code fences.
    Structured,
}

/// Output of one successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AnalysisResult {
    Structured(serde_json::Value),
    Text(String),
}

impl AnalysisResult {
    /// Single-line rendering for terminal output.
    pub fn preview(&self, max_chars: usize) -> String {
        let full = match self {
            AnalysisResult::Text(text) => text.replace('\n', " "),
            AnalysisResult::Structured(value) => value.to_string(),
        };
        if full.chars().count() <= max_chars {
            full
        } else {
            let cut: String = full.chars().take(max_chars).collect();
            format!("{cut}…")
        }
    }
}

/// Request body for `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: Vec<ContentPart>,
}

/// One part of a user message. Serialized with an internal `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

impl MessagesRequest {
    /// Builds the single-turn vision request used by every workflow.
    pub fn vision(model: &str, max_tokens: u32, payload: &Payload, instruction: &str) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            messages: vec![Message {
                role: "user".into(),
                content: vec![
                    ContentPart::Image {
                        source: ImageSource {
                            source_type: "base64".into(),
                            media_type: payload.media_type.clone(),
                            data: payload.data.clone(),
                        },
                    },
                    ContentPart::Text {
                        text: instruction.to_string(),
                    },
                ],
            }],
        }
    }
}

/// Response returned by `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl MessagesResponse {
    /// Concatenated text of all `text` blocks, trimmed.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.content_type == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

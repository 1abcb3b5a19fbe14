use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PitchlensError, Result};

/// Identifies one logical run of a workflow graph.
///
/// Callers keep run identifiers unique per logical conversation; a checkpoint
/// is keyed by this value.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    /// Image given as a URL or a `data:` URI.
    #[serde(rename = "image")]
    Image { url: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A message sent to a structured extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user_image(url: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Image { url: url.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Assistant turn that requested the given tool calls.
    pub fn tool_calls(calls: &[ToolCall]) -> Self {
        Self {
            role: Role::Assistant,
            content: calls
                .iter()
                .map(|c| ContentBlock::ToolUse {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    input: c.input.clone(),
                })
                .collect(),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: result.content,
                is_error: result.is_error,
            }],
        }
    }

    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// JSON schema the extractor must conform its answer to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// One request to a structured extractor.
#[derive(Debug, Clone, Default)]
pub struct ExtractionRequest {
    pub instructions: String,
    pub messages: Vec<ChatMessage>,
    pub schema: Option<OutputSchema>,
    pub tools: Vec<ToolDefinition>,
}

impl ExtractionRequest {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Schema name, used to key mocks and logs.
    pub fn schema_name(&self) -> Option<&str> {
        self.schema.as_ref().map(|s| s.name.as_str())
    }
}

/// What an extractor produced: a record, or a request to run tools first.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Structured(serde_json::Value),
    ToolCalls(Vec<ToolCall>),
}

impl Extraction {
    /// Decode the structured record into `T`.
    pub fn into_structured<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Extraction::Structured(value) => serde_json::from_value(value)
                .map_err(|e| PitchlensError::Extraction(e.to_string())),
            Extraction::ToolCalls(calls) => Err(PitchlensError::Extraction(format!(
                "expected a structured record, got {} tool call(s)",
                calls.len()
            ))),
        }
    }
}

/// Tool call requested by an extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Result from executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub run_id: RunId,
}

/// One web search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    #[serde(rename = "result_text")]
    pub content: String,
    #[serde(rename = "source_link")]
    pub url: String,
}

/// A document stored in the content index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocument {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// Content index search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: String,
    pub title: String,
    pub body: String,
    pub rank: f64,
    pub indexed_at: DateTime<Utc>,
}

/// Engine progress broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    RunStarted {
        graph: String,
        run_id: RunId,
        resumed: bool,
    },
    StageStarted {
        graph: String,
        run_id: RunId,
        stage: String,
    },
    StageCompleted {
        graph: String,
        run_id: RunId,
        stage: String,
        elapsed_ms: u64,
    },
    RunHalted {
        graph: String,
        run_id: RunId,
        error: String,
    },
    RunSuspended {
        graph: String,
        run_id: RunId,
        stage: String,
        prompt: String,
    },
    RunCompleted {
        graph: String,
        run_id: RunId,
        steps: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_extraction_decodes() {
        #[derive(Deserialize)]
        struct Named {
            name: String,
        }
        let named: Named = Extraction::Structured(json!({"name": "Acme"}))
            .into_structured()
            .unwrap();
        assert_eq!(named.name, "Acme");
    }

    #[test]
    fn tool_calls_are_not_a_record() {
        let err = Extraction::ToolCalls(vec![ToolCall {
            id: "c1".into(),
            name: "web_search".into(),
            input: json!({"query": "x"}),
        }])
        .into_structured::<serde_json::Value>()
        .unwrap_err();
        assert!(matches!(err, PitchlensError::Extraction(_)));
    }

    #[test]
    fn search_hit_wire_names() {
        let hit = SearchHit {
            content: "TAM is $4B".into(),
            url: "https://example.com".into(),
        };
        let v = serde_json::to_value(&hit).unwrap();
        assert_eq!(v["result_text"], "TAM is $4B");
        assert_eq!(v["source_link"], "https://example.com");
    }

    #[test]
    fn message_text_skips_non_text_blocks() {
        let msg = ChatMessage {
            role: Role::User,
            content: vec![
                ContentBlock::Text { text: "a".into() },
                ContentBlock::Image {
                    url: "data:image/png;base64,AAAA".into(),
                },
                ContentBlock::Text { text: "b".into() },
            ],
        };
        assert_eq!(msg.text(), "a\nb");
    }
}

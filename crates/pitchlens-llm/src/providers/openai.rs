use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use pitchlens_core::config::ModelConfig;
use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::StructuredExtractor;
use pitchlens_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible extractor. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
///
/// Structured output is requested through `response_format: json_schema`;
/// images are sent as `image_url` content parts.
pub struct OpenAiExtractor {
    http: Client,
    config: ModelConfig,
}

impl OpenAiExtractor {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
    function: OaiFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Deserialize, Debug)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(default)]
    refusal: Option<String>,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

fn user_content(blocks: &[ContentBlock]) -> serde_json::Value {
    let has_image = blocks
        .iter()
        .any(|b| matches!(b, ContentBlock::Image { .. }));
    if !has_image {
        let text = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        return serde_json::Value::String(text);
    }

    let parts: Vec<serde_json::Value> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
            ContentBlock::Image { url } => {
                Some(json!({"type": "image_url", "image_url": {"url": url}}))
            }
            _ => None,
        })
        .collect();
    serde_json::Value::Array(parts)
}

pub(crate) fn convert_messages(instructions: &str, messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    let mut oai_msgs = Vec::new();

    if !instructions.is_empty() {
        oai_msgs.push(OaiMessage {
            role: "system".to_string(),
            content: Some(serde_json::Value::String(instructions.to_string())),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for msg in messages {
        match msg.role {
            Role::System => {
                oai_msgs.push(OaiMessage {
                    role: "system".to_string(),
                    content: Some(serde_json::Value::String(msg.text())),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            Role::User => {
                oai_msgs.push(OaiMessage {
                    role: "user".to_string(),
                    content: Some(user_content(&msg.content)),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            Role::Assistant => {
                let calls: Vec<OaiToolCall> = msg
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolUse { id, name, input } => Some(OaiToolCall {
                            id: Some(id.clone()),
                            r#type: Some("function".to_string()),
                            function: OaiFunction {
                                name: name.clone(),
                                arguments: input.to_string(),
                            },
                        }),
                        _ => None,
                    })
                    .collect();
                let text = msg.text();
                oai_msgs.push(OaiMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() && !calls.is_empty() {
                        None
                    } else {
                        Some(serde_json::Value::String(text))
                    },
                    tool_calls: if calls.is_empty() { None } else { Some(calls) },
                    tool_call_id: None,
                });
            }
            Role::Tool => {
                for block in msg.content {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        oai_msgs.push(OaiMessage {
                            role: "tool".to_string(),
                            content: Some(serde_json::Value::String(content)),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id),
                        });
                    }
                }
            }
        }
    }

    oai_msgs
}

fn response_format(schema: &OutputSchema) -> serde_json::Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": schema.name,
            "schema": schema.schema,
        }
    })
}

/// Turn a completion body into an extraction result.
pub(crate) fn parse_response(body: &str, expects_record: bool) -> Result<Extraction> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| PitchlensError::LlmParse(e.to_string()))?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| PitchlensError::LlmParse("response has no choices".into()))?;

    if let Some(calls) = message.tool_calls.filter(|c| !c.is_empty()) {
        let mut out = Vec::with_capacity(calls.len());
        for (i, call) in calls.into_iter().enumerate() {
            let input = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    PitchlensError::LlmParse(format!(
                        "tool call {} has malformed arguments: {}",
                        call.function.name, e
                    ))
                })?
            };
            out.push(ToolCall {
                id: call.id.unwrap_or_else(|| format!("call_{}", i)),
                name: call.function.name,
                input,
            });
        }
        return Ok(Extraction::ToolCalls(out));
    }

    if let Some(refusal) = message.refusal {
        return Err(PitchlensError::Extraction(format!("model refused: {}", refusal)));
    }

    let content = message.content.unwrap_or_default();
    if !expects_record {
        return Ok(Extraction::Structured(serde_json::Value::String(content)));
    }
    serde_json::from_str(&content)
        .map(Extraction::Structured)
        .map_err(|e| PitchlensError::LlmParse(format!("structured output is not JSON: {}", e)))
}

impl StructuredExtractor for OpenAiExtractor {
    fn extract(&self, request: ExtractionRequest) -> BoxFuture<'_, Result<Extraction>> {
        Box::pin(async move {
            let config = &self.config;
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            // o-series doesn't support temperature
            let is_o_series = config.model_id.starts_with("o1")
                || config.model_id.starts_with("o3")
                || config.model_id.starts_with("o4");

            let expects_record = request.schema.is_some();
            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(&request.instructions, request.messages),
                max_tokens: config.max_tokens,
                temperature: if is_o_series {
                    None
                } else if config.temperature > 0.0 {
                    Some(config.temperature)
                } else {
                    None
                },
                tools: convert_tools(&request.tools),
                response_format: request.schema.as_ref().map(response_format),
            };

            debug!(
                model = %config.model_id,
                schema = request.schema.as_ref().map(|s| s.name.as_str()).unwrap_or("-"),
                tools = request.tools.len(),
                "Sending extraction request"
            );

            let mut req = self.http.post(base_url).json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
                .send()
                .await
                .map_err(|e| PitchlensError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(PitchlensError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let text = response
                .text()
                .await
                .map_err(|e| PitchlensError::LlmRequest(e.to_string()))?;
            parse_response(&text, expects_record)
        })
    }
}

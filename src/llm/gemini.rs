//! Gemini provider
//!
//! Uses a long-lived reqwest::Client for connection pooling and speaks the
//! `generateContent` function-calling dialect.

use super::{ChatMessage, ChatRole, LlmProvider, LlmResponse, ToolSpec};
use crate::error::OrchestrationError;
use crate::models::ToolCall;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const API_KEY_HEADER: &str = "x-goog-api-key";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(OrchestrationError::Config(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }

    /// The key travels in a header so it never shows up in URLs or errors
    fn http_request(&self, body: &GeminiRequest) -> reqwest::Result<reqwest::Request> {
        self.client
            .post(self.endpoint())
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .build()
    }
}

fn transport_error(e: reqwest::Error) -> OrchestrationError {
    let e = e.without_url();
    error!("Gemini API request failed: {}", e);
    if e.is_timeout() || e.is_connect() {
        OrchestrationError::ProviderUnavailable(format!("Gemini API: {}", e))
    } else {
        OrchestrationError::Provider(format!("Gemini API: {}", e))
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse> {
        let request = build_request(messages, tools);

        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.map(|t| t.len()).unwrap_or(0),
            "Calling Gemini API"
        );

        let http_request = self.http_request(&request).map_err(transport_error)?;
        let response = self
            .client
            .execute(http_request)
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Gemini API error response: {}", error_text);
            return Err(classify_status(status, error_text));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::Provider(format!("Gemini parse error: {}", e))
        })?;

        let parsed = parse_response(gemini_response)?;

        info!(
            model = %self.model,
            tool_calls = parsed.tool_calls.len(),
            has_text = parsed.text_content().is_some(),
            "Gemini response received"
        );

        Ok(parsed)
    }
}

fn classify_status(status: StatusCode, body: String) -> OrchestrationError {
    let message = format!("Gemini API {}: {}", status, body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        OrchestrationError::ProviderUnavailable(message)
    } else {
        OrchestrationError::Provider(message)
    }
}

//
// ================= Request mapping =================
//

fn build_request(messages: &[ChatMessage], tools: Option<&[ToolSpec]>) -> GeminiRequest {
    let system_text: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();

    let system_instruction = (!system_text.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part::text(system_text.join("\n\n"))],
    });

    let contents = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(to_content)
        .collect();

    let tools = tools.filter(|t| !t.is_empty()).map(|specs| {
        vec![ToolDeclarations {
            function_declarations: specs
                .iter()
                .map(|spec| FunctionDeclaration {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: strip_defaults(spec.parameters.clone()),
                })
                .collect(),
        }]
    });

    GeminiRequest {
        contents,
        system_instruction,
        tools,
        generation_config: GenerationConfig {
            temperature: 0.2,
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 2048,
        },
    }
}

fn to_content(message: &ChatMessage) -> Content {
    match message.role {
        ChatRole::Assistant if !message.tool_calls.is_empty() => Content {
            role: Some("model".to_string()),
            parts: message
                .tool_calls
                .iter()
                .map(|call| Part {
                    function_call: Some(FunctionCall {
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                    }),
                    ..Part::default()
                })
                .collect(),
        },
        ChatRole::Assistant => Content {
            role: Some("model".to_string()),
            parts: vec![Part::text(message.content.clone())],
        },
        ChatRole::Tool => {
            let response = serde_json::from_str::<Value>(&message.content)
                .unwrap_or_else(|_| json!({ "content": message.content }));
            Content {
                role: Some("function".to_string()),
                parts: vec![Part {
                    function_response: Some(FunctionResponse {
                        name: message.tool_name.clone().unwrap_or_default(),
                        response: json!({ "result": response }),
                    }),
                    ..Part::default()
                }],
            }
        }
        ChatRole::User | ChatRole::System => Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(message.content.clone())],
        },
    }
}

/// Gemini's OpenAPI subset rejects `default`
fn strip_defaults(mut schema: Value) -> Value {
    if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        for prop in properties.values_mut() {
            if let Some(obj) = prop.as_object_mut() {
                obj.remove("default");
            }
        }
    }
    schema
}

fn parse_response(response: GeminiResponse) -> Result<LlmResponse> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| OrchestrationError::Provider("No response from Gemini API".to_string()))?;

    let mut text = Vec::new();
    let mut tool_calls = Vec::new();

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(t) = part.text {
            text.push(t);
        }
        if let Some(call) = part.function_call {
            let args = if call.args.is_null() { json!({}) } else { call.args };
            tool_calls.push(ToolCall::new(call.name, args));
        }
    }

    Ok(LlmResponse {
        content: (!text.is_empty()).then(|| text.join("")),
        tool_calls,
    })
}

//
// ================= Wire types =================
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_config_error() {
        assert!(matches!(
            GeminiProvider::new("", DEFAULT_MODEL),
            Err(OrchestrationError::Config(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let tools = vec![ToolSpec {
            name: "get_alerts".to_string(),
            description: "Active alerts".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "unread_only": { "type": "boolean", "default": true } },
                "required": []
            }),
        }];
        let messages = vec![
            ChatMessage::system("You analyze infrastructure."),
            ChatMessage::user("Any alerts?"),
            ChatMessage::assistant_calls(vec![ToolCall::new("get_alerts", json!({}))]),
            ChatMessage::tool_result("get_alerts", r#"{"count": 2}"#),
        ];

        let request = build_request(&messages, Some(&tools));
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            json!("You analyze infrastructure.")
        );
        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][1]["role"], json!("model"));
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["name"], json!("get_alerts"));
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["response"]["result"]["count"],
            json!(2)
        );
        let declared = &body["tools"][0]["functionDeclarations"][0];
        assert_eq!(declared["name"], json!("get_alerts"));
        assert!(declared["parameters"]["properties"]["unread_only"].get("default").is_none());
        assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(2048));
    }

    #[test]
    fn test_parse_function_calls_and_text() {
        let raw = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Checking costs." },
                        { "functionCall": { "name": "get_cost_summary", "args": { "days": 7 } } }
                    ]
                },
                "finishReason": "STOP"
            }]
        });
        let response: GeminiResponse = serde_json::from_value(raw).unwrap();
        let parsed = parse_response(response).unwrap();

        assert_eq!(parsed.text_content(), Some("Checking costs."));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "get_cost_summary");
        assert_eq!(parsed.tool_calls[0].arguments, json!({ "days": 7 }));
    }

    #[test]
    fn test_empty_candidates_is_error() {
        let response: GeminiResponse = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(matches!(parse_response(response), Err(OrchestrationError::Provider(_))));
    }

    #[test]
    fn test_api_key_sent_as_header_not_query() {
        let provider = GeminiProvider::new("secret-key-123", DEFAULT_MODEL)
            .unwrap()
            .with_base_url("http://127.0.0.1:9/v1beta/models");
        let request = provider.http_request(&build_request(&[], None)).unwrap();

        assert!(!request.url().as_str().contains("secret-key-123"));
        assert_eq!(request.url().query(), None);
        assert_eq!(request.headers()[API_KEY_HEADER], "secret-key-123");
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_key() {
        let provider = GeminiProvider::new("secret-key-123", DEFAULT_MODEL)
            .unwrap()
            .with_base_url("http://127.0.0.1:9/v1beta/models");

        let err = provider
            .complete(&[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();

        assert!(err.is_fatal(), "{}", err);
        assert!(!err.to_string().contains("secret-key-123"));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            OrchestrationError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, String::new()),
            OrchestrationError::Provider(_)
        ));
    }
}

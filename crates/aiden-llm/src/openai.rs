use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use aiden_core::config::ModelConfig;
use aiden_core::error::{AidenError, Result};
use aiden_core::traits::{ChatModel, ChatRequest, ChatResponse, OutputSchema};
use aiden_core::types::TokenUsage;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible chat completions client. Works with OpenAI, Ollama,
/// vLLM, Groq, OpenRouter and anything else speaking the same protocol.
pub struct OpenAiModel {
    http: Client,
    config: ModelConfig,
}

impl OpenAiModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

// Request types
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    r#type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    schema: &'a serde_json::Value,
    strict: bool,
}

// Response types
#[derive(Deserialize, Debug)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn build_body<'a>(config: &'a ModelConfig, request: &'a ChatRequest) -> CompletionRequest<'a> {
    CompletionRequest {
        model: &config.model_id,
        messages: vec![
            OaiMessage {
                role: "system",
                content: &request.system,
            },
            OaiMessage {
                role: "user",
                content: &request.user,
            },
        ],
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        response_format: request.response_schema.as_ref().map(|s: &OutputSchema| ResponseFormat {
            r#type: "json_schema",
            json_schema: JsonSchemaFormat {
                name: &s.name,
                schema: &s.schema,
                strict: false,
            },
        }),
    }
}

/// Dollar cost of a call under the model's per-1k pricing.
pub fn cost_for(config: &ModelConfig, usage: &TokenUsage) -> f64 {
    usage.input_tokens as f64 / 1000.0 * config.cost_per_1k_input
        + usage.output_tokens as f64 / 1000.0 * config.cost_per_1k_output
}

/// Strip a surrounding Markdown code fence, which some providers add
/// around JSON output.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_completion(
    config: &ModelConfig,
    response: CompletionResponse,
    structured: bool,
) -> Result<ChatResponse> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AidenError::LlmParse("response has no message content".into()))?;
    let usage = response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();
    let structured = if structured {
        let value = serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| AidenError::LlmParse(format!("structured output is not JSON: {}", e)))?;
        Some(value)
    } else {
        None
    };
    Ok(ChatResponse {
        cost_usd: cost_for(config, &usage),
        text,
        structured,
        usage,
    })
}

impl ChatModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.config.model_id
    }

    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>> {
        Box::pin(async move {
            let url = self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            let body = build_body(&self.config, &request);

            let mut req = self.http.post(url).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
                .send()
                .await
                .map_err(|e| AidenError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(AidenError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let parsed: CompletionResponse = response
                .json()
                .await
                .map_err(|e| AidenError::LlmParse(e.to_string()))?;
            let out = parse_completion(&self.config, parsed, request.response_schema.is_some())?;
            debug!(
                model = %self.config.model_id,
                input_tokens = out.usage.input_tokens,
                output_tokens = out.usage.output_tokens,
                "Chat completion finished"
            );
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ModelConfig {
        ModelConfig {
            provider: "openai".into(),
            model_id: "gpt-4.1".into(),
            api_key: None,
            base_url: None,
            max_tokens: 32768,
            temperature: 0.1,
            cost_per_1k_input: 0.002,
            cost_per_1k_output: 0.008,
            retry: None,
        }
    }

    #[test]
    fn body_carries_json_schema_when_requested() {
        let cfg = config();
        let request = ChatRequest::new("sys", "user").with_schema("requirements", json!({"type": "object"}));
        let body = serde_json::to_value(build_body(&cfg, &request)).unwrap();
        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "requirements");

        let plain = ChatRequest::new("sys", "user");
        let body = serde_json::to_value(build_body(&cfg, &plain)).unwrap();
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn parses_structured_output_and_cost() {
        let raw: CompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "```json\n{\"requirements\": []}\n```"}}],
            "usage": {"prompt_tokens": 1000, "completion_tokens": 500}
        }))
        .unwrap();
        let out = parse_completion(&config(), raw, true).unwrap();
        assert_eq!(out.structured.unwrap()["requirements"], json!([]));
        assert_eq!(out.usage.total(), 1500);
        assert!((out.cost_usd - 0.006).abs() < 1e-9);
    }

    #[test]
    fn invalid_structured_output_is_parse_error() {
        let raw: CompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "not json"}}]
        }))
        .unwrap();
        let err = parse_completion(&config(), raw, true).unwrap_err();
        assert!(matches!(err, AidenError::LlmParse(_)));
    }

    #[test]
    fn empty_choices_is_parse_error() {
        let raw: CompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(parse_completion(&config(), raw, false).is_err());
    }
}

//! OpenAI-compatible LLM classifier for defacement adjudication.
//!
//! Works with any OpenAI-compatible chat completions API. The model is
//! forced into structured output via a JSON schema, and the reply is
//! parsed into a verdict/confidence/reasoning triple.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use vigil_core::error::AppError;
use vigil_core::models::Verdict;
use vigil_core::traits::{LlmClassifier, LlmRequest, LlmVerdict};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a cybersecurity analyst specializing in website defacement \
detection. You are shown content changes on a monitored website and must decide whether they \
indicate a defacement (unauthorized modification, attacker messages, vandalism, injected scam or \
mining content) or a legitimate change (news, maintenance notices, seasonal or marketing updates, \
product changes). Respond ONLY with JSON matching the requested schema.";

/// OpenAI-compatible chat client implementing the LLM port.
#[derive(Clone)]
pub struct OpenAiLlmClassifier {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiLlmClassifier {
    pub fn new(api_key: &str, model: &str, max_tokens: u32) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, max_tokens, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: &str,
        model: &str,
        max_tokens: u32,
        base_url: &str,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| AppError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }
}

// ---- API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaWrapper,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Deserialize)]
struct ClassificationReply {
    classification: String,
    confidence: f64,
    reasoning: String,
}

fn verdict_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "classification": {
                "type": "string",
                "enum": ["benign", "suspicious", "defacement", "unclear"]
            },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "reasoning": { "type": "string" }
        },
        "required": ["classification", "confidence", "reasoning"],
        "additionalProperties": false
    })
}

fn build_user_prompt(request: &LlmRequest) -> String {
    let changed = if request.changed_excerpts.is_empty() {
        "No content changes captured".to_string()
    } else {
        request.changed_excerpts.join("\n\n")
    };
    let static_context = if request.static_context.is_empty() {
        "None".to_string()
    } else {
        request.static_context.join("\n\n")
    };
    let previous = request
        .previous_verdict
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string());

    format!(
        "WEBSITE URL: {}\nWEBSITE NAME: {}\n\nCHANGED CONTENT:\n{}\n\n\
         UNCHANGED CONTEXT (for reference):\n{}\n\nPREVIOUS CLASSIFICATION: {}\n\n\
         Classify this change.",
        request.site_url, request.site_name, changed, static_context, previous
    )
}

/// Parse the model's structured reply into a port-level verdict.
fn parse_reply(content: &str) -> Result<LlmVerdict, AppError> {
    let reply: ClassificationReply = serde_json::from_str(content).map_err(|e| {
        AppError::ClassifierError(format!("LLM returned invalid JSON: {e}. Raw: {content}"))
    })?;

    let verdict = match reply.classification.as_str() {
        "benign" => Verdict::Benign,
        "suspicious" => Verdict::Suspicious,
        "defacement" => Verdict::Defacement,
        "unclear" => Verdict::Unclear,
        other => {
            return Err(AppError::ClassifierError(format!(
                "LLM returned unknown classification '{other}'"
            )));
        }
    };

    Ok(LlmVerdict {
        verdict,
        confidence: reply.confidence.clamp(0.0, 1.0),
        reasoning: reply.reasoning,
    })
}

impl LlmClassifier for OpenAiLlmClassifier {
    async fn classify(&self, request: &LlmRequest) -> Result<LlmVerdict, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: build_user_prompt(request),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaWrapper {
                    name: "defacement_classification".to_string(),
                    strict: true,
                    schema: verdict_schema(),
                },
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(120)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("connection failed: {e}"))
                } else {
                    AppError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }

            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

            return Err(AppError::LlmError {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::ClassifierError(format!("failed to parse LLM response: {e}")))?;

        let content = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| AppError::LlmError {
                message: "empty response from LLM".into(),
                status_code: 200,
                retryable: false,
            })?;

        parse_reply(content)
    }
}

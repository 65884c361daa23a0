use async_stream::try_stream;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::llm::{
    boxed, check_status,
    models::{ChatOptions, ChatResponse, Message, Usage},
    stream, FragmentStream, LlmError, LlmProvider,
};

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

/// What a single streamed Anthropic event means for the reply.
#[derive(Debug, PartialEq)]
pub(crate) enum StreamStep {
    Text(String),
    Skip,
    Stop,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }

    fn request_body(messages: &[Message], options: &ChatOptions, streaming: bool) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": messages,
            "stream": streaming,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        // Anthropic takes the system prompt as a separate field
        if let Some(system) = options.system_prompt.as_deref().map(str::trim) {
            if !system.is_empty() {
                body["system"] = json!(system);
            }
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        check_status("Anthropic", response).await
    }
}

pub(crate) fn parse_stream_event(data: &str) -> Result<StreamStep, LlmError> {
    let json: Value =
        serde_json::from_str(data).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    match json["type"].as_str() {
        Some("content_block_delta") => Ok(json["delta"]["text"]
            .as_str()
            .map(|t| StreamStep::Text(t.to_string()))
            .unwrap_or(StreamStep::Skip)),
        Some("message_delta") if json["delta"]["stop_reason"].as_str() == Some("refusal") => Err(
            LlmError::ContentPolicy("the model refused to answer".to_string()),
        ),
        Some("message_stop") => Ok(StreamStep::Stop),
        Some("error") => Err(LlmError::Api(json["error"].to_string())),
        _ => Ok(StreamStep::Skip),
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse, LlmError> {
        let body = Self::request_body(messages, options, false);
        let response = self.send(&body).await?;
        let json: Value = response.json().await?;

        if json["stop_reason"].as_str() == Some("refusal") {
            return Err(LlmError::ContentPolicy("the model refused to answer".to_string()));
        }

        let content = json["content"]
            .as_array()
            .ok_or_else(|| LlmError::InvalidResponse("missing content blocks".to_string()))?
            .iter()
            .filter_map(|block| block["text"].as_str())
            .collect::<String>();

        let usage = json.get("usage").map(|u| Usage {
            input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(ChatResponse {
            content,
            model: options.model.clone(),
            usage,
        })
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<FragmentStream, LlmError> {
        let body = Self::request_body(messages, options, true);
        let response = self.send(&body).await?;
        let events = stream::sse_data(response);

        Ok(boxed(try_stream! {
            let mut finished = false;
            for await data in events {
                match parse_stream_event(&data?)? {
                    StreamStep::Text(text) => {
                        yield text;
                    }
                    StreamStep::Skip => {}
                    StreamStep::Stop => {
                        finished = true;
                        break;
                    }
                }
            }
            if !finished {
                Err::<(), _>(LlmError::incomplete_stream())?;
            }
        }))
    }
}

use async_stream::try_stream;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::llm::{
    boxed, check_status,
    models::{ChatOptions, ChatResponse, Message, Usage},
    stream, FragmentStream, LlmError, LlmProvider,
};

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }

    fn request_body(messages: &[Message], options: &ChatOptions, streaming: bool) -> Value {
        let mut final_messages: Vec<Message> = messages.to_vec();
        if let Some(system) = &options.system_prompt {
            final_messages.insert(0, Message::system(system.clone()));
        }

        json!({
            "model": options.model,
            "messages": final_messages,
            "stream": streaming,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        check_status("OpenAI", response).await
    }
}

/// Parses one streamed `chat.completion.chunk`. `Ok(None)` means the chunk carried no text.
pub(crate) fn parse_stream_chunk(data: &str) -> Result<Option<String>, LlmError> {
    let json: Value =
        serde_json::from_str(data).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    if let Some(error) = json.get("error") {
        return Err(LlmError::Api(error.to_string()));
    }

    let choice = &json["choices"][0];
    if choice["finish_reason"].as_str() == Some("content_filter") {
        return Err(LlmError::ContentPolicy(
            "response stopped by the provider's content filter".to_string(),
        ));
    }

    Ok(choice["delta"]["content"].as_str().map(str::to_string))
}

fn parse_completion(json: &Value, model: &str) -> Result<ChatResponse, LlmError> {
    let choice = &json["choices"][0];
    if choice["finish_reason"].as_str() == Some("content_filter") {
        return Err(LlmError::ContentPolicy(
            "response stopped by the provider's content filter".to_string(),
        ));
    }

    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))?
        .to_string();

    let usage = json.get("usage").map(|u| Usage {
        input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
    });

    Ok(ChatResponse {
        content,
        model: json["model"].as_str().unwrap_or(model).to_string(),
        usage,
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse, LlmError> {
        let body = Self::request_body(messages, options, false);
        let response = self.send(&body).await?;

        let json: Value = response.json().await?;
        parse_completion(&json, &options.model)
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
                let data = data?;
                if data == "[DONE]" {
                    finished = true;
                    break;
                }
                if let Some(content) = parse_stream_chunk(&data)? {
                    yield content;
                }
            }
            if !finished {
                Err::<(), _>(LlmError::incomplete_stream())?;
            }
        }))
    }
}

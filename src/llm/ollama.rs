use async_stream::try_stream;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::llm::{
    boxed, check_status,
    models::{ChatOptions, ChatResponse, Message, Usage},
    stream, FragmentStream, LlmError, LlmProvider,
};

pub struct OllamaProvider {
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
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
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens
            }
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await?;

        check_status("Ollama", response).await
    }
}

/// One NDJSON line of `/api/chat`. Returns the text it carries and whether it is the last line.
pub(crate) fn parse_stream_line(line: &str) -> Result<(Option<String>, bool), LlmError> {
    let json: Value =
        serde_json::from_str(line).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    if let Some(error) = json["error"].as_str() {
        return Err(LlmError::Api(error.to_string()));
    }

    let content = json["message"]["content"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    Ok((content, json["done"].as_bool().unwrap_or(false)))
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse, LlmError> {
        let body = Self::request_body(messages, options, false);
        let response = self.send(&body).await?;
        let json: Value = response.json().await?;

        if let Some(error) = json["error"].as_str() {
            return Err(LlmError::Api(error.to_string()));
        }

        let content = json["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("missing message.content".to_string()))?
            .to_string();

        let usage = json.get("eval_count").map(|eval| Usage {
            input_tokens: json["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
            output_tokens: eval.as_u64().unwrap_or(0) as u32,
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
        let lines = stream::ndjson(response);

        Ok(boxed(try_stream! {
            let mut finished = false;
            for await line in lines {
                let (content, done) = parse_stream_line(&line?)?;
                if let Some(content) = content {
                    yield content;
                }
                if done {
                    finished = true;
                    break;
                }
            }
            if !finished {
                Err::<(), _>(LlmError::incomplete_stream())?;
            }
        }))
    }
}

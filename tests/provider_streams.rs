use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use talkgpt::chat::{ChatEvent, ConversationOrchestrator};
use talkgpt::config::DatabaseConfig;
use talkgpt::db::{DuckDbStore, MessageStore, Role};
use talkgpt::error::ChatError;
use talkgpt::llm::anthropic::AnthropicProvider;
use talkgpt::llm::models::{ChatOptions, Message};
use talkgpt::llm::ollama::OllamaProvider;
use talkgpt::llm::openai::OpenAiProvider;
use talkgpt::llm::{LlmError, LlmProvider, ModelGateway};

/// Serves a single HTTP response whose body is written chunk by chunk, then
/// closes the connection. Returns the base URL.
async fn serve_once(content_type: &'static str, chunks: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\nconnection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        for chunk in chunks {
            socket.write_all(chunk.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = socket.shutdown().await;
    });

    format!("http://{addr}")
}

async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return;
            }
        }
    }
}

fn options() -> ChatOptions {
    ChatOptions {
        model: "test-model".to_string(),
        temperature: 0.5,
        max_tokens: 64,
        system_prompt: None,
    }
}

fn history() -> Vec<Message> {
    vec![Message {
        role: "user".to_string(),
        content: "Q".to_string(),
    }]
}

async fn stream_all(provider: &dyn LlmProvider) -> Vec<Result<String, LlmError>> {
    let stream = provider.chat_stream(&history(), &options()).await.unwrap();
    stream.collect().await
}

fn texts(items: &[Result<String, LlmError>]) -> Vec<&str> {
    items
        .iter()
        .filter_map(|item| item.as_ref().ok().map(String::as_str))
        .collect()
}

// --- OpenAI (SSE) ---

#[tokio::test]
async fn openai_stream_reassembles_fragments_until_done() {
    let base = serve_once(
        "text/event-stream",
        vec![
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
        ],
    )
    .await;
    let provider = OpenAiProvider::new("test-key".to_string(), base);

    let items = stream_all(&provider).await;
    assert!(items.iter().all(|item| item.is_ok()));
    assert_eq!(texts(&items), vec!["Hel", "lo"]);
}

#[tokio::test]
async fn openai_stream_closed_before_done_is_an_error() {
    let base = serve_once(
        "text/event-stream",
        vec!["data: {\"choices\":[{\"delta\":{\"content\":\"The answer is\"}}]}\n\n"],
    )
    .await;
    let provider = OpenAiProvider::new("test-key".to_string(), base);

    let items = stream_all(&provider).await;
    assert_eq!(texts(&items), vec!["The answer is"]);
    assert!(matches!(items.last(), Some(Err(LlmError::InvalidResponse(_)))));
}

#[tokio::test]
async fn openai_stream_error_object_is_an_api_error() {
    let base = serve_once(
        "text/event-stream",
        vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
        ],
    )
    .await;
    let provider = OpenAiProvider::new("test-key".to_string(), base);

    let items = stream_all(&provider).await;
    assert_eq!(items.len(), 2);
    assert!(matches!(items.last(), Some(Err(LlmError::Api(_)))));
}

// --- Anthropic (SSE with event names) ---

#[tokio::test]
async fn anthropic_stream_ends_at_message_stop() {
    let base = serve_once(
        "text/event-stream",
        vec![
            "event: message_start\r\ndata: {\"type\":\"message_start\"}\r\n\r\n",
            "event: content_block_delta\r\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi \"}}\r\n\r\n",
            "event: content_block_delta\r\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_de",
            "lta\",\"text\":\"there\"}}\r\n\r\nevent: ping\r\ndata: {\"type\":\"ping\"}\r\n\r\n",
            "event: message_stop\r\ndata: {\"type\":\"message_stop\"}\r\n\r\n",
        ],
    )
    .await;
    let provider = AnthropicProvider::new("test-key".to_string(), base);

    let items = stream_all(&provider).await;
    assert!(items.iter().all(|item| item.is_ok()));
    assert_eq!(texts(&items), vec!["Hi ", "there"]);
}

#[tokio::test]
async fn anthropic_stream_closed_before_message_stop_is_an_error() {
    let base = serve_once(
        "text/event-stream",
        vec![
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
        ],
    )
    .await;
    let provider = AnthropicProvider::new("test-key".to_string(), base);

    let items = stream_all(&provider).await;
    assert_eq!(texts(&items), vec!["Hi"]);
    assert!(matches!(items.last(), Some(Err(LlmError::InvalidResponse(_)))));
}

// --- Ollama (NDJSON) ---

#[tokio::test]
async fn ollama_stream_ends_at_done() {
    let base = serve_once(
        "application/x-ndjson",
        vec![
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n{\"message\":{\"role\":\"assis",
            "tant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ],
    )
    .await;
    let provider = OllamaProvider::new(base);

    let items = stream_all(&provider).await;
    assert!(items.iter().all(|item| item.is_ok()));
    assert_eq!(texts(&items), vec!["Hel", "lo"]);
}

#[tokio::test]
async fn ollama_stream_closed_before_done_is_an_error() {
    let base = serve_once(
        "application/x-ndjson",
        vec!["{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n"],
    )
    .await;
    let provider = OllamaProvider::new(base);

    let items = stream_all(&provider).await;
    assert_eq!(texts(&items), vec!["Hel"]);
    assert!(matches!(items.last(), Some(Err(LlmError::InvalidResponse(_)))));
}

#[tokio::test]
async fn ollama_stream_error_line_is_an_api_error() {
    let base = serve_once(
        "application/x-ndjson",
        vec!["{\"error\":\"model 'test-model' not found\"}\n"],
    )
    .await;
    let provider = OllamaProvider::new(base);

    let items = stream_all(&provider).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(LlmError::Api(_))));
}

// --- Through the orchestrator ---

#[tokio::test]
async fn truncated_upstream_reply_is_not_stored() {
    let base = serve_once(
        "text/event-stream",
        vec!["data: {\"choices\":[{\"delta\":{\"content\":\"The answer is\"}}]}\n\n"],
    )
    .await;
    let store = Arc::new(DuckDbStore::open(&DatabaseConfig::in_memory()).unwrap());
    let provider = Arc::new(OpenAiProvider::new("test-key".to_string(), base));
    let gateway = ModelGateway::new(provider, options(), Duration::from_secs(5));
    let orchestrator = ConversationOrchestrator::new(store.clone(), store.clone(), gateway);

    let stream = orchestrator.stream_turn(None, "Q").await.unwrap();
    let session_id = stream.session_id;
    let events: Vec<ChatEvent> = stream.events.collect().await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], ChatEvent::Fragment(f) if f == "The answer is"));
    assert!(matches!(&events[1], ChatEvent::Failed(ChatError::Upstream(_))));

    let stored = MessageStore::list(store.as_ref(), session_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, Role::User);
    assert_eq!(stored[0].content, "Q");
}

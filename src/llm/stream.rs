//! Line decoding for streamed provider responses.
//!
//! Network chunks do not align with protocol frames, so the body is read through
//! a buffered reader and split on newlines before any JSON is parsed.

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use crate::llm::LlmError;

fn body_bytes(response: reqwest::Response) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
    response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other))
}

/// Every line of a chunked body, without the trailing `\n` or `\r\n`.
pub fn lines<S>(chunks: S) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin,
{
    let reader = tokio::io::BufReader::new(StreamReader::new(chunks));
    let mut lines = reader.lines();

    try_stream! {
        while let Some(line) = lines.next_line().await.map_err(LlmError::from_io)? {
            yield line;
        }
    }
}

/// Payloads of the `data:` fields of a Server-Sent Events body.
pub fn sse_data(response: reqwest::Response) -> impl Stream<Item = Result<String, LlmError>> + Send {
    sse_data_lines(lines(Box::pin(body_bytes(response))))
}

/// Non-empty lines of a newline-delimited JSON body.
pub fn ndjson(response: reqwest::Response) -> impl Stream<Item = Result<String, LlmError>> + Send {
    ndjson_lines(lines(Box::pin(body_bytes(response))))
}

fn sse_data_lines<L>(body: L) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    L: Stream<Item = Result<String, LlmError>> + Send,
{
    try_stream! {
        for await line in body {
            if let Some(data) = sse_data_field(&line?) {
                yield data.to_string();
            }
        }
    }
}

fn ndjson_lines<L>(body: L) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    L: Stream<Item = Result<String, LlmError>> + Send,
{
    try_stream! {
        for await line in body {
            let line = line?;
            if !line.trim().is_empty() {
                yield line;
            }
        }
    }
}

fn sse_data_field(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data))
}

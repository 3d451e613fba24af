//! Language-model backend client
//!
//! Talks to an Ollama-compatible chat endpoint. Streaming responses arrive as
//! newline-delimited JSON and are decoded into plain text fragments.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::types::*;

/// Incremental reply from a backend: text fragments in arrival order.
///
/// The stream ends after the backend's end-of-stream signal. An `Err` item
/// is terminal; nothing follows it.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// A chat-completion backend
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Run one chat completion and return the whole assistant message
    async fn chat(&self, model: &str, messages: &[Message]) -> Result<Message>;

    /// Run one chat completion and return its reply as a fragment stream
    async fn chat_stream(&self, model: &str, messages: &[Message]) -> Result<FragmentStream>;
}

/// Ollama HTTP client
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    /// Create a new client from the LLM configuration
    pub fn new(config: &LlmConfig) -> Result<Self> {
        // A whole-request timeout would cut long streams short, so the
        // configured timeout bounds each read instead.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Load the model into backend memory by sending it a throwaway prompt
    pub async fn warm_up(&self, model: &str) -> Result<()> {
        let url = format!("{}/api/generate", self.base_url);
        info!("Warming up model {} at {}", model, url);

        let request = GenerateRequest {
            model,
            prompt: "just preloading the model in memory, just respond with an \"ok\"",
            stream: false,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::BackendFailure(format!("{}: {}", status, body)));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        if let Some(err) = parsed.error {
            return Err(Error::BackendFailure(err));
        }

        debug!("Warm-up reply: {}", parsed.response);
        Ok(())
    }

    async fn post_chat(&self, model: &str, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(
            "Sending chat request to {} (model={}, messages={}, stream={})",
            url,
            model,
            messages.len(),
            stream
        );

        let request = ChatRequest {
            model,
            messages,
            stream,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Backend error: {} - {}", status, body);
            return Err(Error::BackendFailure(format!("{}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, model: &str, messages: &[Message]) -> Result<Message> {
        let response = self.post_chat(model, messages, false).await?;
        let body = response.text().await?;

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            Error::BackendFailure(format!("Failed to parse response: {} - {}", e, body))
        })?;

        if let Some(err) = parsed.error {
            warn!("Backend reported error: {}", err);
            return Err(Error::BackendFailure(err));
        }

        info!(
            "Chat response: done_reason={:?}, tokens={}",
            parsed.done_reason,
            parsed.eval_count.unwrap_or(0)
        );

        Ok(Message::assistant(parsed.content()))
    }

    async fn chat_stream(&self, model: &str, messages: &[Message]) -> Result<FragmentStream> {
        let response = self.post_chat(model, messages, true).await?;
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from))
            .boxed();

        Ok(decode_chat_stream(chunks))
    }
}

/// Splits a byte stream into lines.
///
/// Works on raw bytes so that a multi-byte character split across two
/// network chunks is reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Feed a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Return the trailing line that was never terminated, if any
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

struct NdjsonState<S> {
    chunks: S,
    decoder: LineDecoder,
    lines: VecDeque<String>,
    eof: bool,
    done: bool,
}

/// Decode an NDJSON chat stream into text fragments.
///
/// Empty fragments are skipped. A stream that closes before a `done: true`
/// frame yields a `BackendFailure`, since the reply may be truncated.
pub fn decode_chat_stream<S>(chunks: S) -> FragmentStream
where
    S: Stream<Item = Result<Vec<u8>>> + Send + Unpin + 'static,
{
    let state = NdjsonState {
        chunks,
        decoder: LineDecoder::default(),
        lines: VecDeque::new(),
        eof: false,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            if let Some(line) = state.lines.pop_front() {
                match parse_frame(&line) {
                    Ok(frame) => {
                        if frame.done {
                            state.done = true;
                        }
                        let content = frame.content();
                        if content.is_empty() {
                            continue;
                        }
                        return Some((Ok(content.to_string()), state));
                    }
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.eof {
                state.done = true;
                return Some((
                    Err(Error::BackendFailure(
                        "stream closed before completion".to_string(),
                    )),
                    state,
                ));
            }

            match state.chunks.next().await {
                Some(Ok(bytes)) => {
                    let lines = state.decoder.push(&bytes);
                    state.lines.extend(lines);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.eof = true;
                    if let Some(rest) = state.decoder.finish() {
                        state.lines.push_back(rest);
                    }
                }
            }
        }
    })
    .boxed()
}

fn parse_frame(line: &str) -> Result<ChatResponse> {
    let frame: ChatResponse = serde_json::from_str(line)
        .map_err(|e| Error::BackendFailure(format!("Malformed stream frame: {} - {}", e, line)))?;

    if let Some(err) = frame.error {
        warn!("Backend reported error mid-stream: {}", err);
        return Err(Error::BackendFailure(err));
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn frame(content: &str, done: bool) -> String {
        format!(
            "{}\n",
            serde_json::json!({
                "model": "llama3",
                "message": {"role": "assistant", "content": content},
                "done": done,
            })
        )
    }

    fn chunks(parts: Vec<Vec<u8>>) -> BoxStream<'static, Result<Vec<u8>>> {
        stream::iter(parts.into_iter().map(Ok)).boxed()
    }

    #[test]
    fn test_line_decoder_splits_lines() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"{\"a\":").is_empty());
        let lines = decoder.push(b"1}\n{\"b\":2}\n\n{\"c\"");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(decoder.finish(), Some("{\"c\"".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_line_decoder_reassembles_split_characters() {
        let mut decoder = LineDecoder::default();
        let text = "héllo\n".as_bytes();
        // split inside the two-byte 'é'
        assert!(decoder.push(&text[..2]).is_empty());
        assert_eq!(decoder.push(&text[2..]), vec!["héllo"]);
    }

    #[tokio::test]
    async fn test_decode_fragments_in_order() {
        let body = [frame("{\"murder\": false} ", false), frame("Good ", false), frame("morning.", false), frame("", true)]
            .concat()
            .into_bytes();
        // deliver in awkward 7-byte pieces
        let parts: Vec<Vec<u8>> = body.chunks(7).map(|c| c.to_vec()).collect();

        let fragments: Vec<String> = decode_chat_stream(chunks(parts)).try_collect().await.unwrap();
        assert_eq!(fragments, vec!["{\"murder\": false} ", "Good ", "morning."]);
    }

    #[tokio::test]
    async fn test_decode_accepts_unterminated_final_line() {
        let mut body = frame("Hi", false);
        body.push_str(frame("", true).trim_end());

        let fragments: Vec<String> = decode_chat_stream(chunks(vec![body.into_bytes()]))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments, vec!["Hi"]);
    }

    #[tokio::test]
    async fn test_decode_error_frame_is_terminal() {
        let body = format!("{}{{\"error\":\"out of memory\"}}\n{}", frame("Hel", false), frame("lo", false));
        let items: Vec<Result<String>> = decode_chat_stream(chunks(vec![body.into_bytes()])).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "Hel");
        assert!(matches!(&items[1], Err(Error::BackendFailure(msg)) if msg == "out of memory"));
    }

    #[tokio::test]
    async fn test_decode_truncated_stream_fails() {
        let body = frame("Hel", false);
        let items: Vec<Result<String>> = decode_chat_stream(chunks(vec![body.into_bytes()])).collect().await;

        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(Error::BackendFailure(_))));
    }

    #[tokio::test]
    async fn test_decode_malformed_frame_fails() {
        let items: Vec<Result<String>> = decode_chat_stream(chunks(vec![b"not json\n".to_vec()]))
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::BackendFailure(_))));
    }

    #[test]
    fn test_client_trims_base_url() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..LlmConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }
}

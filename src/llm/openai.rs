//! Client for servers speaking the OpenAI chat/embeddings HTTP API
//! (LM Studio, llama.cpp server, vLLM, OpenAI itself).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

use super::provider::{EmbeddingProvider, LlmProvider};
use super::stream::FragmentStream;
use super::types::ChatRequest;
use crate::core::config::ProviderSettings;
use crate::core::errors::ApiError;

#[derive(Clone)]
pub struct OpenAiCompatProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|key| !key.is_empty()),
            client,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn chat_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, ApiError> {
        let body = self.chat_body(&request, false);
        let res = self
            .post("/v1/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!(
                "Chat completion failed ({}): {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::internal)?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|content| content.to_string())
            .ok_or_else(|| ApiError::Internal("Chat completion returned no content".to_string()))
    }

    async fn stream(&self, request: ChatRequest) -> Result<FragmentStream, ApiError> {
        let body = self.chat_body(&request, true);
        let res = self
            .post("/v1/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!(
                "Chat stream failed ({}): {}",
                status, text
            )));
        }

        let (tx, fragments) = FragmentStream::channel();
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            // SSE events may be split across network chunks.
            let mut buffer = String::new();
            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::internal(e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    match parse_sse_line(&line) {
                        Ok(SseEvent::Fragment(content)) => {
                            if tx.send(Ok(content)).await.is_err() {
                                return;
                            }
                        }
                        Ok(SseEvent::Done) => return,
                        Ok(SseEvent::Skip) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            if let Ok(SseEvent::Fragment(content)) = parse_sse_line(&buffer) {
                let _ = tx.send(Ok(content)).await;
            }
        });

        Ok(fragments)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let res = self
            .post("/v1/embeddings")
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!(
                "Embedding request failed ({}): {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::internal)?;
        parse_embeddings(&payload, texts.len())
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Fragment(String),
    Done,
    Skip,
}

/// Interpret one line of an OpenAI-style SSE body.
pub(crate) fn parse_sse_line(line: &str) -> Result<SseEvent, ApiError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let json: Value = serde_json::from_str(data)
        .map_err(|e| ApiError::Internal(format!("Malformed stream event: {}", e)))?;
    if let Some(message) = json.get("error") {
        let message = message["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| message.to_string());
        return Err(ApiError::Internal(format!("Model stream error: {}", message)));
    }

    match json["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => Ok(SseEvent::Fragment(content.to_string())),
        _ => Ok(SseEvent::Skip),
    }
}

fn parse_embeddings(payload: &Value, expected: usize) -> Result<Vec<Vec<f32>>, ApiError> {
    let data = payload["data"]
        .as_array()
        .ok_or_else(|| ApiError::Internal("Embedding response has no data".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item["index"]
            .as_u64()
            .map(|i| i as usize)
            .unwrap_or(position);
        let values = item["embedding"]
            .as_array()
            .ok_or_else(|| ApiError::Internal("Embedding item has no vector".to_string()))?;
        let vector = values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        return Err(ApiError::Internal(format!(
            "Expected {} embeddings, got {}",
            expected,
            indexed.len()
        )));
    }
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

//! In-process doubles for the model and embedding providers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::core::errors::ApiError;
use crate::llm::{ChatRequest, EmbeddingProvider, FragmentStream, LlmProvider};

const HASH_DIMENSIONS: usize = 256;

/// Bag-of-words embedder: each lowercase token bumps one FNV-hashed bucket.
#[derive(Debug, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; HASH_DIMENSIONS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let bucket = fnv1a(&token.to_lowercase()) as usize % HASH_DIMENSIONS;
            vector[bucket] += 1.0;
        }
        vector
    }
}

fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(texts.iter().map(|text| Self::vector(text)).collect())
    }
}

/// Embedder that indexes fine but fails every query-time call once armed.
#[derive(Debug, Default)]
pub struct FailingEmbedder {
    armed: std::sync::atomic::AtomicBool,
}

impl FailingEmbedder {
    pub fn arm(&self) {
        self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-embedder"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if self.armed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ApiError::Internal("embedding service unreachable".to_string()));
        }
        Ok(texts.iter().map(|text| HashEmbedder::vector(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub enum StreamStep {
    Text(String),
    Fail(String),
    /// Hold the stream open until the consumer goes away.
    WaitForClose,
}

#[derive(Debug, Clone)]
pub enum StreamScript {
    Steps(Vec<StreamStep>),
    Reject(String),
}

/// Model double with queued replies. Records every request it receives.
///
/// With an empty queue `complete` echoes the last user message (a no-op
/// rewrite) and `stream` answers "ok".
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    completions: Mutex<VecDeque<Result<String, String>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<ChatRequest>>,
    completion_gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete_with(self, reply: Result<&str, &str>) -> Self {
        self.completions
            .lock()
            .unwrap()
            .push_back(reply.map(str::to_string).map_err(str::to_string));
        self
    }

    pub fn stream_with(self, script: StreamScript) -> Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    pub fn stream_text(self, fragments: &[&str]) -> Self {
        self.stream_with(StreamScript::Steps(
            fragments
                .iter()
                .map(|f| StreamStep::Text(f.to_string()))
                .collect(),
        ))
    }

    /// `complete` records its request, then waits for `gate` before replying.
    pub fn hold_completions(self, gate: Arc<Notify>) -> Self {
        *self.completion_gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, ApiError> {
        let echo = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.requests.lock().unwrap().push(request);

        let gate = self.completion_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match self.completions.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(ApiError::Internal(message)),
            None => Ok(echo),
        }
    }

    async fn stream(&self, request: ChatRequest) -> Result<FragmentStream, ApiError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StreamScript::Steps(vec![StreamStep::Text("ok".to_string())]));

        let steps = match script {
            StreamScript::Reject(message) => return Err(ApiError::Internal(message)),
            StreamScript::Steps(steps) => steps,
        };

        let (tx, stream) = FragmentStream::channel();
        tokio::spawn(async move {
            for step in steps {
                match step {
                    StreamStep::Text(text) => {
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    StreamStep::Fail(message) => {
                        let _ = tx.send(Err(ApiError::Internal(message))).await;
                        return;
                    }
                    StreamStep::WaitForClose => {
                        tx.closed().await;
                        return;
                    }
                }
            }
        });
        Ok(stream)
    }
}

//! The retrieval-augmented answer pipeline.
//!
//! [`RagPipeline::start`] records the user turn synchronously, then hands the
//! rest of the cycle (rewrite, retrieve, generate, finalize) to a spawned task
//! that relays fragments over an [`AnswerStream`].

pub mod contextualize;
pub mod error;
pub mod locks;
pub mod prompts;
pub mod synthesize;


use tokio::sync::mpsc;

use crate::history::{reduce_history, ConversationAdapter, Turn, TurnHandle, TurnOutcome};
use crate::llm::{ChatMessage, FragmentStream};
use crate::rag::{HybridRetriever, RetrievalOutcome};

pub use contextualize::Contextualizer;
pub use error::PipelineError;
pub use locks::{ConversationGuard, ConversationLocks};
pub use prompts::{NO_KNOWLEDGE_REPLY, NO_RELEVANT_REPLY};
pub use synthesize::Synthesizer;

const EVENT_BUFFER: usize = 32;

/// Everything one request needs. Nothing is shared between requests.
#[derive(Debug, Clone)]
pub struct ChatInput {
    pub conversation_id: String,
    pub query: String,
    /// Prior turns supplied by the caller; loaded from the store when `None`.
    pub history: Option<Vec<Turn>>,
    /// Collections to search; the conversation's linked collections when `None`.
    pub collection_ids: Option<Vec<String>>,
}

impl ChatInput {
    pub fn new(conversation_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            query: query.into(),
            history: None,
            collection_ids: None,
        }
    }
}

#[derive(Debug)]
pub enum AnswerEvent {
    Fragment(String),
    /// Terminal. Fragments already delivered stay delivered.
    Error(PipelineError),
}

/// Caller side of a running request. Dropping it cancels generation.
#[derive(Debug)]
pub struct AnswerStream {
    conversation_id: String,
    rx: mpsc::Receiver<AnswerEvent>,
}

impl AnswerStream {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn next(&mut self) -> Option<AnswerEvent> {
        self.rx.recv().await
    }

    /// Wait for the whole answer. Returns once the assistant turn is persisted.
    pub async fn collect(mut self) -> Result<String, PipelineError> {
        let mut answer = String::new();
        let mut failure = None;
        while let Some(event) = self.next().await {
            match event {
                AnswerEvent::Fragment(text) => answer.push_str(&text),
                AnswerEvent::Error(err) => failure = Some(err),
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(answer),
        }
    }
}

#[derive(Clone)]
pub struct RagPipeline {
    adapter: ConversationAdapter,
    retriever: HybridRetriever,
    contextualizer: Contextualizer,
    synthesizer: Synthesizer,
    locks: ConversationLocks,
}

enum Relay {
    Finished(String),
    Failed(PipelineError),
    Cancelled(String),
}

impl RagPipeline {
    pub fn new(
        adapter: ConversationAdapter,
        retriever: HybridRetriever,
        contextualizer: Contextualizer,
        synthesizer: Synthesizer,
        locks: ConversationLocks,
    ) -> Self {
        Self {
            adapter,
            retriever,
            contextualizer,
            synthesizer,
            locks,
        }
    }

    pub fn locks(&self) -> &ConversationLocks {
        &self.locks
    }

    /// Persist the user turn and placeholder, then answer in the background.
    ///
    /// Errors returned here happen before anything was streamed; later
    /// failures arrive as a terminal [`AnswerEvent::Error`].
    pub async fn start(&self, input: ChatInput) -> Result<AnswerStream, PipelineError> {
        let guard = self
            .locks
            .try_acquire(&input.conversation_id)
            .ok_or_else(|| PipelineError::Busy(input.conversation_id.clone()))?;

        let collection_ids = match input.collection_ids {
            Some(ids) => ids,
            None => self
                .adapter
                .collections(&input.conversation_id)
                .await
                .map_err(PipelineError::Persistence)?,
        };
        let history = match input.history {
            Some(turns) => turns,
            None => self
                .adapter
                .history(&input.conversation_id)
                .await
                .map_err(PipelineError::Persistence)?,
        };

        let handle = self
            .adapter
            .begin_turn(&input.conversation_id, &input.query)
            .await
            .map_err(PipelineError::Persistence)?;

        tracing::info!(
            conversation_id = %input.conversation_id,
            collections = collection_ids.len(),
            history_turns = history.len(),
            "Starting RAG turn"
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pipeline = self.clone();
        let job = TurnJob {
            handle,
            query: input.query,
            history: reduce_history(&history),
            collection_ids,
        };
        tokio::spawn(async move {
            pipeline.run(job, guard, tx).await;
        });

        Ok(AnswerStream {
            conversation_id: input.conversation_id,
            rx,
        })
    }

    async fn run(&self, job: TurnJob, guard: ConversationGuard, tx: mpsc::Sender<AnswerEvent>) {
        let relay = self.answer(&job, &tx).await;

        let (outcome, terminal_error) = match relay {
            Relay::Finished(text) if text.trim().is_empty() => {
                let err = PipelineError::Generation("the model returned an empty answer".into());
                (TurnOutcome::Failed(err.to_string()), Some(err))
            }
            Relay::Finished(text) => (TurnOutcome::Completed(text), None),
            Relay::Failed(err) => (TurnOutcome::Failed(err.to_string()), Some(err)),
            Relay::Cancelled(partial) => {
                tracing::info!(
                    conversation_id = %job.handle.conversation_id,
                    "Caller disconnected before the answer completed"
                );
                (TurnOutcome::Cancelled(partial), None)
            }
        };

        if let Some(err) = &terminal_error {
            tracing::warn!(
                conversation_id = %job.handle.conversation_id,
                "RAG turn failed: {}",
                err
            );
        }

        if let Err(err) = self.adapter.finalize_turn(&job.handle, outcome).await {
            tracing::error!(
                conversation_id = %job.handle.conversation_id,
                turn_id = job.handle.assistant_turn_id,
                "Failed to finalize assistant turn: {}",
                err
            );
        }
        // Release before the channel closes so a caller that saw the end can
        // immediately start the next turn.
        drop(guard);

        if let Some(err) = terminal_error {
            let _ = tx.send(AnswerEvent::Error(err)).await;
        }
    }

    async fn answer(&self, job: &TurnJob, tx: &mpsc::Sender<AnswerEvent>) -> Relay {
        let indexed = match self.retriever.indexed_collections(&job.collection_ids).await {
            Ok(indexed) => indexed,
            Err(err) => return Relay::Failed(PipelineError::retrieval(err)),
        };
        if indexed.is_empty() {
            return send_fixed(tx, NO_KNOWLEDGE_REPLY).await;
        }

        // Until the first fragment, a caller that goes away aborts the
        // current stage and skips the rest.
        let rewritten = tokio::select! {
            _ = tx.closed() => return Relay::Cancelled(String::new()),
            rewritten = self.contextualizer.rewrite(&job.history, &job.query) => rewritten,
        };
        let query = match rewritten {
            Ok(query) => query,
            Err(err) => return Relay::Failed(err),
        };

        let retrieved = tokio::select! {
            _ = tx.closed() => return Relay::Cancelled(String::new()),
            retrieved = self.retriever.retrieve_from(&query, &indexed) => retrieved,
        };
        let candidates = match retrieved {
            Ok(RetrievalOutcome::Candidates(candidates)) => candidates,
            Ok(RetrievalOutcome::NoRelevant) => return send_fixed(tx, NO_RELEVANT_REPLY).await,
            Ok(RetrievalOutcome::NoKnowledge) => return send_fixed(tx, NO_KNOWLEDGE_REPLY).await,
            Err(err) => return Relay::Failed(PipelineError::retrieval(err)),
        };
        tracing::debug!(candidates = candidates.len(), "Retrieved grounding context");
        if tx.is_closed() {
            return Relay::Cancelled(String::new());
        }

        let fragments = match self
            .synthesizer
            .stream(&query, &candidates, &job.history)
            .await
        {
            Ok(fragments) => fragments,
            Err(err) => return Relay::Failed(err),
        };

        relay_fragments(fragments, tx).await
    }
}

struct TurnJob {
    handle: TurnHandle,
    query: String,
    history: Vec<ChatMessage>,
    collection_ids: Vec<String>,
}

async fn send_fixed(tx: &mpsc::Sender<AnswerEvent>, reply: &str) -> Relay {
    // Persisted either way; a closed channel only means nobody is listening.
    let _ = tx.send(AnswerEvent::Fragment(reply.to_string())).await;
    Relay::Finished(reply.to_string())
}

/// Forward model fragments in order while accumulating them.
async fn relay_fragments(mut fragments: FragmentStream, tx: &mpsc::Sender<AnswerEvent>) -> Relay {
    let mut accumulated = String::new();
    loop {
        let item = tokio::select! {
            _ = tx.closed() => return Relay::Cancelled(accumulated),
            item = fragments.next() => item,
        };

        match item {
            Some(Ok(fragment)) => {
                if tx.send(AnswerEvent::Fragment(fragment.clone())).await.is_err() {
                    return Relay::Cancelled(accumulated);
                }
                accumulated.push_str(&fragment);
            }
            Some(Err(err)) => return Relay::Failed(PipelineError::generation(err)),
            None => return Relay::Finished(accumulated),
        }
    }
}

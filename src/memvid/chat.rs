//! Conversational sessions over a [`Retriever`].
//!
//! Answer synthesis is pluggable through [`AnswerBackend`]. In context-only mode, or when the
//! backend fails, replies are assembled from the retrieved context alone.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retriever::Retriever;
use crate::error::{MemvidError, Result};
use crate::index::write_atomic;
use crate::types::{ChatSettings, SearchHit};

/// Number of hits quoted in a context-only reply.
const CONTEXT_REPLY_HITS: usize = 3;
/// Characters kept from each quoted hit.
const CONTEXT_REPLY_SNIPPET: usize = 200;
/// Hits shorter than this on average are treated as noise.
const MIN_USEFUL_CONTEXT: usize = 50;

const NO_CONTEXT_REPLY: &str = "I couldn't find any relevant information in the knowledge base.";

/// Produces an answer from the question, retrieved context and prior turns.
pub trait AnswerBackend: Send + Sync {
    fn name(&self) -> &str;

    fn answer(&self, question: &str, context: &[SearchHit], history: &[ChatTurn])
    -> Result<String>;
}

/// How replies are produced; fixed when the conversation is created.
pub enum Responder {
    Synthesizer(Box<dyn AnswerBackend>),
    /// Quote the retrieved context directly.
    ContextOnly,
}

impl Responder {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Synthesizer(backend) => backend.name(),
            Self::ContextOnly => "context-only",
        }
    }
}

/// One user message and the reply it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user: String,
    pub assistant: String,
    /// Chunk ids used as context.
    pub context: Vec<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Serialized form written by [`Conversation::export_session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub message_count: usize,
    pub history: Vec<ChatTurn>,
    pub settings: ChatSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub session_id: Option<String>,
    pub message_count: usize,
    pub backend: String,
    pub context_chunks: usize,
    pub max_history: usize,
}

pub struct Conversation {
    retriever: Retriever,
    responder: Responder,
    settings: ChatSettings,
    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    history: VecDeque<ChatTurn>,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("responder", &self.responder.name())
            .field("session_id", &self.session_id)
            .field("turns", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl Conversation {
    /// Conversation over `retriever` using its configured chat settings.
    #[must_use]
    pub fn new(retriever: Retriever, responder: Responder) -> Self {
        let settings = retriever.config().chat.clone();
        Self {
            retriever,
            responder,
            settings,
            session_id: None,
            started_at: None,
            history: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Turns kept for context, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ChatTurn> {
        self.history.iter()
    }

    /// Begin a fresh session, discarding history. Returns the session id.
    pub fn start_session(&mut self, session_id: Option<String>) -> String {
        let now = Utc::now();
        let id = session_id.unwrap_or_else(|| now.format("session_%Y%m%d_%H%M%S").to_string());
        self.history.clear();
        self.started_at = Some(now);
        self.session_id = Some(id.clone());
        tracing::info!(target = "memvid::chat", session = %id, "session started");
        id
    }

    /// Answer `message` from retrieved context, starting a session if none is active.
    pub fn chat(&mut self, message: &str) -> Result<ChatTurn> {
        let message = message.trim();
        if message.is_empty() {
            return Err(MemvidError::InvalidQuery {
                reason: "chat message is empty".into(),
            });
        }
        if self.session_id.is_none() {
            self.start_session(None);
        }

        let context = self.search_context(message)?;
        let history: Vec<ChatTurn> = self.history.iter().cloned().collect();
        let assistant = match &self.responder {
            Responder::Synthesizer(backend) => match backend.answer(message, &context, &history) {
                Ok(answer) => answer,
                Err(err) => {
                    tracing::warn!(
                        target = "memvid::chat",
                        backend = backend.name(),
                        error = %err,
                        "answer backend failed; replying from context"
                    );
                    context_reply(&context)
                }
            },
            Responder::ContextOnly => context_reply(&context),
        };

        let turn = ChatTurn {
            user: message.to_string(),
            assistant,
            context: context.iter().map(|hit| hit.chunk_id).collect(),
            timestamp: Utc::now(),
        };
        self.history.push_back(turn.clone());
        while self.history.len() > self.settings.max_history {
            self.history.pop_front();
        }
        Ok(turn)
    }

    /// Context hits for `query` using the configured chunk count.
    pub fn search_context(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.retriever
            .search_with_metadata(query, self.settings.context_chunks)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Write the current session as JSON.
    pub fn export_session(&self, path: impl AsRef<Path>) -> Result<()> {
        let record = self.session_record();
        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic(path.as_ref(), &json)?;
        tracing::info!(
            target = "memvid::chat",
            session = %record.session_id,
            path = %path.as_ref().display(),
            "session exported"
        );
        Ok(())
    }

    /// Replace the current session with one previously exported.
    pub fn load_session(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = fs_err::read(path.as_ref())?;
        let record: SessionRecord = serde_json::from_slice(&bytes)?;
        let skip = record.history.len().saturating_sub(self.settings.max_history);
        self.history = record.history.into_iter().skip(skip).collect();
        self.session_id = Some(record.session_id);
        self.started_at = record.start_time;
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> ConversationStats {
        ConversationStats {
            session_id: self.session_id.clone(),
            message_count: self.history.len(),
            backend: self.responder.name().to_string(),
            context_chunks: self.settings.context_chunks,
            max_history: self.settings.max_history,
        }
    }

    fn session_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self
                .session_id
                .clone()
                .unwrap_or_else(|| "unsaved".to_string()),
            start_time: self.started_at,
            end_time: Utc::now(),
            message_count: self.history.len(),
            history: self.history.iter().cloned().collect(),
            settings: self.settings.clone(),
        }
    }
}

/// Reply quoting the best hits, or a fixed message when the context is empty or too thin.
fn context_reply(context: &[SearchHit]) -> String {
    if context.is_empty() {
        return NO_CONTEXT_REPLY.to_string();
    }
    let total: usize = context.iter().map(|hit| hit.text.chars().count()).sum();
    if total / context.len() < MIN_USEFUL_CONTEXT {
        return NO_CONTEXT_REPLY.to_string();
    }

    let mut reply = String::from("Based on the knowledge base, here's what I found:\n");
    for (rank, hit) in context.iter().take(CONTEXT_REPLY_HITS).enumerate() {
        let snippet: String = hit.text.chars().take(CONTEXT_REPLY_SNIPPET).collect();
        let ellipsis = if hit.text.chars().count() > CONTEXT_REPLY_SNIPPET {
            "..."
        } else {
            ""
        };
        reply.push_str(&format!("\n{}. {snippet}{ellipsis}", rank + 1));
    }
    reply
}

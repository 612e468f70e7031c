//! Orchestration: building a video memory, retrieving from it, and chatting over it.

pub mod chat;
pub mod encoder;
pub mod retriever;

pub use chat::{
    AnswerBackend, ChatTurn, Conversation, ConversationStats, Responder, SessionRecord,
};
pub use encoder::{Encoder, EncoderStats};
pub use retriever::{Retriever, RetrieverStats};

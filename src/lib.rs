//! Inbox responder: Gmail auto-reply loop with sentiment-chosen or
//! LLM-generated replies.

pub mod config;
pub mod error;
pub mod http;
pub mod inbox;
pub mod llm;
pub mod mailbox;
pub mod responder;
pub mod sentiment;

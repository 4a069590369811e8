//! Reply generation. A responder turns message details
//! into reply text.

mod generator;

pub use generator::{
    BusinessProfile, GeneratorResponder, MAX_QUESTIONS, ProfileAnswer, generate_questions,
    parse_questions, question_prompt, system_prompt,
};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::mailbox::MessageDetails;
use crate::sentiment::SentimentService;

/// Acknowledgement sent when nothing smarter is available.
pub const DEFAULT_ACKNOWLEDGEMENT: &str =
    "Thank you for reaching out. We're processing your request.";

/// Produces reply text for a message.
///
/// Never touches the mailbox. A responder that cannot produce text answers
/// with an acknowledgement instead of failing the message.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn generate_reply(&self, details: &MessageDetails) -> String;
}

/// Always answers with the same text.
#[derive(Debug, Clone)]
pub struct StaticResponder {
    text: String,
}

impl StaticResponder {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Default for StaticResponder {
    fn default() -> Self {
        Self::new(DEFAULT_ACKNOWLEDGEMENT)
    }
}

#[async_trait]
impl Responder for StaticResponder {
    async fn generate_reply(&self, _details: &MessageDetails) -> String {
        self.text.clone()
    }
}

/// Picks a reply template by the predicted sentiment of the message body.
///
/// Falls back to the acknowledgement when no model is loaded or the label is
/// not one it has a template for.
pub struct SentimentResponder {
    sentiment: Arc<SentimentService>,
    fallback: StaticResponder,
}

impl SentimentResponder {
    pub fn new(sentiment: Arc<SentimentService>) -> Self {
        Self {
            sentiment,
            fallback: StaticResponder::default(),
        }
    }
}

fn template_for(label: &str) -> Option<&'static str> {
    match label {
        "positive" => Some(
            "Thank you for your kind message! We're glad to hear from you and will get back to you shortly.",
        ),
        "negative" => Some(
            "We're sorry to hear about your experience. Your message has been flagged for priority follow-up and a member of our team will be in touch soon.",
        ),
        _ => None,
    }
}

#[async_trait]
impl Responder for SentimentResponder {
    async fn generate_reply(&self, details: &MessageDetails) -> String {
        let text = format!("{}\n{}", details.subject, details.body);
        match self.sentiment.predict(&text) {
            Ok(label) => {
                debug!(id = %details.id, label = %label, "Classified message sentiment");
                template_for(&label).unwrap_or(self.fallback.text()).to_string()
            }
            Err(e) => {
                debug!(id = %details.id, error = %e, "Sentiment unavailable, using acknowledgement");
                self.fallback.text().to_string()
            }
        }
    }
}

//! LLM-written replies, primed with what the business told us about itself.
//!
//! Priming happens in two steps. [`generate_questions`] asks the model what
//! it needs to know about the business; the owner's answers are stored in the
//! [`BusinessProfile`]. [`system_prompt`] then folds the profile into the
//! preamble every reply is generated under.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Responder, StaticResponder};
use crate::error::{ConfigError, LlmError};
use crate::llm::TextGenerator;
use crate::mailbox::MessageDetails;

/// Most questions kept from one question round.
pub const MAX_QUESTIONS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileAnswer {
    pub question: String,
    pub answer: String,
}

/// What the generator knows about the business it answers for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub name: String,
    pub industry: String,
    pub description: String,
    #[serde(default)]
    pub answers: Vec<ProfileAnswer>,
}

impl BusinessProfile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "BUSINESS_PROFILE_PATH".to_string(),
            message,
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| invalid(format!("{}: {e}", path.display())))
    }

    /// Answers that carry information. "NA" marks a question the owner
    /// found irrelevant.
    pub fn informative_answers(&self) -> impl Iterator<Item = &ProfileAnswer> {
        self.answers.iter().filter(|a| {
            let answer = a.answer.trim();
            !answer.is_empty() && !answer.eq_ignore_ascii_case("na")
        })
    }
}

/// Preamble asking the model which facts it is missing about the business.
pub fn question_prompt(profile: &BusinessProfile) -> String {
    format!(
        "You answer customer emails on behalf of {name}, a business in the {industry} industry. \
         The owner describes it as: '{description}'. \
         Before you start, list what you still need to know to help customers well: \
         services offered, how booking works, how long services take, prices, and anything \
         essential the description leaves out. \
         Ask at most {MAX_QUESTIONS} questions, most important first, one per line, \
         each starting with \"- \" and without numbering.",
        name = profile.name,
        industry = profile.industry,
        description = profile.description,
    )
}

/// Questions from a model answer: one per line, bullets and numbering
/// stripped, capped at [`MAX_QUESTIONS`].
pub fn parse_questions(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')'])
                .trim()
                .to_string()
        })
        .filter(|q| !q.is_empty())
        .take(MAX_QUESTIONS)
        .collect()
}

/// Ask the model what it needs to know about the business.
pub async fn generate_questions(
    generator: &dyn TextGenerator,
    profile: &BusinessProfile,
) -> Result<Vec<String>, LlmError> {
    let text = generator
        .complete(&question_prompt(profile), "List your questions.")
        .await?;
    let questions = parse_questions(&text);
    if questions.is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: generator.model_name().to_string(),
            reason: "no questions in response".to_string(),
        });
    }
    Ok(questions)
}

/// Preamble every reply is generated under.
pub fn system_prompt(profile: &BusinessProfile) -> String {
    let facts = profile
        .informative_answers()
        .map(|a| format!("Q: {} A: {}", a.question.trim(), a.answer.trim()))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "You answer customer emails for {name}, a business in the {industry} industry, \
         described by its owner as \"{description}\". \
         Answer questions about prices, services and products, bookings and the business \
         in general, using only the facts you were given.",
        name = profile.name,
        industry = profile.industry,
        description = profile.description,
    );
    if !facts.is_empty() {
        prompt.push_str("\n\nWhat the owner told you:\n");
        prompt.push_str(&facts);
    }
    prompt.push_str(
        "\n\nStay courteous and professional. If a customer asks whether you are an AI, \
         say so honestly; otherwise do not bring it up. \
         Write only the body of the reply email.",
    );
    prompt
}

fn reply_prompt(details: &MessageDetails) -> String {
    format!(
        "From: {}\nSubject: {}\n\n{}",
        details.from, details.subject, details.body
    )
}

/// Replies written by an LLM under the business preamble. Errors, empty
/// completions and slow completions fall back to the acknowledgement.
pub struct GeneratorResponder {
    generator: Arc<dyn TextGenerator>,
    system: String,
    timeout: Duration,
    fallback: StaticResponder,
}

impl GeneratorResponder {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        profile: &BusinessProfile,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            system: system_prompt(profile),
            timeout,
            fallback: StaticResponder::default(),
        }
    }
}

#[async_trait]
impl Responder for GeneratorResponder {
    async fn generate_reply(&self, details: &MessageDetails) -> String {
        let prompt = reply_prompt(details);
        let completion =
            tokio::time::timeout(self.timeout, self.generator.complete(&self.system, &prompt)).await;

        match completion {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                debug!(id = %details.id, model = self.generator.model_name(), "Reply generated");
                text.trim().to_string()
            }
            Ok(Ok(_)) => {
                warn!(id = %details.id, "Generator returned an empty reply, using acknowledgement");
                self.fallback.text().to_string()
            }
            Ok(Err(e)) => {
                warn!(id = %details.id, error = %e, "Reply generation failed, using acknowledgement");
                self.fallback.text().to_string()
            }
            Err(_) => {
                warn!(
                    id = %details.id,
                    timeout_secs = self.timeout.as_secs(),
                    "Reply generation timed out, using acknowledgement"
                );
                self.fallback.text().to_string()
            }
        }
    }
}

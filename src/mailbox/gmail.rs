//! Gmail REST v1 mailbox client.
//!
//! Endpoints used:
//! - `users.messages.list` (unread and recent listings)
//! - `users.messages.get?format=full` (details)
//! - `users.messages.send` (replies, raw RFC 5322 built with lettre)
//! - `users.messages.modify` (mark read, apply label)
//! - `users.labels.list` / `users.labels.create` (label resolution)
//! - `users.getProfile` (sender address when none is configured)

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::oauth::{GOOGLE_TOKEN_URL, OAuth2Credentials, TokenProvider};
use super::payload::{
    CreateLabelRequest, GmailLabel, GmailMessage, ListLabelsResponse, ListMessagesResponse,
    ModifyRequest, SendRequest, into_details,
};
use super::{LabelId, MailboxClient, MessageDetails, MessageId};
use crate::error::{ConfigError, MailboxError};

/// Default Gmail API base for the authenticated user.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail client configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub api_base: String,
    pub token_url: String,
    pub credentials: OAuth2Credentials,
    /// Sender address for outgoing mail; looked up from the profile when unset.
    pub from_address: Option<String>,
    /// Transport-level timeout applied to every HTTP request.
    pub request_timeout: Duration,
}

impl GmailConfig {
    /// Build config from environment variables.
    ///
    /// `GMAIL_CLIENT_ID`, `GMAIL_CLIENT_SECRET` and `GMAIL_REFRESH_TOKEN` are
    /// required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let credentials = OAuth2Credentials {
            client_id: required("GMAIL_CLIENT_ID")?,
            client_secret: SecretString::from(required("GMAIL_CLIENT_SECRET")?),
            refresh_token: SecretString::from(required("GMAIL_REFRESH_TOKEN")?),
        };

        let request_timeout = std::env::var("GMAIL_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            api_base: std::env::var("GMAIL_API_BASE").unwrap_or_else(|_| GMAIL_API_BASE.into()),
            token_url: std::env::var("GMAIL_TOKEN_URL")
                .unwrap_or_else(|_| GOOGLE_TOKEN_URL.into()),
            credentials,
            from_address: std::env::var("GMAIL_FROM_ADDRESS").ok(),
            request_timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

/// Mailbox client backed by the Gmail REST API.
pub struct GmailClient {
    http: reqwest::Client,
    api_base: String,
    tokens: TokenProvider,
    from_address: OnceCell<String>,
}

impl GmailClient {
    pub fn new(config: GmailConfig) -> Result<Self, MailboxError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let from_address = OnceCell::new_with(config.from_address);
        let tokens = TokenProvider::new(config.credentials, config.token_url, http.clone());

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            tokens,
            from_address,
        })
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, MailboxError> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/{}", self.api_base, path.trim_start_matches('/'));
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    /// Map non-success statuses to provider errors.
    async fn check(&self, response: Response) -> Result<Response, MailboxError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(MailboxError::RateLimited);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(MailboxError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn list(&self, max: usize, query: Option<&str>) -> Result<Vec<MessageId>, MailboxError> {
        let mut params = vec![("maxResults", max.to_string())];
        if let Some(q) = query {
            params.push(("q", q.to_string()));
        }

        let response = self
            .request(Method::GET, "messages")
            .await?
            .query(&params)
            .send()
            .await?;
        let list: ListMessagesResponse = self.check(response).await?.json().await?;

        debug!(count = list.messages.len(), query = ?query, "Listed messages");
        Ok(list
            .messages
            .into_iter()
            .map(|m| MessageId(m.id))
            .collect())
    }

    async fn modify(&self, id: &MessageId, body: &ModifyRequest) -> Result<(), MailboxError> {
        let response = self
            .request(Method::POST, &format!("messages/{id}/modify"))
            .await?
            .json(body)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn sender_address(&self) -> Result<&str, MailboxError> {
        let address = self
            .from_address
            .get_or_try_init(|| async {
                let response = self.request(Method::GET, "profile").await?.send().await?;
                let profile: Profile = self.check(response).await?.json().await?;
                Ok::<_, MailboxError>(profile.email_address)
            })
            .await?;
        Ok(address.as_str())
    }
}

/// Build a plain-text RFC 5322 message and encode it for `messages.send`.
pub fn encode_raw_message(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<String, MailboxError> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| MailboxError::InvalidMessage(format!("Invalid from address: {e}")))?;
    let to: Mailbox = to
        .parse()
        .map_err(|e| MailboxError::InvalidMessage(format!("Invalid to address: {e}")))?;

    let email = Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| MailboxError::InvalidMessage(format!("Failed to build email: {e}")))?;

    Ok(URL_SAFE.encode(email.formatted()))
}

#[async_trait]
impl MailboxClient for GmailClient {
    async fn list_unread(&self, max: usize) -> Result<Vec<MessageId>, MailboxError> {
        self.list(max, Some("is:unread")).await
    }

    async fn list_recent(&self, max: usize) -> Result<Vec<MessageId>, MailboxError> {
        self.list(max, None).await
    }

    async fn get_details(&self, id: &MessageId) -> Result<Option<MessageDetails>, MailboxError> {
        let response = self
            .request(Method::GET, &format!("messages/{id}"))
            .await?
            .query(&[("format", "full")])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let message: GmailMessage = self.check(response).await?.json().await?;
        Ok(into_details(message))
    }

    async fn send_reply(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        let from = self.sender_address().await?.to_string();
        let raw = encode_raw_message(&from, to, subject, body)?;

        let response = self
            .request(Method::POST, "messages/send")
            .await?
            .json(&SendRequest { raw })
            .send()
            .await?;
        self.check(response).await?;

        info!(to = %to, subject = %subject, "Email sent");
        Ok(())
    }

    async fn mark_read(&self, id: &MessageId) -> Result<(), MailboxError> {
        let body = ModifyRequest {
            remove_label_ids: vec!["UNREAD".to_string()],
            ..Default::default()
        };
        self.modify(id, &body).await?;
        debug!(id = %id, "Marked as read");
        Ok(())
    }

    async fn ensure_label(&self, name: &str) -> Result<LabelId, MailboxError> {
        let response = self.request(Method::GET, "labels").await?.send().await?;
        let labels: ListLabelsResponse = self.check(response).await?.json().await?;

        if let Some(existing) = labels
            .labels
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
        {
            debug!(label = %name, id = %existing.id, "Label already exists");
            return Ok(existing.id.clone());
        }

        let response = self
            .request(Method::POST, "labels")
            .await?
            .json(&CreateLabelRequest::visible(name))
            .send()
            .await?;
        let created: GmailLabel = self.check(response).await?.json().await?;

        info!(label = %name, id = %created.id, "Label created");
        Ok(created.id)
    }

    async fn apply_label(&self, id: &MessageId, label: &LabelId) -> Result<(), MailboxError> {
        let body = ModifyRequest {
            add_label_ids: vec![label.clone()],
            ..Default::default()
        };
        self.modify(id, &body).await?;
        debug!(id = %id, label = %label, "Label applied");
        Ok(())
    }
}

//! REST control surface: loop start/stop/status, mailbox passthroughs, the
//! sentiment classifier and reply-generator priming.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::{MailboxError, SentimentError};
use crate::inbox::{InboxSupervisor, StartOutcome};
use crate::llm::TextGenerator;
use crate::mailbox::{self, MailboxClient, MessageId};
use crate::responder::{self, BusinessProfile};
use crate::sentiment::{SentimentService, TrainOutcome};

/// Messages returned by `/gmail/get_mail/content` when no ids are given.
const DEFAULT_CONTENT_BATCH: usize = 10;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub mailbox: Arc<dyn MailboxClient>,
    pub supervisor: Arc<InboxSupervisor>,
    pub sentiment: Arc<SentimentService>,
    /// Present when an LLM backend is configured.
    pub generator: Option<Arc<dyn TextGenerator>>,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/gmail/process_incoming_emails/", post(start_processing))
        .route("/gmail/process_incoming_emails/stop", post(stop_processing))
        .route("/gmail/process_incoming_emails/status", get(processing_status))
        .route("/gmail/get_mail", post(get_mail))
        .route("/gmail/get_mail/content", post(get_mail_content))
        .route("/gmail/send_mail", post(send_mail))
        .route("/sent/predict/", post(predict))
        .route("/sent/train/", get(train))
        .route("/assistant/questions", post(assistant_questions))
        .route("/assistant/prompt", post(assistant_prompt))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

fn mailbox_failure(operation: &str, e: MailboxError) -> Response {
    warn!(operation, error = %e, "Mailbox request failed");
    error_body(StatusCode::BAD_GATEWAY, e.to_string())
}

// ── Health ──────────────────────────────────────────────────────────────

async fn root() -> &'static str {
    "root"
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "inbox-responder"
    }))
}

// ── Inbox loop ──────────────────────────────────────────────────────────

async fn start_processing(State(state): State<AppState>) -> Response {
    match state.supervisor.start().await {
        StartOutcome::Started => Json(serde_json::json!({
            "message": "Started processing incoming emails in the background"
        }))
        .into_response(),
        StartOutcome::AlreadyRunning => error_body(
            StatusCode::CONFLICT,
            "Incoming email processing is already running",
        ),
    }
}

async fn stop_processing(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.supervisor.stop().await;
    Json(serde_json::json!({ "stopped": stopped }))
}

async fn processing_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.supervisor.status().await)
}

// ── Mailbox ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GetMailRequest {
    #[serde(default = "default_amount")]
    amount: usize,
}

fn default_amount() -> usize {
    DEFAULT_CONTENT_BATCH
}

async fn get_mail(State(state): State<AppState>, Json(body): Json<GetMailRequest>) -> Response {
    match state.mailbox.list_recent(body.amount).await {
        Ok(ids) => {
            let emails: Vec<_> = ids
                .into_iter()
                .map(|id| serde_json::json!({ "id": id }))
                .collect();
            Json(serde_json::json!({ "emails": emails })).into_response()
        }
        Err(e) => mailbox_failure("list_recent", e),
    }
}

#[derive(Deserialize)]
struct MailContentRequest {
    #[serde(default)]
    ids: Vec<MessageId>,
}

async fn get_mail_content(
    State(state): State<AppState>,
    Json(body): Json<MailContentRequest>,
) -> Response {
    let ids = if body.ids.is_empty() {
        match state.mailbox.list_recent(DEFAULT_CONTENT_BATCH).await {
            Ok(ids) => ids,
            Err(e) => return mailbox_failure("list_recent", e),
        }
    } else {
        body.ids
    };

    let emails = mailbox::fetch_details(state.mailbox.as_ref(), &ids).await;
    Json(serde_json::json!({ "emails": emails })).into_response()
}

#[derive(Deserialize)]
struct SendMailRequest {
    recipient: String,
    subject: String,
    body: String,
}

async fn send_mail(State(state): State<AppState>, Json(req): Json<SendMailRequest>) -> Response {
    match state
        .mailbox
        .send_reply(&req.recipient, &req.subject, &req.body)
        .await
    {
        Ok(()) => {
            info!(to = %req.recipient, "Email sent via API");
            Json(serde_json::json!({ "status": "Email sent!" })).into_response()
        }
        Err(MailboxError::InvalidMessage(msg)) => error_body(StatusCode::BAD_REQUEST, msg),
        Err(e) => mailbox_failure("send_reply", e),
    }
}

// ── Sentiment ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PredictRequest {
    text: String,
}

async fn predict(State(state): State<AppState>, Json(req): Json<PredictRequest>) -> Response {
    match state.sentiment.predict(&req.text) {
        Ok(label) => Json(serde_json::json!({ "prediction": label })).into_response(),
        Err(SentimentError::NotLoaded) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": SentimentError::NotLoaded.to_string() })),
        )
            .into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn train(State(state): State<AppState>) -> Response {
    let service = Arc::clone(&state.sentiment);
    let outcome = match tokio::task::spawn_blocking(move || service.train()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Training task panicked");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "Training task failed");
        }
    };

    match outcome {
        Ok(TrainOutcome::Trained(summary)) => Json(serde_json::json!({
            "status": "Training completed.",
            "samples": summary.samples,
            "train_samples": summary.train_samples,
            "test_samples": summary.test_samples,
            "vocabulary": summary.vocabulary,
            "accuracy": summary.accuracy,
        }))
        .into_response(),
        Ok(TrainOutcome::AlreadyTrained) => {
            Json(serde_json::json!({ "status": "Already trained!" })).into_response()
        }
        Ok(TrainOutcome::InProgress) => {
            error_body(StatusCode::CONFLICT, "Training already in progress")
        }
        Err(e) => {
            error!(error = %e, "Training failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ── Assistant ───────────────────────────────────────────────────────────

async fn assistant_questions(
    State(state): State<AppState>,
    Json(profile): Json<BusinessProfile>,
) -> Response {
    let Some(generator) = state.generator else {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "No LLM backend configured");
    };
    match responder::generate_questions(generator.as_ref(), &profile).await {
        Ok(questions) => Json(serde_json::json!({ "questions": questions })).into_response(),
        Err(e) => {
            warn!(error = %e, "Question generation failed");
            error_body(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn assistant_prompt(Json(profile): Json<BusinessProfile>) -> impl IntoResponse {
    Json(serde_json::json!({ "prompt": responder::system_prompt(&profile) }))
}

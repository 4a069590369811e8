use std::sync::Arc;

use inbox_responder::config::{ReplyMode, ServiceConfig};
use inbox_responder::error::ConfigError;
use inbox_responder::http::{AppState, router};
use inbox_responder::inbox::InboxSupervisor;
use inbox_responder::llm::{LlmConfig, TextGenerator, create_generator};
use inbox_responder::mailbox::{GmailClient, GmailConfig, MailboxClient};
use inbox_responder::responder::{
    BusinessProfile, GeneratorResponder, Responder, SentimentResponder, StaticResponder,
};
use inbox_responder::sentiment::SentimentService;

#[tokio::main]
async fn main() -> inbox_responder::error::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;

    let gmail_config = GmailConfig::from_env().inspect_err(|_| {
        eprintln!("  export GMAIL_CLIENT_ID=... GMAIL_CLIENT_SECRET=... GMAIL_REFRESH_TOKEN=...");
    })?;
    let mailbox: Arc<dyn MailboxClient> = Arc::new(GmailClient::new(gmail_config)?);

    // Sentiment model is optional at startup; /sent/train/ builds it
    let sentiment_config = config.sentiment.clone();
    let sentiment =
        Arc::new(tokio::task::spawn_blocking(move || SentimentService::load(sentiment_config)).await?);

    // The LLM backend is optional unless replies are generated
    let llm_config = match LlmConfig::from_env() {
        Ok(llm) => Some(llm),
        Err(e) if config.reply_mode == ReplyMode::Generator => return Err(e.into()),
        Err(ConfigError::MissingEnvVar(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let generator: Option<Arc<dyn TextGenerator>> =
        llm_config.as_ref().map(create_generator).transpose()?;

    let responder: Arc<dyn Responder> = match (config.reply_mode, &generator, &llm_config) {
        (ReplyMode::Generator, Some(generator), Some(llm)) => {
            let profile = BusinessProfile::load(&llm.profile_path)?;
            Arc::new(GeneratorResponder::new(
                Arc::clone(generator),
                &profile,
                llm.timeout,
            ))
        }
        (ReplyMode::Sentiment, _, _) => Arc::new(SentimentResponder::new(Arc::clone(&sentiment))),
        _ => Arc::new(StaticResponder::default()),
    };

    eprintln!("📬 Inbox Responder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}", config.http_port);
    eprintln!(
        "   Loop: every {}s, batch {}, label '{}'",
        config.processor.poll_interval.as_secs(),
        config.processor.batch_size,
        config.processor.label_name
    );
    eprintln!("   Replies: {:?}", config.reply_mode);
    eprintln!(
        "   Sentiment model: {}",
        if sentiment.is_loaded() { "loaded" } else { "not trained" }
    );
    match &generator {
        Some(g) => eprintln!("   LLM: {}", g.model_name()),
        None => eprintln!("   LLM: not configured"),
    }
    eprintln!("   POST /gmail/process_incoming_emails/ to start the loop.\n");

    let supervisor = Arc::new(InboxSupervisor::new(
        Arc::clone(&mailbox),
        responder,
        config.processor.clone(),
    ));

    let app = router(AppState {
        mailbox,
        supervisor: Arc::clone(&supervisor),
        sentiment,
        generator,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    tracing::info!(port = config.http_port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    eprintln!("\nShutting down...");
    supervisor.stop().await;

    Ok(())
}

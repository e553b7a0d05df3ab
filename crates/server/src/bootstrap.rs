use std::sync::Arc;

use axum::Router;
use mentionbot_agent::{build_llm_client, ChatService, LlmError};
use mentionbot_core::config::{AppConfig, ConfigError};
use mentionbot_slack::{
    EventDispatcher, InFlight, MentionHandler, SignatureVerifier, SlackWebResponder,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    health::{self, HealthState},
    webhook::{self, WebhookState},
};

pub struct Application {
    pub config: AppConfig,
    pub dispatcher: Arc<EventDispatcher>,
    pub verifier: Option<Arc<SignatureVerifier>>,
    pub in_flight: InFlight,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("chat client setup failed: {0}")]
    ChatClient(#[source] LlmError),
}

impl Application {
    /// Health plus the Events API webhook mounted at `server.events_path`.
    pub fn router(&self) -> Router {
        let webhook_state =
            WebhookState::new(Arc::clone(&self.dispatcher), self.verifier.clone());
        let health_state =
            HealthState::new(self.dispatcher.handler_count(), self.verifier.is_some());

        health::router(health_state)
            .merge(webhook::router(&self.config.server.events_path, webhook_state))
    }
}

/// Wires the chat client, Slack responder and mention handler. The config is
/// validated again so hand-built configs fail the same way loaded ones do.
pub fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    config.validate()?;

    let client = build_llm_client(&config.llm).map_err(BootstrapError::ChatClient)?;
    let chat = ChatService::from_config(client, &config.llm);
    info!(
        event_name = "system.bootstrap.chat_ready",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        base_url = %config.llm.effective_base_url(),
        "chat client initialized"
    );

    let responder =
        SlackWebResponder::new(config.slack.api_base_url.clone(), config.slack.bot_token.clone());
    let mentions = MentionHandler::new(chat, Arc::new(responder));
    let in_flight = mentions.in_flight();
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(mentions);

    let verifier = config
        .slack
        .signing_secret
        .clone()
        .map(|secret| Arc::new(SignatureVerifier::new(secret)));
    if verifier.is_none() {
        warn!(
            event_name = "system.bootstrap.signature_disabled",
            correlation_id = "bootstrap",
            "slack.signing_secret is not set; inbound requests will not be verified"
        );
    }

    info!(
        event_name = "system.bootstrap.complete",
        correlation_id = "bootstrap",
        handlers = dispatcher.handler_count(),
        events_path = %config.server.events_path,
        "application bootstrap complete"
    );

    Ok(Application { config, dispatcher: Arc::new(dispatcher), verifier, in_flight })
}

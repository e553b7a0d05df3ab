use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use mentionbot_agent::{extract_response, ChatService};
use mentionbot_core::{errors::error_message, text::remove_mention};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    events::{
        EventContext, EventHandler, EventHandlerError, HandlerResult, SlackEnvelope, SlackEvent,
        SlackEventType,
    },
    responder::{SendError, SlackResponder},
};

pub const PLACEHOLDER_TEXT: &str = "Coming up with a response...";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MentionStage {
    Received,
    Acknowledged,
    PlaceholderSent,
    GenerationComplete,
    ResponseSent,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MentionOutcome {
    /// The generated answer reached the thread.
    Answered,
    /// Generation failed and the error text reached the thread.
    ErrorReported,
    /// A reply could not be delivered; nothing further is attempted.
    DeliveryFailed { stage: MentionStage },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MentionRequest {
    pub event: SlackEvent,
    pub channel_id: String,
    pub thread_ts: String,
    pub text: String,
    pub history_key: String,
}

impl MentionRequest {
    pub fn from_event(event: &SlackEvent) -> Self {
        Self {
            channel_id: event.channel().to_string(),
            thread_ts: event.thread_ts().to_string(),
            text: remove_mention(event.text()),
            history_key: event.history_key(),
            event: event.clone(),
        }
    }
}

/// Counts reply chains that are still running, so shutdown can wait for them.
#[derive(Clone, Debug, Default)]
pub struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Waits until no chain is running or `within` elapses. Returns the
    /// number of chains still running.
    pub async fn drain(&self, within: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let running = self.count();
            if running == 0 || tokio::time::Instant::now() >= deadline {
                return running;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn enter(&self) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(Arc::clone(&self.0))
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Answers `app_mention` events: acknowledges right away, then posts a
/// placeholder, generates a reply and posts it, strictly in that order, on a
/// background task.
pub struct MentionHandler {
    chat: ChatService,
    responder: Arc<dyn SlackResponder>,
    in_flight: InFlight,
}

impl MentionHandler {
    pub fn new(chat: ChatService, responder: Arc<dyn SlackResponder>) -> Self {
        Self { chat, responder, in_flight: InFlight::default() }
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    pub fn spawn_response(
        &self,
        ctx: EventContext,
        request: MentionRequest,
    ) -> JoinHandle<MentionOutcome> {
        let chain = ReplyChain {
            chat: self.chat.clone(),
            responder: Arc::clone(&self.responder),
            ctx,
            request,
        };
        let guard = self.in_flight.enter();
        tokio::spawn(async move {
            let outcome = chain.run().await;
            drop(guard);
            outcome
        })
    }
}

#[async_trait]
impl EventHandler for MentionHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppMention
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AppMention(mention) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        if let Some(bot_id) = mention.bot_id.as_deref() {
            debug!(
                event_name = "mention.ignored_bot",
                correlation_id = %ctx.correlation_id,
                bot_id,
                "ignoring app_mention authored by a bot"
            );
            return Ok(HandlerResult::Ignored);
        }

        let request = MentionRequest::from_event(&envelope.event);
        info!(
            event_name = "mention.received",
            stage = ?MentionStage::Received,
            correlation_id = %ctx.correlation_id,
            user_id = %mention.user,
            channel_id = %request.channel_id,
            thread_ts = %request.thread_ts,
            history_key = %request.history_key,
            text = %request.text,
            "received app_mention event"
        );

        let correlation_id = ctx.correlation_id.clone();
        let history_key = request.history_key.clone();
        // Detached; `InFlight` keeps track of the chain until it finishes.
        let _chain = self.spawn_response(ctx.clone(), request);

        info!(
            event_name = "mention.acknowledged",
            stage = ?MentionStage::Acknowledged,
            correlation_id = %correlation_id,
            history_key = %history_key,
            "acknowledged app_mention; reply continues in background"
        );
        Ok(HandlerResult::Acknowledged)
    }
}

struct ReplyChain {
    chat: ChatService,
    responder: Arc<dyn SlackResponder>,
    ctx: EventContext,
    request: MentionRequest,
}

impl ReplyChain {
    async fn run(self) -> MentionOutcome {
        let request = &self.request;
        let correlation_id = self.ctx.correlation_id.as_str();
        let history_key = request.history_key.as_str();

        match self.send(PLACEHOLDER_TEXT).await {
            Ok(()) => info!(
                event_name = "mention.placeholder_sent",
                stage = ?MentionStage::PlaceholderSent,
                correlation_id,
                history_key,
                "sent placeholder reply"
            ),
            Err(send_error) => warn!(
                event_name = "mention.placeholder_failed",
                correlation_id,
                history_key,
                error = %send_error,
                "failed to send placeholder reply; continuing with generation"
            ),
        }

        let reply = match self.chat.generate(&request.text).await {
            Ok(response) => {
                info!(
                    event_name = "mention.generation_complete",
                    stage = ?MentionStage::GenerationComplete,
                    correlation_id,
                    history_key,
                    generations = response.generations.len(),
                    "chat generation finished"
                );
                extract_response(&response)
            }
            Err(generation_error) => {
                error!(
                    event_name = "mention.generation_failed",
                    stage = ?MentionStage::Failed,
                    correlation_id,
                    history_key,
                    error = %generation_error,
                    "chat generation failed; reporting error to thread"
                );
                return self.report_error(&error_message(&generation_error)).await;
            }
        };

        match self.send(&reply).await {
            Ok(()) => {
                info!(
                    event_name = "mention.response_sent",
                    stage = ?MentionStage::ResponseSent,
                    correlation_id,
                    history_key,
                    "sent both responses to slack"
                );
                MentionOutcome::Answered
            }
            Err(send_error) => {
                error!(
                    event_name = "mention.response_failed",
                    stage = ?MentionStage::Failed,
                    correlation_id,
                    history_key,
                    error = %send_error,
                    "failed to send generated reply"
                );
                MentionOutcome::DeliveryFailed { stage: MentionStage::GenerationComplete }
            }
        }
    }

    async fn report_error(&self, message: &str) -> MentionOutcome {
        let correlation_id = self.ctx.correlation_id.as_str();
        let history_key = self.request.history_key.as_str();

        match self.send(message).await {
            Ok(()) => {
                info!(
                    event_name = "mention.error_reported",
                    correlation_id,
                    history_key,
                    "sent error message to slack"
                );
                MentionOutcome::ErrorReported
            }
            Err(send_error) => {
                error!(
                    event_name = "mention.error_report_failed",
                    correlation_id,
                    history_key,
                    error = %send_error,
                    "failed to send error message to slack"
                );
                MentionOutcome::DeliveryFailed { stage: MentionStage::Failed }
            }
        }
    }

    async fn send(&self, text: &str) -> Result<(), SendError> {
        self.responder
            .send_response(&self.ctx, &self.request.event, &self.request.history_key, text)
            .await
    }
}

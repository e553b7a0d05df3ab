use thiserror::Error;
use tracing::{info, warn};

use crate::events::{
    parse_events_api_payload, DispatchError, EventContext, EventDispatcher, EventError,
    EventsApiPayload, HandlerResult,
};

/// What the webhook should answer after a request was processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackAck {
    /// `url_verification` handshake; the challenge is echoed back.
    Challenge(String),
    Dispatched { event_id: String, result: HandlerResult },
    /// Envelope kinds other than `event_callback` (e.g. `app_rate_limited`).
    Skipped { kind: String },
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ProcessError {
    /// Unsupported event types are acknowledged so Slack does not redeliver
    /// them; everything else is a genuine failure.
    pub fn is_acknowledgeable(&self) -> bool {
        matches!(self, Self::Event(EventError::Unsupported { .. }))
    }
}

/// Parses a raw, already verified Events API body and hands any event to the
/// dispatcher. Handlers return as soon as their work is scheduled.
pub async fn process_slack_request(
    dispatcher: &EventDispatcher,
    body: &[u8],
    ctx: &EventContext,
) -> Result<SlackAck, ProcessError> {
    let payload = match parse_events_api_payload(body) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(
                event_name = "ingress.slack.event_rejected",
                correlation_id = %ctx.correlation_id,
                error = %error,
                "could not parse slack request"
            );
            return Err(error.into());
        }
    };

    match payload {
        EventsApiPayload::UrlVerification { challenge } => {
            info!(
                event_name = "ingress.slack.url_verification",
                correlation_id = %ctx.correlation_id,
                "answering url verification challenge"
            );
            Ok(SlackAck::Challenge(challenge))
        }
        EventsApiPayload::EventCallback(envelope) => {
            info!(
                event_name = "ingress.slack.event_received",
                correlation_id = %ctx.correlation_id,
                event_id = %envelope.event_id,
                event_type = ?envelope.event.event_type(),
                channel_id = %envelope.event.channel(),
                thread_ts = %envelope.event.thread_ts(),
                "received slack event"
            );
            let result = dispatcher.dispatch(&envelope, ctx).await?;
            Ok(SlackAck::Dispatched { event_id: envelope.event_id, result })
        }
        EventsApiPayload::Other { kind } => {
            info!(
                event_name = "ingress.slack.skipped",
                correlation_id = %ctx.correlation_id,
                kind = %kind,
                "ignoring slack request kind"
            );
            Ok(SlackAck::Skipped { kind })
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{process_slack_request, ProcessError, SlackAck};
    use crate::events::{
        EventContext, EventDispatcher, EventError, EventHandler, EventHandlerError,
        HandlerResult, SlackEnvelope, SlackEventType,
    };

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        fn event_type(&self) -> SlackEventType {
            SlackEventType::AppMention
        }

        async fn handle(
            &self,
            _envelope: &SlackEnvelope,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            Err(EventHandlerError::Mention("boom".to_string()))
        }
    }

    const MENTION_BODY: &[u8] = br#"{"type":"event_callback","event_id":"Ev1",
        "event":{"type":"app_mention","channel":"C1","user":"U1","text":"<@B> hi","ts":"1"}}"#;

    #[tokio::test]
    async fn url_verification_returns_challenge() {
        let ack = process_slack_request(
            &EventDispatcher::new(),
            br#"{"type":"url_verification","challenge":"xyz"}"#,
            &EventContext::default(),
        )
        .await
        .expect("challenge");

        assert_eq!(ack, SlackAck::Challenge("xyz".to_string()));
    }

    #[tokio::test]
    async fn events_without_handler_are_ignored() {
        let ack =
            process_slack_request(&EventDispatcher::new(), MENTION_BODY, &EventContext::default())
                .await
                .expect("dispatch");

        assert_eq!(
            ack,
            SlackAck::Dispatched { event_id: "Ev1".to_string(), result: HandlerResult::Ignored }
        );
    }

    #[tokio::test]
    async fn unsupported_events_are_acknowledgeable_errors() {
        let error = process_slack_request(
            &EventDispatcher::new(),
            br#"{"type":"event_callback","event":{"type":"reaction_added","user":"U1"}}"#,
            &EventContext::default(),
        )
        .await
        .expect_err("unsupported");

        assert!(matches!(
            error,
            ProcessError::Event(EventError::Unsupported { ref event_type })
                if event_type == "reaction_added"
        ));
        assert!(error.is_acknowledgeable());
    }

    #[tokio::test]
    async fn handler_failures_surface_as_dispatch_errors() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(FailingHandler);

        let error = process_slack_request(&dispatcher, MENTION_BODY, &EventContext::default())
            .await
            .expect_err("handler fails");

        assert!(matches!(error, ProcessError::Dispatch(_)));
        assert!(!error.is_acknowledgeable());
        assert_eq!(error.to_string(), "mention handler failure: boom");
    }

    #[tokio::test]
    async fn other_envelope_kinds_are_skipped() {
        let ack = process_slack_request(
            &EventDispatcher::new(),
            br#"{"type":"app_rate_limited","minute_rate_limited":1}"#,
            &EventContext::default(),
        )
        .await
        .expect("skipped");

        assert_eq!(ack, SlackAck::Skipped { kind: "app_rate_limited".to_string() });
    }
}

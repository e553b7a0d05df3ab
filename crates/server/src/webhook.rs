use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use mentionbot_slack::{
    process_slack_request,
    signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER},
    EventContext, EventDispatcher, ProcessError, SignatureVerifier, SlackAck,
};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const RETRY_NUM_HEADER: &str = "x-slack-retry-num";
const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

#[derive(Clone)]
pub struct WebhookState {
    dispatcher: Arc<EventDispatcher>,
    verifier: Option<Arc<SignatureVerifier>>,
}

impl WebhookState {
    pub fn new(dispatcher: Arc<EventDispatcher>, verifier: Option<Arc<SignatureVerifier>>) -> Self {
        Self { dispatcher, verifier }
    }
}

pub fn router(events_path: &str, state: WebhookState) -> Router {
    Router::new().route(events_path, post(slack_events)).with_state(state)
}

/// Events API endpoint. Always answers before any reply is generated; the
/// mention handler continues on its own task.
pub async fn slack_events(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = EventContext { correlation_id: Uuid::new_v4().to_string() };

    if let Some(verifier) = &state.verifier {
        let verified = verifier.verify(
            header(&headers, TIMESTAMP_HEADER),
            header(&headers, SIGNATURE_HEADER),
            &body,
            Utc::now().timestamp(),
        );
        if let Err(signature_error) = verified {
            warn!(
                event_name = "ingress.slack.signature_rejected",
                correlation_id = %ctx.correlation_id,
                error = %signature_error,
                "rejected slack request with invalid signature"
            );
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    if let Some(retry_num) = header(&headers, RETRY_NUM_HEADER) {
        info!(
            event_name = "ingress.slack.retry_acknowledged",
            correlation_id = %ctx.correlation_id,
            retry_num,
            retry_reason = header(&headers, RETRY_REASON_HEADER).unwrap_or("unknown"),
            "acknowledging slack retry without reprocessing"
        );
        return StatusCode::OK.into_response();
    }

    match process_slack_request(&state.dispatcher, &body, &ctx).await {
        Ok(SlackAck::Challenge(challenge)) => {
            (StatusCode::OK, Json(json!({ "challenge": challenge }))).into_response()
        }
        Ok(SlackAck::Dispatched { .. } | SlackAck::Skipped { .. }) => {
            StatusCode::OK.into_response()
        }
        Err(process_error) => failure_response(&ctx, &process_error),
    }
}

fn failure_response(ctx: &EventContext, process_error: &ProcessError) -> Response {
    if process_error.is_acknowledgeable() {
        warn!(
            event_name = "ingress.slack.event_unsupported",
            correlation_id = %ctx.correlation_id,
            error = %process_error,
            "acknowledging unsupported slack event"
        );
        return StatusCode::OK.into_response();
    }

    match process_error {
        ProcessError::Event(_) => StatusCode::BAD_REQUEST.into_response(),
        ProcessError::Dispatch(_) => {
            error!(
                event_name = "ingress.slack.dispatch_failed",
                correlation_id = %ctx.correlation_id,
                error = %process_error,
                "slack event dispatch failed"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::Utc;
    use mentionbot_slack::{
        events::{
            EventContext, EventDispatcher, EventHandler, EventHandlerError, HandlerResult,
            SlackEnvelope, SlackEventType,
        },
        signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER},
        SignatureVerifier,
    };
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use super::{router, WebhookState, RETRY_NUM_HEADER};

    const MENTION_BODY: &str = r#"{"type":"event_callback","event_id":"Ev1","event":{"type":"app_mention","channel":"C1","user":"U1","text":"<@B> hi","ts":"100"}}"#;
    const SIGNING_SECRET: &str = "test-signing-secret";

    #[derive(Default)]
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn event_type(&self) -> SlackEventType {
            SlackEventType::AppMention
        }

        async fn handle(
            &self,
            envelope: &SlackEnvelope,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            if self.fail {
                return Err(EventHandlerError::Mention("handler exploded".to_string()));
            }
            self.seen.lock().await.push(envelope.event.history_key());
            Ok(HandlerResult::Acknowledged)
        }
    }

    fn app(handler: RecordingHandler, signed: bool) -> Router {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(handler);
        let verifier = signed
            .then(|| Arc::new(SignatureVerifier::new(SIGNING_SECRET.to_string().into())));
        router("/slack/events", WebhookState::new(Arc::new(dispatcher), verifier))
    }

    fn request() -> axum::http::request::Builder {
        Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
    }

    fn signed_request(body: &str) -> Request<Body> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = SignatureVerifier::new(SIGNING_SECRET.to_string().into())
            .sign(&timestamp, body.as_bytes())
            .expect("sign");
        request()
            .header(TIMESTAMP_HEADER, timestamp)
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn answers_url_verification_challenge() {
        let body = r#"{"type":"url_verification","challenge":"3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"}"#;
        let response = app(RecordingHandler::default(), true)
            .oneshot(signed_request(body))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(
            parsed["challenge"],
            "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"
        );
    }

    #[tokio::test]
    async fn dispatches_signed_mentions() {
        let handler = RecordingHandler::default();
        let seen = handler.seen.clone();

        let response =
            app(handler, true).oneshot(signed_request(MENTION_BODY)).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*seen.lock().await, vec!["C1-100".to_string()]);
    }

    #[tokio::test]
    async fn rejects_unsigned_requests_when_secret_is_configured() {
        let handler = RecordingHandler::default();
        let seen = handler.seen.clone();
        let unsigned = request().body(Body::from(MENTION_BODY)).expect("request");

        let response = app(handler, true).oneshot(unsigned).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn accepts_unsigned_requests_without_secret() {
        let handler = RecordingHandler::default();
        let seen = handler.seen.clone();
        let unsigned = request().body(Body::from(MENTION_BODY)).expect("request");

        let response = app(handler, false).oneshot(unsigned).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn acknowledges_retries_without_dispatching() {
        let handler = RecordingHandler::default();
        let seen = handler.seen.clone();
        let retry = request()
            .header(RETRY_NUM_HEADER, "1")
            .header("x-slack-retry-reason", "http_timeout")
            .body(Body::from(MENTION_BODY))
            .expect("request");

        let response = app(handler, false).oneshot(retry).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn acknowledges_unsupported_event_types() {
        let body = r#"{"type":"event_callback","event":{"type":"reaction_added","user":"U1"}}"#;
        let unsupported = request().body(Body::from(body)).expect("request");

        let response = app(RecordingHandler::default(), false)
            .oneshot(unsupported)
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        let malformed = request().body(Body::from("nope")).expect("request");

        let response = app(RecordingHandler::default(), false)
            .oneshot(malformed)
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dispatch_failures_are_server_errors() {
        let handler = RecordingHandler { fail: true, ..RecordingHandler::default() };
        let failing = request().body(Body::from(MENTION_BODY)).expect("request");

        let response = app(handler, false).oneshot(failing).await.expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::middleware::AppError;
use crate::services::orchestrator::{Intake, Orchestrator};

/// Header Slack sets on redelivered events.
pub const RETRY_HEADER: &str = "x-slack-retry-num";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Parent of every in-flight question; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

/// Receive a Slack Events API delivery.
///
/// Answers quickly and runs the question in the background; only a malformed
/// payload gets a non-200 status.
pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let retry_num = headers.get(RETRY_HEADER).and_then(|v| v.to_str().ok());

    let intake = state.orchestrator.receive(&body, retry_num)?;
    let status = match intake {
        Intake::Challenge(challenge) => {
            return Ok(([(header::CONTENT_TYPE, "text/plain")], challenge).into_response());
        }
        Intake::Ignored(status) => status,
        Intake::Rejected { channel, message } => {
            let orchestrator = state.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator.notify(&channel, &message).await;
            });
            "rejected input"
        }
        Intake::Accepted(question) => {
            let orchestrator = state.orchestrator.clone();
            let cancel = state.shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.handle_question(question, cancel).await {
                    tracing::error!("Question processing aborted: {}", e);
                }
            });
            "accepted"
        }
    };

    Ok(Json(serde_json::json!({ "status": status })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::create_router;
    use crate::models::{ExecutionState, RegionTag};
    use crate::services::engine::EngineStatus;
    use crate::test_support::{harness, MockEngine, MockGenerator, MockNotifier};
    use axum::{body::Body, http::Request, http::StatusCode, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<MockNotifier>) {
        let engine = MockEngine::new(RegionTag::ApNortheast1).with_statuses(vec![Ok(EngineStatus {
            state: ExecutionState::Succeeded,
            reason: None,
        })]);
        let h = harness(MockGenerator::new("SELECT 1"), engine).await;
        let state = AppState {
            orchestrator: Arc::new(h.orchestrator),
            shutdown: CancellationToken::new(),
        };
        (create_router(state), h.notifier)
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_url_verification() {
        let (app, _) = app().await;
        let response = app.oneshot(post(r#"{"type":"url_verification","challenge":"xyz"}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(body_text(response).await, "xyz");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (app, _) = app().await;
        let response = app.oneshot(post("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_retries_are_acknowledged() {
        let (app, notifier) = app().await;
        let mut request = post(r#"{"type":"event_callback","event":{"type":"message","text":"top ips","channel":"C1"}}"#);
        request.headers_mut().insert(RETRY_HEADER, "1".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("retry ignored"));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_accepted_question_is_answered_in_background() {
        let (app, notifier) = app().await;
        let body = r#"{"type":"event_callback","event_id":"Ev1","event":{"type":"app_mention","text":"<@U_BOT> top blocked ips","user":"U1","channel":"C1"}}"#;

        let response = app.oneshot(post(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("accepted"));

        for _ in 0..100 {
            if !notifier.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "C1");
        assert!(sent[0].1.starts_with("*WAF Log Search Result*"));
    }
}

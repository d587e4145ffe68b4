//! Chat endpoints.
//!
//! - `POST /chat`                     submit a message (202, or 200 for a known id)
//! - `GET  /chat/response/{id}`       poll status, response and thinking log
//! - `GET  /chat/stream/{id}?after=N` SSE progress from sequence `N`
//! - `POST /chat/feedback`            thumbs up/down on a completed turn
//! - `GET  /chat/feedback/{id}`       the recorded feedback
//! - `GET  /threads/{id}`             the persisted thread

use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{error, info};

use pursuit_agent::{ChatService, PollResult, ServiceError, SubmitReceipt, SubmitRequest};
use pursuit_core::store::{Feedback, Rating};
use pursuit_core::thread::{CorrelationId, Thread, ThreadId};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A [`ServiceError`] rendered as a status code and JSON body.
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Store(e) => {
                error!(error = %e, "Store failure behind a request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

pub fn chat_router(service: ChatService) -> Router {
    Router::new()
        .route("/chat", post(submit_handler))
        .route("/chat/response/{id}", get(poll_handler))
        .route("/chat/stream/{id}", get(stream_handler))
        .route("/chat/feedback", post(feedback_handler))
        .route("/chat/feedback/{id}", get(get_feedback_handler))
        .route("/threads/{id}", get(thread_handler))
        .with_state(service)
}

async fn submit_handler(
    State(service): State<ChatService>,
    Json(payload): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitReceipt>), ApiError> {
    info!(message_len = payload.message.len(), retry = payload.retry_of.is_some(), "Chat submit");
    let receipt = service.submit(payload).await?;
    let status = if receipt.duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(receipt)))
}

async fn poll_handler(
    State(service): State<ChatService>,
    Path(id): Path<String>,
) -> Result<Json<PollResult>, ApiError> {
    Ok(Json(service.poll(&CorrelationId::from(id)).await?))
}

#[derive(Debug, Default, Deserialize)]
struct StreamParams {
    #[serde(default)]
    after: Option<u64>,
}

async fn stream_handler(
    State(service): State<ChatService>,
    Path(id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    // A reconnecting EventSource sends the last id it saw
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let after = params.after.max(last_event_id).unwrap_or(0);

    let events = service.stream(&CorrelationId::from(id), after).await?;
    let stream = events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default()
            .id(event.seq.to_string())
            .event(event.kind.as_str())
            .data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub correlation_id: String,
    pub rating: Rating,
    #[serde(default)]
    pub comment: Option<String>,
}

async fn feedback_handler(
    State(service): State<ChatService>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<StatusCode, ApiError> {
    service
        .feedback(&CorrelationId::from(payload.correlation_id), payload.rating, payload.comment)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_feedback_handler(
    State(service): State<ChatService>,
    Path(id): Path<String>,
) -> Result<Json<Feedback>, ApiError> {
    service
        .feedback_for(&CorrelationId::from(id.as_str()))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError(ServiceError::NotFound(format!("feedback for {id}"))))
}

async fn thread_handler(
    State(service): State<ChatService>,
    Path(id): Path<String>,
) -> Result<Json<Thread>, ApiError> {
    Ok(Json(service.thread(&ThreadId::from(id)).await?))
}

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, Utc};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    chatbot::{self, ResponderOutcome},
    dispatcher,
    error::AppError,
    recorder::{self, RecordOutcome},
    types::AppState,
    webhook::WebhookEnvelope,
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/evolution", post(evolution_webhook))
        .route("/webhooks/chatbot", post(chatbot_webhook))
        .route(
            "/jobs/process-scheduled-messages",
            post(process_scheduled_messages),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

fn parse_envelope(body: &[u8]) -> Result<WebhookEnvelope, AppError> {
    serde_json::from_slice::<WebhookEnvelope>(body)
        .map_err(|e| AppError::BadRequest(format!("invalid webhook payload: {e}")))
}

async fn evolution_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let envelope = parse_envelope(&body)?;
    match recorder::record_inbound(state.store.as_ref(), &envelope).await? {
        RecordOutcome::Ignored => Ok(Json(json!({
            "success": true,
            "message": "Event ignored"
        }))),
        RecordOutcome::Recorded { message_id, inserted } => {
            let message = if inserted {
                "Message saved"
            } else {
                "Message updated"
            };
            Ok(Json(json!({
                "success": true,
                "message": message,
                "messageId": message_id
            })))
        }
    }
}

async fn chatbot_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let envelope = parse_envelope(&body)?;
    let outcome = chatbot::respond(&state, &envelope, Local::now().time()).await?;
    let mut response = json!({ "success": true, "message": outcome.describe() });
    if let ResponderOutcome::Replied { reply, .. } = &outcome {
        response["reply"] = json!(reply.text);
        response["source"] = json!(reply.source);
    }
    Ok(Json(response))
}

async fn process_scheduled_messages(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let report = dispatcher::dispatch_due(&state, Utc::now()).await?;
    let unrecorded = report.unrecorded();
    if unrecorded > 0 {
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": format!("{unrecorded} scheduled message(s) could not be updated"),
                "processed": report.processed,
                "results": report.results
            })),
        ));
    }
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "processed": report.processed,
            "results": report.results
        })),
    ))
}

use crate::app::AppState;
use crate::error::{SyncError, SyncResult};
use crate::models::call_recording::{self, Column};
use crate::webhook::WebhookOutcome;
use crate::{backup::BackupStatus, version};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{json, Value};
use tracing::info;

pub mod middleware;

use middleware::request_log::SyncTrace;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/telephony", post(telephony_webhook))
        .route("/api/dispositions", post(submit_disposition))
        .route("/api/backup/run", post(run_backup))
        .route("/recordings/{call_id}", get(stream_recording))
}

/// Parses the body ourselves so malformed JSON gets the same error shape as
/// every other failure.
fn parse_json(body: &[u8]) -> SyncResult<Value> {
    serde_json::from_slice(body).map_err(|e| SyncError::InvalidPayload(e.to_string()))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": version::get_short_version() }))
}

fn webhook_trace(outcome: &WebhookOutcome) -> SyncTrace {
    match outcome {
        WebhookOutcome::Skipped { call_id } => {
            let trace = SyncTrace::new("skipped");
            match call_id {
                Some(call_id) => trace.with_call_id(call_id.as_str()),
                None => trace,
            }
        }
        WebhookOutcome::Processed {
            call_id, warnings, ..
        } => SyncTrace::new("processed")
            .with_call_id(call_id.as_str())
            .with_warnings(warnings.len()),
    }
}

async fn telephony_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> SyncResult<(Extension<SyncTrace>, Json<Value>)> {
    let payload = parse_json(&body)?;
    let outcome = state.reconciler.process(payload).await?;
    Ok((Extension(webhook_trace(&outcome)), Json(outcome.to_json())))
}

async fn submit_disposition(
    State(state): State<AppState>,
    body: Bytes,
) -> SyncResult<(Extension<SyncTrace>, Json<Value>)> {
    let payload = parse_json(&body)?;
    let outcome = state.dispositions.submit(payload).await?;
    let trace = SyncTrace::new(if outcome.contact_created {
        "contact_created"
    } else {
        "contact_updated"
    })
    .with_warnings(outcome.warnings.len());
    Ok((Extension(trace), Json(outcome.to_json())))
}

async fn run_backup(
    State(state): State<AppState>,
) -> SyncResult<(Extension<SyncTrace>, Json<Value>)> {
    let worker = state.backup_worker()?;
    let report = worker
        .run_batch()
        .await
        .map_err(|e| SyncError::upstream("recording backup batch", e))?;
    Ok((
        Extension(SyncTrace::new("backup_batch")),
        Json(json!({ "success": true, "report": report })),
    ))
}

fn audio_content_type(file_id: &str) -> &'static str {
    match file_id.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "wav" => "audio/wav",
        Some(ext) if ext == "ogg" => "audio/ogg",
        Some(ext) if ext == "m4a" => "audio/mp4",
        Some(ext) if ext == "webm" => "audio/webm",
        Some(ext) if ext == "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

async fn stream_recording(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> SyncResult<Response> {
    let not_found = || SyncError::NotFound(format!("recording for call {}", call_id));
    let storage = state
        .storage
        .as_ref()
        .ok_or(SyncError::NotConfigured("recording storage"))?;
    let row = call_recording::Entity::find()
        .filter(Column::CallId.eq(call_id.as_str()))
        .filter(Column::BackupStatus.eq(BackupStatus::Uploaded.as_str()))
        .one(&state.db)
        .await?
        .ok_or_else(not_found)?;
    let file_id = row.storage_file_id.ok_or_else(not_found)?;
    let object = storage
        .read_stream(&file_id)
        .await
        .map_err(|e| SyncError::upstream("recording read", e))?;
    info!(call_id = %call_id, file_id = %file_id, size = object.size, "streaming recording");

    let filename = file_id.rsplit('/').next().unwrap_or(file_id.as_str()).to_string();
    Ok((
        Extension(SyncTrace::new("streamed").with_call_id(call_id.as_str())),
        [
            (header::CONTENT_TYPE, audio_content_type(&file_id).to_string()),
            (header::CONTENT_LENGTH, object.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(object.stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_content_type() {
        assert_eq!(audio_content_type("2026/01/a.MP3"), "audio/mpeg");
        assert_eq!(audio_content_type("a.wav"), "audio/wav");
        assert_eq!(audio_content_type("noext"), "application/octet-stream");
    }

    #[test]
    fn test_webhook_trace() {
        let skipped = WebhookOutcome::Skipped { call_id: None };
        assert_eq!(webhook_trace(&skipped), SyncTrace::new("skipped"));

        let processed = WebhookOutcome::Processed {
            call_id: "555001".to_string(),
            contact_id: "101".to_string(),
            engagement_id: "9001".to_string(),
            note_id: None,
            warnings: vec!["note write failed: HTTP 400".to_string()],
        };
        assert_eq!(
            webhook_trace(&processed),
            SyncTrace::new("processed")
                .with_call_id("555001")
                .with_warnings(1)
        );
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        assert!(matches!(parse_json(b"{"), Err(SyncError::InvalidPayload(_))));
        assert_eq!(parse_json(b"{\"a\":1}").unwrap()["a"], 1);
    }
}

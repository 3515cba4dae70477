use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use renewal_core::runtime::TriggerOutcome;
use renewal_core::ReminderError;
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    pub subscription_id: String,
}

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError(anyhow::anyhow!("task join error: {e}"))
}

/// POST /api/v1/workflows/subscription/reminder — start a reminder run.
///
/// 202 with `status: "accepted"` for a new run, 200 with
/// `status: "already_running"` when one is active for the subscription.
pub async fn trigger_reminder(
    State(app): State<AppState>,
    body: Result<Json<TriggerBody>, JsonRejection>,
) -> Result<(StatusCode, Json<TriggerOutcome>), AppError> {
    let Json(body) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    let runtime = app.runtime.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        runtime.trigger(&body.subscription_id, Utc::now())
    })
    .await
    .map_err(join_error)??;

    let status = match &outcome {
        TriggerOutcome::Accepted { .. } => {
            app.wake.notify_one();
            StatusCode::ACCEPTED
        }
        TriggerOutcome::AlreadyRunning { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// GET /api/v1/workflows — every run record, newest first.
pub async fn list_workflows(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let runtime = app.runtime.clone();
    let runs = tokio::task::spawn_blocking(move || runtime.runs())
        .await
        .map_err(join_error)??;
    Ok(Json(serde_json::json!(runs)))
}

/// GET /api/v1/workflows/{subscription_id} — run record plus journaled steps.
pub async fn get_workflow(
    State(app): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let runtime = app.runtime.clone();
    let result = tokio::task::spawn_blocking(move || {
        let record = runtime
            .status(&subscription_id)?
            .ok_or_else(|| ReminderError::RunNotFound(subscription_id.clone()))?;
        let steps = runtime.journal(&subscription_id)?;
        let mut value = serde_json::to_value(&record)?;
        value["steps"] = serde_json::json!(steps);
        Ok::<_, ReminderError>(value)
    })
    .await
    .map_err(join_error)??;

    Ok(Json(result))
}

/// DELETE /api/v1/workflows/{subscription_id} — request abort of the active run.
pub async fn cancel_workflow(
    State(app): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let runtime = app.runtime.clone();
    let record = tokio::task::spawn_blocking(move || runtime.cancel(&subscription_id, Utc::now()))
        .await
        .map_err(join_error)??;
    app.wake.notify_one();
    info!(subscription_id = %record.subscription_id, "abort requested over http");
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!(record))))
}

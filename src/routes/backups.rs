use crate::auth::Initiator;
use crate::error::AppError;
use crate::models::backup_record::BackupRecord;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/{id}", get(get_backup).delete(delete_backup))
        .route("/{id}/download", get(download_backup))
        .route("/{id}/restore", post(restore_backup))
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    initiator: Initiator,
) -> Result<(StatusCode, Json<BackupRecord>), AppError> {
    let record = state.orchestrator.create_backup(&initiator).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    initiator: Initiator,
) -> Result<Json<Vec<BackupRecord>>, AppError> {
    let records = state.orchestrator.list_backups(&initiator).await?;
    Ok(Json(records))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    initiator: Initiator,
    Path(id): Path<String>,
) -> Result<Json<BackupRecord>, AppError> {
    let record = state.orchestrator.get_backup(&initiator, &id).await?;
    Ok(Json(record))
}

async fn download_backup(
    State(state): State<Arc<AppState>>,
    initiator: Initiator,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (record, file) = state.orchestrator.download_backup(&initiator, &id).await?;

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);
    let disposition = format!("attachment; filename=\"{}\"", record.filename);

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    initiator: Initiator,
    Path(id): Path<String>,
) -> Result<Json<BackupRecord>, AppError> {
    let record = state.orchestrator.restore_from_backup(&initiator, &id).await?;
    Ok(Json(record))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    initiator: Initiator,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.orchestrator.delete_backup(&initiator, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! Thin HTTP adapters (C10) over the batch lifecycle: decode inputs, call
//! into the tracker/ingest/progress components, map errors to status
//! codes. No business logic lives here.

use axum::{
    Json,
    body::{Body, Bytes, to_bytes},
    extract::{FromRequest, Multipart, Path, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::archive;
use crate::errors::{AppError, AppResult};
use crate::image_validation::validate_magic_bytes;
use crate::model::BatchResult;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct StartBatchForm {
    pub client_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartBatchResponse {
    pub batch_id: String,
}

pub async fn start_batch(
    State(state): State<AppState>,
    request: Request<Body>,
) -> AppResult<impl IntoResponse> {
    let form = decode_form::<StartBatchForm>(request).await.unwrap_or(StartBatchForm {
        client_id: None,
        email: None,
    });

    let batch_id = state.tracker.create().await?;
    if form.client_id.is_some() || form.email.is_some() {
        // Batches start in `created` with no metadata (`Batch::new` doesn't
        // know client_id/email yet), so attach them as a separate, durable
        // write right away rather than forcing an init call for clients
        // that only ever submit anonymously.
        state.tracker.set_metadata(&batch_id, form.client_id.clone(), form.email.clone()).await?;
    }

    Ok((StatusCode::CREATED, Json(StartBatchResponse { batch_id })))
}

#[derive(Debug, Deserialize)]
pub struct InitBatchRequest {
    pub batch_id: String,
    pub client_id: Option<String>,
    pub total: u64,
}

pub async fn init_batch(
    State(state): State<AppState>,
    Json(req): Json<InitBatchRequest>,
) -> AppResult<impl IntoResponse> {
    state.tracker.init(&req.batch_id, req.client_id, req.total).await?;
    Ok(StatusCode::OK)
}

/// `POST /api/check-logo/single/`: multipart `file` or form `image_path`.
/// Synchronous: returns 200 with a Result even when invalid, per spec §7
/// ("single image: returns 200 with a Result whose is_valid=\"invalid\"").
pub async fn check_logo_single(
    State(state): State<AppState>,
    request: Request<Body>,
) -> AppResult<impl IntoResponse> {
    let content_type = content_type_of(&request);

    let (input_label, bytes) = if content_type.starts_with("multipart/") {
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        let field = multipart
            .next_field()
            .await
            .map_err(|e| AppError::InvalidInput(e.to_string()))?
            .ok_or_else(|| AppError::InvalidInput("missing file field".into()))?;
        let name = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidInput(e.to_string()))?;
        (name, data.to_vec())
    } else {
        #[derive(Deserialize)]
        struct ImagePathForm {
            image_path: String,
        }
        let form: ImagePathForm = decode_form(request)
            .await
            .map_err(|_| AppError::InvalidInput("expected multipart file or image_path".into()))?;
        let bytes = tokio::fs::read(&form.image_path)
            .await
            .map_err(|e| AppError::InvalidInput(format!("cannot read image_path: {e}")))?;
        (form.image_path, bytes)
    };

    if validate_magic_bytes(&bytes).is_err() {
        let result = BatchResult::invalid(input_label, Some("unrecognized image format".into()));
        return Ok(Json(result));
    }

    let verdict = state.detector.detect(crate::detector::ImageRef::Bytes(&bytes)).await;
    let result = match verdict {
        Ok(v) if v.error.is_some() => BatchResult::errored(input_label, v.error.unwrap()),
        Ok(v) if v.is_valid => {
            BatchResult::success(input_label, v.confidence.unwrap_or(0.0), v.detected_by.unwrap_or_default(), v.bbox)
        }
        Ok(_) => BatchResult::invalid(input_label, None),
        Err(err) => BatchResult::errored(input_label, err.message().to_string()),
    };

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct BatchSubmitJson {
    pub image_paths: Vec<String>,
    pub batch_id: String,
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchSubmitResponse {
    pub batch_id: String,
    pub status: &'static str,
}

/// `POST /api/check-logo/batch/`: multipart `files[]` or `zip_file`, or
/// json `{image_paths[], batch_id, client_id?}`.
pub async fn check_logo_batch(
    State(state): State<AppState>,
    request: Request<Body>,
) -> AppResult<impl IntoResponse> {
    let content_type = content_type_of(&request);

    if content_type.starts_with("multipart/") {
        let (batch_id, files) = collect_multipart_batch(&state, request).await?;
        state.ingest.submit_files(&batch_id, files).await?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(BatchSubmitResponse { batch_id, status: "processing" }),
        ));
    }

    let body = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;
    let req: BatchSubmitJson =
        serde_json::from_slice(&body).map_err(|e| AppError::InvalidInput(e.to_string()))?;

    for url in &req.image_paths {
        url::Url::parse(url).map_err(|_| AppError::InvalidInput(format!("invalid URL: {url}")))?;
    }

    state.ingest.submit_urls(&req.batch_id, req.image_paths).await?;
    if let Some(client_id) = req.client_id {
        state.progress.bind(&req.batch_id, &client_id);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchSubmitResponse { batch_id: req.batch_id, status: "processing" }),
    ))
}

async fn collect_multipart_batch(
    state: &AppState,
    request: Request<Body>,
) -> AppResult<(String, Vec<(String, Vec<u8>)>)> {
    let mut batch_id = None;
    let mut client_id = None;
    let mut files = Vec::new();

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::InvalidInput(e.to_string()))? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "batch_id" => {
                batch_id = Some(field.text().await.map_err(|e| AppError::InvalidInput(e.to_string()))?);
            }
            "client_id" => {
                client_id = Some(field.text().await.map_err(|e| AppError::InvalidInput(e.to_string()))?);
            }
            "zip_file" => {
                let bytes = field.bytes().await.map_err(|e| AppError::InvalidInput(e.to_string()))?;
                let extracted = archive::extract_images(&bytes)
                    .map_err(|e| AppError::InvalidInput(format!("invalid archive: {e}")))?;
                files.extend(extracted);
            }
            "files[]" | "files" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(|e| AppError::InvalidInput(e.to_string()))?;
                if validate_magic_bytes(&bytes).is_ok() {
                    files.push((file_name, bytes.to_vec()));
                }
            }
            _ => {}
        }
    }

    let batch_id = batch_id.ok_or_else(|| AppError::InvalidInput("missing batch_id".into()))?;
    if let Some(client_id) = client_id {
        state.progress.bind(&batch_id, &client_id);
    }
    Ok((batch_id, files))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: crate::model::BatchStatus,
    pub counts: crate::model::Counts,
    pub progress_percent: u64,
}

pub async fn batch_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let (status, counts, progress_percent) = state.tracker.status(&id).await?;
    Ok(Json(StatusResponse { status, counts, progress_percent }))
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub results: Vec<BatchResult>,
}

pub async fn complete_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let results = state.tracker.complete(&id).await?;
    Ok(Json(CompleteResponse { results }))
}

pub async fn export_csv(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let batch = state.tracker.load(&id).await?;
    let csv = crate::csv_export::render(&batch).map_err(AppError::Internal)?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "text/csv".parse().unwrap());
    headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=batch_{id}_results.csv").parse().unwrap(),
    );
    Ok((headers, csv))
}

fn content_type_of(request: &Request<Body>) -> String {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

async fn decode_form<T: serde::de::DeserializeOwned>(request: Request<Body>) -> anyhow::Result<T> {
    let bytes: Bytes = to_bytes(request.into_body(), MAX_BODY_BYTES).await?;
    Ok(serde_urlencoded::from_bytes(&bytes)?)
}

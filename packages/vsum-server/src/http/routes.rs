use axum::extract::{ConnectInfo, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use vsum_core::cache::key::SourceType;
use vsum_core::cache::service::LookupStatus;
use vsum_core::job::Job;
use vsum_core::store::PersistenceStore;
use vsum_core::CoreError;

use crate::http::error::ApiError;
use crate::http::rate_limit::client_key;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/uploads", post(upload))
        .route("/api/cache/lookup", post(lookup))
        .route("/api/summaries", post(summaries))
        .route("/api/jobs/:job_id", get(get_job))
        .route("/api/cache/:cache_key", get(get_cache_entry).delete(delete_cache_entry))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Serialize)]
struct UploadResponse {
    file_id: String,
    original_name: String,
    size: u64,
    mime_type: String,
    file_type: String,
    file_hash: Option<String>,
}

async fn upload(
    State(state): State<AppState>,
    Extension(request_id): Extension<String>,
    ConnectInfo(remote): ConnectInfo<std::net::SocketAddr>,
    headers: axum::http::HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let key = client_key(
        header_str(&headers, "x-api-key"),
        header_str(&headers, "x-forwarded-for"),
        &remote.ip().to_string(),
    );
    if !state
        .rate_limiter
        .check(&format!("upload:{key}"), state.config.rate_limit_upload_per_minute)
    {
        return Err(ApiError::from_core(CoreError::RateLimited, &request_id));
    }

    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string(), &request_id))?
        .ok_or_else(|| {
            ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "multipart body has no field", &request_id)
        })?;

    let original_name = field.file_name().unwrap_or("upload").to_string();
    let content_type = field.content_type().map(|s| s.to_string());

    let mut field = field;
    let uploaded = state
        .uploads
        .save_stream(
            |_size: usize| {
                let field = &mut field;
                async move {
                    match field.chunk().await {
                        Ok(Some(bytes)) => Ok(bytes.to_vec()),
                        Ok(None) => Ok(Vec::new()),
                        Err(e) => Err(std::io::Error::other(e.to_string())),
                    }
                }
            },
            &original_name,
            content_type.as_deref(),
        )
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok(Json(UploadResponse {
        file_id: uploaded.file_id,
        original_name: uploaded.original_name,
        size: uploaded.size,
        mime_type: uploaded.mime_type,
        file_type: uploaded.file_type,
        file_hash: uploaded.file_hash,
    }))
}

#[derive(Deserialize)]
struct LookupRequest {
    source_type: String,
    source_url: Option<String>,
    file_id: Option<String>,
    file_hash: Option<String>,
}

#[derive(Deserialize)]
struct SummaryRequest {
    #[serde(flatten)]
    lookup: LookupRequest,
    #[serde(default)]
    refresh: bool,
}

#[derive(Serialize)]
struct LookupResponse {
    hit: bool,
    status: String,
    cache_key: String,
    summary_text: Option<String>,
    job_id: Option<String>,
    error: Option<String>,
}

fn status_str(status: &LookupStatus) -> &'static str {
    match status {
        LookupStatus::NotFound => "not_found",
        LookupStatus::Pending => "pending",
        LookupStatus::Running => "running",
        LookupStatus::Completed => "completed",
        LookupStatus::Failed => "failed",
    }
}

fn parse_source_type(raw: &str, request_id: &str) -> Result<SourceType, ApiError> {
    match raw {
        "url" => Ok(SourceType::Url),
        "local" => Ok(SourceType::Local),
        other => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            format!("unsupported source_type: {other}"),
            request_id,
        )),
    }
}

/// Resolves the file hash a local submission is keyed on, preferring the
/// upload record's recorded hash over a client-supplied one so the cache
/// key always reflects the bytes actually on disk.
async fn resolve_file_hash(
    state: &AppState,
    req: &LookupRequest,
    request_id: &str,
) -> Result<Option<String>, ApiError> {
    if let Some(file_id) = req.file_id.as_deref() {
        let upload = state
            .uploads
            .get(file_id)
            .await
            .map_err(|e| ApiError::from_core(e, request_id))?;
        return Ok(upload.file_hash);
    }
    Ok(req.file_hash.clone())
}

async fn lookup(
    State(state): State<AppState>,
    Extension(request_id): Extension<String>,
    Json(req): Json<LookupRequest>,
) -> Result<Json<LookupResponse>, ApiError> {
    let source_type = parse_source_type(&req.source_type, &request_id)?;
    let file_hash = resolve_file_hash(&state, &req, &request_id).await?;

    let result = state
        .cache
        .lookup(
            source_type,
            req.source_url.as_deref(),
            file_hash.as_deref(),
            true,
            false,
            state.extractor.as_ref(),
        )
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok(Json(LookupResponse {
        hit: result.hit,
        status: status_str(&result.status).to_string(),
        cache_key: result.cache_key,
        summary_text: result.summary_text,
        job_id: result.job_id,
        error: result.error,
    }))
}

async fn summaries(
    State(state): State<AppState>,
    Extension(request_id): Extension<String>,
    ConnectInfo(remote): ConnectInfo<std::net::SocketAddr>,
    headers: axum::http::HeaderMap,
    Json(req): Json<SummaryRequest>,
) -> Result<(StatusCode, Json<LookupResponse>), ApiError> {
    let key = client_key(
        header_str(&headers, "x-api-key"),
        header_str(&headers, "x-forwarded-for"),
        &remote.ip().to_string(),
    );
    if !state
        .rate_limiter
        .check(&format!("summary:{key}"), state.config.rate_limit_summary_per_minute)
    {
        return Err(ApiError::from_core(CoreError::RateLimited, &request_id));
    }

    let source_type = parse_source_type(&req.lookup.source_type, &request_id)?;
    let file_hash = resolve_file_hash(&state, &req.lookup, &request_id).await?;

    let result = state
        .cache
        .lookup(
            source_type,
            req.lookup.source_url.as_deref(),
            file_hash.as_deref(),
            true,
            true,
            state.extractor.as_ref(),
        )
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    if !req.refresh && result.status == LookupStatus::Completed {
        return Ok((
            StatusCode::OK,
            Json(LookupResponse {
                hit: result.hit,
                status: status_str(&result.status).to_string(),
                cache_key: result.cache_key,
                summary_text: result.summary_text,
                job_id: None,
                error: None,
            }),
        ));
    }

    if matches!(result.status, LookupStatus::Pending | LookupStatus::Running) {
        return Ok((
            StatusCode::ACCEPTED,
            Json(LookupResponse {
                hit: false,
                status: status_str(&result.status).to_string(),
                cache_key: result.cache_key,
                summary_text: None,
                job_id: result.job_id,
                error: None,
            }),
        ));
    }

    let source_ref = vsum_core::cache::key::compute_cache_key_from_source(
        source_type,
        req.lookup.source_url.as_deref(),
        file_hash.as_deref(),
        state.extractor.as_ref(),
    )
    .map(|(source_ref, _)| source_ref)
    .map_err(|e| ApiError::from_core(e, &request_id))?;

    let (entry, job_id) = state
        .cache
        .submit(source_type, &source_ref, &result.cache_key, None)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    state.queue.enqueue(Job {
        job_id: job_id.clone(),
        cache_key: entry.cache_key.clone(),
        source_type: entry.source_type.clone(),
        source_url: req.lookup.source_url.clone(),
        file_id: req.lookup.file_id.clone(),
        file_hash,
        request_id: Some(request_id.clone()),
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(LookupResponse {
            hit: false,
            status: "pending".to_string(),
            cache_key: entry.cache_key,
            summary_text: None,
            job_id: Some(job_id),
            error: None,
        }),
    ))
}

#[derive(Serialize)]
struct JobResponse {
    job_id: String,
    cache_key: String,
    status: String,
    error: Option<String>,
    summary_text: Option<String>,
}

async fn get_job(
    State(state): State<AppState>,
    Extension(request_id): Extension<String>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let (job, entry) = state
        .cache
        .get_job(&job_id)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?
        .ok_or_else(|| ApiError::from_core(CoreError::NotFound(format!("job {job_id}")), &request_id))?;

    Ok(Json(JobResponse {
        job_id: job.job_id,
        cache_key: job.cache_key,
        status: job.status,
        error: job.error,
        summary_text: entry.and_then(|e| e.summary_text),
    }))
}

#[derive(Serialize)]
struct CacheEntryResponse {
    cache_key: String,
    source_type: String,
    source_ref: String,
    source_name: Option<String>,
    status: String,
    summary_text: Option<String>,
    error: Option<String>,
}

async fn get_cache_entry(
    State(state): State<AppState>,
    Extension(request_id): Extension<String>,
    Path(cache_key): Path<String>,
) -> Result<Json<CacheEntryResponse>, ApiError> {
    state
        .store
        .touch_cache_entry(&cache_key, Utc::now().timestamp())
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    let entry = state
        .store
        .get_cache_entry(&cache_key)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?
        .ok_or_else(|| {
            ApiError::from_core(CoreError::NotFound(format!("cache entry {cache_key}")), &request_id)
        })?;

    Ok(Json(CacheEntryResponse {
        cache_key: entry.cache_key,
        source_type: entry.source_type,
        source_ref: entry.source_ref,
        source_name: entry.source_name,
        status: entry.status,
        summary_text: entry.summary_text,
        error: entry.error,
    }))
}

async fn delete_cache_entry(
    State(state): State<AppState>,
    Extension(request_id): Extension<String>,
    Path(cache_key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .cache
        .delete(&cache_key)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
    })
}

fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

use crate::auth::Caller;
use crate::config::AccessMode;
use crate::error::AppError;
use crate::models::{FileRecord, FileStats, NewFileRecord, OwnerScope};
use crate::records::RecordError;
use crate::storage::StorageError;
use crate::AppState;
use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, FromRequest, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::{Bytes, BytesMut};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Largest file accepted by `POST /api/upload`.
pub const MAX_FILE_SIZE: usize = 1024 * 1024;

/// Request body cap for uploads: the file plus room for the other form fields.
pub const UPLOAD_BODY_LIMIT: usize = MAX_FILE_SIZE + 64 * 1024;

/// `Json` whose rejections use the API's error body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(Deserialize)]
pub struct PinRequest {
    pin: Option<String>,
}

#[derive(Deserialize)]
pub struct DownloadRequest {
    name: Option<String>,
    code: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    success: bool,
    message: &'static str,
    token: String,
    user_id: Uuid,
}

#[derive(Serialize)]
pub struct UploadResponse {
    success: bool,
    message: &'static str,
    data: UploadedFile,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    name: String,
    file_name: String,
    file_size: u64,
    upload_date: String,
}

#[derive(Serialize)]
pub struct DownloadResponse {
    success: bool,
    data: DownloadLink,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLink {
    file_name: String,
    file_size: u64,
    file_type: String,
    download_url: String,
    upload_date: String,
}

fn upload_date(record: &FileRecord) -> String {
    record.uploaded_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut endpoints = serde_json::Map::new();
    if state.mode == AccessMode::Authenticated {
        endpoints.insert("signup".into(), json!("POST /api/auth/signup"));
        endpoints.insert("login".into(), json!("POST /api/auth/login"));
    }
    endpoints.insert("upload".into(), json!("POST /api/upload"));
    endpoints.insert("download".into(), json!("POST /api/download"));
    endpoints.insert("stats".into(), json!("GET /api/stats"));

    Json(json!({
        "message": "File Share API is running",
        "mode": state.mode.as_str(),
        "storage": state.storage.backend_name(),
        "endpoints": endpoints,
    }))
}

pub async fn signup(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<PinRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let pin = body.pin.unwrap_or_default();
    let result = async {
        let account = state.accounts.create_account(&pin).await?;
        let token = state.tokens.issue(account.id)?;
        tracing::info!(account_id = %account.id, "account created");
        Ok::<_, AppError>(AuthResponse {
            success: true,
            message: "Account created successfully!",
            token,
            user_id: account.id,
        })
    }
    .await;

    result
        .map(|body| (StatusCode::CREATED, Json(body)))
        .map_err(|e| e.in_context("Failed to create account"))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<PinRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let pin = body
        .pin
        .filter(|pin| !pin.is_empty())
        .ok_or_else(|| AppError::Validation("PIN is required".into()))?;

    let result = async {
        let account = state.accounts.verify_pin(&pin).await?;
        let token = state.tokens.issue(account.id)?;
        tracing::info!(account_id = %account.id, "login succeeded");
        Ok::<_, AppError>(AuthResponse {
            success: true,
            message: "Login successful!",
            token,
            user_id: account.id,
        })
    }
    .await;

    result.map(Json).map_err(|e| e.in_context("Login failed"))
}

struct UploadForm {
    file: Option<FilePart>,
    name: Option<String>,
    code: Option<String>,
}

struct FilePart {
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        file_too_large()
    } else {
        tracing::debug!(error = %err, "failed to read multipart body");
        AppError::Validation("Invalid multipart data".into())
    }
}

fn file_too_large() -> AppError {
    AppError::Validation("File size exceeds 1 MB limit".into())
}

/// Reads the form, refusing the file as soon as it grows past `MAX_FILE_SIZE`.
async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm {
        file: None,
        name: None,
        code: None,
    };

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().map(|s| s.to_string());
                let content_type = field.content_type().map(|s| s.to_string());
                let mut data = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if data.len() + chunk.len() > MAX_FILE_SIZE {
                        return Err(file_too_large());
                    }
                    data.extend_from_slice(&chunk);
                }
                form.file = Some(FilePart {
                    file_name,
                    content_type,
                    data: data.freeze(),
                });
            }
            "name" => form.name = Some(field.text().await.map_err(multipart_error)?),
            "code" => form.code = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    Ok(form)
}

fn duplicate_name_message(scope: OwnerScope) -> String {
    match scope {
        OwnerScope::Account(_) => {
            "You already have a file with this name. Choose a different name.".into()
        }
        OwnerScope::Global => "A file with this name already exists. Choose a different name.".into(),
    }
}

async fn store_upload(
    state: &AppState,
    scope: OwnerScope,
    form: UploadForm,
) -> Result<FileRecord, AppError> {
    let file = form
        .file
        .ok_or_else(|| AppError::Validation("No file uploaded".into()))?;

    let name = form.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let code = form.code.as_deref().filter(|c| !c.is_empty());
    let (Some(name), Some(code)) = (name, code) else {
        return Err(AppError::Validation("Name and code are required".into()));
    };

    if !(4..=6).contains(&code.chars().count()) {
        return Err(AppError::Validation("Code must be 4-6 characters".into()));
    }

    if state.records.name_taken(name, scope).await? {
        return Err(AppError::Conflict(duplicate_name_message(scope)));
    }

    let code_hash = state.hasher.hash_blocking(code).await?;

    let file_name = file.file_name.unwrap_or_else(|| name.to_string());
    let mime_type = file
        .content_type
        .unwrap_or_else(|| mime_guess::from_path(&file_name).first_or_octet_stream().to_string());
    let file_size = file.data.len() as u64;

    let stored = state.storage.store(file.data, &file_name, &mime_type).await?;

    let record = state
        .records
        .create(NewFileRecord {
            scope,
            name,
            code_hash: &code_hash,
            stored_file_name: &file_name,
            file_size,
            mime_type: &mime_type,
            storage_url: &stored.url,
            storage_object_id: &stored.object_id,
        })
        .await
        .map_err(|e| match e {
            RecordError::DuplicateName => {
                tracing::warn!(
                    name,
                    object_id = %stored.object_id,
                    "name claimed concurrently; stored object left without a record"
                );
                AppError::Conflict(duplicate_name_message(scope))
            }
            RecordError::UnknownOwner => {
                tracing::warn!(
                    owner_id = ?scope.owner_id(),
                    object_id = %stored.object_id,
                    "token names a missing account; stored object left without a record"
                );
                RecordError::UnknownOwner.into()
            }
            other => other.into(),
        })?;

    tracing::info!(
        record_id = %record.id,
        owner_id = ?record.owner_id,
        name = %record.name,
        size_bytes = record.file_size,
        "file uploaded"
    );
    Ok(record)
}

pub async fn upload_file(
    State(state): State<AppState>,
    Caller(scope): Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let multipart = multipart.map_err(|e| AppError::Validation(e.body_text()))?;
    let form = read_upload_form(multipart).await?;

    let record = store_upload(&state, scope, form)
        .await
        .map_err(|e| e.in_context("Failed to upload file"))?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            success: true,
            message: "File uploaded successfully!",
            data: UploadedFile {
                upload_date: upload_date(&record),
                name: record.name,
                file_name: record.stored_file_name,
                file_size: record.file_size,
            },
        }),
    ))
}

pub async fn download_file(
    State(state): State<AppState>,
    Caller(scope): Caller,
    ApiJson(body): ApiJson<DownloadRequest>,
) -> Result<Json<DownloadResponse>, AppError> {
    let name = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let code = body.code.as_deref().filter(|c| !c.is_empty());
    let (Some(name), Some(code)) = (name, code) else {
        return Err(AppError::Validation("Name and code are required".into()));
    };

    let result = async {
        let record = state.records.find_by_name(name, scope).await?;
        if !state.hasher.verify_blocking(code, &record.code_hash).await? {
            tracing::debug!(record_id = %record.id, "wrong code for file");
            return Err(AppError::Auth("Invalid secret code".into()));
        }
        Ok::<_, AppError>(record)
    }
    .await;
    let record = result.map_err(|e| e.in_context("Failed to retrieve file"))?;

    Ok(Json(DownloadResponse {
        success: true,
        data: DownloadLink {
            upload_date: upload_date(&record),
            file_name: record.stored_file_name,
            file_size: record.file_size,
            file_type: record.mime_type,
            download_url: record.storage_url,
        },
    }))
}

pub async fn file_stats(
    State(state): State<AppState>,
    Caller(scope): Caller,
) -> Result<Json<FileStats>, AppError> {
    let records = state
        .records
        .list(scope)
        .await
        .map_err(|e| AppError::from(e).in_context("Failed to get stats"))?;
    Ok(Json(FileStats::from_records(&records)))
}

/// Streams an object written by the local storage backend.
pub async fn serve_stored_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let local = state
        .local_files
        .as_ref()
        .ok_or_else(|| AppError::NotFound("File not found".into()))?;

    let file = local.open(&key).await.map_err(|e| match e {
        StorageError::NotFound(_) | StorageError::InvalidKey(_) => {
            AppError::NotFound("File not found".into())
        }
        other => AppError::from(other).in_context("Failed to read file"),
    })?;

    let mime_type = mime_guess::from_path(&key).first_or_octet_stream();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, mime_type.to_string()),
            (header::CACHE_CONTROL, "public, max-age=31536000".to_string()),
        ],
        body,
    )
        .into_response())
}

//! HTTP surface of the daemon.

use crate::engine::{EngineHandle, ImageSource};
use crate::error::ApiError;
use crate::registry::{FaceId, FaceRegistry, FaceSummary};
use crate::store::ImageStore;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use facegate_core::{Embedding, Matcher};
use serde::Serialize;
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RwLock<FaceRegistry>>,
    pub store: Arc<ImageStore>,
    pub engine: EngineHandle,
    pub matcher: Arc<dyn Matcher>,
    pub similarity_threshold: f32,
}

impl AppState {
    pub fn new(
        store: ImageStore,
        engine: EngineHandle,
        matcher: Arc<dyn Matcher>,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            registry: Arc::new(RwLock::new(FaceRegistry::new())),
            store: Arc::new(store),
            engine,
            matcher,
            similarity_threshold,
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/faces", post(add_face).get(list_faces))
        .route(
            "/faces/{id}",
            get(get_face).put(update_face).delete(delete_face),
        )
        .route("/verify", post(verify_face))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct FaceDetails {
    id: FaceId,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct Message {
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct Authorized {
    status: &'static str,
    user_id: FaceId,
    name: String,
}

#[derive(Debug, Serialize)]
struct Status {
    version: &'static str,
    faces: usize,
    similarity_threshold: f32,
}

/// The `name` and `image` fields of an upload form. Empty values count as absent.
#[derive(Debug, Default)]
struct UploadForm {
    name: Option<String>,
    image: Option<Bytes>,
}

impl UploadForm {
    async fn read(multipart: Result<Multipart, MultipartRejection>) -> Result<Self, ApiError> {
        let mut form = Self::default();
        // A body that is not multipart at all simply has no fields.
        let Ok(mut multipart) = multipart else {
            return Ok(form);
        };

        while let Some(field) = multipart.next_field().await? {
            let Some(field_name) = field.name().map(str::to_owned) else {
                continue;
            };
            match field_name.as_str() {
                "name" => {
                    let text = field.text().await?;
                    form.name = Some(text).filter(|s| !s.is_empty());
                }
                "image" => {
                    let bytes = field.bytes().await?;
                    form.image = Some(bytes).filter(|b| !b.is_empty());
                }
                other => tracing::debug!(field = other, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }
}

async fn add_face(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<FaceSummary>), ApiError> {
    let form = UploadForm::read(multipart).await?;
    let (Some(name), Some(image)) = (form.name, form.image) else {
        return Err(ApiError::MissingField("Name and image are required"));
    };

    let id = state.registry.write().await.allocate_id();
    let path = state.store.path_for(&id);
    let embedding = match store_and_encode(&state, &path, &image).await {
        Ok(embedding) => embedding,
        Err(e) => {
            state.registry.write().await.release(&id);
            return Err(e);
        }
    };

    let id = state
        .registry
        .write()
        .await
        .register(id, name.clone(), embedding, path);
    tracing::info!(id = %id, name = %name, "face registered");

    Ok((StatusCode::CREATED, Json(FaceSummary { id, name })))
}

/// Persist an upload and encode it from disk. The file is removed again on failure.
async fn store_and_encode(
    state: &AppState,
    path: &FsPath,
    image: &[u8],
) -> Result<Embedding, ApiError> {
    state.store.write(path, image).await?;

    match state.engine.encode_first(ImageSource::File(path.to_path_buf())).await {
        Ok(Some(embedding)) => Ok(embedding),
        Ok(None) => {
            state.store.discard(path).await;
            Err(ApiError::NoFaceDetected)
        }
        Err(e) => {
            state.store.discard(path).await;
            Err(e.into())
        }
    }
}

async fn list_faces(State(state): State<AppState>) -> Json<Vec<FaceSummary>> {
    Json(state.registry.read().await.list())
}

async fn get_face(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FaceDetails>, ApiError> {
    let registry = state.registry.read().await;
    let record = registry.get(&FaceId::from(id))?;
    Ok(Json(FaceDetails {
        id: record.id.clone(),
        name: record.name.clone(),
        created_at: record.created_at,
        updated_at: record.updated_at,
    }))
}

async fn update_face(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Message>, ApiError> {
    let id = FaceId::from(id);
    state.registry.read().await.get(&id)?;

    let form = UploadForm::read(multipart).await?;
    let image = form
        .image
        .ok_or(ApiError::MissingField("New image is required"))?;

    // The stored file is only touched once the new image is known to hold a face.
    let embedding = state
        .engine
        .encode_first(ImageSource::Bytes(image.clone()))
        .await?
        .ok_or(ApiError::NoFaceDetected)?;

    let mut registry = state.registry.write().await;
    let path = registry.get(&id)?.image_path.clone();
    state.store.replace(&path, &image).await?;
    registry.update(&id, embedding)?;
    tracing::info!(id = %id, "face updated");

    Ok(Json(Message {
        message: "Face updated successfully",
    }))
}

async fn delete_face(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    let id = FaceId::from(id);
    let mut registry = state.registry.write().await;
    let path = registry.get(&id)?.image_path.clone();

    if !state.store.remove(&path).await? {
        tracing::warn!(id = %id, path = %path.display(), "reference image already missing");
    }
    registry.remove(&id)?;
    tracing::info!(id = %id, "face removed");
    if registry.is_empty() {
        tracing::debug!("registry is now empty");
    }

    Ok(Json(Message {
        message: "Face removed successfully",
    }))
}

async fn verify_face(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Authorized>, ApiError> {
    let form = UploadForm::read(multipart).await?;
    let image = form.image.ok_or(ApiError::MissingField("Image is required"))?;

    let Some(probe) = state.engine.encode_first(ImageSource::Bytes(image)).await? else {
        tracing::info!("verify: no face in probe image");
        return Err(ApiError::Unauthorized);
    };

    let registry = state.registry.read().await;
    let Some(record) = registry.find_match(&probe, state.matcher.as_ref()) else {
        tracing::info!("verify: no matching face");
        return Err(ApiError::Unauthorized);
    };
    tracing::info!(id = %record.id, "verify: authorized");

    Ok(Json(Authorized {
        status: "authorized",
        user_id: record.id.clone(),
        name: record.name.clone(),
    }))
}

async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        version: env!("CARGO_PKG_VERSION"),
        faces: state.registry.read().await.len(),
        similarity_threshold: state.similarity_threshold,
    })
}

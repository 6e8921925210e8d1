//! Thin HTTP client for the facegated API.

use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
    #[error("server returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("failed to read {path}: {source}")]
    ReadImage {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaceSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaceDetails {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub faces: usize,
    pub similarity_threshold: f32,
}

/// Result of a verification attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Authorized { user_id: String, name: String },
    Unauthorized,
}

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Deserialize)]
struct AuthorizedBody {
    user_id: String,
    name: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct FacegateClient {
    http: reqwest::Client,
    base_url: Url,
}

impl FacegateClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    /// Append `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn add(&self, name: &str, image: &Path) -> Result<FaceSummary, ClientError> {
        let form = Form::new()
            .text("name", name.to_string())
            .part("image", image_part(image).await?);
        let resp = self.http.post(self.url(&["faces"])?).multipart(form).send().await?;
        json_or_error(resp).await
    }

    pub async fn list(&self) -> Result<Vec<FaceSummary>, ClientError> {
        let resp = self.http.get(self.url(&["faces"])?).send().await?;
        json_or_error(resp).await
    }

    pub async fn get(&self, id: &str) -> Result<FaceDetails, ClientError> {
        let resp = self.http.get(self.url(&["faces", id])?).send().await?;
        json_or_error(resp).await
    }

    pub async fn update(&self, id: &str, image: &Path) -> Result<String, ClientError> {
        let form = Form::new().part("image", image_part(image).await?);
        let resp = self
            .http
            .put(self.url(&["faces", id])?)
            .multipart(form)
            .send()
            .await?;
        Ok(json_or_error::<MessageBody>(resp).await?.message)
    }

    pub async fn delete(&self, id: &str) -> Result<String, ClientError> {
        let resp = self.http.delete(self.url(&["faces", id])?).send().await?;
        Ok(json_or_error::<MessageBody>(resp).await?.message)
    }

    pub async fn verify(&self, image: &Path) -> Result<Verdict, ClientError> {
        let form = Form::new().part("image", image_part(image).await?);
        let resp = self.http.post(self.url(&["verify"])?).multipart(form).send().await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Ok(Verdict::Unauthorized);
        }
        let body: AuthorizedBody = json_or_error(resp).await?;
        Ok(Verdict::Authorized {
            user_id: body.user_id,
            name: body.name,
        })
    }

    pub async fn status(&self) -> Result<DaemonStatus, ClientError> {
        let resp = self.http.get(self.url(&["status"])?).send().await?;
        json_or_error(resp).await
    }
}

async fn image_part(path: &Path) -> Result<Part, ClientError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ClientError::ReadImage {
            path: path.to_path_buf(),
            source,
        })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(Part::bytes(bytes).file_name(file_name))
}

async fn json_or_error<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    tracing::debug!(%status, %message, "request rejected");
    Err(ClientError::Api { status, message })
}

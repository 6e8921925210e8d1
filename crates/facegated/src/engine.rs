use axum::body::Bytes;
use facegate_core::{decode, DecodeError, Embedding, EncoderError, FaceEncoder};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Where the engine reads the image from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// An upload still in memory.
    Bytes(Bytes),
    /// A reference image already persisted on disk.
    File(PathBuf),
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Encode {
        source: ImageSource,
        reply: oneshot::Sender<Result<Vec<Embedding>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode the image and return one embedding per detected face.
    pub async fn encode(&self, source: ImageSource) -> Result<Vec<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                source,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Embedding of the most confident face, or `None` if no face was found.
    pub async fn encode_first(&self, source: ImageSource) -> Result<Option<Embedding>, EngineError> {
        Ok(self.encode(source).await?.into_iter().next())
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns `encoder` and serves requests one at a time, so
/// decoding and inference never block the async runtime. It exits once
/// every [`EngineHandle`] has been dropped.
pub fn spawn_engine(
    mut encoder: Box<dyn FaceEncoder>,
    queue: usize,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue.max(1));

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { source, reply } => {
                        let result = run_encode(encoder.as_mut(), &source);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_encode(encoder: &mut dyn FaceEncoder, source: &ImageSource) -> Result<Vec<Embedding>, EngineError> {
    let image = match source {
        ImageSource::Bytes(bytes) => decode::decode_rgb(bytes)?,
        ImageSource::File(path) => decode::decode_rgb_file(path)?,
    };

    let embeddings = encoder.detect_and_encode(&image)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        faces = embeddings.len(),
        "engine: encoded image"
    );
    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{png, ColorEncoder, BLACK, RED};

    fn spawn() -> EngineHandle {
        spawn_engine(Box::new(ColorEncoder), 4).unwrap()
    }

    #[tokio::test]
    async fn test_encode_bytes() {
        let engine = spawn();
        let embeddings = engine.encode(ImageSource::Bytes(png(RED).into())).await.unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].values, vec![255.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_encode_first_no_face() {
        let engine = spawn();
        let first = engine.encode_first(ImageSource::Bytes(png(BLACK).into())).await.unwrap();
        assert!(first.is_none());
    }

    #[tokio::test]
    async fn test_encode_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.jpg");
        std::fs::write(&path, png(RED)).unwrap();

        let first = spawn().encode_first(ImageSource::File(path)).await.unwrap();
        assert_eq!(first.unwrap().values, vec![255.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_encode_invalid_image() {
        let err = spawn()
            .encode(ImageSource::Bytes(Bytes::from_static(b"not an image")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
    }

    #[tokio::test]
    async fn test_cloned_handles_share_engine() {
        let engine = spawn();
        let other = engine.clone();
        let (a, b) = tokio::join!(
            engine.encode_first(ImageSource::Bytes(png(RED).into())),
            other.encode_first(ImageSource::Bytes(png(BLACK).into())),
        );
        assert!(a.unwrap().is_some());
        assert!(b.unwrap().is_none());
    }
}

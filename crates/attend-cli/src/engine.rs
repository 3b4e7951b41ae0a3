use crate::config::Thresholds;
use crate::recognition::Recognition;
use crate::store::StoreError;
use crate::verdict::{EnrollmentResponse, IdentificationVerdict};
use attend_core::{FaceEncoder, PipelineError};
use attend_hw::PhotoError;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("photo error: {0}")]
    Photo(#[from] PhotoError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the host flows to the engine thread.
enum EngineRequest {
    ProcessImage {
        image_path: PathBuf,
        db_path: PathBuf,
        liveness_threshold: f64,
        reply: oneshot::Sender<Result<IdentificationVerdict, EngineError>>,
    },
    IdCheck {
        db_path: PathBuf,
        user_id: i64,
        photo_path: PathBuf,
        reply: oneshot::Sender<Result<EnrollmentResponse, EngineError>>,
    },
    UpdateEncodings {
        photo_path: PathBuf,
        db_path: PathBuf,
        user_id: i64,
        reply: oneshot::Sender<Result<EnrollmentResponse, EngineError>>,
    },
}

/// Clone-safe handle to the recognition engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Identify the person in `image_path` against the encodings in `db_path`.
    pub async fn process_image(
        &self,
        image_path: PathBuf,
        db_path: PathBuf,
        liveness_threshold: f64,
    ) -> Result<IdentificationVerdict, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::ProcessImage {
            image_path,
            db_path,
            liveness_threshold,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enroll `user_id` from `photo_path` unless the id is already taken.
    pub async fn id_check(
        &self,
        db_path: PathBuf,
        user_id: i64,
        photo_path: PathBuf,
    ) -> Result<EnrollmentResponse, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::IdCheck {
            db_path,
            user_id,
            photo_path,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Add or refresh the encoding of `user_id` from `photo_path`.
    pub async fn update_face_encodings(
        &self,
        photo_path: PathBuf,
        db_path: PathBuf,
        user_id: i64,
    ) -> Result<EnrollmentResponse, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::UpdateEncodings {
            photo_path,
            db_path,
            user_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The encoder is loaded by the caller so model errors surface before the
/// thread starts.
pub fn spawn_engine<E>(encoder: E, thresholds: Thresholds) -> EngineHandle
where
    E: FaceEncoder + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let mut recognition = Recognition::new(encoder, thresholds);

    std::thread::Builder::new()
        .name("attend-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::ProcessImage {
                        image_path,
                        db_path,
                        liveness_threshold,
                        reply,
                    } => {
                        let result = recognition.process_image(&image_path, &db_path, liveness_threshold);
                        let _ = reply.send(result);
                    }
                    EngineRequest::IdCheck {
                        db_path,
                        user_id,
                        photo_path,
                        reply,
                    } => {
                        let result = recognition.id_check(&db_path, user_id, &photo_path);
                        let _ = reply.send(result);
                    }
                    EngineRequest::UpdateEncodings {
                        photo_path,
                        db_path,
                        user_id,
                        reply,
                    } => {
                        let result = recognition.update_face_encodings(&photo_path, &db_path, user_id);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::tests::{write_photo, ScriptedEncoder};
    use crate::store::EncodingStore;
    use attend_core::{BoundingBox, Embedding};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_engine_round_trip() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("face_data.db");
        let photo = dir.path().join("alice.jpg");
        write_photo(&photo, 140);
        EncodingStore::open(&db).unwrap();

        let face = BoundingBox::new(8.0, 8.0, 48.0, 48.0);
        let encoder = ScriptedEncoder::new(vec![(face, Embedding::new(vec![1.0, 0.0, 0.0]))]);
        let engine = spawn_engine(encoder, Thresholds::default());

        let added = engine.id_check(db.clone(), 7, photo.clone()).await.unwrap();
        assert_eq!(added.message, "Added new user with ID 7.");

        let again = engine.id_check(db.clone(), 7, photo.clone()).await.unwrap();
        assert_eq!(again.message, "User ID 7 already exists.");

        let updated = engine.update_face_encodings(photo.clone(), db.clone(), 7).await.unwrap();
        assert_eq!(updated.message, "Updated face for user ID 7.");

        let verdict = engine.process_image(photo, db, 0.0).await.unwrap();
        assert!(verdict.is_success(), "{verdict:?}");
        assert_eq!(verdict.id, Some(7));
    }

    #[tokio::test]
    async fn test_missing_image_is_a_verdict_not_an_error() {
        let dir = TempDir::new().unwrap();
        let engine = spawn_engine(ScriptedEncoder::new(vec![]), Thresholds::default());
        let verdict = engine
            .process_image(dir.path().join("nope.jpg"), dir.path().join("face_data.db"), 0.0)
            .await
            .unwrap();
        assert_eq!(verdict.message, "Image file not found");
    }
}

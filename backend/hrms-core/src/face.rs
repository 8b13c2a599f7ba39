// src/face.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use once_cell::sync::OnceCell;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::models::EmployeeId;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.50;

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("URL parsing failed: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Inference engine error: {status} - {body}")]
    Engine { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceVerification {
    pub is_verified: bool,
    pub message: String,
}

impl FaceVerification {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            is_verified: false,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait FaceVerifier: Send + Sync {
    /// Compares the live capture against the employee's reference photo.
    /// Never errors: every failure is reported as an unverified result.
    async fn verify_face(
        &self,
        employee_id: EmployeeId,
        image_base64: &str,
        reference_url: &str,
    ) -> FaceVerification;
}

/// Decodes a base64 image, accepting data URLs (`data:image/jpeg;base64,...`).
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let data = payload.rsplit(',').next().unwrap_or(payload);
    BASE64_STANDARD.decode(data.trim())
}

/// Dot product of the two L2-normalized embeddings.
pub fn similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some(a.iter().zip(b).map(|(x, y)| (x / na) * (y / nb)).sum())
}

// --- Inference engine handle ---

#[derive(Serialize)]
struct EmbedRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    faces: Vec<DetectedFace>,
}

#[derive(Deserialize)]
struct DetectedFace {
    embedding: Vec<f32>,
}

/// Connection to the face detection/embedding service. One per process.
pub struct FaceEngine {
    client: Client,
    embed_url: Url,
}

static FACE_ENGINE: OnceCell<FaceEngine> = OnceCell::new();

/// `{endpoint}/embed`, keeping every segment of the configured path.
fn embed_url(endpoint: &str) -> Result<Url, FaceError> {
    let mut base = Url::parse(endpoint)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join("embed")?)
}

impl FaceEngine {
    fn new(endpoint: &str, timeout: Duration) -> Result<Self, FaceError> {
        let embed_url = embed_url(endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, embed_url })
    }

    /// The process-wide engine, created on first use.
    pub fn global(endpoint: &str, timeout: Duration) -> Result<&'static FaceEngine, FaceError> {
        FACE_ENGINE.get_or_try_init(|| {
            info!("Initializing face engine at {}", endpoint);
            FaceEngine::new(endpoint, timeout)
        })
    }

    /// Embedding of the first detected face, `None` when no face is found.
    async fn embed(&self, image: &[u8]) -> Result<Option<Vec<f32>>, FaceError> {
        let encoded = BASE64_STANDARD.encode(image);
        let response = self
            .client
            .post(self.embed_url.clone())
            .json(&EmbedRequest { image: &encoded })
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(FaceError::Engine { status, body });
        }
        let parsed: EmbedResponse = response.json().await?;
        Ok(parsed.faces.into_iter().next().map(|f| f.embedding))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FaceError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

pub struct EmbeddingFaceVerifier {
    engine: &'static FaceEngine,
    threshold: f32,
}

impl EmbeddingFaceVerifier {
    pub fn new(engine: &'static FaceEngine, threshold: f32) -> Self {
        Self { engine, threshold }
    }

    async fn compare(&self, live: &[u8], reference_url: &str) -> Result<FaceVerification, FaceError> {
        let reference = match self.engine.download(reference_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Reference photo download failed ({}): {}", reference_url, e);
                return Ok(FaceVerification::failed(
                    "Could not download reference profile photo.",
                ));
            }
        };

        let Some(live_embedding) = self.engine.embed(live).await? else {
            return Ok(FaceVerification::failed(
                "Verification failed: No face detected in the live image.",
            ));
        };
        let Some(reference_embedding) = self.engine.embed(&reference).await? else {
            return Ok(FaceVerification::failed(
                "Verification failed: No face detected in the reference image.",
            ));
        };

        let score = similarity(&live_embedding, &reference_embedding).unwrap_or(0.0);
        debug!("Face similarity score {:.4} (threshold {:.2})", score, self.threshold);
        Ok(score_outcome(score, self.threshold))
    }
}

fn score_outcome(score: f32, threshold: f32) -> FaceVerification {
    if score >= threshold {
        FaceVerification {
            is_verified: true,
            message: format!("Verification Success! Confidence: {:.2}%", score * 100.0),
        }
    } else {
        FaceVerification::failed("Verification failed. Please try again.")
    }
}

#[async_trait]
impl FaceVerifier for EmbeddingFaceVerifier {
    async fn verify_face(
        &self,
        employee_id: EmployeeId,
        image_base64: &str,
        reference_url: &str,
    ) -> FaceVerification {
        if reference_url.trim().is_empty() {
            return FaceVerification::failed("Error: Employee profile photo URL is missing.");
        }
        let live = match decode_image_payload(image_base64) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => return FaceVerification::failed("Could not decode live webcam image."),
        };

        match self.compare(&live, reference_url).await {
            Ok(outcome) => {
                info!(
                    "Face verification for employee {}: verified={}",
                    employee_id, outcome.is_verified
                );
                outcome
            }
            Err(e) => {
                error!("Face analysis failed for employee {}: {}", employee_id, e);
                FaceVerification::failed("System error during face analysis.")
            }
        }
    }
}

/// Used when no inference engine is configured.
pub struct UnavailableFaceVerifier;

#[async_trait]
impl FaceVerifier for UnavailableFaceVerifier {
    async fn verify_face(&self, _: EmployeeId, _: &str, _: &str) -> FaceVerification {
        FaceVerification::failed("Face verification service is not configured.")
    }
}

#[cfg(test)]
pub use scripted::ScriptedFaceVerifier;

#[cfg(test)]
mod scripted {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    /// Returns a fixed verdict and counts calls.
    #[derive(Clone, Default)]
    pub struct ScriptedFaceVerifier {
        pub accept: Arc<AtomicBool>,
        pub calls: Arc<AtomicUsize>,
        pub delay: Option<Duration>,
    }

    impl ScriptedFaceVerifier {
        pub fn accepting(accept: bool) -> Self {
            let verifier = Self::default();
            verifier.accept.store(accept, Ordering::SeqCst);
            verifier
        }
    }

    #[async_trait]
    impl FaceVerifier for ScriptedFaceVerifier {
        async fn verify_face(&self, _: EmployeeId, _: &str, _: &str) -> FaceVerification {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.accept.load(Ordering::SeqCst) {
                score_outcome(0.87, DEFAULT_SIMILARITY_THRESHOLD)
            } else {
                score_outcome(0.12, DEFAULT_SIMILARITY_THRESHOLD)
            }
        }
    }
}

use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Plain box without landmarks, as reported by a detector that only locates faces.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
            landmarks: None,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// L2-normalized face embedding (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine similarity in [-1, 1]. Zero vectors and embeddings of different
    /// dimensions compare as 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if !self.same_dimension(other) {
            return 0.0;
        }
        let (dot, norm_a, norm_b) = self.values.iter().zip(other.values.iter()).fold(
            (0.0f32, 0.0f32, 0.0f32),
            |(dot, na, nb), (a, b)| (dot + a * b, na + a * a, nb + b * b),
        );

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    pub fn same_dimension(&self, other: &Embedding) -> bool {
        self.values.len() == other.values.len()
    }

    /// Cosine distance in [0, 2]. Lower = closer.
    pub fn distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// One enrolled user in the encoding database.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRecord {
    pub user_id: i64,
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the enrolled records.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Whether the best distance fell under the threshold.
    pub matched: bool,
    /// Cosine distance of the closest record, `None` for an empty gallery.
    pub distance: Option<f32>,
    /// User id of the closest record (set even when not matched).
    pub user_id: Option<i64>,
    /// Name of the closest record (set even when not matched).
    pub name: Option<String>,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    /// Find the closest record; `matched` is true when its distance is strictly
    /// below `max_distance`.
    fn closest(&self, probe: &Embedding, gallery: &[FaceRecord], max_distance: f32) -> MatchResult;
}

/// Cosine distance matcher.
///
/// Visits every gallery entry; there is no early exit on a good match.
/// Records whose dimension differs from the probe are skipped.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn closest(&self, probe: &Embedding, gallery: &[FaceRecord], max_distance: f32) -> MatchResult {
        let best = gallery
            .iter()
            .filter(|record| {
                let comparable = probe.same_dimension(&record.embedding);
                if !comparable {
                    tracing::warn!(
                        user_id = record.user_id,
                        expected = probe.values.len(),
                        actual = record.embedding.values.len(),
                        "skipping encoding with mismatched dimension"
                    );
                }
                comparable
            })
            .map(|record| (record, probe.distance(&record.embedding)))
            .fold(None::<(&FaceRecord, f32)>, |best, (record, dist)| match best {
                Some((_, best_dist)) if best_dist <= dist => best,
                _ => Some((record, dist)),
            });

        match best {
            Some((record, dist)) => MatchResult {
                matched: dist < max_distance,
                distance: Some(dist),
                user_id: Some(record.user_id),
                name: Some(record.name.clone()),
            },
            None => MatchResult {
                matched: false,
                distance: None,
                user_id: None,
                name: None,
            },
        }
    }
}

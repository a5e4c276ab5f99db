//! Similarity ranking of available items against a query embedding.

use crate::models::item::FoundItem;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};

/// How image and description similarity combine into one score.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScoreBlend {
    /// Plain mean of the two scores.
    #[default]
    Average,
    /// Weighted mean; weights are normalized by their sum.
    Weighted { image: f32, description: f32 },
}

impl ScoreBlend {
    /// Preset favouring the description embedding.
    pub const DESCRIPTION_WEIGHTED: ScoreBlend = ScoreBlend::Weighted {
        image: 0.4,
        description: 0.6,
    };

    pub fn combine(&self, image_score: f32, desc_score: f32) -> f32 {
        match *self {
            ScoreBlend::Average => (image_score + desc_score) / 2.0,
            ScoreBlend::Weighted { image, description } => {
                let total = image + description;
                if total <= 0.0 {
                    return image_score;
                }
                (image * image_score + description * desc_score) / total
            }
        }
    }
}

impl fmt::Display for ScoreBlend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreBlend::Average => f.write_str("average"),
            ScoreBlend::Weighted { image, description } => {
                write!(f, "weighted:{image},{description}")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid score blend `{0}`: expected `average`, `weighted` or `weighted:<image>,<description>`")]
pub struct ParseBlendError(String);

impl FromStr for ScoreBlend {
    type Err = ParseBlendError;

    /// Accepts `average`, `weighted` (0.4 image / 0.6 description) or
    /// `weighted:<image>,<description>` with non-negative weights.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "average" | "avg" | "mean" => return Ok(ScoreBlend::Average),
            "weighted" => return Ok(ScoreBlend::DESCRIPTION_WEIGHTED),
            _ => {}
        }

        let err = || ParseBlendError(s.to_string());
        let weights = value.strip_prefix("weighted:").ok_or_else(err)?;
        let (image, description) = weights.split_once(',').ok_or_else(err)?;
        let image: f32 = image.trim().parse().map_err(|_| err())?;
        let description: f32 = description.trim().parse().map_err(|_| err())?;
        let valid = |w: f32| w.is_finite() && w >= 0.0;
        if !valid(image) || !valid(description) || image + description <= 0.0 {
            return Err(err());
        }
        Ok(ScoreBlend::Weighted { image, description })
    }
}

/// An item that passed the threshold, with its final score.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredItem {
    pub item: FoundItem,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SearchRanker {
    blend: ScoreBlend,
}

impl SearchRanker {
    pub fn new(blend: ScoreBlend) -> Self {
        Self { blend }
    }

    pub fn blend(&self) -> ScoreBlend {
        self.blend
    }

    /// Final score of one item against the query.
    pub fn score(&self, query: &[f32], item: &FoundItem) -> f32 {
        let image_score = cosine_similarity(query, &item.image_embedding);
        match &item.description_embedding {
            Some(desc) => {
                let desc_score = cosine_similarity(query, desc);
                self.blend.combine(image_score, desc_score).clamp(-1.0, 1.0)
            }
            None => image_score,
        }
    }

    /// Score `items`, drop those at or below `threshold`, and order the rest
    /// by score descending, then earliest upload, then id.
    pub fn rank(&self, query: &[f32], items: Vec<FoundItem>, threshold: f32) -> Vec<ScoredItem> {
        let mut ranked: Vec<ScoredItem> = items
            .into_iter()
            .filter_map(|item| {
                let score = self.score(query, &item);
                (score > threshold).then_some(ScoredItem { item, score })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.item.uploaded_at.cmp(&b.item.uploaded_at))
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        ranked
    }
}

/// Cosine similarity in [-1, 1]. Vectors are re-normalized here rather than
/// trusted to be unit length; mismatched dimensions or a zero vector score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

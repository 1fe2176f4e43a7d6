//! Face embedding vectors and cosine similarity.
//!
//! Embeddings are L2-normalized once at construction so that every later
//! comparison is a plain dot product. The stored values are never mutated.

use thiserror::Error;

/// Similarity reported for a comparison involving a zero-norm vector.
pub const DEGENERATE_SIMILARITY: f32 = -1.0;

/// Norms below this are treated as zero.
const NORM_EPSILON: f64 = 1e-12;

/// Errors raised by embedding comparisons.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("Embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Embedding has zero norm")]
    DegenerateVector,

    #[error("Cannot compare against an empty embedding set")]
    EmptySet,

    #[error("Embedding contains non-finite values")]
    NonFinite,
}

/// A unit-length face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Vec<f32>,
    /// Norm of the raw vector before normalization (0.0 for degenerate input)
    raw_norm: f32,
}

impl EmbeddingVector {
    /// Build an embedding from raw embedder output.
    ///
    /// Zero-norm input is kept as-is and flagged degenerate; comparisons
    /// against it report [`EmbeddingError::DegenerateVector`].
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite);
        }

        let norm = values
            .iter()
            .map(|&v| (v as f64) * (v as f64))
            .sum::<f64>()
            .sqrt();

        if norm < NORM_EPSILON {
            return Ok(Self {
                values,
                raw_norm: 0.0,
            });
        }

        let values = values
            .into_iter()
            .map(|v| ((v as f64) / norm) as f32)
            .collect();

        Ok(Self {
            values,
            raw_norm: norm as f32,
        })
    }

    /// Number of dimensions.
    #[inline]
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Normalized components.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Norm of the vector as produced by the embedder.
    pub fn raw_norm(&self) -> f32 {
        self.raw_norm
    }

    /// Whether the source vector had zero length.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.raw_norm == 0.0
    }

    /// Cosine similarity with another embedding.
    pub fn similarity(&self, other: &EmbeddingVector) -> Result<f32, EmbeddingError> {
        similarity(self, other)
    }
}

/// Cosine similarity of two embeddings, in `[-1, 1]`.
pub fn similarity(a: &EmbeddingVector, b: &EmbeddingVector) -> Result<f32, EmbeddingError> {
    if a.dim() != b.dim() {
        return Err(EmbeddingError::DimensionMismatch {
            left: a.dim(),
            right: b.dim(),
        });
    }
    if a.is_degenerate() || b.is_degenerate() {
        return Err(EmbeddingError::DegenerateVector);
    }

    let dot: f64 = a
        .values
        .iter()
        .zip(b.values.iter())
        .map(|(&x, &y)| (x as f64) * (y as f64))
        .sum();

    // Rounding can push unit dot products slightly outside the range
    Ok(dot.clamp(-1.0, 1.0) as f32)
}

/// Best match of `candidate` within an ordered set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    /// Highest similarity found
    pub similarity: f32,
    /// Position of the best member in the set
    pub index: usize,
}

/// Highest similarity between `candidate` and any member of `set`.
///
/// Degenerate members score [`DEGENERATE_SIMILARITY`] instead of failing the
/// whole lookup. Ties resolve to the earliest member.
pub fn best_similarity(
    candidate: &EmbeddingVector,
    set: &[EmbeddingVector],
) -> Result<BestMatch, EmbeddingError> {
    if set.is_empty() {
        return Err(EmbeddingError::EmptySet);
    }
    if candidate.is_degenerate() {
        return Err(EmbeddingError::DegenerateVector);
    }

    let mut best: Option<BestMatch> = None;
    for (index, member) in set.iter().enumerate() {
        let score = match similarity(candidate, member) {
            Ok(score) => score,
            Err(EmbeddingError::DegenerateVector) => DEGENERATE_SIMILARITY,
            Err(e) => return Err(e),
        };
        if best.map_or(true, |b| score > b.similarity) {
            best = Some(BestMatch {
                similarity: score,
                index,
            });
        }
    }

    best.ok_or(EmbeddingError::EmptySet)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::new(values.to_vec()).unwrap()
    }

    #[test]
    fn test_self_similarity_is_one() {
        let a = emb(&[0.3, -1.2, 4.0, 0.01]);
        assert!((similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = emb(&[1.0, 2.0, 3.0]);
        let b = emb(&[-0.5, 4.0, 0.25]);
        assert_eq!(similarity(&a, &b).unwrap(), similarity(&b, &a).unwrap());
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        let x = emb(&[1.0, 0.0]);
        let y = emb(&[0.0, 3.0]);
        let neg = emb(&[-2.0, 0.0]);
        assert!(similarity(&x, &y).unwrap().abs() < 1e-6);
        assert!((similarity(&x, &neg).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalization_on_construction() {
        let a = emb(&[3.0, 4.0]);
        assert!((a.as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((a.as_slice()[1] - 0.8).abs() < 1e-6);
        assert!((a.raw_norm() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[1.0, 0.0, 0.0]);
        assert_eq!(
            similarity(&a, &b),
            Err(EmbeddingError::DimensionMismatch { left: 2, right: 3 })
        );
    }

    #[test]
    fn test_zero_vector_is_degenerate_not_nan() {
        let zero = emb(&[0.0, 0.0, 0.0]);
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!(zero.is_degenerate());
        assert_eq!(similarity(&zero, &a), Err(EmbeddingError::DegenerateVector));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert_eq!(
            EmbeddingVector::new(vec![1.0, f32::NAN]),
            Err(EmbeddingError::NonFinite)
        );
    }

    #[test]
    fn test_best_similarity_picks_max_and_index() {
        let set = vec![emb(&[0.0, 1.0]), emb(&[1.0, 0.1]), emb(&[-1.0, 0.0])];
        let best = best_similarity(&emb(&[1.0, 0.0]), &set).unwrap();
        assert_eq!(best.index, 1);
        assert!(best.similarity <= 1.0 && best.similarity >= -1.0);
        assert!(best.index < set.len());
    }

    #[test]
    fn test_best_similarity_empty_set() {
        assert_eq!(
            best_similarity(&emb(&[1.0]), &[]),
            Err(EmbeddingError::EmptySet)
        );
    }

    #[test]
    fn test_best_similarity_skips_degenerate_members() {
        let set = vec![emb(&[0.0, 0.0]), emb(&[0.0, 1.0])];
        let best = best_similarity(&emb(&[0.0, 2.0]), &set).unwrap();
        assert_eq!(best.index, 1);
        assert!((best.similarity - 1.0).abs() < 1e-6);
    }
}

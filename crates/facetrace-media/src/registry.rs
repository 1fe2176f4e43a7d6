//! Growing catalog of distinct faces for discovery scans.

use facetrace_models::{BestMatch, EmbeddingVector};

use crate::error::MediaResult;

/// Outcome of checking a face against the catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Novelty {
    /// Catalog is empty
    FirstFace,
    /// Closest entry is below the dedup threshold
    Novel(BestMatch),
    /// Closest entry is at or above the dedup threshold
    Duplicate(BestMatch),
}

impl Novelty {
    pub fn is_novel(&self) -> bool {
        !matches!(self, Novelty::Duplicate(_))
    }

    /// Similarity to the nearest catalog entry, if there is one.
    pub fn similarity(&self) -> Option<f32> {
        match self {
            Novelty::FirstFace => None,
            Novelty::Novel(m) | Novelty::Duplicate(m) => Some(m.similarity),
        }
    }
}

/// Append-only catalog; insertion order is the discovery index.
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    entries: Vec<EmbeddingVector>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EmbeddingVector] {
        &self.entries
    }

    /// Classify `candidate` against the catalog.
    ///
    /// A face is novel when the catalog is empty or its best similarity is
    /// strictly below `dedup_threshold`.
    pub fn classify(
        &self,
        candidate: &EmbeddingVector,
        dedup_threshold: f32,
    ) -> MediaResult<Novelty> {
        if self.entries.is_empty() {
            return Ok(Novelty::FirstFace);
        }
        let best = facetrace_models::best_similarity(candidate, &self.entries)?;
        Ok(if best.similarity < dedup_threshold {
            Novelty::Novel(best)
        } else {
            Novelty::Duplicate(best)
        })
    }

    /// Add a face and return its discovery index.
    pub fn register(&mut self, embedding: EmbeddingVector) -> usize {
        self.entries.push(embedding);
        self.entries.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::new(values.to_vec()).unwrap()
    }

    #[test]
    fn test_first_face_is_novel() {
        let registry = IdentityRegistry::new();
        let novelty = registry.classify(&emb(&[1.0, 0.0]), 0.6).unwrap();
        assert_eq!(novelty, Novelty::FirstFace);
        assert!(novelty.is_novel());
        assert_eq!(novelty.similarity(), None);
    }

    #[test]
    fn test_indices_follow_insertion_order() {
        let mut registry = IdentityRegistry::new();
        assert_eq!(registry.register(emb(&[1.0, 0.0])), 0);
        assert_eq!(registry.register(emb(&[0.0, 1.0])), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut registry = IdentityRegistry::new();
        let known = emb(&[1.0, 0.0]);
        registry.register(known.clone());

        let candidate = emb(&[0.6, 0.8]);
        let sim = known.similarity(&candidate).unwrap();

        // Exactly at the threshold counts as already seen
        assert!(!registry.classify(&candidate, sim).unwrap().is_novel());

        let novelty = registry.classify(&candidate, sim + 0.01).unwrap();
        assert!(novelty.is_novel());
        assert_eq!(novelty.similarity(), Some(sim));
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let mut registry = IdentityRegistry::new();
        registry.register(emb(&[1.0, 0.0]));
        assert!(registry.classify(&emb(&[1.0, 0.0, 0.0]), 0.6).is_err());
    }
}

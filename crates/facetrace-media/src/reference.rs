//! Reference faces for targeted scans.

use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use facetrace_models::{best_similarity, BestMatch, EmbeddingVector};

use crate::detection::{FaceAnalyzer, FaceDetector, FaceEmbedder};
use crate::error::{MediaError, MediaResult};

/// A decoded reference image and where it came from.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub source: PathBuf,
    pub image: RgbImage,
}

impl ReferenceImage {
    pub fn new(source: impl Into<PathBuf>, image: RgbImage) -> Self {
        Self {
            source: source.into(),
            image,
        }
    }
}

/// Immutable, ordered embeddings of the faces a targeted scan looks for.
///
/// Never empty and all members share one dimension.
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    embeddings: Vec<EmbeddingVector>,
}

impl ReferenceSet {
    /// Wrap precomputed embeddings.
    pub fn from_embeddings(embeddings: Vec<EmbeddingVector>) -> MediaResult<Self> {
        let Some(first) = embeddings.first() else {
            return Err(MediaError::EmptyReferenceSet);
        };
        let dim = first.dim();
        if let Some(other) = embeddings.iter().find(|e| e.dim() != dim) {
            return Err(MediaError::Embedding(
                facetrace_models::EmbeddingError::DimensionMismatch {
                    left: dim,
                    right: other.dim(),
                },
            ));
        }
        Ok(Self { embeddings })
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Always false; kept for symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Embedding dimension shared by every member.
    pub fn dim(&self) -> usize {
        self.embeddings.first().map(EmbeddingVector::dim).unwrap_or(0)
    }

    pub fn as_slice(&self) -> &[EmbeddingVector] {
        &self.embeddings
    }

    /// Closest reference face to `candidate`.
    pub fn best_match(&self, candidate: &EmbeddingVector) -> MediaResult<BestMatch> {
        Ok(best_similarity(candidate, &self.embeddings)?)
    }
}

/// Decode reference images from disk.
///
/// Any unreadable file rejects the whole request.
pub fn load_reference_images<P: AsRef<Path>>(paths: &[P]) -> MediaResult<Vec<ReferenceImage>> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let image = image::open(path).map_err(|e| MediaError::UnreadableImage {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            Ok(ReferenceImage::new(path, image.to_rgb8()))
        })
        .collect()
}

/// Embed every face of every image, in order, without deduplication.
///
/// Inference failures reject the request; images without faces are skipped
/// with a warning. Fails with [`MediaError::NoFacesFound`] when nothing was
/// embedded.
pub fn build_reference_set<D, E>(
    analyzer: &mut FaceAnalyzer<D, E>,
    images: &[ReferenceImage],
) -> MediaResult<ReferenceSet>
where
    D: FaceDetector,
    E: FaceEmbedder,
{
    let mut embeddings = Vec::new();
    for reference in images {
        let faces = analyzer
            .detect_and_embed(&reference.image)
            .map_err(|e| MediaError::ReferenceRejected {
                path: reference.source.clone(),
                message: e.to_string(),
            })?;

        if faces.is_empty() {
            warn!(image = %reference.source.display(), "No face found in reference image");
            continue;
        }
        debug!(
            image = %reference.source.display(),
            faces = faces.len(),
            "Embedded reference faces"
        );
        embeddings.extend(faces.into_iter().map(|f| f.embedding));
    }

    if embeddings.is_empty() {
        return Err(MediaError::NoFacesFound);
    }

    let set = ReferenceSet::from_embeddings(embeddings).map_err(|e| match e {
        MediaError::Embedding(inner) => MediaError::ReferenceRejected {
            path: PathBuf::new(),
            message: inner.to_string(),
        },
        other => other,
    })?;
    info!(
        images = images.len(),
        faces = set.len(),
        dim = set.dim(),
        "Reference set built"
    );
    Ok(set)
}

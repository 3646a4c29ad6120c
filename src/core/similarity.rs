//! Pairwise cosine similarity over a set of feature vectors.
//!
//! Every unordered pair is scored, so the cost is O(n² · d) for `n` vectors of
//! dimension `d`. This dominates the run time for large folders; the table is
//! always rebuilt from scratch.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::embeddings::FeatureVector;
use crate::error::{AppError, Result};
use crate::utils::round2;

/// Similarity of two distinct images, as cosine × 100 rounded to two decimals
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRecord {
    /// Lexicographically smaller identity
    pub name1: String,
    /// Lexicographically larger identity
    pub name2: String,
    /// Score in [-100, 100]
    pub similarity: f64,
}

/// Cosine similarity `dot(a, b) / (|a| |b|)`, clamped to [-1, 1]; 0 if either norm is 0
pub fn cosine_similarity(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Score every unordered pair of identities, sorted by descending similarity.
///
/// Ties are ordered by `(name1, name2)` so the output is fully deterministic.
/// For `n` vectors the result has exactly `n * (n - 1) / 2` records.
pub fn compute_pairwise_similarity(
    features: &BTreeMap<String, FeatureVector>,
) -> Result<Vec<SimilarityRecord>> {
    compute_pairwise_similarity_with_cancel(features, &CancellationToken::new())
}

/// Like [`compute_pairwise_similarity`], checking `token` once per row
pub fn compute_pairwise_similarity_with_cancel(
    features: &BTreeMap<String, FeatureVector>,
    token: &CancellationToken,
) -> Result<Vec<SimilarityRecord>> {
    let entries: Vec<(&String, &FeatureVector)> = features.iter().collect();
    let n = entries.len();
    let mut records = Vec::with_capacity(n * n.saturating_sub(1) / 2);

    for (i, (name1, feat1)) in entries.iter().enumerate() {
        if token.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        for (name2, feat2) in &entries[i + 1..] {
            if feat1.dim() != feat2.dim() {
                return Err(AppError::DimensionMismatch {
                    left: name1.to_string(),
                    left_dim: feat1.dim(),
                    right: name2.to_string(),
                    right_dim: feat2.dim(),
                });
            }

            let sim = cosine_similarity(feat1.values().view(), feat2.values().view());
            records.push(SimilarityRecord {
                name1: name1.to_string(),
                name2: name2.to_string(),
                similarity: round2(f64::from(sim) * 100.0),
            });
        }
    }

    records.sort_by(by_descending_similarity);
    log::debug!("Scored {} pair(s) across {} image(s)", records.len(), n);

    Ok(records)
}

fn by_descending_similarity(a: &SimilarityRecord, b: &SimilarityRecord) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.name1.cmp(&b.name1))
        .then_with(|| a.name2.cmp(&b.name2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn features(vectors: &[(&str, Vec<f32>)]) -> BTreeMap<String, FeatureVector> {
        vectors
            .iter()
            .map(|(name, raw)| (name.to_string(), FeatureVector::new(*name, raw.clone()).unwrap()))
            .collect()
    }

    #[test]
    fn test_cosine_similarity() {
        // Test with identical vectors
        let a = Array1::from(vec![1.0, 0.0, 0.0]);
        let b = Array1::from(vec![1.0, 0.0, 0.0]);
        assert!((cosine_similarity(a.view(), b.view()) - 1.0).abs() < 1e-6);

        // Test with orthogonal vectors
        let a = Array1::from(vec![1.0, 0.0]);
        let b = Array1::from(vec![0.0, 1.0]);
        assert!(cosine_similarity(a.view(), b.view()).abs() < 1e-6);

        // Test with opposite vectors
        let a = Array1::from(vec![1.0, 0.0]);
        let b = Array1::from(vec![-1.0, 0.0]);
        assert!((cosine_similarity(a.view(), b.view()) + 1.0).abs() < 1e-6);

        // Non-normalized input uses the full formula
        let a = Array1::from(vec![3.0, 0.0]);
        let b = Array1::from(vec![5.0, 5.0]);
        assert!((cosine_similarity(a.view(), b.view()) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);

        // Zero vector
        let a = Array1::from(vec![0.0, 0.0]);
        assert_eq!(cosine_similarity(a.view(), b.view()), 0.0);
    }

    #[test]
    fn test_pairwise_counts_and_orientation() {
        let feats = features(&[
            ("d", vec![1.0, 1.0, 0.0]),
            ("a", vec![1.0, 0.0, 0.0]),
            ("c", vec![0.0, 0.0, 1.0]),
            ("b", vec![0.9, 0.1, 0.0]),
        ]);

        let records = compute_pairwise_similarity(&feats).unwrap();
        assert_eq!(records.len(), 4 * 3 / 2);

        for record in &records {
            assert!(record.name1 < record.name2);
        }

        let mut pairs: Vec<_> = records
            .iter()
            .map(|r| (r.name1.as_str(), r.name2.as_str()))
            .collect();
        pairs.sort();
        pairs.dedup();
        assert_eq!(pairs.len(), records.len());
    }

    #[test]
    fn test_pairwise_sorted_descending() {
        let feats = features(&[
            ("x", vec![1.0, 0.0]),
            ("y", vec![0.0, 1.0]),
            ("z", vec![1.0, 0.1]),
            ("w", vec![-1.0, 0.0]),
        ]);

        let records = compute_pairwise_similarity(&feats).unwrap();
        assert!(records.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert_eq!((records[0].name1.as_str(), records[0].name2.as_str()), ("x", "z"));
        assert_eq!(records[0].similarity, 99.5);

        let last = records.last().unwrap();
        assert_eq!((last.name1.as_str(), last.name2.as_str()), ("w", "x"));
        assert_eq!(last.similarity, -100.0);
    }

    #[test]
    fn test_pairwise_ties_are_ordered_by_name() {
        let feats = features(&[
            ("c", vec![1.0, 0.0]),
            ("a", vec![1.0, 0.0]),
            ("b", vec![1.0, 0.0]),
        ]);

        let records = compute_pairwise_similarity(&feats).unwrap();
        let names: Vec<_> = records
            .iter()
            .map(|r| format!("{}-{}", r.name1, r.name2))
            .collect();
        assert_eq!(names, vec!["a-b", "a-c", "b-c"]);
        assert!(records.iter().all(|r| r.similarity == 100.0));
    }

    #[test]
    fn test_pairwise_small_inputs() {
        assert!(compute_pairwise_similarity(&BTreeMap::new()).unwrap().is_empty());
        let single = features(&[("solo", vec![0.5, 0.5])]);
        assert!(compute_pairwise_similarity(&single).unwrap().is_empty());
    }

    #[test]
    fn test_pairwise_dimension_mismatch() {
        let feats = features(&[("a", vec![1.0, 0.0]), ("b", vec![1.0, 0.0, 0.0])]);
        let err = compute_pairwise_similarity(&feats).unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { left_dim: 2, right_dim: 3, .. }));
    }

    #[test]
    fn test_pairwise_cancelled() {
        let feats = features(&[("a", vec![1.0]), ("b", vec![2.0])]);
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            compute_pairwise_similarity_with_cancel(&feats, &token),
            Err(AppError::Cancelled)
        ));
    }
}

//! Embedding backend trait and vector math.

use async_trait::async_trait;

use crate::error::LlmError;

/// Turns text into fixed-length vectors.
///
/// Implementations must return exactly one vector per input, in order,
/// all of the same dimensionality.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}

/// Cosine similarity in [-1, 1]. Zero-length, empty, or mismatched
/// vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    #[allow(clippy::cast_possible_truncation)]
    let sim = (dot / denom) as f32;
    sim.clamp(-1.0, 1.0)
}

/// Pairwise similarity matrix: `matrix[row][col] = cos(rows[row], cols[col])`.
pub fn similarity_matrix(rows: &[Vec<f32>], cols: &[Vec<f32>]) -> Vec<Vec<f32>> {
    rows.iter()
        .map(|r| cols.iter().map(|c| cosine_similarity(r, c)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        // (1*2 + 2*1) / (sqrt(5) * sqrt(5)) = 0.8
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 1.0]) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn matrix_shape_and_values() {
        let rows = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let cols = vec![vec![1.0, 0.0], vec![0.0, 2.0]];
        let m = similarity_matrix(&rows, &cols);
        assert_eq!(m.len(), 3);
        assert!(m.iter().all(|row| row.len() == 2));
        assert!((m[0][0] - 1.0).abs() < 1e-6);
        assert!(m[0][1].abs() < 1e-6);
        assert!((m[2][1] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }
}

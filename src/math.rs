//! Dense math kernels for the SHGAT engine
//!
//! Small, allocation-minimizing primitives shared by the message-passing,
//! scoring, and training code: matrix products against transposed weights,
//! numerically stable softmax, the activation zoo, and weight initializers.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

/// Clamp bound for binary cross-entropy inputs.
const BCE_EPSILON: f32 = 1e-7;

/// Computes `C = A · Bᵀ`, i.e. `C[i][j] = Σ_x A[i][x] · B[j][x]`.
///
/// Both operands must agree on the inner dimension. This is the shape used
/// by every projection in the engine: activations are stored row-per-node
/// and weights row-per-output-feature.
pub fn matmul_transposed(a: &DMatrix<f32>, b: &DMatrix<f32>) -> DMatrix<f32> {
    debug_assert_eq!(
        a.ncols(),
        b.ncols(),
        "inner dimensions must match: {}x{} vs {}x{}",
        a.nrows(),
        a.ncols(),
        b.nrows(),
        b.ncols()
    );
    a * b.transpose()
}

/// In-place numerically stable softmax over a slice.
///
/// Subtracts the maximum before exponentiating. An empty slice is left
/// untouched.
pub fn softmax(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let max_val = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

/// LeakyReLU activation with configurable negative slope.
pub fn leaky_relu(x: f32, alpha: f32) -> f32 {
    if x >= 0.0 {
        x
    } else {
        alpha * x
    }
}

/// ELU activation with `α = 1`.
pub fn elu(x: f32) -> f32 {
    if x >= 0.0 {
        x
    } else {
        x.exp() - 1.0
    }
}

/// Logistic sigmoid.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Dot product of two equal-length slices.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "dot operands must have equal length");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity, guarded against zero norms.
///
/// Returns 0 when either vector has zero magnitude.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Binary cross-entropy between a predicted probability and a 0/1 label.
///
/// The prediction is clamped away from the endpoints so the logs stay
/// finite.
pub fn bce(pred: f32, label: f32) -> f32 {
    let p = pred.clamp(BCE_EPSILON, 1.0 - BCE_EPSILON);
    -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
}

/// Xavier-initialized matrix: uniform draws from `[-s, s]` with
/// `s = √(2 / (rows + cols))`.
pub fn xavier_matrix(rows: usize, cols: usize) -> DMatrix<f32> {
    let scale = (2.0 / (rows + cols) as f32).sqrt();
    let mut rng = rand::thread_rng();
    DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(-scale..=scale))
}

/// Initialized vector: uniform draws from `[-s, s]` with `s = √(1 / n)`.
pub fn init_vector(n: usize) -> DVector<f32> {
    let scale = (1.0 / n as f32).sqrt();
    let mut rng = rand::thread_rng();
    DVector::from_fn(n, |_, _| rng.gen_range(-scale..=scale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_transposed_shapes() {
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = DMatrix::from_row_slice(4, 3, &[1.0; 12]);
        let c = matmul_transposed(&a, &b);
        assert_eq!(c.nrows(), 2);
        assert_eq!(c.ncols(), 4);
        assert!((c[(0, 0)] - 6.0).abs() < 1e-6);
        assert!((c[(1, 3)] - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut values = vec![1.0, 2.0, 3.0];
        softmax(&mut values);
        let sum: f32 = values.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(values[2] > values[1] && values[1] > values[0]);
    }

    #[test]
    fn test_softmax_is_stable_for_large_inputs() {
        let mut values = vec![1000.0, 1001.0, 1002.0];
        softmax(&mut values);
        assert!(values.iter().all(|v| v.is_finite()));
        let sum: f32 = values.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_empty_is_noop() {
        let mut values: Vec<f32> = vec![];
        softmax(&mut values);
        assert!(values.is_empty());
    }

    #[test]
    fn test_activations() {
        assert_eq!(leaky_relu(2.0, 0.2), 2.0);
        assert!((leaky_relu(-1.0, 0.2) + 0.2).abs() < 1e-6);
        assert_eq!(elu(1.5), 1.5);
        assert!((elu(-1.0) - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.999);
    }

    #[test]
    fn test_cosine_zero_norm_guard() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bce_clamps_extreme_predictions() {
        assert!(bce(0.0, 0.0).is_finite());
        assert!(bce(1.0, 1.0).is_finite());
        assert!(bce(0.5, 1.0) > 0.0);
        // Confident wrong answers cost more than confident right ones.
        assert!(bce(0.9, 0.0) > bce(0.9, 1.0));
    }

    #[test]
    fn test_initializer_ranges() {
        let m = xavier_matrix(10, 20);
        let scale = (2.0f32 / 30.0).sqrt();
        assert!(m.iter().all(|v| v.abs() <= scale));

        let v = init_vector(16);
        let vscale = (1.0f32 / 16.0).sqrt();
        assert!(v.iter().all(|x| x.abs() <= vscale));
    }
}

// params.rs
// Description: Parameter generator. Random weight and bias tensors at teaching scale,
//              random token embeddings and the closed form sinusoidal positional encoding.
//              All values are rounded to the display precision so rendered values stay stable.
// History:
// - 2026-10-17: Move weight init out of the layer constructors, switch to uniform init.

use ndarray::{Array1, Array2};
use rand_distr::{Distribution, Uniform};

use crate::error::{EngineError, Result};
use crate::utils::round_display;

// Weights and biases are drawn from [-WEIGHT_RANGE, WEIGHT_RANGE).
pub const WEIGHT_RANGE: f32 = 0.2;
// Token embeddings are drawn from [-EMBEDDING_RANGE, EMBEDDING_RANGE).
pub const EMBEDDING_RANGE: f32 = 0.25;
pub const POSITIONAL_BASE: f64 = 10_000.0;

fn uniform(d_range: f32) -> Result<Uniform<f32>> {
    Uniform::new(-d_range, d_range).map_err(|e| EngineError::Parameter(e.to_string()))
}

fn sample_matrix(i_rows: usize, i_cols: usize, d_range: f32) -> Result<Array2<f32>> {
    let dist = uniform(d_range)?;
    let mut rng = rand::rng();
    Ok(Array2::from_shape_fn((i_rows, i_cols), |_| {
        round_display(dist.sample(&mut rng))
    }))
}

pub fn random_matrix(i_rows: usize, i_cols: usize) -> Result<Array2<f32>> {
    sample_matrix(i_rows, i_cols, WEIGHT_RANGE)
}

pub fn random_vector(i_len: usize) -> Result<Array1<f32>> {
    let dist = uniform(WEIGHT_RANGE)?;
    let mut rng = rand::rng();
    Ok(Array1::from_shape_fn(i_len, |_| round_display(dist.sample(&mut rng))))
}

/// One random row of width `i_model_width` per token.
pub fn token_embeddings(v_tokens: &[String], i_model_width: usize) -> Result<Array2<f32>> {
    sample_matrix(v_tokens.len(), i_model_width, EMBEDDING_RANGE)
}

/// Sinusoidal positional encoding.
///
/// Even feature `i` is `sin(pos / 10000^(i / d))`, odd feature `i` is
/// `cos(pos / 10000^((i - 1) / d))`. Deterministic for given inputs.
pub fn positional_encoding(i_seq_len: usize, i_model_width: usize) -> Array2<f32> {
    let d_width = i_model_width as f64;
    Array2::from_shape_fn((i_seq_len, i_model_width), |(i_pos, i_feat)| {
        let i_pair = i_feat - (i_feat % 2);
        let d_angle = i_pos as f64 / POSITIONAL_BASE.powf(i_pair as f64 / d_width);
        let d_val = if i_feat % 2 == 0 {
            d_angle.sin()
        } else {
            d_angle.cos()
        };
        round_display(d_val as f32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_rounded(d: f32) -> bool {
        let d_scaled = d * 10_000.0;
        (d_scaled - d_scaled.round()).abs() < 1e-2
    }

    #[test]
    fn test_random_matrix_shape_and_range() {
        let a = random_matrix(3, 5).unwrap();
        assert_eq!(a.dim(), (3, 5));
        assert!(a.iter().all(|&x| (-WEIGHT_RANGE..=WEIGHT_RANGE).contains(&x)));
        assert!(a.iter().all(|&x| is_rounded(x)));
    }

    #[test]
    fn test_random_matrix_empty() {
        assert_eq!(random_matrix(0, 4).unwrap().dim(), (0, 4));
        assert_eq!(random_vector(0).unwrap().len(), 0);
    }

    #[test]
    fn test_token_embeddings_one_row_per_token() {
        let v_tokens = vec!["hello".to_string(), "world".to_string(), "!".to_string()];
        let a = token_embeddings(&v_tokens, 8).unwrap();
        assert_eq!(a.dim(), (3, 8));
        assert!(a.iter().all(|&x| (-EMBEDDING_RANGE..=EMBEDDING_RANGE).contains(&x)));
    }

    #[test]
    fn test_positional_encoding_first_position() {
        let pe = positional_encoding(1, 6);
        for i in 0..6 {
            let d_expected = if i % 2 == 0 { 0.0 } else { 1.0 };
            assert_eq!(pe[[0, i]], d_expected);
        }
    }

    #[test]
    fn test_positional_encoding_odd_uses_previous_even_exponent() {
        let pe = positional_encoding(2, 4);
        assert!((pe[[1, 0]] - 1.0f32.sin()).abs() < 1e-4);
        assert!((pe[[1, 1]] - 1.0f32.cos()).abs() < 1e-4);
        // i = 2 and i = 3 share the exponent 2/4.
        let d_angle = 1.0f64 / 10_000f64.powf(0.5);
        assert!((pe[[1, 2]] as f64 - d_angle.sin()).abs() < 1e-4);
        assert!((pe[[1, 3]] as f64 - d_angle.cos()).abs() < 1e-4);
    }

    #[test]
    fn test_positional_encoding_is_deterministic() {
        assert_eq!(positional_encoding(5, 8), positional_encoding(5, 8));
        assert_eq!(positional_encoding(0, 8).dim(), (0, 8));
    }
}

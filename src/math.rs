// math.rs
// Description: Matrix algebra primitives used by every pipeline stage: multiply, transpose,
//              scale, element wise add, row softmax, bias add, ReLU and layer norm.
//              Shape violations return EngineError::ShapeMismatch instead of panicking.
// History:
// - 2026-10-17: Collect the matrix helpers formerly spread over the layer structs.
// - 2026-10-17: Degenerate (empty) operands are valid inputs, not errors.

use ndarray::{Array1, Array2};

use crate::error::{EngineError, Result};

pub const LAYER_NORM_EPSILON: f32 = 1e-5;

pub fn identity(i_size: usize) -> Array2<f32> {
    Array2::eye(i_size)
}

// Standard matrix product. If either side has zero rows or zero columns the result is a
// zero filled rows(A) x cols(B) matrix.
pub fn multiply(a_lhs: &Array2<f32>, a_rhs: &Array2<f32>) -> Result<Array2<f32>> {
    if a_lhs.is_empty() || a_rhs.is_empty() {
        return Ok(Array2::zeros((a_lhs.nrows(), a_rhs.ncols())));
    }
    if a_lhs.ncols() != a_rhs.nrows() {
        log::error!(
            "multiply: dim mismatch A_cols({}) != B_rows({})",
            a_lhs.ncols(),
            a_rhs.nrows()
        );
        return Err(EngineError::shape(format!(
            "Matrix mul dim mismatch: A_cols({}) !== B_rows({})",
            a_lhs.ncols(),
            a_rhs.nrows()
        )));
    }
    Ok(a_lhs.dot(a_rhs))
}

pub fn transpose(a_input: &Array2<f32>) -> Array2<f32> {
    a_input.t().as_standard_layout().into_owned()
}

pub fn scale(a_input: &Array2<f32>, d_scalar: f32) -> Array2<f32> {
    a_input.mapv(|x| x * d_scalar)
}

pub fn elementwise_add(a_lhs: &Array2<f32>, a_rhs: &Array2<f32>) -> Result<Array2<f32>> {
    if a_lhs.dim() != a_rhs.dim() {
        log::error!(
            "elementwise_add: dim mismatch {:?} vs {:?}",
            a_lhs.dim(),
            a_rhs.dim()
        );
        return Err(EngineError::shape(format!(
            "Element-wise sum dim mismatch: {}x{} vs {}x{}",
            a_lhs.nrows(),
            a_lhs.ncols(),
            a_rhs.nrows(),
            a_rhs.ncols()
        )));
    }
    Ok(a_lhs + a_rhs)
}

/// Row wise softmax, stabilized by subtracting the row max.
///
/// A row containing `+inf` splits its mass evenly over the `+inf` entries. A row whose
/// exponentials sum to zero or to a non finite value (all `-inf`, NaN) falls back to a
/// uniform distribution. Empty rows stay empty.
pub fn softmax_rows(a_scores: &Array2<f32>) -> Array2<f32> {
    let mut a_out = a_scores.clone();
    for mut a_row in a_out.rows_mut() {
        let i_len = a_row.len();
        if i_len == 0 {
            continue;
        }
        let d_uniform = 1.0 / i_len as f32;

        let d_max = a_row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if d_max == f32::INFINITY {
            let i_inf = a_row.iter().filter(|&&x| x == f32::INFINITY).count();
            let d_share = 1.0 / i_inf as f32;
            a_row.mapv_inplace(|x| if x == f32::INFINITY { d_share } else { 0.0 });
            continue;
        }
        if d_max == f32::NEG_INFINITY {
            a_row.fill(d_uniform);
            continue;
        }

        a_row.mapv_inplace(|x| (x - d_max).exp());
        let d_sum: f32 = a_row.sum();
        if d_sum == 0.0 || !d_sum.is_finite() {
            a_row.fill(d_uniform);
        } else {
            a_row.mapv_inplace(|x| x / d_sum);
        }
    }
    a_out
}

// Broadcasts the bias over every row. A length mismatch is a hard failure.
pub fn add_bias(a_input: &Array2<f32>, a_bias: &Array1<f32>) -> Result<Array2<f32>> {
    if a_input.ncols() != a_bias.len() {
        log::warn!(
            "add_bias: bias length {} does not match column count {}",
            a_bias.len(),
            a_input.ncols()
        );
        return Err(EngineError::shape(
            "Bias vector length must match matrix column count.",
        ));
    }
    Ok(a_input + a_bias)
}

pub fn relu(a_input: &Array2<f32>) -> Array2<f32> {
    a_input.mapv(|x| x.max(0.0))
}

/// Per row normalization: `gamma[j] * (x - mean) / sqrt(var + epsilon) + beta[j]`.
///
/// Uses the population variance. Empty input yields empty output.
pub fn layer_norm(
    a_input: &Array2<f32>,
    a_gamma: &Array1<f32>,
    a_beta: &Array1<f32>,
    d_epsilon: f32,
) -> Result<Array2<f32>> {
    if a_input.nrows() == 0 || a_input.ncols() == 0 {
        return Ok(a_input.clone());
    }
    let i_cols = a_input.ncols();
    if a_gamma.len() != i_cols || a_beta.len() != i_cols {
        return Err(EngineError::shape(format!(
            "LayerNorm gamma/beta length ({}/{}) must match column count ({})",
            a_gamma.len(),
            a_beta.len(),
            i_cols
        )));
    }

    let d_n = i_cols as f32;
    let mut a_out = Array2::<f32>::zeros(a_input.raw_dim());
    for (a_row, mut a_out_row) in a_input.rows().into_iter().zip(a_out.rows_mut()) {
        let d_mean = a_row.sum() / d_n;
        let d_var = a_row.iter().map(|&x| (x - d_mean) * (x - d_mean)).sum::<f32>() / d_n;
        let d_inv_std = 1.0 / (d_var + d_epsilon).sqrt();

        for j in 0..i_cols {
            a_out_row[j] = a_gamma[j] * (a_row[j] - d_mean) * d_inv_std + a_beta[j];
        }
    }
    Ok(a_out)
}

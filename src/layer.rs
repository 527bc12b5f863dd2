// layer.rs
// Description: Encoder sublayers that own freshly generated weights: the Q/K/V projection,
//              the attention output projection, the two layer feed forward network and the
//              residual add + layer norm. Each forward returns its intermediates so the pipeline
//              can publish them.
// History:
// - 2026-10-17: Strip backward passes, optimizers and checkpoint hooks, forward only.
// - 2026-10-17: Constructors validate shapes and return Result instead of panicking.
// - 2026-10-17: Uniform teaching scale init via params, biases become vectors.

use ndarray::{Array1, Array2};

use crate::attention;
use crate::error::{EngineError, Result};
use crate::math;
use crate::params;

pub trait Layer {
    fn layer_type(&self) -> &str;

    fn parameters(&self) -> usize;
}

// ---------------------------
// QkvProjection
// ---------------------------
pub struct QkvProjection {
    i_num_heads: usize,
    i_head_dim: usize,

    // Projection matrices: [embedding_dim, embedding_dim]
    pub w_q: Array2<f32>,
    pub w_k: Array2<f32>,
    pub w_v: Array2<f32>,
}

/// Projected Q/K/V `[seq, embedding_dim]` plus their per head slices `[seq, head_dim]`.
pub struct QkvProjected {
    pub q: Array2<f32>,
    pub k: Array2<f32>,
    pub v: Array2<f32>,
    pub q_heads: Vec<Array2<f32>>,
    pub k_heads: Vec<Array2<f32>>,
    pub v_heads: Vec<Array2<f32>>,
}

impl QkvProjection {
    pub fn new(i_embedding_dim: usize, i_num_heads: usize) -> Result<Self> {
        let i_head_dim = Self::checked_head_dim(i_embedding_dim, i_num_heads)?;
        Ok(Self {
            i_num_heads,
            i_head_dim,
            w_q: params::random_matrix(i_embedding_dim, i_embedding_dim)?,
            w_k: params::random_matrix(i_embedding_dim, i_embedding_dim)?,
            w_v: params::random_matrix(i_embedding_dim, i_embedding_dim)?,
        })
    }

    #[cfg(test)]
    fn from_weights(
        w_q: Array2<f32>,
        w_k: Array2<f32>,
        w_v: Array2<f32>,
        i_num_heads: usize,
    ) -> Result<Self> {
        if w_q.dim() != w_k.dim() || w_q.dim() != w_v.dim() || w_q.nrows() != w_q.ncols() {
            return Err(EngineError::shape("Wq, Wk and Wv must be equal square matrices"));
        }
        let i_head_dim = Self::checked_head_dim(w_q.ncols(), i_num_heads)?;
        Ok(Self {
            i_num_heads,
            i_head_dim,
            w_q,
            w_k,
            w_v,
        })
    }

    fn checked_head_dim(i_embedding_dim: usize, i_num_heads: usize) -> Result<usize> {
        if i_embedding_dim == 0 || i_num_heads == 0 {
            return Err(EngineError::config("d_model and Num Heads must be positive integers."));
        }
        if i_embedding_dim % i_num_heads != 0 {
            return Err(EngineError::config(format!(
                "d_model ({}) must be divisible by Num Heads ({}).",
                i_embedding_dim, i_num_heads
            )));
        }
        Ok(i_embedding_dim / i_num_heads)
    }

    pub fn num_heads(&self) -> usize {
        self.i_num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.i_head_dim
    }

    pub fn forward(&self, a_input: &Array2<f32>) -> Result<QkvProjected> {
        let a_q = math::multiply(a_input, &self.w_q)?;
        let a_k = math::multiply(a_input, &self.w_k)?;
        let a_v = math::multiply(a_input, &self.w_v)?;

        let v_q = attention::split_heads(&a_q, self.i_num_heads, self.i_head_dim)?;
        let v_k = attention::split_heads(&a_k, self.i_num_heads, self.i_head_dim)?;
        let v_v = attention::split_heads(&a_v, self.i_num_heads, self.i_head_dim)?;

        Ok(QkvProjected {
            q: a_q,
            k: a_k,
            v: a_v,
            q_heads: v_q,
            k_heads: v_k,
            v_heads: v_v,
        })
    }
}

impl Layer for QkvProjection {
    fn layer_type(&self) -> &str {
        "QkvProjection"
    }

    fn parameters(&self) -> usize {
        self.w_q.len() + self.w_k.len() + self.w_v.len()
    }
}

// ---------------------------
// OutputProjection
// ---------------------------
pub struct OutputProjection {
    // [num_heads * head_dim, embedding_dim]
    pub w_o: Array2<f32>,
}

impl OutputProjection {
    pub fn new(i_concat_dim: usize) -> Result<Self> {
        Ok(Self {
            w_o: params::random_matrix(i_concat_dim, i_concat_dim)?,
        })
    }

    pub fn forward(&self, a_concat: &Array2<f32>) -> Result<Array2<f32>> {
        math::multiply(a_concat, &self.w_o)
    }
}

impl Layer for OutputProjection {
    fn layer_type(&self) -> &str {
        "OutputProjection"
    }

    fn parameters(&self) -> usize {
        self.w_o.len()
    }
}

// ---------------------------
// FeedForward
// ---------------------------
pub struct FeedForward {
    pub w1: Array2<f32>,
    pub b1: Array1<f32>,
    pub w2: Array2<f32>,
    pub b2: Array1<f32>,
}

pub struct FeedForwardTrace {
    // x·W1 + b1, before the activation.
    pub hidden_linear: Array2<f32>,
    pub hidden_relu: Array2<f32>,
    pub output: Array2<f32>,
}

impl FeedForward {
    pub fn new(i_embedding_dim: usize, i_hidden_dim: usize) -> Result<Self> {
        if i_hidden_dim == 0 {
            return Err(EngineError::config("d_ff must be a positive integer."));
        }
        Ok(Self {
            w1: params::random_matrix(i_embedding_dim, i_hidden_dim)?,
            b1: params::random_vector(i_hidden_dim)?,
            w2: params::random_matrix(i_hidden_dim, i_embedding_dim)?,
            b2: params::random_vector(i_embedding_dim)?,
        })
    }

    pub fn hidden_dim(&self) -> usize {
        self.w1.ncols()
    }

    // relu(x·W1 + b1)·W2 + b2, without residual.
    pub fn forward(&self, a_input: &Array2<f32>) -> Result<FeedForwardTrace> {
        let a_hidden_linear = math::add_bias(&math::multiply(a_input, &self.w1)?, &self.b1)?;
        let a_hidden_relu = math::relu(&a_hidden_linear);
        let a_out = math::add_bias(&math::multiply(&a_hidden_relu, &self.w2)?, &self.b2)?;

        Ok(FeedForwardTrace {
            hidden_linear: a_hidden_linear,
            hidden_relu: a_hidden_relu,
            output: a_out,
        })
    }
}

impl Layer for FeedForward {
    fn layer_type(&self) -> &str {
        "FeedForward"
    }

    fn parameters(&self) -> usize {
        self.w1.len() + self.b1.len() + self.w2.len() + self.b2.len()
    }
}

// ---------------------------
// AddNorm
// ---------------------------
pub struct AddNorm {
    epsilon: f32,
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
}

impl AddNorm {
    // Identity affine: gamma ones, beta zeros.
    pub fn new(i_embedding_dim: usize) -> Self {
        Self {
            epsilon: math::LAYER_NORM_EPSILON,
            gamma: Array1::ones(i_embedding_dim),
            beta: Array1::zeros(i_embedding_dim),
        }
    }

    // Returns (residual sum, normalized residual).
    pub fn forward(
        &self,
        a_input: &Array2<f32>,
        a_sublayer_out: &Array2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let a_residual = math::elementwise_add(a_input, a_sublayer_out)?;
        let a_normed = math::layer_norm(&a_residual, &self.gamma, &self.beta, self.epsilon)?;
        Ok((a_residual, a_normed))
    }
}

impl Layer for AddNorm {
    fn layer_type(&self) -> &str {
        "AddNorm"
    }

    fn parameters(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }
}

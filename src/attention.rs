// attention.rs
// Description: Attention engine. Splits projected Q/K/V into heads, runs scaled dot product
//              attention independently per head and concatenates the head outputs again.
//              Built only on the math primitives.
// History:
// - 2026-10-17: Extract split/concat/head forward from MultiHeadSelfAttention, drop causal mask.
// - 2026-10-17: Keep per head scaled scores and weights for inspection.

use ndarray::{s, Array2};

use crate::error::{EngineError, Result};
use crate::math;

/// Everything one head produces: scaled scores `[seq, seq]`, softmax weights `[seq, seq]`
/// and the weighted sum of values `[seq, head_dim]`.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadAttention {
    pub scaled_scores: Array2<f32>,
    pub weights: Array2<f32>,
    pub output: Array2<f32>,
}

// [seq, num_heads * head_dim] -> num_heads x [seq, head_dim], head h owns columns
// h*head_dim .. (h+1)*head_dim. Empty input gives an empty list.
pub fn split_heads(
    a_x: &Array2<f32>,
    i_num_heads: usize,
    i_head_dim: usize,
) -> Result<Vec<Array2<f32>>> {
    if a_x.is_empty() {
        return Ok(Vec::new());
    }
    if a_x.ncols() != i_num_heads * i_head_dim {
        return Err(EngineError::shape(format!(
            "split_heads: {} columns cannot be split into {} heads of width {}",
            a_x.ncols(),
            i_num_heads,
            i_head_dim
        )));
    }

    let mut v_heads: Vec<Array2<f32>> = Vec::with_capacity(i_num_heads);
    for i_h in 0..i_num_heads {
        let i_start = i_h * i_head_dim;
        let i_end = i_start + i_head_dim;
        v_heads.push(a_x.slice(s![.., i_start..i_end]).to_owned());
    }
    Ok(v_heads)
}

pub fn concat_heads(
    v_heads: &[Array2<f32>],
    i_num_heads: usize,
    i_head_dim: usize,
) -> Result<Array2<f32>> {
    if v_heads.is_empty() || v_heads.len() != i_num_heads {
        return Err(EngineError::shape(format!(
            "concat_heads: expected {} head outputs, got {}",
            i_num_heads,
            v_heads.len()
        )));
    }

    let i_seq_len = v_heads[0].nrows();
    if i_seq_len == 0 {
        return Err(EngineError::shape("concat_heads: head outputs are empty"));
    }
    for (i_h, a_h) in v_heads.iter().enumerate() {
        if a_h.nrows() != i_seq_len || a_h.ncols() != i_head_dim {
            return Err(EngineError::shape(format!(
                "concat_heads: head {} is {}x{}, expected {}x{}",
                i_h,
                a_h.nrows(),
                a_h.ncols(),
                i_seq_len,
                i_head_dim
            )));
        }
    }

    let mut a_out = Array2::<f32>::zeros((i_seq_len, i_num_heads * i_head_dim));
    for (i_h, a_h) in v_heads.iter().enumerate() {
        let i_start = i_h * i_head_dim;
        let i_end = i_start + i_head_dim;
        a_out.slice_mut(s![.., i_start..i_end]).assign(a_h);
    }
    Ok(a_out)
}

/// `softmax(Q · Kᵀ / sqrt(head_dim)) · V` for a single head. No mask is applied, every
/// token attends to every token.
pub fn scaled_dot_product_attention(
    a_q: &Array2<f32>,
    a_k: &Array2<f32>,
    a_v: &Array2<f32>,
) -> Result<HeadAttention> {
    let i_head_dim = a_k.ncols();
    let d_scale = (i_head_dim as f32).sqrt().max(1e-12);

    let a_scores = math::multiply(a_q, &math::transpose(a_k))?;
    let a_scaled = math::scale(&a_scores, 1.0 / d_scale);
    let a_weights = math::softmax_rows(&a_scaled);
    let a_out = math::multiply(&a_weights, a_v)?;

    Ok(HeadAttention {
        scaled_scores: a_scaled,
        weights: a_weights,
        output: a_out,
    })
}

// Runs every head on its own slice. Heads never see each other's data.
pub fn attend_all_heads(
    v_q: &[Array2<f32>],
    v_k: &[Array2<f32>],
    v_v: &[Array2<f32>],
) -> Result<Vec<HeadAttention>> {
    if v_q.len() != v_k.len() || v_q.len() != v_v.len() {
        return Err(EngineError::shape(format!(
            "attention: head count mismatch q={} k={} v={}",
            v_q.len(),
            v_k.len(),
            v_v.len()
        )));
    }

    v_q.iter()
        .zip(v_k.iter())
        .zip(v_v.iter())
        .enumerate()
        .map(|(i_h, ((a_q, a_k), a_v))| {
            scaled_dot_product_attention(a_q, a_k, a_v).map_err(|e| {
                log::error!("attention head {} failed: {}", i_h, e);
                e
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn test_split_heads_partitions_columns_contiguously() {
        let a = array![[0.0f32, 1.0, 2.0, 3.0], [4.0, 5.0, 6.0, 7.0]];
        let v = split_heads(&a, 2, 2).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0], array![[0.0f32, 1.0], [4.0, 5.0]]);
        assert_eq!(v[1], array![[2.0f32, 3.0], [6.0, 7.0]]);
    }

    #[test]
    fn test_split_heads_empty_and_mismatch() {
        let a_empty = Array2::<f32>::zeros((0, 8));
        assert!(split_heads(&a_empty, 2, 4).unwrap().is_empty());

        let a = Array2::<f32>::zeros((2, 9));
        assert!(matches!(split_heads(&a, 2, 4), Err(EngineError::ShapeMismatch(_))));
    }

    #[test]
    fn test_concat_heads_requires_all_heads() {
        let a_h = Array2::<f32>::ones((2, 4));
        assert!(concat_heads(&[a_h.clone()], 2, 4).is_err());
        assert!(concat_heads(&[], 0, 4).is_err());
        assert!(concat_heads(&[a_h.clone(), Array2::ones((3, 4))], 2, 4).is_err());
        assert!(concat_heads(&[Array2::zeros((0, 4)), Array2::zeros((0, 4))], 2, 4).is_err());
        assert_eq!(concat_heads(&[a_h.clone(), a_h], 2, 4).unwrap().dim(), (2, 8));
    }

    #[test]
    fn test_sdpa_known_values() {
        let a_q = array![[1.0f32, 0.0]];
        let a_k = array![[1.0f32, 0.0], [0.0, 1.0]];
        let a_v = array![[1.0f32, 2.0], [3.0, 4.0]];
        let h = scaled_dot_product_attention(&a_q, &a_k, &a_v).unwrap();

        let d_s = 1.0 / 2.0f32.sqrt();
        assert!((h.scaled_scores[[0, 0]] - d_s).abs() < 1e-6);
        assert!(h.scaled_scores[[0, 1]].abs() < 1e-6);

        let d_w0 = d_s.exp() / (d_s.exp() + 1.0);
        assert!((h.weights[[0, 0]] - d_w0).abs() < 1e-6);
        assert!((h.weights.sum() - 1.0).abs() < 1e-6);

        let d_out0 = d_w0 * 1.0 + (1.0 - d_w0) * 3.0;
        assert!((h.output[[0, 0]] - d_out0).abs() < 1e-5);
    }

    #[test]
    fn test_sdpa_zero_queries_average_values() {
        let a_q = Array2::<f32>::zeros((2, 2));
        let a_k = array![[1.0f32, 2.0], [3.0, 4.0]];
        let a_v = array![[2.0f32, 0.0], [4.0, 2.0]];
        let h = scaled_dot_product_attention(&a_q, &a_k, &a_v).unwrap();
        assert!(h.weights.iter().all(|&w| (w - 0.5).abs() < 1e-6));
        for r in h.output.rows() {
            assert!((r[0] - 3.0).abs() < 1e-6 && (r[1] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_heads_are_independent() {
        let a_x = array![[0.1f32, 0.2, 0.3, 0.4], [0.5, 0.6, 0.7, 0.8]];
        let v_heads = split_heads(&a_x, 2, 2).unwrap();
        let v_out = attend_all_heads(&v_heads, &v_heads, &v_heads).unwrap();

        let mut v_changed = v_heads.clone();
        v_changed[1] = v_changed[1].mapv(|x| x * 10.0);
        let v_out2 = attend_all_heads(&v_changed, &v_changed, &v_changed).unwrap();

        assert_eq!(v_out[0], v_out2[0]);
        assert_ne!(v_out[1].output, v_out2[1].output);
    }

    #[test]
    fn test_attend_all_heads_count_mismatch() {
        let a = Array2::<f32>::ones((2, 2));
        let r = attend_all_heads(&[a.clone(), a.clone()], &[a.clone()], &[a.clone(), a]);
        assert!(r.is_err());
    }

    fn arb_heads() -> impl Strategy<Value = (usize, usize, Array2<f32>)> {
        (1usize..5, 1usize..5, 1usize..5).prop_flat_map(|(i_h, i_d, i_seq)| {
            prop::collection::vec(-3.0f32..3.0, i_seq * i_h * i_d).prop_map(move |v| {
                (i_h, i_d, Array2::from_shape_vec((i_seq, i_h * i_d), v).unwrap())
            })
        })
    }

    proptest! {
        #[test]
        fn prop_split_then_concat_round_trips((i_heads, i_head_dim, a_x) in arb_heads()) {
            let v_heads = split_heads(&a_x, i_heads, i_head_dim).unwrap();
            prop_assert_eq!(v_heads.len(), i_heads);
            let a_back = concat_heads(&v_heads, i_heads, i_head_dim).unwrap();
            prop_assert_eq!(a_back, a_x);
        }
    }
}

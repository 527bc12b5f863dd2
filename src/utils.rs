// utils.rs
// Description: Small helpers shared by the engine and the menu front end: display rounding,
//              text rendering of matrices and JSON (de)serialization wrappers.
// History:
// - 2026-10-17: Replace checkpoint JSON helpers with generic serde_json wrappers.
// - 2026-10-17: Add matrix text rendering for the menu front end.

use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, Result};

pub const DISPLAY_DECIMALS: i32 = 4;

pub fn round_to(d_val: f32, i_decimals: i32) -> f32 {
    let d_factor = 10f32.powi(i_decimals);
    (d_val * d_factor).round() / d_factor
}

pub fn round_display(d_val: f32) -> f32 {
    round_to(d_val, DISPLAY_DECIMALS)
}

pub fn to_rows(a_input: &Array2<f32>) -> Vec<Vec<f32>> {
    a_input
        .rows()
        .into_iter()
        .map(|a_row| a_row.iter().map(|&d| round_display(d)).collect())
        .collect()
}

// Renders a matrix as a right aligned text grid, one line per row.
pub fn format_matrix(s_name: &str, a_input: &Array2<f32>) -> String {
    let mut s_out = format!("{} [{}x{}]", s_name, a_input.nrows(), a_input.ncols());
    for a_row in a_input.rows() {
        s_out.push_str("\n ");
        for &d in a_row.iter() {
            s_out.push_str(&format!(" {:>8.4}", d));
        }
    }
    s_out
}

pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| EngineError::ConfigLoad(e.to_string()))
}

pub fn from_json<T: DeserializeOwned>(s_json: &str) -> Result<T> {
    serde_json::from_str(s_json).map_err(|e| EngineError::ConfigLoad(e.to_string()))
}

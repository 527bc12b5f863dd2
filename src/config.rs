// config.rs
// Description: Shape parameters of the encoder layer (d_model, head count, d_ff) and the
//              visualizer configuration surface (input text + model shape), loadable from JSON.
//              head_width and the default d_ff are derived on demand and never stored.
// History:
// - 2026-10-17: Replace compile time EMBEDDING_DIM/HIDDEN_DIM constants with a runtime config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const DEFAULT_INPUT_TEXT: &str = "hello,world";
pub const DEFAULT_MODEL_WIDTH: usize = 8;
pub const DEFAULT_HEAD_COUNT: usize = 2;
// d_ff defaults to d_model * FFN_WIDTH_FACTOR when not set explicitly.
pub const FFN_WIDTH_FACTOR: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    model_width: usize,
    head_count: usize,
    feed_forward_width: Option<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_WIDTH, DEFAULT_HEAD_COUNT)
    }
}

impl ModelConfig {
    pub fn new(i_model_width: usize, i_head_count: usize) -> Self {
        Self {
            model_width: i_model_width,
            head_count: i_head_count,
            feed_forward_width: None,
        }
    }

    pub fn with_feed_forward_width(mut self, i_ffn_width: usize) -> Self {
        self.feed_forward_width = Some(i_ffn_width);
        self
    }

    pub fn model_width(&self) -> usize {
        self.model_width
    }

    pub fn head_count(&self) -> usize {
        self.head_count
    }

    pub fn feed_forward_width(&self) -> Option<usize> {
        self.feed_forward_width
    }

    /// `model_width / head_count`, or `None` if the width does not split evenly.
    pub fn head_width(&self) -> Option<usize> {
        if self.model_width == 0
            || self.head_count == 0
            || self.model_width % self.head_count != 0
        {
            return None;
        }
        Some(self.model_width / self.head_count)
    }

    /// Explicit d_ff, or `model_width * 4` when unset. `None` if the default overflows.
    pub fn ffn_width(&self) -> Option<usize> {
        match self.feed_forward_width {
            Some(i_ffn_width) => Some(i_ffn_width),
            None => self.model_width.checked_mul(FFN_WIDTH_FACTOR),
        }
    }

    // Setters only update the shape. Stages pick the change up when they run next.
    pub fn set_model_width(&mut self, i_model_width: usize) {
        log::debug!("model_width {} -> {}", self.model_width, i_model_width);
        self.model_width = i_model_width;
    }

    pub fn set_head_count(&mut self, i_head_count: usize) {
        log::debug!("head_count {} -> {}", self.head_count, i_head_count);
        self.head_count = i_head_count;
    }

    pub fn set_feed_forward_width(&mut self, opt_ffn_width: Option<usize>) {
        log::debug!(
            "feed_forward_width {:?} -> {:?}",
            self.feed_forward_width,
            opt_ffn_width
        );
        self.feed_forward_width = opt_ffn_width;
    }

    pub fn check_model_width(&self) -> Result<usize> {
        if self.model_width == 0 {
            return Err(EngineError::config("d_model must be a positive integer."));
        }
        Ok(self.model_width)
    }

    // Returns the head width when d_model splits evenly over a positive head count.
    pub fn check_heads(&self) -> Result<usize> {
        self.check_model_width()?;
        if self.head_count == 0 {
            return Err(EngineError::config("Num Heads must be a positive integer."));
        }
        self.head_width().ok_or_else(|| {
            EngineError::config(format!(
                "d_model ({}) must be divisible by Num Heads ({}).",
                self.model_width, self.head_count
            ))
        })
    }

    pub fn check_ffn_width(&self) -> Result<usize> {
        let i_ffn_width = self.ffn_width().ok_or_else(|| {
            EngineError::config(format!(
                "d_ff (d_model {} x {}) is out of range.",
                self.model_width, FFN_WIDTH_FACTOR
            ))
        })?;
        if i_ffn_width == 0 {
            return Err(EngineError::config("d_ff must be a positive integer."));
        }
        Ok(i_ffn_width)
    }

    pub fn validate(&self) -> Result<()> {
        self.check_heads()?;
        self.check_ffn_width()?;
        Ok(())
    }
}

/// Everything the engine reads from the front end: the raw token text plus the shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VizConfig {
    pub input_text: String,
    #[serde(flatten)]
    pub model: ModelConfig,
}

impl Default for VizConfig {
    fn default() -> Self {
        Self {
            input_text: DEFAULT_INPUT_TEXT.to_string(),
            model: ModelConfig::default(),
        }
    }
}

impl VizConfig {
    pub fn from_json_str(s_json: &str) -> Result<Self> {
        let cfg: VizConfig = crate::utils::from_json(s_json)?;
        cfg.model.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s_json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        let cfg = Self::from_json_str(&s_json)?;
        log::info!("loaded config from {}", path.display());
        Ok(cfg)
    }
}

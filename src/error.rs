// error.rs
// Description: Error taxonomy of the encoder layer engine. Every variant is recoverable,
//              stages report them as status messages and leave pipeline state untouched.
// History:
// - 2026-10-17: Replace string error codes with a typed error enum.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Invalid shape parameters (non positive dimension, width not divisible by heads).
    #[error("{0}")]
    Config(String),

    /// Upstream tensors are absent or empty, or the stage is locked by the stage order.
    #[error("{0}")]
    MissingPrerequisite(String),

    /// Operand shapes disagree.
    #[error("{0}")]
    ShapeMismatch(String),

    /// Random distribution could not be built.
    #[error("Parameter generation failed: {0}")]
    Parameter(String),

    /// Config file could not be read or parsed.
    #[error("Config load failed: {0}")]
    ConfigLoad(String),
}

impl EngineError {
    pub fn config(s_msg: impl Into<String>) -> Self {
        EngineError::Config(s_msg.into())
    }

    pub fn missing(s_msg: impl Into<String>) -> Self {
        EngineError::MissingPrerequisite(s_msg.into())
    }

    pub fn shape(s_msg: impl Into<String>) -> Self {
        EngineError::ShapeMismatch(s_msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

//! Stepwise forward pass of a single Transformer encoder layer.
//!
//! The engine is split into the numeric core (`math`, `params`, `attention`, `layer`) and the
//! stage pipeline (`stage`, `pipeline`) that a visualizer drives one button press at a time.
//! Every intermediate tensor stays inspectable by name until an upstream stage runs again.

pub mod attention;
pub mod config;
pub mod error;
pub mod layer;
pub mod math;
pub mod params;
pub mod pipeline;
pub mod stage;
pub mod tokenizer;
pub mod utils;

pub use config::{ModelConfig, VizConfig};
pub use error::{EngineError, Result};
pub use pipeline::{NamedTensor, Pipeline, PipelineSnapshot, StageReport, StatusKind};
pub use stage::{Stage, STAGE_ORDER};

// pipeline.rs
// Description: Encoder layer pipeline. Owns every intermediate tensor of the seven stages,
//              runs a stage on request (gated by the stage order), invalidates everything
//              downstream of a rerun stage and reports status back to the front end.
//              A stage computes all of its outputs first and commits them in one step, so a
//              failing stage never leaves partial or stale tensors behind.
// History:
// - 2026-10-17: Replace the Llm layer stack with an explicit stage by stage pipeline.
// - 2026-10-17: Add named tensor catalogue, head view and JSON snapshot for front ends.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::Serialize;

use crate::attention::{self, HeadAttention};
use crate::config::ModelConfig;
use crate::error::{EngineError, Result};
use crate::layer::{
    AddNorm, FeedForward, FeedForwardTrace, Layer, OutputProjection, QkvProjected, QkvProjection,
};
use crate::math;
use crate::params;
use crate::stage::{self, Stage, STAGE_ORDER};
use crate::tokenizer;
use crate::utils;

pub struct InputTensors {
    pub tokens: Vec<String>,
    pub embeddings: Array2<f32>,
    pub positional: Array2<f32>,
    // embeddings + positional, the layer input.
    pub summed: Array2<f32>,
}

pub struct QkvTensors {
    pub projection: QkvProjection,
    pub projected: QkvProjected,
}

pub struct SdpaTensors {
    // Indexed by head, 0..head_count.
    pub heads: Vec<HeadAttention>,
}

pub struct ConcatTensors {
    pub concat: Array2<f32>,
    pub projection: OutputProjection,
    // concat · Wo, the multi head attention output.
    pub output: Array2<f32>,
}

pub struct AddNormTensors {
    pub norm: AddNorm,
    pub residual: Array2<f32>,
    pub output: Array2<f32>,
}

pub struct FfnTensors {
    pub ffn: FeedForward,
    pub trace: FeedForwardTrace,
}

enum StageOutput {
    Input(InputTensors),
    Qkv(QkvTensors),
    Sdpa(SdpaTensors),
    Concat(ConcatTensors),
    MhaAddNorm(AddNormTensors),
    Ffn(FfnTensors),
    FfnAddNorm(AddNormTensors),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Info,
    Error,
}

/// Result of one `run_stage` call as seen by the front end.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StatusKind,
    pub message: String,
    pub last_completed: Option<Stage>,
    // Names of the tensors the stage produced, empty on error.
    pub tensors: Vec<String>,
}

impl StageReport {
    pub fn is_ok(&self) -> bool {
        self.status == StatusKind::Info
    }
}

/// A read only view of one published tensor. Vectors (biases, gamma, beta) appear as `1 x n`.
pub struct NamedTensor<'a> {
    pub name: String,
    pub stage: Stage,
    pub view: ArrayView2<'a, f32>,
}

/// Everything the pipeline holds for a single head.
#[derive(Default)]
pub struct HeadView<'a> {
    pub q: Option<&'a Array2<f32>>,
    pub k: Option<&'a Array2<f32>>,
    pub v: Option<&'a Array2<f32>>,
    pub scaled_scores: Option<&'a Array2<f32>>,
    pub weights: Option<&'a Array2<f32>>,
    pub output: Option<&'a Array2<f32>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TensorSnapshot {
    pub name: String,
    pub stage: Stage,
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<Vec<f32>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineSnapshot {
    pub tokens: Vec<String>,
    pub last_completed: String,
    pub enabled_stages: Vec<Stage>,
    pub tensors: Vec<TensorSnapshot>,
}

fn non_empty(a: &Array2<f32>) -> bool {
    a.nrows() > 0
}

fn row_view(a: &Array1<f32>) -> ArrayView2<'_, f32> {
    a.view().insert_axis(Axis(0))
}

#[derive(Default)]
pub struct Pipeline {
    last_completed: Option<Stage>,
    input: Option<InputTensors>,
    qkv: Option<QkvTensors>,
    sdpa: Option<SdpaTensors>,
    concat: Option<ConcatTensors>,
    mha_addnorm: Option<AddNormTensors>,
    ffn: Option<FfnTensors>,
    ffn_addnorm: Option<AddNormTensors>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_completed(&self) -> Option<Stage> {
        self.last_completed
    }

    pub fn is_stage_enabled(&self, stage: Stage) -> bool {
        stage::is_stage_enabled(stage, self.last_completed)
    }

    pub fn input(&self) -> Option<&InputTensors> {
        self.input.as_ref()
    }

    pub fn qkv(&self) -> Option<&QkvTensors> {
        self.qkv.as_ref()
    }

    pub fn sdpa(&self) -> Option<&SdpaTensors> {
        self.sdpa.as_ref()
    }

    pub fn concat(&self) -> Option<&ConcatTensors> {
        self.concat.as_ref()
    }

    pub fn mha_addnorm(&self) -> Option<&AddNormTensors> {
        self.mha_addnorm.as_ref()
    }

    pub fn ffn(&self) -> Option<&FfnTensors> {
        self.ffn.as_ref()
    }

    pub fn ffn_addnorm(&self) -> Option<&AddNormTensors> {
        self.ffn_addnorm.as_ref()
    }

    pub fn tokens(&self) -> &[String] {
        self.input.as_ref().map(|t| t.tokens.as_slice()).unwrap_or(&[])
    }

    /// Whether the stage currently has published tensors.
    pub fn has_tensors(&self, stage: Stage) -> bool {
        match stage {
            Stage::Input => self.input.is_some(),
            Stage::QkvMha => self.qkv.is_some(),
            Stage::SdpaHeads => self.sdpa.is_some(),
            Stage::ConcatFinalize => self.concat.is_some(),
            Stage::MhaAddNorm => self.mha_addnorm.is_some(),
            Stage::Ffn => self.ffn.is_some(),
            Stage::FfnAddNorm => self.ffn_addnorm.is_some(),
        }
    }

    /// Runs `stage` with the current configuration and token text.
    ///
    /// Errors are reported in the returned `StageReport` with `StatusKind::Error` and leave
    /// every tensor and the last completed stage untouched.
    pub fn run_stage(
        &mut self,
        stage: Stage,
        config: &ModelConfig,
        s_input_text: &str,
    ) -> StageReport {
        match self.try_run_stage(stage, config, s_input_text) {
            Ok(s_msg) => {
                log::info!("stage {} completed: {}", stage, s_msg);
                StageReport {
                    stage,
                    status: StatusKind::Info,
                    message: s_msg,
                    last_completed: self.last_completed,
                    tensors: self.stage_tensors(stage).into_iter().map(|t| t.name).collect(),
                }
            }
            Err(e) => {
                log::warn!("stage {} failed: {}", stage, e);
                StageReport {
                    stage,
                    status: StatusKind::Error,
                    message: e.to_string(),
                    last_completed: self.last_completed,
                    tensors: Vec::new(),
                }
            }
        }
    }

    pub fn try_run_stage(
        &mut self,
        stage: Stage,
        config: &ModelConfig,
        s_input_text: &str,
    ) -> Result<String> {
        if !self.is_stage_enabled(stage) {
            let s_needed = stage.predecessor().map(Stage::label).unwrap_or("");
            return Err(EngineError::missing(format!(
                "Stage {} is locked, run {} first.",
                stage.label(),
                s_needed
            )));
        }

        let (output, s_msg) = match stage {
            Stage::Input => {
                let t = Self::compute_input(config, s_input_text)?;
                let s_msg = format!("Generated input for {} tokens.", t.tokens.len());
                (StageOutput::Input(t), s_msg)
            }
            Stage::QkvMha => {
                let t = self.compute_qkv(config)?;
                let s_msg = format!(
                    "MHA Q,K,V (H:{},dk/h:{}).",
                    t.projection.num_heads(),
                    t.projection.head_dim()
                );
                (StageOutput::Qkv(t), s_msg)
            }
            Stage::SdpaHeads => {
                let t = self.compute_sdpa(config)?;
                let s_msg = format!("SDPA for {} heads.", t.heads.len());
                (StageOutput::Sdpa(t), s_msg)
            }
            Stage::ConcatFinalize => {
                let t = self.compute_concat(config)?;
                (StageOutput::Concat(t), "Heads concatenated & projected.".to_string())
            }
            Stage::MhaAddNorm => {
                let t = self.compute_mha_addnorm()?;
                (StageOutput::MhaAddNorm(t), "Add & Norm after MHA.".to_string())
            }
            Stage::Ffn => {
                let t = self.compute_ffn(config)?;
                let s_msg = format!("FFN executed (d_ff:{}).", t.ffn.hidden_dim());
                (StageOutput::Ffn(t), s_msg)
            }
            Stage::FfnAddNorm => {
                let t = self.compute_ffn_addnorm()?;
                (StageOutput::FfnAddNorm(t), "Encoder Layer Complete!".to_string())
            }
        };

        self.invalidate_from(stage);
        self.commit(output);
        self.last_completed = Some(stage);
        Ok(s_msg)
    }

    /// Clears the tensors of every stage strictly after `stage` and pulls the last completed
    /// stage back to `stage` if it was further along.
    pub fn invalidate_from(&mut self, stage: Stage) {
        for &st in stage::downstream_of(stage) {
            if self.has_tensors(st) {
                log::debug!("invalidate {} (upstream {} changed)", st, stage);
            }
            self.clear(st);
        }
        if self.last_completed.is_some_and(|last| last > stage) {
            self.last_completed = Some(stage);
        }
    }

    /// Drops everything, back to the initial `none` state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn clear(&mut self, stage: Stage) {
        match stage {
            Stage::Input => self.input = None,
            Stage::QkvMha => self.qkv = None,
            Stage::SdpaHeads => self.sdpa = None,
            Stage::ConcatFinalize => self.concat = None,
            Stage::MhaAddNorm => self.mha_addnorm = None,
            Stage::Ffn => self.ffn = None,
            Stage::FfnAddNorm => self.ffn_addnorm = None,
        }
    }

    fn commit(&mut self, output: StageOutput) {
        match output {
            StageOutput::Input(t) => self.input = Some(t),
            StageOutput::Qkv(t) => self.qkv = Some(t),
            StageOutput::Sdpa(t) => self.sdpa = Some(t),
            StageOutput::Concat(t) => self.concat = Some(t),
            StageOutput::MhaAddNorm(t) => self.mha_addnorm = Some(t),
            StageOutput::Ffn(t) => self.ffn = Some(t),
            StageOutput::FfnAddNorm(t) => self.ffn_addnorm = Some(t),
        }
    }

    fn compute_input(config: &ModelConfig, s_input_text: &str) -> Result<InputTensors> {
        let i_width = config.check_model_width()?;

        let v_tokens = tokenizer::tokenize(s_input_text);
        if v_tokens.is_empty() {
            log::warn!("input text {:?} contains no tokens", s_input_text);
        }

        let a_embeddings = params::token_embeddings(&v_tokens, i_width)?;
        let a_positional = params::positional_encoding(v_tokens.len(), i_width);
        let a_summed = math::elementwise_add(&a_embeddings, &a_positional)?;

        Ok(InputTensors {
            tokens: v_tokens,
            embeddings: a_embeddings,
            positional: a_positional,
            summed: a_summed,
        })
    }

    fn compute_qkv(&self, config: &ModelConfig) -> Result<QkvTensors> {
        config.check_heads()?;
        let a_input = self
            .input
            .as_ref()
            .map(|t| &t.summed)
            .filter(|a| non_empty(a))
            .ok_or_else(|| EngineError::missing("Generate input first."))?;

        let projection = QkvProjection::new(config.model_width(), config.head_count())?;
        log::debug!("{} parameters={}", projection.layer_type(), projection.parameters());
        let projected = projection.forward(a_input)?;

        Ok(QkvTensors {
            projection,
            projected,
        })
    }

    fn compute_sdpa(&self, config: &ModelConfig) -> Result<SdpaTensors> {
        let p = self
            .qkv
            .as_ref()
            .map(|t| &t.projected)
            .filter(|p| {
                !p.q_heads.is_empty()
                    && !p.k_heads.is_empty()
                    && !p.v_heads.is_empty()
                    && p.q_heads.len() == config.head_count()
            })
            .ok_or_else(|| EngineError::missing("MHA Q,K,V not calculated."))?;

        let v_heads = attention::attend_all_heads(&p.q_heads, &p.k_heads, &p.v_heads)?;
        Ok(SdpaTensors { heads: v_heads })
    }

    fn compute_concat(&self, config: &ModelConfig) -> Result<ConcatTensors> {
        let sdpa = self
            .sdpa
            .as_ref()
            .filter(|t| {
                t.heads.len() == config.head_count() && t.heads.iter().all(|h| non_empty(&h.output))
            })
            .ok_or_else(|| EngineError::missing("Per-head SDPA outputs not available."))?;
        let i_head_dim = config.check_heads()?;

        let v_outputs: Vec<Array2<f32>> = sdpa.heads.iter().map(|h| h.output.clone()).collect();
        let a_concat = attention::concat_heads(&v_outputs, config.head_count(), i_head_dim)?;

        let projection = OutputProjection::new(config.head_count() * i_head_dim)?;
        log::debug!("{} parameters={}", projection.layer_type(), projection.parameters());
        let a_out = projection.forward(&a_concat)?;

        Ok(ConcatTensors {
            concat: a_concat,
            projection,
            output: a_out,
        })
    }

    fn compute_mha_addnorm(&self) -> Result<AddNormTensors> {
        let a_mha = self.concat.as_ref().map(|t| &t.output).filter(|a| non_empty(a));
        let a_input = self.input.as_ref().map(|t| &t.summed).filter(|a| non_empty(a));
        let (a_mha, a_input) = match (a_mha, a_input) {
            (Some(a_mha), Some(a_input)) => (a_mha, a_input),
            _ => return Err(EngineError::missing("MHA output or original input missing.")),
        };
        if a_mha.dim() != a_input.dim() {
            return Err(EngineError::shape("Dimension mismatch MHA AddNorm."));
        }

        let norm = AddNorm::new(a_input.ncols());
        let (a_residual, a_out) = norm.forward(a_input, a_mha)?;
        Ok(AddNormTensors {
            norm,
            residual: a_residual,
            output: a_out,
        })
    }

    /// FFN input: the normalized MHA output, or the raw MHA output when normalization has
    /// not produced anything.
    pub fn ffn_input(&self) -> Option<&Array2<f32>> {
        self.mha_addnorm
            .as_ref()
            .map(|t| &t.output)
            .filter(|a| non_empty(a))
            .or_else(|| self.concat.as_ref().map(|t| &t.output).filter(|a| non_empty(a)))
    }

    fn compute_ffn(&self, config: &ModelConfig) -> Result<FfnTensors> {
        let a_input = self
            .ffn_input()
            .ok_or_else(|| EngineError::missing("Input for FFN not available."))?;
        let i_ffn_width = config.check_ffn_width()?;

        let ffn = FeedForward::new(a_input.ncols(), i_ffn_width)?;
        log::debug!("{} parameters={}", ffn.layer_type(), ffn.parameters());
        let trace = ffn.forward(a_input)?;
        Ok(FfnTensors { ffn, trace })
    }

    fn compute_ffn_addnorm(&self) -> Result<AddNormTensors> {
        let a_ffn_out = self.ffn.as_ref().map(|t| &t.trace.output).filter(|a| non_empty(a));
        let (a_input, a_ffn_out) = match (self.ffn_input(), a_ffn_out) {
            (Some(a_input), Some(a_ffn_out)) => (a_input, a_ffn_out),
            _ => return Err(EngineError::missing("FFN output or its input missing.")),
        };
        if a_input.dim() != a_ffn_out.dim() {
            return Err(EngineError::shape("Dimension mismatch FFN AddNorm."));
        }

        let norm = AddNorm::new(a_input.ncols());
        let (a_residual, a_out) = norm.forward(a_input, a_ffn_out)?;
        Ok(AddNormTensors {
            norm,
            residual: a_residual,
            output: a_out,
        })
    }

    /// Published tensors of one stage, in display order.
    pub fn stage_tensors(&self, stage: Stage) -> Vec<NamedTensor<'_>> {
        let mut v_out: Vec<NamedTensor<'_>> = Vec::new();
        let mut push = |s_name: String, view| {
            v_out.push(NamedTensor {
                name: s_name,
                stage,
                view,
            })
        };

        match stage {
            Stage::Input => {
                if let Some(t) = &self.input {
                    push("Token_Embeddings".to_string(), t.embeddings.view());
                    push("Positional_Encoding".to_string(), t.positional.view());
                    push("Final_Input".to_string(), t.summed.view());
                }
            }
            Stage::QkvMha => {
                if let Some(t) = &self.qkv {
                    push("Wq_MHA".to_string(), t.projection.w_q.view());
                    push("Wk_MHA".to_string(), t.projection.w_k.view());
                    push("Wv_MHA".to_string(), t.projection.w_v.view());
                    push("Q_Projected".to_string(), t.projected.q.view());
                    push("K_Projected".to_string(), t.projected.k.view());
                    push("V_Projected".to_string(), t.projected.v.view());
                    for (i_h, a) in t.projected.q_heads.iter().enumerate() {
                        push(format!("Q_Head_{}", i_h), a.view());
                    }
                    for (i_h, a) in t.projected.k_heads.iter().enumerate() {
                        push(format!("K_Head_{}", i_h), a.view());
                    }
                    for (i_h, a) in t.projected.v_heads.iter().enumerate() {
                        push(format!("V_Head_{}", i_h), a.view());
                    }
                }
            }
            Stage::SdpaHeads => {
                if let Some(t) = &self.sdpa {
                    for (i_h, h) in t.heads.iter().enumerate() {
                        push(format!("Scores_H{}", i_h), h.scaled_scores.view());
                        push(format!("Weights_H{}", i_h), h.weights.view());
                        push(format!("Output_H{}", i_h), h.output.view());
                    }
                }
            }
            Stage::ConcatFinalize => {
                if let Some(t) = &self.concat {
                    push("Concat_Heads".to_string(), t.concat.view());
                    push("Wo_MHA".to_string(), t.projection.w_o.view());
                    push("MHA_Output".to_string(), t.output.view());
                }
            }
            Stage::MhaAddNorm => {
                if let Some(t) = &self.mha_addnorm {
                    push("MHA_ResSum".to_string(), t.residual.view());
                    push("Gamma_1".to_string(), row_view(&t.norm.gamma));
                    push("Beta_1".to_string(), row_view(&t.norm.beta));
                    push("MHA_NormOut".to_string(), t.output.view());
                }
            }
            Stage::Ffn => {
                if let Some(t) = &self.ffn {
                    push("W1_FFN".to_string(), t.ffn.w1.view());
                    push("b1_FFN".to_string(), row_view(&t.ffn.b1));
                    push("FFN_L1_Bias".to_string(), t.trace.hidden_linear.view());
                    push("FFN_ReLU".to_string(), t.trace.hidden_relu.view());
                    push("W2_FFN".to_string(), t.ffn.w2.view());
                    push("b2_FFN".to_string(), row_view(&t.ffn.b2));
                    push("FFN_Output".to_string(), t.trace.output.view());
                }
            }
            Stage::FfnAddNorm => {
                if let Some(t) = &self.ffn_addnorm {
                    push("FFN_ResSum".to_string(), t.residual.view());
                    push("Gamma_2".to_string(), row_view(&t.norm.gamma));
                    push("Beta_2".to_string(), row_view(&t.norm.beta));
                    push("Encoder_Output".to_string(), t.output.view());
                }
            }
        }
        v_out
    }

    /// Every published tensor in stage order. This is what a renderer draws each frame.
    pub fn named_tensors(&self) -> Vec<NamedTensor<'_>> {
        STAGE_ORDER
            .iter()
            .flat_map(|&st| self.stage_tensors(st))
            .collect()
    }

    pub fn tensor(&self, s_name: &str) -> Option<ArrayView2<'_, f32>> {
        self.named_tensors()
            .into_iter()
            .find(|t| t.name == s_name)
            .map(|t| t.view)
    }

    // Cell value as shown in a tooltip, rounded to display precision.
    pub fn cell_value(&self, s_name: &str, i_row: usize, i_col: usize) -> Option<f32> {
        self.tensor(s_name)
            .and_then(|a| a.get((i_row, i_col)).copied())
            .map(utils::round_display)
    }

    pub fn head_tensors(&self, i_head: usize) -> HeadView<'_> {
        let mut view = HeadView::default();
        if let Some(t) = &self.qkv {
            view.q = t.projected.q_heads.get(i_head);
            view.k = t.projected.k_heads.get(i_head);
            view.v = t.projected.v_heads.get(i_head);
        }
        if let Some(h) = self.sdpa.as_ref().and_then(|t| t.heads.get(i_head)) {
            view.scaled_scores = Some(&h.scaled_scores);
            view.weights = Some(&h.weights);
            view.output = Some(&h.output);
        }
        view
    }

    /// Weight owning sublayers that currently exist, in stage order.
    pub fn layers(&self) -> Vec<&dyn Layer> {
        let mut v_layers: Vec<&dyn Layer> = Vec::new();
        if let Some(t) = &self.qkv {
            v_layers.push(&t.projection);
        }
        if let Some(t) = &self.concat {
            v_layers.push(&t.projection);
        }
        if let Some(t) = &self.mha_addnorm {
            v_layers.push(&t.norm);
        }
        if let Some(t) = &self.ffn {
            v_layers.push(&t.ffn);
        }
        if let Some(t) = &self.ffn_addnorm {
            v_layers.push(&t.norm);
        }
        v_layers
    }

    pub fn network_description(&self) -> String {
        self.layers()
            .iter()
            .map(|l| l.layer_type())
            .collect::<Vec<&str>>()
            .join(", ")
    }

    pub fn total_parameters(&self) -> usize {
        self.layers().iter().map(|l| l.parameters()).sum()
    }

    /// Status line: tokens and the current shape parameters.
    pub fn info_line(&self, config: &ModelConfig) -> String {
        let v_tokens = self.tokens();
        let s_tokens = if v_tokens.is_empty() {
            "N/A".to_string()
        } else {
            v_tokens.join(", ")
        };
        let s_dk = config
            .head_width()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let s_dff = config
            .ffn_width()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        format!(
            "Tokens: {} | d_m: {} | H: {} | d_k: {} | d_ff: {}",
            s_tokens,
            config.model_width(),
            config.head_count(),
            s_dk,
            s_dff
        )
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            tokens: self.tokens().to_vec(),
            last_completed: stage::stage_name(self.last_completed).to_string(),
            enabled_stages: STAGE_ORDER
                .iter()
                .copied()
                .filter(|&st| self.is_stage_enabled(st))
                .collect(),
            tensors: self
                .named_tensors()
                .into_iter()
                .map(|t| TensorSnapshot {
                    rows: t.view.nrows(),
                    cols: t.view.ncols(),
                    values: utils::to_rows(&t.view.to_owned()),
                    name: t.name,
                    stage: t.stage,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ModelConfig {
        ModelConfig::new(8, 2).with_feed_forward_width(32)
    }

    fn run_through(p: &mut Pipeline, c: &ModelConfig, last: Stage) {
        for st in STAGE_ORDER.iter().copied().take(last.index() + 1) {
            let r = p.run_stage(st, c, "hello,world");
            assert!(r.is_ok(), "{}: {}", st, r.message);
        }
    }

    #[test]
    fn test_new_pipeline_is_empty() {
        let p = Pipeline::new();
        assert_eq!(p.last_completed(), None);
        assert!(p.named_tensors().is_empty());
        assert!(p.is_stage_enabled(Stage::Input));
        assert!(!p.is_stage_enabled(Stage::QkvMha));
    }

    #[test]
    fn test_locked_stage_is_rejected_without_mutation() {
        let mut p = Pipeline::new();
        let r = p.run_stage(Stage::SdpaHeads, &cfg(), "hello,world");
        assert_eq!(r.status, StatusKind::Error);
        assert!(r.tensors.is_empty());
        assert_eq!(p.last_completed(), None);
        assert!(!p.has_tensors(Stage::SdpaHeads));
    }

    #[test]
    fn test_input_stage_message_and_tensors() {
        let mut p = Pipeline::new();
        let r = p.run_stage(Stage::Input, &cfg(), "a, b ,c");
        assert!(r.is_ok());
        assert_eq!(r.message, "Generated input for 3 tokens.");
        assert_eq!(r.tensors, vec!["Token_Embeddings", "Positional_Encoding", "Final_Input"]);
        assert_eq!(r.last_completed, Some(Stage::Input));
        assert_eq!(p.tokens(), &["a", "b", "c"]);
    }

    #[test]
    fn test_empty_tokens_block_qkv() {
        let mut p = Pipeline::new();
        assert!(p.run_stage(Stage::Input, &cfg(), " , ").is_ok());
        assert_eq!(p.input().unwrap().summed.dim(), (0, 8));
        let r = p.run_stage(Stage::QkvMha, &cfg(), "");
        assert_eq!(r.message, "Generate input first.");
        assert_eq!(p.last_completed(), Some(Stage::Input));
    }

    #[test]
    fn test_invalidate_from_clears_strictly_downstream() {
        let c = cfg();
        let mut p = Pipeline::new();
        run_through(&mut p, &c, Stage::FfnAddNorm);

        p.invalidate_from(Stage::ConcatFinalize);
        assert!(p.has_tensors(Stage::Input));
        assert!(p.has_tensors(Stage::SdpaHeads));
        assert!(p.has_tensors(Stage::ConcatFinalize));
        assert!(!p.has_tensors(Stage::MhaAddNorm));
        assert!(!p.has_tensors(Stage::Ffn));
        assert!(!p.has_tensors(Stage::FfnAddNorm));
        assert_eq!(p.last_completed(), Some(Stage::ConcatFinalize));
    }

    #[test]
    fn test_rerun_middle_stage_replaces_and_invalidates() {
        let c = cfg();
        let mut p = Pipeline::new();
        run_through(&mut p, &c, Stage::Ffn);
        let a_old_w_o = p.concat().unwrap().projection.w_o.clone();

        let r = p.run_stage(Stage::ConcatFinalize, &c, "");
        assert!(r.is_ok());
        assert_eq!(p.last_completed(), Some(Stage::ConcatFinalize));
        assert!(!p.has_tensors(Stage::MhaAddNorm));
        assert!(!p.has_tensors(Stage::Ffn));
        assert_ne!(p.concat().unwrap().projection.w_o, a_old_w_o);
        assert!(!p.is_stage_enabled(Stage::Ffn));
    }

    #[test]
    fn test_failed_stage_keeps_previous_state() {
        let c = cfg();
        let mut p = Pipeline::new();
        run_through(&mut p, &c, Stage::SdpaHeads);

        // Changing the head count after projecting makes the per head state unusable.
        let c_bad = ModelConfig::new(8, 4);
        let r = p.run_stage(Stage::ConcatFinalize, &c_bad, "");
        assert_eq!(r.status, StatusKind::Error);
        assert_eq!(r.message, "Per-head SDPA outputs not available.");
        assert_eq!(p.last_completed(), Some(Stage::SdpaHeads));
        assert!(p.has_tensors(Stage::SdpaHeads));
        assert_eq!(p.sdpa().unwrap().heads.len(), 2);
    }

    #[test]
    fn test_width_change_without_rerunning_input_is_shape_error() {
        let mut p = Pipeline::new();
        assert!(p.run_stage(Stage::Input, &cfg(), "hello,world").is_ok());
        let c_wide = ModelConfig::new(12, 2);
        let r = p.run_stage(Stage::QkvMha, &c_wide, "");
        assert_eq!(r.status, StatusKind::Error);
        assert!(r.message.starts_with("Matrix mul dim mismatch"));
        assert!(!p.has_tensors(Stage::QkvMha));
    }

    #[test]
    fn test_ffn_zero_width_is_config_error() {
        let c = cfg();
        let mut p = Pipeline::new();
        run_through(&mut p, &c, Stage::MhaAddNorm);
        let c_zero = ModelConfig::new(8, 2).with_feed_forward_width(0);
        let r = p.run_stage(Stage::Ffn, &c_zero, "");
        assert_eq!(r.message, "d_ff must be a positive integer.");
        assert!(!p.has_tensors(Stage::Ffn));
    }

    #[test]
    fn test_ffn_input_prefers_normalized_output() {
        let c = cfg();
        let mut p = Pipeline::new();
        run_through(&mut p, &c, Stage::ConcatFinalize);
        assert_eq!(p.ffn_input(), Some(&p.concat().unwrap().output));
        assert!(p.run_stage(Stage::MhaAddNorm, &c, "").is_ok());
        assert_eq!(p.ffn_input(), Some(&p.mha_addnorm().unwrap().output));
    }

    #[test]
    fn test_named_tensor_lookup_and_cell_value() {
        let c = cfg();
        let mut p = Pipeline::new();
        run_through(&mut p, &c, Stage::SdpaHeads);
        assert_eq!(p.tensor("Q_Head_1").unwrap().dim(), (2, 4));
        assert_eq!(p.tensor("Weights_H0").unwrap().dim(), (2, 2));
        assert!(p.tensor("MHA_Output").is_none());

        let d = p.cell_value("Final_Input", 1, 7).unwrap();
        assert_eq!(d, utils::round_display(p.input().unwrap().summed[[1, 7]]));
        assert!(p.cell_value("Final_Input", 2, 0).is_none());
    }

    #[test]
    fn test_head_view() {
        let c = cfg();
        let mut p = Pipeline::new();
        run_through(&mut p, &c, Stage::QkvMha);
        let h = p.head_tensors(1);
        assert!(h.q.is_some() && h.k.is_some() && h.v.is_some());
        assert!(h.weights.is_none());
        assert!(p.head_tensors(2).q.is_none());
    }

    #[test]
    fn test_layers_and_parameter_count() {
        let c = cfg();
        let mut p = Pipeline::new();
        run_through(&mut p, &c, Stage::FfnAddNorm);
        assert_eq!(
            p.network_description(),
            "QkvProjection, OutputProjection, AddNorm, FeedForward, AddNorm"
        );
        let i_expected = 3 * 64 + 64 + 16 + (8 * 32 + 32 + 32 * 8 + 8) + 16;
        assert_eq!(p.total_parameters(), i_expected);
    }

    #[test]
    fn test_info_line() {
        let mut p = Pipeline::new();
        assert_eq!(
            p.info_line(&cfg()),
            "Tokens: N/A | d_m: 8 | H: 2 | d_k: 4 | d_ff: 32"
        );
        p.run_stage(Stage::Input, &cfg(), "hello,world");
        assert_eq!(
            p.info_line(&ModelConfig::new(9, 2)),
            "Tokens: hello, world | d_m: 9 | H: 2 | d_k: N/A | d_ff: 36"
        );
    }

    #[test]
    fn test_info_line_with_out_of_range_d_ff() {
        let p = Pipeline::new();
        let i_width = usize::MAX / 2 + 2;
        assert_eq!(
            p.info_line(&ModelConfig::new(i_width, 1)),
            format!("Tokens: N/A | d_m: {} | H: 1 | d_k: {} | d_ff: N/A", i_width, i_width)
        );
    }

    #[test]
    fn test_reset() {
        let c = cfg();
        let mut p = Pipeline::new();
        run_through(&mut p, &c, Stage::QkvMha);
        p.reset();
        assert_eq!(p.last_completed(), None);
        assert!(p.named_tensors().is_empty());
    }
}

// stage.rs
// Description: Step state machine of the encoder layer. Fixed total order of the seven stages,
//              the enablement rule (rerun or advance by one, never skip) and the set of stages
//              whose tensors become stale when a given stage runs again.
// History:
// - 2026-10-17: Initial stage order and gating rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    QkvMha,
    SdpaHeads,
    ConcatFinalize,
    MhaAddNorm,
    Ffn,
    FfnAddNorm,
}

pub const STAGE_ORDER: [Stage; 7] = [
    Stage::Input,
    Stage::QkvMha,
    Stage::SdpaHeads,
    Stage::ConcatFinalize,
    Stage::MhaAddNorm,
    Stage::Ffn,
    Stage::FfnAddNorm,
];

// Name of the pre initial sentinel.
pub const NONE_STAGE_NAME: &str = "none";

impl Stage {
    pub fn index(self) -> usize {
        match self {
            Stage::Input => 0,
            Stage::QkvMha => 1,
            Stage::SdpaHeads => 2,
            Stage::ConcatFinalize => 3,
            Stage::MhaAddNorm => 4,
            Stage::Ffn => 5,
            Stage::FfnAddNorm => 6,
        }
    }

    pub fn from_index(i_index: usize) -> Option<Stage> {
        STAGE_ORDER.get(i_index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::QkvMha => "qkv_mha",
            Stage::SdpaHeads => "sdpa_heads",
            Stage::ConcatFinalize => "concat_finalize",
            Stage::MhaAddNorm => "mha_addnorm",
            Stage::Ffn => "ffn",
            Stage::FfnAddNorm => "ffn_addnorm",
        }
    }

    // Button caption used by the front end.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Input => "1. Gen Input",
            Stage::QkvMha => "2. MHA QKV",
            Stage::SdpaHeads => "3. All SDPA",
            Stage::ConcatFinalize => "4. MHA Concat",
            Stage::MhaAddNorm => "5. AddNorm MHA",
            Stage::Ffn => "6. FFN",
            Stage::FfnAddNorm => "7. AddNorm FFN",
        }
    }

    pub fn predecessor(self) -> Option<Stage> {
        self.index().checked_sub(1).and_then(Stage::from_index)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STAGE_ORDER
            .iter()
            .copied()
            .find(|st| st.name() == s.trim())
            .ok_or_else(|| EngineError::missing(format!("Unknown stage: {}", s.trim())))
    }
}

pub fn stage_name(opt_stage: Option<Stage>) -> &'static str {
    opt_stage.map(Stage::name).unwrap_or(NONE_STAGE_NAME)
}

/// A stage may run when the last completed stage is the stage itself, its immediate
/// predecessor, or anything later. `None` counts as index -1, so `input` is always enabled.
pub fn is_stage_enabled(stage: Stage, opt_last_completed: Option<Stage>) -> bool {
    match opt_last_completed {
        None => stage == Stage::Input,
        Some(last) => last.index() + 1 >= stage.index(),
    }
}

/// Stages strictly after `stage` in the fixed order. Their tensors derive from `stage`.
pub fn downstream_of(stage: Stage) -> &'static [Stage] {
    &STAGE_ORDER[stage.index() + 1..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_index_agree() {
        for (i, st) in STAGE_ORDER.iter().enumerate() {
            assert_eq!(st.index(), i);
            assert_eq!(Stage::from_index(i), Some(*st));
        }
        assert_eq!(Stage::from_index(7), None);
    }

    #[test]
    fn test_names_round_trip() {
        for st in STAGE_ORDER {
            assert_eq!(st.name().parse::<Stage>().unwrap(), st);
            assert_eq!(st.to_string(), st.name());
        }
        assert!("none".parse::<Stage>().is_err());
        assert_eq!(stage_name(None), "none");
        assert_eq!(stage_name(Some(Stage::FfnAddNorm)), "ffn_addnorm");
    }

    #[test]
    fn test_enabled_iff_last_index_at_least_index_minus_one() {
        let v_last: Vec<Option<Stage>> = std::iter::once(None)
            .chain(STAGE_ORDER.iter().copied().map(Some))
            .collect();
        for opt_last in v_last {
            let i_last: i64 = opt_last.map(|s| s.index() as i64).unwrap_or(-1);
            for st in STAGE_ORDER {
                let b_expected = i_last >= st.index() as i64 - 1;
                assert_eq!(
                    is_stage_enabled(st, opt_last),
                    b_expected,
                    "stage {} last {}",
                    st,
                    stage_name(opt_last)
                );
            }
        }
    }

    #[test]
    fn test_input_always_enabled_and_skipping_is_not() {
        assert!(is_stage_enabled(Stage::Input, None));
        assert!(is_stage_enabled(Stage::Input, Some(Stage::FfnAddNorm)));
        assert!(!is_stage_enabled(Stage::QkvMha, None));
        assert!(!is_stage_enabled(Stage::ConcatFinalize, Some(Stage::QkvMha)));
        assert!(is_stage_enabled(Stage::SdpaHeads, Some(Stage::SdpaHeads)));
    }

    #[test]
    fn test_downstream_of() {
        assert_eq!(downstream_of(Stage::Input).len(), 6);
        assert_eq!(downstream_of(Stage::Ffn), &[Stage::FfnAddNorm]);
        assert!(downstream_of(Stage::FfnAddNorm).is_empty());
        assert_eq!(Stage::QkvMha.predecessor(), Some(Stage::Input));
        assert_eq!(Stage::Input.predecessor(), None);
    }
}

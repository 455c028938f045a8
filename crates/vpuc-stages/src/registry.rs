//! Capability table.

use crate::stages::{
    ConcatStage, ConvStage, CopyStage, FullyConnectedStage, HwOpStage, PermuteStage, PoolStage,
    PowerStage, SplitStage,
};
use crate::stub::StubStage;
use vpuc_core::{StageOps, StageType};

/// Capability implementation for a stage kind.
///
/// Every [`StageType`] maps to exactly one implementation; the five stub
/// kinds share [`StubStage`].
pub fn capabilities(stage_type: StageType) -> &'static dyn StageOps {
    match stage_type {
        StageType::StubConv
        | StageType::StubFullyConnected
        | StageType::StubDeconv
        | StageType::StubMaxPool
        | StageType::StubAvgPool => &StubStage,
        StageType::Convolution | StageType::Deconvolution => &ConvStage,
        StageType::FullyConnected => &FullyConnectedStage,
        StageType::MaxPool | StageType::AvgPool => &PoolStage,
        StageType::MyriadXHwOp => &HwOpStage,
        StageType::Power => &PowerStage,
        StageType::Permute => &PermuteStage,
        StageType::Copy => &CopyStage,
        StageType::Split => &SplitStage,
        StageType::Concat => &ConcatStage,
    }
}

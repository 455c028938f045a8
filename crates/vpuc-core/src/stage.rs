//! Stage type enumeration, per-edge analysis results and the capability trait.

use crate::context::{StageCtx, StageCtxMut};
use crate::model::{EdgeId, StageNode, StageTemplate};
use crate::serializer::BlobSerializer;
use crate::types::{DimsOrder, StridesRequirement};
use crate::Result;
use std::collections::HashMap;

/// Closed set of stage kinds.
///
/// Stub kinds are placeholders awaiting hardware or software lowering and
/// never reach the serializer. Concrete kinds carry a stable wire code that is
/// part of the blob contract: a code is never reused for other semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageType {
    StubConv,
    StubFullyConnected,
    StubDeconv,
    StubMaxPool,
    StubAvgPool,

    Convolution,
    MaxPool,
    AvgPool,
    FullyConnected,
    Deconvolution,
    Power,
    Permute,
    Copy,
    Split,
    Concat,
    MyriadXHwOp,
}

impl StageType {
    /// All stage kinds, stubs first.
    pub const ALL: [StageType; 16] = [
        StageType::StubConv,
        StageType::StubFullyConnected,
        StageType::StubDeconv,
        StageType::StubMaxPool,
        StageType::StubAvgPool,
        StageType::Convolution,
        StageType::MaxPool,
        StageType::AvgPool,
        StageType::FullyConnected,
        StageType::Deconvolution,
        StageType::Power,
        StageType::Permute,
        StageType::Copy,
        StageType::Split,
        StageType::Concat,
        StageType::MyriadXHwOp,
    ];

    /// The five stub kinds.
    pub const STUBS: [StageType; 5] = [
        StageType::StubConv,
        StageType::StubFullyConnected,
        StageType::StubDeconv,
        StageType::StubMaxPool,
        StageType::StubAvgPool,
    ];

    /// Wire code written into the blob, `None` for stubs.
    pub fn code(&self) -> Option<u32> {
        match self {
            StageType::StubConv
            | StageType::StubFullyConnected
            | StageType::StubDeconv
            | StageType::StubMaxPool
            | StageType::StubAvgPool => None,
            StageType::Convolution => Some(0),
            StageType::MaxPool => Some(1),
            StageType::AvgPool => Some(2),
            StageType::FullyConnected => Some(4),
            StageType::Deconvolution => Some(5),
            StageType::Power => Some(6),
            StageType::Permute => Some(7),
            StageType::Copy => Some(8),
            StageType::Split => Some(9),
            StageType::Concat => Some(10),
            StageType::MyriadXHwOp => Some(38),
        }
    }

    /// Check whether this is a stub kind.
    pub fn is_stub(&self) -> bool {
        self.code().is_none()
    }

    /// Check whether the kind carries weights and biases as inputs 1 and 2.
    pub fn is_weightable(&self) -> bool {
        matches!(
            self,
            StageType::StubConv
                | StageType::StubFullyConnected
                | StageType::StubDeconv
                | StageType::Convolution
                | StageType::FullyConnected
                | StageType::Deconvolution
        )
    }
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Operation family executed by a `MyriadXHwOp` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwOpKind {
    Conv,
    MaxPool,
    AvgPool,
    FullyConnected,
}

impl HwOpKind {
    /// Stored in `AttrKey::HwOpKind` and written into the blob.
    pub fn code(&self) -> i32 {
        match self {
            HwOpKind::Conv => 0,
            HwOpKind::MaxPool => 1,
            HwOpKind::AvgPool => 2,
            HwOpKind::FullyConnected => 3,
        }
    }

    /// Decode an attribute value.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(HwOpKind::Conv),
            1 => Some(HwOpKind::MaxPool),
            2 => Some(HwOpKind::AvgPool),
            3 => Some(HwOpKind::FullyConnected),
            _ => None,
        }
    }

    /// Whether the operation carries weights and biases.
    pub fn is_weightable(&self) -> bool {
        matches!(self, HwOpKind::Conv | HwOpKind::FullyConnected)
    }
}

/// Step of the scale propagation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalePropagationStep {
    /// Query which scales the stage accepts; parameters are left untouched.
    Check,
    /// Fold the given scale into the stage's own constants.
    ScaleInput,
    /// Forward the input scale to the outputs.
    Propagate,
}

/// How a stage handles the batch dimension of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchSupport {
    /// Independent invocations per batch item.
    Split,
    /// Batch merged into an adjacent dimension by the stage itself.
    Fold,
}

/// Per-edge analysis results reported by one stage.
#[derive(Debug, Clone)]
pub struct StageDataInfo<T> {
    inputs: HashMap<EdgeId, T>,
    outputs: HashMap<EdgeId, T>,
}

impl<T> StageDataInfo<T> {
    /// Create an empty result set.
    pub fn new() -> Self {
        Self {
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    /// Record a value for an input edge.
    pub fn set_input(&mut self, edge: EdgeId, value: T) {
        self.inputs.insert(edge, value);
    }

    /// Record a value for an output edge.
    pub fn set_output(&mut self, edge: EdgeId, value: T) {
        self.outputs.insert(edge, value);
    }

    /// Value recorded for an input edge.
    pub fn input(&self, edge: EdgeId) -> Option<&T> {
        self.inputs.get(&edge)
    }

    /// Value recorded for an output edge.
    pub fn output(&self, edge: EdgeId) -> Option<&T> {
        self.outputs.get(&edge)
    }

    /// Check whether an input edge has a value.
    pub fn has_input(&self, edge: EdgeId) -> bool {
        self.inputs.contains_key(&edge)
    }

    /// Check whether an output edge has a value.
    pub fn has_output(&self, edge: EdgeId) -> bool {
        self.outputs.contains_key(&edge)
    }

    /// Check whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

impl<T> Default for StageDataInfo<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability set every stage kind implements.
///
/// Implementations are selected through an explicit table keyed by
/// [`StageType`]; there is no runtime type interrogation. Stub kinds implement
/// only clone, scale propagation, batch support and the initial check; the
/// remaining capabilities panic because a stub must be replaced before they
/// run.
pub trait StageOps: Send + Sync {
    /// Produce an edge-less copy of the stage. The caller wires new edges.
    fn clone_stage(&self, stage: &StageNode) -> StageTemplate {
        stage.template()
    }

    /// Report (and for non-`Check` steps fold) quantization scales.
    fn propagate_scale_factors(
        &self,
        ctx: &mut StageCtxMut<'_>,
        input_scales: &[f32],
        step: ScalePropagationStep,
        scale_info: &mut StageDataInfo<f32>,
    ) -> Result<()>;

    /// Report the dimension order required on each edge.
    fn propagate_data_order(
        &self,
        ctx: &StageCtx<'_>,
        order_info: &mut StageDataInfo<DimsOrder>,
    ) -> Result<()>;

    /// Report stride constraints required on each edge.
    fn get_data_strides_requirements(
        &self,
        ctx: &StageCtx<'_>,
        strides_info: &mut StageDataInfo<StridesRequirement>,
    ) -> Result<()>;

    /// Fix any remaining layout decisions (e.g. weights layout).
    fn finalize_data_layout(&self, ctx: &mut StageCtxMut<'_>) -> Result<()>;

    /// Report how the stage handles the batch dimension.
    fn get_batch_support_info(
        &self,
        ctx: &StageCtx<'_>,
        batch_info: &mut StageDataInfo<BatchSupport>,
    ) -> Result<()>;

    /// Validate the stage right after graph construction.
    fn initial_check(&self, ctx: &StageCtx<'_>) -> Result<()>;

    /// Validate the fully lowered stage before serialization.
    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()>;

    /// Emit the fixed-layout parameter section.
    fn serialize_params(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer)
        -> Result<()>;

    /// Emit buffer descriptors and layout metadata.
    fn serialize_data(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_kinds_have_no_wire_code() {
        for ty in StageType::STUBS {
            assert!(ty.is_stub());
        }
        let concrete: Vec<_> = StageType::ALL.iter().filter(|t| !t.is_stub()).collect();
        assert_eq!(concrete.len(), 11);
    }

    #[test]
    fn test_wire_codes_are_unique() {
        let mut codes: Vec<u32> = StageType::ALL.iter().filter_map(|t| t.code()).collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total);
    }

    #[test]
    fn test_hw_op_kind_round_trip() {
        for kind in [
            HwOpKind::Conv,
            HwOpKind::MaxPool,
            HwOpKind::AvgPool,
            HwOpKind::FullyConnected,
        ] {
            assert_eq!(HwOpKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(HwOpKind::from_code(9), None);
    }
}

//! Join tensors along one dimension.

use super::split::{axis, serialize_slices, slice_offsets};
use crate::helpers::{require_all, serialize_ports};
use vpuc_core::{
    BatchSupport, BlobSerializer, DataDesc, DimsOrder, Error, Result, ScalePropagationStep,
    StageCtx, StageCtxMut, StageDataInfo, StageOps, StridesRequirement,
};

/// `Concat` stages. Slice sizes are taken from the inputs.
pub struct ConcatStage;

fn offsets(ctx: &StageCtx<'_>) -> Result<Vec<usize>> {
    if ctx.input_count() == 0 || ctx.output_count() != 1 {
        return Err(Error::InvalidGraph(format!(
            "Concat '{}' needs at least one input and one output",
            ctx.name()
        )));
    }
    let parts: Vec<&DataDesc> = ctx.inputs()?.into_iter().map(|d| &d.desc).collect();
    slice_offsets(ctx.name(), &ctx.output(0)?.desc, &parts, axis(ctx)?)
}

impl StageOps for ConcatStage {
    /// Inputs must share one scale; mismatched inputs are reset to 1.0.
    fn propagate_scale_factors(
        &self,
        ctx: &mut StageCtxMut<'_>,
        input_scales: &[f32],
        _step: ScalePropagationStep,
        scale_info: &mut StageDataInfo<f32>,
    ) -> Result<()> {
        let ctx = ctx.view()?;
        let first = input_scales.first().copied().unwrap_or(1.0);
        let common = if input_scales.iter().all(|&s| s == first) {
            first
        } else {
            1.0
        };
        for port in 0..ctx.input_count() {
            scale_info.set_input(ctx.input_edge(port)?, common);
        }
        scale_info.set_output(ctx.output_edge(0)?, common);
        Ok(())
    }

    fn propagate_data_order(
        &self,
        ctx: &StageCtx<'_>,
        order_info: &mut StageDataInfo<DimsOrder>,
    ) -> Result<()> {
        let order = ctx.input(0)?.desc.order();
        for port in 0..ctx.input_count() {
            order_info.set_input(ctx.input_edge(port)?, order);
        }
        order_info.set_output(ctx.output_edge(0)?, order);
        Ok(())
    }

    fn get_data_strides_requirements(
        &self,
        ctx: &StageCtx<'_>,
        strides_info: &mut StageDataInfo<StridesRequirement>,
    ) -> Result<()> {
        require_all(ctx, StridesRequirement::compact(), strides_info)
    }

    fn finalize_data_layout(&self, _ctx: &mut StageCtxMut<'_>) -> Result<()> {
        Ok(())
    }

    fn get_batch_support_info(
        &self,
        _ctx: &StageCtx<'_>,
        _batch_info: &mut StageDataInfo<BatchSupport>,
    ) -> Result<()> {
        Ok(())
    }

    fn initial_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        offsets(ctx).map(|_| ())
    }

    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        offsets(ctx).map(|_| ())
    }

    fn serialize_params(
        &self,
        ctx: &StageCtx<'_>,
        serializer: &mut BlobSerializer,
    ) -> Result<()> {
        serialize_slices(axis(ctx)?, &offsets(ctx)?, serializer)
    }

    fn serialize_data(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()> {
        serialize_ports(ctx, serializer)
    }
}

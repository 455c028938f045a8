//! Strided copy inserted to reconcile stride requirements.

use crate::helpers::{follow_input_order, pass_through_scale, serialize_ports};
use vpuc_core::{
    BatchSupport, BlobSerializer, DimsOrder, Error, Result, ScalePropagationStep, StageCtx,
    StageCtxMut, StageDataInfo, StageOps, StridesRequirement,
};

/// `Copy` stages. Accept any strides on both sides.
pub struct CopyStage;

fn check_same_tensor(ctx: &StageCtx<'_>) -> Result<()> {
    if ctx.input_count() != 1 || ctx.output_count() != 1 {
        return Err(Error::InvalidGraph(format!(
            "Copy '{}' must have one input and one output",
            ctx.name()
        )));
    }
    let (input, output) = (&ctx.input(0)?.desc, &ctx.output(0)?.desc);
    if input != output {
        return Err(Error::Shape(format!(
            "Copy '{}' changes the descriptor",
            ctx.name()
        )));
    }
    Ok(())
}

impl StageOps for CopyStage {
    fn propagate_scale_factors(
        &self,
        ctx: &mut StageCtxMut<'_>,
        input_scales: &[f32],
        _step: ScalePropagationStep,
        scale_info: &mut StageDataInfo<f32>,
    ) -> Result<()> {
        pass_through_scale(&ctx.view()?, input_scales, scale_info)
    }

    fn propagate_data_order(
        &self,
        ctx: &StageCtx<'_>,
        order_info: &mut StageDataInfo<DimsOrder>,
    ) -> Result<()> {
        follow_input_order(ctx, order_info)
    }

    fn get_data_strides_requirements(
        &self,
        _ctx: &StageCtx<'_>,
        _strides_info: &mut StageDataInfo<StridesRequirement>,
    ) -> Result<()> {
        Ok(())
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
        check_same_tensor(ctx)
    }

    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        check_same_tensor(ctx)
    }

    fn serialize_params(
        &self,
        _ctx: &StageCtx<'_>,
        _serializer: &mut BlobSerializer,
    ) -> Result<()> {
        Ok(())
    }

    fn serialize_data(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()> {
        serialize_ports(ctx, serializer)
    }
}

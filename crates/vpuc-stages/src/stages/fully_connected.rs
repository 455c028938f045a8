//! Software fully-connected stage.

use crate::helpers::{
    assert_weightable_io, require_all, serialize_weightable_data, weightable_batch_info,
    weightable_scale_info,
};
use vpuc_core::{
    BatchSupport, BlobSerializer, Dim, DimsOrder, Error, Result, ScalePropagationStep,
    StageCtx, StageCtxMut, StageDataInfo, StageOps, StridesRequirement,
};

/// Dense `NC` layer; a 4-D input is read as its flattened canonical layout.
pub struct FullyConnectedStage;

fn check_types(ctx: &StageCtx<'_>) -> Result<()> {
    assert_weightable_io(ctx)
}

impl StageOps for FullyConnectedStage {
    fn propagate_scale_factors(
        &self,
        ctx: &mut StageCtxMut<'_>,
        input_scales: &[f32],
        step: ScalePropagationStep,
        scale_info: &mut StageDataInfo<f32>,
    ) -> Result<()> {
        weightable_scale_info(&ctx.view()?, input_scales, step, scale_info)
    }

    fn propagate_data_order(
        &self,
        ctx: &StageCtx<'_>,
        order_info: &mut StageDataInfo<DimsOrder>,
    ) -> Result<()> {
        let rank = ctx.input(0)?.desc.num_dims();
        order_info.set_input(ctx.input_edge(0)?, DimsOrder::canonical(rank)?);
        order_info.set_output(ctx.output_edge(0)?, DimsOrder::NC);
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
        // Weights already sit in canonical [out, in] order.
        Ok(())
    }

    fn get_batch_support_info(
        &self,
        ctx: &StageCtx<'_>,
        batch_info: &mut StageDataInfo<BatchSupport>,
    ) -> Result<()> {
        weightable_batch_info(ctx, batch_info)
    }

    fn initial_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        check_types(ctx)?;
        if ctx.output(0)?.desc.num_dims() != 2 {
            return Err(Error::Shape(format!(
                "Fully-connected stage '{}' must produce a 2-D output",
                ctx.name()
            )));
        }
        Ok(())
    }

    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        check_types(ctx)?;
        let input = ctx.input(0)?;
        if input.desc.order() != DimsOrder::canonical(input.desc.num_dims())? {
            return Err(Error::Compilation(format!(
                "Fully-connected stage '{}' reads non-canonical '{}'",
                ctx.name(),
                input.name
            )));
        }
        Ok(())
    }

    fn serialize_params(
        &self,
        ctx: &StageCtx<'_>,
        serializer: &mut BlobSerializer,
    ) -> Result<()> {
        let input = &ctx.input(0)?.desc;
        let batch = input.dim(Dim::N).unwrap_or(1);
        let out_channels = ctx.output(0)?.desc.dim(Dim::C).unwrap_or(1);
        serializer.append_size(input.total_dim_size() / batch)?;
        serializer.append_size(out_channels)?;
        Ok(())
    }

    fn serialize_data(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()> {
        serialize_weightable_data(ctx, serializer)
    }
}

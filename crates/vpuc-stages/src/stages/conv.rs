//! Software convolution and deconvolution.
//!
//! Both kinds read activations in channel-minor (interleaved) order and
//! expect their weights stored output-channel major with the input channel
//! innermost, i.e. the interleaved order of the weights tensor.

use crate::helpers::{
    assert_weightable_io, check_main_order, reorder_const_input, require_all,
    require_main_order, serialize_weightable_data, weightable_batch_info, weightable_scale_info,
    Window,
};
use vpuc_core::{
    AttrKey, BatchSupport, BlobSerializer, DimsOrder, Error, Result,
    ScalePropagationStep, StageCtx, StageCtxMut, StageDataInfo, StageOps, StridesRequirement,
};

/// Software `Convolution` and `Deconvolution` stages.
pub struct ConvStage;

fn check_types(ctx: &StageCtx<'_>) -> Result<()> {
    assert_weightable_io(ctx)
}

impl StageOps for ConvStage {
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
        require_main_order(ctx, DimsOrder::interleaved(rank)?, order_info)
    }

    fn get_data_strides_requirements(
        &self,
        ctx: &StageCtx<'_>,
        strides_info: &mut StageDataInfo<StridesRequirement>,
    ) -> Result<()> {
        require_all(ctx, StridesRequirement::compact(), strides_info)
    }

    fn finalize_data_layout(&self, ctx: &mut StageCtxMut<'_>) -> Result<()> {
        let rank = ctx.model.data(ctx.input_id(1)?)?.desc.num_dims();
        reorder_const_input(ctx, 1, DimsOrder::interleaved(rank)?)
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
        let window = Window::from_attrs(ctx.attrs())?;
        if window.kernel.iter().chain(&window.stride).any(|&v| v < 1) {
            return Err(Error::Attribute(format!(
                "Stage '{}' has a non-positive kernel or stride",
                ctx.name()
            )));
        }
        let group = ctx.attrs().get_int_or(AttrKey::GroupSize, 1)?;
        if group < 1 {
            return Err(Error::Attribute(format!(
                "Stage '{}' has group size {}",
                ctx.name(),
                group
            )));
        }
        Ok(())
    }

    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        check_types(ctx)?;
        let rank = ctx.input(0)?.desc.num_dims();
        check_main_order(ctx, DimsOrder::interleaved(rank)?)
    }

    fn serialize_params(
        &self,
        ctx: &StageCtx<'_>,
        serializer: &mut BlobSerializer,
    ) -> Result<()> {
        Window::from_attrs(ctx.attrs())?.serialize(serializer);
        serializer.append_i32(ctx.attrs().get_int_or(AttrKey::GroupSize, 1)?);
        Ok(())
    }

    fn serialize_data(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()> {
        serialize_weightable_data(ctx, serializer)
    }
}

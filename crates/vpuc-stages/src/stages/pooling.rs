//! Software max and average pooling.

use crate::helpers::{
    assert_inputs_outputs_types, check_main_order, pass_through_scale, require_all,
    require_main_order, serialize_ports, Window,
};
use vpuc_core::{
    AttrKey, BatchSupport, BlobSerializer, DataType, DimsOrder, Error, Result,
    ScalePropagationStep, StageCtx, StageCtxMut, StageDataInfo, StageOps, StridesRequirement,
};

/// `MaxPool` and `AvgPool` stages.
///
/// Pooling commutes with a uniform scale, so scales pass straight through.
pub struct PoolStage;

impl StageOps for PoolStage {
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
        assert_inputs_outputs_types(ctx, &[DataType::F16], &[DataType::F16])?;
        let window = Window::from_attrs(ctx.attrs())?;
        if window.kernel.iter().chain(&window.stride).any(|&v| v < 1) {
            return Err(Error::Attribute(format!(
                "Stage '{}' has a non-positive kernel or stride",
                ctx.name()
            )));
        }
        Ok(())
    }

    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        assert_inputs_outputs_types(ctx, &[DataType::F16], &[DataType::F16])?;
        let rank = ctx.input(0)?.desc.num_dims();
        check_main_order(ctx, DimsOrder::interleaved(rank)?)
    }

    fn serialize_params(
        &self,
        ctx: &StageCtx<'_>,
        serializer: &mut BlobSerializer,
    ) -> Result<()> {
        Window::from_attrs(ctx.attrs())?.serialize(serializer);
        let exclude_pad =
            ctx.attrs().has(AttrKey::ExcludePad) && ctx.attrs().get_bool(AttrKey::ExcludePad)?;
        serializer.append_u32(u32::from(exclude_pad));
        Ok(())
    }

    fn serialize_data(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()> {
        serialize_ports(ctx, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpuc_core::{DataDesc, DataUsage, Model, StageType};

    #[test]
    fn test_requires_interleaved_order() {
        let mut model = Model::new("net");
        let desc = DataDesc::new(DataType::F16, vec![1, 8, 4, 4]).unwrap();
        let a = model.add_data("a", desc.clone(), DataUsage::Input).unwrap();
        let b = model.add_data("b", desc, DataUsage::Output).unwrap();
        let id = model.add_stage("pool", StageType::MaxPool, &[a], &[b]).unwrap();

        let ctx = StageCtx::new(&model, id).unwrap();
        let mut info = StageDataInfo::new();
        PoolStage.propagate_data_order(&ctx, &mut info).unwrap();
        assert_eq!(info.input(ctx.input_edge(0).unwrap()), Some(&DimsOrder::NHWC));
        assert_eq!(info.output(ctx.output_edge(0).unwrap()), Some(&DimsOrder::NHWC));

        let mut batch = StageDataInfo::new();
        PoolStage.get_batch_support_info(&ctx, &mut batch).unwrap();
        assert!(batch.is_empty());
    }
}

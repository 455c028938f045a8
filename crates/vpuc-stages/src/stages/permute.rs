//! Layout conversion stage inserted by the data-order pass.

use crate::helpers::{pass_through_scale, require_all, serialize_ports};
use vpuc_core::{
    BatchSupport, BlobSerializer, DimsOrder, Error, Result, ScalePropagationStep, StageCtx,
    StageCtxMut, StageDataInfo, StageOps, StridesRequirement,
};

/// `Permute` stages: same logical tensor, different physical order.
pub struct PermuteStage;

fn check_shapes(ctx: &StageCtx<'_>) -> Result<()> {
    if ctx.input_count() != 1 || ctx.output_count() != 1 {
        return Err(Error::InvalidGraph(format!(
            "Permute '{}' must have one input and one output",
            ctx.name()
        )));
    }
    let (input, output) = (&ctx.input(0)?.desc, &ctx.output(0)?.desc);
    if input.dims() != output.dims() || input.dtype() != output.dtype() {
        return Err(Error::Shape(format!(
            "Permute '{}' changes the tensor: {:?} -> {:?}",
            ctx.name(),
            input.dims(),
            output.dims()
        )));
    }
    Ok(())
}

impl StageOps for PermuteStage {
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
        _ctx: &StageCtx<'_>,
        _order_info: &mut StageDataInfo<DimsOrder>,
    ) -> Result<()> {
        // Orders are fixed when the permute is inserted.
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
        check_shapes(ctx)
    }

    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        check_shapes(ctx)
    }

    /// For every output memory position, the input memory position holding
    /// the same dimension.
    fn serialize_params(
        &self,
        ctx: &StageCtx<'_>,
        serializer: &mut BlobSerializer,
    ) -> Result<()> {
        let input_order = ctx.input(0)?.desc.order();
        let output_order = ctx.output(0)?.desc.order();
        for dim in output_order.to_memory_order() {
            let pos = input_order.position(dim).ok_or_else(|| {
                Error::Shape(format!(
                    "Permute '{}': {} has no {:?}",
                    ctx.name(),
                    input_order,
                    dim
                ))
            })?;
            serializer.append_size(pos)?;
        }
        Ok(())
    }

    fn serialize_data(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()> {
        serialize_ports(ctx, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpuc_core::{BlobReader, DataDesc, DataType, DataUsage, Model, StageType};

    #[test]
    fn test_nchw_to_nhwc_permutation() {
        let mut model = Model::new("net");
        let desc = DataDesc::new(DataType::F16, vec![1, 3, 4, 5]).unwrap();
        let a = model.add_data("a", desc.clone(), DataUsage::Input).unwrap();
        let b = model
            .add_data("b", desc.with_order(DimsOrder::NHWC).unwrap(), DataUsage::Output)
            .unwrap();
        let id = model.add_stage("perm", StageType::Permute, &[a], &[b]).unwrap();

        let ctx = StageCtx::new(&model, id).unwrap();
        PermuteStage.initial_check(&ctx).unwrap();

        let mut ser = BlobSerializer::new();
        PermuteStage.serialize_params(&ctx, &mut ser).unwrap();
        let bytes = ser.into_bytes();
        let mut reader = BlobReader::new(&bytes);
        let perm: Vec<u32> = (0..4).map(|_| reader.read_u32().unwrap()).collect();
        // NHWC memory order is C, W, H, N; in NCHW those sit at 2, 0, 1, 3.
        assert_eq!(perm, vec![2, 0, 1, 3]);
    }
}

//! Split a tensor into consecutive slices along one dimension.

use crate::helpers::{follow_input_order, pass_through_scale, require_all, serialize_ports};
use vpuc_core::{
    AttrKey, BatchSupport, BlobSerializer, DataDesc, Dim, DimsOrder, Error, Result,
    ScalePropagationStep, StageCtx, StageCtxMut, StageDataInfo, StageOps, StridesRequirement,
};

/// `Split` stages. Slice sizes are taken from the outputs.
pub struct SplitStage;

/// Dimension a split or concat stage works along.
pub(crate) fn axis(ctx: &StageCtx<'_>) -> Result<Dim> {
    let digit = ctx.attrs().get_int(AttrKey::Axis)?;
    u32::try_from(digit)
        .ok()
        .and_then(Dim::from_digit)
        .ok_or_else(|| Error::Attribute(format!("Stage '{}' has invalid axis {}", ctx.name(), digit)))
}

/// Check that `parts` tile `whole` along `axis` and return their offsets.
pub(crate) fn slice_offsets(
    stage: &str,
    whole: &DataDesc,
    parts: &[&DataDesc],
    axis: Dim,
) -> Result<Vec<usize>> {
    let total = whole
        .dim(axis)
        .ok_or_else(|| Error::Shape(format!("Stage '{}': tensor has no {:?}", stage, axis)))?;
    let mut offsets = Vec::with_capacity(parts.len());
    let mut offset = 0;
    for part in parts {
        let mut expected = whole.clone();
        let size = part.dim(axis).unwrap_or(0);
        expected.set_dim(axis, size)?;
        if part.dims() != expected.dims() || part.dtype() != whole.dtype() {
            return Err(Error::Shape(format!(
                "Stage '{}': slice {:?} does not fit {:?} along {:?}",
                stage,
                part.dims(),
                whole.dims(),
                axis
            )));
        }
        offsets.push(offset);
        offset += size;
    }
    if offset != total {
        return Err(Error::Shape(format!(
            "Stage '{}': slices cover {} of {} along {:?}",
            stage, offset, total, axis
        )));
    }
    Ok(offsets)
}

fn offsets(ctx: &StageCtx<'_>) -> Result<Vec<usize>> {
    if ctx.input_count() != 1 || ctx.output_count() == 0 {
        return Err(Error::InvalidGraph(format!(
            "Split '{}' needs one input and at least one output",
            ctx.name()
        )));
    }
    let parts: Vec<&DataDesc> = ctx.outputs()?.into_iter().map(|d| &d.desc).collect();
    slice_offsets(ctx.name(), &ctx.input(0)?.desc, &parts, axis(ctx)?)
}

pub(crate) fn serialize_slices(
    axis: Dim,
    offsets: &[usize],
    serializer: &mut BlobSerializer,
) -> Result<()> {
    serializer.append_u32(axis as u32);
    serializer.append_size(offsets.len())?;
    for &offset in offsets {
        serializer.append_size(offset)?;
    }
    Ok(())
}

impl StageOps for SplitStage {
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

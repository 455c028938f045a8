//! Fixed-function hardware stage.
//!
//! A single `MyriadXHwOp` stage kind covers convolution, pooling and
//! fully-connected operations; the operation family is stored in
//! `AttrKey::HwOpKind`. The hardware reads planar (`NCHW`) activations whose
//! rows start on 16-byte boundaries.

use crate::helpers::{
    assert_inputs_outputs_types, assert_weightable_io, check_main_order, pass_through_scale, reorder_const_input,
    require_all, serialize_ports, serialize_weightable_data, weightable_batch_info,
    weightable_scale_info, Window,
};
use vpuc_core::{
    AttrKey, BatchSupport, BlobSerializer, DataType, DimStride, DimsOrder, Error, HwOpKind,
    Result, ScalePropagationStep, StageCtx, StageCtxMut, StageDataInfo, StageOps,
    StridesRequirement,
};

/// Largest kernel side the hardware supports.
pub const MAX_HW_KERNEL: i32 = 15;

/// Largest kernel stride the hardware supports.
pub const MAX_HW_STRIDE: i32 = 8;

/// `MyriadXHwOp` stages.
pub struct HwOpStage;

/// Operation family of a hardware stage.
pub fn hw_op_kind(ctx: &StageCtx<'_>) -> Result<HwOpKind> {
    let code = ctx.attrs().get_int(AttrKey::HwOpKind)?;
    HwOpKind::from_code(code).ok_or_else(|| {
        Error::Attribute(format!(
            "Stage '{}' has unknown hardware operation {}",
            ctx.name(),
            code
        ))
    })
}

fn check_types(ctx: &StageCtx<'_>, kind: HwOpKind) -> Result<()> {
    if kind.is_weightable() {
        assert_weightable_io(ctx)
    } else {
        assert_inputs_outputs_types(ctx, &[DataType::F16], &[DataType::F16])
    }
}

/// Compact tensor whose second memory position (rows) is 16-byte aligned.
fn aligned_rows() -> StridesRequirement {
    StridesRequirement::compact().add(1, DimStride::Aligned)
}

impl StageOps for HwOpStage {
    fn propagate_scale_factors(
        &self,
        ctx: &mut StageCtxMut<'_>,
        input_scales: &[f32],
        step: ScalePropagationStep,
        scale_info: &mut StageDataInfo<f32>,
    ) -> Result<()> {
        let view = ctx.view()?;
        if hw_op_kind(&view)?.is_weightable() {
            weightable_scale_info(&view, input_scales, step, scale_info)
        } else {
            pass_through_scale(&view, input_scales, scale_info)
        }
    }

    fn propagate_data_order(
        &self,
        ctx: &StageCtx<'_>,
        order_info: &mut StageDataInfo<DimsOrder>,
    ) -> Result<()> {
        let input_rank = ctx.input(0)?.desc.num_dims();
        let output_rank = ctx.output(0)?.desc.num_dims();
        order_info.set_input(ctx.input_edge(0)?, DimsOrder::canonical(input_rank)?);
        order_info.set_output(ctx.output_edge(0)?, DimsOrder::canonical(output_rank)?);
        Ok(())
    }

    fn get_data_strides_requirements(
        &self,
        ctx: &StageCtx<'_>,
        strides_info: &mut StageDataInfo<StridesRequirement>,
    ) -> Result<()> {
        require_all(ctx, StridesRequirement::compact(), strides_info)?;
        if hw_op_kind(ctx)? != HwOpKind::FullyConnected {
            strides_info.set_input(ctx.input_edge(0)?, aligned_rows());
            strides_info.set_output(ctx.output_edge(0)?, aligned_rows());
        }
        Ok(())
    }

    fn finalize_data_layout(&self, ctx: &mut StageCtxMut<'_>) -> Result<()> {
        if !hw_op_kind(&ctx.view()?)?.is_weightable() {
            return Ok(());
        }
        // The hardware loader expects planar weights.
        let rank = ctx.model.data(ctx.input_id(1)?)?.desc.num_dims();
        reorder_const_input(ctx, 1, DimsOrder::canonical(rank)?)
    }

    fn get_batch_support_info(
        &self,
        ctx: &StageCtx<'_>,
        batch_info: &mut StageDataInfo<BatchSupport>,
    ) -> Result<()> {
        if hw_op_kind(ctx)?.is_weightable() {
            weightable_batch_info(ctx, batch_info)
        } else {
            Ok(())
        }
    }

    fn initial_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        check_types(ctx, hw_op_kind(ctx)?)
    }

    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        let kind = hw_op_kind(ctx)?;
        check_types(ctx, kind)?;
        if kind == HwOpKind::FullyConnected {
            return Ok(());
        }
        let window = Window::from_attrs(ctx.attrs())?;
        if window.kernel[0] > MAX_HW_KERNEL
            || window.kernel[1] > MAX_HW_KERNEL
            || window.stride[0] > MAX_HW_STRIDE
        {
            return Err(Error::Compilation(format!(
                "Stage '{}' exceeds hardware kernel limits",
                ctx.name()
            )));
        }
        check_main_order(ctx, DimsOrder::NCHW)
    }

    fn serialize_params(
        &self,
        ctx: &StageCtx<'_>,
        serializer: &mut BlobSerializer,
    ) -> Result<()> {
        let kind = hw_op_kind(ctx)?;
        serializer.append_i32(kind.code());
        if kind == HwOpKind::FullyConnected {
            return Ok(());
        }
        Window::from_attrs(ctx.attrs())?.serialize(serializer);
        serializer.append_i32(ctx.attrs().get_int_or(AttrKey::GroupSize, 1)?);
        Ok(())
    }

    fn serialize_data(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()> {
        if hw_op_kind(ctx)?.is_weightable() {
            serialize_weightable_data(ctx, serializer)
        } else {
            serialize_ports(ctx, serializer)
        }
    }
}

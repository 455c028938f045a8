//! Affine-power stage: `y = (scale * x + bias) ^ power`.

use crate::helpers::{
    assert_inputs_outputs_types, follow_input_order, input_scale, require_all, serialize_ports,
};
use vpuc_core::{
    AttrKey, BatchSupport, BlobSerializer, DataType, DimsOrder, Result, ScalePropagationStep,
    StageCtx, StageCtxMut, StageDataInfo, StageOps, StridesRequirement,
};

/// `Power` stages.
pub struct PowerStage;

impl StageOps for PowerStage {
    fn propagate_scale_factors(
        &self,
        ctx: &mut StageCtxMut<'_>,
        input_scales: &[f32],
        step: ScalePropagationStep,
        scale_info: &mut StageDataInfo<f32>,
    ) -> Result<()> {
        let input_edge = ctx.input_edge(0)?;
        let output_edge = ctx.output_edge(0)?;
        let attrs = ctx.attrs_mut()?;

        // A non-linear power does not commute with scaling.
        if attrs.get_float(AttrKey::Power)? != 1.0 {
            scale_info.set_input(input_edge, 1.0);
            scale_info.set_output(output_edge, 1.0);
            return Ok(());
        }

        let scale = input_scale(input_scales);
        scale_info.set_output(output_edge, scale);
        if step == ScalePropagationStep::ScaleInput {
            *attrs.get_float_mut(AttrKey::Scale)? *= scale;
        }
        if step != ScalePropagationStep::Check {
            *attrs.get_float_mut(AttrKey::Bias)? *= scale;
        }
        Ok(())
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
        assert_inputs_outputs_types(ctx, &[DataType::F16], &[DataType::F16])?;
        for key in [AttrKey::Scale, AttrKey::Power, AttrKey::Bias] {
            ctx.attrs().get_float(key)?;
        }
        Ok(())
    }

    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        assert_inputs_outputs_types(ctx, &[DataType::F16], &[DataType::F16])
    }

    fn serialize_params(
        &self,
        ctx: &StageCtx<'_>,
        serializer: &mut BlobSerializer,
    ) -> Result<()> {
        let attrs = ctx.attrs();
        serializer.append_f32(attrs.get_float(AttrKey::Bias)?);
        serializer.append_f32(attrs.get_float(AttrKey::Scale)?);
        serializer.append_f32(attrs.get_float(AttrKey::Power)?);
        Ok(())
    }

    fn serialize_data(&self, ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()> {
        serialize_ports(ctx, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpuc_core::{BlobReader, DataDesc, DataUsage, Model, StageId, StageType};

    fn power_model(scale: f32, power: f32, bias: f32) -> (Model, StageId) {
        let mut model = Model::new("net");
        let desc = DataDesc::new(DataType::F16, vec![1, 4, 2, 2]).unwrap();
        let a = model.add_data("a", desc.clone(), DataUsage::Input).unwrap();
        let b = model.add_data("b", desc, DataUsage::Output).unwrap();
        let id = model.add_stage("pow", StageType::Power, &[a], &[b]).unwrap();
        let attrs = model.stage_mut(id).unwrap().attrs_mut();
        attrs.set(AttrKey::Scale, scale).unwrap();
        attrs.set(AttrKey::Power, power).unwrap();
        attrs.set(AttrKey::Bias, bias).unwrap();
        (model, id)
    }

    fn run(model: &mut Model, id: StageId, scale: f32, step: ScalePropagationStep) -> StageDataInfo<f32> {
        let mut info = StageDataInfo::new();
        let mut ctx = StageCtxMut::new(model, id).unwrap();
        PowerStage
            .propagate_scale_factors(&mut ctx, &[scale], step, &mut info)
            .unwrap();
        info
    }

    fn params(model: &Model, id: StageId) -> (f32, f32) {
        let attrs = model.stage(id).unwrap().attrs();
        (
            attrs.get_float(AttrKey::Scale).unwrap(),
            attrs.get_float(AttrKey::Bias).unwrap(),
        )
    }

    #[test]
    fn test_linear_scale_input_folds_scale_and_bias() {
        let (mut model, id) = power_model(2.0, 1.0, 0.5);
        let info = run(&mut model, id, 4.0, ScalePropagationStep::ScaleInput);

        assert_eq!(params(&model, id), (8.0, 2.0));
        let out = model.stage(id).unwrap().outputs()[0];
        assert_eq!(info.output(out), Some(&4.0));
    }

    #[test]
    fn test_linear_propagate_folds_bias_only() {
        let (mut model, id) = power_model(2.0, 1.0, 0.5);
        run(&mut model, id, 4.0, ScalePropagationStep::Propagate);
        assert_eq!(params(&model, id), (2.0, 2.0));
    }

    #[test]
    fn test_check_leaves_params_unchanged() {
        let (mut model, id) = power_model(2.0, 1.0, 0.5);
        let info = run(&mut model, id, 4.0, ScalePropagationStep::Check);
        assert_eq!(params(&model, id), (2.0, 0.5));
        let input = model.stage(id).unwrap().inputs()[0];
        assert!(!info.has_input(input));
    }

    #[test]
    fn test_non_linear_forces_unit_scales() {
        let (mut model, id) = power_model(2.0, 2.0, 0.5);
        let info = run(&mut model, id, 4.0, ScalePropagationStep::ScaleInput);

        let stage = model.stage(id).unwrap();
        assert_eq!(info.input(stage.inputs()[0]), Some(&1.0));
        assert_eq!(info.output(stage.outputs()[0]), Some(&1.0));
        assert_eq!(params(&model, id), (2.0, 0.5));
    }

    #[test]
    fn test_params_layout() {
        let (model, id) = power_model(2.0, 1.0, 0.5);
        let ctx = StageCtx::new(&model, id).unwrap();
        let mut ser = BlobSerializer::new();
        PowerStage.serialize_params(&ctx, &mut ser).unwrap();

        let bytes = ser.into_bytes();
        let mut reader = BlobReader::new(&bytes);
        let decoded = (
            reader.read_f32().unwrap(),
            reader.read_f32().unwrap(),
            reader.read_f32().unwrap(),
        );
        assert_eq!(decoded, (0.5, 2.0, 1.0));
        assert_eq!(reader.remaining(), 0);
    }
}

//! Placeholder stage for operations awaiting hardware or software lowering.
//!
//! The frontend creates stubs for every operation that may run on the
//! fixed-function hardware. Stubs take part in the passes that run before
//! lowering (initial check, batch support and scale propagation); every
//! layout and serialization capability is an invariant violation.

use crate::helpers::{
    assert_inputs_outputs_types, assert_weightable_io, input_scale, weightable_batch_info,
    weightable_scale_info,
};
use vpuc_core::{
    BatchSupport, BlobSerializer, DataType, DimsOrder, Result, ScalePropagationStep, StageCtx,
    StageCtxMut, StageDataInfo, StageOps, StageType, StridesRequirement,
};

/// Capabilities of the five stub kinds.
pub struct StubStage;

fn must_be_replaced(ctx: &StageCtx<'_>) -> ! {
    panic!(
        "Stub stage '{}' ({}) must be replaced with a real stage",
        ctx.name(),
        ctx.stage_type()
    )
}

impl StageOps for StubStage {
    fn propagate_scale_factors(
        &self,
        ctx: &mut StageCtxMut<'_>,
        input_scales: &[f32],
        step: ScalePropagationStep,
        scale_info: &mut StageDataInfo<f32>,
    ) -> Result<()> {
        let ctx = ctx.view()?;
        match ctx.stage_type() {
            StageType::StubConv | StageType::StubFullyConnected | StageType::StubDeconv => {
                weightable_scale_info(&ctx, input_scales, step, scale_info)
            }
            StageType::StubMaxPool | StageType::StubAvgPool => {
                scale_info.set_output(ctx.output_edge(0)?, input_scale(input_scales));
                Ok(())
            }
            other => unreachable!("{} is not a stub stage", other),
        }
    }

    fn propagate_data_order(
        &self,
        ctx: &StageCtx<'_>,
        _order_info: &mut StageDataInfo<DimsOrder>,
    ) -> Result<()> {
        must_be_replaced(ctx)
    }

    fn get_data_strides_requirements(
        &self,
        ctx: &StageCtx<'_>,
        _strides_info: &mut StageDataInfo<StridesRequirement>,
    ) -> Result<()> {
        must_be_replaced(ctx)
    }

    fn finalize_data_layout(&self, ctx: &mut StageCtxMut<'_>) -> Result<()> {
        must_be_replaced(&ctx.view()?)
    }

    fn get_batch_support_info(
        &self,
        ctx: &StageCtx<'_>,
        batch_info: &mut StageDataInfo<BatchSupport>,
    ) -> Result<()> {
        match ctx.stage_type() {
            StageType::StubConv | StageType::StubFullyConnected | StageType::StubDeconv => {
                weightable_batch_info(ctx, batch_info)
            }
            // Pooling folds the batch into the previous dimension.
            StageType::StubMaxPool | StageType::StubAvgPool => Ok(()),
            other => unreachable!("{} is not a stub stage", other),
        }
    }

    fn initial_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        match ctx.stage_type() {
            StageType::StubConv | StageType::StubFullyConnected | StageType::StubDeconv => {
                assert_weightable_io(ctx)
            }
            StageType::StubMaxPool | StageType::StubAvgPool => {
                assert_inputs_outputs_types(ctx, &[DataType::F16], &[DataType::F16])
            }
            other => unreachable!("{} is not a stub stage", other),
        }
    }

    fn final_check(&self, ctx: &StageCtx<'_>) -> Result<()> {
        must_be_replaced(ctx)
    }

    fn serialize_params(
        &self,
        ctx: &StageCtx<'_>,
        _serializer: &mut BlobSerializer,
    ) -> Result<()> {
        must_be_replaced(ctx)
    }

    fn serialize_data(&self, ctx: &StageCtx<'_>, _serializer: &mut BlobSerializer) -> Result<()> {
        must_be_replaced(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpuc_core::{DataDesc, DataUsage, Model, StageId};

    fn conv_stub(bias_usage: DataUsage) -> (Model, StageId) {
        let mut model = Model::new("net");
        let act = DataDesc::new(DataType::F16, vec![2, 4, 8, 8]).unwrap();
        let input = model.add_data("in", act.clone(), DataUsage::Input).unwrap();
        let output = model.add_data("out", act, DataUsage::Output).unwrap();
        let weights = model
            .add_const_data(
                "w",
                DataDesc::new(DataType::F16, vec![4, 4, 3, 3]).unwrap(),
                vec![0.5; 144],
            )
            .unwrap();
        let biases = match bias_usage {
            DataUsage::Const => model
                .add_const_data("b", DataDesc::new(DataType::F16, vec![4]).unwrap(), vec![0.0; 4])
                .unwrap(),
            _ => model.add_fake_data().unwrap(),
        };
        let id = model
            .add_stage("conv", StageType::StubConv, &[input, weights, biases], &[output])
            .unwrap();
        (model, id)
    }

    fn scale_info(model: &mut Model, id: StageId, step: ScalePropagationStep) -> StageDataInfo<f32> {
        let mut info = StageDataInfo::new();
        let mut ctx = StageCtxMut::new(model, id).unwrap();
        StubStage
            .propagate_scale_factors(&mut ctx, &[4.0, 1.0, 1.0], step, &mut info)
            .unwrap();
        info
    }

    #[test]
    fn test_conv_stub_scales() {
        let (mut model, id) = conv_stub(DataUsage::Const);
        let stage = model.stage(id).unwrap().clone();
        let (w, b, out) = (stage.inputs()[1], stage.inputs()[2], stage.outputs()[0]);

        let info = scale_info(&mut model, id, ScalePropagationStep::Propagate);
        assert_eq!(info.input(w), Some(&1.0));
        assert_eq!(info.input(b), Some(&4.0));
        assert_eq!(info.output(out), Some(&4.0));
        assert!(!info.has_input(stage.inputs()[0]));

        for step in [ScalePropagationStep::Check, ScalePropagationStep::ScaleInput] {
            let info = scale_info(&mut model, id, step);
            assert_eq!(info.input(w), Some(&4.0));
            assert_eq!(info.input(b), Some(&4.0));
            assert_eq!(info.output(out), Some(&4.0));
        }
    }

    #[test]
    fn test_fake_biases_get_no_scale() {
        let (mut model, id) = conv_stub(DataUsage::Fake);
        let b = model.stage(id).unwrap().inputs()[2];
        let info = scale_info(&mut model, id, ScalePropagationStep::ScaleInput);
        assert!(!info.has_input(b));
    }

    #[test]
    fn test_conv_stub_batch_split() {
        let (model, id) = conv_stub(DataUsage::Const);
        let ctx = StageCtx::new(&model, id).unwrap();
        let mut info = StageDataInfo::new();
        StubStage.get_batch_support_info(&ctx, &mut info).unwrap();

        assert_eq!(info.input(ctx.input_edge(0).unwrap()), Some(&BatchSupport::Split));
        assert_eq!(info.output(ctx.output_edge(0).unwrap()), Some(&BatchSupport::Split));
        assert!(!info.has_input(ctx.input_edge(1).unwrap()));
    }

    #[test]
    fn test_conv_stub_initial_check() {
        let (model, id) = conv_stub(DataUsage::Fake);
        let ctx = StageCtx::new(&model, id).unwrap();
        StubStage.initial_check(&ctx).unwrap();
    }

    #[test]
    #[should_panic(expected = "weights must be constant")]
    fn test_non_constant_weights_panic() {
        let mut model = Model::new("net");
        let desc = DataDesc::new(DataType::F16, vec![1, 4]).unwrap();
        let input = model.add_data("in", desc.clone(), DataUsage::Input).unwrap();
        let weights = model.add_data("w", desc.clone(), DataUsage::Input).unwrap();
        let biases = model.add_fake_data().unwrap();
        let output = model.add_data("out", desc, DataUsage::Output).unwrap();
        let id = model
            .add_stage("fc", StageType::StubFullyConnected, &[input, weights, biases], &[output])
            .unwrap();

        let ctx = StageCtx::new(&model, id).unwrap();
        let mut info = StageDataInfo::new();
        let _ = StubStage.get_batch_support_info(&ctx, &mut info);
    }
}

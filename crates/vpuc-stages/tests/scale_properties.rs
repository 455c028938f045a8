mod common;

use common::single_stage;
use proptest::prelude::*;
use vpuc_core::{EdgeId, ScalePropagationStep, StageCtxMut, StageDataInfo, StageType};
use vpuc_stages::capabilities;

fn step_strategy() -> impl Strategy<Value = ScalePropagationStep> {
    prop_oneof![
        Just(ScalePropagationStep::Check),
        Just(ScalePropagationStep::ScaleInput),
        Just(ScalePropagationStep::Propagate),
    ]
}

/// Run one propagation step; returns the info, input edges and output edge.
fn propagate(
    stage_type: StageType,
    scale: f32,
    step: ScalePropagationStep,
) -> (StageDataInfo<f32>, Vec<EdgeId>, EdgeId) {
    let (mut model, id) = single_stage(stage_type);
    let stage = model.stage(id).unwrap().clone();
    let mut info = StageDataInfo::new();
    let scales = vec![scale; stage.inputs().len()];
    let mut ctx = StageCtxMut::new(&mut model, id).unwrap();
    capabilities(stage_type)
        .propagate_scale_factors(&mut ctx, &scales, step, &mut info)
        .unwrap();
    (info, stage.inputs().to_vec(), stage.outputs()[0])
}

proptest! {
    #[test]
    fn test_pooling_passes_scale_through(
        scale in 0.001f32..1000.0,
        step in step_strategy(),
        max in any::<bool>(),
    ) {
        let kinds = if max {
            [StageType::StubMaxPool, StageType::MaxPool]
        } else {
            [StageType::StubAvgPool, StageType::AvgPool]
        };
        for stage_type in kinds {
            let (info, inputs, output) = propagate(stage_type, scale, step);
            prop_assert_eq!(info.output(output), Some(&scale));
            prop_assert!(!info.has_input(inputs[0]));
        }
    }

    #[test]
    fn test_weightable_stub_scales(
        scale in 0.001f32..1000.0,
        step in step_strategy(),
    ) {
        for stage_type in [StageType::StubConv, StageType::StubFullyConnected, StageType::StubDeconv] {
            let (info, inputs, output) = propagate(stage_type, scale, step);
            let expected_weights = if step == ScalePropagationStep::Propagate { 1.0 } else { scale };
            prop_assert_eq!(info.input(inputs[1]), Some(&expected_weights));
            prop_assert_eq!(info.input(inputs[2]), Some(&scale));
            prop_assert_eq!(info.output(output), Some(&scale));
        }
    }
}

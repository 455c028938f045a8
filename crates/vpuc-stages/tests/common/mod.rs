//! Model builders shared by the stage tests.

use vpuc_core::{DataDesc, DataType, DataUsage, Model, StageId, StageType};

/// Build a model holding a single stage of `stage_type`.
///
/// Weightable kinds get constant weights and biases as inputs 1 and 2;
/// everything else gets a single activation input.
pub fn single_stage(stage_type: StageType) -> (Model, StageId) {
    let mut model = Model::new("single");
    let act = DataDesc::new(DataType::F16, vec![1, 4, 8, 8]).unwrap();
    let input = model.add_data("input", act.clone(), DataUsage::Input).unwrap();
    let output = model.add_data("output", act, DataUsage::Output).unwrap();

    let inputs = if stage_type.is_weightable() {
        let weights = model
            .add_const_data(
                "weights",
                DataDesc::new(DataType::F16, vec![4, 4, 3, 3]).unwrap(),
                vec![0.25; 144],
            )
            .unwrap();
        let biases = model
            .add_const_data(
                "biases",
                DataDesc::new(DataType::F16, vec![4]).unwrap(),
                vec![1.0; 4],
            )
            .unwrap();
        vec![input, weights, biases]
    } else {
        vec![input]
    };

    let id = model
        .add_stage(format!("{}", stage_type), stage_type, &inputs, &[output])
        .unwrap();
    (model, id)
}

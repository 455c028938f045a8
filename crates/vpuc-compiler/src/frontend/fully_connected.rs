//! `FullyConnected` (`InnerProduct`) layers.

use super::convolution::channels;
use super::{layer_error, single_io, weights_and_biases};
use crate::Result;
use vpuc_core::{
    AttrKey, CompilationConfig, DataDesc, DataId, DataType, Dim, Model, StageId, StageType,
};
use vpuc_network::Layer;

pub(super) fn parse(
    model: &mut Model,
    config: &CompilationConfig,
    layer: &Layer,
    inputs: &[DataId],
    outputs: &[DataId],
) -> Result<StageId> {
    let (input, output) = single_io(layer, inputs, outputs)?;
    let input_desc = model.data(input)?.desc.clone();
    let output_desc = model.data(output)?.desc.clone();

    if input_desc.num_dims() < 2 {
        return Err(layer_error(layer, "FullyConnected needs a batched input"));
    }
    if output_desc.num_dims() != 2 {
        return Err(layer_error(layer, "FullyConnected supports only 2D output"));
    }
    let batch = input_desc.dim(Dim::N).unwrap_or(1);
    if output_desc.dim(Dim::N) != Some(batch) {
        return Err(layer_error(
            layer,
            format!(
                "batch mismatch between input {:?} and output {:?}",
                input_desc.dims(),
                output_desc.dims()
            ),
        ));
    }

    let in_size = input_desc.total_dim_size() / batch;
    let out_channels = channels(layer, &output_desc)?;

    let try_hw = config.hw_optimization && !config.is_hw_disabled(&layer.name);

    let weights_desc = DataDesc::new(DataType::F16, vec![out_channels, in_size])?;
    let (weights, biases) = weights_and_biases(model, layer, "@fc", weights_desc, out_channels)?;

    let stage = model.add_stage(
        &layer.name,
        StageType::StubFullyConnected,
        &[input, weights, biases],
        &[output],
    )?;
    model
        .stage_mut(stage)?
        .attrs_mut()
        .set(AttrKey::TryHw, try_hw)?;
    Ok(stage)
}

//! `Pooling` layers (`pool_method` `max` or `avg`).

use super::convolution::channels;
use super::{layer_error, single_io, try_hw, Window};
use crate::Result;
use vpuc_core::{AttrKey, CompilationConfig, DataId, Model, StageId, StageType};
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

    let rank = input_desc.num_dims();
    if !(3..=5).contains(&rank) || output_desc.num_dims() != rank {
        return Err(layer_error(
            layer,
            format!(
                "Pooling supports only same-rank 3D, 4D or 5D tensors, got {:?} -> {:?}",
                input_desc.dims(),
                output_desc.dims()
            ),
        ));
    }
    if channels(layer, &input_desc)? != channels(layer, &output_desc)? {
        return Err(layer_error(layer, "Pooling cannot change the channel count"));
    }
    let is_3d = rank == 5;

    let stage_type = match layer.attr_or("pool_method", "max".to_string())?.as_str() {
        "max" => StageType::StubMaxPool,
        "avg" => StageType::StubAvgPool,
        other => {
            return Err(layer_error(layer, format!("unknown pool_method '{}'", other)));
        }
    };
    let exclude_pad = layer.attr_or("exclude_pad", "false".to_string())? == "true";

    let window = Window::parse(layer, if is_3d { 3 } else { 2 }, false)?;
    let try_hw = try_hw(config, &layer.name, &window, output_desc.num_dims(), is_3d);

    let stage = model.add_stage(&layer.name, stage_type, &[input], &[output])?;
    let attrs = model.stage_mut(stage)?.attrs_mut();
    window.store(attrs, is_3d)?;
    if stage_type == StageType::StubAvgPool {
        attrs.set(AttrKey::ExcludePad, exclude_pad)?;
    }
    attrs.set(AttrKey::TryHw, try_hw)?;
    Ok(stage)
}

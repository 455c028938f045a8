//! `Power` layers: `y = (scale * x + shift) ^ power`.

use super::{layer_error, single_io};
use crate::Result;
use vpuc_core::{AttrKey, DataId, Model, StageId, StageType};
use vpuc_network::Layer;

pub(super) fn parse(
    model: &mut Model,
    layer: &Layer,
    inputs: &[DataId],
    outputs: &[DataId],
) -> Result<StageId> {
    let (input, output) = single_io(layer, inputs, outputs)?;
    if model.data(input)?.desc.dims() != model.data(output)?.desc.dims() {
        return Err(layer_error(layer, "Power cannot change the tensor shape"));
    }

    let scale = layer.attr_or("scale", 1.0f32)?;
    let power = layer.attr_or("power", 1.0f32)?;
    let shift = layer.attr_or("shift", 0.0f32)?;

    let stage = model.add_stage(&layer.name, StageType::Power, &[input], &[output])?;
    let attrs = model.stage_mut(stage)?.attrs_mut();
    attrs.set(AttrKey::Scale, scale)?;
    attrs.set(AttrKey::Power, power)?;
    attrs.set(AttrKey::Bias, shift)?;
    Ok(stage)
}

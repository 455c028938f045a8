//! `Deconvolution` layers.
//!
//! Deconvolution weights are stored input-channel major; the stub is always
//! lowered to the software implementation, the tryHW decision is kept for
//! diagnostics.

use super::convolution::channels;
use super::{layer_error, single_io, try_hw, weights_and_biases, Window};
use crate::Result;
use vpuc_core::{AttrKey, CompilationConfig, DataDesc, DataId, DataType, Model, StageId, StageType};
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
    if !(3..=5).contains(&rank) {
        return Err(layer_error(
            layer,
            "Deconvolution supports only 3D or 4D or 5D input",
        ));
    }
    if output_desc.num_dims() != rank {
        return Err(layer_error(
            layer,
            "Deconvolution supports only same num dims in input and output",
        ));
    }
    let is_3d = rank == 5;

    let window = Window::parse(layer, if is_3d { 3 } else { 2 }, true)?;
    let group = layer.attr_or::<i64>("group", 1)?;
    let group = i32::try_from(group)
        .ok()
        .filter(|g| *g >= 1)
        .ok_or_else(|| layer_error(layer, format!("invalid group {}", group)))?;

    let in_channels = channels(layer, &input_desc)?;
    let out_channels = channels(layer, &output_desc)?;
    if out_channels % group as usize != 0 {
        return Err(layer_error(
            layer,
            format!("{} output channels do not split into {} groups", out_channels, group),
        ));
    }

    let try_hw = try_hw(config, &layer.name, &window, output_desc.num_dims(), is_3d);

    let [kx, ky, kz] = window.kernel_dims();
    let mut weights_dims = vec![in_channels, out_channels / group as usize];
    if is_3d {
        weights_dims.push(kz);
    }
    weights_dims.extend([ky, kx]);
    let weights_desc = DataDesc::new(DataType::F16, weights_dims)?;
    let (weights, biases) =
        weights_and_biases(model, layer, "@deconv", weights_desc, out_channels)?;

    let stage = model.add_stage(
        &layer.name,
        StageType::StubDeconv,
        &[input, weights, biases],
        &[output],
    )?;
    let attrs = model.stage_mut(stage)?.attrs_mut();
    window.store(attrs, is_3d)?;
    attrs.set(AttrKey::GroupSize, group)?;
    attrs.set(AttrKey::TryHw, try_hw)?;
    Ok(stage)
}

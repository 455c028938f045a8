//! `Convolution` layers.

use super::{layer_error, single_io, try_hw, weights_and_biases, Window};
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

    let rank = input_desc.num_dims();
    if !(3..=5).contains(&rank) {
        return Err(layer_error(
            layer,
            "Convolution supports only 3D or 4D or 5D input",
        ));
    }
    if output_desc.num_dims() != rank {
        return Err(layer_error(
            layer,
            "Convolution supports only same num dims in input and output",
        ));
    }
    let is_3d = rank == 5;

    //
    // Extract parameters
    //

    let window = Window::parse(layer, if is_3d { 3 } else { 2 }, true)?;
    let group = layer.attr_or::<i64>("group", 1)?;
    let group = i32::try_from(group)
        .ok()
        .filter(|g| *g >= 1)
        .ok_or_else(|| layer_error(layer, format!("invalid group {}", group)))?;

    let in_channels = channels(layer, &input_desc)?;
    let out_channels = channels(layer, &output_desc)?;
    if in_channels % group as usize != 0 {
        return Err(layer_error(
            layer,
            format!("{} input channels do not split into {} groups", in_channels, group),
        ));
    }

    //
    // Check if HW is applicable
    //

    let try_hw = try_hw(config, &layer.name, &window, output_desc.num_dims(), is_3d);

    //
    // Create const datas
    //

    let [kx, ky, kz] = window.kernel_dims();
    let mut weights_dims = vec![out_channels, in_channels / group as usize];
    if is_3d {
        weights_dims.push(kz);
    }
    weights_dims.extend([ky, kx]);
    let weights_desc = DataDesc::new(DataType::F16, weights_dims)?;
    let (weights, biases) = weights_and_biases(model, layer, "@conv", weights_desc, out_channels)?;

    //
    // Create stub stage
    //

    let stage = model.add_stage(
        &layer.name,
        StageType::StubConv,
        &[input, weights, biases],
        &[output],
    )?;
    let attrs = model.stage_mut(stage)?.attrs_mut();
    window.store(attrs, is_3d)?;
    attrs.set(AttrKey::GroupSize, group)?;
    attrs.set(AttrKey::TryHw, try_hw)?;
    Ok(stage)
}

pub(super) fn channels(layer: &Layer, desc: &DataDesc) -> Result<usize> {
    desc.dim(Dim::C)
        .ok_or_else(|| layer_error(layer, format!("tensor {:?} has no channels", desc.dims())))
}

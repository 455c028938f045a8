//! Translation of network layers into stages.
//!
//! Every layer parser follows the same pattern: validate arity and ranks,
//! extract structural parameters, reshape weights and biases into the layout
//! the implementation expects, decide hardware eligibility and create the
//! stage. Operations that may run on the fixed-function hardware become stub
//! stages carrying their tryHW decision in `AttrKey::TryHw`.

mod convolution;
mod deconvolution;
mod fully_connected;
mod pooling;
mod power;

use crate::{Error, Result};
use std::collections::HashMap;
use vpuc_core::{
    AttrKey, Attributes, CompilationConfig, DataDesc, DataId, DataType, DataUsage, Model, StageId,
};
use vpuc_network::{Layer, Network, TensorKind};
use vpuc_stages::stages::{MAX_HW_KERNEL, MAX_HW_STRIDE};

/// Build the initial stage graph of `network`.
pub fn build_model(network: &Network, config: &CompilationConfig) -> Result<Model> {
    network.validate()?;

    let mut model = Model::new(network.name.clone());
    let mut datas: HashMap<&str, DataId> = HashMap::new();
    for tensor in &network.tensors {
        let desc = DataDesc::new(data_type(tensor.dtype), tensor.shape.clone())?;
        let id = match tensor.kind {
            TensorKind::Input => model.add_data(&tensor.name, desc, DataUsage::Input)?,
            TensorKind::Output => model.add_data(&tensor.name, desc, DataUsage::Output)?,
            TensorKind::Intermediate => {
                model.add_data(&tensor.name, desc, DataUsage::Intermediate)?
            }
            TensorKind::Weight => {
                let values = tensor.data.clone().unwrap_or_default();
                model.add_const_data(&tensor.name, desc, values)?
            }
        };
        datas.insert(tensor.name.as_str(), id);
    }

    for layer in &network.layers {
        let _span =
            tracing::trace_span!("layer", name = %layer.name, ty = %layer.layer_type).entered();
        let inputs = lookup(&datas, &layer.inputs)?;
        let outputs = lookup(&datas, &layer.outputs)?;

        let stage = parse_layer(&mut model, config, layer, &inputs, &outputs)?;

        let hint = if layer.has_attr("scale_factor") {
            let hint = layer.attr::<f32>("scale_factor")?;
            if !hint.is_finite() || hint <= 0.0 {
                return Err(layer_error(
                    layer,
                    format!("scale_factor must be finite and positive, got {}", hint),
                ));
            }
            Some(hint)
        } else {
            None
        };
        let node = model.stage_mut(stage)?;
        node.origin = Some(layer.name.clone());
        if let Some(hint) = hint {
            node.attrs_mut().set(AttrKey::ScaleFactor, hint)?;
        }
        tracing::trace!(stage = %node.name, ty = %node.stage_type(), "layer parsed");
    }

    tracing::debug!(
        datas = model.data_count(),
        stages = model.stage_count(),
        "frontend built model"
    );
    Ok(model)
}

fn parse_layer(
    model: &mut Model,
    config: &CompilationConfig,
    layer: &Layer,
    inputs: &[DataId],
    outputs: &[DataId],
) -> Result<StageId> {
    match layer.layer_type.as_str() {
        "Convolution" => convolution::parse(model, config, layer, inputs, outputs),
        "Deconvolution" => deconvolution::parse(model, config, layer, inputs, outputs),
        "FullyConnected" | "InnerProduct" => {
            fully_connected::parse(model, config, layer, inputs, outputs)
        }
        "Pooling" => pooling::parse(model, config, layer, inputs, outputs),
        "Power" => power::parse(model, layer, inputs, outputs),
        other => Err(vpuc_core::Error::Unsupported(format!(
            "Layer '{}' has unsupported type '{}'",
            layer.name, other
        ))
        .into()),
    }
}

fn lookup(datas: &HashMap<&str, DataId>, names: &[String]) -> Result<Vec<DataId>> {
    names
        .iter()
        .map(|name| {
            datas
                .get(name.as_str())
                .copied()
                .ok_or_else(|| Error::from(vpuc_network::NetworkError::MissingTensor(name.clone())))
        })
        .collect()
}

fn data_type(dtype: vpuc_network::DataType) -> DataType {
    match dtype {
        vpuc_network::DataType::F16 => DataType::F16,
        vpuc_network::DataType::F32 => DataType::F32,
        vpuc_network::DataType::I32 => DataType::I32,
        vpuc_network::DataType::U8 => DataType::U8,
    }
}

/// Error attributed to a layer.
pub(crate) fn layer_error(layer: &Layer, message: impl Into<String>) -> Error {
    Error::Layer {
        layer: layer.name.clone(),
        message: message.into(),
    }
}

/// The single input and single output of a layer.
pub(crate) fn single_io(
    layer: &Layer,
    inputs: &[DataId],
    outputs: &[DataId],
) -> Result<(DataId, DataId)> {
    match (inputs, outputs) {
        ([input], [output]) => Ok((*input, *output)),
        _ => Err(layer_error(
            layer,
            format!(
                "expects 1 input and 1 output, got {} and {}",
                inputs.len(),
                outputs.len()
            ),
        )),
    }
}

/// Kernel window of a convolution-like layer, per axis `[x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub kernel: [i32; 3],
    pub stride: [i32; 3],
    pub pads_begin: [i32; 3],
    pub pads_end: [i32; 3],
    pub dilation: [i32; 3],
}

impl Window {
    /// Read `kernel`, `strides`, `pads_begin`, `pads_end` and (when
    /// `dilated`) `dilations` from a layer.
    ///
    /// Lists are written outermost axis first, as in the tensor shapes; a
    /// single value applies to every axis. Missing end paddings repeat the
    /// begin paddings.
    pub fn parse(layer: &Layer, axes: usize, dilated: bool) -> Result<Self> {
        if !layer.has_attr("kernel") {
            return Err(vpuc_network::NetworkError::MissingAttribute {
                layer: layer.name.clone(),
                name: "kernel".to_string(),
            }
            .into());
        }
        let kernel = spatial_attr(layer, "kernel", axes, 1)?;
        let stride = spatial_attr(layer, "strides", axes, 1)?;
        let pads_begin = spatial_attr(layer, "pads_begin", axes, 0)?;
        let pads_end = if layer.has_attr("pads_end") {
            spatial_attr(layer, "pads_end", axes, 0)?
        } else {
            pads_begin
        };
        let dilation = if dilated {
            spatial_attr(layer, "dilations", axes, 1)?
        } else {
            [1; 3]
        };

        let window = Self {
            kernel,
            stride,
            pads_begin,
            pads_end,
            dilation,
        };
        let positive = window.kernel.iter().chain(&window.stride).chain(&window.dilation);
        let padding = window.pads_begin.iter().chain(&window.pads_end);
        if positive.copied().any(|v| v < 1) || padding.copied().any(|v| v < 0) {
            return Err(layer_error(layer, format!("invalid window {:?}", window)));
        }
        Ok(window)
    }

    /// Kernel sizes as tensor dimensions.
    pub fn kernel_dims(&self) -> [usize; 3] {
        self.kernel.map(|k| k.max(1) as usize)
    }

    /// Store the window; depth parameters only for 3-D operations.
    pub fn store(&self, attrs: &mut Attributes, is_3d: bool) -> Result<()> {
        attrs.set(AttrKey::KernelSizeX, self.kernel[0])?;
        attrs.set(AttrKey::KernelSizeY, self.kernel[1])?;

        attrs.set(AttrKey::KernelStrideX, self.stride[0])?;
        attrs.set(AttrKey::KernelStrideY, self.stride[1])?;

        attrs.set(AttrKey::PadLeft, self.pads_begin[0])?;
        attrs.set(AttrKey::PadRight, self.pads_end[0])?;
        attrs.set(AttrKey::PadTop, self.pads_begin[1])?;
        attrs.set(AttrKey::PadBottom, self.pads_end[1])?;

        attrs.set(AttrKey::DilationX, self.dilation[0])?;
        attrs.set(AttrKey::DilationY, self.dilation[1])?;

        if is_3d {
            attrs.set(AttrKey::KernelSizeZ, self.kernel[2])?;
            attrs.set(AttrKey::KernelStrideZ, self.stride[2])?;
            attrs.set(AttrKey::PadFront, self.pads_begin[2])?;
            attrs.set(AttrKey::PadBack, self.pads_end[2])?;
            attrs.set(AttrKey::DilationZ, self.dilation[2])?;
        }
        Ok(())
    }
}

/// Read a per-axis list attribute into `[x, y, z]`, `default` elsewhere.
fn spatial_attr(layer: &Layer, name: &str, axes: usize, default: i32) -> Result<[i32; 3]> {
    let mut out = [default; 3];
    if !layer.has_attr(name) {
        return Ok(out);
    }
    let mut values: Vec<i64> = layer.attr(name)?;
    if values.len() == 1 {
        values = vec![values[0]; axes];
    }
    if values.len() != axes {
        return Err(layer_error(
            layer,
            format!("'{}' lists {} values for {} axes", name, values.len(), axes),
        ));
    }
    for (axis, value) in values.iter().rev().enumerate() {
        out[axis] = i32::try_from(*value)
            .map_err(|_| layer_error(layer, format!("'{}' value {} is out of range", name, value)))?;
    }
    Ok(out)
}

/// Hardware eligibility of a windowed operation.
///
/// Starts at the configuration's hardware switch and is cleared by any
/// parameter the fixed-function units cannot handle.
pub(crate) fn try_hw(
    config: &CompilationConfig,
    layer: &str,
    window: &Window,
    output_rank: usize,
    is_3d: bool,
) -> bool {
    let mut try_hw = config.hw_optimization;

    if window.stride[0] != window.stride[1] {
        try_hw = false;
    }

    if window.dilation.iter().any(|&d| d != 1) && !config.hw_dilation {
        try_hw = false;
    }

    if window.kernel[0] > MAX_HW_KERNEL
        || window.kernel[1] > MAX_HW_KERNEL
        || window.kernel[2] > 1
        || window.stride[0] > MAX_HW_STRIDE
    {
        try_hw = false;
    }

    if config.is_hw_disabled(layer) {
        try_hw = false;
    }

    if output_rank < 4 || is_3d {
        try_hw = false;
    }

    tracing::trace!(layer, try_hw, "hardware eligibility");
    try_hw
}

/// Constant weights (and biases, or the fake placeholder) of a layer,
/// duplicated under the descriptors the stage expects.
pub(crate) fn weights_and_biases(
    model: &mut Model,
    layer: &Layer,
    postfix: &str,
    weights_desc: DataDesc,
    out_channels: usize,
) -> Result<(DataId, DataId)> {
    let weights_name = layer
        .weights
        .as_deref()
        .ok_or_else(|| layer_error(layer, "has no weights"))?;
    let weights = const_by_name(model, layer, weights_name)?;
    let weights = model.duplicate_data(weights, postfix, weights_desc)?;

    let biases = match layer.biases.as_deref() {
        Some(name) => {
            let biases = const_by_name(model, layer, name)?;
            let desc = DataDesc::new(DataType::F16, vec![out_channels])?;
            model.duplicate_data(biases, postfix, desc)?
        }
        None => model.add_fake_data()?,
    };
    Ok((weights, biases))
}

fn const_by_name(model: &Model, layer: &Layer, name: &str) -> Result<DataId> {
    model
        .data_by_name(name)
        .ok_or_else(|| layer_error(layer, format!("weights '{}' not found", name)))
}

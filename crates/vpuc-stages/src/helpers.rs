//! Helpers shared by stage implementations.

use vpuc_core::{
    AttrKey, Attributes, BatchSupport, BlobSerializer, DataType, DataUsage, DimsOrder, Error,
    Result, ScalePropagationStep, StageCtx, StageCtxMut, StageDataInfo, StridesRequirement,
};

/// Check the arity and element types of a stage's inputs and outputs.
pub fn assert_inputs_outputs_types(
    ctx: &StageCtx<'_>,
    inputs: &[DataType],
    outputs: &[DataType],
) -> Result<()> {
    if ctx.input_count() != inputs.len() || ctx.output_count() != outputs.len() {
        return Err(Error::TypeMismatch {
            stage: ctx.name().to_string(),
            message: format!(
                "expected {} inputs and {} outputs, got {} and {}",
                inputs.len(),
                outputs.len(),
                ctx.input_count(),
                ctx.output_count()
            ),
        });
    }
    for (port, expected) in inputs.iter().enumerate() {
        let data = ctx.input(port)?;
        if data.desc.dtype() != *expected {
            return Err(Error::TypeMismatch {
                stage: ctx.name().to_string(),
                message: format!(
                    "input {} ('{}') is {:?}, expected {:?}",
                    port,
                    data.name,
                    data.desc.dtype(),
                    expected
                ),
            });
        }
    }
    for (port, expected) in outputs.iter().enumerate() {
        let data = ctx.output(port)?;
        if data.desc.dtype() != *expected {
            return Err(Error::TypeMismatch {
                stage: ctx.name().to_string(),
                message: format!(
                    "output {} ('{}') is {:?}, expected {:?}",
                    port,
                    data.name,
                    data.desc.dtype(),
                    expected
                ),
            });
        }
    }
    Ok(())
}

/// Check a weightable stage: `F16` activations, weights and biases, with
/// the usage each slot allows.
///
/// Input 0 is any non-fake data, input 1 must be constant, input 2 is a
/// constant or the fake data standing for absent biases.
pub fn assert_weightable_io(ctx: &StageCtx<'_>) -> Result<()> {
    assert_inputs_outputs_types(
        ctx,
        &[DataType::F16, DataType::F16, DataType::F16],
        &[DataType::F16],
    )?;
    let allowed: [&[DataUsage]; 3] = [
        &[
            DataUsage::Input,
            DataUsage::Output,
            DataUsage::Intermediate,
            DataUsage::Const,
        ],
        &[DataUsage::Const],
        &[DataUsage::Const, DataUsage::Fake],
    ];
    for (port, usages) in allowed.iter().enumerate() {
        let data = ctx.input(port)?;
        if !usages.contains(&data.usage()) {
            return Err(Error::TypeMismatch {
                stage: ctx.name().to_string(),
                message: format!(
                    "input {} ('{}') is {:?} data, expected one of {:?}",
                    port,
                    data.name,
                    data.usage(),
                    usages
                ),
            });
        }
    }
    Ok(())
}

/// Scale of input 0 (1.0 when no scale was supplied).
pub fn input_scale(input_scales: &[f32]) -> f32 {
    input_scales.first().copied().unwrap_or(1.0)
}

fn assert_weightable_inputs(ctx: &StageCtx<'_>) -> Result<(DataUsage, DataUsage)> {
    let weights = ctx.input(1)?.usage();
    let biases = ctx.input(2)?.usage();
    assert!(
        weights == DataUsage::Const,
        "Stage '{}': weights must be constant, got {:?}",
        ctx.name(),
        weights
    );
    assert!(
        matches!(biases, DataUsage::Const | DataUsage::Fake),
        "Stage '{}': biases must be constant or absent, got {:?}",
        ctx.name(),
        biases
    );
    Ok((weights, biases))
}

/// Scale rules of stages that absorb a scale into their weights and biases.
///
/// Weights take the input scale except under `Propagate`, where they stay
/// unscaled. Present biases and the output always take the input scale.
pub fn weightable_scale_info(
    ctx: &StageCtx<'_>,
    input_scales: &[f32],
    step: ScalePropagationStep,
    scale_info: &mut StageDataInfo<f32>,
) -> Result<()> {
    let (_, biases) = assert_weightable_inputs(ctx)?;
    let scale = input_scale(input_scales);

    let weights_scale = if step == ScalePropagationStep::Propagate {
        1.0
    } else {
        scale
    };
    scale_info.set_input(ctx.input_edge(1)?, weights_scale);
    if biases == DataUsage::Const {
        scale_info.set_input(ctx.input_edge(2)?, scale);
    }
    scale_info.set_output(ctx.output_edge(0)?, scale);
    Ok(())
}

/// Weightable stages run once per batch item.
pub fn weightable_batch_info(
    ctx: &StageCtx<'_>,
    batch_info: &mut StageDataInfo<BatchSupport>,
) -> Result<()> {
    assert_weightable_inputs(ctx)?;
    batch_info.set_input(ctx.input_edge(0)?, BatchSupport::Split);
    batch_info.set_output(ctx.output_edge(0)?, BatchSupport::Split);
    Ok(())
}

/// Forward the scale of input 0 to every output.
pub fn pass_through_scale(
    ctx: &StageCtx<'_>,
    input_scales: &[f32],
    scale_info: &mut StageDataInfo<f32>,
) -> Result<()> {
    let scale = input_scale(input_scales);
    for port in 0..ctx.output_count() {
        scale_info.set_output(ctx.output_edge(port)?, scale);
    }
    Ok(())
}

/// Require `req` on every input and output edge.
pub fn require_all(
    ctx: &StageCtx<'_>,
    req: StridesRequirement,
    strides_info: &mut StageDataInfo<StridesRequirement>,
) -> Result<()> {
    for port in 0..ctx.input_count() {
        strides_info.set_input(ctx.input_edge(port)?, req);
    }
    for port in 0..ctx.output_count() {
        strides_info.set_output(ctx.output_edge(port)?, req);
    }
    Ok(())
}

/// Require `order` on input 0 and output 0.
pub fn require_main_order(
    ctx: &StageCtx<'_>,
    order: DimsOrder,
    order_info: &mut StageDataInfo<DimsOrder>,
) -> Result<()> {
    order_info.set_input(ctx.input_edge(0)?, order);
    order_info.set_output(ctx.output_edge(0)?, order);
    Ok(())
}

/// Give every output the current order of input 0.
pub fn follow_input_order(
    ctx: &StageCtx<'_>,
    order_info: &mut StageDataInfo<DimsOrder>,
) -> Result<()> {
    let order = ctx.input(0)?.desc.order();
    for port in 0..ctx.output_count() {
        let output = ctx.output(port)?;
        if output.desc.order().same_dims(&order) {
            order_info.set_output(ctx.output_edge(port)?, order);
        }
    }
    Ok(())
}

/// Put a constant input into `order`, duplicating it when other stages
/// share it.
pub fn reorder_const_input(ctx: &mut StageCtxMut<'_>, port: usize, order: DimsOrder) -> Result<()> {
    let data_id = ctx.input_id(port)?;
    let data = ctx.model.data(data_id)?;
    if data.usage() != DataUsage::Const || data.desc.order() == order {
        return Ok(());
    }
    if data.consumer_edges().len() == 1 {
        ctx.data_mut(data_id)?.desc.set_order(order)?;
        return Ok(());
    }
    let desc = data.desc.with_order(order)?;
    let edge = ctx.input_edge(port)?;
    let copy = ctx.model.duplicate_data(data_id, &format!("@{}", order), desc)?;
    ctx.model.replace_input(edge, copy)?;
    tracing::trace!(port, %order, "duplicated shared constant for reorder");
    Ok(())
}

/// Check that input 0 and output 0 carry `order`.
pub fn check_main_order(ctx: &StageCtx<'_>, order: DimsOrder) -> Result<()> {
    for data in [ctx.input(0)?, ctx.output(0)?] {
        if data.desc.order() != order {
            return Err(Error::Compilation(format!(
                "Stage '{}': data '{}' is {}, expected {}",
                ctx.name(),
                data.name,
                data.desc.order(),
                order
            )));
        }
    }
    Ok(())
}

/// Emit buffer descriptors of all inputs, then all outputs.
pub fn serialize_ports(ctx: &StageCtx<'_>, serializer: &mut BlobSerializer) -> Result<()> {
    for data in ctx.inputs()? {
        serializer.write_buffer_descriptor(data)?;
    }
    for data in ctx.outputs()? {
        serializer.write_buffer_descriptor(data)?;
    }
    Ok(())
}

/// Emit buffer descriptors followed by the weights metadata
/// (group size, bias presence).
pub fn serialize_weightable_data(
    ctx: &StageCtx<'_>,
    serializer: &mut BlobSerializer,
) -> Result<()> {
    serialize_ports(ctx, serializer)?;
    let group = ctx.attrs().get_int_or(AttrKey::GroupSize, 1)?;
    serializer.append_i32(group);
    let has_biases = ctx.input(2)?.usage() == DataUsage::Const;
    serializer.append_u32(u32::from(has_biases));
    Ok(())
}

/// Kernel window parameters, with defaults for absent 3-D fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub kernel: [i32; 3],
    pub stride: [i32; 3],
    /// Left, right, top, bottom, front, back.
    pub pads: [i32; 6],
    pub dilation: [i32; 3],
}

impl Window {
    /// Read the window attributes of a stage.
    pub fn from_attrs(attrs: &Attributes) -> Result<Self> {
        Ok(Self {
            kernel: [
                attrs.get_int(AttrKey::KernelSizeX)?,
                attrs.get_int(AttrKey::KernelSizeY)?,
                attrs.get_int_or(AttrKey::KernelSizeZ, 1)?,
            ],
            stride: [
                attrs.get_int(AttrKey::KernelStrideX)?,
                attrs.get_int(AttrKey::KernelStrideY)?,
                attrs.get_int_or(AttrKey::KernelStrideZ, 1)?,
            ],
            pads: [
                attrs.get_int_or(AttrKey::PadLeft, 0)?,
                attrs.get_int_or(AttrKey::PadRight, 0)?,
                attrs.get_int_or(AttrKey::PadTop, 0)?,
                attrs.get_int_or(AttrKey::PadBottom, 0)?,
                attrs.get_int_or(AttrKey::PadFront, 0)?,
                attrs.get_int_or(AttrKey::PadBack, 0)?,
            ],
            dilation: [
                attrs.get_int_or(AttrKey::DilationX, 1)?,
                attrs.get_int_or(AttrKey::DilationY, 1)?,
                attrs.get_int_or(AttrKey::DilationZ, 1)?,
            ],
        })
    }

    /// Emit kernel, stride, pads and dilation as `i32` fields.
    pub fn serialize(&self, serializer: &mut BlobSerializer) {
        for v in self
            .kernel
            .iter()
            .chain(&self.stride)
            .chain(&self.pads)
            .chain(&self.dilation)
        {
            serializer.append_i32(*v);
        }
    }
}

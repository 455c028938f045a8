//! Quantization scale propagation.
//!
//! Walks the graph in topological order tracking the scale every data node
//! carries. Each stage first reports the scales it requires (`Check`); inputs
//! carrying another scale are rescaled by an inserted `Power` stage. A stage
//! with a scale hint and unscaled inputs then scales its input
//! (`ScaleInput`); every other stage forwards the scales it receives
//! (`Propagate`). Constants are replaced by scaled copies and scaled network
//! outputs are restored by a final `Power` stage.

use super::derived_data;
use std::collections::HashMap;
use vpuc_core::{
    AttrKey, CompilationConfig, DataId, DataUsage, EdgeId, Model, Pass, PassPhase, Result,
    ScalePropagationStep, StageCtxMut, StageDataInfo, StageId, StageType,
};
use vpuc_stages::capabilities;

/// Folds quantization scales into weightable stages (hardware builds only).
pub struct ScalePropagationPass;

/// Actual scale of every data node; absent means 1.0.
type Scales = HashMap<DataId, f32>;

fn scale_of(scales: &Scales, data: DataId) -> f32 {
    scales.get(&data).copied().unwrap_or(1.0)
}

/// Insert `Power(scale = factor)` between `data` and the consumer edge.
fn insert_rescale(
    model: &mut Model,
    data: DataId,
    edge: EdgeId,
    factor: f32,
    tag: &str,
) -> Result<DataId> {
    let rescaled = derived_data(model, data, tag)?;
    let name = format!("{}{}", model.data(data)?.name, tag);
    let stage = model.add_stage(name, StageType::Power, &[data], &[rescaled])?;
    set_power_attrs(model, stage, factor)?;
    model.replace_input(edge, rescaled)?;
    Ok(rescaled)
}

fn set_power_attrs(model: &mut Model, stage: StageId, factor: f32) -> Result<()> {
    let attrs = model.stage_mut(stage)?.attrs_mut();
    attrs.set(AttrKey::Scale, factor)?;
    attrs.set(AttrKey::Power, 1.0f32)?;
    attrs.set(AttrKey::Bias, 0.0f32)
}

impl ScalePropagationPass {
    fn process_stage(model: &mut Model, id: StageId, scales: &mut Scales) -> Result<bool> {
        let stage_type = model.stage(id)?.stage_type();
        let ops = capabilities(stage_type);
        let mut changed = false;

        //
        // Check: reconcile inputs with the scales the stage requires
        //

        let input_ids = Self::input_ids(model, id)?;
        let actual: Vec<f32> = input_ids.iter().map(|d| scale_of(scales, *d)).collect();
        let mut required = StageDataInfo::new();
        ops.propagate_scale_factors(
            &mut StageCtxMut::new(model, id)?,
            &actual,
            ScalePropagationStep::Check,
            &mut required,
        )?;

        let edges = model.stage(id)?.inputs().to_vec();
        for (port, edge) in edges.into_iter().enumerate() {
            let data = input_ids[port];
            if matches!(
                model.data(data)?.usage(),
                DataUsage::Const | DataUsage::Fake
            ) {
                continue;
            }
            let Some(&wanted) = required.input(edge) else {
                continue;
            };
            let current = actual[port];
            if wanted != current {
                let rescaled = insert_rescale(model, data, edge, wanted / current, "@rescale")?;
                scales.insert(rescaled, wanted);
                tracing::trace!(stage = id.index(), port, current, wanted, "rescaled input");
                changed = true;
            }
        }

        //
        // ScaleInput or Propagate
        //

        let input_ids = Self::input_ids(model, id)?;
        let actual: Vec<f32> = input_ids.iter().map(|d| scale_of(scales, *d)).collect();
        let hint = {
            let attrs = model.stage(id)?.attrs();
            if attrs.has(AttrKey::ScaleFactor) {
                attrs.get_float(AttrKey::ScaleFactor)?
            } else {
                1.0
            }
        };
        let (step, input_scales) = if hint != 1.0 && actual.iter().all(|&s| s == 1.0) {
            (ScalePropagationStep::ScaleInput, vec![hint; actual.len()])
        } else {
            (ScalePropagationStep::Propagate, actual)
        };

        let mut info = StageDataInfo::new();
        ops.propagate_scale_factors(
            &mut StageCtxMut::new(model, id)?,
            &input_scales,
            step,
            &mut info,
        )?;
        if step == ScalePropagationStep::ScaleInput {
            tracing::debug!(stage = %model.stage(id)?.name, hint, "scaled stage input");
            changed = true;
        }

        //
        // Fold scales into constants and record output scales
        //

        let edges = model.stage(id)?.inputs().to_vec();
        for (port, edge) in edges.into_iter().enumerate() {
            let data = input_ids[port];
            if model.data(data)?.usage() != DataUsage::Const {
                continue;
            }
            match info.input(edge) {
                Some(&scale) if scale != 1.0 => {
                    let scaled = model.scaled_const_data(data, scale)?;
                    model.replace_input(edge, scaled)?;
                    changed = true;
                }
                _ => {}
            }
        }

        let outputs = model.stage(id)?.outputs().to_vec();
        for edge in outputs {
            let data = model.edge(edge)?.data;
            let scale = info.output(edge).copied().unwrap_or(1.0);
            scales.insert(data, scale);
        }
        Ok(changed)
    }

    fn input_ids(model: &Model, id: StageId) -> Result<Vec<DataId>> {
        (0..model.stage(id)?.inputs().len())
            .map(|port| model.input_data(id, port))
            .collect()
    }

    /// Restore unit scale on every scaled network output.
    fn descale_outputs(model: &mut Model, scales: &Scales) -> Result<bool> {
        let mut changed = false;
        for output in model.outputs() {
            let scale = scale_of(scales, output);
            if scale == 1.0 {
                continue;
            }
            let Some(producer_edge) = model.data(output)?.producer_edge() else {
                continue;
            };

            let scaled = derived_data(model, output, "@scaled")?;
            model.replace_output(producer_edge, scaled)?;
            // Later stages already expect the scaled values.
            for edge in model.data(output)?.consumer_edges().to_vec() {
                model.replace_input(edge, scaled)?;
            }

            let name = format!("{}@descale", model.data(output)?.name);
            let stage = model.add_stage(name, StageType::Power, &[scaled], &[output])?;
            set_power_attrs(model, stage, 1.0 / scale)?;
            tracing::debug!(output = %model.data(output)?.name, scale, "descaled network output");
            changed = true;
        }
        Ok(changed)
    }
}

impl Pass for ScalePropagationPass {
    fn name(&self) -> &str {
        "scale_propagation"
    }

    fn phase(&self) -> PassPhase {
        PassPhase::Scale
    }

    fn run(&self, model: &mut Model, config: &CompilationConfig) -> Result<bool> {
        if !config.hw_optimization {
            return Ok(false);
        }

        let mut scales = Scales::new();
        let mut changed = false;
        for id in model.topological_order()? {
            changed |= Self::process_stage(model, id, &mut scales)?;
        }
        changed |= Self::descale_outputs(model, &scales)?;
        Ok(changed)
    }
}

//! Dimension order propagation.
//!
//! In topological order every stage reports the order it needs on each edge.
//! A producer's output requirement fixes the order of the data it writes;
//! a consumer that needs another order reads a `Permute`d copy. Network
//! inputs and outputs keep their external order, constants are reordered in
//! place (or duplicated when shared).

use super::derived_data;
use std::collections::HashMap;
use vpuc_core::{
    CompilationConfig, DataId, DataUsage, Model, Pass, PassPhase, Result, StageCtx,
    StageDataInfo, StageId, StageType,
};
use vpuc_stages::capabilities;

/// Resolves the dimension order of every data node.
pub struct DataOrderPass;

/// Permuted copies already created, keyed by source data and order code.
type Permuted = HashMap<(DataId, u32), DataId>;

/// Add `Permute(from -> to)`.
fn add_permute(model: &mut Model, from: DataId, to: DataId) -> Result<StageId> {
    let name = format!("{}@permute", model.data(to)?.name);
    model.add_stage(name, StageType::Permute, &[from], &[to])
}

impl DataOrderPass {
    fn process_stage(model: &mut Model, id: StageId, permuted: &mut Permuted) -> Result<bool> {
        let mut info = StageDataInfo::new();
        {
            let ctx = StageCtx::new(model, id)?;
            capabilities(ctx.stage_type()).propagate_data_order(&ctx, &mut info)?;
        }
        let mut changed = false;

        let inputs = model.stage(id)?.inputs().to_vec();
        for edge in inputs {
            let Some(&order) = info.input(edge) else {
                continue;
            };
            let data = model.edge(edge)?.data;
            let node = model.data(data)?;
            if node.desc.order() == order {
                continue;
            }

            match node.usage() {
                DataUsage::Fake => {}
                DataUsage::Const if node.consumer_edges().len() == 1 => {
                    model.data_mut(data)?.desc.set_order(order)?;
                    changed = true;
                }
                DataUsage::Const => {
                    let desc = node.desc.with_order(order)?;
                    let copy = model.duplicate_data(data, &format!("@{}", order), desc)?;
                    model.replace_input(edge, copy)?;
                    changed = true;
                }
                _ => {
                    let target = match permuted.get(&(data, order.code())) {
                        Some(&existing) => existing,
                        None => {
                            let target = derived_data(model, data, &format!("@{}", order))?;
                            model.data_mut(target)?.desc.set_order(order)?;
                            add_permute(model, data, target)?;
                            permuted.insert((data, order.code()), target);
                            tracing::trace!(data = %model.data(data)?.name, %order, "inserted permute");
                            target
                        }
                    };
                    model.replace_input(edge, target)?;
                    changed = true;
                }
            }
        }

        let outputs = model.stage(id)?.outputs().to_vec();
        for edge in outputs {
            let Some(&order) = info.output(edge) else {
                continue;
            };
            let data = model.edge(edge)?.data;
            let node = model.data(data)?;
            if node.desc.order() == order {
                continue;
            }

            if node.usage() == DataUsage::Output {
                // The stage writes its own order; the network sees the external one.
                let staged = derived_data(model, data, &format!("@{}", order))?;
                model.data_mut(staged)?.desc.set_order(order)?;
                model.replace_output(edge, staged)?;
                add_permute(model, staged, data)?;
                tracing::trace!(data = %model.data(data)?.name, %order, "permuted network output");
            } else {
                model.data_mut(data)?.desc.set_order(order)?;
            }
            changed = true;
        }
        Ok(changed)
    }
}

impl Pass for DataOrderPass {
    fn name(&self) -> &str {
        "data_order"
    }

    fn phase(&self) -> PassPhase {
        PassPhase::Layout
    }

    fn run(&self, model: &mut Model, _config: &CompilationConfig) -> Result<bool> {
        let mut permuted = Permuted::new();
        let mut changed = false;
        for id in model.topological_order()? {
            changed |= Self::process_stage(model, id, &mut permuted)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpuc_core::{AttrKey, DataDesc, DataType, DimsOrder};

    /// `in -> conv -> out`, software convolution (interleaved layout).
    fn conv_model() -> Model {
        let mut model = Model::new("net");
        let act = DataDesc::new(DataType::F16, vec![1, 2, 4, 4]).unwrap();
        let input = model.add_data("in", act.clone(), DataUsage::Input).unwrap();
        let output = model.add_data("out", act, DataUsage::Output).unwrap();
        let weights = model
            .add_const_data(
                "w",
                DataDesc::new(DataType::F16, vec![2, 2, 1, 1]).unwrap(),
                vec![1.0, 0.0, 0.0, 1.0],
            )
            .unwrap();
        let biases = model.add_fake_data().unwrap();
        let id = model
            .add_stage(
                "conv",
                StageType::Convolution,
                &[input, weights, biases],
                &[output],
            )
            .unwrap();
        let attrs = model.stage_mut(id).unwrap().attrs_mut();
        for key in [
            AttrKey::KernelSizeX,
            AttrKey::KernelSizeY,
            AttrKey::KernelStrideX,
            AttrKey::KernelStrideY,
        ] {
            attrs.set(key, 1).unwrap();
        }
        model
    }

    #[test]
    fn test_software_conv_gets_permuted_network_edges() {
        let mut model = conv_model();
        assert!(DataOrderPass
            .run(&mut model, &CompilationConfig::default())
            .unwrap());

        let conv = model.find_stage_by_name("conv").unwrap();
        let conv_in = model.input_data(conv, 0).unwrap();
        let conv_out = model.output_data(conv, 0).unwrap();
        assert_eq!(model.data(conv_in).unwrap().desc.order(), DimsOrder::NHWC);
        assert_eq!(model.data(conv_out).unwrap().desc.order(), DimsOrder::NHWC);

        // External orders are untouched.
        let input = model.data_by_name("in").unwrap();
        let output = model.data_by_name("out").unwrap();
        assert_eq!(model.data(input).unwrap().desc.order(), DimsOrder::NCHW);
        assert_eq!(model.data(output).unwrap().desc.order(), DimsOrder::NCHW);

        let restore = model.producer(output).unwrap().unwrap();
        assert_eq!(model.stage(restore).unwrap().stage_type(), StageType::Permute);
        assert_eq!(model.input_data(restore, 0).unwrap(), conv_out);
        assert_eq!(model.stage_count(), 3);
    }

    #[test]
    fn test_second_run_is_stable() {
        let mut model = conv_model();
        let config = CompilationConfig::default();
        DataOrderPass.run(&mut model, &config).unwrap();
        assert!(!DataOrderPass.run(&mut model, &config).unwrap());
    }
}

//! Batch splitting.
//!
//! Stages that mark their main input and output `BatchSupport::Split` run
//! once per batch item: the batched input is split along `N`, every item
//! goes through a clone of the stage (weights and biases are shared) and the
//! per-item results are concatenated back into the original output.

use vpuc_core::{
    AttrKey, BatchSupport, CompilationConfig, DataId, DataUsage, Dim, Model, Pass, PassPhase,
    Result, StageCtx, StageDataInfo, StageId, StageType,
};
use vpuc_stages::capabilities;

/// Splits batched stages that cannot process a batch in one invocation.
pub struct AdjustBatchPass;

impl AdjustBatchPass {
    /// Batch size of a stage that must be split, or `None` to keep it.
    fn split_batch(model: &Model, id: StageId) -> Result<Option<usize>> {
        let ctx = StageCtx::new(model, id)?;
        if ctx.input_count() == 0 || ctx.output_count() == 0 {
            return Ok(None);
        }
        let mut info = StageDataInfo::new();
        capabilities(ctx.stage_type()).get_batch_support_info(&ctx, &mut info)?;

        let split = info.input(ctx.input_edge(0)?) == Some(&BatchSupport::Split)
            && info.output(ctx.output_edge(0)?) == Some(&BatchSupport::Split);
        if !split {
            return Ok(None);
        }

        let batch = ctx.input(0)?.desc.dim(Dim::N).unwrap_or(1);
        let output_batch = ctx.output(0)?.desc.dim(Dim::N).unwrap_or(1);
        if batch != output_batch {
            return Err(vpuc_core::Error::Shape(format!(
                "Stage '{}' maps batch {} to {}",
                ctx.name(),
                batch,
                output_batch
            )));
        }
        Ok((batch > 1).then_some(batch))
    }

    fn split_stage(model: &mut Model, id: StageId, batch: usize) -> Result<()> {
        let stage = model.stage(id)?;
        let stage_type = stage.stage_type();
        let template = capabilities(stage_type).clone_stage(stage);
        let name = stage.name.clone();

        let input = model.input_data(id, 0)?;
        let output = model.output_data(id, 0)?;
        let extra_inputs: Vec<DataId> = (1..stage.inputs().len())
            .map(|port| model.input_data(id, port))
            .collect::<Result<_>>()?;

        model.remove_stage(id)?;

        let item_inputs = Self::batch_items(model, input, batch)?;
        let item_outputs = Self::batch_items(model, output, batch)?;

        let split = model.add_stage(
            format!("{}@split-batch", name),
            StageType::Split,
            &[input],
            &item_inputs,
        )?;
        model
            .stage_mut(split)?
            .attrs_mut()
            .set(AttrKey::Axis, Dim::N as i32)?;

        for (index, (&item_input, &item_output)) in
            item_inputs.iter().zip(&item_outputs).enumerate()
        {
            let mut clone = template.clone();
            clone.name = format!("{}@batch={}", name, index);
            let mut inputs = vec![item_input];
            inputs.extend(&extra_inputs);
            model.add_stage_from(clone, &inputs, &[item_output])?;
        }

        let concat = model.add_stage(
            format!("{}@concat-batch", name),
            StageType::Concat,
            &item_outputs,
            &[output],
        )?;
        model
            .stage_mut(concat)?
            .attrs_mut()
            .set(AttrKey::Axis, Dim::N as i32)?;

        tracing::debug!(stage = %name, ty = %stage_type, batch, "split batch");
        Ok(())
    }

    /// One `N = 1` intermediate per batch item of `data`.
    fn batch_items(model: &mut Model, data: DataId, batch: usize) -> Result<Vec<DataId>> {
        let source = model.data(data)?;
        let name = source.name.clone();
        let mut desc = source.desc.clone();
        desc.set_dim(Dim::N, 1)?;
        (0..batch)
            .map(|index| {
                model.add_data(
                    format!("{}@batch={}", name, index),
                    desc.clone(),
                    DataUsage::Intermediate,
                )
            })
            .collect()
    }
}

impl Pass for AdjustBatchPass {
    fn name(&self) -> &str {
        "adjust_batch"
    }

    fn phase(&self) -> PassPhase {
        PassPhase::Batch
    }

    fn run(&self, model: &mut Model, _config: &CompilationConfig) -> Result<bool> {
        let mut changed = false;
        for id in model.topological_order()? {
            if let Some(batch) = Self::split_batch(model, id)? {
                Self::split_stage(model, id, batch)?;
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpuc_core::{DataDesc, DataType};

    fn conv_model(batch: usize) -> Model {
        let mut model = Model::new("net");
        let act = |n| DataDesc::new(DataType::F16, vec![n, 2, 4, 4]).unwrap();
        let input = model.add_data("in", act(batch), DataUsage::Input).unwrap();
        let output = model.add_data("out", act(batch), DataUsage::Output).unwrap();
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
                StageType::StubConv,
                &[input, weights, biases],
                &[output],
            )
            .unwrap();
        model
            .stage_mut(id)
            .unwrap()
            .attrs_mut()
            .set(AttrKey::TryHw, true)
            .unwrap();
        model
    }

    #[test]
    fn test_batch_of_one_is_kept() {
        let mut model = conv_model(1);
        let changed = AdjustBatchPass
            .run(&mut model, &CompilationConfig::default())
            .unwrap();
        assert!(!changed);
        assert_eq!(model.stage_count(), 1);
    }

    #[test]
    fn test_batch_is_split_into_clones() {
        let mut model = conv_model(3);
        let changed = AdjustBatchPass
            .run(&mut model, &CompilationConfig::default())
            .unwrap();
        assert!(changed);
        // split + 3 clones + concat
        assert_eq!(model.stage_count(), 5);

        let weights = model.data_by_name("w").unwrap();
        assert_eq!(model.consumers(weights).unwrap().len(), 3);

        for index in 0..3 {
            let clone = model
                .find_stage_by_name(&format!("conv@batch={}", index))
                .unwrap();
            let stage = model.stage(clone).unwrap();
            assert_eq!(stage.stage_type(), StageType::StubConv);
            assert!(stage.attrs().get_bool(AttrKey::TryHw).unwrap());
            let item = model.input_data(clone, 0).unwrap();
            assert_eq!(model.data(item).unwrap().desc.dims(), &[1, 2, 4, 4]);
        }

        let output = model.data_by_name("out").unwrap();
        let concat = model.producer(output).unwrap().unwrap();
        assert_eq!(model.stage(concat).unwrap().stage_type(), StageType::Concat);

        let order = model.topological_order().unwrap();
        let split = model.find_stage_by_name("conv@split-batch").unwrap();
        assert_eq!(order.first(), Some(&split));
        assert_eq!(order.last(), Some(&concat));
    }
}

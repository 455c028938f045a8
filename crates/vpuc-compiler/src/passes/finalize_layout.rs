//! Final data layout.

use vpuc_core::{CompilationConfig, DataId, Model, Pass, PassPhase, Result, StageCtxMut};
use vpuc_stages::capabilities;

/// Lets every stage fix its remaining layout decisions, then computes the
/// byte strides of every data node from its order and stride requirement.
pub struct FinalizeLayoutPass;

impl Pass for FinalizeLayoutPass {
    fn name(&self) -> &str {
        "finalize_layout"
    }

    fn phase(&self) -> PassPhase {
        PassPhase::Layout
    }

    fn run(&self, model: &mut Model, _config: &CompilationConfig) -> Result<bool> {
        for id in model.topological_order()? {
            let stage_type = model.stage(id)?.stage_type();
            let mut ctx = StageCtxMut::new(model, id)?;
            capabilities(stage_type).finalize_data_layout(&mut ctx)?;
        }

        let datas: Vec<DataId> = model.datas().map(|(id, _)| id).collect();
        for id in datas {
            let node = model.data_mut(id)?;
            let strides = node.desc.compute_strides(&node.strides_req);
            tracing::trace!(data = %node.name, order = %node.desc.order(), ?strides, "final strides");
            node.strides = Some(strides);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpuc_core::{DataDesc, DataType, DataUsage, DimStride, StridesRequirement};

    #[test]
    fn test_strides_follow_requirement() {
        let mut model = Model::new("net");
        let desc = DataDesc::new(DataType::F16, vec![1, 2, 3, 3]).unwrap();
        let compact = model.add_data("a", desc.clone(), DataUsage::Input).unwrap();
        let aligned = model
            .add_data("b", desc, DataUsage::Intermediate)
            .unwrap();
        model.data_mut(aligned).unwrap().strides_req =
            StridesRequirement::compact().add(1, DimStride::Aligned);

        FinalizeLayoutPass
            .run(&mut model, &CompilationConfig::default())
            .unwrap();

        // NCHW memory order is W, H, C, N.
        assert_eq!(
            model.data(compact).unwrap().strides.as_deref(),
            Some(&[2, 6, 18, 36][..])
        );
        assert_eq!(
            model.data(aligned).unwrap().strides.as_deref(),
            Some(&[2, 16, 48, 96][..])
        );
    }
}

//! Stride requirement resolution.
//!
//! Every stage reports a `StridesRequirement` per edge. The requirements on
//! one data node (its producer's, every consumer's, and compactness for
//! network inputs, outputs and constants) are merged into
//! `DataNode::strides_req`. A consumer whose requirement conflicts reads a
//! `Copy` with its own strides; a network output whose producer needs
//! non-compact strides is written through a `Copy` as well.

use super::derived_data;
use std::collections::HashMap;
use vpuc_core::{
    CompilationConfig, DataId, DataUsage, EdgeId, Model, Pass, PassPhase, Result, StageCtx,
    StageDataInfo, StageType, StridesRequirement,
};
use vpuc_stages::capabilities;

/// Merges stride requirements and inserts copies on conflicts.
pub struct StridesPass;

/// Requirement reported for every edge.
type EdgeRequirements = HashMap<EdgeId, StridesRequirement>;

impl StridesPass {
    fn collect(model: &Model) -> Result<EdgeRequirements> {
        let mut reqs = EdgeRequirements::new();
        for id in model.topological_order()? {
            let ctx = StageCtx::new(model, id)?;
            let mut info = StageDataInfo::new();
            capabilities(ctx.stage_type()).get_data_strides_requirements(&ctx, &mut info)?;
            for port in 0..ctx.input_count() {
                let edge = ctx.input_edge(port)?;
                if let Some(req) = info.input(edge) {
                    reqs.insert(edge, *req);
                }
            }
            for port in 0..ctx.output_count() {
                let edge = ctx.output_edge(port)?;
                if let Some(req) = info.output(edge) {
                    reqs.insert(edge, *req);
                }
            }
        }
        Ok(reqs)
    }

    /// Add `Copy(from -> to)`.
    fn add_copy(model: &mut Model, from: DataId, to: DataId) -> Result<()> {
        let name = format!("{}@copy", model.data(to)?.name);
        model.add_stage(name, StageType::Copy, &[from], &[to])?;
        Ok(())
    }

    fn resolve(model: &mut Model, data: DataId, reqs: &EdgeRequirements) -> Result<bool> {
        let node = model.data(data)?;
        let usage = node.usage();
        if usage == DataUsage::Fake {
            return Ok(false);
        }
        let producer_req = node
            .producer_edge()
            .and_then(|edge| reqs.get(&edge).map(|req| (edge, *req)));
        let consumers = node.consumer_edges().to_vec();
        let mut changed = false;

        let external = matches!(
            usage,
            DataUsage::Input | DataUsage::Output | DataUsage::Const
        );
        let mut current = if external {
            StridesRequirement::compact()
        } else {
            StridesRequirement::empty()
        };

        if let Some((edge, req)) = producer_req {
            match current.merge(&req) {
                Some(merged) => current = merged,
                None => {
                    // Only network outputs have both a producer and a fixed layout.
                    let staged = derived_data(model, data, "@strided")?;
                    model.replace_output(edge, staged)?;
                    model.data_mut(staged)?.strides_req = req;
                    Self::add_copy(model, staged, data)?;
                    tracing::trace!(data = %model.data(data)?.name, "copied producer output");
                    changed = true;
                }
            }
        }

        for (index, edge) in consumers.into_iter().enumerate() {
            let Some(req) = reqs.get(&edge) else {
                continue;
            };
            match current.merge(req) {
                Some(merged) => current = merged,
                None => {
                    let copy = derived_data(model, data, &format!("@strides={}", index))?;
                    model.data_mut(copy)?.strides_req = *req;
                    Self::add_copy(model, data, copy)?;
                    model.replace_input(edge, copy)?;
                    tracing::trace!(data = %model.data(data)?.name, index, "copied for consumer");
                    changed = true;
                }
            }
        }

        model.data_mut(data)?.strides_req = current;
        Ok(changed)
    }
}

impl Pass for StridesPass {
    fn name(&self) -> &str {
        "strides"
    }

    fn phase(&self) -> PassPhase {
        PassPhase::Layout
    }

    fn run(&self, model: &mut Model, _config: &CompilationConfig) -> Result<bool> {
        let reqs = Self::collect(model)?;
        // Copies created below carry their requirement already.
        let datas: Vec<DataId> = model.datas().map(|(id, _)| id).collect();
        let mut changed = false;
        for data in datas {
            changed |= Self::resolve(model, data, &reqs)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpuc_core::{AttrKey, DataDesc, DataType, DimStride, DimsOrder, HwOpKind};

    /// `in -> hw pool -> out`, planar layout.
    fn hw_pool_model() -> Model {
        let mut model = Model::new("net");
        let act = DataDesc::new(DataType::F16, vec![1, 2, 3, 3]).unwrap();
        let input = model.add_data("in", act.clone(), DataUsage::Input).unwrap();
        let output = model.add_data("out", act, DataUsage::Output).unwrap();
        let id = model
            .add_stage("pool", StageType::MyriadXHwOp, &[input], &[output])
            .unwrap();
        model
            .stage_mut(id)
            .unwrap()
            .attrs_mut()
            .set(AttrKey::HwOpKind, HwOpKind::MaxPool.code())
            .unwrap();
        model
    }

    #[test]
    fn test_hardware_rows_force_copies_at_network_edges() {
        let mut model = hw_pool_model();
        assert!(StridesPass
            .run(&mut model, &CompilationConfig::default())
            .unwrap());
        assert_eq!(model.stage_count(), 3);

        let pool = model.find_stage_by_name("pool").unwrap();
        let pool_in = model.input_data(pool, 0).unwrap();
        let pool_out = model.output_data(pool, 0).unwrap();
        for data in [pool_in, pool_out] {
            let node = model.data(data).unwrap();
            assert_eq!(node.usage(), DataUsage::Intermediate);
            assert_eq!(node.strides_req.get(1), DimStride::Aligned);
        }

        let input = model.data_by_name("in").unwrap();
        let node = model.data(input).unwrap();
        assert_eq!(node.strides_req, StridesRequirement::compact());
        assert_eq!(node.desc.order(), DimsOrder::NCHW);

        let output = model.data_by_name("out").unwrap();
        let copy = model.producer(output).unwrap().unwrap();
        assert_eq!(model.stage(copy).unwrap().stage_type(), StageType::Copy);
    }
}

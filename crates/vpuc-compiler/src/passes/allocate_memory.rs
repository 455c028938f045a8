//! Memory allocation.

use std::collections::HashMap;
use vpuc_core::{
    CompilationConfig, DataLocation, DataUsage, MemoryArea, Model, Pass, PassPhase, Result,
};

/// Alignment of every allocated offset, in bytes.
pub const DATA_ALIGNMENT: usize = 64;

/// Assigns every live data node a location in the memory area its usage
/// implies, at a 64-byte-aligned offset.
///
/// Data no stage touches (e.g. weights replaced by reshaped duplicates) is
/// left unallocated unless it is a network input or output.
pub struct AllocateMemoryPass;

fn area(usage: DataUsage) -> Option<MemoryArea> {
    match usage {
        DataUsage::Input => Some(MemoryArea::Input),
        DataUsage::Output => Some(MemoryArea::Output),
        DataUsage::Const => Some(MemoryArea::Blob),
        DataUsage::Intermediate => Some(MemoryArea::Bss),
        DataUsage::Fake => None,
    }
}

impl Pass for AllocateMemoryPass {
    fn name(&self) -> &str {
        "allocate_memory"
    }

    fn phase(&self) -> PassPhase {
        PassPhase::Allocation
    }

    fn run(&self, model: &mut Model, _config: &CompilationConfig) -> Result<bool> {
        let mut used: HashMap<MemoryArea, usize> = HashMap::new();
        let mut plan = Vec::new();

        for (id, node) in model.datas() {
            let Some(area) = area(node.usage()) else {
                continue;
            };
            let external = matches!(node.usage(), DataUsage::Input | DataUsage::Output);
            if !external && node.producer_edge().is_none() && node.consumer_edges().is_empty() {
                continue;
            }
            let strides = node.strides.as_ref().ok_or_else(|| {
                vpuc_core::Error::Compilation(format!(
                    "Data '{}' has no final strides",
                    node.name
                ))
            })?;

            let size = node.desc.byte_size(strides);
            let offset = used.entry(area).or_insert(0);
            let location = DataLocation {
                area,
                offset: *offset,
            };
            *offset += size.div_ceil(DATA_ALIGNMENT) * DATA_ALIGNMENT;
            plan.push((id, location));
        }

        for (id, location) in &plan {
            let node = model.data_mut(*id)?;
            tracing::trace!(data = %node.name, ?location, "allocated");
            node.location = Some(*location);
        }
        tracing::debug!(?used, "memory allocated");
        Ok(!plan.is_empty())
    }
}

//! Compiler passes, in pipeline order.

mod adjust_batch;
mod allocate_memory;
mod checks;
mod data_order;
mod finalize_layout;
mod replace_stubs;
mod scale_propagation;
mod strides;

pub use adjust_batch::AdjustBatchPass;
pub use allocate_memory::{AllocateMemoryPass, DATA_ALIGNMENT};
pub use checks::{FinalCheckPass, InitialCheckPass};
pub use data_order::DataOrderPass;
pub use finalize_layout::FinalizeLayoutPass;
pub use replace_stubs::ReplaceStubsPass;
pub use scale_propagation::ScalePropagationPass;
pub use strides::StridesPass;

use vpuc_core::{DataId, DataUsage, Model, Result};

/// New intermediate data shaped like `like`, named `{like}{postfix}`.
fn derived_data(model: &mut Model, like: DataId, postfix: &str) -> Result<DataId> {
    let source = model.data(like)?;
    let name = format!("{}{}", source.name, postfix);
    let desc = source.desc.clone();
    model.add_data(name, desc, DataUsage::Intermediate)
}

//! Concrete stage implementations.

mod concat;
mod conv;
mod copy;
mod fully_connected;
mod hw;
mod permute;
mod pooling;
mod power;
mod split;

pub use concat::ConcatStage;
pub use conv::ConvStage;
pub use copy::CopyStage;
pub use fully_connected::FullyConnectedStage;
pub use hw::{hw_op_kind, HwOpStage, MAX_HW_KERNEL, MAX_HW_STRIDE};
pub use permute::PermuteStage;
pub use pooling::PoolStage;
pub use power::PowerStage;
pub use split::SplitStage;

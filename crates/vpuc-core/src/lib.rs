//! Core intermediate representation and capability contracts for vpuc.
//!
//! This crate provides the foundational abstractions the other vpuc crates
//! depend on:
//! - Arena-backed stage graph (`Model`, `DataNode`, `StageNode`, `Edge`)
//! - Strongly typed stage attribute store (`Attributes`, `AttrKey`)
//! - Per-edge analysis results (`StageDataInfo`)
//! - The stage capability trait (`StageOps`) and the pass trait (`Pass`)
//! - Blob serialization primitives (`BlobSerializer`, `BlobHeader`)
//! - The immutable compilation configuration (`CompilationConfig`)

pub mod attrs;
pub mod config;
pub mod context;
pub mod model;
pub mod pass;
pub mod serializer;
pub mod stage;
pub mod types;

pub use attrs::{AttrKey, AttrKind, AttrValue, Attributes};
pub use config::CompilationConfig;
pub use context::{StageCtx, StageCtxMut};
pub use model::{DataId, DataNode, Edge, EdgeId, EdgeKind, Model, StageId, StageNode, StageTemplate};
pub use pass::{Pass, PassPhase};
pub use serializer::{encode_tensor, BlobHeader, BlobReader, BlobSerializer};
pub use stage::{
    BatchSupport, HwOpKind, ScalePropagationStep, StageDataInfo, StageOps, StageType,
};
pub use types::{
    DataDesc, DataLocation, DataType, DataUsage, Dim, DimStride, DimsOrder, MemoryArea,
    StridesRequirement,
};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for malformed input and inconsistent graphs.
///
/// Invariant violations (for example invoking a lowering capability on a stub
/// stage) are not represented here; they panic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Compilation error: {0}")]
    Compilation(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Type mismatch in stage '{stage}': {message}")]
    TypeMismatch { stage: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

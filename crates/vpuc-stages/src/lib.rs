//! Stage implementations for the vpuc compiler.
//!
//! # Stage kinds
//!
//! - **Stubs**: placeholders for conv, fully-connected, deconv and pooling
//!   operations until hardware selection picks a concrete kind
//! - **Software**: Convolution, Deconvolution, FullyConnected, MaxPool, AvgPool
//! - **Hardware**: MyriadXHwOp (conv, pooling and fully-connected families)
//! - **Utility**: Power, Permute, Copy, Split, Concat
//!
//! Passes look up the implementation of a stage through [`capabilities`].

pub mod helpers;
pub mod stages;
pub mod stub;

mod registry;

pub use registry::capabilities;
pub use stub::StubStage;

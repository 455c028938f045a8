//! Network-to-blob compiler for the vpuc accelerator.
//!
//! This crate turns a [`Network`] description into a device blob. Compilation
//! runs in phases:
//! 1. **Frontend** - Build the stage graph; hardware-eligible operations
//!    become stub stages carrying a tryHW decision
//! 2. **Check** - Validate every freshly built stage
//! 3. **Batch** - Split batched weightable stages into per-item stages
//! 4. **Scale** - Fold quantization scales into weights (hardware builds only)
//! 5. **Lowering** - Replace every stub with a hardware or software stage
//! 6. **Layout** - Resolve dimension orders, strides and final layouts
//! 7. **Allocation** - Assign memory locations
//! 8. **Finalize** - Validate the lowered graph
//!
//! The blob writer then serializes the graph (see [`blob`]).
//!
//! # Example
//!
//! ```no_run
//! use vpuc_compiler::compile;
//! use vpuc_core::CompilationConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let network = vpuc_network::load_network("net.json")?;
//! let blob = compile(&network, &CompilationConfig::default())?;
//! println!("Compiled {} stages into {} bytes", blob.stage_count(), blob.len());
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod frontend;
pub mod passes;

pub use blob::{Blob, StageRecord};
pub use passes::{
    AdjustBatchPass, AllocateMemoryPass, DataOrderPass, FinalCheckPass, FinalizeLayoutPass,
    InitialCheckPass, ReplaceStubsPass, ScalePropagationPass, StridesPass,
};

use vpuc_core::{CompilationConfig, Model, Pass};
use vpuc_network::{Network, NetworkError};

/// Result type for compilation.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for compilation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Layer '{layer}': {message}")]
    Layer { layer: String, message: String },

    #[error(transparent)]
    Core(#[from] vpuc_core::Error),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Compiler pipeline with pluggable passes.
///
/// Passes run ordered by [`vpuc_core::PassPhase`]; within a phase they run
/// in registration order.
pub struct CompilerPipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl CompilerPipeline {
    /// Create a pipeline with the built-in passes.
    pub fn new() -> Self {
        let mut pipeline = Self { passes: Vec::new() };
        pipeline
            .add_pass(InitialCheckPass)
            .add_pass(AdjustBatchPass)
            .add_pass(ScalePropagationPass)
            .add_pass(ReplaceStubsPass)
            .add_pass(DataOrderPass)
            .add_pass(StridesPass)
            .add_pass(FinalizeLayoutPass)
            .add_pass(AllocateMemoryPass)
            .add_pass(FinalCheckPass);
        pipeline
    }

    /// Add a custom pass; it joins the phase reported by `pass.phase()`.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Run every pass over `model`.
    pub fn run(&mut self, model: &mut Model, config: &CompilationConfig) -> Result<()> {
        // Stable sort keeps registration order within a phase.
        self.passes.sort_by_key(|p| p.phase());

        for pass in &self.passes {
            let _span =
                tracing::debug_span!("pass", name = pass.name(), phase = ?pass.phase()).entered();
            let changed = pass.run(model, config)?;
            tracing::debug!(changed, stages = model.stage_count(), "pass done");
        }
        Ok(())
    }

    /// Build the stage graph for `network`, run the pipeline and serialize.
    #[tracing::instrument(skip_all, fields(network = %network.name, layers = network.layers.len()))]
    pub fn compile(&mut self, network: &Network, config: &CompilationConfig) -> Result<Blob> {
        let mut model = frontend::build_model(network, config)?;
        self.run(&mut model, config)?;
        let blob = blob::write_blob(&model)?;
        tracing::info!(
            stages = blob.stage_count(),
            bytes = blob.len(),
            "compilation complete"
        );
        Ok(blob)
    }
}

impl Default for CompilerPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile a network with the built-in pipeline.
pub fn compile(network: &Network, config: &CompilationConfig) -> Result<Blob> {
    CompilerPipeline::new().compile(network, config)
}

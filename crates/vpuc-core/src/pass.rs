//! Compiler pass trait and phase definitions.

use crate::config::CompilationConfig;
use crate::model::Model;
use crate::Result;

/// Compilation phase for ordering passes.
///
/// Passes are grouped into phases and run in a fixed order. Within each
/// phase, passes run in the order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PassPhase {
    /// Validate the freshly built graph.
    Check,

    /// Split batched stages that cannot process the batch in one invocation.
    ///
    /// Runs while stubs are still present; stubs report batch support.
    Batch,

    /// Fold quantization scales into weightable stages.
    Scale,

    /// Replace every stub with a concrete hardware or software stage.
    Lowering,

    /// Resolve dimension orders, stride constraints and final strides.
    Layout,

    /// Assign memory locations.
    Allocation,

    /// Validate the fully lowered graph before serialization.
    Finalize,
}

/// Trait for implementing compiler passes.
///
/// `run()` returns `Ok(true)` if the pass changed the graph and `Ok(false)`
/// otherwise.
///
/// # Example
///
/// ```ignore
/// struct NoOpPass;
///
/// impl Pass for NoOpPass {
///     fn name(&self) -> &str {
///         "noop"
///     }
///
///     fn phase(&self) -> PassPhase {
///         PassPhase::Check
///     }
///
///     fn run(&self, model: &mut Model, config: &CompilationConfig) -> Result<bool> {
///         Ok(false)
///     }
/// }
/// ```
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and debugging).
    fn name(&self) -> &str;

    /// Get the compilation phase this pass belongs to.
    fn phase(&self) -> PassPhase;

    /// Run the pass on the given model.
    fn run(&self, model: &mut Model, config: &CompilationConfig) -> Result<bool>;
}

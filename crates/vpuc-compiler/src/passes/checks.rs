//! Validation passes run before and after lowering.

use vpuc_core::{CompilationConfig, Model, Pass, PassPhase, Result, StageCtx};
use vpuc_stages::capabilities;

/// Runs every stage's initial check on the freshly built graph.
pub struct InitialCheckPass;

impl Pass for InitialCheckPass {
    fn name(&self) -> &str {
        "initial_check"
    }

    fn phase(&self) -> PassPhase {
        PassPhase::Check
    }

    fn run(&self, model: &mut Model, _config: &CompilationConfig) -> Result<bool> {
        // Also rejects cycles before any rewrite.
        for id in model.topological_order()? {
            let ctx = StageCtx::new(model, id)?;
            capabilities(ctx.stage_type()).initial_check(&ctx)?;
        }
        Ok(false)
    }
}

/// Runs every stage's final check once the graph is fully lowered.
///
/// A stub surviving until here is an invariant violation and panics.
pub struct FinalCheckPass;

impl Pass for FinalCheckPass {
    fn name(&self) -> &str {
        "final_check"
    }

    fn phase(&self) -> PassPhase {
        PassPhase::Finalize
    }

    fn run(&self, model: &mut Model, _config: &CompilationConfig) -> Result<bool> {
        for id in model.topological_order()? {
            let ctx = StageCtx::new(model, id)?;
            capabilities(ctx.stage_type()).final_check(&ctx)?;
        }
        Ok(false)
    }
}

//! Hardware stage selection.
//!
//! Every stub becomes a concrete stage: `MyriadXHwOp` when its tryHW
//! decision holds, the software implementation otherwise. Deconvolution has
//! no hardware implementation.

use vpuc_core::{
    AttrKey, CompilationConfig, HwOpKind, Model, Pass, PassPhase, Result, StageId, StageType,
};

/// Replaces every stub with a concrete hardware or software stage.
pub struct ReplaceStubsPass;

/// Hardware kind and software fallback of a stub kind.
fn lowering(stub: StageType) -> (Option<HwOpKind>, StageType) {
    match stub {
        StageType::StubConv => (Some(HwOpKind::Conv), StageType::Convolution),
        StageType::StubFullyConnected => {
            (Some(HwOpKind::FullyConnected), StageType::FullyConnected)
        }
        StageType::StubDeconv => (None, StageType::Deconvolution),
        StageType::StubMaxPool => (Some(HwOpKind::MaxPool), StageType::MaxPool),
        StageType::StubAvgPool => (Some(HwOpKind::AvgPool), StageType::AvgPool),
        other => unreachable!("{} is not a stub stage", other),
    }
}

impl ReplaceStubsPass {
    fn replace(model: &mut Model, id: StageId, stub: StageType) -> Result<()> {
        let try_hw = {
            let attrs = model.stage(id)?.attrs();
            attrs.has(AttrKey::TryHw) && attrs.get_bool(AttrKey::TryHw)?
        };
        let (hw_kind, software) = lowering(stub);

        match hw_kind.filter(|_| try_hw) {
            Some(kind) => {
                let node = model.replace_stage(id, StageType::MyriadXHwOp)?;
                node.attrs_mut().set(AttrKey::HwOpKind, kind.code())?;
                tracing::debug!(stage = %node.name, ?kind, "lowered to hardware");
            }
            None => {
                let node = model.replace_stage(id, software)?;
                tracing::debug!(stage = %node.name, ty = %software, "lowered to software");
            }
        }
        Ok(())
    }
}

impl Pass for ReplaceStubsPass {
    fn name(&self) -> &str {
        "replace_stubs"
    }

    fn phase(&self) -> PassPhase {
        PassPhase::Lowering
    }

    fn run(&self, model: &mut Model, _config: &CompilationConfig) -> Result<bool> {
        let stubs: Vec<(StageId, StageType)> = model
            .stages()
            .map(|(id, s)| (id, s.stage_type()))
            .filter(|(_, ty)| ty.is_stub())
            .collect();
        for &(id, stub) in &stubs {
            Self::replace(model, id, stub)?;
        }
        Ok(!stubs.is_empty())
    }
}

//! Context types for stage capability methods.
//!
//! A context pairs the model with the stage being processed and gives
//! port-indexed access to the stage's edges and data nodes.

use crate::attrs::Attributes;
use crate::model::{DataId, DataNode, EdgeId, Model, StageId, StageNode};
use crate::stage::StageType;
use crate::{Error, Result};

/// Read-only view of one stage and the model it lives in.
pub struct StageCtx<'a> {
    /// The model containing the stage.
    pub model: &'a Model,

    /// Id of the stage being processed.
    pub id: StageId,

    /// The stage being processed.
    pub stage: &'a StageNode,
}

impl<'a> StageCtx<'a> {
    /// Create a context for a live stage.
    pub fn new(model: &'a Model, id: StageId) -> Result<Self> {
        let stage = model.stage(id)?;
        Ok(Self { model, id, stage })
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.stage.name
    }

    /// Stage kind.
    pub fn stage_type(&self) -> StageType {
        self.stage.stage_type()
    }

    /// Stage attributes.
    pub fn attrs(&self) -> &'a Attributes {
        self.stage.attrs()
    }

    /// Number of inputs.
    pub fn input_count(&self) -> usize {
        self.stage.inputs().len()
    }

    /// Number of outputs.
    pub fn output_count(&self) -> usize {
        self.stage.outputs().len()
    }

    /// Edge of the `index`-th input.
    pub fn input_edge(&self, index: usize) -> Result<EdgeId> {
        self.stage.inputs().get(index).copied().ok_or_else(|| {
            Error::InvalidGraph(format!("Stage '{}' has no input {}", self.name(), index))
        })
    }

    /// Edge of the `index`-th output.
    pub fn output_edge(&self, index: usize) -> Result<EdgeId> {
        self.stage.outputs().get(index).copied().ok_or_else(|| {
            Error::InvalidGraph(format!("Stage '{}' has no output {}", self.name(), index))
        })
    }

    /// Id of the `index`-th input data node.
    pub fn input_id(&self, index: usize) -> Result<DataId> {
        Ok(self.model.edge(self.input_edge(index)?)?.data)
    }

    /// Id of the `index`-th output data node.
    pub fn output_id(&self, index: usize) -> Result<DataId> {
        Ok(self.model.edge(self.output_edge(index)?)?.data)
    }

    /// The `index`-th input data node.
    pub fn input(&self, index: usize) -> Result<&'a DataNode> {
        self.model.data(self.input_id(index)?)
    }

    /// The `index`-th output data node.
    pub fn output(&self, index: usize) -> Result<&'a DataNode> {
        self.model.data(self.output_id(index)?)
    }

    /// All input data nodes in port order.
    pub fn inputs(&self) -> Result<Vec<&'a DataNode>> {
        (0..self.input_count()).map(|i| self.input(i)).collect()
    }

    /// All output data nodes in port order.
    pub fn outputs(&self) -> Result<Vec<&'a DataNode>> {
        (0..self.output_count()).map(|i| self.output(i)).collect()
    }
}

/// Mutable view of one stage, for capabilities that rewrite parameters.
pub struct StageCtxMut<'a> {
    /// The model containing the stage.
    pub model: &'a mut Model,

    /// Id of the stage being processed.
    pub id: StageId,
}

impl<'a> StageCtxMut<'a> {
    /// Create a context for a live stage.
    pub fn new(model: &'a mut Model, id: StageId) -> Result<Self> {
        model.stage(id)?;
        Ok(Self { model, id })
    }

    /// Read-only view of the same stage.
    pub fn view(&self) -> Result<StageCtx<'_>> {
        StageCtx::new(&*self.model, self.id)
    }

    /// Stage kind.
    pub fn stage_type(&self) -> Result<StageType> {
        Ok(self.model.stage(self.id)?.stage_type())
    }

    /// Stage attributes.
    pub fn attrs(&self) -> Result<&Attributes> {
        Ok(self.model.stage(self.id)?.attrs())
    }

    /// Mutable stage attributes.
    pub fn attrs_mut(&mut self) -> Result<&mut Attributes> {
        Ok(self.model.stage_mut(self.id)?.attrs_mut())
    }

    /// Edge of the `index`-th input.
    pub fn input_edge(&self, index: usize) -> Result<EdgeId> {
        self.view()?.input_edge(index)
    }

    /// Edge of the `index`-th output.
    pub fn output_edge(&self, index: usize) -> Result<EdgeId> {
        self.view()?.output_edge(index)
    }

    /// Id of the `index`-th input data node.
    pub fn input_id(&self, index: usize) -> Result<DataId> {
        self.model.input_data(self.id, index)
    }

    /// Id of the `index`-th output data node.
    pub fn output_id(&self, index: usize) -> Result<DataId> {
        self.model.output_data(self.id, index)
    }

    /// Mutable access to any data node.
    pub fn data_mut(&mut self, id: DataId) -> Result<&mut DataNode> {
        self.model.data_mut(id)
    }
}

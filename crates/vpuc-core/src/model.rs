//! Arena-backed stage graph.
//!
//! The model is a bipartite graph where:
//! - **Data** nodes (`DataNode`) are tensors
//! - **Stage** nodes (`StageNode`) are computations
//! - **Edges** (`Edge`) link one data node and one stage, tagged input/output
//!
//! All three live in arenas owned by [`Model`] and reference each other by
//! index. Stages removed from the graph leave a hole in the arena so that
//! every other id stays valid.

use crate::attrs::Attributes;
use crate::stage::StageType;
use crate::types::{DataDesc, DataLocation, DataUsage, StridesRequirement};
use crate::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifier of a data node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataId(pub usize);

/// Identifier of a stage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub usize);

/// Identifier of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub usize);

impl DataId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl StageId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl EdgeId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

// ──────────────────────────────── Edge ───────────────────────────────────

/// Direction of an edge relative to its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Data → Stage.
    Input,
    /// Stage → Data.
    Output,
}

/// A link between one data node and one stage port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub kind: EdgeKind,
    pub data: DataId,
    pub stage: StageId,
    /// Position in the stage's input or output list.
    pub port: usize,
}

// ──────────────────────────────── DataNode ───────────────────────────────

/// A tensor in the stage graph.
#[derive(Debug, Clone)]
pub struct DataNode {
    pub name: String,
    pub desc: DataDesc,
    usage: DataUsage,
    /// Constant values in canonical order, shared between duplicates.
    content: Option<Arc<[f32]>>,
    producer: Option<EdgeId>,
    consumers: Vec<EdgeId>,
    /// Merged stride constraints (set by the stride pass).
    pub strides_req: StridesRequirement,
    /// Byte strides innermost first (set when the layout is finalized).
    pub strides: Option<Vec<usize>>,
    /// Runtime location (set by memory allocation).
    pub location: Option<DataLocation>,
}

impl DataNode {
    fn new(name: String, desc: DataDesc, usage: DataUsage) -> Self {
        Self {
            name,
            desc,
            usage,
            content: None,
            producer: None,
            consumers: Vec::new(),
            strides_req: StridesRequirement::empty(),
            strides: None,
            location: None,
        }
    }

    /// Usage category.
    pub fn usage(&self) -> DataUsage {
        self.usage
    }

    /// Constant values in canonical order, if this is a constant.
    pub fn content(&self) -> Option<&[f32]> {
        self.content.as_deref()
    }

    /// Edge from the producing stage, if any.
    pub fn producer_edge(&self) -> Option<EdgeId> {
        self.producer
    }

    /// Edges to consuming stages.
    pub fn consumer_edges(&self) -> &[EdgeId] {
        &self.consumers
    }
}

// ──────────────────────────────── StageNode ──────────────────────────────

/// A computation in the stage graph.
#[derive(Debug, Clone)]
pub struct StageNode {
    pub name: String,
    stage_type: StageType,
    inputs: Vec<EdgeId>,
    outputs: Vec<EdgeId>,
    attrs: Attributes,
    /// Name of the network layer the stage was created from.
    pub origin: Option<String>,
}

impl StageNode {
    /// Stage kind.
    pub fn stage_type(&self) -> StageType {
        self.stage_type
    }

    /// Input edges in port order.
    pub fn inputs(&self) -> &[EdgeId] {
        &self.inputs
    }

    /// Output edges in port order.
    pub fn outputs(&self) -> &[EdgeId] {
        &self.outputs
    }

    /// Attribute map.
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Mutable attribute map.
    pub fn attrs_mut(&mut self) -> &mut Attributes {
        &mut self.attrs
    }

    /// Edge-less deep copy of this stage.
    pub fn template(&self) -> StageTemplate {
        StageTemplate {
            name: self.name.clone(),
            stage_type: self.stage_type,
            attrs: self.attrs.clone(),
            origin: self.origin.clone(),
        }
    }
}

/// Everything about a stage except its edges.
#[derive(Debug, Clone)]
pub struct StageTemplate {
    pub name: String,
    pub stage_type: StageType,
    pub attrs: Attributes,
    pub origin: Option<String>,
}

impl StageTemplate {
    /// Create a template with no attributes.
    pub fn new(name: impl Into<String>, stage_type: StageType) -> Self {
        Self {
            name: name.into(),
            stage_type,
            attrs: Attributes::new(),
            origin: None,
        }
    }
}

// ──────────────────────────────── Model ──────────────────────────────────

/// Owner of every data node, stage and edge of one compilation.
pub struct Model {
    name: String,
    datas: Vec<DataNode>,
    stages: Vec<Option<StageNode>>,
    edges: Vec<Edge>,
    data_by_name: HashMap<String, DataId>,
    fake_data: Option<DataId>,
}

impl Model {
    /// Create an empty model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datas: Vec::new(),
            stages: Vec::new(),
            edges: Vec::new(),
            data_by_name: HashMap::new(),
            fake_data: None,
        }
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Data ──

    /// Add a non-constant data node.
    pub fn add_data(
        &mut self,
        name: impl Into<String>,
        desc: DataDesc,
        usage: DataUsage,
    ) -> Result<DataId> {
        if matches!(usage, DataUsage::Const | DataUsage::Fake) {
            return Err(Error::InvalidGraph(format!(
                "{:?} data must be created with its dedicated constructor",
                usage
            )));
        }
        Ok(self.push_data(DataNode::new(name.into(), desc, usage)))
    }

    /// Add a constant data node holding `content` in canonical order.
    pub fn add_const_data(
        &mut self,
        name: impl Into<String>,
        desc: DataDesc,
        content: Vec<f32>,
    ) -> Result<DataId> {
        let name = name.into();
        if content.len() < desc.total_dim_size() {
            return Err(Error::Shape(format!(
                "Constant '{}' holds {} values but its descriptor needs {}",
                name,
                content.len(),
                desc.total_dim_size()
            )));
        }
        let mut node = DataNode::new(name, desc, DataUsage::Const);
        node.content = Some(content.into());
        Ok(self.push_data(node))
    }

    /// The placeholder for absent tensors, created on first use.
    pub fn add_fake_data(&mut self) -> Result<DataId> {
        if let Some(id) = self.fake_data {
            return Ok(id);
        }
        let desc = DataDesc::new(crate::types::DataType::F16, vec![1])?;
        let id = self.push_data(DataNode::new("<fake>".to_string(), desc, DataUsage::Fake));
        self.fake_data = Some(id);
        Ok(id)
    }

    /// Create a constant that shares `orig`'s content under a new descriptor.
    pub fn duplicate_data(&mut self, orig: DataId, postfix: &str, desc: DataDesc) -> Result<DataId> {
        let source = self.data(orig)?;
        if source.usage != DataUsage::Const {
            return Err(Error::InvalidGraph(format!(
                "Only constants can be duplicated, '{}' is {:?}",
                source.name, source.usage
            )));
        }
        let content = source.content.clone();
        let available = content.as_ref().map_or(0, |c| c.len());
        if available < desc.total_dim_size() {
            return Err(Error::Shape(format!(
                "Constant '{}' holds {} values, duplicate needs {}",
                source.name,
                available,
                desc.total_dim_size()
            )));
        }
        let mut node = DataNode::new(format!("{}{}", source.name, postfix), desc, DataUsage::Const);
        node.content = content;
        Ok(self.push_data(node))
    }

    /// Create a constant whose content is `orig`'s multiplied by `factor`.
    ///
    /// Scaling the same constant by the same factor twice returns the first
    /// copy.
    pub fn scaled_const_data(&mut self, orig: DataId, factor: f32) -> Result<DataId> {
        let source = self.data(orig)?;
        let content = source.content().ok_or_else(|| {
            Error::InvalidGraph(format!("Data '{}' is not a constant", source.name))
        })?;
        let name = format!("{}@scale={}", source.name, factor);
        if let Some(existing) = self.data_by_name(&name) {
            let node = self.data(existing)?;
            if node.usage() != DataUsage::Const || node.desc != source.desc {
                return Err(Error::InvalidGraph(format!(
                    "Data '{}' already exists with another layout",
                    name
                )));
            }
            return Ok(existing);
        }
        let scaled: Vec<f32> = content.iter().map(|v| v * factor).collect();
        let desc = source.desc.clone();
        self.add_const_data(name, desc, scaled)
    }

    fn push_data(&mut self, node: DataNode) -> DataId {
        let id = DataId(self.datas.len());
        self.data_by_name.insert(node.name.clone(), id);
        self.datas.push(node);
        id
    }

    /// Get a data node.
    pub fn data(&self, id: DataId) -> Result<&DataNode> {
        self.datas
            .get(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("Data {:?} not found", id)))
    }

    /// Get a mutable data node.
    pub fn data_mut(&mut self, id: DataId) -> Result<&mut DataNode> {
        self.datas
            .get_mut(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("Data {:?} not found", id)))
    }

    /// Look up a data node by name.
    pub fn data_by_name(&self, name: &str) -> Option<DataId> {
        self.data_by_name.get(name).copied()
    }

    /// Iterate over all data nodes.
    pub fn datas(&self) -> impl Iterator<Item = (DataId, &DataNode)> {
        self.datas.iter().enumerate().map(|(i, d)| (DataId(i), d))
    }

    /// Number of data nodes.
    pub fn data_count(&self) -> usize {
        self.datas.len()
    }

    /// Stage producing a data node, if any.
    pub fn producer(&self, id: DataId) -> Result<Option<StageId>> {
        Ok(self.data(id)?.producer.map(|e| self.edges[e.index()].stage))
    }

    /// Stages consuming a data node.
    pub fn consumers(&self, id: DataId) -> Result<Vec<StageId>> {
        Ok(self
            .data(id)?
            .consumers
            .iter()
            .map(|e| self.edges[e.index()].stage)
            .collect())
    }

    // ── Stages ──

    /// Add a stage wired to the given inputs and outputs.
    pub fn add_stage(
        &mut self,
        name: impl Into<String>,
        stage_type: StageType,
        inputs: &[DataId],
        outputs: &[DataId],
    ) -> Result<StageId> {
        self.add_stage_from(StageTemplate::new(name, stage_type), inputs, outputs)
    }

    /// Add a stage from a template (e.g. a clone) wired to new edges.
    pub fn add_stage_from(
        &mut self,
        template: StageTemplate,
        inputs: &[DataId],
        outputs: &[DataId],
    ) -> Result<StageId> {
        for &id in inputs.iter().chain(outputs) {
            self.data(id)?;
        }
        for &id in outputs {
            let data = self.data(id)?;
            if data.producer.is_some() {
                return Err(Error::InvalidGraph(format!(
                    "Data '{}' already has a producer",
                    data.name
                )));
            }
            if matches!(data.usage, DataUsage::Const | DataUsage::Fake | DataUsage::Input) {
                return Err(Error::InvalidGraph(format!(
                    "{:?} data '{}' cannot be a stage output",
                    data.usage, data.name
                )));
            }
        }

        let stage_id = StageId(self.stages.len());
        let mut node = StageNode {
            name: template.name,
            stage_type: template.stage_type,
            inputs: Vec::with_capacity(inputs.len()),
            outputs: Vec::with_capacity(outputs.len()),
            attrs: template.attrs,
            origin: template.origin,
        };

        for (port, &data) in inputs.iter().enumerate() {
            let edge = self.push_edge(Edge {
                kind: EdgeKind::Input,
                data,
                stage: stage_id,
                port,
            });
            self.datas[data.index()].consumers.push(edge);
            node.inputs.push(edge);
        }
        for (port, &data) in outputs.iter().enumerate() {
            let edge = self.push_edge(Edge {
                kind: EdgeKind::Output,
                data,
                stage: stage_id,
                port,
            });
            self.datas[data.index()].producer = Some(edge);
            node.outputs.push(edge);
        }

        tracing::trace!(stage = %node.name, ty = %node.stage_type, "add stage");
        self.stages.push(Some(node));
        Ok(stage_id)
    }

    fn push_edge(&mut self, edge: Edge) -> EdgeId {
        let id = EdgeId(self.edges.len());
        self.edges.push(edge);
        id
    }

    /// Replace a stage's kind in place, keeping its edges and attributes.
    pub fn replace_stage(&mut self, id: StageId, stage_type: StageType) -> Result<&mut StageNode> {
        let node = self.stage_mut(id)?;
        tracing::trace!(stage = %node.name, from = %node.stage_type, to = %stage_type, "replace stage");
        node.stage_type = stage_type;
        Ok(node)
    }

    /// Remove a stage and detach its edges from the data nodes.
    pub fn remove_stage(&mut self, id: StageId) -> Result<()> {
        let node = self
            .stages
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or_else(|| Error::InvalidGraph(format!("Stage {:?} not found", id)))?;

        for &edge in &node.inputs {
            let data = self.edges[edge.index()].data;
            self.datas[data.index()].consumers.retain(|e| *e != edge);
        }
        for &edge in &node.outputs {
            let data = self.edges[edge.index()].data;
            self.datas[data.index()].producer = None;
        }
        tracing::trace!(stage = %node.name, "remove stage");
        Ok(())
    }

    /// Get a stage.
    pub fn stage(&self, id: StageId) -> Result<&StageNode> {
        self.stages
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::InvalidGraph(format!("Stage {:?} not found", id)))
    }

    /// Get a mutable stage.
    pub fn stage_mut(&mut self, id: StageId) -> Result<&mut StageNode> {
        self.stages
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidGraph(format!("Stage {:?} not found", id)))
    }

    /// Iterate over live stages in creation order.
    pub fn stages(&self) -> impl Iterator<Item = (StageId, &StageNode)> {
        self.stages
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (StageId(i), s)))
    }

    /// Number of live stages.
    pub fn stage_count(&self) -> usize {
        self.stages.iter().filter(|s| s.is_some()).count()
    }

    /// Find a stage by name.
    pub fn find_stage_by_name(&self, name: &str) -> Result<StageId> {
        self.stages()
            .find(|(_, s)| s.name == name)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::InvalidGraph(format!("Stage '{}' not found", name)))
    }

    // ── Edges ──

    /// Get an edge.
    pub fn edge(&self, id: EdgeId) -> Result<&Edge> {
        self.edges
            .get(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("Edge {:?} not found", id)))
    }

    /// Point an input edge at another data node.
    pub fn replace_input(&mut self, edge: EdgeId, data: DataId) -> Result<()> {
        self.data(data)?;
        let old = {
            let e = self.edge(edge)?;
            if e.kind != EdgeKind::Input {
                return Err(Error::InvalidGraph(format!("Edge {:?} is not an input", edge)));
            }
            e.data
        };
        self.datas[old.index()].consumers.retain(|e| *e != edge);
        self.datas[data.index()].consumers.push(edge);
        self.edges[edge.index()].data = data;
        Ok(())
    }

    /// Point an output edge at another data node, which must have no producer.
    pub fn replace_output(&mut self, edge: EdgeId, data: DataId) -> Result<()> {
        let target = self.data(data)?;
        if target.producer.is_some() {
            return Err(Error::InvalidGraph(format!(
                "Data '{}' already has a producer",
                target.name
            )));
        }
        let old = {
            let e = self.edge(edge)?;
            if e.kind != EdgeKind::Output {
                return Err(Error::InvalidGraph(format!("Edge {:?} is not an output", edge)));
            }
            e.data
        };
        self.datas[old.index()].producer = None;
        self.datas[data.index()].producer = Some(edge);
        self.edges[edge.index()].data = data;
        Ok(())
    }

    /// Data node behind the `port`-th input of a stage.
    pub fn input_data(&self, stage: StageId, port: usize) -> Result<DataId> {
        let node = self.stage(stage)?;
        let edge = node.inputs.get(port).ok_or_else(|| {
            Error::InvalidGraph(format!("Stage '{}' has no input {}", node.name, port))
        })?;
        Ok(self.edges[edge.index()].data)
    }

    /// Data node behind the `port`-th output of a stage.
    pub fn output_data(&self, stage: StageId, port: usize) -> Result<DataId> {
        let node = self.stage(stage)?;
        let edge = node.outputs.get(port).ok_or_else(|| {
            Error::InvalidGraph(format!("Stage '{}' has no output {}", node.name, port))
        })?;
        Ok(self.edges[edge.index()].data)
    }

    // ── Graph queries ──

    /// Live stages ordered so that every producer precedes its consumers.
    pub fn topological_order(&self) -> Result<Vec<StageId>> {
        let mut graph: DiGraph<StageId, ()> = DiGraph::new();
        let mut index = HashMap::new();
        for (id, _) in self.stages() {
            index.insert(id, graph.add_node(id));
        }
        for (id, stage) in self.stages() {
            for &edge in &stage.inputs {
                let data = &self.datas[self.edges[edge.index()].data.index()];
                if let Some(producer) = data.producer {
                    let from = self.edges[producer.index()].stage;
                    if let (Some(&a), Some(&b)) = (index.get(&from), index.get(&id)) {
                        graph.add_edge(a, b, ());
                    }
                }
            }
        }
        let sorted = toposort(&graph, None).map_err(|cycle| {
            let stage = graph[cycle.node_id()];
            Error::InvalidGraph(format!("Cycle through stage {:?}", stage))
        })?;
        Ok(sorted.into_iter().map(|n| graph[n]).collect())
    }

    /// Network input data nodes in creation order.
    pub fn inputs(&self) -> Vec<DataId> {
        self.datas_with_usage(DataUsage::Input)
    }

    /// Network output data nodes in creation order.
    pub fn outputs(&self) -> Vec<DataId> {
        self.datas_with_usage(DataUsage::Output)
    }

    fn datas_with_usage(&self, usage: DataUsage) -> Vec<DataId> {
        self.datas()
            .filter(|(_, d)| d.usage == usage)
            .map(|(id, _)| id)
            .collect()
    }
}

//! Layer graph representation consumed by the compiler frontend.
//!
//! A [`Network`] is a flat list of named tensors and a list of layers that
//! reference them by name, in execution order. Constant tensors (weights,
//! biases) carry their values as `f32` in canonical order.

use crate::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Oldest IR version the reader still accepts.
pub const MIN_IR_VERSION: u32 = 2;

/// Newest IR version the reader understands.
pub const MAX_IR_VERSION: u32 = 7;

/// A network description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Network name.
    pub name: String,

    /// Format version of the description.
    pub ir_version: u32,

    /// All tensors of the network.
    pub tensors: Vec<TensorInfo>,

    /// Layers in execution order.
    pub layers: Vec<Layer>,

    /// Names of network input tensors.
    pub inputs: Vec<String>,

    /// Names of network output tensors.
    pub outputs: Vec<String>,
}

impl Network {
    /// Create an empty network with the newest IR version.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ir_version: MAX_IR_VERSION,
            tensors: Vec::new(),
            layers: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Get tensor info by name.
    pub fn tensor(&self, name: &str) -> Result<&TensorInfo> {
        self.tensors
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| NetworkError::MissingTensor(name.to_string()))
    }

    /// Add a tensor to the network.
    pub fn add_tensor(&mut self, info: TensorInfo) -> &mut Self {
        match info.kind {
            TensorKind::Input => self.inputs.push(info.name.clone()),
            TensorKind::Output => self.outputs.push(info.name.clone()),
            TensorKind::Weight | TensorKind::Intermediate => {}
        }
        self.tensors.push(info);
        self
    }

    /// Add a layer to the network.
    pub fn add_layer(&mut self, layer: Layer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Validate the version and the structure of the network.
    pub fn validate(&self) -> Result<()> {
        if self.ir_version < MIN_IR_VERSION {
            return Err(NetworkError::DeprecatedVersion(self.ir_version));
        }
        if self.ir_version > MAX_IR_VERSION {
            return Err(NetworkError::FutureVersion(self.ir_version));
        }

        let mut names = HashSet::new();
        for tensor in &self.tensors {
            if !names.insert(tensor.name.as_str()) {
                return Err(NetworkError::InvalidGraph(format!(
                    "Tensor '{}' is declared twice",
                    tensor.name
                )));
            }
            if tensor.shape.is_empty() || tensor.shape.contains(&0) {
                return Err(NetworkError::InvalidGraph(format!(
                    "Tensor '{}' has invalid shape {:?}",
                    tensor.name, tensor.shape
                )));
            }
            match (&tensor.kind, &tensor.data) {
                (TensorKind::Weight, None) => {
                    return Err(NetworkError::InvalidGraph(format!(
                        "Weight tensor '{}' has no data",
                        tensor.name
                    )));
                }
                (TensorKind::Weight, Some(data)) if data.len() != tensor.num_elements() => {
                    return Err(NetworkError::InvalidGraph(format!(
                        "Weight tensor '{}' holds {} values, shape needs {}",
                        tensor.name,
                        data.len(),
                        tensor.num_elements()
                    )));
                }
                _ => {}
            }
        }

        for name in self.inputs.iter().chain(&self.outputs) {
            self.tensor(name)?;
        }

        let mut layer_names = HashSet::new();
        for layer in &self.layers {
            if !layer_names.insert(layer.name.as_str()) {
                return Err(NetworkError::InvalidGraph(format!(
                    "Layer '{}' is declared twice",
                    layer.name
                )));
            }
            for name in layer.inputs.iter().chain(&layer.outputs) {
                self.tensor(name)?;
            }
            for name in layer.weights.iter().chain(&layer.biases) {
                let tensor = self.tensor(name)?;
                if tensor.kind != TensorKind::Weight {
                    return Err(NetworkError::InvalidGraph(format!(
                        "Layer '{}' uses non-constant tensor '{}' as weights",
                        layer.name, name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// A layer (operation) in the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    /// Layer name, unique within the network.
    pub name: String,

    /// Operation type (e.g. "Convolution", "Pooling").
    #[serde(rename = "type")]
    pub layer_type: String,

    /// Input tensor names.
    pub inputs: Vec<String>,

    /// Output tensor names.
    pub outputs: Vec<String>,

    /// Layer attributes.
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,

    /// Constant weights tensor.
    #[serde(default)]
    pub weights: Option<String>,

    /// Constant biases tensor.
    #[serde(default)]
    pub biases: Option<String>,
}

impl Layer {
    /// Create a layer with no edges or attributes.
    pub fn new(name: impl Into<String>, layer_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer_type: layer_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: HashMap::new(),
            weights: None,
            biases: None,
        }
    }

    /// Get an attribute value.
    pub fn attr<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<AttributeValue>,
        T::Error: std::fmt::Display,
    {
        let value = self
            .attributes
            .get(name)
            .ok_or_else(|| NetworkError::MissingAttribute {
                layer: self.name.clone(),
                name: name.to_string(),
            })?;

        T::try_from(value.clone()).map_err(|e| NetworkError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            actual: format!("{}", e),
        })
    }

    /// Get an attribute value, or a default if absent.
    pub fn attr_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: TryFrom<AttributeValue>,
        T::Error: std::fmt::Display,
    {
        if self.has_attr(name) {
            self.attr(name)
        } else {
            Ok(default)
        }
    }

    /// Check if an attribute exists.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

/// Attribute value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
}

impl TryFrom<AttributeValue> for f32 {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Float(v) => Ok(v),
            AttributeValue::Int(v) => Ok(v as f32),
            _ => Err("Not a float".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for i64 {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Int(v) => Ok(v),
            _ => Err("Not an int".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for String {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::String(v) => Ok(v),
            _ => Err("Not a string".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for Vec<i64> {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Ints(v) => Ok(v),
            AttributeValue::Int(v) => Ok(vec![v]),
            _ => Err("Not an int array".to_string()),
        }
    }
}

/// Information about a tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Tensor name.
    pub name: String,

    /// Element type.
    pub dtype: DataType,

    /// Sizes in canonical order (`C`, `NC`, `CHW`, `NCHW`, `NCDHW`).
    pub shape: Vec<usize>,

    /// Tensor kind.
    pub kind: TensorKind,

    /// Constant values for weight tensors, in canonical order.
    #[serde(default)]
    pub data: Option<Vec<f32>>,
}

impl TensorInfo {
    /// Describe a non-constant tensor.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, kind: TensorKind) -> Self {
        Self {
            name: name.into(),
            dtype: DataType::F16,
            shape,
            kind,
            data: None,
        }
    }

    /// Describe a constant tensor.
    pub fn weight(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            dtype: DataType::F16,
            shape,
            kind: TensorKind::Weight,
            data: Some(data),
        }
    }

    /// Total number of elements.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Element types a network may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F16,
    F32,
    I32,
    U8,
}

/// Kind of tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorKind {
    /// Network input (provided by the caller).
    Input,

    /// Network output (returned to the caller).
    Output,

    /// Constant stored in the blob.
    Weight,

    /// Value computed during execution.
    Intermediate,
}

//! Network description for the vpuc compiler.
//!
//! This crate defines the layer graph the frontend lowers into stages and
//! loads it from its JSON form.
//!
//! # Example
//!
//! ```no_run
//! use vpuc_network::load_network;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let network = load_network("model.json")?;
//!
//! println!("Network: {}", network.name);
//! println!("Layers: {}", network.layers.len());
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::Path;
use thiserror::Error;

pub mod graph;

pub use graph::{
    AttributeValue, DataType, Layer, Network, TensorInfo, TensorKind, MAX_IR_VERSION,
    MIN_IR_VERSION,
};

/// Errors that can occur when loading or validating a network.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to read network file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse network JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Deprecated IR version: {0}")]
    DeprecatedVersion(u32),

    #[error("Cannot parse future versions: {0}")]
    FutureVersion(u32),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Missing tensor: {0}")]
    MissingTensor(String),

    #[error("Layer '{layer}' is missing attribute '{name}'")]
    MissingAttribute { layer: String, name: String },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Parse and validate a network from its JSON text.
pub fn parse_network(json: &str) -> Result<Network> {
    let network: Network = serde_json::from_str(json)?;
    network.validate()?;
    Ok(network)
}

/// Load and validate a network from a JSON file.
pub fn load_network<P: AsRef<Path>>(path: P) -> Result<Network> {
    let text = fs::read_to_string(path)?;
    parse_network(&text)
}

/// Serialize a network to pretty-printed JSON.
pub fn to_json(network: &Network) -> Result<String> {
    Ok(serde_json::to_string_pretty(network)?)
}

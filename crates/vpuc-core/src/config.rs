//! Immutable compilation configuration.

use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Option key enabling fixed-function hardware stages.
pub const HW_STAGES_OPTIMIZATION: &str = "HW_STAGES_OPTIMIZATION";
/// Option key allowing dilated convolutions on hardware.
pub const HW_DILATION: &str = "HW_DILATION";
/// Option key listing layers that must stay in software.
pub const HW_DISABLED_LAYERS: &str = "HW_DISABLED_LAYERS";

/// Settings threaded through the frontend and every pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationConfig {
    /// Lower eligible operations to fixed-function hardware.
    pub hw_optimization: bool,
    /// Allow dilation other than 1 on hardware convolutions.
    pub hw_dilation: bool,
    /// Layer names that never go to hardware.
    pub hw_disabled_layers: HashSet<String>,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            hw_optimization: true,
            hw_dilation: false,
            hw_disabled_layers: HashSet::new(),
        }
    }
}

impl CompilationConfig {
    /// Build a configuration from string options.
    ///
    /// Booleans take `YES` or `NO`; the disabled layer list is
    /// comma-separated. Unknown keys are rejected.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in options {
            match key.as_str() {
                HW_STAGES_OPTIMIZATION => config.hw_optimization = parse_switch(key, value)?,
                HW_DILATION => config.hw_dilation = parse_switch(key, value)?,
                HW_DISABLED_LAYERS => {
                    config.hw_disabled_layers = value
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => return Err(Error::Config(format!("Unknown option '{}'", key))),
            }
        }
        Ok(config)
    }

    /// Check whether a layer was excluded from hardware.
    pub fn is_hw_disabled(&self, layer: &str) -> bool {
        self.hw_disabled_layers.contains(layer)
    }
}

fn parse_switch(key: &str, value: &str) -> Result<bool> {
    match value {
        "YES" => Ok(true),
        "NO" => Ok(false),
        _ => Err(Error::Config(format!(
            "Option '{}' expects YES or NO, got '{}'",
            key, value
        ))),
    }
}

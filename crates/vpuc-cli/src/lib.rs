//! vpuc CLI library - shared functionality for testing and binary.

pub mod inspect;

use anyhow::{Context, Result};
use std::collections::HashMap;
use vpuc_core::config::HW_STAGES_OPTIMIZATION;
use vpuc_core::CompilationConfig;

/// Build a configuration from `KEY=VALUE` options.
///
/// `no_hw` forces hardware optimization off regardless of the options.
pub fn build_config(options: &[String], no_hw: bool) -> Result<CompilationConfig> {
    let mut map = HashMap::new();
    for option in options {
        let (key, value) = option
            .split_once('=')
            .with_context(|| format!("Option '{}' is not KEY=VALUE", option))?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    if no_hw {
        map.insert(HW_STAGES_OPTIMIZATION.to_string(), "NO".to_string());
    }
    CompilationConfig::from_options(&map).context("Invalid compilation options")
}

//! Blob inspection.

use anyhow::{Context, Result};
use std::fmt::Write;
use vpuc_compiler::Blob;

/// Render the header and stage table of a blob as text.
pub fn describe_blob(blob: &Blob) -> Result<String> {
    let header = blob.header();
    let mut out = String::new();
    writeln!(out, "Blob v{} ({} bytes)", header.version, blob.len())?;
    writeln!(out, "  Stages:       {}", header.stage_count)?;
    writeln!(
        out,
        "  Constants:    {} bytes at offset {}",
        header.const_size, header.const_offset
    )?;
    writeln!(out, "  BSS:          {} bytes", header.bss_size)?;
    writeln!(out, "  Input area:   {} bytes", header.input_size)?;
    writeln!(out, "  Output area:  {} bytes", header.output_size)?;

    let stages = blob.stages().context("Failed to decode stage table")?;
    writeln!(out)?;
    for (index, stage) in stages.iter().enumerate() {
        let name = stage
            .stage_type()
            .map(|ty| format!("{:?}", ty))
            .unwrap_or_else(|| format!("unknown({})", stage.code));
        writeln!(
            out,
            "  [{:3}] {:<16} params={:<4} data={}",
            index,
            name,
            stage.params.len(),
            stage.data.len()
        )?;
    }
    Ok(out)
}

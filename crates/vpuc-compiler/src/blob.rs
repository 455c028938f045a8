//! Blob writer and reader.
//!
//! Layout (all little-endian):
//! 1. [`BlobHeader`]
//! 2. Stage table in topological order: `u32 type code`, `u32 params
//!    length`, params, `u32 data length`, data
//! 3. Constant section, starting on a 64-byte boundary; every constant sits
//!    at its allocated offset in its final order and strides

use crate::passes::DATA_ALIGNMENT;
use crate::Result;
use std::collections::HashMap;
use vpuc_core::{
    encode_tensor, BlobHeader, BlobReader, BlobSerializer, Error, MemoryArea, Model, StageCtx,
    StageType,
};
use vpuc_stages::capabilities;

/// A serialized program.
#[derive(Debug, Clone)]
pub struct Blob {
    header: BlobHeader,
    bytes: Vec<u8>,
}

/// One entry of the stage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRecord<'a> {
    pub code: u32,
    pub params: &'a [u8],
    pub data: &'a [u8],
}

impl StageRecord<'_> {
    /// Stage kind behind the wire code.
    pub fn stage_type(&self) -> Option<StageType> {
        StageType::ALL
            .into_iter()
            .find(|ty| ty.code() == Some(self.code))
    }
}

impl Blob {
    /// Wrap raw blob bytes after validating the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = BlobHeader::parse(&bytes)?;
        let end = header.const_offset as usize + header.const_size as usize;
        if end > bytes.len() {
            return Err(Error::Serialization(format!(
                "Constant section ends at {} but the blob has {} bytes",
                end,
                bytes.len()
            ))
            .into());
        }
        Ok(Self { header, bytes })
    }

    pub fn header(&self) -> &BlobHeader {
        &self.header
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn stage_count(&self) -> usize {
        self.header.stage_count as usize
    }

    /// Decode the stage table.
    pub fn stages(&self) -> Result<Vec<StageRecord<'_>>> {
        let table = self
            .bytes
            .get(BlobHeader::SIZE..self.header.const_offset as usize)
            .ok_or_else(|| Error::Serialization("Stage table out of bounds".to_string()))?;
        let mut reader = BlobReader::new(table);
        let mut records = Vec::with_capacity(self.stage_count());
        for _ in 0..self.stage_count() {
            let code = reader.read_u32()?;
            let params_len = reader.read_u32()? as usize;
            let params = reader.read_bytes(params_len)?;
            let data_len = reader.read_u32()? as usize;
            let data = reader.read_bytes(data_len)?;
            records.push(StageRecord { code, params, data });
        }
        Ok(records)
    }

    /// Bytes of the constant section.
    pub fn const_section(&self) -> &[u8] {
        let start = self.header.const_offset as usize;
        &self.bytes[start..start + self.header.const_size as usize]
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::Serialization(format!("{} of {} bytes exceeds u32", what, value)).into())
}

/// Serialize a fully lowered, allocated model.
pub fn write_blob(model: &Model) -> Result<Blob> {
    let order = model.topological_order()?;

    let mut table = BlobSerializer::new();
    for &id in &order {
        let ctx = StageCtx::new(model, id)?;
        let stage_type = ctx.stage_type();
        let Some(code) = stage_type.code() else {
            panic!("Stub stage '{}' reached the blob writer", ctx.name());
        };
        let ops = capabilities(stage_type);

        let mut params = BlobSerializer::new();
        ops.serialize_params(&ctx, &mut params)?;
        let mut data = BlobSerializer::new();
        ops.serialize_data(&ctx, &mut data)?;

        table.append_u32(code);
        table.append_size(params.len())?;
        table.append_bytes(params.as_bytes());
        table.append_size(data.len())?;
        table.append_bytes(data.as_bytes());
        tracing::trace!(stage = %ctx.name(), code, params = params.len(), data = data.len(), "serialized stage");
    }

    // Extent of every memory area.
    let mut extents: HashMap<MemoryArea, usize> = HashMap::new();
    for (_, node) in model.datas() {
        if let (Some(location), Some(strides)) = (node.location, node.strides.as_ref()) {
            let end = location.offset + node.desc.byte_size(strides);
            let extent = extents.entry(location.area).or_insert(0);
            *extent = (*extent).max(end);
        }
    }
    let extent = |area| extents.get(&area).copied().unwrap_or(0);

    let const_size = extent(MemoryArea::Blob);
    let mut consts = vec![0u8; const_size];
    for (_, node) in model.datas() {
        let Some(location) = node.location.filter(|l| l.area == MemoryArea::Blob) else {
            continue;
        };
        let content = node.content().ok_or_else(|| {
            Error::Serialization(format!("Blob data '{}' has no content", node.name))
        })?;
        let strides = node.strides.as_deref().unwrap_or_default();
        let encoded = encode_tensor(&node.desc, content, strides)?;
        consts
            .get_mut(location.offset..location.offset + encoded.len())
            .ok_or_else(|| {
                Error::Serialization(format!("Constant '{}' overflows its section", node.name))
            })?
            .copy_from_slice(&encoded);
    }

    let table_end = BlobHeader::SIZE + table.len();
    let const_offset = table_end.div_ceil(DATA_ALIGNMENT) * DATA_ALIGNMENT;

    let mut header = BlobHeader::new();
    header.stage_count = to_u32(order.len(), "Stage count")?;
    header.const_offset = to_u32(const_offset, "Stage table")?;
    header.const_size = to_u32(const_size, "Constant section")?;
    header.bss_size = to_u32(extent(MemoryArea::Bss), "BSS")?;
    header.input_size = to_u32(extent(MemoryArea::Input), "Input area")?;
    header.output_size = to_u32(extent(MemoryArea::Output), "Output area")?;

    let mut bytes = Vec::with_capacity(const_offset + const_size);
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(table.as_bytes());
    bytes.resize(const_offset, 0);
    bytes.extend_from_slice(&consts);

    tracing::debug!(
        stages = order.len(),
        const_size,
        bss = header.bss_size,
        "blob written"
    );
    Ok(Blob { header, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_rejects_truncated_constants() {
        let mut header = BlobHeader::new();
        header.const_offset = BlobHeader::SIZE as u32;
        header.const_size = 8;
        let bytes = header.as_bytes().to_vec();
        assert!(Blob::from_bytes(bytes.clone()).is_err());

        let mut padded = bytes;
        padded.extend_from_slice(&[0; 8]);
        let blob = Blob::from_bytes(padded).unwrap();
        assert_eq!(blob.const_section(), &[0; 8]);
        assert!(blob.stages().unwrap().is_empty());
    }

    #[test]
    fn test_stage_record_resolves_type() {
        let record = StageRecord {
            code: StageType::Power.code().unwrap(),
            params: &[],
            data: &[],
        };
        assert_eq!(record.stage_type(), Some(StageType::Power));
    }
}

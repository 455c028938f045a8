//! Blob serialization primitives.
//!
//! All multi-byte fields are little-endian. Stages write their parameter and
//! data sections through [`BlobSerializer`]; the compiler assembles the blob
//! from those sections, the [`BlobHeader`] and the encoded constants.

use crate::model::DataNode;
use crate::types::{DataDesc, DataType, DimsOrder};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use half::f16;

/// Fixed-size header at the start of every blob.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct BlobHeader {
    pub magic: u32,
    pub version: u32,
    pub header_size: u32,
    pub stage_count: u32,
    /// Offset of the constant section from the start of the blob.
    pub const_offset: u32,
    pub const_size: u32,
    /// Scratch memory the runtime must provide for intermediates.
    pub bss_size: u32,
    pub input_size: u32,
    pub output_size: u32,
    pub reserved: u32,
}

impl BlobHeader {
    /// "VPUB" read as a little-endian u32.
    pub const MAGIC: u32 = 0x4255_5056;
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = std::mem::size_of::<BlobHeader>();

    /// Header with magic, version and size filled in.
    pub fn new() -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            header_size: Self::SIZE as u32,
            ..Zeroable::zeroed()
        }
    }

    /// Raw header bytes.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Parse and validate a header from the start of a blob.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let head = bytes.get(..Self::SIZE).ok_or_else(|| {
            Error::Serialization(format!(
                "Blob of {} bytes is shorter than its header",
                bytes.len()
            ))
        })?;
        let header: BlobHeader = bytemuck::try_pod_read_unaligned(head)
            .map_err(|e| Error::Serialization(format!("Unreadable header: {:?}", e)))?;
        if header.magic != Self::MAGIC {
            return Err(Error::Serialization(format!(
                "Bad blob magic {:#010x}",
                header.magic
            )));
        }
        if header.version != Self::VERSION {
            return Err(Error::Serialization(format!(
                "Unsupported blob version {}",
                header.version
            )));
        }
        Ok(header)
    }
}

impl Default for BlobHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only little-endian byte writer.
#[derive(Debug, Default, Clone)]
pub struct BlobSerializer {
    buf: Vec<u8>,
}

impl BlobSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn append_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn append_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a `usize` that must fit the 32-bit wire format.
    pub fn append_size(&mut self, value: usize) -> Result<()> {
        let value = u32::try_from(value).map_err(|_| {
            Error::Serialization(format!("Value {} does not fit in 32 bits", value))
        })?;
        self.append_u32(value);
        Ok(())
    }

    /// Append the runtime buffer descriptor of a data node.
    ///
    /// Layout: location, offset, element type, order code, rank, then the
    /// dims and the byte strides, both innermost first.
    pub fn write_buffer_descriptor(&mut self, data: &DataNode) -> Result<()> {
        let strides = data.strides.as_ref().ok_or_else(|| {
            Error::Serialization(format!("Data '{}' has no final strides", data.name))
        })?;
        let (area, offset) = match data.location {
            Some(loc) => (loc.area.code(), loc.offset),
            None => (0, 0),
        };
        self.append_u32(area);
        self.append_size(offset)?;
        self.append_u32(data.desc.dtype().code());
        self.append_u32(data.desc.order().code());
        self.append_size(data.desc.num_dims())?;
        for dim in data.desc.dims_in_memory_order() {
            self.append_size(dim)?;
        }
        for &stride in strides {
            self.append_size(stride)?;
        }
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over little-endian blob bytes.
#[derive(Debug, Clone)]
pub struct BlobReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Take the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.bytes.len());
        let end = end.ok_or_else(|| {
            Error::Serialization(format!(
                "Read of {} bytes at offset {} past end of {}-byte blob",
                len,
                self.pos,
                self.bytes.len()
            ))
        })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array(&mut self) -> Result<[u8; 4]> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.read_bytes(4)?);
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Encode constant values (canonical order) into the physical layout given
/// by the descriptor's order and `strides` (innermost first).
///
/// Padding bytes introduced by aligned strides are zero.
pub fn encode_tensor(desc: &DataDesc, values: &[f32], strides: &[usize]) -> Result<Vec<u8>> {
    let rank = desc.num_dims();
    if strides.len() != rank {
        return Err(Error::Serialization(format!(
            "{} strides given for a rank-{} tensor",
            strides.len(),
            rank
        )));
    }
    let total = desc.total_dim_size();
    if values.len() < total {
        return Err(Error::Serialization(format!(
            "Tensor needs {} values, got {}",
            total,
            values.len()
        )));
    }

    // Byte stride of every canonical dimension.
    let canonical = DimsOrder::canonical(rank)?.to_dims();
    let mut canonical_strides = Vec::with_capacity(rank);
    for dim in &canonical {
        let pos = desc.order().position(*dim).ok_or_else(|| {
            Error::Serialization(format!("Order {} lacks {:?}", desc.order(), dim))
        })?;
        canonical_strides.push(strides[pos]);
    }

    let elem = desc.dtype().size();
    let mut out = vec![0u8; desc.byte_size(strides)];
    let dims = desc.dims();
    for (linear, &value) in values.iter().take(total).enumerate() {
        let mut rest = linear;
        let mut offset = 0;
        for axis in (0..rank).rev() {
            offset += (rest % dims[axis]) * canonical_strides[axis];
            rest /= dims[axis];
        }
        let slot = out.get_mut(offset..offset + elem).ok_or_else(|| {
            Error::Serialization(format!("Element {} lands outside the buffer", linear))
        })?;
        match desc.dtype() {
            DataType::F16 => slot.copy_from_slice(&f16::from_f32(value).to_le_bytes()),
            DataType::F32 => slot.copy_from_slice(&value.to_le_bytes()),
            DataType::I32 => slot.copy_from_slice(&(value as i32).to_le_bytes()),
            DataType::U8 => slot[0] = value as u8,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DimStride, StridesRequirement};

    #[test]
    fn test_header_is_40_bytes() {
        assert_eq!(BlobHeader::SIZE, 40);
        let header = BlobHeader::new();
        assert_eq!(&header.as_bytes()[..4], b"VPUB");
        assert_eq!(BlobHeader::parse(header.as_bytes()).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert!(BlobHeader::parse(&[0u8; 8]).is_err());
        assert!(BlobHeader::parse(&[0u8; 40]).is_err());
    }

    #[test]
    fn test_write_then_read_scalars() {
        let mut ser = BlobSerializer::new();
        ser.append_f32(0.5);
        ser.append_i32(-3);
        ser.append_u32(7);
        assert_eq!(ser.len(), 12);

        let bytes = ser.into_bytes();
        let mut reader = BlobReader::new(&bytes);
        assert_eq!(reader.read_f32().unwrap(), 0.5);
        assert_eq!(reader.read_i32().unwrap(), -3);
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.read_u32().is_err());
    }

    #[test]
    fn test_encode_permutes_into_nhwc() {
        // 1x2x1x2 NCHW values [c0w0, c0w1, c1w0, c1w1]
        let desc = DataDesc::new(DataType::F32, vec![1, 2, 1, 2])
            .unwrap()
            .with_order(DimsOrder::NHWC)
            .unwrap();
        let strides = desc.compute_strides(&StridesRequirement::compact());
        let bytes = encode_tensor(&desc, &[1.0, 2.0, 3.0, 4.0], &strides).unwrap();

        let mut reader = BlobReader::new(&bytes);
        let decoded: Vec<f32> = (0..4).map(|_| reader.read_f32().unwrap()).collect();
        assert_eq!(decoded, vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_encode_f16_with_padding() {
        let desc = DataDesc::new(DataType::F16, vec![1, 1, 2, 3]).unwrap();
        let req = StridesRequirement::compact().add(1, DimStride::Aligned);
        let strides = desc.compute_strides(&req);
        assert_eq!(strides, vec![2, 16, 32, 32]);

        let bytes = encode_tensor(&desc, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &strides).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..2], &f16::from_f32(1.0).to_le_bytes());
        assert_eq!(&bytes[6..16], &[0u8; 10]);
        assert_eq!(&bytes[16..18], &f16::from_f32(4.0).to_le_bytes());
    }
}

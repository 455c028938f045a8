//! Tensor descriptors, dimension orders and memory layout types.

use crate::{Error, Result};

/// Maximum tensor rank handled by the compiler.
pub const MAX_DIMS: usize = 5;

/// Byte alignment applied to strides marked [`DimStride::Aligned`].
pub const STRIDE_ALIGNMENT: usize = 16;

/// Element types understood by the accelerator runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F16,
    F32,
    I32,
    U8,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F16 => 2,
            DataType::F32 | DataType::I32 => 4,
            DataType::U8 => 1,
        }
    }

    /// Wire code used in blob buffer descriptors.
    pub fn code(&self) -> u32 {
        match self {
            DataType::F16 => 0,
            DataType::F32 => 1,
            DataType::I32 => 2,
            DataType::U8 => 3,
        }
    }
}

/// A logical tensor dimension.
///
/// The discriminant is the digit used in packed [`DimsOrder`] codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Dim {
    W = 1,
    H = 2,
    C = 3,
    N = 4,
    D = 5,
}

impl Dim {
    /// Decode an order-code digit.
    pub fn from_digit(digit: u32) -> Option<Dim> {
        match digit {
            1 => Some(Dim::W),
            2 => Some(Dim::H),
            3 => Some(Dim::C),
            4 => Some(Dim::N),
            5 => Some(Dim::D),
            _ => None,
        }
    }
}

/// Physical dimension order of a tensor.
///
/// Stored as a packed code with one hex digit per dimension, innermost
/// dimension in the lowest nibble. `NCHW` is `0x4321`, `NHWC` is `0x4213`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DimsOrder {
    code: u32,
}

impl DimsOrder {
    pub const C: DimsOrder = DimsOrder { code: 0x3 };
    pub const NC: DimsOrder = DimsOrder { code: 0x43 };
    pub const CHW: DimsOrder = DimsOrder { code: 0x321 };
    pub const HWC: DimsOrder = DimsOrder { code: 0x213 };
    pub const NCHW: DimsOrder = DimsOrder { code: 0x4321 };
    pub const NHWC: DimsOrder = DimsOrder { code: 0x4213 };
    pub const NCDHW: DimsOrder = DimsOrder { code: 0x43521 };
    pub const NDHWC: DimsOrder = DimsOrder { code: 0x45213 };

    /// Decode a packed order code, rejecting repeated or unknown digits.
    pub fn from_code(code: u32) -> Result<Self> {
        let mut seen = Vec::new();
        let mut rest = code;
        while rest != 0 {
            let dim = Dim::from_digit(rest & 0xF)
                .ok_or_else(|| Error::Shape(format!("Invalid dims order code {:#x}", code)))?;
            if seen.contains(&dim) {
                return Err(Error::Shape(format!(
                    "Dims order code {:#x} repeats {:?}",
                    code, dim
                )));
            }
            seen.push(dim);
            rest >>= 4;
        }
        if seen.is_empty() || seen.len() > MAX_DIMS {
            return Err(Error::Shape(format!("Invalid dims order code {:#x}", code)));
        }
        Ok(Self { code })
    }

    /// Build an order from dimensions listed outermost first.
    pub fn from_dims(outer_to_inner: &[Dim]) -> Result<Self> {
        let code = outer_to_inner
            .iter()
            .rev()
            .enumerate()
            .fold(0u32, |acc, (i, dim)| acc | ((*dim as u32) << (4 * i)));
        Self::from_code(code)
    }

    /// The canonical logical order for a rank (`C`, `NC`, `CHW`, `NCHW`, `NCDHW`).
    pub fn canonical(rank: usize) -> Result<Self> {
        match rank {
            1 => Ok(Self::C),
            2 => Ok(Self::NC),
            3 => Ok(Self::CHW),
            4 => Ok(Self::NCHW),
            5 => Ok(Self::NCDHW),
            _ => Err(Error::Shape(format!("Unsupported tensor rank {}", rank))),
        }
    }

    /// Channel-minor order for a rank; ranks without spatial dims stay canonical.
    pub fn interleaved(rank: usize) -> Result<Self> {
        match rank {
            3 => Ok(Self::HWC),
            4 => Ok(Self::NHWC),
            5 => Ok(Self::NDHWC),
            _ => Self::canonical(rank),
        }
    }

    /// Packed code.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Number of dimensions in the order.
    pub fn num_dims(&self) -> usize {
        let mut n = 0;
        let mut rest = self.code;
        while rest != 0 {
            n += 1;
            rest >>= 4;
        }
        n
    }

    /// Dimensions from innermost to outermost.
    pub fn to_memory_order(&self) -> Vec<Dim> {
        let mut dims = Vec::with_capacity(self.num_dims());
        let mut rest = self.code;
        while rest != 0 {
            // from_code validated every digit
            if let Some(dim) = Dim::from_digit(rest & 0xF) {
                dims.push(dim);
            }
            rest >>= 4;
        }
        dims
    }

    /// Dimensions from outermost to innermost.
    pub fn to_dims(&self) -> Vec<Dim> {
        let mut dims = self.to_memory_order();
        dims.reverse();
        dims
    }

    /// Memory position of a dimension (0 is innermost).
    pub fn position(&self, dim: Dim) -> Option<usize> {
        self.to_memory_order().iter().position(|d| *d == dim)
    }

    /// Check whether the order contains a dimension.
    pub fn has_dim(&self, dim: Dim) -> bool {
        self.position(dim).is_some()
    }

    /// Check whether two orders cover the same set of dimensions.
    pub fn same_dims(&self, other: &DimsOrder) -> bool {
        let mut a = self.to_memory_order();
        let mut b = other.to_memory_order();
        a.sort();
        b.sort();
        a == b
    }
}

impl std::fmt::Display for DimsOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for dim in self.to_dims() {
            write!(f, "{:?}", dim)?;
        }
        Ok(())
    }
}

/// Tensor descriptor: element type, sizes and physical order.
///
/// `dims` is always stored in the canonical logical order of the rank
/// (see [`DimsOrder::canonical`]), independent of the physical `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDesc {
    dtype: DataType,
    dims: Vec<usize>,
    order: DimsOrder,
}

impl DataDesc {
    /// Create a descriptor in canonical order.
    pub fn new(dtype: DataType, dims: Vec<usize>) -> Result<Self> {
        let order = DimsOrder::canonical(dims.len())?;
        if dims.iter().any(|&d| d == 0) {
            return Err(Error::Shape(format!("Zero-sized dimension in {:?}", dims)));
        }
        Ok(Self { dtype, dims, order })
    }

    /// Element type.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Sizes in canonical logical order.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Physical order.
    pub fn order(&self) -> DimsOrder {
        self.order
    }

    /// Tensor rank.
    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    /// Size of a logical dimension, if the tensor has it.
    pub fn dim(&self, dim: Dim) -> Option<usize> {
        let canonical = DimsOrder::canonical(self.dims.len()).ok()?;
        canonical
            .to_dims()
            .iter()
            .position(|d| *d == dim)
            .map(|i| self.dims[i])
    }

    /// Replace the size of a logical dimension.
    pub fn set_dim(&mut self, dim: Dim, size: usize) -> Result<()> {
        let canonical = DimsOrder::canonical(self.dims.len())?;
        let index = canonical
            .to_dims()
            .iter()
            .position(|d| *d == dim)
            .ok_or_else(|| Error::Shape(format!("Tensor has no {:?} dimension", dim)))?;
        self.dims[index] = size;
        Ok(())
    }

    /// Change the physical order; the new order must cover the same dimensions.
    pub fn set_order(&mut self, order: DimsOrder) -> Result<()> {
        let canonical = DimsOrder::canonical(self.dims.len())?;
        if !canonical.same_dims(&order) {
            return Err(Error::Shape(format!(
                "Order {} is incompatible with rank {}",
                order,
                self.dims.len()
            )));
        }
        self.order = order;
        Ok(())
    }

    /// Copy of this descriptor with another order.
    pub fn with_order(&self, order: DimsOrder) -> Result<Self> {
        let mut desc = self.clone();
        desc.set_order(order)?;
        Ok(desc)
    }

    /// Total number of elements.
    pub fn total_dim_size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Sizes listed innermost first, following the physical order.
    pub fn dims_in_memory_order(&self) -> Vec<usize> {
        self.order
            .to_memory_order()
            .iter()
            .filter_map(|d| self.dim(*d))
            .collect()
    }

    /// Byte strides (innermost first) satisfying a requirement.
    pub fn compute_strides(&self, req: &StridesRequirement) -> Vec<usize> {
        let sizes = self.dims_in_memory_order();
        let mut strides = Vec::with_capacity(sizes.len());
        let mut next = self.dtype.size();
        for (pos, size) in sizes.iter().enumerate() {
            let stride = if pos > 0 && req.get(pos) == DimStride::Aligned {
                next.div_ceil(STRIDE_ALIGNMENT) * STRIDE_ALIGNMENT
            } else {
                next
            };
            strides.push(stride);
            next = stride * size;
        }
        strides
    }

    /// Bytes occupied with the given strides (innermost first).
    pub fn byte_size(&self, strides: &[usize]) -> usize {
        let sizes = self.dims_in_memory_order();
        match (sizes.last(), strides.last()) {
            (Some(size), Some(stride)) => size * stride,
            _ => 0,
        }
    }
}

/// Role of a tensor within the compiled network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataUsage {
    /// Network input, provided by the caller.
    Input,
    /// Network output, returned to the caller.
    Output,
    /// Value produced and consumed inside the network.
    Intermediate,
    /// Constant baked into the blob.
    Const,
    /// Placeholder for an absent tensor (e.g. a missing bias).
    Fake,
}

/// Stride constraint for one memory position of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimStride {
    Any,
    Compact,
    Aligned,
}

/// Stride constraints per memory position (0 is innermost).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StridesRequirement {
    per_dim: [DimStride; MAX_DIMS],
}

impl StridesRequirement {
    /// No constraint on any position.
    pub fn empty() -> Self {
        Self {
            per_dim: [DimStride::Any; MAX_DIMS],
        }
    }

    /// Densely packed tensor.
    pub fn compact() -> Self {
        Self {
            per_dim: [DimStride::Compact; MAX_DIMS],
        }
    }

    /// Set the constraint of one position.
    pub fn add(mut self, pos: usize, stride: DimStride) -> Self {
        if pos < MAX_DIMS {
            self.per_dim[pos] = stride;
        }
        self
    }

    /// Constraint of one position.
    pub fn get(&self, pos: usize) -> DimStride {
        self.per_dim.get(pos).copied().unwrap_or(DimStride::Any)
    }

    /// Combine two requirements, or `None` if they conflict.
    pub fn merge(&self, other: &StridesRequirement) -> Option<StridesRequirement> {
        let mut merged = *self;
        for (pos, slot) in merged.per_dim.iter_mut().enumerate() {
            *slot = match (*slot, other.per_dim[pos]) {
                (DimStride::Any, s) | (s, DimStride::Any) => s,
                (a, b) if a == b => a,
                _ => return None,
            };
        }
        Some(merged)
    }

    /// Check whether strides satisfying `self` also satisfy `other`.
    pub fn satisfies(&self, other: &StridesRequirement) -> bool {
        self.per_dim
            .iter()
            .zip(other.per_dim.iter())
            .all(|(mine, theirs)| *theirs == DimStride::Any || mine == theirs)
    }
}

impl Default for StridesRequirement {
    fn default() -> Self {
        Self::empty()
    }
}

/// Memory area a tensor lives in at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    Input,
    Output,
    /// Constant section of the blob.
    Blob,
    /// Scratch memory for intermediates.
    Bss,
}

impl MemoryArea {
    /// Wire code used in blob buffer descriptors (0 means "no location").
    pub fn code(&self) -> u32 {
        match self {
            MemoryArea::Input => 1,
            MemoryArea::Output => 2,
            MemoryArea::Blob => 3,
            MemoryArea::Bss => 4,
        }
    }
}

/// Allocated location of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLocation {
    pub area: MemoryArea,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dims_order_codes() {
        assert_eq!(
            DimsOrder::from_dims(&[Dim::N, Dim::C, Dim::H, Dim::W]).unwrap(),
            DimsOrder::NCHW
        );
        assert_eq!(
            DimsOrder::from_dims(&[Dim::N, Dim::H, Dim::W, Dim::C]).unwrap(),
            DimsOrder::NHWC
        );
        assert_eq!(DimsOrder::NHWC.num_dims(), 4);
        assert_eq!(DimsOrder::NHWC.position(Dim::C), Some(0));
        assert_eq!(DimsOrder::NCHW.position(Dim::N), Some(3));
        assert_eq!(DimsOrder::NCDHW.to_string(), "NCDHW");
    }

    #[test]
    fn test_dims_order_rejects_repeats() {
        assert!(DimsOrder::from_code(0x11).is_err());
        assert!(DimsOrder::from_code(0x7).is_err());
        assert!(DimsOrder::from_code(0).is_err());
    }

    #[test]
    fn test_desc_dim_lookup() {
        let desc = DataDesc::new(DataType::F16, vec![2, 16, 8, 4]).unwrap();
        assert_eq!(desc.dim(Dim::N), Some(2));
        assert_eq!(desc.dim(Dim::C), Some(16));
        assert_eq!(desc.dim(Dim::W), Some(4));
        assert_eq!(desc.dim(Dim::D), None);
        assert_eq!(desc.total_dim_size(), 2 * 16 * 8 * 4);

        let nhwc = desc.with_order(DimsOrder::NHWC).unwrap();
        assert_eq!(nhwc.dims_in_memory_order(), vec![16, 4, 8, 2]);
        assert!(desc.with_order(DimsOrder::NC).is_err());
    }

    #[test]
    fn test_compact_and_aligned_strides() {
        let desc = DataDesc::new(DataType::F16, vec![1, 2, 3, 5]).unwrap();
        let compact = desc.compute_strides(&StridesRequirement::compact());
        assert_eq!(compact, vec![2, 10, 30, 60]);
        assert_eq!(desc.byte_size(&compact), 60);

        let aligned = desc.compute_strides(&StridesRequirement::compact().add(1, DimStride::Aligned));
        assert_eq!(aligned, vec![2, 16, 48, 96]);
    }

    #[test]
    fn test_strides_requirement_merge() {
        let any = StridesRequirement::empty();
        let compact = StridesRequirement::compact();
        let aligned = StridesRequirement::empty().add(1, DimStride::Aligned);

        assert_eq!(any.merge(&compact), Some(compact));
        assert_eq!(aligned.merge(&any), Some(aligned));
        assert!(compact.merge(&aligned).is_none());
        assert!(compact.satisfies(&any));
        assert!(!any.satisfies(&compact));
    }
}

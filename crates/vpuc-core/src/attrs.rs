//! Strongly typed per-stage attribute store.
//!
//! Every stage carries an [`Attributes`] map from a closed key set to typed
//! values. Each key admits exactly one value type, checked at the write site,
//! and is written at most once per stage instance.

use crate::{Error, Result};
use std::collections::BTreeMap;

/// Value type admitted by an attribute key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Int,
    Float,
    Bool,
}

/// Closed set of stage attribute keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttrKey {
    KernelSizeX,
    KernelSizeY,
    KernelSizeZ,
    KernelStrideX,
    KernelStrideY,
    KernelStrideZ,
    PadLeft,
    PadRight,
    PadTop,
    PadBottom,
    PadFront,
    PadBack,
    DilationX,
    DilationY,
    DilationZ,
    GroupSize,
    /// Average pooling ignores padded elements.
    ExcludePad,
    /// Fixed-function hardware eligibility decided by the frontend.
    TryHw,
    /// Hardware operation family of a `MyriadXHwOp` stage.
    HwOpKind,
    /// Requested quantization scale for a weightable stage.
    ScaleFactor,
    /// Affine-power multiplier.
    Scale,
    /// Affine-power exponent.
    Power,
    /// Affine-power offset.
    Bias,
    /// Axis of a split or concat stage, as a [`crate::Dim`] digit.
    Axis,
}

impl AttrKey {
    /// The single value type this key admits.
    pub fn kind(&self) -> AttrKind {
        match self {
            AttrKey::ExcludePad | AttrKey::TryHw => AttrKind::Bool,
            AttrKey::ScaleFactor | AttrKey::Scale | AttrKey::Power | AttrKey::Bias => {
                AttrKind::Float
            }
            _ => AttrKind::Int,
        }
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttrValue {
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl AttrValue {
    fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Int(_) => AttrKind::Int,
            AttrValue::Float(_) => AttrKind::Float,
            AttrValue::Bool(_) => AttrKind::Bool,
        }
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f32> for AttrValue {
    fn from(v: f32) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

/// Attribute map of one stage. Cloning produces an independent deep copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: BTreeMap<AttrKey, AttrValue>,
}

impl Attributes {
    /// Create an empty attribute map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an attribute. Fails on a type mismatch or a second write.
    pub fn set(&mut self, key: AttrKey, value: impl Into<AttrValue>) -> Result<()> {
        let value = value.into();
        if value.kind() != key.kind() {
            return Err(Error::Attribute(format!(
                "Attribute {:?} expects {:?}, got {:?}",
                key,
                key.kind(),
                value.kind()
            )));
        }
        if self.values.contains_key(&key) {
            return Err(Error::Attribute(format!(
                "Attribute {:?} is already set",
                key
            )));
        }
        self.values.insert(key, value);
        Ok(())
    }

    /// Check if an attribute is present.
    pub fn has(&self, key: AttrKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Get an integer attribute.
    pub fn get_int(&self, key: AttrKey) -> Result<i32> {
        match self.values.get(&key) {
            Some(AttrValue::Int(v)) => Ok(*v),
            Some(other) => Err(Error::Attribute(format!(
                "Attribute {:?} is not an int: {:?}",
                key, other
            ))),
            None => Err(Error::Attribute(format!("Missing attribute: {:?}", key))),
        }
    }

    /// Get an integer attribute, or a default if absent.
    pub fn get_int_or(&self, key: AttrKey, default: i32) -> Result<i32> {
        if self.has(key) {
            self.get_int(key)
        } else {
            Ok(default)
        }
    }

    /// Get a float attribute.
    pub fn get_float(&self, key: AttrKey) -> Result<f32> {
        match self.values.get(&key) {
            Some(AttrValue::Float(v)) => Ok(*v),
            Some(other) => Err(Error::Attribute(format!(
                "Attribute {:?} is not a float: {:?}",
                key, other
            ))),
            None => Err(Error::Attribute(format!("Missing attribute: {:?}", key))),
        }
    }

    /// Get a mutable float attribute (for folding scale factors in place).
    pub fn get_float_mut(&mut self, key: AttrKey) -> Result<&mut f32> {
        match self.values.get_mut(&key) {
            Some(AttrValue::Float(v)) => Ok(v),
            Some(other) => Err(Error::Attribute(format!(
                "Attribute {:?} is not a float: {:?}",
                key, other
            ))),
            None => Err(Error::Attribute(format!("Missing attribute: {:?}", key))),
        }
    }

    /// Get a boolean attribute.
    pub fn get_bool(&self, key: AttrKey) -> Result<bool> {
        match self.values.get(&key) {
            Some(AttrValue::Bool(v)) => Ok(*v),
            Some(other) => Err(Error::Attribute(format!(
                "Attribute {:?} is not a bool: {:?}",
                key, other
            ))),
            None => Err(Error::Attribute(format!("Missing attribute: {:?}", key))),
        }
    }

    /// Iterate over all attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (AttrKey, AttrValue)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut attrs = Attributes::new();
        attrs.set(AttrKey::KernelSizeX, 3).unwrap();
        attrs.set(AttrKey::Scale, 2.0f32).unwrap();
        attrs.set(AttrKey::TryHw, true).unwrap();

        assert_eq!(attrs.get_int(AttrKey::KernelSizeX).unwrap(), 3);
        assert_eq!(attrs.get_float(AttrKey::Scale).unwrap(), 2.0);
        assert!(attrs.get_bool(AttrKey::TryHw).unwrap());
        assert_eq!(attrs.get_int_or(AttrKey::KernelSizeZ, 1).unwrap(), 1);
    }

    #[test]
    fn test_rejects_wrong_type() {
        let mut attrs = Attributes::new();
        let err = attrs.set(AttrKey::KernelSizeX, 3.0f32).unwrap_err();
        assert!(err.to_string().contains("expects Int"));
        assert!(!attrs.has(AttrKey::KernelSizeX));
    }

    #[test]
    fn test_rejects_second_write() {
        let mut attrs = Attributes::new();
        attrs.set(AttrKey::GroupSize, 1).unwrap();
        assert!(attrs.set(AttrKey::GroupSize, 2).is_err());
        assert_eq!(attrs.get_int(AttrKey::GroupSize).unwrap(), 1);
    }

    #[test]
    fn test_float_update_in_place() {
        let mut attrs = Attributes::new();
        attrs.set(AttrKey::Bias, 0.5f32).unwrap();
        *attrs.get_float_mut(AttrKey::Bias).unwrap() *= 4.0;
        assert_eq!(attrs.get_float(AttrKey::Bias).unwrap(), 2.0);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut attrs = Attributes::new();
        attrs.set(AttrKey::Scale, 1.0f32).unwrap();
        let mut copy = attrs.clone();
        *copy.get_float_mut(AttrKey::Scale).unwrap() = 3.0;
        assert_eq!(attrs.get_float(AttrKey::Scale).unwrap(), 1.0);
    }
}

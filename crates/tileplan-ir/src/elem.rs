use core::fmt::Display;

use half::{bf16, f16};

/// Scalar element types a plan can load, store and compute with.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Elem {
    F16,
    #[cfg_attr(feature = "serde", serde(rename = "bf16"))]
    BF16,
    F32,
    U32,
}

impl Elem {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Elem::F16 | Elem::BF16 => 2,
            Elem::F32 | Elem::U32 => 4,
        }
    }

    pub fn is_float(&self) -> bool {
        !matches!(self, Elem::U32)
    }

    /// Round a value to the precision of this element type.
    ///
    /// Interpreters keep every value as `f64` and call this on every write, so a value observed
    /// through a buffer of this type is exactly representable in it.
    pub fn round(&self, value: f64) -> f64 {
        match self {
            Elem::F16 => f16::from_f64(value).to_f64(),
            Elem::BF16 => bf16::from_f64(value).to_f64(),
            Elem::F32 => value as f32 as f64,
            Elem::U32 => value.max(0.0).min(u32::MAX as f64).trunc(),
        }
    }
}

impl Display for Elem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Elem::F16 => f.write_str("f16"),
            Elem::BF16 => f.write_str("bf16"),
            Elem::F32 => f.write_str("f32"),
            Elem::U32 => f.write_str("u32"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_rounding_loses_precision() {
        let value = 1.0 + 1.0 / 4096.0;

        assert_eq!(Elem::F32.round(value), value);
        assert_eq!(Elem::F16.round(value), 1.0);
    }

    #[test]
    fn sizes() {
        assert_eq!(Elem::F16.size(), 2);
        assert_eq!(Elem::BF16.size(), 2);
        assert_eq!(Elem::F32.size(), 4);
    }
}

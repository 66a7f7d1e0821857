use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// The closed set of element kinds a buffer can hold.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Default,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::EnumIter,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F16,
    BF16,
    #[default]
    F32,
    F64,
}

impl DType {
    /// Returns the size of the type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DType::Bool | DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    /// Every kind is aligned to its own width.
    pub fn align_of(self) -> usize {
        self.size_of()
    }
}

/// Monomorphises `$body` for the Rust element type of `$dt`, bound to `$T`.
macro_rules! with_dtype {
    ($dt:expr, $T:ident => $body:expr) => {
        match $dt {
            $crate::DType::Bool => {
                type $T = bool;
                $body
            }
            $crate::DType::U8 => {
                type $T = u8;
                $body
            }
            $crate::DType::U16 => {
                type $T = u16;
                $body
            }
            $crate::DType::U32 => {
                type $T = u32;
                $body
            }
            $crate::DType::U64 => {
                type $T = u64;
                $body
            }
            $crate::DType::I8 => {
                type $T = i8;
                $body
            }
            $crate::DType::I16 => {
                type $T = i16;
                $body
            }
            $crate::DType::I32 => {
                type $T = i32;
                $body
            }
            $crate::DType::I64 => {
                type $T = i64;
                $body
            }
            $crate::DType::F16 => {
                type $T = half::f16;
                $body
            }
            $crate::DType::BF16 => {
                type $T = half::bf16;
                $body
            }
            $crate::DType::F32 => {
                type $T = f32;
                $body
            }
            $crate::DType::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}
pub(crate) use with_dtype;

/// A single element detached from any buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Bool(b) => b as u8 as f64,
            Scalar::Int(i) => i as f64,
            Scalar::UInt(u) => u as f64,
            Scalar::Float(f) => f,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Scalar::Bool(b) => b,
            Scalar::Int(i) => i != 0,
            Scalar::UInt(u) => u != 0,
            Scalar::Float(f) => f != 0.0,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::UInt(u) => write!(f, "{}", u),
            Scalar::Float(v) if v.fract() == 0.0 && v.is_finite() => write!(f, "{:.1}", v),
            Scalar::Float(v) => write!(f, "{:.4}", v),
        }
    }
}

pub trait TensorDType:
    Copy
    + std::fmt::Debug
    + PartialEq
    + 'static
    + Send
    + Sync
    + bytemuck::NoUninit
    + bytemuck::CheckedBitPattern
{
    fn dt() -> DType;

    fn zero() -> Self;

    fn one() -> Self;

    fn to_scalar(self) -> Scalar;

    /// Converts with `as` semantics: floats truncate and saturate into integers.
    fn from_scalar(scalar: Scalar) -> Self;
}

macro_rules! map_int_type {
    ($t:ty, $v:ident, $s:ident, $w:ty) => {
        impl TensorDType for $t {
            fn dt() -> DType {
                DType::$v
            }

            fn zero() -> Self {
                0
            }

            fn one() -> Self {
                1
            }

            fn to_scalar(self) -> Scalar {
                Scalar::$s(self as $w)
            }

            fn from_scalar(scalar: Scalar) -> Self {
                match scalar {
                    Scalar::Bool(b) => b as Self,
                    Scalar::Int(i) => i as Self,
                    Scalar::UInt(u) => u as Self,
                    Scalar::Float(f) => f as Self,
                }
            }
        }
    };
}

macro_rules! map_float_type {
    ($t:ty, $v:ident) => {
        impl TensorDType for $t {
            fn dt() -> DType {
                DType::$v
            }

            fn zero() -> Self {
                0.0
            }

            fn one() -> Self {
                1.0
            }

            fn to_scalar(self) -> Scalar {
                Scalar::Float(self as f64)
            }

            fn from_scalar(scalar: Scalar) -> Self {
                match scalar {
                    Scalar::Bool(b) => b as u8 as Self,
                    Scalar::Int(i) => i as Self,
                    Scalar::UInt(u) => u as Self,
                    Scalar::Float(f) => f as Self,
                }
            }
        }
    };
}

macro_rules! map_half_type {
    ($t:ty, $v:ident) => {
        impl TensorDType for $t {
            fn dt() -> DType {
                DType::$v
            }

            fn zero() -> Self {
                Self::ZERO
            }

            fn one() -> Self {
                Self::ONE
            }

            fn to_scalar(self) -> Scalar {
                Scalar::Float(self.to_f64())
            }

            fn from_scalar(scalar: Scalar) -> Self {
                Self::from_f64(scalar.as_f64())
            }
        }
    };
}

map_int_type!(u8, U8, UInt, u64);
map_int_type!(u16, U16, UInt, u64);
map_int_type!(u32, U32, UInt, u64);
map_int_type!(u64, U64, UInt, u64);
map_int_type!(i8, I8, Int, i64);
map_int_type!(i16, I16, Int, i64);
map_int_type!(i32, I32, Int, i64);
map_int_type!(i64, I64, Int, i64);
map_float_type!(f32, F32);
map_float_type!(f64, F64);
map_half_type!(f16, F16);
map_half_type!(bf16, BF16);

impl TensorDType for bool {
    fn dt() -> DType {
        DType::Bool
    }

    fn zero() -> Self {
        false
    }

    fn one() -> Self {
        true
    }

    fn to_scalar(self) -> Scalar {
        Scalar::Bool(self)
    }

    fn from_scalar(scalar: Scalar) -> Self {
        scalar.as_bool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn sizes_match_rust_types() {
        for dt in DType::iter() {
            let expected = with_dtype!(dt, T => std::mem::size_of::<T>());
            assert_eq!(dt.size_of(), expected, "{dt}");
            let dt_of = with_dtype!(dt, T => <T as TensorDType>::dt());
            assert_eq!(dt_of, dt);
        }
    }

    #[test]
    fn parses_names() {
        assert_eq!(DType::from_str("f32").unwrap(), DType::F32);
        assert_eq!(DType::from_str("BF16").unwrap(), DType::BF16);
        assert_eq!(DType::I64.to_string(), "i64");
    }

    #[test]
    fn float_to_int_truncates_and_saturates() {
        assert_eq!(i32::from_scalar(Scalar::Float(1.9)), 1);
        assert_eq!(u8::from_scalar(Scalar::Float(300.0)), 255);
        assert_eq!(u8::from_scalar(Scalar::Float(-4.0)), 0);
        assert_eq!(i8::from_scalar(Scalar::Float(f64::NAN)), 0);
    }

    #[test]
    fn one_survives_float_int_float() {
        let as_int = i32::from_scalar(1.0f32.to_scalar());
        let back = f32::from_scalar(as_int.to_scalar());
        assert_eq!(back, 1.0);
    }

    #[test]
    fn bool_conversions() {
        assert!(bool::from_scalar(Scalar::Float(0.5)));
        assert!(!bool::from_scalar(Scalar::Int(0)));
        assert_eq!(f32::from_scalar(true.to_scalar()), 1.0);
        assert_eq!(half::f16::from_scalar(Scalar::Int(2)).to_f32(), 2.0);
    }
}

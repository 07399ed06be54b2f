use std::fmt;

// DType — Element data types
//
// Every native buffer carries a DType. Operations combine dtypes by kind
// (bool < int < float < complex) and by bit width, so mixed-type arithmetic
// never needs an explicit cast at the call site.
//
//   Bool            — comparison results, masks
//   U8              — raw bytes
//   I32 / I64       — indices, counters
//   F16 / BF16      — half precision
//   F32 / F64       — default float precisions
//   Complex64 / 128 — FFT results (two f32 / two f64)

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    U8,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
    Complex64,
    Complex128,
}

/// Process-wide float precision setting consulted by factories and casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Precision {
    Half,
    #[default]
    Single,
    Double,
}

impl Precision {
    pub fn bits(&self) -> usize {
        match self {
            Precision::Half => 16,
            Precision::Single => 32,
            Precision::Double => 64,
        }
    }

    /// Parse a bit count (16, 32 or 64).
    pub fn from_bits(bits: usize) -> Option<Self> {
        match bits {
            16 => Some(Precision::Half),
            32 => Some(Precision::Single),
            64 => Some(Precision::Double),
            _ => None,
        }
    }
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::Bool | DType::U8 => 1,
            DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 | DType::Complex64 => 8,
            DType::Complex128 => 16,
        }
    }

    pub fn bits(&self) -> usize {
        self.size_in_bytes() * 8
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, DType::Bool)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, DType::U8 | DType::I32 | DType::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DType::Complex64 | DType::Complex128)
    }

    /// Whether this is a half-precision type (F16 or BF16).
    pub fn is_half(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }

    /// Float dtype for a precision.
    pub fn float(precision: Precision) -> DType {
        match precision {
            Precision::Half => DType::F16,
            Precision::Single => DType::F32,
            Precision::Double => DType::F64,
        }
    }

    /// Complex dtype whose components have the given precision.
    /// Half precision has no complex counterpart and maps to Complex64.
    pub fn complex(precision: Precision) -> DType {
        match precision {
            Precision::Half | Precision::Single => DType::Complex64,
            Precision::Double => DType::Complex128,
        }
    }

    /// Integer dtype for a precision (I64 only for double precision).
    pub fn int(precision: Precision) -> DType {
        match precision {
            Precision::Double => DType::I64,
            _ => DType::I32,
        }
    }

    fn kind_rank(&self) -> u8 {
        if self.is_bool() {
            0
        } else if self.is_int() {
            1
        } else if self.is_float() {
            2
        } else {
            3
        }
    }

    /// Result dtype of combining two operands.
    ///
    /// The higher kind wins; within a kind the wider type wins. A float mixed
    /// with a complex value keeps the wider of the two component widths. `f16`
    /// and `bf16` together promote to `f32`, whichever comes first.
    pub fn combine(a: DType, b: DType) -> DType {
        if a == b {
            return a;
        }
        let (hi, lo) = if a.kind_rank() >= b.kind_rank() {
            (a, b)
        } else {
            (b, a)
        };
        if hi.kind_rank() != lo.kind_rank() {
            if hi.is_complex() && lo == DType::F64 {
                return DType::Complex128;
            }
            return hi;
        }
        if matches!((hi, lo), (DType::BF16, DType::F16) | (DType::F16, DType::BF16)) {
            return DType::F32;
        }
        if hi.bits() >= lo.bits() {
            hi
        } else {
            lo
        }
    }

    /// Round an `f64` to the nearest value representable in this dtype.
    ///
    /// Complex dtypes round each component with their component precision;
    /// callers apply this per component.
    pub fn quantize(&self, v: f64) -> f64 {
        match self {
            DType::Bool => {
                if v != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            DType::U8 => (v as u8) as f64,
            DType::I32 => (v as i32) as f64,
            DType::I64 => (v as i64) as f64,
            DType::F16 => half::f16::from_f64(v).to_f64(),
            DType::BF16 => half::bf16::from_f64(v).to_f64(),
            DType::F32 | DType::Complex64 => (v as f32) as f64,
            DType::F64 | DType::Complex128 => v,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        };
        write!(f, "{}", s)
    }
}

// WithDType — Bridge between Rust element types and DType
//
// Lets `Tensor::from_slice(&[1.0f32, 2.0], shape)` infer the dtype from the
// element type.

/// Trait implemented by Rust types that can be stored in a tensor.
pub trait WithDType: Copy + Send + Sync + 'static + num_traits::NumCast + std::fmt::Debug {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    fn to_f64(self) -> f64 {
        num_traits::cast::<Self, f64>(self).unwrap_or(f64::NAN)
    }

    fn from_f64(v: f64) -> Self;
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        half::f16::to_f64(self)
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_f64(self) -> f64 {
        half::bf16::to_f64(self)
    }
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
}

impl WithDType for u8 {
    const DTYPE: DType = DType::U8;
    fn from_f64(v: f64) -> Self {
        v as u8
    }
}

impl WithDType for i32 {
    const DTYPE: DType = DType::I32;
    fn from_f64(v: f64) -> Self {
        v as i32
    }
}

impl WithDType for i64 {
    const DTYPE: DType = DType::I64;
    fn from_f64(v: f64) -> Self {
        v as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DType::Bool.size_in_bytes(), 1);
        assert_eq!(DType::BF16.size_in_bytes(), 2);
        assert_eq!(DType::I32.size_in_bytes(), 4);
        assert_eq!(DType::Complex128.size_in_bytes(), 16);
    }

    #[test]
    fn test_combine_by_kind_then_width() {
        assert_eq!(DType::combine(DType::Bool, DType::I32), DType::I32);
        assert_eq!(DType::combine(DType::I64, DType::F16), DType::F16);
        assert_eq!(DType::combine(DType::F32, DType::F64), DType::F64);
        assert_eq!(DType::combine(DType::F64, DType::Complex64), DType::Complex128);
        assert_eq!(DType::combine(DType::F16, DType::BF16), DType::F32);
        assert_eq!(DType::combine(DType::BF16, DType::F16), DType::F32);
        assert_eq!(DType::combine(DType::F16, DType::F32), DType::F32);
    }

    #[test]
    fn test_precision_mapping() {
        assert_eq!(DType::float(Precision::Double), DType::F64);
        assert_eq!(DType::complex(Precision::Single), DType::Complex64);
        assert_eq!(DType::int(Precision::Half), DType::I32);
        assert_eq!(Precision::from_bits(64), Some(Precision::Double));
        assert_eq!(Precision::from_bits(8), None);
    }

    #[test]
    fn test_quantize() {
        assert_eq!(DType::I32.quantize(2.7), 2.0);
        assert_eq!(DType::Bool.quantize(-3.0), 1.0);
        assert_eq!(DType::F32.quantize(0.1), 0.1f32 as f64);
        assert_eq!(DType::F16.quantize(1.0), 1.0);
    }

    #[test]
    fn test_with_dtype_roundtrip() {
        assert_eq!(f32::DTYPE, DType::F32);
        assert_eq!(i64::from_f64(42.0).to_f64(), 42.0);
        assert_eq!(i32::from_f64(-3.0).to_f64(), -3.0);
    }
}

//! Data types carried by graph nodes and buffers.

use core::fmt;

use smallvec::SmallVec;

/// A scalar element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    BF16,
    F32,
    F64,
}

impl ScalarKind {
    /// Size of one element in bytes.
    #[inline]
    pub fn itemsize(&self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 | ScalarKind::F16 | ScalarKind::BF16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => 8,
        }
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            ScalarKind::F16 | ScalarKind::BF16 | ScalarKind::F32 | ScalarKind::F64
        )
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I8 => "i8",
            ScalarKind::U8 => "u8",
            ScalarKind::I16 => "i16",
            ScalarKind::U16 => "u16",
            ScalarKind::I32 => "i32",
            ScalarKind::U32 => "u32",
            ScalarKind::I64 => "i64",
            ScalarKind::U64 => "u64",
            ScalarKind::F16 => "f16",
            ScalarKind::BF16 => "bf16",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}

/// A node or buffer data type.
///
/// Buffers are either plain strided memory or images, which carry a base
/// shape that axis merging must not cross.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    /// A single scalar.
    Scalar(ScalarKind),
    /// A short vector of scalars (vectorized upcast width).
    Vec { base: ScalarKind, count: usize },
    /// A pointer to a buffer of scalars.
    Ptr {
        base: ScalarKind,
        size: usize,
        local: bool,
    },
    /// An image-backed buffer with its plane shape.
    Image {
        base: ScalarKind,
        shape: SmallVec<[usize; 4]>,
    },
}

impl DType {
    /// Shorthand for a scalar dtype.
    #[inline]
    pub const fn scalar(kind: ScalarKind) -> Self {
        DType::Scalar(kind)
    }

    /// An image dtype over `base` elements with the given plane shape.
    pub fn image(base: ScalarKind, shape: impl IntoIterator<Item = usize>) -> Self {
        DType::Image {
            base,
            shape: shape.into_iter().collect(),
        }
    }

    /// The underlying scalar kind.
    #[inline]
    pub fn base(&self) -> ScalarKind {
        match self {
            DType::Scalar(k) => *k,
            DType::Vec { base, .. } => *base,
            DType::Ptr { base, .. } => *base,
            DType::Image { base, .. } => *base,
        }
    }

    /// Size in bytes of one value of this dtype.
    #[inline]
    pub fn itemsize(&self) -> usize {
        match self {
            DType::Scalar(k) => k.itemsize(),
            DType::Vec { base, count } => base.itemsize() * count,
            DType::Ptr { base, .. } => base.itemsize(),
            DType::Image { base, .. } => base.itemsize(),
        }
    }

    /// Vectorizes this dtype to `count` lanes.
    pub fn vec(&self, count: usize) -> Self {
        if count == 1 {
            return DType::Scalar(self.base());
        }
        DType::Vec {
            base: self.base(),
            count,
        }
    }

    /// A pointer to `size` values of this dtype's base scalar.
    pub fn ptr(&self, size: usize, local: bool) -> Self {
        DType::Ptr {
            base: self.base(),
            size,
            local,
        }
    }

    /// Returns true for image-backed buffers.
    #[inline]
    pub fn is_image(&self) -> bool {
        matches!(self, DType::Image { .. })
    }

    /// The image plane shape, if this is an image dtype.
    pub fn image_shape(&self) -> Option<&[usize]> {
        match self {
            DType::Image { shape, .. } => Some(shape),
            _ => None,
        }
    }
}

impl From<ScalarKind> for DType {
    fn from(kind: ScalarKind) -> Self {
        DType::Scalar(kind)
    }
}

/// A literal value carried by a `CONST` node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    F16(half::f16),
    BF16(half::bf16),
}

impl ConstValue {
    /// The canonical zero for a dtype, used when masking constants.
    pub fn zero(dtype: &DType) -> Self {
        match dtype.base() {
            ScalarKind::Bool => ConstValue::Bool(false),
            ScalarKind::F16 => ConstValue::F16(half::f16::ZERO),
            ScalarKind::BF16 => ConstValue::BF16(half::bf16::ZERO),
            k if k.is_float() => ConstValue::Float(0.0),
            _ => ConstValue::Int(0),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Bool(v) => write!(f, "{}", v),
            ConstValue::Int(v) => write!(f, "{}", v),
            ConstValue::Float(v) => write!(f, "{}", v),
            ConstValue::F16(v) => write!(f, "{}", v),
            ConstValue::BF16(v) => write!(f, "{}", v),
        }
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    F64,
    I64,
    Bool,
}

impl DType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::I64 => "i64",
            Self::Bool => "bool",
        }
    }
}

/// Physical row-major extent of dense data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<u32>,
}

impl Shape {
    #[must_use]
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    #[must_use]
    pub fn vector(len: u32) -> Self {
        Self { dims: vec![len] }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    #[must_use]
    pub fn element_count(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(1_u64, |acc, dim| acc.checked_mul(u64::from(*dim)))
    }
}

/// Scalar literal. Floats are stored as raw bits so literals hash and compare
/// exactly, which keeps `Number` terms internable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    I64(i64),
    Bool(bool),
    F64Bits(u64),
}

impl Literal {
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self::F64Bits(value.to_bits())
    }

    #[must_use]
    pub fn dtype(self) -> DType {
        match self {
            Self::I64(_) => DType::I64,
            Self::Bool(_) => DType::Bool,
            Self::F64Bits(_) => DType::F64,
        }
    }

    #[must_use]
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Self::F64Bits(bits) => Some(f64::from_bits(bits)),
            Self::I64(value) => Some(value as f64),
            Self::Bool(value) => Some(if value { 1.0 } else { 0.0 }),
        }
    }

    #[must_use]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::I64(value) => Some(value),
            Self::Bool(value) => Some(i64::from(value)),
            Self::F64Bits(_) => None,
        }
    }

    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(value),
            Self::I64(value) => Some(value != 0),
            Self::F64Bits(bits) => Some(f64::from_bits(bits) != 0.0),
        }
    }

    /// Zero of the given dtype.
    #[must_use]
    pub fn zero(dtype: DType) -> Self {
        match dtype {
            DType::F64 => Self::from_f64(0.0),
            DType::I64 => Self::I64(0),
            DType::Bool => Self::Bool(false),
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I64(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::F64Bits(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
        }
    }
}

/// Dense row-major tensor payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorValue {
    pub dtype: DType,
    pub shape: Shape,
    pub elements: Vec<Literal>,
}

impl TensorValue {
    pub fn new(dtype: DType, shape: Shape, elements: Vec<Literal>) -> Result<Self, ValueError> {
        let expected_count = shape.element_count().ok_or(ValueError::ShapeOverflow {
            shape: shape.clone(),
        })?;

        if expected_count != elements.len() as u64 {
            return Err(ValueError::ElementCountMismatch {
                shape,
                expected_count,
                actual_count: elements.len(),
            });
        }

        if let Some(found) = elements.iter().find(|literal| literal.dtype() != dtype) {
            return Err(ValueError::DTypeMismatch {
                expected: dtype,
                actual: found.dtype(),
            });
        }

        Ok(Self {
            dtype,
            shape,
            elements,
        })
    }

    pub fn from_f64s(dims: Vec<u32>, values: &[f64]) -> Result<Self, ValueError> {
        Self::new(
            DType::F64,
            Shape { dims },
            values.iter().copied().map(Literal::from_f64).collect(),
        )
    }

    pub fn from_i64s(dims: Vec<u32>, values: &[i64]) -> Result<Self, ValueError> {
        Self::new(
            DType::I64,
            Shape { dims },
            values.iter().copied().map(Literal::I64).collect(),
        )
    }

    #[must_use]
    pub fn scalar(literal: Literal) -> Self {
        Self {
            dtype: literal.dtype(),
            shape: Shape::scalar(),
            elements: vec![literal],
        }
    }

    /// `[0, 1, ..., size - 1]` as an `i64` vector.
    #[must_use]
    pub fn arange(size: u32) -> Self {
        Self {
            dtype: DType::I64,
            shape: Shape::vector(size),
            elements: (0..i64::from(size)).map(Literal::I64).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Elements as `f64`, failing on the first non-numeric literal.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>, ValueError> {
        self.elements
            .iter()
            .map(|literal| {
                literal
                    .as_f64()
                    .ok_or(ValueError::NonNumericElement { dtype: self.dtype })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    ShapeOverflow {
        shape: Shape,
    },
    ElementCountMismatch {
        shape: Shape,
        expected_count: u64,
        actual_count: usize,
    },
    DTypeMismatch {
        expected: DType,
        actual: DType,
    },
    NonNumericElement {
        dtype: DType,
    },
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeOverflow { shape } => {
                write!(f, "shape element count overflowed: {:?}", shape.dims)
            }
            Self::ElementCountMismatch {
                shape,
                expected_count,
                actual_count,
            } => {
                write!(
                    f,
                    "tensor element count mismatch for shape {:?}: expected {}, got {}",
                    shape.dims, expected_count, actual_count
                )
            }
            Self::DTypeMismatch { expected, actual } => {
                write!(
                    f,
                    "tensor element dtype mismatch: expected {}, got {}",
                    expected.as_str(),
                    actual.as_str()
                )
            }
            Self::NonNumericElement { dtype } => {
                write!(f, "tensor of dtype {} has non-numeric elements", dtype.as_str())
            }
        }
    }
}

impl std::error::Error for ValueError {}

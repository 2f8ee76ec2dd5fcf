use crate::{Dim, Op, Size, TermKind, ValueError};

/// Broad family of a [`TermError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The requested node violates a structural invariant.
    MalformedConstruction,
    /// A term was used where its meaning is not determined, such as scalar
    /// coercion of a term with free dimensions.
    SemanticAmbiguity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermError {
    DuplicateDim {
        dim: Dim,
    },
    DimShapeMismatch {
        dims: usize,
        shape: usize,
    },
    SizeConflict {
        dim: Dim,
        left: Size,
        right: Size,
    },
    MissingDim {
        dim: Dim,
        available: Vec<Dim>,
    },
    DuplicateSubstitution {
        dim: Dim,
    },
    SubstitutionCollision {
        dim: Dim,
    },
    WrongOperator {
        op: Op,
        expected: &'static str,
    },
    EmptyOperands {
        op: Op,
    },
    ArityMismatch {
        kind: TermKind,
        expected: usize,
        actual: usize,
    },
    TensorRank {
        dims: usize,
        rank: usize,
    },
    AlignMismatch {
        requested: Vec<Dim>,
        available: Vec<Dim>,
    },
    AmbiguousScalar {
        dims: Vec<Dim>,
    },
    NotConcrete {
        kind: TermKind,
    },
    InvalidTensor(ValueError),
}

impl TermError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AmbiguousScalar { .. } | Self::NotConcrete { .. } => {
                ErrorCategory::SemanticAmbiguity
            }
            _ => ErrorCategory::MalformedConstruction,
        }
    }
}

impl std::fmt::Display for TermError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateDim { dim } => write!(f, "duplicate dimension `{dim}`"),
            Self::DimShapeMismatch { dims, shape } => write!(
                f,
                "dims/shape length mismatch: {dims} dims but {shape} shape entries"
            ),
            Self::SizeConflict { dim, left, right } => write!(
                f,
                "dimension `{dim}` has conflicting sizes {left} and {right}"
            ),
            Self::MissingDim { dim, available } => write!(
                f,
                "cannot substitute `{dim}`: not a free dimension of target {available:?}"
            ),
            Self::DuplicateSubstitution { dim } => {
                write!(f, "dimension `{dim}` is substituted more than once")
            }
            Self::SubstitutionCollision { dim } => write!(
                f,
                "substituted value introduces `{dim}`, which the target keeps free"
            ),
            Self::WrongOperator { op, expected } => {
                write!(f, "operator {} cannot be used as {}", op.as_str(), expected)
            }
            Self::EmptyOperands { op } => {
                write!(f, "finitary {} needs at least one operand", op.as_str())
            }
            Self::ArityMismatch {
                kind,
                expected,
                actual,
            } => write!(
                f,
                "{} node takes {expected} children, got {actual}",
                kind.as_str()
            ),
            Self::TensorRank { dims, rank } => write!(
                f,
                "tensor data of rank {rank} cannot be labelled with {dims} dims"
            ),
            Self::AlignMismatch {
                requested,
                available,
            } => write!(
                f,
                "alignment to {requested:?} does not cover free dims {available:?}"
            ),
            Self::AmbiguousScalar { dims } => write!(
                f,
                "only zero-dimensional terms can be read as scalars, found dims {dims:?}"
            ),
            Self::NotConcrete { kind } => {
                write!(f, "{} term holds no concrete value", kind.as_str())
            }
            Self::InvalidTensor(err) => write!(f, "invalid tensor: {err}"),
        }
    }
}

impl std::error::Error for TermError {}

impl From<ValueError> for TermError {
    fn from(value: ValueError) -> Self {
        Self::InvalidTensor(value)
    }
}

#![forbid(unsafe_code)]

//! Dense numeric kernels behind the [`NumericBackend`] contract.
//!
//! The engine only talks to backends through this trait. [`CpuBackend`] is
//! the reference implementation built from the kernels in this crate.

mod arithmetic;
mod cpu;
mod einsum;
mod layout;
mod reduction;
mod tensor_ops;
pub mod threefry;

use std::rc::Rc;

use tt_core::{Dim, Op, Shape, TensorValue, ValueError};

pub use arithmetic::{binary_result_dtype, eval_binary_literal, eval_unary_literal};
pub use cpu::CpuBackend;
pub use threefry::PRNGKey;

/// How the einsum primitive accumulates over contracted labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SumSemantics {
    /// `sum` of products.
    Standard,
    /// `logsumexp` of sums; operands are log-values.
    LogDomain,
}

/// One einsum input with its axis labels in storage order.
#[derive(Debug, Clone, Copy)]
pub struct EinsumOperand<'a> {
    pub labels: &'a [Dim],
    pub value: &'a TensorValue,
}

/// Contract between the term engine and a dense tensor library.
pub trait NumericBackend {
    fn name(&self) -> &'static str;

    fn unary(&self, op: Op, x: &TensorValue) -> Result<TensorValue, EvalError>;

    /// Elementwise binary op with trailing-axis broadcasting over size-1 axes.
    fn binary(&self, op: Op, lhs: &TensorValue, rhs: &TensorValue)
    -> Result<TensorValue, EvalError>;

    /// Folds `op` over `axes`, dropping them from the result.
    fn reduce(&self, op: Op, x: &TensorValue, axes: &[usize]) -> Result<TensorValue, EvalError>;

    /// Argmin/argmax/categorical sample along one axis. Returns the chosen
    /// indices and the reduced values (min, max, or logsumexp for sampling).
    fn argreduce(
        &self,
        op: Op,
        x: &TensorValue,
        axis: usize,
        key: PRNGKey,
    ) -> Result<(TensorValue, TensorValue), EvalError>;

    fn permute(&self, x: &TensorValue, permutation: &[usize]) -> Result<TensorValue, EvalError>;

    fn reshape(&self, x: &TensorValue, dims: &[u32]) -> Result<TensorValue, EvalError>;

    /// Broadcasts size-1 axes of `x` to `dims` (same rank).
    fn expand(&self, x: &TensorValue, dims: &[u32]) -> Result<TensorValue, EvalError>;

    /// Replaces `axis` by the axes of the integer `index` tensor.
    fn gather(
        &self,
        x: &TensorValue,
        axis: usize,
        index: &TensorValue,
    ) -> Result<TensorValue, EvalError>;

    fn einsum(
        &self,
        operands: &[EinsumOperand<'_>],
        output: &[Dim],
        semantics: SumSemantics,
    ) -> Result<TensorValue, EvalError>;
}

/// Resolves a backend by its configured name.
#[must_use]
pub fn backend_by_name(name: &str) -> Option<Rc<dyn NumericBackend>> {
    match name {
        "cpu" => Some(Rc::new(CpuBackend)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    TypeMismatch {
        operation: &'static str,
        detail: &'static str,
    },
    ShapeMismatch {
        operation: &'static str,
        left: Shape,
        right: Shape,
    },
    AxisOutOfBounds {
        operation: &'static str,
        axis: usize,
        rank: usize,
    },
    IndexOutOfBounds {
        index: i64,
        axis_size: u32,
    },
    LabelMismatch {
        label: Dim,
        left: u32,
        right: u32,
    },
    Unsupported {
        operation: &'static str,
        detail: String,
    },
    InvalidTensor(ValueError),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch { operation, detail } => {
                write!(f, "type mismatch for {operation}: {detail}")
            }
            Self::ShapeMismatch {
                operation,
                left,
                right,
            } => write!(
                f,
                "shape mismatch for {operation}: left={:?} right={:?}",
                left.dims, right.dims
            ),
            Self::AxisOutOfBounds {
                operation,
                axis,
                rank,
            } => write!(f, "{operation}: axis {axis} out of bounds for rank {rank}"),
            Self::IndexOutOfBounds { index, axis_size } => {
                write!(f, "index {index} out of bounds for axis size {axis_size}")
            }
            Self::LabelMismatch { label, left, right } => write!(
                f,
                "einsum label `{label}` bound to sizes {left} and {right}"
            ),
            Self::Unsupported { operation, detail } => {
                write!(f, "unsupported {operation} behavior: {detail}")
            }
            Self::InvalidTensor(err) => write!(f, "invalid tensor: {err}"),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<ValueError> for EvalError {
    fn from(value: ValueError) -> Self {
        Self::InvalidTensor(value)
    }
}

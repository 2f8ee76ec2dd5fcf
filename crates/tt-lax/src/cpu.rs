use tt_core::{Dim, Op, TensorValue};

use crate::threefry::PRNGKey;
use crate::{EinsumOperand, EvalError, NumericBackend, SumSemantics};
use crate::{arithmetic, einsum, reduction, tensor_ops};

/// Reference backend: dense row-major kernels on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl NumericBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn unary(&self, op: Op, x: &TensorValue) -> Result<TensorValue, EvalError> {
        arithmetic::eval_unary(op, x)
    }

    fn binary(
        &self,
        op: Op,
        lhs: &TensorValue,
        rhs: &TensorValue,
    ) -> Result<TensorValue, EvalError> {
        arithmetic::eval_binary(op, lhs, rhs)
    }

    fn reduce(&self, op: Op, x: &TensorValue, axes: &[usize]) -> Result<TensorValue, EvalError> {
        reduction::reduce_axes(op, x, axes)
    }

    fn argreduce(
        &self,
        op: Op,
        x: &TensorValue,
        axis: usize,
        key: PRNGKey,
    ) -> Result<(TensorValue, TensorValue), EvalError> {
        reduction::argreduce_axis(op, x, axis, key)
    }

    fn permute(&self, x: &TensorValue, permutation: &[usize]) -> Result<TensorValue, EvalError> {
        tensor_ops::permute(x, permutation)
    }

    fn reshape(&self, x: &TensorValue, dims: &[u32]) -> Result<TensorValue, EvalError> {
        tensor_ops::reshape(x, dims)
    }

    fn expand(&self, x: &TensorValue, dims: &[u32]) -> Result<TensorValue, EvalError> {
        tensor_ops::expand(x, dims)
    }

    fn gather(
        &self,
        x: &TensorValue,
        axis: usize,
        index: &TensorValue,
    ) -> Result<TensorValue, EvalError> {
        tensor_ops::gather(x, axis, index)
    }

    fn einsum(
        &self,
        operands: &[EinsumOperand<'_>],
        output: &[Dim],
        semantics: SumSemantics,
    ) -> Result<TensorValue, EvalError> {
        tracing::trace!(
            operands = operands.len(),
            output = ?output,
            semantics = ?semantics,
            "cpu einsum"
        );
        einsum::einsum(operands, output, semantics)
    }
}

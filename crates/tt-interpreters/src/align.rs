use std::borrow::Cow;

use tt_core::{Dim, Term, TensorValue, View};
use tt_lax::NumericBackend;

use crate::InterpretError;

/// Concrete payload of a `Number` or `Tensor` term with its axis labels.
pub(crate) struct Dense<'a> {
    pub dims: &'a [Dim],
    pub value: Cow<'a, TensorValue>,
    pub scalar: bool,
}

pub(crate) fn dense(term: &Term) -> Option<Dense<'_>> {
    match term.view() {
        View::Number(literal) => Some(Dense {
            dims: &[],
            value: Cow::Owned(TensorValue::scalar(literal)),
            scalar: true,
        }),
        View::Tensor { dims, data } => Some(Dense {
            dims,
            value: Cow::Borrowed(data),
            scalar: false,
        }),
        _ => None,
    }
}

/// Brings every operand to the union of their dims (first-seen order), with
/// size-1 axes standing in for dims an operand lacks.
pub(crate) fn align_dense(
    backend: &dyn NumericBackend,
    operands: &[Dense<'_>],
) -> Result<(Vec<Dim>, Vec<TensorValue>), InterpretError> {
    let mut union: Vec<Dim> = Vec::new();
    for operand in operands {
        for dim in operand.dims {
            if !union.contains(dim) {
                union.push(dim.clone());
            }
        }
    }

    let mut aligned = Vec::with_capacity(operands.len());
    for operand in operands {
        let mut permutation: Vec<usize> = (0..operand.dims.len()).collect();
        permutation.sort_by_key(|axis| union.iter().position(|dim| *dim == operand.dims[*axis]));
        let permuted = backend.permute(&operand.value, &permutation)?;
        let padded: Vec<u32> = union
            .iter()
            .map(|dim| {
                operand
                    .dims
                    .iter()
                    .position(|own| own == dim)
                    .map_or(1, |axis| operand.value.shape.dims[axis])
            })
            .collect();
        aligned.push(if padded.len() == permuted.rank() {
            permuted
        } else {
            backend.reshape(&permuted, &padded)?
        });
    }
    Ok((union, aligned))
}

/// Wraps a kernel result: a rank-0 result of scalar inputs becomes a `Number`.
pub(crate) fn wrap(
    dims: Vec<Dim>,
    value: TensorValue,
    scalar: bool,
) -> Result<Term, InterpretError> {
    if scalar
        && value.rank() == 0
        && let Some(literal) = value.elements.first()
    {
        return Ok(Term::number(*literal));
    }
    Ok(Term::tensor(dims, value)?)
}

#[cfg(test)]
mod tests {
    use super::{align_dense, dense, wrap};
    use tt_core::{Literal, Term, TensorValue, View};
    use tt_lax::CpuBackend;

    #[test]
    fn aligns_to_the_union_of_dims() {
        let a = Term::tensor(["j", "i"], TensorValue::from_i64s(vec![2, 3], &[0, 1, 2, 3, 4, 5]).expect("a"))
            .expect("a");
        let b = Term::arange("k", 4);
        let c = Term::arange("i", 3);
        let operands = [dense(&a).expect("a"), dense(&b).expect("b"), dense(&c).expect("c")];
        let (dims, values) = align_dense(&CpuBackend, &operands).expect("align");
        assert_eq!(dims, vec!["j", "i", "k"]);
        assert_eq!(values[0].shape.dims, vec![2, 3, 1]);
        assert_eq!(values[1].shape.dims, vec![1, 1, 4]);
        assert_eq!(values[2].shape.dims, vec![1, 3, 1]);
    }

    #[test]
    fn transposes_operands_whose_order_differs() {
        let a = Term::tensor(["i", "j"], TensorValue::from_i64s(vec![2, 2], &[1, 2, 3, 4]).expect("a"))
            .expect("a");
        let b = Term::tensor(["j", "i"], TensorValue::from_i64s(vec![2, 2], &[1, 2, 3, 4]).expect("b"))
            .expect("b");
        let (_, values) =
            align_dense(&CpuBackend, &[dense(&a).expect("a"), dense(&b).expect("b")]).expect("align");
        assert_eq!(values[1].elements, [1, 3, 2, 4].map(Literal::I64).to_vec());
    }

    #[test]
    fn scalar_results_become_numbers() {
        let out = wrap(Vec::new(), TensorValue::scalar(Literal::I64(7)), true).expect("wrap");
        assert!(matches!(out.view(), View::Number(Literal::I64(7))));
        let out = wrap(Vec::new(), TensorValue::scalar(Literal::I64(7)), false).expect("wrap");
        assert!(matches!(out.view(), View::Tensor { .. }));
    }
}

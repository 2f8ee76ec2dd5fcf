use tt_core::{DType, Literal, Op, Shape, TensorValue};

use crate::EvalError;
use crate::layout::{broadcast_strides, dot, element_count, unravel};

fn is_comparison(op: Op) -> bool {
    matches!(op, Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge)
}

fn is_logical(op: Op) -> bool {
    matches!(op, Op::And | Op::Or | Op::Xor)
}

/// Stable `log(exp(a) + exp(b))`.
pub(crate) fn logaddexp(a: f64, b: f64) -> f64 {
    let hi = a.max(b);
    if hi == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if hi == f64::INFINITY {
        return f64::INFINITY;
    }
    hi + ((a - hi).exp() + (b - hi).exp()).ln()
}

/// Result dtype of a binary op; integral inputs stay integral where exact.
pub fn binary_result_dtype(op: Op, lhs: DType, rhs: DType) -> Result<DType, EvalError> {
    let integral = lhs != DType::F64 && rhs != DType::F64;
    if is_comparison(op) {
        return Ok(DType::Bool);
    }
    if is_logical(op) {
        return match (lhs, rhs) {
            (DType::Bool, DType::Bool) => Ok(DType::Bool),
            _ if integral => Ok(DType::I64),
            _ => Err(EvalError::TypeMismatch {
                operation: op.as_str(),
                detail: "logical operators need bool or integer operands",
            }),
        };
    }
    match op {
        Op::Add | Op::Sub | Op::Mul | Op::Min | Op::Max => {
            Ok(if integral { DType::I64 } else { DType::F64 })
        }
        Op::Div | Op::Pow | Op::LogAddExp => Ok(DType::F64),
        _ => Err(EvalError::Unsupported {
            operation: op.as_str(),
            detail: "not a binary operator".to_owned(),
        }),
    }
}

fn unary_result_dtype(op: Op, input: DType) -> Result<DType, EvalError> {
    match (op, input) {
        (Op::Neg | Op::Abs, DType::F64) => Ok(DType::F64),
        (Op::Neg | Op::Abs, DType::I64) => Ok(DType::I64),
        (Op::Invert, DType::Bool) => Ok(DType::Bool),
        (Op::Invert, DType::I64) => Ok(DType::I64),
        (Op::Neg | Op::Abs | Op::Invert, _) => Err(EvalError::TypeMismatch {
            operation: op.as_str(),
            detail: "operand dtype not supported",
        }),
        (Op::Sqrt | Op::Exp | Op::Log | Op::Log1p, _) => Ok(DType::F64),
        _ => Err(EvalError::Unsupported {
            operation: op.as_str(),
            detail: "not a unary operator".to_owned(),
        }),
    }
}

fn numeric(op: Op, literal: Literal) -> Result<f64, EvalError> {
    literal.as_f64().ok_or(EvalError::TypeMismatch {
        operation: op.as_str(),
        detail: "expected numeric operand",
    })
}

fn integral(op: Op, literal: Literal) -> Result<i64, EvalError> {
    literal.as_i64().ok_or(EvalError::TypeMismatch {
        operation: op.as_str(),
        detail: "expected integer operand",
    })
}

pub fn eval_unary_literal(op: Op, value: Literal) -> Result<Literal, EvalError> {
    let out = unary_result_dtype(op, value.dtype())?;
    Ok(match (op, out) {
        (Op::Neg, DType::I64) => Literal::I64(integral(op, value)?.wrapping_neg()),
        (Op::Abs, DType::I64) => Literal::I64(integral(op, value)?.wrapping_abs()),
        (Op::Invert, DType::I64) => Literal::I64(!integral(op, value)?),
        (Op::Invert, _) => Literal::Bool(!value.as_bool().unwrap_or(false)),
        (Op::Neg, _) => Literal::from_f64(-numeric(op, value)?),
        (Op::Abs, _) => Literal::from_f64(numeric(op, value)?.abs()),
        (Op::Sqrt, _) => Literal::from_f64(numeric(op, value)?.sqrt()),
        (Op::Exp, _) => Literal::from_f64(numeric(op, value)?.exp()),
        (Op::Log, _) => Literal::from_f64(numeric(op, value)?.ln()),
        (Op::Log1p, _) => Literal::from_f64(numeric(op, value)?.ln_1p()),
        _ => {
            return Err(EvalError::Unsupported {
                operation: op.as_str(),
                detail: "not a unary operator".to_owned(),
            });
        }
    })
}

fn compare(op: Op, lhs: Literal, rhs: Literal) -> Result<bool, EvalError> {
    let ordering = if lhs.dtype() != DType::F64 && rhs.dtype() != DType::F64 {
        integral(op, lhs)?.partial_cmp(&integral(op, rhs)?)
    } else {
        numeric(op, lhs)?.partial_cmp(&numeric(op, rhs)?)
    };
    Ok(match ordering {
        None => op == Op::Ne,
        Some(ordering) => match op {
            Op::Eq => ordering.is_eq(),
            Op::Ne => ordering.is_ne(),
            Op::Lt => ordering.is_lt(),
            Op::Le => ordering.is_le(),
            Op::Gt => ordering.is_gt(),
            _ => ordering.is_ge(),
        },
    })
}

/// Applies `op` producing a literal of dtype `out`, which must come from
/// [`binary_result_dtype`] (or be an accumulator dtype in reductions).
pub fn eval_binary_literal(
    op: Op,
    out: DType,
    lhs: Literal,
    rhs: Literal,
) -> Result<Literal, EvalError> {
    if is_comparison(op) {
        return Ok(Literal::Bool(compare(op, lhs, rhs)?));
    }
    match out {
        DType::Bool => {
            let (a, b) = (lhs.as_bool().unwrap_or(false), rhs.as_bool().unwrap_or(false));
            match op {
                Op::And | Op::Min | Op::Mul => Ok(Literal::Bool(a && b)),
                Op::Or | Op::Max | Op::Add => Ok(Literal::Bool(a || b)),
                Op::Xor => Ok(Literal::Bool(a ^ b)),
                _ => Err(EvalError::TypeMismatch {
                    operation: op.as_str(),
                    detail: "operator has no boolean form",
                }),
            }
        }
        DType::I64 => {
            let (a, b) = (integral(op, lhs)?, integral(op, rhs)?);
            let value = match op {
                Op::Add => a.wrapping_add(b),
                Op::Sub => a.wrapping_sub(b),
                Op::Mul => a.wrapping_mul(b),
                Op::Min => a.min(b),
                Op::Max => a.max(b),
                Op::And => a & b,
                Op::Or => a | b,
                Op::Xor => a ^ b,
                _ => {
                    return Err(EvalError::TypeMismatch {
                        operation: op.as_str(),
                        detail: "operator has no integer form",
                    });
                }
            };
            Ok(Literal::I64(value))
        }
        DType::F64 => {
            let (a, b) = (numeric(op, lhs)?, numeric(op, rhs)?);
            let value = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div => a / b,
                Op::Pow => a.powf(b),
                Op::Min => a.min(b),
                Op::Max => a.max(b),
                Op::LogAddExp => logaddexp(a, b),
                _ => {
                    return Err(EvalError::TypeMismatch {
                        operation: op.as_str(),
                        detail: "operator has no float form",
                    });
                }
            };
            Ok(Literal::from_f64(value))
        }
    }
}

pub(crate) fn eval_unary(op: Op, x: &TensorValue) -> Result<TensorValue, EvalError> {
    let dtype = unary_result_dtype(op, x.dtype)?;
    let elements = x
        .elements
        .iter()
        .map(|literal| eval_unary_literal(op, *literal))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TensorValue::new(dtype, x.shape.clone(), elements)?)
}

/// Right-aligned broadcast of two shapes.
fn broadcast_shape(op: Op, lhs: &Shape, rhs: &Shape) -> Result<Vec<u32>, EvalError> {
    let rank = lhs.rank().max(rhs.rank());
    let pad = |shape: &Shape| -> Vec<u32> {
        let mut dims = vec![1; rank - shape.rank()];
        dims.extend_from_slice(&shape.dims);
        dims
    };
    let (left, right) = (pad(lhs), pad(rhs));
    left.iter()
        .zip(&right)
        .map(|(a, b)| match (*a, *b) {
            (a, b) if a == b => Ok(a),
            (1, b) => Ok(b),
            (a, 1) => Ok(a),
            _ => Err(EvalError::ShapeMismatch {
                operation: op.as_str(),
                left: lhs.clone(),
                right: rhs.clone(),
            }),
        })
        .collect()
}

fn padded(dims: &[u32], rank: usize) -> Vec<u32> {
    let mut out = vec![1; rank - dims.len()];
    out.extend_from_slice(dims);
    out
}

pub(crate) fn eval_binary(
    op: Op,
    lhs: &TensorValue,
    rhs: &TensorValue,
) -> Result<TensorValue, EvalError> {
    let dtype = binary_result_dtype(op, lhs.dtype, rhs.dtype)?;
    let out_dims = broadcast_shape(op, &lhs.shape, &rhs.shape)?;

    if lhs.shape.dims == out_dims && rhs.shape.dims == out_dims {
        let elements = lhs
            .elements
            .iter()
            .zip(&rhs.elements)
            .map(|(a, b)| eval_binary_literal(op, dtype, *a, *b))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(TensorValue::new(dtype, Shape { dims: out_dims }, elements)?);
    }

    let rank = out_dims.len();
    let lhs_strides = broadcast_strides(&padded(&lhs.shape.dims, rank), &out_dims);
    let rhs_strides = broadcast_strides(&padded(&rhs.shape.dims, rank), &out_dims);
    let count = element_count(&out_dims);
    let mut multi = vec![0; rank];
    let mut elements = Vec::with_capacity(count);
    for flat in 0..count {
        unravel(flat, &out_dims, &mut multi);
        let a = lhs.elements[dot(&multi, &lhs_strides)];
        let b = rhs.elements[dot(&multi, &rhs_strides)];
        elements.push(eval_binary_literal(op, dtype, a, b)?);
    }
    Ok(TensorValue::new(dtype, Shape { dims: out_dims }, elements)?)
}

#[cfg(test)]
mod tests {
    use super::{binary_result_dtype, eval_binary, eval_unary, logaddexp};
    use tt_core::{DType, Literal, Op, TensorValue};

    #[test]
    fn broadcasting_binary_over_size_one_axes() {
        let column = TensorValue::from_i64s(vec![3, 1], &[0, 1, 2]).expect("column");
        let row = TensorValue::from_i64s(vec![1, 4], &[0, 10, 20, 30]).expect("row");
        let sum = eval_binary(Op::Add, &column, &row).expect("broadcast add");
        assert_eq!(sum.shape.dims, vec![3, 4]);
        assert_eq!(sum.dtype, DType::I64);
        assert_eq!(sum.elements[5], Literal::I64(11));
        assert_eq!(sum.elements[11], Literal::I64(32));
    }

    #[test]
    fn scalar_broadcasts_against_any_rank() {
        let x = TensorValue::from_f64s(vec![2], &[1.0, 2.0]).expect("vector");
        let two = TensorValue::scalar(Literal::from_f64(2.0));
        let out = eval_binary(Op::Mul, &x, &two).expect("scale");
        assert_eq!(out.to_f64_vec().expect("numeric"), vec![2.0, 4.0]);
    }

    #[test]
    fn incompatible_shapes_fail() {
        let a = TensorValue::from_f64s(vec![2], &[0.0; 2]).expect("a");
        let b = TensorValue::from_f64s(vec![3], &[0.0; 3]).expect("b");
        assert!(eval_binary(Op::Add, &a, &b).is_err());
    }

    #[test]
    fn comparison_yields_bool() {
        assert_eq!(
            binary_result_dtype(Op::Lt, DType::I64, DType::F64).expect("dtype"),
            DType::Bool
        );
        let a = TensorValue::from_i64s(vec![2], &[1, 5]).expect("a");
        let b = TensorValue::from_f64s(vec![2], &[2.0, 2.0]).expect("b");
        let out = eval_binary(Op::Lt, &a, &b).expect("lt");
        assert_eq!(out.elements, vec![Literal::Bool(true), Literal::Bool(false)]);
    }

    #[test]
    fn logaddexp_is_stable() {
        assert!((logaddexp(1000.0, 1000.0) - (1000.0 + 2.0_f64.ln())).abs() < 1e-9);
        assert_eq!(logaddexp(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
    }

    #[test]
    fn unary_float_ops_promote_integers() {
        let x = TensorValue::from_i64s(vec![2], &[0, 1]).expect("x");
        let out = eval_unary(Op::Exp, &x).expect("exp");
        assert_eq!(out.dtype, DType::F64);
        assert_eq!(out.to_f64_vec().expect("numeric"), vec![1.0, 1.0_f64.exp()]);
        assert!(eval_unary(Op::Invert, &TensorValue::from_f64s(vec![1], &[1.0]).expect("f"))
            .is_err());
    }
}

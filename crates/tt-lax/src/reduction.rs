use tt_core::{DType, Literal, Op, Shape, TensorValue};

use crate::EvalError;
use crate::arithmetic::{eval_binary_literal, logaddexp};
use crate::layout::{compute_strides, element_count, unravel};
use crate::threefry::{PRNGKey, uniform_f64};

fn reduce_dtype(op: Op, input: DType) -> Result<DType, EvalError> {
    match op {
        Op::Add | Op::Mul | Op::Min | Op::Max => Ok(if input == DType::F64 {
            DType::F64
        } else {
            DType::I64
        }),
        Op::And | Op::Or | Op::Xor => match input {
            DType::Bool => Ok(DType::Bool),
            DType::I64 => Ok(DType::I64),
            DType::F64 => Err(EvalError::TypeMismatch {
                operation: op.as_str(),
                detail: "logical reduction over float tensor",
            }),
        },
        Op::LogAddExp => Ok(DType::F64),
        _ => Err(EvalError::Unsupported {
            operation: op.as_str(),
            detail: "not a reduction operator".to_owned(),
        }),
    }
}

fn identity(op: Op, dtype: DType) -> Literal {
    match (op, dtype) {
        (Op::Mul, DType::F64) => Literal::from_f64(1.0),
        (Op::Mul, _) => Literal::I64(1),
        (Op::Min, DType::F64) => Literal::from_f64(f64::INFINITY),
        (Op::Min, _) => Literal::I64(i64::MAX),
        (Op::Max, DType::F64) => Literal::from_f64(f64::NEG_INFINITY),
        (Op::Max, _) => Literal::I64(i64::MIN),
        (Op::LogAddExp, _) => Literal::from_f64(f64::NEG_INFINITY),
        (Op::And, DType::Bool) => Literal::Bool(true),
        (Op::And, _) => Literal::I64(-1),
        _ => Literal::zero(dtype),
    }
}

fn validate_axes(operation: &'static str, axes: &[usize], rank: usize) -> Result<(), EvalError> {
    match axes.iter().find(|axis| **axis >= rank) {
        Some(axis) => Err(EvalError::AxisOutOfBounds {
            operation,
            axis: *axis,
            rank,
        }),
        None => Ok(()),
    }
}

/// Folds `op` over `axes`; an empty axis list returns the input unchanged.
pub(crate) fn reduce_axes(
    op: Op,
    x: &TensorValue,
    axes: &[usize],
) -> Result<TensorValue, EvalError> {
    let rank = x.rank();
    validate_axes(op.as_str(), axes, rank)?;
    if axes.is_empty() {
        return Ok(x.clone());
    }
    let dtype = reduce_dtype(op, x.dtype)?;

    let kept_axes: Vec<usize> = (0..rank).filter(|axis| !axes.contains(axis)).collect();
    let out_dims: Vec<u32> = kept_axes.iter().map(|axis| x.shape.dims[*axis]).collect();
    let out_strides = compute_strides(&out_dims);

    let mut acc = vec![identity(op, dtype); element_count(&out_dims)];
    let mut multi = vec![0; rank];
    for (flat, element) in x.elements.iter().enumerate() {
        unravel(flat, &x.shape.dims, &mut multi);
        let out = kept_axes
            .iter()
            .zip(&out_strides)
            .map(|(axis, stride)| multi[*axis] * stride)
            .sum::<usize>();
        acc[out] = eval_binary_literal(op, dtype, acc[out], *element)?;
    }
    Ok(TensorValue::new(dtype, Shape { dims: out_dims }, acc)?)
}

/// Single-axis argmin/argmax/sample. Ties resolve to the lowest index.
pub(crate) fn argreduce_axis(
    op: Op,
    x: &TensorValue,
    axis: usize,
    key: PRNGKey,
) -> Result<(TensorValue, TensorValue), EvalError> {
    let rank = x.rank();
    validate_axes(op.as_str(), &[axis], rank)?;
    let extent = x.shape.dims[axis] as usize;
    if extent == 0 {
        return Err(EvalError::Unsupported {
            operation: op.as_str(),
            detail: "argreduce over an empty axis".to_owned(),
        });
    }

    let strides = compute_strides(&x.shape.dims);
    let step = strides[axis];
    let out_dims: Vec<u32> = x
        .shape
        .dims
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != axis)
        .map(|(_, d)| *d)
        .collect();
    let out_count = element_count(&out_dims);
    let kept_strides: Vec<usize> = strides
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != axis)
        .map(|(_, s)| *s)
        .collect();

    let mut indices = Vec::with_capacity(out_count);
    let mut values = Vec::with_capacity(out_count);
    let mut multi = vec![0; out_dims.len()];
    let mut lane = Vec::with_capacity(extent);
    for out in 0..out_count {
        unravel(out, &out_dims, &mut multi);
        let base: usize = multi.iter().zip(&kept_strides).map(|(i, s)| i * s).sum();
        lane.clear();
        for k in 0..extent {
            let literal = x.elements[base + k * step];
            lane.push(literal.as_f64().ok_or(EvalError::TypeMismatch {
                operation: op.as_str(),
                detail: "expected numeric tensor",
            })?);
        }

        let (index, value) = match op {
            Op::Min | Op::Max => {
                let mut best = 0;
                for (k, candidate) in lane.iter().enumerate().skip(1) {
                    let better = if op == Op::Min {
                        *candidate < lane[best]
                    } else {
                        *candidate > lane[best]
                    };
                    if better {
                        best = k;
                    }
                }
                (best, x.elements[base + best * step])
            }
            Op::Sample => {
                let total = lane.iter().copied().fold(f64::NEG_INFINITY, logaddexp);
                let u = uniform_f64(key, out as u64);
                let mut cumulative = 0.0;
                let mut chosen = extent - 1;
                for (k, logit) in lane.iter().enumerate() {
                    cumulative += (logit - total).exp();
                    if u < cumulative {
                        chosen = k;
                        break;
                    }
                }
                (chosen, Literal::from_f64(total))
            }
            _ => {
                return Err(EvalError::Unsupported {
                    operation: op.as_str(),
                    detail: "argreduce needs min, max or sample".to_owned(),
                });
            }
        };
        indices.push(Literal::I64(index as i64));
        values.push(value);
    }

    let value_dtype = if op == Op::Sample { DType::F64 } else { x.dtype };
    let shape = Shape { dims: out_dims };
    Ok((
        TensorValue::new(DType::I64, shape.clone(), indices)?,
        TensorValue::new(value_dtype, shape, values)?,
    ))
}

use tt_core::{Shape, TensorValue};

use crate::EvalError;
use crate::layout::{broadcast_strides, compute_strides, dot, element_count, unravel};

pub(crate) fn permute(x: &TensorValue, permutation: &[usize]) -> Result<TensorValue, EvalError> {
    let rank = x.rank();
    let mut seen = vec![false; rank];
    let valid = permutation.len() == rank
        && permutation.iter().all(|&axis| {
            let fresh = axis < rank && !seen[axis];
            if fresh {
                seen[axis] = true;
            }
            fresh
        });
    if !valid {
        return Err(EvalError::Unsupported {
            operation: "permute",
            detail: format!("invalid permutation {permutation:?} for rank {rank}"),
        });
    }
    if permutation.iter().enumerate().all(|(i, axis)| i == *axis) {
        return Ok(x.clone());
    }

    let old_strides = compute_strides(&x.shape.dims);
    let new_dims: Vec<u32> = permutation.iter().map(|&axis| x.shape.dims[axis]).collect();
    let gather_strides: Vec<usize> = permutation.iter().map(|&axis| old_strides[axis]).collect();

    let mut multi = vec![0; rank];
    let elements = (0..x.len())
        .map(|flat| {
            unravel(flat, &new_dims, &mut multi);
            x.elements[dot(&multi, &gather_strides)]
        })
        .collect();
    Ok(TensorValue::new(x.dtype, Shape { dims: new_dims }, elements)?)
}

pub(crate) fn reshape(x: &TensorValue, dims: &[u32]) -> Result<TensorValue, EvalError> {
    let shape = Shape {
        dims: dims.to_vec(),
    };
    if shape.element_count() != Some(x.len() as u64) {
        return Err(EvalError::ShapeMismatch {
            operation: "reshape",
            left: x.shape.clone(),
            right: shape,
        });
    }
    Ok(TensorValue::new(x.dtype, shape, x.elements.clone())?)
}

pub(crate) fn expand(x: &TensorValue, dims: &[u32]) -> Result<TensorValue, EvalError> {
    let compatible = x.rank() == dims.len()
        && x
            .shape
            .dims
            .iter()
            .zip(dims)
            .all(|(have, want)| have == want || *have == 1);
    if !compatible {
        return Err(EvalError::ShapeMismatch {
            operation: "expand",
            left: x.shape.clone(),
            right: Shape {
                dims: dims.to_vec(),
            },
        });
    }
    if x.shape.dims == dims {
        return Ok(x.clone());
    }

    let strides = broadcast_strides(&x.shape.dims, dims);
    let mut multi = vec![0; dims.len()];
    let elements = (0..element_count(dims))
        .map(|flat| {
            unravel(flat, dims, &mut multi);
            x.elements[dot(&multi, &strides)]
        })
        .collect();
    Ok(TensorValue::new(
        x.dtype,
        Shape {
            dims: dims.to_vec(),
        },
        elements,
    )?)
}

/// `out[pre, idx..., post] = x[pre, index[idx...], post]`.
pub(crate) fn gather(
    x: &TensorValue,
    axis: usize,
    index: &TensorValue,
) -> Result<TensorValue, EvalError> {
    if axis >= x.rank() {
        return Err(EvalError::AxisOutOfBounds {
            operation: "gather",
            axis,
            rank: x.rank(),
        });
    }
    let axis_size = x.shape.dims[axis];
    let positions = index
        .elements
        .iter()
        .map(|literal| {
            let position = literal.as_i64().ok_or(EvalError::TypeMismatch {
                operation: "gather",
                detail: "index tensor must hold integers",
            })?;
            if position < 0 || position >= i64::from(axis_size) {
                return Err(EvalError::IndexOutOfBounds {
                    index: position,
                    axis_size,
                });
            }
            Ok(position as usize)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let pre = &x.shape.dims[..axis];
    let post = &x.shape.dims[axis + 1..];
    let mut out_dims = pre.to_vec();
    out_dims.extend_from_slice(&index.shape.dims);
    out_dims.extend_from_slice(post);

    let x_strides = compute_strides(&x.shape.dims);
    let index_rank = index.rank();
    let index_strides = compute_strides(&index.shape.dims);
    let mut multi = vec![0; out_dims.len()];
    let elements = (0..element_count(&out_dims))
        .map(|flat| {
            unravel(flat, &out_dims, &mut multi);
            let (pre_idx, rest) = multi.split_at(axis);
            let (idx, post_idx) = rest.split_at(index_rank);
            let position = positions[dot(idx, &index_strides)];
            let source = dot(pre_idx, &x_strides[..axis])
                + position * x_strides[axis]
                + dot(post_idx, &x_strides[axis + 1..]);
            x.elements[source]
        })
        .collect();
    Ok(TensorValue::new(x.dtype, Shape { dims: out_dims }, elements)?)
}

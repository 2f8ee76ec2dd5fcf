/// Row-major strides of `dims`.
pub(crate) fn compute_strides(dims: &[u32]) -> Vec<usize> {
    let mut strides = vec![1_usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1] as usize;
    }
    strides
}

pub(crate) fn element_count(dims: &[u32]) -> usize {
    dims.iter().map(|d| *d as usize).product()
}

/// Multi-index of `flat` under row-major `dims`.
pub(crate) fn unravel(flat: usize, dims: &[u32], multi: &mut [usize]) {
    let mut remainder = flat;
    for axis in (0..dims.len()).rev() {
        let extent = dims[axis] as usize;
        if extent == 0 {
            multi[axis] = 0;
            continue;
        }
        multi[axis] = remainder % extent;
        remainder /= extent;
    }
}

pub(crate) fn dot(multi: &[usize], strides: &[usize]) -> usize {
    multi.iter().zip(strides).map(|(i, s)| i * s).sum()
}

/// Strides of `dims` viewed at `out_dims`: size-1 axes that broadcast get 0.
pub(crate) fn broadcast_strides(dims: &[u32], out_dims: &[u32]) -> Vec<usize> {
    let mut strides = compute_strides(dims);
    for (axis, stride) in strides.iter_mut().enumerate() {
        if dims[axis] == 1 && out_dims[axis] != 1 {
            *stride = 0;
        }
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::{broadcast_strides, compute_strides, dot, unravel};

    #[test]
    fn strides_and_unravel_agree() {
        let dims = [2, 3, 4];
        let strides = compute_strides(&dims);
        assert_eq!(strides, vec![12, 4, 1]);
        let mut multi = [0; 3];
        for flat in 0..24 {
            unravel(flat, &dims, &mut multi);
            assert_eq!(dot(&multi, &strides), flat);
        }
    }

    #[test]
    fn broadcast_axes_have_zero_stride() {
        assert_eq!(broadcast_strides(&[1, 3], &[2, 3]), vec![0, 1]);
        assert_eq!(broadcast_strides(&[2, 1], &[2, 1]), vec![1, 1]);
    }
}

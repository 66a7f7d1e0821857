use super::{gather, CPUOperation};
use crate::{dtype::with_dtype, CPUBuffer, Concat, OperationError, Shape, StorageView, TensorDType};

pub(crate) fn concat<T: TensorDType>(
    inputs: &[(Shape, Vec<T>)],
    dim: usize,
    dst_shape: &Shape,
    dst: &mut [T],
) {
    let dst_dim_len = dst_shape[dim];
    let block: usize = dst_shape.iter().skip(1 + dim).product();
    let dst_s = block * dst_dim_len;
    let mut dst_o = 0;
    for (src_s, src) in inputs {
        let a_dim: usize = src_s.iter().take(dim).product();
        let b_dim = block * src_s[dim];
        for idx in 0..a_dim {
            let dst_idx = idx * dst_s + dst_o;
            let src_idx = idx * b_dim;
            dst[dst_idx..dst_idx + b_dim].copy_from_slice(&src[src_idx..src_idx + b_dim]);
        }
        dst_o += b_dim;
    }
}

fn apply_concat<T: TensorDType>(
    srcs: &[(&CPUBuffer, &StorageView)],
    dim: usize,
    dst_shape: &Shape,
) -> Result<CPUBuffer, OperationError> {
    let inputs = srcs
        .iter()
        .map(|(buffer, view)| Ok((view.shape().clone(), gather::<T>(buffer, view)?)))
        .collect::<Result<Vec<_>, OperationError>>()?;
    let mut result = vec![T::zero(); dst_shape.numel()];
    concat(&inputs, dim, dst_shape, &mut result);
    Ok(CPUBuffer::from_vec(result))
}

impl CPUOperation for Concat {
    fn apply_cpu(&self, srcs: &[(&CPUBuffer, &StorageView)]) -> Result<CPUBuffer, OperationError> {
        let views = srcs.iter().map(|(_, v)| *v).collect::<Vec<_>>();
        let dst = self.compute_view(&views)?;
        with_dtype!(dst.dt(), T => apply_concat::<T>(srcs, self.dim(), dst.shape()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;

    #[test]
    fn concat_blocks() {
        let a = vec![1, 2, 3, 4];
        let b = vec![5, 6];
        let mut dst = vec![0; 6];
        concat(
            &[(shape![2, 2], a.clone()), (shape![2, 1], b.clone())],
            1,
            &shape![2, 3],
            &mut dst,
        );
        assert_eq!(dst, vec![1, 2, 5, 3, 4, 6]);

        let mut dst = vec![0; 6];
        concat(
            &[(shape![2, 2], a), (shape![1, 2], vec![7, 8])],
            0,
            &shape![3, 2],
            &mut dst,
        );
        assert_eq!(dst, vec![1, 2, 3, 4, 7, 8]);
    }
}

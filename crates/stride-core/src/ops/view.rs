use crate::{Operation, OperationError, RVec, Shape, ShapeError, StorageView, Strides};

/// Reinterprets the source elements under a new shape without moving them.
///
/// Succeeds whenever every group of merged or split source dimensions is
/// laid out contiguously relative to itself, not only for fully contiguous sources.
#[derive(derive_new::new, Debug, Clone)]
pub struct Reshape {
    shape: Shape,
}

impl Reshape {
    /// Resolves at most one `-1` in `dims` against `numel`.
    pub fn infer(dims: &[isize], numel: usize) -> Result<Shape, ShapeError> {
        let cannot_infer = || ShapeError::CannotInfer {
            dims: dims.to_vec(),
            numel,
        };
        let mut inferred = None;
        let mut known = 1usize;
        let mut shape = RVec::with_capacity(dims.len());
        for (i, &d) in dims.iter().enumerate() {
            match d {
                -1 if inferred.is_none() => {
                    inferred = Some(i);
                    shape.push(0);
                }
                d if d >= 0 => {
                    known = known.checked_mul(d as usize).ok_or_else(cannot_infer)?;
                    shape.push(d as usize);
                }
                _ => return Err(cannot_infer()),
            }
        }
        if let Some(i) = inferred {
            if known == 0 || numel % known != 0 {
                return Err(cannot_infer());
            }
            shape[i] = numel / known;
        }
        Ok(Shape::new(shape))
    }
}

/// Strides that view `old_shape`/`old_strides` as `new_shape`, if any exist.
///
/// Walks the source dimensions from the innermost outward, splitting them into
/// chunks that are contiguous within themselves, and requires the target
/// dimensions to tile each chunk exactly.
fn compute_strides(old_shape: &Shape, old_strides: &Strides, new_shape: &Shape) -> Option<Strides> {
    if old_shape.numel() == 0 {
        return Some(Strides::from(new_shape));
    }
    let new_rank = new_shape.rank();
    if old_shape.rank() == 0 {
        return Some(Strides::new(smallvec::smallvec![1; new_rank]));
    }

    let mut new_strides: RVec<isize> = smallvec::smallvec![0; new_rank];
    let mut view_d = new_rank as isize - 1;
    let mut chunk_base_stride = old_strides[old_shape.rank() - 1];
    let mut tensor_numel = 1usize;
    let mut view_numel = 1usize;

    for tensor_d in (0..old_shape.rank()).rev() {
        tensor_numel *= old_shape[tensor_d];
        let chunk_ends = tensor_d == 0
            || (old_shape[tensor_d - 1] != 1
                && old_strides[tensor_d - 1] != tensor_numel as isize * chunk_base_stride);
        if !chunk_ends {
            continue;
        }
        while view_d >= 0 && (view_numel < tensor_numel || new_shape[view_d as usize] == 1) {
            new_strides[view_d as usize] = view_numel as isize * chunk_base_stride;
            view_numel *= new_shape[view_d as usize];
            view_d -= 1;
        }
        if view_numel != tensor_numel {
            return None;
        }
        if tensor_d > 0 {
            chunk_base_stride = old_strides[tensor_d - 1];
            tensor_numel = 1;
            view_numel = 1;
        }
    }
    (view_d == -1).then(|| Strides::new(new_strides))
}

impl Operation for Reshape {
    fn name(&self) -> &'static str {
        "Reshape"
    }

    fn check_invariants(&self, src: &StorageView) -> Result<(), OperationError> {
        if src.numel() != self.shape.numel() {
            return Err(ShapeError::NumelMismatch {
                src: src.shape().clone(),
                dst: self.shape.clone(),
            })?;
        }
        Ok(())
    }

    fn compute_view(&self, src: &StorageView) -> Result<StorageView, OperationError> {
        let strides = compute_strides(src.shape(), src.strides(), &self.shape).ok_or_else(|| {
            OperationError::NotContiguousError {
                shape: src.shape().clone(),
                strides: src.strides().clone(),
                requested: self.shape.clone(),
            }
        })?;
        Ok(StorageView::new(
            self.shape.clone(),
            src.dt(),
            strides,
            src.offset(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, DType, Slice, StridedIndex, Transpose};
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn offsets(view: &StorageView) -> Vec<usize> {
        StridedIndex::new(view.shape(), view.strides(), view.offset()).collect()
    }

    #[test]
    fn contiguous_reshape() {
        let src = StorageView::contiguous(shape![2, 3, 4], DType::F32);
        let r = Reshape::new(shape![6, 4]).apply(&src).unwrap();
        assert_eq!(r.strides().to_vec(), vec![4, 1]);
        let r = Reshape::new(shape![24]).apply(&src).unwrap();
        assert_eq!(r.strides().to_vec(), vec![1]);
    }

    #[test]
    fn transposed_reshape_is_rejected() {
        let src = StorageView::contiguous(shape![2, 3], DType::F32);
        let t = Transpose::new(0, 1).apply(&src).unwrap();
        assert!(matches!(
            Reshape::new(shape![6]).apply(&t),
            Err(OperationError::NotContiguousError { .. })
        ));
    }

    #[test]
    fn transposed_split_is_allowed() {
        // [3, 2] with strides [1, 3]: splitting the outer dim keeps each chunk intact.
        let src = StorageView::contiguous(shape![2, 3], DType::F32);
        let t = Transpose::new(0, 1).apply(&src).unwrap();
        let r = Reshape::new(shape![3, 1, 2]).apply(&t).unwrap();
        assert_eq!(offsets(&r), offsets(&t));
    }

    #[test]
    fn sliced_rows_merge_within_row() {
        let src = StorageView::contiguous(shape![4, 6], DType::F32);
        let s = Slice::new(0, 1, 3, 1).apply(&src).unwrap();
        let r = Reshape::new(shape![2, 2, 3]).apply(&s).unwrap();
        assert_eq!(r.offset(), 6);
        assert_eq!(offsets(&r), offsets(&s));

        let cols = Slice::new(1, 0, 3, 1).apply(&src).unwrap();
        assert!(Reshape::new(shape![12]).apply(&cols).is_err());
    }

    #[test]
    fn numel_mismatch() {
        let src = StorageView::contiguous(shape![2, 3], DType::F32);
        assert!(matches!(
            Reshape::new(shape![4]).apply(&src),
            Err(OperationError::ShapeError(ShapeError::NumelMismatch { .. }))
        ));
    }

    #[test]
    fn scalar_reshapes() {
        let scalar = StorageView::contiguous(shape![], DType::F32);
        let r = Reshape::new(shape![1, 1]).apply(&scalar).unwrap();
        assert_eq!(r.strides().to_vec(), vec![1, 1]);
        let back = Reshape::new(shape![]).apply(&r).unwrap();
        assert_eq!(back.rank(), 0);
    }

    #[test]
    fn infer_negative_one() {
        assert_eq!(Reshape::infer(&[-1, 4], 12).unwrap(), shape![3, 4]);
        assert_eq!(Reshape::infer(&[2, 3], 6).unwrap(), shape![2, 3]);
        assert!(Reshape::infer(&[-1, 5], 12).is_err());
        assert!(Reshape::infer(&[-1, -1], 12).is_err());
        assert!(Reshape::infer(&[-2, 6], 12).is_err());
        assert!(Reshape::infer(&[-1, 0], 0).is_err());
    }

    #[proptest(cases = 64)]
    fn reshape_round_trip(#[strategy(prop::collection::vec(1usize..5, 1..4))] dims: Vec<usize>) {
        let shape = Shape::from(dims.clone());
        let src = StorageView::contiguous(shape.clone(), DType::F32);
        let flat = Reshape::new(shape![shape.numel()]).apply(&src).unwrap();
        let back = Reshape::new(shape).apply(&flat).unwrap();
        prop_assert_eq!(back, src);
    }
}

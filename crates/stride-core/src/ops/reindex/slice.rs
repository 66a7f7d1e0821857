use crate::{Enforcer, IndexError, Operation, OperationError, StorageView};

/// # Slice
///
/// Restricts one dimension to `start..stop`, taking every `step`th element.
/// The result shares the source buffer; only offset, size and stride change.
#[derive(derive_new::new, Debug, Clone)]
pub struct Slice {
    dim: usize,
    start: usize,
    stop: usize,
    step: usize,
}

impl Slice {
    pub fn len(&self) -> usize {
        (self.stop - self.start).div_ceil(self.step)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }
}

impl Operation for Slice {
    fn name(&self) -> &'static str {
        "Slice"
    }

    fn check_invariants(&self, src: &StorageView) -> Result<(), OperationError> {
        Enforcer::check_dim(self.dim, src.rank())?;
        if self.step == 0 {
            return Err(IndexError::Step)?;
        }
        Enforcer::check_bounds(self.dim, self.start, self.stop, src.shape()[self.dim])?;
        Ok(())
    }

    fn compute_view(&self, src: &StorageView) -> Result<StorageView, OperationError> {
        let stride = src.strides()[self.dim];
        let mut shape = src.shape().clone();
        let mut strides = src.strides().clone();
        shape[self.dim] = self.len();
        strides[self.dim] = stride * self.step as isize;

        // An empty view addresses nothing, so its offset need not move.
        let offset = if shape.numel() == 0 {
            src.offset()
        } else {
            (src.offset() as isize + self.start as isize * stride) as usize
        };
        Ok(StorageView::new(shape, src.dt(), strides, offset))
    }
}

/// Picks a single index along `dim` and drops that dimension.
#[derive(derive_new::new, Debug, Clone)]
pub struct Select {
    dim: usize,
    index: usize,
}

impl Operation for Select {
    fn name(&self) -> &'static str {
        "Select"
    }

    fn check_invariants(&self, src: &StorageView) -> Result<(), OperationError> {
        Enforcer::check_dim(self.dim, src.rank())?;
        let size = src.shape()[self.dim];
        if self.index >= size {
            return Err(IndexError::Bound {
                dim: self.dim,
                start: self.index,
                stop: self.index + 1,
                size,
            })?;
        }
        Ok(())
    }

    fn compute_view(&self, src: &StorageView) -> Result<StorageView, OperationError> {
        let mut shape = src.shape().clone();
        let mut strides = src.strides().clone();
        shape.remove(self.dim);
        let stride = strides.remove(self.dim);
        let offset = if shape.numel() == 0 {
            src.offset()
        } else {
            (src.offset() as isize + self.index as isize * stride) as usize
        };
        Ok(StorageView::new(shape, src.dt(), strides, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, DType, Shape, StridedIndex};
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn view(shape: Shape) -> StorageView {
        StorageView::contiguous(shape, DType::F32)
    }

    fn offsets(view: &StorageView) -> Vec<usize> {
        StridedIndex::new(view.shape(), view.strides(), view.offset()).collect()
    }

    #[test]
    fn slice_row() {
        let src = view(shape![2, 3]);
        let row = Slice::new(0, 1, 2, 1).apply(&src).unwrap();
        assert_eq!(row.shape(), &shape![1, 3]);
        assert_eq!(row.offset(), 3);
        assert_eq!(offsets(&row), vec![3, 4, 5]);
    }

    #[test]
    fn stepped_slice() {
        let src = view(shape![10]);
        let s = Slice::new(0, 1, 8, 3).apply(&src).unwrap();
        assert_eq!(s.shape(), &shape![3]);
        assert_eq!(s.strides().to_vec(), vec![3]);
        assert_eq!(offsets(&s), vec![1, 4, 7]);
    }

    #[test]
    fn empty_slice() {
        let src = view(shape![4, 2]);
        let s = Slice::new(0, 4, 4, 1).apply(&src).unwrap();
        assert_eq!(s.shape(), &shape![0, 2]);
        assert_eq!(s.offset(), 0);
        assert!(offsets(&s).is_empty());
    }

    #[test]
    fn slice_errors() {
        let src = view(shape![2, 3]);
        assert!(matches!(
            Slice::new(2, 0, 1, 1).apply(&src),
            Err(OperationError::IndexError(IndexError::Dim { .. }))
        ));
        assert!(matches!(
            Slice::new(1, 0, 4, 1).apply(&src),
            Err(OperationError::IndexError(IndexError::Bound { .. }))
        ));
        assert!(matches!(
            Slice::new(1, 2, 1, 1).apply(&src),
            Err(OperationError::IndexError(IndexError::Bound { .. }))
        ));
        assert_eq!(
            Slice::new(1, 0, 3, 0).apply(&src),
            Err(OperationError::IndexError(IndexError::Step))
        );
    }

    #[test]
    fn select_drops_dim() {
        let src = view(shape![2, 3, 4]);
        let s = Select::new(1, 2).apply(&src).unwrap();
        assert_eq!(s.shape(), &shape![2, 4]);
        assert_eq!(s.strides().to_vec(), vec![12, 1]);
        assert_eq!(s.offset(), 8);
        assert!(Select::new(1, 3).apply(&src).is_err());
    }

    #[derive(Debug)]
    struct SliceProblem {
        shape: Shape,
        op: Slice,
    }

    impl Arbitrary for SliceProblem {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            prop::collection::vec(1usize..6, 1..4)
                .prop_flat_map(|dims| {
                    let rank = dims.len();
                    (Just(dims), 0..rank)
                })
                .prop_flat_map(|(dims, dim)| {
                    let size = dims[dim];
                    (Just(dims), Just(dim), 0..=size, 1usize..4)
                })
                .prop_flat_map(|(dims, dim, start, step)| {
                    let size = dims[dim];
                    (Just(dims), Just(dim), Just(start), start..=size, Just(step))
                })
                .prop_map(|(dims, dim, start, stop, step)| SliceProblem {
                    shape: dims.into(),
                    op: Slice::new(dim, start, stop, step),
                })
                .boxed()
        }
    }

    #[proptest(cases = 128)]
    fn slice_matches_coordinates(prob: SliceProblem) {
        let SliceProblem { shape, op } = prob;
        let src = view(shape.clone());
        let dst = op.apply(&src).unwrap();
        prop_assert_eq!(dst.shape()[op.dim], op.len());

        // Every element of the slice is the source element at the remapped coordinate.
        let expected = {
            let mut out = vec![];
            for flat in 0..dst.numel() {
                let mut rem = flat;
                let mut coord = vec![0; dst.rank()];
                for d in (0..dst.rank()).rev() {
                    coord[d] = rem % dst.shape()[d];
                    rem /= dst.shape()[d];
                }
                coord[op.dim] = op.start + coord[op.dim] * op.step;
                out.push(src.offset_of(&coord));
            }
            out
        };
        prop_assert_eq!(offsets(&dst), expected);
    }
}

use std::ops::RangeInclusive;

use crate::{DType, Shape, StorageView};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension {dim} out of range for rank {rank}.")]
    Dim { dim: usize, rank: usize },
    #[error("Bounds {start}..{stop} out of range for dimension {dim} of size {size}.")]
    Bound {
        dim: usize,
        start: usize,
        stop: usize,
        size: usize,
    },
    #[error("Step must be positive.")]
    Step,
    #[error("Index {index:?} out of range for shape {shape:?}.")]
    Element { index: Vec<usize>, shape: Shape },
    #[error("View reaches elements {min}..={max} but the buffer holds {capacity}.")]
    OutOfStorage {
        min: isize,
        max: isize,
        capacity: usize,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("Expected exactly one element, got shape {0:?}.")]
    NotScalar(Shape),
    #[error("Cannot view {src:?} ({} elements) as {dst:?} ({} elements).", src.numel(), dst.numel())]
    NumelMismatch { src: Shape, dst: Shape },
    #[error("Dimension {dim} has size {size}, expected 1.")]
    NotSizeOne { dim: usize, size: usize },
    #[error("Cannot infer shape {dims:?} for {numel} elements.")]
    CannotInfer { dims: Vec<isize>, numel: usize },
    #[error("Shape mismatch at dimension {dim}, {a} != {b}.")]
    ConcatMismatch { dim: usize, a: usize, b: usize },
    #[error("Got {actual} elements for shape {shape:?}.")]
    DataLength { shape: Shape, actual: usize },
    #[error("Shape mismatch, expected {expected:?}, got {actual:?}.")]
    Mismatch { expected: Shape, actual: Shape },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantError {
    #[error("Rank mismatch. {accepted:?} != {actual}.")]
    RankMismatch {
        accepted: RangeInclusive<usize>,
        actual: usize,
    },
    #[error("DType mismatch, expected {expected:?}, got {actual:?}.")]
    DTypeMismatch { expected: DType, actual: DType },
    #[error("Unsupported DType {0:?}.")]
    UnsupportedDType(DType),
    #[error("Duplicate dims in permutation.")]
    DuplicateDims,
    #[error("Buffer holds invalid {0:?} values: {1}")]
    InvalidBitPattern(DType, String),
    #[error("Operation requires at least one input.")]
    EmptyInput,
    #[error("Invalid arange: {0}")]
    InvalidArange(String),
    #[error("View {0:?} reaches some elements more than once.")]
    OverlappingView(Shape),
}

/// # Enforcer
///
/// Enforcer enforces common invariants on tensors and views.
pub struct Enforcer;

impl Enforcer {
    pub fn check_dim(dim: usize, rank: usize) -> Result<(), IndexError> {
        if dim >= rank {
            return Err(IndexError::Dim { dim, rank });
        }
        Ok(())
    }

    pub fn check_bounds(
        dim: usize,
        start: usize,
        stop: usize,
        size: usize,
    ) -> Result<(), IndexError> {
        if start > stop || stop > size {
            return Err(IndexError::Bound {
                dim,
                start,
                stop,
                size,
            });
        }
        Ok(())
    }

    pub fn check_index(index: &[usize], shape: &Shape) -> Result<(), IndexError> {
        let in_range = index.len() == shape.rank()
            && index.iter().zip(shape.iter()).all(|(&i, &size)| i < size);
        if !in_range {
            return Err(IndexError::Element {
                index: index.to_vec(),
                shape: shape.clone(),
            });
        }
        Ok(())
    }

    /// Every element reachable through `view` must lie inside a buffer of `capacity` elements.
    pub fn check_extent(view: &StorageView, capacity: usize) -> Result<(), IndexError> {
        let Some((min, max)) = view.extent() else {
            return Ok(());
        };
        if min < 0 || max >= capacity as isize {
            return Err(IndexError::OutOfStorage { min, max, capacity });
        }
        Ok(())
    }

    pub fn check_permutation(dims: &[usize], rank: usize) -> Result<(), InvariantError> {
        if dims.len() != rank {
            return Err(InvariantError::RankMismatch {
                accepted: rank..=rank,
                actual: dims.len(),
            });
        }
        let mut seen = vec![false; rank];
        for &d in dims {
            if d >= rank {
                return Err(InvariantError::RankMismatch {
                    accepted: 0..=rank.saturating_sub(1),
                    actual: d,
                });
            }
            if std::mem::replace(&mut seen[d], true) {
                return Err(InvariantError::DuplicateDims);
            }
        }
        Ok(())
    }

    pub fn assert_equal_ranks(views: &[&StorageView]) -> Result<usize, InvariantError> {
        let first = views.first().ok_or(InvariantError::EmptyInput)?;
        let rank = first.rank();
        for view in views.iter().skip(1) {
            if rank != view.rank() {
                return Err(InvariantError::RankMismatch {
                    accepted: rank..=rank,
                    actual: view.rank(),
                });
            }
        }
        Ok(rank)
    }

    pub fn check_dtype_match(views: &[&StorageView]) -> Result<DType, InvariantError> {
        let first = views.first().ok_or(InvariantError::EmptyInput)?;
        let dtype = first.dt();
        for view in views.iter().skip(1) {
            if dtype != view.dt() {
                return Err(InvariantError::DTypeMismatch {
                    expected: dtype,
                    actual: view.dt(),
                });
            }
        }
        Ok(dtype)
    }

    /// All shapes must agree everywhere except `dim`.
    pub fn match_shapes_except(views: &[&StorageView], dim: usize) -> Result<(), ShapeError> {
        let Some(first) = views.first() else {
            return Ok(());
        };
        for view in views.iter().skip(1) {
            for (d, (&a, &b)) in first.shape().iter().zip(view.shape().iter()).enumerate() {
                if d != dim && a != b {
                    return Err(ShapeError::ConcatMismatch { dim: d, a, b });
                }
            }
        }
        Ok(())
    }
}

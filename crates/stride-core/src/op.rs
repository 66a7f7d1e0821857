use crate::{IndexError, InvariantError, Shape, ShapeError, StorageView, Strides};
use std::fmt::Debug;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    IndexError(#[from] IndexError),
    #[error(transparent)]
    ShapeError(#[from] ShapeError),
    #[error("Cannot view {shape:?} with strides {strides:?} as {requested:?} without a copy, use reshape_copy.")]
    NotContiguousError {
        shape: Shape,
        strides: Strides,
        requested: Shape,
    },
    #[error(transparent)]
    InvariantError(#[from] InvariantError),
}

/// # Operation
///
/// A view operation: derives the geometry of a new view from the geometry of its source.
///
/// Operations never touch element data, so the result always aliases the source buffer.
pub trait Operation: Debug + 'static {
    fn name(&self) -> &'static str;

    /// # Check Invariants
    ///
    /// Validates the operation against the source view.
    fn check_invariants(&self, src: &StorageView) -> Result<(), OperationError>;

    /// # Compute View
    ///
    /// Determine the shape, strides & offset of the resultant view.
    fn compute_view(&self, src: &StorageView) -> Result<StorageView, OperationError>;

    fn apply(&self, src: &StorageView) -> Result<StorageView, OperationError> {
        self.check_invariants(src)?;
        let view = self.compute_view(src)?;
        log::trace!(
            "{}: {:?}/{:?}+{} -> {:?}/{:?}+{}",
            self.name(),
            src.shape(),
            src.strides(),
            src.offset(),
            view.shape(),
            view.strides(),
            view.offset()
        );
        Ok(view)
    }
}

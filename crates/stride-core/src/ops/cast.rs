use derive_new::new;

use crate::{DType, StorageView};

/// Converts every element to `dst_dt` with `as` semantics, always into a new buffer.
#[derive(new, Debug, Clone)]
pub struct Cast {
    dst_dt: DType,
}

impl Cast {
    pub fn dst_dt(&self) -> DType {
        self.dst_dt
    }

    /// The result is contiguous in the source's logical order.
    pub fn compute_view(&self, src: &StorageView) -> StorageView {
        StorageView::contiguous(src.shape().clone(), self.dst_dt)
    }
}

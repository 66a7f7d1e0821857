mod permute;
mod slice;

pub use permute::{Permute, Transpose};
pub use slice::{Select, Slice};

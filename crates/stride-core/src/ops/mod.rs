mod as_strided;
mod cast;
mod concat;
mod reindex;
mod squeeze;
mod view;

pub use as_strided::AsStrided;
pub use cast::Cast;
pub use concat::Concat;
pub use reindex::*;
pub use squeeze::{Squeeze, Unsqueeze};
pub use view::Reshape;

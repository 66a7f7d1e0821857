mod cpu;
mod device;
mod dtype;
mod enforcer;
#[cfg(feature = "interop")]
mod ndarray_ext;
mod nested;
#[cfg(feature = "interop")]
mod npy;
mod op;
mod ops;
mod runtime;
mod shape;
mod storage;
mod strides;
mod tensor;
mod tensor_id;

pub use device::*;
pub use dtype::*;
pub use enforcer::*;
pub use nested::*;
pub use op::*;
pub use ops::*;
pub use runtime::*;
pub use shape::*;
pub use storage::*;
pub use strides::*;
pub use tensor::*;
pub use tensor_id::*;

use smallvec::SmallVec;
pub type RVec<T> = SmallVec<[T; 4]>;

//https://github.com/sonos/tract/blob/main/data/src/macros.rs#L2
#[macro_export]
macro_rules! rvec {
    (@one $x:expr) => (1usize);
    ($elem:expr; $n:expr) => ({
        $crate::RVec::from_elem($elem, $n)
    });
    ($($x:expr),*$(,)*) => ({
        let count = 0usize $(+ rvec![@one $x])*;
        #[allow(unused_mut)]
        let mut vec = $crate::RVec::new();
        if count <= vec.inline_size() {
            $(vec.push($x);)*
            vec
        } else {
            $crate::RVec::from_vec(vec![$($x,)*])
        }
    });
}

#[macro_export]
macro_rules! shape {
    ($($x:expr),*$(,)*) => ({
        use $crate::rvec;
        $crate::Shape::new(rvec![$($x,)*])
    });
}

pub mod prelude {
    pub use crate::{
        rvec, shape, DType, Device, DeviceRequest, FillPolicy, Runtime, RuntimeConfig, Scalar,
        Tensor,
    };
}

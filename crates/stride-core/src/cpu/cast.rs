use super::{gather, CPUOperation};
use crate::{dtype::with_dtype, CPUBuffer, Cast, OperationError, StorageView, TensorDType};

fn convert<S: TensorDType, D: TensorDType>(src: Vec<S>) -> Vec<D> {
    src.into_iter()
        .map(|x| D::from_scalar(x.to_scalar()))
        .collect()
}

impl CPUOperation for Cast {
    fn apply_cpu(&self, srcs: &[(&CPUBuffer, &StorageView)]) -> Result<CPUBuffer, OperationError> {
        let (buffer, view) = srcs[0];
        log::debug!("Cast {:?} -> {:?} ({} elements)", view.dt(), self.dst_dt(), view.numel());
        let result = with_dtype!(view.dt(), S => {
            let src = gather::<S>(buffer, view)?;
            with_dtype!(self.dst_dt(), D => CPUBuffer::from_vec(convert::<S, D>(src)))
        });
        Ok(result)
    }
}

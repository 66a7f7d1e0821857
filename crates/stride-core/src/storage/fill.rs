use crate::{AllocationError, Scalar, TensorDType};
use serde::{Deserialize, Serialize};

#[cfg(feature = "rand")]
use {
    rand::{rngs::StdRng, SeedableRng},
    rand_distr::{Distribution as _, Normal, Uniform},
};

/// Distribution sampled by [FillPolicy::Random].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    Normal { mean: f64, std: f64 },
    Uniform { low: f64, high: f64 },
}

impl Distribution {
    pub const STANDARD_NORMAL: Self = Distribution::Normal {
        mean: 0.0,
        std: 1.0,
    };

    pub const UNIT_UNIFORM: Self = Distribution::Uniform {
        low: 0.0,
        high: 1.0,
    };
}

/// How a freshly allocated buffer is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FillPolicy {
    /// Contents are unspecified. Memory is still zeroed so reads stay defined.
    Empty,
    #[default]
    Zeros,
    Ones,
    Full(Scalar),
    #[cfg(feature = "rand")]
    Random {
        distribution: Distribution,
        seed: Option<u64>,
    },
}

impl FillPolicy {
    /// Element values for `numel` elements, or `None` when zeroed memory suffices.
    pub(crate) fn materialize<T: TensorDType>(
        &self,
        numel: usize,
    ) -> Result<Option<Vec<T>>, AllocationError> {
        match *self {
            FillPolicy::Empty | FillPolicy::Zeros => Ok(None),
            FillPolicy::Ones => Ok(Some(vec![T::one(); numel])),
            FillPolicy::Full(value) => Ok(Some(vec![T::from_scalar(value); numel])),
            #[cfg(feature = "rand")]
            FillPolicy::Random { distribution, seed } => {
                sample::<T>(distribution, seed, numel).map(Some)
            }
        }
    }
}

#[cfg(feature = "rand")]
fn sample<T: TensorDType>(
    distribution: Distribution,
    seed: Option<u64>,
    numel: usize,
) -> Result<Vec<T>, AllocationError> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let convert = |x: f64| T::from_scalar(Scalar::Float(x));
    match distribution {
        Distribution::Normal { mean, std } => {
            if !(mean.is_finite() && std.is_finite() && std >= 0.0) {
                return Err(AllocationError::InvalidDistribution(format!(
                    "normal needs a finite mean and a finite, non-negative std, got N({}, {})",
                    mean, std
                )));
            }
            let normal = Normal::new(mean, std)
                .map_err(|e| AllocationError::InvalidDistribution(e.to_string()))?;
            Ok((0..numel)
                .map(|_| convert(normal.sample(&mut rng)))
                .collect())
        }
        Distribution::Uniform { low, high } => {
            if !(low.is_finite() && high.is_finite()) {
                return Err(AllocationError::InvalidDistribution(format!(
                    "uniform bounds [{}, {}) must be finite",
                    low, high
                )));
            }
            if !(low < high) {
                return Err(AllocationError::InvalidDistribution(format!(
                    "uniform range [{}, {}) is empty",
                    low, high
                )));
            }
            let uniform = Uniform::new(low, high);
            Ok((0..numel)
                .map(|_| convert(uniform.sample(&mut rng)))
                .collect())
        }
    }
}

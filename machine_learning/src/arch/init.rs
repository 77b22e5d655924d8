use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::{MlErr, Result};

/// Samples `fan_in * fan_out` weights from the Xavier uniform distribution
/// `U(-sqrt(6 / (fan_in + fan_out)), sqrt(6 / (fan_in + fan_out)))`.
///
/// # Arguments
/// * `rng` - A random number generator.
/// * `fan_in` - The number of input units in the weight tensor.
/// * `fan_out` - The number of output units in the weight tensor.
///
/// # Returns
/// The sampled weights, or an error if both fans are zero.
pub fn xavier_uniform<R>(rng: &mut R, fan_in: usize, fan_out: usize) -> Result<Vec<f32>>
where
    R: Rng + ?Sized,
{
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    let dist = Uniform::new(-limit, limit)
        .map_err(|e| MlErr::InvalidConfig(format!("xavier range for {fan_in}x{fan_out}: {e}")))?;

    Ok(dist.sample_iter(rng).take(fan_in * fan_out).collect())
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn samples_within_the_xavier_limit() {
        let mut rng = StdRng::seed_from_u64(0);
        let weights = xavier_uniform(&mut rng, 4, 2).unwrap();

        assert_eq!(weights.len(), 8);
        assert!(weights.iter().all(|w| w.abs() <= 1.0));
    }

    #[test]
    fn same_seed_same_weights() {
        let a = xavier_uniform(&mut StdRng::seed_from_u64(7), 3, 5).unwrap();
        let b = xavier_uniform(&mut StdRng::seed_from_u64(7), 3, 5).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn empty_layer_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(xavier_uniform(&mut rng, 0, 0).is_err());
    }
}

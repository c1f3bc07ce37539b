use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Seeded generator when `seed` is given, otherwise seeded from the thread rng.
pub(crate) fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

/// Standard normal sample via Box-Muller.
pub(crate) fn gaussian<R: rand::Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let mut first = seeded_rng(Some(7));
        let mut second = seeded_rng(Some(7));
        let a: Vec<u32> = (0..4).map(|_| first.random()).collect();
        let b: Vec<u32> = (0..4).map(|_| second.random()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_gaussian_moments() {
        let mut rng = seeded_rng(Some(42));
        let samples: Vec<f64> = (0..20_000).map(|_| gaussian(&mut rng)).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.05);
    }
}

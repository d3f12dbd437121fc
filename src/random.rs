//! Seedable sources of isotropic probe vectors.
//!
//! Every randomized estimator draws its probes through an [`IsotropicSource`],
//! an owned generator handle passed explicitly to whoever needs it. There is
//! no process-wide random state: parallel workers obtain independent
//! sub-streams through [`derive_seed`].
//!
//! All supported distributions are zero-mean with `E[v v^T] = I`, so the
//! estimators built on them are unbiased.

use crate::{
    error::{ErrorKind, SpectralError},
    scalar::Scalar,
};
use faer::Mat;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use std::{fmt, str::FromStr};

/// Named distribution of the probe vector entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Distribution {
    /// Independent `+1` / `-1` entries with equal probability.
    #[default]
    Rademacher,
    /// Independent standard normal entries.
    Normal,
    /// Uniform on the sphere of radius `sqrt(n)`.
    Sphere,
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Distribution::Rademacher => "rademacher",
            Distribution::Normal => "normal",
            Distribution::Sphere => "sphere",
        };
        f.write_str(name)
    }
}

impl FromStr for Distribution {
    type Err = SpectralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rademacher" | "signs" => Ok(Distribution::Rademacher),
            "normal" | "gaussian" => Ok(Distribution::Normal),
            "sphere" | "spherical" => Ok(Distribution::Sphere),
            other => Err(ErrorKind::InvalidConfiguration(format!(
                "unknown distribution '{other}', expected one of rademacher, normal, sphere"
            ))
            .into()),
        }
    }
}

/// Derives the seed of the `index`-th sub-stream from a base seed.
///
/// Uses the SplitMix64 finalizer, so nearby indices give uncorrelated seeds.
pub fn derive_seed(base: u64, index: u64) -> u64 {
    let mut z = base.wrapping_add(index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Draws a fresh base seed from the operating system.
pub fn random_seed() -> u64 {
    rand::random::<u64>()
}

/// An owned, seedable generator of isotropic random vectors.
#[derive(Clone, Debug)]
pub struct IsotropicSource {
    rng: StdRng,
    distribution: Distribution,
}

impl IsotropicSource {
    /// Creates a source for `distribution`.
    ///
    /// With `Some(seed)` the sequence of draws is reproducible. With `None`
    /// the generator is seeded from the operating system and every source
    /// produces a distinct sequence.
    pub fn new(distribution: Distribution, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng, distribution }
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    /// Draws one probe vector as an `n x 1` column.
    pub fn draw<T: Scalar>(&mut self, n: usize) -> Mat<T> {
        self.draw_matrix(n, 1)
    }

    /// Draws an `n x m` sketch whose columns are independent probes.
    pub fn draw_matrix<T: Scalar>(&mut self, n: usize, m: usize) -> Mat<T> {
        let mut out = Mat::<T>::zeros(n, m);
        let mut column = vec![0.0f64; n];
        for j in 0..m {
            self.fill(&mut column);
            for (i, &value) in column.iter().enumerate() {
                out[(i, j)] = T::cast(value);
            }
        }
        out
    }

    // Entries are generated in f64 so both precisions see the same stream.
    fn fill(&mut self, column: &mut [f64]) {
        match self.distribution {
            Distribution::Rademacher => {
                for value in column.iter_mut() {
                    *value = if self.rng.random_bool(0.5) { 1.0 } else { -1.0 };
                }
            }
            Distribution::Normal => {
                for value in column.iter_mut() {
                    *value = self.rng.sample(StandardNormal);
                }
            }
            Distribution::Sphere => {
                for value in column.iter_mut() {
                    *value = self.rng.sample(StandardNormal);
                }
                let norm = column.iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    let scale = (column.len() as f64).sqrt() / norm;
                    column.iter_mut().for_each(|v| *v *= scale);
                }
            }
        }
    }
}

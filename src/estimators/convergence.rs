//! Stopping rules for the Monte-Carlo estimators.
//!
//! A [`ConvergenceCriterion`] is fed one per-sample estimate after every probe
//! and decides whether sampling may stop. Samples are the unnormalized probe
//! contributions (`v^T A v` for a trace, `v ⊙ A v` for a diagonal), which are
//! i.i.d. and unbiased, so their running mean and variance give an honest
//! confidence interval.

use crate::{
    error::{ErrorKind, SpectralError},
    scalar::Scalar,
};
use faer::MatRef;
use std::{fmt, str::FromStr};

/// Decides when an estimator has seen enough samples.
pub trait ConvergenceCriterion<T: Scalar>: Send {
    /// Records one sample; `sample` is a `len x 1` column.
    fn update(&mut self, sample: MatRef<'_, T>);

    /// Returns `true` once the stopping rule is satisfied.
    fn converged(&self) -> bool;

    /// Number of samples recorded so far.
    fn count(&self) -> usize;
}

/// Stops after a fixed number of samples.
#[derive(Debug, Clone)]
pub struct CountCriterion {
    maxiter: usize,
    count: usize,
}

impl CountCriterion {
    pub fn new(maxiter: usize) -> Self {
        Self { maxiter, count: 0 }
    }
}

impl<T: Scalar> ConvergenceCriterion<T> for CountCriterion {
    fn update(&mut self, _sample: MatRef<'_, T>) {
        self.count += 1;
    }

    fn converged(&self) -> bool {
        self.count >= self.maxiter
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// Stops when the confidence interval of every entry is narrow enough.
///
/// For each entry the half-width `z * s / sqrt(count)` of the normal
/// confidence interval must satisfy `half_width <= atol + rtol * |mean|`.
/// Running moments use Welford's single-pass update, in `f64`.
#[derive(Debug, Clone)]
pub struct ConfidenceCriterion {
    z: f64,
    atol: f64,
    rtol: f64,
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl ConfidenceCriterion {
    /// Creates a criterion for estimates with `len` entries.
    ///
    /// `confidence` must lie in `(0, 1)`; `atol` and `rtol` must be non-negative.
    pub fn new(len: usize, confidence: f64, atol: f64, rtol: f64) -> Result<Self, SpectralError> {
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(ErrorKind::InvalidConfiguration(format!(
                "confidence level must lie in (0, 1), got {confidence}"
            ))
            .into());
        }
        if !(atol >= 0.0) || !(rtol >= 0.0) {
            return Err(ErrorKind::InvalidConfiguration(format!(
                "tolerances must be non-negative, got atol = {atol}, rtol = {rtol}"
            ))
            .into());
        }
        Ok(Self {
            z: normal_quantile(0.5 + confidence / 2.0),
            atol,
            rtol,
            count: 0,
            mean: vec![0.0; len],
            m2: vec![0.0; len],
        })
    }

    /// The largest confidence-interval half-width over all entries.
    pub fn half_width(&self) -> f64 {
        if self.count < 2 {
            return f64::INFINITY;
        }
        let count = self.count as f64;
        self.m2
            .iter()
            .map(|m2| self.z * (m2 / (count - 1.0) / count).sqrt())
            .fold(0.0, f64::max)
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }
}

impl<T: Scalar> ConvergenceCriterion<T> for ConfidenceCriterion {
    fn update(&mut self, sample: MatRef<'_, T>) {
        self.count += 1;
        let count = self.count as f64;
        for (i, (mean, m2)) in self.mean.iter_mut().zip(self.m2.iter_mut()).enumerate() {
            let value = sample[(i, 0)].widen();
            let delta = value - *mean;
            *mean += delta / count;
            *m2 += delta * (value - *mean);
        }
    }

    fn converged(&self) -> bool {
        if self.count < 2 {
            return false;
        }
        let count = self.count as f64;
        self.mean.iter().zip(&self.m2).all(|(mean, m2)| {
            let half_width = self.z * (m2 / (count - 1.0) / count).sqrt();
            half_width <= self.atol + self.rtol * mean.abs()
        })
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// Named stopping policy, turned into a [`ConvergenceCriterion`] per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvergenceMode {
    /// Always draw `maxiter` samples.
    Count,
    /// Stop once the confidence interval is within `atol + rtol * |estimate|`.
    Confidence { confidence: f64, atol: f64, rtol: f64 },
}

impl Default for ConvergenceMode {
    fn default() -> Self {
        ConvergenceMode::Confidence {
            confidence: 0.95,
            atol: 0.0,
            rtol: 0.01,
        }
    }
}

impl ConvergenceMode {
    /// Builds the criterion for an estimate of `len` entries and a budget of `maxiter`.
    pub fn criterion<T: Scalar>(
        &self,
        len: usize,
        maxiter: usize,
    ) -> Result<Box<dyn ConvergenceCriterion<T>>, SpectralError> {
        Ok(match *self {
            ConvergenceMode::Count => Box::new(CountCriterion::new(maxiter)),
            ConvergenceMode::Confidence {
                confidence,
                atol,
                rtol,
            } => Box::new(ConfidenceCriterion::new(len, confidence, atol, rtol)?),
        })
    }
}

impl fmt::Display for ConvergenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceMode::Count => f.write_str("count"),
            ConvergenceMode::Confidence { .. } => f.write_str("confidence"),
        }
    }
}

impl FromStr for ConvergenceMode {
    type Err = SpectralError;

    /// Parses a mode name; `confidence` uses the default level and tolerances.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" | "fixed" => Ok(ConvergenceMode::Count),
            "confidence" | "tolerance" => Ok(ConvergenceMode::default()),
            other => Err(ErrorKind::InvalidConfiguration(format!(
                "unknown convergence mode '{other}', expected 'count' or 'confidence'"
            ))
            .into()),
        }
    }
}

/// Inverse of the standard normal CDF (Acklam's rational approximation,
/// relative error below `1.2e-9`).
pub(crate) fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p <= 0.0 {
        f64::NEG_INFINITY
    } else if p >= 1.0 {
        f64::INFINITY
    } else if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use faer::Mat;

    #[test]
    fn test_normal_quantile() {
        assert_relative_eq!(normal_quantile(0.975), 1.959963984540054, epsilon = 1e-8);
        assert_relative_eq!(normal_quantile(0.5), 0.0, epsilon = 1e-12);
        assert_relative_eq!(normal_quantile(0.01), -2.326347874040841, epsilon = 1e-8);
    }

    #[test]
    fn test_count_criterion() {
        let mut criterion = CountCriterion::new(3);
        let sample = Mat::<f64>::zeros(1, 1);
        for _ in 0..2 {
            ConvergenceCriterion::<f64>::update(&mut criterion, sample.as_ref());
        }
        assert!(!ConvergenceCriterion::<f64>::converged(&criterion));
        ConvergenceCriterion::<f64>::update(&mut criterion, sample.as_ref());
        assert!(ConvergenceCriterion::<f64>::converged(&criterion));
        assert_eq!(ConvergenceCriterion::<f64>::count(&criterion), 3);
    }

    #[test]
    fn test_confidence_criterion_welford_moments() {
        let mut criterion = ConfidenceCriterion::new(2, 0.95, 0.0, 0.1).unwrap();
        for value in [1.0, 2.0, 3.0, 4.0] {
            let sample = Mat::from_fn(2, 1, |i, _| if i == 0 { value } else { 10.0 });
            ConvergenceCriterion::<f64>::update(&mut criterion, sample.as_ref());
        }
        assert_eq!(criterion.mean(), &[2.5, 10.0]);
        // Sample variance of 1..4 is 5/3.
        let expected = normal_quantile(0.975) * (5.0f64 / 3.0 / 4.0).sqrt();
        assert_relative_eq!(criterion.half_width(), expected, epsilon = 1e-12);
        assert!(!ConvergenceCriterion::<f64>::converged(&criterion));
    }

    #[test]
    fn test_confidence_criterion_converges_on_constant_samples() {
        let mut criterion = ConfidenceCriterion::new(1, 0.99, 0.0, 1e-3).unwrap();
        let sample = Mat::from_fn(1, 1, |_, _| 4.0f32);
        ConvergenceCriterion::<f32>::update(&mut criterion, sample.as_ref());
        assert!(!ConvergenceCriterion::<f32>::converged(&criterion));
        ConvergenceCriterion::<f32>::update(&mut criterion, sample.as_ref());
        assert!(ConvergenceCriterion::<f32>::converged(&criterion));
    }

    #[test]
    fn test_parse_modes_and_reject_bad_levels() {
        assert_eq!("fixed".parse::<ConvergenceMode>().unwrap(), ConvergenceMode::Count);
        assert_eq!(
            "confidence".parse::<ConvergenceMode>().unwrap(),
            ConvergenceMode::default()
        );
        assert!("bayes".parse::<ConvergenceMode>().is_err());
        let err = ConfidenceCriterion::new(1, 1.5, 0.0, 0.1).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidConfiguration(_)));
    }
}

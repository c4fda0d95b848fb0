use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Noise parameters for one channel's estimator.
///
/// Larger `measurement_noise` relative to `process_noise` smooths harder and
/// follows real stick movement more slowly.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub process_noise: f32,
    pub measurement_noise: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.1,
            measurement_noise: 10.,
        }
    }
}

/// Scalar Kalman estimator for a slowly varying signal.
#[derive(Clone, Copy, Debug)]
pub struct KalmanFilter<T = f32> {
    estimate: T,
    error_covariance: T,
    process_noise: T,
    measurement_noise: T,
}

impl<T: Float> KalmanFilter<T> {
    pub fn new(process_noise: T, measurement_noise: T) -> Self {
        Self {
            estimate: T::zero(),
            error_covariance: T::one(),
            process_noise,
            measurement_noise,
        }
    }

    /// Fold one measurement into the estimate and return the new estimate.
    pub fn update(&mut self, measurement: T) -> T {
        // Predict
        self.error_covariance = self.error_covariance + self.process_noise;

        // Correct
        let gain = self.error_covariance / (self.error_covariance + self.measurement_noise);
        self.estimate = self.estimate + gain * (measurement - self.estimate);
        self.error_covariance = (T::one() - gain) * self.error_covariance;

        self.estimate
    }

    pub fn estimate(&self) -> T {
        self.estimate
    }

    pub fn error_covariance(&self) -> T {
        self.error_covariance
    }

    /// Restart from the initial estimate and covariance.
    pub fn reset(&mut self) {
        self.estimate = T::zero();
        self.error_covariance = T::one();
    }
}

impl From<FilterConfig> for KalmanFilter<f32> {
    fn from(config: FilterConfig) -> Self {
        KalmanFilter::new(config.process_noise, config.measurement_noise)
    }
}

/// One independent estimator per channel.
pub struct FilterBank {
    filters: Vec<KalmanFilter<f32>>,
}

impl FilterBank {
    /// Use the same noise parameters for every channel.
    pub fn uniform(channel_count: usize, config: FilterConfig) -> Self {
        Self {
            filters: vec![KalmanFilter::from(config); channel_count],
        }
    }

    /// Use one set of noise parameters per channel.
    pub fn with_configs(configs: &[FilterConfig]) -> Self {
        Self {
            filters: configs.iter().copied().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Update every channel in order and write the estimates to `out`.
    ///
    /// `measurements` and `out` must both hold one value per channel.
    pub fn update(&mut self, measurements: &[f32], out: &mut [f32]) {
        for ((filter, measurement), estimate) in
            self.filters.iter_mut().zip(measurements).zip(out.iter_mut())
        {
            *estimate = filter.update(*measurement);
        }
    }

    pub fn estimates(&self) -> impl Iterator<Item = f32> + '_ {
        self.filters.iter().map(KalmanFilter::estimate)
    }

    pub fn reset(&mut self) {
        self.filters.iter_mut().for_each(KalmanFilter::reset);
    }
}

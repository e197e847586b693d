/// Exponentially weighted moving average with cold-start bias correction.
///
/// A larger `alpha` means less smoothing: bumpier but quicker to react.
#[derive(Clone, Copy, Debug)]
pub struct Ewma {
    alpha: f64,
    current: f64,
    weight: f64,
}

impl Ewma {
    /// Bias-corrected estimator: early samples are reported at their true
    /// average instead of being pulled toward zero.
    #[inline]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            current: 0.0,
            weight: 0.0,
        }
    }

    /// Full-weight estimator: starts at zero weighted at 100% and relaxes
    /// toward samples. Used where zero is a meaningful baseline.
    #[inline]
    pub fn full_weight(alpha: f64) -> Self {
        Self {
            alpha,
            current: 0.0,
            weight: 1.0,
        }
    }

    /// Fold a sample into the estimate.
    #[inline]
    pub fn update(&mut self, value: f64) {
        self.current = (1.0 - self.alpha) * self.current + self.alpha * value;
        self.weight = (1.0 - self.alpha) * self.weight + self.alpha;
    }

    /// Current estimate, or zero before any sample has arrived.
    #[inline]
    pub fn get(&self) -> f64 {
        if self.weight == 0.0 {
            return 0.0;
        }
        self.current / self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::Ewma;

    #[test]
    fn first_sample_reported_exactly() {
        let mut est = Ewma::new(0.3);
        est.update(10.0);
        assert!((est.get() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn full_weight_first_sample_is_scaled() {
        let mut est = Ewma::full_weight(0.5);
        est.update(10.0);
        assert!((est.get() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_estimator_reads_zero() {
        assert_eq!(Ewma::new(0.3).get(), 0.0);
        assert_eq!(Ewma::full_weight(0.5).get(), 0.0);
    }

    #[test]
    fn converges_to_repeated_sample() {
        for alpha in [0.05, 0.3, 0.5, 1.0] {
            let mut plain = Ewma::new(alpha);
            let mut full = Ewma::full_weight(alpha);
            for _ in 0..200 {
                plain.update(42.0);
                full.update(42.0);
            }
            assert!((plain.get() - 42.0).abs() < 1e-6, "alpha {alpha}");
            assert!((full.get() - 42.0).abs() < 1e-3, "alpha {alpha}");
        }
    }

    #[test]
    fn bias_corrected_average_of_early_samples() {
        let mut est = Ewma::new(0.3);
        est.update(10.0);
        est.update(20.0);
        // (0.7 * 3 + 6) / (0.7 * 0.3 + 0.3) = 16.15...; must sit between the
        // samples rather than being dragged toward zero.
        let got = est.get();
        assert!(got > 10.0 && got < 20.0, "got {got}");
    }
}

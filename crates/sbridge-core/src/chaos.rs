use rand::Rng;

/// Probability-gated fault injection, applied at the subprocess and REST
/// layers only. A probability of 0 (the default) disables the hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaosPolicy {
    probability: f64,
}

impl ChaosPolicy {
    pub fn new(probability: f64) -> Self {
        Self { probability: probability.clamp(0.0, 1.0) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// True when this call should fail with an injected error.
    pub fn should_trip(&self) -> bool {
        self.probability > 0.0 && rand::thread_rng().gen::<f64>() < self.probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_probability_never_trips() {
        let policy = ChaosPolicy::disabled();
        assert!((0..1000).all(|_| !policy.should_trip()));
    }

    #[test]
    fn full_probability_always_trips() {
        let policy = ChaosPolicy::new(1.0);
        assert!((0..1000).all(|_| policy.should_trip()));
    }

    #[test]
    fn probability_is_clamped() {
        assert!(!ChaosPolicy::new(-3.0).should_trip());
        assert!(ChaosPolicy::new(7.0).should_trip());
    }
}

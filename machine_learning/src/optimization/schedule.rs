use crate::{MlErr, Result};

/// The hyperparameters of a training run's optimization schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleParams {
    pub base_lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub warmup_steps: usize,
    pub warmup_start_lr: f64,
    pub max_steps: usize,
    pub power: f64,
}

impl ScheduleParams {
    /// Checks that the parameters describe a usable schedule.
    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: String| Err(MlErr::InvalidConfig(detail));

        if !(self.base_lr.is_finite() && self.base_lr > 0.0) {
            return invalid(format!("base_lr must be positive, got {}", self.base_lr));
        }

        if !(self.warmup_start_lr.is_finite() && self.warmup_start_lr >= 0.0) {
            return invalid(format!(
                "warmup_start_lr must be non-negative, got {}",
                self.warmup_start_lr
            ));
        }

        if !(0.0..1.0).contains(&self.momentum) {
            return invalid(format!("momentum must be in [0, 1), got {}", self.momentum));
        }

        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return invalid(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            ));
        }

        if !(self.power.is_finite() && self.power > 0.0) {
            return invalid(format!("power must be positive, got {}", self.power));
        }

        if self.max_steps == 0 {
            return invalid("max_steps must be positive".into());
        }

        if self.warmup_steps >= self.max_steps {
            return invalid(format!(
                "warmup_steps ({}) must be smaller than max_steps ({})",
                self.warmup_steps, self.max_steps
            ));
        }

        Ok(())
    }
}

/// A learning rate as a pure function of the step index.
pub trait LrScheduler {
    fn lr(&self, step: usize) -> f64;
}

/// Linear warm-up from `warmup_start_lr` to `base_lr`, then polynomial decay towards zero at
/// `max_steps`.
#[derive(Debug, Clone, Copy)]
pub struct WarmupPolyLr {
    params: ScheduleParams,
}

impl WarmupPolyLr {
    /// Creates a new `WarmupPolyLr`.
    ///
    /// # Returns
    /// An error if the parameters are invalid.
    pub fn new(params: ScheduleParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ScheduleParams {
        &self.params
    }

    pub fn momentum(&self) -> f64 {
        self.params.momentum
    }

    pub fn weight_decay(&self) -> f64 {
        self.params.weight_decay
    }
}

impl LrScheduler for WarmupPolyLr {
    fn lr(&self, step: usize) -> f64 {
        let ScheduleParams {
            base_lr,
            warmup_steps,
            warmup_start_lr,
            max_steps,
            power,
            ..
        } = self.params;

        if step < warmup_steps {
            let ratio = step as f64 / warmup_steps as f64;
            return warmup_start_lr + (base_lr - warmup_start_lr) * ratio;
        }

        let progress = (step - warmup_steps) as f64 / (max_steps - warmup_steps) as f64;
        base_lr * (1.0 - progress.min(1.0)).powf(power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ScheduleParams {
        ScheduleParams {
            base_lr: 1e-2,
            momentum: 0.9,
            weight_decay: 5e-4,
            warmup_steps: 1000,
            warmup_start_lr: 5e-6,
            max_steps: 41000,
            power: 0.9,
        }
    }

    fn scheduler() -> WarmupPolyLr {
        WarmupPolyLr::new(params()).unwrap()
    }

    #[test]
    fn reference_values() {
        let s = scheduler();

        assert_eq!(s.lr(0), 5e-6);
        assert!((s.lr(500) - 5.0025e-3).abs() < 1e-12);
        assert_eq!(s.lr(1000), 1e-2);

        let last = s.lr(40999);
        assert!(last > 0.0 && last < 1e-5);
    }

    #[test]
    fn warmup_stays_between_start_and_base() {
        let s = scheduler();

        for step in 1..1000 {
            let lr = s.lr(step);
            assert!(lr > 5e-6 && lr < 1e-2, "lr({step}) = {lr}");
        }
    }

    #[test]
    fn decay_is_non_increasing() {
        let s = scheduler();
        let mut prev = s.lr(1000);

        for step in 1001..41000 {
            let lr = s.lr(step);
            assert!(lr <= prev, "lr({step}) = {lr} > {prev}");
            prev = lr;
        }
    }

    #[test]
    fn same_step_same_lr() {
        let s = scheduler();
        assert_eq!(s.lr(12345).to_bits(), s.lr(12345).to_bits());
    }

    #[test]
    fn no_warmup_starts_at_base() {
        let s = WarmupPolyLr::new(ScheduleParams {
            warmup_steps: 0,
            ..params()
        })
        .unwrap();

        assert_eq!(s.lr(0), 1e-2);
    }

    #[test]
    fn past_the_budget_stays_at_zero() {
        assert_eq!(scheduler().lr(50000), 0.0);
    }

    #[test]
    fn invalid_params_are_rejected() {
        let warmup_too_long = ScheduleParams {
            warmup_steps: 41000,
            ..params()
        };
        let negative_lr = ScheduleParams {
            base_lr: -1.0,
            ..params()
        };

        assert!(WarmupPolyLr::new(warmup_too_long).is_err());
        assert!(WarmupPolyLr::new(negative_lr).is_err());
    }
}

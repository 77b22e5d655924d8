use std::{
    fmt::{self, Display},
    time::{Duration, Instant},
};

/// One throttled progress record.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Completed steps.
    pub step: usize,
    pub max_steps: usize,
    pub lr: f64,
    /// Mean loss since the previous report.
    pub loss: f32,
    /// Time since the previous report.
    pub interval: Duration,
    pub elapsed: Duration,
    pub eta: Duration,
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "it: {}/{}, lr: {:.6}, loss: {:.4}, eta: {}, time: {:.4}",
            self.step,
            self.max_steps,
            self.lr,
            self.loss,
            hms(self.eta),
            self.interval.as_secs_f64()
        )
    }
}

/// Formats a duration as `H:MM:SS`, truncating to whole seconds.
pub fn hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Accumulates per-step losses and produces a report every `interval` completed steps.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    max_steps: usize,
    interval: usize,
    completed: usize,
    loss_window: Vec<f32>,
    started: Instant,
    last_report: Instant,
}

impl ProgressMonitor {
    /// Creates a new `ProgressMonitor`.
    ///
    /// # Arguments
    /// * `max_steps` - The step budget.
    /// * `interval` - The amount of steps between reports, at least one.
    /// * `now` - The loop's start time.
    pub fn new(max_steps: usize, interval: usize, now: Instant) -> Self {
        Self {
            max_steps,
            interval: interval.max(1),
            completed: 0,
            loss_window: Vec::with_capacity(interval),
            started: now,
            last_report: now,
        }
    }

    #[inline]
    pub fn completed(&self) -> usize {
        self.completed
    }

    #[inline]
    pub fn window(&self) -> &[f32] {
        &self.loss_window
    }

    /// Records a completed step.
    ///
    /// # Arguments
    /// * `loss` - The step's loss.
    /// * `lr` - The learning rate the step used.
    /// * `now` - The time the step completed.
    ///
    /// # Returns
    /// A report if this step closes an interval.
    pub fn record(&mut self, loss: f32, lr: f64, now: Instant) -> Option<Report> {
        self.completed += 1;
        self.loss_window.push(loss);

        if self.completed % self.interval != 0 {
            return None;
        }

        let loss = self.loss_window.iter().sum::<f32>() / self.loss_window.len() as f32;
        self.loss_window.clear();

        let interval = now.saturating_duration_since(self.last_report);
        let elapsed = now.saturating_duration_since(self.started);
        self.last_report = now;

        let remaining = self.max_steps.saturating_sub(self.completed);
        let eta = elapsed.mul_f64(remaining as f64 / self.completed as f64);

        Some(Report {
            step: self.completed,
            max_steps: self.max_steps,
            lr,
            loss,
            interval,
            elapsed,
            eta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_the_mean_and_clears_the_window() {
        let t0 = Instant::now();
        let mut monitor = ProgressMonitor::new(100, 3, t0);

        assert!(monitor.record(0.4, 0.1, t0).is_none());
        assert!(monitor.record(0.6, 0.1, t0).is_none());
        let report = monitor.record(0.5, 0.1, t0).unwrap();

        assert!((report.loss - 0.5).abs() < 1e-6);
        assert!(monitor.window().is_empty());
    }

    #[test]
    fn budget_of_ten_with_interval_five_reports_twice() {
        let t0 = Instant::now();
        let mut monitor = ProgressMonitor::new(10, 5, t0);

        let reports: Vec<_> = (0..10)
            .filter_map(|_| monitor.record(1.0, 0.1, t0))
            .map(|r| r.step)
            .collect();

        assert_eq!(reports, [5, 10]);
    }

    #[test]
    fn eta_extrapolates_the_mean_step_time() {
        let t0 = Instant::now();
        let mut monitor = ProgressMonitor::new(10, 2, t0);

        monitor.record(1.0, 0.1, t0 + Duration::from_secs(1));
        let report = monitor
            .record(1.0, 0.1, t0 + Duration::from_secs(4))
            .unwrap();

        assert_eq!(report.elapsed, Duration::from_secs(4));
        assert_eq!(report.interval, Duration::from_secs(4));
        assert_eq!(report.eta, Duration::from_secs(16));

        assert!(
            monitor
                .record(1.0, 0.1, t0 + Duration::from_secs(5))
                .is_none()
        );
    }

    #[test]
    fn eta_holds_past_u32_step_counts() {
        let t0 = Instant::now();
        let steps = 1usize << 32;
        let mut monitor = ProgressMonitor::new(2 * steps, 1, t0);
        monitor.completed = steps - 1;

        let report = monitor
            .record(1.0, 0.1, t0 + Duration::from_secs(4))
            .unwrap();

        assert_eq!(report.step, steps);
        assert_eq!(report.eta, Duration::from_secs(4));
    }

    #[test]
    fn report_line_format() {
        let report = Report {
            step: 50,
            max_steps: 41000,
            lr: 0.00025,
            loss: 1.23456,
            interval: Duration::from_millis(1500),
            elapsed: Duration::from_secs(30),
            eta: Duration::from_secs(3 * 3600 + 7 * 60 + 5),
        };

        assert_eq!(
            report.to_string(),
            "it: 50/41000, lr: 0.000250, loss: 1.2346, eta: 3:07:05, time: 1.5000"
        );
    }
}

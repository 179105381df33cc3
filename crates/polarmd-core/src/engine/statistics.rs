/// Running totals over the MD steps relaxed by one context.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RelaxStatistics {
    pub steps: u64,
    pub converged_steps: u64,
    pub force_evaluations: u64,
}

impl RelaxStatistics {
    pub(crate) fn record(&mut self, evaluations: usize, converged: bool) {
        self.steps += 1;
        self.force_evaluations += evaluations as u64;
        if converged {
            self.converged_steps += 1;
        }
    }

    /// Mean number of force evaluations per MD step; zero before the first step.
    pub fn average_evaluations(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.force_evaluations as f64 / self.steps as f64
        }
    }

    /// Fraction of MD steps whose relaxation converged.
    pub fn converged_fraction(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.converged_steps as f64 / self.steps as f64
        }
    }
}

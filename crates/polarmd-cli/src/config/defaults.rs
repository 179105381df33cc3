pub struct DefaultsConfig {
    pub steps: u64,
    pub time_step: f64,
    pub force_tolerance: f64,
    pub max_iterations: usize,
    pub predict_shells: bool,
    pub dielectric: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            time_step: 0.001,
            force_tolerance: 1.0,
            max_iterations: 20,
            predict_shells: true,
            dielectric: 1.0,
        }
    }
}

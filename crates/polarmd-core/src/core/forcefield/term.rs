use std::ops::{Add, AddAssign};

/// Potential energy split by interaction group.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnergyTerms {
    /// Core-shell spring energy.
    pub polarization: f64,
    /// Short-range (direct space) electrostatics.
    pub coulomb: f64,
    /// Long-range (mesh) electrostatics.
    pub long_range: f64,
    /// Coupling to external fields.
    pub external: f64,
}

impl EnergyTerms {
    pub fn new(polarization: f64, coulomb: f64, long_range: f64, external: f64) -> Self {
        Self {
            polarization,
            coulomb,
            long_range,
            external,
        }
    }

    #[inline]
    pub fn total(&self) -> f64 {
        self.polarization + self.coulomb + self.long_range + self.external
    }
}

impl Add for EnergyTerms {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            polarization: self.polarization + rhs.polarization,
            coulomb: self.coulomb + rhs.coulomb,
            long_range: self.long_range + rhs.long_range,
            external: self.external + rhs.external,
        }
    }
}

impl AddAssign for EnergyTerms {
    fn add_assign(&mut self, rhs: Self) {
        self.polarization += rhs.polarization;
        self.coulomb += rhs.coulomb;
        self.long_range += rhs.long_range;
        self.external += rhs.external;
    }
}

use super::topology::TopologyError;

/// The largest number of nuclei a shell can be attached to.
pub const MAX_NUCLEI: usize = 3;

/// A polarizable shell attached to one to three nuclei.
///
/// The shell's position is not integrated; it is relaxed every step until the
/// force on it vanishes. `k_1` is the inverse of the shell's spring constant and
/// scales the steepest-descent displacement along the residual force.
#[derive(Debug, Clone, PartialEq)]
pub struct Shell {
    particle: usize,
    nuclei: Vec<usize>,
    k_1: f64,
}

impl Shell {
    /// Creates a shell definition.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::MalformedShell`] when the nucleus count is outside
    /// `1..=3`, and [`TopologyError::InvalidShellScale`] when `k_1` is not a positive,
    /// finite number.
    pub fn new(particle: usize, nuclei: &[usize], k_1: f64) -> Result<Self, TopologyError> {
        if nuclei.is_empty() || nuclei.len() > MAX_NUCLEI {
            return Err(TopologyError::MalformedShell {
                shell: particle,
                nuclei: nuclei.len(),
            });
        }
        if !(k_1.is_finite() && k_1 > 0.0) {
            return Err(TopologyError::InvalidShellScale {
                shell: particle,
                k_1,
            });
        }
        Ok(Self {
            particle,
            nuclei: nuclei.to_vec(),
            k_1,
        })
    }

    /// Creates a shell from its spring constant; `k_1 = 1 / force_constant`.
    pub fn from_force_constant(
        particle: usize,
        nuclei: &[usize],
        force_constant: f64,
    ) -> Result<Self, TopologyError> {
        Self::new(particle, nuclei, 1.0 / force_constant)
    }

    #[inline]
    pub fn particle(&self) -> usize {
        self.particle
    }

    #[inline]
    pub fn nuclei(&self) -> &[usize] {
        &self.nuclei
    }

    #[inline]
    pub fn k_1(&self) -> f64 {
        self.k_1
    }
}

use super::particle::{Particle, ParticleKind};
use super::shell::Shell;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Shell {shell} has {nuclei} nuclei; a shell needs between 1 and 3")]
    MalformedShell { shell: usize, nuclei: usize },

    #[error("Shell {shell} has an invalid displacement scale k_1 = {k_1}")]
    InvalidShellScale { shell: usize, k_1: f64 },

    #[error("{what} index {index} is out of range for {count} particles")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("Particle {index} must be of kind {expected:?} but is {found:?}")]
    KindMismatch {
        index: usize,
        expected: ParticleKind,
        found: ParticleKind,
    },

    #[error("Particle {0} is declared as a shell more than once")]
    DuplicateShell(usize),

    #[error("Particle {0} is of kind Shell but has no shell definition")]
    UndefinedShell(usize),

    #[error("Invalid constraint between {i} and {j}: {reason}")]
    InvalidConstraint {
        i: usize,
        j: usize,
        reason: &'static str,
    },

    #[error("Particle {index} has an invalid mass {mass}")]
    InvalidMass { index: usize, mass: f64 },

    #[error("Shell {0} needs exactly one of 'k-1' or 'force-constant'")]
    AmbiguousShellScale(usize),

    #[error("Unknown particle kind '{value}' for particle {index}")]
    UnknownKind { index: usize, value: String },

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },

    #[error("TOML serialization error for '{path}': {source}")]
    TomlWrite {
        path: String,
        source: toml::ser::Error,
    },
}

/// A holonomic distance constraint between two real particles.
///
/// A constraint with zero target length is *flexible*: it fixes the direction of
/// the bond during the dynamics while its length is relaxed along with the shells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub i: usize,
    pub j: usize,
    pub length: f64,
}

impl Constraint {
    pub fn new(i: usize, j: usize, length: f64) -> Self {
        Self { i, j, length }
    }

    pub fn flexible(i: usize, j: usize) -> Self {
        Self { i, j, length: 0.0 }
    }

    #[inline]
    pub fn is_flexible(&self) -> bool {
        self.length == 0.0
    }
}

/// A virtual site placed on the line through two constructing particles:
/// `x_site = (1 - weight) * x_from.0 + weight * x_from.1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualSiteDef {
    pub site: usize,
    pub from: (usize, usize),
    pub weight: f64,
}

/// The static description of a simulated system.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    particles: Vec<Particle>,
    shells: Vec<Shell>,
    constraints: Vec<Constraint>,
    virtual_sites: Vec<VirtualSiteDef>,
}

impl Topology {
    pub fn new(particles: Vec<Particle>) -> Self {
        Self {
            particles,
            ..Default::default()
        }
    }

    pub fn with_shells(mut self, shells: Vec<Shell>) -> Self {
        self.shells = shells;
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_virtual_sites(mut self, virtual_sites: Vec<VirtualSiteDef>) -> Self {
        self.virtual_sites = virtual_sites;
        self
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn shells(&self) -> &[Shell] {
        &self.shells
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn virtual_sites(&self) -> &[VirtualSiteDef] {
        &self.virtual_sites
    }

    pub fn mass(&self, index: usize) -> f64 {
        self.particles[index].mass
    }

    pub fn kind(&self, index: usize) -> ParticleKind {
        self.particles[index].kind
    }

    /// Number of flexible (zero-length) constraints in the whole system.
    pub fn flexible_constraint_count(&self) -> usize {
        self.constraints.iter().filter(|c| c.is_flexible()).count()
    }

    /// Checks the cross-references between particles, shells, constraints and
    /// virtual sites.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let count = self.particles.len();
        let check_index = |what: &'static str, index: usize| {
            if index < count {
                Ok(())
            } else {
                Err(TopologyError::IndexOutOfRange { what, index, count })
            }
        };
        let check_kind = |index: usize, expected: ParticleKind| {
            let found = self.particles[index].kind;
            if found == expected {
                Ok(())
            } else {
                Err(TopologyError::KindMismatch {
                    index,
                    expected,
                    found,
                })
            }
        };

        for (index, particle) in self.particles.iter().enumerate() {
            if !(particle.mass.is_finite() && particle.mass >= 0.0) {
                return Err(TopologyError::InvalidMass {
                    index,
                    mass: particle.mass,
                });
            }
        }

        let mut defined = vec![false; count];
        for shell in &self.shells {
            check_index("Shell", shell.particle())?;
            check_kind(shell.particle(), ParticleKind::Shell)?;
            if defined[shell.particle()] {
                return Err(TopologyError::DuplicateShell(shell.particle()));
            }
            defined[shell.particle()] = true;
            for &nucleus in shell.nuclei() {
                check_index("Nucleus", nucleus)?;
                check_kind(nucleus, ParticleKind::Atom)?;
            }
        }
        if let Some(index) = self
            .particles
            .iter()
            .enumerate()
            .position(|(i, p)| p.kind == ParticleKind::Shell && !defined[i])
        {
            return Err(TopologyError::UndefinedShell(index));
        }

        for c in &self.constraints {
            check_index("Constraint", c.i)?;
            check_index("Constraint", c.j)?;
            if c.i == c.j {
                return Err(TopologyError::InvalidConstraint {
                    i: c.i,
                    j: c.j,
                    reason: "a particle cannot be constrained to itself",
                });
            }
            if !(c.length.is_finite() && c.length >= 0.0) {
                return Err(TopologyError::InvalidConstraint {
                    i: c.i,
                    j: c.j,
                    reason: "target length must be finite and non-negative",
                });
            }
            if !self.particles[c.i].kind.is_real() || !self.particles[c.j].kind.is_real() {
                return Err(TopologyError::InvalidConstraint {
                    i: c.i,
                    j: c.j,
                    reason: "only real atoms can be constrained",
                });
            }
        }

        for vs in &self.virtual_sites {
            check_index("Virtual site", vs.site)?;
            check_kind(vs.site, ParticleKind::VirtualSite)?;
            check_index("Virtual site constructor", vs.from.0)?;
            check_index("Virtual site constructor", vs.from.1)?;
        }

        Ok(())
    }
}

use std::fmt;
use std::str::FromStr;

/// Represents how a particle's position is determined during a simulation step.
///
/// The relaxation engine treats each kind differently: atoms are integrated by the
/// outer dynamics, shells are relaxed by force minimization, and virtual sites are
/// reconstructed from the atoms they are built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ParticleKind {
    /// A real, massive particle integrated by the equations of motion.
    #[default]
    Atom,
    /// A polarizable shell whose position minimizes the force acting on it.
    Shell,
    /// A massless site whose position is a geometric function of other particles.
    VirtualSite,
}

impl ParticleKind {
    /// Returns `true` for particles that carry their own dynamics (not shells or virtual sites).
    #[inline]
    pub fn is_real(self) -> bool {
        matches!(self, ParticleKind::Atom)
    }
}

/// A single particle of the simulated system.
///
/// Particles are indexed by their position in the global particle array; every
/// per-particle buffer in the engine uses the same indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    /// The display name of the particle (e.g., "NA", "NA_S").
    pub name: String,
    /// Mass in atomic mass units. Shells and virtual sites usually carry zero mass.
    pub mass: f64,
    /// Partial charge in elementary charge units.
    pub charge: f64,
    /// How the particle's position is determined.
    pub kind: ParticleKind,
}

impl Particle {
    /// Creates a new `Particle` with zero charge.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the particle.
    /// * `mass` - The particle mass.
    /// * `kind` - The particle kind.
    pub fn new(name: &str, mass: f64, kind: ParticleKind) -> Self {
        Self {
            name: name.to_string(),
            mass,
            charge: 0.0,
            kind,
        }
    }

    /// Returns the same particle with the given charge.
    pub fn with_charge(mut self, charge: f64) -> Self {
        self.charge = charge;
        self
    }
}

impl FromStr for ParticleKind {
    type Err = ();

    /// Parses a particle kind, case-insensitively.
    ///
    /// Accepts the common spellings used in topology files ("atom", "shell",
    /// "virtual-site", "vsite", "dummy").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "atom" | "nucleus" => Ok(ParticleKind::Atom),
            "shell" | "drude" => Ok(ParticleKind::Shell),
            "virtual-site" | "virtual_site" | "vsite" | "dummy" => Ok(ParticleKind::VirtualSite),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ParticleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParticleKind::Atom => "atom",
            ParticleKind::Shell => "shell",
            ParticleKind::VirtualSite => "virtual-site",
        };
        f.write_str(name)
    }
}

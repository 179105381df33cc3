use crate::core::models::particle::{Particle, ParticleKind};
use crate::core::models::pbc::PeriodicBox;
use crate::core::models::shell::Shell;
use crate::core::models::state::MdState;
use crate::core::models::topology::{Constraint, Topology, TopologyError, VirtualSiteDef};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

fn default_kind() -> String {
    ParticleKind::Atom.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ParticleEntry {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub mass: f64,
    #[serde(default)]
    pub charge: f64,
    pub position: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ShellEntry {
    pub particle: usize,
    pub nuclei: Vec<usize>,
    #[serde(rename = "k-1", default, skip_serializing_if = "Option::is_none")]
    pub k_1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_constant: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintEntry {
    pub i: usize,
    pub j: usize,
    /// Zero (the default) declares a flexible constraint.
    #[serde(default)]
    pub length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtualSiteEntry {
    pub site: usize,
    pub from: [usize; 2],
    pub weight: f64,
}

/// On-disk description of a system: particles with their coordinates, shells,
/// constraints, virtual sites, and an optional rectangular box.
///
/// ```toml
/// box = [3.0, 3.0, 3.0]
///
/// [[particles]]
/// name = "NA"
/// mass = 22.99
/// charge = 2.0
/// position = [0.0, 0.0, 0.0]
///
/// [[particles]]
/// name = "NA_S"
/// kind = "shell"
/// charge = -1.0
/// position = [0.0, 0.0, 0.0]
///
/// [[shells]]
/// particle = 1
/// nuclei = [0]
/// force-constant = 4184.0
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct SystemFile {
    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub box_edges: Option<[f64; 3]>,
    #[serde(default)]
    pub particles: Vec<ParticleEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shells: Vec<ShellEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtual_sites: Vec<VirtualSiteEntry>,
}

impl SystemFile {
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let content = std::fs::read_to_string(path).map_err(|e| TopologyError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| TopologyError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), TopologyError> {
        let content = toml::to_string(self).map_err(|e| TopologyError::TomlWrite {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        std::fs::write(path, content).map_err(|e| TopologyError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Builds and validates the topology and the initial state.
    pub fn into_system(self) -> Result<(Topology, MdState), TopologyError> {
        let mut particles = Vec::with_capacity(self.particles.len());
        let mut positions = Vec::with_capacity(self.particles.len());
        let mut velocities = Vec::with_capacity(self.particles.len());
        for (index, entry) in self.particles.into_iter().enumerate() {
            let kind = ParticleKind::from_str(&entry.kind).map_err(|_| {
                TopologyError::UnknownKind {
                    index,
                    value: entry.kind.clone(),
                }
            })?;
            particles.push(Particle::new(&entry.name, entry.mass, kind).with_charge(entry.charge));
            positions.push(Point3::from(entry.position));
            velocities.push(entry.velocity.map_or_else(Vector3::zeros, Vector3::from));
        }

        let shells = self
            .shells
            .into_iter()
            .map(|entry| match (entry.k_1, entry.force_constant) {
                (Some(k_1), None) => Shell::new(entry.particle, &entry.nuclei, k_1),
                (None, Some(k)) => Shell::from_force_constant(entry.particle, &entry.nuclei, k),
                _ => Err(TopologyError::AmbiguousShellScale(entry.particle)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let constraints = self
            .constraints
            .into_iter()
            .map(|c| Constraint::new(c.i, c.j, c.length))
            .collect();

        let virtual_sites = self
            .virtual_sites
            .into_iter()
            .map(|v| VirtualSiteDef {
                site: v.site,
                from: (v.from[0], v.from[1]),
                weight: v.weight,
            })
            .collect();

        let topology = Topology::new(particles)
            .with_shells(shells)
            .with_constraints(constraints)
            .with_virtual_sites(virtual_sites);
        topology.validate()?;

        let pbc = self
            .box_edges
            .map_or(PeriodicBox::None, |[x, y, z]| PeriodicBox::rectangular(x, y, z));
        let state = MdState::new(positions, pbc).with_velocities(velocities);

        debug!(
            particles = topology.particle_count(),
            shells = topology.shells().len(),
            constraints = topology.constraints().len(),
            "System description loaded."
        );
        Ok((topology, state))
    }

    /// Captures a topology and a state, e.g. to write out a relaxed configuration.
    pub fn from_system(topology: &Topology, state: &MdState) -> Self {
        let particles = topology
            .particles()
            .iter()
            .zip(state.positions.iter().zip(state.velocities.iter()))
            .map(|(p, (x, v))| ParticleEntry {
                name: p.name.clone(),
                kind: p.kind.to_string(),
                mass: p.mass,
                charge: p.charge,
                position: [x.x, x.y, x.z],
                velocity: (*v != Vector3::zeros()).then_some([v.x, v.y, v.z]),
            })
            .collect();

        let box_edges = match state.pbc {
            PeriodicBox::None => None,
            PeriodicBox::Rectangular(edges) => Some([edges.x, edges.y, edges.z]),
        };

        Self {
            box_edges,
            particles,
            shells: topology
                .shells()
                .iter()
                .map(|s| ShellEntry {
                    particle: s.particle(),
                    nuclei: s.nuclei().to_vec(),
                    k_1: Some(s.k_1()),
                    force_constant: None,
                })
                .collect(),
            constraints: topology
                .constraints()
                .iter()
                .map(|c| ConstraintEntry {
                    i: c.i,
                    j: c.j,
                    length: c.length,
                })
                .collect(),
            virtual_sites: topology
                .virtual_sites()
                .iter()
                .map(|v| VirtualSiteEntry {
                    site: v.site,
                    from: [v.from.0, v.from.1],
                    weight: v.weight,
                })
                .collect(),
        }
    }
}

/// Loads a system description file into a validated topology and initial state.
pub fn read_system(path: &Path) -> Result<(Topology, MdState), TopologyError> {
    SystemFile::load(path)?.into_system()
}

pub fn write_system(
    path: &Path,
    topology: &Topology,
    state: &MdState,
) -> Result<(), TopologyError> {
    SystemFile::from_system(topology, state).save(path)
}

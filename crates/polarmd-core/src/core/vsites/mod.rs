//! Construction of virtual sites and redistribution of the forces acting on them.

use crate::core::models::pbc::PeriodicBox;
use crate::core::models::topology::{Topology, VirtualSiteDef};
use nalgebra::{Point3, Vector3};

pub trait VirtualSiteBuilder {
    /// Places every virtual site from the current positions of its constructors.
    fn construct(&self, positions: &mut [Point3<f64>], pbc: &PeriodicBox);

    /// Moves the force acting on each virtual site onto its constructors and zeroes
    /// the site's own row.
    fn spread_forces(
        &self,
        positions: &[Point3<f64>],
        forces: &mut [Vector3<f64>],
        pbc: &PeriodicBox,
    );

    /// Particle indices of the virtual sites.
    fn sites(&self) -> Vec<usize>;
}

/// Sites on the line through two particles, `x = x_a + w * (x_b - x_a)`.
///
/// The displacement `x_b - x_a` is taken as a minimum image, so a site is built
/// correctly even when its constructors sit on opposite faces of the box.
#[derive(Debug, Clone, Default)]
pub struct LinearVirtualSites {
    defs: Vec<VirtualSiteDef>,
}

impl LinearVirtualSites {
    pub fn new(defs: Vec<VirtualSiteDef>) -> Self {
        Self { defs }
    }

    pub fn from_topology(topology: &Topology) -> Self {
        Self::new(topology.virtual_sites().to_vec())
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl VirtualSiteBuilder for LinearVirtualSites {
    fn construct(&self, positions: &mut [Point3<f64>], pbc: &PeriodicBox) {
        for def in &self.defs {
            let (a, b) = def.from;
            let d = pbc.dx(&positions[b], &positions[a]);
            positions[def.site] = positions[a] + def.weight * d;
        }
    }

    fn spread_forces(
        &self,
        _positions: &[Point3<f64>],
        forces: &mut [Vector3<f64>],
        _pbc: &PeriodicBox,
    ) {
        // Reverse order so sites built on other sites pass their force down first.
        for def in self.defs.iter().rev() {
            let f = std::mem::replace(&mut forces[def.site], Vector3::zeros());
            forces[def.from.0] += (1.0 - def.weight) * f;
            forces[def.from.1] += def.weight * f;
        }
    }

    fn sites(&self) -> Vec<usize> {
        self.defs.iter().map(|d| d.site).collect()
    }
}

use super::pbc::PeriodicBox;
use nalgebra::{Point3, Vector3};

/// The dynamic state of the system at one MD step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MdState {
    pub positions: Vec<Point3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
    pub pbc: PeriodicBox,
}

impl MdState {
    /// Creates a state at rest.
    pub fn new(positions: Vec<Point3<f64>>, pbc: PeriodicBox) -> Self {
        let velocities = vec![Vector3::zeros(); positions.len()];
        Self {
            positions,
            velocities,
            pbc,
        }
    }

    pub fn with_velocities(mut self, velocities: Vec<Vector3<f64>>) -> Self {
        self.velocities = velocities;
        self
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

use super::error::EngineError;
use crate::core::models::pbc::PeriodicBox;
use crate::core::models::topology::Topology;
use nalgebra::{Point3, Vector3};
use std::ops::Range;

/// Scale on the nucleus velocity when shells are carried along between steps.
const VELOCITY_FUDGE: f64 = 1.0;

#[derive(Debug, Clone)]
struct Anchor {
    shell: usize,
    /// Nuclei with their normalized mass weights.
    nuclei: Vec<(usize, f64)>,
}

/// Initial guesses for shell positions at the start of an MD step.
#[derive(Debug, Clone)]
pub struct ShellPredictor {
    anchors: Vec<Anchor>,
}

impl ShellPredictor {
    /// Builds the predictor for the shells whose particle lies in `home`.
    pub fn new(topology: &Topology, home: &Range<usize>) -> Result<Self, EngineError> {
        let mut anchors = Vec::new();
        for shell in topology.shells() {
            if !home.contains(&shell.particle()) {
                continue;
            }
            let nuclei = if let [nucleus] = shell.nuclei() {
                vec![(*nucleus, 1.0)]
            } else {
                let total: f64 = shell.nuclei().iter().map(|&n| topology.mass(n)).sum();
                if total <= 0.0 {
                    return Err(EngineError::MasslessNuclei {
                        shell: shell.particle(),
                    });
                }
                shell
                    .nuclei()
                    .iter()
                    .map(|&n| (n, topology.mass(n) / total))
                    .collect()
            };
            anchors.push(Anchor {
                shell: shell.particle(),
                nuclei,
            });
        }
        Ok(Self { anchors })
    }

    /// Writes predicted shell positions into `positions`.
    ///
    /// With `init` the shells are placed on the mass-weighted centre of their nuclei;
    /// otherwise they are moved along with the mass-weighted nucleus velocity.
    /// Only shell rows are touched.
    pub fn predict(
        &self,
        positions: &mut [Point3<f64>],
        velocities: &[Vector3<f64>],
        pbc: &PeriodicBox,
        dt: f64,
        init: bool,
    ) {
        for anchor in &self.anchors {
            if init {
                let origin = positions[anchor.nuclei[0].0];
                let offset: Vector3<f64> = anchor
                    .nuclei
                    .iter()
                    .map(|&(n, w)| w * pbc.dx(&positions[n], &origin))
                    .sum();
                positions[anchor.shell] = origin + offset;
            } else {
                let velocity: Vector3<f64> =
                    anchor.nuclei.iter().map(|&(n, w)| w * velocities[n]).sum();
                positions[anchor.shell] += velocity * dt * VELOCITY_FUDGE;
            }
        }
    }
}

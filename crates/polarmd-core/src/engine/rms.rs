use crate::core::comm::{CommError, Communicator};
use nalgebra::Vector3;

/// Globally reduced convergence measures of one configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceMeasure {
    pub rms: f64,
    pub potential_energy: f64,
}

/// `sqrt((Σ |f_shell|² + sf_dir) / (n_shell + n_dir))` over all ranks.
///
/// The squared-force sum, the local shell count and the potential energy travel
/// in a single collective call.
pub fn reduce_force_measure<C: Communicator>(
    comm: &C,
    forces: &[Vector3<f64>],
    home_shells: &[usize],
    sf_dir: f64,
    n_dir: usize,
    potential_energy: f64,
) -> Result<ForceMeasure, CommError> {
    let sum_sq: f64 = home_shells.iter().map(|&s| forces[s].norm_squared()).sum();
    let mut buffer = [sum_sq + sf_dir, home_shells.len() as f64, potential_energy];
    comm.sum(&mut buffer)?;

    let count = buffer[1] + n_dir as f64;
    let rms = if count > 0.0 {
        (buffer[0] / count).sqrt()
    } else {
        0.0
    };
    Ok(ForceMeasure {
        rms,
        potential_energy: buffer[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comm::single::SingleRank;
    use crate::core::comm::thread_group::ThreadGroup;
    use std::thread;

    #[test]
    fn rms_over_shells_only() {
        let forces = [
            Vector3::new(100.0, 0.0, 0.0),
            Vector3::new(3.0, 0.0, 0.0),
            Vector3::new(0.0, 4.0, 0.0),
        ];
        let measure =
            reduce_force_measure(&SingleRank, &forces, &[1, 2], 0.0, 0, -7.5).unwrap();
        assert!((measure.rms - (12.5f64).sqrt()).abs() < 1e-12);
        assert_eq!(measure.potential_energy, -7.5);
    }

    #[test]
    fn directional_term_counts_per_flexible_constraint() {
        let forces = [Vector3::new(1.0, 0.0, 0.0)];
        let measure = reduce_force_measure(&SingleRank, &forces, &[0], 7.0, 1, 0.0).unwrap();
        assert!((measure.rms - 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_counts_give_zero() {
        let measure = reduce_force_measure(&SingleRank, &[], &[], 0.0, 0, 1.0).unwrap();
        assert_eq!(measure.rms, 0.0);
    }

    #[test]
    fn ranks_agree_on_the_global_measure() {
        let handles: Vec<_> = ThreadGroup::new(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let forces = [Vector3::new(2.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 4.0)];
                    let home = [comm.rank()];
                    reduce_force_measure(&comm, &forces, &home, 0.0, 0, 1.0).unwrap()
                })
            })
            .collect();

        for handle in handles {
            let measure = handle.join().unwrap();
            assert!((measure.rms - 10.0f64.sqrt()).abs() < 1e-12);
            assert_eq!(measure.potential_energy, 2.0);
        }
    }
}

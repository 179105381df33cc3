use super::{CommError, Communicator};
use nalgebra::Point3;
use std::ops::Range;

const ROW: usize = 4;

/// Replaces every row of `positions` owned by some rank with that rank's value.
///
/// Each rank contributes its `home` rows together with an ownership count; rows no
/// rank owns keep their local value. `scratch` is resized as needed and may be
/// reused between calls.
pub fn share_home_rows<C: Communicator>(
    comm: &C,
    home: &Range<usize>,
    positions: &mut [Point3<f64>],
    scratch: &mut Vec<f64>,
) -> Result<(), CommError> {
    if comm.size() <= 1 {
        return Ok(());
    }
    scratch.clear();
    scratch.resize(positions.len() * ROW, 0.0);
    for i in home.clone() {
        let row = &mut scratch[i * ROW..(i + 1) * ROW];
        row[..3].copy_from_slice(positions[i].coords.as_slice());
        row[3] = 1.0;
    }

    comm.sum(scratch)?;

    for (position, row) in positions.iter_mut().zip(scratch.chunks_exact(ROW)) {
        let owners = row[3];
        if owners > 0.0 {
            *position = Point3::new(row[0] / owners, row[1] / owners, row[2] / owners);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comm::single::SingleRank;
    use crate::core::comm::thread_group::ThreadGroup;
    use std::thread;

    #[test]
    fn every_rank_receives_the_home_rows_of_the_others() {
        let homes = [0..1, 1..3];
        let handles: Vec<_> = ThreadGroup::new(2)
            .into_iter()
            .map(|comm| {
                let home = homes[comm.rank()].clone();
                thread::spawn(move || {
                    let r = comm.rank() as f64;
                    // Rows outside both homes keep the local value.
                    let mut positions = vec![Point3::new(r, r, r); 4];
                    let mut scratch = Vec::new();
                    share_home_rows(&comm, &home, &mut positions, &mut scratch).unwrap();
                    positions
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (rank, positions) in results.iter().enumerate() {
            let r = rank as f64;
            assert_eq!(positions[0], Point3::origin());
            assert_eq!(positions[1], Point3::new(1.0, 1.0, 1.0));
            assert_eq!(positions[2], Point3::new(1.0, 1.0, 1.0));
            assert_eq!(positions[3], Point3::new(r, r, r));
        }
    }

    #[test]
    fn single_rank_leaves_positions_alone() {
        let mut positions = vec![Point3::new(1.0, 2.0, 3.0)];
        let mut scratch = Vec::new();
        share_home_rows(&SingleRank, &(0..0), &mut positions, &mut scratch).unwrap();
        assert_eq!(positions[0], Point3::new(1.0, 2.0, 3.0));
        assert!(scratch.is_empty());
    }
}

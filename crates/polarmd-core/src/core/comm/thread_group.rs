use super::{CommError, Communicator};
use std::sync::{Arc, Barrier, Mutex};

#[derive(Debug)]
struct Shared {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

/// A group of ranks living on threads of one process.
///
/// Each rank deposits its contribution in its own slot; after a barrier every
/// rank reads all slots and adds them in rank order.
pub struct ThreadGroup;

impl ThreadGroup {
    /// Creates `size` connected ranks, one per thread. A size of zero is treated as one.
    pub fn new(size: usize) -> Vec<ThreadRank> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| ThreadRank {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ThreadRank {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadRank {
    fn reduce(&self, values: &mut [f64]) -> Result<(), CommError> {
        let slots = self.shared.slots.lock().map_err(|_| CommError::Poisoned)?;
        if let Some((rank, slot)) = slots
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.len() != values.len())
        {
            return Err(CommError::LengthMismatch {
                rank,
                expected: values.len(),
                found: slot.len(),
            });
        }
        values.fill(0.0);
        for slot in slots.iter() {
            for (v, s) in values.iter_mut().zip(slot) {
                *v += s;
            }
        }
        Ok(())
    }
}

impl Communicator for ThreadRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sum(&self, values: &mut [f64]) -> Result<(), CommError> {
        let deposited = match self.shared.slots.lock() {
            Ok(mut slots) => {
                slots[self.rank].clear();
                slots[self.rank].extend_from_slice(values);
                Ok(())
            }
            Err(_) => Err(CommError::Poisoned),
        };
        // Every path, including a poisoned lock, reaches both barriers.
        self.shared.barrier.wait();
        let result = deposited.and_then(|()| self.reduce(values));
        // Nobody may refill a slot before every rank has read it.
        self.shared.barrier.wait();
        result
    }
}

use crate::core::forcefield::evaluator::ForceBuffers;
use nalgebra::Point3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Current,
    Trial,
}

/// Positions and force output of one configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotData {
    pub positions: Vec<Point3<f64>>,
    pub forces: ForceBuffers,
}

impl SlotData {
    fn new(len: usize) -> Self {
        Self {
            positions: vec![Point3::origin(); len],
            forces: ForceBuffers::new(len),
        }
    }
}

/// The two configurations of a relaxation, allocated once and reused every step.
///
/// `Current` always holds the best configuration seen in the ongoing MD step;
/// a trial becomes current only through [`SlotArena::swap`].
#[derive(Debug, Clone)]
pub struct SlotArena {
    slots: [SlotData; 2],
    current: usize,
}

impl SlotArena {
    pub fn new(len: usize) -> Self {
        Self {
            slots: [SlotData::new(len), SlotData::new(len)],
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots[0].positions.len()
    }

    fn index(&self, slot: Slot) -> usize {
        match slot {
            Slot::Current => self.current,
            Slot::Trial => 1 - self.current,
        }
    }

    pub fn get(&self, slot: Slot) -> &SlotData {
        &self.slots[self.index(slot)]
    }

    pub fn get_mut(&mut self, slot: Slot) -> &mut SlotData {
        let index = self.index(slot);
        &mut self.slots[index]
    }

    pub fn current(&self) -> &SlotData {
        self.get(Slot::Current)
    }

    pub fn trial(&self) -> &SlotData {
        self.get(Slot::Trial)
    }

    /// Mutable access to both slots at once, `(current, trial)`.
    pub fn split_mut(&mut self) -> (&mut SlotData, &mut SlotData) {
        let (first, second) = self.slots.split_at_mut(1);
        if self.current == 0 {
            (&mut first[0], &mut second[0])
        } else {
            (&mut second[0], &mut first[0])
        }
    }

    /// Promotes the trial configuration to current.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }
}

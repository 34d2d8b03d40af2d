use serde::{Deserialize, Serialize};
use std::fmt;

/// Cell type label. [`EMPTY`] marks a vacant slot, types start at 1.
pub type CellType = usize;

pub const EMPTY: CellType = 0;

/// Signal sensitivity of every cell type.
const DELTA: f64 = 1.0;

/// Response of a cell type to a signal value.
///
/// Triangular tuning curve: 1 when `signal == cell_type - 1`,
/// decaying linearly to 0 at a distance of one unit.
pub fn response(signal: f64, cell_type: CellType) -> f64 {
    let response = 1.0 - (signal / DELTA - cell_type as f64 + 1.0).abs();
    response.max(0.0)
}

/// Label of a training example.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Label {
    NoResponse,
    Positive,
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Example {
    pub signal: f64,
    pub label: Label,
}

/// Number of slots held by each cell type, empty slots first.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Distribution(Vec<usize>);

impl Distribution {
    pub fn counts(&self) -> &[usize] {
        &self.0
    }

    pub fn n_empty(&self) -> usize {
        self.0[EMPTY]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i_type, count) in self.0.iter().enumerate() {
            if i_type > 0 {
                write!(f, ",")?;
            }
            write!(f, "{count}")?;
        }
        Ok(())
    }
}

/// Slots of the alveolus and the stack of vacant ones.
///
/// Every index in `free_slots` holds [`EMPTY`] and every empty slot is stacked once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Population {
    n_types: usize,
    slots: Box<[CellType]>,
    free_slots: Vec<usize>,
}

impl Population {
    /// Pack `n_types` contiguous blocks of `cells_per_type` cells, leaving the tail empty.
    pub fn new(n_types: usize, cells_per_type: usize, n_slots: usize) -> Self {
        let mut slots = vec![EMPTY; n_slots].into_boxed_slice();
        for cell_type in 1..=n_types {
            let start = (cell_type - 1) * cells_per_type;
            slots[start..start + cells_per_type].fill(cell_type);
        }

        let free_slots = (0..n_slots).filter(|&i| slots[i] == EMPTY).collect();

        Self {
            n_types,
            slots,
            free_slots,
        }
    }

    pub fn n_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, i_slot: usize) -> CellType {
        self.slots[i_slot]
    }

    pub fn free_slots(&self) -> &[usize] {
        &self.free_slots
    }

    /// Copy the type of slot `i_slot` into the most recently vacated slot.
    ///
    /// Returns the filled slot, or `None` when the alveolus is full.
    pub fn clone_into_free(&mut self, i_slot: usize) -> Option<usize> {
        let i_free = self.free_slots.pop()?;
        self.slots[i_free] = self.slots[i_slot];
        Some(i_free)
    }

    /// Remove the cell in slot `i_slot`.
    pub fn vacate(&mut self, i_slot: usize) {
        if self.slots[i_slot] == EMPTY {
            return;
        }
        self.slots[i_slot] = EMPTY;
        self.free_slots.push(i_slot);
    }

    pub fn distribution(&self) -> Distribution {
        let mut counts = vec![0; self.n_types + 1];
        for &cell_type in self.slots.iter() {
            counts[cell_type] += 1;
        }
        Distribution(counts)
    }
}


#[cfg(test)]
pub(crate) use tests::assert_consistent;

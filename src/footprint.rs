use crate::cell::Cell;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// The set of cells a building occupies, plus its anchor cell.
///
/// Equality compares the anchor and the occupied cells. Hashing folds in
/// only the anchor and the cell count: two footprints with the same anchor
/// and size land in the same bucket and compare equal for map-replacement
/// purposes even when built through different constructors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Footprint {
    anchor: Cell,
    cells: Vec<Cell>,
}

impl Footprint {
    /// A square footprint of the given side length anchored at its
    /// top-left cell.
    pub fn square(anchor: Cell, side: i32) -> Self {
        let mut cells = Vec::with_capacity((side * side) as usize);
        for dx in 0..side {
            for dy in 0..side {
                cells.push(anchor.shifted(dx, dy));
            }
        }
        Footprint { anchor, cells }
    }

    /// An arbitrary cell set with an explicit anchor. Cells are kept in
    /// sorted order so equality and iteration are deterministic.
    pub fn from_cells(anchor: Cell, mut cells: Vec<Cell>) -> Self {
        cells.sort();
        cells.dedup();
        Footprint { anchor, cells }
    }

    #[inline]
    pub fn anchor(&self) -> Cell {
        self.anchor
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, cell: Cell) -> bool {
        self.cells.binary_search(&cell).is_ok()
    }
}

impl PartialEq for Footprint {
    fn eq(&self, other: &Self) -> bool {
        self.anchor == other.anchor && self.cells == other.cells
    }
}

impl Eq for Footprint {}

impl Hash for Footprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.anchor.hash(state);
        (self.cells.len() * 371).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(fp: &Footprint) -> u64 {
        let mut hasher = DefaultHasher::new();
        fp.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn square_covers_side_by_side_cells() {
        let fp = Footprint::square(Cell::new(2, 3), 3);
        assert_eq!(fp.len(), 9);
        assert!(fp.contains(Cell::new(2, 3)));
        assert!(fp.contains(Cell::new(4, 5)));
        assert!(!fp.contains(Cell::new(5, 3)));
    }

    #[test]
    fn same_anchor_same_size_hash_alike() {
        let a = Footprint::square(Cell::new(1, 1), 2);
        let b = Footprint::from_cells(
            Cell::new(1, 1),
            vec![
                Cell::new(1, 1),
                Cell::new(1, 2),
                Cell::new(2, 1),
                Cell::new(9, 9),
            ],
        );
        // Different cells, same anchor and count: equal hashes, unequal values.
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, b);
    }
}

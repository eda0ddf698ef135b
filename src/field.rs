//! The planning field: a pre-placed base state plus named zones.
//!
//! Zones steer placement and routing: chests must land in the staging
//! band, crafters in the assembly area, and pipe routes pay a surcharge
//! for crowding reserved ground. Zone membership is compiled into a
//! per-cell bitflags grid for cheap queries.

use crate::cell::Cell;
use crate::state::State;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ZoneFlags: u8 {
        const NONE = 0;
        const STAGING = 1;
        const ELECTRIC = 2;
        const ASSEMBLY = 4;
        const LOGISTICS = 8;
    }
}

/// An inclusive axis-aligned cell rectangle.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Rect {
    pub min: Cell,
    pub max: Cell,
}

impl Rect {
    pub fn new(min: Cell, max: Cell) -> Self {
        Rect { min, max }
    }

    pub fn contains(&self, cell: Cell) -> bool {
        self.contains_with_margin(cell, 0)
    }

    /// Containment in the rectangle inflated (or shrunk, for negative
    /// margins) by `margin` cells on every side.
    pub fn contains_with_margin(&self, cell: Cell, margin: i32) -> bool {
        cell.x >= self.min.x - margin
            && cell.x <= self.max.x + margin
            && cell.y >= self.min.y - margin
            && cell.y <= self.max.y + margin
    }
}

/// Per-cell zone membership over the grid.
#[derive(Clone)]
struct ZoneGrid {
    buffer: Vec<u8>,
    width: i32,
    height: i32,
}

impl ZoneGrid {
    fn new(size: Cell) -> Self {
        ZoneGrid {
            buffer: vec![0; (size.x.max(0) * size.y.max(0)) as usize],
            width: size.x,
            height: size.y,
        }
    }

    fn mark(&mut self, rect: &Rect, flags: ZoneFlags) {
        for x in rect.min.x.max(0)..=rect.max.x.min(self.width - 1) {
            for y in rect.min.y.max(0)..=rect.max.y.min(self.height - 1) {
                self.buffer[(y * self.width + x) as usize] |= flags.bits();
            }
        }
    }

    fn get(&self, cell: Cell) -> ZoneFlags {
        if cell.x < 0 || cell.y < 0 || cell.x >= self.width || cell.y >= self.height {
            return ZoneFlags::NONE;
        }
        ZoneFlags::from_bits_truncate(self.buffer[(cell.y * self.width + cell.x) as usize])
    }
}

/// A field ties the pre-placed base layout to its zone geometry.
pub struct Field {
    base: State,
    staging: Rect,
    electric: Rect,
    assembly: Rect,
    logistics: Rect,
    zones: ZoneGrid,
}

impl Field {
    pub fn new(base: State, staging: Rect, electric: Rect, assembly: Rect, logistics: Rect) -> Self {
        let mut zones = ZoneGrid::new(base.size());
        zones.mark(&staging, ZoneFlags::STAGING);
        zones.mark(&electric, ZoneFlags::ELECTRIC);
        zones.mark(&assembly, ZoneFlags::ASSEMBLY);
        zones.mark(&logistics, ZoneFlags::LOGISTICS);
        Field {
            base,
            staging,
            electric,
            assembly,
            logistics,
            zones,
        }
    }

    /// A field with no reserved ground: assembly and logistics cover the
    /// whole grid, while the staging band and electric corridor sit
    /// outside it (no routing surcharge anywhere).
    pub fn open(base: State) -> Self {
        let size = base.size();
        let all = Rect::new(Cell::new(0, 0), Cell::new(size.x - 1, size.y - 1));
        let nowhere = Rect::new(Cell::new(-100, -100), Cell::new(-100, -100));
        Field::new(base, nowhere, nowhere, all, all)
    }

    pub fn base(&self) -> &State {
        &self.base
    }

    pub fn staging(&self) -> &Rect {
        &self.staging
    }

    pub fn electric(&self) -> &Rect {
        &self.electric
    }

    pub fn assembly(&self) -> &Rect {
        &self.assembly
    }

    pub fn logistics(&self) -> &Rect {
        &self.logistics
    }

    pub fn zones_at(&self, cell: Cell) -> ZoneFlags {
        self.zones.get(cell)
    }

    /// Routing surcharge for laying a pipe segment on a cell: steep near
    /// the staging band (the closer, the steeper), moderate across the
    /// electric corridor, small elsewhere.
    pub fn zone_surcharge(&self, cell: Cell) -> f64 {
        for shift in -3..=7 {
            if self.staging.contains_with_margin(cell, shift) {
                return (30 - shift) as f64;
            }
        }
        if self.zones_at(cell).contains(ZoneFlags::ELECTRIC) {
            1.5
        } else {
            0.5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Field {
        let base = State::empty(Cell::new(40, 40));
        Field::new(
            base,
            Rect::new(Cell::new(10, 10), Cell::new(14, 14)),
            Rect::new(Cell::new(30, 0), Cell::new(32, 39)),
            Rect::new(Cell::new(0, 0), Cell::new(29, 39)),
            Rect::new(Cell::new(0, 0), Cell::new(39, 39)),
        )
    }

    #[test]
    fn zone_grid_reflects_rects() {
        let field = field();
        assert!(field.zones_at(Cell::new(12, 12)).contains(ZoneFlags::STAGING));
        assert!(field.zones_at(Cell::new(31, 5)).contains(ZoneFlags::ELECTRIC));
        assert!(!field.zones_at(Cell::new(5, 5)).contains(ZoneFlags::STAGING));
        assert_eq!(field.zones_at(Cell::new(-1, 0)), ZoneFlags::NONE);
    }

    #[test]
    fn surcharge_grows_toward_the_staging_band() {
        let field = field();
        // Band center: deepest shrunk-rect match at shift -2.
        assert_eq!(field.zone_surcharge(Cell::new(12, 12)), 32.0);
        // On the band edge: first match at shift 0.
        assert_eq!(field.zone_surcharge(Cell::new(10, 12)), 30.0);
        // Seven cells out: last staging match.
        assert_eq!(field.zone_surcharge(Cell::new(10, 21)), 23.0);
        // Electric corridor away from staging.
        assert_eq!(field.zone_surcharge(Cell::new(31, 39)), 1.5);
        // Open ground.
        assert_eq!(field.zone_surcharge(Cell::new(25, 39)), 0.5);
    }

    #[test]
    fn margin_containment() {
        let rect = Rect::new(Cell::new(5, 5), Cell::new(7, 7));
        assert!(rect.contains(Cell::new(5, 7)));
        assert!(!rect.contains(Cell::new(4, 7)));
        assert!(rect.contains_with_margin(Cell::new(4, 7), 1));
        assert!(rect.contains_with_margin(Cell::new(6, 6), -1));
        assert!(!rect.contains_with_margin(Cell::new(5, 5), -1));
    }
}

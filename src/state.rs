//! The immutable placement snapshot at the heart of the search.
//!
//! A `State` is never mutated: `add_building`, `remove_building` and
//! `retune_building` all return fresh snapshots. Buildings are shared via
//! `Arc` between the building set and the per-cell map, so a transition is
//! a shallow copy of the indexes rather than a deep copy of the layout.
//!
//! Two caches are maintained incrementally across transitions and
//! cross-checked against from-scratch recomputation in debug builds:
//!
//! - `free_cells`: anchors where a full-size (beacon) building could still
//!   be placed. This is stricter than "unoccupied" -- every placed
//!   building clears a band of anchors around itself.
//! - `performance_map`: per-cell count of beacon effects, so scoring never
//!   rescans the building set.

use crate::building::{Building, BuildingKind};
use crate::cell::Cell;
use crate::constants::*;
use fnv::{FnvHashMap, FnvHashSet};
use log::trace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Debug)]
pub struct State {
    buildings: FnvHashSet<Arc<Building>>,
    map: FnvHashMap<Cell, Arc<Building>>,
    size: Cell,
    free_cells: FnvHashSet<Cell>,
    performance_map: FnvHashMap<Cell, u32>,
    check_liquids: bool,
    serial: u64,
    production_cache: OnceLock<f64>,
}

impl State {
    /// An empty grid of the given bounds. Free cells cover every anchor at
    /// which a beacon-sized building fits.
    pub fn empty(size: Cell) -> State {
        let mut free_cells = FnvHashSet::default();
        for x in 0..(size.x - GRID_MARGIN).max(0) {
            for y in 0..(size.y - GRID_MARGIN).max(0) {
                free_cells.insert(Cell::new(x, y));
            }
        }
        State {
            buildings: FnvHashSet::default(),
            map: FnvHashMap::default(),
            size,
            free_cells,
            performance_map: FnvHashMap::default(),
            check_liquids: true,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            production_cache: OnceLock::new(),
        }
    }

    /// Toggle the liquid-compatibility check on placement. Carried through
    /// every derived state.
    pub fn with_liquid_check(mut self, enabled: bool) -> State {
        self.check_liquids = enabled;
        self
    }

    pub fn size(&self) -> Cell {
        self.size
    }

    /// Construction-order tag. Unique per snapshot; used as a stable
    /// tie-break key in search queues, never for content comparison.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn buildings(&self) -> impl Iterator<Item = &Arc<Building>> {
        self.buildings.iter()
    }

    /// Buildings in deterministic (anchor, kind) order.
    pub fn buildings_sorted(&self) -> Vec<Arc<Building>> {
        let mut all: Vec<Arc<Building>> = self.buildings.iter().cloned().collect();
        all.sort_by_key(|b| (b.anchor(), b.kind() as u8));
        all
    }

    pub fn building_count(&self) -> usize {
        self.buildings.len()
    }

    pub fn contains(&self, building: &Building) -> bool {
        self.buildings.contains(building)
    }

    pub fn building_at(&self, cell: Cell) -> Option<&Arc<Building>> {
        self.map.get(&cell)
    }

    pub fn is_occupied(&self, cell: Cell) -> bool {
        self.map.contains_key(&cell)
    }

    pub fn free_cells(&self) -> &FnvHashSet<Cell> {
        &self.free_cells
    }

    /// Beacon effect count at a cell.
    pub fn performance_at(&self, cell: Cell) -> u32 {
        self.performance_map.get(&cell).copied().unwrap_or(0)
    }

    fn in_bounds(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.size.x && cell.y < self.size.y
    }

    /// Place a building. Returns `None` when any footprint cell is out of
    /// bounds or occupied, or when a liquid connection would join two
    /// networks of different liquids. Never mutates `self`.
    pub fn add_building(&self, building: Building) -> Option<State> {
        if building.cells().iter().any(|&c| !self.in_bounds(c)) {
            return None;
        }
        if building.cells().iter().any(|c| self.map.contains_key(c)) {
            return None;
        }
        if !self.liquids_valid(&building) {
            return None;
        }

        let shared = Arc::new(building);
        let mut map = self.map.clone();
        for &cell in shared.cells() {
            map.insert(cell, Arc::clone(&shared));
        }
        let mut buildings = self.buildings.clone();
        buildings.insert(Arc::clone(&shared));

        let mut performance_map = self.performance_map.clone();
        if shared.kind() == BuildingKind::Beacon {
            for cell in beacon_window(shared.anchor()) {
                *performance_map.entry(cell).or_insert(0) += 1;
            }
        }

        let mut free_cells = self.free_cells.clone();
        for cell in clearance_band(&shared) {
            free_cells.remove(&cell);
        }

        trace!(
            "add {:?} at {:?}, {} free cells left",
            shared.kind(),
            shared.anchor(),
            free_cells.len()
        );

        Some(self.assemble(buildings, map, free_cells, performance_map))
    }

    /// Place several buildings in order; `None` if any placement fails.
    pub fn add_buildings<I>(&self, buildings: I) -> Option<State>
    where
        I: IntoIterator<Item = Building>,
    {
        let mut state = self.clone();
        for building in buildings {
            state = state.add_building(building)?;
        }
        Some(state)
    }

    /// Remove a placed building, restoring caches.
    ///
    /// The freed clearance band cannot simply be re-added: neighbouring
    /// buildings still block parts of it. Every building whose anchor is
    /// within `max(side_a, side_b) + 1` of the removed one has its band
    /// re-subtracted, which makes the incremental update exact.
    pub fn remove_building(&self, building: &Building) -> State {
        debug_assert!(
            self.buildings.contains(building),
            "removing a building that is not placed"
        );

        let mut map = self.map.clone();
        for cell in building.cells() {
            map.remove(cell);
        }
        let mut buildings = self.buildings.clone();
        buildings.remove(building);

        let mut performance_map = self.performance_map.clone();
        if building.kind() == BuildingKind::Beacon {
            for cell in beacon_window(building.anchor()) {
                if let Some(count) = performance_map.get_mut(&cell) {
                    *count -= 1;
                    if *count == 0 {
                        performance_map.remove(&cell);
                    }
                }
            }
        }

        let mut free_cells = self.free_cells.clone();
        free_cells.extend(clearance_band(building));
        let anchor = building.anchor();
        let side = building.side();
        for other in buildings.iter() {
            if other.anchor().chebyshev_to(anchor) <= other.side().max(side) + 1 {
                for cell in clearance_band(other) {
                    free_cells.remove(&cell);
                }
            }
        }
        // Re-clip to the anchor domain; the naive band union can spill
        // past the grid margin.
        free_cells.retain(|c| {
            c.x >= 0 && c.y >= 0 && c.x < self.size.x - GRID_MARGIN && c.y < self.size.y - GRID_MARGIN
        });

        self.assemble(buildings, map, free_cells, performance_map)
    }

    /// Swap a placed building for one with identical kind and footprint
    /// but different attributes (module tier, chest contents). The narrow
    /// late-tuning edit path: map/building correspondence is preserved
    /// because the footprints match exactly.
    pub fn retune_building(&self, old: &Building, new: Building) -> Option<State> {
        if !self.buildings.contains(old) {
            return None;
        }
        if old.kind() != new.kind() || old.footprint() != new.footprint() {
            return None;
        }

        let shared = Arc::new(new);
        let mut map = self.map.clone();
        for &cell in shared.cells() {
            map.insert(cell, Arc::clone(&shared));
        }
        let mut buildings = self.buildings.clone();
        buildings.remove(old);
        buildings.insert(Arc::clone(&shared));

        Some(self.assemble(
            buildings,
            map,
            self.free_cells.clone(),
            self.performance_map.clone(),
        ))
    }

    fn assemble(
        &self,
        buildings: FnvHashSet<Arc<Building>>,
        map: FnvHashMap<Cell, Arc<Building>>,
        free_cells: FnvHashSet<Cell>,
        performance_map: FnvHashMap<Cell, u32>,
    ) -> State {
        let state = State {
            buildings,
            map,
            size: self.size,
            free_cells,
            performance_map,
            check_liquids: self.check_liquids,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            production_cache: OnceLock::new(),
        };
        debug_assert!(state.check_integrity(), "map/building correspondence broken");
        debug_assert!(
            state.free_cells
                == recompute_free_cells(state.size, state.buildings.iter().map(Arc::as_ref)),
            "incremental free-cell cache diverged from recomputation"
        );
        state
    }

    fn liquids_valid(&self, building: &Building) -> bool {
        if !self.check_liquids || !building.kind().is_liquid_carrier() {
            return true;
        }
        for connection in building.liquid_connections() {
            if let Some(other) = self.map.get(&connection.to) {
                if other.kind().is_liquid_carrier()
                    && other.liquid_connections().iter().any(|oc| {
                        oc.is_counterpart(&connection) && oc.liquid != connection.liquid
                    })
                {
                    return false;
                }
            }
        }
        true
    }

    /// O(total footprint area) structural check: every building cell maps
    /// back to it and the map holds no orphan entries. Debug builds run
    /// this on every transition.
    pub fn check_integrity(&self) -> bool {
        for building in &self.buildings {
            for cell in building.cells() {
                match self.map.get(cell) {
                    Some(mapped) if Arc::ptr_eq(mapped, building) => {}
                    _ => return false,
                }
            }
        }
        let footprint_total: usize = self.buildings.iter().map(|b| b.cells().len()).sum();
        footprint_total == self.map.len()
    }

    /// Occupied interior area: anchor-domain cells no longer free.
    pub fn area(&self) -> i32 {
        let interior = (self.size.x - GRID_MARGIN) * (self.size.y - GRID_MARGIN);
        interior - self.free_cells.len() as i32
    }

    /// Recipe-free aggregate output: every producer contributes its base
    /// rate plus the beacon bonus at its anchor.
    pub fn production(&self) -> f64 {
        *self.production_cache.get_or_init(|| {
            self.buildings
                .iter()
                .filter(|b| b.kind().is_producer())
                .map(|b| PRODUCER_BASE_RATE + BEACON_BONUS * self.performance_at(b.anchor()) as f64)
                .sum()
        })
    }

    /// Production per occupied area; the greedy and local-search
    /// objective for recipe-free layouts.
    pub fn score(&self) -> f64 {
        let area = self.area();
        if area <= 0 {
            0.0
        } else {
            self.production() / area as f64
        }
    }
}

/// Cells a beacon at `anchor` affects: an 11x11 window around the anchor.
fn beacon_window(anchor: Cell) -> impl Iterator<Item = Cell> {
    (-BEACON_EFFECT_RANGE..=BEACON_EFFECT_RANGE).flat_map(move |dx| {
        (-BEACON_EFFECT_RANGE..=BEACON_EFFECT_RANGE).map(move |dy| anchor.shifted(dx, dy))
    })
}

/// Anchors blocked for future placement by a building: the square band
/// from `anchor - (2, 2)` of side `side + 2` (any beacon anchored inside
/// it would overlap the building).
fn clearance_band(building: &Building) -> impl Iterator<Item = Cell> + '_ {
    let origin = building.anchor().shifted(-GRID_MARGIN, -GRID_MARGIN);
    let span = building.side() + BEACON_SIDE - 1;
    (0..span).flat_map(move |dx| (0..span).map(move |dy| origin.shifted(dx, dy)))
}

/// From-scratch free-cell computation, for debug cross-checks and tests.
pub fn recompute_free_cells<'a, I>(size: Cell, buildings: I) -> FnvHashSet<Cell>
where
    I: IntoIterator<Item = &'a Building>,
{
    let mut cells = FnvHashSet::default();
    for x in 0..(size.x - GRID_MARGIN).max(0) {
        for y in 0..(size.y - GRID_MARGIN).max(0) {
            cells.insert(Cell::new(x, y));
        }
    }
    for building in buildings {
        for cell in clearance_band(building) {
            cells.remove(&cell);
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::building::{Liquid, ModuleTier};
    use crate::cell::Direction;

    fn grid() -> State {
        State::empty(Cell::new(18, 18))
    }

    #[test]
    fn empty_grid_frees_the_anchor_domain() {
        let state = grid();
        assert_eq!(state.free_cells().len(), 16 * 16);
        assert_eq!(state.area(), 0);
        assert_eq!(state.score(), 0.0);
    }

    #[test]
    fn add_rejects_out_of_bounds() {
        let state = grid();
        assert!(state
            .add_building(Building::smelter(Cell::new(-1, 0), None))
            .is_none());
        assert!(state
            .add_building(Building::smelter(Cell::new(16, 0), None))
            .is_none());
        assert!(state
            .add_building(Building::smelter(Cell::new(0, 17), None))
            .is_none());
        assert!(state
            .add_building(Building::smelter(Cell::new(0, 0), None))
            .is_some());
    }

    #[test]
    fn add_rejects_overlap() {
        let state = grid()
            .add_building(Building::smelter(Cell::new(4, 4), None))
            .unwrap();
        assert!(state
            .add_building(Building::smelter(Cell::new(6, 6), None))
            .is_none());
        assert!(state
            .add_building(Building::smelter(Cell::new(7, 4), None))
            .is_some());
    }

    #[test]
    fn occupancy_map_tracks_footprints() {
        let smelter = Building::smelter(Cell::new(4, 4), None);
        let state = grid().add_building(smelter.clone()).unwrap();
        for cell in smelter.cells() {
            assert_eq!(state.building_at(*cell).map(|b| b.as_ref()), Some(&smelter));
        }
        assert!(state.building_at(Cell::new(7, 4)).is_none());
        assert!(state.check_integrity());
    }

    #[test]
    fn free_cells_shrink_by_the_clearance_band() {
        let state = grid()
            .add_building(Building::smelter(Cell::new(5, 5), None))
            .unwrap();
        // Band: anchors (3..=7, 3..=7).
        for x in 3..=7 {
            for y in 3..=7 {
                assert!(!state.free_cells().contains(&Cell::new(x, y)));
            }
        }
        assert!(state.free_cells().contains(&Cell::new(2, 5)));
        assert!(state.free_cells().contains(&Cell::new(8, 5)));
    }

    #[test]
    fn remove_restores_free_cells_exactly() {
        let a = Building::smelter(Cell::new(4, 4), None);
        let b = Building::beacon(Cell::new(8, 4), ModuleTier::Three);
        let base = grid();
        let with_a = base.add_building(a.clone()).unwrap();
        let with_both = with_a.add_building(b.clone()).unwrap();
        let removed = with_both.remove_building(&b);

        let mut expected: Vec<Cell> = with_a.free_cells().iter().copied().collect();
        let mut actual: Vec<Cell> = removed.free_cells().iter().copied().collect();
        expected.sort();
        actual.sort();
        assert_eq!(expected, actual);
    }

    #[test]
    fn add_remove_round_trip_preserves_everything() {
        let first = Building::smelter(Cell::new(2, 2), None);
        let beacon = Building::beacon(Cell::new(8, 8), ModuleTier::Three);
        let base = grid().add_building(first.clone()).unwrap();

        let added = base.add_building(beacon.clone()).unwrap();
        let back = added.remove_building(&beacon);

        assert_eq!(back.building_count(), base.building_count());
        assert!(back.contains(&first));
        assert!(!back.contains(&beacon));
        let mut before: Vec<Cell> = base.free_cells().iter().copied().collect();
        let mut after: Vec<Cell> = back.free_cells().iter().copied().collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
        assert_eq!(back.performance_at(Cell::new(8, 8)), 0);
        assert_eq!(back.performance_at(Cell::new(2, 2)), 0);
    }

    #[test]
    fn interleaved_transitions_keep_caches_exact() {
        // Debug builds assert the invariant inside every transition; this
        // exercises an add/remove/add weave over adjacent bands.
        let s1 = Building::smelter(Cell::new(3, 3), None);
        let s2 = Building::smelter(Cell::new(7, 3), None);
        let s3 = Building::beacon(Cell::new(5, 7), ModuleTier::Three);
        let state = grid()
            .add_building(s1.clone())
            .unwrap()
            .add_building(s2.clone())
            .unwrap()
            .remove_building(&s1)
            .add_building(s3.clone())
            .unwrap()
            .remove_building(&s2)
            .add_building(s1.clone())
            .unwrap();

        let scratch = recompute_free_cells(state.size(), state.buildings().map(|b| b.as_ref()));
        assert_eq!(state.free_cells(), &scratch);
    }

    #[test]
    fn beacon_raises_performance_in_its_window() {
        let state = grid()
            .add_building(Building::beacon(Cell::new(6, 6), ModuleTier::Three))
            .unwrap();
        assert_eq!(state.performance_at(Cell::new(6, 6)), 1);
        assert_eq!(state.performance_at(Cell::new(1, 1)), 1);
        assert_eq!(state.performance_at(Cell::new(11, 11)), 1);
        assert_eq!(state.performance_at(Cell::new(0, 1)), 0);
        assert_eq!(state.performance_at(Cell::new(12, 6)), 0);
    }

    #[test]
    fn production_counts_beacon_coverage() {
        let state = grid()
            .add_building(Building::smelter(Cell::new(4, 4), None))
            .unwrap();
        assert!((state.production() - PRODUCER_BASE_RATE).abs() < 1e-9);

        let boosted = state
            .add_building(Building::beacon(Cell::new(8, 4), ModuleTier::Three))
            .unwrap();
        assert!((boosted.production() - (PRODUCER_BASE_RATE + BEACON_BONUS)).abs() < 1e-9);
        assert!(boosted.score() > 0.0);
    }

    #[test]
    fn mismatched_liquids_cannot_touch() {
        let state = grid()
            .add_building(Building::pipe(Cell::new(5, 5), Liquid::Water))
            .unwrap();
        assert!(state
            .add_building(Building::pipe(Cell::new(5, 6), Liquid::SulfuricAcid))
            .is_none());
        assert!(state
            .add_building(Building::pipe(Cell::new(5, 6), Liquid::Water))
            .is_some());

        // With the check disabled the same placement goes through.
        let unchecked = grid().with_liquid_check(false)
            .add_building(Building::pipe(Cell::new(5, 5), Liquid::Water))
            .unwrap();
        assert!(unchecked
            .add_building(Building::pipe(Cell::new(5, 6), Liquid::SulfuricAcid))
            .is_some());
    }

    #[test]
    fn underground_pipe_only_connects_through_its_face() {
        let state = grid()
            .add_building(Building::underground_pipe(
                Cell::new(5, 5),
                Liquid::Water,
                Direction::Right,
            ))
            .unwrap();
        // Different liquid across the open face: rejected.
        assert!(state
            .add_building(Building::pipe(Cell::new(6, 5), Liquid::SulfuricAcid))
            .is_none());
        // Different liquid on a closed face: allowed.
        assert!(state
            .add_building(Building::pipe(Cell::new(4, 5), Liquid::SulfuricAcid))
            .is_some());
    }

    #[test]
    fn retune_swaps_attributes_in_place() {
        let beacon = Building::beacon(Cell::new(4, 4), ModuleTier::Three);
        let state = grid().add_building(beacon.clone()).unwrap();
        let retuned_beacon = Building::beacon(Cell::new(4, 4), ModuleTier::Two);
        let retuned = state.retune_building(&beacon, retuned_beacon.clone()).unwrap();

        assert!(retuned.contains(&retuned_beacon));
        assert!(retuned.check_integrity());
        assert_eq!(
            retuned
                .building_at(Cell::new(5, 5))
                .and_then(|b| b.module_tier()),
            Some(ModuleTier::Two)
        );
        // A kind or footprint change is refused.
        assert!(state
            .retune_building(&beacon, Building::lab(Cell::new(4, 4)))
            .is_none());
        assert!(state
            .retune_building(&beacon, Building::beacon(Cell::new(5, 4), ModuleTier::Two))
            .is_none());
    }

    #[test]
    fn serials_are_unique_and_monotonic_per_derivation() {
        let base = grid();
        let a = base
            .add_building(Building::smelter(Cell::new(2, 2), None))
            .unwrap();
        let b = base
            .add_building(Building::smelter(Cell::new(2, 2), None))
            .unwrap();
        assert!(a.serial() > base.serial());
        assert!(b.serial() > a.serial());
        assert_ne!(a.serial(), b.serial());
    }
}

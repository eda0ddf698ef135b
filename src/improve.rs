//! Local-search improvement: remove a cluster of buildings, refill the
//! freed space, keep the result when it scores better.
//!
//! Cluster enumeration walks the grid in row-major order and uses the
//! previously returned cluster as a cursor, so successive calls stream
//! through all clusters of the current size without re-deriving them.
//! The refill is a bounded depth-first branch-and-bound over the
//! removable kinds -- unlike the greedy constructor it keeps the best
//! score found anywhere in the expansion, not just one greedy path.
//!
//! Because the loop only ever removes-then-refills, the accepted score can
//! never drop. A refill measurably below the incumbent is a bug in the
//! model, not a search outcome, and aborts the run.

use crate::budget::AttemptBudget;
use crate::building::{Building, BuildingKind};
use crate::cell::Cell;
use crate::constants::*;
use crate::error::PlanError;
use crate::field::Field;
use crate::greedy::GreedyPlanner;
use crate::recipe::RecipeBook;
use crate::score::ScoreModel;
use crate::state::State;
use log::{debug, info, warn};
use std::sync::Arc;

pub struct Improver {
    pub epsilon: f64,
    pub scan_span: i32,
    pub removable: Vec<BuildingKind>,
}

impl Default for Improver {
    fn default() -> Self {
        Improver {
            epsilon: SCORE_EPSILON,
            scan_span: CLUSTER_SCAN_SPAN,
            removable: vec![BuildingKind::Beacon, BuildingKind::Smelter],
        }
    }
}

impl Improver {
    /// Run remove-k/rebuild until convergence or budget exhaustion.
    ///
    /// Cluster sizes grow from 1; any accepted improvement resets the size
    /// to 1 (improvements cluster near recent structural changes). The
    /// improver has converged when the enumerator exhausts every size
    /// without progress.
    pub fn improve(&self, state: &State, budget: &mut AttemptBudget) -> Result<State, PlanError> {
        let mut best = state.clone();
        let mut size = 1usize;
        let mut last_delete: Vec<Arc<Building>> = Vec::new();

        while budget.has_budget() {
            let mut removed_candidates: Vec<State> = Vec::new();
            let mut deleted = match self.find_next_to_delete(&best, &last_delete) {
                None => return Ok(best),
                Some(cluster) => cluster,
            };
            while deleted.len() == size {
                removed_candidates.push(self.remove_cluster(&best, &deleted));
                last_delete = deleted.clone();
                match self.find_next_to_delete(&best, &deleted) {
                    None => break,
                    Some(next) => deleted = next,
                }
            }

            // Most freed space first; score and serial break ties.
            removed_candidates.sort_by(|a, b| {
                a.free_cells()
                    .len()
                    .cmp(&b.free_cells().len())
                    .then(a.score().total_cmp(&b.score()))
                    .then(a.serial().cmp(&b.serial()))
            });

            let mut improved = false;
            for candidate in removed_candidates.iter().rev() {
                let refill = self.best_refill(candidate, budget);
                if refill.score() > best.score() + self.epsilon {
                    info!(
                        "improver: size {} cluster lifted score {:.5} -> {:.5} ({} attempts)",
                        size,
                        best.score(),
                        refill.score(),
                        budget.used()
                    );
                    best = refill;
                    last_delete.clear();
                    size = 0;
                    improved = true;
                    break;
                } else if refill.building_count() == candidate.building_count() {
                    // Nothing could be rebuilt here; the branch is
                    // infeasible, not a regression.
                    continue;
                } else if budget.has_budget() && refill.score() < best.score() - self.epsilon {
                    // A refill cut short by the budget is allowed to score
                    // low; a completed one is not.
                    return Err(PlanError::ScoreRegression {
                        before: best.score(),
                        after: refill.score(),
                        before_serial: best.serial(),
                        after_serial: refill.serial(),
                    });
                }
            }
            if !improved {
                debug!(
                    "improver: size {} exhausted without improvement ({} clusters)",
                    size,
                    removed_candidates.len()
                );
            }
            size += 1;
        }
        Ok(best)
    }

    /// The next cluster of exactly `previous.len().max(1)` removable
    /// buildings after `previous` in the enumeration order, growing the
    /// size when the current one is exhausted. `None` once every size has
    /// cycled without yielding a cluster.
    pub fn find_next_to_delete(
        &self,
        state: &State,
        previous: &[Arc<Building>],
    ) -> Option<Vec<Arc<Building>>> {
        let mut size = previous.len().max(1);
        let mut cursor = previous
            .last()
            .map(|b| b.anchor())
            .unwrap_or(Cell::new(0, 0));
        let mut current: Vec<Arc<Building>> = previous.to_vec();
        current.pop();
        let mut sized_up = false;

        while current.len() < size {
            match self.closest_removable(state, cursor, &current) {
                Some(next) => {
                    cursor = next.anchor();
                    current.push(next);
                }
                None => {
                    if let Some(backtrack) = current.pop() {
                        cursor = backtrack.anchor();
                    } else {
                        size += 1;
                        cursor = Cell::new(0, 0);
                        if sized_up {
                            return None;
                        }
                        sized_up = true;
                    }
                }
            }
        }
        Some(current)
    }

    /// Row-major scan for the next removable building anchored after
    /// `from`. Members beyond the first are confined to a window of
    /// `scan_span` rows/columns around the previous member, keeping
    /// clusters spatially tight.
    fn closest_removable(
        &self,
        state: &State,
        from: Cell,
        current: &[Arc<Building>],
    ) -> Option<Arc<Building>> {
        let size = state.size();
        let max_x = match current.last() {
            None => size.x,
            Some(last) => size.x.min(last.anchor().x + self.scan_span),
        };
        for x in from.x..=max_x {
            let min_y = if x == from.x {
                from.y + 1
            } else {
                match current.last() {
                    None => 0,
                    Some(last) => 0.max(last.anchor().y - self.scan_span),
                }
            };
            let max_y = match current.last() {
                None => size.y,
                Some(last) => size.y.min(last.anchor().y + self.scan_span),
            };
            for y in min_y..=max_y {
                let cell = Cell::new(x, y);
                if let Some(building) = state.building_at(cell) {
                    if building.anchor() == cell && self.removable.contains(&building.kind()) {
                        return Some(Arc::clone(building));
                    }
                }
            }
        }
        None
    }

    /// Remove a cluster plus everything it strands: inserters that lost a
    /// neighbour on either working side, then chests no compatible
    /// inserter touches.
    fn remove_cluster(&self, state: &State, cluster: &[Arc<Building>]) -> State {
        let mut result = state.clone();
        for building in cluster {
            result = result.remove_building(building);
        }
        for building in state.buildings_sorted() {
            if building.kind() == BuildingKind::Inserter
                && result.contains(&building)
                && inserter_useless(&building, &result)
            {
                result = result.remove_building(&building);
            }
        }
        for building in state.buildings_sorted() {
            if matches!(
                building.kind(),
                BuildingKind::ProviderChest | BuildingKind::RequestChest
            ) && result.contains(&building)
                && chest_useless(&building, &result)
            {
                result = result.remove_building(&building);
            }
        }
        result
    }

    /// Depth-first branch-and-bound refill from the row-major-first free
    /// cell; keeps the best score found across the whole expansion.
    fn best_refill(&self, state: &State, budget: &mut AttemptBudget) -> State {
        let Some(frontier) = state
            .free_cells()
            .iter()
            .copied()
            .min_by_key(|c| c.x * state.size().y + c.y)
        else {
            return state.clone();
        };
        let mut local_best = state.clone();
        let mut local_score = state.score();
        let planner = GreedyPlanner::bare();
        for &kind in &self.removable {
            for candidate in planner.candidate_states(kind, state, frontier) {
                budget.consume(1);
                let expanded = if !candidate.free_cells().is_empty() && budget.has_budget() {
                    self.best_refill(&candidate, budget)
                } else {
                    candidate
                };
                if expanded.score() > local_score {
                    local_score = expanded.score();
                    local_best = expanded;
                }
            }
        }
        local_best
    }

    // ------------------------------------------------------------------
    // Pair-removal sweep
    // ------------------------------------------------------------------

    /// Deterministic attempt-seeded pairing over the removable list. The
    /// seed rotates which elements pair up so successive sweeps explore
    /// different combinations without random state.
    pub fn pairs_to_remove(
        list: &[Arc<Building>],
        attempts: usize,
    ) -> Vec<(Arc<Building>, Arc<Building>)> {
        if list.len() < 2 {
            return Vec::new();
        }
        let len = list.len();
        let seed = attempts % len;
        let mut pairs = Vec::new();
        for i in 0..seed / 2 {
            pairs.push((Arc::clone(&list[i]), Arc::clone(&list[seed - i - 1])));
        }
        for i in 0..(len - seed) / 2 {
            pairs.push((Arc::clone(&list[i + seed]), Arc::clone(&list[len - i - 1])));
        }
        if len % 2 == 0 && seed % 2 == 1 {
            pairs.push((
                Arc::clone(&list[seed / 2]),
                Arc::clone(&list[(len + seed) / 2]),
            ));
        }
        pairs
    }

    /// Buildings eligible for the pair sweep: removable kinds plus
    /// assemblers, not part of the field's pre-placed base, not in-chain
    /// feeders, and no beacon covering an in-chain feeder. Ordered by how
    /// much space removing them (with connectors) would free.
    pub fn removable_list(&self, state: &State, field: &Field) -> Vec<Arc<Building>> {
        let mut list: Vec<Arc<Building>> = state
            .buildings_sorted()
            .into_iter()
            .filter(|b| {
                self.removable.contains(&b.kind()) || b.kind() == BuildingKind::Assembler
            })
            .filter(|b| field.base().building_at(b.anchor()).is_none())
            .filter(|b| !b.recipe().is_some_and(|r| r.contains('#')))
            .collect();
        let chained: Vec<Arc<Building>> = state
            .buildings_sorted()
            .into_iter()
            .filter(|b| b.recipe().is_some_and(|r| r.contains('#')))
            .collect();
        list.retain(|b| {
            b.kind() != BuildingKind::Beacon
                || !chained
                    .iter()
                    .any(|target| crate::score::beacon_reaches(b, target))
        });
        list.sort_by_cached_key(|b| {
            let freed = remove_with_connectors(state, b).free_cells().len();
            std::cmp::Reverse(freed)
        });
        list
    }

    /// Remove pairs of buildings (with their dedicated connectors) and
    /// refill, keeping improvements. Converges when a full rotation of
    /// pairings yields nothing.
    pub fn sweep_pairs(
        &self,
        state: &State,
        field: &Field,
        book: &RecipeBook,
        budget: &mut AttemptBudget,
    ) -> Result<State, PlanError> {
        let model = ScoreModel::new(book);
        let mut best = state.clone();
        let mut best_score = self.effective_score(&model, &best);
        let mut seed = 0usize;
        let mut stale = 0usize;

        while budget.has_budget() {
            let list = self.removable_list(&best, field);
            if list.len() < 2 {
                return Ok(best);
            }
            let current_score = self.effective_score(&model, &best);
            if current_score > best_score {
                best_score = current_score;
                stale = 0;
            } else if stale > list.len() {
                return Ok(best);
            } else {
                stale += 1;
            }

            for (first, second) in Self::pairs_to_remove(&list, seed) {
                if !budget.has_budget() {
                    break;
                }
                if !best.contains(&first) || !best.contains(&second) {
                    continue;
                }
                let removed =
                    remove_with_connectors(&remove_with_connectors(&best, &first), &second);
                let refill = self.best_refill(&removed, budget);
                let refill_score = self.effective_score(&model, &refill);
                if refill_score > best_score + self.epsilon {
                    debug!(
                        "pair sweep: {:?}/{:?} lifted score to {:.5}",
                        first.kind(),
                        second.kind(),
                        refill_score
                    );
                    best = refill;
                    best_score = refill_score;
                }
            }
            seed += 1;
        }
        Ok(best)
    }

    fn effective_score(&self, model: &ScoreModel, state: &State) -> f64 {
        model
            .layout_score(state)
            .map(|(score, _)| score)
            .unwrap_or_else(|| state.score())
    }
}

/// An inserter is stranded when either cell along its working axis is
/// empty.
fn inserter_useless(inserter: &Building, state: &State) -> bool {
    let anchor = inserter.anchor();
    let along_x = inserter
        .orientation()
        .map(|d| d.along_x())
        .unwrap_or(false);
    let (dx, dy) = if along_x { (1, 0) } else { (0, 1) };
    state.building_at(anchor.shifted(dx, dy)).is_none()
        || state.building_at(anchor.shifted(-dx, -dy)).is_none()
}

/// A chest is stranded when no adjacent inserter works along the axis
/// that touches it.
fn chest_useless(chest: &Building, state: &State) -> bool {
    let anchor = chest.anchor();
    let vertical_feed = |cell: Cell| {
        state.building_at(cell).is_some_and(|b| {
            b.kind() == BuildingKind::Inserter && !b.orientation().unwrap().along_x()
        })
    };
    let horizontal_feed = |cell: Cell| {
        state.building_at(cell).is_some_and(|b| {
            b.kind() == BuildingKind::Inserter && b.orientation().unwrap().along_x()
        })
    };
    !(vertical_feed(anchor.up())
        || vertical_feed(anchor.down())
        || horizontal_feed(anchor.left())
        || horizontal_feed(anchor.right()))
}

/// Remove a producer together with its dedicated connectors: the
/// inserters that feed it from request chests or feed provider chests
/// from it, plus any of those chests served by no other inserter.
/// Beacons have no connectors and are removed alone.
pub fn remove_with_connectors(state: &State, building: &Building) -> State {
    if building.kind() == BuildingKind::Beacon {
        return state.remove_building(building);
    }
    let connectors: Vec<Arc<Building>> = state
        .buildings_sorted()
        .into_iter()
        .filter(|b| b.kind() == BuildingKind::Inserter)
        .filter(|i| {
            let feeds_in = i
                .inserter_dropoff()
                .is_some_and(|c| building.footprint().contains(c))
                && i.inserter_pickup()
                    .and_then(|c| state.building_at(c).cloned())
                    .is_some_and(|b| b.kind() == BuildingKind::RequestChest);
            let feeds_out = i
                .inserter_pickup()
                .is_some_and(|c| building.footprint().contains(c))
                && i.inserter_dropoff()
                    .and_then(|c| state.building_at(c).cloned())
                    .is_some_and(|b| b.kind() == BuildingKind::ProviderChest);
            feeds_in || feeds_out
        })
        .collect();

    let chests: Vec<Arc<Building>> = connectors
        .iter()
        .filter_map(|i| {
            let dropoff = state.building_at(i.inserter_dropoff()?).cloned();
            let pickup = state.building_at(i.inserter_pickup()?).cloned();
            match dropoff {
                Some(b)
                    if matches!(
                        b.kind(),
                        BuildingKind::ProviderChest | BuildingKind::RequestChest
                    ) =>
                {
                    Some(b)
                }
                _ => pickup,
            }
        })
        .filter(|chest| {
            matches!(
                chest.kind(),
                BuildingKind::ProviderChest | BuildingKind::RequestChest
            )
        })
        .filter(|chest| {
            // Only drop chests with exactly one serving inserter.
            let touching = state
                .buildings()
                .filter(|b| b.kind() == BuildingKind::Inserter)
                .filter(|i| {
                    i.inserter_dropoff()
                        .is_some_and(|c| chest.footprint().contains(c))
                        || i.inserter_pickup()
                            .is_some_and(|c| chest.footprint().contains(c))
                })
                .count();
            touching == 1
        })
        .collect();

    if connectors.is_empty() {
        warn!(
            "removing {:?} at {:?} with no connectors attached",
            building.kind(),
            building.anchor()
        );
    }

    let mut result = state.remove_building(building);
    for chest in &chests {
        if result.contains(chest) {
            result = result.remove_building(chest);
        }
    }
    for inserter in &connectors {
        if result.contains(inserter) {
            result = result.remove_building(inserter);
        }
    }
    result
}

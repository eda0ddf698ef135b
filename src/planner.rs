//! The planning pipeline: greedy construction to a fixed point, then
//! local-search improvement, with per-item placement steps for recipe
//! driven builds.
//!
//! I/O happens only at phase boundaries through the `ProgressSink`; the
//! search loops themselves are pure computation over `State` snapshots.

use crate::budget::AttemptBudget;
use crate::building::{Building, BuildingKind, Liquid, ModuleTier};
use crate::cell::{Cell, Direction};
use crate::constants::*;
use crate::error::PlanError;
use crate::field::Field;
use crate::greedy::{ChestRole, GreedyPlanner};
use crate::improve::Improver;
use crate::recipe::{is_fluid_ingredient, RecipeBook};
use crate::router::FlowRouter;
use crate::score::ScoreModel;
use crate::state::State;
use fnv::FnvHashSet;
use log::{debug, info};
use std::collections::BTreeSet;

/// Receives phase and score events from the pipeline. Implementations
/// must not mutate planning state; they exist so drivers can surface
/// progress without parsing logs.
pub trait ProgressSink {
    fn phase_started(&self, phase: &str);
    fn score_update(&self, phase: &str, score: f64, attempts: u64);
}

/// Default sink: forwards everything to the `log` facade.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn phase_started(&self, phase: &str) {
        info!("phase started: {}", phase);
    }

    fn score_update(&self, phase: &str, score: f64, attempts: u64) {
        info!("{}: score {:.5} after {} attempts", phase, score, attempts);
    }
}

static LOG_SINK: LogSink = LogSink;

pub struct LayoutPlanner<'a> {
    book: &'a RecipeBook,
    field: &'a Field,
    sink: &'a dyn ProgressSink,
}

impl<'a> LayoutPlanner<'a> {
    pub fn new(book: &'a RecipeBook, field: &'a Field) -> Self {
        LayoutPlanner {
            book,
            field,
            sink: &LOG_SINK,
        }
    }

    pub fn with_sink(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    /// Greedy fill, then improve. Errors with `NoSolution` when the
    /// greedy pass cannot place anything at all; otherwise returns the
    /// best state found within the budget.
    pub fn plan(
        &self,
        initial: &State,
        kinds: &[BuildingKind],
        budget: &mut AttemptBudget,
    ) -> Result<State, PlanError> {
        self.sink.phase_started("greedy");
        let greedy = GreedyPlanner::bare().run(initial, kinds);
        if greedy.building_count() == initial.building_count() {
            return Err(PlanError::NoSolution);
        }
        self.sink.score_update("greedy", greedy.score(), budget.used());

        self.sink.phase_started("improve");
        let improver = Improver {
            removable: kinds.to_vec(),
            ..Improver::default()
        };
        let improved = improver.improve(&greedy, budget)?;
        self.sink
            .score_update("improve", improved.score(), budget.used());
        Ok(improved)
    }

    /// Place crafters (with chest hookups, liquid routing and beacon
    /// insertion) for one item until its score reaches `target`.
    ///
    /// Returns the extended state, `None` when no further step is
    /// possible before the target is met. Budget exhaustion returns the
    /// best state reached so far.
    pub fn plan_item(
        &self,
        state: &State,
        item: &str,
        target: f64,
        budget: &mut AttemptBudget,
    ) -> Option<State> {
        let model = ScoreModel::new(self.book);
        let mut current = state.clone();
        let mut score = model.item_score(&current, item);
        let mut dead_ends: FnvHashSet<Cell> = FnvHashSet::default();

        while score < target {
            if !budget.has_budget() {
                return Some(current);
            }
            budget.consume(1);
            // A beacon over existing producers is always a candidate step
            // once something is on the ground.
            let mut next: Option<(State, f64)> = None;
            if score > 0.0 {
                if let Some(boosted) = self.place_beacon_near(&current, item) {
                    let boosted_score = model.item_score(&boosted, item);
                    next = Some((boosted, boosted_score));
                }
            }

            for anchor in self.candidate_cells(&current, item) {
                if dead_ends.contains(&anchor) {
                    continue;
                }
                budget.consume(1);
                debug!("trying {} at {:?}", item, anchor);
                match self.step_item(anchor, &current, item) {
                    None => {
                        dead_ends.insert(anchor);
                        continue;
                    }
                    Some((placed, placed_score)) => {
                        if next
                            .as_ref()
                            .map_or(true, |(_, best)| placed_score > *best)
                        {
                            next = Some((placed, placed_score));
                        }
                        break;
                    }
                }
            }

            match next {
                None => {
                    debug!("no further step for {}", item);
                    return None;
                }
                Some((state, new_score)) => {
                    self.sink.score_update(item, new_score, budget.used());
                    current = state;
                    score = new_score;
                }
            }
        }
        Some(current)
    }

    /// One crafter placement for `item` anchored at `anchor`: the
    /// building itself, routed liquid inputs, and chest hookups. Picks
    /// the best hookup by rate, then freed space, then serial.
    fn step_item(&self, anchor: Cell, state: &State, item: &str) -> Option<(State, f64)> {
        let model = ScoreModel::new(self.book);
        let recipe = self.book.get(item)?;
        let liquids: Vec<Liquid> = recipe
            .ingredients
            .keys()
            .filter(|i| is_fluid_ingredient(i))
            .filter_map(|i| Liquid::from_name(i))
            .collect();

        let mut candidates: Vec<(State, Building)> = Vec::new();
        if liquids.is_empty() {
            let building = match recipe.crafter {
                BuildingKind::Smelter => Building::smelter(anchor, Some(item.to_string())),
                BuildingKind::Lab => Building::lab(anchor),
                _ => Building::assembler(anchor, Some(item.to_string()), None),
            };
            if let Some(placed) = state.add_building(building.clone()) {
                self.hook_up_chests(&placed, &building, item, &mut candidates);
            }
        } else {
            for orientation in Direction::ALL {
                let building = match recipe.crafter {
                    BuildingKind::ChemicalPlant => {
                        Building::chemical_plant(anchor, Some(item.to_string()), orientation)
                    }
                    _ => Building::assembler(anchor, Some(item.to_string()), Some(orientation)),
                };
                let Some(placed) = state.add_building(building.clone()) else {
                    continue;
                };
                let router = FlowRouter::new(self.field);
                let mut routed = Some(placed);
                for liquid in &liquids {
                    routed =
                        routed.and_then(|s| router.route_building_input(&s, &building, *liquid));
                }
                if let Some(routed) = routed {
                    self.hook_up_chests(&routed, &building, item, &mut candidates);
                }
            }
        }

        candidates.sort_by(|(a_state, a_building), (b_state, b_building)| {
            let a_rate = model.building_rate(a_state, a_building, item);
            let b_rate = model.building_rate(b_state, b_building, item);
            b_rate
                .total_cmp(&a_rate)
                .then(b_state.free_cells().len().cmp(&a_state.free_cells().len()))
                .then(a_state.serial().cmp(&b_state.serial()))
        });
        let (best, _) = candidates.into_iter().next()?;
        let best_score = ScoreModel::new(self.book).item_score(&best, item);
        Some((best, best_score))
    }

    fn hook_up_chests(
        &self,
        state: &State,
        building: &Building,
        item: &str,
        out: &mut Vec<(State, Building)>,
    ) {
        let planner = GreedyPlanner::with_context(self.field, self.book);
        let provided: BTreeSet<String> = [item.to_string()].into_iter().collect();
        for with_input in planner.chest_hookups(state, building, ChestRole::Request, &BTreeSet::new())
        {
            for with_output in
                planner.chest_hookups(&with_input, building, ChestRole::Provider, &provided)
            {
                out.push((with_output, building.clone()));
            }
        }
    }

    /// The best single beacon placement near the item's producers, by the
    /// beacon's own contribution, then freed space.
    fn place_beacon_near(&self, state: &State, item: &str) -> Option<State> {
        let model = ScoreModel::new(self.book);
        let mut best: Option<(State, f64)> = None;
        for producer in model.buildings_for_item(state, item) {
            let producer_anchor = producer.anchor();
            let mut spots: Vec<Cell> = state
                .free_cells()
                .iter()
                .copied()
                .filter(|c| c.chebyshev_to(producer_anchor) < BEACON_ANCHOR_REACH)
                .collect();
            spots.sort();
            for spot in spots {
                let beacon = Building::beacon(spot, ModuleTier::Three);
                let Some(placed) = state.add_building(beacon.clone()) else {
                    continue;
                };
                let contribution = model.building_rate(&placed, &beacon, item);
                let better = match &best {
                    None => true,
                    Some((incumbent, incumbent_score)) => {
                        contribution > *incumbent_score
                            || (contribution == *incumbent_score
                                && placed.free_cells().len() > incumbent.free_cells().len())
                    }
                };
                if better {
                    best = Some((placed, contribution));
                }
            }
        }
        best.map(|(state, _)| state)
    }

    /// Free cells ranked for placing an item's crafter: inside the
    /// assembly zone, nearest (ingredient-amount weighted) to the chests
    /// supplying its ingredients, best beacon coverage first among those.
    fn candidate_cells(&self, state: &State, item: &str) -> Vec<Cell> {
        let Some(recipe) = self.book.get(item) else {
            return Vec::new();
        };
        let mut supply_centroids: Vec<(Cell, f64)> = Vec::new();
        for (ingredient, amount) in &recipe.ingredients {
            let sources: Vec<Cell> = state
                .buildings_sorted()
                .into_iter()
                .filter_map(|b| match b.as_ref() {
                    Building::ProviderChest { items, footprint } if items.contains(ingredient) => {
                        Some(footprint.anchor())
                    }
                    _ => None,
                })
                .collect();
            if sources.is_empty() {
                continue;
            }
            let centroid = Cell::new(
                (sources.iter().map(|c| c.x).sum::<i32>() as f64 / sources.len() as f64).round()
                    as i32,
                (sources.iter().map(|c| c.y).sum::<i32>() as f64 / sources.len() as f64).round()
                    as i32,
            );
            supply_centroids.push((centroid, *amount));
        }

        let mut cells: Vec<Cell> = state
            .free_cells()
            .iter()
            .copied()
            .filter(|c| self.field.assembly().contains(*c))
            .collect();
        cells.sort_by(|a, b| {
            let weight = |cell: Cell| -> f64 {
                supply_centroids
                    .iter()
                    .map(|(centroid, amount)| cell.euclidean_to(*centroid) * amount)
                    .sum()
            };
            weight(*a).total_cmp(&weight(*b)).then(a.cmp(b))
        });
        cells.truncate(CANDIDATE_CELL_LIMIT);
        // Stable: supply distance stays the tie-break within equal
        // coverage.
        cells.sort_by_key(|c| std::cmp::Reverse(state.performance_at(*c)));
        cells
    }
}

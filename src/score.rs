//! Per-item scoring over a placement state.
//!
//! Producers contribute a base rate plus the beacon bonus at their anchor;
//! beacons mirror that accounting by counting the producers they reach, so
//! the two directions agree. The layout as a whole is only as good as its
//! worst item: `layout_score` is the minimum per-item score across all
//! non-base items.

use crate::building::{Building, BuildingKind};
use crate::constants::*;
use crate::recipe::{base_item_of, is_productivity_capped, RecipeBook};
use crate::state::State;
use itertools::Itertools;
use log::debug;
use std::sync::Arc;

pub struct ScoreModel<'a> {
    book: &'a RecipeBook,
}

impl<'a> ScoreModel<'a> {
    pub fn new(book: &'a RecipeBook) -> Self {
        ScoreModel { book }
    }

    /// The minimum per-item score and the item that attains it, or `None`
    /// when the book has no non-base items.
    pub fn layout_score(&self, state: &State) -> Option<(f64, String)> {
        self.score_map(state, false)
            .into_iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }

    /// Score per non-base item.
    pub fn score_map(&self, state: &State, log: bool) -> Vec<(f64, String)> {
        self.book
            .non_base_items()
            .into_iter()
            .map(|item| {
                let score = self.item_score(state, item);
                if log {
                    debug!(
                        "item {}: {} buildings, score {:.4}",
                        item,
                        self.buildings_for_item(state, item).len(),
                        score
                    );
                }
                (score, item.to_string())
            })
            .collect()
    }

    pub fn item_score(&self, state: &State, item: &str) -> f64 {
        self.item_score_with_productivity(state, item, self.book.productivity_of(item))
    }

    pub fn item_score_with_productivity(
        &self,
        state: &State,
        item: &str,
        productivity: f64,
    ) -> f64 {
        let buildings = self.buildings_for_item(state, item);
        let total: f64 = if CHAINED_ITEMS.contains(&base_item_of(item)) {
            buildings
                .iter()
                .map(|b| self.chained_rate(state, b, item).0)
                .sum()
        } else {
            buildings
                .iter()
                .map(|b| self.building_rate(state, b, item))
                .sum()
        };
        total / productivity
    }

    /// Rate contribution of one building toward one item.
    pub fn building_rate(&self, state: &State, building: &Building, item: &str) -> f64 {
        let capped = is_productivity_capped(item);
        let bonus = BEACON_BONUS * state.performance_at(building.anchor()) as f64;
        match building.kind() {
            BuildingKind::Assembler
            | BuildingKind::ChemicalPlant
            | BuildingKind::Smelter => {
                let tier = building.module_tier().unwrap_or_default();
                crafting_rate(building.kind(), tier, capped) + bonus
            }
            BuildingKind::Lab => crafting_rate(BuildingKind::Lab, Default::default(), capped) + bonus,
            BuildingKind::Beacon => {
                // Mirror of the forward bonus: count reached producers.
                self.buildings_for_item(state, item)
                    .iter()
                    .filter(|target| beacon_reaches(building, target))
                    .count() as f64
                    * BEACON_BONUS
            }
            BuildingKind::RocketSilo | BuildingKind::OilRefinery => {
                // Too large for the anchor-keyed coverage map; scan beacons
                // against the bounding window instead.
                let tier = building.module_tier().unwrap_or_default();
                let base = crafting_rate(building.kind(), tier, capped);
                let beacon_sum: f64 = state
                    .buildings()
                    .filter(|b| b.kind() == BuildingKind::Beacon)
                    .filter(|beacon| beacon_reaches(beacon, building))
                    .count() as f64
                    * BEACON_BONUS;
                base + beacon_sum
            }
            BuildingKind::Inserter
            | BuildingKind::RequestChest
            | BuildingKind::ProviderChest
            | BuildingKind::SteelChest
            | BuildingKind::Pipe
            | BuildingKind::UndergroundPipe
            | BuildingKind::StorageTank
            | BuildingKind::Pump
            | BuildingKind::Roboport
            | BuildingKind::TrainStop
            | BuildingKind::Empty => 0.0,
        }
    }

    /// For multi-stage items the effective rate of a crafter is bounded by
    /// its in-chain feeders; returns the binding rate and building.
    fn chained_rate<'b>(
        &self,
        state: &State,
        building: &'b Arc<Building>,
        item: &str,
    ) -> (f64, Arc<Building>) {
        let mut rate = self.building_rate(state, building, item);
        let mut binding = Arc::clone(building);

        let mut consider = |feeder: Option<Arc<Building>>, feeder_item: &str| {
            if let Some(feeder) = feeder {
                let factor = chain_factor(feeder.recipe().unwrap_or(feeder_item));
                let feeder_rate = self.building_rate(state, &feeder, feeder_item) * factor;
                if feeder_rate < rate {
                    rate = feeder_rate;
                    binding = feeder;
                }
            }
        };

        match base_item_of(item) {
            "electronic-circuit" => {
                consider(
                    self.feeder_of(state, building, |b| {
                        b.kind() == BuildingKind::Assembler && b.recipe() == Some("copper-cable#green")
                    }),
                    "copper-cable",
                );
            }
            "rocket-fuel" => {
                consider(
                    self.feeder_of(state, building, |b| {
                        b.kind() == BuildingKind::ChemicalPlant
                            && b.recipe() == Some("solid-fuel-from-light-oil")
                    }),
                    "solid-fuel-from-light-oil",
                );
            }
            "processing-unit" => {
                let green = self.feeder_of(state, building, |b| {
                    b.kind() == BuildingKind::Assembler
                        && b.recipe() == Some("electronic-circuit#blue")
                });
                if let Some(green) = green.clone() {
                    consider(Some(Arc::clone(&green)), "electronic-circuit");
                    consider(
                        self.feeder_of(state, &green, |b| {
                            b.kind() == BuildingKind::Assembler
                                && b.recipe() == Some("copper-cable#blue")
                        }),
                        "copper-cable",
                    );
                }
            }
            "steel-plate" => {
                consider(
                    self.feeder_of(state, building, |b| b.kind() == BuildingKind::Smelter),
                    "iron-plate",
                );
            }
            _ => {}
        }

        (rate, binding)
    }

    /// The building feeding `target` through an inserter, matching the
    /// given predicate.
    fn feeder_of<F>(&self, state: &State, target: &Building, pred: F) -> Option<Arc<Building>>
    where
        F: Fn(&Building) -> bool,
    {
        state
            .buildings_sorted()
            .into_iter()
            .filter(|b| b.kind() == BuildingKind::Inserter)
            .filter(|i| {
                i.inserter_dropoff()
                    .map(|c| target.footprint().contains(c))
                    .unwrap_or(false)
            })
            .filter_map(|i| {
                let source = state.building_at(i.inserter_pickup()?)?;
                if pred(source) && !std::ptr::eq(source.as_ref(), target) {
                    Some(Arc::clone(source))
                } else {
                    None
                }
            })
            .next()
    }

    /// Buildings whose output counts toward an item, in deterministic
    /// order.
    pub fn buildings_for_item(&self, state: &State, item: &str) -> Vec<Arc<Building>> {
        let crafter_filter: Box<dyn Fn(&Building) -> bool> = match item {
            "crude-oil" => Box::new(|b: &Building| b.kind() == BuildingKind::OilRefinery),
            "heavy-oil" => Box::new(|b: &Building| {
                b.kind() == BuildingKind::ChemicalPlant && b.recipe() == Some("heavy-oil-cracking")
            }),
            "light-oil" => Box::new(|b: &Building| {
                b.kind() == BuildingKind::ChemicalPlant && b.recipe() == Some("light-oil-cracking")
            }),
            "solid-fuel" => Box::new(|b: &Building| {
                b.kind() == BuildingKind::ChemicalPlant
                    && b.recipe() == Some("solid-fuel-from-light-oil")
            }),
            "battery" | "plastic-bar" | "sulfuric-acid" | "sulfur" | "lubricant" => {
                let item = item.to_string();
                Box::new(move |b: &Building| {
                    b.kind() == BuildingKind::ChemicalPlant && b.recipe() == Some(item.as_str())
                })
            }
            "stone-brick" | "copper-plate" | "iron-plate" => {
                Box::new(|b: &Building| b.kind() == BuildingKind::Smelter)
            }
            "steel-plate" => Box::new(|b: &Building| {
                b.kind() == BuildingKind::Smelter && b.recipe() == Some("steel-plate")
            }),
            "space-science-pack" => Box::new(|b: &Building| b.kind() == BuildingKind::RocketSilo),
            "science-approximation" => Box::new(|b: &Building| b.kind() == BuildingKind::Lab),
            _ => {
                let item = item.to_string();
                Box::new(move |b: &Building| {
                    b.kind() == BuildingKind::Assembler && b.recipe() == Some(item.as_str())
                })
            }
        };
        state
            .buildings_sorted()
            .into_iter()
            .filter(|b| crafter_filter(b))
            .collect_vec()
    }
}

/// Whether a beacon's effect window reaches a building. 3x3 targets use
/// the anchor Chebyshev rule; larger footprints use a center-to-edge
/// window test.
pub fn beacon_reaches(beacon: &Building, target: &Building) -> bool {
    debug_assert_eq!(beacon.kind(), BuildingKind::Beacon);
    let side = target.side();
    if side == 3 {
        return beacon.anchor().chebyshev_to(target.anchor()) < BEACON_ANCHOR_REACH;
    }
    let beacon_center_x = beacon.anchor().x as f64 + BEACON_SIDE as f64 / 2.0;
    let beacon_center_y = beacon.anchor().y as f64 + BEACON_SIDE as f64 / 2.0;
    let half = side as f64 / 2.0;
    let dx = (beacon_center_x - target.anchor().x as f64 - half).abs() - half;
    let dy = (beacon_center_y - target.anchor().y as f64 - half).abs() - half;
    dx < BEACON_WINDOW_REACH && dy < BEACON_WINDOW_REACH
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::building::ModuleTier;
    use crate::cell::{Cell, Direction};
    use crate::recipe::RecipeInfo;

    fn book() -> RecipeBook {
        let mut book = RecipeBook::new();
        book.insert(
            RecipeInfo::new("iron-gear-wheel", 1.0, BuildingKind::Assembler)
                .with_ingredient("iron-plate", 2.0),
        );
        book.insert(RecipeInfo::new("iron-plate", 1.2, BuildingKind::Smelter));
        book.add_base_item("iron-ore");
        book
    }

    fn grid() -> State {
        State::empty(Cell::new(30, 30))
    }

    #[test]
    fn assembler_rate_includes_beacon_bonus() {
        let book = book();
        let model = ScoreModel::new(&book);
        let assembler = Building::assembler(Cell::new(10, 10), Some("iron-gear-wheel".into()), None);
        let state = grid().add_building(assembler.clone()).unwrap();
        assert!((model.building_rate(&state, &assembler, "iron-gear-wheel") - 3.0).abs() < 1e-9);

        let boosted = state
            .add_building(Building::beacon(Cell::new(14, 10), ModuleTier::Three))
            .unwrap();
        assert!((model.building_rate(&boosted, &assembler, "iron-gear-wheel") - 3.5).abs() < 1e-9);
    }

    #[test]
    fn capped_items_use_the_reduced_base() {
        let book = book();
        let model = ScoreModel::new(&book);
        let smelter = Building::smelter(Cell::new(10, 10), Some("iron-plate".into()));
        let state = grid().add_building(smelter.clone()).unwrap();
        assert!((model.building_rate(&state, &smelter, "iron-plate") - 0.7).abs() < 1e-9);
        // The per-item score divides by the recipe's productivity.
        assert!((model.item_score(&state, "iron-plate") - 0.7 / 1.2).abs() < 1e-9);
    }

    #[test]
    fn beacon_mirrors_the_forward_bonus() {
        let book = book();
        let model = ScoreModel::new(&book);
        let near = Building::assembler(Cell::new(10, 10), Some("iron-gear-wheel".into()), None);
        let far = Building::assembler(Cell::new(20, 20), Some("iron-gear-wheel".into()), None);
        let beacon = Building::beacon(Cell::new(13, 13), ModuleTier::Three);
        let state = grid()
            .add_buildings([near.clone(), far.clone(), beacon.clone()])
            .unwrap();
        // Beacon reaches only the near assembler.
        assert!((model.building_rate(&state, &beacon, "iron-gear-wheel") - 0.5).abs() < 1e-9);

        let forward_bonus = model.building_rate(&state, &near, "iron-gear-wheel")
            + model.building_rate(&state, &far, "iron-gear-wheel")
            - 2.0 * 3.0;
        assert!((forward_bonus - 0.5).abs() < 1e-9);
    }

    #[test]
    fn refinery_reach_uses_the_window_rule() {
        let refinery = Building::oil_refinery(Cell::new(10, 10), Direction::Up);
        // Centered beacon next to the 5x5 footprint.
        let touching = Building::beacon(Cell::new(15, 11), ModuleTier::Three);
        assert!(beacon_reaches(&touching, &refinery));
        let distant = Building::beacon(Cell::new(19, 11), ModuleTier::Three);
        assert!(!beacon_reaches(&distant, &refinery));
    }

    #[test]
    fn layout_score_is_the_worst_item() {
        let book = book();
        let model = ScoreModel::new(&book);
        let state = grid()
            .add_buildings([
                Building::assembler(Cell::new(5, 5), Some("iron-gear-wheel".into()), None),
                Building::smelter(Cell::new(12, 5), Some("iron-plate".into())),
            ])
            .unwrap();
        let (score, item) = model.layout_score(&state).unwrap();
        assert_eq!(item, "iron-plate");
        assert!(score < model.item_score(&state, "iron-gear-wheel"));
    }

    #[test]
    fn steel_chain_is_bounded_by_its_feeder() {
        let mut book = book();
        book.insert(RecipeInfo::new("steel-plate", 1.2, BuildingKind::Smelter));
        let model = ScoreModel::new(&book);

        let steel = Building::smelter(Cell::new(10, 10), Some("steel-plate".into()));
        let iron = Building::smelter(Cell::new(14, 10), Some("iron-plate".into()));
        // Inserter at (13, 11) facing right: picks from the iron smelter,
        // drops into the steel smelter.
        let feed = Building::inserter(Cell::new(13, 11), Direction::Right);
        let state = grid()
            .add_buildings([steel.clone(), iron.clone(), feed])
            .unwrap();

        // Both smelters run capped at 0.7; the feeder binds at the same
        // rate, so the chain minimum equals the direct rate.
        let direct = model.building_rate(&state, &steel, "steel-plate");
        assert!((model.item_score(&state, "steel-plate") - direct / 1.2).abs() < 1e-9);

        // Boost the steel smelter only: the unboosted feeder now binds.
        let boosted = state
            .add_building(Building::beacon(Cell::new(6, 10), ModuleTier::Three))
            .unwrap();
        assert!((model.item_score(&boosted, "steel-plate") - direct / 1.2).abs() < 1e-9);
    }
}

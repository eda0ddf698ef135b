//! Logistics load estimation over the staging band.
//!
//! Walks the inserter graph behind every provider and request chest to
//! find what each one carries, weights provider->requester flows by
//! distance, and sizes the roboport fleet from the total.

use crate::building::{Building, BuildingKind};
use crate::cell::Cell;
use crate::constants::ROBOPORT_FLOW_CAPACITY;
use crate::field::Field;
use crate::recipe::{base_item_of, is_fluid_ingredient, RecipeBook};
use crate::score::ScoreModel;
use crate::state::State;
use fnv::FnvHashMap;
use log::{debug, warn};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct LogisticsEstimate {
    /// Distance-weighted item flow across the staging band.
    pub flow_cost: f64,
    /// Roboports needed to carry it.
    pub roboports: u32,
}

/// Estimate the logistics load of a layout.
pub fn estimate(state: &State, field: &Field, book: &RecipeBook) -> LogisticsEstimate {
    let model = ScoreModel::new(book);
    let providers = provider_flows(state, field, book, &model);
    let requests = request_flows(state, field, book, &model);

    let mut flow_cost = 0.0;
    for (item, demands) in &requests {
        let Some(supplies) = providers.get(item) else {
            debug!("no providers for {}", item);
            continue;
        };
        let supply_total: f64 = supplies.iter().map(|(_, amount)| amount).sum();
        if supply_total <= 0.0 {
            continue;
        }
        for (request_cell, amount) in demands {
            for (provider_cell, provided) in supplies {
                let distance = request_cell.euclidean_to(*provider_cell);
                flow_cost += amount * provided * distance / supply_total / 4.0;
            }
        }
    }

    LogisticsEstimate {
        flow_cost,
        roboports: (flow_cost / ROBOPORT_FLOW_CAPACITY) as u32 + 1,
    }
}

/// What and how much each provider chest in the staging band offers.
fn provider_flows(
    state: &State,
    field: &Field,
    book: &RecipeBook,
    model: &ScoreModel,
) -> FnvHashMap<String, Vec<(Cell, f64)>> {
    let mut flows: FnvHashMap<String, Vec<(Cell, f64)>> = FnvHashMap::default();
    for chest in state.buildings_sorted() {
        let Building::ProviderChest { items, .. } = chest.as_ref() else {
            continue;
        };
        if !field.staging().contains(chest.anchor()) {
            continue;
        }
        if items.is_empty() {
            warn!("provider chest at {:?} offers nothing", chest.anchor());
            continue;
        }
        // Raw-item buffers feed from outside the layout; their supply is
        // effectively unbounded.
        if items.iter().next().is_some_and(|item| book.is_base(item)) {
            let item = items.iter().next().unwrap().clone();
            flows.entry(item).or_default().push((chest.anchor(), 100.0));
            continue;
        }
        for inserter in inserters_dropping_at(state, chest.anchor()) {
            let Some(source) = traced_source(state, &inserter, false) else {
                continue;
            };
            if source.kind() == BuildingKind::RequestChest {
                continue;
            }
            let Some(item) = crafted_item(&source) else {
                continue;
            };
            let amount = provided_amount(state, book, model, &source, &item);
            flows
                .entry(base_item_of(&item).to_string())
                .or_default()
                .push((chest.anchor(), amount));
        }
    }
    flows
}

/// What and how much each request chest in the staging band demands,
/// fanned out over the ingredients of whatever it feeds.
fn request_flows(
    state: &State,
    field: &Field,
    book: &RecipeBook,
    model: &ScoreModel,
) -> FnvHashMap<String, Vec<(Cell, f64)>> {
    let mut flows: FnvHashMap<String, Vec<(Cell, f64)>> = FnvHashMap::default();
    for chest in state.buildings_sorted() {
        if chest.kind() != BuildingKind::RequestChest {
            continue;
        }
        if !field.staging().contains(chest.anchor()) {
            continue;
        }
        for inserter in inserters_picking_at(state, chest.anchor()) {
            let Some(consumer) = traced_source(state, &inserter, true) else {
                continue;
            };
            let Some(item) = crafted_item(&consumer) else {
                continue;
            };
            let Some(recipe) = book.get(&item) else {
                continue;
            };
            let output = provided_amount(state, book, model, &consumer, &item);
            for (ingredient, needed) in &recipe.ingredients {
                if is_fluid_ingredient(ingredient) {
                    continue;
                }
                if fed_in_chain(&item, ingredient) {
                    continue;
                }
                let amount = output / recipe.amount.max(f64::MIN_POSITIVE) * needed;
                flows
                    .entry(ingredient.clone())
                    .or_default()
                    .push((chest.anchor(), amount));
            }
        }
    }
    flows
}

/// Ingredients produced inside a crafting chain are never requested from
/// the network.
fn fed_in_chain(item: &str, ingredient: &str) -> bool {
    let base = base_item_of(item);
    (base == "processing-unit" && ingredient == "electronic-circuit")
        || (base == "electronic-circuit" && ingredient == "copper-cable")
        || (base == "sulfuric-acid" && ingredient == "sulfur")
}

fn inserters_dropping_at(state: &State, cell: Cell) -> Vec<Arc<Building>> {
    state
        .buildings_sorted()
        .into_iter()
        .filter(|b| b.kind() == BuildingKind::Inserter)
        .filter(|i| i.inserter_dropoff() == Some(cell))
        .collect()
}

fn inserters_picking_at(state: &State, cell: Cell) -> Vec<Arc<Building>> {
    state
        .buildings_sorted()
        .into_iter()
        .filter(|b| b.kind() == BuildingKind::Inserter)
        .filter(|i| i.inserter_pickup() == Some(cell))
        .collect()
}

/// Follow an inserter to the building it serves; a steel chest buffer is
/// traced one hop further. `downstream` selects the dropoff side.
fn traced_source(state: &State, inserter: &Building, downstream: bool) -> Option<Arc<Building>> {
    let cell = if downstream {
        inserter.inserter_dropoff()?
    } else {
        inserter.inserter_pickup()?
    };
    let direct = state.building_at(cell)?.clone();
    if direct.kind() != BuildingKind::SteelChest {
        return Some(direct);
    }
    let hop = state
        .buildings_sorted()
        .into_iter()
        .filter(|b| b.kind() == BuildingKind::Inserter)
        .find(|i| {
            if downstream {
                i.inserter_pickup() == Some(direct.anchor())
            } else {
                i.inserter_dropoff() == Some(direct.anchor())
            }
        })?;
    let next_cell = if downstream {
        hop.inserter_dropoff()?
    } else {
        hop.inserter_pickup()?
    };
    state.building_at(next_cell).cloned()
}

fn crafted_item(building: &Building) -> Option<String> {
    match building.kind() {
        BuildingKind::Assembler | BuildingKind::ChemicalPlant => {
            building.recipe().map(str::to_string)
        }
        BuildingKind::Smelter => Some(
            building
                .recipe()
                .map(str::to_string)
                .unwrap_or_else(|| "stone-brick".to_string()),
        ),
        BuildingKind::RocketSilo => Some("space-science-pack".to_string()),
        BuildingKind::Lab => Some("science-approximation".to_string()),
        _ => None,
    }
}

fn provided_amount(
    state: &State,
    book: &RecipeBook,
    model: &ScoreModel,
    source: &Building,
    item: &str,
) -> f64 {
    model.building_rate(state, source, base_item_of(item)) / book.productivity_of(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Direction;
    use crate::field::Rect;
    use crate::recipe::RecipeInfo;

    fn fixture() -> (State, Field, RecipeBook) {
        let mut book = RecipeBook::new();
        book.insert(
            RecipeInfo::new("iron-gear-wheel", 1.0, BuildingKind::Assembler)
                .with_ingredient("iron-plate", 2.0),
        );
        book.insert(RecipeInfo::new("iron-plate", 1.2, BuildingKind::Smelter));
        book.add_base_item("iron-ore");

        // Assembler fed from a request chest and feeding a provider chest.
        let assembler =
            Building::assembler(Cell::new(8, 8), Some("iron-gear-wheel".into()), None);
        let request = Building::request_chest(Cell::new(8, 6));
        let feed = Building::inserter(Cell::new(8, 7), Direction::Up);
        let provider = Building::provider_chest(
            Cell::new(8, 12),
            ["iron-gear-wheel".to_string()].into_iter().collect(),
        );
        let drain = Building::inserter(Cell::new(8, 11), Direction::Up);
        let state = State::empty(Cell::new(24, 24))
            .add_buildings([assembler, request, feed, provider, drain])
            .unwrap();

        let base = State::empty(Cell::new(24, 24));
        let everywhere = Rect::new(Cell::new(0, 0), Cell::new(23, 23));
        let nowhere = Rect::new(Cell::new(-50, -50), Cell::new(-50, -50));
        let field = Field::new(base, everywhere, nowhere, everywhere, everywhere);
        (state, field, book)
    }

    #[test]
    fn request_chest_demands_its_consumer_ingredients() {
        let (state, field, book) = fixture();
        let model = ScoreModel::new(&book);
        let requests = request_flows(&state, &field, &book, &model);
        let iron = requests.get("iron-plate").expect("iron-plate demanded");
        assert_eq!(iron.len(), 1);
        assert_eq!(iron[0].0, Cell::new(8, 6));
        // Assembler rate 3.0, recipe amount 1, two plates per craft.
        assert!((iron[0].1 - 6.0).abs() < 1e-9);
    }

    #[test]
    fn provider_chest_offers_its_feeder_output() {
        let (state, field, book) = fixture();
        let model = ScoreModel::new(&book);
        let providers = provider_flows(&state, &field, &book, &model);
        let gears = providers.get("iron-gear-wheel").expect("gears provided");
        assert_eq!(gears.len(), 1);
        assert_eq!(gears[0].0, Cell::new(8, 12));
        assert!((gears[0].1 - 3.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_prices_flows_by_distance() {
        let (state, field, book) = fixture();
        // A base-item provider supplying the request chest from across the
        // band.
        let state = state
            .add_buildings([Building::provider_chest(
                Cell::new(20, 6),
                ["iron-plate".to_string()].into_iter().collect(),
            )])
            .unwrap();
        let mut book = book;
        book.add_base_item("iron-plate");

        let result = estimate(&state, &field, &book);
        // demand 6.0, single supply 100.0, distance 12: 6*100*12/100/4.
        assert!((result.flow_cost - 18.0).abs() < 1e-9);
        assert_eq!(result.roboports, 1);
    }

    #[test]
    fn steel_chest_buffers_are_traced_through() {
        let mut book = RecipeBook::new();
        book.insert(RecipeInfo::new("iron-gear-wheel", 1.0, BuildingKind::Assembler));

        let assembler =
            Building::assembler(Cell::new(8, 8), Some("iron-gear-wheel".into()), None);
        let buffer = Building::steel_chest(Cell::new(8, 12));
        let into_buffer = Building::inserter(Cell::new(8, 11), Direction::Up);
        let provider = Building::provider_chest(Cell::new(8, 14), Default::default());
        let out_of_buffer = Building::inserter(Cell::new(8, 13), Direction::Up);
        let state = State::empty(Cell::new(24, 24))
            .add_buildings([assembler, buffer, into_buffer, provider, out_of_buffer])
            .unwrap();

        let out = state
            .building_at(Cell::new(8, 13))
            .cloned()
            .expect("inserter placed");
        let source = traced_source(&state, &out, false).expect("traced through the buffer");
        assert_eq!(source.kind(), BuildingKind::Assembler);
    }
}

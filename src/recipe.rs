//! Opaque recipe/technology lookup consumed by the score model and the
//! placement loops. Parsing recipe data out of game files is an external
//! concern; drivers build a `RecipeBook` and hand it in.

use crate::building::BuildingKind;
use fnv::{FnvHashMap, FnvHashSet};
use std::collections::BTreeMap;

/// Per-item planning data.
#[derive(Clone, Debug)]
pub struct RecipeInfo {
    pub item: String,
    /// Demanded throughput of this item in the target build.
    pub amount: f64,
    /// Normalization divisor making per-item scores comparable.
    pub productivity: f64,
    /// Ingredient item -> required amount per craft.
    pub ingredients: BTreeMap<String, f64>,
    /// Which building kind crafts this item.
    pub crafter: BuildingKind,
}

impl RecipeInfo {
    pub fn new(item: impl Into<String>, productivity: f64, crafter: BuildingKind) -> Self {
        RecipeInfo {
            item: item.into(),
            amount: 1.0,
            productivity,
            ingredients: BTreeMap::new(),
            crafter,
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_ingredient(mut self, item: impl Into<String>, amount: f64) -> Self {
        self.ingredients.insert(item.into(), amount);
        self
    }
}

/// The lookup table: recipes keyed by item plus the set of base items
/// (raw inputs assumed available, never scored).
#[derive(Clone, Debug, Default)]
pub struct RecipeBook {
    items: FnvHashMap<String, RecipeInfo>,
    base: FnvHashSet<String>,
}

impl RecipeBook {
    pub fn new() -> Self {
        RecipeBook::default()
    }

    pub fn insert(&mut self, info: RecipeInfo) {
        self.items.insert(info.item.clone(), info);
    }

    pub fn add_base_item(&mut self, item: impl Into<String>) {
        self.base.insert(item.into());
    }

    pub fn get(&self, item: &str) -> Option<&RecipeInfo> {
        self.items.get(base_item_of(item))
    }

    pub fn is_base(&self, item: &str) -> bool {
        self.base.contains(item)
    }

    pub fn productivity_of(&self, item: &str) -> f64 {
        self.get(item).map(|r| r.productivity).unwrap_or(1.0)
    }

    /// Items to score, in deterministic order.
    pub fn non_base_items(&self) -> Vec<&str> {
        let mut items: Vec<&str> = self
            .items
            .keys()
            .map(String::as_str)
            .filter(|item| !self.base.contains(*item))
            .collect();
        items.sort_unstable();
        items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Strip a chain tag: `"copper-cable#blue"` -> `"copper-cable"`.
pub fn base_item_of(item: &str) -> &str {
    item.split('#').next().unwrap_or(item)
}

/// Recipes restricted to productivity modules, crafted at a reduced base
/// rate.
pub fn is_productivity_capped(item: &str) -> bool {
    const CAPPED: &[&str] = &[
        "iron-plate",
        "copper-plate",
        "steel-plate",
        "empty-barrel",
        "uranium-processing",
        "copper-cable",
        "advanced-circuit",
        "electronic-circuit",
        "processing-unit",
        "uranium-fuel-cell",
        "explosives",
        "low-density-structure",
        "nuclear-fuel",
        "rocket-control-unit",
        "space-science-pack",
        "production-science-pack",
        "utility-science-pack",
        "kovarex-enrichment-process",
    ];
    CAPPED.contains(&base_item_of(item))
}

/// Ingredients that arrive through pipes rather than logistics chests.
pub fn is_fluid_ingredient(item: &str) -> bool {
    matches!(
        item,
        "water" | "petroleum-gas" | "lubricant" | "sulfuric-acid"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_chain_tags() {
        let mut book = RecipeBook::new();
        book.insert(RecipeInfo::new("copper-cable", 1.2, BuildingKind::Assembler));
        assert!(book.get("copper-cable#blue").is_some());
        assert_eq!(book.productivity_of("copper-cable#green"), 1.2);
        assert_eq!(book.productivity_of("unknown"), 1.0);
    }

    #[test]
    fn base_items_are_excluded_from_scoring() {
        let mut book = RecipeBook::new();
        book.insert(RecipeInfo::new("iron-plate", 1.2, BuildingKind::Smelter));
        book.insert(RecipeInfo::new("iron-gear-wheel", 1.0, BuildingKind::Assembler));
        book.add_base_item("iron-ore");
        assert_eq!(book.non_base_items(), vec!["iron-gear-wheel", "iron-plate"]);
        assert!(book.is_base("iron-ore"));
    }

    #[test]
    fn capped_classification_follows_the_base_item() {
        assert!(is_productivity_capped("processing-unit"));
        assert!(is_productivity_capped("copper-cable#green"));
        assert!(!is_productivity_capped("iron-gear-wheel"));
    }
}

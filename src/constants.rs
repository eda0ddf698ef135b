use crate::building::{BuildingKind, ModuleTier};
use crate::cell::Direction;

/// Anchors closer than this to the right/bottom edge cannot host a beacon.
pub const GRID_MARGIN: i32 = 2;

pub const BEACON_SIDE: i32 = 3;

/// A beacon affects cells up to this far from its anchor on each axis
/// (an 11x11 window).
pub const BEACON_EFFECT_RANGE: i32 = 5;

/// Anchor-to-anchor Chebyshev bound for a beacon to reach a 3x3 producer.
pub const BEACON_ANCHOR_REACH: i32 = 6;

/// Center-to-edge bound used for producers larger than 3x3.
pub const BEACON_WINDOW_REACH: f64 = 4.0;

/// Score contribution of one beacon effect on one producer.
pub const BEACON_BONUS: f64 = 0.5;

/// Intrinsic output of one producer in the recipe-free score.
pub const PRODUCER_BASE_RATE: f64 = 0.8;

/// Minimum score gain for the improver to adopt a rebuild, and the margin
/// below which a rebuild is treated as an invariant violation.
pub const SCORE_EPSILON: f64 = 0.01;

/// Row/column span the cluster enumerator scans around the previous
/// cluster member.
pub const CLUSTER_SCAN_SPAN: i32 = 7;

/// Maximum cells between an underground pipe entrance and its exit.
pub const TUNNEL_MAX_SPAN: i32 = 10;

/// Half-width of the anchor window the greedy constructor tries around a
/// frontier cell (9x9), and the tighter window used for beacons (5x5).
pub const PLACEMENT_WINDOW: i32 = 4;
pub const BEACON_PLACEMENT_WINDOW: i32 = 2;

/// Candidate cells considered per placement step before re-ranking by
/// beacon coverage.
pub const CANDIDATE_CELL_LIMIT: usize = 400;

/// Weighted flow one roboport can serve.
pub const ROBOPORT_FLOW_CAPACITY: f64 = 220.0;

/// One legal (inserter, chest) offset pair on the perimeter of a 3x3
/// building, relative to its anchor. `facing` is the inserter direction
/// that moves items from the chest into the building; providers use the
/// opposite.
pub struct ChestOffset {
    pub inserter: (i32, i32),
    pub chest: (i32, i32),
    pub facing: Direction,
}

/// Three slots per side, clockwise from the top edge.
pub const CHEST_OFFSETS: [ChestOffset; 12] = [
    ChestOffset { inserter: (0, -1), chest: (0, -2), facing: Direction::Up },
    ChestOffset { inserter: (1, -1), chest: (1, -2), facing: Direction::Up },
    ChestOffset { inserter: (2, -1), chest: (2, -2), facing: Direction::Up },
    ChestOffset { inserter: (3, 0), chest: (4, 0), facing: Direction::Right },
    ChestOffset { inserter: (3, 1), chest: (4, 1), facing: Direction::Right },
    ChestOffset { inserter: (3, 2), chest: (4, 2), facing: Direction::Right },
    ChestOffset { inserter: (0, 3), chest: (0, 4), facing: Direction::Down },
    ChestOffset { inserter: (1, 3), chest: (1, 4), facing: Direction::Down },
    ChestOffset { inserter: (2, 3), chest: (2, 4), facing: Direction::Down },
    ChestOffset { inserter: (-1, 0), chest: (-2, 0), facing: Direction::Left },
    ChestOffset { inserter: (-1, 1), chest: (-2, 1), facing: Direction::Left },
    ChestOffset { inserter: (-1, 2), chest: (-2, 2), facing: Direction::Left },
];

/// Base crafting rate of a producer kind, before beacon bonuses.
///
/// Productivity-capped recipes force productivity modules into the
/// building, which lowers its speed regardless of tier.
pub fn crafting_rate(kind: BuildingKind, tier: ModuleTier, capped: bool) -> f64 {
    match kind {
        BuildingKind::Assembler => {
            if capped {
                0.4
            } else {
                match tier {
                    ModuleTier::One => 2.2,
                    ModuleTier::Two => 2.6,
                    ModuleTier::Three => 3.0,
                }
            }
        }
        BuildingKind::ChemicalPlant => {
            if capped {
                0.55
            } else {
                match tier {
                    ModuleTier::One => 1.9,
                    ModuleTier::Two => 2.2,
                    ModuleTier::Three => 2.5,
                }
            }
        }
        BuildingKind::Smelter => {
            if capped {
                0.7
            } else {
                match tier {
                    ModuleTier::One => 1.0,
                    ModuleTier::Two => 1.2,
                    ModuleTier::Three => 1.4,
                }
            }
        }
        BuildingKind::OilRefinery => match tier {
            ModuleTier::One => 1.6,
            ModuleTier::Two => 1.9,
            ModuleTier::Three => 2.5,
        },
        BuildingKind::Lab => 0.7,
        BuildingKind::RocketSilo => 0.4,
        _ => 0.0,
    }
}

/// Items whose effective rate is bounded by in-chain feeder buildings.
pub const CHAINED_ITEMS: [&str; 4] = [
    "electronic-circuit",
    "processing-unit",
    "rocket-fuel",
    "steel-plate",
];

/// Output conversion factor from a feeder recipe to its consumer.
pub fn chain_factor(feeder_recipe: &str) -> f64 {
    match feeder_recipe {
        "copper-cable#green" => 0.933_333_325_86,
        "copper-cable#blue" => 1.306_666_66,
        "electronic-circuit#blue" => 1.4,
        "solid-fuel-from-light-oil" => 1.2,
        _ => 1.0,
    }
}

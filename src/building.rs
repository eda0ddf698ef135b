//! The building model: a closed sum type over every placeable kind.
//!
//! Buildings are value objects. Once placed they are shared between a
//! state's building set and its per-cell map and never mutated; attribute
//! changes go through `State::retune_building` so the map stays in sync.
//! Adding a kind here forces every dispatch site (scoring, export,
//! placement) to be updated via exhaustive matches.

use crate::cell::{Cell, Direction};
use crate::footprint::Footprint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Discriminant-only view of a building, for cheap kind checks.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum BuildingKind {
    Beacon,
    Smelter,
    Assembler,
    ChemicalPlant,
    OilRefinery,
    Lab,
    RocketSilo,
    Inserter,
    RequestChest,
    ProviderChest,
    SteelChest,
    Pipe,
    UndergroundPipe,
    StorageTank,
    Pump,
    Roboport,
    TrainStop,
    Empty,
}

impl BuildingKind {
    /// Square side length for the fixed-size kinds. `Empty` and `Pump`
    /// footprints vary; callers should use `Building::side` instead.
    pub fn side(self) -> i32 {
        match self {
            BuildingKind::Beacon
            | BuildingKind::Smelter
            | BuildingKind::Assembler
            | BuildingKind::ChemicalPlant
            | BuildingKind::Lab
            | BuildingKind::StorageTank => 3,
            BuildingKind::OilRefinery => 5,
            BuildingKind::RocketSilo => 9,
            BuildingKind::Roboport => 4,
            BuildingKind::TrainStop => 2,
            BuildingKind::Inserter
            | BuildingKind::RequestChest
            | BuildingKind::ProviderChest
            | BuildingKind::SteelChest
            | BuildingKind::Pipe
            | BuildingKind::UndergroundPipe
            | BuildingKind::Pump
            | BuildingKind::Empty => 1,
        }
    }

    /// Kinds whose intrinsic output contributes to the recipe-free
    /// production score.
    pub fn is_producer(self) -> bool {
        matches!(
            self,
            BuildingKind::Smelter
                | BuildingKind::Assembler
                | BuildingKind::ChemicalPlant
                | BuildingKind::Lab
        )
    }

    /// Kinds that take part in the liquid-compatibility check on placement.
    pub fn is_liquid_carrier(self) -> bool {
        matches!(
            self,
            BuildingKind::Pipe
                | BuildingKind::UndergroundPipe
                | BuildingKind::StorageTank
                | BuildingKind::OilRefinery
                | BuildingKind::ChemicalPlant
        )
    }
}

/// Speed/productivity module tier fitted in a building.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum ModuleTier {
    One,
    Two,
    Three,
}

impl ModuleTier {
    pub fn level(self) -> u8 {
        match self {
            ModuleTier::One => 1,
            ModuleTier::Two => 2,
            ModuleTier::Three => 3,
        }
    }
}

impl Default for ModuleTier {
    fn default() -> Self {
        ModuleTier::Three
    }
}

/// The liquids a pipe network can carry.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum Liquid {
    Water,
    CrudeOil,
    HeavyOil,
    LightOil,
    PetroleumGas,
    SulfuricAcid,
    Lubricant,
}

impl Liquid {
    pub fn name(self) -> &'static str {
        match self {
            Liquid::Water => "water",
            Liquid::CrudeOil => "crude-oil",
            Liquid::HeavyOil => "heavy-oil",
            Liquid::LightOil => "light-oil",
            Liquid::PetroleumGas => "petroleum-gas",
            Liquid::SulfuricAcid => "sulfuric-acid",
            Liquid::Lubricant => "lubricant",
        }
    }

    pub fn from_name(name: &str) -> Option<Liquid> {
        match name {
            "water" => Some(Liquid::Water),
            "crude-oil" => Some(Liquid::CrudeOil),
            "heavy-oil" => Some(Liquid::HeavyOil),
            "light-oil" => Some(Liquid::LightOil),
            "petroleum-gas" => Some(Liquid::PetroleumGas),
            "sulfuric-acid" => Some(Liquid::SulfuricAcid),
            "lubricant" => Some(Liquid::Lubricant),
            _ => None,
        }
    }
}

/// A directed liquid connection point: liquid may flow between `from`
/// (a cell of the owning building) and `to` (the adjacent cell outside it).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct LiquidConnection {
    pub from: Cell,
    pub to: Cell,
    pub liquid: Liquid,
}

impl LiquidConnection {
    /// True when `other` is the mirror of this connection, i.e. the two
    /// buildings face each other across the same cell boundary.
    pub fn is_counterpart(&self, other: &LiquidConnection) -> bool {
        self.to == other.from && self.from == other.to
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Building {
    Beacon {
        footprint: Footprint,
        module_tier: ModuleTier,
    },
    Smelter {
        footprint: Footprint,
        recipe: Option<String>,
        module_tier: ModuleTier,
    },
    Assembler {
        footprint: Footprint,
        recipe: Option<String>,
        orientation: Option<Direction>,
        module_tier: ModuleTier,
    },
    ChemicalPlant {
        footprint: Footprint,
        recipe: Option<String>,
        orientation: Direction,
        module_tier: ModuleTier,
    },
    OilRefinery {
        footprint: Footprint,
        orientation: Direction,
        module_tier: ModuleTier,
    },
    Lab {
        footprint: Footprint,
    },
    RocketSilo {
        footprint: Footprint,
        orientation: Direction,
    },
    Inserter {
        footprint: Footprint,
        orientation: Direction,
        long_handed: bool,
    },
    RequestChest {
        footprint: Footprint,
        requests: BTreeMap<String, u32>,
    },
    ProviderChest {
        footprint: Footprint,
        items: BTreeSet<String>,
    },
    SteelChest {
        footprint: Footprint,
    },
    Pipe {
        footprint: Footprint,
        liquid: Liquid,
    },
    UndergroundPipe {
        footprint: Footprint,
        liquid: Liquid,
        orientation: Direction,
    },
    StorageTank {
        footprint: Footprint,
        liquid: Liquid,
        orientation: Direction,
    },
    Pump {
        footprint: Footprint,
        orientation: Direction,
    },
    Roboport {
        footprint: Footprint,
    },
    TrainStop {
        footprint: Footprint,
        station: String,
        orientation: Direction,
    },
    Empty {
        footprint: Footprint,
    },
}

impl Building {
    pub fn beacon(anchor: Cell, module_tier: ModuleTier) -> Building {
        Building::Beacon {
            footprint: Footprint::square(anchor, BuildingKind::Beacon.side()),
            module_tier,
        }
    }

    pub fn smelter(anchor: Cell, recipe: Option<String>) -> Building {
        Building::Smelter {
            footprint: Footprint::square(anchor, BuildingKind::Smelter.side()),
            recipe,
            module_tier: ModuleTier::default(),
        }
    }

    pub fn assembler(anchor: Cell, recipe: Option<String>, orientation: Option<Direction>) -> Building {
        Building::Assembler {
            footprint: Footprint::square(anchor, BuildingKind::Assembler.side()),
            recipe,
            orientation,
            module_tier: ModuleTier::default(),
        }
    }

    pub fn chemical_plant(anchor: Cell, recipe: Option<String>, orientation: Direction) -> Building {
        Building::ChemicalPlant {
            footprint: Footprint::square(anchor, BuildingKind::ChemicalPlant.side()),
            recipe,
            orientation,
            module_tier: ModuleTier::default(),
        }
    }

    pub fn oil_refinery(anchor: Cell, orientation: Direction) -> Building {
        Building::OilRefinery {
            footprint: Footprint::square(anchor, BuildingKind::OilRefinery.side()),
            orientation,
            module_tier: ModuleTier::default(),
        }
    }

    pub fn lab(anchor: Cell) -> Building {
        Building::Lab {
            footprint: Footprint::square(anchor, BuildingKind::Lab.side()),
        }
    }

    pub fn rocket_silo(anchor: Cell, orientation: Direction) -> Building {
        Building::RocketSilo {
            footprint: Footprint::square(anchor, BuildingKind::RocketSilo.side()),
            orientation,
        }
    }

    pub fn inserter(anchor: Cell, orientation: Direction) -> Building {
        Building::Inserter {
            footprint: Footprint::square(anchor, 1),
            orientation,
            long_handed: false,
        }
    }

    pub fn long_inserter(anchor: Cell, orientation: Direction) -> Building {
        Building::Inserter {
            footprint: Footprint::square(anchor, 1),
            orientation,
            long_handed: true,
        }
    }

    pub fn request_chest(anchor: Cell) -> Building {
        Building::RequestChest {
            footprint: Footprint::square(anchor, 1),
            requests: BTreeMap::new(),
        }
    }

    pub fn provider_chest(anchor: Cell, items: BTreeSet<String>) -> Building {
        Building::ProviderChest {
            footprint: Footprint::square(anchor, 1),
            items,
        }
    }

    pub fn steel_chest(anchor: Cell) -> Building {
        Building::SteelChest {
            footprint: Footprint::square(anchor, 1),
        }
    }

    pub fn pipe(anchor: Cell, liquid: Liquid) -> Building {
        Building::Pipe {
            footprint: Footprint::square(anchor, 1),
            liquid,
        }
    }

    pub fn underground_pipe(anchor: Cell, liquid: Liquid, orientation: Direction) -> Building {
        Building::UndergroundPipe {
            footprint: Footprint::square(anchor, 1),
            liquid,
            orientation,
        }
    }

    pub fn storage_tank(anchor: Cell, liquid: Liquid, orientation: Direction) -> Building {
        Building::StorageTank {
            footprint: Footprint::square(anchor, BuildingKind::StorageTank.side()),
            liquid,
            orientation,
        }
    }

    /// A 1x2 pump; vertical for `Up`/`Down`, horizontal for `Left`/`Right`.
    pub fn pump(anchor: Cell, orientation: Direction) -> Building {
        let second = if orientation.along_x() {
            anchor.right()
        } else {
            anchor.down()
        };
        Building::Pump {
            footprint: Footprint::from_cells(anchor, vec![anchor, second]),
            orientation,
        }
    }

    pub fn roboport(anchor: Cell) -> Building {
        Building::Roboport {
            footprint: Footprint::square(anchor, BuildingKind::Roboport.side()),
        }
    }

    pub fn train_stop(anchor: Cell, station: String, orientation: Direction) -> Building {
        Building::TrainStop {
            footprint: Footprint::square(anchor, BuildingKind::TrainStop.side()),
            station,
            orientation,
        }
    }

    /// An unusable placeholder blocking a square of cells (obstacles,
    /// forbidden corners).
    pub fn empty(anchor: Cell, side: i32) -> Building {
        Building::Empty {
            footprint: Footprint::square(anchor, side),
        }
    }

    pub fn kind(&self) -> BuildingKind {
        match self {
            Building::Beacon { .. } => BuildingKind::Beacon,
            Building::Smelter { .. } => BuildingKind::Smelter,
            Building::Assembler { .. } => BuildingKind::Assembler,
            Building::ChemicalPlant { .. } => BuildingKind::ChemicalPlant,
            Building::OilRefinery { .. } => BuildingKind::OilRefinery,
            Building::Lab { .. } => BuildingKind::Lab,
            Building::RocketSilo { .. } => BuildingKind::RocketSilo,
            Building::Inserter { .. } => BuildingKind::Inserter,
            Building::RequestChest { .. } => BuildingKind::RequestChest,
            Building::ProviderChest { .. } => BuildingKind::ProviderChest,
            Building::SteelChest { .. } => BuildingKind::SteelChest,
            Building::Pipe { .. } => BuildingKind::Pipe,
            Building::UndergroundPipe { .. } => BuildingKind::UndergroundPipe,
            Building::StorageTank { .. } => BuildingKind::StorageTank,
            Building::Pump { .. } => BuildingKind::Pump,
            Building::Roboport { .. } => BuildingKind::Roboport,
            Building::TrainStop { .. } => BuildingKind::TrainStop,
            Building::Empty { .. } => BuildingKind::Empty,
        }
    }

    pub fn footprint(&self) -> &Footprint {
        match self {
            Building::Beacon { footprint, .. }
            | Building::Smelter { footprint, .. }
            | Building::Assembler { footprint, .. }
            | Building::ChemicalPlant { footprint, .. }
            | Building::OilRefinery { footprint, .. }
            | Building::Lab { footprint }
            | Building::RocketSilo { footprint, .. }
            | Building::Inserter { footprint, .. }
            | Building::RequestChest { footprint, .. }
            | Building::ProviderChest { footprint, .. }
            | Building::SteelChest { footprint }
            | Building::Pipe { footprint, .. }
            | Building::UndergroundPipe { footprint, .. }
            | Building::StorageTank { footprint, .. }
            | Building::Pump { footprint, .. }
            | Building::Roboport { footprint }
            | Building::TrainStop { footprint, .. }
            | Building::Empty { footprint } => footprint,
        }
    }

    #[inline]
    pub fn anchor(&self) -> Cell {
        self.footprint().anchor()
    }

    pub fn cells(&self) -> &[Cell] {
        self.footprint().cells()
    }

    /// Bounding-square side of the footprint. Matches `kind().side()` for
    /// the fixed-size kinds and adapts for `Empty`/`Pump`.
    pub fn side(&self) -> i32 {
        let anchor = self.anchor();
        self.cells()
            .iter()
            .map(|c| (c.x - anchor.x + 1).max(c.y - anchor.y + 1))
            .max()
            .unwrap_or(1)
    }

    pub fn orientation(&self) -> Option<Direction> {
        match self {
            Building::Assembler { orientation, .. } => *orientation,
            Building::ChemicalPlant { orientation, .. }
            | Building::OilRefinery { orientation, .. }
            | Building::RocketSilo { orientation, .. }
            | Building::Inserter { orientation, .. }
            | Building::UndergroundPipe { orientation, .. }
            | Building::StorageTank { orientation, .. }
            | Building::Pump { orientation, .. }
            | Building::TrainStop { orientation, .. } => Some(*orientation),
            _ => None,
        }
    }

    pub fn recipe(&self) -> Option<&str> {
        match self {
            Building::Smelter { recipe, .. }
            | Building::Assembler { recipe, .. }
            | Building::ChemicalPlant { recipe, .. } => recipe.as_deref(),
            _ => None,
        }
    }

    pub fn module_tier(&self) -> Option<ModuleTier> {
        match self {
            Building::Beacon { module_tier, .. }
            | Building::Smelter { module_tier, .. }
            | Building::Assembler { module_tier, .. }
            | Building::ChemicalPlant { module_tier, .. }
            | Building::OilRefinery { module_tier, .. } => Some(*module_tier),
            _ => None,
        }
    }

    pub fn liquid(&self) -> Option<Liquid> {
        match self {
            Building::Pipe { liquid, .. }
            | Building::UndergroundPipe { liquid, .. }
            | Building::StorageTank { liquid, .. } => Some(*liquid),
            _ => None,
        }
    }

    /// The cell an inserter picks up from (the cell it faces).
    pub fn inserter_pickup(&self) -> Option<Cell> {
        match self {
            Building::Inserter {
                footprint,
                orientation,
                long_handed,
            } => {
                let reach = if *long_handed { 2 } else { 1 };
                Some(footprint.anchor().step_by(*orientation, reach))
            }
            _ => None,
        }
    }

    /// The cell an inserter drops into (behind it).
    pub fn inserter_dropoff(&self) -> Option<Cell> {
        match self {
            Building::Inserter {
                footprint,
                orientation,
                long_handed,
            } => {
                let reach = if *long_handed { 2 } else { 1 };
                Some(footprint.anchor().step_by(orientation.opposite(), reach))
            }
            _ => None,
        }
    }

    /// The refinery's liquid input cells with the liquid each expects.
    /// Inputs sit on the face opposite the orientation.
    pub fn refinery_input_cells(&self) -> Vec<(Liquid, Cell)> {
        let Building::OilRefinery {
            footprint,
            orientation,
            ..
        } = self
        else {
            return Vec::new();
        };
        let a = footprint.anchor();
        match orientation {
            Direction::Up => vec![
                (Liquid::CrudeOil, a.shifted(3, 4)),
                (Liquid::Water, a.shifted(1, 4)),
            ],
            Direction::Right => vec![
                (Liquid::CrudeOil, a.shifted(0, 3)),
                (Liquid::Water, a.shifted(0, 1)),
            ],
            Direction::Down => vec![
                (Liquid::CrudeOil, a.shifted(1, 0)),
                (Liquid::Water, a.shifted(3, 0)),
            ],
            Direction::Left => vec![
                (Liquid::CrudeOil, a.shifted(4, 1)),
                (Liquid::Water, a.shifted(4, 3)),
            ],
        }
    }

    /// Exposed liquid connection points, used by the placement-time
    /// compatibility check and by the flow router's destination set.
    pub fn liquid_connections(&self) -> Vec<LiquidConnection> {
        match self {
            Building::Pipe { footprint, liquid } => {
                let a = footprint.anchor();
                Direction::ALL
                    .into_iter()
                    .map(|d| LiquidConnection {
                        from: a,
                        to: a.step(d),
                        liquid: *liquid,
                    })
                    .collect()
            }
            Building::UndergroundPipe {
                footprint,
                liquid,
                orientation,
            } => {
                let a = footprint.anchor();
                vec![LiquidConnection {
                    from: a,
                    to: a.step(*orientation),
                    liquid: *liquid,
                }]
            }
            Building::StorageTank {
                footprint,
                liquid,
                orientation,
            } => {
                let a = footprint.anchor();
                // Tanks connect on two diagonally opposite corners; which
                // pair depends on the rotation.
                let ends: [(Cell, [Direction; 2]); 2] = match orientation {
                    Direction::Up | Direction::Down => [
                        (a, [Direction::Up, Direction::Left]),
                        (a.shifted(2, 2), [Direction::Right, Direction::Down]),
                    ],
                    Direction::Right | Direction::Left => [
                        (a.shifted(2, 0), [Direction::Up, Direction::Right]),
                        (a.shifted(0, 2), [Direction::Left, Direction::Down]),
                    ],
                };
                ends.into_iter()
                    .flat_map(|(cell, dirs)| {
                        dirs.into_iter().map(move |d| LiquidConnection {
                            from: cell,
                            to: cell.step(d),
                            liquid: *liquid,
                        })
                    })
                    .collect()
            }
            Building::OilRefinery {
                footprint,
                orientation,
                ..
            } => {
                let a = footprint.anchor();
                let side = BuildingKind::OilRefinery.side();
                // Outputs across the facing edge, inputs across the rear.
                let facing = *orientation;
                let rear = facing.opposite();
                let outputs = [Liquid::HeavyOil, Liquid::LightOil, Liquid::PetroleumGas];
                let edge_cells = |edge: Direction| -> Vec<Cell> {
                    let across = if edge.along_x() {
                        Direction::Down
                    } else {
                        Direction::Right
                    };
                    let origin = match edge {
                        Direction::Up => a,
                        Direction::Left => a,
                        Direction::Right => a.shifted(side - 1, 0),
                        Direction::Down => a.shifted(0, side - 1),
                    };
                    (0..3).map(|i| origin.step_by(across, i * 2)).collect()
                };
                let mut connections: Vec<LiquidConnection> = edge_cells(facing)
                    .into_iter()
                    .zip(outputs)
                    .map(|(cell, liquid)| LiquidConnection {
                        from: cell,
                        to: cell.step(facing),
                        liquid,
                    })
                    .collect();
                connections.extend(self.refinery_input_cells().into_iter().map(
                    |(liquid, cell)| LiquidConnection {
                        from: cell,
                        to: cell.step(rear),
                        liquid,
                    },
                ));
                connections
            }
            // Chemical plants consume liquids through routed pipes placed
            // next to them; they expose no checked connection points.
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sides_match_footprints() {
        assert_eq!(Building::beacon(Cell::new(0, 0), ModuleTier::Three).side(), 3);
        assert_eq!(
            Building::oil_refinery(Cell::new(0, 0), Direction::Up).side(),
            5
        );
        assert_eq!(
            Building::rocket_silo(Cell::new(0, 0), Direction::Up).side(),
            9
        );
        assert_eq!(Building::empty(Cell::new(0, 0), 4).side(), 4);
        assert_eq!(Building::pump(Cell::new(0, 0), Direction::Up).side(), 2);
    }

    #[test]
    fn inserter_reaches_over_one_or_two_cells() {
        let short = Building::inserter(Cell::new(5, 5), Direction::Up);
        assert_eq!(short.inserter_pickup(), Some(Cell::new(5, 4)));
        assert_eq!(short.inserter_dropoff(), Some(Cell::new(5, 6)));

        let long = Building::long_inserter(Cell::new(5, 5), Direction::Left);
        assert_eq!(long.inserter_pickup(), Some(Cell::new(3, 5)));
        assert_eq!(long.inserter_dropoff(), Some(Cell::new(7, 5)));
    }

    #[test]
    fn pipe_connects_on_all_four_sides() {
        let pipe = Building::pipe(Cell::new(2, 2), Liquid::Water);
        let connections = pipe.liquid_connections();
        assert_eq!(connections.len(), 4);
        assert!(connections.iter().all(|c| c.from == Cell::new(2, 2)));
        assert!(connections
            .iter()
            .any(|c| c.to == Cell::new(2, 1) && c.liquid == Liquid::Water));
    }

    #[test]
    fn counterpart_connections_face_each_other() {
        let a = Building::pipe(Cell::new(2, 2), Liquid::Water);
        let b = Building::pipe(Cell::new(3, 2), Liquid::SulfuricAcid);
        let ab = a
            .liquid_connections()
            .into_iter()
            .find(|c| c.to == Cell::new(3, 2))
            .unwrap();
        let ba = b
            .liquid_connections()
            .into_iter()
            .find(|c| c.to == Cell::new(2, 2))
            .unwrap();
        assert!(ab.is_counterpart(&ba));
        assert_ne!(ab.liquid, ba.liquid);
    }

    #[test]
    fn tank_rotation_moves_connection_corners() {
        let up = Building::storage_tank(Cell::new(0, 0), Liquid::CrudeOil, Direction::Up);
        let froms: Vec<Cell> = up.liquid_connections().iter().map(|c| c.from).collect();
        assert!(froms.contains(&Cell::new(0, 0)));
        assert!(froms.contains(&Cell::new(2, 2)));

        let right = Building::storage_tank(Cell::new(0, 0), Liquid::CrudeOil, Direction::Right);
        let froms: Vec<Cell> = right.liquid_connections().iter().map(|c| c.from).collect();
        assert!(froms.contains(&Cell::new(2, 0)));
        assert!(froms.contains(&Cell::new(0, 2)));
    }

    #[test]
    fn refinery_inputs_sit_on_rear_face() {
        let refinery = Building::oil_refinery(Cell::new(10, 10), Direction::Up);
        let inputs = refinery.refinery_input_cells();
        assert_eq!(inputs.len(), 2);
        // Facing up, inputs are on the bottom row.
        assert!(inputs.iter().all(|(_, c)| c.y == 14));
        assert!(inputs.iter().any(|(l, _)| *l == Liquid::CrudeOil));
        assert!(inputs.iter().any(|(l, _)| *l == Liquid::Water));
    }
}

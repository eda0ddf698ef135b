//! The flow router: connects a source cell to an existing liquid network
//! by laying pipes and underground tunnels.
//!
//! Best-first search where every node carries a full placement snapshot,
//! so a finished route is just the node's state -- no path reconstruction
//! and no interference between branches. Nodes are ordered by accumulated
//! penalty plus remaining Manhattan distance; among equals the node closer
//! to a destination wins, and the state serial keeps the order total.
//!
//! Successor moves per axis direction: a one-cell pipe extension, and a
//! tunnel whose exit may land up to `TUNNEL_MAX_SPAN` cells away provided
//! the landing cell is placeable and no conflicting tunnel runs along the
//! same axis. The search finishes the first time a node comes within
//! Manhattan distance 1 of any destination and the final joint can be
//! built; an empty queue means no feasible route.

use crate::building::{Building, BuildingKind, Liquid};
use crate::cell::{Cell, Direction};
use crate::constants::TUNNEL_MAX_SPAN;
use crate::field::Field;
use crate::state::State;
use fnv::FnvHashSet;
use log::{trace, warn};
use pathfinding::directed::astar::astar;
use std::collections::BTreeSet;

struct RouteNode {
    state: State,
    cursor: Cell,
    distance: i32,
    penalty: f64,
}

impl RouteNode {
    fn priority(&self) -> f64 {
        self.penalty + self.distance as f64
    }
}

impl PartialEq for RouteNode {
    fn eq(&self, other: &Self) -> bool {
        self.state.serial() == other.state.serial()
    }
}

impl Eq for RouteNode {}

impl PartialOrd for RouteNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RouteNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority()
            .total_cmp(&other.priority())
            .then(other.distance.cmp(&self.distance))
            .then(self.state.serial().cmp(&other.state.serial()))
    }
}

pub struct FlowRouter<'a> {
    field: &'a Field,
}

impl<'a> FlowRouter<'a> {
    pub fn new(field: &'a Field) -> Self {
        FlowRouter { field }
    }

    /// Route `liquid` from `start` (a cell on or beside the consuming
    /// building) to any cell already carrying it. Returns the extended
    /// state, or `None` when no feasible route exists.
    pub fn route(&self, state: &State, liquid: Liquid, start: Cell) -> Option<State> {
        let destinations = self.destinations(state, liquid);
        if destinations.is_empty() {
            return None;
        }
        if !self.coarse_probe(state, start, &destinations) {
            trace!("route {:?} from {:?}: coarse probe found no corridor", liquid, start);
            return None;
        }
        self.search(state, start, &destinations, liquid)
    }

    /// Route a liquid into a consuming building, picking the entry cell
    /// from its orientation the way placement does: assemblers feed
    /// through the cell their port faces; chemical plants try both port
    /// cells.
    pub fn route_building_input(
        &self,
        state: &State,
        building: &Building,
        liquid: Liquid,
    ) -> Option<State> {
        let center = building.anchor().down().right();
        match building.kind() {
            BuildingKind::Assembler => {
                let port = center.step(building.orientation()?);
                self.route(state, liquid, port)
            }
            BuildingKind::ChemicalPlant => {
                let facing = building.orientation()?;
                let first = center.step(facing).step(facing.turn_right());
                self.route(state, liquid, first).or_else(|| {
                    let second = center.step(facing).step(facing.turn_left());
                    self.route(state, liquid, second)
                })
            }
            _ => None,
        }
    }

    /// Cells that already carry the liquid: pipe cells, underground pipe
    /// endpoints, and storage tank connection corners.
    fn destinations(&self, state: &State, liquid: Liquid) -> FnvHashSet<Cell> {
        let mut cells = FnvHashSet::default();
        for building in state.buildings() {
            match building.kind() {
                BuildingKind::Pipe | BuildingKind::UndergroundPipe => {
                    if building.liquid() == Some(liquid) {
                        cells.insert(building.anchor());
                    }
                }
                BuildingKind::StorageTank => {
                    if building.liquid() == Some(liquid) {
                        cells.extend(building.liquid_connections().iter().map(|c| c.from));
                    }
                }
                _ => {}
            }
        }
        cells
    }

    fn search(
        &self,
        state: &State,
        start: Cell,
        destinations: &FnvHashSet<Cell>,
        liquid: Liquid,
    ) -> Option<State> {
        let mut queue: BTreeSet<RouteNode> = BTreeSet::new();
        let mut visited: FnvHashSet<(Cell, Direction)> = FnvHashSet::default();
        queue.insert(RouteNode {
            state: state.clone(),
            cursor: start,
            distance: 0,
            penalty: 0.0,
        });
        let mut steps = 0u64;

        while let Some(node) = queue.pop_first() {
            steps += 1;
            let (newly_visited, successors) =
                self.successors(&node, liquid, destinations, &mut visited);

            // Tunnel exits queued earlier may have just been sealed off.
            queue.retain(|queued| {
                match queued.state.building_at(queued.cursor) {
                    Some(b) if b.kind() == BuildingKind::UndergroundPipe => {
                        let facing = b.orientation().expect("underground pipes are oriented");
                        !newly_visited.contains(&(queued.cursor, facing))
                    }
                    _ => true,
                }
            });

            if steps % 1000 == 0 {
                trace!(
                    "route search: {} steps, {} queued, f={:.1} at {:?}",
                    steps,
                    queue.len(),
                    node.priority(),
                    node.cursor
                );
            }

            for successor in successors {
                if successor.distance == 1 {
                    if let Some(connected) = self.make_connected(&successor, destinations, liquid) {
                        trace!("route complete after {} steps", steps);
                        return Some(connected);
                    }
                }
                queue.insert(successor);
            }
        }
        None
    }

    fn successors(
        &self,
        node: &RouteNode,
        liquid: Liquid,
        destinations: &FnvHashSet<Cell>,
        visited: &mut FnvHashSet<(Cell, Direction)>,
    ) -> (Vec<(Cell, Direction)>, Vec<RouteNode>) {
        let mut next = Vec::new();
        let mut newly_visited = Vec::new();
        let cell = node.cursor;

        // Once underground, the route can only resurface along the tunnel
        // axis.
        let directions: Vec<Direction> = match node.state.building_at(cell) {
            Some(b) if b.kind() == BuildingKind::UndergroundPipe => {
                vec![b.orientation().expect("underground pipes are oriented")]
            }
            _ => Direction::ALL.to_vec(),
        };

        for dir in directions {
            let next_cell = cell.step(dir);
            if visited.contains(&(next_cell, dir)) {
                continue;
            }
            if node.state.is_occupied(next_cell) {
                continue;
            }

            // Plain one-cell pipe extension.
            let pipe = Building::pipe(next_cell, liquid);
            let pipe_penalty = self.segment_penalty(&pipe);
            if let Some(extended) = node.state.add_building(pipe) {
                next.push(RouteNode {
                    state: extended,
                    cursor: next_cell,
                    distance: nearest_distance(next_cell, destinations),
                    penalty: node.penalty + pipe_penalty,
                });
            }

            // Tunnel: entrance here, exit up to TUNNEL_MAX_SPAN cells on.
            let entrance = Building::underground_pipe(next_cell, liquid, dir.opposite());
            if let Some(entered) = node.state.add_building(entrance) {
                if !self.entrance_conflicts(&entered, next_cell, dir) {
                    let mut exit = next_cell.step(dir);
                    for _ in 1..=TUNNEL_MAX_SPAN {
                        let beyond = exit.step(dir);
                        if !visited.contains(&(exit, dir)) && tunnel_exit_clear(&entered, beyond) {
                            // A parallel tunnel straddling the landing cell
                            // seals this and all further exits.
                            if crosses_parallel_tunnel(&entered, beyond, dir) {
                                break;
                            }
                            let exit_pipe = Building::underground_pipe(exit, liquid, dir);
                            let exit_penalty = self.segment_penalty(&exit_pipe);
                            if let Some(surfaced) = entered.add_building(exit_pipe) {
                                next.push(RouteNode {
                                    state: surfaced,
                                    cursor: exit,
                                    distance: nearest_distance(exit, destinations),
                                    penalty: node.penalty + exit_penalty,
                                });
                            }
                        }
                        exit = beyond;
                    }
                }
            }

            visited.insert((next_cell, dir));
            newly_visited.push((next_cell, dir));
        }
        (newly_visited, next)
    }

    /// An entrance is invalid when an existing underground pipe behind it
    /// runs the same axis facing the same way -- it would pair with that
    /// pipe instead of a fresh exit.
    fn entrance_conflicts(&self, state: &State, entrance: Cell, travel: Direction) -> bool {
        let mut probe = entrance;
        for _ in 1..=TUNNEL_MAX_SPAN {
            probe = probe.step(travel.opposite());
            if let Some(existing) = state.building_at(probe) {
                if existing.kind() == BuildingKind::UndergroundPipe {
                    let facing = existing.orientation().expect("oriented");
                    if facing.along_x() == travel.along_x() {
                        return facing == travel.opposite();
                    }
                }
            }
        }
        false
    }

    /// Finish the route from a node adjacent to the destination set by
    /// reusing a facing network cell or building the final joint.
    fn make_connected(
        &self,
        node: &RouteNode,
        destinations: &FnvHashSet<Cell>,
        liquid: Liquid,
    ) -> Option<State> {
        debug_assert_eq!(node.distance, 1);
        let head = node.state.building_at(node.cursor)?.clone();
        match head.kind() {
            BuildingKind::UndergroundPipe => {
                let open_end = node.cursor.step(head.orientation().expect("oriented"));
                if !destinations.contains(&open_end) {
                    return None;
                }
                if is_joined(&node.state, open_end, node.cursor) {
                    Some(node.state.clone())
                } else {
                    self.build_joint(&node.state, open_end, node.cursor, liquid)
                }
            }
            BuildingKind::Pipe => {
                for dir in Direction::ALL {
                    let neighbour = node.cursor.step(dir);
                    if destinations.contains(&neighbour) && is_joined(&node.state, neighbour, node.cursor)
                    {
                        return Some(node.state.clone());
                    }
                }
                for dir in Direction::ALL {
                    let neighbour = node.cursor.step(dir);
                    if destinations.contains(&neighbour) {
                        if let Some(joined) =
                            self.build_joint(&node.state, neighbour, node.cursor, liquid)
                        {
                            return Some(joined);
                        }
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Build the final joint at `to`, approached from `from`. When `to`
    /// holds a perpendicular underground end of the same liquid, the
    /// tunnel is split: the end becomes a plain pipe and its partner is
    /// re-paired one cell closer.
    fn build_joint(&self, state: &State, to: Cell, from: Cell, liquid: Liquid) -> Option<State> {
        let approach = Direction::between(from, to)?;
        match state.building_at(to).cloned() {
            Some(existing) => {
                if existing.kind() != BuildingKind::UndergroundPipe
                    || existing.liquid() != Some(liquid)
                {
                    return None;
                }
                let facing = existing.orientation().expect("oriented");
                if facing != approach.turn_left() && facing != approach.turn_right() {
                    return None;
                }
                let split = state.remove_building(&existing);
                let piped = split.add_building(Building::pipe(to, liquid))?;
                self.repair_tunnel(&piped, to, facing.opposite(), liquid)
            }
            None => {
                let piped = state.add_building(Building::pipe(to, liquid))?;
                let repaired = self.repair_tunnel(&piped, to, approach.turn_left(), liquid)?;
                self.repair_tunnel(&repaired, to, approach.turn_right(), liquid)
            }
        }
    }

    /// After removing one end of a tunnel at `from`, find its partner
    /// within range along `dir` and restore a sealed pair (or collapse a
    /// 1-cell tunnel into a plain pipe). `None` when no partner exists --
    /// the joint cannot be built on this branch.
    fn repair_tunnel(&self, state: &State, from: Cell, dir: Direction, liquid: Liquid) -> Option<State> {
        let mut probe = from.step(dir);
        let mut span = 1;
        loop {
            match state.building_at(probe) {
                Some(b)
                    if b.kind() == BuildingKind::UndergroundPipe
                        && b.orientation() == Some(dir) =>
                {
                    break;
                }
                _ => {
                    probe = probe.step(dir);
                    span += 1;
                    if span > TUNNEL_MAX_SPAN {
                        warn!("no tunnel partner within range from {:?} going {:?}", from, dir);
                        return None;
                    }
                }
            }
        }
        let partner = state.building_at(probe).cloned()?;
        if partner.liquid() != Some(liquid) {
            warn!("tunnel partner at {:?} carries {:?}", probe, partner.liquid());
            return None;
        }
        if span == 1 {
            let collapsed = state.remove_building(&partner);
            collapsed.add_building(Building::pipe(probe, liquid))
        } else {
            state.add_building(Building::underground_pipe(
                from.step(dir),
                liquid,
                dir.opposite(),
            ))
        }
    }

    fn segment_penalty(&self, segment: &Building) -> f64 {
        let base = match segment.kind() {
            BuildingKind::UndergroundPipe => 2.0,
            _ => 1.0,
        };
        base + self.field.zone_surcharge(segment.anchor())
    }

    /// Relaxed reachability check on plain cells before the expensive
    /// stateful search: pipe steps need an empty cell, tunnel hops an
    /// empty landing. Admissible -- any real route implies a corridor
    /// here, so a probe failure proves infeasibility cheaply.
    fn coarse_probe(&self, state: &State, start: Cell, destinations: &FnvHashSet<Cell>) -> bool {
        let size = state.size();
        let goals: Vec<Cell> = destinations.iter().copied().collect();
        let in_bounds = |c: Cell| c.x >= 0 && c.y >= 0 && c.x < size.x && c.y < size.y;
        astar(
            &start,
            |&cell| {
                let mut moves: Vec<(Cell, u32)> = Vec::new();
                for dir in Direction::ALL {
                    let step = cell.step(dir);
                    if in_bounds(step) && !state.is_occupied(step) {
                        moves.push((step, 1));
                    }
                    for hop in 2..=TUNNEL_MAX_SPAN + 1 {
                        let landing = cell.step_by(dir, hop);
                        if in_bounds(landing) && !state.is_occupied(landing) {
                            moves.push((landing, 2));
                        }
                    }
                }
                moves
            },
            |&cell| nearest_distance(cell, destinations) as u32,
            |&cell| goals.iter().any(|g| cell.manhattan_to(*g) <= 1),
        )
        .is_some()
    }
}

fn nearest_distance(cell: Cell, destinations: &FnvHashSet<Cell>) -> i32 {
    destinations
        .iter()
        .map(|d| cell.manhattan_to(*d))
        .min()
        .unwrap_or(i32::MAX)
}

/// Whether the network cell at `dest` already joins up with `from`.
fn is_joined(state: &State, dest: Cell, from: Cell) -> bool {
    match state.building_at(dest) {
        None => false,
        Some(b) => match b.kind() {
            BuildingKind::UndergroundPipe => {
                dest.step(b.orientation().expect("oriented")) == from
            }
            BuildingKind::Pipe | BuildingKind::StorageTank => true,
            _ => false,
        },
    }
}

/// A tunnel exit cannot surface facing a cell that blocks its open end.
fn tunnel_exit_clear(state: &State, beyond: Cell) -> bool {
    match state.building_at(beyond) {
        None => true,
        Some(b) => matches!(
            b.kind(),
            BuildingKind::UndergroundPipe | BuildingKind::Pipe | BuildingKind::StorageTank
        ),
    }
}

/// True when `beyond` holds an underground pipe along the same axis --
/// surfacing here would splice into a foreign tunnel.
fn crosses_parallel_tunnel(state: &State, beyond: Cell, travel: Direction) -> bool {
    match state.building_at(beyond) {
        Some(b) if b.kind() == BuildingKind::UndergroundPipe => {
            let facing = b.orientation().expect("oriented");
            facing.along_x() == travel.along_x()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;

    fn open_field(size: i32) -> Field {
        Field::open(State::empty(Cell::new(size, size)).with_liquid_check(true))
    }

    fn routed_pipe_cells(state: &State, liquid: Liquid) -> Vec<Cell> {
        let mut cells: Vec<Cell> = state
            .buildings()
            .filter(|b| {
                matches!(
                    b.kind(),
                    BuildingKind::Pipe | BuildingKind::UndergroundPipe
                ) && b.liquid() == Some(liquid)
            })
            .map(|b| b.anchor())
            .collect();
        cells.sort();
        cells
    }

    #[test]
    fn routes_to_an_existing_pipe_cell() {
        let field = open_field(24);
        let state = State::empty(Cell::new(24, 24))
            .add_building(Building::pipe(Cell::new(18, 4), Liquid::Water))
            .unwrap();
        let router = FlowRouter::new(&field);

        let routed = router.route(&state, Liquid::Water, Cell::new(4, 4)).unwrap();
        let cells = routed_pipe_cells(&routed, Liquid::Water);
        assert!(cells.len() > 1, "route laid no segments");
        // The chain ends within Manhattan distance 1 of the destination.
        assert!(cells
            .iter()
            .any(|c| c.manhattan_to(Cell::new(18, 4)) <= 1));
    }

    #[test]
    fn route_fails_without_destinations() {
        let field = open_field(24);
        let state = State::empty(Cell::new(24, 24));
        let router = FlowRouter::new(&field);
        assert!(router.route(&state, Liquid::Water, Cell::new(4, 4)).is_none());
    }

    #[test]
    fn route_fails_when_walled_off() {
        // A full-height wall between source and destination; too wide to
        // tunnel under in one hop is not required -- the wall has no gap
        // and tunnels cannot start or land inside it, but they can pass
        // over it. Use a double wall thicker than the tunnel span.
        let mut state = State::empty(Cell::new(30, 30));
        for x in 8..=22 {
            for y in 0..30 {
                state = state
                    .add_building(Building::empty(Cell::new(x, y), 1))
                    .unwrap();
            }
        }
        let state = state
            .add_building(Building::pipe(Cell::new(26, 4), Liquid::Water))
            .unwrap();
        let field = Field::open(state.clone());
        let router = FlowRouter::new(&field);
        assert!(router.route(&state, Liquid::Water, Cell::new(4, 4)).is_none());
    }

    #[test]
    fn tunnels_under_an_obstacle() {
        // A 1-cell-thick wall with no gaps: plain pipes cannot cross, a
        // tunnel can.
        let mut state = State::empty(Cell::new(24, 24));
        for y in 0..24 {
            state = state
                .add_building(Building::empty(Cell::new(12, y), 1))
                .unwrap();
        }
        let state = state
            .add_building(Building::pipe(Cell::new(18, 4), Liquid::Water))
            .unwrap();
        let field = Field::open(state.clone());
        let router = FlowRouter::new(&field);

        let routed = router
            .route(&state, Liquid::Water, Cell::new(4, 4))
            .expect("tunnel route exists");
        assert!(routed
            .buildings()
            .any(|b| b.kind() == BuildingKind::UndergroundPipe));
        // The wall itself is untouched.
        assert_eq!(
            routed.building_at(Cell::new(12, 4)).map(|b| b.kind()),
            Some(BuildingKind::Empty)
        );
    }

    #[test]
    fn connects_to_a_storage_tank_corner() {
        let field = open_field(24);
        let tank = Building::storage_tank(Cell::new(16, 3), Liquid::Water, Direction::Up);
        let state = State::empty(Cell::new(24, 24))
            .add_building(tank.clone())
            .unwrap();
        let router = FlowRouter::new(&field);

        let routed = router.route(&state, Liquid::Water, Cell::new(4, 4)).unwrap();
        let corners: Vec<Cell> = tank.liquid_connections().iter().map(|c| c.from).collect();
        let cells = routed_pipe_cells(&routed, Liquid::Water);
        assert!(cells
            .iter()
            .any(|c| corners.iter().any(|corner| c.manhattan_to(*corner) <= 1)));
    }

    #[test]
    fn zone_surcharge_steers_routes_away_from_staging() {
        // Destination reachable straight through the staging band or by a
        // detour around it; the cheaper detour must win.
        let base = State::empty(Cell::new(26, 26));
        let staging = crate::field::Rect::new(Cell::new(0, 10), Cell::new(18, 12));
        let outside = crate::field::Rect::new(Cell::new(25, 25), Cell::new(25, 25));
        let field = Field::new(base.clone(), staging, outside, outside, outside);
        let state = base
            .add_building(Building::pipe(Cell::new(4, 22), Liquid::Lubricant))
            .unwrap();
        let router = FlowRouter::new(&field);

        let routed = router
            .route(&state, Liquid::Lubricant, Cell::new(4, 2))
            .unwrap();
        let cells = routed_pipe_cells(&routed, Liquid::Lubricant);
        // The band is ~19 cells wide at x<=18; crossing it costs 20+ per
        // cell. The detour east around x=19.. pays small surcharges, so no
        // segment should sit deep inside the band.
        assert!(
            !cells.iter().any(|c| staging.contains_with_margin(*c, -1)),
            "route crossed the staging band: {:?}",
            cells
        );
    }
}
